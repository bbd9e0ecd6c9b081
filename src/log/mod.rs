//! Request log lifecycle.
//!
//! Every request carries a [`RequestLogBuilder`]; the dispatcher records the
//! request end, the writer records the response transitions, and once both
//! sides are settled the finalized [`RequestLog`] is handed to the
//! [`AccessLogSink`] exactly once. All transitions are first-wins: a later
//! write failure never overwrites a cause that was specified first.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use http::{Method, StatusCode};
use tokio::sync::oneshot;

use crate::base::ServeError;
use crate::http::ResponseHead;

/// Where finalized request logs go. Formatting is the sink's business.
pub trait AccessLogSink: Send + Sync {
    fn log(&self, log: &RequestLog);
}

/// Default sink: structured `tracing` event per completed request.
#[derive(Debug, Default)]
pub struct TracingAccessLog;

impl AccessLogSink for TracingAccessLog {
    fn log(&self, log: &RequestLog) {
        tracing::info!(
            method = %log.method,
            path = %log.path,
            status = log.status.map(|s| s.as_u16()).unwrap_or(0),
            response_length = log.response_length,
            duration_ms = log.total_duration.map(|d| d.as_millis() as u64),
            request_cause = log.request_cause.as_ref().map(|c| c.to_string()),
            response_cause = log.response_cause.as_ref().map(|c| c.to_string()),
            "request complete"
        );
    }
}

/// Immutable snapshot of a completed request/response pair.
#[derive(Debug, Clone)]
pub struct RequestLog {
    pub method: Method,
    pub path: String,
    pub request_start: SystemTime,
    pub request_cause: Option<ServeError>,
    pub status: Option<StatusCode>,
    pub response_length: u64,
    pub response_cause: Option<ServeError>,
    pub response_duration: Option<Duration>,
    pub total_duration: Option<Duration>,
}

struct LogInner {
    method: Method,
    path: String,
    start_wall: SystemTime,
    start_monotonic: Instant,
    request_end: Option<Option<ServeError>>,
    response_start: Option<Instant>,
    status: Option<StatusCode>,
    response_length: u64,
    response_end: Option<Option<ServeError>>,
    delivered: bool,
    waiters: Vec<oneshot::Sender<RequestLog>>,
}

impl LogInner {
    fn is_complete(&self) -> bool {
        self.request_end.is_some() && self.response_end.is_some()
    }

    fn snapshot(&self) -> RequestLog {
        RequestLog {
            method: self.method.clone(),
            path: self.path.clone(),
            request_start: self.start_wall,
            request_cause: self.request_end.clone().flatten(),
            status: self.status,
            response_length: self.response_length,
            response_cause: self.response_end.clone().flatten(),
            response_duration: self
                .response_start
                .filter(|_| self.response_end.is_some())
                .map(|start| start.elapsed()),
            total_duration: self
                .is_complete()
                .then(|| self.start_monotonic.elapsed()),
        }
    }
}

/// Cloneable builder tracking one request's log through its lifecycle.
#[derive(Clone)]
pub struct RequestLogBuilder {
    inner: Arc<Mutex<LogInner>>,
    sink: Arc<dyn AccessLogSink>,
}

impl RequestLogBuilder {
    pub fn new(method: Method, path: impl Into<String>, sink: Arc<dyn AccessLogSink>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LogInner {
                method,
                path: path.into(),
                start_wall: SystemTime::now(),
                start_monotonic: Instant::now(),
                request_end: None,
                response_start: None,
                status: None,
                response_length: 0,
                response_end: None,
                delivered: false,
                waiters: Vec::new(),
            })),
            sink,
        }
    }

    /// The request side finished normally.
    pub fn end_request(&self) {
        self.set_request_end(None);
    }

    /// The request side finished with a cause.
    pub fn end_request_with(&self, cause: ServeError) {
        self.set_request_end(Some(cause));
    }

    /// The first response byte is about to be produced.
    pub fn start_response(&self) {
        let mut inner = self.lock();
        if inner.response_start.is_none() {
            inner.response_start = Some(Instant::now());
        }
    }

    /// Record the response headers as written to the wire.
    pub fn response_headers(&self, head: &ResponseHead) {
        let mut inner = self.lock();
        if inner.status.is_none() {
            inner.status = Some(head.status);
        }
    }

    /// Accumulate written response body length.
    pub fn increase_response_length(&self, n: usize) {
        self.lock().response_length += n as u64;
    }

    /// The response side finished normally.
    pub fn end_response(&self) {
        self.set_response_end(None);
    }

    /// The response side finished with a cause. The first specified cause
    /// wins over any later one.
    pub fn end_response_with(&self, cause: ServeError) {
        self.set_response_end(Some(cause));
    }

    /// Resolves with the finalized log once both sides have ended.
    /// Resolves immediately if already complete.
    pub fn when_complete(&self) -> oneshot::Receiver<RequestLog> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.lock();
        if inner.is_complete() {
            let _ = tx.send(inner.snapshot());
        } else {
            inner.waiters.push(tx);
        }
        rx
    }

    fn set_request_end(&self, cause: Option<ServeError>) {
        let mut inner = self.lock();
        if inner.request_end.is_none() {
            inner.request_end = Some(cause);
        }
        self.deliver_if_complete(inner);
    }

    fn set_response_end(&self, cause: Option<ServeError>) {
        let mut inner = self.lock();
        if inner.response_end.is_none() {
            inner.response_end = Some(cause);
        }
        self.deliver_if_complete(inner);
    }

    fn deliver_if_complete(&self, mut inner: std::sync::MutexGuard<'_, LogInner>) {
        if !inner.is_complete() || inner.delivered {
            return;
        }
        inner.delivered = true;
        let log = inner.snapshot();
        let waiters = std::mem::take(&mut inner.waiters);
        drop(inner);

        self.sink.log(&log);
        for w in waiters {
            let _ = w.send(log.clone());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
