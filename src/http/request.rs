//! Decoded inbound requests and the inbound body handle.
//!
//! The decoder collaborator produces one [`DecodedHttpRequest`] per request,
//! already carrying its routing outcome. The core treats two structurally
//! identical requests as distinct entities, so every request gets a unique
//! [`RequestId`] token and the in-flight registry is keyed by it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime};

use bytes::Bytes;
use http::{HeaderMap, Method};
use tokio::sync::{mpsc, oneshot};

use crate::base::ServeError;
use crate::service::ServiceConfig;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity token for a decoded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Whether a request/response pair is handled as a continuous stream or as a
/// single buffered unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeType {
    Streaming,
    Aggregated,
}

impl ExchangeType {
    pub fn is_response_streaming(&self) -> bool {
        matches!(self, ExchangeType::Streaming)
    }
}

/// Routing outcome attached to a decoded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStatus {
    /// A service matched the path.
    Matched,
    /// `OPTIONS *` - answered server-wide, no service involved.
    OptionsWildcard,
    /// The request path failed validation - answered with 400.
    InvalidPath,
}

impl RoutingStatus {
    /// Whether this outcome carries a matched route.
    pub fn route_must_exist(&self) -> bool {
        matches!(self, RoutingStatus::Matched)
    }
}

/// The resolved outcome of matching an inbound path against configured
/// services, as produced by the routing collaborator.
#[derive(Clone)]
pub struct RoutingContext {
    pub status: RoutingStatus,
    /// Decoded path component.
    pub path: String,
    /// Raw query component, if any.
    pub query: Option<String>,
    /// The exact raw path string as received, used as the path-cache key.
    pub raw_path: String,
    /// The matched service; present iff `status.route_must_exist()`.
    pub route: Option<Arc<ServiceConfig>>,
}

impl RoutingContext {
    pub fn matched(
        path: impl Into<String>,
        query: Option<String>,
        raw_path: impl Into<String>,
        route: Arc<ServiceConfig>,
    ) -> Self {
        Self {
            status: RoutingStatus::Matched,
            path: path.into(),
            query,
            raw_path: raw_path.into(),
            route: Some(route),
        }
    }

    pub fn options_wildcard() -> Self {
        Self {
            status: RoutingStatus::OptionsWildcard,
            path: "*".to_string(),
            query: None,
            raw_path: "*".to_string(),
            route: None,
        }
    }

    pub fn invalid_path(raw_path: impl Into<String>) -> Self {
        let raw_path = raw_path.into();
        Self {
            status: RoutingStatus::InvalidPath,
            path: raw_path.clone(),
            query: None,
            raw_path,
            route: None,
        }
    }
}

struct BodyState {
    open: bool,
    cause: Option<ServeError>,
    waiters: Vec<oneshot::Sender<Option<ServeError>>>,
}

/// Cloneable handle to an inbound request body's lifecycle state.
///
/// The data itself flows over a channel held by [`DecodedHttpRequest`]; this
/// handle only tracks open/closed/aborted so that the dispatcher, the writer
/// and the disconnect cleanup can all settle the body without owning it.
/// `abort` is idempotent - the first cause wins.
#[derive(Clone)]
pub struct InboundBody {
    state: Arc<Mutex<BodyState>>,
}

impl InboundBody {
    /// Create the decoder-side writer and the body handle, plus the data
    /// channel receiver for the service.
    pub fn channel() -> (InboundBodyWriter, InboundBody, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let body = InboundBody {
            state: Arc::new(Mutex::new(BodyState {
                open: true,
                cause: None,
                waiters: Vec::new(),
            })),
        };
        let writer = InboundBodyWriter {
            body: body.clone(),
            data: tx,
        };
        (writer, body, rx)
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// The cause this body was aborted with, if any.
    pub fn abort_cause(&self) -> Option<ServeError> {
        self.lock().cause.clone()
    }

    /// Close the body normally: all data received, nothing more expected.
    pub fn close(&self) {
        self.settle(None);
    }

    /// Abort the body with a cause. No-op if already settled.
    pub fn abort(&self, cause: ServeError) {
        self.settle(Some(cause));
    }

    /// Resolves once the body settles, with the abort cause if it was
    /// aborted. Resolves immediately if already settled.
    pub fn when_complete(&self) -> oneshot::Receiver<Option<ServeError>> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.lock();
        if state.open {
            state.waiters.push(tx);
        } else {
            let _ = tx.send(state.cause.clone());
        }
        rx
    }

    fn settle(&self, cause: Option<ServeError>) {
        let waiters = {
            let mut state = self.lock();
            if !state.open {
                return;
            }
            state.open = false;
            state.cause = cause.clone();
            std::mem::take(&mut state.waiters)
        };
        for w in waiters {
            let _ = w.send(cause.clone());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BodyState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Decoder-side producer for an inbound body.
pub struct InboundBodyWriter {
    body: InboundBody,
    data: mpsc::UnboundedSender<Bytes>,
}

impl InboundBodyWriter {
    /// Feed a chunk of request body data. Fails once the body settled.
    pub fn write(&self, data: Bytes) -> Result<(), ServeError> {
        if !self.body.is_open() {
            return Err(self.body.abort_cause().unwrap_or(ServeError::ResponseComplete));
        }
        self.data.send(data).map_err(|_| ServeError::ClosedStream)
    }

    /// Mark the body complete from the decoder side.
    pub fn close(self) {
        self.body.close();
    }
}

/// A fully decoded inbound request, produced by the decoder collaborator.
pub struct DecodedHttpRequest {
    id: RequestId,
    stream_id: u32,
    method: Method,
    headers: HeaderMap,
    routing: RoutingContext,
    exchange: ExchangeType,
    keep_alive: bool,
    start_monotonic: Instant,
    start_wall: SystemTime,
    body: InboundBody,
    data: Option<mpsc::UnboundedReceiver<Bytes>>,
}

impl DecodedHttpRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream_id: u32,
        method: Method,
        headers: HeaderMap,
        routing: RoutingContext,
        exchange: ExchangeType,
        keep_alive: bool,
        body: InboundBody,
        data: mpsc::UnboundedReceiver<Bytes>,
    ) -> Self {
        Self {
            id: RequestId::next(),
            stream_id,
            method,
            headers,
            routing,
            exchange,
            keep_alive,
            start_monotonic: Instant::now(),
            start_wall: SystemTime::now(),
            body,
            data: Some(data),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn routing(&self) -> &RoutingContext {
        &self.routing
    }

    pub fn exchange_type(&self) -> ExchangeType {
        self.exchange
    }

    /// Whether the request's headers allow further requests on this
    /// connection after its response.
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn start_time_monotonic(&self) -> Instant {
        self.start_monotonic
    }

    pub fn start_time_wall(&self) -> SystemTime {
        self.start_wall
    }

    pub fn body(&self) -> &InboundBody {
        &self.body
    }

    /// Take the request body data stream. Returns `None` after the first
    /// call - a service consumes the body at most once.
    pub fn take_body_stream(&mut self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.data.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique() {
        let a = RequestId::next();
        let b = RequestId::next();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn body_abort_is_idempotent_first_cause_wins() {
        let (_writer, body, _rx) = InboundBody::channel();
        assert!(body.is_open());

        body.abort(ServeError::ClosedStream);
        body.abort(ServeError::ClosedSession);

        assert!(!body.is_open());
        assert_eq!(body.abort_cause(), Some(ServeError::ClosedStream));
    }

    #[tokio::test]
    async fn when_complete_fires_on_settle() {
        let (_writer, body, _rx) = InboundBody::channel();
        let waiting = body.when_complete();
        body.abort(ServeError::ResponseComplete);
        assert_eq!(waiting.await.ok().flatten(), Some(ServeError::ResponseComplete));

        // Already settled: resolves immediately.
        let late = body.when_complete();
        assert_eq!(late.await.ok().flatten(), Some(ServeError::ResponseComplete));
    }

    #[tokio::test]
    async fn writer_rejects_data_after_settle() {
        let (writer, body, mut rx) = InboundBody::channel();
        writer.write(Bytes::from_static(b"hello")).expect("open body accepts data");
        body.close();
        assert!(writer.write(Bytes::from_static(b"late")).is_err());
        assert_eq!(rx.recv().await, Some(Bytes::from_static(b"hello")));
    }
}
