//! Response objects handed from a service to the response writer.
//!
//! A response is either already complete (`Full`), produced incrementally
//! over a frame channel (`Streaming`), or an immediate failure that the
//! error-recovery hook will turn into a real response before anything is
//! written.

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode};
use tokio::sync::mpsc;

use crate::base::ServeError;

/// Status line plus headers of an outbound response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
        }
    }

    /// Head for a `text/plain; charset=utf-8` diagnostic body.
    pub fn plain_text(status: StatusCode) -> Self {
        let mut head = Self::new(status);
        head.headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        head
    }

    /// Statuses that never carry a body (1xx, 204, 304).
    pub fn is_content_always_empty(status: StatusCode) -> bool {
        status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED
    }
}

/// One frame of a streaming response. The stream ends when the channel
/// closes; an `Error` frame fails the response with its cause.
#[derive(Debug)]
pub enum ResFrame {
    Head(ResponseHead),
    Data(Bytes),
    Error(ServeError),
}

pub(crate) enum ResponseKind {
    Full { head: ResponseHead, body: Bytes },
    Streaming(mpsc::UnboundedReceiver<ResFrame>),
    Failure(ServeError),
}

/// A response object returned by a service. May complete asynchronously
/// later; the writer drives it on the connection's execution context.
pub struct HttpResponse {
    pub(crate) kind: ResponseKind,
}

impl HttpResponse {
    /// An empty-bodied response with the given status.
    pub fn of(status: StatusCode) -> Self {
        Self::of_data(status, Bytes::new())
    }

    /// A complete response with the given status and body.
    pub fn of_data(status: StatusCode, body: Bytes) -> Self {
        Self {
            kind: ResponseKind::Full {
                head: ResponseHead::new(status),
                body,
            },
        }
    }

    /// A complete response from an explicit head and body.
    pub fn of_head(head: ResponseHead, body: Bytes) -> Self {
        Self {
            kind: ResponseKind::Full { head, body },
        }
    }

    /// A response that resolves as the given failure. The dispatch pipeline
    /// recovers it through the configured error handler.
    pub fn of_failure(cause: ServeError) -> Self {
        Self {
            kind: ResponseKind::Failure(cause),
        }
    }

    /// A streaming response plus its producer handle.
    pub fn streaming() -> (ResponseStream, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ResponseStream { tx },
            Self {
                kind: ResponseKind::Streaming(rx),
            },
        )
    }

    /// The failure cause, if this is an immediate failure.
    pub fn failure_cause(&self) -> Option<&ServeError> {
        match &self.kind {
            ResponseKind::Failure(cause) => Some(cause),
            _ => None,
        }
    }
}

/// Producer side of a streaming response. Dropping it without an error frame
/// ends the stream normally.
pub struct ResponseStream {
    tx: mpsc::UnboundedSender<ResFrame>,
}

impl ResponseStream {
    pub fn send_head(&self, head: ResponseHead) -> Result<(), ServeError> {
        self.send(ResFrame::Head(head))
    }

    pub fn send_data(&self, data: Bytes) -> Result<(), ServeError> {
        self.send(ResFrame::Data(data))
    }

    /// Fail the response. Consumes the handle: a response fails at most once.
    pub fn fail(self, cause: ServeError) {
        let _ = self.tx.send(ResFrame::Error(cause));
    }

    /// End the stream normally.
    pub fn close(self) {}

    fn send(&self, frame: ResFrame) -> Result<(), ServeError> {
        self.tx.send(frame).map_err(|_| ServeError::ClosedStream)
    }
}
