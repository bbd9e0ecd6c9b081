//! Error taxonomy for the connection core.
//!
//! One crate-wide enum. Connection-level kinds (`ClosedSession`) abort every
//! in-flight request; stream-level kinds (`ClosedStream`) abort exactly one;
//! `ResponseComplete` is the benign "stop consuming the request body, the
//! response is already decided" signal and is never treated as a failure of
//! the request itself.

use http::StatusCode;
use thiserror::Error;

use crate::session::SessionProtocol;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServeError {
    /// The whole connection is gone. Every in-flight response is aborted
    /// with this and the channel is force-closed.
    #[error("Connection closed")]
    ClosedSession,

    /// A single multiplexed stream was reset by the peer. Benign; never
    /// logged as unexpected.
    #[error("Stream closed")]
    ClosedStream,

    /// Malformed request, e.g. an invalid request path. Renders as 400.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The response has already been decided; no further request body
    /// consumption is needed. Benign completion signal.
    #[error("Response already complete")]
    ResponseComplete,

    /// A service short-circuited with a specific status. Classified as
    /// "response already decided": the inbound body is closed benignly and
    /// the error handler renders the status.
    #[error("Service responded with status {0}")]
    HttpStatus(StatusCode),

    /// Any other failure raised by service code. Renders as 500.
    #[error("Service exception: {0}")]
    ServiceException(String),
}

impl ServeError {
    /// A failure kind meaning the response is already decided, so the
    /// inbound body should be aborted with [`ServeError::ResponseComplete`]
    /// rather than with the failure itself.
    pub fn is_response_decided(&self) -> bool {
        matches!(self, ServeError::ResponseComplete | ServeError::HttpStatus(_))
    }

    /// Benign kinds that are part of normal connection teardown and must
    /// never be logged as unexpected.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            ServeError::ClosedSession | ServeError::ClosedStream | ServeError::ResponseComplete
        )
    }

    pub fn service(msg: impl Into<String>) -> Self {
        ServeError::ServiceException(msg.into())
    }
}

/// Log a failure unless it is an expected part of connection teardown.
pub fn log_if_unexpected(protocol: SessionProtocol, cause: &ServeError) {
    if cause.is_expected() {
        return;
    }
    tracing::warn!(protocol = %protocol, error = %cause, "unexpected connection error");
}
