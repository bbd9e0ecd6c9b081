//! The swappable response-encoder capability.
//!
//! The wire codec collaborator implements [`ResponseEncoder`]; the core only
//! ever writes through it. A connection starts with a single-stream encoder
//! and may swap to a multiplexed one exactly once, on HTTP/2 upgrade. The
//! swap happens on the connection's own execution context, never under a
//! separate lock.

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::base::ServeError;
use crate::http::{RequestId, ResponseHead};

/// A pending encoder write. Resolves once the bytes are accepted for the
/// wire (or the write failed).
pub type WriteOp = BoxFuture<'static, Result<(), ServeError>>;

/// Write capability for one connection's responses.
///
/// Writes are enqueued by the method call itself; the returned [`WriteOp`]
/// only observes completion and may be dropped without cancelling the write.
/// Callers rely on this to await only the last op of a headers+data pair.
///
/// After [`close`](ResponseEncoder::close), pending and late writes must
/// resolve with [`ServeError::ClosedSession`] so that a response completing
/// after disconnection surfaces as "connection closed" instead of
/// succeeding silently.
pub trait ResponseEncoder: Send + Sync {
    /// Write the response status line / HEADERS frame.
    fn write_headers(
        &self,
        id: RequestId,
        stream_id: u32,
        head: ResponseHead,
        end_stream: bool,
    ) -> WriteOp;

    /// Write a chunk of response body.
    fn write_data(&self, id: RequestId, stream_id: u32, data: Bytes, end_stream: bool) -> WriteOp;

    /// Write an empty terminal buffer; resolves once it has flushed. Used
    /// to drain the connection before the final close.
    fn write_empty_final(&self) -> WriteOp;

    /// Close the encoder. Idempotent.
    fn close(&self);

    /// Whether this encoder multiplexes logical streams (HTTP/2).
    fn is_multiplex(&self) -> bool;

    /// HTTP/1 only: whether a `connection: close` header has already been
    /// emitted on this connection (e.g. max connection age reached).
    fn is_close_header_sent(&self) -> bool {
        false
    }

    /// Flush buffered writes. Invoked after responses produced outside a
    /// read burst.
    fn flush(&self) {}
}

/// An already-resolved successful write.
pub fn write_op_ok() -> WriteOp {
    Box::pin(futures::future::ready(Ok(())))
}

/// An already-resolved failed write.
pub fn write_op_err(cause: ServeError) -> WriteOp {
    Box::pin(futures::future::ready(Err(cause)))
}
