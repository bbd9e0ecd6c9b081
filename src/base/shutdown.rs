//! Graceful-shutdown accounting shared across every connection.
//!
//! One counter per server. Each connection increments it when a
//! non-transient request is dispatched and decrements it when that request's
//! response write completes, so a server can drain in-flight work before
//! stopping. The counter is the only state shared between connections.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cloneable handle to the shared pending-response counter.
#[derive(Debug, Clone, Default)]
pub struct GracefulShutdown {
    pending: Arc<AtomicU64>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dispatched non-transient request.
    pub fn inc(&self) {
        self.pending.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the completion of a previously recorded request.
    pub fn dec(&self) {
        let prev = self.pending.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "shutdown counter underflow");
    }

    /// Number of dispatched requests whose responses have not finished.
    pub fn pending_responses(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }

    /// True once every recorded request has completed.
    pub fn is_quiescent(&self) -> bool {
        self.pending_responses() == 0
    }
}
