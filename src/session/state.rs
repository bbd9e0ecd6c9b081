//! Connection session state: protocol, active encoder, TLS info, and the
//! tagged lifecycle state machine.
//!
//! The lifecycle used to be three booleans (`isReading`, `isCleaning`,
//! `handledLastRequest`); here it is a tagged state so invalid combinations
//! are unrepresentable. `Cleaning` only ever follows connection inactivity,
//! so no read burst can overlap it.

use std::sync::Arc;

use super::encoder::ResponseEncoder;
use super::protocol::SessionProtocol;

/// Negotiated TLS session details, set once on handshake completion.
#[derive(Debug, Clone)]
pub struct TlsSessionInfo {
    /// e.g. "TLSv1.3".
    pub protocol: String,
    pub cipher_suite: String,
    pub alpn: Option<String>,
}

/// Lifecycle state of a connection.
///
/// ```text
/// Open --mark_last_request--> Draining --(registry empty)--> Closed
///   \--begin_cleanup--> Cleaning --finish_cleanup--> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Accepting and dispatching requests.
    Open { reading: bool },
    /// The last request has been handled; no further requests are
    /// dispatched and the connection closes once the registry drains.
    Draining { reading: bool },
    /// Bulk disconnect cleanup in progress; per-entry registry removal is
    /// suppressed because the whole registry is cleared in one step.
    Cleaning,
    /// No further activity of any kind.
    Closed,
}

impl ConnState {
    pub fn new() -> Self {
        ConnState::Open { reading: false }
    }

    /// An inbound read burst started.
    pub fn begin_read(&mut self) {
        match self {
            ConnState::Open { reading } | ConnState::Draining { reading } => *reading = true,
            ConnState::Cleaning | ConnState::Closed => {}
        }
    }

    /// The inbound read burst completed.
    pub fn end_read(&mut self) {
        match self {
            ConnState::Open { reading } | ConnState::Draining { reading } => *reading = false,
            ConnState::Cleaning | ConnState::Closed => {}
        }
    }

    /// A request without keep-alive was accepted: nothing further will be
    /// dispatched. Sticky; a no-op once past `Open`.
    pub fn mark_last_request(&mut self) {
        if let ConnState::Open { reading } = *self {
            *self = ConnState::Draining { reading };
        }
    }

    /// Enter the bulk disconnect cleanup pass.
    pub fn begin_cleanup(&mut self) {
        if !self.is_closed() {
            *self = ConnState::Cleaning;
        }
    }

    /// The cleanup pass finished; the connection is gone.
    pub fn finish_cleanup(&mut self) {
        if matches!(self, ConnState::Cleaning) {
            *self = ConnState::Closed;
        }
    }

    pub fn close(&mut self) {
        *self = ConnState::Closed;
    }

    pub fn is_reading(&self) -> bool {
        matches!(
            self,
            ConnState::Open { reading: true } | ConnState::Draining { reading: true }
        )
    }

    pub fn is_cleaning(&self) -> bool {
        matches!(self, ConnState::Cleaning)
    }

    /// Whether the last dispatchable request has been handled.
    pub fn handled_last_request(&self) -> bool {
        matches!(self, ConnState::Draining { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ConnState::Closed)
    }
}

impl Default for ConnState {
    fn default() -> Self {
        Self::new()
    }
}

/// Foundational per-connection state: current protocol, the active response
/// encoder, TLS session info, and the lifecycle state. Owned by the
/// connection's execution context; never shared.
pub struct ConnectionSession {
    protocol: SessionProtocol,
    encoder: Arc<dyn ResponseEncoder>,
    tls: Option<TlsSessionInfo>,
    state: ConnState,
}

impl ConnectionSession {
    pub fn new(protocol: SessionProtocol, encoder: Arc<dyn ResponseEncoder>) -> Self {
        Self {
            protocol,
            encoder,
            tls: None,
            state: ConnState::new(),
        }
    }

    pub fn protocol(&self) -> SessionProtocol {
        self.protocol
    }

    /// Transition the protocol to its HTTP/2 form. Effective at most once.
    pub fn upgrade_protocol(&mut self) {
        self.protocol = self.protocol.upgraded();
    }

    /// A clone of the currently active encoder.
    pub fn encoder(&self) -> Arc<dyn ResponseEncoder> {
        self.encoder.clone()
    }

    /// Swap in a new encoder, returning the retired one.
    pub fn swap_encoder(&mut self, encoder: Arc<dyn ResponseEncoder>) -> Arc<dyn ResponseEncoder> {
        std::mem::replace(&mut self.encoder, encoder)
    }

    pub fn tls(&self) -> Option<&TlsSessionInfo> {
        self.tls.as_ref()
    }

    /// Record the TLS session negotiated on handshake completion.
    pub fn set_tls(&mut self, info: TlsSessionInfo) {
        if self.tls.is_none() {
            self.tls = Some(info);
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn state_mut(&mut self) -> &mut ConnState {
        &mut self.state
    }
}
