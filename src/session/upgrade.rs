//! Live HTTP/1 to HTTP/2 protocol upgrade.
//!
//! An HTTP/2 settings signal on an HTTP/1-negotiated connection means the
//! peer completed the h2 preface (prior-knowledge h2c or `Upgrade: h2c`):
//! the protocol transitions, the retiring single-stream encoder is closed,
//! and a multiplexed encoder is obtained from the connection pipeline. If a
//! larger initial connection-level flow-control window is configured, the
//! positive delta is applied once; failure to apply is logged and never
//! rolls back the transition.

use std::sync::Arc;

use crate::base::ServeError;
use crate::config::ServerConfig;

use super::encoder::ResponseEncoder;
use super::state::ConnectionSession;

/// Protocol-default connection-level flow-control window (RFC 9113).
pub const DEFAULT_WINDOW_SIZE: u32 = 65_535;

/// The inbound HTTP/2 SETTINGS signal, as decoded by the codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Http2Settings {
    pub header_table_size: Option<u32>,
    pub enable_push: Option<bool>,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: Option<u32>,
    pub max_frame_size: Option<u32>,
    pub max_header_list_size: Option<u32>,
}

impl Http2Settings {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// The codec-side collaborators needed for an upgrade: the multiplexed
/// encoder and the connection-level flow controller.
pub trait ConnectionPipeline: Send {
    /// The multiplexed encoder for this connection, created on first use.
    fn multiplexed_encoder(&mut self) -> Arc<dyn ResponseEncoder>;

    /// Grow the connection-level flow-control window by `delta`.
    fn increment_connection_window(&mut self, delta: u32) -> Result<(), ServeError>;
}

/// Apply an inbound HTTP/2 settings signal to the session.
pub fn apply_h2_settings(
    session: &mut ConnectionSession,
    pipeline: &mut dyn ConnectionPipeline,
    config: &ServerConfig,
    settings: &Http2Settings,
) {
    if settings.is_empty() {
        tracing::trace!("HTTP/2 settings: <empty>");
    } else {
        tracing::debug!(?settings, "HTTP/2 settings");
    }

    session.upgrade_protocol();

    let active = session.encoder();
    if !active.is_multiplex() {
        active.close();
    }
    session.swap_encoder(pipeline.multiplexed_encoder());

    let initial = config.http2_initial_connection_window_size;
    if initial > DEFAULT_WINDOW_SIZE {
        let delta = initial - DEFAULT_WINDOW_SIZE;
        if let Err(cause) = pipeline.increment_connection_window(delta) {
            tracing::warn!(delta, error = %cause, "failed to increment connection flow-control window");
        }
    }
}
