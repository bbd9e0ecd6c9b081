//! Per-server tunables consumed by the connection core.
//!
//! The CLI/file surface that produces these values belongs to the embedding
//! server; this is the plain in-memory form.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::log::{AccessLogSink, TracingAccessLog};
use crate::service::{ClientAddressSource, DefaultErrorHandler, ErrorHandler};
use crate::session::DEFAULT_WINDOW_SIZE;

/// Predicate deciding whether a peer address is a trusted proxy whose
/// forwarded-address headers may be believed.
pub type TrustedProxyFilter = Arc<dyn Fn(&IpAddr) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct ServerConfig {
    /// Initial HTTP/2 connection-level flow-control window. Values above
    /// the protocol default are applied as a one-time delta on upgrade.
    pub http2_initial_connection_window_size: u32,
    /// How long a non-multiplexed connection waits after going inactive
    /// before aborting unfinished requests. Covers the race where a client
    /// disconnects right after receiving a complete response but before the
    /// writer finalizes bookkeeping. The default of one second is a
    /// heuristic, hence configurable.
    pub disconnect_grace: Duration,
    /// Client-address sources in precedence order.
    pub client_address_sources: Vec<ClientAddressSource>,
    trusted_proxy_filter: TrustedProxyFilter,
    error_handler: Arc<dyn ErrorHandler>,
    access_log: Arc<dyn AccessLogSink>,
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_http2_initial_connection_window_size(mut self, size: u32) -> Self {
        self.http2_initial_connection_window_size = size;
        self
    }

    pub fn with_disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace = grace;
        self
    }

    pub fn with_client_address_sources(mut self, sources: Vec<ClientAddressSource>) -> Self {
        self.client_address_sources = sources;
        self
    }

    pub fn with_trusted_proxy_filter(
        mut self,
        filter: impl Fn(&IpAddr) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.trusted_proxy_filter = Arc::new(filter);
        self
    }

    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = handler;
        self
    }

    pub fn with_access_log(mut self, sink: Arc<dyn AccessLogSink>) -> Self {
        self.access_log = sink;
        self
    }

    pub fn trusted_proxy_filter(&self) -> &TrustedProxyFilter {
        &self.trusted_proxy_filter
    }

    pub fn error_handler(&self) -> Arc<dyn ErrorHandler> {
        self.error_handler.clone()
    }

    pub fn access_log(&self) -> Arc<dyn AccessLogSink> {
        self.access_log.clone()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http2_initial_connection_window_size: DEFAULT_WINDOW_SIZE,
            disconnect_grace: Duration::from_secs(1),
            client_address_sources: vec![
                ClientAddressSource::Forwarded,
                ClientAddressSource::XForwardedFor,
                ClientAddressSource::Peer,
            ],
            // Trust nothing by default: forwarded headers are spoofable.
            trusted_proxy_filter: Arc::new(|_| false),
            error_handler: Arc::new(DefaultErrorHandler),
            access_log: Arc::new(TracingAccessLog),
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field(
                "http2_initial_connection_window_size",
                &self.http2_initial_connection_window_size,
            )
            .field("disconnect_grace", &self.disconnect_grace)
            .field("client_address_sources", &self.client_address_sources)
            .finish_non_exhaustive()
    }
}
