//! Service-side collaborator traits and the per-request context.

pub mod addr;

use std::cell::RefCell;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use bytes::Bytes;
use http::StatusCode;

use crate::base::ServeError;
use crate::http::{DecodedHttpRequest, ExchangeType, HttpResponse, RequestId, ResponseHead};
use crate::log::RequestLogBuilder;
use crate::session::{SessionProtocol, TlsSessionInfo};

pub use addr::{determine_proxied_addresses, ClientAddressSource, ProxiedAddresses};

/// The application. Invoked synchronously; the returned response may
/// complete asynchronously later.
pub trait HttpService: Send + Sync {
    fn serve(
        &self,
        ctx: &Arc<ServiceRequestContext>,
        req: &mut DecodedHttpRequest,
    ) -> Result<HttpResponse, ServeError>;

    /// Whether the parsed form of this path should be cached for reuse by
    /// future decodes of the identical raw path.
    fn should_cache_path(&self, _path: &str, _query: Option<&str>) -> bool {
        false
    }
}

/// A configured service entry as resolved by the routing collaborator.
pub struct ServiceConfig {
    name: String,
    service: Arc<dyn HttpService>,
    /// Transient services (e.g. health probes) are excluded from
    /// graceful-shutdown accounting.
    transient: bool,
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, service: Arc<dyn HttpService>) -> Self {
        Self {
            name: name.into(),
            service,
            transient: false,
        }
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service(&self) -> Arc<dyn HttpService> {
        self.service.clone()
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }
}

/// Converts a failed service response into the response actually written.
pub trait ErrorHandler: Send + Sync {
    fn on_service_exception(&self, ctx: &ServiceRequestContext, cause: &ServeError)
        -> HttpResponse;
}

/// Default error handler: status short-circuits keep their status, protocol
/// violations render 400, everything else 500, with a diagnostic plaintext
/// body unless the status forbids one.
#[derive(Debug, Default)]
pub struct DefaultErrorHandler;

impl ErrorHandler for DefaultErrorHandler {
    fn on_service_exception(
        &self,
        _ctx: &ServiceRequestContext,
        cause: &ServeError,
    ) -> HttpResponse {
        let status = match cause {
            ServeError::HttpStatus(status) => *status,
            ServeError::ProtocolViolation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if ResponseHead::is_content_always_empty(status) {
            return HttpResponse::of_head(ResponseHead::new(status), Bytes::new());
        }
        let body = Bytes::from(format!(
            "{} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        ));
        HttpResponse::of_head(ResponseHead::plain_text(status), body)
    }
}

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Arc<ServiceRequestContext>>> = const { RefCell::new(Vec::new()) };
}

/// Everything a service invocation sees about its request: identity,
/// timing, resolved client address, routing result and exchange type, plus
/// the request log builder.
pub struct ServiceRequestContext {
    request_id: RequestId,
    protocol: SessionProtocol,
    client_addr: IpAddr,
    proxied_addresses: ProxiedAddresses,
    path: String,
    query: Option<String>,
    exchange: ExchangeType,
    start_monotonic: Instant,
    start_wall: SystemTime,
    tls: Option<TlsSessionInfo>,
    log: RequestLogBuilder,
    service: Option<Arc<ServiceConfig>>,
}

impl ServiceRequestContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        request_id: RequestId,
        protocol: SessionProtocol,
        client_addr: IpAddr,
        proxied_addresses: ProxiedAddresses,
        path: impl Into<String>,
        query: Option<String>,
        exchange: ExchangeType,
        start_monotonic: Instant,
        start_wall: SystemTime,
        tls: Option<TlsSessionInfo>,
        log: RequestLogBuilder,
        service: Option<Arc<ServiceConfig>>,
    ) -> Self {
        Self {
            request_id,
            protocol,
            client_addr,
            proxied_addresses,
            path: path.into(),
            query,
            exchange,
            start_monotonic,
            start_wall,
            tls,
            log,
            service,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn protocol(&self) -> SessionProtocol {
        self.protocol
    }

    /// The resolved client address, trusted-proxy aware.
    pub fn client_addr(&self) -> IpAddr {
        self.client_addr
    }

    pub fn proxied_addresses(&self) -> &ProxiedAddresses {
        &self.proxied_addresses
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn exchange_type(&self) -> ExchangeType {
        self.exchange
    }

    pub fn start_time_monotonic(&self) -> Instant {
        self.start_monotonic
    }

    pub fn start_time_wall(&self) -> SystemTime {
        self.start_wall
    }

    pub fn tls(&self) -> Option<&TlsSessionInfo> {
        self.tls.as_ref()
    }

    pub fn log(&self) -> &RequestLogBuilder {
        &self.log
    }

    pub fn service_config(&self) -> Option<&Arc<ServiceConfig>> {
        self.service.as_ref()
    }

    /// Activate this context for the current scope. The returned guard pops
    /// it on drop, on every exit path including panics.
    pub fn push(self: &Arc<Self>) -> ContextGuard {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(self.clone()));
        ContextGuard { _not_send: std::marker::PhantomData }
    }

    /// The context active in the current scope, if any.
    pub fn current() -> Option<Arc<ServiceRequestContext>> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().cloned())
    }
}

/// RAII guard deactivating a pushed [`ServiceRequestContext`].
pub struct ContextGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}
