//! The per-connection request/response lifecycle driver.
//!
//! A [`ConnectionHandler`] owns all connection-scoped state and is driven by
//! a single event queue, so no state here needs locking. The transport side
//! (decoder, timers, TLS) sends [`ConnEvent`]s through a [`ConnectionHandle`];
//! response writers run as separate tasks and report back with `WriteDone`.
//!
//! Responsibilities, in rough request order: dispatch decoded requests to
//! their matched service, answer server-wide `OPTIONS *` and invalid paths
//! without a service, track every unfinished request in a registry keyed by
//! [`RequestId`], apply the one-time cleartext HTTP/2 upgrade, and on
//! disconnect abort whatever is still in flight.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, OnceLock};
use std::time::{Instant, SystemTime};

use bytes::Bytes;
use http::{HeaderValue, Method, StatusCode};
use tokio::sync::{mpsc, oneshot};

use crate::base::error::log_if_unexpected;
use crate::base::{GracefulShutdown, ServeError};
use crate::config::ServerConfig;
use crate::http::path::PathAndQuery;
use crate::http::request::{DecodedHttpRequest, InboundBody, RequestId, RoutingStatus};
use crate::http::response::{HttpResponse, ResponseHead};
use crate::log::RequestLogBuilder;
use crate::service::{determine_proxied_addresses, ProxiedAddresses, ServiceRequestContext};

use super::encoder::ResponseEncoder;
use super::protocol::SessionProtocol;
use super::state::{ConnectionSession, TlsSessionInfo};
use super::upgrade::{apply_h2_settings, ConnectionPipeline, Http2Settings};
use super::writer::{respond_early, ResponseWriter};

const MSG_INVALID_REQUEST_PATH: &str = "400 Bad Request\nInvalid request path";

static KNOWN_METHODS: [Method; 9] = [
    Method::CONNECT,
    Method::DELETE,
    Method::GET,
    Method::HEAD,
    Method::OPTIONS,
    Method::PATCH,
    Method::POST,
    Method::PUT,
    Method::TRACE,
];

/// Comma-joined method names for the `allow` header of `OPTIONS *`
/// responses, sorted for a deterministic wire form.
fn allowed_methods_string() -> &'static str {
    static ALLOWED: OnceLock<String> = OnceLock::new();
    ALLOWED.get_or_init(|| {
        let mut names: Vec<&str> = KNOWN_METHODS.iter().map(|m| m.as_str()).collect();
        names.sort_unstable();
        names.join(",")
    })
}

/// Connection-scoped events, delivered in order through the handler's queue.
pub enum ConnEvent {
    /// An HTTP/2 SETTINGS frame arrived. On a non-multiplexed session this
    /// signals the cleartext upgrade.
    H2Settings(Http2Settings),
    /// A fully decoded request, ready for dispatch.
    Request(DecodedHttpRequest),
    /// The current inbound read burst completed.
    ReadComplete,
    /// TLS handshake finished.
    TlsHandshake(TlsSessionInfo),
    /// The peer reset a single stream.
    StreamReset(RequestId),
    /// The transport connection went away.
    Inactive,
    /// The post-disconnect grace period elapsed.
    CleanupDeadline,
    /// A response writer finished, successfully or not. `transient`
    /// responses (early responses, transient services) are excluded from
    /// graceful-shutdown accounting.
    WriteDone {
        id: RequestId,
        transient: bool,
        result: Result<(), ServeError>,
    },
}

/// Cloneable sender half used by the transport side to feed the handler.
#[derive(Clone)]
pub struct ConnectionHandle {
    tx: mpsc::UnboundedSender<ConnEvent>,
}

impl ConnectionHandle {
    pub fn request(&self, req: DecodedHttpRequest) {
        let _ = self.tx.send(ConnEvent::Request(req));
    }

    pub fn h2_settings(&self, settings: Http2Settings) {
        let _ = self.tx.send(ConnEvent::H2Settings(settings));
    }

    pub fn read_complete(&self) {
        let _ = self.tx.send(ConnEvent::ReadComplete);
    }

    pub fn tls_handshake(&self, info: TlsSessionInfo) {
        let _ = self.tx.send(ConnEvent::TlsHandshake(info));
    }

    pub fn stream_reset(&self, id: RequestId) {
        let _ = self.tx.send(ConnEvent::StreamReset(id));
    }

    pub fn inactive(&self) {
        let _ = self.tx.send(ConnEvent::Inactive);
    }
}

/// Registry entry for a dispatched request whose response has not finished.
struct Unfinished {
    abort: Option<oneshot::Sender<ServeError>>,
    body: InboundBody,
}

impl Unfinished {
    fn abort_response(&mut self, cause: ServeError, cancel_inbound: bool) {
        if let Some(abort) = self.abort.take() {
            let _ = abort.send(cause.clone());
        }
        if cancel_inbound {
            self.body.abort(cause);
        }
    }
}

/// Drives one connection's request/response lifecycle to completion.
pub struct ConnectionHandler {
    config: Arc<ServerConfig>,
    shutdown: GracefulShutdown,
    session: ConnectionSession,
    pipeline: Box<dyn ConnectionPipeline>,
    peer: SocketAddr,
    /// Preset proxied addresses (e.g. from the PROXY protocol), used when
    /// the peer is not a trusted proxy.
    proxied: Option<ProxiedAddresses>,
    unfinished: HashMap<RequestId, Unfinished>,
    events: mpsc::UnboundedReceiver<ConnEvent>,
    tx: mpsc::UnboundedSender<ConnEvent>,
    active_writers: usize,
}

impl ConnectionHandler {
    pub fn new(
        config: Arc<ServerConfig>,
        shutdown: GracefulShutdown,
        encoder: Arc<dyn ResponseEncoder>,
        protocol: SessionProtocol,
        peer: SocketAddr,
        proxied: Option<ProxiedAddresses>,
        pipeline: Box<dyn ConnectionPipeline>,
    ) -> (Self, ConnectionHandle) {
        let (tx, events) = mpsc::unbounded_channel();
        let handle = ConnectionHandle { tx: tx.clone() };
        let handler = Self {
            config,
            shutdown,
            session: ConnectionSession::new(protocol, encoder),
            pipeline,
            peer,
            proxied,
            unfinished: HashMap::new(),
            events,
            tx,
            active_writers: 0,
        };
        (handler, handle)
    }

    pub fn protocol(&self) -> SessionProtocol {
        self.session.protocol()
    }

    /// Number of dispatched requests whose responses have not finished.
    pub fn unfinished_requests(&self) -> usize {
        self.unfinished.len()
    }

    /// Run the event loop until the connection is fully closed and every
    /// writer has reported in.
    pub async fn run(mut self) {
        loop {
            if self.session.state().is_closed() && self.active_writers == 0 {
                return;
            }
            match self.events.recv().await {
                Some(event) => self.handle_event(event),
                // The handler holds its own sender, so this only happens if
                // the loop is driven externally after teardown.
                None => return,
            }
        }
    }

    pub fn handle_event(&mut self, event: ConnEvent) {
        match event {
            ConnEvent::H2Settings(settings) => {
                self.session.state_mut().begin_read();
                // Only a settings frame on an HTTP/1-negotiated session
                // performs the upgrade; later frames are informational.
                if !self.session.protocol().is_multiplex() {
                    apply_h2_settings(
                        &mut self.session,
                        self.pipeline.as_mut(),
                        &self.config,
                        &settings,
                    );
                } else {
                    tracing::trace!(?settings, "HTTP/2 settings on multiplexed session");
                }
            }
            ConnEvent::Request(req) => {
                self.session.state_mut().begin_read();
                self.handle_request(req);
            }
            ConnEvent::ReadComplete => {
                self.session.state_mut().end_read();
                self.session.encoder().flush();
            }
            ConnEvent::TlsHandshake(info) => self.session.set_tls(info),
            ConnEvent::StreamReset(id) => {
                if let Some(unfinished) = self.unfinished.get_mut(&id) {
                    unfinished.abort_response(ServeError::ClosedStream, true);
                }
            }
            ConnEvent::Inactive => self.handle_inactive(),
            ConnEvent::CleanupDeadline => self.cleanup(),
            ConnEvent::WriteDone { id, transient, result } => {
                self.handle_write_done(id, transient, result)
            }
        }
    }

    fn handle_request(&mut self, mut req: DecodedHttpRequest) {
        let state = self.session.state();
        // Anything after the last request is silently dropped; the
        // connection is on its way out.
        if state.handled_last_request() || state.is_cleaning() || state.is_closed() {
            return;
        }

        if !req.is_keep_alive() {
            self.session.state_mut().mark_last_request();
        }

        let proxied = determine_proxied_addresses(
            req.headers(),
            &self.config.client_address_sources,
            &**self.config.trusted_proxy_filter(),
            self.peer,
            self.proxied.as_ref(),
        );
        let client_addr = proxied.source.ip();

        // Once a close header went out (e.g. max connection age), nothing
        // more may be written on a non-multiplexed session.
        if !self.session.protocol().is_multiplex() && self.session.encoder().is_close_header_sent()
        {
            self.close_channel();
            return;
        }

        match req.routing().status {
            RoutingStatus::OptionsWildcard => {
                let ctx = self.early_context(&req, proxied, client_addr);
                let mut head = ResponseHead::new(StatusCode::OK);
                head.headers.insert(
                    http::header::ALLOW,
                    HeaderValue::from_static(allowed_methods_string()),
                );
                self.finish_early(&ctx, &req, head, Bytes::new(), None);
            }
            RoutingStatus::InvalidPath => {
                tracing::debug!(id = %req.id(), raw_path = %req.routing().raw_path, "invalid request path");
                let ctx = self.early_context(&req, proxied, client_addr);
                let head = ResponseHead::plain_text(StatusCode::BAD_REQUEST);
                self.finish_early(
                    &ctx,
                    &req,
                    head,
                    Bytes::from_static(MSG_INVALID_REQUEST_PATH.as_bytes()),
                    Some(ServeError::ProtocolViolation(MSG_INVALID_REQUEST_PATH.into())),
                );
            }
            RoutingStatus::Matched => self.invoke_service(&mut req, proxied, client_addr),
        }
    }

    fn invoke_service(
        &mut self,
        req: &mut DecodedHttpRequest,
        proxied: ProxiedAddresses,
        client_addr: IpAddr,
    ) {
        let Some(service_cfg) = req.routing().route.clone() else {
            tracing::error!(id = %req.id(), "matched routing outcome without a route");
            return;
        };
        let service = service_cfg.service();

        let log = RequestLogBuilder::new(
            req.method().clone(),
            req.routing().path.clone(),
            self.config.access_log(),
        );
        let ctx = Arc::new(ServiceRequestContext::new(
            req.id(),
            self.session.protocol(),
            client_addr,
            proxied,
            req.routing().path.clone(),
            req.routing().query.clone(),
            req.exchange_type(),
            req.start_time_monotonic(),
            req.start_time_wall(),
            self.session.tls().cloned(),
            log.clone(),
            Some(service_cfg.clone()),
        ));

        let response = {
            let _guard = ctx.push();
            match service.serve(&ctx, req) {
                Ok(response) => response,
                Err(cause) => {
                    // The response is decided; no point consuming the rest
                    // of the body.
                    if cause.is_response_decided() {
                        req.body().abort(ServeError::ResponseComplete);
                    } else {
                        req.body().abort(cause.clone());
                    }
                    HttpResponse::of_failure(cause)
                }
            }
        };

        let transient = service_cfg.is_transient();
        if !transient {
            self.shutdown.inc();
        }

        let (abort_tx, abort_rx) = oneshot::channel();
        self.unfinished.insert(
            req.id(),
            Unfinished {
                abort: Some(abort_tx),
                body: req.body().clone(),
            },
        );

        // Path-cache side effect: applied once the whole exchange completes
        // with a non-error status, so hostile paths never poison the cache.
        if service.should_cache_path(&req.routing().path, req.routing().query.as_deref()) {
            let parsed =
                PathAndQuery::of(req.routing().path.clone(), req.routing().query.clone());
            let raw = req.routing().raw_path.clone();
            let completion = log.when_complete();
            tokio::spawn(async move {
                if let Ok(final_log) = completion.await {
                    let ok = final_log
                        .status
                        .map(|s| (200..400).contains(&s.as_u16()))
                        .unwrap_or(false);
                    if ok {
                        parsed.store_in_cache(&raw);
                    }
                }
            });
        }

        // The request side of the log settles when the inbound body does.
        let completion = req.body().when_complete();
        let req_log = log.clone();
        tokio::spawn(async move {
            match completion.await.ok().flatten() {
                None | Some(ServeError::ResponseComplete) => req_log.end_request(),
                Some(cause) => req_log.end_request_with(cause),
            }
        });

        self.active_writers += 1;
        let writer = ResponseWriter::new(
            self.session.encoder(),
            self.tx.clone(),
            ctx,
            self.config.error_handler(),
            req.id(),
            req.stream_id(),
            req.method().clone(),
            req.exchange_type(),
            !self.session.protocol().is_multiplex(),
            transient,
            req.body().clone(),
        );
        tokio::spawn(writer.run(response, abort_rx));
    }

    /// A minimal context for responses produced without a service.
    fn early_context(
        &self,
        req: &DecodedHttpRequest,
        proxied: ProxiedAddresses,
        client_addr: IpAddr,
    ) -> Arc<ServiceRequestContext> {
        let log = RequestLogBuilder::new(
            req.method().clone(),
            req.routing().path.clone(),
            self.config.access_log(),
        );
        Arc::new(ServiceRequestContext::new(
            req.id(),
            self.session.protocol(),
            client_addr,
            proxied,
            req.routing().path.clone(),
            req.routing().query.clone(),
            req.exchange_type(),
            Instant::now(),
            SystemTime::now(),
            self.session.tls().cloned(),
            log,
            None,
        ))
    }

    fn finish_early(
        &mut self,
        ctx: &Arc<ServiceRequestContext>,
        req: &DecodedHttpRequest,
        head: ResponseHead,
        content: Bytes,
        cause: Option<ServeError>,
    ) {
        self.active_writers += 1;
        respond_early(
            self.session.encoder(),
            self.tx.clone(),
            ctx,
            req,
            head,
            content,
            cause,
            self.session.protocol().is_multiplex(),
            self.session.state().is_reading(),
        );
    }

    fn handle_write_done(
        &mut self,
        id: RequestId,
        transient: bool,
        result: Result<(), ServeError>,
    ) {
        self.active_writers = self.active_writers.saturating_sub(1);
        if !transient {
            self.shutdown.dec();
        }
        // During the bulk cleanup pass the registry is cleared in one step;
        // per-entry removal would mutate it mid-iteration.
        if !self.session.state().is_cleaning() {
            self.unfinished.remove(&id);
        }

        if let Err(cause) = &result {
            match cause {
                // A single stream failed; the connection survives.
                ServeError::ClosedStream => {}
                ServeError::ClosedSession => self.close_channel(),
                other => {
                    log_if_unexpected(self.session.protocol(), other);
                    self.close_channel();
                }
            }
            return;
        }

        // Drained: the last dispatchable request has finished and nothing
        // else is in flight. Signal end-of-stream and close. The final
        // write is tracked like any other so the event loop outlives it.
        if self.unfinished.is_empty() && self.session.state().handled_last_request() {
            let encoder = self.session.encoder();
            self.session.state_mut().close();
            self.active_writers += 1;
            let tx = self.tx.clone();
            tokio::spawn(async move {
                let result = encoder.write_empty_final().await;
                encoder.close();
                let _ = tx.send(ConnEvent::WriteDone {
                    id,
                    transient: true,
                    result,
                });
            });
        }
    }

    fn handle_inactive(&mut self) {
        if self.session.state().is_closed() {
            return;
        }
        tracing::debug!(protocol = %self.session.protocol(), peer = %self.peer, "connection inactive");
        // Close the encoder first so a late response write surfaces as
        // "session closed" instead of succeeding silently.
        self.session.encoder().close();

        if self.session.protocol().is_multiplex() {
            // Stream-level resets already cancel requests individually;
            // connection loss cannot race a legitimate completion here.
            self.cleanup();
        } else {
            // An HTTP/1 client may disconnect right after receiving a
            // complete response, before the writer's completion event is
            // processed. Grant a grace period before declaring the
            // remainder failed.
            let grace = self.config.disconnect_grace;
            let tx = self.tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                let _ = tx.send(ConnEvent::CleanupDeadline);
            });
        }
    }

    /// Abort everything still unfinished and mark the connection closed.
    fn cleanup(&mut self) {
        if self.session.state().is_closed() {
            return;
        }
        if self.unfinished.is_empty() {
            self.session.state_mut().close();
            return;
        }
        self.session.state_mut().begin_cleanup();
        // On a multiplexed session the peer resets streams individually, so
        // inbound bodies are not re-cancelled here.
        let cancel_inbound = !self.session.protocol().is_multiplex();
        for unfinished in self.unfinished.values_mut() {
            unfinished.abort_response(ServeError::ClosedSession, cancel_inbound);
        }
        // One step, not entry by entry.
        self.unfinished.clear();
        self.session.state_mut().finish_cleanup();
    }

    /// Force the connection closed after a fatal write outcome.
    fn close_channel(&mut self) {
        self.session.encoder().close();
        self.cleanup();
    }
}
