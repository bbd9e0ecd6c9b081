//! End-to-end tests of the connection handler against mock collaborators:
//! a recording encoder, a recording access-log sink, and scripted services.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};

use portside::base::{GracefulShutdown, ServeError};
use portside::config::ServerConfig;
use portside::http::path::PathAndQuery;
use portside::http::request::{
    DecodedHttpRequest, ExchangeType, InboundBody, InboundBodyWriter, RequestId, RoutingContext,
};
use portside::http::response::{HttpResponse, ResponseHead, ResponseStream};
use portside::log::{AccessLogSink, RequestLog};
use portside::service::{HttpService, ServiceConfig, ServiceRequestContext};
use portside::session::encoder::{write_op_err, write_op_ok, ResponseEncoder, WriteOp};
use portside::session::{
    ConnEvent, ConnectionHandle, ConnectionHandler, ConnectionPipeline, Http2Settings,
    SessionProtocol, DEFAULT_WINDOW_SIZE,
};

#[derive(Debug, Clone)]
enum EncOp {
    Headers {
        status: StatusCode,
        headers: HeaderMap,
        end_stream: bool,
    },
    Data {
        data: Bytes,
        end_stream: bool,
    },
    EmptyFinal,
    Flush,
}

struct MockEncoder {
    multiplex: bool,
    closed: AtomicBool,
    close_header_sent: AtomicBool,
    ops: Mutex<Vec<EncOp>>,
}

impl MockEncoder {
    fn new(multiplex: bool) -> Arc<Self> {
        Arc::new(Self {
            multiplex,
            closed: AtomicBool::new(false),
            close_header_sent: AtomicBool::new(false),
            ops: Mutex::new(Vec::new()),
        })
    }

    fn send_close_header(&self) {
        self.close_header_sent.store(true, Ordering::SeqCst);
    }

    fn ops(&self) -> Vec<EncOp> {
        self.ops.lock().unwrap().clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn writes(&self) -> Vec<EncOp> {
        self.ops()
            .into_iter()
            .filter(|op| !matches!(op, EncOp::Flush))
            .collect()
    }

    fn outcome(&self) -> WriteOp {
        if self.is_closed() {
            write_op_err(ServeError::ClosedSession)
        } else {
            write_op_ok()
        }
    }
}

impl ResponseEncoder for MockEncoder {
    fn write_headers(
        &self,
        _id: RequestId,
        _stream_id: u32,
        head: ResponseHead,
        end_stream: bool,
    ) -> WriteOp {
        self.ops.lock().unwrap().push(EncOp::Headers {
            status: head.status,
            headers: head.headers,
            end_stream,
        });
        self.outcome()
    }

    fn write_data(&self, _id: RequestId, _stream_id: u32, data: Bytes, end_stream: bool) -> WriteOp {
        self.ops
            .lock()
            .unwrap()
            .push(EncOp::Data { data, end_stream });
        self.outcome()
    }

    fn write_empty_final(&self) -> WriteOp {
        self.ops.lock().unwrap().push(EncOp::EmptyFinal);
        self.outcome()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_multiplex(&self) -> bool {
        self.multiplex
    }

    fn is_close_header_sent(&self) -> bool {
        self.close_header_sent.load(Ordering::SeqCst)
    }

    fn flush(&self) {
        self.ops.lock().unwrap().push(EncOp::Flush);
    }
}

struct MockPipeline {
    encoder: Arc<MockEncoder>,
    window_increments: Arc<Mutex<Vec<u32>>>,
}

impl MockPipeline {
    fn new() -> (Box<Self>, Arc<MockEncoder>, Arc<Mutex<Vec<u32>>>) {
        let encoder = MockEncoder::new(true);
        let increments = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Box::new(Self {
            encoder: encoder.clone(),
            window_increments: increments.clone(),
        });
        (pipeline, encoder, increments)
    }
}

impl ConnectionPipeline for MockPipeline {
    fn multiplexed_encoder(&mut self) -> Arc<dyn ResponseEncoder> {
        self.encoder.clone()
    }

    fn increment_connection_window(&mut self, delta: u32) -> Result<(), ServeError> {
        self.window_increments.lock().unwrap().push(delta);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    logs: Mutex<Vec<RequestLog>>,
}

impl RecordingSink {
    fn logs(&self) -> Vec<RequestLog> {
        self.logs.lock().unwrap().clone()
    }
}

impl AccessLogSink for RecordingSink {
    fn log(&self, log: &RequestLog) {
        self.logs.lock().unwrap().push(log.clone());
    }
}

/// Responds immediately with a 200 and a fixed body.
struct OkService(&'static str);

impl HttpService for OkService {
    fn serve(
        &self,
        _ctx: &Arc<ServiceRequestContext>,
        _req: &mut DecodedHttpRequest,
    ) -> Result<HttpResponse, ServeError> {
        Ok(HttpResponse::of_data(
            StatusCode::OK,
            Bytes::from_static(self.0.as_bytes()),
        ))
    }
}

/// Responds 204 and asks for its path to be cached.
struct CacheableNoContent;

impl HttpService for CacheableNoContent {
    fn serve(
        &self,
        _ctx: &Arc<ServiceRequestContext>,
        _req: &mut DecodedHttpRequest,
    ) -> Result<HttpResponse, ServeError> {
        Ok(HttpResponse::of(StatusCode::NO_CONTENT))
    }

    fn should_cache_path(&self, _path: &str, _query: Option<&str>) -> bool {
        true
    }
}

/// Returns a streaming response and parks the producer handle, so the
/// response never completes until the handler aborts it.
#[derive(Default)]
struct HangingService {
    parked: Mutex<Option<ResponseStream>>,
}

impl HttpService for HangingService {
    fn serve(
        &self,
        _ctx: &Arc<ServiceRequestContext>,
        _req: &mut DecodedHttpRequest,
    ) -> Result<HttpResponse, ServeError> {
        let (stream, response) = HttpResponse::streaming();
        *self.parked.lock().unwrap() = Some(stream);
        Ok(response)
    }
}

/// Fails synchronously with a status short-circuit.
struct TeapotService;

impl HttpService for TeapotService {
    fn serve(
        &self,
        _ctx: &Arc<ServiceRequestContext>,
        _req: &mut DecodedHttpRequest,
    ) -> Result<HttpResponse, ServeError> {
        Err(ServeError::HttpStatus(StatusCode::IM_A_TEAPOT))
    }
}

/// Emits head plus two data frames synchronously, then ends the stream.
struct ChunkingService;

impl HttpService for ChunkingService {
    fn serve(
        &self,
        _ctx: &Arc<ServiceRequestContext>,
        _req: &mut DecodedHttpRequest,
    ) -> Result<HttpResponse, ServeError> {
        let (stream, response) = HttpResponse::streaming();
        stream.send_head(ResponseHead::new(StatusCode::OK))?;
        stream.send_data(Bytes::from_static(b"first,"))?;
        stream.send_data(Bytes::from_static(b"second"))?;
        stream.close();
        Ok(response)
    }
}

fn peer() -> SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
}

fn matched_request(
    service: Arc<dyn HttpService>,
    path: &str,
    keep_alive: bool,
) -> DecodedHttpRequest {
    let route = Arc::new(ServiceConfig::new("test", service));
    let routing = RoutingContext::matched(path, None, path, route);
    request_with(Method::GET, routing, keep_alive)
}

/// A matched request whose exchange streams the response frame by frame.
fn streaming_request(service: Arc<dyn HttpService>, path: &str) -> DecodedHttpRequest {
    let route = Arc::new(ServiceConfig::new("test", service));
    let routing = RoutingContext::matched(path, None, path, route);
    let (writer, body, rx) = InboundBody::channel();
    writer.close();
    DecodedHttpRequest::new(
        0,
        Method::GET,
        HeaderMap::new(),
        routing,
        ExchangeType::Streaming,
        true,
        body,
        rx,
    )
}

/// A matched request whose inbound body is still open; the returned writer
/// keeps it that way until dropped.
fn matched_request_open_body(
    service: Arc<dyn HttpService>,
    path: &str,
) -> (DecodedHttpRequest, InboundBody, InboundBodyWriter) {
    let route = Arc::new(ServiceConfig::new("test", service));
    let routing = RoutingContext::matched(path, None, path, route);
    let (writer, body, rx) = InboundBody::channel();
    let req = DecodedHttpRequest::new(
        0,
        Method::GET,
        HeaderMap::new(),
        routing,
        ExchangeType::Aggregated,
        true,
        body.clone(),
        rx,
    );
    (req, body, writer)
}

fn request_with(method: Method, routing: RoutingContext, keep_alive: bool) -> DecodedHttpRequest {
    let (writer, body, rx) = InboundBody::channel();
    writer.close();
    DecodedHttpRequest::new(
        0,
        method,
        HeaderMap::new(),
        routing,
        ExchangeType::Aggregated,
        keep_alive,
        body,
        rx,
    )
}

struct TestConn {
    encoder: Arc<MockEncoder>,
    shutdown: GracefulShutdown,
    sink: Arc<RecordingSink>,
    handle: ConnectionHandle,
    join: tokio::task::JoinHandle<()>,
}

fn spawn_conn(protocol: SessionProtocol, config: ServerConfig) -> TestConn {
    let encoder = MockEncoder::new(protocol.is_multiplex());
    let shutdown = GracefulShutdown::new();
    let sink = Arc::new(RecordingSink::default());
    let config = Arc::new(config.with_access_log(sink.clone()));
    let (pipeline, _, _) = MockPipeline::new();
    let (handler, handle) = ConnectionHandler::new(
        config,
        shutdown.clone(),
        encoder.clone(),
        protocol,
        peer(),
        None,
        pipeline,
    );
    let join = tokio::spawn(handler.run());
    TestConn {
        encoder,
        shutdown,
        sink,
        handle,
        join,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn plain_request_gets_full_response_with_policy_headers() {
    let conn = spawn_conn(SessionProtocol::H1C, ServerConfig::new());

    conn.handle
        .request(matched_request(Arc::new(OkService("hello")), "/greet", true));
    conn.handle.read_complete();

    wait_until(|| !conn.sink.logs().is_empty()).await;
    wait_until(|| conn.shutdown.is_quiescent()).await;

    let writes = conn.encoder.writes();
    assert_eq!(writes.len(), 2, "one headers write, one data write");
    match &writes[0] {
        EncOp::Headers {
            status,
            headers,
            end_stream,
        } => {
            assert_eq!(*status, StatusCode::OK);
            assert!(!end_stream);
            assert_eq!(header_str(headers, "connection"), Some("keep-alive"));
            assert_eq!(header_str(headers, "content-length"), Some("5"));
        }
        other => panic!("expected headers write, got {other:?}"),
    }
    match &writes[1] {
        EncOp::Data { data, end_stream } => {
            assert_eq!(data.as_ref(), b"hello");
            assert!(end_stream);
        }
        other => panic!("expected data write, got {other:?}"),
    }

    let log = &conn.sink.logs()[0];
    assert_eq!(log.status, Some(StatusCode::OK));
    assert_eq!(log.response_length, 5);
    assert!(log.request_cause.is_none());
    assert!(log.response_cause.is_none());

    // Keep-alive connection: no end-of-stream marker, no close.
    assert!(!conn.encoder.is_closed());
    assert!(!conn.join.is_finished());
}

#[tokio::test]
async fn non_keep_alive_request_drains_then_closes() {
    let conn = spawn_conn(SessionProtocol::H1C, ServerConfig::new());

    conn.handle
        .request(matched_request(Arc::new(OkService("bye")), "/last", false));
    // Arrives after the last request: dropped without a response.
    conn.handle
        .request(matched_request(Arc::new(OkService("never")), "/late", true));

    conn.join.await.expect("handler exits once drained");

    let writes = conn.encoder.writes();
    assert_eq!(writes.len(), 3);
    assert!(matches!(&writes[0], EncOp::Headers { status, .. } if *status == StatusCode::OK));
    assert!(matches!(&writes[1], EncOp::Data { data, .. } if data.as_ref() == b"bye"));
    assert!(matches!(&writes[2], EncOp::EmptyFinal));
    assert!(conn.encoder.is_closed());

    wait_until(|| conn.sink.logs().len() == 1).await;
    assert!(conn.shutdown.is_quiescent());
}

#[test]
fn h2_settings_upgrade_applies_once() {
    let h1_encoder = MockEncoder::new(false);
    let (pipeline, h2_encoder, increments) = MockPipeline::new();
    let config = Arc::new(
        ServerConfig::new().with_http2_initial_connection_window_size(DEFAULT_WINDOW_SIZE + 100),
    );
    let (mut handler, _handle) = ConnectionHandler::new(
        config,
        GracefulShutdown::new(),
        h1_encoder.clone(),
        SessionProtocol::H1C,
        peer(),
        None,
        pipeline,
    );

    handler.handle_event(ConnEvent::H2Settings(Http2Settings::default()));
    assert_eq!(handler.protocol(), SessionProtocol::H2C);
    assert!(h1_encoder.is_closed(), "retired single-stream encoder closes");
    assert!(!h2_encoder.is_closed());
    assert_eq!(increments.lock().unwrap().as_slice(), &[100]);

    // A second settings frame neither re-upgrades, retires the multiplexed
    // encoder, nor re-applies the window delta.
    handler.handle_event(ConnEvent::H2Settings(Http2Settings::default()));
    assert_eq!(handler.protocol(), SessionProtocol::H2C);
    assert!(!h2_encoder.is_closed());
    assert_eq!(increments.lock().unwrap().as_slice(), &[100]);
}

#[tokio::test]
async fn invalid_path_gets_fixed_400() {
    let conn = spawn_conn(SessionProtocol::H1C, ServerConfig::new());

    conn.handle
        .request(request_with(Method::GET, RoutingContext::invalid_path("/%zz"), true));

    wait_until(|| !conn.sink.logs().is_empty()).await;

    let writes = conn.encoder.writes();
    assert_eq!(writes.len(), 2);
    match &writes[0] {
        EncOp::Headers {
            status,
            headers,
            end_stream,
        } => {
            assert_eq!(*status, StatusCode::BAD_REQUEST);
            assert!(!end_stream);
            assert_eq!(
                header_str(headers, "content-type"),
                Some("text/plain; charset=utf-8")
            );
            assert_eq!(header_str(headers, "connection"), Some("keep-alive"));
        }
        other => panic!("expected headers write, got {other:?}"),
    }
    match &writes[1] {
        EncOp::Data { data, end_stream } => {
            assert_eq!(data.as_ref(), b"400 Bad Request\nInvalid request path");
            assert!(end_stream);
        }
        other => panic!("expected data write, got {other:?}"),
    }

    let log = &conn.sink.logs()[0];
    assert!(matches!(
        log.response_cause,
        Some(ServeError::ProtocolViolation(_))
    ));
    // Early responses never touch graceful-shutdown accounting.
    assert!(conn.shutdown.is_quiescent());
    // The connection stays usable.
    assert!(!conn.encoder.is_closed());
}

#[tokio::test]
async fn options_wildcard_lists_every_method() {
    let conn = spawn_conn(SessionProtocol::H1C, ServerConfig::new());

    conn.handle
        .request(request_with(Method::OPTIONS, RoutingContext::options_wildcard(), true));

    wait_until(|| !conn.sink.logs().is_empty()).await;

    let writes = conn.encoder.writes();
    assert_eq!(writes.len(), 1, "empty body: a single headers write");
    match &writes[0] {
        EncOp::Headers {
            status,
            headers,
            end_stream,
        } => {
            assert_eq!(*status, StatusCode::OK);
            assert!(end_stream);
            assert_eq!(
                header_str(headers, "allow"),
                Some("CONNECT,DELETE,GET,HEAD,OPTIONS,PATCH,POST,PUT,TRACE")
            );
            assert_eq!(header_str(headers, "content-length"), Some("0"));
        }
        other => panic!("expected headers write, got {other:?}"),
    }
    assert_eq!(conn.sink.logs()[0].status, Some(StatusCode::OK));
}

#[tokio::test]
async fn successful_response_stores_cacheable_path() {
    let raw = "/handler-test/cacheable";
    let conn = spawn_conn(SessionProtocol::H1C, ServerConfig::new());

    conn.handle
        .request(matched_request(Arc::new(CacheableNoContent), raw, true));

    wait_until(|| PathAndQuery::cached(raw).is_some()).await;
    let hit = PathAndQuery::cached(raw).expect("cached entry");
    assert!(hit.is_cached());
    assert_eq!(hit.path(), raw);

    // 204: no body, no content-length.
    let writes = conn.encoder.writes();
    assert_eq!(writes.len(), 1);
    match &writes[0] {
        EncOp::Headers {
            status,
            headers,
            end_stream,
        } => {
            assert_eq!(*status, StatusCode::NO_CONTENT);
            assert!(end_stream);
            assert!(header_str(headers, "content-length").is_none());
        }
        other => panic!("expected headers write, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn disconnect_grace_delays_abort_of_unfinished_requests() {
    let conn = spawn_conn(SessionProtocol::H1C, ServerConfig::new());
    let service = Arc::new(HangingService::default());

    conn.handle.request(matched_request(service.clone(), "/hang", true));
    wait_until(|| conn.shutdown.pending_responses() == 1).await;

    conn.handle.inactive();
    // Stay busy so the paused clock does not auto-advance: within the grace
    // period the request must still count as pending.
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    assert!(conn.encoder.is_closed(), "encoder closes on inactivity");
    assert_eq!(conn.shutdown.pending_responses(), 1);

    tokio::time::advance(Duration::from_secs(1)).await;
    conn.join.await.expect("handler exits after cleanup");

    assert!(conn.shutdown.is_quiescent());
    let logs = conn.sink.logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].response_cause, Some(ServeError::ClosedSession));
    // Aborted teardown never emits the normal end-of-stream marker.
    assert!(!conn
        .encoder
        .writes()
        .iter()
        .any(|op| matches!(op, EncOp::EmptyFinal)));
}

#[tokio::test]
async fn stream_reset_cancels_one_request_and_spares_the_connection() {
    let conn = spawn_conn(SessionProtocol::H2C, ServerConfig::new());
    let service = Arc::new(HangingService::default());

    let req = matched_request(service.clone(), "/reset-me", true);
    let id = req.id();
    conn.handle.request(req);
    wait_until(|| conn.shutdown.pending_responses() == 1).await;

    conn.handle.stream_reset(id);
    wait_until(|| conn.shutdown.is_quiescent()).await;

    let logs = conn.sink.logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].response_cause, Some(ServeError::ClosedStream));
    assert!(!conn.encoder.is_closed(), "connection survives a single reset");
    assert!(!conn.join.is_finished());

    // Multiplexed inactivity cleans up without a grace period.
    conn.handle.inactive();
    conn.join.await.expect("handler exits");
    assert!(conn.encoder.is_closed());
}

#[tokio::test]
async fn aggregated_exchange_buffers_stream_into_one_write() {
    let conn = spawn_conn(SessionProtocol::H1C, ServerConfig::new());

    conn.handle
        .request(matched_request(Arc::new(ChunkingService), "/chunks", true));

    wait_until(|| !conn.sink.logs().is_empty()).await;

    let writes = conn.encoder.writes();
    assert_eq!(writes.len(), 2, "headers once, data at most once");
    match &writes[0] {
        EncOp::Headers {
            status,
            headers,
            end_stream,
        } => {
            assert_eq!(*status, StatusCode::OK);
            assert!(!end_stream);
            assert_eq!(header_str(headers, "content-length"), Some("12"));
        }
        other => panic!("expected headers write, got {other:?}"),
    }
    match &writes[1] {
        EncOp::Data { data, end_stream } => {
            assert_eq!(data.as_ref(), b"first,second");
            assert!(end_stream);
        }
        other => panic!("expected data write, got {other:?}"),
    }
    assert_eq!(conn.sink.logs()[0].response_length, 12);
}

#[tokio::test]
async fn multiplexed_response_omits_connection_header() {
    let conn = spawn_conn(SessionProtocol::H2C, ServerConfig::new());

    conn.handle
        .request(matched_request(Arc::new(OkService("h2 body")), "/h2", true));

    wait_until(|| !conn.sink.logs().is_empty()).await;

    match &conn.encoder.writes()[0] {
        EncOp::Headers { headers, .. } => {
            assert!(header_str(headers, "connection").is_none());
        }
        other => panic!("expected headers write, got {other:?}"),
    }
}

#[tokio::test]
async fn streaming_exchange_writes_frames_as_they_arrive() {
    let conn = spawn_conn(SessionProtocol::H1C, ServerConfig::new());

    conn.handle
        .request(streaming_request(Arc::new(ChunkingService), "/stream"));

    wait_until(|| !conn.sink.logs().is_empty()).await;

    let writes = conn.encoder.writes();
    assert_eq!(writes.len(), 4, "headers, two data frames, terminal frame");
    match &writes[0] {
        EncOp::Headers {
            status,
            headers,
            end_stream,
        } => {
            assert_eq!(*status, StatusCode::OK);
            assert!(!end_stream);
            assert_eq!(header_str(headers, "connection"), Some("keep-alive"));
            // Streamed responses carry no content-length.
            assert!(header_str(headers, "content-length").is_none());
        }
        other => panic!("expected headers write, got {other:?}"),
    }
    assert!(
        matches!(&writes[1], EncOp::Data { data, end_stream } if data.as_ref() == b"first," && !end_stream)
    );
    assert!(
        matches!(&writes[2], EncOp::Data { data, end_stream } if data.as_ref() == b"second" && !end_stream)
    );
    assert!(
        matches!(&writes[3], EncOp::Data { data, end_stream } if data.is_empty() && *end_stream)
    );
    assert_eq!(conn.sink.logs()[0].response_length, 12);
}

#[tokio::test]
async fn failing_service_gets_substituted_error_response() {
    let conn = spawn_conn(SessionProtocol::H1C, ServerConfig::new());
    let (req, body, _body_writer) = matched_request_open_body(Arc::new(TeapotService), "/teapot");

    conn.handle.request(req);

    wait_until(|| !conn.sink.logs().is_empty()).await;

    // Response decided: the still-open inbound settles benignly.
    assert!(!body.is_open());
    assert_eq!(body.abort_cause(), Some(ServeError::ResponseComplete));

    let writes = conn.encoder.writes();
    assert_eq!(writes.len(), 2);
    match &writes[0] {
        EncOp::Headers {
            status, headers, ..
        } => {
            assert_eq!(*status, StatusCode::IM_A_TEAPOT);
            assert_eq!(
                header_str(headers, "content-type"),
                Some("text/plain; charset=utf-8")
            );
        }
        other => panic!("expected headers write, got {other:?}"),
    }
    assert!(
        matches!(&writes[1], EncOp::Data { data, end_stream } if data.as_ref() == b"418 I'm a teapot" && *end_stream)
    );

    let log = &conn.sink.logs()[0];
    assert_eq!(log.status, Some(StatusCode::IM_A_TEAPOT));
    assert!(matches!(log.response_cause, Some(ServeError::HttpStatus(_))));
    assert!(log.request_cause.is_none());

    wait_until(|| conn.shutdown.is_quiescent()).await;
    assert!(!conn.encoder.is_closed(), "service failure is not fatal to the connection");
}

#[tokio::test]
async fn request_after_close_header_closes_without_dispatch() {
    let conn = spawn_conn(SessionProtocol::H1C, ServerConfig::new());
    conn.encoder.send_close_header();

    conn.handle
        .request(matched_request(Arc::new(OkService("never")), "/late", true));

    conn.join.await.expect("handler exits");

    assert!(conn.encoder.is_closed());
    assert!(conn.encoder.writes().is_empty(), "nothing dispatched, nothing written");
    assert!(conn.sink.logs().is_empty());
    assert!(conn.shutdown.is_quiescent());
}

#[tokio::test]
async fn read_complete_flushes_encoder() {
    let conn = spawn_conn(SessionProtocol::H1C, ServerConfig::new());
    conn.handle.read_complete();
    wait_until(|| conn.encoder.ops().iter().any(|op| matches!(op, EncOp::Flush))).await;
}
