//! Response writing.
//!
//! One writer per dispatched request, driven on the connection's execution
//! context. Streaming exchanges subscribe to the response frame by frame;
//! aggregated exchanges buffer the whole response into a single allocation
//! and write it as one unit. Both paths converge on one completion result,
//! reported back to the handler as a `WriteDone` event.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::{HeaderValue, Method, StatusCode};
use tokio::sync::{mpsc, oneshot};

use crate::base::ServeError;
use crate::http::request::{DecodedHttpRequest, ExchangeType, InboundBody, RequestId};
use crate::http::response::{HttpResponse, ResFrame, ResponseHead, ResponseKind};
use crate::service::{ErrorHandler, ServiceRequestContext};

use super::encoder::{ResponseEncoder, WriteOp};
use super::handler::ConnEvent;

pub(crate) struct ResponseWriter {
    encoder: Arc<dyn ResponseEncoder>,
    events: mpsc::UnboundedSender<ConnEvent>,
    ctx: Arc<ServiceRequestContext>,
    error_handler: Arc<dyn ErrorHandler>,
    id: RequestId,
    stream_id: u32,
    method: Method,
    exchange: ExchangeType,
    add_keep_alive: bool,
    transient: bool,
    body: InboundBody,
    /// The service-side failure cause, if any. Preferred over a later
    /// write failure when ending the response log.
    first_cause: Option<ServeError>,
}

impl ResponseWriter {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        encoder: Arc<dyn ResponseEncoder>,
        events: mpsc::UnboundedSender<ConnEvent>,
        ctx: Arc<ServiceRequestContext>,
        error_handler: Arc<dyn ErrorHandler>,
        id: RequestId,
        stream_id: u32,
        method: Method,
        exchange: ExchangeType,
        add_keep_alive: bool,
        transient: bool,
        body: InboundBody,
    ) -> Self {
        Self {
            encoder,
            events,
            ctx,
            error_handler,
            id,
            stream_id,
            method,
            exchange,
            add_keep_alive,
            transient,
            body,
            first_cause: None,
        }
    }

    pub(crate) async fn run(
        mut self,
        response: HttpResponse,
        mut abort: oneshot::Receiver<ServeError>,
    ) {
        let result = self.write(response, &mut abort).await;

        // Settle the inbound body: a successful write (or one whose body
        // already closed) ends it benignly, a failure propagates.
        match &result {
            Ok(()) => self.body.abort(ServeError::ResponseComplete),
            Err(cause) => {
                if self.body.is_open() {
                    self.body.abort(cause.clone());
                } else {
                    self.body.abort(ServeError::ResponseComplete);
                }
            }
        }

        let log = self.ctx.log();
        match (&self.first_cause, &result) {
            (Some(cause), _) => log.end_response_with(cause.clone()),
            (None, Err(cause)) => log.end_response_with(cause.clone()),
            (None, Ok(())) => log.end_response(),
        }

        let _ = self.events.send(ConnEvent::WriteDone {
            id: self.id,
            transient: self.transient,
            result,
        });
    }

    async fn write(
        &mut self,
        response: HttpResponse,
        abort: &mut oneshot::Receiver<ServeError>,
    ) -> Result<(), ServeError> {
        match response.kind {
            ResponseKind::Failure(cause) => {
                let (head, body) = self.recover(cause);
                self.write_unit(head, body, abort).await
            }
            ResponseKind::Full { head, body } => self.write_unit(head, body, abort).await,
            ResponseKind::Streaming(rx) => {
                if self.exchange.is_response_streaming() {
                    self.write_stream(rx, abort).await
                } else {
                    let (head, body) = self.aggregate(rx, abort).await?;
                    self.write_unit(head, body, abort).await
                }
            }
        }
    }

    /// Buffer an entire streamed response before writing it as one unit.
    async fn aggregate(
        &mut self,
        mut rx: mpsc::UnboundedReceiver<ResFrame>,
        abort: &mut oneshot::Receiver<ServeError>,
    ) -> Result<(ResponseHead, Bytes), ServeError> {
        let mut head: Option<ResponseHead> = None;
        let mut buf = BytesMut::new();
        loop {
            let frame = tokio::select! {
                cause = &mut *abort => return Err(cause.unwrap_or(ServeError::ClosedSession)),
                frame = rx.recv() => frame,
            };
            match frame {
                Some(ResFrame::Head(h)) => {
                    if head.is_none() {
                        head = Some(h);
                    }
                }
                Some(ResFrame::Data(data)) => buf.extend_from_slice(&data),
                Some(ResFrame::Error(cause)) => return Ok(self.recover(cause)),
                None => break,
            }
        }
        match head {
            Some(head) => Ok((head, buf.freeze())),
            None => Ok(self.recover(ServeError::service("response stream ended before headers"))),
        }
    }

    /// Write a complete head+body response as a single unit.
    async fn write_unit(
        &mut self,
        mut head: ResponseHead,
        mut body: Bytes,
        abort: &mut oneshot::Receiver<ServeError>,
    ) -> Result<(), ServeError> {
        // rfc9110: no body for HEAD responses or content-always-empty
        // statuses, and no content-length either. Otherwise set it
        // explicitly, even on the final response before closing; strict
        // clients may require it regardless of protocol.
        if self.method == Method::HEAD || ResponseHead::is_content_always_empty(head.status) {
            body = Bytes::new();
        } else {
            head.headers
                .insert(http::header::CONTENT_LENGTH, HeaderValue::from(body.len() as u64));
        }
        self.apply_keep_alive(&mut head);

        let log = self.ctx.log().clone();
        log.start_response();
        let has_content = !body.is_empty();
        let head_op = self
            .encoder
            .write_headers(self.id, self.stream_id, head.clone(), !has_content);
        log.response_headers(&head);
        let final_op = if has_content {
            // The headers write is already enqueued; its completion is
            // subsumed by the final data write.
            drop(head_op);
            log.increase_response_length(body.len());
            self.encoder.write_data(self.id, self.stream_id, body, true)
        } else {
            head_op
        };
        await_op(final_op, abort).await
    }

    /// Drive a streaming response frame by frame.
    async fn write_stream(
        &mut self,
        mut rx: mpsc::UnboundedReceiver<ResFrame>,
        abort: &mut oneshot::Receiver<ServeError>,
    ) -> Result<(), ServeError> {
        let log = self.ctx.log().clone();
        let mut headers_written = false;
        loop {
            let frame = tokio::select! {
                cause = &mut *abort => return Err(cause.unwrap_or(ServeError::ClosedSession)),
                frame = rx.recv() => frame,
            };
            match frame {
                Some(ResFrame::Head(mut head)) => {
                    if headers_written {
                        continue;
                    }
                    self.apply_keep_alive(&mut head);
                    log.start_response();
                    let end_stream = self.method == Method::HEAD;
                    let op = self
                        .encoder
                        .write_headers(self.id, self.stream_id, head.clone(), end_stream);
                    log.response_headers(&head);
                    await_op(op, abort).await?;
                    headers_written = true;
                    if end_stream {
                        // HEAD: nothing further to write.
                        return Ok(());
                    }
                }
                Some(ResFrame::Data(data)) => {
                    if !headers_written {
                        return Err(ServeError::service("data frame before response headers"));
                    }
                    if data.is_empty() {
                        continue;
                    }
                    log.increase_response_length(data.len());
                    let op = self.encoder.write_data(self.id, self.stream_id, data, false);
                    await_op(op, abort).await?;
                }
                Some(ResFrame::Error(cause)) => {
                    if headers_written {
                        return Err(cause);
                    }
                    let (head, body) = self.recover(cause);
                    return self.write_unit(head, body, abort).await;
                }
                None => {
                    if !headers_written {
                        let (head, body) =
                            self.recover(ServeError::service("response stream ended before headers"));
                        return self.write_unit(head, body, abort).await;
                    }
                    let op = self
                        .encoder
                        .write_data(self.id, self.stream_id, Bytes::new(), true);
                    return await_op(op, abort).await;
                }
            }
        }
    }

    /// Error-recovery hook: capture the cause for the request log and
    /// substitute the error handler's response, transparently.
    fn recover(&mut self, cause: ServeError) -> (ResponseHead, Bytes) {
        self.first_cause = Some(cause.clone());
        let replacement = self.error_handler.on_service_exception(&self.ctx, &cause);
        match replacement.kind {
            ResponseKind::Full { head, body } => (head, body),
            _ => {
                // Error handlers must produce a ready response; anything
                // else falls back to a plain 500.
                (
                    ResponseHead::plain_text(StatusCode::INTERNAL_SERVER_ERROR),
                    Bytes::from_static(b"500 Internal Server Error"),
                )
            }
        }
    }

    fn apply_keep_alive(&self, head: &mut ResponseHead) {
        // Multiplexed protocols must not carry the connection header
        // (rfc9113 8.2.2); its keep-alive semantics are implicit.
        if self.add_keep_alive {
            head.headers
                .insert(http::header::CONNECTION, HeaderValue::from_static("keep-alive"));
        }
    }
}

async fn await_op(op: WriteOp, abort: &mut oneshot::Receiver<ServeError>) -> Result<(), ServeError> {
    tokio::select! {
        cause = &mut *abort => Err(cause.unwrap_or(ServeError::ClosedSession)),
        result = op => result,
    }
}

/// Produce an early response (server-wide OPTIONS, invalid path) with the
/// same write, policy and logging discipline as dispatched responses.
#[allow(clippy::too_many_arguments)]
pub(crate) fn respond_early(
    encoder: Arc<dyn ResponseEncoder>,
    events: mpsc::UnboundedSender<ConnEvent>,
    ctx: &Arc<ServiceRequestContext>,
    req: &DecodedHttpRequest,
    mut head: ResponseHead,
    mut content: Bytes,
    cause: Option<ServeError>,
    multiplex: bool,
    reading: bool,
) {
    // No need to consume the request body; the response is decided.
    req.body().close();

    let log = ctx.log().clone();
    match &cause {
        None => log.end_request(),
        Some(c) => log.end_request_with(c.clone()),
    }

    if *req.method() == Method::HEAD || ResponseHead::is_content_always_empty(head.status) {
        content = Bytes::new();
    } else {
        head.headers
            .insert(http::header::CONTENT_LENGTH, HeaderValue::from(content.len() as u64));
    }
    if !multiplex {
        head.headers
            .insert(http::header::CONNECTION, HeaderValue::from_static("keep-alive"));
    }

    log.start_response();
    let has_content = !content.is_empty();
    let head_op = encoder.write_headers(req.id(), req.stream_id(), head.clone(), !has_content);
    log.response_headers(&head);
    let final_op = if has_content {
        drop(head_op);
        log.increase_response_length(content.len());
        encoder.write_data(req.id(), req.stream_id(), content, true)
    } else {
        head_op
    };

    // Responses produced outside a read burst flush immediately.
    if !reading {
        encoder.flush();
    }

    let id = req.id();
    tokio::spawn(async move {
        let result = final_op.await;
        match (&cause, &result) {
            (Some(c), _) => log.end_response_with(c.clone()),
            (None, Err(e)) => log.end_response_with(e.clone()),
            (None, Ok(())) => log.end_response(),
        }
        let _ = events.send(ConnEvent::WriteDone {
            id,
            transient: true,
            result,
        });
    });
}
