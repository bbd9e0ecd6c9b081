//! # portside
//!
//! The per-connection request/response lifecycle core of an HTTP server.
//!
//! `portside` owns everything that happens between a decoded inbound request
//! and the bytes handed back to the wire: dispatch, response writing,
//! keep-alive and content-length policy, the HTTP/1 to HTTP/2 upgrade, the
//! in-flight request registry with graceful-shutdown accounting, and the
//! race-sensitive cleanup between client disconnection and in-flight
//! response completion.
//!
//! ## What it is not
//!
//! The wire codecs (HTTP/1 framing, HTTP/2 framing and HPACK), TLS
//! handshaking, routing-table lookup, and service business logic are all
//! external collaborators, expressed as traits:
//!
//! - [`session::ResponseEncoder`] - the swappable write capability
//! - [`session::ConnectionPipeline`] - multiplexed encoder + flow control
//! - [`service::HttpService`] / [`service::ErrorHandler`] - the application
//! - [`log::AccessLogSink`] - where finalized request logs go
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use portside::base::GracefulShutdown;
//! use portside::config::ServerConfig;
//! use portside::session::{ConnectionHandler, SessionProtocol};
//!
//! let shutdown = GracefulShutdown::new();
//! let (handler, handle) = ConnectionHandler::new(
//!     Arc::new(ServerConfig::new()),
//!     shutdown.clone(),
//!     encoder,          // your codec's ResponseEncoder
//!     SessionProtocol::H1C,
//!     peer_addr,        // the accepted socket's peer address
//!     None,             // proxied addresses, if fronted by PROXY protocol
//!     pipeline,         // your codec's ConnectionPipeline
//! );
//! tokio::spawn(handler.run());
//! // the decoder feeds `handle` with requests and connection events
//! ```
//!
//! ## Modules
//!
//! - [`base`] - error taxonomy and the shared shutdown counter
//! - [`http`] - decoded requests, response objects, path parsing/caching
//! - [`session`] - connection state, encoder capability, upgrade, handler
//! - [`service`] - service/error-handler traits and the request context
//! - [`log`] - request log lifecycle and access-log sink
//! - [`config`] - per-server tunables consumed by the connection core

pub mod base;
pub mod config;
pub mod http;
pub mod log;
pub mod service;
pub mod session;
