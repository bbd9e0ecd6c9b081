//! Per-connection state and machinery: session protocol, the tagged
//! connection state machine, the swappable encoder capability, the HTTP/2
//! upgrade coordinator, and the connection handler itself.

pub mod encoder;
pub mod handler;
pub mod protocol;
pub mod upgrade;

mod state;
mod writer;

pub use encoder::{ResponseEncoder, WriteOp};
pub use handler::{ConnEvent, ConnectionHandle, ConnectionHandler};
pub use protocol::SessionProtocol;
pub use state::{ConnState, ConnectionSession, TlsSessionInfo};
pub use upgrade::{ConnectionPipeline, Http2Settings, DEFAULT_WINDOW_SIZE};
