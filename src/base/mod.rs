//! Core types shared by every layer: the error taxonomy and the
//! process-wide graceful-shutdown counter.

pub mod error;
pub mod shutdown;

pub use error::ServeError;
pub use shutdown::GracefulShutdown;
