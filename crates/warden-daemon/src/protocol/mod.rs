//! UDS protocol layer: framing, wire messages, dispatch, and the
//! error-to-status mapping.

pub mod dispatch;
pub mod error;
pub mod messages;
pub mod server;

pub use dispatch::Dispatcher;
pub use error::{MAX_FRAME_SIZE, ProtocolError, status_for};
pub use server::{ProtocolServer, default_socket_path};
