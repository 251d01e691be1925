//! warden-daemon - protocol server library
//!
//! Library surface behind the `wardend` binary: the UDS protocol
//! server, the request dispatcher, and the one-shot bootstrap gate.
//! Integration tests drive the dispatcher and the real socket through
//! this crate.

pub mod bootstrap;
pub mod protocol;

pub use bootstrap::Bootstrapper;
pub use protocol::{Dispatcher, ProtocolServer};
