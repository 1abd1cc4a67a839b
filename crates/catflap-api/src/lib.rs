//! Async session client for the catflap pet-flap gateway.
//!
//! The gateway speaks a single duplex WebSocket per account: the client
//! sends named requests and receives correlated responses, while the
//! server pushes named events (`deviceUpdate`, `eventUpdate`, ...) at any
//! time. This crate owns that connection: framing, request/response
//! multiplexing, push fan-out, and reconnection with backoff.
//!
//! Consumers (see `catflap-core`) never touch raw frames — they issue
//! [`Session::call`] and subscribe to [`PushEvent`]s.

pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

pub use error::Error;
pub use protocol::Frame;
pub use session::{CONNECT_EVENT, PushEvent, ReconnectConfig, Session};
pub use transport::TransportConfig;
