//! Per-peer reliability engine for riptide.
//!
//! This crate turns the unreliable datagram transport underneath it into
//! configurable per-message guarantees: acknowledgment and retransmission
//! for reliable messages, strict per-channel ordering, newest-wins
//! sequencing, and transparent fragmentation of payloads larger than the
//! negotiated MTU.
//!
//! The engine is synchronous and CPU-bound. It owns no sockets and no
//! tasks: outbound frames leave through a [`FrameSink`], completed
//! messages arrive at a [`MessageHandler`], and an external timer drives
//! keep-alive, timeout, and queue-compaction maintenance. The peer crate
//! wires all three to tokio.
//!
//! ## Example
//!
//! ```rust
//! use bytes::Bytes;
//! use riptide_session::{FrameSink, MessageHandler, ReliableSession, SessionConfig};
//! use riptide_wire::Reliability;
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//!
//! struct NullSink;
//! impl FrameSink for NullSink {
//!     fn send_raw(&self, _bytes: Bytes, _peer: SocketAddr) {}
//! }
//!
//! struct PrintHandler;
//! impl MessageHandler for PrintHandler {
//!     fn on_message(&self, payload: Bytes, _reliability: Reliability, channel: u8) {
//!         println!("{} bytes on channel {}", payload.len(), channel);
//!     }
//! }
//!
//! let session = ReliableSession::new(
//!     SessionConfig::default(),
//!     "127.0.0.1:19132".parse().unwrap(),
//!     Arc::new(NullSink),
//!     Arc::new(PrintHandler),
//! );
//! session
//!     .send(Reliability::ReliableOrdered, 0, Bytes::from_static(b"hello"))
//!     .unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod delivery;
pub mod error;
pub mod keepalive;
pub mod session;

// Re-export main types
pub use config::SessionConfig;
pub use delivery::{FrameSink, MessageHandler};
pub use error::SessionError;
pub use keepalive::{
    build_connected_ping, build_connected_pong, now_millis, parse_connected_ping,
    parse_connected_pong, rtt_from_echo,
};
pub use session::{ReliableSession, SessionStats};
