//! Collaborator capabilities the engine is wired to.
//!
//! The session engine is synchronous and owns no sockets; it pushes
//! encoded frames into a [`FrameSink`] and hands completed, order-gated,
//! reassembled payloads to a [`MessageHandler`]. The peer crate supplies
//! a UDP-backed sink and role-specific handlers (client vs. server).

use bytes::Bytes;
use riptide_wire::Reliability;
use std::net::SocketAddr;

/// Outbound raw-datagram capability.
///
/// Implementations must not block: the engine calls this from the send
/// and inbound-dispatch paths.
pub trait FrameSink: Send + Sync {
    /// Hand one encoded datagram to the unreliable transport
    fn send_raw(&self, bytes: Bytes, peer: SocketAddr);
}

/// Application delivery capability, implemented per role
pub trait MessageHandler: Send + Sync {
    /// One completed message: order-gated, reassembled, exactly once
    fn on_message(&self, payload: Bytes, reliability: Reliability, channel: u8);

    /// The session was torn down
    fn on_disconnect(&self, _reason: &str) {}
}
