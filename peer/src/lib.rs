//! UDP transport and client/server bootstrap for riptide.
//!
//! This crate wires the synchronous reliability engine to tokio: a UDP
//! socket behind the engine's outbound sink, a server that answers the
//! offline handshake and owns one session per peer, a client that
//! negotiates its MTU and owns one session for the server, and the
//! one-second maintenance tick that drives keep-alive, timeouts, and
//! queue housekeeping on both sides.

pub mod client;
pub mod server;
pub mod transport;

pub use client::{Client, ClientConfig, ClientEvent};
pub use server::{Server, ServerConfig, ServerEvent};
pub use transport::{bind_udp, UdpSink};
