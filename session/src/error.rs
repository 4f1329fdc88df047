//! Session error types.

use riptide_wire::WireError;
use thiserror::Error;

/// Errors surfaced by the per-peer reliability engine.
///
/// Wire violations abort the offending decode, resource-exhaustion
/// variants abort only the offending message; the session keeps
/// operating in every case.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Wire-level decode failure
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// An ACK/NACK frame reached the handler for the other kind
    #[error("expected frame {expected:#04x}, got {actual:#04x}")]
    UnexpectedFrameKind {
        /// Frame id the handler requires
        expected: u8,
        /// Frame id actually carried
        actual: u8,
    },

    /// Too many fragment groups in flight from this peer
    #[error("fragment table overloaded: {open} groups open, cap is {cap}")]
    FragmentTableOverloaded {
        /// Groups currently being reassembled
        open: usize,
        /// Configured cap
        cap: usize,
    },

    /// A fragment group declares more pieces than allowed
    #[error("fragment group of {count} exceeds cap of {cap}")]
    FragmentGroupTooLarge {
        /// Declared fragment count
        count: u16,
        /// Configured cap
        cap: u16,
    },

    /// A fragment would still exceed the MTU after one split
    #[error("fragment of {size} bytes still exceeds mtu {mtu}")]
    FragmentStillOversized {
        /// Framed fragment size
        size: usize,
        /// Session MTU
        mtu: u16,
    },

    /// Order channel outside the fixed per-session range
    #[error("order channel {0} out of range")]
    InvalidOrderChannel(u8),

    /// The session has been disconnected
    #[error("session closed")]
    Closed,
}
