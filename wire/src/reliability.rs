//! Per-message delivery guarantees.
//!
//! Each encapsulated message is sent under one of five reliability modes.
//! Three orthogonal capabilities derive from the mode: reliable messages
//! are subject to acknowledgment and retransmission, ordered messages are
//! delivered in strict per-channel order, and sequenced messages drop any
//! arrival older than the newest already delivered on their channel. A
//! mode is ordered or sequenced or neither, never both.

use crate::error::WireError;

/// Number of independent ordering/sequencing channels per session
pub const MAX_ORDER_CHANNELS: usize = 32;

/// Delivery guarantee for one encapsulated message
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reliability {
    /// Fire-and-forget
    Unreliable = 0,
    /// Fire-and-forget, stale arrivals dropped per channel
    UnreliableSequenced = 1,
    /// Acknowledged and retransmitted
    Reliable = 2,
    /// Acknowledged, delivered in strict per-channel order
    ReliableOrdered = 3,
    /// Acknowledged, stale arrivals dropped per channel
    ReliableSequenced = 4,
}

impl Reliability {
    /// Whether the message is acknowledged and retransmitted on loss
    pub fn is_reliable(self) -> bool {
        matches!(
            self,
            Reliability::Reliable | Reliability::ReliableOrdered | Reliability::ReliableSequenced
        )
    }

    /// Whether delivery is held back to preserve per-channel order
    pub fn is_ordered(self) -> bool {
        matches!(self, Reliability::ReliableOrdered)
    }

    /// Whether stale arrivals are dropped per channel, newest wins
    pub fn is_sequenced(self) -> bool {
        matches!(
            self,
            Reliability::UnreliableSequenced | Reliability::ReliableSequenced
        )
    }
}

impl TryFrom<u8> for Reliability {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Reliability::Unreliable),
            1 => Ok(Reliability::UnreliableSequenced),
            2 => Ok(Reliability::Reliable),
            3 => Ok(Reliability::ReliableOrdered),
            4 => Ok(Reliability::ReliableSequenced),
            _ => Err(WireError::Reliability(value)),
        }
    }
}
