//! Frame identifiers.
//!
//! Every datagram carried by the protocol starts with a one-byte frame id.
//! The id-to-name mapping is a static match so diagnostics never need any
//! runtime table.

/// Connected keep-alive ping, carried inside a datagram frame
pub const ID_CONNECTED_PING: u8 = 0x00;
/// Offline discovery ping
pub const ID_UNCONNECTED_PING: u8 = 0x01;
/// Connected keep-alive pong, carried inside a datagram frame
pub const ID_CONNECTED_PONG: u8 = 0x03;
/// First offline connection request (MTU probe)
pub const ID_OPEN_CONNECTION_REQUEST_1: u8 = 0x05;
/// Reply to the first connection request
pub const ID_OPEN_CONNECTION_REPLY_1: u8 = 0x06;
/// Second offline connection request
pub const ID_OPEN_CONNECTION_REQUEST_2: u8 = 0x07;
/// Reply to the second connection request; the session exists after this
pub const ID_OPEN_CONNECTION_REPLY_2: u8 = 0x08;
/// Offline discovery pong
pub const ID_UNCONNECTED_PONG: u8 = 0x1C;

/// Lowest id accepted as a datagram frame
pub const ID_DATAGRAM_MIN: u8 = 0x80;
/// Id emitted for outbound datagram frames
pub const ID_DATAGRAM: u8 = 0x84;
/// Highest id accepted as a datagram frame
pub const ID_DATAGRAM_MAX: u8 = 0x8F;

/// Negative acknowledgment frame
pub const ID_NACK: u8 = 0xA0;
/// Positive acknowledgment frame
pub const ID_ACK: u8 = 0xC0;

/// Name of a frame id, for diagnostics
pub fn id_name(id: u8) -> Option<&'static str> {
    match id {
        ID_CONNECTED_PING => Some("CONNECTED_PING"),
        ID_UNCONNECTED_PING => Some("UNCONNECTED_PING"),
        ID_CONNECTED_PONG => Some("CONNECTED_PONG"),
        ID_OPEN_CONNECTION_REQUEST_1 => Some("OPEN_CONNECTION_REQUEST_1"),
        ID_OPEN_CONNECTION_REPLY_1 => Some("OPEN_CONNECTION_REPLY_1"),
        ID_OPEN_CONNECTION_REQUEST_2 => Some("OPEN_CONNECTION_REQUEST_2"),
        ID_OPEN_CONNECTION_REPLY_2 => Some("OPEN_CONNECTION_REPLY_2"),
        ID_UNCONNECTED_PONG => Some("UNCONNECTED_PONG"),
        ID_DATAGRAM_MIN..=ID_DATAGRAM_MAX => Some("DATAGRAM"),
        ID_NACK => Some("NACK"),
        ID_ACK => Some("ACK"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_name_lookup() {
        assert_eq!(id_name(ID_ACK), Some("ACK"));
        assert_eq!(id_name(ID_NACK), Some("NACK"));
        assert_eq!(id_name(0x84), Some("DATAGRAM"));
        assert_eq!(id_name(0x8F), Some("DATAGRAM"));
        assert_eq!(id_name(0x42), None);
    }
}
