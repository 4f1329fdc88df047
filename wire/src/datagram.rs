//! Datagram frames.
//!
//! The on-wire transmission unit: a frame id, a 3-byte sequence number,
//! and one or more encapsulated message records filling the rest of the
//! datagram. Frames are acknowledged, negatively acknowledged, and
//! retransmitted as a whole under their sequence number.

use bytes::Bytes;
use smallvec::SmallVec;

use crate::codec::{ByteReader, ByteWriter};
use crate::encapsulated::EncapsulatedMessage;
use crate::error::WireError;
use crate::ids::{ID_DATAGRAM, ID_DATAGRAM_MAX, ID_DATAGRAM_MIN};

/// One transmitted datagram: sequence number plus its message records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatagramFrame {
    /// Per-session monotonic send counter (independent of message indices)
    pub sequence_number: u32,
    /// Message records, in send order; nearly always exactly one
    pub messages: SmallVec<[EncapsulatedMessage; 1]>,
}

impl DatagramFrame {
    /// Encoded size of the frame id plus sequence number
    pub const HEADER_LEN: usize = 1 + 3;

    /// Create an empty frame with the given sequence number
    pub fn new(sequence_number: u32) -> Self {
        Self {
            sequence_number,
            messages: SmallVec::new(),
        }
    }

    /// Whether any contained message is reliable
    pub fn has_reliable(&self) -> bool {
        self.messages.iter().any(|m| m.reliability.is_reliable())
    }

    /// Total encoded size
    pub fn encoded_len(&self) -> usize {
        Self::HEADER_LEN + self.messages.iter().map(|m| m.encoded_len()).sum::<usize>()
    }

    /// Encode the frame to a contiguous buffer
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let mut w = ByteWriter::with_capacity(self.encoded_len());
        w.write_u8(ID_DATAGRAM);
        w.write_u24(self.sequence_number);
        for message in &self.messages {
            message.encode(&mut w)?;
        }
        Ok(w.freeze())
    }

    /// Decode a frame, consuming message records until the buffer is
    /// exhausted
    pub fn decode(buf: Bytes) -> Result<Self, WireError> {
        let mut r = ByteReader::new(buf);
        let id = r.read_u8()?;
        if !(ID_DATAGRAM_MIN..=ID_DATAGRAM_MAX).contains(&id) {
            return Err(WireError::FrameId(id));
        }
        let sequence_number = r.read_u24()?;
        let mut messages = SmallVec::new();
        while r.remaining() > 0 {
            messages.push(EncapsulatedMessage::decode(&mut r)?);
        }
        Ok(Self {
            sequence_number,
            messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reliability::Reliability;

    #[test]
    fn test_roundtrip_single_message() {
        let mut frame = DatagramFrame::new(0x123456);
        frame.messages.push(EncapsulatedMessage::new(
            Reliability::Unreliable,
            Bytes::from_static(b"hello"),
        ));

        let decoded = DatagramFrame::decode(frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_roundtrip_multiple_messages() {
        let mut frame = DatagramFrame::new(7);
        for i in 0..3u32 {
            let mut message = EncapsulatedMessage::new(
                Reliability::Reliable,
                Bytes::from(vec![i as u8; 4]),
            );
            message.message_index = i;
            frame.messages.push(message);
        }

        let decoded = DatagramFrame::decode(frame.encode().unwrap()).unwrap();
        assert_eq!(decoded.messages.len(), 3);
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_whole_custom_id_range_accepted() {
        let mut frame = DatagramFrame::new(1);
        frame.messages.push(EncapsulatedMessage::new(
            Reliability::Unreliable,
            Bytes::from_static(b"x"),
        ));
        let mut bytes = frame.encode().unwrap().to_vec();
        bytes[0] = ID_DATAGRAM_MAX;
        assert!(DatagramFrame::decode(Bytes::from(bytes)).is_ok());
    }

    #[test]
    fn test_wrong_id_rejected() {
        let frame = DatagramFrame::new(1);
        let mut bytes = frame.encode().unwrap().to_vec();
        bytes[0] = 0x42;
        assert!(matches!(
            DatagramFrame::decode(Bytes::from(bytes)),
            Err(WireError::FrameId(0x42))
        ));
    }

    #[test]
    fn test_has_reliable() {
        let mut frame = DatagramFrame::new(0);
        frame.messages.push(EncapsulatedMessage::new(
            Reliability::UnreliableSequenced,
            Bytes::from_static(b"a"),
        ));
        assert!(!frame.has_reliable());
        frame.messages.push(EncapsulatedMessage::new(
            Reliability::ReliableOrdered,
            Bytes::from_static(b"b"),
        ));
        assert!(frame.has_reliable());
    }
}
