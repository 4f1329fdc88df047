//! Acknowledgment frames.
//!
//! ACK and NACK share one layout: the frame id, a u16 count, then that
//! many 3-byte sequence numbers. No range compression; the set is small
//! in practice and order carries no meaning.

use bytes::Bytes;

use crate::codec::{ByteReader, ByteWriter};
use crate::error::WireError;
use crate::ids::{ID_ACK, ID_NACK};

/// Whether a frame acknowledges receipt or reports presumed loss
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    /// Positive acknowledgment
    Ack = ID_ACK,
    /// Negative acknowledgment (presumed-lost sequence numbers)
    Nack = ID_NACK,
}

/// An ACK or NACK naming a set of datagram sequence numbers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcknowledgeFrame {
    /// ACK or NACK
    pub kind: AckKind,
    /// Sequence numbers being (n)acknowledged
    pub sequences: Vec<u32>,
}

impl AcknowledgeFrame {
    /// Create an ACK for the given sequence numbers
    pub fn ack(sequences: Vec<u32>) -> Self {
        Self {
            kind: AckKind::Ack,
            sequences,
        }
    }

    /// Create a NACK for the given sequence numbers
    pub fn nack(sequences: Vec<u32>) -> Self {
        Self {
            kind: AckKind::Nack,
            sequences,
        }
    }

    /// Encode the frame to a contiguous buffer
    pub fn encode(&self) -> Bytes {
        let mut w = ByteWriter::with_capacity(1 + 2 + 3 * self.sequences.len());
        w.write_u8(self.kind as u8);
        w.write_u16(self.sequences.len() as u16);
        for &sequence in &self.sequences {
            w.write_u24(sequence);
        }
        w.freeze()
    }

    /// Decode an ACK or NACK frame
    pub fn decode(buf: Bytes) -> Result<Self, WireError> {
        let mut r = ByteReader::new(buf);
        let kind = match r.read_u8()? {
            ID_ACK => AckKind::Ack,
            ID_NACK => AckKind::Nack,
            other => return Err(WireError::FrameId(other)),
        };
        let count = r.read_u16()? as usize;
        let mut sequences = Vec::with_capacity(count);
        for _ in 0..count {
            sequences.push(r.read_u24()?);
        }
        Ok(Self { kind, sequences })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_roundtrip() {
        let frame = AcknowledgeFrame::ack(vec![1, 2, 0xFFFFFF]);
        let decoded = AcknowledgeFrame::decode(frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_nack_roundtrip() {
        let frame = AcknowledgeFrame::nack(vec![12, 13]);
        let decoded = AcknowledgeFrame::decode(frame.encode()).unwrap();
        assert_eq!(decoded.kind, AckKind::Nack);
        assert_eq!(decoded.sequences, vec![12, 13]);
    }

    #[test]
    fn test_empty_ack() {
        let frame = AcknowledgeFrame::ack(Vec::new());
        let decoded = AcknowledgeFrame::decode(frame.encode()).unwrap();
        assert!(decoded.sequences.is_empty());
    }

    #[test]
    fn test_unknown_id_rejected() {
        assert!(matches!(
            AcknowledgeFrame::decode(Bytes::from_static(&[0x99, 0, 0])),
            Err(WireError::FrameId(0x99))
        ));
    }

    #[test]
    fn test_truncated_sequence_list() {
        let mut bytes = AcknowledgeFrame::ack(vec![5, 6]).encode().to_vec();
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(
            AcknowledgeFrame::decode(Bytes::from(bytes)),
            Err(WireError::BufferUnderrun { .. })
        ));
    }
}
