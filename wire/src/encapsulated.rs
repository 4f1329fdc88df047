//! Encapsulated message records.
//!
//! One application payload plus the reliability, ordering, and fragment
//! metadata the session engine tracks it by. This is the unit reliability
//! applies to; one or more of these are packed into each datagram frame.
//!
//! Record layout: a flags byte (reliability in the top three bits, bit
//! 0x10 marking a fragment), the payload length in bits as a u16, then the
//! conditional fields — message index (u24, reliable only), order index
//! and channel (u24 + u8, ordered/sequenced only), fragment count, group
//! id and index (u16 + u16 + u32, fragments only) — followed by the raw
//! payload.

use bytes::Bytes;

use crate::codec::{ByteReader, ByteWriter};
use crate::error::WireError;
use crate::reliability::Reliability;

const FLAG_FRAGMENT: u8 = 0x10;
const RELIABILITY_SHIFT: u8 = 5;

/// Fragment metadata for one piece of a split message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentInfo {
    /// Total number of fragments in the group
    pub count: u16,
    /// Group id shared by every fragment of the original message
    pub group_id: u16,
    /// 0-based position of this fragment within the group
    pub index: u32,
}

/// One application payload plus its reliability/order/fragment metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncapsulatedMessage {
    /// Delivery guarantee
    pub reliability: Reliability,
    /// Application payload
    pub payload: Bytes,
    /// Per-session monotonic index, assigned only to reliable messages
    pub message_index: u32,
    /// Ordering channel (0..31), meaningful only if ordered or sequenced
    pub order_channel: u8,
    /// Per-channel monotonic index, assigned only if ordered or sequenced
    pub order_index: u32,
    /// Present when this message is one piece of a split payload
    pub fragment: Option<FragmentInfo>,
}

impl EncapsulatedMessage {
    /// Create a plain (non-fragment, unindexed) message
    pub fn new(reliability: Reliability, payload: Bytes) -> Self {
        Self {
            reliability,
            payload,
            message_index: 0,
            order_channel: 0,
            order_index: 0,
            fragment: None,
        }
    }

    /// Encoded size of the record header for a given reliability
    pub fn header_len(reliability: Reliability, is_fragment: bool) -> usize {
        let mut len = 1 + 2; // flags + payload length
        if reliability.is_reliable() {
            len += 3;
        }
        if reliability.is_ordered() || reliability.is_sequenced() {
            len += 3 + 1;
        }
        if is_fragment {
            len += 2 + 2 + 4;
        }
        len
    }

    /// Total encoded size of this record
    pub fn encoded_len(&self) -> usize {
        Self::header_len(self.reliability, self.fragment.is_some()) + self.payload.len()
    }

    /// Append this record to a writer
    pub fn encode(&self, w: &mut ByteWriter) -> Result<(), WireError> {
        let bits = self
            .payload
            .len()
            .checked_mul(8)
            .filter(|&bits| bits <= usize::from(u16::MAX))
            .ok_or(WireError::PayloadTooLarge(self.payload.len()))?;

        let mut flags = (self.reliability as u8) << RELIABILITY_SHIFT;
        if self.fragment.is_some() {
            flags |= FLAG_FRAGMENT;
        }
        w.write_u8(flags);
        w.write_u16(bits as u16);

        if self.reliability.is_reliable() {
            w.write_u24(self.message_index);
        }
        if self.reliability.is_ordered() || self.reliability.is_sequenced() {
            w.write_u24(self.order_index);
            w.write_u8(self.order_channel);
        }
        if let Some(fragment) = self.fragment {
            w.write_u16(fragment.count);
            w.write_u16(fragment.group_id);
            w.write_u32(fragment.index);
        }
        w.write_bytes(&self.payload);
        Ok(())
    }

    /// Decode one record from a reader
    pub fn decode(r: &mut ByteReader) -> Result<Self, WireError> {
        let flags = r.read_u8()?;
        let reliability = Reliability::try_from(flags >> RELIABILITY_SHIFT)?;
        let is_fragment = flags & FLAG_FRAGMENT != 0;
        let bits = r.read_u16()? as usize;
        let payload_len = (bits + 7) / 8;

        let message_index = if reliability.is_reliable() {
            r.read_u24()?
        } else {
            0
        };
        let (order_index, order_channel) =
            if reliability.is_ordered() || reliability.is_sequenced() {
                (r.read_u24()?, r.read_u8()?)
            } else {
                (0, 0)
            };
        let fragment = if is_fragment {
            Some(FragmentInfo {
                count: r.read_u16()?,
                group_id: r.read_u16()?,
                index: r.read_u32()?,
            })
        } else {
            None
        };
        let payload = r.read_bytes(payload_len)?;

        Ok(Self {
            reliability,
            payload,
            message_index,
            order_channel,
            order_index,
            fragment,
        })
    }

    /// Split a payload into fragments of at most `max_fragment_payload`
    /// bytes, all sharing `group_id`, each carrying the parent's
    /// reliability and order channel. Splitting is single-level; indices
    /// run 0..count.
    pub fn split(
        reliability: Reliability,
        order_channel: u8,
        payload: Bytes,
        max_fragment_payload: usize,
        group_id: u16,
    ) -> Vec<EncapsulatedMessage> {
        let count = payload.len().div_ceil(max_fragment_payload);
        let mut fragments = Vec::with_capacity(count);
        for index in 0..count {
            let start = index * max_fragment_payload;
            let end = (start + max_fragment_payload).min(payload.len());
            fragments.push(EncapsulatedMessage {
                reliability,
                payload: payload.slice(start..end),
                message_index: 0,
                order_channel,
                order_index: 0,
                fragment: Some(FragmentInfo {
                    count: count as u16,
                    group_id,
                    index: index as u32,
                }),
            });
        }
        fragments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: &EncapsulatedMessage) -> EncapsulatedMessage {
        let mut w = ByteWriter::new();
        message.encode(&mut w).unwrap();
        let bytes = w.freeze();
        assert_eq!(bytes.len(), message.encoded_len());
        let mut r = ByteReader::new(bytes);
        let decoded = EncapsulatedMessage::decode(&mut r).unwrap();
        assert_eq!(r.remaining(), 0);
        decoded
    }

    #[test]
    fn test_unreliable_roundtrip() {
        let message =
            EncapsulatedMessage::new(Reliability::Unreliable, Bytes::from_static(b"ping"));
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn test_reliable_ordered_roundtrip() {
        let mut message =
            EncapsulatedMessage::new(Reliability::ReliableOrdered, Bytes::from_static(b"state"));
        message.message_index = 0x123456;
        message.order_channel = 7;
        message.order_index = 0xABCDEF;
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn test_fragment_roundtrip() {
        let mut message =
            EncapsulatedMessage::new(Reliability::Reliable, Bytes::from_static(b"chunk"));
        message.message_index = 42;
        message.fragment = Some(FragmentInfo {
            count: 5,
            group_id: 3,
            index: 4,
        });
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn test_header_len_matches_encoding() {
        for reliability in [
            Reliability::Unreliable,
            Reliability::UnreliableSequenced,
            Reliability::Reliable,
            Reliability::ReliableOrdered,
            Reliability::ReliableSequenced,
        ] {
            let message = EncapsulatedMessage::new(reliability, Bytes::from_static(b"xy"));
            let mut w = ByteWriter::new();
            message.encode(&mut w).unwrap();
            assert_eq!(
                w.len(),
                EncapsulatedMessage::header_len(reliability, false) + 2,
                "header length mismatch for {reliability:?}"
            );
        }
    }

    #[test]
    fn test_split_covers_payload() {
        let payload = Bytes::from((0..100u8).collect::<Vec<_>>());
        let fragments = EncapsulatedMessage::split(
            Reliability::Reliable,
            0,
            payload.clone(),
            30,
            9,
        );
        assert_eq!(fragments.len(), 4);
        for (i, fragment) in fragments.iter().enumerate() {
            let info = fragment.fragment.unwrap();
            assert_eq!(info.index, i as u32);
            assert_eq!(info.count, 4);
            assert_eq!(info.group_id, 9);
        }
        let rebuilt: Vec<u8> = fragments
            .iter()
            .flat_map(|f| f.payload.iter().copied())
            .collect();
        assert_eq!(&rebuilt[..], &payload[..]);
    }

    #[test]
    fn test_truncated_record_fails() {
        let mut message =
            EncapsulatedMessage::new(Reliability::Reliable, Bytes::from_static(b"abcdef"));
        message.message_index = 1;
        let mut w = ByteWriter::new();
        message.encode(&mut w).unwrap();
        let bytes = w.freeze();
        let mut r = ByteReader::new(bytes.slice(..bytes.len() - 2));
        assert!(matches!(
            EncapsulatedMessage::decode(&mut r),
            Err(WireError::BufferUnderrun { .. })
        ));
    }
}
