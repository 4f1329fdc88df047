//! Wire protocol framing and encoding/decoding for riptide.
//!
//! This crate owns the bit-exact wire format of the protocol: the checked
//! byte codec, the delivery-guarantee model, encapsulated message records,
//! datagram and acknowledgment frames, and the offline handshake
//! messages. It has no I/O and no session state; the session crate drives
//! these types from its reliability engine.
//!
//! ## Wire Format
//!
//! ```text
//! Datagram frame
//! +-----------+-------------------+----------------------------+
//! | u8 id     | u24 sequence      | encapsulated records ...   |
//! | 0x80-0x8F | little-endian     | until the frame ends       |
//! +-----------+-------------------+----------------------------+
//!
//! Encapsulated record
//! +----------+-----------+-----------------------------------------+
//! | u8 flags | u16 bits  | [u24 message index]    if reliable      |
//! | rel<<5   | payload   | [u24 order ix, u8 ch]  if ordered/seq   |
//! | |0x10    | length    | [u16 cnt, u16 grp,                      |
//! | fragment | in bits   |  u32 ix]               if fragment      |
//! +----------+-----------+--------------------+--------------------+
//! | payload bytes                                                  |
//! +----------------------------------------------------------------+
//!
//! Acknowledge frame
//! +----------------+-----------+------------------------+
//! | u8 id ACK/NACK | u16 count | count x u24 sequence   |
//! +----------------+-----------+------------------------+
//! ```
//!
//! Offline frames additionally carry a fixed 16-byte magic sequence as a
//! protocol-identity check, and encode IPv4 addresses with each octet
//! bit-complemented.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ack;
pub mod codec;
pub mod datagram;
pub mod encapsulated;
pub mod error;
pub mod ids;
pub mod offline;
pub mod reliability;

// Re-export main types
pub use ack::{AckKind, AcknowledgeFrame};
pub use codec::{ByteReader, ByteWriter, MAGIC};
pub use datagram::DatagramFrame;
pub use encapsulated::{EncapsulatedMessage, FragmentInfo};
pub use error::WireError;
pub use ids::id_name;
pub use offline::{
    OpenConnectionReply1, OpenConnectionReply2, OpenConnectionRequest1, OpenConnectionRequest2,
    UnconnectedPing, UnconnectedPong, MINIMUM_MTU, PROTOCOL_VERSION,
};
pub use reliability::{Reliability, MAX_ORDER_CHANNELS};
