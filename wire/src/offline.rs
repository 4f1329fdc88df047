//! Offline (sessionless) messages.
//!
//! These frames travel outside any session: discovery ping/pong and the
//! two-phase connection exchange that negotiates the MTU a session is
//! created with. Every offline frame carries the magic sequence as a
//! protocol-identity check.
//!
//! The first connection request is an MTU probe: the client pads it out
//! to the frame size it hopes the path can carry, and the server reads
//! the MTU off the received length. The reply-2 echo of the negotiated
//! value is what the session is finally constructed with.

use bytes::Bytes;
use std::net::SocketAddr;

use crate::codec::{ByteReader, ByteWriter};
use crate::error::WireError;
use crate::ids::{
    ID_OPEN_CONNECTION_REPLY_1, ID_OPEN_CONNECTION_REPLY_2, ID_OPEN_CONNECTION_REQUEST_1,
    ID_OPEN_CONNECTION_REQUEST_2, ID_UNCONNECTED_PING, ID_UNCONNECTED_PONG,
};

/// Version of the connection exchange; mismatches are refused
pub const PROTOCOL_VERSION: u8 = 7;

/// Smallest MTU a session may be negotiated down to
pub const MINIMUM_MTU: u16 = 530;

fn expect_id(r: &mut ByteReader, expected: u8) -> Result<(), WireError> {
    let id = r.read_u8()?;
    if id != expected {
        return Err(WireError::FrameId(id));
    }
    Ok(())
}

/// Discovery ping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnconnectedPing {
    /// Sender's monotonic send time, echoed back in the pong
    pub ping_time: u64,
}

impl UnconnectedPing {
    /// Encode to a contiguous buffer
    pub fn encode(&self) -> Bytes {
        let mut w = ByteWriter::new();
        w.write_u8(ID_UNCONNECTED_PING);
        w.write_u64(self.ping_time);
        w.write_magic();
        w.freeze()
    }

    /// Decode, verifying id and magic
    pub fn decode(buf: Bytes) -> Result<Self, WireError> {
        let mut r = ByteReader::new(buf);
        expect_id(&mut r, ID_UNCONNECTED_PING)?;
        let ping_time = r.read_u64()?;
        r.read_magic()?;
        Ok(Self { ping_time })
    }
}

/// Discovery pong
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnconnectedPong {
    /// Echo of the ping's send time
    pub ping_time: u64,
    /// Responding server's GUID
    pub server_guid: u64,
    /// Freeform server identifier string
    pub identifier: String,
}

impl UnconnectedPong {
    /// Encode to a contiguous buffer
    pub fn encode(&self) -> Bytes {
        let mut w = ByteWriter::new();
        w.write_u8(ID_UNCONNECTED_PONG);
        w.write_u64(self.ping_time);
        w.write_u64(self.server_guid);
        w.write_magic();
        w.write_string(&self.identifier);
        w.freeze()
    }

    /// Decode, verifying id and magic
    pub fn decode(buf: Bytes) -> Result<Self, WireError> {
        let mut r = ByteReader::new(buf);
        expect_id(&mut r, ID_UNCONNECTED_PONG)?;
        let ping_time = r.read_u64()?;
        let server_guid = r.read_u64()?;
        r.read_magic()?;
        let identifier = r.read_string()?;
        Ok(Self {
            ping_time,
            server_guid,
            identifier,
        })
    }
}

/// First connection request: protocol check plus MTU probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenConnectionRequest1 {
    /// Connection-exchange version the client speaks
    pub protocol_version: u8,
    /// Frame size this probe is padded out to
    pub mtu: u16,
}

impl OpenConnectionRequest1 {
    /// Encode, padding the frame out to `mtu` bytes
    pub fn encode(&self) -> Bytes {
        let mut w = ByteWriter::with_capacity(self.mtu as usize);
        w.write_u8(ID_OPEN_CONNECTION_REQUEST_1);
        w.write_magic();
        w.write_u8(self.protocol_version);
        let padding = (self.mtu as usize).saturating_sub(w.len());
        w.pad(padding);
        w.freeze()
    }

    /// Decode; the MTU is the received frame's length
    pub fn decode(buf: Bytes) -> Result<Self, WireError> {
        let mtu = buf.len().min(usize::from(u16::MAX)) as u16;
        let mut r = ByteReader::new(buf);
        expect_id(&mut r, ID_OPEN_CONNECTION_REQUEST_1)?;
        r.read_magic()?;
        let protocol_version = r.read_u8()?;
        Ok(Self {
            protocol_version,
            mtu,
        })
    }
}

/// Reply to the first connection request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenConnectionReply1 {
    /// Server's GUID
    pub server_guid: u64,
    /// MTU the server is willing to carry
    pub mtu: u16,
}

impl OpenConnectionReply1 {
    /// Encode to a contiguous buffer
    pub fn encode(&self) -> Bytes {
        let mut w = ByteWriter::new();
        w.write_u8(ID_OPEN_CONNECTION_REPLY_1);
        w.write_magic();
        w.write_u64(self.server_guid);
        w.write_u16(self.mtu);
        w.freeze()
    }

    /// Decode, verifying id and magic
    pub fn decode(buf: Bytes) -> Result<Self, WireError> {
        let mut r = ByteReader::new(buf);
        expect_id(&mut r, ID_OPEN_CONNECTION_REPLY_1)?;
        r.read_magic()?;
        let server_guid = r.read_u64()?;
        let mtu = r.read_u16()?;
        Ok(Self { server_guid, mtu })
    }
}

/// Second connection request, committing to a negotiated MTU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenConnectionRequest2 {
    /// Address the client is connecting to
    pub server_address: SocketAddr,
    /// MTU the client commits to
    pub mtu: u16,
    /// Client's GUID
    pub client_guid: u64,
}

impl OpenConnectionRequest2 {
    /// Encode to a contiguous buffer
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let mut w = ByteWriter::new();
        w.write_u8(ID_OPEN_CONNECTION_REQUEST_2);
        w.write_magic();
        w.write_address(self.server_address)?;
        w.write_u16(self.mtu);
        w.write_u64(self.client_guid);
        Ok(w.freeze())
    }

    /// Decode, verifying id and magic
    pub fn decode(buf: Bytes) -> Result<Self, WireError> {
        let mut r = ByteReader::new(buf);
        expect_id(&mut r, ID_OPEN_CONNECTION_REQUEST_2)?;
        r.read_magic()?;
        let server_address = r.read_address()?;
        let mtu = r.read_u16()?;
        let client_guid = r.read_u64()?;
        Ok(Self {
            server_address,
            mtu,
            client_guid,
        })
    }
}

/// Reply to the second connection request; the session exists after this
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenConnectionReply2 {
    /// Server's GUID
    pub server_guid: u64,
    /// Client's address as the server sees it
    pub client_address: SocketAddr,
    /// Final negotiated MTU
    pub mtu: u16,
}

impl OpenConnectionReply2 {
    /// Encode to a contiguous buffer
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let mut w = ByteWriter::new();
        w.write_u8(ID_OPEN_CONNECTION_REPLY_2);
        w.write_magic();
        w.write_u64(self.server_guid);
        w.write_address(self.client_address)?;
        w.write_u16(self.mtu);
        Ok(w.freeze())
    }

    /// Decode, verifying id and magic
    pub fn decode(buf: Bytes) -> Result<Self, WireError> {
        let mut r = ByteReader::new(buf);
        expect_id(&mut r, ID_OPEN_CONNECTION_REPLY_2)?;
        r.read_magic()?;
        let server_guid = r.read_u64()?;
        let client_address = r.read_address()?;
        let mtu = r.read_u16()?;
        Ok(Self {
            server_guid,
            client_address,
            mtu,
        })
    }
}
