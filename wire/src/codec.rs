//! Checked byte-level encoding and decoding.
//!
//! This module provides the reader and writer every frame type is built on.
//! All reads verify the remaining length up front and fail with
//! [`WireError::BufferUnderrun`] instead of panicking, so a truncated or
//! hostile datagram can never take down the dispatch path.
//!
//! Sequence numbers and message/order indices travel as 3-byte
//! little-endian triads; everything else is big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::error::WireError;

/// Fixed 16-byte sequence present in offline frames, used as a
/// protocol-identity check
pub const MAGIC: [u8; 16] = [
    0x00, 0xFF, 0xFF, 0x00, 0xFE, 0xFE, 0xFE, 0xFE, 0xFD, 0xFD, 0xFD, 0xFD, 0x12, 0x34, 0x56, 0x78,
];

/// Checked reader over an immutable byte buffer
#[derive(Debug)]
pub struct ByteReader {
    buf: Bytes,
}

impl ByteReader {
    /// Wrap a buffer for reading
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, needed: usize) -> Result<(), WireError> {
        if self.buf.remaining() < needed {
            return Err(WireError::BufferUnderrun {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    /// Read one byte
    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    /// Read a boolean encoded as one byte (nonzero is true)
    pub fn read_bool(&mut self) -> Result<bool, WireError> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a big-endian u16
    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    /// Read a 3-byte little-endian triad
    pub fn read_u24(&mut self) -> Result<u32, WireError> {
        self.need(3)?;
        let lo = u32::from(self.buf.get_u8());
        let mid = u32::from(self.buf.get_u8());
        let hi = u32::from(self.buf.get_u8());
        Ok(lo | (mid << 8) | (hi << 16))
    }

    /// Read a big-endian u32
    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    /// Read a big-endian u64
    pub fn read_u64(&mut self) -> Result<u64, WireError> {
        self.need(8)?;
        Ok(self.buf.get_u64())
    }

    /// Read `len` raw bytes (zero-copy slice of the underlying buffer)
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes, WireError> {
        self.need(len)?;
        Ok(self.buf.split_to(len))
    }

    /// Take everything left in the buffer
    pub fn read_rest(&mut self) -> Bytes {
        self.buf.split_to(self.buf.remaining())
    }

    /// Read and verify the magic sequence
    pub fn read_magic(&mut self) -> Result<(), WireError> {
        let magic = self.read_bytes(MAGIC.len())?;
        if magic[..] != MAGIC {
            return Err(WireError::BadMagic);
        }
        Ok(())
    }

    /// Read a length-prefixed string (u16 length + raw bytes)
    pub fn read_string(&mut self) -> Result<String, WireError> {
        let len = self.read_u16()? as usize;
        let raw = self.read_bytes(len)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Read a socket address: 1-byte IP version, complemented IPv4 octets,
    /// big-endian port. IPv6 is not part of the wire format.
    pub fn read_address(&mut self) -> Result<SocketAddr, WireError> {
        let version = self.read_u8()?;
        if version != 4 {
            return Err(WireError::AddressVersionUnsupported(version));
        }
        let octets = [
            !self.read_u8()?,
            !self.read_u8()?,
            !self.read_u8()?,
            !self.read_u8()?,
        ];
        let port = self.read_u16()?;
        Ok(SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::from(octets),
            port,
        )))
    }
}

/// Growable writer producing an immutable buffer
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: BytesMut,
}

impl ByteWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with a capacity hint
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written yet
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Write one byte
    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    /// Write a boolean as one byte
    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    /// Write a big-endian u16
    pub fn write_u16(&mut self, value: u16) {
        self.buf.put_u16(value);
    }

    /// Write a 3-byte little-endian triad (low 24 bits of `value`)
    pub fn write_u24(&mut self, value: u32) {
        self.buf.put_u8(value as u8);
        self.buf.put_u8((value >> 8) as u8);
        self.buf.put_u8((value >> 16) as u8);
    }

    /// Write a big-endian u32
    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    /// Write a big-endian u64
    pub fn write_u64(&mut self, value: u64) {
        self.buf.put_u64(value);
    }

    /// Write raw bytes
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.buf.put_slice(value);
    }

    /// Write `len` zero bytes
    pub fn pad(&mut self, len: usize) {
        self.buf.put_bytes(0, len);
    }

    /// Write the magic sequence
    pub fn write_magic(&mut self) {
        self.buf.put_slice(&MAGIC);
    }

    /// Write a length-prefixed string
    pub fn write_string(&mut self, value: &str) {
        self.buf.put_u16(value.len() as u16);
        self.buf.put_slice(value.as_bytes());
    }

    /// Write a socket address. IPv6 is not part of the wire format.
    pub fn write_address(&mut self, addr: SocketAddr) -> Result<(), WireError> {
        let v4 = match addr {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(_) => return Err(WireError::AddressVersionUnsupported(6)),
        };
        self.buf.put_u8(4);
        for octet in v4.ip().octets() {
            self.buf.put_u8(!octet);
        }
        self.buf.put_u16(v4.port());
        Ok(())
    }

    /// Finish writing and freeze the buffer
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u24_is_little_endian() {
        let mut w = ByteWriter::new();
        w.write_u24(0x0A0B0C);
        let bytes = w.freeze();
        assert_eq!(&bytes[..], &[0x0C, 0x0B, 0x0A]);

        let mut r = ByteReader::new(bytes);
        assert_eq!(r.read_u24().unwrap(), 0x0A0B0C);
    }

    #[test]
    fn test_primitive_roundtrip() {
        let mut w = ByteWriter::new();
        w.write_u8(0xAB);
        w.write_bool(true);
        w.write_u16(0xBEEF);
        w.write_u24(0xFFFFFF);
        w.write_u32(0xDEADBEEF);
        w.write_u64(0x0123456789ABCDEF);

        let mut r = ByteReader::new(w.freeze());
        assert_eq!(r.read_u8().unwrap(), 0xAB);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_u16().unwrap(), 0xBEEF);
        assert_eq!(r.read_u24().unwrap(), 0xFFFFFF);
        assert_eq!(r.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(r.read_u64().unwrap(), 0x0123456789ABCDEF);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_underrun() {
        let mut r = ByteReader::new(Bytes::from_static(&[0x01]));
        assert!(matches!(
            r.read_u16(),
            Err(WireError::BufferUnderrun {
                needed: 2,
                remaining: 1
            })
        ));
    }

    #[test]
    fn test_magic_check() {
        let mut w = ByteWriter::new();
        w.write_magic();
        let mut r = ByteReader::new(w.freeze());
        assert!(r.read_magic().is_ok());

        let mut bad = MAGIC;
        bad[0] ^= 0xFF;
        let mut r = ByteReader::new(Bytes::copy_from_slice(&bad));
        assert!(matches!(r.read_magic(), Err(WireError::BadMagic)));
    }

    #[test]
    fn test_string_roundtrip() {
        let mut w = ByteWriter::new();
        w.write_string("riptide server");
        let mut r = ByteReader::new(w.freeze());
        assert_eq!(r.read_string().unwrap(), "riptide server");
    }

    #[test]
    fn test_address_octets_are_complemented() {
        let addr: SocketAddr = "192.168.1.10:19132".parse().unwrap();
        let mut w = ByteWriter::new();
        w.write_address(addr).unwrap();
        let bytes = w.freeze();

        assert_eq!(bytes[0], 4);
        assert_eq!(bytes[1], !192);
        assert_eq!(bytes[2], !168);
        assert_eq!(bytes[3], !1);
        assert_eq!(bytes[4], !10);

        let mut r = ByteReader::new(bytes);
        assert_eq!(r.read_address().unwrap(), addr);
    }

    #[test]
    fn test_ipv6_address_unsupported() {
        let addr: SocketAddr = "[::1]:19132".parse().unwrap();
        let mut w = ByteWriter::new();
        assert!(matches!(
            w.write_address(addr),
            Err(WireError::AddressVersionUnsupported(6))
        ));

        let mut r = ByteReader::new(Bytes::from_static(&[6, 0, 0]));
        assert!(matches!(
            r.read_address(),
            Err(WireError::AddressVersionUnsupported(6))
        ));
    }
}
