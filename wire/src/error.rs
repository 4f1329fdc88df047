//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Ran out of bytes mid-decode
    #[error("buffer underrun: need {needed} byte(s), {remaining} remaining")]
    BufferUnderrun {
        /// Bytes the failed read required
        needed: usize,
        /// Bytes left in the buffer
        remaining: usize,
    },

    /// Magic sequence mismatch
    #[error("bad magic sequence")]
    BadMagic,

    /// Address field carries an IP version we cannot decode
    #[error("unsupported address version: IPv{0}")]
    AddressVersionUnsupported(u8),

    /// Unknown reliability discriminant in an encapsulation flags byte
    #[error("unknown reliability {0:#04x}")]
    Reliability(u8),

    /// Unknown or out-of-place frame id
    #[error("unknown frame id {0:#04x}")]
    FrameId(u8),

    /// Payload too large for its length field
    #[error("payload of {0} bytes does not fit the length field")]
    PayloadTooLarge(usize),
}
