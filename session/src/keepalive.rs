//! Connected keep-alive ping/pong and the latency estimate.
//!
//! Connected pings travel as ordinary message payloads inside datagram
//! frames; the echoed monotonic timestamp in the pong gives the
//! round-trip estimate. Timestamps come from a process-local monotonic
//! millisecond clock, never the wall clock.

use bytes::Bytes;
use once_cell::sync::Lazy;
use std::time::{Duration, Instant};

use riptide_wire::ids::{ID_CONNECTED_PING, ID_CONNECTED_PONG};
use riptide_wire::{ByteReader, ByteWriter, WireError};

static CLOCK_ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

/// Milliseconds since the process-local monotonic origin
pub fn now_millis() -> u64 {
    CLOCK_ORIGIN.elapsed().as_millis() as u64
}

/// Build a connected ping carrying the current monotonic time
pub fn build_connected_ping() -> Bytes {
    let mut w = ByteWriter::new();
    w.write_u8(ID_CONNECTED_PING);
    w.write_u64(now_millis());
    w.freeze()
}

/// Build a connected pong echoing a ping's timestamp
pub fn build_connected_pong(ping_time: u64) -> Bytes {
    let mut w = ByteWriter::new();
    w.write_u8(ID_CONNECTED_PONG);
    w.write_u64(ping_time);
    w.freeze()
}

/// Parse a connected ping payload, returning its timestamp
pub fn parse_connected_ping(payload: Bytes) -> Result<u64, WireError> {
    let mut r = ByteReader::new(payload);
    let id = r.read_u8()?;
    if id != ID_CONNECTED_PING {
        return Err(WireError::FrameId(id));
    }
    r.read_u64()
}

/// Parse a connected pong payload, returning the echoed timestamp
pub fn parse_connected_pong(payload: Bytes) -> Result<u64, WireError> {
    let mut r = ByteReader::new(payload);
    let id = r.read_u8()?;
    if id != ID_CONNECTED_PONG {
        return Err(WireError::FrameId(id));
    }
    r.read_u64()
}

/// Round trip implied by an echoed timestamp, if it is not from the
/// future (clock confusion on a hostile peer)
pub fn rtt_from_echo(echoed_millis: u64) -> Option<Duration> {
    let now = now_millis();
    if now >= echoed_millis {
        Some(Duration::from_millis(now - echoed_millis))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_pong_roundtrip() {
        let ping = build_connected_ping();
        let sent = parse_connected_ping(ping).unwrap();

        let pong = build_connected_pong(sent);
        assert_eq!(parse_connected_pong(pong).unwrap(), sent);
    }

    #[test]
    fn test_rtt_measurement() {
        let sent = now_millis();
        std::thread::sleep(Duration::from_millis(5));
        let rtt = rtt_from_echo(sent).unwrap();
        assert!(rtt >= Duration::from_millis(5));
    }

    #[test]
    fn test_future_echo_rejected() {
        assert_eq!(rtt_from_echo(u64::MAX), None);
    }

    #[test]
    fn test_wrong_id_rejected() {
        let pong = build_connected_pong(1);
        assert!(parse_connected_ping(pong).is_err());
    }
}
