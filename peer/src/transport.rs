//! UDP transport plumbing.
//!
//! The session engine is synchronous, so the outbound sink uses the
//! socket's non-blocking send path. A datagram that cannot be sent right
//! now is dropped with a log line, which is exactly the contract of the
//! unreliable transport underneath: the reliability layer above recovers
//! anything that mattered.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use riptide_session::FrameSink;

/// [`FrameSink`] over a shared UDP socket
pub struct UdpSink {
    socket: Arc<UdpSocket>,
}

impl UdpSink {
    /// Wrap a socket for use as a session sink
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }
}

impl FrameSink for UdpSink {
    fn send_raw(&self, bytes: Bytes, peer: SocketAddr) {
        match self.socket.try_send_to(&bytes, peer) {
            Ok(sent) if sent != bytes.len() => {
                warn!("short send to {}: {} of {} bytes", peer, sent, bytes.len());
            }
            Ok(_) => {}
            Err(e) => {
                debug!("dropping {} byte datagram to {}: {}", bytes.len(), peer, e);
            }
        }
    }
}

/// Bind a UDP socket for a server or client endpoint
pub async fn bind_udp(addr: SocketAddr) -> std::io::Result<Arc<UdpSocket>> {
    Ok(Arc::new(UdpSocket::bind(addr).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_sends_datagrams() {
        let receiver = bind_udp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let sender = bind_udp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let target = receiver.local_addr().unwrap();

        let sink = UdpSink::new(sender.clone());
        // Establish write-readiness with the reactor before the
        // non-blocking send, so try_send_to does not race initial
        // readiness and drop the datagram (as a warm production socket
        // never would).
        sender.writable().await.unwrap();
        sink.send_raw(Bytes::from_static(b"probe"), target);

        let mut buf = [0u8; 16];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"probe");
    }
}
