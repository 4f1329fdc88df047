//! Client role: connect to one server and own the session for it.

use anyhow::Context;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use riptide_session::{
    build_connected_ping, build_connected_pong, parse_connected_ping, parse_connected_pong,
    rtt_from_echo, MessageHandler, ReliableSession, SessionConfig, SessionError,
};
use riptide_wire::ids::{ID_CONNECTED_PING, ID_CONNECTED_PONG};
use riptide_wire::{
    OpenConnectionReply1, OpenConnectionReply2, OpenConnectionRequest1, OpenConnectionRequest2,
    Reliability, MINIMUM_MTU, PROTOCOL_VERSION,
};

use crate::transport::{bind_udp, UdpSink};

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Session tuning; the MTU doubles as the probe size for negotiation
    pub session: SessionConfig,
    /// Connection exchange attempts before giving up
    pub connect_attempts: u32,
    /// How long to wait for each reply
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            connect_attempts: 4,
            connect_timeout: Duration::from_millis(500),
        }
    }
}

/// Events emitted by the client
#[derive(Debug)]
pub enum ClientEvent {
    /// A completed application message arrived
    Message {
        /// Message payload
        payload: Bytes,
        /// Reliability it was sent under
        reliability: Reliability,
        /// Order channel it was sent on
        channel: u8,
    },
    /// The session was torn down
    Disconnected {
        /// Why the session ended
        reason: String,
    },
}

/// Delivery handler for the client role
struct ClientRole {
    events: mpsc::UnboundedSender<ClientEvent>,
    session: OnceLock<Weak<ReliableSession>>,
}

impl ClientRole {
    fn session(&self) -> Option<Arc<ReliableSession>> {
        self.session.get().and_then(Weak::upgrade)
    }
}

impl MessageHandler for ClientRole {
    fn on_message(&self, payload: Bytes, reliability: Reliability, channel: u8) {
        match payload.first() {
            Some(&ID_CONNECTED_PING) => match parse_connected_ping(payload) {
                Ok(ping_time) => {
                    if let Some(session) = self.session() {
                        if let Err(e) =
                            session.send(Reliability::Unreliable, 0, build_connected_pong(ping_time))
                        {
                            debug!("could not pong server: {}", e);
                        }
                    }
                }
                Err(e) => debug!("bad connected ping: {}", e),
            },
            Some(&ID_CONNECTED_PONG) => {
                if let Ok(echoed) = parse_connected_pong(payload) {
                    if let (Some(session), Some(rtt)) = (self.session(), rtt_from_echo(echoed)) {
                        session.note_latency(rtt);
                    }
                }
            }
            _ => {
                self.events
                    .send(ClientEvent::Message {
                        payload,
                        reliability,
                        channel,
                    })
                    .ok();
            }
        }
    }

    fn on_disconnect(&self, reason: &str) {
        self.events
            .send(ClientEvent::Disconnected {
                reason: reason.to_string(),
            })
            .ok();
    }
}

/// UDP client connected to one server
pub struct Client {
    socket: Arc<UdpSocket>,
    server: SocketAddr,
    session: Arc<ReliableSession>,
    idle_timeout: Duration,
}

impl Client {
    /// Run the connection exchange against `server` and construct the
    /// session with the negotiated MTU
    pub async fn connect(
        config: ClientConfig,
        server: SocketAddr,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> anyhow::Result<Self> {
        let socket = bind_udp("0.0.0.0:0".parse()?).await?;
        let client_guid: u64 = rand::random();

        let request1 = OpenConnectionRequest1 {
            protocol_version: PROTOCOL_VERSION,
            mtu: config.session.mtu,
        }
        .encode();
        let reply1: OpenConnectionReply1 =
            Self::exchange(&socket, server, &config, &request1, OpenConnectionReply1::decode)
                .await
                .context("no reply to connection request 1")?;
        let mtu = reply1.mtu.clamp(MINIMUM_MTU, config.session.mtu);

        let request2 = OpenConnectionRequest2 {
            server_address: server,
            mtu,
            client_guid,
        }
        .encode()?;
        let reply2: OpenConnectionReply2 =
            Self::exchange(&socket, server, &config, &request2, OpenConnectionReply2::decode)
                .await
                .context("no reply to connection request 2")?;
        let mtu = reply2.mtu.clamp(MINIMUM_MTU, mtu);

        let sink = Arc::new(UdpSink::new(socket.clone()));
        let handler = Arc::new(ClientRole {
            events,
            session: OnceLock::new(),
        });
        let session = Arc::new(ReliableSession::new(
            config.session.clone().with_mtu(mtu),
            server,
            sink,
            handler.clone(),
        ));
        handler.session.set(Arc::downgrade(&session)).ok();

        info!(
            "connected to {} (guid {:#018x}, mtu {})",
            server, reply2.server_guid, mtu
        );
        Ok(Self {
            socket,
            server,
            session,
            idle_timeout: config.session.idle_timeout,
        })
    }

    /// Send one request until a decodable reply arrives or attempts run
    /// out
    async fn exchange<T>(
        socket: &UdpSocket,
        server: SocketAddr,
        config: &ClientConfig,
        request: &[u8],
        decode: impl Fn(Bytes) -> Result<T, riptide_wire::WireError>,
    ) -> Option<T> {
        let mut buf = vec![0u8; 64 * 1024];
        for attempt in 1..=config.connect_attempts {
            if let Err(e) = socket.send_to(request, server).await {
                warn!("connect send failed: {}", e);
                continue;
            }
            match tokio::time::timeout(config.connect_timeout, socket.recv_from(&mut buf)).await {
                Ok(Ok((len, from))) if from == server => {
                    match decode(Bytes::copy_from_slice(&buf[..len])) {
                        Ok(reply) => return Some(reply),
                        Err(e) => debug!("connect attempt {}: unexpected reply: {}", attempt, e),
                    }
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!("connect receive failed: {}", e);
                }
                Err(_) => debug!("connect attempt {} timed out", attempt),
            }
        }
        None
    }

    /// Address this client is bound to
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// The session for the connected server
    pub fn session(&self) -> &Arc<ReliableSession> {
        &self.session
    }

    /// Most recent round-trip estimate
    pub fn latency(&self) -> Option<Duration> {
        self.session.latency()
    }

    /// Send one payload to the server
    pub fn send(
        &self,
        reliability: Reliability,
        channel: u8,
        payload: Bytes,
    ) -> Result<(), SessionError> {
        self.session.send(reliability, channel, payload)
    }

    /// Tear the session down
    pub fn disconnect(&self, reason: &str) {
        self.session.disconnect(reason);
    }

    /// Drive the client: inbound dispatch plus the maintenance tick.
    /// Returns once the session is closed.
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut buf = vec![0u8; 64 * 1024];

        while !self.session.is_closed() {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, from)) if from == self.server => {
                            let bytes = Bytes::copy_from_slice(&buf[..len]);
                            if let Err(e) = self.session.handle_frame(bytes) {
                                warn!("failed to handle frame from server: {}", e);
                            }
                        }
                        Ok(_) => {}
                        Err(e) => warn!("udp receive error: {}", e),
                    }
                }
                _ = tick.tick() => {
                    self.session.reset_received_this_second();
                    let idle = self.session.advance_idle(Duration::from_secs(1));
                    if idle >= self.idle_timeout {
                        self.session.disconnect("timeout");
                        break;
                    }
                    if idle * 2 >= self.idle_timeout {
                        if let Err(e) =
                            self.session.send(Reliability::Unreliable, 0, build_connected_ping())
                        {
                            debug!("could not ping server: {}", e);
                        }
                    }
                    self.session.compact_recovery_queue();
                    self.session.reap_stale_fragments();
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{Server, ServerConfig, ServerEvent};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    async fn start_pair() -> (
        Arc<Server>,
        mpsc::UnboundedReceiver<ServerEvent>,
        Arc<Client>,
        mpsc::UnboundedReceiver<ClientEvent>,
    ) {
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let server = Arc::new(
            Server::bind(
                ServerConfig::default(),
                "127.0.0.1:0".parse().unwrap(),
                server_tx,
            )
            .await
            .unwrap(),
        );
        let addr = server.local_addr().unwrap();
        let server_task = server.clone();
        tokio::spawn(async move { server_task.run().await });

        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let client = Arc::new(
            Client::connect(ClientConfig::default(), addr, client_tx)
                .await
                .unwrap(),
        );
        let client_task = client.clone();
        tokio::spawn(async move { client_task.run().await });

        (server, server_rx, client, client_rx)
    }

    #[tokio::test]
    async fn test_connect_and_roundtrip() {
        let (server, mut server_rx, client, mut client_rx) = start_pair().await;

        let peer = match timeout(WAIT, server_rx.recv()).await.unwrap().unwrap() {
            ServerEvent::Connected { peer } => peer,
            other => panic!("expected connect event, got {:?}", other),
        };
        assert_eq!(server.session_count(), 1);

        client
            .send(
                Reliability::ReliableOrdered,
                0,
                Bytes::from_static(b"hello riptide"),
            )
            .unwrap();
        match timeout(WAIT, server_rx.recv()).await.unwrap().unwrap() {
            ServerEvent::Message {
                payload,
                reliability,
                ..
            } => {
                assert_eq!(payload, Bytes::from_static(b"hello riptide"));
                assert_eq!(reliability, Reliability::ReliableOrdered);
            }
            other => panic!("expected message event, got {:?}", other),
        }

        server
            .send(
                peer,
                Reliability::ReliableOrdered,
                0,
                Bytes::from_static(b"welcome"),
            )
            .unwrap();
        match timeout(WAIT, client_rx.recv()).await.unwrap().unwrap() {
            ClientEvent::Message { payload, .. } => {
                assert_eq!(payload, Bytes::from_static(b"welcome"));
            }
            other => panic!("expected message event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_large_payload_fragments_across_the_wire() {
        let (_server, mut server_rx, client, _client_rx) = start_pair().await;
        timeout(WAIT, server_rx.recv()).await.unwrap().unwrap();

        let payload = Bytes::from((0..5000u32).map(|i| i as u8).collect::<Vec<_>>());
        client
            .send(Reliability::Reliable, 0, payload.clone())
            .unwrap();

        match timeout(WAIT, server_rx.recv()).await.unwrap().unwrap() {
            ServerEvent::Message { payload: received, .. } => assert_eq!(received, payload),
            other => panic!("expected message event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_to_nothing_fails() {
        let config = ClientConfig {
            connect_attempts: 2,
            connect_timeout: Duration::from_millis(50),
            ..ClientConfig::default()
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = Client::connect(config, "127.0.0.1:9".parse().unwrap(), tx).await;
        assert!(result.is_err());
    }
}
