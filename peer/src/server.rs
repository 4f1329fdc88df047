//! Server role: accept connections, own one session per peer.
//!
//! The server answers offline discovery pings, runs the two-phase
//! connection exchange, and creates a [`ReliableSession`] per accepted
//! peer. All connected traffic is routed to the owning session; a
//! one-second maintenance tick drives keep-alive pings, idle timeouts,
//! recovery-queue compaction, and stale-fragment reaping.

use bytes::Bytes;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use riptide_session::{
    build_connected_ping, build_connected_pong, parse_connected_ping, parse_connected_pong,
    rtt_from_echo, FrameSink, MessageHandler, ReliableSession, SessionConfig, SessionError,
};
use riptide_wire::ids::{
    ID_CONNECTED_PING, ID_CONNECTED_PONG, ID_OPEN_CONNECTION_REQUEST_1,
    ID_OPEN_CONNECTION_REQUEST_2, ID_UNCONNECTED_PING,
};
use riptide_wire::{
    id_name, OpenConnectionReply1, OpenConnectionReply2, OpenConnectionRequest1,
    OpenConnectionRequest2, Reliability, UnconnectedPing, UnconnectedPong, MINIMUM_MTU,
    PROTOCOL_VERSION,
};

use crate::transport::{bind_udp, UdpSink};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Identifier string returned to discovery pings
    pub identifier: String,
    /// Session tuning applied to every accepted peer
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            identifier: "riptide server".to_string(),
            session: SessionConfig::default(),
        }
    }
}

/// Events emitted by the server
#[derive(Debug)]
pub enum ServerEvent {
    /// A peer completed the connection exchange
    Connected {
        /// The peer's address
        peer: SocketAddr,
    },
    /// A peer's session was torn down
    Disconnected {
        /// The peer's address
        peer: SocketAddr,
        /// Why the session ended
        reason: String,
    },
    /// A completed application message arrived
    Message {
        /// Sending peer
        peer: SocketAddr,
        /// Message payload
        payload: Bytes,
        /// Reliability it was sent under
        reliability: Reliability,
        /// Order channel it was sent on
        channel: u8,
    },
}

/// Per-peer delivery handler for the server role: answers keep-alive
/// pings and forwards application payloads as events
struct ServerRole {
    peer: SocketAddr,
    events: mpsc::UnboundedSender<ServerEvent>,
    session: OnceLock<Weak<ReliableSession>>,
}

impl ServerRole {
    fn session(&self) -> Option<Arc<ReliableSession>> {
        self.session.get().and_then(Weak::upgrade)
    }
}

impl MessageHandler for ServerRole {
    fn on_message(&self, payload: Bytes, reliability: Reliability, channel: u8) {
        match payload.first() {
            Some(&ID_CONNECTED_PING) => match parse_connected_ping(payload) {
                Ok(ping_time) => {
                    if let Some(session) = self.session() {
                        if let Err(e) =
                            session.send(Reliability::Unreliable, 0, build_connected_pong(ping_time))
                        {
                            debug!("could not pong {}: {}", self.peer, e);
                        }
                    }
                }
                Err(e) => debug!("bad connected ping from {}: {}", self.peer, e),
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
                    .send(ServerEvent::Message {
                        peer: self.peer,
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
            .send(ServerEvent::Disconnected {
                peer: self.peer,
                reason: reason.to_string(),
            })
            .ok();
    }
}

/// UDP server owning one reliability session per connected peer
pub struct Server {
    config: ServerConfig,
    guid: u64,
    socket: Arc<UdpSocket>,
    sink: Arc<UdpSink>,
    sessions: DashMap<SocketAddr, Arc<ReliableSession>>,
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl Server {
    /// Bind a server socket; events flow through the given channel
    pub async fn bind(
        config: ServerConfig,
        addr: SocketAddr,
        events: mpsc::UnboundedSender<ServerEvent>,
    ) -> anyhow::Result<Self> {
        let socket = bind_udp(addr).await?;
        let sink = Arc::new(UdpSink::new(socket.clone()));
        Ok(Self {
            config,
            guid: rand::random(),
            socket,
            sink,
            sessions: DashMap::new(),
            events,
        })
    }

    /// Address the server is bound to
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Number of connected peers
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Send one payload to a connected peer
    pub fn send(
        &self,
        peer: SocketAddr,
        reliability: Reliability,
        channel: u8,
        payload: Bytes,
    ) -> Result<(), SessionError> {
        match self.sessions.get(&peer) {
            Some(session) => session.send(reliability, channel, payload),
            None => Err(SessionError::Closed),
        }
    }

    /// Tear down one peer's session
    pub fn disconnect(&self, peer: SocketAddr, reason: &str) -> bool {
        match self.sessions.remove(&peer) {
            Some((_, session)) => {
                session.disconnect(reason);
                true
            }
            None => false,
        }
    }

    /// Drive the server: inbound dispatch plus the maintenance tick
    pub async fn run(&self) -> anyhow::Result<()> {
        info!(
            "listening on {} (guid {:#018x})",
            self.socket.local_addr()?,
            self.guid
        );
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut buf = vec![0u8; 64 * 1024];

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, peer)) => {
                            let bytes = Bytes::copy_from_slice(&buf[..len]);
                            self.dispatch(bytes, peer);
                        }
                        Err(e) => warn!("udp receive error: {}", e),
                    }
                }
                _ = tick.tick() => self.tick(),
            }
        }
    }

    fn dispatch(&self, bytes: Bytes, peer: SocketAddr) {
        let Some(&id) = bytes.first() else {
            return;
        };
        match id {
            ID_UNCONNECTED_PING => match UnconnectedPing::decode(bytes) {
                Ok(ping) => {
                    let pong = UnconnectedPong {
                        ping_time: ping.ping_time,
                        server_guid: self.guid,
                        identifier: self.config.identifier.clone(),
                    };
                    self.sink.send_raw(pong.encode(), peer);
                }
                Err(e) => debug!("bad discovery ping from {}: {}", peer, e),
            },
            ID_OPEN_CONNECTION_REQUEST_1 => match OpenConnectionRequest1::decode(bytes) {
                Ok(request) => self.handle_connection_request_1(request, peer),
                Err(e) => debug!("bad connection request from {}: {}", peer, e),
            },
            ID_OPEN_CONNECTION_REQUEST_2 => match OpenConnectionRequest2::decode(bytes) {
                Ok(request) => self.handle_connection_request_2(request, peer),
                Err(e) => debug!("bad connection request from {}: {}", peer, e),
            },
            _ => {
                if let Some(session) = self.sessions.get(&peer) {
                    if let Err(e) = session.handle_frame(bytes) {
                        warn!(
                            "failed to handle {} frame from {}: {}",
                            id_name(id).unwrap_or("unknown"),
                            peer,
                            e
                        );
                    }
                } else {
                    debug!("connected frame {:#04x} from unknown peer {}", id, peer);
                }
            }
        }
    }

    fn handle_connection_request_1(&self, request: OpenConnectionRequest1, peer: SocketAddr) {
        if request.protocol_version != PROTOCOL_VERSION {
            warn!(
                "refusing {}: protocol version {} (want {})",
                peer, request.protocol_version, PROTOCOL_VERSION
            );
            return;
        }
        let mtu = request.mtu.clamp(MINIMUM_MTU, self.config.session.mtu);
        let reply = OpenConnectionReply1 {
            server_guid: self.guid,
            mtu,
        };
        self.sink.send_raw(reply.encode(), peer);
    }

    fn handle_connection_request_2(&self, request: OpenConnectionRequest2, peer: SocketAddr) {
        let mtu = request.mtu.clamp(MINIMUM_MTU, self.config.session.mtu);
        let reply = OpenConnectionReply2 {
            server_guid: self.guid,
            client_address: peer,
            mtu,
        };
        let encoded = match reply.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("could not encode connection reply for {}: {}", peer, e);
                return;
            }
        };

        // a retransmitted request just gets the reply again
        if self.sessions.contains_key(&peer) {
            self.sink.send_raw(encoded, peer);
            return;
        }

        let handler = Arc::new(ServerRole {
            peer,
            events: self.events.clone(),
            session: OnceLock::new(),
        });
        let session = Arc::new(ReliableSession::new(
            self.config.session.clone().with_mtu(mtu),
            peer,
            self.sink.clone(),
            handler.clone(),
        ));
        handler.session.set(Arc::downgrade(&session)).ok();
        self.sessions.insert(peer, session);

        info!("session established with {} (mtu {})", peer, mtu);
        self.sink.send_raw(encoded, peer);
        self.events.send(ServerEvent::Connected { peer }).ok();
    }

    fn tick(&self) {
        let idle_timeout = self.config.session.idle_timeout;
        let mut timed_out = Vec::new();

        for entry in self.sessions.iter() {
            let session = entry.value();
            session.reset_received_this_second();
            let idle = session.advance_idle(Duration::from_secs(1));
            if idle >= idle_timeout {
                timed_out.push(*entry.key());
                continue;
            }
            if idle * 2 >= idle_timeout {
                if let Err(e) = session.send(Reliability::Unreliable, 0, build_connected_ping()) {
                    debug!("could not ping {}: {}", entry.key(), e);
                }
            }
            session.compact_recovery_queue();
            session.reap_stale_fragments();
        }

        for peer in timed_out {
            if let Some((_, session)) = self.sessions.remove(&peer) {
                session.disconnect("timeout");
            }
        }
    }
}
