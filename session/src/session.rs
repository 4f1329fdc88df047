//! The per-peer reliability engine.
//!
//! A [`ReliableSession`] owns everything the protocol tracks about one
//! remote peer: send/receive sequence counters, the per-channel ordering
//! state, the retransmission queues, and the fragment reassembly table.
//! Outbound payloads enter through [`ReliableSession::send`]; raw inbound
//! datagrams enter through [`ReliableSession::handle_frame`]. Both paths
//! are synchronous, never block, and are safe to drive concurrently.
//!
//! Ordered delivery uses a real reorder buffer: a message past the
//! channel's next expected index is withheld until retransmission fills
//! the gap. Sequenced delivery keeps only the newest message per channel
//! and silently discards stale arrivals.

use bytes::{Bytes, BytesMut};
use dashmap::{DashMap, DashSet};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use riptide_wire::ids::{ID_ACK, ID_DATAGRAM_MAX, ID_DATAGRAM_MIN, ID_NACK};
use riptide_wire::{
    AckKind, AcknowledgeFrame, DatagramFrame, EncapsulatedMessage, FragmentInfo, Reliability,
    WireError, MAX_ORDER_CHANNELS,
};

use crate::config::SessionConfig;
use crate::delivery::{FrameSink, MessageHandler};
use crate::error::SessionError;

const INDEX_MASK: u32 = 0xFF_FFFF;
const LATENCY_UNKNOWN: u64 = u64::MAX;

/// Ordering and sequencing state for one of the 32 channels
#[derive(Debug, Default)]
struct OrderChannel {
    /// Next order index the ordered stream will release
    next_ordered: u32,
    /// First order index the sequenced stream still accepts
    next_sequenced: u32,
    /// Early ordered arrivals, keyed by order index, with their span
    held: BTreeMap<u32, (EncapsulatedMessage, u32)>,
}

impl OrderChannel {
    /// Admit an ordered message spanning `span` order indices. Returns
    /// every message released by this arrival, in delivery order.
    fn accept_ordered(
        &mut self,
        message: EncapsulatedMessage,
        span: u32,
    ) -> Vec<EncapsulatedMessage> {
        let index = message.order_index;
        if index < self.next_ordered {
            return Vec::new();
        }
        if index > self.next_ordered {
            self.held.entry(index).or_insert((message, span));
            return Vec::new();
        }

        let mut ready = vec![message];
        self.next_ordered = index.wrapping_add(span);
        while let Some(entry) = self.held.first_entry() {
            let held_index = *entry.key();
            if held_index < self.next_ordered {
                entry.remove();
                continue;
            }
            if held_index > self.next_ordered {
                break;
            }
            let (held_message, held_span) = entry.remove();
            self.next_ordered = self.next_ordered.wrapping_add(held_span);
            ready.push(held_message);
        }
        ready
    }

    /// Admit a sequenced message spanning `span` order indices. Returns
    /// the message if it is not stale.
    fn accept_sequenced(
        &mut self,
        message: EncapsulatedMessage,
        span: u32,
    ) -> Option<EncapsulatedMessage> {
        if message.order_index < self.next_sequenced {
            return None;
        }
        self.next_sequenced = message.order_index.wrapping_add(span);
        Some(message)
    }
}

/// One in-progress reassembly
#[derive(Debug)]
struct FragmentGroup {
    count: u16,
    created_at: Instant,
    fragments: BTreeMap<u32, EncapsulatedMessage>,
}

/// Counters sampled from a running session
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Datagram frames handed to the transport, retransmissions included
    pub frames_sent: u64,
    /// Inbound frames processed, duplicates included
    pub frames_received: u64,
    /// Most recent round-trip estimate
    pub latency: Option<Duration>,
}

/// Per-peer reliability state machine.
///
/// All methods take `&self`; the application/timer side and the inbound
/// dispatch side may call into the same session concurrently. Queue and
/// table removal is idempotent, so an ACK racing an eviction pass is
/// never an error.
pub struct ReliableSession {
    peer: SocketAddr,
    config: SessionConfig,
    sink: Arc<dyn FrameSink>,
    handler: Arc<dyn MessageHandler>,

    closed: AtomicBool,

    send_sequence: AtomicU32,
    receive_sequence: AtomicU32,
    send_message_index: AtomicU32,
    next_fragment_group: AtomicU32,
    send_order_index: [AtomicU32; MAX_ORDER_CHANNELS],
    receive_channels: [Mutex<OrderChannel>; MAX_ORDER_CHANNELS],

    reliable_queue: DashMap<u32, DatagramFrame>,
    recovery_queue: DashMap<u32, DatagramFrame>,
    fragment_table: DashMap<u16, FragmentGroup>,
    seen_sequences: DashSet<u32>,

    latency_millis: AtomicU64,
    idle_millis: AtomicU64,
    received_this_second: AtomicU32,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
}

impl ReliableSession {
    /// Create a session for one peer, wired to its transport sink and
    /// delivery handler
    pub fn new(
        config: SessionConfig,
        peer: SocketAddr,
        sink: Arc<dyn FrameSink>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            peer,
            config,
            sink,
            handler,
            closed: AtomicBool::new(false),
            send_sequence: AtomicU32::new(0),
            receive_sequence: AtomicU32::new(0),
            send_message_index: AtomicU32::new(0),
            next_fragment_group: AtomicU32::new(0),
            send_order_index: std::array::from_fn(|_| AtomicU32::new(0)),
            receive_channels: std::array::from_fn(|_| Mutex::new(OrderChannel::default())),
            reliable_queue: DashMap::new(),
            recovery_queue: DashMap::new(),
            fragment_table: DashMap::new(),
            seen_sequences: DashSet::new(),
            latency_millis: AtomicU64::new(LATENCY_UNKNOWN),
            idle_millis: AtomicU64::new(0),
            received_this_second: AtomicU32::new(0),
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
        }
    }

    /// Remote address this session tracks
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Negotiated maximum transfer unit
    pub fn mtu(&self) -> u16 {
        self.config.mtu
    }

    /// Whether the session has been torn down
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Most recent round-trip estimate, if one has been measured
    pub fn latency(&self) -> Option<Duration> {
        match self.latency_millis.load(Ordering::Relaxed) {
            LATENCY_UNKNOWN => None,
            millis => Some(Duration::from_millis(millis)),
        }
    }

    /// Record a round-trip measurement
    pub fn note_latency(&self, rtt: Duration) {
        self.latency_millis
            .store(rtt.as_millis() as u64, Ordering::Relaxed);
    }

    /// Counters snapshot
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            latency: self.latency(),
        }
    }

    /// Frames awaiting acknowledgment
    pub fn pending_reliable(&self) -> usize {
        self.reliable_queue.len()
    }

    /// Frames retained for possible NACK-triggered resend
    pub fn pending_recovery(&self) -> usize {
        self.recovery_queue.len()
    }

    /// Fragment groups currently reassembling
    pub fn open_fragment_groups(&self) -> usize {
        self.fragment_table.len()
    }

    // --- outbound ---

    /// Send one payload under the given reliability and order channel.
    ///
    /// Payloads too large for the MTU are split into fragments, each
    /// independently indexed under the same reliability so a lost piece
    /// can be retransmitted on its own.
    pub fn send(
        &self,
        reliability: Reliability,
        channel: u8,
        payload: Bytes,
    ) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        if usize::from(channel) >= MAX_ORDER_CHANNELS {
            return Err(SessionError::InvalidOrderChannel(channel));
        }

        let mtu = usize::from(self.config.mtu);
        let framed = DatagramFrame::HEADER_LEN
            + EncapsulatedMessage::header_len(reliability, false)
            + payload.len();
        if framed <= mtu {
            let mut message = EncapsulatedMessage::new(reliability, payload);
            message.order_channel = channel;
            return self.transmit(message);
        }

        let overhead =
            DatagramFrame::HEADER_LEN + EncapsulatedMessage::header_len(reliability, true);
        let max_fragment_payload = mtu.saturating_sub(overhead);
        if max_fragment_payload == 0 {
            return Err(SessionError::FragmentStillOversized {
                size: framed,
                mtu: self.config.mtu,
            });
        }

        let group_id = self.next_fragment_group.fetch_add(1, Ordering::Relaxed) as u16;
        let fragments = EncapsulatedMessage::split(
            reliability,
            channel,
            payload,
            max_fragment_payload,
            group_id,
        );
        debug!(
            "splitting {} byte payload into {} fragments (group {}) for {}",
            fragments.iter().map(|f| f.payload.len()).sum::<usize>(),
            fragments.len(),
            group_id,
            self.peer
        );
        for fragment in fragments {
            let fragment_size = DatagramFrame::HEADER_LEN + fragment.encoded_len();
            if fragment_size > mtu {
                return Err(SessionError::FragmentStillOversized {
                    size: fragment_size,
                    mtu: self.config.mtu,
                });
            }
            self.transmit(fragment)?;
        }
        Ok(())
    }

    /// Assign indices, wrap into a fresh datagram frame, queue for
    /// recovery, and hand to the transport
    fn transmit(&self, mut message: EncapsulatedMessage) -> Result<(), SessionError> {
        if message.reliability.is_reliable() {
            message.message_index =
                self.send_message_index.fetch_add(1, Ordering::Relaxed) & INDEX_MASK;
        }
        if message.reliability.is_ordered() || message.reliability.is_sequenced() {
            let channel = usize::from(message.order_channel);
            message.order_index = self.send_order_index[channel].fetch_add(1, Ordering::Relaxed)
                & INDEX_MASK;
        } else {
            message.order_channel = 0;
        }

        let sequence = self.send_sequence.fetch_add(1, Ordering::Relaxed) & INDEX_MASK;
        let mut frame = DatagramFrame::new(sequence);
        frame.messages.push(message);

        let encoded = frame.encode()?;
        if frame.has_reliable() {
            self.reliable_queue.insert(sequence, frame.clone());
        }
        self.recovery_queue.insert(sequence, frame);

        trace!(
            "sending datagram {} ({} bytes) to {}",
            sequence,
            encoded.len(),
            self.peer
        );
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.sink.send_raw(encoded, self.peer);
        Ok(())
    }

    // --- inbound ---

    /// Dispatch one raw inbound datagram by its frame id
    pub fn handle_frame(&self, buf: Bytes) -> Result<(), SessionError> {
        let id = *buf.first().ok_or(WireError::BufferUnderrun {
            needed: 1,
            remaining: 0,
        })?;
        match id {
            ID_ACK => self.handle_ack(&AcknowledgeFrame::decode(buf)?),
            ID_NACK => self.handle_nack(&AcknowledgeFrame::decode(buf)?),
            ID_DATAGRAM_MIN..=ID_DATAGRAM_MAX => self.handle_datagram(DatagramFrame::decode(buf)?),
            other => Err(WireError::FrameId(other).into()),
        }
    }

    /// Process one inbound datagram frame: acknowledge it, report any
    /// sequence gap, then run each contained message through the
    /// ordering gate and fragment reassembly
    pub fn handle_datagram(&self, frame: DatagramFrame) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        self.touch();

        let sequence = frame.sequence_number;
        // duplicates are acknowledged too
        self.send_acknowledge(&AcknowledgeFrame::ack(vec![sequence]));

        if !self.seen_sequences.insert(sequence) {
            trace!("duplicate datagram {} from {}", sequence, self.peer);
            return Ok(());
        }

        let previous = self.receive_sequence.load(Ordering::Relaxed);
        if i64::from(sequence) - i64::from(previous) > 1 {
            let missing: Vec<u32> = (previous + 1..sequence).collect();
            debug!(
                "datagram gap from {}: got {}, missing {:?}",
                self.peer, sequence, missing
            );
            self.send_acknowledge(&AcknowledgeFrame::nack(missing));
        }
        self.receive_sequence.store(sequence, Ordering::Relaxed);

        for message in frame.messages {
            self.handle_encapsulated(message)?;
        }
        Ok(())
    }

    /// Remove acknowledged frames from both retransmission queues
    pub fn handle_ack(&self, ack: &AcknowledgeFrame) -> Result<(), SessionError> {
        if ack.kind != AckKind::Ack {
            return Err(SessionError::UnexpectedFrameKind {
                expected: ID_ACK,
                actual: ack.kind as u8,
            });
        }
        self.touch();
        for &sequence in &ack.sequences {
            self.reliable_queue.remove(&sequence);
            self.recovery_queue.remove(&sequence);
        }
        trace!(
            "ack from {} cleared {} sequence(s)",
            self.peer,
            ack.sequences.len()
        );
        Ok(())
    }

    /// Replay every recorded frame the peer reports missing. Evicted
    /// entries are skipped; retransmission is a literal resend, never a
    /// regeneration.
    pub fn handle_nack(&self, nack: &AcknowledgeFrame) -> Result<(), SessionError> {
        if nack.kind != AckKind::Nack {
            return Err(SessionError::UnexpectedFrameKind {
                expected: ID_NACK,
                actual: nack.kind as u8,
            });
        }
        self.touch();
        for &sequence in &nack.sequences {
            if let Some(frame) = self.recovery_queue.get(&sequence) {
                match frame.encode() {
                    Ok(encoded) => {
                        debug!("resending datagram {} to {}", sequence, self.peer);
                        self.frames_sent.fetch_add(1, Ordering::Relaxed);
                        self.sink.send_raw(encoded, self.peer);
                    }
                    Err(e) => warn!("could not re-encode datagram {}: {}", sequence, e),
                }
            }
        }
        Ok(())
    }

    fn handle_encapsulated(&self, message: EncapsulatedMessage) -> Result<(), SessionError> {
        match message.fragment {
            Some(info) => self.handle_fragment(message, info),
            None => {
                self.gate_and_deliver(message, 1);
                Ok(())
            }
        }
    }

    /// Insert one fragment; on completion, synthesize the combined
    /// message and run it back through the ordering gate. The synthesized
    /// message is never itself a fragment.
    fn handle_fragment(
        &self,
        message: EncapsulatedMessage,
        info: FragmentInfo,
    ) -> Result<(), SessionError> {
        if !self.fragment_table.contains_key(&info.group_id) {
            let open = self.fragment_table.len();
            if open >= self.config.max_open_fragment_groups {
                return Err(SessionError::FragmentTableOverloaded {
                    open,
                    cap: self.config.max_open_fragment_groups,
                });
            }
            if info.count > self.config.max_fragment_count {
                return Err(SessionError::FragmentGroupTooLarge {
                    count: info.count,
                    cap: self.config.max_fragment_count,
                });
            }
        }

        let complete = {
            let mut group = self
                .fragment_table
                .entry(info.group_id)
                .or_insert_with(|| FragmentGroup {
                    count: info.count,
                    created_at: Instant::now(),
                    fragments: BTreeMap::new(),
                });
            if info.index < u32::from(group.count) {
                group.fragments.insert(info.index, message);
            } else {
                warn!(
                    "fragment index {} outside group of {} from {}",
                    info.index, group.count, self.peer
                );
            }
            group.fragments.len() == usize::from(group.count)
        };
        if !complete {
            return Ok(());
        }
        let Some((_, group)) = self.fragment_table.remove(&info.group_id) else {
            return Ok(());
        };

        let first = match group.fragments.values().next() {
            Some(fragment) => fragment.clone(),
            None => return Ok(()),
        };
        let total: usize = group.fragments.values().map(|f| f.payload.len()).sum();
        let mut combined = BytesMut::with_capacity(total);
        for fragment in group.fragments.values() {
            combined.extend_from_slice(&fragment.payload);
        }
        debug!(
            "reassembled fragment group {} from {}: {} fragments, {} bytes",
            info.group_id,
            self.peer,
            group.count,
            combined.len()
        );

        let synthesized = EncapsulatedMessage {
            reliability: first.reliability,
            payload: combined.freeze(),
            message_index: first.message_index,
            order_channel: first.order_channel,
            order_index: first.order_index,
            fragment: None,
        };
        self.gate_and_deliver(synthesized, u32::from(group.count));
        Ok(())
    }

    /// Run one complete message through the per-channel ordering or
    /// sequencing gate, then deliver whatever the gate releases. `span`
    /// is the number of order indices the message occupied on the wire
    /// (its fragment count, or 1).
    fn gate_and_deliver(&self, message: EncapsulatedMessage, span: u32) {
        let reliability = message.reliability;
        if !reliability.is_ordered() && !reliability.is_sequenced() {
            self.deliver(message);
            return;
        }

        let channel = usize::from(message.order_channel);
        if channel >= MAX_ORDER_CHANNELS {
            warn!(
                "dropping message on out-of-range order channel {} from {}",
                message.order_channel, self.peer
            );
            return;
        }

        let ready = {
            let mut state = self.receive_channels[channel]
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if reliability.is_sequenced() {
                match state.accept_sequenced(message, span) {
                    Some(message) => vec![message],
                    None => {
                        trace!("dropped stale sequenced message from {}", self.peer);
                        Vec::new()
                    }
                }
            } else {
                state.accept_ordered(message, span)
            }
        };
        for message in ready {
            self.deliver(message);
        }
    }

    fn deliver(&self, message: EncapsulatedMessage) {
        self.handler
            .on_message(message.payload, message.reliability, message.order_channel);
    }

    fn send_acknowledge(&self, frame: &AcknowledgeFrame) {
        self.sink.send_raw(frame.encode(), self.peer);
    }

    // --- maintenance ---

    /// Evict recovery entries that cannot be profitably retransmitted
    /// (frames with no reliable content) until the queue is back under
    /// its cap; malformed empty entries are always dropped
    pub fn compact_recovery_queue(&self) {
        self.recovery_queue.retain(|_, frame| !frame.messages.is_empty());

        let cap = self.config.max_recovery_entries;
        if self.recovery_queue.len() <= cap {
            return;
        }

        let evictable: Vec<u32> = self
            .recovery_queue
            .iter()
            .filter(|entry| !entry.value().has_reliable())
            .map(|entry| *entry.key())
            .collect();
        let mut evicted = 0usize;
        for sequence in evictable {
            if self.recovery_queue.len() <= cap {
                break;
            }
            self.recovery_queue.remove(&sequence);
            evicted += 1;
        }
        if evicted > 0 {
            debug!(
                "recovery queue for {} over cap, evicted {} unreliable frame(s)",
                self.peer, evicted
            );
        }
    }

    /// Drop incomplete fragment groups older than the configured TTL
    pub fn reap_stale_fragments(&self) {
        let ttl = self.config.fragment_group_ttl;
        let before = self.fragment_table.len();
        self.fragment_table
            .retain(|_, group| group.created_at.elapsed() < ttl);
        let reaped = before.saturating_sub(self.fragment_table.len());
        if reaped > 0 {
            debug!("reaped {} stale fragment group(s) from {}", reaped, self.peer);
        }
    }

    /// Tear the session down: no further sends or dispatches succeed,
    /// and all queue and table memory is released
    pub fn disconnect(&self, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("disconnecting {}: {}", self.peer, reason);
        self.reliable_queue.clear();
        self.recovery_queue.clear();
        self.fragment_table.clear();
        self.seen_sequences.clear();
        self.handler.on_disconnect(reason);
    }

    // --- keep-alive bookkeeping ---

    fn touch(&self) {
        self.idle_millis.store(0, Ordering::Relaxed);
        self.received_this_second.fetch_add(1, Ordering::Relaxed);
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Advance the idle clock by one maintenance tick, returning the new
    /// total
    pub fn advance_idle(&self, delta: Duration) -> Duration {
        let previous = self
            .idle_millis
            .fetch_add(delta.as_millis() as u64, Ordering::Relaxed);
        Duration::from_millis(previous + delta.as_millis() as u64)
    }

    /// Time since the last inbound frame, as accumulated by the
    /// maintenance tick
    pub fn idle_time(&self) -> Duration {
        Duration::from_millis(self.idle_millis.load(Ordering::Relaxed))
    }

    /// Frames received since the counter was last reset
    pub fn received_this_second(&self) -> u32 {
        self.received_this_second.load(Ordering::Relaxed)
    }

    /// Reset the per-second receive counter, returning the old value
    pub fn reset_received_this_second(&self) -> u32 {
        self.received_this_second.swap(0, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ReliableSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliableSession")
            .field("peer", &self.peer)
            .field("mtu", &self.config.mtu)
            .field("closed", &self.is_closed())
            .field("pending_reliable", &self.pending_reliable())
            .field("pending_recovery", &self.pending_recovery())
            .field("open_fragment_groups", &self.open_fragment_groups())
            .finish()
    }
}
