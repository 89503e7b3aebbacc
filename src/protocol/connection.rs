//! # Connection
//!
//! One peer's end of a session: serializes and transforms outbound records, frames
//! them for the transport (splitting datagrams when needed), tracks reliable
//! messages, and turns inbound bytes back into ordered deliveries.
//!
//! The connection owns no socket and reads no clock. Every operation takes `now`;
//! every produced frame is returned to the caller to transmit.
//!
//! ## Lifecycle
//! ```text
//! Fresh ──connect()──▶ Handshaking ──HandshakeResponse──▶ Active ──close()──▶ Closing ──▶ Closed
//!   │                                                       ▲
//!   ├──HandshakeInit (responder)────────────────────────────┘
//!   └──activate() (pre-shared key or no encryption)─────────┘
//! ```
//! Control messages travel without compression or encryption. Application messages
//! require `Active`.

use crate::config::ProtocolConfig;
use crate::core::frame::{DatagramFrame, StreamFramer};
use crate::core::header::{FragmentHeader, FrameFlags};
use crate::core::message::Message;
use crate::core::serialization::ObjectCodec;
use crate::error::constants::{ERR_ALREADY_CLOSED, ERR_NOT_ACTIVE};
use crate::error::{ProtocolError, Result};
use crate::protocol::dh::KeySize;
use crate::protocol::fragment::{
    fits_unfragmented, split, FragmentSetIdGenerator, Fragments, Reassembler,
};
use crate::protocol::handshake::{
    self, initiator_finish, initiator_start, responder_accept, HandshakeErrorCode, HandshakeInit,
    HandshakeResponse, HandshakeTimeouts, InitiatorHandshake, ResponderOutcome,
};
use crate::protocol::message::{Delivery, MessageKind, MessageRegistry};
use crate::protocol::pipeline::{reverse_bytes, transform_bytes, TransformPolicy};
use crate::protocol::reliability::ReliabilityEngine;
use crate::utils::buffer_pool::BufferPool;
use crate::utils::crypto::SessionKey;
use crate::utils::metrics::TransportMetrics;
use bytes::{BufMut, Bytes};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

const ERR_MALFORMED_ACK: &str = "ack payload is not an 8-byte sequence";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Ordered byte stream; frames use the stream header and are never fragmented
    Stream,
    /// Unordered datagrams of bounded size
    Datagram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportCapabilities {
    pub kind: TransportKind,
    /// Largest datagram the transport carries; unused for streams
    pub max_unit_size: usize,
}

impl TransportCapabilities {
    pub fn stream() -> Self {
        Self {
            kind: TransportKind::Stream,
            max_unit_size: usize::MAX,
        }
    }

    pub fn datagram(max_unit_size: usize) -> Self {
        Self {
            kind: TransportKind::Datagram,
            max_unit_size,
        }
    }

    pub fn is_datagram(&self) -> bool {
        self.kind == TransportKind::Datagram
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Fresh,
    Handshaking,
    Active,
    Closing,
    Closed,
}

/// Something the owner of a connection must act on after [`Connection::feed`]
#[derive(Debug)]
pub enum ConnectionEvent {
    /// An application message (or a pong), transforms already reversed
    Deliver(Message),
    /// A frame to put on the wire: acks, pongs and handshake responses
    Transmit(Bytes),
    /// An inbound message or fragment was discarded; the connection is unaffected
    Dropped(ProtocolError),
    /// The handshake finished and a session key is installed
    Established,
    HandshakeFailed(ProtocolError),
    /// The peer sent a disconnect
    PeerClosed,
}

fn transmit(frames: Vec<Bytes>) -> impl Iterator<Item = ConnectionEvent> {
    frames.into_iter().map(ConnectionEvent::Transmit)
}

fn ack_sequence(payload: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = payload.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

pub struct Connection {
    config: ProtocolConfig,
    registry: Arc<MessageRegistry>,
    capabilities: TransportCapabilities,
    local_peer_id: u32,
    state: ConnectionState,
    codec: ObjectCodec,
    policy: TransformPolicy,
    control_policy: TransformPolicy,
    key: Option<SessionKey>,
    reliability: ReliabilityEngine,
    reassembler: Reassembler,
    framer: StreamFramer,
    set_ids: FragmentSetIdGenerator,
    pool: BufferPool,
    handshake: Option<InitiatorHandshake>,
    handshake_started: Option<Instant>,
    metrics: Arc<TransportMetrics>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("local_peer_id", &self.local_peer_id)
            .field("state", &self.state)
            .field("transport", &self.capabilities.kind)
            .field("in_flight", &self.reliability.in_flight())
            .finish()
    }
}

impl Connection {
    pub fn new(
        config: ProtocolConfig,
        registry: Arc<MessageRegistry>,
        capabilities: TransportCapabilities,
        local_peer_id: u32,
    ) -> Self {
        let metrics = Arc::new(TransportMetrics::new());
        let max_payload = config.transform.max_payload_size;

        Self {
            registry,
            capabilities,
            local_peer_id,
            state: ConnectionState::Fresh,
            codec: ObjectCodec::new(max_payload),
            policy: TransformPolicy::from(&config.transform),
            control_policy: TransformPolicy::plain(max_payload),
            key: None,
            reliability: ReliabilityEngine::with_metrics(&config.reliability, metrics.clone()),
            reassembler: Reassembler::new(&config.fragmentation),
            framer: StreamFramer::new(max_payload),
            set_ids: FragmentSetIdGenerator::new(),
            pool: BufferPool::default(),
            handshake: None,
            handshake_started: None,
            metrics,
            config,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn local_peer_id(&self) -> u32 {
        self.local_peer_id
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<TransportMetrics> {
        &self.metrics
    }

    pub fn reliability(&self) -> &ReliabilityEngine {
        &self.reliability
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// Earliest retransmission deadline, for callers scheduling their own timers
    pub fn next_deadline(&self) -> Option<Instant> {
        self.reliability.next_deadline()
    }

    /// Install a key obtained out of band
    pub fn install_key(&mut self, key: SessionKey) {
        self.key = Some(key);
    }

    /// Skip the handshake. Fails when encryption is enabled and no key is installed.
    pub fn activate(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Closing | ConnectionState::Closed => {
                Err(ProtocolError::ConnectionClosed)
            }
            _ if self.policy.encryption && self.key.is_none() => Err(ProtocolError::MissingKey),
            _ => {
                self.set_state(ConnectionState::Active);
                Ok(())
            }
        }
    }

    /// Start the key exchange as initiator; returns the frames carrying the init
    #[instrument(level = "debug", skip(self, now), fields(peer = self.local_peer_id))]
    pub fn connect(&mut self, now: Instant) -> Result<Vec<Bytes>> {
        if self.state != ConnectionState::Fresh {
            return Err(ProtocolError::InvalidState("handshake already started"));
        }

        let (state, init) = initiator_start(self.local_peer_id, self.config.security.key_size)?;
        self.handshake = Some(state);
        self.handshake_started = Some(now);
        self.set_state(ConnectionState::Handshaking);
        self.send_control(MessageKind::HandshakeInit, &init, now)
    }

    /// Serialize `record` and produce the frames for message `message_id`
    pub fn encode<R: Serialize + ?Sized>(
        &mut self,
        message_id: u16,
        record: &R,
        now: Instant,
    ) -> Result<Vec<Bytes>> {
        let payload = self.codec.encode(record)?;
        self.encode_bytes(message_id, payload, now)
    }

    /// Produce the frames for an already serialized payload
    pub fn encode_bytes(
        &mut self,
        message_id: u16,
        payload: Vec<u8>,
        now: Instant,
    ) -> Result<Vec<Bytes>> {
        match self.state {
            ConnectionState::Closed => return Err(ProtocolError::ConnectionClosed),
            ConnectionState::Active => {}
            _ if MessageKind::from_id(message_id).is_some() => {}
            _ => return Err(ProtocolError::InvalidState(ERR_NOT_ACTIVE)),
        }

        let delivery = self.registry.delivery(message_id)?;
        let policy = if MessageKind::from_id(message_id).is_some() {
            &self.control_policy
        } else {
            &self.policy
        };
        let (flags, payload) = transform_bytes(payload, policy, self.key.as_ref())?;
        self.send(Message::new(message_id, payload).with_flags(flags), delivery, now)
    }

    /// Deserialize a delivered message
    pub fn decode_record<R: DeserializeOwned>(&self, message: &Message) -> Result<R> {
        self.codec.decode(message.payload()).map_err(|e| match e {
            ProtocolError::DeserializeError(reason) => ProtocolError::CorruptPayload(reason),
            other => other,
        })
    }

    /// Process bytes received from the transport. For streams `data` may hold any
    /// slice of the byte stream; for datagrams it must be exactly one datagram.
    ///
    /// Returns `Err` only for faults that end the connection (a corrupt stream, a
    /// closed connection). Malformed datagrams are reported as `Dropped`.
    pub fn feed(&mut self, data: &[u8], now: Instant) -> Result<Vec<ConnectionEvent>> {
        if self.state == ConnectionState::Closed {
            return Err(ProtocolError::ConnectionClosed);
        }
        TransportMetrics::add(&self.metrics.bytes_received, data.len() as u64);

        let mut events = Vec::new();
        match self.capabilities.kind {
            TransportKind::Stream => {
                let messages = match self.framer.feed(data) {
                    Ok(messages) => messages,
                    Err(e) => {
                        warn!(error = %e, "stream framing lost, closing");
                        self.set_state(ConnectionState::Closed);
                        return Err(e);
                    }
                };
                for message in messages {
                    self.handle_message(message, now, &mut events)?;
                }
            }
            TransportKind::Datagram => {
                let frame = match DatagramFrame::parse(data, self.config.transform.max_payload_size)
                {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!(error = %e, "dropping malformed datagram");
                        events.push(ConnectionEvent::Dropped(e));
                        return Ok(events);
                    }
                };
                if let Some(message) = self.reassemble(frame, now, &mut events) {
                    self.handle_message(message, now, &mut events)?;
                }
            }
        }
        Ok(events)
    }

    /// Periodic work: retransmissions, fragment sweep, close and handshake timers.
    ///
    /// `Err(RetryLimitExceeded)` and a handshake timeout close the connection.
    pub fn on_tick(&mut self, now: Instant) -> Result<Vec<Bytes>> {
        if self.state == ConnectionState::Closed {
            return Ok(Vec::new());
        }

        if let Some(started) = self.handshake_started {
            if self.state == ConnectionState::Handshaking
                && now.saturating_duration_since(started) >= self.config.security.handshake_timeout
            {
                warn!(peer = self.local_peer_id, "handshake timed out");
                self.handshake = None;
                self.set_state(ConnectionState::Closed);
                return Err(ProtocolError::HandshakeError("timed out".to_string()));
            }
        }

        let scan = self.reliability.poll_retransmits(now);
        if let Some(&sequence) = scan.failed.first() {
            self.set_state(ConnectionState::Closed);
            return Err(ProtocolError::RetryLimitExceeded(sequence));
        }

        let mut frames = Vec::new();
        for message in &scan.resend {
            frames.extend(self.frame(message)?);
        }

        let swept = self.reassembler.sweep(now);
        if swept > 0 {
            TransportMetrics::add(&self.metrics.fragments_dropped, swept as u64);
        }

        self.finish_close_if_drained();
        Ok(frames)
    }

    /// Begin an orderly close. An active connection sends a reliable disconnect and
    /// moves to `Closing` until it is acknowledged; otherwise it closes at once.
    pub fn close(&mut self, now: Instant) -> Result<Vec<Bytes>> {
        match self.state {
            ConnectionState::Closed | ConnectionState::Closing => {
                Err(ProtocolError::InvalidState(ERR_ALREADY_CLOSED))
            }
            ConnectionState::Active => {
                let frames = self.send_control(MessageKind::Disconnect, &(), now)?;
                self.set_state(ConnectionState::Closing);
                Ok(frames)
            }
            ConnectionState::Fresh | ConnectionState::Handshaking => {
                self.handshake = None;
                self.set_state(ConnectionState::Closed);
                Ok(Vec::new())
            }
        }
    }

    /// Drop all in-flight, buffered and partially reassembled state. The session key
    /// and connection state are kept.
    pub fn reset(&mut self) {
        debug!(peer = self.local_peer_id, "resetting connection");
        self.reliability.reset();
        self.reassembler.clear();
        self.framer.clear();
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            info!(peer = self.local_peer_id, from = ?self.state, to = ?state, "connection state");
            self.state = state;
        }
    }

    fn finish_close_if_drained(&mut self) {
        if self.state == ConnectionState::Closing && self.reliability.in_flight() == 0 {
            self.set_state(ConnectionState::Closed);
        }
    }

    fn supported_key_sizes(&self) -> &'static [KeySize] {
        match self.config.security.key_size {
            KeySize::Bits512 => &[KeySize::Bits512, KeySize::Bits2048],
            KeySize::Bits2048 => &[KeySize::Bits2048],
        }
    }

    fn send_control<R: Serialize + ?Sized>(
        &mut self,
        kind: MessageKind,
        record: &R,
        now: Instant,
    ) -> Result<Vec<Bytes>> {
        let payload = self.codec.encode(record)?;
        let (flags, payload) = transform_bytes(payload, &self.control_policy, None)?;
        self.send(Message::new(kind.id(), payload).with_flags(flags), kind.delivery(), now)
    }

    fn send(&mut self, message: Message, delivery: Delivery, now: Instant) -> Result<Vec<Bytes>> {
        if message.len() > self.config.transform.max_payload_size {
            return Err(ProtocolError::OversizedPacket(message.len()));
        }
        if self.capabilities.is_datagram()
            && message.len() > self.config.fragmentation.max_reassembled_size
        {
            return Err(ProtocolError::OversizedPacket(message.len()));
        }

        let message = self
            .reliability
            .register(message.with_peer(self.local_peer_id), delivery, now);
        self.frame(&message)
    }

    /// Wire frames for `message`, which already carries its sequence number
    fn frame(&mut self, message: &Message) -> Result<Vec<Bytes>> {
        let frames = match self.capabilities.kind {
            TransportKind::Stream => {
                let mut buf = self.pool.acquire();
                message.stream_header().pack(&mut *buf);
                buf.put_slice(message.payload());
                vec![Bytes::copy_from_slice(&buf)]
            }
            TransportKind::Datagram => {
                let unit = self.capabilities.max_unit_size;
                let set_id = if fits_unfragmented(message.len(), unit) {
                    0
                } else {
                    self.set_ids.next_id()
                };

                match split(message.payload().clone(), unit, set_id)? {
                    Fragments::Single(chunk) => {
                        vec![self.datagram(message, None, chunk)]
                    }
                    Fragments::Parts(parts) => {
                        trace!(set_id, count = parts.len(), "fragmenting message");
                        parts
                            .into_iter()
                            .map(|part| self.datagram(message, Some(part.header), part.data))
                            .collect()
                    }
                }
            }
        };

        let total: usize = frames.iter().map(Bytes::len).sum();
        TransportMetrics::add(&self.metrics.bytes_sent, total as u64);
        Ok(frames)
    }

    fn datagram(
        &self,
        message: &Message,
        fragment: Option<FragmentHeader>,
        chunk: Bytes,
    ) -> Bytes {
        let frame = DatagramFrame::new(
            self.local_peer_id,
            message.message_id(),
            message.flags(),
            message.sequence(),
            fragment,
            chunk,
        );
        let mut buf = self.pool.acquire();
        frame.encode(&mut *buf);
        Bytes::copy_from_slice(&buf)
    }

    fn reassemble(
        &mut self,
        frame: DatagramFrame,
        now: Instant,
        events: &mut Vec<ConnectionEvent>,
    ) -> Option<Message> {
        let Some(fragment) = frame.fragment().copied() else {
            return Some(frame.into_message());
        };

        let header = *frame.header();
        match self
            .reassembler
            .accept(header.peer_id(), &fragment, frame.chunk(), now)
        {
            Ok(Some(payload)) => {
                TransportMetrics::incr(&self.metrics.fragment_sets_completed);
                Some(
                    Message::new(header.message_id(), payload)
                        .with_sequence(frame.sequence())
                        .with_flags(header.flags() - FrameFlags::FRAGMENTED)
                        .with_peer(header.peer_id()),
                )
            }
            Ok(None) => None,
            Err(e) => {
                TransportMetrics::incr(&self.metrics.fragments_dropped);
                debug!(error = %e, set_id = fragment.set_id(), "dropping fragment");
                events.push(ConnectionEvent::Dropped(e));
                None
            }
        }
    }

    fn handle_message(
        &mut self,
        message: Message,
        now: Instant,
        events: &mut Vec<ConnectionEvent>,
    ) -> Result<()> {
        if message.message_id() == MessageKind::Ack.id() {
            match ack_sequence(message.payload()) {
                Some(sequence) => {
                    self.reliability.on_ack(sequence, now);
                    self.finish_close_if_drained();
                }
                None => events.push(ConnectionEvent::Dropped(ProtocolError::CorruptPayload(
                    ERR_MALFORMED_ACK.to_string(),
                ))),
            }
            return Ok(());
        }

        // Rejected before sequencing: no ack, no sequence number consumed
        if let Err(e) = self.admit_application(&message) {
            debug!(error = %e, id = message.message_id(), state = ?self.state, "dropping inbound message");
            events.push(ConnectionEvent::Dropped(e));
            return Ok(());
        }

        let inbound = self.reliability.accept_inbound(message);
        if let Some(sequence) = inbound.ack {
            let ack = Message::new(MessageKind::Ack.id(), sequence.to_be_bytes().to_vec())
                .with_peer(self.local_peer_id);
            events.extend(transmit(self.frame(&ack)?));
        }
        for message in inbound.deliver {
            self.deliver(message, now, events)?;
        }
        Ok(())
    }

    /// Application messages need an established session, and an encrypted one
    /// when the policy encrypts.
    fn admit_application(&self, message: &Message) -> Result<()> {
        if MessageKind::from_id(message.message_id()).is_some() {
            return Ok(());
        }
        if !matches!(self.state, ConnectionState::Active | ConnectionState::Closing) {
            return Err(ProtocolError::InvalidState(ERR_NOT_ACTIVE));
        }
        if self.policy.encryption && !message.flags().contains(FrameFlags::ENCRYPTED) {
            return Err(ProtocolError::UnencryptedPayload);
        }
        Ok(())
    }

    fn deliver(
        &mut self,
        message: Message,
        now: Instant,
        events: &mut Vec<ConnectionEvent>,
    ) -> Result<()> {
        match MessageKind::from_id(message.message_id()) {
            Some(MessageKind::Ping) => {
                let pong = Message::new(MessageKind::Pong.id(), message.into_payload())
                    .with_peer(self.local_peer_id);
                events.extend(transmit(self.frame(&pong)?));
            }
            Some(MessageKind::Pong) => events.push(ConnectionEvent::Deliver(message)),
            Some(MessageKind::Disconnect) => {
                self.handshake = None;
                self.set_state(ConnectionState::Closed);
                events.push(ConnectionEvent::PeerClosed);
            }
            Some(MessageKind::HandshakeInit) => self.on_handshake_init(&message, now, events)?,
            Some(MessageKind::HandshakeResponse) => self.on_handshake_response(&message, events),
            Some(MessageKind::Ack) => {}
            None if !self.registry.contains(message.message_id()) => {
                events.push(ConnectionEvent::Dropped(ProtocolError::UnexpectedMessage(
                    message.message_id(),
                )));
            }
            None => {
                match reverse_bytes(message.flags(), message.payload(), &self.policy, self.key.as_ref())
                {
                    Ok(plain) => events.push(ConnectionEvent::Deliver(
                        message.with_flags(FrameFlags::empty()).with_payload(plain),
                    )),
                    Err(e) => {
                        debug!(error = %e, id = message.message_id(), "dropping undecodable message");
                        events.push(ConnectionEvent::Dropped(e));
                    }
                }
            }
        }
        Ok(())
    }

    fn on_handshake_init(
        &mut self,
        message: &Message,
        now: Instant,
        events: &mut Vec<ConnectionEvent>,
    ) -> Result<()> {
        let init: HandshakeInit = match self.decode_record(message) {
            Ok(init) => init,
            Err(e) => {
                events.push(ConnectionEvent::Dropped(e));
                return Ok(());
            }
        };
        let timeouts = HandshakeTimeouts::from_config(&self.config);

        if self.state != ConnectionState::Fresh {
            debug!(session_id = init.session_id, state = ?self.state, "refusing handshake");
            let response =
                handshake::reject(&init, self.local_peer_id, HandshakeErrorCode::Busy, timeouts);
            let frames = self.send_control(MessageKind::HandshakeResponse, &response, now)?;
            events.extend(transmit(frames));
            return Ok(());
        }

        let outcome = responder_accept(
            &init,
            self.local_peer_id,
            self.supported_key_sizes(),
            timeouts,
        );
        let frames = self.send_control(MessageKind::HandshakeResponse, outcome.response(), now)?;
        events.extend(transmit(frames));

        match outcome {
            ResponderOutcome::Accepted { key, .. } => {
                self.key = Some(key);
                self.set_state(ConnectionState::Active);
                events.push(ConnectionEvent::Established);
            }
            ResponderOutcome::Rejected { error, .. } => {
                warn!(error = %error, "handshake rejected");
                // the rejection itself is reliable; close once it is acknowledged
                self.set_state(ConnectionState::Closing);
                events.push(ConnectionEvent::HandshakeFailed(error));
            }
        }
        Ok(())
    }

    fn on_handshake_response(&mut self, message: &Message, events: &mut Vec<ConnectionEvent>) {
        if self.state != ConnectionState::Handshaking {
            events.push(ConnectionEvent::Dropped(ProtocolError::UnexpectedMessage(
                message.message_id(),
            )));
            return;
        }
        let response: HandshakeResponse = match self.decode_record(message) {
            Ok(response) => response,
            Err(e) => {
                events.push(ConnectionEvent::Dropped(e));
                return;
            }
        };
        let Some(state) = self.handshake.take() else {
            return;
        };

        match initiator_finish(state, &response) {
            Ok((key, timeouts)) => {
                timeouts.apply(&mut self.config);
                self.reliability.apply_config(&self.config.reliability);
                self.reassembler
                    .set_timeout(self.config.fragmentation.reassembly_timeout);
                self.key = Some(key);
                self.handshake_started = None;
                self.set_state(ConnectionState::Active);
                events.push(ConnectionEvent::Established);
            }
            Err(e) => {
                warn!(error = %e, "handshake failed");
                self.handshake_started = None;
                self.set_state(ConnectionState::Closed);
                events.push(ConnectionEvent::HandshakeFailed(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn registry() -> Arc<MessageRegistry> {
        let mut registry = MessageRegistry::new();
        registry.register(20, "state", Delivery::Reliable).unwrap();
        Arc::new(registry)
    }

    fn plain_config() -> ProtocolConfig {
        ProtocolConfig::default_with_overrides(|c| c.transform.encryption_enabled = false)
    }

    #[test]
    fn test_app_send_requires_active() {
        let mut conn = Connection::new(plain_config(), registry(), TransportCapabilities::stream(), 1);
        let now = Instant::now();
        assert!(matches!(
            conn.encode(20, &1u32, now),
            Err(ProtocolError::InvalidState(_))
        ));
        conn.activate().unwrap();
        assert_eq!(conn.encode(20, &1u32, now).unwrap().len(), 1);
    }

    #[test]
    fn test_activate_needs_key_when_encrypting() {
        let mut conn = Connection::new(
            ProtocolConfig::default(),
            registry(),
            TransportCapabilities::stream(),
            1,
        );
        assert!(matches!(conn.activate(), Err(ProtocolError::MissingKey)));
        conn.install_key(SessionKey::from_bytes([1; 32]));
        conn.activate().unwrap();
        assert_eq!(conn.state(), ConnectionState::Active);
    }

    #[test]
    fn test_unregistered_id_rejected_on_send() {
        let mut conn = Connection::new(plain_config(), registry(), TransportCapabilities::stream(), 1);
        conn.activate().unwrap();
        assert!(matches!(
            conn.encode(99, &1u32, Instant::now()),
            Err(ProtocolError::UnexpectedMessage(99))
        ));
    }

    #[test]
    fn test_ack_payload() {
        assert_eq!(ack_sequence(&7u64.to_be_bytes()), Some(7));
        assert_eq!(ack_sequence(&[1, 2, 3]), None);
    }

    #[test]
    fn test_close_before_active_is_immediate() {
        let mut conn = Connection::new(plain_config(), registry(), TransportCapabilities::stream(), 1);
        assert!(conn.close(Instant::now()).unwrap().is_empty());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.close(Instant::now()).is_err());
    }
}
