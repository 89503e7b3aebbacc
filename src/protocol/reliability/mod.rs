//! # Reliability Engine
//!
//! Sequencing, acknowledgement, adaptive retransmission and in-order delivery for
//! one connection.
//!
//! ## Send side
//! Reliable messages get the next sequence number (starting at 1) and are held in
//! the send window until acknowledged. [`ReliabilityEngine::poll_retransmits`] walks
//! the window: an expired message with fewer than `max_attempts` retransmissions is
//! re-armed with the current RTO and handed back for resending; an expired message
//! that has used all of its retransmissions is reported as failed. Unreliable
//! messages keep sequence 0 and are never tracked.
//!
//! ## Receive side
//! Every reliable message that is not rejected yields an acknowledgement, duplicates
//! included, so a lost ack is repaired by the sender's next retransmission.
//!
//! Time is passed in by the caller; the engine never reads the clock.

pub mod ordering;
pub mod rtt;
pub mod send_window;

use crate::config::ReliabilityConfig;
use crate::core::message::Message;
use crate::protocol::message::Delivery;
use crate::utils::metrics::TransportMetrics;
use ordering::{Ordered, OrderingWindow};
use rtt::RttEstimator;
use send_window::{SendState, SendWindow};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Outcome of a retry scan
#[derive(Debug, Default)]
pub struct RetryScan {
    /// Messages to transmit again
    pub resend: Vec<Message>,
    /// Sequences that exhausted their attempts; the connection must fail
    pub failed: Vec<u64>,
}

/// Outcome of accepting an inbound message
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Inbound {
    /// Messages now deliverable, in order
    pub deliver: Vec<Message>,
    /// Sequence to acknowledge, if any
    pub ack: Option<u64>,
}

#[derive(Debug)]
pub struct ReliabilityEngine {
    max_attempts: u32,
    next_sequence: u64,
    send_window: SendWindow,
    ordering: OrderingWindow,
    rtt: RttEstimator,
    metrics: Arc<TransportMetrics>,
}

impl ReliabilityEngine {
    pub fn new(config: &ReliabilityConfig) -> Self {
        Self::with_metrics(config, Arc::new(TransportMetrics::new()))
    }

    pub fn with_metrics(config: &ReliabilityConfig, metrics: Arc<TransportMetrics>) -> Self {
        Self {
            max_attempts: config.max_attempts,
            next_sequence: 1,
            send_window: SendWindow::new(),
            ordering: OrderingWindow::new(config.duplicate_window, config.max_out_of_order),
            rtt: RttEstimator::new(config),
            metrics,
        }
    }

    /// Adopt new retransmission settings; in-flight deadlines are left as they are
    pub fn apply_config(&mut self, config: &ReliabilityConfig) {
        self.max_attempts = config.max_attempts;
        self.rtt.configure(config);
    }

    pub fn metrics(&self) -> &Arc<TransportMetrics> {
        &self.metrics
    }

    /// Stamp `message` for sending. Reliable messages get a sequence number and are
    /// tracked; unreliable ones come back with sequence 0.
    pub fn register(&mut self, message: Message, delivery: Delivery, now: Instant) -> Message {
        TransportMetrics::incr(&self.metrics.messages_sent);

        match delivery {
            Delivery::Unreliable => message.with_sequence(0),
            Delivery::Reliable => {
                let sequence = self.next_sequence;
                self.next_sequence = self.next_sequence.wrapping_add(1).max(1);

                let message = message.with_sequence(sequence);
                let timeout = self.rtt.rto();
                trace!(sequence, timeout_ms = timeout.as_millis() as u64, "tracking reliable message");
                self.send_window
                    .insert(SendState::new(message.clone(), now, timeout));
                message
            }
        }
    }

    /// Retire `sequence`. Returns the RTT sample, or `None` for an unknown or already
    /// acknowledged sequence.
    pub fn on_ack(&mut self, sequence: u64, now: Instant) -> Option<Duration> {
        let state = self.send_window.remove(sequence)?;
        let sample = now.saturating_duration_since(state.last_sent);
        self.rtt.update(sample);
        TransportMetrics::incr(&self.metrics.acks_received);
        trace!(
            sequence,
            sample_ms = sample.as_millis() as u64,
            rto_ms = self.rtt.rto().as_millis() as u64,
            "ack"
        );
        Some(sample)
    }

    pub fn poll_retransmits(&mut self, now: Instant) -> RetryScan {
        let mut scan = RetryScan::default();
        let timeout = self.rtt.rto();

        for sequence in self.send_window.due(now) {
            let exhausted = match self.send_window.get_mut(sequence) {
                Some(state) if state.attempt_count < self.max_attempts => {
                    state.rearm(now, timeout);
                    scan.resend.push(state.message.clone());
                    false
                }
                Some(_) => true,
                None => false,
            };

            if exhausted {
                self.send_window.remove(sequence);
                TransportMetrics::incr(&self.metrics.send_failures);
                warn!(sequence, attempts = self.max_attempts, "retry limit exceeded");
                scan.failed.push(sequence);
            }
        }

        if !scan.resend.is_empty() {
            TransportMetrics::add(&self.metrics.retransmissions, scan.resend.len() as u64);
            debug!(count = scan.resend.len(), "retransmitting");
        }
        scan
    }

    pub fn accept_inbound(&mut self, message: Message) -> Inbound {
        if !message.is_reliable() {
            TransportMetrics::incr(&self.metrics.messages_delivered);
            return Inbound {
                deliver: vec![message],
                ack: None,
            };
        }

        let sequence = message.sequence();
        let inbound = match self.ordering.accept(message) {
            Ordered::Deliver(deliver) => {
                TransportMetrics::add(&self.metrics.messages_delivered, deliver.len() as u64);
                Inbound {
                    deliver,
                    ack: Some(sequence),
                }
            }
            Ordered::Buffered => {
                TransportMetrics::incr(&self.metrics.out_of_order);
                Inbound {
                    deliver: Vec::new(),
                    ack: Some(sequence),
                }
            }
            Ordered::Duplicate => {
                TransportMetrics::incr(&self.metrics.duplicates);
                trace!(sequence, "duplicate reliable message");
                Inbound {
                    deliver: Vec::new(),
                    ack: Some(sequence),
                }
            }
            Ordered::Rejected => {
                debug!(sequence, "message too far ahead, not acknowledged");
                Inbound::default()
            }
        };

        if inbound.ack.is_some() {
            TransportMetrics::incr(&self.metrics.acks_sent);
        }
        inbound
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.send_window.next_deadline()
    }

    pub fn in_flight(&self) -> usize {
        self.send_window.len()
    }

    pub fn send_state(&self, sequence: u64) -> Option<&SendState> {
        self.send_window.get(sequence)
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn delivered_up_to(&self) -> u64 {
        self.ordering.delivered_up_to()
    }

    /// Forget all send and receive state and restart sequencing at 1
    pub fn reset(&mut self) {
        debug!(in_flight = self.send_window.len(), "resetting reliability state");
        self.next_sequence = 1;
        self.send_window.clear();
        self.ordering.reset();
        self.rtt.reset();
    }
}
