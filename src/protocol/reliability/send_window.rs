//! In-flight reliable messages awaiting acknowledgement.

use crate::core::message::Message;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Retransmission bookkeeping for one reliable message
#[derive(Debug, Clone)]
pub struct SendState {
    pub message: Message,
    /// Retransmissions so far (the first send is not counted)
    pub attempt_count: u32,
    pub first_sent: Instant,
    pub last_sent: Instant,
    pub current_timeout: Duration,
    pub deadline: Instant,
}

impl SendState {
    pub fn new(message: Message, now: Instant, timeout: Duration) -> Self {
        Self {
            message,
            attempt_count: 0,
            first_sent: now,
            last_sent: now,
            current_timeout: timeout,
            deadline: now + timeout,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline <= now
    }

    /// Record a retransmission at `now`
    pub fn rearm(&mut self, now: Instant, timeout: Duration) {
        self.attempt_count += 1;
        self.last_sent = now;
        self.current_timeout = timeout;
        self.deadline = now + timeout;
    }
}

/// In-flight messages keyed by sequence number
#[derive(Debug, Default)]
pub struct SendWindow {
    in_flight: BTreeMap<u64, SendState>,
}

impl SendWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, state: SendState) {
        self.in_flight.insert(state.message.sequence(), state);
    }

    pub fn remove(&mut self, sequence: u64) -> Option<SendState> {
        self.in_flight.remove(&sequence)
    }

    pub fn get(&self, sequence: u64) -> Option<&SendState> {
        self.in_flight.get(&sequence)
    }

    pub fn contains(&self, sequence: u64) -> bool {
        self.in_flight.contains_key(&sequence)
    }

    /// Sequence numbers whose deadline has passed, lowest first
    pub fn due(&self, now: Instant) -> Vec<u64> {
        self.in_flight
            .iter()
            .filter(|(_, state)| state.is_due(now))
            .map(|(sequence, _)| *sequence)
            .collect()
    }

    pub fn get_mut(&mut self, sequence: u64) -> Option<&mut SendState> {
        self.in_flight.get_mut(&sequence)
    }

    /// Earliest retransmission deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.in_flight.values().map(|state| state.deadline).min()
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn clear(&mut self) {
        self.in_flight.clear();
    }
}
