//! Transport counters
//!
//! Atomic counters owned by each reliability engine; there is no global instance.
//! Whoever owns a connection reads or logs its metrics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

#[derive(Debug)]
pub struct TransportMetrics {
    /// Reliable and unreliable messages handed to the transport (first transmission)
    pub messages_sent: AtomicU64,
    /// Messages delivered to the application
    pub messages_delivered: AtomicU64,
    /// Retransmissions triggered by the retry scan
    pub retransmissions: AtomicU64,
    /// Acknowledgements that retired an in-flight message
    pub acks_received: AtomicU64,
    /// Acknowledgements sent for inbound reliable messages
    pub acks_sent: AtomicU64,
    /// Reliable messages that exhausted their attempts
    pub send_failures: AtomicU64,
    /// Inbound duplicates (already delivered or already buffered)
    pub duplicates: AtomicU64,
    /// Inbound messages buffered because of a sequence gap
    pub out_of_order: AtomicU64,
    /// Fragments dropped (overflow, duplicate, mismatch, out of range)
    pub fragments_dropped: AtomicU64,
    /// Fragment sets completed
    pub fragment_sets_completed: AtomicU64,
    /// Total bytes framed for sending
    pub bytes_sent: AtomicU64,
    /// Total bytes fed in from the transport
    pub bytes_received: AtomicU64,
    start_time: Instant,
}

impl TransportMetrics {
    pub fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_delivered: AtomicU64::new(0),
            retransmissions: AtomicU64::new(0),
            acks_received: AtomicU64::new(0),
            acks_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            out_of_order: AtomicU64::new(0),
            fragments_dropped: AtomicU64::new(0),
            fragment_sets_completed: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    /// Zero every counter (connection reset).
    pub fn reset(&self) {
        for counter in [
            &self.messages_sent,
            &self.messages_delivered,
            &self.retransmissions,
            &self.acks_received,
            &self.acks_sent,
            &self.send_failures,
            &self.duplicates,
            &self.out_of_order,
            &self.fragments_dropped,
            &self.fragment_sets_completed,
            &self.bytes_sent,
            &self.bytes_received,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            retransmissions: self.retransmissions.load(Ordering::Relaxed),
            acks_received: self.acks_received.load(Ordering::Relaxed),
            acks_sent: self.acks_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            out_of_order: self.out_of_order.load(Ordering::Relaxed),
            fragments_dropped: self.fragments_dropped.load(Ordering::Relaxed),
            fragment_sets_completed: self.fragment_sets_completed.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            messages_sent = snapshot.messages_sent,
            messages_delivered = snapshot.messages_delivered,
            retransmissions = snapshot.retransmissions,
            acks_received = snapshot.acks_received,
            acks_sent = snapshot.acks_sent,
            send_failures = snapshot.send_failures,
            duplicates = snapshot.duplicates,
            out_of_order = snapshot.out_of_order,
            fragments_dropped = snapshot.fragments_dropped,
            fragment_sets_completed = snapshot.fragment_sets_completed,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            uptime_seconds = snapshot.uptime_seconds,
            "Transport metrics snapshot"
        );
    }
}

impl Default for TransportMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub messages_delivered: u64,
    pub retransmissions: u64,
    pub acks_received: u64,
    pub acks_sent: u64,
    pub send_failures: u64,
    pub duplicates: u64,
    pub out_of_order: u64,
    pub fragments_dropped: u64,
    pub fragment_sets_completed: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub uptime_seconds: u64,
}
