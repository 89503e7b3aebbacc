//! Receive-side ordering of reliable messages.
//!
//! Messages are released strictly in sequence order. A message that arrives ahead of
//! a gap is held until the gap fills; a message at or below the delivered watermark,
//! or one already held, is a duplicate.

use crate::core::message::Message;
use crate::utils::recent_window::RecentWindow;
use std::collections::BTreeMap;
use tracing::trace;

/// What to do with an inbound reliable message
#[derive(Debug, PartialEq, Eq)]
pub enum Ordered {
    /// In order: deliver these (the message plus any buffered successors)
    Deliver(Vec<Message>),
    /// Held until the gap below it fills
    Buffered,
    /// Already delivered or already held
    Duplicate,
    /// Too far ahead of the watermark to hold
    Rejected,
}

#[derive(Debug)]
pub struct OrderingWindow {
    /// Highest sequence delivered so far; the next in-order message is this plus one
    delivered_up_to: u64,
    pending: BTreeMap<u64, Message>,
    recent: RecentWindow,
    max_ahead: u64,
}

impl OrderingWindow {
    pub fn new(duplicate_window: usize, max_ahead: usize) -> Self {
        Self {
            delivered_up_to: 0,
            pending: BTreeMap::new(),
            recent: RecentWindow::new(duplicate_window),
            max_ahead: max_ahead.max(1) as u64,
        }
    }

    pub fn accept(&mut self, message: Message) -> Ordered {
        let sequence = message.sequence();

        if sequence <= self.delivered_up_to
            || self.recent.contains(sequence)
            || self.pending.contains_key(&sequence)
        {
            return Ordered::Duplicate;
        }
        if sequence - self.delivered_up_to > self.max_ahead {
            return Ordered::Rejected;
        }

        self.recent.insert(sequence);

        if sequence != self.delivered_up_to + 1 {
            trace!(sequence, expected = self.delivered_up_to + 1, "buffering out-of-order message");
            self.pending.insert(sequence, message);
            return Ordered::Buffered;
        }

        self.delivered_up_to = sequence;
        let mut ready = vec![message];
        while let Some(next) = self.pending.remove(&(self.delivered_up_to + 1)) {
            self.delivered_up_to += 1;
            ready.push(next);
        }
        Ordered::Deliver(ready)
    }

    pub fn delivered_up_to(&self) -> u64 {
        self.delivered_up_to
    }

    /// Messages held behind a gap
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn reset(&mut self) {
        self.delivered_up_to = 0;
        self.pending.clear();
        self.recent.clear();
    }
}
