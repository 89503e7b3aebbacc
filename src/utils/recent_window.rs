//! Bounded window of recently seen ids.
//!
//! Keeps the last `capacity` ids in insertion order and answers membership queries in
//! O(1). When full, inserting evicts the oldest id (FIFO). The receive path uses it to
//! recognise retransmitted reliable messages that are still waiting in the ordering
//! buffer or were accepted moments ago.

use std::collections::{HashSet, VecDeque};
use tracing::trace;

#[derive(Debug)]
pub struct RecentWindow {
    /// Membership lookup
    members: HashSet<u64>,
    /// Insertion order for O(1) FIFO eviction
    order: VecDeque<u64>,
    capacity: usize,
}

impl RecentWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            members: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.members.contains(&id)
    }

    /// Record `id`. Returns `false` if it was already present.
    pub fn insert(&mut self, id: u64) -> bool {
        if self.members.contains(&id) {
            return false;
        }

        if self.order.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
                trace!(evicted, "recent window full, evicting oldest id");
            }
        }

        self.members.insert(id);
        self.order.push_back(id);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.members.clear();
        self.order.clear();
    }
}
