//! # Fragmentation
//!
//! Splits payloads that do not fit one datagram into numbered fragments and puts
//! them back together on the receiving side.
//!
//! Fragment sets are keyed by `(peer_id, set_id)` so two peers may reuse the same set
//! id. Reassembly enforces:
//! - every fragment of a set agrees on the total count
//! - each index is accepted once
//! - the aggregate size never exceeds the configured cap (the whole set is dropped
//!   when it would)
//! - incomplete sets are swept after the reassembly timeout
//!
//! [`Reassembler`] is owned by a single connection. [`SharedReassembler`] is the same
//! state machine behind a sharded concurrent map, for a receive path that spans many
//! peers and tasks.

use crate::config::FragmentationConfig;
use crate::core::header::{DatagramHeader, FragmentHeader};
use crate::error::{ProtocolError, Result};
use bytes::Bytes;
use dashmap::mapref::entry::Entry as SharedEntry;
use dashmap::DashMap;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Bytes of headers in front of every fragment chunk: datagram header, sequence
/// number and fragment header.
pub const FRAGMENT_OVERHEAD: usize = DatagramHeader::SIZE + 8 + FragmentHeader::SIZE;

/// True when `payload_len` bytes fit one datagram of `max_unit_size` without splitting
pub fn fits_unfragmented(payload_len: usize, max_unit_size: usize) -> bool {
    payload_len + FRAGMENT_OVERHEAD <= max_unit_size
}

/// One chunk of a split payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub header: FragmentHeader,
    pub data: Bytes,
}

/// Result of [`split`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragments {
    /// Payload fits one datagram as-is
    Single(Bytes),
    /// Payload split into `total` fragments, in index order
    Parts(Vec<Fragment>),
}

impl Fragments {
    /// Datagrams needed to carry the payload
    pub fn datagram_count(&self) -> usize {
        match self {
            Fragments::Single(_) => 1,
            Fragments::Parts(parts) => parts.len(),
        }
    }
}

/// Split `payload` into fragments of at most `max_unit_size - FRAGMENT_OVERHEAD` bytes.
///
/// Chunks are zero-copy slices of `payload`.
pub fn split(payload: Bytes, max_unit_size: usize, set_id: u32) -> Result<Fragments> {
    if max_unit_size < FRAGMENT_OVERHEAD + 1 {
        return Err(ProtocolError::UnitTooSmall(max_unit_size));
    }
    if fits_unfragmented(payload.len(), max_unit_size) {
        return Ok(Fragments::Single(payload));
    }

    // chunk length travels as u16
    let chunk_size = (max_unit_size - FRAGMENT_OVERHEAD).min(u16::MAX as usize);
    let count = payload.len().div_ceil(chunk_size);
    let total = u16::try_from(count).map_err(|_| ProtocolError::OversizedPacket(payload.len()))?;

    let parts = (0..count)
        .map(|index| {
            let start = index * chunk_size;
            let end = (start + chunk_size).min(payload.len());
            Fragment {
                header: FragmentHeader::new(set_id, index as u16, total, (end - start) as u16),
                data: payload.slice(start..end),
            }
        })
        .collect();

    trace!(set_id, total, chunk_size, "split payload");
    Ok(Fragments::Parts(parts))
}

/// Hands out fragment set ids for one sender; starts at a random offset and wraps.
#[derive(Debug)]
pub struct FragmentSetIdGenerator {
    next: u32,
}

impl FragmentSetIdGenerator {
    pub fn new() -> Self {
        Self {
            next: rand::random(),
        }
    }

    pub fn starting_at(first: u32) -> Self {
        Self { next: first }
    }

    pub fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        id
    }
}

impl Default for FragmentSetIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Partial state of one fragment set
#[derive(Debug)]
struct ReassemblyState {
    total: u16,
    parts: Vec<Option<Bytes>>,
    received: u16,
    bytes: usize,
    created_at: Instant,
}

enum Progress {
    Pending,
    Complete,
}

impl ReassemblyState {
    fn new(total: u16, now: Instant) -> Self {
        Self {
            total,
            parts: vec![None; total as usize],
            received: 0,
            bytes: 0,
            created_at: now,
        }
    }

    /// Errors leave the state untouched; `FragmentOverflow` means the caller must
    /// drop the whole set.
    fn insert(&mut self, header: &FragmentHeader, data: &[u8], max_size: usize) -> Result<Progress> {
        if header.total() != self.total {
            return Err(ProtocolError::FragmentSetMismatch);
        }
        let slot = self
            .parts
            .get_mut(header.index() as usize)
            .ok_or(ProtocolError::FragmentOutOfRange)?;
        if slot.is_some() {
            return Err(ProtocolError::FragmentDuplicate);
        }
        if self.bytes + data.len() > max_size {
            return Err(ProtocolError::FragmentOverflow);
        }

        *slot = Some(Bytes::copy_from_slice(data));
        self.received += 1;
        self.bytes += data.len();

        if self.received == self.total {
            Ok(Progress::Complete)
        } else {
            Ok(Progress::Pending)
        }
    }

    fn assemble(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.bytes);
        for part in self.parts.into_iter().flatten() {
            out.extend_from_slice(&part);
        }
        out
    }

    fn expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.created_at) >= timeout
    }
}

fn check_index(header: &FragmentHeader) -> Result<()> {
    if header.total() == 0 || header.index() >= header.total() {
        return Err(ProtocolError::FragmentOutOfRange);
    }
    Ok(())
}

/// Single-owner reassembly for one connection
#[derive(Debug)]
pub struct Reassembler {
    sets: HashMap<(u32, u32), ReassemblyState>,
    max_reassembled_size: usize,
    timeout: Duration,
    max_sets_per_peer: usize,
}

impl Reassembler {
    pub fn new(config: &FragmentationConfig) -> Self {
        Self {
            sets: HashMap::new(),
            max_reassembled_size: config.max_reassembled_size,
            timeout: config.reassembly_timeout,
            max_sets_per_peer: config.max_concurrent_sets.max(1),
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Accept one fragment. Returns the reassembled payload once every index has
    /// arrived.
    pub fn accept(
        &mut self,
        peer_id: u32,
        header: &FragmentHeader,
        data: &[u8],
        now: Instant,
    ) -> Result<Option<Vec<u8>>> {
        check_index(header)?;
        let key = (peer_id, header.set_id());

        if !self.sets.contains_key(&key) {
            self.evict_oldest_if_full(peer_id);
        }

        match self.sets.entry(key) {
            Entry::Occupied(mut occupied) => {
                match occupied.get_mut().insert(header, data, self.max_reassembled_size) {
                    Ok(Progress::Complete) => {
                        debug!(peer_id, set_id = header.set_id(), "fragment set complete");
                        Ok(Some(occupied.remove().assemble()))
                    }
                    Ok(Progress::Pending) => Ok(None),
                    Err(ProtocolError::FragmentOverflow) => {
                        warn!(peer_id, set_id = header.set_id(), "fragment set overflow, dropping set");
                        occupied.remove();
                        Err(ProtocolError::FragmentOverflow)
                    }
                    Err(e) => Err(e),
                }
            }
            Entry::Vacant(vacant) => {
                let mut state = ReassemblyState::new(header.total(), now);
                match state.insert(header, data, self.max_reassembled_size)? {
                    Progress::Complete => Ok(Some(state.assemble())),
                    Progress::Pending => {
                        vacant.insert(state);
                        Ok(None)
                    }
                }
            }
        }
    }

    fn evict_oldest_if_full(&mut self, peer_id: u32) {
        let mut count = 0;
        let mut oldest: Option<((u32, u32), Instant)> = None;
        for (key, state) in self.sets.iter().filter(|(key, _)| key.0 == peer_id) {
            count += 1;
            if oldest.map_or(true, |(_, at)| state.created_at < at) {
                oldest = Some((*key, state.created_at));
            }
        }

        if count >= self.max_sets_per_peer {
            if let Some((key, _)) = oldest {
                debug!(peer_id, set_id = key.1, "too many open fragment sets, evicting oldest");
                self.sets.remove(&key);
            }
        }
    }

    /// Drop incomplete sets older than the reassembly timeout. Returns how many were
    /// dropped.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.sets.len();
        let timeout = self.timeout;
        self.sets.retain(|_, state| !state.expired(now, timeout));
        let dropped = before - self.sets.len();
        if dropped > 0 {
            debug!(dropped, "swept stale fragment sets");
        }
        dropped
    }

    pub fn clear_peer(&mut self, peer_id: u32) {
        self.sets.retain(|(peer, _), _| *peer != peer_id);
    }

    pub fn clear(&mut self) {
        self.sets.clear();
    }

    /// Incomplete sets currently held
    pub fn pending_sets(&self) -> usize {
        self.sets.len()
    }
}

/// Reassembly shared by every receive task of a datagram endpoint
#[derive(Debug)]
pub struct SharedReassembler {
    sets: DashMap<(u32, u32), ReassemblyState>,
    max_reassembled_size: usize,
    timeout: Duration,
    max_sets: usize,
}

impl SharedReassembler {
    /// `max_sets` bounds open sets across all peers; new sets beyond it are refused.
    pub fn new(config: &FragmentationConfig, max_sets: usize) -> Self {
        Self {
            sets: DashMap::new(),
            max_reassembled_size: config.max_reassembled_size,
            timeout: config.reassembly_timeout,
            max_sets: max_sets.max(1),
        }
    }

    pub fn accept(
        &self,
        peer_id: u32,
        header: &FragmentHeader,
        data: &[u8],
        now: Instant,
    ) -> Result<Option<Vec<u8>>> {
        check_index(header)?;
        let key = (peer_id, header.set_id());
        // read before taking the shard lock below
        let open_sets = self.sets.len();

        match self.sets.entry(key) {
            SharedEntry::Occupied(mut occupied) => {
                match occupied.get_mut().insert(header, data, self.max_reassembled_size) {
                    Ok(Progress::Complete) => Ok(Some(occupied.remove().assemble())),
                    Ok(Progress::Pending) => Ok(None),
                    Err(ProtocolError::FragmentOverflow) => {
                        occupied.remove();
                        Err(ProtocolError::FragmentOverflow)
                    }
                    Err(e) => Err(e),
                }
            }
            SharedEntry::Vacant(vacant) => {
                let mut state = ReassemblyState::new(header.total(), now);
                match state.insert(header, data, self.max_reassembled_size)? {
                    Progress::Complete => Ok(Some(state.assemble())),
                    Progress::Pending => {
                        if open_sets >= self.max_sets {
                            warn!(peer_id, open_sets, "refusing new fragment set");
                            return Err(ProtocolError::FragmentOverflow);
                        }
                        vacant.insert(state);
                        Ok(None)
                    }
                }
            }
        }
    }

    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.sets.len();
        let timeout = self.timeout;
        self.sets.retain(|_, state| !state.expired(now, timeout));
        before.saturating_sub(self.sets.len())
    }

    pub fn clear_peer(&self, peer_id: u32) {
        self.sets.retain(|(peer, _), _| *peer != peer_id);
    }

    pub fn pending_sets(&self) -> usize {
        self.sets.len()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;

    fn config() -> FragmentationConfig {
        FragmentationConfig::default()
    }

    fn parts(fragments: Fragments) -> Vec<Fragment> {
        match fragments {
            Fragments::Parts(parts) => parts,
            Fragments::Single(_) => panic!("expected fragments"),
        }
    }

    fn payload(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
    }

    #[test]
    fn test_small_payload_not_split() {
        let data = payload(100);
        let single = split(data.clone(), 1024, 1).unwrap();
        assert_eq!(single.datagram_count(), 1);
        assert_eq!(single, Fragments::Single(data));
    }

    #[test]
    fn test_split_2500_over_1024() {
        let fragments = split(payload(2500), 1024, 9).unwrap();
        assert_eq!(fragments.datagram_count(), 3);
        let parts = parts(fragments);
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.header.total() == 3 && p.header.set_id() == 9));
        assert_eq!(parts[0].data.len(), 1024 - FRAGMENT_OVERHEAD);
        let sum: usize = parts.iter().map(|p| p.data.len()).sum();
        assert_eq!(sum, 2500);
        for part in &parts {
            assert!(part.data.len() + FRAGMENT_OVERHEAD <= 1024);
            assert_eq!(part.header.fragment_len(), part.data.len());
        }
    }

    #[test]
    fn test_unit_too_small() {
        assert!(matches!(
            split(payload(10), FRAGMENT_OVERHEAD, 1),
            Err(ProtocolError::UnitTooSmall(_))
        ));
        assert!(split(payload(10), FRAGMENT_OVERHEAD + 1, 1).is_ok());
    }

    #[test]
    fn test_reassemble_in_reverse_order() {
        let data = payload(2500);
        let mut parts = parts(split(data.clone(), 1024, 4).unwrap());
        parts.reverse();

        let mut reassembler = Reassembler::new(&config());
        let now = Instant::now();
        let mut result = None;
        for part in &parts {
            result = reassembler.accept(1, &part.header, &part.data, now).unwrap();
        }
        assert_eq!(result.unwrap(), data.to_vec());
        assert_eq!(reassembler.pending_sets(), 0);
    }

    #[test]
    fn test_duplicate_fragment_rejected() {
        let parts = parts(split(payload(2500), 1024, 4).unwrap());
        let mut reassembler = Reassembler::new(&config());
        let now = Instant::now();

        reassembler.accept(1, &parts[0].header, &parts[0].data, now).unwrap();
        assert!(matches!(
            reassembler.accept(1, &parts[0].header, &parts[0].data, now),
            Err(ProtocolError::FragmentDuplicate)
        ));
        assert_eq!(reassembler.pending_sets(), 1);
    }

    #[test]
    fn test_total_mismatch_rejected() {
        let mut reassembler = Reassembler::new(&config());
        let now = Instant::now();
        reassembler
            .accept(1, &FragmentHeader::new(5, 0, 3, 2), b"ab", now)
            .unwrap();
        assert!(matches!(
            reassembler.accept(1, &FragmentHeader::new(5, 1, 4, 2), b"cd", now),
            Err(ProtocolError::FragmentSetMismatch)
        ));
    }

    #[test]
    fn test_overflow_drops_set() {
        let mut cfg = config();
        cfg.max_reassembled_size = 5;
        let mut reassembler = Reassembler::new(&cfg);
        let now = Instant::now();

        reassembler
            .accept(1, &FragmentHeader::new(5, 0, 3, 3), b"abc", now)
            .unwrap();
        assert!(matches!(
            reassembler.accept(1, &FragmentHeader::new(5, 1, 3, 3), b"def", now),
            Err(ProtocolError::FragmentOverflow)
        ));
        assert_eq!(reassembler.pending_sets(), 0);
    }

    #[test]
    fn test_sets_scoped_by_peer() {
        let mut reassembler = Reassembler::new(&config());
        let now = Instant::now();
        reassembler
            .accept(1, &FragmentHeader::new(5, 0, 2, 1), b"a", now)
            .unwrap();
        reassembler
            .accept(2, &FragmentHeader::new(5, 1, 2, 1), b"z", now)
            .unwrap();
        assert_eq!(reassembler.pending_sets(), 2);

        reassembler.clear_peer(2);
        let done = reassembler
            .accept(1, &FragmentHeader::new(5, 1, 2, 1), b"b", now)
            .unwrap();
        assert_eq!(done.unwrap(), b"ab");
    }

    #[test]
    fn test_sweep_drops_stale_sets() {
        let mut reassembler = Reassembler::new(&config());
        let start = Instant::now();
        reassembler
            .accept(1, &FragmentHeader::new(5, 0, 2, 1), b"a", start)
            .unwrap();

        assert_eq!(reassembler.sweep(start + Duration::from_secs(1)), 0);
        assert_eq!(reassembler.sweep(start + Duration::from_secs(3)), 1);
        assert_eq!(reassembler.pending_sets(), 0);
    }

    #[test]
    fn test_oldest_set_evicted_per_peer() {
        let mut cfg = config();
        cfg.max_concurrent_sets = 2;
        let mut reassembler = Reassembler::new(&cfg);
        let start = Instant::now();

        for (i, set_id) in [10u32, 11, 12].iter().enumerate() {
            reassembler
                .accept(
                    1,
                    &FragmentHeader::new(*set_id, 0, 2, 1),
                    b"x",
                    start + Duration::from_millis(i as u64),
                )
                .unwrap();
        }
        assert_eq!(reassembler.pending_sets(), 2);
        // set 10 was evicted, so its second half starts a fresh set
        let result = reassembler
            .accept(1, &FragmentHeader::new(10, 1, 2, 1), b"y", start)
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_shared_reassembler() {
        let data = payload(3000);
        let parts = parts(split(data.clone(), 1200, 77).unwrap());
        let shared = SharedReassembler::new(&config(), 16);
        let now = Instant::now();

        let mut result = None;
        for part in &parts {
            result = shared.accept(3, &part.header, &part.data, now).unwrap();
        }
        assert_eq!(result.unwrap(), data.to_vec());
        assert_eq!(shared.pending_sets(), 0);
    }

    #[test]
    fn test_set_id_generator_wraps() {
        let mut ids = FragmentSetIdGenerator::starting_at(u32::MAX);
        assert_eq!(ids.next_id(), u32::MAX);
        assert_eq!(ids.next_id(), 0);
    }
}
