// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Concurrent id -> location index with a publish/wait rendezvous for the
// first miss. A `Pending` slot's condition variable is reference-counted
// independently of the slot itself: the publisher may overwrite or remove
// the slot while waiters are still asleep on it, so waiters hold their own
// `Arc` to the condvar rather than reaching back through the map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::zone::ChunkRef;

/// A `Pending` slot's condition, shared between the map and every waiter
/// that observed it. Reference-counted so it outlives its slot.
struct PendingCond {
    cond: Condvar,
}

enum Slot {
    Pending(Arc<PendingCond>),
    Location(ChunkRef),
}

struct Inner {
    index: HashMap<u32, Slot>,
    /// chunk_offset -> id, per zone.
    zone_contents: Vec<HashMap<u32, u32>>,
}

/// Result of `find`.
pub enum FindResult {
    Location(ChunkRef),
    /// The caller became the writer for this id; `cond` must eventually be
    /// resolved by a matching `publish` or `fail_publish`.
    Pending,
}

pub struct Cachemap {
    inner: Mutex<Inner>,
    /// Externally-owned active-reader counters, one per zone, incremented
    /// on a `find` hit and decremented by the caller once the read
    /// completes. Shared with the cache facade and the foreground-evict
    /// spin-wait.
    active_readers: Vec<AtomicU32>,
}

impl Cachemap {
    pub fn new(nr_zones: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                index: HashMap::new(),
                zone_contents: (0..nr_zones).map(|_| HashMap::new()).collect(),
            }),
            active_readers: (0..nr_zones).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub fn active_readers(&self, zone: u32) -> u32 {
        self.active_readers[zone as usize].load(Ordering::Acquire)
    }

    pub fn release_reader(&self, zone: u32) {
        let prev = self.active_readers[zone as usize].fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "ActiveReaders underflow");
    }

    /// Look up `id`. On a hit, increments `ActiveReaders[zone]` for the
    /// caller, who must call `release_reader` once done. On a miss, the
    /// caller becomes the writer and must eventually call `publish` or
    /// `fail_publish`.
    pub fn find(&self, id: u32) -> FindResult {
        let mut inner = self.inner.lock().unwrap();
        loop {
            match inner.index.get(&id) {
                None => {
                    inner.index.insert(
                        id,
                        Slot::Pending(Arc::new(PendingCond {
                            cond: Condvar::new(),
                        })),
                    );
                    return FindResult::Pending;
                }
                Some(Slot::Pending(pc)) => {
                    let pc = Arc::clone(pc);
                    // Condvar::wait releases the mutex for the duration of
                    // the sleep and reacquires it on wake.
                    inner = pc.cond.wait(inner).unwrap();
                    // Never trust the slot survived the wait: loop back and
                    // re-consult the index from scratch.
                }
                Some(Slot::Location(r)) => {
                    let r = *r;
                    self.active_readers[r.zone as usize].fetch_add(1, Ordering::AcqRel);
                    return FindResult::Location(r);
                }
            }
        }
    }

    /// Publish a freshly-written chunk at `loc` for `id`. Must be called by
    /// the thread that obtained `FindResult::Pending` for this id.
    pub fn publish(&self, id: u32, loc: ChunkRef) {
        let mut inner = self.inner.lock().unwrap();
        let prev = inner.index.insert(id, Slot::Location(loc));
        match prev {
            Some(Slot::Pending(pc)) => {
                inner.zone_contents[loc.zone as usize].insert(loc.chunk_offset, id);
                pc.cond.notify_all();
            }
            _ => unreachable!("publish without a prior Pending slot"),
        }
    }

    /// Abort a write attempt: remove the Pending slot and wake waiters, who
    /// will re-enter `find` and become writers themselves.
    pub fn fail_publish(&self, id: u32) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(Slot::Pending(pc)) = inner.index.remove(&id) {
            pc.cond.notify_all();
        }
    }

    /// Remove every live entry in `zone` from the index.
    pub fn clear_zone(&self, zone: u32) {
        let mut inner = self.inner.lock().unwrap();
        let ids: Vec<u32> = inner.zone_contents[zone as usize].values().copied().collect();
        for id in ids {
            inner.index.remove(&id);
        }
        inner.zone_contents[zone as usize].clear();
    }

    /// Remove the single chunk at `ref` from the index.
    pub fn clear_chunk(&self, r: ChunkRef) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(id) = inner.zone_contents[r.zone as usize].remove(&r.chunk_offset) {
            inner.index.remove(&id);
        }
    }

    /// Snapshot the live `(id, location)` pairs of `zone` and turn each
    /// entry back into a fresh `Pending` slot so readers block until
    /// `compact_end`. Also detaches `zone` from `zone_contents`: every
    /// snapshotted id is about to land at a new offset, possibly in this
    /// same zone, and `compact_end`'s `publish` re-inserts each one at its
    /// actual post-compaction location — leaving the old mapping in place
    /// until then would let a `compact_begin` racing against this one see
    /// an id at an offset it no longer (or not yet) occupies.
    pub fn compact_begin(&self, zone: u32) -> Vec<(u32, ChunkRef)> {
        let mut inner = self.inner.lock().unwrap();
        let entries: Vec<(u32, u32)> = inner.zone_contents[zone as usize]
            .iter()
            .map(|(&chunk_offset, &id)| (chunk_offset, id))
            .collect();

        let mut out = Vec::with_capacity(entries.len());
        for (chunk_offset, id) in entries {
            if let Some(Slot::Location(r)) = inner.index.get(&id) {
                out.push((id, *r));
            }
            inner.index.insert(
                id,
                Slot::Pending(Arc::new(PendingCond {
                    cond: Condvar::new(),
                })),
            );
            let _ = chunk_offset;
        }
        inner.zone_contents[zone as usize].clear();
        out
    }

    /// Re-publish every `(id, new_location)` pair after compaction/
    /// relocation, using the same protocol as `publish`.
    pub fn compact_end(&self, zone_hint: u32, relocated: &[(u32, ChunkRef)]) {
        let _ = zone_hint;
        for &(id, loc) in relocated {
            self.publish(id, loc);
        }
    }
}
