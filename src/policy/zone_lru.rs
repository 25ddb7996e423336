// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Zone-granularity promotional LRU: tracks only full zones. A read against
// a resident zone moves it to the tail, so a zone that keeps getting read
// survives longer than one that's merely full and idle.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{EvictOutcome, IoKind};
use crate::zone::ChunkRef;

struct Inner {
    /// FIFO order doubles as LRU order; promotion removes-then-reinserts
    /// at the tail.
    lru: VecDeque<u32>,
    /// zone -> true if currently tracked (present in `lru`), used to make
    /// promotion and removal O(1) amortized without scanning the deque.
    tracked: HashMap<u32, ()>,
}

pub struct ZoneLruPolicy {
    inner: Mutex<Inner>,
}

impl ZoneLruPolicy {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                lru: VecDeque::new(),
                tracked: HashMap::new(),
            }),
        }
    }

    pub fn update(&self, r: ChunkRef, kind: IoKind, max_zone_chunks: u32) {
        let mut inner = self.inner.lock().unwrap();
        match kind {
            IoKind::Write => {
                if r.chunk_offset == max_zone_chunks - 1 {
                    inner.lru.push_back(r.zone);
                    inner.tracked.insert(r.zone, ());
                }
            }
            IoKind::Read => {
                if inner.tracked.remove(&r.zone).is_some() {
                    if let Some(pos) = inner.lru.iter().position(|&z| z == r.zone) {
                        inner.lru.remove(pos);
                    }
                    inner.lru.push_back(r.zone);
                    inner.tracked.insert(r.zone, ());
                }
                // Absent: the zone isn't full yet, or was already evicted.
                // No-op, matching the idempotence law for read-promotion.
            }
        }
    }

    pub fn evict(&self) -> EvictOutcome {
        let mut inner = self.inner.lock().unwrap();
        match inner.lru.pop_front() {
            Some(zone) => {
                inner.tracked.remove(&zone);
                EvictOutcome::ReclaimZone(zone)
            }
            None => EvictOutcome::Nothing,
        }
    }
}

impl Default for ZoneLruPolicy {
    fn default() -> Self {
        Self::new()
    }
}
