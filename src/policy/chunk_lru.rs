// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Chunk-granularity LRU with GC/compaction. Every live chunk sits in one
// global LRU; once a zone fills, it's tracked in a min-heap keyed by
// `chunks_in_use` so GC always reclaims the fullest-of-invalid zone first.
//
// The GC step in the original prototype was never finished (its relocation
// loop ends in an unconditional assertion). This version always compacts
// through the cachemap's `compact_begin`/`compact_end` pair: the target
// zone's live chunks are read once, rewritten sequentially — either into a
// freshly acquired zone (relocation) or back into the same zone's head
// (in-place), depending on whether the zone-state manager can hand out a
// fresh zone right now — and the cachemap is updated atomically from the
// reader's point of view.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use super::{EvictOutcome, IoKind};
use crate::cachemap::Cachemap;
use crate::device::{self, Device};
use crate::minheap::{HeapHandle, IndexedMinHeap};
use crate::spin_lock::adaptive_yield_pub;
use crate::zone::ChunkRef;
use crate::zsm::{AcquireActive, ZoneStateManager};

pub const EVICT_LOW_THRESH_CHUNKS: u32 = 6;
pub const EVICT_HIGH_THRESH_CHUNKS: u32 = 12;
pub const EVICT_LOW_THRESH_ZONES: u32 = 2;
pub const EVICT_HIGH_THRESH_ZONES: u32 = 4;

// ---------------------------------------------------------------------------
// Intrusive doubly-linked LRU list over (zone, chunk_offset) keys.
// ---------------------------------------------------------------------------

type Key = (u32, u32);

struct Node {
    key: Key,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Default)]
struct LruList {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    index: HashMap<Key, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl LruList {
    fn len(&self) -> usize {
        self.index.len()
    }

    fn push_tail(&mut self, key: Key) {
        let idx = match self.free.pop() {
            Some(i) => i,
            None => {
                self.nodes.push(None);
                self.nodes.len() - 1
            }
        };
        self.nodes[idx] = Some(Node {
            key,
            prev: self.tail,
            next: None,
        });
        if let Some(t) = self.tail {
            self.nodes[t].as_mut().unwrap().next = Some(idx);
        } else {
            self.head = Some(idx);
        }
        self.tail = Some(idx);
        self.index.insert(key, idx);
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let n = self.nodes[idx].as_ref().unwrap();
            (n.prev, n.next)
        };
        match prev {
            Some(p) => self.nodes[p].as_mut().unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].as_mut().unwrap().prev = prev,
            None => self.tail = prev,
        }
    }

    /// Move an existing entry to the tail. No-op if absent.
    fn promote(&mut self, key: Key) {
        if let Some(&idx) = self.index.get(&key) {
            self.unlink(idx);
            let n = self.nodes[idx].as_mut().unwrap();
            n.prev = self.tail;
            n.next = None;
            if let Some(t) = self.tail {
                self.nodes[t].as_mut().unwrap().next = Some(idx);
            } else {
                self.head = Some(idx);
            }
            self.tail = Some(idx);
        }
    }

    fn remove(&mut self, key: Key) -> bool {
        if let Some(idx) = self.index.remove(&key) {
            self.unlink(idx);
            self.nodes[idx] = None;
            self.free.push(idx);
            true
        } else {
            false
        }
    }

    fn pop_head(&mut self) -> Option<Key> {
        let idx = self.head?;
        let key = self.nodes[idx].as_ref().unwrap().key;
        self.remove(key);
        Some(key)
    }
}

// ---------------------------------------------------------------------------
// Per-zone chunk pool.
// ---------------------------------------------------------------------------

struct ZonePool {
    /// Stable per-offset slots; indices never move once allocated, giving
    /// the LRU a fixed identity key `(zone, offset)` to key off of.
    chunks: Vec<ChunkRef>,
    chunks_in_use: u32,
    filled: bool,
    heap_handle: Option<HeapHandle>,
}

impl ZonePool {
    fn new(max_zone_chunks: u32) -> Self {
        Self {
            chunks: vec![
                ChunkRef {
                    zone: 0,
                    chunk_offset: 0,
                    id: 0,
                    in_use: false,
                };
                max_zone_chunks as usize
            ],
            chunks_in_use: 0,
            filled: false,
            heap_handle: None,
        }
    }
}

struct State {
    lru: LruList,
    pools: Vec<ZonePool>,
}

pub struct ChunkLruPolicy {
    state: Mutex<State>,
    heap: IndexedMinHeap<u32>,
    max_zone_chunks: u32,
    total_chunks: u32,
    /// Chunk size in bytes, needed to compute byte offsets during GC
    /// relocation. Set once via `set_chunk_size` after construction, since
    /// the policy is built before the CLI's chunk-size argument is known
    /// at some call sites; an atomic keeps the type cheaply `Sync` without
    /// imposing a constructor ordering requirement.
    chunk_size: AtomicU32,
}

impl ChunkLruPolicy {
    pub fn new(nr_zones: u32, max_zone_chunks: u32) -> Self {
        Self {
            state: Mutex::new(State {
                lru: LruList::default(),
                pools: (0..nr_zones).map(|_| ZonePool::new(max_zone_chunks)).collect(),
            }),
            heap: IndexedMinHeap::new(),
            max_zone_chunks,
            total_chunks: nr_zones * max_zone_chunks,
            chunk_size: AtomicU32::new(0),
        }
    }

    pub fn set_chunk_size(&self, chunk_size: u32) {
        self.chunk_size.store(chunk_size, Ordering::Relaxed);
    }

    /// Unlink a chunk's old `(zone, chunk_offset)` node from the shared LRU
    /// list without touching any pool. Must be called before `update` with
    /// that chunk's new key whenever a still-live chunk moves to a new
    /// key during GC relocation or in-place compaction — otherwise the old
    /// node stays linked into the list under a key the index no longer
    /// maps to it by, and a later `evict()` popping that orphaned node
    /// double-touches its zone's (possibly already-reset) pool.
    fn forget_key(&self, zone: u32, chunk_offset: u32) {
        let mut state = self.state.lock().unwrap();
        state.lru.remove((zone, chunk_offset));
    }

    pub fn update(&self, r: ChunkRef, kind: IoKind) {
        let mut state = self.state.lock().unwrap();
        match kind {
            IoKind::Write => {
                assert!(
                    !state.pools[r.zone as usize].chunks[r.chunk_offset as usize].in_use,
                    "write to already-in-use chunk slot"
                );
                {
                    let pool = &mut state.pools[r.zone as usize];
                    pool.chunks[r.chunk_offset as usize] = r;
                    // Fixed ordering: increment chunks_in_use before any
                    // heap insert that reads it.
                    pool.chunks_in_use += 1;
                }
                state.lru.push_tail((r.zone, r.chunk_offset));

                if r.chunk_offset == self.max_zone_chunks - 1 {
                    let pool = &mut state.pools[r.zone as usize];
                    pool.filled = true;
                    let priority = pool.chunks_in_use;
                    let zone = r.zone;
                    drop(pool);
                    // heap has its own lock; never held together with
                    // `state`'s lock across a blocking call, but this is a
                    // plain insert so no ordering hazard here.
                    let handle = self.heap.insert(zone, priority);
                    state.pools[zone as usize].heap_handle = Some(handle);
                }
            }
            IoKind::Read => {
                state.lru.promote((r.zone, r.chunk_offset));
            }
        }
    }

    pub fn evict(&self, zsm: &ZoneStateManager, cachemap: &Cachemap, device: &dyn Device) -> EvictOutcome {
        let to_evict = {
            let mut state = self.state.lock().unwrap();
            let in_lru = state.lru.len() as u32;
            let free_chunks = self.total_chunks - in_lru;

            if in_lru == 0 || free_chunks > EVICT_HIGH_THRESH_CHUNKS {
                return EvictOutcome::Nothing;
            }

            let nr_evict = EVICT_LOW_THRESH_CHUNKS.saturating_sub(free_chunks);
            let mut popped = Vec::with_capacity(nr_evict as usize);
            for _ in 0..nr_evict {
                match state.lru.pop_head() {
                    Some(key) => popped.push(key),
                    None => break,
                }
            }
            popped
        };

        for (zone, chunk_offset) in to_evict {
            let handle = {
                let mut state = self.state.lock().unwrap();
                let pool = &mut state.pools[zone as usize];
                pool.chunks[chunk_offset as usize].in_use = false;
                pool.chunks_in_use -= 1;
                (pool.heap_handle, pool.chunks_in_use)
            };
            if let (Some(h), priority) = handle {
                self.heap.update(h, priority);
            }
            zsm.mark_invalid(zone, chunk_offset);
            cachemap.clear_chunk(ChunkRef {
                zone,
                chunk_offset,
                id: 0,
                in_use: false,
            });
        }

        self.gc(zsm, cachemap, device);
        EvictOutcome::Handled
    }

    fn gc(&self, zsm: &ZoneStateManager, cachemap: &Cachemap, device: &dyn Device) {
        while zsm.num_free() < EVICT_LOW_THRESH_ZONES {
            let zone = match self.heap.extract_min() {
                Some(z) => z,
                None => break,
            };

            let live: Vec<(u32, ChunkRef)> = cachemap.compact_begin(zone);
            if live.is_empty() {
                // Nothing live left; reclaim the zone directly.
                self.spin_until_no_readers(cachemap, zone);
                let _ = zsm.evict(zone, device);
                continue;
            }

            let mut k = 0u32;
            loop {
                match zsm.acquire_active(device) {
                    AcquireActive::Success(fresh) => {
                        // Relocate live chunks into the fresh zone
                        // (possibly spilling into further zones ZSM hands
                        // out along the way). If ZSM runs dry partway
                        // through, finish the remainder by compacting it
                        // in place into old_zone rather than abandoning
                        // it — abandoned chunks would never again be
                        // published, leaving any waiter on them blocked
                        // forever once old_zone is reset.
                        self.spin_until_no_readers(cachemap, zone);
                        let (mut relocated, processed) =
                            self.relocate(&live, zone, fresh.zone, device, zsm, cachemap);
                        if processed == live.len() {
                            cachemap.compact_end(zone, &relocated);
                            let _ = zsm.evict(zone, device);
                            self.reset_pool(zone);
                        } else {
                            let remainder = &live[processed..];
                            let compacted = self.compact_in_place(remainder, zone, device, zsm, cachemap);
                            relocated.extend(compacted);
                            cachemap.compact_end(zone, &relocated);
                            // compact_in_place already brought old_zone back
                            // to Active/Full with the remainder's chunks
                            // live in its pool; it stays in place.
                        }
                        break;
                    }
                    AcquireActive::Retry => {
                        adaptive_yield_pub(&mut k);
                    }
                    AcquireActive::Evict | AcquireActive::Error(_) => {
                        // No fresh zone available at all: compact every
                        // live chunk back into the head of the same zone.
                        self.spin_until_no_readers(cachemap, zone);
                        let relocated = self.compact_in_place(&live, zone, device, zsm, cachemap);
                        cachemap.compact_end(zone, &relocated);
                        break;
                    }
                }
            }
        }
    }

    fn spin_until_no_readers(&self, cachemap: &Cachemap, zone: u32) {
        let mut k = 0u32;
        while cachemap.active_readers(zone) > 0 {
            adaptive_yield_pub(&mut k);
        }
    }

    /// Read every live chunk of `old_zone` and rewrite it sequentially into
    /// `new_zone` and onward (acquiring further zones from ZSM as needed).
    /// Returns the `(id, new_location)` pairs successfully relocated and how
    /// many of `live`'s entries, in order, were consumed — a short count
    /// means ZSM ran out of zones partway through and the caller must
    /// finish the rest (`live[processed..]`) some other way, typically
    /// `compact_in_place`. An id whose read or write fails outright is
    /// dropped: its `Pending` slot (reopened by `compact_begin`) is resolved
    /// via `cachemap.fail_publish` so waiters wake instead of blocking
    /// forever on a chunk that is never coming back.
    fn relocate(
        &self,
        live: &[(u32, ChunkRef)],
        old_zone: u32,
        new_zone: u32,
        device: &dyn Device,
        zsm: &ZoneStateManager,
        cachemap: &Cachemap,
    ) -> (Vec<(u32, ChunkRef)>, usize) {
        let zone_size = zsm.max_zone_chunks() as u64 * self.chunk_size_hint();
        let mut out = Vec::with_capacity(live.len());
        let mut first = Some(crate::zsm::ActiveRef {
            zone: new_zone,
            chunk_offset: 0,
        });

        for (processed, &(id, old_ref)) in live.iter().enumerate() {
            let active = match first.take() {
                Some(a) => a,
                None => loop {
                    match zsm.acquire_active(device) {
                        AcquireActive::Success(a) => break a,
                        AcquireActive::Retry => {
                            let mut k = 0u32;
                            adaptive_yield_pub(&mut k);
                        }
                        AcquireActive::Evict | AcquireActive::Error(_) => {
                            // Out of room to relocate further; caller
                            // compacts live[processed..] in place instead.
                            return (out, processed);
                        }
                    }
                },
            };

            // This entry is now committed to being handled here (relocated
            // or dropped on failure), not by a later fallback: retire its
            // old key now so no stale node is left pointing at a pool this
            // zone's eventual reset/reuse will invalidate.
            self.forget_key(old_zone, old_ref.chunk_offset);

            let mut buf = vec![0u8; self.chunk_size_hint() as usize];
            let old_offset =
                device::chunk_byte_offset(zone_size, self.chunk_size_hint(), old_zone, old_ref.chunk_offset);
            if device.read_at(&mut buf, old_offset).is_err() {
                zsm.release_active_fail(active);
                cachemap.fail_publish(id);
                continue;
            }

            let new_offset =
                device::chunk_byte_offset(zone_size, self.chunk_size_hint(), active.zone, active.chunk_offset);
            if device::write_out(device, &buf, new_offset).is_err() {
                zsm.release_active_fail(active);
                cachemap.fail_publish(id);
                continue;
            }
            let _ = zsm.release_active_ok(active, device);

            let new_ref = ChunkRef {
                zone: active.zone,
                chunk_offset: active.chunk_offset,
                id,
                in_use: true,
            };
            self.update(new_ref, IoKind::Write);
            out.push((id, new_ref));
        }
        (out, live.len())
    }

    /// Rewrite `live`'s chunks (all belonging to `old_zone`) to a contiguous
    /// prefix starting at offset 0 of the same zone. `live` may be the
    /// zone's full live set or, when called as a relocation fallback, just
    /// the suffix `relocate` couldn't place elsewhere — either way the
    /// chunks are read from their *original* offsets in `old_zone` before
    /// anything is overwritten, so the two callers can't clobber each
    /// other's data.
    ///
    /// `old_zone`'s chunk pool is reset before any of the rewritten chunks
    /// are registered with `update`: the zone's old offset→in-use bookkeeping
    /// has nothing to do with the new offsets chunks land at after
    /// compaction, and replaying `update` against the stale pool would trip
    /// its "write to an already-in-use slot" assertion on the very first
    /// reused offset.
    fn compact_in_place(
        &self,
        live: &[(u32, ChunkRef)],
        old_zone: u32,
        device: &dyn Device,
        zsm: &ZoneStateManager,
        cachemap: &Cachemap,
    ) -> Vec<(u32, ChunkRef)> {
        let zone_size = zsm.max_zone_chunks() as u64 * self.chunk_size_hint();
        let mut bufs = Vec::with_capacity(live.len());
        for &(id, old_ref) in live {
            // Every entry handed to us is committed to landing at a new
            // offset (or being dropped on read failure): retire its old
            // key now so it can't outlive this zone's upcoming reset as an
            // orphaned LRU node.
            self.forget_key(old_zone, old_ref.chunk_offset);

            let mut buf = vec![0u8; self.chunk_size_hint() as usize];
            let old_offset =
                device::chunk_byte_offset(zone_size, self.chunk_size_hint(), old_zone, old_ref.chunk_offset);
            let ok = device.read_at(&mut buf, old_offset).is_ok();
            bufs.push(ok.then_some(buf));
            if !ok {
                cachemap.fail_publish(id);
            }
        }

        let surviving = bufs.iter().filter(|b| b.is_some()).count() as u32;
        if surviving == 0 {
            // Every chunk failed to read back; nothing to compact. The
            // zone is still Full (compact_in_place never mutated ZSM state
            // yet), so reclaim it the ordinary way.
            let _ = zsm.evict(old_zone, device);
            self.reset_pool(old_zone);
            return Vec::new();
        }

        // `compact_begin_and_write(zone, surviving - 1)` parks the cursor
        // one short of the final count; the single `release_active_ok`
        // below (on the last chunk actually written) advances it the rest
        // of the way, matching the zone-state-manager's one-call-per-chunk
        // cursor protocol while only checking the zone out of `Full` once.
        zsm.compact_begin_and_write(old_zone, surviving - 1);
        self.reset_pool(old_zone);

        let mut out = Vec::with_capacity(live.len());
        let mut next_offset = 0u32;
        for (i, (id, _)) in live.iter().enumerate() {
            let Some(buf) = &bufs[i] else { continue };
            let offset = device::chunk_byte_offset(zone_size, self.chunk_size_hint(), old_zone, next_offset);
            let _ = device::write_out(device, buf, offset);
            let new_ref = ChunkRef {
                zone: old_zone,
                chunk_offset: next_offset,
                id: *id,
                in_use: true,
            };
            self.update(new_ref, IoKind::Write);
            out.push((*id, new_ref));
            next_offset += 1;
        }
        if next_offset > 0 {
            let _ = zsm.release_active_ok(
                crate::zsm::ActiveRef {
                    zone: old_zone,
                    chunk_offset: next_offset - 1,
                },
                device,
            );
        }
        out
    }

    fn reset_pool(&self, zone: u32) {
        let mut state = self.state.lock().unwrap();
        state.pools[zone as usize] = ZonePool::new(self.max_zone_chunks);
    }

    /// GC needs the chunk size to compute byte offsets but the policy
    /// itself is chunk-size-agnostic elsewhere; it's set once via
    /// `set_chunk_size` after construction instead.
    fn chunk_size_hint(&self) -> u64 {
        self.chunk_size.load(Ordering::Relaxed) as u64
    }
}
