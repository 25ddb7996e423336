// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Zone state manager: the single source of truth for which zones are
// Free/Active/Writing/Full, gating active-zone opens against the device's
// hardware limit and issuing the open/finish/reset device calls. Holds its
// mutex only across state transitions and device calls, never across
// reader I/O.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use crate::device::Device;
use crate::error::CacheError;
use crate::zone::{Zone, ZoneState};

pub const DEFAULT_MAX_ACTIVE_ZONES: u32 = 14;

/// Result of `acquire_active`.
pub enum AcquireActive {
    Success(ActiveRef),
    /// No active zone available right now, but the budget isn't exhausted
    /// for lack of free zones — caller should yield and retry.
    Retry,
    /// Neither an active nor a free zone is available; caller must run
    /// foreground eviction before retrying.
    Evict,
    Error(CacheError),
}

/// A zone currently checked out for writing: zone id plus the chunk offset
/// the caller must write to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveRef {
    pub zone: u32,
    pub chunk_offset: u32,
}

struct Inner {
    zones: Vec<Zone>,
    active_queue: VecDeque<u32>,
    free_queue: VecDeque<u32>,
    writes_in_progress: u32,
    max_active: u32,
    max_zone_chunks: u32,
    invalid_chunks: Vec<HashSet<u32>>,
}

/// Owns zone lifecycle state. Read and mutated only under `inner`'s mutex;
/// device calls happen while the mutex is held but are expected to be fast
/// (ioctls / no-ops), matching the "brief by design" lock discipline used
/// throughout the cache.
pub struct ZoneStateManager {
    inner: Mutex<Inner>,
}

impl ZoneStateManager {
    pub fn new(nr_zones: u32, max_zone_chunks: u32, max_active: u32) -> Self {
        let max_active = if max_active == 0 {
            DEFAULT_MAX_ACTIVE_ZONES
        } else {
            max_active
        };
        let zones = (0..nr_zones).map(Zone::new).collect::<Vec<_>>();
        let free_queue = (0..nr_zones).collect::<VecDeque<_>>();
        Self {
            inner: Mutex::new(Inner {
                zones,
                active_queue: VecDeque::new(),
                free_queue,
                writes_in_progress: 0,
                max_active,
                max_zone_chunks,
                invalid_chunks: (0..nr_zones).map(|_| HashSet::new()).collect(),
            }),
        }
    }

    /// Acquire a zone to write the next chunk into, opening a free zone on
    /// the device if no zone is already active.
    pub fn acquire_active(&self, device: &dyn Device) -> AcquireActive {
        let mut inner = self.inner.lock().unwrap();

        if let Some(zone_id) = inner.active_queue.pop_front() {
            let chunk_offset = {
                let z = &mut inner.zones[zone_id as usize];
                debug_assert_eq!(z.state, ZoneState::Active);
                z.state = ZoneState::Writing;
                z.write_ptr
            };
            inner.writes_in_progress += 1;
            return AcquireActive::Success(ActiveRef {
                zone: zone_id,
                chunk_offset,
            });
        }

        let active_in_flight = inner.writes_in_progress;
        if active_in_flight >= inner.max_active {
            return AcquireActive::Retry;
        }

        let zone_id = match inner.free_queue.pop_front() {
            Some(z) => z,
            None => return AcquireActive::Evict,
        };

        if let Err(e) = device.open_zone(zone_id) {
            inner.free_queue.push_front(zone_id);
            return AcquireActive::Error(e.into());
        }

        {
            let z = &mut inner.zones[zone_id as usize];
            z.state = ZoneState::Writing;
            z.write_ptr = 0;
        }
        inner.writes_in_progress += 1;
        AcquireActive::Success(ActiveRef {
            zone: zone_id,
            chunk_offset: 0,
        })
    }

    /// Release a zone after a successful write, advancing its cursor and
    /// finishing it on the device if the zone is now full.
    pub fn release_active_ok(&self, r: ActiveRef, device: &dyn Device) -> Result<(), CacheError> {
        let mut inner = self.inner.lock().unwrap();
        let max_zone_chunks = inner.max_zone_chunks;
        let now_full = {
            let z = &mut inner.zones[r.zone as usize];
            assert_eq!(z.state, ZoneState::Writing, "release_active_ok on non-Writing zone");
            assert_eq!(z.write_ptr, r.chunk_offset, "cursor mismatch on release_active_ok");
            z.write_ptr += 1;
            z.write_ptr == max_zone_chunks
        };
        inner.writes_in_progress -= 1;

        if now_full {
            device.finish_zone(r.zone)?;
            inner.zones[r.zone as usize].state = ZoneState::Full;
        } else {
            inner.zones[r.zone as usize].state = ZoneState::Active;
            inner.active_queue.push_back(r.zone);
        }
        Ok(())
    }

    /// Roll a zone back to Active after a failed write, without advancing
    /// its cursor.
    pub fn release_active_fail(&self, r: ActiveRef) {
        let mut inner = self.inner.lock().unwrap();
        let z = &mut inner.zones[r.zone as usize];
        assert_eq!(z.state, ZoneState::Writing, "release_active_fail on non-Writing zone");
        z.state = ZoneState::Active;
        inner.active_queue.push_back(r.zone);
        inner.writes_in_progress -= 1;
    }

    /// Reclaim a Full zone back to Free via a device reset.
    pub fn evict(&self, zone: u32, device: &dyn Device) -> Result<(), CacheError> {
        let mut inner = self.inner.lock().unwrap();
        assert_eq!(inner.zones[zone as usize].state, ZoneState::Full, "evict on non-Full zone");
        // reset_zone returning Ok(()) is success, per the documented fix to
        // the source's inverted success check.
        device.reset_zone(zone)?;
        let z = &mut inner.zones[zone as usize];
        z.state = ZoneState::Free;
        z.write_ptr = 0;
        inner.invalid_chunks[zone as usize].clear();
        inner.free_queue.push_back(zone);
        Ok(())
    }

    /// Treat a Full zone as freshly opened for GC compaction: the caller
    /// has already rewritten `n` valid chunks in place at the start of the
    /// zone.
    pub fn compact_begin_and_write(&self, zone: u32, n: u32) {
        let mut inner = self.inner.lock().unwrap();
        let z = &mut inner.zones[zone as usize];
        assert_eq!(z.state, ZoneState::Full, "compact_begin_and_write on non-Full zone");
        z.state = ZoneState::Writing;
        z.write_ptr = n;
        inner.writes_in_progress += 1;
        inner.invalid_chunks[zone as usize].clear();
    }

    pub fn mark_invalid(&self, zone: u32, chunk_offset: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.invalid_chunks[zone as usize].insert(chunk_offset);
    }

    pub fn num_invalid(&self, zone: u32) -> u32 {
        self.inner.lock().unwrap().invalid_chunks[zone as usize].len() as u32
    }

    pub fn num_active(&self) -> u32 {
        let inner = self.inner.lock().unwrap();
        inner.active_queue.len() as u32 + inner.writes_in_progress
    }

    pub fn num_free(&self) -> u32 {
        self.inner.lock().unwrap().free_queue.len() as u32
    }

    pub fn num_full(&self) -> u32 {
        let inner = self.inner.lock().unwrap();
        inner
            .zones
            .iter()
            .filter(|z| z.state == ZoneState::Full)
            .count() as u32
    }

    pub fn max_zone_chunks(&self) -> u32 {
        self.inner.lock().unwrap().max_zone_chunks
    }

    pub fn nr_zones(&self) -> u32 {
        self.inner.lock().unwrap().zones.len() as u32
    }
}
