// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The cache facade: composes the zone state manager, cachemap, and
// eviction policy into the `get(id)` state machine. Correct ordering here
// is the whole point of the exercise — release the write, then publish,
// then notify the policy; increment `ActiveReaders` on a hit, decrement
// only once the read has actually completed.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, warn};

use crate::cachemap::{Cachemap, FindResult};
use crate::device::{self, Device};
use crate::policy::{EvictionPolicy, EvictOutcome, IoKind};
use crate::spin_lock::adaptive_yield_pub;
use crate::zone::ChunkRef;
use crate::zsm::{AcquireActive, ZoneStateManager};

pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

impl Default for CacheStats {
    fn default() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }
}

pub struct Cache {
    device: Box<dyn Device>,
    zsm: ZoneStateManager,
    cachemap: Cachemap,
    policy: EvictionPolicy,
    chunk_size: u32,
    zone_size: u64,
    stats: CacheStats,
}

impl Cache {
    pub fn new(
        device: Box<dyn Device>,
        nr_zones: u32,
        max_zone_chunks: u32,
        max_active_zones: u32,
        chunk_size: u32,
        policy: EvictionPolicy,
    ) -> Arc<Self> {
        if let EvictionPolicy::ChunkLru(p) = &policy {
            p.set_chunk_size(chunk_size);
        }
        Arc::new(Self {
            device,
            zsm: ZoneStateManager::new(nr_zones, max_zone_chunks, max_active_zones),
            cachemap: Cachemap::new(nr_zones),
            policy,
            chunk_size,
            zone_size: max_zone_chunks as u64 * chunk_size as u64,
            stats: CacheStats::default(),
        })
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn zsm(&self) -> &ZoneStateManager {
        &self.zsm
    }

    pub fn cachemap(&self) -> &Cachemap {
        &self.cachemap
    }

    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    pub fn device(&self) -> &dyn Device {
        &*self.device
    }

    /// Cache footprint in MiB: full + active zones worth of chunks.
    pub fn size_mib(&self) -> f64 {
        let occupied_zones = (self.zsm.num_full() + self.zsm.num_active()) as f64;
        occupied_zones * self.zone_size as f64 / (1024.0 * 1024.0)
    }

    fn byte_offset(&self, zone: u32, chunk_offset: u32) -> u64 {
        device::chunk_byte_offset(self.zone_size, self.chunk_size as u64, zone, chunk_offset)
    }

    /// Render the payload for `id`: the requesting id little-endian in the
    /// first 4 bytes, the rest copied from the caller's scratch buffer.
    fn render_payload(&self, id: u32, scratch: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; self.chunk_size as usize];
        buf[..4].copy_from_slice(&id.to_le_bytes());
        buf[4..].copy_from_slice(&scratch[4..self.chunk_size as usize]);
        buf
    }

    /// Service one `get(id)` request. Returns the chunk's bytes on success,
    /// or `None` if a device failure aborted the fill.
    pub fn get(&self, id: u32, scratch: &[u8]) -> Option<Vec<u8>> {
        match self.cachemap.find(id) {
            FindResult::Location(r) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                let mut buf = vec![0u8; self.chunk_size as usize];
                let offset = self.byte_offset(r.zone, r.chunk_offset);
                let result = self.device.read_at(&mut buf, offset);
                self.policy.update(r, IoKind::Read, self.max_zone_chunks());
                self.cachemap.release_reader(r.zone);
                match result {
                    Ok(()) => Some(buf),
                    Err(e) => {
                        warn!("read failure at zone={} offset={}: {e}", r.zone, offset);
                        None
                    }
                }
            }
            FindResult::Pending => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                self.fill(id, scratch)
            }
        }
    }

    /// Re-read `id`'s chunk straight from the device, independent of
    /// `get`'s hit/miss accounting. Used by `--verify` to check the actual
    /// on-disk round trip rather than re-checking the in-memory payload
    /// `get` already rendered. Returns `None` if `id` isn't currently
    /// published or the read itself fails.
    pub fn read_back(&self, id: u32) -> Option<Vec<u8>> {
        match self.cachemap.find(id) {
            FindResult::Location(r) => {
                let mut buf = vec![0u8; self.chunk_size as usize];
                let offset = self.byte_offset(r.zone, r.chunk_offset);
                let result = self.device.read_at(&mut buf, offset);
                self.cachemap.release_reader(r.zone);
                match result {
                    Ok(()) => Some(buf),
                    Err(e) => {
                        warn!("verify read-back failed at zone={} offset={}: {e}", r.zone, offset);
                        None
                    }
                }
            }
            FindResult::Pending => {
                // `find` just made us the writer for this id; we have no
                // payload to publish, so resolve the slot immediately
                // rather than stranding any concurrent waiter on it.
                self.cachemap.fail_publish(id);
                None
            }
        }
    }

    fn max_zone_chunks(&self) -> u32 {
        self.zsm.max_zone_chunks()
    }

    fn fill(&self, id: u32, scratch: &[u8]) -> Option<Vec<u8>> {
        let mut k = 0u32;
        loop {
            match self.zsm.acquire_active(&*self.device) {
                AcquireActive::Retry => {
                    adaptive_yield_pub(&mut k);
                }
                AcquireActive::Evict => {
                    self.foreground_evict();
                }
                AcquireActive::Error(e) => {
                    warn!("acquire_active failed: {e}");
                    self.cachemap.fail_publish(id);
                    return None;
                }
                AcquireActive::Success(active) => {
                    let payload = self.render_payload(id, scratch);
                    let offset = self.byte_offset(active.zone, active.chunk_offset);
                    match device::write_out(&*self.device, &payload, offset) {
                        Ok(()) => {
                            if let Err(e) = self.zsm.release_active_ok(active, &*self.device) {
                                warn!("release_active_ok failed: {e}");
                            }
                            let loc = ChunkRef {
                                zone: active.zone,
                                chunk_offset: active.chunk_offset,
                                id,
                                in_use: true,
                            };
                            self.cachemap.publish(id, loc);
                            self.policy.update(loc, IoKind::Write, self.max_zone_chunks());
                            debug!("filled id={id} at zone={} offset={}", loc.zone, loc.chunk_offset);
                            return Some(payload);
                        }
                        Err(e) => {
                            warn!("write failure at zone={} offset={}: {e}", active.zone, offset);
                            self.zsm.release_active_fail(active);
                            self.cachemap.fail_publish(id);
                            return None;
                        }
                    }
                }
            }
        }
    }

    /// Called when `acquire_active` reports the device has neither an
    /// active nor a free zone. Repeatedly invokes the policy's `evict`
    /// until a zone frees up or the policy reports nothing left to evict.
    fn foreground_evict(&self) {
        loop {
            if self.zsm.num_free() > 0 {
                return;
            }
            match self.policy.evict(&self.zsm, &self.cachemap, &*self.device) {
                EvictOutcome::ReclaimZone(zone) => {
                    self.cachemap.clear_zone(zone);
                    let mut k = 0u32;
                    while self.cachemap.active_readers(zone) > 0 {
                        adaptive_yield_pub(&mut k);
                    }
                    if let Err(e) = self.zsm.evict(zone, &*self.device) {
                        warn!("zsm.evict({zone}) failed: {e}");
                        return;
                    }
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                EvictOutcome::Handled => {
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                EvictOutcome::Nothing => return,
            }
        }
    }
}
