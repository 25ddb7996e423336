// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Eviction policy as a tagged variant rather than open polymorphism: a
// `void*`-and-function-pointer pair in the source becomes a sum type with
// two members sharing one three-operation interface. The cache facade and
// background evict thread are written once against `EvictionPolicy`; there
// is no trait object and no dynamic dispatch hazard.

mod chunk_lru;
mod zone_lru;

pub use chunk_lru::ChunkLruPolicy;
pub use zone_lru::ZoneLruPolicy;

use crate::cachemap::Cachemap;
use crate::device::Device;
use crate::zone::ChunkRef;
use crate::zsm::ZoneStateManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
    Read,
    Write,
}

/// What the caller must still do after a call to `evict`.
pub enum EvictOutcome {
    /// Pure zone-granularity policies hand back a zone id for the cache
    /// facade to reclaim: `cachemap.clear_zone`, spin-wait on
    /// `ActiveReaders == 0`, then `zsm.evict`.
    ReclaimZone(u32),
    /// The policy performed all clearing/eviction/GC internally; nothing
    /// left for the caller to do.
    Handled,
    /// Nothing met the eviction threshold.
    Nothing,
}

pub enum EvictionPolicy {
    ZoneLru(ZoneLruPolicy),
    ChunkLru(ChunkLruPolicy),
}

impl EvictionPolicy {
    pub fn zone_lru() -> Self {
        EvictionPolicy::ZoneLru(ZoneLruPolicy::new())
    }

    pub fn chunk_lru(nr_zones: u32, max_zone_chunks: u32) -> Self {
        EvictionPolicy::ChunkLru(ChunkLruPolicy::new(nr_zones, max_zone_chunks))
    }

    pub fn update(&self, r: ChunkRef, kind: IoKind, max_zone_chunks: u32) {
        match self {
            EvictionPolicy::ZoneLru(p) => p.update(r, kind, max_zone_chunks),
            EvictionPolicy::ChunkLru(p) => p.update(r, kind),
        }
    }

    pub fn evict(
        &self,
        zsm: &ZoneStateManager,
        cachemap: &Cachemap,
        device: &dyn Device,
    ) -> EvictOutcome {
        match self {
            EvictionPolicy::ZoneLru(p) => p.evict(),
            EvictionPolicy::ChunkLru(p) => p.evict(zsm, cachemap, device),
        }
    }
}
