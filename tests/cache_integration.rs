// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// End-to-end exercises of the cache facade itself, not just its
// collaborators in isolation: zone fill-to-capacity, foreground eviction
// under the zone-granularity policy, read-promotion surviving a chunk-GC
// pass under the chunk-granularity policy, and write-failure rollback.

mod support;

use support::MemDevice;

use zncache::cache::Cache;
use zncache::cachemap::FindResult;
use zncache::policy::EvictionPolicy;

const CHUNK_SIZE: u32 = 16;
const MAX_ZONE_CHUNKS: u32 = 4;
const ZONE_CAPACITY: u64 = CHUNK_SIZE as u64 * MAX_ZONE_CHUNKS as u64;

fn scratch() -> Vec<u8> {
    vec![0xAB; CHUNK_SIZE as usize]
}

/// A fresh miss renders the id into the first 4 bytes of the payload
/// regardless of hit/miss path, so this doubles as a content check.
fn assert_payload_id(buf: &[u8], id: u32) {
    assert_eq!(u32::from_le_bytes(buf[..4].try_into().unwrap()), id);
}

/// S2 — filling a zone exactly transitions it from Active to Full without
/// spilling into a second zone.
#[test]
fn s2_filling_a_zone_exactly_closes_it() {
    let device = MemDevice::new(2, ZONE_CAPACITY);
    let cache = Cache::new(
        Box::new(device),
        2,
        MAX_ZONE_CHUNKS,
        1,
        CHUNK_SIZE,
        EvictionPolicy::zone_lru(),
    );
    let buf = scratch();

    for id in 0..MAX_ZONE_CHUNKS {
        let got = cache.get(id, &buf).expect("fill should succeed");
        assert_payload_id(&got, id);
    }

    assert_eq!(cache.zsm().num_full(), 1);
    assert_eq!(cache.zsm().num_active(), 0);
    assert_eq!(cache.stats().misses.load(std::sync::atomic::Ordering::Relaxed), 4);
}

/// S3 — with no free zones and nothing active, a miss drives foreground
/// eviction of the oldest full zone under the zone-granularity policy, and
/// the evicted ids become fresh misses again afterward.
#[test]
fn s3_foreground_eviction_reclaims_the_oldest_full_zone() {
    let device = MemDevice::new(1, ZONE_CAPACITY);
    let cache = Cache::new(
        Box::new(device),
        1,
        MAX_ZONE_CHUNKS,
        1,
        CHUNK_SIZE,
        EvictionPolicy::zone_lru(),
    );
    let buf = scratch();

    for id in 0..MAX_ZONE_CHUNKS {
        cache.get(id, &buf).expect("initial fill should succeed");
    }
    assert_eq!(cache.zsm().num_full(), 1);
    assert_eq!(cache.zsm().num_free(), 0);

    // The only zone is Full and there is no second zone: this miss must
    // evict zone 0 before it can proceed.
    let got = cache.get(100, &buf).expect("fill after eviction should succeed");
    assert_payload_id(&got, 100);
    assert_eq!(cache.stats().evictions.load(std::sync::atomic::Ordering::Relaxed), 1);

    // The old occupants are gone from the index; looking them up starts a
    // fresh Pending cycle instead of returning a stale location.
    for id in 0..MAX_ZONE_CHUNKS {
        match cache.cachemap().find(id) {
            FindResult::Pending => cache.cachemap().fail_publish(id),
            FindResult::Location(_) => panic!("id {id} should have been evicted"),
        }
    }
}

/// S4 + S5 — a read promotes a chunk in the global LRU; when eviction then
/// forces a GC/compaction pass over both (now full) zones, the promoted
/// chunk survives the eviction sweep and remains retrievable afterward,
/// even though it has to be relocated out of its original zone.
#[test]
fn s4_s5_promoted_chunk_survives_gc_compaction() {
    let device = MemDevice::new(2, ZONE_CAPACITY);
    let cache = Cache::new(
        Box::new(device),
        2,
        MAX_ZONE_CHUNKS,
        2,
        CHUNK_SIZE,
        EvictionPolicy::chunk_lru(2, MAX_ZONE_CHUNKS),
    );
    let buf = scratch();

    // Fill zone 0 with ids 100..104, then zone 1 with ids 104..108 (8
    // chunks total, 2 zones at full capacity).
    for id in 100..108 {
        cache.get(id, &buf).expect("fill should succeed");
    }
    assert_eq!(cache.zsm().num_full(), 2);

    // Promote id 100 to the tail of the global LRU by reading it again.
    let got = cache.get(100, &buf).expect("promotion read should hit");
    assert_payload_id(&got, 100);

    // Force an eviction/GC pass directly (the facade would otherwise only
    // trigger this from a future miss under pressure).
    let outcome = cache
        .policy()
        .evict(cache.zsm(), cache.cachemap(), cache.device());
    assert!(matches!(outcome, zncache::policy::EvictOutcome::Handled));

    // id 100 was the most recently read chunk in the whole cache and must
    // have survived the sweep that evicted the six oldest chunks, even
    // though doing so required relocating it out of zone 0.
    match cache.cachemap().find(100) {
        FindResult::Location(r) => cache.cachemap().release_reader(r.zone),
        FindResult::Pending => panic!("promoted chunk 100 should have survived GC"),
    }

    // Re-fetching it through the facade must still return its own payload,
    // not some other id's data left over from compaction.
    let got = cache.get(100, &buf).expect("id 100 should still be resident");
    assert_payload_id(&got, 100);
}

/// S6 — a write failure during a miss rolls the zone's cursor back rather
/// than advancing it, and the failed id can be retried successfully.
#[test]
fn s6_write_failure_does_not_advance_the_cursor_and_id_is_retryable() {
    let device = MemDevice::new(1, ZONE_CAPACITY);
    device.fail_next_write();
    let cache = Cache::new(
        Box::new(device),
        1,
        MAX_ZONE_CHUNKS,
        1,
        CHUNK_SIZE,
        EvictionPolicy::zone_lru(),
    );
    let buf = scratch();

    assert!(cache.get(7, &buf).is_none(), "injected write failure should surface as None");

    // The cursor must not have moved: the next write takes offset 0 again,
    // and this one succeeds since the injected failure was one-shot.
    let got = cache.get(7, &buf).expect("retry after a one-shot failure should succeed");
    assert_payload_id(&got, 7);
    assert_eq!(cache.zsm().num_active(), 1);
}
