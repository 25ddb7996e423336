// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cachemap rendezvous properties: monogamy of publishing, reader
// accounting, and the two-writers-same-id boundary scenario.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use zncache::cachemap::{Cachemap, FindResult};
use zncache::zone::ChunkRef;

#[test]
fn find_on_empty_map_returns_pending() {
    let map = Cachemap::new(4);
    assert!(matches!(map.find(7), FindResult::Pending));
}

#[test]
fn publish_then_find_returns_location_and_bumps_reader_count() {
    let map = Cachemap::new(4);
    assert!(matches!(map.find(7), FindResult::Pending));

    let loc = ChunkRef {
        zone: 0,
        chunk_offset: 0,
        id: 7,
        in_use: true,
    };
    map.publish(7, loc);

    match map.find(7) {
        FindResult::Location(r) => assert_eq!(r, loc),
        FindResult::Pending => panic!("expected a location after publish"),
    }
    assert_eq!(map.active_readers(0), 1);
    map.release_reader(0);
    assert_eq!(map.active_readers(0), 0);
}

#[test]
fn fail_publish_removes_pending_slot_and_wakes_waiters() {
    let map = Arc::new(Cachemap::new(4));
    assert!(matches!(map.find(42), FindResult::Pending));

    let barrier = Arc::new(Barrier::new(2));
    let waiter_done = Arc::new(AtomicBool::new(false));

    let map2 = Arc::clone(&map);
    let barrier2 = Arc::clone(&barrier);
    let waiter_done2 = Arc::clone(&waiter_done);
    let waiter = thread::spawn(move || {
        barrier2.wait();
        // Re-enters the Pending branch once woken by fail_publish, since
        // the slot is gone and `find` never trusts the slot it slept on.
        let result = map2.find(42);
        waiter_done2.store(true, Ordering::SeqCst);
        result
    });

    barrier.wait();
    thread::sleep(Duration::from_millis(20));
    map.fail_publish(42);

    let result = waiter.join().unwrap();
    assert!(matches!(result, FindResult::Pending));
    assert!(waiter_done.load(Ordering::SeqCst));
}

/// S1 — two writers, same id. The second caller must block until the
/// first publishes, then observe a real location rather than racing into
/// its own write.
#[test]
fn s1_two_writers_same_id_second_blocks_then_sees_published_location() {
    let map = Arc::new(Cachemap::new(4));
    assert!(matches!(map.find(7), FindResult::Pending));

    let order = Arc::new(AtomicUsize::new(0));
    let map2 = Arc::clone(&map);
    let order2 = Arc::clone(&order);

    let b_thread = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        let result = map2.find(7);
        order2.fetch_add(1, Ordering::SeqCst);
        result
    });

    thread::sleep(Duration::from_millis(30));
    let loc = ChunkRef {
        zone: 0,
        chunk_offset: 0,
        id: 7,
        in_use: true,
    };
    map.publish(7, loc);

    let result = b_thread.join().unwrap();
    match result {
        FindResult::Location(r) => assert_eq!(r, loc),
        FindResult::Pending => panic!("B should observe the published location, not a fresh Pending"),
    }
    map.release_reader(0);
    assert_eq!(map.active_readers(0), 0);
}

#[test]
fn clear_zone_removes_every_entry_in_that_zone() {
    let map = Cachemap::new(2);
    for (id, offset) in [(1u32, 0u32), (2, 1), (3, 2)] {
        assert!(matches!(map.find(id), FindResult::Pending));
        map.publish(
            id,
            ChunkRef {
                zone: 0,
                chunk_offset: offset,
                id,
                in_use: true,
            },
        );
    }

    map.clear_zone(0);

    for id in [1u32, 2, 3] {
        assert!(matches!(map.find(id), FindResult::Pending));
        map.fail_publish(id);
    }
}

#[test]
fn compact_begin_snapshots_live_entries_and_blocks_readers_until_compact_end() {
    let map = Arc::new(Cachemap::new(1));
    for (id, offset) in [(10u32, 0u32), (11, 1), (12, 2)] {
        assert!(matches!(map.find(id), FindResult::Pending));
        map.publish(
            id,
            ChunkRef {
                zone: 0,
                chunk_offset: offset,
                id,
                in_use: true,
            },
        );
    }

    let live = map.compact_begin(0);
    assert_eq!(live.len(), 3);

    let map2 = Arc::clone(&map);
    let waiter = thread::spawn(move || matches!(map2.find(10), FindResult::Location(_)));

    thread::sleep(Duration::from_millis(20));
    let relocated: Vec<(u32, ChunkRef)> = live
        .into_iter()
        .map(|(id, r)| {
            (
                id,
                ChunkRef {
                    zone: 1,
                    chunk_offset: r.chunk_offset,
                    id,
                    in_use: true,
                },
            )
        })
        .collect();
    map.compact_end(0, &relocated);

    assert!(waiter.join().unwrap());
    map.release_reader(1);
}
