// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Background eviction thread: wakes periodically and asks the policy to
// evict whenever the free-zone count dips below the high threshold.
// Terminates on an externally-set `done` flag rather than a timeout —
// matching the cache's "no cancellation" concurrency model.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::debug;

use crate::cache::Cache;
use crate::policy::EvictOutcome;

const EVICT_HIGH_THRESH_ZONES: u32 = 4;
const EVICT_SLEEP: Duration = Duration::from_millis(500);

pub struct EvictThread {
    done: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EvictThread {
    pub fn spawn(cache: Arc<Cache>) -> Self {
        let done = Arc::new(AtomicBool::new(false));
        let done_for_thread = Arc::clone(&done);
        let handle = thread::spawn(move || {
            while !done_for_thread.load(Ordering::Relaxed) {
                if cache.zsm().num_free() > EVICT_HIGH_THRESH_ZONES {
                    thread::sleep(EVICT_SLEEP);
                    continue;
                }
                match cache
                    .policy()
                    .evict(cache.zsm(), cache.cachemap(), cache.device())
                {
                    EvictOutcome::ReclaimZone(zone) => {
                        cache.cachemap().clear_zone(zone);
                        let mut k = 0u32;
                        while cache.cachemap().active_readers(zone) > 0 {
                            crate::spin_lock::adaptive_yield_pub(&mut k);
                        }
                        if let Err(e) = cache.zsm().evict(zone, cache.device()) {
                            debug!("background evict of zone {zone} failed: {e}");
                        }
                    }
                    EvictOutcome::Handled => {}
                    EvictOutcome::Nothing => {
                        thread::sleep(EVICT_SLEEP);
                    }
                }
            }
        });
        Self {
            done,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.done.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for EvictThread {
    fn drop(&mut self) {
        self.done.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}
