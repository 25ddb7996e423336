// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors

use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use zncache::cache::Cache;
use zncache::cli::{Args, PolicyKind};
use zncache::device::open_device;
use zncache::error::CacheError;
use zncache::evict_loop::EvictThread;
use zncache::policy::EvictionPolicy;
use zncache::profiler::Profiler;
use zncache::verify;
use zncache::workload::Workload;

const SEED: u64 = 42;
const PROFILING_INTERVAL: Duration = Duration::from_secs(2);

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(CacheError::Device(_)) | Err(CacheError::NoZones) => ExitCode::from(2),
        Err(_) => ExitCode::FAILURE,
    }
}

fn run(args: Args) -> Result<(), CacheError> {
    if args.chunk_size == 0 {
        return Err(CacheError::InvalidChunkSize(args.chunk_size));
    }

    let device = open_device(&args.device, args.zones, None)?;
    let geometry = device.report_zones()?;
    if geometry.nr_zones == 0 {
        return Err(CacheError::NoZones);
    }

    let max_zone_chunks = (geometry.zone_capacity_bytes / args.chunk_size as u64) as u32;

    let policy = match args.policy {
        PolicyKind::ZoneLru => EvictionPolicy::zone_lru(),
        PolicyKind::ChunkLru => EvictionPolicy::chunk_lru(geometry.nr_zones, max_zone_chunks),
    };

    let cache = Cache::new(
        device,
        geometry.nr_zones,
        max_zone_chunks,
        geometry.max_active_zones,
        args.chunk_size,
        policy,
    );

    let workload = match &args.workload {
        Some(path) => Workload::from_file(path)?,
        None => Workload::demo(),
    };

    let mut seed_buf = vec![0u8; args.chunk_size as usize];
    StdRng::seed_from_u64(SEED).fill_bytes(&mut seed_buf);
    let seed_buf = Arc::new(seed_buf);

    let profiler = match &args.metrics {
        Some(path) => Some(Arc::new(Profiler::open(path)?)),
        None => None,
    };

    let evict_thread = EvictThread::spawn(Arc::clone(&cache));

    let ids: Vec<u32> = workload.iter(args.iterations).collect();
    let threads = args.threads.max(1) as usize;
    let chunk_per_thread = ids.len().div_ceil(threads).max(1);

    let mut handles = Vec::with_capacity(threads);
    for work in ids.chunks(chunk_per_thread).map(|c| c.to_vec()) {
        let cache = Arc::clone(&cache);
        let scratch = Arc::clone(&seed_buf);
        let profiler = profiler.clone();
        let verify_enabled = args.verify;
        handles.push(thread::spawn(move || {
            for id in work {
                let start = Instant::now();
                let result = cache.get(id, &scratch);
                let elapsed = start.elapsed();
                if let Some(p) = &profiler {
                    p.record_get_latency(elapsed);
                }
                if verify_enabled && result.is_some() {
                    // Re-read the chunk straight off the device rather than
                    // trusting the in-memory payload `get` already holds,
                    // so `--verify` actually exercises the on-disk round
                    // trip.
                    match cache.read_back(id) {
                        Some(buf) => {
                            if !verify::check_chunk(&buf, id, &scratch) {
                                log::error!("data fidelity check failed for id={id}");
                            }
                        }
                        None => log::error!("verify: could not read back id={id} from the device"),
                    }
                }
            }
        }));
    }

    let profiler_sampler = profiler.clone();
    let cache_for_sampler = Arc::clone(&cache);
    let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let done_for_sampler = Arc::clone(&done);
    let sampler = profiler_sampler.map(|p| {
        thread::spawn(move || {
            while !done_for_sampler.load(Ordering::Relaxed) {
                thread::sleep(PROFILING_INTERVAL);
                let hits = cache_for_sampler.stats().hits.load(Ordering::Relaxed);
                let misses = cache_for_sampler.stats().misses.load(Ordering::Relaxed);
                let total = hits + misses;
                let hit_ratio = if total > 0 {
                    hits as f64 / total as f64
                } else {
                    0.0
                };
                p.flush(cache_for_sampler.size_mib(), hit_ratio);
            }
        })
    });

    for h in handles {
        let _ = h.join();
    }

    done.store(true, Ordering::Relaxed);
    if let Some(s) = sampler {
        let _ = s.join();
    }

    evict_thread.stop();

    Ok(())
}
