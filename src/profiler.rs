// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// CSV metrics writer. Three metrics: mean GET latency over the sampling
// interval, cache size in MiB, and hit ratio. Header is printed once on
// open; each flush resets the running GET-latency accumulator.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{CacheError, Result};

const HEADER: &str = "METRIC,VALUE";

struct Accumulator {
    latency_total: Duration,
    latency_count: u64,
}

pub struct Profiler {
    writer: Mutex<BufWriter<File>>,
    accum: Mutex<Accumulator>,
}

impl Profiler {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| CacheError::Metrics(path.display().to_string(), e))?;
        let mut writer = BufWriter::new(file);
        let _ = writeln!(writer, "{HEADER}");
        Ok(Self {
            writer: Mutex::new(writer),
            accum: Mutex::new(Accumulator {
                latency_total: Duration::ZERO,
                latency_count: 0,
            }),
        })
    }

    pub fn record_get_latency(&self, d: Duration) {
        let mut accum = self.accum.lock().unwrap();
        accum.latency_total += d;
        accum.latency_count += 1;
    }

    /// Write the current snapshot and reset the latency accumulator.
    pub fn flush(&self, cache_size_mib: f64, hit_ratio: f64) {
        let mean_latency_us = {
            let mut accum = self.accum.lock().unwrap();
            let mean = if accum.latency_count > 0 {
                accum.latency_total.as_micros() as f64 / accum.latency_count as f64
            } else {
                0.0
            };
            accum.latency_total = Duration::ZERO;
            accum.latency_count = 0;
            mean
        };

        let mut writer = self.writer.lock().unwrap();
        let _ = writeln!(writer, "GET_LATENCY_US,{mean_latency_us:.3}");
        let _ = writeln!(writer, "CACHE_SIZE_MIB,{cache_size_mib:.3}");
        let _ = writeln!(writer, "HIT_RATIO,{hit_ratio:.4}");
        let _ = writer.flush();
    }
}
