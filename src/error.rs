// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error types for the cache's fallible, non-invariant paths. Fatal
// invariant violations (corrupted internal state) stay as `assert!`/
// `unreachable!` and abort the process instead of flowing through here.

use std::io;

/// Errors surfaced across the device boundary and from CLI-level setup.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("device I/O error: {0}")]
    Device(#[from] io::Error),

    #[error("device reports no zones available")]
    NoZones,

    #[error("chunk size {0} is not a positive multiple of the write granularity")]
    InvalidChunkSize(u32),

    #[error("workload file {0} could not be read: {1}")]
    Workload(String, io::Error),

    #[error("metrics file {0} could not be opened: {1}")]
    Metrics(String, io::Error),

    #[error("cache capacity exhausted and eviction could not make progress")]
    CapacityExhausted,
}

pub type Result<T> = std::result::Result<T, CacheError>;
