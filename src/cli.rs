// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PolicyKind {
    ZoneLru,
    ChunkLru,
}

/// Host-managed write-out-of-place chunk cache over zoned namespace storage.
#[derive(Debug, Parser)]
#[command(name = "zncache", version, about)]
pub struct Args {
    /// Path to the ZNS device or a conventional block device / file.
    pub device: PathBuf,

    /// Fixed chunk size in bytes.
    pub chunk_size: u32,

    /// Number of worker threads issuing `get` requests.
    pub threads: u32,

    /// Workload file: raw little-endian u32 ids. Falls back to a small
    /// built-in demo sequence when omitted.
    #[arg(short = 'w', long)]
    pub workload: Option<PathBuf>,

    /// Number of ids to service, cycling the workload if shorter.
    #[arg(short = 'i', long, default_value_t = 1000)]
    pub iterations: usize,

    /// CSV metrics output file.
    #[arg(short = 'm', long)]
    pub metrics: Option<PathBuf>,

    /// Eviction policy.
    #[arg(long, value_enum, default_value = "zone-lru")]
    pub policy: PolicyKind,

    /// Synthetic zone count, used only when the device isn't a real ZNS
    /// device.
    #[arg(long, default_value_t = 16)]
    pub zones: u32,

    /// Re-read every chunk immediately after writing it and verify the
    /// data-fidelity invariant.
    #[arg(long, default_value_t = false)]
    pub verify: bool,
}
