// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Workload file loader: a raw array of little-endian u32 ids. When no file
// is given, or it runs short of `iterations`, callers cycle through a
// small built-in demo sequence instead of failing outright.

use std::fs;
use std::path::Path;

use crate::error::{CacheError, Result};

/// Built-in fallback workload, used when no `-w` file is supplied.
pub const DEMO_WORKLOAD: &[u32] = &[1, 2, 3, 4, 1, 2, 5, 6, 3, 1, 7, 8, 2, 9, 10, 1, 11, 12, 4, 13];

pub struct Workload {
    ids: Vec<u32>,
}

impl Workload {
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .map_err(|e| CacheError::Workload(path.display().to_string(), e))?;
        let ids = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self { ids })
    }

    pub fn demo() -> Self {
        Self {
            ids: DEMO_WORKLOAD.to_vec(),
        }
    }

    /// Iterate `iterations` ids, cycling the underlying sequence if it's
    /// shorter than requested.
    pub fn iter(&self, iterations: usize) -> impl Iterator<Item = u32> + '_ {
        let ids = &self.ids;
        let bound = if ids.is_empty() { 0 } else { iterations };
        (0..bound).map(move |i| ids[i % ids.len()])
    }
}
