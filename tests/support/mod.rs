// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// In-memory device double for exercising the cache core without a real
// block device or ZNS hardware. Supports injecting a one-shot write
// failure for the rollback scenario.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use zncache::device::Device;

pub struct MemDevice {
    backing: Mutex<Vec<u8>>,
    nr_zones: u32,
    zone_capacity: u64,
    fail_next_write: AtomicBool,
    open_calls: AtomicU32,
    finish_calls: AtomicU32,
    reset_calls: AtomicU32,
}

impl MemDevice {
    pub fn new(nr_zones: u32, zone_capacity: u64) -> Self {
        Self {
            backing: Mutex::new(vec![0u8; (nr_zones as u64 * zone_capacity) as usize]),
            nr_zones,
            zone_capacity,
            fail_next_write: AtomicBool::new(false),
            open_calls: AtomicU32::new(0),
            finish_calls: AtomicU32::new(0),
            reset_calls: AtomicU32::new(0),
        }
    }

    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    pub fn reset_calls(&self) -> u32 {
        self.reset_calls.load(Ordering::SeqCst)
    }
}

impl Device for MemDevice {
    fn report_zones(&self) -> io::Result<zncache::device::ZoneGeometry> {
        Ok(zncache::device::ZoneGeometry {
            nr_zones: self.nr_zones,
            zone_capacity_bytes: self.zone_capacity,
            max_active_zones: 0,
        })
    }

    fn open_zone(&self, _zone: u32) -> io::Result<()> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn finish_zone(&self, _zone: u32) -> io::Result<()> {
        self.finish_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reset_zone(&self, _zone: u32) -> io::Result<()> {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let backing = self.backing.lock().unwrap();
        let offset = offset as usize;
        buf.copy_from_slice(&backing[offset..offset + buf.len()]);
        Ok(())
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
        }
        let mut backing = self.backing.lock().unwrap();
        let offset = offset as usize;
        backing[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }
}
