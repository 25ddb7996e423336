// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Array-backed binary min-heap with stable external handles.
//
// The chunk eviction policy needs to decrease a zone's priority (its
// `chunks_in_use` count) after every invalidation without walking the
// whole heap to find the entry again. A plain `BinaryHeap` can't do that,
// so the heap array stores handle ids rather than data directly, and a
// parallel `positions` table (indexed by handle id) tracks where each
// handle currently sits in the array. Every swap updates `positions` for
// both entries involved, so a handle returned by `insert` stays valid
// across any number of later `update`/`extract_min` calls on other
// entries — the "array of pointers" approach the data model calls for.

use std::sync::Mutex;

/// Stable handle into an `IndexedMinHeap`. Remains valid for the entry's
/// entire lifetime in the heap, across arbitrary `update` calls on other
/// entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapHandle(usize);

struct Slot<T> {
    priority: u32,
    handle: usize,
    data: T,
}

struct Inner<T> {
    arr: Vec<Slot<T>>,
    /// positions[handle.0] = index into arr, or usize::MAX if extracted.
    positions: Vec<usize>,
    free_handles: Vec<usize>,
}

const EXTRACTED: usize = usize::MAX;

impl<T> Inner<T> {
    fn parent(i: usize) -> usize {
        (i - 1) / 2
    }
    fn left(i: usize) -> usize {
        2 * i + 1
    }
    fn right(i: usize) -> usize {
        2 * i + 2
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.arr.swap(a, b);
        self.positions[self.arr[a].handle] = a;
        self.positions[self.arr[b].handle] = b;
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let p = Self::parent(i);
            if self.arr[p].priority <= self.arr[i].priority {
                break;
            }
            self.swap(p, i);
            i = p;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.arr.len();
        loop {
            let l = Self::left(i);
            let r = Self::right(i);
            let mut smallest = i;
            if l < len && self.arr[l].priority < self.arr[smallest].priority {
                smallest = l;
            }
            if r < len && self.arr[r].priority < self.arr[smallest].priority {
                smallest = r;
            }
            if smallest == i {
                break;
            }
            self.swap(i, smallest);
            i = smallest;
        }
    }

    fn sift(&mut self, handle: usize) {
        let i = self.positions[handle];
        self.sift_up(i);
        let i = self.positions[handle];
        self.sift_down(i);
    }
}

/// A thread-safe indexed min-heap keyed on a `u32` priority.
///
/// Matches the coarse-grained-lock-per-component style used throughout the
/// cache: the heap owns its own mutex rather than relying on a caller to
/// hold one.
pub struct IndexedMinHeap<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> Default for IndexedMinHeap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IndexedMinHeap<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                arr: Vec::new(),
                positions: Vec::new(),
                free_handles: Vec::new(),
            }),
        }
    }

    /// Insert `data` with the given priority, returning a handle that stays
    /// valid until the entry is extracted.
    pub fn insert(&self, data: T, priority: u32) -> HeapHandle {
        let mut inner = self.inner.lock().unwrap();
        let handle = match inner.free_handles.pop() {
            Some(h) => h,
            None => {
                inner.positions.push(EXTRACTED);
                inner.positions.len() - 1
            }
        };
        let idx = inner.arr.len();
        inner.arr.push(Slot {
            priority,
            handle,
            data,
        });
        inner.positions[handle] = idx;
        inner.sift_up(idx);
        HeapHandle(handle)
    }

    /// Update the priority of the entry behind `handle`, re-establishing
    /// the heap invariant. No-op if the entry has already been extracted.
    pub fn update(&self, handle: HeapHandle, priority: u32) {
        let mut inner = self.inner.lock().unwrap();
        let idx = inner.positions[handle.0];
        if idx == EXTRACTED {
            return;
        }
        inner.arr[idx].priority = priority;
        inner.sift(handle.0);
    }

    /// Pop the minimum-priority entry, if any.
    pub fn extract_min(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        if inner.arr.is_empty() {
            return None;
        }
        let last = inner.arr.len() - 1;
        inner.swap(0, last);
        let min = inner.arr.pop().unwrap();
        inner.positions[min.handle] = EXTRACTED;
        inner.free_handles.push(min.handle);
        if !inner.arr.is_empty() {
            inner.sift_down(0);
        }
        Some(min.data)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().arr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
