//! Handle cache.
//!
//! A sparse, index-addressed collection of open segment handles bounded by
//! `MAX_OPEN_FILES`. Segment indices are small dense integers, so the
//! backing store is a `Vec<Option<_>>` rather than a `HashMap`.
//!
//! Opening a segment is serialized per-index by a keyed lock so
//! two concurrent openers produce one handle; eviction picks uniformly at
//! random among cached segments that are not the current writable segment
//! and have no outstanding reads — random eviction avoids adversarial
//! pinning, it isn't just an implementation accident.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::Rng;

use crate::error::Result;
use crate::segment::SegmentFile;

pub const MAX_OPEN_FILES: usize = 32;

pub struct HandleCache {
    max_open: usize,
    slots: Mutex<Vec<Option<Arc<Mutex<SegmentFile>>>>>,
    open_locks: Mutex<HashMap<u16, Arc<Mutex<()>>>>,
}

impl HandleCache {
    pub fn new(max_open: usize) -> Self {
        Self {
            max_open,
            slots: Mutex::new(Vec::new()),
            open_locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, index: u16) -> Arc<Mutex<()>> {
        let mut locks = self.open_locks.lock().unwrap();
        locks.entry(index).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    fn peek(&self, index: u16) -> Option<Arc<Mutex<SegmentFile>>> {
        let slots = self.slots.lock().unwrap();
        slots.get(index as usize).and_then(|s| s.clone())
    }

    /// Fetch the cached handle for `index`, opening it via `opener` if
    /// absent. `current_index` names the writable segment, which is never
    /// eviction-eligible.
    pub fn get_or_open<F>(&self, index: u16, current_index: u16, opener: F) -> Result<Arc<Mutex<SegmentFile>>>
    where
        F: FnOnce() -> Result<SegmentFile>,
    {
        if let Some(existing) = self.peek(index) {
            return Ok(existing);
        }

        let per_index_lock = self.lock_for(index);
        let _guard = per_index_lock.lock().unwrap();

        // Another task may have opened it while we waited for the lock.
        if let Some(existing) = self.peek(index) {
            return Ok(existing);
        }

        self.maybe_evict(current_index);

        let segment = opener()?;
        let arc = Arc::new(Mutex::new(segment));
        {
            let mut slots = self.slots.lock().unwrap();
            if slots.len() <= index as usize {
                slots.resize(index as usize + 1, None);
            }
            assert!(
                slots[index as usize].is_none(),
                "handle cache invariant violated: index {index} opened twice under its lock"
            );
            slots[index as usize] = Some(arc.clone());
        }
        Ok(arc)
    }

    /// Insert a freshly created handle directly (used by the writer, which
    /// already owns the segment it just created rather than opening it
    /// through the cache).
    pub fn insert(&self, index: u16, segment: SegmentFile) -> Arc<Mutex<SegmentFile>> {
        let arc = Arc::new(Mutex::new(segment));
        let mut slots = self.slots.lock().unwrap();
        if slots.len() <= index as usize {
            slots.resize(index as usize + 1, None);
        }
        slots[index as usize] = Some(arc.clone());
        arc
    }

    fn maybe_evict(&self, current_index: u16) {
        let mut slots = self.slots.lock().unwrap();
        let open_count = slots.iter().filter(|s| s.is_some()).count();
        if open_count < self.max_open {
            return;
        }

        let candidates: Vec<u16> = slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                let handle = slot.as_ref()?;
                if i as u16 == current_index {
                    return None;
                }
                if handle.lock().unwrap().outstanding_reads() == 0 {
                    Some(i as u16)
                } else {
                    None
                }
            })
            .collect();

        if candidates.is_empty() {
            tracing::warn!(open_count, max_open = self.max_open, "no eviction candidate available; soft cap exceeded");
            return;
        }

        let pick = candidates[rand::rng().random_range(0..candidates.len())];
        if let Some(handle) = slots[pick as usize].take() {
            tracing::debug!(evicted = pick, open_count, max_open = self.max_open, "evicted segment handle");
            // The Arc may still be briefly referenced by a caller who
            // fetched it just before this lock was taken; closing through
            // the Mutex is safe either way since outstanding_reads() was 0.
            if let Ok(mut seg) = handle.lock() {
                let _ = seg.close();
            }
        }
    }

    /// Close and drop every cached handle, used by store close/destroy.
    pub fn close_all(&self) -> Result<()> {
        let mut slots = self.slots.lock().unwrap();
        for slot in slots.iter_mut() {
            if let Some(handle) = slot.take() {
                if let Ok(mut seg) = handle.lock() {
                    seg.close()?;
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
