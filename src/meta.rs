//! Meta record + recovery scan.
//!
//! A meta record is a 36-byte checkpoint: a magic-framed header naming the
//! committed root and the previous meta, authenticated by a checksum. This
//! module owns the record's encode/decode and the single-segment backward
//! scan; the multi-segment walk (open highest, retry predecessor, unlink on
//! total failure) lives in `store.rs` since it also drives directory
//! listing and segment lifecycle.

use crate::error::{Result, StoreError};
use crate::fs::FileHandle;
use crate::hash::HashCapability;
use crate::node::NodePtr;

pub const META_SIZE: usize = 36;
pub const META_MAGIC: u32 = 0x6d72_6b6c;

/// A checkpoint: the committed root plus a backward link to the previous
/// checkpoint. `None` encodes segment 0, i.e. "no such segment".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Meta {
    pub prev_meta: Option<NodePtr>,
    pub root: Option<NodePtr>,
}

impl Meta {
    /// Encode to exactly `META_SIZE` bytes: magic, prev-meta pointer,
    /// root pointer, then the first 20 bytes of `digest(header[0..16])`.
    pub fn encode(&self, hasher: &dyn HashCapability) -> [u8; META_SIZE] {
        let mut buf = [0u8; META_SIZE];
        buf[0..4].copy_from_slice(&META_MAGIC.to_le_bytes());
        let (ps, po) = ptr_fields(self.prev_meta);
        buf[4..6].copy_from_slice(&ps.to_le_bytes());
        buf[6..10].copy_from_slice(&po.to_le_bytes());
        let (rs, ro) = ptr_fields(self.root);
        buf[10..12].copy_from_slice(&rs.to_le_bytes());
        buf[12..16].copy_from_slice(&ro.to_le_bytes());
        let checksum = hasher.digest(&buf[0..16]);
        buf[16..36].copy_from_slice(&checksum[0..20]);
        buf
    }

    /// Decode exactly `META_SIZE` bytes read from `(segment, offset)`.
    /// `InvalidMagic`/`InvalidChecksum` are expected, recoverable failures
    /// during a backward scan — "not a meta here", not corruption.
    pub fn decode(bytes: &[u8], segment: u16, offset: u32, hasher: &dyn HashCapability) -> Result<Meta> {
        debug_assert_eq!(bytes.len(), META_SIZE);
        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if magic != META_MAGIC {
            return Err(StoreError::InvalidMagic(segment as u32, offset));
        }
        let checksum = hasher.digest(&bytes[0..16]);
        if checksum[0..20] != bytes[16..36] {
            return Err(StoreError::InvalidChecksum(segment as u32, offset));
        }
        let prev_meta_segment = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
        let prev_meta_offset = u32::from_le_bytes(bytes[6..10].try_into().unwrap());
        let root_segment = u16::from_le_bytes(bytes[10..12].try_into().unwrap());
        let root_offset = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        Ok(Meta {
            prev_meta: ptr_from_fields(prev_meta_segment, prev_meta_offset),
            root: ptr_from_fields(root_segment, root_offset),
        })
    }
}

fn ptr_fields(ptr: Option<NodePtr>) -> (u16, u32) {
    match ptr {
        Some(p) => (p.segment, p.offset),
        None => (0, 0),
    }
}

fn ptr_from_fields(segment: u16, offset: u32) -> Option<NodePtr> {
    if segment == 0 {
        None
    } else {
        Some(NodePtr { segment, offset })
    }
}

/// `⌊read_buffer / META_SIZE⌋ · META_SIZE`, at least one record.
pub fn slab_size(read_buffer: usize) -> usize {
    ((read_buffer / META_SIZE) * META_SIZE).max(META_SIZE)
}

/// Scan `handle` (whose current length is `size`) backward in `slab`-sized
/// windows, looking for the highest-offset valid meta. Within a window,
/// candidate offsets are walked high to low at `META_SIZE` alignment.
///
/// Because `slab` is always a multiple of `META_SIZE` (enforced by
/// `slab_size`), every window boundary falls on a `META_SIZE`-aligned
/// offset too, so no aligned candidate is ever split across a window edge.
pub fn scan_segment_for_meta(
    handle: &dyn FileHandle,
    size: u64,
    slab: usize,
    segment: u16,
    hasher: &dyn HashCapability,
) -> Result<Option<(Meta, u32)>> {
    if size < META_SIZE as u64 {
        return Ok(None);
    }
    let meta_size = META_SIZE as u64;
    let mut window_end = size;
    loop {
        let window_start = window_end.saturating_sub(slab as u64);
        let region = handle.read_at(window_start, (window_end - window_start) as usize)?;

        let mut candidate = (window_end / meta_size) * meta_size;
        if candidate + meta_size > window_end {
            if candidate < meta_size {
                if window_start == 0 {
                    return Ok(None);
                }
                window_end = window_start;
                continue;
            }
            candidate -= meta_size;
        }

        while candidate >= window_start {
            let rel = (candidate - window_start) as usize;
            let slice = &region[rel..rel + META_SIZE];
            if let Ok(meta) = Meta::decode(slice, segment, candidate as u32, hasher) {
                return Ok(Some((meta, candidate as u32)));
            }
            if candidate < meta_size {
                break;
            }
            candidate -= meta_size;
        }

        if window_start == 0 {
            return Ok(None);
        }
        window_end = window_start;
    }
}
