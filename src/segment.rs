//! Segment file.
//!
//! Wraps one open `FileHandle` with the size cache and outstanding-read
//! counter the handle cache needs to decide what may be evicted.
//!
//! The crate has no async executor; `read` and `read_sync` are therefore
//! the same code path. Both are kept so call sites can name the one they
//! mean — tree traversal under a read lock uses `read_sync`, keeping the
//! two distinct at the API boundary even when they share an implementation.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Result;
use crate::fs::FileHandle;

/// An open segment file plus its read-refcount.
pub struct SegmentFile {
    index: u16,
    handle: Box<dyn FileHandle>,
    size: u64,
    reads: AtomicUsize,
}

/// RAII guard decrementing the read counter when a read completes or is
/// cancelled. Once the underlying FS read has been issued, the `reads`
/// counter must still be decremented when it completes.
struct ReadGuard<'a> {
    reads: &'a AtomicUsize,
}

impl<'a> ReadGuard<'a> {
    fn enter(reads: &'a AtomicUsize) -> Self {
        reads.fetch_add(1, Ordering::SeqCst);
        Self { reads }
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.reads.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SegmentFile {
    pub fn open(index: u16, mut handle: Box<dyn FileHandle>) -> Result<Self> {
        let size = handle.len()?;
        Ok(Self { index, handle, size, reads: AtomicUsize::new(0) })
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Outstanding read operations. Eviction is vetoed while this is > 0.
    pub fn outstanding_reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn read(&self, offset: u64, size: usize) -> Result<Vec<u8>> {
        let _guard = ReadGuard::enter(&self.reads);
        self.handle.read_at(offset, size)
    }

    /// Synchronous read path, used by tree traversal under a read lock so
    /// it need not interleave with a task scheduler.
    pub fn read_sync(&self, offset: u64, size: usize) -> Result<Vec<u8>> {
        self.read(offset, size)
    }

    /// Append `bytes`, returning the offset they were written at. Updates
    /// the cached size.
    pub fn write(&mut self, bytes: &[u8]) -> Result<u64> {
        let pos = self.handle.write(bytes)?;
        self.size = pos + bytes.len() as u64;
        Ok(pos)
    }

    pub fn sync(&mut self) -> Result<()> {
        self.handle.sync()
    }

    pub fn truncate(&mut self, new_size: u64) -> Result<()> {
        self.handle.truncate(new_size)?;
        self.size = new_size;
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.handle.close()
    }
}
