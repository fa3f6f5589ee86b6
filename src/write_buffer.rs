//! Write buffer.
//!
//! Growable staging area for one commit's worth of bytes. Tracks, for its
//! current unflushed region, `(current_segment, segment_offset_at_start,
//! bytes_written)` and splits its output across segment boundaries so that
//! a single node or value never straddles two segments.
//!
//! NOT Send+Sync — single-writer access is assumed, same discipline the
//! store's other mutable state uses.

const INITIAL_CAPACITY: usize = 8 * 1024;

/// Commits SHOULD be triggered once the buffer holds at least this many
/// unflushed bytes.
pub const FLUSH_THRESHOLD: u64 = 120 * 1024 * 1024;

/// A contiguous run of bytes destined for one segment.
pub struct Chunk {
    pub segment: u16,
    pub bytes: Vec<u8>,
}

pub struct WriteBuffer {
    max_file_size: u64,
    current_segment: u16,
    /// Running-total offset (since buffer creation) at which the current
    /// segment's buffered region begins.
    segment_offset_at_start: u64,
    /// Running total of bytes ever written to this buffer.
    bytes_written: u64,
    /// Running total as of the last `flush()`, used by `needs_flush()`.
    last_flush_mark: u64,
    /// Bytes accumulated for `current_segment` since `segment_offset_at_start`.
    buf: Vec<u8>,
    /// Chunks sealed by a rollover, pending the next `flush()`.
    chunks: Vec<Chunk>,
}

impl WriteBuffer {
    /// Start a fresh buffer appending at `(start_segment, start_offset)`.
    pub fn start(max_file_size: u64, start_segment: u16, start_offset: u64) -> Self {
        Self {
            max_file_size,
            current_segment: start_segment,
            segment_offset_at_start: start_offset,
            bytes_written: start_offset,
            last_flush_mark: start_offset,
            buf: Vec::with_capacity(INITIAL_CAPACITY),
            chunks: Vec::new(),
        }
    }

    /// The segment the next `write()` will land in, after any rollover this
    /// call to `expand()` triggers.
    pub fn current_segment(&self) -> u16 {
        self.current_segment
    }

    /// The offset within `current_segment()` the next `write()` will start
    /// at.
    pub fn current_offset(&self) -> u32 {
        (self.bytes_written - self.segment_offset_at_start) as u32
    }

    /// Ensure capacity for `n` more bytes, rolling over to a new segment
    /// first if writing `n` bytes at the current logical position would
    /// cross `max_file_size`.
    ///
    /// Correctness point: callers must re-read
    /// `current_segment()`/`current_offset()` AFTER calling `expand`, not
    /// before — a node written right at the boundary must be recorded at
    /// `(new_segment, 0)`, not `(old_segment, max_file_size)`.
    pub fn expand(&mut self, n: usize) {
        let local = self.bytes_written - self.segment_offset_at_start;
        if local + n as u64 > self.max_file_size {
            let from = self.current_segment;
            self.seal_chunk();
            self.current_segment += 1;
            self.segment_offset_at_start = self.bytes_written;
            tracing::debug!(from, to = self.current_segment, "write buffer rolled over to a new segment");
        }
        self.reserve(n);
    }

    fn reserve(&mut self, additional: usize) {
        let needed = self.buf.len() + additional;
        if self.buf.capacity() < needed {
            let mut cap = self.buf.capacity().max(INITIAL_CAPACITY);
            while cap < needed {
                cap *= 2;
            }
            self.buf.reserve(cap - self.buf.len());
        }
    }

    fn seal_chunk(&mut self) {
        let bytes = std::mem::take(&mut self.buf);
        if !bytes.is_empty() {
            self.chunks.push(Chunk { segment: self.current_segment, bytes });
        }
    }

    /// Append raw bytes, returning the offset within `current_segment()`
    /// they start at. Callers that must not straddle a segment boundary
    /// call `expand(bytes.len())` first.
    pub fn write(&mut self, bytes: &[u8]) -> u32 {
        let pos = self.current_offset();
        self.buf.extend_from_slice(bytes);
        self.bytes_written += bytes.len() as u64;
        pos
    }

    /// Append `n` zero bytes.
    pub fn pad(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        self.expand(n);
        let zeros = vec![0u8; n];
        self.write(&zeros);
    }

    /// True once at least `FLUSH_THRESHOLD` bytes have been written since
    /// the last `flush()`.
    pub fn needs_flush(&self) -> bool {
        self.bytes_written - self.last_flush_mark >= FLUSH_THRESHOLD
    }

    /// Seal the current chunk and return every chunk accumulated since the
    /// last `flush()`, in order, for the caller to append to real segment
    /// files.
    pub fn flush(&mut self) -> Vec<Chunk> {
        self.seal_chunk();
        self.last_flush_mark = self.bytes_written;
        std::mem::take(&mut self.chunks)
    }
}
