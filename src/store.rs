//! Store orchestration.
//!
//! Ties the write buffer, handle cache, node codec and meta recovery
//! together behind an `open → (write|commit)* → close` lifecycle. All
//! public operations besides `open`/`destroy` require the store to be
//! `Open`; everything else is rejected with `StoreClosed`.
//!
//! State is held behind `Mutex`es rather than `&mut self` so the store can
//! be shared across readers the way the handle cache and write buffer
//! already assume: a single writer, many readers, and no serialization of
//! the writer path beyond what each field's own lock provides.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::error::{Result, StoreError};
use crate::fs::FsCapability;
use crate::handle_cache::HandleCache;
use crate::hash::HashCapability;
use crate::meta::{Meta, META_SIZE};
use crate::node::{self, Node, NodePtr, ValuePtr};
use crate::options::StoreOptions;
use crate::root_cache::{hex, RootCache, RootEntry};
use crate::segment::SegmentFile;
use crate::write_buffer::WriteBuffer;

/// Lifecycle state. `standalone` is a fixed
/// property of `StoreOptions`, not a further state split, so it is not
/// folded into this enum — see DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Opening,
    Open,
    Committing,
    Closing,
}

#[derive(Debug, Clone)]
struct RootState {
    ptr: Option<NodePtr>,
    hash: Vec<u8>,
}

pub struct Store {
    dir: PathBuf,
    fs: Arc<dyn FsCapability>,
    hasher: Arc<dyn HashCapability>,
    key_bytes: usize,
    options: StoreOptions,

    state: Mutex<State>,
    cache: HandleCache,
    current_index: Mutex<u16>,
    write_buffer: Mutex<WriteBuffer>,
    last_meta: Mutex<Option<NodePtr>>,
    root: Mutex<RootState>,
    root_cache: RootCache,
    /// Serializes `get_history`'s read-then-walk of `last_meta`.
    read_lock: Mutex<()>,
}

fn parse_segment_name(name: &str) -> Option<u32> {
    if name.len() == 10 && name.bytes().all(|b| b.is_ascii_digit()) {
        name.parse::<u32>().ok()
    } else {
        None
    }
}

impl Store {
    pub fn new(
        dir: PathBuf,
        fs: Arc<dyn FsCapability>,
        hasher: Arc<dyn HashCapability>,
        key_bytes: usize,
        options: StoreOptions,
    ) -> Self {
        let zero = hasher.zero_digest();
        Self {
            dir,
            fs,
            hasher,
            key_bytes,
            options,
            state: Mutex::new(State::Closed),
            cache: HandleCache::new(options.max_open_files),
            current_index: Mutex::new(1),
            write_buffer: Mutex::new(WriteBuffer::start(options.max_file_size, 1, 0)),
            last_meta: Mutex::new(None),
            root: Mutex::new(RootState { ptr: None, hash: zero }),
            root_cache: RootCache::new(),
            read_lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> State {
        *self.state.lock().unwrap()
    }

    fn segment_path(&self, index: u16) -> PathBuf {
        self.dir.join(format!("{index:010}"))
    }

    fn require_open(&self) -> Result<()> {
        if !matches!(*self.state.lock().unwrap(), State::Open) {
            return Err(StoreError::StoreClosed);
        }
        Ok(())
    }

    fn validate_index(&self, segment: u16) -> Result<()> {
        let current = *self.current_index.lock().unwrap();
        if segment == 0 || segment as u32 > current as u32 + 1 {
            return Err(StoreError::InvalidFileIndex(segment as u32));
        }
        Ok(())
    }

    fn bump_current_index(&self, segment: u16) {
        let mut current = self.current_index.lock().unwrap();
        if segment > *current {
            *current = segment;
        }
    }

    fn get_segment(&self, index: u16) -> Result<Arc<Mutex<SegmentFile>>> {
        let current = *self.current_index.lock().unwrap();
        let fs = self.fs.clone();
        let path = self.segment_path(index);
        self.cache.get_or_open(index, current, move || {
            let handle = fs.open(&path)?;
            SegmentFile::open(index, handle)
        })
    }

    fn read_node_inner(&self, segment: u16, offset: u32) -> Result<Node> {
        self.validate_index(segment)?;
        let size = node::node_size(self.hasher.digest_size());
        let seg_arc = self.get_segment(segment)?;
        let bytes = {
            let seg = seg_arc.lock().unwrap();
            seg.read(offset as u64, size)?
        };
        node::decode(&bytes, segment, offset, self.hasher.digest_size(), self.key_bytes, &*self.hasher)
    }

    // ── lifecycle ────────────────────────────────────────────────────

    /// Opens the store, recovering from the prefix directory's segments
    ///. Reopening an already-open store is `StoreOpen`.
    pub fn open(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if !matches!(*state, State::Closed) {
                return Err(StoreError::StoreOpen);
            }
            *state = State::Opening;
        }
        match self.open_inner() {
            Ok(()) => {
                *self.state.lock().unwrap() = State::Open;
                Ok(())
            }
            Err(err) => {
                *self.state.lock().unwrap() = State::Closed;
                Err(err)
            }
        }
    }

    /// Starts the store at `(start_segment, 0)`, creating that segment's
    /// file on disk even though it holds no nodes yet: a freshly opened
    /// store still owns one zero-length segment.
    fn reset_to_fresh(&self, start_segment: u16) -> Result<()> {
        let path = self.segment_path(start_segment);
        let handle = self.fs.open(&path)?;
        let segment = SegmentFile::open(start_segment, handle)?;
        self.cache.insert(start_segment, segment);
        *self.current_index.lock().unwrap() = start_segment;
        *self.last_meta.lock().unwrap() = None;
        *self.root.lock().unwrap() = RootState { ptr: None, hash: self.hasher.zero_digest() };
        *self.write_buffer.lock().unwrap() = WriteBuffer::start(self.options.max_file_size, start_segment, 0);
        Ok(())
    }

    fn open_inner(&self) -> Result<()> {
        self.fs.mkdirp(&self.dir, self.options.dir_mode)?;
        let names = self.fs.readdir(&self.dir)?;
        let mut indices: Vec<u32> = names.iter().filter_map(|n| parse_segment_name(n)).collect();
        indices.sort_unstable();

        for (i, &idx) in indices.iter().enumerate() {
            let expected = (i + 1) as u32;
            if idx != expected {
                return Err(StoreError::MissingTreeFiles(*indices.last().unwrap(), expected));
            }
        }

        if indices.is_empty() {
            return self.reset_to_fresh(1);
        }

        let highest = *indices.last().unwrap() as u16;

        if !self.options.standalone {
            let path = self.segment_path(highest);
            let handle = self.fs.open(&path)?;
            let size = handle.len()?;
            let segment = SegmentFile::open(highest, handle)?;
            self.cache.insert(highest, segment);
            *self.current_index.lock().unwrap() = highest;
            *self.last_meta.lock().unwrap() = None;
            *self.root.lock().unwrap() = RootState { ptr: None, hash: self.hasher.zero_digest() };
            *self.write_buffer.lock().unwrap() = WriteBuffer::start(self.options.max_file_size, highest, size);
            return Ok(());
        }

        self.recover_standalone(highest)
    }

    fn recover_standalone(&self, highest: u16) -> Result<()> {
        let slab = crate::meta::slab_size(self.options.read_buffer);
        let mut candidate = highest;
        loop {
            if candidate == 0 {
                return self.reset_to_fresh(1);
            }

            let path = self.segment_path(candidate);
            let mut handle = self.fs.open(&path)?;
            let size = handle.len()?;

            match crate::meta::scan_segment_for_meta(handle.as_ref(), size, slab, candidate, &*self.hasher)? {
                Some((meta, offset)) => {
                    let end = offset as u64 + META_SIZE as u64;
                    if size > end {
                        tracing::warn!(
                            segment = candidate,
                            discarded_bytes = size - end,
                            "torn tail past last valid meta; truncating"
                        );
                    }
                    handle.truncate(end)?;
                    let segment = SegmentFile::open(candidate, handle)?;
                    self.cache.insert(candidate, segment);
                    *self.current_index.lock().unwrap() = candidate;
                    *self.last_meta.lock().unwrap() = Some(NodePtr { segment: candidate, offset });
                    *self.write_buffer.lock().unwrap() = WriteBuffer::start(
                        self.options.max_file_size,
                        candidate,
                        offset as u64 + META_SIZE as u64,
                    );

                    let root_state = match meta.root {
                        None => RootState { ptr: None, hash: self.hasher.zero_digest() },
                        Some(root_ptr) => {
                            let node = self.read_node_inner(root_ptr.segment, root_ptr.offset)?;
                            RootState { ptr: Some(root_ptr), hash: node.hash(&*self.hasher) }
                        }
                    };
                    self.root_cache.insert(
                        &root_state.hash,
                        root_state.ptr.map(RootEntry::Node).unwrap_or(RootEntry::Null),
                    );
                    *self.root.lock().unwrap() = root_state;
                    return Ok(());
                }
                None => {
                    drop(handle);
                    tracing::warn!(segment = candidate, "no valid meta in segment; unlinking and retrying predecessor");
                    self.fs.unlink(&path)?;
                    candidate -= 1;
                }
            }
        }
    }

    /// Drops in-memory state and closes every open segment. Never flushes:
    /// an uncommitted tail staged in the write buffer is lost.
    pub fn close(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if !matches!(*state, State::Open) {
                return Err(StoreError::StoreClosed);
            }
            *state = State::Closing;
        }
        self.cache.close_all()?;
        *self.last_meta.lock().unwrap() = None;
        *self.root.lock().unwrap() = RootState { ptr: None, hash: self.hasher.zero_digest() };
        *self.state.lock().unwrap() = State::Closed;
        Ok(())
    }

    /// Unlinks every segment then removes the prefix directory. Falls back
    /// to a randomized rename if the directory cannot be removed.
    /// Only valid while closed.
    pub fn destroy(&self) -> Result<()> {
        if !matches!(*self.state.lock().unwrap(), State::Closed) {
            return Err(StoreError::StoreOpen);
        }
        let names = self.fs.readdir(&self.dir)?;
        for name in names {
            self.fs.unlink(&self.dir.join(name))?;
        }
        if self.fs.rmdir(&self.dir).is_err() {
            use rand::Rng;
            let suffix: u32 = rand::rng().random();
            let label = self.dir.file_name().and_then(|n| n.to_str()).unwrap_or("store");
            let sibling = self.dir.with_file_name(format!("{label}-removed-{suffix:08x}"));
            tracing::warn!(
                dir = %self.dir.display(),
                to = %sibling.display(),
                "directory not empty on destroy; renaming aside instead of removing"
            );
            self.fs.rename(&self.dir, &sibling)?;
        }
        Ok(())
    }

    // ── reads ────────────────────────────────────────────────────────

    pub fn read_node(&self, segment: u16, offset: u32) -> Result<Node> {
        self.require_open()?;
        self.read_node_inner(segment, offset)
    }

    /// Synchronous read path for tree traversal under a read lock. Shares
    /// its implementation with `read_node` since this crate has no task
    /// scheduler for an async path to diverge from.
    pub fn read_node_sync(&self, segment: u16, offset: u32) -> Result<Node> {
        self.read_node(segment, offset)
    }

    pub fn read(&self, segment: u16, offset: u32, size: usize) -> Result<Vec<u8>> {
        self.require_open()?;
        self.validate_index(segment)?;
        let seg_arc = self.get_segment(segment)?;
        let seg = seg_arc.lock().unwrap();
        seg.read(offset as u64, size)
    }

    // ── writes ───────────────────────────────────────────────────────

    /// Stages `node` in the write buffer and assigns it a disk position.
    /// `node` must not already have one.
    pub fn write_node(&self, node: &mut Node) -> Result<NodePtr> {
        self.require_open()?;
        if node.pos().is_some() {
            return Err(StoreError::AssertionError("write_node called on a node with a pre-assigned position".into()));
        }
        let bytes = node::encode(node, self.hasher.digest_size(), self.key_bytes, &*self.hasher);
        let ptr = {
            let mut wb = self.write_buffer.lock().unwrap();
            wb.expand(bytes.len());
            let ptr = NodePtr { segment: wb.current_segment(), offset: wb.current_offset() };
            wb.write(&bytes);
            ptr
        };
        self.bump_current_index(ptr.segment);
        node.set_pos(ptr);
        Ok(ptr)
    }

    /// Stages `value` in the write buffer and sets `leaf`'s value pointer.
    pub fn write_value(&self, leaf: &mut Node, value: &[u8]) -> Result<ValuePtr> {
        self.require_open()?;
        if !matches!(leaf, Node::Leaf { .. }) {
            return Err(StoreError::AssertionError("write_value called on a non-Leaf node".into()));
        }
        let ptr = {
            let mut wb = self.write_buffer.lock().unwrap();
            wb.expand(value.len());
            let ptr = ValuePtr { segment: wb.current_segment(), offset: wb.current_offset(), size: value.len() as u32 };
            wb.write(value);
            ptr
        };
        self.bump_current_index(ptr.segment);
        leaf.set_value_ptr(ptr);
        Ok(ptr)
    }

    /// Pads a full `node_size` block of zeros, returning its position.
    pub fn write_null(&self) -> Result<NodePtr> {
        self.require_open()?;
        let size = node::node_size(self.hasher.digest_size());
        let ptr = {
            let mut wb = self.write_buffer.lock().unwrap();
            wb.expand(size);
            let ptr = NodePtr { segment: wb.current_segment(), offset: wb.current_offset() };
            wb.write(&vec![0u8; size]);
            ptr
        };
        self.bump_current_index(ptr.segment);
        Ok(ptr)
    }

    /// True once the write buffer holds enough unflushed bytes that a
    /// commit should be triggered.
    pub fn needs_flush(&self) -> bool {
        self.write_buffer.lock().unwrap().needs_flush()
    }

    // ── commit ───────────────────────────────────────────────────────

    /// Commits `root` (already written via `write_node`, or `Node::Null`
    /// for the empty tree) as the new live root. In standalone mode this
    /// emits a meta record and updates the root cache/history chain; in
    /// embedded mode it only flushes and fsyncs.
    pub fn commit(&self, root: &Node) -> Result<()> {
        self.require_open()?;
        *self.state.lock().unwrap() = State::Committing;
        let result = self.commit_inner(root);
        *self.state.lock().unwrap() = State::Open;
        result
    }

    fn commit_inner(&self, root: &Node) -> Result<()> {
        let hash = root.hash(&*self.hasher);
        let ptr = root.pos();

        let (chunks, last_segment, meta_ptr) = {
            let mut wb = self.write_buffer.lock().unwrap();
            let mut meta_ptr = None;

            if self.options.standalone {
                let local = wb.current_offset() as usize;
                let rem = local % META_SIZE;
                if rem != 0 {
                    let pad_needed = META_SIZE - rem;
                    wb.expand(pad_needed);
                    // A rollover triggered by expand already lands on offset
                    // 0, itself meta-aligned; only write padding if it didn't.
                    if wb.current_offset() != 0 {
                        wb.write(&vec![0u8; pad_needed]);
                    }
                }

                let prev_meta = *self.last_meta.lock().unwrap();
                let meta = Meta { prev_meta, root: ptr };
                let meta_bytes = meta.encode(&*self.hasher);
                wb.expand(META_SIZE);
                let segment = wb.current_segment();
                let offset = wb.current_offset();
                wb.write(&meta_bytes);
                meta_ptr = Some(NodePtr { segment, offset });
            }

            let last_segment = wb.current_segment();
            let chunks = wb.flush();
            (chunks, last_segment, meta_ptr)
        };

        self.bump_current_index(last_segment);
        for chunk in &chunks {
            let seg_arc = self.get_segment(chunk.segment)?;
            let mut seg = seg_arc.lock().unwrap();
            seg.write(&chunk.bytes)?;
        }
        // Every segment touched by this commit's chunks must be durable
        // before the meta (written into `last_segment`) is treated as
        // canonical, not just the segment the meta itself landed in.
        let mut synced = Vec::new();
        for chunk in &chunks {
            if synced.contains(&chunk.segment) {
                continue;
            }
            synced.push(chunk.segment);
            let seg_arc = self.get_segment(chunk.segment)?;
            let mut seg = seg_arc.lock().unwrap();
            seg.sync()?;
        }
        if !synced.contains(&last_segment) {
            let seg_arc = self.get_segment(last_segment)?;
            let mut seg = seg_arc.lock().unwrap();
            seg.sync()?;
        }

        if self.options.standalone {
            *self.last_meta.lock().unwrap() = meta_ptr;
            self.root_cache.insert(&hash, ptr.map(RootEntry::Node).unwrap_or(RootEntry::Null));
        }
        *self.root.lock().unwrap() = RootState { ptr, hash: hash.clone() };
        tracing::debug!(segment = last_segment, root = %hex(&hash), "commit applied new root");
        Ok(())
    }

    // ── root / history ───────────────────────────────────────────────

    pub fn get_root_hash(&self) -> Result<Vec<u8>> {
        self.require_open()?;
        Ok(self.root.lock().unwrap().hash.clone())
    }

    pub fn get_root(&self) -> Result<Node> {
        self.require_open()?;
        let ptr = self.root.lock().unwrap().ptr;
        match ptr {
            None => Ok(Node::Null),
            Some(ptr) => self.read_node_inner(ptr.segment, ptr.offset),
        }
    }

    /// Walks the backward meta chain starting at `last_meta` until a meta
    /// whose root digest equals `root_hash` is found. The zero digest
    /// short-circuits to `Node::Null` without touching the chain.
    pub fn get_history(&self, root_hash: &[u8]) -> Result<Node> {
        self.require_open()?;
        if root_hash == self.hasher.zero_digest().as_slice() {
            return Ok(Node::Null);
        }

        let _read_guard = self.read_lock.lock().unwrap();

        if let Some(entry) = self.root_cache.get(root_hash) {
            return match entry {
                RootEntry::Null => Ok(Node::Null),
                RootEntry::Node(ptr) => self.read_node_inner(ptr.segment, ptr.offset),
            };
        }

        let mut cursor = *self.last_meta.lock().unwrap();
        loop {
            let meta_ptr = cursor.ok_or_else(|| StoreError::MissingNode(hex(root_hash)))?;
            let bytes = self.read(meta_ptr.segment, meta_ptr.offset, META_SIZE)?;
            let meta = Meta::decode(&bytes, meta_ptr.segment, meta_ptr.offset, &*self.hasher)?;

            let (candidate_hash, resolved) = match meta.root {
                None => (self.hasher.zero_digest(), None),
                Some(root_ptr) => {
                    let node = self.read_node_inner(root_ptr.segment, root_ptr.offset)?;
                    let h = node.hash(&*self.hasher);
                    (h, Some(node))
                }
            };

            if candidate_hash == root_hash {
                self.root_cache.insert(root_hash, meta.root.map(RootEntry::Node).unwrap_or(RootEntry::Null));
                return Ok(resolved.unwrap_or(Node::Null));
            }
            cursor = meta.prev_meta;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;
    use crate::hash::Blake3Hasher;
    use std::path::Path;

    const KEY_BYTES: usize = 4;

    fn new_store(dir: &str, fs: InMemoryFs, options: StoreOptions) -> Store {
        Store::new(PathBuf::from(dir), Arc::new(fs), Arc::new(Blake3Hasher), KEY_BYTES, options)
    }

    fn leaf(hasher: &Blake3Hasher, tag: u8) -> Node {
        Node::Leaf {
            key: vec![tag; KEY_BYTES],
            value_ptr: ValuePtr::default(),
            leaf_digest: hasher.digest(&[tag]),
            pos: None,
        }
    }

    #[test]
    fn open_on_fresh_directory_starts_at_segment_one_with_null_root() {
        let store = new_store("/db", InMemoryFs::new(), StoreOptions::default());
        store.open().unwrap();
        assert_eq!(store.get_root_hash().unwrap(), Blake3Hasher.zero_digest());
        assert_eq!(store.get_root().unwrap(), Node::Null);
    }

    #[test]
    fn reopening_an_open_store_is_an_error() {
        let store = new_store("/db", InMemoryFs::new(), StoreOptions::default());
        store.open().unwrap();
        let err = store.open().unwrap_err();
        assert!(matches!(err, StoreError::StoreOpen));
    }

    #[test]
    fn operations_before_open_are_store_closed() {
        let store = new_store("/db", InMemoryFs::new(), StoreOptions::default());
        assert!(matches!(store.get_root_hash().unwrap_err(), StoreError::StoreClosed));
        assert!(matches!(store.read_node(1, 0).unwrap_err(), StoreError::StoreClosed));
    }

    #[test]
    fn write_node_assigns_position_and_round_trips() {
        let store = new_store("/db", InMemoryFs::new(), StoreOptions::default());
        store.open().unwrap();
        let mut node = Node::Internal { left: crate::node::Child::Null, right: crate::node::Child::Null, hash: None, pos: None };
        let ptr = store.write_node(&mut node).unwrap();
        assert_eq!(node.pos(), Some(ptr));
        // read_node only sees flushed bytes; a node is only durable once committed.
        store.commit(&node).unwrap();

        let decoded = store.read_node(ptr.segment, ptr.offset).unwrap();
        let encoded_original = node::encode(&node, Blake3Hasher.digest_size(), KEY_BYTES, &Blake3Hasher);
        let encoded_roundtrip = node::encode(&decoded, Blake3Hasher.digest_size(), KEY_BYTES, &Blake3Hasher);
        assert_eq!(encoded_original, encoded_roundtrip);
    }

    #[test]
    fn write_node_rejects_a_node_with_preassigned_position() {
        let store = new_store("/db", InMemoryFs::new(), StoreOptions::default());
        store.open().unwrap();
        let mut node = Node::Internal {
            left: crate::node::Child::Null,
            right: crate::node::Child::Null,
            hash: None,
            pos: Some(NodePtr { segment: 9, offset: 9 }),
        };
        let err = store.write_node(&mut node).unwrap_err();
        assert!(matches!(err, StoreError::AssertionError(_)));
    }

    #[test]
    fn commit_then_reopen_recovers_the_same_root() {
        let fs = InMemoryFs::new();
        let hasher = Blake3Hasher;
        let store = new_store("/db", fs.clone(), StoreOptions::default());
        store.open().unwrap();

        let mut root = leaf(&hasher, 1);
        store.write_value(&mut root, b"hello").unwrap();
        store.write_node(&mut root).unwrap();
        store.commit(&root).unwrap();
        let committed_hash = store.get_root_hash().unwrap();
        store.close().unwrap();

        let reopened = new_store("/db", fs, StoreOptions::default());
        reopened.open().unwrap();
        assert_eq!(reopened.get_root_hash().unwrap(), committed_hash);
    }

    #[test]
    fn close_then_read_is_store_closed() {
        let store = new_store("/db", InMemoryFs::new(), StoreOptions::default());
        store.open().unwrap();
        store.close().unwrap();
        assert!(matches!(store.get_root_hash().unwrap_err(), StoreError::StoreClosed));
    }

    #[test]
    fn destroy_requires_closed_store() {
        let store = new_store("/db", InMemoryFs::new(), StoreOptions::default());
        store.open().unwrap();
        assert!(matches!(store.destroy().unwrap_err(), StoreError::StoreOpen));
        store.close().unwrap();
        store.destroy().unwrap();
    }

    #[test]
    fn get_history_for_zero_digest_returns_null_without_touching_the_chain() {
        let store = new_store("/db", InMemoryFs::new(), StoreOptions::default());
        store.open().unwrap();
        let zero = Blake3Hasher.zero_digest();
        assert_eq!(store.get_history(&zero).unwrap(), Node::Null);
    }

    #[test]
    fn get_history_for_unknown_hash_is_missing_node() {
        let store = new_store("/db", InMemoryFs::new(), StoreOptions::default());
        store.open().unwrap();
        let err = store.get_history(&[0xAB; 32]).unwrap_err();
        assert!(matches!(err, StoreError::MissingNode(_)));
    }

    #[test]
    fn get_history_finds_every_prior_commit_by_root_hash() {
        let fs = InMemoryFs::new();
        let hasher = Blake3Hasher;
        let store = new_store("/db", fs, StoreOptions::default());
        store.open().unwrap();

        let mut roots = Vec::new();
        for tag in 0..3u8 {
            let mut root = leaf(&hasher, tag);
            store.write_value(&mut root, &[tag; 3]).unwrap();
            store.write_node(&mut root).unwrap();
            store.commit(&root).unwrap();
            roots.push(root.hash(&hasher));
        }

        for hash in &roots {
            let found = store.get_history(hash).unwrap();
            assert_eq!(&found.hash(&hasher), hash);
        }
    }

    #[test]
    fn rollover_places_the_third_node_at_offset_zero_of_segment_two() {
        let d = Blake3Hasher.digest_size();
        let slot = node::node_size(d) as u64;
        // Exactly two node slots fit per segment; META_SIZE padding is
        // irrelevant here since commit only happens after all three writes.
        let options = StoreOptions { max_file_size: slot * 2, standalone: false, ..StoreOptions::default() };
        let store = new_store("/db", InMemoryFs::new(), options);
        store.open().unwrap();

        let mut n1 = Node::Internal { left: crate::node::Child::Null, right: crate::node::Child::Null, hash: None, pos: None };
        let mut n2 = Node::Internal { left: crate::node::Child::Null, right: crate::node::Child::Null, hash: None, pos: None };
        let mut n3 = Node::Internal { left: crate::node::Child::Null, right: crate::node::Child::Null, hash: None, pos: None };
        let p1 = store.write_node(&mut n1).unwrap();
        let p2 = store.write_node(&mut n2).unwrap();
        let p3 = store.write_node(&mut n3).unwrap();

        assert_eq!((p1.segment, p1.offset), (1, 0));
        assert_eq!((p2.segment, p2.offset), (1, slot as u32));
        assert_eq!((p3.segment, p3.offset), (2, 0));
    }

    #[test]
    fn torn_tail_recovery_truncates_back_to_the_prior_meta() {
        let fs = InMemoryFs::new();
        let hasher = Blake3Hasher;
        let store = new_store("/db", fs.clone(), StoreOptions::default());
        store.open().unwrap();

        let mut root = leaf(&hasher, 7);
        store.write_value(&mut root, b"hello").unwrap();
        store.write_node(&mut root).unwrap();
        store.commit(&root).unwrap();
        let good_hash = store.get_root_hash().unwrap();
        store.close().unwrap();

        fs.append_junk(Path::new("/db/0000000001"), &[0xAB; 17]);

        let reopened = new_store("/db", fs, StoreOptions::default());
        reopened.open().unwrap();
        assert_eq!(reopened.get_root_hash().unwrap(), good_hash);
    }
}
