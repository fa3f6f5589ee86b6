//! Root cache.
//!
//! Maps a root digest (hex-encoded) to where that root's node lives on
//! disk. Holds pointers, not resolved subtrees — deeper loading is always
//! on-demand through `Store::read_node`. The map is intentionally
//! unbounded; a real LRU is a drop-in swap if a host ever needs the bound.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::node::NodePtr;

/// Where a cached root's node lives, or that it's the empty tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootEntry {
    Null,
    Node(NodePtr),
}

#[derive(Default)]
pub struct RootCache {
    map: Mutex<HashMap<String, RootEntry>>,
}

pub(crate) fn hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

impl RootCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, digest: &[u8], entry: RootEntry) {
        self.map.lock().unwrap().insert(hex(digest), entry);
    }

    pub fn get(&self, digest: &[u8]) -> Option<RootEntry> {
        self.map.lock().unwrap().get(&hex(digest)).copied()
    }

    pub fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_by_digest() {
        let cache = RootCache::new();
        let digest = vec![1, 2, 3, 4];
        cache.insert(&digest, RootEntry::Node(NodePtr { segment: 1, offset: 64 }));
        assert_eq!(cache.get(&digest), Some(RootEntry::Node(NodePtr { segment: 1, offset: 64 })));
    }

    #[test]
    fn unknown_digest_misses() {
        let cache = RootCache::new();
        assert_eq!(cache.get(&[9, 9, 9]), None);
    }

    #[test]
    fn null_entry_is_distinct_from_a_node_entry() {
        let cache = RootCache::new();
        let zero = vec![0u8; 32];
        cache.insert(&zero, RootEntry::Null);
        assert_eq!(cache.get(&zero), Some(RootEntry::Null));
    }
}
