//! Node codec.
//!
//! Fixed-width encode/decode of the four node variants. `node_size` and
//! `leaf_size` are computed from the configured digest width and key width
//! so the layout stays bit-exact regardless of which `HashCapability` is
//! plugged in.

use crate::error::{Result, StoreError};

/// Tag byte for an `Internal` node.
pub const TAG_INTERNAL: u8 = 0x01;
/// Tag byte for a `Leaf` node.
pub const TAG_LEAF: u8 = 0x02;

/// `node_size = 1 + 2 * (D + 2 + 4)`.
pub fn node_size(digest_size: usize) -> usize {
    1 + 2 * (digest_size + 2 + 4)
}

/// `leaf_size = 1 + D + bits/8 + 2 + 4 + 4`.
pub fn leaf_size(digest_size: usize, key_bytes: usize) -> usize {
    1 + digest_size + key_bytes + 2 + 4 + 4
}

/// A pointer to a node persisted on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePtr {
    pub segment: u16,
    pub offset: u32,
}

/// The resolved or unresolved state of an `Internal` node's child.
#[derive(Debug, Clone, PartialEq)]
pub enum Child {
    /// The empty subtree.
    Null,
    /// An unresolved reference to a node persisted at `ptr`.
    Hash { digest: Vec<u8>, ptr: NodePtr },
    /// A node already loaded into memory.
    Resolved(Box<Node>),
}

impl Child {
    /// The digest of this child, regardless of resolution state.
    pub fn digest(&self, hasher: &dyn crate::hash::HashCapability) -> Vec<u8> {
        match self {
            Child::Null => hasher.zero_digest(),
            Child::Hash { digest, .. } => digest.clone(),
            Child::Resolved(node) => node.hash(hasher),
        }
    }
}

/// One of the four persisted node kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// The empty subtree. Hash is always the hash function's zero digest.
    Null,
    /// Two children, memoizing its own digest once computed.
    Internal {
        left: Child,
        right: Child,
        hash: Option<Vec<u8>>,
        /// Set once this node has been assigned a position on disk.
        pos: Option<NodePtr>,
    },
    /// A key, a pointer to its value payload, and a precomputed digest.
    Leaf {
        key: Vec<u8>,
        value_ptr: ValuePtr,
        leaf_digest: Vec<u8>,
        pos: Option<NodePtr>,
    },
    /// An unresolved reference to a node persisted at `ptr`.
    Hash { digest: Vec<u8>, ptr: NodePtr },
}

/// Pointer to a value payload in the value area of some segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValuePtr {
    pub segment: u16,
    pub offset: u32,
    pub size: u32,
}

impl Node {
    /// The node's own digest. For `Internal`, computes and memoizes it from
    /// its children on first call; for everything else it's already known.
    pub fn hash(&self, hasher: &dyn crate::hash::HashCapability) -> Vec<u8> {
        match self {
            Node::Null => hasher.zero_digest(),
            Node::Internal { left, right, hash, .. } => {
                if let Some(h) = hash {
                    h.clone()
                } else {
                    hasher.hash_internal(&left.digest(hasher), &right.digest(hasher))
                }
            }
            Node::Leaf { leaf_digest, .. } => leaf_digest.clone(),
            Node::Hash { digest, .. } => digest.clone(),
        }
    }

    /// The `(segment, offset)` this node was assigned, if any.
    pub fn pos(&self) -> Option<NodePtr> {
        match self {
            Node::Internal { pos, .. } => *pos,
            Node::Leaf { pos, .. } => *pos,
            Node::Hash { ptr, .. } => Some(*ptr),
            Node::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Null)
    }

    /// Assign this node's disk position. Nodes are immutable once assigned
    ///; callers must not call this twice on the same node.
    pub fn set_pos(&mut self, ptr: NodePtr) {
        match self {
            Node::Internal { pos, .. } | Node::Leaf { pos, .. } => {
                debug_assert!(pos.is_none(), "node position assigned twice");
                *pos = Some(ptr);
            }
            Node::Null | Node::Hash { .. } => {
                debug_assert!(false, "set_pos called on a Null or Hash node");
            }
        }
    }

    /// Set the value payload pointer on a `Leaf`. Panics on any other
    /// variant; callers only ever stage leaves through `write_value`.
    pub fn set_value_ptr(&mut self, ptr: ValuePtr) {
        match self {
            Node::Leaf { value_ptr, .. } => *value_ptr = ptr,
            _ => debug_assert!(false, "set_value_ptr called on a non-Leaf node"),
        }
    }
}

/// Encode `node` into exactly `node_size(digest_size)` bytes.
///
/// Only `Internal` and `Leaf` are ever persisted; `Null` and unresolved
/// `Hash` nodes have no encoding of their own (a `Null` child is encoded
/// inline as the zero digest inside its parent's `Internal` slot, and a
/// `Hash` node IS the encoding read back from disk, not something written
/// again).
pub fn encode(node: &Node, digest_size: usize, key_bytes: usize, hasher: &dyn crate::hash::HashCapability) -> Vec<u8> {
    let size = node_size(digest_size);
    let mut buf = vec![0u8; size];
    match node {
        Node::Internal { left, right, .. } => {
            buf[0] = TAG_INTERNAL;
            let mut off = 1;
            encode_child(left, hasher, &mut buf, &mut off, digest_size);
            encode_child(right, hasher, &mut buf, &mut off, digest_size);
        }
        Node::Leaf { key, value_ptr, leaf_digest, .. } => {
            buf[0] = TAG_LEAF;
            let mut off = 1;
            buf[off..off + digest_size].copy_from_slice(leaf_digest);
            off += digest_size;
            debug_assert_eq!(key.len(), key_bytes);
            buf[off..off + key_bytes].copy_from_slice(key);
            off += key_bytes;
            buf[off..off + 2].copy_from_slice(&value_ptr.segment.to_le_bytes());
            off += 2;
            buf[off..off + 4].copy_from_slice(&value_ptr.offset.to_le_bytes());
            off += 4;
            buf[off..off + 4].copy_from_slice(&value_ptr.size.to_le_bytes());
            // Remaining bytes stay zero, padding out to node_size.
        }
        Node::Null | Node::Hash { .. } => {
            // Not directly encodable; callers never pass these to encode().
        }
    }
    buf
}

fn encode_child(
    child: &Child,
    hasher: &dyn crate::hash::HashCapability,
    buf: &mut [u8],
    off: &mut usize,
    digest_size: usize,
) {
    match child {
        Child::Null => {
            buf[*off..*off + digest_size].copy_from_slice(&hasher.zero_digest());
            *off += digest_size + 2 + 4;
        }
        Child::Hash { digest, ptr } => {
            buf[*off..*off + digest_size].copy_from_slice(digest);
            *off += digest_size;
            buf[*off..*off + 2].copy_from_slice(&ptr.segment.to_le_bytes());
            *off += 2;
            buf[*off..*off + 4].copy_from_slice(&ptr.offset.to_le_bytes());
            *off += 4;
        }
        Child::Resolved(node) => {
            let digest = node.hash(hasher);
            let ptr = node.pos().unwrap_or(NodePtr { segment: 0, offset: 0 });
            buf[*off..*off + digest_size].copy_from_slice(&digest);
            *off += digest_size;
            buf[*off..*off + 2].copy_from_slice(&ptr.segment.to_le_bytes());
            *off += 2;
            buf[*off..*off + 4].copy_from_slice(&ptr.offset.to_le_bytes());
            *off += 4;
        }
    }
}

/// Decode a `node_size(digest_size)`-byte block read from `(segment,
/// offset)`. Returns `DatabaseCorruption` if the tag byte is neither
/// `INTERNAL` nor `LEAF`.
pub fn decode(
    bytes: &[u8],
    segment: u16,
    offset: u32,
    digest_size: usize,
    key_bytes: usize,
    hasher: &dyn crate::hash::HashCapability,
) -> Result<Node> {
    let tag = bytes[0];
    let pos = NodePtr { segment, offset };
    match tag {
        TAG_INTERNAL => {
            let mut off = 1;
            let left = decode_child(bytes, &mut off, digest_size, hasher);
            let right = decode_child(bytes, &mut off, digest_size, hasher);
            Ok(Node::Internal { left, right, hash: None, pos: Some(pos) })
        }
        TAG_LEAF => {
            let mut off = 1;
            let leaf_digest = bytes[off..off + digest_size].to_vec();
            off += digest_size;
            let key = bytes[off..off + key_bytes].to_vec();
            off += key_bytes;
            let value_segment = u16::from_le_bytes(bytes[off..off + 2].try_into().unwrap());
            off += 2;
            let value_offset = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
            off += 4;
            let value_size = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
            Ok(Node::Leaf {
                key,
                value_ptr: ValuePtr { segment: value_segment, offset: value_offset, size: value_size },
                leaf_digest,
                pos: Some(pos),
            })
        }
        other => Err(StoreError::DatabaseCorruption(other, segment as u32, offset)),
    }
}

fn decode_child(
    bytes: &[u8],
    off: &mut usize,
    digest_size: usize,
    hasher: &dyn crate::hash::HashCapability,
) -> Child {
    let digest = bytes[*off..*off + digest_size].to_vec();
    *off += digest_size;
    let segment = u16::from_le_bytes(bytes[*off..*off + 2].try_into().unwrap());
    *off += 2;
    let offset = u32::from_le_bytes(bytes[*off..*off + 4].try_into().unwrap());
    *off += 4;
    if digest == hasher.zero_digest() {
        Child::Null
    } else {
        Child::Hash { digest, ptr: NodePtr { segment, offset } }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{Blake3Hasher, HashCapability};

    const KEY_BYTES: usize = 4; // bits = 32, for compact tests

    fn digest_size() -> usize {
        Blake3Hasher.digest_size()
    }

    #[test]
    fn node_size_matches_formula() {
        let d = digest_size();
        assert_eq!(node_size(d), 1 + 2 * (d + 2 + 4));
    }

    #[test]
    fn leaf_size_fits_within_node_size() {
        let d = digest_size();
        assert!(leaf_size(d, KEY_BYTES) <= node_size(d));
    }

    #[test]
    fn internal_roundtrip_with_two_null_children() {
        let hasher = Blake3Hasher;
        let d = hasher.digest_size();
        let node = Node::Internal {
            left: Child::Null,
            right: Child::Null,
            hash: None,
            pos: Some(NodePtr { segment: 1, offset: 0 }),
        };
        let bytes = encode(&node, d, KEY_BYTES, &hasher);
        assert_eq!(bytes.len(), node_size(d));
        let decoded = decode(&bytes, 1, 0, d, KEY_BYTES, &hasher).unwrap();
        match decoded {
            Node::Internal { left, right, .. } => {
                assert_eq!(left, Child::Null);
                assert_eq!(right, Child::Null);
            }
            _ => panic!("expected Internal"),
        }
    }

    #[test]
    fn internal_roundtrip_with_hash_children() {
        let hasher = Blake3Hasher;
        let d = hasher.digest_size();
        let left_digest = hasher.digest(b"left");
        let right_digest = hasher.digest(b"right");
        let node = Node::Internal {
            left: Child::Hash { digest: left_digest.clone(), ptr: NodePtr { segment: 1, offset: 100 } },
            right: Child::Hash { digest: right_digest.clone(), ptr: NodePtr { segment: 2, offset: 200 } },
            hash: None,
            pos: Some(NodePtr { segment: 3, offset: 0 }),
        };
        let bytes = encode(&node, d, KEY_BYTES, &hasher);
        let decoded = decode(&bytes, 3, 0, d, KEY_BYTES, &hasher).unwrap();
        match decoded {
            Node::Internal { left, right, .. } => {
                assert_eq!(left, Child::Hash { digest: left_digest, ptr: NodePtr { segment: 1, offset: 100 } });
                assert_eq!(right, Child::Hash { digest: right_digest, ptr: NodePtr { segment: 2, offset: 200 } });
            }
            _ => panic!("expected Internal"),
        }
    }

    #[test]
    fn zero_digest_child_decodes_as_null_regardless_of_pointer_fields() {
        let hasher = Blake3Hasher;
        let d = hasher.digest_size();
        let mut buf = vec![0u8; node_size(d)];
        buf[0] = TAG_INTERNAL;
        // Left child: zero digest but garbage pointer fields.
        let mut off = 1;
        // digest already zero; set pointer fields to nonzero garbage.
        buf[off + d] = 0xAB;
        buf[off + d + 1] = 0xCD;
        off += d + 2 + 4;
        buf[off..off + d].copy_from_slice(&hasher.zero_digest());
        let decoded = decode(&buf, 1, 0, d, KEY_BYTES, &hasher).unwrap();
        match decoded {
            Node::Internal { left, right, .. } => {
                assert_eq!(left, Child::Null);
                assert_eq!(right, Child::Null);
            }
            _ => panic!("expected Internal"),
        }
    }

    #[test]
    fn leaf_roundtrip_and_padding_is_zero() {
        let hasher = Blake3Hasher;
        let d = hasher.digest_size();
        let key = vec![0xAA; KEY_BYTES];
        let leaf_digest = hasher.digest(b"leaf");
        let node = Node::Leaf {
            key: key.clone(),
            value_ptr: ValuePtr { segment: 5, offset: 64, size: 11 },
            leaf_digest: leaf_digest.clone(),
            pos: Some(NodePtr { segment: 5, offset: 0 }),
        };
        let bytes = encode(&node, d, KEY_BYTES, &hasher);
        assert_eq!(bytes.len(), node_size(d));
        assert_eq!(bytes[0], TAG_LEAF);

        let used = leaf_size(d, KEY_BYTES);
        assert!(bytes[used..].iter().all(|&b| b == 0), "padding must be zero");

        let decoded = decode(&bytes, 5, 0, d, KEY_BYTES, &hasher).unwrap();
        match decoded {
            Node::Leaf { key: k, value_ptr, leaf_digest: ld, .. } => {
                assert_eq!(k, key);
                assert_eq!(value_ptr, ValuePtr { segment: 5, offset: 64, size: 11 });
                assert_eq!(ld, leaf_digest);
            }
            _ => panic!("expected Leaf"),
        }
    }

    #[test]
    fn set_pos_assigns_internal_position() {
        let mut node = Node::Internal { left: Child::Null, right: Child::Null, hash: None, pos: None };
        node.set_pos(NodePtr { segment: 4, offset: 12 });
        assert_eq!(node.pos(), Some(NodePtr { segment: 4, offset: 12 }));
    }

    #[test]
    fn set_value_ptr_updates_leaf() {
        let mut node = Node::Leaf {
            key: vec![0; KEY_BYTES],
            value_ptr: ValuePtr::default(),
            leaf_digest: vec![1; 32],
            pos: None,
        };
        node.set_value_ptr(ValuePtr { segment: 2, offset: 8, size: 5 });
        match node {
            Node::Leaf { value_ptr, .. } => assert_eq!(value_ptr, ValuePtr { segment: 2, offset: 8, size: 5 }),
            _ => panic!("expected Leaf"),
        }
    }

    #[test]
    fn unknown_tag_is_database_corruption() {
        let hasher = Blake3Hasher;
        let d = hasher.digest_size();
        let mut buf = vec![0u8; node_size(d)];
        buf[0] = 0x99;
        let err = decode(&buf, 7, 42, d, KEY_BYTES, &hasher).unwrap_err();
        match err {
            StoreError::DatabaseCorruption(tag, seg, off) => {
                assert_eq!(tag, 0x99);
                assert_eq!(seg, 7);
                assert_eq!(off, 42);
            }
            other => panic!("expected DatabaseCorruption, got {other:?}"),
        }
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn leaf_roundtrips_for_arbitrary_key_and_value_ptr(
            key in prop::collection::vec(any::<u8>(), KEY_BYTES..=KEY_BYTES),
            leaf_digest in prop::collection::vec(any::<u8>(), 32..=32),
            value_segment in any::<u16>(),
            value_offset in any::<u32>(),
            value_size in any::<u32>(),
        ) {
            let hasher = Blake3Hasher;
            let d = hasher.digest_size();
            let node = Node::Leaf {
                key: key.clone(),
                value_ptr: ValuePtr { segment: value_segment, offset: value_offset, size: value_size },
                leaf_digest: leaf_digest.clone(),
                pos: Some(NodePtr { segment: 1, offset: 0 }),
            };
            let bytes = encode(&node, d, KEY_BYTES, &hasher);
            prop_assert_eq!(bytes.len(), node_size(d));
            let decoded = decode(&bytes, 1, 0, d, KEY_BYTES, &hasher).unwrap();
            match decoded {
                Node::Leaf { key: k, value_ptr, leaf_digest: ld, .. } => {
                    prop_assert_eq!(k, key);
                    prop_assert_eq!(value_ptr, ValuePtr { segment: value_segment, offset: value_offset, size: value_size });
                    prop_assert_eq!(ld, leaf_digest);
                }
                other => prop_assert!(false, "expected Leaf, got {:?}", other),
            }
        }

        #[test]
        fn internal_roundtrips_for_arbitrary_child_pointers(
            left_segment in any::<u16>(),
            left_offset in any::<u32>(),
            right_segment in any::<u16>(),
            right_offset in any::<u32>(),
        ) {
            let hasher = Blake3Hasher;
            let d = hasher.digest_size();
            let left_digest = hasher.digest(&left_segment.to_le_bytes());
            let right_digest = hasher.digest(&right_segment.to_le_bytes());
            let node = Node::Internal {
                left: Child::Hash { digest: left_digest.clone(), ptr: NodePtr { segment: left_segment, offset: left_offset } },
                right: Child::Hash { digest: right_digest.clone(), ptr: NodePtr { segment: right_segment, offset: right_offset } },
                hash: None,
                pos: Some(NodePtr { segment: 9, offset: 0 }),
            };
            let bytes = encode(&node, d, KEY_BYTES, &hasher);
            let decoded = decode(&bytes, 9, 0, d, KEY_BYTES, &hasher).unwrap();
            match decoded {
                Node::Internal { left, right, .. } => {
                    prop_assert_eq!(left, Child::Hash { digest: left_digest, ptr: NodePtr { segment: left_segment, offset: left_offset } });
                    prop_assert_eq!(right, Child::Hash { digest: right_digest, ptr: NodePtr { segment: right_segment, offset: right_offset } });
                }
                other => prop_assert!(false, "expected Internal, got {:?}", other),
            }
        }
    }
}
