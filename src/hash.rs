//! Hash capability.
//!
//! The store consumes a digest function rather than committing to one. This
//! keeps the on-disk node/meta format decoupled from the concrete hash the
//! host tree uses, and lets tests run with a cheap non-cryptographic digest.

/// A digest function plus the fixed-size zero digest and internal-node
/// combiner a binary Merkle trie needs.
///
/// Implementors must be deterministic: the same bytes always produce the
/// same digest, and `digest_size()` must match the length of every digest
/// `digest()` and `hash_internal()` return.
pub trait HashCapability: Send + Sync {
    /// Width of a digest in bytes. Must be at least 20 since the
    /// meta checksum is the first 20 bytes of a digest.
    fn digest_size(&self) -> usize;

    /// The all-zero digest, used as the Null sentinel.
    fn zero_digest(&self) -> Vec<u8> {
        vec![0u8; self.digest_size()]
    }

    /// Hash arbitrary bytes, used for the meta checksum.
    fn digest(&self, bytes: &[u8]) -> Vec<u8>;

    /// Combine two child digests into their parent's digest (`H_internal`).
    fn hash_internal(&self, left: &[u8], right: &[u8]) -> Vec<u8>;
}

/// Default hash capability, backed by BLAKE3. 32-byte digests.
#[derive(Debug, Default, Clone, Copy)]
pub struct Blake3Hasher;

impl HashCapability for Blake3Hasher {
    fn digest_size(&self) -> usize {
        32
    }

    fn digest(&self, bytes: &[u8]) -> Vec<u8> {
        blake3::hash(bytes).as_bytes().to_vec()
    }

    fn hash_internal(&self, left: &[u8], right: &[u8]) -> Vec<u8> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(left);
        hasher.update(right);
        hasher.finalize().as_bytes().to_vec()
    }
}
