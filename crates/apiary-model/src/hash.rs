//! Content-addressed hashing primitives
//!
//! Used for the artifact-dedup signature (§3 invariant: no two
//! `CodeArtifact`s on a task share the same `(type, change_type, file_path,
//! content)` signature) and for sandbox sync-back conflict detection
//! (compare the base-dir file's hash at copy time vs. at sync time).

use std::fmt;

/// A 32-byte Blake3 content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Compute the hash of arbitrary bytes.
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Get the raw bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_content_hashes_equal() {
        assert_eq!(ContentHash::compute(b"hello"), ContentHash::compute(b"hello"));
    }

    #[test]
    fn different_content_hashes_differ() {
        assert_ne!(ContentHash::compute(b"hello"), ContentHash::compute(b"world"));
    }
}
