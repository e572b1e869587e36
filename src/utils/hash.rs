//! Stable and Runtime Hashing
//!
//! Two hash flavors with different guarantees:
//!
//! - [`StableHash`] is persisted (shader blob cache, PSO keys, path hashes).
//!   It must produce the same value across processes and releases, so it is
//!   pinned to xxh3 with a fixed seed.
//! - [`RuntimeHash`] is an in-process identity for interned names and sort
//!   keys. Same algorithm today, but nothing may be written to disk with it.

use xxhash_rust::xxh3::{Xxh3, xxh3_64_with_seed};

const STABLE_SEED: u64 = 0;

/// Content hash that is stable across processes and releases.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct StableHash(u64);

impl StableHash {
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(xxh3_64_with_seed(bytes, STABLE_SEED))
    }

    /// Reconstructs a hash previously obtained from [`StableHash::value`],
    /// e.g. when reading a cache file.
    #[must_use]
    pub const fn from_value(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

/// Incremental builder for [`StableHash`] over heterogeneous fields.
pub struct StableHasher(Xxh3);

impl StableHasher {
    #[must_use]
    pub fn new() -> Self {
        Self(Xxh3::with_seed(STABLE_SEED))
    }

    pub fn write(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.update(bytes);
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.write(&value.to_le_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.write(&value.to_le_bytes())
    }

    #[must_use]
    pub fn finish(&self) -> StableHash {
        StableHash(self.0.digest())
    }
}

impl Default for StableHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// In-process name hash (paths, layer names, debug labels).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RuntimeHash(u64);

impl RuntimeHash {
    #[must_use]
    pub fn of(s: &str) -> Self {
        Self(xxh3_64_with_seed(s.as_bytes(), STABLE_SEED))
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_hash_is_deterministic() {
        let a = StableHash::of(b"pipelines/bloom");
        let b = StableHash::of(b"pipelines/bloom");
        assert_eq!(a, b);
        assert_ne!(a, StableHash::of(b"pipelines/blur"));
    }

    #[test]
    fn hasher_matches_one_shot_for_single_write() {
        let mut h = StableHasher::new();
        h.write(b"abc");
        assert_eq!(h.finish(), StableHash::of(b"abc"));
    }
}
