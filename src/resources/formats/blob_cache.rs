//! Shader Blob Cache
//!
//! Persisted cache of compiled shader blobs keyed by a [`StableHash`] over
//! source + topology + define mask. The file begins with a version word;
//! a mismatched version discards the whole cache (blobs are regenerable).
//!
//! ```text
//! version: u32
//! entry_count: u32
//! per entry: key: u64, blob_len: u32, blob bytes
//! ```

use rustc_hash::FxHashMap;

use crate::errors::Result;
use crate::resources::formats::{BinReader, BinWriter};
use crate::utils::hash::StableHash;

pub const VERSION: u32 = 1;

/// In-memory shader blob cache with load/save.
#[derive(Default)]
pub struct BlobCache {
    entries: FxHashMap<u64, Vec<u8>>,
    dirty: bool,
}

impl BlobCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: StableHash) -> Option<&[u8]> {
        self.entries.get(&key.value()).map(Vec::as_slice)
    }

    pub fn insert(&mut self, key: StableHash, blob: Vec<u8>) {
        self.entries.insert(key.value(), blob);
        self.dirty = true;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Parses a cache file. A version mismatch yields an empty cache, not
    /// an error.
    pub fn load(bytes: &[u8], path: &str) -> Result<Self> {
        let mut r = BinReader::new(bytes, path);
        let version = r.u32()?;
        if version != VERSION {
            log::info!("discarding shader blob cache (version {version})");
            return Ok(Self::new());
        }
        let count = r.u32()?;
        let mut entries = FxHashMap::default();
        for _ in 0..count {
            let key = u64::from(r.u32()?) | (u64::from(r.u32()?) << 32);
            let len = r.u32()? as usize;
            entries.insert(key, r.bytes(len)?.to_vec());
        }
        Ok(Self {
            entries,
            dirty: false,
        })
    }

    #[must_use]
    pub fn save(&self) -> Vec<u8> {
        let mut w = BinWriter::new();
        w.u32(VERSION);
        w.u32(self.entries.len() as u32);
        // Deterministic output: sort by key.
        let mut keys: Vec<&u64> = self.entries.keys().collect();
        keys.sort_unstable();
        for key in keys {
            w.u32(*key as u32);
            w.u32((*key >> 32) as u32);
            let blob = &self.entries[key];
            w.u32(blob.len() as u32);
            w.raw(blob);
        }
        w.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut cache = BlobCache::new();
        cache.insert(StableHash::of(b"a"), vec![1, 2, 3]);
        cache.insert(StableHash::of(b"b"), vec![4]);
        let loaded = BlobCache::load(&cache.save(), "shaders.cache").unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get(StableHash::of(b"a")), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn version_mismatch_discards() {
        let mut cache = BlobCache::new();
        cache.insert(StableHash::of(b"a"), vec![1]);
        let mut bytes = cache.save();
        bytes[0] = 99;
        let loaded = BlobCache::load(&bytes, "shaders.cache").unwrap();
        assert!(loaded.is_empty());
    }
}
