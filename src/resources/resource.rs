//! Resource Base Types
//!
//! Common state machine and bookkeeping shared by all resource kinds. A
//! resource is `Empty` until requested, `Loading` while its bytes or its
//! dependencies are outstanding, then `Ready` or `Failure`. Failed
//! resources are observable, never fatal: consumers fall back to null
//! bindings and render on.

use std::sync::Arc;

use crate::errors::{PyreError, Result};
use crate::utils::hash::RuntimeHash;

/// Lifecycle states of a resource.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ResourceState {
    Empty,
    Loading,
    Ready,
    Failure,
}

/// Bookkeeping common to every resource kind.
#[derive(Clone, Debug)]
pub struct ResourceHeader {
    pub path: String,
    pub path_hash: RuntimeHash,
    pub state: ResourceState,
    pub ref_count: u32,
    /// Outstanding dependency loads gating readiness.
    pub dep_count: u32,
    /// Byte size of the source file, once known.
    pub size: u64,
}

impl ResourceHeader {
    #[must_use]
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            path_hash: RuntimeHash::of(path),
            state: ResourceState::Empty,
            ref_count: 1,
            dep_count: 0,
            size: 0,
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == ResourceState::Ready
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.state == ResourceState::Failure
    }
}

/// Raw read interface. The engine is embeddable: the host supplies the
/// file system.
pub trait ResourceIo: Send + Sync {
    fn read(&self, path: &str) -> Result<Vec<u8>>;
}

/// Plain directory-rooted IO.
pub struct DiskIo {
    root: std::path::PathBuf,
}

impl DiskIo {
    #[must_use]
    pub fn new(root: impl Into<std::path::PathBuf>) -> Arc<Self> {
        Arc::new(Self { root: root.into() })
    }
}

impl ResourceIo for DiskIo {
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.root.join(path);
        std::fs::read(&full).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PyreError::ResourceNotFound(path.to_string())
            } else {
                PyreError::IoError(e)
            }
        })
    }
}

/// In-memory IO used by tests and tooling.
#[derive(Default)]
pub struct MemoryIo {
    files: parking_lot::RwLock<rustc_hash::FxHashMap<String, Vec<u8>>>,
}

impl MemoryIo {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, path: &str, bytes: Vec<u8>) {
        self.files.write().insert(path.to_string(), bytes);
    }
}

impl ResourceIo for MemoryIo {
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| PyreError::ResourceNotFound(path.to_string()))
    }
}
