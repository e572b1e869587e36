//! Resource File Formats
//!
//! Binary readers/writers for the engine's on-disk formats. Bit layouts are
//! normative; readers tolerate additive versioning (newer minor versions
//! append fields, older readers stop at what they know).
//!
//! - [`msh`]: model geometry (meshes, attributes, skeleton, LODs)
//! - [`phy`]: physics collision geometry
//! - [`ani`]: compressed skeletal animation
//! - [`blob_cache`]: persisted shader blob cache
//! - [`metadata`]: JSON import-parameter sidecars

pub mod ani;
pub mod blob_cache;
pub mod metadata;
pub mod msh;
pub mod phy;
mod reader;

pub use reader::{BinReader, BinWriter};
