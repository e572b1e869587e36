//! Physics Geometry Format (`.phy`)
//!
//! ```text
//! magic: u32 = '_LPF', version: u32, convex: u32
//! vertex_count: i32; vertex_count × (3 × f32)
//! if !convex: index_count: i32; index_count × u32
//! ```

use glam::Vec3;

use crate::errors::{PyreError, Result};
use crate::resources::formats::{BinReader, BinWriter};

/// `'_LPF'` little-endian.
pub const MAGIC: u32 = u32::from_le_bytes(*b"_LPF");
pub const VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Default)]
pub struct PhyFile {
    pub convex: bool,
    pub vertices: Vec<Vec3>,
    /// Triangle indices; empty for convex hulls.
    pub indices: Vec<u32>,
}

impl PhyFile {
    pub fn read(bytes: &[u8], path: &str) -> Result<PhyFile> {
        let mut r = BinReader::new(bytes, path);
        let magic = r.u32()?;
        if magic != MAGIC {
            return Err(PyreError::BadMagic {
                path: path.to_string(),
                expected: MAGIC,
                got: magic,
            });
        }
        let version = r.u32()?;
        if version > VERSION {
            return Err(PyreError::UnsupportedVersion {
                path: path.to_string(),
                version,
            });
        }
        let convex = r.u32()? != 0;

        let vertex_count = r.i32()?;
        let mut vertices = Vec::with_capacity(vertex_count.max(0) as usize);
        for _ in 0..vertex_count {
            vertices.push(r.vec3()?);
        }

        let indices = if convex {
            Vec::new()
        } else {
            let index_count = r.i32()?;
            let mut indices = Vec::with_capacity(index_count.max(0) as usize);
            for _ in 0..index_count {
                indices.push(r.u32()?);
            }
            indices
        };

        Ok(PhyFile {
            convex,
            vertices,
            indices,
        })
    }

    #[must_use]
    pub fn write(&self) -> Vec<u8> {
        let mut w = BinWriter::new();
        w.u32(MAGIC);
        w.u32(VERSION);
        w.u32(u32::from(self.convex));
        w.i32(self.vertices.len() as i32);
        for v in &self.vertices {
            w.vec3(*v);
        }
        if !self.convex {
            w.i32(self.indices.len() as i32);
            for i in &self.indices {
                w.u32(*i);
            }
        }
        w.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concave_round_trip() {
        let original = PhyFile {
            convex: false,
            vertices: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            indices: vec![0, 1, 2],
        };
        let read = PhyFile::read(&original.write(), "t.phy").unwrap();
        assert_eq!(read, original);
    }

    #[test]
    fn convex_hull_skips_indices() {
        let original = PhyFile {
            convex: true,
            vertices: vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z],
            indices: Vec::new(),
        };
        let bytes = original.write();
        let read = PhyFile::read(&bytes, "t.phy").unwrap();
        assert!(read.convex);
        assert!(read.indices.is_empty());
    }
}
