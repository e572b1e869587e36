//! Model Geometry Format (`.msh`)
//!
//! ```text
//! Header  { magic: u32 = 0x5f4c4d4f, version: u32, flags: u32 (v2+) }
//! mesh_count: i32
//! per mesh:
//!   material_name: len(i32) + utf8
//!   attribute_array_offset: i32
//!   attribute_array_size:   i32
//!   indices_offset:         i32
//!   tri_count:              i32
//!   mesh_name: len(i32) + utf8
//!   attribute_count: i32, then per attribute: name + type(u8)
//! geometry:
//!   indices_count: i32; indices_count × (u16 | u32)
//!   vertices_size: i32; that many bytes in declared attribute order
//! skeleton:
//!   bone_count: i32; per bone: name, parent name (len 0 = root),
//!                              pos (3×f32), rot (x, y, z, w)
//! LODs:
//!   lod_count: i32; (to_mesh: i32, squared_distance: f32) × lod_count
//! ```
//!
//! Reader and writer are exact inverses: `write(read(bytes)) == bytes`
//! for any file this writer produced (fixed little endianness).

use glam::{Quat, Vec3};

use crate::errors::{PyreError, Result};
use crate::resources::formats::{BinReader, BinWriter};

pub const MAGIC: u32 = 0x5f4c_4d4f;
/// Current written version. Readers accept `2..=VERSION`.
pub const VERSION: u32 = 3;

bitflags::bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct MshFlags: u32 {
        const INDICES_16BIT = 1 << 0;
    }
}

/// One vertex attribute declaration: name + component type tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MshAttribute {
    pub name: String,
    pub ty: u8,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MshMesh {
    pub material_name: String,
    pub attribute_array_offset: i32,
    pub attribute_array_size: i32,
    pub indices_offset: i32,
    pub tri_count: i32,
    pub name: String,
    pub attributes: Vec<MshAttribute>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MshBone {
    pub name: String,
    /// Empty = root.
    pub parent: String,
    pub position: Vec3,
    pub rotation: Quat,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MshLod {
    pub to_mesh: i32,
    pub squared_distance: f32,
}

/// Parsed model file. Index data is kept raw (u16 or u32 per the flags).
#[derive(Clone, Debug, PartialEq, Default)]
pub struct MshFile {
    pub flags: MshFlags,
    pub meshes: Vec<MshMesh>,
    pub indices: Vec<u8>,
    pub indices_count: i32,
    pub vertices: Vec<u8>,
    pub bones: Vec<MshBone>,
    pub lods: Vec<MshLod>,
}

impl MshFile {
    #[must_use]
    pub fn index_size(&self) -> usize {
        if self.flags.contains(MshFlags::INDICES_16BIT) {
            2
        } else {
            4
        }
    }

    pub fn read(bytes: &[u8], path: &str) -> Result<MshFile> {
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
        if !(2..=VERSION).contains(&version) {
            return Err(PyreError::UnsupportedVersion {
                path: path.to_string(),
                version,
            });
        }
        let flags = MshFlags::from_bits_truncate(r.u32()?);

        let mesh_count = r.i32()?;
        let mut meshes = Vec::with_capacity(mesh_count.max(0) as usize);
        for _ in 0..mesh_count {
            let material_name = r.string()?;
            let attribute_array_offset = r.i32()?;
            let attribute_array_size = r.i32()?;
            let indices_offset = r.i32()?;
            let tri_count = r.i32()?;
            let name = r.string()?;
            let attribute_count = r.i32()?;
            let mut attributes = Vec::with_capacity(attribute_count.max(0) as usize);
            for _ in 0..attribute_count {
                attributes.push(MshAttribute {
                    name: r.string()?,
                    ty: r.u8()?,
                });
            }
            meshes.push(MshMesh {
                material_name,
                attribute_array_offset,
                attribute_array_size,
                indices_offset,
                tri_count,
                name,
                attributes,
            });
        }

        let indices_count = r.i32()?;
        let index_size = if flags.contains(MshFlags::INDICES_16BIT) {
            2
        } else {
            4
        };
        let indices = r.bytes(indices_count.max(0) as usize * index_size)?.to_vec();
        let vertices_size = r.i32()?;
        let vertices = r.bytes(vertices_size.max(0) as usize)?.to_vec();

        let bone_count = r.i32()?;
        let mut bones = Vec::with_capacity(bone_count.max(0) as usize);
        for _ in 0..bone_count {
            bones.push(MshBone {
                name: r.string()?,
                parent: r.string()?,
                position: r.vec3()?,
                rotation: r.quat()?,
            });
        }

        let lod_count = r.i32()?;
        let mut lods = Vec::with_capacity(lod_count.max(0) as usize);
        for _ in 0..lod_count {
            lods.push(MshLod {
                to_mesh: r.i32()?,
                squared_distance: r.f32()?,
            });
        }

        Ok(MshFile {
            flags,
            meshes,
            indices,
            indices_count,
            vertices,
            bones,
            lods,
        })
    }

    #[must_use]
    pub fn write(&self) -> Vec<u8> {
        let mut w = BinWriter::new();
        w.u32(MAGIC);
        w.u32(VERSION);
        w.u32(self.flags.bits());

        w.i32(self.meshes.len() as i32);
        for mesh in &self.meshes {
            w.string(&mesh.material_name);
            w.i32(mesh.attribute_array_offset);
            w.i32(mesh.attribute_array_size);
            w.i32(mesh.indices_offset);
            w.i32(mesh.tri_count);
            w.string(&mesh.name);
            w.i32(mesh.attributes.len() as i32);
            for attr in &mesh.attributes {
                w.string(&attr.name);
                w.u8(attr.ty);
            }
        }

        w.i32(self.indices_count);
        w.raw(&self.indices);
        w.i32(self.vertices.len() as i32);
        w.raw(&self.vertices);

        w.i32(self.bones.len() as i32);
        for bone in &self.bones {
            w.string(&bone.name);
            w.string(&bone.parent);
            w.vec3(bone.position);
            w.quat(bone.rotation);
        }

        w.i32(self.lods.len() as i32);
        for lod in &self.lods {
            w.i32(lod.to_mesh);
            w.f32(lod.squared_distance);
        }
        w.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MshFile {
        MshFile {
            flags: MshFlags::INDICES_16BIT,
            meshes: vec![MshMesh {
                material_name: "materials/cube.mat".into(),
                attribute_array_offset: 0,
                attribute_array_size: 96,
                indices_offset: 0,
                tri_count: 12,
                name: "cube".into(),
                attributes: vec![
                    MshAttribute {
                        name: "in_position".into(),
                        ty: 0,
                    },
                    MshAttribute {
                        name: "in_normal".into(),
                        ty: 0,
                    },
                ],
            }],
            indices: vec![0, 0, 1, 0, 2, 0],
            indices_count: 3,
            vertices: vec![0u8; 96],
            bones: vec![
                MshBone {
                    name: "root".into(),
                    parent: String::new(),
                    position: Vec3::ZERO,
                    rotation: Quat::IDENTITY,
                },
                MshBone {
                    name: "spine".into(),
                    parent: "root".into(),
                    position: Vec3::new(0.0, 1.0, 0.0),
                    rotation: Quat::IDENTITY,
                },
            ],
            lods: vec![
                MshLod {
                    to_mesh: 0,
                    squared_distance: 100.0,
                },
                MshLod {
                    to_mesh: 0,
                    squared_distance: f32::MAX,
                },
            ],
        }
    }

    #[test]
    fn round_trip_is_bit_exact() {
        let original = sample();
        let bytes = original.write();
        let read = MshFile::read(&bytes, "cube.msh").unwrap();
        assert_eq!(read, original);
        assert_eq!(read.write(), bytes);
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut bytes = sample().write();
        bytes[0] ^= 0xff;
        assert!(matches!(
            MshFile::read(&bytes, "cube.msh"),
            Err(PyreError::BadMagic { .. })
        ));
    }

    #[test]
    fn rejects_future_version() {
        let mut bytes = sample().write();
        bytes[4..8].copy_from_slice(&(VERSION + 10).to_le_bytes());
        assert!(matches!(
            MshFile::read(&bytes, "cube.msh"),
            Err(PyreError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn rejects_truncation() {
        let bytes = sample().write();
        assert!(matches!(
            MshFile::read(&bytes[..bytes.len() - 4], "cube.msh"),
            Err(PyreError::TruncatedFile(_))
        ));
    }
}
