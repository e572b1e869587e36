//! Skeletal Animation Format (`.ani`)
//!
//! ```text
//! magic: u32, version: u32, fps: u32
//! root_motion_bone: i32            (v3+; -1 = none)
//! frame_count: i32, bone_count: i32
//! per bone:
//!   bone_name_hash: u64
//!   position keys: count: i32; (frame: u16, pos: 3 × f32) × count
//!   rotation keys: count: i32; (frame: u16, rot: 4 × f32) × count
//! ```
//!
//! Key streams are sparse: bones animated by a constant transform carry a
//! single key. Playback interpolates between neighbouring keys.

use glam::{Quat, Vec3};

use crate::errors::{PyreError, Result};
use crate::resources::formats::{BinReader, BinWriter};

pub const MAGIC: u32 = u32::from_le_bytes(*b"_ANI");
pub const VERSION: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PositionKey {
    pub frame: u16,
    pub position: Vec3,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RotationKey {
    pub frame: u16,
    pub rotation: Quat,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct BoneTrack {
    pub name_hash: u64,
    pub positions: Vec<PositionKey>,
    pub rotations: Vec<RotationKey>,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct AniFile {
    pub fps: u32,
    /// Index of the root-motion bone, `None` when root motion is baked.
    pub root_motion_bone: Option<u32>,
    pub frame_count: i32,
    pub tracks: Vec<BoneTrack>,
}

impl AniFile {
    pub fn read(bytes: &[u8], path: &str) -> Result<AniFile> {
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
        let fps = r.u32()?;
        let root_motion_bone = if version >= 3 {
            let raw = r.i32()?;
            (raw >= 0).then_some(raw as u32)
        } else {
            None
        };
        let frame_count = r.i32()?;
        let bone_count = r.i32()?;

        let mut tracks = Vec::with_capacity(bone_count.max(0) as usize);
        for _ in 0..bone_count {
            let name_hash =
                u64::from(r.u32()?) | (u64::from(r.u32()?) << 32);
            let pos_count = r.i32()?;
            let mut positions = Vec::with_capacity(pos_count.max(0) as usize);
            for _ in 0..pos_count {
                positions.push(PositionKey {
                    frame: r.u16()?,
                    position: r.vec3()?,
                });
            }
            let rot_count = r.i32()?;
            let mut rotations = Vec::with_capacity(rot_count.max(0) as usize);
            for _ in 0..rot_count {
                rotations.push(RotationKey {
                    frame: r.u16()?,
                    rotation: r.quat()?,
                });
            }
            tracks.push(BoneTrack {
                name_hash,
                positions,
                rotations,
            });
        }

        Ok(AniFile {
            fps,
            root_motion_bone,
            frame_count,
            tracks,
        })
    }

    #[must_use]
    pub fn write(&self) -> Vec<u8> {
        let mut w = BinWriter::new();
        w.u32(MAGIC);
        w.u32(VERSION);
        w.u32(self.fps);
        w.i32(self.root_motion_bone.map_or(-1, |b| b as i32));
        w.i32(self.frame_count);
        w.i32(self.tracks.len() as i32);
        for track in &self.tracks {
            w.u32(track.name_hash as u32);
            w.u32((track.name_hash >> 32) as u32);
            w.i32(track.positions.len() as i32);
            for key in &track.positions {
                w.u16(key.frame);
                w.vec3(key.position);
            }
            w.i32(track.rotations.len() as i32);
            for key in &track.rotations {
                w.u16(key.frame);
                w.quat(key.rotation);
            }
        }
        w.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::hash::RuntimeHash;

    #[test]
    fn round_trip() {
        let original = AniFile {
            fps: 30,
            root_motion_bone: Some(0),
            frame_count: 60,
            tracks: vec![BoneTrack {
                name_hash: RuntimeHash::of("spine").value(),
                positions: vec![
                    PositionKey {
                        frame: 0,
                        position: Vec3::ZERO,
                    },
                    PositionKey {
                        frame: 59,
                        position: Vec3::Y,
                    },
                ],
                rotations: vec![RotationKey {
                    frame: 0,
                    rotation: Quat::IDENTITY,
                }],
            }],
        };
        let read = AniFile::read(&original.write(), "walk.ani").unwrap();
        assert_eq!(read, original);
    }

    #[test]
    fn missing_root_motion_reads_none() {
        let mut file = AniFile::default();
        file.root_motion_bone = None;
        let read = AniFile::read(&file.write(), "idle.ani").unwrap();
        assert_eq!(read.root_motion_bone, None);
    }
}
