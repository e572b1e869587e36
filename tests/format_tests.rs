//! Resource Format Tests
//!
//! Tests for:
//! - `.msh` model round trips (bit-exact) and header validation
//! - `.phy` physics geometry convex/concave layouts
//! - `.ani` animation key streams and versioned root motion
//! - shader blob cache persistence
//! - metadata sidecar forward compatibility

use glam::{Quat, Vec3};

use pyre::resources::formats::ani::{AniFile, BoneTrack, PositionKey, RotationKey};
use pyre::resources::formats::blob_cache::BlobCache;
use pyre::resources::formats::metadata::Metadata;
use pyre::resources::formats::msh::{
    MshAttribute, MshBone, MshFile, MshFlags, MshLod, MshMesh,
};
use pyre::resources::formats::phy::PhyFile;
use pyre::utils::hash::StableHash;
use pyre::PyreError;

// ============================================================================
// Model (.msh)
// ============================================================================

fn cube_model(indices_16bit: bool) -> MshFile {
    let index_size = if indices_16bit { 2 } else { 4 };
    MshFile {
        flags: if indices_16bit {
            MshFlags::INDICES_16BIT
        } else {
            MshFlags::empty()
        },
        meshes: vec![MshMesh {
            material_name: "materials/default.mat".into(),
            attribute_array_offset: 0,
            attribute_array_size: 24 * 32,
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
                MshAttribute {
                    name: "in_uv0".into(),
                    ty: 0,
                },
            ],
        }],
        indices: vec![0u8; 36 * index_size],
        indices_count: 36,
        vertices: vec![0u8; 24 * 32],
        bones: vec![MshBone {
            name: "root".into(),
            parent: String::new(),
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }],
        lods: vec![MshLod {
            to_mesh: 0,
            squared_distance: f32::MAX,
        }],
    }
}

#[test]
fn msh_round_trip_32bit_indices() {
    let model = cube_model(false);
    let bytes = model.write();
    let read = MshFile::read(&bytes, "cube.msh").unwrap();
    assert_eq!(read, model);
    // Bit-for-bit: writing the parsed model reproduces the file.
    assert_eq!(read.write(), bytes);
}

#[test]
fn msh_round_trip_16bit_indices() {
    let model = cube_model(true);
    let read = MshFile::read(&model.write(), "cube.msh").unwrap();
    assert_eq!(read.index_size(), 2);
    assert_eq!(read, model);
}

#[test]
fn msh_skeleton_parent_links_survive() {
    let mut model = cube_model(false);
    model.bones.push(MshBone {
        name: "spine".into(),
        parent: "root".into(),
        position: Vec3::new(0.0, 1.0, 0.0),
        rotation: Quat::from_rotation_y(0.5),
    });
    let read = MshFile::read(&model.write(), "rig.msh").unwrap();
    assert_eq!(read.bones.len(), 2);
    assert_eq!(read.bones[1].parent, "root");
    assert!(read.bones[0].parent.is_empty());
}

#[test]
fn msh_bad_magic_is_rejected() {
    let mut bytes = cube_model(false).write();
    bytes[0] = 0;
    assert!(matches!(
        MshFile::read(&bytes, "cube.msh"),
        Err(PyreError::BadMagic { .. })
    ));
}

#[test]
fn msh_truncated_geometry_is_rejected() {
    let bytes = cube_model(false).write();
    for cut in [bytes.len() - 1, bytes.len() / 2, 12] {
        assert!(
            MshFile::read(&bytes[..cut], "cube.msh").is_err(),
            "cut at {cut} should fail"
        );
    }
}

// ============================================================================
// Physics geometry (.phy)
// ============================================================================

#[test]
fn phy_concave_round_trip() {
    let phy = PhyFile {
        convex: false,
        vertices: vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z],
        indices: vec![0, 1, 2, 0, 2, 3],
    };
    let read = PhyFile::read(&phy.write(), "level.phy").unwrap();
    assert_eq!(read, phy);
}

#[test]
fn phy_convex_has_no_index_array() {
    let phy = PhyFile {
        convex: true,
        vertices: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
        indices: Vec::new(),
    };
    let bytes = phy.write();
    // convex flag + vertices only: magic, version, convex, count, 3 * vec3
    assert_eq!(bytes.len(), 4 + 4 + 4 + 4 + 3 * 12);
    assert_eq!(PhyFile::read(&bytes, "hull.phy").unwrap(), phy);
}

// ============================================================================
// Animation (.ani)
// ============================================================================

#[test]
fn ani_round_trip_with_root_motion() {
    let ani = AniFile {
        fps: 60,
        root_motion_bone: Some(2),
        frame_count: 120,
        tracks: vec![
            BoneTrack {
                name_hash: 0xdead_beef_cafe_f00d,
                positions: vec![
                    PositionKey {
                        frame: 0,
                        position: Vec3::ZERO,
                    },
                    PositionKey {
                        frame: 119,
                        position: Vec3::X,
                    },
                ],
                rotations: vec![RotationKey {
                    frame: 0,
                    rotation: Quat::IDENTITY,
                }],
            },
            BoneTrack {
                name_hash: 1,
                positions: Vec::new(),
                rotations: Vec::new(),
            },
        ],
    };
    let read = AniFile::read(&ani.write(), "run.ani").unwrap();
    assert_eq!(read, ani);
}

#[test]
fn ani_without_root_motion() {
    let ani = AniFile {
        fps: 30,
        root_motion_bone: None,
        frame_count: 10,
        tracks: Vec::new(),
    };
    let read = AniFile::read(&ani.write(), "idle.ani").unwrap();
    assert_eq!(read.root_motion_bone, None);
}

// ============================================================================
// Shader blob cache
// ============================================================================

#[test]
fn blob_cache_round_trip_is_deterministic() {
    let mut cache = BlobCache::new();
    cache.insert(StableHash::of(b"bloom#1"), vec![10, 20, 30]);
    cache.insert(StableHash::of(b"taa#0"), vec![1]);
    let saved = cache.save();
    // Deterministic output: saving twice yields identical bytes.
    assert_eq!(saved, cache.save());

    let loaded = BlobCache::load(&saved, "shaders.cache").unwrap();
    assert_eq!(loaded.get(StableHash::of(b"bloom#1")), Some(&[10u8, 20, 30][..]));
    assert_eq!(loaded.get(StableHash::of(b"taa#0")), Some(&[1u8][..]));
    assert_eq!(loaded.get(StableHash::of(b"missing")), None);
}

#[test]
fn blob_cache_version_word_gates_content() {
    let mut cache = BlobCache::new();
    cache.insert(StableHash::of(b"x"), vec![9; 100]);
    let mut bytes = cache.save();
    bytes[0] = bytes[0].wrapping_add(1);
    assert!(BlobCache::load(&bytes, "shaders.cache").unwrap().is_empty());
}

// ============================================================================
// Metadata sidecars
// ============================================================================

#[test]
fn metadata_defaults_and_unknown_fields() {
    let meta = Metadata::parse("{}").unwrap();
    assert!((meta.scale - 1.0).abs() < 1e-6);
    assert_eq!(meta.lod_count, 1);

    let meta = Metadata::parse(r#"{ "scale": 2.5, "from_the_future": [1, 2] }"#).unwrap();
    let round = Metadata::parse(&meta.serialize()).unwrap();
    assert!((round.scale - 2.5).abs() < 1e-6);
    assert!(round.extra.contains_key("from_the_future"));
}
