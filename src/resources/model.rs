//! Model Resources
//!
//! A model owns meshes (GAL vertex/index buffers + layouts), a skeleton, a
//! LOD table, and a per-model material table addressed through
//! [`MaterialIndex`] handles. Geometry uploads ride the draw stream; the
//! model is ready once its materials resolve.

use glam::Vec3;
use smallvec::SmallVec;

use crate::gal::{
    AttributeSemantic, AttributeType, BufferFlags, BufferHandle, Gpu, VertexDecl,
};
use crate::resources::formats::msh::{MshFile, MshFlags};
use crate::resources::material::MaterialIndex;
use crate::resources::resource::{ResourceHeader, ResourceState};
use crate::resources::MaterialId;
use crate::stream::DrawStream;

/// Axis-aligned bounding box in model space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::MAX),
        max: Vec3::splat(f32::MIN),
    };

    pub fn merge_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    #[must_use]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[must_use]
    pub fn radius(&self) -> f32 {
        (self.max - self.min).length() * 0.5
    }
}

/// One renderable mesh of a model.
pub struct Mesh {
    pub name: String,
    pub decl: VertexDecl,
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
    pub u16_indices: bool,
    pub material: MaterialIndex,
    pub sort_key_seed: u32,
}

/// A skeleton bone with a resolved parent index.
pub struct Bone {
    pub name: String,
    pub name_hash: u64,
    /// Index into the bone array; `None` = root.
    pub parent: Option<u32>,
    pub position: Vec3,
    pub rotation: glam::Quat,
}

/// One LOD level: meshes `[from_mesh..=to_mesh]` draw while the squared
/// view distance is below `squared_distance`.
#[derive(Clone, Copy, Debug)]
pub struct Lod {
    pub to_mesh: i32,
    pub squared_distance: f32,
}

/// A loaded model resource.
pub struct ModelResource {
    pub header: ResourceHeader,
    pub meshes: Vec<Mesh>,
    /// Per-model material table; meshes hold [`MaterialIndex`] into it.
    pub materials: Vec<MaterialId>,
    /// Material paths, resolved by the hub into `materials`.
    pub material_paths: Vec<String>,
    pub bones: Vec<Bone>,
    pub lods: SmallVec<[Lod; 4]>,
    pub aabb: Aabb,
    pub bounding_radius: f32,
}

/// Maps an on-disk attribute name to the layout semantic + shape.
fn attribute_info(name: &str) -> Option<(AttributeSemantic, AttributeType, u8)> {
    Some(match name {
        "in_position" => (AttributeSemantic::Position, AttributeType::F32, 3),
        "in_normal" => (AttributeSemantic::Normal, AttributeType::F32, 3),
        "in_tangent" => (AttributeSemantic::Tangent, AttributeType::F32, 3),
        "in_bitangent" => (AttributeSemantic::Bitangent, AttributeType::F32, 3),
        "in_color0" => (AttributeSemantic::Color0, AttributeType::U8Norm, 4),
        "in_color1" => (AttributeSemantic::Color1, AttributeType::U8Norm, 4),
        "in_joints" => (AttributeSemantic::Joints, AttributeType::I16, 4),
        "in_weights" => (AttributeSemantic::Weights, AttributeType::F32, 4),
        "in_uv0" => (AttributeSemantic::Texcoord0, AttributeType::F32, 2),
        "in_uv1" => (AttributeSemantic::Texcoord1, AttributeType::F32, 2),
        "in_ao" => (AttributeSemantic::AmbientOcclusion, AttributeType::F32, 1),
        _ => return None,
    })
}

impl ModelResource {
    #[must_use]
    pub fn new(path: &str) -> Self {
        Self {
            header: ResourceHeader::new(path),
            meshes: Vec::new(),
            materials: Vec::new(),
            material_paths: Vec::new(),
            bones: Vec::new(),
            lods: SmallVec::new(),
            aabb: Aabb::EMPTY,
            bounding_radius: 0.0,
        }
    }

    /// Parses the `.msh` payload and records geometry uploads. Material
    /// dependencies are surfaced through `material_paths` for the hub.
    pub fn load(&mut self, bytes: &[u8], gpu: &Gpu, stream: &mut DrawStream) -> bool {
        let file = match MshFile::read(bytes, &self.header.path) {
            Ok(file) => file,
            Err(err) => {
                log::error!("{err}");
                return false;
            }
        };

        let u16_indices = file.flags.contains(MshFlags::INDICES_16BIT);

        // One shared index/vertex pair; meshes address ranges inside them.
        let index_buffer = gpu.alloc_buffer_handle();
        stream.create_buffer(
            index_buffer,
            BufferFlags::empty(),
            file.indices.len() as u64,
            Some(&file.indices),
            &format!("{}_indices", self.header.path),
        );
        let vertex_buffer = gpu.alloc_buffer_handle();
        stream.create_buffer(
            vertex_buffer,
            BufferFlags::empty(),
            file.vertices.len() as u64,
            Some(&file.vertices),
            &format!("{}_vertices", self.header.path),
        );

        let mut aabb = Aabb::EMPTY;
        for (mesh_index, mesh) in file.meshes.iter().enumerate() {
            let mut decl = VertexDecl::default();
            for attr in &mesh.attributes {
                if let Some((semantic, ty, components)) = attribute_info(&attr.name) {
                    decl.push(semantic, ty, components);
                } else {
                    log::warn!(
                        "{}: unknown attribute '{}' in mesh '{}'",
                        self.header.path,
                        attr.name,
                        mesh.name
                    );
                }
            }

            // Positions live at the front of each vertex; walk them for the
            // model bounds.
            if decl.stride > 0 {
                let start = mesh.attribute_array_offset.max(0) as usize;
                let end = (start + mesh.attribute_array_size.max(0) as usize)
                    .min(file.vertices.len());
                let mut cursor = start;
                while cursor + 12 <= end {
                    let p = Vec3::new(
                        f32::from_le_bytes(file.vertices[cursor..cursor + 4].try_into().unwrap()),
                        f32::from_le_bytes(
                            file.vertices[cursor + 4..cursor + 8].try_into().unwrap(),
                        ),
                        f32::from_le_bytes(
                            file.vertices[cursor + 8..cursor + 12].try_into().unwrap(),
                        ),
                    );
                    aabb.merge_point(p);
                    cursor += decl.stride as usize;
                }
            }

            let material = MaterialIndex(self.material_index_for(&mesh.material_name));
            self.meshes.push(Mesh {
                name: mesh.name.clone(),
                decl,
                vertex_buffer,
                index_buffer,
                index_count: mesh.tri_count.max(0) as u32 * 3,
                u16_indices,
                material,
                sort_key_seed: mesh_index as u32,
            });
        }

        for bone in &file.bones {
            let parent = (!bone.parent.is_empty())
                .then(|| self.bones.iter().position(|b| b.name == bone.parent))
                .flatten()
                .map(|i| i as u32);
            self.bones.push(Bone {
                name_hash: crate::utils::hash::RuntimeHash::of(&bone.name).value(),
                name: bone.name.clone(),
                parent,
                position: bone.position,
                rotation: bone.rotation,
            });
        }

        self.lods = file
            .lods
            .iter()
            .map(|l| Lod {
                to_mesh: l.to_mesh,
                squared_distance: l.squared_distance,
            })
            .collect();
        if self.lods.is_empty() {
            self.lods.push(Lod {
                to_mesh: self.meshes.len() as i32 - 1,
                squared_distance: f32::MAX,
            });
        }

        if aabb.min.x <= aabb.max.x {
            self.aabb = aabb;
            self.bounding_radius = aabb.center().length() + aabb.radius();
        }
        self.header.size = bytes.len() as u64;
        true
    }

    fn material_index_for(&mut self, path: &str) -> u32 {
        if let Some(i) = self.material_paths.iter().position(|p| p == path) {
            return i as u32;
        }
        self.material_paths.push(path.to_string());
        self.material_paths.len() as u32 - 1
    }

    /// Selects the LOD level for a squared view distance.
    #[must_use]
    pub fn lod_for_distance(&self, squared_distance: f32) -> usize {
        for (i, lod) in self.lods.iter().enumerate() {
            if squared_distance < lod.squared_distance {
                return i;
            }
        }
        self.lods.len() - 1
    }

    /// Enqueues destruction of the geometry buffers.
    pub fn unload(&mut self, stream: &mut DrawStream) {
        let mut destroyed: SmallVec<[BufferHandle; 4]> = SmallVec::new();
        for mesh in self.meshes.drain(..) {
            for handle in [mesh.vertex_buffer, mesh.index_buffer] {
                if handle.is_valid() && !destroyed.contains(&handle) {
                    stream.destroy_buffer(handle);
                    destroyed.push(handle);
                }
            }
        }
        self.materials.clear();
        self.material_paths.clear();
        self.bones.clear();
        self.lods.clear();
        self.header.state = ResourceState::Empty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lod_selection_by_squared_distance() {
        let mut model = ModelResource::new("m.msh");
        model.lods.push(Lod {
            to_mesh: 0,
            squared_distance: 100.0,
        });
        model.lods.push(Lod {
            to_mesh: 1,
            squared_distance: 10_000.0,
        });
        assert_eq!(model.lod_for_distance(50.0), 0);
        assert_eq!(model.lod_for_distance(5_000.0), 1);
        assert_eq!(model.lod_for_distance(1e9), 1);
    }

    #[test]
    fn material_table_deduplicates_paths() {
        let mut model = ModelResource::new("m.msh");
        let a = model.material_index_for("a.mat");
        let b = model.material_index_for("b.mat");
        assert_eq!(model.material_index_for("a.mat"), a);
        assert_ne!(a, b);
        assert_eq!(model.material_paths.len(), 2);
    }

    #[test]
    fn aabb_merge() {
        let mut aabb = Aabb::EMPTY;
        aabb.merge_point(Vec3::new(-1.0, 0.0, 0.0));
        aabb.merge_point(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(aabb.min, Vec3::new(-1.0, 0.0, 0.0));
        assert_eq!(aabb.max, Vec3::new(1.0, 2.0, 3.0));
        assert!(aabb.radius() > 0.0);
    }
}
