//! Material Resources
//!
//! Materials are JSON documents naming a shader, textures, defines, and
//! render-state knobs. Shared by many model instances through reference
//! counting; a model owns a table of [`MaterialIndex`] handles into its
//! per-model material list.
//!
//! A material becomes ready only after its shader and textures resolve;
//! failed dependencies degrade to the null bindings instead of failing the
//! material.

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::gal::StateFlags;
use crate::resources::resource::ResourceHeader;
use crate::resources::{ShaderId, TextureResId};
use crate::utils::hash::RuntimeHash;

/// Strong-typed index into a model's material table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct MaterialIndex(pub u32);

/// On-disk material definition.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MaterialDef {
    pub shader: String,
    pub textures: Vec<String>,
    pub defines: Vec<String>,
    pub layer: String,
    pub backface_culling: bool,
    pub alpha_blended: bool,
    pub color: [f32; 4],
    pub roughness: f32,
    pub metallic: f32,
    pub emission: f32,
}

impl Default for MaterialDef {
    fn default() -> Self {
        Self {
            shader: String::new(),
            textures: Vec::new(),
            defines: Vec::new(),
            layer: "default".to_string(),
            backface_culling: true,
            alpha_blended: false,
            color: [1.0; 4],
            roughness: 1.0,
            metallic: 0.0,
            emission: 0.0,
        }
    }
}

impl MaterialDef {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A loaded material resource.
pub struct MaterialResource {
    pub header: ResourceHeader,
    pub def: MaterialDef,
    pub shader: Option<ShaderId>,
    pub textures: Vec<TextureResId>,
    /// Shader define mask assembled from `def.defines`.
    pub define_mask: u32,
    pub layer_hash: RuntimeHash,
    /// Draw-order key: materials sharing shader + textures batch together.
    pub sort_key: u32,
}

impl MaterialResource {
    #[must_use]
    pub fn new(path: &str) -> Self {
        Self {
            header: ResourceHeader::new(path),
            def: MaterialDef::default(),
            shader: None,
            textures: Vec::new(),
            define_mask: 0,
            layer_hash: RuntimeHash::of("default"),
            sort_key: 0,
        }
    }

    /// Parses the definition. Dependencies are requested by the hub.
    pub fn load(&mut self, bytes: &[u8]) -> bool {
        match MaterialDef::parse(bytes) {
            Ok(def) => {
                self.layer_hash = RuntimeHash::of(&def.layer);
                self.def = def;
                self.header.size = bytes.len() as u64;
                true
            }
            Err(err) => {
                log::error!("{}: {err}", self.header.path);
                false
            }
        }
    }

    /// Finalization once all dependencies are ready: computes the batching
    /// sort key.
    pub fn on_before_ready(&mut self) {
        let mut key = RuntimeHash::of(&self.def.shader).value();
        for path in &self.def.textures {
            key = key.wrapping_mul(31).wrapping_add(RuntimeHash::of(path).value());
        }
        self.sort_key = (key >> 32) as u32 ^ key as u32;
    }

    /// Render state implied by the definition, merged into the program's
    /// state word.
    #[must_use]
    pub fn state(&self) -> StateFlags {
        let mut state = StateFlags::DEPTH_FUNCTION | StateFlags::DEPTH_FN_GREATER;
        if self.def.backface_culling {
            state |= StateFlags::CULL_BACK;
        }
        if self.def.alpha_blended {
            state |= StateFlags::blend(
                crate::gal::BlendFactor::SrcAlpha,
                crate::gal::BlendFactor::OneMinusSrcAlpha,
                crate::gal::BlendFactor::One,
                crate::gal::BlendFactor::OneMinusSrcAlpha,
            );
        } else {
            state |= StateFlags::DEPTH_WRITE;
        }
        state
    }

    #[must_use]
    pub fn is_transparent(&self) -> bool {
        self.def.alpha_blended
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_fills_defaults() {
        let json = br#"{ "shader": "pipelines/standard.shd" }"#;
        let def = MaterialDef::parse(json).unwrap();
        assert_eq!(def.layer, "default");
        assert!(def.backface_culling);
        assert_eq!(def.color, [1.0; 4]);
    }

    #[test]
    fn sort_key_groups_identical_stacks() {
        let mut a = MaterialResource::new("a.mat");
        let mut b = MaterialResource::new("b.mat");
        let json = br#"{ "shader": "s.shd", "textures": ["t.ptx"] }"#;
        assert!(a.load(json));
        assert!(b.load(json));
        a.on_before_ready();
        b.on_before_ready();
        assert_eq!(a.sort_key, b.sort_key);
    }

    #[test]
    fn opaque_material_writes_depth() {
        let mut m = MaterialResource::new("m.mat");
        assert!(m.load(br#"{ "shader": "s.shd" }"#));
        assert!(m.state().contains(StateFlags::DEPTH_WRITE));
        assert!(m.load(br#"{ "shader": "s.shd", "alpha_blended": true }"#));
        assert!(!m.state().contains(StateFlags::DEPTH_WRITE));
        assert!(m.state().has_blend());
    }
}
