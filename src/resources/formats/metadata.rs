//! Import Metadata Sidecars
//!
//! Each source asset may carry a `<path>.meta` JSON sidecar storing its
//! import parameters. Unknown fields are preserved for forward
//! compatibility with newer importers.

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Import parameters persisted next to a source file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Metadata {
    pub scale: f32,
    pub create_impostor: bool,
    pub split_meshes: bool,
    pub lod_count: u32,
    pub srgb: bool,
    pub compress: bool,
    /// Unrecognized fields from newer tool versions.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            scale: 1.0,
            create_impostor: false,
            split_meshes: false,
            lod_count: 1,
            srgb: true,
            compress: true,
            extra: serde_json::Map::new(),
        }
    }
}

impl Metadata {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    #[must_use]
    pub fn serialize(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Sidecar path of a source file.
    #[must_use]
    pub fn sidecar_path(source: &str) -> String {
        format!("{source}.meta")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_survive_round_trip() {
        let text = r#"{ "scale": 0.01, "future_knob": 42 }"#;
        let meta = Metadata::parse(text).unwrap();
        assert!((meta.scale - 0.01).abs() < 1e-6);
        let out = meta.serialize();
        let again = Metadata::parse(&out).unwrap();
        assert_eq!(again.extra.get("future_knob"), meta.extra.get("future_knob"));
    }

    #[test]
    fn sidecar_path_appends_meta() {
        assert_eq!(Metadata::sidecar_path("models/cube.msh"), "models/cube.msh.meta");
    }
}
