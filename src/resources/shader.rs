//! Shader Resources
//!
//! A shader resource holds preprocessed WGSL source. Includes are resolved
//! at load time through the hub's synchronous raw-read hook. Permutations
//! are selected by a 32-bit define mask: each `(mask, state, layout)`
//! combination maps to one GAL program, created lazily through the draw
//! stream and cached on the resource.
//!
//! Preprocessed sources are memoized in the persisted blob cache keyed by
//! `StableHash(source ‖ mask ‖ topology)`.

use rustc_hash::FxHashMap;

use crate::errors::Result;
use crate::gal::{
    Gpu, PrimitiveTopology, ProgramDesc, ProgramHandle, StateFlags, VertexDecl,
};
use crate::resources::resource::{ResourceHeader, ResourceState};
use crate::stream::DrawStream;
use crate::utils::hash::{StableHash, StableHasher};

/// Registry of shader define names. Bit positions in the 32-bit define
/// mask are assigned on first registration and stable for the process.
#[derive(Default)]
pub struct DefineRegistry {
    names: Vec<String>,
    by_name: FxHashMap<String, u8>,
}

impl DefineRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `name`, registering it on first use. Panics past 32
    /// defines: the mask is a hard 32-bit contract.
    pub fn index(&mut self, name: &str) -> u8 {
        if let Some(&idx) = self.by_name.get(name) {
            return idx;
        }
        let idx = self.names.len() as u8;
        assert!(idx < 32, "shader define space exhausted");
        self.names.push(name.to_string());
        self.by_name.insert(name.to_string(), idx);
        idx
    }

    /// Mask bit of `name`.
    pub fn mask(&mut self, name: &str) -> u32 {
        1 << self.index(name)
    }

    #[must_use]
    pub fn name(&self, index: u8) -> Option<&str> {
        self.names.get(index as usize).map(String::as_str)
    }
}

/// Cache key of one shader permutation.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct PermutationKey {
    mask: u32,
    state: u64,
    decl_hash: u64,
}

/// A loaded shader resource.
pub struct ShaderResource {
    pub header: ResourceHeader,
    /// Source with includes resolved; empty until loaded.
    pub source: String,
    pub is_compute: bool,
    pub topology: PrimitiveTopology,
    programs: FxHashMap<PermutationKey, ProgramHandle>,
}

/// Include directive: `//include "path"` on its own line.
fn include_path(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix("//include")?.trim();
    rest.strip_prefix('"')?.strip_suffix('"')
}

impl ShaderResource {
    #[must_use]
    pub fn new(path: &str) -> Self {
        Self {
            header: ResourceHeader::new(path),
            source: String::new(),
            is_compute: false,
            topology: PrimitiveTopology::Triangles,
            programs: FxHashMap::default(),
        }
    }

    /// Parses the raw source, resolving `//include` lines through
    /// `read_include`. Dependencies load synchronously: includes are tiny
    /// and shared, and the hook may interpose pre-resolved content.
    pub fn load(
        &mut self,
        bytes: &[u8],
        read_include: &mut dyn FnMut(&str) -> Result<Vec<u8>>,
    ) -> bool {
        let Ok(text) = std::str::from_utf8(bytes) else {
            log::error!("{}: shader source is not UTF-8", self.header.path);
            return false;
        };
        let mut source = String::with_capacity(text.len());
        for line in text.lines() {
            if let Some(path) = include_path(line) {
                match read_include(path) {
                    Ok(included) => {
                        source.push_str(&String::from_utf8_lossy(&included));
                        source.push('\n');
                    }
                    Err(err) => {
                        log::error!("{}: include '{path}' failed: {err}", self.header.path);
                        return false;
                    }
                }
            } else {
                source.push_str(line);
                source.push('\n');
            }
        }
        self.is_compute = source.contains("@compute");
        self.source = source;
        self.header.size = bytes.len() as u64;
        true
    }

    pub fn unload(&mut self) {
        self.source.clear();
        self.programs.clear();
        self.header.state = ResourceState::Empty;
    }

    /// Stable hash of one permutation, used as the blob-cache key.
    #[must_use]
    pub fn permutation_hash(&self, mask: u32, defines: &DefineRegistry) -> StableHash {
        let mut h = StableHasher::new();
        h.write(self.source.as_bytes());
        h.write_u32(mask);
        h.write(&[self.topology as u8]);
        let _ = defines;
        h.finish()
    }

    /// Source with the define prelude for `mask` prepended.
    #[must_use]
    pub fn preprocessed(&self, mask: u32, defines: &DefineRegistry) -> String {
        let mut out = String::with_capacity(self.source.len() + 256);
        for bit in 0..32u8 {
            if mask & (1 << bit) != 0 {
                if let Some(name) = defines.name(bit) {
                    out.push_str(&format!("const {name}: u32 = 1u;\n"));
                }
            }
        }
        out.push_str(&self.source);
        out
    }

    /// Resolves the GAL program for `(mask, state, decl)`, recording its
    /// creation into `stream` on a cache miss.
    pub fn program(
        &mut self,
        gpu: &Gpu,
        stream: &mut DrawStream,
        defines: &DefineRegistry,
        decl: &VertexDecl,
        state: StateFlags,
        mask: u32,
    ) -> ProgramHandle {
        let mut decl_hasher = StableHasher::new();
        for a in &decl.attributes {
            decl_hasher.write(&[a.semantic as u8, a.ty as u8, a.components]);
        }
        let key = PermutationKey {
            mask,
            state: state.bits(),
            decl_hash: decl_hasher.finish().value(),
        };
        if let Some(&program) = self.programs.get(&key) {
            return program;
        }

        let source = self.preprocessed(mask, defines);
        let handle = gpu.alloc_program_handle();
        let name = format!("{}#{mask:x}", self.header.path);
        let decl = decl.clone();
        let topology = self.topology;
        // Program creation is deferred to the render thread; the handle is
        // usable immediately.
        stream.push_lambda(move |gpu: &mut Gpu| {
            let (vertex_src, fragment_src, compute_src) = if source.contains("@compute") {
                (None, None, Some(source.as_str()))
            } else {
                (Some(source.as_str()), Some(source.as_str()), None)
            };
            gpu.create_program(
                handle,
                &ProgramDesc {
                    vertex_src,
                    fragment_src,
                    compute_src,
                    decl,
                    state,
                    topology,
                    debug_name: &name,
                },
            );
        });
        self.programs.insert(key, handle);
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_indices_are_stable() {
        let mut reg = DefineRegistry::new();
        let a = reg.index("EXTRACT");
        let b = reg.index("BLUR_H");
        assert_eq!(reg.index("EXTRACT"), a);
        assert_ne!(a, b);
        assert_eq!(reg.mask("EXTRACT"), 1 << a);
        assert_eq!(reg.name(b), Some("BLUR_H"));
    }

    #[test]
    fn includes_are_spliced() {
        let mut shader = ShaderResource::new("pipelines/bloom.shd");
        let ok = shader.load(
            b"//include \"common.inc\"\nfn body() {}\n",
            &mut |path| {
                assert_eq!(path, "common.inc");
                Ok(b"fn common() {}".to_vec())
            },
        );
        assert!(ok);
        assert!(shader.source.contains("fn common()"));
        assert!(shader.source.contains("fn body()"));
    }

    #[test]
    fn failed_include_fails_load() {
        let mut shader = ShaderResource::new("pipelines/bloom.shd");
        let ok = shader.load(b"//include \"missing.inc\"\n", &mut |path| {
            Err(crate::errors::PyreError::ResourceNotFound(path.to_string()))
        });
        assert!(!ok);
    }

    #[test]
    fn permutation_hash_separates_masks() {
        let mut shader = ShaderResource::new("s.shd");
        let _ = shader.load(b"fn main() {}", &mut |_| Ok(Vec::new()));
        let defines = DefineRegistry::new();
        assert_ne!(
            shader.permutation_hash(0, &defines),
            shader.permutation_hash(1, &defines)
        );
    }

    #[test]
    fn define_prelude_prepends_constants() {
        let mut shader = ShaderResource::new("s.shd");
        let _ = shader.load(b"fn main() {}", &mut |_| Ok(Vec::new()));
        let mut defines = DefineRegistry::new();
        let mask = defines.mask("DOWNSCALE");
        let source = shader.preprocessed(mask, &defines);
        assert!(source.starts_with("const DOWNSCALE: u32 = 1u;"));
    }
}
