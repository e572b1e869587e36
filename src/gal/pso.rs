//! PSO & Root Signature Cache
//!
//! Deterministic mapping from `(program, render-target layout)` to pipeline
//! state objects. The state word is baked into the program's stable hash,
//! so the graphics key is just `hash(shader_hash, depth format, color
//! formats)`: identical shader + target layout maps to one PSO no matter
//! which framebuffer holds the targets.
//!
//! The fixed [`RootLayout`] mirrors the original root signature: six
//! uniform slots, a bindless texture table, a sampler table, and a bounded
//! storage-buffer table. Created once at init, shared by every pipeline.

use std::hash::{Hash, Hasher};
use std::num::NonZeroU32;

use rustc_hash::{FxHashMap, FxHasher};
use smallvec::SmallVec;

use crate::gal::program::{Program, ProgramStages, StateFlags, StencilFunc};
use crate::utils::hash::StableHash;

/// Uniform block slots available to every shader. Slot assignments are part
/// of the shader contract: 0 global, 1 pass/view, 2 material, 3 object,
/// 4 lights, 5 scratch (`set_uniform`).
pub const UNIFORM_SLOT_COUNT: u32 = 6;
/// Slot used by [`Pipeline::pass`](crate::pipeline::Pipeline::pass).
pub const UNIFORM_SLOT_PASS: u32 = 1;
/// Scratch slot used by [`Pipeline::set_uniform`](crate::pipeline::Pipeline::set_uniform).
pub const UNIFORM_SLOT_SCRATCH: u32 = 5;

/// Capacity of the bindless texture table in the root layout.
pub const BINDLESS_TABLE_SIZE: u32 = 4096;
/// Bounded storage-buffer table size ("shader buffers").
pub const SHADER_BUFFER_TABLE_SIZE: u32 = 8;

/// Handle into [`PsoCache`]'s render pipeline storage.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RenderPsoId(u32);

/// Handle into [`PsoCache`]'s compute pipeline storage.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ComputePsoId(u32);

/// Render-target layout half of the graphics PSO key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct FramebufferLayout {
    pub color_formats: SmallVec<[wgpu::TextureFormat; 8]>,
    pub depth_format: Option<wgpu::TextureFormat>,
}

impl FramebufferLayout {
    fn key(&self, shader_hash: StableHash) -> u64 {
        let mut h = FxHasher::default();
        shader_hash.value().hash(&mut h);
        self.hash(&mut h);
        h.finish()
    }
}

/// The fixed root signature equivalent: bind group layouts shared by all
/// pipelines.
pub struct RootLayout {
    pub uniforms: wgpu::BindGroupLayout,
    pub bindless_textures: wgpu::BindGroupLayout,
    pub samplers: wgpu::BindGroupLayout,
    pub shader_buffers: wgpu::BindGroupLayout,
    pub pipeline_layout: wgpu::PipelineLayout,
}

impl RootLayout {
    #[must_use]
    pub fn new(device: &wgpu::Device) -> Self {
        let uniform_entries: Vec<wgpu::BindGroupLayoutEntry> = (0..UNIFORM_SLOT_COUNT)
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT.union(wgpu::ShaderStages::COMPUTE),
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        let uniforms = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Root Uniform Slots"),
            entries: &uniform_entries,
        });

        let bindless_textures = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Root Bindless Textures"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT.union(wgpu::ShaderStages::COMPUTE),
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: Some(NonZeroU32::new(BINDLESS_TABLE_SIZE).unwrap()),
            }],
        });

        let sampler_entries: Vec<wgpu::BindGroupLayoutEntry> = (0..6)
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT.union(wgpu::ShaderStages::COMPUTE),
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            })
            .collect();
        let samplers = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Root Samplers"),
            entries: &sampler_entries,
        });

        let buffer_entries: Vec<wgpu::BindGroupLayoutEntry> = (0..SHADER_BUFFER_TABLE_SIZE)
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT.union(wgpu::ShaderStages::COMPUTE),
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        let shader_buffers = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Root Shader Buffers"),
            entries: &buffer_entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Root Layout"),
            bind_group_layouts: &[
                Some(&uniforms),
                Some(&bindless_textures),
                Some(&samplers),
                Some(&shader_buffers),
            ],
            immediate_size: 0,
        });

        Self {
            uniforms,
            bindless_textures,
            samplers,
            shader_buffers,
            pipeline_layout,
        }
    }
}

/// Central PSO storage and deduplication cache.
pub struct PsoCache {
    render_pipelines: Vec<wgpu::RenderPipeline>,
    compute_pipelines: Vec<wgpu::ComputePipeline>,
    graphics_lookup: FxHashMap<u64, RenderPsoId>,
    compute_lookup: FxHashMap<u64, ComputePsoId>,
}

impl Default for PsoCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PsoCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            render_pipelines: Vec::with_capacity(64),
            compute_pipelines: Vec::with_capacity(16),
            graphics_lookup: FxHashMap::default(),
            compute_lookup: FxHashMap::default(),
        }
    }

    /// Cache key for a graphics PSO. Exposed for determinism tests.
    #[must_use]
    pub fn graphics_key(shader_hash: StableHash, fb: &FramebufferLayout) -> u64 {
        fb.key(shader_hash)
    }

    #[inline]
    #[must_use]
    pub fn get_render_pipeline(&self, id: RenderPsoId) -> &wgpu::RenderPipeline {
        &self.render_pipelines[id.0 as usize]
    }

    #[inline]
    #[must_use]
    pub fn get_compute_pipeline(&self, id: ComputePsoId) -> &wgpu::ComputePipeline {
        &self.compute_pipelines[id.0 as usize]
    }

    /// Look up or create the graphics PSO for `program` against `fb`.
    pub fn get_or_create_graphics(
        &mut self,
        device: &wgpu::Device,
        root: &RootLayout,
        program: &Program,
        fb: &FramebufferLayout,
    ) -> RenderPsoId {
        let key = fb.key(program.hash);
        if let Some(&id) = self.graphics_lookup.get(&key) {
            return id;
        }

        let ProgramStages::Graphics { vertex, fragment } = &program.stages else {
            panic!("graphics PSO requested for compute program {}", program.debug_name);
        };

        let state = program.state;
        let attributes: Vec<wgpu::VertexAttribute> = program
            .decl
            .attributes
            .iter()
            .enumerate()
            .map(|(i, a)| wgpu::VertexAttribute {
                format: a.native_format(),
                offset: u64::from(a.byte_offset),
                shader_location: i as u32,
            })
            .collect();
        let vertex_buffers = if attributes.is_empty() {
            vec![]
        } else {
            vec![wgpu::VertexBufferLayout {
                array_stride: u64::from(program.decl.stride),
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &attributes,
            }]
        };

        let blend = if state.has_blend() {
            let (src_rgb, dst_rgb, src_a, dst_a) = state.blend_factors();
            Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: src_rgb.native(),
                    dst_factor: dst_rgb.native(),
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent {
                    src_factor: src_a.native(),
                    dst_factor: dst_a.native(),
                    operation: wgpu::BlendOperation::Add,
                },
            })
        } else {
            None
        };

        let color_targets: Vec<Option<wgpu::ColorTargetState>> = fb
            .color_formats
            .iter()
            .map(|&format| {
                Some(wgpu::ColorTargetState {
                    format,
                    blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let depth_stencil = fb.depth_format.map(|format| {
            let stencil = if state.stencil_func() == StencilFunc::Disabled {
                wgpu::StencilState::default()
            } else {
                let compare = match state.stencil_func() {
                    StencilFunc::Always => wgpu::CompareFunction::Always,
                    StencilFunc::Equal => wgpu::CompareFunction::Equal,
                    StencilFunc::NotEqual => wgpu::CompareFunction::NotEqual,
                    StencilFunc::Disabled => unreachable!(),
                };
                let (sfail, zfail, zpass) = state.stencil_ops();
                let (_, read_mask, write_mask) = state.stencil_masks();
                let face = wgpu::StencilFaceState {
                    compare,
                    fail_op: sfail.native(),
                    depth_fail_op: zfail.native(),
                    pass_op: zpass.native(),
                };
                wgpu::StencilState {
                    front: face,
                    back: face,
                    read_mask: u32::from(read_mask),
                    write_mask: u32::from(write_mask),
                }
            };
            wgpu::DepthStencilState {
                format,
                depth_write_enabled: Some(state.contains(StateFlags::DEPTH_WRITE)),
                depth_compare: Some(state.depth_compare()),
                stencil,
                bias: wgpu::DepthBiasState::default(),
            }
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&program.debug_name),
            layout: Some(&root.pipeline_layout),
            vertex: wgpu::VertexState {
                module: vertex,
                entry_point: Some("vs_main"),
                buffers: &vertex_buffers,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: fragment,
                entry_point: Some("fs_main"),
                targets: &color_targets,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: program.topology.native(),
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: state.cull_mode(),
                polygon_mode: if state.contains(StateFlags::WIREFRAME) {
                    wgpu::PolygonMode::Line
                } else {
                    wgpu::PolygonMode::Fill
                },
                ..Default::default()
            },
            depth_stencil,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        let id = RenderPsoId(self.render_pipelines.len() as u32);
        self.render_pipelines.push(pipeline);
        self.graphics_lookup.insert(key, id);
        id
    }

    /// Look up or create the compute PSO for `program`. Keyed by the
    /// program's stable hash alone.
    pub fn get_or_create_compute(
        &mut self,
        device: &wgpu::Device,
        root: &RootLayout,
        program: &Program,
    ) -> ComputePsoId {
        let key = program.hash.value();
        if let Some(&id) = self.compute_lookup.get(&key) {
            return id;
        }

        let ProgramStages::Compute(module) = &program.stages else {
            panic!("compute PSO requested for graphics program {}", program.debug_name);
        };

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(&program.debug_name),
            layout: Some(&root.pipeline_layout),
            module,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        let id = ComputePsoId(self.compute_pipelines.len() as u32);
        self.compute_pipelines.push(pipeline);
        self.compute_lookup.insert(key, id);
        id
    }

    #[must_use]
    pub fn render_pipeline_count(&self) -> usize {
        self.render_pipelines.len()
    }

    #[must_use]
    pub fn compute_pipeline_count(&self) -> usize {
        self.compute_pipelines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graphics_key_is_deterministic_across_calls() {
        let hash = StableHash::of(b"shader");
        let fb = FramebufferLayout {
            color_formats: smallvec::smallvec![wgpu::TextureFormat::Rgba16Float],
            depth_format: Some(wgpu::TextureFormat::Depth32Float),
        };
        assert_eq!(PsoCache::graphics_key(hash, &fb), PsoCache::graphics_key(hash, &fb));
    }

    #[test]
    fn graphics_key_separates_target_layouts() {
        let hash = StableHash::of(b"shader");
        let a = FramebufferLayout {
            color_formats: smallvec::smallvec![wgpu::TextureFormat::Rgba16Float],
            depth_format: None,
        };
        let b = FramebufferLayout {
            color_formats: smallvec::smallvec![wgpu::TextureFormat::Rgba8Unorm],
            depth_format: None,
        };
        assert_ne!(PsoCache::graphics_key(hash, &a), PsoCache::graphics_key(hash, &b));
    }
}
