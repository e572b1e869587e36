//! Bind Group Assembly
//!
//! The draw-stream executor drives these [`Gpu`] methods to turn the fixed
//! root layout into native bind groups: the per-combination uniform-slot
//! group (dynamic offsets into the frame scratch or GAL buffers), the
//! rebuilt-on-change bindless texture table, the static sampler table, and
//! the bounded shader-buffer table.

use std::num::NonZeroU64;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::gal::pso::{FramebufferLayout, UNIFORM_SLOT_COUNT};
use crate::gal::texture::ResourceState;
use crate::gal::{
    BufferHandle, ComputePsoId, Gpu, ProgramHandle, RenderPsoId, TextureHandle,
};
use crate::stream::ClearCmdState;

/// Maximum byte size of one dynamic uniform binding.
pub const UNIFORM_BINDING_SIZE: u64 = 65536;

/// Source of one of the six uniform slots.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum UniformBinding {
    #[default]
    None,
    /// Range in the current frame's scratch upload buffer.
    Scratch { offset: u64 },
    /// Range in a GAL buffer.
    Buffer { buffer: BufferHandle, offset: u64 },
}

/// Caches owned by [`Gpu`] for executor-built bind groups.
#[derive(Default)]
pub struct BindGroupCaches {
    // Keyed by (buffer combination, frame index): scratch-backed slots
    // point at the per-frame scratch buffer.
    pub(crate) uniform_groups:
        FxHashMap<([u64; UNIFORM_SLOT_COUNT as usize], usize), wgpu::BindGroup>,
    pub(crate) storage_groups: FxHashMap<[u64; 8], wgpu::BindGroup>,
    pub(crate) bindless_group: Option<wgpu::BindGroup>,
    pub(crate) bindless_dirty: bool,
    pub(crate) sampler_group: Option<wgpu::BindGroup>,
}

impl Gpu {
    /// Resolves the uniform-slot bind group for the given sources and the
    /// dynamic offsets to set with it. Groups are cached per buffer
    /// combination; offsets vary freely.
    pub(crate) fn uniform_bind_group(
        &mut self,
        slots: &[UniformBinding; UNIFORM_SLOT_COUNT as usize],
    ) -> (wgpu::BindGroup, [u32; UNIFORM_SLOT_COUNT as usize]) {
        let mut key = [0u64; UNIFORM_SLOT_COUNT as usize];
        let mut offsets = [0u32; UNIFORM_SLOT_COUNT as usize];
        for (i, slot) in slots.iter().enumerate() {
            match *slot {
                UniformBinding::None | UniformBinding::Scratch { .. } => {
                    key[i] = 0;
                    if let UniformBinding::Scratch { offset } = *slot {
                        offsets[i] = offset as u32;
                    }
                }
                UniformBinding::Buffer { buffer, offset } => {
                    key[i] = buffer.0;
                    offsets[i] = offset as u32;
                }
            }
        }

        let cache_key = (key, self.frame_index);
        if let Some(group) = self.binding_caches.uniform_groups.get(&cache_key) {
            return (group.clone(), offsets);
        }

        let scratch = &self.frames[self.frame_index].scratch.gpu;
        let entries: Vec<wgpu::BindGroupEntry> = slots
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                let (buffer, total) = match *slot {
                    UniformBinding::Buffer { buffer, .. } => self
                        .buffers
                        .get(&buffer)
                        .map_or((scratch, UNIFORM_BINDING_SIZE), |b| (&b.buffer, b.size)),
                    _ => (scratch, UNIFORM_BINDING_SIZE),
                };
                wgpu::BindGroupEntry {
                    binding: i as u32,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer,
                        offset: 0,
                        size: NonZeroU64::new(UNIFORM_BINDING_SIZE.min(total)),
                    }),
                }
            })
            .collect();
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Uniform Slots"),
            layout: &self.root.uniforms,
            entries: &entries,
        });
        self.binding_caches.uniform_groups.insert(cache_key, group.clone());
        (group, offsets)
    }

    /// The bounded shader-buffer table bind group. Empty entries fall back
    /// to the null buffer.
    pub(crate) fn storage_bind_group(&mut self, table: &[BufferHandle; 8]) -> wgpu::BindGroup {
        let key: [u64; 8] = std::array::from_fn(|i| table[i].0);
        if let Some(group) = self.binding_caches.storage_groups.get(&key) {
            return group.clone();
        }
        let null = &self.buffers[&self.null_buffer].buffer;
        let entries: Vec<wgpu::BindGroupEntry> = table
            .iter()
            .enumerate()
            .map(|(i, handle)| {
                let buffer = self.buffers.get(handle).map_or(null, |b| &b.buffer);
                wgpu::BindGroupEntry {
                    binding: i as u32,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer,
                        offset: 0,
                        size: None,
                    }),
                }
            })
            .collect();
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Shader Buffers"),
            layout: &self.root.shader_buffers,
            entries: &entries,
        });
        self.binding_caches.storage_groups.insert(key, group.clone());
        group
    }

    /// The bindless texture table, rebuilt lazily after slot churn.
    pub(crate) fn bindless_bind_group(&mut self) -> wgpu::BindGroup {
        if !self.binding_caches.bindless_dirty {
            if let Some(group) = &self.binding_caches.bindless_group {
                return group.clone();
            }
        }
        let null_view = &self.textures[&self.null_texture].view;
        let mut views: Vec<&wgpu::TextureView> =
            vec![null_view; crate::gal::pso::BINDLESS_TABLE_SIZE as usize];
        for texture in self.textures.values() {
            // The table is a filterable-float array; depth and 32-bit float
            // formats stay on the null entry.
            // TODO: add a second binding array with Depth sample type so
            // depth reads go bindless too instead of through dedicated
            // bindings.
            let filterable = !matches!(
                texture.desc.format,
                crate::gal::TextureFormat::D32
                    | crate::gal::TextureFormat::D24S8
                    | crate::gal::TextureFormat::R32F
                    | crate::gal::TextureFormat::RG32F
                    | crate::gal::TextureFormat::RGBA32F
            );
            let index = texture.slot.index() as usize;
            if filterable && index < views.len() {
                views[index] = &texture.view;
            }
        }
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bindless Textures"),
            layout: &self.root.bindless_textures,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureViewArray(&views),
            }],
        });
        self.binding_caches.bindless_group = Some(group.clone());
        self.binding_caches.bindless_dirty = false;
        group
    }

    /// The static sampler table.
    pub(crate) fn sampler_bind_group(&mut self) -> wgpu::BindGroup {
        if let Some(group) = &self.binding_caches.sampler_group {
            return group.clone();
        }
        let entries: Vec<wgpu::BindGroupEntry> = self
            .samplers
            .samplers
            .iter()
            .enumerate()
            .map(|(i, sampler)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: wgpu::BindingResource::Sampler(sampler),
            })
            .collect();
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Samplers"),
            layout: &self.root.samplers,
            entries: &entries,
        });
        self.binding_caches.sampler_group = Some(group.clone());
        group
    }

    /// Marks the bindless table for rebuild (called on texture churn).
    pub(crate) fn invalidate_bindless(&mut self) {
        self.binding_caches.bindless_dirty = true;
    }

    // ── PSO resolution ──────────────────────────────────────────────────────

    /// Framebuffer layout of the given attachment set.
    pub(crate) fn framebuffer_layout(
        &self,
        colors: &[TextureHandle],
        depth_stencil: Option<TextureHandle>,
    ) -> FramebufferLayout {
        let color_formats = colors
            .iter()
            .filter_map(|h| self.textures.get(h))
            .map(|t| t.desc.format.native(t.desc.flags))
            .collect();
        let depth_format = depth_stencil
            .and_then(|h| self.textures.get(&h))
            .map(|t| t.desc.format.native(t.desc.flags));
        FramebufferLayout {
            color_formats,
            depth_format,
        }
    }

    /// Graphics PSO for `program` against `fb`, from the deterministic
    /// cache. `None` when the program is stale or compute.
    pub(crate) fn resolve_graphics_pso(
        &mut self,
        program: ProgramHandle,
        fb: &FramebufferLayout,
    ) -> Option<RenderPsoId> {
        let prog = self.programs.get(&program)?;
        if prog.is_compute() {
            return None;
        }
        Some(self.pso.get_or_create_graphics(&self.device, &self.root, prog, fb))
    }

    /// Compute PSO for `program`.
    pub(crate) fn resolve_compute_pso(&mut self, program: ProgramHandle) -> Option<ComputePsoId> {
        let prog = self.programs.get(&program)?;
        if !prog.is_compute() {
            return None;
        }
        Some(self.pso.get_or_create_compute(&self.device, &self.root, prog))
    }

    // ── Pass construction ───────────────────────────────────────────────────

    /// Opens a native render pass over the bound attachments, emitting the
    /// lazy state transitions and honoring a pending clear.
    pub(crate) fn open_render_pass(
        &mut self,
        colors: &[TextureHandle],
        depth_stencil: Option<TextureHandle>,
        readonly_ds: bool,
        clear: Option<&ClearCmdState>,
    ) -> wgpu::RenderPass<'static> {
        use crate::stream::ClearFlags;

        for &handle in colors {
            if let Some(t) = self.textures.get_mut(&handle) {
                t.set_state(ResourceState::RenderTarget);
            }
        }
        if let Some(handle) = depth_stencil {
            if let Some(t) = self.textures.get_mut(&handle) {
                t.set_state(if readonly_ds {
                    ResourceState::DepthRead
                } else {
                    ResourceState::DepthWrite
                });
            }
        }
        self.attachment_ring
            .write(colors.len() as u32 + u32::from(depth_stencil.is_some()));

        let clear_color = clear.filter(|c| c.flags.contains(ClearFlags::COLOR));
        let clear_depth = clear.filter(|c| c.flags.contains(ClearFlags::DEPTH));
        let clear_stencil = clear.filter(|c| c.flags.contains(ClearFlags::STENCIL));

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = colors
            .iter()
            .filter_map(|h| self.textures.get(h))
            .map(|t| {
                Some(wgpu::RenderPassColorAttachment {
                    view: &t.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: clear_color.map_or(wgpu::LoadOp::Load, |c| {
                            wgpu::LoadOp::Clear(wgpu::Color {
                                r: f64::from(c.color[0]),
                                g: f64::from(c.color[1]),
                                b: f64::from(c.color[2]),
                                a: f64::from(c.color[3]),
                            })
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })
            })
            .collect();

        let depth_stencil_attachment = depth_stencil
            .and_then(|h| self.textures.get(&h))
            .map(|t| {
                let has_stencil = t.desc.format.native(t.desc.flags)
                    == wgpu::TextureFormat::Depth24PlusStencil8;
                // Read-only binding: no ops, the depth may be sampled in
                // the same pass.
                let depth_ops = (!readonly_ds).then(|| wgpu::Operations {
                    load: clear_depth.map_or(wgpu::LoadOp::Load, |c| wgpu::LoadOp::Clear(c.depth)),
                    store: wgpu::StoreOp::Store,
                });
                let stencil_ops = (has_stencil && !readonly_ds).then(|| wgpu::Operations {
                    load: clear_stencil
                        .map_or(wgpu::LoadOp::Load, |c| wgpu::LoadOp::Clear(c.stencil)),
                    store: wgpu::StoreOp::Store,
                });
                wgpu::RenderPassDepthStencilAttachment {
                    view: &t.view,
                    depth_ops,
                    stencil_ops,
                }
            });

        let encoder = self.encoder.as_mut().expect("render pass outside a frame");
        encoder
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: None,
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            })
            .forget_lifetime()
    }

    /// Opens a native compute pass.
    pub(crate) fn open_compute_pass(&mut self) -> wgpu::ComputePass<'static> {
        let encoder = self.encoder.as_mut().expect("compute pass outside a frame");
        encoder
            .begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: None,
                timestamp_writes: None,
            })
            .forget_lifetime()
    }

    /// Registers this frame's backbuffer of `window` as a GAL texture so
    /// pipelines can target it. The handle is valid for one frame; the
    /// caller destroys it after present.
    pub fn register_backbuffer(
        &mut self,
        window: crate::gal::WindowId,
        width: u32,
        height: u32,
    ) -> crate::errors::Result<TextureHandle> {
        let frame_counter = self.frame_counter;
        let view = self
            .swapchains
            .acquire(&self.device, window, frame_counter)?;
        let slot_texture = self
            .swapchains
            .get(window)
            .and_then(|s| s.current.as_ref().map(|t| t.texture.clone()))
            .expect("backbuffer acquired above");
        let format = slot_texture.format();
        let handle = TextureHandle(crate::gal::next_handle());
        self.textures.insert(
            handle,
            crate::gal::GpuTexture {
                desc: crate::gal::TextureDesc {
                    width,
                    height,
                    depth: 1,
                    mip_count: 1,
                    format: crate::gal::TextureFormat::RGBA8,
                    flags: crate::gal::TextureFlags::RENDER_TARGET
                        | crate::gal::TextureFlags::NO_MIPS,
                },
                texture: slot_texture,
                view,
                rw_view: None,
                slot: self.heap.reserve(),
                state: crate::gal::StateTag::new(ResourceState::Present),
                is_view: true,
                debug_name: format!("backbuffer_{format:?}"),
            },
        );
        self.invalidate_bindless();
        Ok(handle)
    }
}
