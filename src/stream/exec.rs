//! Draw Stream Executor
//!
//! Drains a merged [`DrawStream`] into GAL calls on the render thread. One
//! dispatch loop, one opcode at a time; native render/compute passes open
//! lazily at the first command that needs one and close whenever a command
//! cannot run inside a pass (copies, barriers, lambdas, debug groups).
//!
//! The executor also enforces the bind-idempotence contract: re-issuing
//! `use_program` with the bound program costs zero extra PSO binds.

use smallvec::SmallVec;

use crate::gal::binding::UniformBinding;
use crate::gal::pso::UNIFORM_SLOT_COUNT;
use crate::gal::query::QueryKind;
use crate::gal::texture::ResourceState;
use crate::gal::{
    BufferFlags, BufferHandle, Gpu, ProgramHandle, QueryHandle, RenderPsoId, TextureFlags,
    TextureFormat, TextureHandle,
};
use crate::gal::frame::QueryResolve;
use crate::stream::{
    BarrierCmd, BindIndexBufferCmd, BindUniformBufferCmd, BindVertexBufferCmd, ClearCmd,
    ClearCmdState, ClearFlags, CopyTextureCmd, CreateBufferCmd, CreateTextureCmd,
    CreateTextureViewCmd, DispatchCmd, DrawCmd, DrawIndirectCmd, DrawStream, Op, RectCmd,
    SetFramebufferCmd, StreamReader, UpdateTextureCmd,
};

/// Counters produced by one execution; consumed by tests and profiling.
#[derive(Default, Debug, Clone, Copy)]
pub struct ExecStats {
    pub commands: u32,
    pub draws: u32,
    pub dispatches: u32,
    pub pso_binds: u32,
    pub render_passes: u32,
    pub memory_barriers: u32,
}

#[derive(Default)]
struct FramebufferState {
    colors: SmallVec<[TextureHandle; 8]>,
    depth_stencil: Option<TextureHandle>,
    readonly_ds: bool,
}

struct VertexBinding {
    buffer: BufferHandle,
    offset: u64,
}

/// Executor state for one stream drain.
struct Exec {
    stats: ExecStats,
    fb: FramebufferState,
    pending_clear: Option<ClearCmdState>,
    pass: Option<wgpu::RenderPass<'static>>,
    cpass: Option<wgpu::ComputePass<'static>>,
    program: ProgramHandle,
    bound_pso: Option<RenderPsoId>,
    vertex_bindings: [Option<VertexBinding>; 2],
    index_binding: Option<BindIndexBufferCmd>,
    uniforms: [UniformBinding; UNIFORM_SLOT_COUNT as usize],
    uniforms_dirty: bool,
    shader_buffers: [BufferHandle; 8],
    shader_buffers_dirty: bool,
    viewport: Option<RectCmd>,
    scissor: Option<RectCmd>,
    stats_query_open: bool,
}

/// Executes `stream` against the GAL. Must run on the render thread with a
/// frame in progress.
pub fn execute(stream: DrawStream, gpu: &mut Gpu) -> ExecStats {
    let (bytes, lambdas) = stream.into_parts();
    let mut reader = StreamReader::new(&bytes, lambdas);
    let mut exec = Exec {
        stats: ExecStats::default(),
        fb: FramebufferState::default(),
        pending_clear: None,
        pass: None,
        cpass: None,
        program: ProgramHandle::INVALID,
        bound_pso: None,
        vertex_bindings: [None, None],
        index_binding: None,
        uniforms: [UniformBinding::None; UNIFORM_SLOT_COUNT as usize],
        uniforms_dirty: true,
        shader_buffers: [BufferHandle::INVALID; 8],
        shader_buffers_dirty: true,
        viewport: None,
        scissor: None,
        stats_query_open: false,
    };

    while let Some(op) = reader.next_op() {
        exec.stats.commands += 1;
        exec.step(op, &mut reader, gpu);
    }
    exec.close_passes();
    exec.stats
}

impl Exec {
    fn close_passes(&mut self) {
        if self.stats_query_open {
            if let Some(pass) = &mut self.pass {
                pass.end_pipeline_statistics_query();
            }
            self.stats_query_open = false;
        }
        if self.pass.take().is_some() {
            self.bound_pso = None;
        }
        self.cpass = None;
    }

    fn step(&mut self, op: Op, reader: &mut StreamReader<'_>, gpu: &mut Gpu) {
        match op {
            // ── Resource lifetime ─────────────────────────────────────────
            Op::CreateBuffer => {
                let cmd: CreateBufferCmd = reader.read();
                let name = reader.read_str().to_string();
                let data = (cmd.has_data != 0).then(|| reader.read_blob());
                gpu.create_buffer(
                    cmd.handle,
                    BufferFlags::from_bits_truncate(cmd.flags),
                    cmd.size,
                    data,
                    &name,
                );
            }
            Op::CreateTexture => {
                let cmd: CreateTextureCmd = reader.read();
                let name = reader.read_str().to_string();
                gpu.create_texture(
                    cmd.handle,
                    cmd.width,
                    cmd.height,
                    cmd.depth,
                    decode_format(cmd.format),
                    TextureFlags::from_bits_truncate(cmd.flags),
                    &name,
                );
            }
            Op::CreateTextureView => {
                let cmd: CreateTextureViewCmd = reader.read();
                gpu.create_texture_view(cmd.handle, cmd.src);
            }
            Op::DestroyBuffer => {
                let handle: BufferHandle = reader.read();
                gpu.destroy_buffer(handle);
            }
            Op::DestroyTexture => {
                let handle: TextureHandle = reader.read();
                gpu.destroy_texture(handle);
            }
            Op::UpdateBuffer => {
                let handle: BufferHandle = reader.read();
                let data = reader.read_blob();
                self.close_passes();
                gpu.update_buffer(handle, data);
            }
            Op::UpdateTexture => {
                let cmd: UpdateTextureCmd = reader.read();
                let data = reader.read_blob();
                self.close_passes();
                gpu.update_texture(
                    cmd.handle, cmd.mip, cmd.x, cmd.y, cmd.z, cmd.width, cmd.height, data,
                );
            }

            // ── Binding ───────────────────────────────────────────────────
            Op::BindVertexBuffer => {
                let cmd: BindVertexBufferCmd = reader.read();
                let slot = (cmd.slot as usize).min(1);
                self.vertex_bindings[slot] = Some(VertexBinding {
                    buffer: cmd.buffer,
                    offset: cmd.offset,
                });
                if let (Some(pass), Some(buffer)) = (&mut self.pass, gpu.buffer(cmd.buffer)) {
                    pass.set_vertex_buffer(cmd.slot, buffer.buffer.slice(cmd.offset..));
                }
            }
            Op::BindIndexBuffer => {
                let cmd: BindIndexBufferCmd = reader.read();
                if let (Some(pass), Some(buffer)) = (&mut self.pass, gpu.buffer(cmd.buffer)) {
                    pass.set_index_buffer(buffer.buffer.slice(..), index_format(cmd.u16_indices));
                }
                self.index_binding = Some(cmd);
            }
            Op::BindIndirectBuffer => {
                let handle: BufferHandle = reader.read();
                if let Some(buffer) = gpu.buffer_mut(handle) {
                    buffer.set_state(ResourceState::IndirectArgument);
                }
            }
            Op::BindUniformData => {
                let slot: u32 = reader.read();
                let data = reader.read_blob();
                let offset = gpu.current_frame().scratch.alloc(data);
                self.uniforms[slot as usize] = UniformBinding::Scratch { offset };
                self.uniforms_dirty = true;
            }
            Op::BindUniformBuffer => {
                let cmd: BindUniformBufferCmd = reader.read();
                self.uniforms[cmd.slot as usize] = UniformBinding::Buffer {
                    buffer: cmd.buffer,
                    offset: cmd.offset,
                };
                self.uniforms_dirty = true;
            }
            Op::BindShaderBuffers => {
                self.shader_buffers = reader.read();
                self.shader_buffers_dirty = true;
            }

            // ── Render state ──────────────────────────────────────────────
            Op::SetFramebuffer => {
                let cmd: SetFramebufferCmd = reader.read();
                self.close_passes();
                self.fb.colors = cmd.colors[..cmd.color_count as usize].iter().copied().collect();
                self.fb.depth_stencil = cmd.depth_stencil.is_valid().then_some(cmd.depth_stencil);
                self.fb.readonly_ds = cmd.readonly_ds != 0;
                self.pending_clear = None;
            }
            Op::Viewport => {
                let rect: RectCmd = reader.read();
                if let Some(pass) = &mut self.pass {
                    apply_viewport(pass, &rect);
                }
                self.viewport = Some(rect);
            }
            Op::Scissor => {
                let rect: RectCmd = reader.read();
                if let Some(pass) = &mut self.pass {
                    pass.set_scissor_rect(rect.x as u32, rect.y as u32, rect.w as u32, rect.h as u32);
                }
                self.scissor = Some(rect);
            }
            Op::Clear => {
                let cmd: ClearCmd = reader.read();
                self.close_passes();
                self.pending_clear = Some(ClearCmdState {
                    flags: ClearFlags::from_bits_truncate(cmd.flags),
                    color: cmd.color,
                    depth: cmd.depth,
                    stencil: cmd.stencil,
                });
                // Clears take effect immediately in the recorded order.
                if !self.fb.colors.is_empty() || self.fb.depth_stencil.is_some() {
                    self.open_render_pass(gpu);
                }
            }
            Op::UseProgram => {
                let program: ProgramHandle = reader.read();
                if program != self.program {
                    self.program = program;
                    self.bound_pso = None;
                }
            }

            // ── Draws ─────────────────────────────────────────────────────
            Op::DrawArrays | Op::DrawArraysInstanced => {
                let cmd: DrawCmd = reader.read();
                if self.prepare_draw(gpu) {
                    let pass = self.pass.as_mut().unwrap();
                    pass.draw(cmd.first..cmd.first + cmd.count, 0..cmd.instance_count);
                    self.stats.draws += 1;
                }
            }
            Op::DrawIndexed | Op::DrawIndexedInstanced => {
                let cmd: DrawCmd = reader.read();
                if self.prepare_draw(gpu) {
                    let pass = self.pass.as_mut().unwrap();
                    pass.draw_indexed(cmd.first..cmd.first + cmd.count, 0, 0..cmd.instance_count);
                    self.stats.draws += 1;
                }
            }
            Op::DrawIndirect => {
                let cmd: DrawIndirectCmd = reader.read();
                if self.prepare_draw(gpu) {
                    if let Some(buffer) = gpu.buffer(cmd.buffer) {
                        let pass = self.pass.as_mut().unwrap();
                        pass.draw_indirect(&buffer.buffer, cmd.offset);
                        self.stats.draws += 1;
                    }
                }
            }
            Op::Dispatch => {
                let cmd: DispatchCmd = reader.read();
                self.dispatch(gpu, &cmd);
            }
            Op::CopyTexture => {
                let cmd: CopyTextureCmd = reader.read();
                self.close_passes();
                gpu.copy_texture(cmd.dst, cmd.src, cmd.dst_x, cmd.dst_y);
            }

            // ── Barriers ──────────────────────────────────────────────────
            Op::BarrierRead => {
                let cmd: BarrierCmd = reader.read();
                self.cpass = None;
                if cmd.is_buffer != 0 {
                    if let Some(b) = gpu.buffer_mut(BufferHandle(cmd.handle)) {
                        b.set_state(ResourceState::GenericRead);
                    }
                } else if let Some(t) = gpu.texture_mut(TextureHandle(cmd.handle)) {
                    t.set_state(ResourceState::GenericRead);
                }
            }
            Op::BarrierWrite => {
                let cmd: BarrierCmd = reader.read();
                self.cpass = None;
                if cmd.is_buffer != 0 {
                    if let Some(b) = gpu.buffer_mut(BufferHandle(cmd.handle)) {
                        b.set_state(ResourceState::UnorderedAccess);
                    }
                } else if let Some(t) = gpu.texture_mut(TextureHandle(cmd.handle)) {
                    t.set_state(ResourceState::UnorderedAccess);
                }
            }
            Op::MemoryBarrier => {
                let _cmd: BarrierCmd = reader.read();
                // UAV-style sync: split compute passes so dependent
                // dispatches observe prior writes.
                self.cpass = None;
                self.stats.memory_barriers += 1;
            }

            // ── Debug & profiling ─────────────────────────────────────────
            Op::BeginDebugGroup => {
                let name = reader.read_str().to_string();
                self.close_passes();
                gpu.encoder().push_debug_group(&name);
            }
            Op::EndDebugGroup => {
                self.close_passes();
                gpu.encoder().pop_debug_group();
            }
            Op::BeginQuery => {
                let query: QueryHandle = reader.read();
                self.begin_stats_query(gpu, query);
            }
            Op::EndQuery => {
                let _query: QueryHandle = reader.read();
                if self.stats_query_open {
                    if let Some(pass) = &mut self.pass {
                        pass.end_pipeline_statistics_query();
                    }
                    self.stats_query_open = false;
                }
            }
            Op::Timestamp => {
                let query: QueryHandle = reader.read();
                self.write_timestamp(gpu, query);
            }
            Op::Lambda => {
                self.close_passes();
                if let Some(lambda) = reader.next_lambda() {
                    lambda(gpu);
                }
            }
        }
    }

    fn open_render_pass(&mut self, gpu: &mut Gpu) {
        if self.pass.is_some() {
            return;
        }
        self.cpass = None;
        let mut pass = gpu.open_render_pass(
            &self.fb.colors,
            self.fb.depth_stencil,
            self.fb.readonly_ds,
            self.pending_clear.as_ref(),
        );
        self.pending_clear = None;
        self.stats.render_passes += 1;
        if let Some(rect) = &self.viewport {
            apply_viewport(&mut pass, rect);
        }
        if let Some(rect) = &self.scissor {
            pass.set_scissor_rect(rect.x as u32, rect.y as u32, rect.w as u32, rect.h as u32);
        }
        // Re-apply retained bindings to the fresh pass.
        for (slot, binding) in self.vertex_bindings.iter().enumerate() {
            if let Some(binding) = binding {
                if let Some(buffer) = gpu.buffer(binding.buffer) {
                    pass.set_vertex_buffer(slot as u32, buffer.buffer.slice(binding.offset..));
                }
            }
        }
        if let Some(cmd) = &self.index_binding {
            if let Some(buffer) = gpu.buffer(cmd.buffer) {
                pass.set_index_buffer(buffer.buffer.slice(..), index_format(cmd.u16_indices));
            }
        }
        self.bound_pso = None;
        self.uniforms_dirty = true;
        self.shader_buffers_dirty = true;
        self.pass = Some(pass);
    }

    /// Resolves the PSO and bind groups for the current draw. Returns false
    /// when the program is unready (the draw becomes a no-op).
    fn prepare_draw(&mut self, gpu: &mut Gpu) -> bool {
        if !self.program.is_valid() {
            return false;
        }
        if self.fb.colors.is_empty() && self.fb.depth_stencil.is_none() {
            return false;
        }
        self.open_render_pass(gpu);

        let fb = gpu.framebuffer_layout(&self.fb.colors, self.fb.depth_stencil);
        let Some(pso) = gpu.resolve_graphics_pso(self.program, &fb) else {
            return false;
        };
        if self.bound_pso != Some(pso) {
            let pipeline = gpu.pso.get_render_pipeline(pso).clone();
            let pass = self.pass.as_mut().unwrap();
            pass.set_pipeline(&pipeline);
            self.bound_pso = Some(pso);
            self.stats.pso_binds += 1;
        }

        if self.uniforms_dirty {
            let (group, offsets) = gpu.uniform_bind_group(&self.uniforms);
            let bindless = gpu.bindless_bind_group();
            let samplers = gpu.sampler_bind_group();
            let pass = self.pass.as_mut().unwrap();
            pass.set_bind_group(0, &group, &offsets);
            pass.set_bind_group(1, &bindless, &[]);
            pass.set_bind_group(2, &samplers, &[]);
            self.uniforms_dirty = false;
            self.shader_buffers_dirty = true;
        }
        if self.shader_buffers_dirty {
            let storage = gpu.storage_bind_group(&self.shader_buffers);
            let pass = self.pass.as_mut().unwrap();
            pass.set_bind_group(3, &storage, &[]);
            self.shader_buffers_dirty = false;
        }
        true
    }

    fn dispatch(&mut self, gpu: &mut Gpu, cmd: &DispatchCmd) {
        if self.pass.take().is_some() {
            self.bound_pso = None;
        }
        let Some(pso) = gpu.resolve_compute_pso(cmd.program) else {
            return;
        };
        let pipeline = gpu.pso.get_compute_pipeline(pso).clone();
        let (group, offsets) = gpu.uniform_bind_group(&self.uniforms);
        let bindless = gpu.bindless_bind_group();
        let samplers = gpu.sampler_bind_group();
        let storage = gpu.storage_bind_group(&self.shader_buffers);
        if self.cpass.is_none() {
            self.cpass = Some(gpu.open_compute_pass());
        }
        let cpass = self.cpass.as_mut().unwrap();
        cpass.set_pipeline(&pipeline);
        cpass.set_bind_group(0, &group, &offsets);
        cpass.set_bind_group(1, &bindless, &[]);
        cpass.set_bind_group(2, &samplers, &[]);
        cpass.set_bind_group(3, &storage, &[]);
        cpass.dispatch_workgroups(cmd.x, cmd.y, cmd.z);
        self.stats.dispatches += 1;
    }

    fn begin_stats_query(&mut self, gpu: &mut Gpu, query: QueryHandle) {
        let Some(pass) = &mut self.pass else {
            return;
        };
        let frame = gpu.frame_index();
        let Some(slot) = gpu.query_pool.alloc_stats(frame) else {
            return;
        };
        let set = gpu.query_pool.stats_set.as_ref().unwrap();
        pass.begin_pipeline_statistics_query(set, slot);
        self.stats_query_open = true;
        let in_frame = slot - frame as u32 * crate::gal::query::QUERY_CAPACITY;
        if let Some(q) = gpu.query_mut(query) {
            q.idx = slot;
            q.ready = false;
            debug_assert_eq!(q.kind, QueryKind::PipelineStats);
        }
        gpu.current_frame().to_resolve_stats.push(QueryResolve {
            query,
            slot: in_frame,
        });
    }

    fn write_timestamp(&mut self, gpu: &mut Gpu, query: QueryHandle) {
        self.close_passes();
        let frame = gpu.frame_index();
        let Some(slot) = gpu.query_pool.alloc_timestamp(frame) else {
            return;
        };
        let in_frame = slot - frame as u32 * crate::gal::query::QUERY_CAPACITY;
        {
            let set = gpu.query_pool.timestamp_set.as_ref().unwrap();
            // Clone keeps the borrow of the pool from overlapping the
            // encoder access below.
            let set = set.clone();
            gpu.encoder().write_timestamp(&set, slot);
        }
        if let Some(q) = gpu.query_mut(query) {
            q.idx = slot;
            q.ready = false;
        }
        gpu.current_frame().to_resolve.push(QueryResolve {
            query,
            slot: in_frame,
        });
    }
}

fn apply_viewport(pass: &mut wgpu::RenderPass<'static>, rect: &RectCmd) {
    pass.set_viewport(
        rect.x as f32,
        rect.y as f32,
        rect.w as f32,
        rect.h as f32,
        0.0,
        1.0,
    );
}

fn index_format(u16_indices: u32) -> wgpu::IndexFormat {
    if u16_indices != 0 {
        wgpu::IndexFormat::Uint16
    } else {
        wgpu::IndexFormat::Uint32
    }
}

fn decode_format(raw: u32) -> TextureFormat {
    match raw {
        0 => TextureFormat::R8,
        1 => TextureFormat::RG8,
        2 => TextureFormat::RGBA8,
        3 => TextureFormat::R16F,
        4 => TextureFormat::RG16F,
        5 => TextureFormat::RGBA16F,
        6 => TextureFormat::R32F,
        7 => TextureFormat::RG32F,
        8 => TextureFormat::RGBA32F,
        9 => TextureFormat::R11G11B10F,
        10 => TextureFormat::D32,
        11 => TextureFormat::D24S8,
        12 => TextureFormat::BC1,
        13 => TextureFormat::BC3,
        _ => TextureFormat::BC5,
    }
}
