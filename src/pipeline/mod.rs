//! Pipeline (Frame Graph)
//!
//! Per-view orchestrator: renderbuffer pool, pass sequence, cull views and
//! draw buckets, camera uniforms, and the post-process plugin chain. One
//! pipeline instance renders one output (game view, editor preview); all
//! GPU work is recorded into the caller's draw stream.
//!
//! # Frame state machine (per view)
//!
//! ```text
//! BeginFrame → GBuffer → BeforeLight* → Light → BeforeTransparent*
//!   → Transparent → BeforeTonemap* → Tonemap → AA → AfterTonemap*
//!   → Debug → Present → EndFrame
//! ```
//!
//! Every transition emits matching debug-group markers in the draw stream.

pub mod bucket;
pub mod plugin;
pub mod renderbuffer;

use std::any::{Any, TypeId};

use glam::{IVec2, Mat4, Vec2, Vec4};
use rustc_hash::FxHashMap;
use slotmap::Key;

use crate::gal::{
    BindlessHandle, Gpu, RwBindlessHandle, StateFlags, TextureFlags, TextureFormat, TextureHandle,
};
use crate::pipeline::bucket::{batch_runs, sort_items, BucketDesc, BucketItem, SortOrder};
use crate::pipeline::plugin::{FrameCtx, GBuffer, PluginRegistry};
use crate::pipeline::renderbuffer::{
    RenderbufferDesc, RenderbufferHandle, RenderbufferPool, RenderbufferSize,
};
use crate::resources::resource::ResourceState;
use crate::resources::{ResourceHub, ShaderId};
use crate::scene::camera::pixel_jitter;
use crate::scene::{CameraParams, RenderModule, Viewport};
use crate::stream::{ClearFlags, DrawStream};
use crate::utils::hash::RuntimeHash;

pub use bucket::{BucketDesc as Bucket, SortOrder as BucketSort};
pub use plugin::{FrameCtx as PluginCtx, GBuffer as GBufferHandles, RenderPlugin};
pub use renderbuffer::{
    RenderbufferDesc as RbDesc, RenderbufferHandle as RbHandle, RenderbufferSize as RbSize,
};

/// Uniform slot carrying the per-view block written by [`Pipeline::pass`].
pub const PASS_UNIFORM_SLOT: u32 = 1;
/// Uniform slot carrying per-draw instance data.
pub const INSTANCE_UNIFORM_SLOT: u32 = 3;
/// Scratch slot written by [`Pipeline::set_uniform`].
pub const SCRATCH_UNIFORM_SLOT: u32 = 5;

/// Instances per instanced draw; bounded by the uniform block budget.
const MAX_INSTANCES_PER_DRAW: usize = 64;
/// Frames a pooled renderbuffer may idle before being trimmed.
const RENDERBUFFER_TRIM_AGE: u32 = 8;

/// Per-view uniform block at slot 1.
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct PassUniforms {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub inv_view_projection: Mat4,
    /// xy = viewport size, zw = 1 / size.
    pub viewport: Vec4,
    /// xy = subpixel jitter, zw = previous frame jitter.
    pub jitter: Vec4,
}

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct InstanceData {
    model: Mat4,
}

/// Counters exposed for tests and profiling overlays.
#[derive(Default, Clone, Copy, Debug)]
pub struct PipelineStats {
    pub views: u32,
    pub draws: u32,
    pub instanced_draws: u32,
    pub culled_instances: u32,
}

struct CullView {
    params: CameraParams,
    buckets: Vec<BucketDesc>,
    items: Vec<Vec<BucketItem>>,
}

static NEXT_PIPELINE_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

/// The frame-graph pipeline.
pub struct Pipeline {
    id: u64,
    pool: RenderbufferPool,
    viewport: Viewport,
    display_size: IVec2,
    jitter_enabled: bool,
    frame_index: u32,
    prev_jitter: Vec2,
    views: Vec<CullView>,
    plugin_data: FxHashMap<TypeId, Box<dyn Any>>,
    block_depth: u32,
    stats: PipelineStats,

    gbuffer_shader: ShaderId,
    light_shader: ShaderId,
    tonemap_shader: ShaderId,
    quad_shader: ShaderId,
}

impl Pipeline {
    /// Creates a pipeline, requesting its built-in shaders from the hub.
    #[must_use]
    pub fn new(hub: &mut ResourceHub) -> Self {
        Self {
            id: NEXT_PIPELINE_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
            pool: RenderbufferPool::new(),
            viewport: Viewport::default(),
            display_size: IVec2::ZERO,
            jitter_enabled: false,
            frame_index: 0,
            prev_jitter: Vec2::ZERO,
            views: Vec::new(),
            plugin_data: FxHashMap::default(),
            block_depth: 0,
            stats: PipelineStats::default(),
            gbuffer_shader: hub.load_shader("pipelines/gbuffer.shd"),
            light_shader: hub.load_shader("pipelines/light.shd"),
            tonemap_shader: hub.load_shader("pipelines/tonemap.shd"),
            quad_shader: hub.load_shader("pipelines/textured_quad.shd"),
        }
    }

    // ── Accessors ──────────────────────────────────────────────────────────

    /// Process-unique identity of this pipeline instance. Plugins key
    /// per-pipeline external state (upscaler contexts) on it.
    #[must_use]
    pub fn instance_id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    #[must_use]
    pub fn display_size(&self) -> IVec2 {
        self.display_size
    }

    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Pool-level counter used by leak checks.
    #[must_use]
    pub fn renderbuffer_count(&self) -> usize {
        self.pool.total_count()
    }

    /// Typed pipeline-scoped storage for plugin state (history buffers,
    /// cached maps). One slot per type.
    pub fn plugin_data<T: Default + 'static>(&mut self) -> &mut T {
        self.plugin_data
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::default()))
            .downcast_mut()
            .expect("plugin data type mismatch")
    }

    // ── Debug blocks ───────────────────────────────────────────────────────

    /// Opens a scoped debug group; also the boundary for per-block
    /// profiling timestamps.
    pub fn begin_block(&mut self, ctx: &mut FrameCtx<'_>, name: &str) {
        self.block_depth += 1;
        ctx.stream.begin_debug_group(name);
    }

    pub fn end_block(&mut self, ctx: &mut FrameCtx<'_>) {
        debug_assert!(self.block_depth > 0, "unbalanced end_block");
        self.block_depth = self.block_depth.saturating_sub(1);
        ctx.stream.end_debug_group();
    }

    // ── Renderbuffers ──────────────────────────────────────────────────────

    /// Allocates a transient renderbuffer from the pool.
    pub fn create_renderbuffer(
        &mut self,
        ctx: &mut FrameCtx<'_>,
        desc: &RenderbufferDesc,
    ) -> RenderbufferHandle {
        self.pool.allocate(
            ctx.gpu,
            ctx.stream,
            desc,
            IVec2::new(self.viewport.w.max(1), self.viewport.h.max(1)),
        )
    }

    /// Extends a renderbuffer past this frame (history buffers).
    pub fn keep_renderbuffer_alive(&mut self, handle: RenderbufferHandle) {
        self.pool.keep_alive(handle);
    }

    /// GAL texture behind a renderbuffer, valid this frame.
    #[must_use]
    pub fn to_texture(&self, handle: RenderbufferHandle) -> TextureHandle {
        self.pool.texture(handle)
    }

    /// Sampled bindless handle of a renderbuffer.
    #[must_use]
    pub fn to_bindless(&self, ctx: &FrameCtx<'_>, handle: RenderbufferHandle) -> BindlessHandle {
        ctx.gpu.bindless_handle(self.pool.texture(handle))
    }

    /// Storage bindless handle of a renderbuffer.
    #[must_use]
    pub fn to_rw_bindless(
        &self,
        ctx: &FrameCtx<'_>,
        handle: RenderbufferHandle,
    ) -> RwBindlessHandle {
        ctx.gpu.rw_bindless_handle(self.pool.texture(handle))
    }

    #[must_use]
    pub fn renderbuffer_size(&self, handle: RenderbufferHandle) -> IVec2 {
        self.pool.size(handle)
    }

    // ── Render state ───────────────────────────────────────────────────────

    /// Binds up to 8 color renderbuffers + optional depth-stencil.
    pub fn set_render_targets(
        &mut self,
        ctx: &mut FrameCtx<'_>,
        colors: &[RenderbufferHandle],
        depth_stencil: Option<RenderbufferHandle>,
    ) {
        self.set_render_targets_readonly_ds(ctx, colors, depth_stencil, false);
    }

    /// Like [`set_render_targets`](Self::set_render_targets) with the depth
    /// attachment bound read-only (depth test against a sampled depth).
    pub fn set_render_targets_readonly_ds(
        &mut self,
        ctx: &mut FrameCtx<'_>,
        colors: &[RenderbufferHandle],
        depth_stencil: Option<RenderbufferHandle>,
        readonly_ds: bool,
    ) {
        let textures: smallvec::SmallVec<[TextureHandle; 8]> =
            colors.iter().map(|&rb| self.pool.texture(rb)).collect();
        ctx.stream.set_framebuffer(
            &textures,
            depth_stencil.map(|rb| self.pool.texture(rb)),
            readonly_ds,
        );
    }

    /// Binds raw GAL textures as targets (backbuffer output path).
    pub fn set_output_framebuffer(
        &mut self,
        ctx: &mut FrameCtx<'_>,
        colors: &[TextureHandle],
        depth_stencil: Option<TextureHandle>,
    ) {
        ctx.stream.set_framebuffer(colors, depth_stencil, false);
    }

    pub fn set_viewport(&mut self, ctx: &mut FrameCtx<'_>, x: i32, y: i32, w: i32, h: i32) {
        ctx.stream.viewport(x, y, w, h);
    }

    pub fn clear(
        &mut self,
        ctx: &mut FrameCtx<'_>,
        flags: ClearFlags,
        color: [f32; 4],
        depth: f32,
        stencil: u32,
    ) {
        ctx.stream.clear(flags, color, depth, stencil);
    }

    /// Toggles sub-pixel jitter of the projection (TAA / upscalers).
    pub fn enable_pixel_jitter(&mut self, enabled: bool) {
        self.jitter_enabled = enabled;
    }

    /// Current frame's jitter offset in pixels; zero when disabled.
    #[must_use]
    pub fn current_jitter(&self) -> Vec2 {
        if self.jitter_enabled {
            pixel_jitter(self.frame_index)
        } else {
            Vec2::ZERO
        }
    }

    /// Uploads the per-view uniform block at slot 1.
    pub fn pass(&mut self, ctx: &mut FrameCtx<'_>, params: &CameraParams) {
        let view_projection = params.view_projection();
        let size = Vec2::new(self.viewport.w.max(1) as f32, self.viewport.h.max(1) as f32);
        let jitter = self.current_jitter();
        let block = PassUniforms {
            view: params.view,
            projection: params.projection,
            view_projection,
            inv_view_projection: view_projection.inverse(),
            viewport: Vec4::new(size.x, size.y, 1.0 / size.x, 1.0 / size.y),
            jitter: Vec4::new(jitter.x, jitter.y, self.prev_jitter.x, self.prev_jitter.y),
        };
        ctx.stream.bind_uniform(PASS_UNIFORM_SLOT, &block);
    }

    /// Writes an anonymous uniform block to the scratch slot.
    pub fn set_uniform<T: bytemuck::Pod>(&mut self, ctx: &mut FrameCtx<'_>, value: &T) {
        ctx.stream.bind_uniform(SCRATCH_UNIFORM_SLOT, value);
    }

    // ── Draw forwarding ────────────────────────────────────────────────────

    /// Full-screen / procedural draw with a shader permutation.
    pub fn draw_array(
        &mut self,
        ctx: &mut FrameCtx<'_>,
        first: u32,
        count: u32,
        shader: ShaderId,
        define_mask: u32,
        state: StateFlags,
    ) {
        let hub = &mut *ctx.hub;
        let Some(res) = hub.shaders.get_mut(shader) else {
            return;
        };
        if !res.header.is_ready() {
            return;
        }
        let program = res.program(
            ctx.gpu,
            ctx.stream,
            &hub.defines,
            &crate::gal::VertexDecl::default(),
            state,
            define_mask,
        );
        ctx.stream.use_program(program);
        ctx.stream.draw_arrays(first, count);
        self.stats.draws += 1;
    }

    /// Instanced variant of [`draw_array`](Self::draw_array).
    pub fn draw_array_instanced(
        &mut self,
        ctx: &mut FrameCtx<'_>,
        count: u32,
        instance_count: u32,
        shader: ShaderId,
        define_mask: u32,
        state: StateFlags,
    ) {
        let hub = &mut *ctx.hub;
        let Some(res) = hub.shaders.get_mut(shader) else {
            return;
        };
        if !res.header.is_ready() {
            return;
        }
        let program = res.program(
            ctx.gpu,
            ctx.stream,
            &hub.defines,
            &crate::gal::VertexDecl::default(),
            state,
            define_mask,
        );
        ctx.stream.use_program(program);
        ctx.stream.draw_arrays_instanced(count, instance_count);
        self.stats.draws += 1;
    }

    /// GPU-driven draw with arguments from `buffer` at `offset`.
    pub fn draw_indirect(
        &mut self,
        ctx: &mut FrameCtx<'_>,
        buffer: crate::gal::BufferHandle,
        offset: u64,
        shader: ShaderId,
        define_mask: u32,
        state: StateFlags,
    ) {
        let hub = &mut *ctx.hub;
        let Some(res) = hub.shaders.get_mut(shader) else {
            return;
        };
        if !res.header.is_ready() {
            return;
        }
        let program = res.program(
            ctx.gpu,
            ctx.stream,
            &hub.defines,
            &crate::gal::VertexDecl::default(),
            state,
            define_mask,
        );
        ctx.stream.bind_indirect_buffer(buffer);
        ctx.stream.use_program(program);
        ctx.stream.draw_indirect(buffer, offset);
        self.stats.draws += 1;
    }

    /// Compute dispatch with a shader permutation.
    pub fn dispatch(
        &mut self,
        ctx: &mut FrameCtx<'_>,
        shader: ShaderId,
        x: u32,
        y: u32,
        z: u32,
        define_mask: u32,
    ) {
        let hub = &mut *ctx.hub;
        let Some(res) = hub.shaders.get_mut(shader) else {
            return;
        };
        if !res.header.is_ready() {
            return;
        }
        let program = res.program(
            ctx.gpu,
            ctx.stream,
            &hub.defines,
            &crate::gal::VertexDecl::default(),
            StateFlags::empty(),
            define_mask,
        );
        ctx.stream.dispatch(program, x, y, z);
    }

    /// Draws `src` as a full-screen textured quad into the bound targets.
    pub fn render_textured_quad(
        &mut self,
        ctx: &mut FrameCtx<'_>,
        src: BindlessHandle,
        flip_x: bool,
        flip_y: bool,
    ) {
        #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C)]
        struct QuadUniforms {
            offset_scale: Vec4,
            r_mask: Vec4,
            g_mask: Vec4,
            b_mask: Vec4,
            a_mask: Vec4,
            texture: BindlessHandle,
            _pad: [u32; 3],
        }
        let scale = Vec2::new(
            if flip_x { -1.0 } else { 1.0 },
            if flip_y { -1.0 } else { 1.0 },
        );
        let block = QuadUniforms {
            offset_scale: Vec4::new(0.0, 0.0, scale.x, scale.y),
            r_mask: Vec4::X,
            g_mask: Vec4::Y,
            b_mask: Vec4::Z,
            a_mask: Vec4::W,
            texture: src,
            _pad: [0; 3],
        };
        self.set_uniform(ctx, &block);
        let shader = self.quad_shader;
        self.draw_array(ctx, 0, 3, shader, 0, StateFlags::empty());
    }

    /// Channel-swizzled blit of `src` into `dst`.
    pub fn copy(
        &mut self,
        ctx: &mut FrameCtx<'_>,
        dst: RenderbufferHandle,
        src: RenderbufferHandle,
        r_mask: Vec4,
        g_mask: Vec4,
        b_mask: Vec4,
    ) {
        #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C)]
        struct QuadUniforms {
            offset_scale: Vec4,
            r_mask: Vec4,
            g_mask: Vec4,
            b_mask: Vec4,
            a_mask: Vec4,
            texture: BindlessHandle,
            _pad: [u32; 3],
        }
        let block = QuadUniforms {
            offset_scale: Vec4::new(0.0, 0.0, 1.0, 1.0),
            r_mask,
            g_mask,
            b_mask,
            a_mask: Vec4::W,
            texture: self.to_bindless(ctx, src),
            _pad: [0; 3],
        };
        self.set_render_targets(ctx, &[dst], None);
        self.set_uniform(ctx, &block);
        let shader = self.quad_shader;
        self.draw_array(ctx, 0, 3, shader, 0, StateFlags::empty());
    }

    // ── Culling & buckets ──────────────────────────────────────────────────

    /// Sorts visible model instances into the described buckets and
    /// returns a view id for [`render_bucket`](Self::render_bucket).
    pub fn cull(
        &mut self,
        ctx: &mut FrameCtx<'_>,
        params: &CameraParams,
        buckets: &[BucketDesc],
    ) -> u32 {
        let visible = crate::scene::cull(ctx.module, ctx.hub, params);
        self.stats.culled_instances += visible.len() as u32;

        let mut items: Vec<Vec<BucketItem>> = vec![Vec::new(); buckets.len()];
        for vis in &visible {
            let Some(instance) = ctx.module.model_instance(vis.instance) else {
                continue;
            };
            let Some(model) = ctx.hub.models.get(instance.model) else {
                continue;
            };
            let lod = instance.lod_override.unwrap_or(vis.lod) as usize;
            let (from, to) = lod_mesh_range(model, lod);
            for mesh_index in from..=to {
                let Some(mesh) = model.meshes.get(mesh_index) else {
                    continue;
                };
                let Some(&material_id) = model.materials.get(mesh.material.0 as usize) else {
                    continue;
                };
                let Some(material) = ctx.hub.materials.get(material_id) else {
                    continue;
                };
                if material.header.state != ResourceState::Ready {
                    continue;
                }
                for (bucket_index, bucket) in buckets.iter().enumerate() {
                    if material.layer_hash != bucket.layer_hash() {
                        continue;
                    }
                    let mesh_hash = instance.model.data().as_ffi() ^ u64::from(mesh.sort_key_seed);
                    items[bucket_index].push(BucketItem {
                        instance: vis.instance,
                        mesh_index: mesh_index as u32,
                        batch_key: u64::from(material.sort_key) << 32
                            | (mesh_hash & 0xffff_ffff),
                        squared_distance: vis.squared_distance,
                    });
                }
            }
        }

        for (bucket_index, bucket) in buckets.iter().enumerate() {
            sort_items(&mut items[bucket_index], bucket.sort);
        }

        self.views.push(CullView {
            params: params.clone(),
            buckets: buckets.to_vec(),
            items,
        });
        self.stats.views += 1;
        self.views.len() as u32 - 1
    }

    /// Emits the instanced draws of one bucket.
    pub fn render_bucket(&mut self, ctx: &mut FrameCtx<'_>, view_id: u32, bucket_index: usize) {
        let valid = self
            .views
            .get(view_id as usize)
            .is_some_and(|v| bucket_index < v.buckets.len());
        if !valid {
            return;
        }
        let items = std::mem::take(&mut self.views[view_id as usize].items[bucket_index]);
        let origin = self.views[view_id as usize].params.frustum.origin;

        let bucket_mask = {
            let define = self.views[view_id as usize].buckets[bucket_index].define;
            if define.is_empty() {
                0
            } else {
                ctx.hub.defines.mask(define)
            }
        };

        for run in batch_runs(&items) {
            for chunk in run.chunks(MAX_INSTANCES_PER_DRAW) {
                self.draw_instanced_chunk(ctx, chunk, origin, bucket_mask);
            }
        }

        self.views[view_id as usize].items[bucket_index] = items;
    }

    fn draw_instanced_chunk(
        &mut self,
        ctx: &mut FrameCtx<'_>,
        chunk: &[BucketItem],
        origin: glam::DVec3,
        bucket_mask: u32,
    ) {
        let Some(first) = chunk.first() else {
            return;
        };
        let Some(instance) = ctx.module.model_instance(first.instance) else {
            return;
        };
        let hub = &mut *ctx.hub;
        let Some(model) = hub.models.get(instance.model) else {
            return;
        };
        let Some(mesh) = model.meshes.get(first.mesh_index as usize) else {
            return;
        };
        let Some(&material_id) = model.materials.get(mesh.material.0 as usize) else {
            return;
        };
        let Some(material) = hub.materials.get(material_id) else {
            return;
        };
        let material_shader = material.shader;

        let state = material.state();
        let mask = material.define_mask | bucket_mask;
        let decl = mesh.decl.clone();
        let vertex_buffer = mesh.vertex_buffer;
        let index_buffer = mesh.index_buffer;
        let index_count = mesh.index_count;
        let u16_indices = mesh.u16_indices;
        let stride = decl.stride;

        // Failed material shaders fall back to the built-in geometry
        // shader; only a missing fallback drops the draw.
        let shader_id = match material_shader {
            Some(id) if hub.shaders.get(id).is_some_and(|s| s.header.is_ready()) => id,
            _ => self.gbuffer_shader,
        };
        let Some(shader) = hub.shaders.get_mut(shader_id) else {
            return;
        };
        if !shader.header.is_ready() {
            return;
        }
        let program = shader.program(ctx.gpu, ctx.stream, &hub.defines, &decl, state, mask);

        // Per-instance transforms, rebased to the view origin.
        let mut instance_data: smallvec::SmallVec<[InstanceData; 16]> = smallvec::SmallVec::new();
        for item in chunk {
            let Some(inst) = ctx.module.model_instance(item.instance) else {
                continue;
            };
            let rel = (inst.position - origin).as_vec3();
            instance_data.push(InstanceData {
                model: Mat4::from_scale_rotation_translation(
                    glam::Vec3::splat(inst.scale),
                    inst.rotation,
                    rel,
                ),
            });
        }
        if instance_data.is_empty() {
            return;
        }

        ctx.stream
            .bind_uniform_data(INSTANCE_UNIFORM_SLOT, bytemuck::cast_slice(&instance_data));
        ctx.stream.bind_vertex_buffer(0, vertex_buffer, 0, stride);
        ctx.stream.bind_index_buffer(index_buffer, u16_indices);
        ctx.stream.use_program(program);
        ctx.stream
            .draw_indexed_instanced(index_count, instance_data.len() as u32);
        self.stats.draws += 1;
        if instance_data.len() > 1 {
            self.stats.instanced_draws += 1;
        }
    }

    // ── Frame orchestration ────────────────────────────────────────────────

    /// Renders one frame for the active camera into `output`.
    ///
    /// With no active camera the backbuffer clears to black and the frame
    /// ends; no renderbuffers leak and AA is skipped.
    pub fn render(
        &mut self,
        gpu: &Gpu,
        stream: &mut DrawStream,
        module: &RenderModule,
        hub: &mut ResourceHub,
        plugins: &mut PluginRegistry,
        output: TextureHandle,
        output_size: IVec2,
    ) {
        self.stats = PipelineStats::default();
        self.views.clear();
        self.display_size = output_size;

        let mut ctx = FrameCtx {
            gpu,
            stream,
            module,
            hub,
        };

        let Some(viewport) = module.active_viewport(output_size.x as u32, output_size.y as u32)
        else {
            ctx.stream.begin_debug_group("empty_frame");
            ctx.stream.set_framebuffer(&[output], None, false);
            ctx.stream
                .clear(ClearFlags::COLOR, [0.0, 0.0, 0.0, 1.0], 0.0, 0);
            ctx.stream.end_debug_group();
            self.end_frame();
            return;
        };
        self.viewport = viewport;

        let jitter = self.current_jitter();
        let params = self.viewport.camera_params(jitter, 1.0);

        // ── G-buffer pass ──────────────────────────────────────────────
        self.begin_block(&mut ctx, "gbuffer");
        let gbuffer = self.create_gbuffer(&mut ctx);
        self.set_render_targets(
            &mut ctx,
            &[gbuffer.a, gbuffer.b, gbuffer.c, gbuffer.d],
            Some(gbuffer.ds),
        );
        self.set_viewport(&mut ctx, 0, 0, self.viewport.w, self.viewport.h);
        // Reverse-Z: depth clears to 0.
        self.clear(&mut ctx, ClearFlags::ALL, [0.0, 0.0, 0.0, 0.0], 0.0, 0);
        self.pass(&mut ctx, &params);
        let view_id = self.cull(
            &mut ctx,
            &params,
            &[
                BucketDesc {
                    layer: "default",
                    define: "DEFERRED",
                    sort: SortOrder::Default,
                },
                BucketDesc {
                    layer: "impostor",
                    define: "DEFERRED",
                    sort: SortOrder::Default,
                },
                BucketDesc {
                    layer: "transparent",
                    define: "",
                    sort: SortOrder::Depth,
                },
            ],
        );
        self.render_bucket(&mut ctx, view_id, 0);
        self.render_bucket(&mut ctx, view_id, 1);
        self.end_block(&mut ctx);

        // ── Before-light plugins (SSAO / TDAO / SSS) ───────────────────
        for plugin in plugins.iter_mut() {
            plugin.render_before_light_pass(&gbuffer, self, &mut ctx);
        }

        // ── Light pass ─────────────────────────────────────────────────
        self.begin_block(&mut ctx, "light_pass");
        let mut hdr = self.create_renderbuffer(
            &mut ctx,
            &RenderbufferDesc {
                size: RenderbufferSize::Relative(1.0, 1.0),
                format: TextureFormat::RGBA16F,
                flags: TextureFlags::RENDER_TARGET
                    | TextureFlags::NO_MIPS
                    | TextureFlags::COMPUTE_WRITE,
                debug_name: "hdr",
            },
        );
        self.light_pass(&mut ctx, &gbuffer, hdr);
        self.end_block(&mut ctx);

        // ── Before-transparent plugins (sky / atmosphere) ──────────────
        for plugin in plugins.iter_mut() {
            hdr = plugin.render_before_transparent(&gbuffer, hdr, self, &mut ctx);
        }

        // ── Transparent pass ───────────────────────────────────────────
        self.begin_block(&mut ctx, "transparent");
        self.set_render_targets_readonly_ds(&mut ctx, &[hdr], Some(gbuffer.ds), true);
        self.pass(&mut ctx, &params);
        self.render_bucket(&mut ctx, view_id, 2);
        self.end_block(&mut ctx);

        // ── Before-tonemap plugins (DOF / bloom) ───────────────────────
        for plugin in plugins.iter_mut() {
            hdr = plugin.render_before_tonemap(&gbuffer, hdr, self, &mut ctx);
        }

        // ── Tonemap ────────────────────────────────────────────────────
        self.begin_block(&mut ctx, "tonemap");
        let mut ldr = RenderbufferHandle::INVALID;
        let mut claimed = false;
        for plugin in plugins.iter_mut() {
            if plugin.tonemap(hdr, &mut ldr, self, &mut ctx) {
                claimed = true;
                break;
            }
        }
        if !claimed {
            ldr = self.default_tonemap(&mut ctx, hdr);
        }
        self.end_block(&mut ctx);

        // ── AA ─────────────────────────────────────────────────────────
        let mut post = ldr;
        for plugin in plugins.iter_mut() {
            if let Some(out) = plugin.render_aa(&gbuffer, post, self, &mut ctx) {
                post = out;
                break;
            }
        }

        // ── After-tonemap plugins (film grain), reverse order ──────────
        for plugin in plugins.iter_mut_rev() {
            post = plugin.render_after_tonemap(&gbuffer, post, self, &mut ctx);
        }

        // ── Debug output ───────────────────────────────────────────────
        for plugin in plugins.iter_mut() {
            if plugin.debug_output(post, self, &mut ctx) {
                break;
            }
        }

        // ── Present: blit to the output target ─────────────────────────
        self.begin_block(&mut ctx, "present");
        let src = self.to_bindless(&ctx, post);
        self.set_output_framebuffer(&mut ctx, &[output], None);
        self.set_viewport(&mut ctx, 0, 0, output_size.x, output_size.y);
        self.render_textured_quad(&mut ctx, src, false, false);
        self.end_block(&mut ctx);

        self.prev_jitter = jitter;
        self.end_frame();
    }

    fn create_gbuffer(&mut self, ctx: &mut FrameCtx<'_>) -> GBuffer {
        let color = |name: &'static str, format: TextureFormat| RenderbufferDesc {
            size: RenderbufferSize::Relative(1.0, 1.0),
            format,
            flags: TextureFlags::RENDER_TARGET
                | TextureFlags::NO_MIPS
                | TextureFlags::COMPUTE_WRITE,
            debug_name: name,
        };
        GBuffer {
            a: self.create_renderbuffer(ctx, &color("gbuffer_a", TextureFormat::RGBA8)),
            b: self.create_renderbuffer(ctx, &color("gbuffer_b", TextureFormat::RGBA16F)),
            c: self.create_renderbuffer(ctx, &color("gbuffer_c", TextureFormat::RGBA8)),
            // Motion vectors are only ever rasterized and sampled; no
            // storage view.
            d: self.create_renderbuffer(
                ctx,
                &RenderbufferDesc {
                    size: RenderbufferSize::Relative(1.0, 1.0),
                    format: TextureFormat::RG16F,
                    flags: TextureFlags::RENDER_TARGET | TextureFlags::NO_MIPS,
                    debug_name: "gbuffer_d",
                },
            ),
            ds: self.create_renderbuffer(
                ctx,
                &RenderbufferDesc {
                    size: RenderbufferSize::Relative(1.0, 1.0),
                    format: TextureFormat::D24S8,
                    flags: TextureFlags::RENDER_TARGET | TextureFlags::NO_MIPS,
                    debug_name: "gbuffer_ds",
                },
            ),
        }
    }

    fn light_pass(&mut self, ctx: &mut FrameCtx<'_>, gbuffer: &GBuffer, hdr: RenderbufferHandle) {
        #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C)]
        struct LightUniforms {
            sunlight: Vec4,
            sun_direction: Vec4,
            fog_scattering: Vec4,
            light_count: u32,
            gbuffer_a: BindlessHandle,
            gbuffer_b: BindlessHandle,
            gbuffer_c: BindlessHandle,
            depth: BindlessHandle,
            _pad: [u32; 3],
            lights: [Vec4; 32],
        }

        let env = ctx
            .module
            .active_environment()
            .and_then(|id| ctx.module.environment(id))
            .cloned()
            .unwrap_or_default();

        let mut lights = [Vec4::ZERO; 32];
        let mut light_count = 0u32;
        for (_, light) in ctx.module.lights() {
            if light_count as usize >= 16 {
                break;
            }
            let i = light_count as usize * 2;
            let rel = (light.position - self.viewport.pos).as_vec3();
            lights[i] = Vec4::new(rel.x, rel.y, rel.z, light.range);
            lights[i + 1] = (light.color * light.intensity).extend(light.fov);
            light_count += 1;
        }

        let block = LightUniforms {
            sunlight: (env.sunlight_color * env.sunlight_strength).extend(1.0),
            sun_direction: env.sun_direction.extend(0.0),
            fog_scattering: env.fog_scattering.extend(env.fog_top),
            light_count,
            gbuffer_a: self.to_bindless(ctx, gbuffer.a),
            gbuffer_b: self.to_bindless(ctx, gbuffer.b),
            gbuffer_c: self.to_bindless(ctx, gbuffer.c),
            depth: self.to_bindless(ctx, gbuffer.ds),
            _pad: [0; 3],
            lights,
        };

        self.set_render_targets_readonly_ds(&mut *ctx, &[hdr], Some(gbuffer.ds), true);
        self.set_uniform(ctx, &block);
        let shader = self.light_shader;
        self.draw_array(ctx, 0, 3, shader, 0, StateFlags::empty());
    }

    fn default_tonemap(
        &mut self,
        ctx: &mut FrameCtx<'_>,
        hdr: RenderbufferHandle,
    ) -> RenderbufferHandle {
        let ldr = self.create_renderbuffer(
            &mut *ctx,
            &RenderbufferDesc {
                size: RenderbufferSize::Relative(1.0, 1.0),
                format: TextureFormat::RGBA8,
                flags: TextureFlags::RENDER_TARGET | TextureFlags::NO_MIPS,
                debug_name: "tonemap",
            },
        );
        #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C)]
        struct TonemapUniforms {
            exposure: f32,
            input: BindlessHandle,
            _pad: [u32; 2],
        }
        let block = TonemapUniforms {
            exposure: 1.0,
            input: self.to_bindless(ctx, hdr),
            _pad: [0; 2],
        };
        self.set_render_targets(ctx, &[ldr], None);
        self.set_uniform(ctx, &block);
        let shader = self.tonemap_shader;
        self.draw_array(ctx, 0, 3, shader, 0, StateFlags::empty());
        ldr
    }

    /// Frame boundary: recycles renderbuffers, advances the jitter index.
    fn end_frame(&mut self) {
        debug_assert_eq!(self.block_depth, 0, "unbalanced begin_block/end_block");
        self.pool.end_frame();
        self.frame_index = self.frame_index.wrapping_add(1);
        self.views.clear();
    }

    /// Periodic maintenance: trims long-idle pooled renderbuffers.
    pub fn maybe_trim(&mut self, stream: &mut DrawStream) {
        self.pool.trim(stream, RENDERBUFFER_TRIM_AGE);
    }

    /// Hash of the layer name used for bucket matching; exposed for
    /// callers composing custom bucket sets.
    #[must_use]
    pub fn layer_hash(name: &str) -> RuntimeHash {
        RuntimeHash::of(name)
    }
}

/// Mesh index range of a LOD level: `to_mesh` of the previous level + 1
/// through `to_mesh` of this one.
fn lod_mesh_range(model: &crate::resources::Model, lod: usize) -> (usize, usize) {
    let lod = lod.min(model.lods.len().saturating_sub(1));
    let from = if lod == 0 {
        0
    } else {
        (model.lods[lod - 1].to_mesh + 1).max(0) as usize
    };
    let to = model.lods[lod].to_mesh.max(0) as usize;
    (from, to.min(model.meshes.len().saturating_sub(1)))
}
