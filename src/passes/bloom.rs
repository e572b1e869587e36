//! Bloom & Auto-Exposure
//!
//! Three stages each frame when enabled:
//!
//! 1. **Average luminance**: a three-dispatch compute reduction through a
//!    2 KB histogram buffer (clear, accumulate, resolve) with eye
//!    accommodation speed.
//! 2. **Bloom chain**: extract bright pixels into a half-res buffer scaled
//!    by the histogram average, downscale by 2 five levels deep, blur the
//!    smallest, then blur+upscale back up with additive blends, and add
//!    the result into HDR.
//! 3. **Tonemap claim** (optional): when the camera enables it, bloom owns
//!    tonemapping with an auto-exposure operator fed by the same
//!    histogram.

use glam::{IVec2, Vec2, Vec4};

use crate::gal::{
    BindlessHandle, BufferFlags, BufferHandle, RwBindlessHandle, StateFlags, TextureFormat,
    TextureHandle,
};
use crate::passes::shader_ready;
use crate::pipeline::plugin::{FrameCtx, GBuffer, RenderPlugin};
use crate::pipeline::renderbuffer::{RenderbufferDesc, RenderbufferHandle, RenderbufferSize};
use crate::pipeline::Pipeline;
use crate::resources::{ResourceHub, ShaderId};
use crate::scene::camera::Camera;
use crate::stream::DrawStream;

/// Histogram buffer size (256 bins × u64 counters).
const LUM_BUFFER_SIZE: u64 = 2048;

/// Pipeline-scoped handle of the last extract target. Read by the debug
/// view and by energy-conservation tests.
pub struct BloomCapture {
    pub extracted: TextureHandle,
}

impl Default for BloomCapture {
    fn default() -> Self {
        Self {
            extracted: TextureHandle::INVALID,
        }
    }
}

pub struct Bloom {
    shader: ShaderId,
    tonemap_shader: ShaderId,
    blur_shader: ShaderId,
    avg_luminance_shader: ShaderId,
    bloom_blur_shader: ShaderId,
    lum_buffer: BufferHandle,
    /// Stop after the extract step and keep the raw extract target
    /// (debug inspection / tests). The downscale-blur-composite chain is
    /// skipped.
    pub capture_extract: bool,
}

impl Bloom {
    #[must_use]
    pub fn new(hub: &mut ResourceHub) -> Self {
        Self {
            shader: hub.load_shader("pipelines/bloom.shd"),
            tonemap_shader: hub.load_shader("pipelines/bloom_tonemap.shd"),
            blur_shader: hub.load_shader("pipelines/blur.shd"),
            avg_luminance_shader: hub.load_shader("pipelines/avg_luminance.shd"),
            bloom_blur_shader: hub.load_shader("pipelines/bloom_blur.shd"),
            lum_buffer: BufferHandle::INVALID,
            capture_extract: false,
        }
    }

    fn shaders_ready(&self, hub: &ResourceHub) -> bool {
        shader_ready(hub, self.shader)
            && shader_ready(hub, self.tonemap_shader)
            && shader_ready(hub, self.blur_shader)
            && shader_ready(hub, self.avg_luminance_shader)
            && shader_ready(hub, self.bloom_blur_shader)
    }

    fn camera(ctx: &FrameCtx<'_>) -> Option<Camera> {
        let id = ctx.module.active_camera()?;
        Some(ctx.module.camera(id)?.camera.clone())
    }

    fn ensure_lum_buffer(&mut self, ctx: &mut FrameCtx<'_>) {
        if !self.lum_buffer.is_valid() {
            self.lum_buffer = ctx.gpu.alloc_buffer_handle();
            ctx.stream.create_buffer(
                self.lum_buffer,
                BufferFlags::SHADER_BUFFER,
                LUM_BUFFER_SIZE,
                None,
                "bloom_histogram",
            );
        }
    }

    fn compute_avg_luminance(
        &mut self,
        input: RenderbufferHandle,
        accomodation_speed: f32,
        pipeline: &mut Pipeline,
        ctx: &mut FrameCtx<'_>,
    ) {
        pipeline.begin_block(ctx, "autoexposure");
        let vp = pipeline.viewport().clone();

        #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C)]
        struct LumUniforms {
            size: Vec2,
            accomodation_speed: f32,
            _pad: f32,
            image: BindlessHandle,
            histogram: RwBindlessHandle,
            _pad2: [u32; 2],
        }
        let block = LumUniforms {
            size: Vec2::new(vp.w as f32, vp.h as f32),
            accomodation_speed,
            _pad: 0.0,
            image: pipeline.to_bindless(ctx, input),
            histogram: ctx.gpu.buffer_rw_bindless_handle(self.lum_buffer),
            _pad2: [0; 2],
        };
        pipeline.set_uniform(ctx, &block);
        ctx.stream.barrier_write_buffer(self.lum_buffer);
        ctx.stream.memory_barrier_buffer(self.lum_buffer);
        let pass0 = ctx.hub.defines.mask("PASS0");
        pipeline.dispatch(ctx, self.avg_luminance_shader, 1, 1, 1, pass0);
        ctx.stream.memory_barrier_buffer(self.lum_buffer);
        pipeline.dispatch(
            ctx,
            self.avg_luminance_shader,
            (vp.w as u32 + 15) / 16,
            (vp.h as u32 + 15) / 16,
            1,
            0,
        );
        ctx.stream.memory_barrier_buffer(self.lum_buffer);
        let pass2 = ctx.hub.defines.mask("PASS2");
        pipeline.dispatch(ctx, self.avg_luminance_shader, 1, 1, 1, pass2);
        ctx.stream.memory_barrier_buffer(self.lum_buffer);
        ctx.stream.barrier_read_buffer(self.lum_buffer);
        pipeline.end_block(ctx);
    }

    fn downscale(
        &mut self,
        big: RenderbufferHandle,
        size: IVec2,
        name: &'static str,
        pipeline: &mut Pipeline,
        ctx: &mut FrameCtx<'_>,
    ) -> RenderbufferHandle {
        let small = pipeline.create_renderbuffer(
            ctx,
            &RenderbufferDesc {
                size: RenderbufferSize::Fixed(size),
                format: TextureFormat::RGBA16F,
                flags: crate::gal::TextureFlags::RENDER_TARGET | crate::gal::TextureFlags::NO_MIPS,
                debug_name: name,
            },
        );
        pipeline.set_render_targets(ctx, &[small], None);
        pipeline.set_viewport(ctx, 0, 0, size.x, size.y);
        let mask = ctx.hub.defines.mask("DOWNSCALE");
        let src = pipeline.to_bindless(ctx, big);
        pipeline.set_uniform(ctx, &src);
        let shader = self.shader;
        pipeline.draw_array(ctx, 0, 3, shader, mask, StateFlags::empty());
        small
    }

    fn blur(
        &mut self,
        size: IVec2,
        src: RenderbufferHandle,
        pipeline: &mut Pipeline,
        ctx: &mut FrameCtx<'_>,
    ) {
        let blur_buf = pipeline.create_renderbuffer(
            ctx,
            &RenderbufferDesc {
                size: RenderbufferSize::Fixed(size),
                format: TextureFormat::RGBA16F,
                flags: crate::gal::TextureFlags::RENDER_TARGET | crate::gal::TextureFlags::NO_MIPS,
                debug_name: "bloom_blur",
            },
        );

        #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C)]
        struct BlurUniforms {
            inv_sm_size: Vec4,
            input: BindlessHandle,
            _pad: [u32; 3],
        }
        let blur_h = ctx.hub.defines.mask("BLUR_H");

        let block = BlurUniforms {
            inv_sm_size: Vec4::new(1.0 / size.x as f32, 1.0 / size.y as f32, 0.0, 0.0),
            input: pipeline.to_bindless(ctx, src),
            _pad: [0; 3],
        };
        pipeline.set_render_targets(ctx, &[blur_buf], None);
        pipeline.set_viewport(ctx, 0, 0, size.x, size.y);
        pipeline.set_uniform(ctx, &block);
        let shader = self.blur_shader;
        pipeline.draw_array(ctx, 0, 3, shader, blur_h, StateFlags::empty());

        let block = BlurUniforms {
            input: pipeline.to_bindless(ctx, blur_buf),
            ..block
        };
        pipeline.set_render_targets(ctx, &[src], None);
        pipeline.set_uniform(ctx, &block);
        pipeline.draw_array(ctx, 0, 3, shader, 0, StateFlags::empty());
    }

    fn blur_upscale(
        &mut self,
        big_size: IVec2,
        big: RenderbufferHandle,
        small: RenderbufferHandle,
        pipeline: &mut Pipeline,
        ctx: &mut FrameCtx<'_>,
    ) {
        let blur_buf = pipeline.create_renderbuffer(
            ctx,
            &RenderbufferDesc {
                size: RenderbufferSize::Fixed(big_size),
                format: TextureFormat::RGBA16F,
                flags: crate::gal::TextureFlags::RENDER_TARGET | crate::gal::TextureFlags::NO_MIPS,
                debug_name: "bloom_blur",
            },
        );

        #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C)]
        struct UpscaleUniforms {
            inv_sm_size: Vec4,
            input: BindlessHandle,
            input2: BindlessHandle,
            _pad: [u32; 2],
        }
        let blur_h = ctx.hub.defines.mask("BLUR_H");

        let block = UpscaleUniforms {
            inv_sm_size: Vec4::new(
                1.0 / big_size.x as f32,
                1.0 / big_size.y as f32,
                0.0,
                0.0,
            ),
            input: pipeline.to_bindless(ctx, big),
            input2: pipeline.to_bindless(ctx, small),
            _pad: [0; 2],
        };
        pipeline.set_render_targets(ctx, &[blur_buf], None);
        pipeline.set_viewport(ctx, 0, 0, big_size.x, big_size.y);
        pipeline.set_uniform(ctx, &block);
        let shader = self.bloom_blur_shader;
        pipeline.draw_array(ctx, 0, 3, shader, blur_h, StateFlags::empty());

        let block = UpscaleUniforms {
            input: pipeline.to_bindless(ctx, blur_buf),
            ..block
        };
        pipeline.set_render_targets(ctx, &[big], None);
        pipeline.set_uniform(ctx, &block);
        let shader = self.blur_shader;
        pipeline.draw_array(ctx, 0, 3, shader, 0, StateFlags::empty());
    }
}

impl RenderPlugin for Bloom {
    fn name(&self) -> &'static str {
        "bloom"
    }

    fn shutdown(&mut self, stream: &mut DrawStream) {
        if self.lum_buffer.is_valid() {
            stream.destroy_buffer(self.lum_buffer);
            self.lum_buffer = BufferHandle::INVALID;
        }
    }

    fn render_before_tonemap(
        &mut self,
        _gbuffer: &GBuffer,
        input: RenderbufferHandle,
        pipeline: &mut Pipeline,
        ctx: &mut FrameCtx<'_>,
    ) -> RenderbufferHandle {
        if !self.shaders_ready(ctx.hub) {
            return input;
        }
        let Some(camera) = Self::camera(ctx) else {
            return input;
        };
        if !camera.bloom_enabled {
            return input;
        }

        pipeline.begin_block(ctx, "bloom");
        self.ensure_lum_buffer(ctx);
        self.compute_avg_luminance(input, camera.bloom_accomodation_speed, pipeline, ctx);

        let vp = pipeline.viewport().clone();
        let half = IVec2::new(vp.w.max(2) >> 1, vp.h.max(2) >> 1);

        // Extract bright pixels into half resolution, scaled by the
        // histogram average.
        let bloom_rb = pipeline.create_renderbuffer(
            ctx,
            &RenderbufferDesc {
                size: RenderbufferSize::Relative(0.5, 0.5),
                format: TextureFormat::RGBA16F,
                flags: crate::gal::TextureFlags::RENDER_TARGET | crate::gal::TextureFlags::NO_MIPS,
                debug_name: "bloom",
            },
        );

        #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C)]
        struct ExtractUniforms {
            avg_lum_multiplier: f32,
            histogram: BindlessHandle,
            input: BindlessHandle,
            _pad: u32,
        }
        let block = ExtractUniforms {
            avg_lum_multiplier: camera.bloom_avg_bloom_multiplier,
            histogram: ctx.gpu.buffer_bindless_handle(self.lum_buffer),
            input: pipeline.to_bindless(ctx, input),
            _pad: 0,
        };
        ctx.stream.barrier_read_buffer(self.lum_buffer);
        pipeline.set_render_targets(ctx, &[bloom_rb], None);
        pipeline.set_viewport(ctx, 0, 0, half.x, half.y);
        let extract = ctx.hub.defines.mask("EXTRACT");
        pipeline.set_uniform(ctx, &block);
        let shader = self.shader;
        pipeline.draw_array(ctx, 0, 3, shader, extract, StateFlags::empty());

        let extracted = pipeline.to_texture(bloom_rb);
        pipeline.plugin_data::<BloomCapture>().extracted = extracted;
        if self.capture_extract {
            pipeline.keep_renderbuffer_alive(bloom_rb);
            pipeline.set_viewport(ctx, 0, 0, vp.w, vp.h);
            pipeline.end_block(ctx);
            return input;
        }

        // Downscale chain: /4, /8, /16, /32.
        let s2 = IVec2::new(vp.w.max(4) >> 2, vp.h.max(4) >> 2);
        let s4 = IVec2::new(vp.w.max(8) >> 3, vp.h.max(8) >> 3);
        let s8 = IVec2::new(vp.w.max(16) >> 4, vp.h.max(16) >> 4);
        let s16 = IVec2::new(vp.w.max(32) >> 5, vp.h.max(32) >> 5);
        let bloom2 = self.downscale(bloom_rb, s2, "bloom2", pipeline, ctx);
        let bloom4 = self.downscale(bloom2, s4, "bloom4", pipeline, ctx);
        let bloom8 = self.downscale(bloom4, s8, "bloom8", pipeline, ctx);
        let bloom16 = self.downscale(bloom8, s16, "bloom16", pipeline, ctx);

        self.blur(s16, bloom16, pipeline, ctx);
        self.blur_upscale(s8, bloom8, bloom16, pipeline, ctx);
        self.blur_upscale(s4, bloom4, bloom8, pipeline, ctx);
        self.blur_upscale(s2, bloom2, bloom4, pipeline, ctx);
        self.blur_upscale(half, bloom_rb, bloom2, pipeline, ctx);

        // Additive composite into HDR.
        pipeline.set_render_targets(ctx, &[input], None);
        pipeline.set_viewport(ctx, 0, 0, vp.w, vp.h);
        let src = pipeline.to_bindless(ctx, bloom_rb);
        pipeline.set_uniform(ctx, &src);
        let shader = self.shader;
        pipeline.draw_array(ctx, 0, 3, shader, 0, StateFlags::blend_add());

        pipeline.end_block(ctx);
        input
    }

    fn tonemap(
        &mut self,
        hdr: RenderbufferHandle,
        output: &mut RenderbufferHandle,
        pipeline: &mut Pipeline,
        ctx: &mut FrameCtx<'_>,
    ) -> bool {
        let Some(camera) = Self::camera(ctx) else {
            return false;
        };
        if !camera.bloom_tonemap_enabled || !shader_ready(ctx.hub, self.tonemap_shader) {
            return false;
        }
        if !self.lum_buffer.is_valid() {
            return false;
        }

        pipeline.begin_block(ctx, "bloom_tonemap");
        let rb = pipeline.create_renderbuffer(
            ctx,
            &RenderbufferDesc {
                size: RenderbufferSize::Relative(1.0, 1.0),
                format: TextureFormat::RGBA8,
                flags: crate::gal::TextureFlags::RENDER_TARGET | crate::gal::TextureFlags::NO_MIPS,
                debug_name: "tonemap_bloom",
            },
        );

        #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C)]
        struct TonemapUniforms {
            exposure: f32,
            input: BindlessHandle,
            accum: BindlessHandle,
            _pad: u32,
        }
        let block = TonemapUniforms {
            exposure: camera.bloom_exposure,
            input: pipeline.to_bindless(ctx, hdr),
            accum: ctx.gpu.buffer_bindless_handle(self.lum_buffer),
            _pad: 0,
        };
        ctx.stream.barrier_read_buffer(self.lum_buffer);
        pipeline.set_render_targets(ctx, &[rb], None);
        pipeline.set_uniform(ctx, &block);
        let shader = self.tonemap_shader;
        pipeline.draw_array(ctx, 0, 3, shader, 0, StateFlags::empty());
        pipeline.end_block(ctx);
        *output = rb;
        true
    }
}
