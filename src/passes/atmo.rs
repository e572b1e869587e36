//! Atmospheric Scattering
//!
//! Two small LUTs are recomputed each frame (128×128 optical depth,
//! 64×128 inscatter), then a full-screen pass blends the atmosphere into
//! HDR with dual-source blending `(ONE, SRC1_COLOR)` so transmittance and
//! inscatter apply in one draw. Fog and godrays are gated by environment
//! flags.

use glam::Vec4;

use crate::gal::{
    BindlessHandle, BlendFactor, RwBindlessHandle, StateFlags, TextureFlags, TextureFormat,
    TextureHandle,
};
use crate::passes::shader_ready;
use crate::pipeline::plugin::{FrameCtx, GBuffer, RenderPlugin};
use crate::pipeline::renderbuffer::RenderbufferHandle;
use crate::pipeline::Pipeline;
use crate::resources::{ResourceHub, ShaderId};
use crate::stream::DrawStream;

pub struct Atmo {
    shader: ShaderId,
    scattering_shader: ShaderId,
    optical_depth_shader: ShaderId,
    optical_depth_lut: TextureHandle,
    inscatter_lut: TextureHandle,
}

impl Atmo {
    #[must_use]
    pub fn new(hub: &mut ResourceHub) -> Self {
        Self {
            shader: hub.load_shader("pipelines/atmo.shd"),
            scattering_shader: hub.load_shader("pipelines/atmo_scattering.shd"),
            optical_depth_shader: hub.load_shader("pipelines/atmo_optical_depth.shd"),
            optical_depth_lut: TextureHandle::INVALID,
            inscatter_lut: TextureHandle::INVALID,
        }
    }
}

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct AtmoUniforms {
    bot: f32,
    top: f32,
    distribution_rayleigh: f32,
    distribution_mie: f32,
    scatter_rayleigh: Vec4,
    scatter_mie: Vec4,
    absorb_mie: Vec4,
    sunlight: Vec4,
    resolution: Vec4,
    fog_scattering: Vec4,
    fog_top: f32,
    fog_enabled: f32,
    godrays_enabled: f32,
    _pad: f32,
    output: RwBindlessHandle,
    optical_depth: BindlessHandle,
    depth_buffer: BindlessHandle,
    inscatter: BindlessHandle,
}

impl RenderPlugin for Atmo {
    fn name(&self) -> &'static str {
        "atmo"
    }

    fn shutdown(&mut self, stream: &mut DrawStream) {
        if self.optical_depth_lut.is_valid() {
            stream.destroy_texture(self.optical_depth_lut);
            stream.destroy_texture(self.inscatter_lut);
            self.optical_depth_lut = TextureHandle::INVALID;
            self.inscatter_lut = TextureHandle::INVALID;
        }
    }

    fn render_before_transparent(
        &mut self,
        gbuffer: &GBuffer,
        hdr: RenderbufferHandle,
        pipeline: &mut Pipeline,
        ctx: &mut FrameCtx<'_>,
    ) -> RenderbufferHandle {
        let Some(env_id) = ctx.module.active_environment() else {
            return hdr;
        };
        let Some(env) = ctx.module.environment(env_id) else {
            return hdr;
        };
        if !env.atmo_enabled {
            return hdr;
        }
        if !shader_ready(ctx.hub, self.shader)
            || !shader_ready(ctx.hub, self.scattering_shader)
            || !shader_ready(ctx.hub, self.optical_depth_shader)
        {
            return hdr;
        }

        if !self.optical_depth_lut.is_valid() {
            let flags = TextureFlags::COMPUTE_WRITE | TextureFlags::NO_MIPS;
            self.optical_depth_lut = ctx.gpu.alloc_texture_handle();
            ctx.stream.create_texture(
                self.optical_depth_lut,
                128,
                128,
                1,
                TextureFormat::RG32F,
                flags,
                "atmo_optical_depth",
            );
            self.inscatter_lut = ctx.gpu.alloc_texture_handle();
            ctx.stream.create_texture(
                self.inscatter_lut,
                64,
                128,
                1,
                TextureFormat::RGBA32F,
                flags,
                "atmo_inscatter",
            );
        }

        pipeline.begin_block(ctx, "atmo");
        let env = env.clone();

        let mut block = AtmoUniforms {
            bot: env.ground_r * 1000.0,
            top: env.atmo_r * 1000.0,
            distribution_rayleigh: env.height_distribution_rayleigh,
            distribution_mie: env.height_distribution_mie,
            scatter_rayleigh: (env.scatter_rayleigh * 33.1e-6).extend(0.0),
            scatter_mie: (env.scatter_mie * 3.996e-6).extend(0.0),
            absorb_mie: (env.absorb_mie * 4.4e-6).extend(0.0),
            sunlight: (env.sunlight_color).extend(env.sunlight_strength),
            resolution: Vec4::new(128.0, 128.0, 1.0, 0.0),
            fog_scattering: env.fog_scattering.extend(0.0),
            fog_top: env.fog_top,
            fog_enabled: f32::from(u8::from(env.fog_enabled)),
            godrays_enabled: f32::from(u8::from(env.godrays_enabled)),
            _pad: 0.0,
            output: ctx.gpu.rw_bindless_handle(self.optical_depth_lut),
            optical_depth: ctx.gpu.bindless_handle(self.optical_depth_lut),
            depth_buffer: pipeline.to_bindless(ctx, gbuffer.ds),
            inscatter: ctx.gpu.bindless_handle(self.inscatter_lut),
        };

        ctx.stream.barrier_write_texture(self.optical_depth_lut);
        pipeline.begin_block(ctx, "precompute_transmittance");
        pipeline.set_uniform(ctx, &block);
        pipeline.dispatch(ctx, self.optical_depth_shader, 128 / 16, 128 / 16, 1, 0);
        pipeline.end_block(ctx);

        ctx.stream.barrier_write_texture(self.inscatter_lut);
        ctx.stream.barrier_read_texture(self.optical_depth_lut);
        ctx.stream.memory_barrier_texture(self.optical_depth_lut);

        pipeline.begin_block(ctx, "precompute_inscatter");
        block.resolution = Vec4::new(64.0, 128.0, 1.0, 0.0);
        block.output = ctx.gpu.rw_bindless_handle(self.inscatter_lut);
        pipeline.set_uniform(ctx, &block);
        pipeline.dispatch(ctx, self.scattering_shader, 64 / 16, 128 / 16, 1, 0);
        pipeline.end_block(ctx);

        ctx.stream.barrier_read_texture(self.inscatter_lut);
        ctx.stream.memory_barrier_texture(self.inscatter_lut);

        pipeline.set_render_targets(ctx, &[hdr], None);
        pipeline.set_uniform(ctx, &block);
        let state = StateFlags::blend(
            BlendFactor::One,
            BlendFactor::Src1Color,
            BlendFactor::One,
            BlendFactor::One,
        );
        let shader = self.shader;
        pipeline.draw_array(ctx, 0, 3, shader, 0, state);

        pipeline.end_block(ctx);
        hdr
    }
}
