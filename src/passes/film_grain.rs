//! Film Grain
//!
//! Blue-noise modulation scaled by luma. Zero intensity short-circuits the
//! whole pass. A missing blue-noise asset degrades to a generated
//! white-noise tile rather than disabling the effect.

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use crate::gal::{BindlessHandle, RwBindlessHandle, TextureFlags, TextureFormat, TextureHandle};
use crate::passes::shader_ready;
use crate::pipeline::plugin::{FrameCtx, GBuffer, RenderPlugin};
use crate::pipeline::renderbuffer::{RenderbufferDesc, RenderbufferHandle, RenderbufferSize};
use crate::pipeline::Pipeline;
use crate::resources::resource::ResourceState;
use crate::resources::{ResourceHub, ShaderId, TextureResId};
use crate::stream::DrawStream;

/// Side length of the generated fallback noise tile.
const FALLBACK_NOISE_SIZE: u32 = 64;

pub struct FilmGrain {
    shader: ShaderId,
    noise: TextureResId,
    fallback_noise: TextureHandle,
    pub luma_amount: f32,
}

impl FilmGrain {
    #[must_use]
    pub fn new(hub: &mut ResourceHub) -> Self {
        Self {
            shader: hub.load_shader("pipelines/film_grain.shd"),
            noise: hub.load_texture("textures/common/blue_noise.ptx"),
            fallback_noise: TextureHandle::INVALID,
            luma_amount: 0.1,
        }
    }

    /// The noise texture to sample: the blue-noise asset when ready, a
    /// seeded white-noise tile otherwise. `None` while the asset is still
    /// loading.
    fn noise_handle(&mut self, ctx: &mut FrameCtx<'_>) -> Option<TextureHandle> {
        match ctx.hub.textures.get(self.noise) {
            Some(noise) if noise.header.is_ready() => return Some(noise.handle),
            Some(noise) if noise.header.state == ResourceState::Loading => return None,
            _ => {}
        }
        if !self.fallback_noise.is_valid() {
            let mut rng = StdRng::seed_from_u64(0x6e6f_6973);
            let texels: Vec<u8> = (0..FALLBACK_NOISE_SIZE * FALLBACK_NOISE_SIZE * 4)
                .map(|_| rng.random::<u8>())
                .collect();
            self.fallback_noise = ctx.gpu.alloc_texture_handle();
            ctx.stream.create_texture(
                self.fallback_noise,
                FALLBACK_NOISE_SIZE,
                FALLBACK_NOISE_SIZE,
                1,
                TextureFormat::RGBA8,
                TextureFlags::NO_MIPS,
                "film_grain_noise",
            );
            ctx.stream.update_texture(
                self.fallback_noise,
                0,
                0,
                0,
                0,
                FALLBACK_NOISE_SIZE,
                FALLBACK_NOISE_SIZE,
                &texels,
            );
        }
        Some(self.fallback_noise)
    }
}

impl RenderPlugin for FilmGrain {
    fn name(&self) -> &'static str {
        "film_grain"
    }

    fn render_after_tonemap(
        &mut self,
        _gbuffer: &GBuffer,
        input: RenderbufferHandle,
        pipeline: &mut Pipeline,
        ctx: &mut FrameCtx<'_>,
    ) -> RenderbufferHandle {
        if !shader_ready(ctx.hub, self.shader) {
            return input;
        }
        let Some(noise_handle) = self.noise_handle(ctx) else {
            return input;
        };

        let Some(camera_id) = ctx.module.active_camera() else {
            return input;
        };
        let Some(entity) = ctx.module.camera(camera_id) else {
            return input;
        };
        let intensity = entity.camera.film_grain_intensity;
        if intensity <= 1e-5 {
            return input;
        }

        pipeline.begin_block(ctx, "film_grain");
        let result = pipeline.create_renderbuffer(
            ctx,
            &RenderbufferDesc {
                size: RenderbufferSize::Relative(1.0, 1.0),
                format: TextureFormat::RGBA8,
                flags: TextureFlags::COMPUTE_WRITE
                    | TextureFlags::NO_MIPS
                    | TextureFlags::RENDER_TARGET,
                debug_name: "film_grain",
            },
        );

        #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C)]
        struct GrainUniforms {
            intensity: f32,
            luma_amount: f32,
            source: BindlessHandle,
            noise: BindlessHandle,
            output: RwBindlessHandle,
            _pad: [u32; 3],
        }
        let block = GrainUniforms {
            intensity,
            luma_amount: self.luma_amount,
            source: pipeline.to_bindless(ctx, input),
            noise: ctx.gpu.bindless_handle(noise_handle),
            output: pipeline.to_rw_bindless(ctx, result),
            _pad: [0; 3],
        };
        let vp = pipeline.viewport().clone();
        pipeline.set_uniform(ctx, &block);
        pipeline.dispatch(
            ctx,
            self.shader,
            (vp.w as u32 + 15) / 16,
            (vp.h as u32 + 15) / 16,
            1,
            0,
        );

        pipeline.end_block(ctx);
        result
    }

    fn shutdown(&mut self, stream: &mut DrawStream) {
        if self.fallback_noise.is_valid() {
            stream.destroy_texture(self.fallback_noise);
            self.fallback_noise = TextureHandle::INVALID;
        }
    }
}
