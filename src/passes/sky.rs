//! Cubemap Sky
//!
//! Stencil-masked full-screen draw: geometry writes stencil ref 1 during
//! the G-buffer pass, so sampling the sky cubemap where stencil equals
//! zero fills exactly the uncovered pixels.

use crate::gal::{BindlessHandle, StateFlags, StencilFunc, StencilOp};
use crate::passes::shader_ready;
use crate::pipeline::plugin::{FrameCtx, GBuffer, RenderPlugin};
use crate::pipeline::renderbuffer::RenderbufferHandle;
use crate::pipeline::Pipeline;
use crate::resources::{ResourceHub, ShaderId};

pub struct CubemapSky {
    shader: ShaderId,
}

impl CubemapSky {
    #[must_use]
    pub fn new(hub: &mut ResourceHub) -> Self {
        Self {
            shader: hub.load_shader("pipelines/cubemap_sky.shd"),
        }
    }
}

impl RenderPlugin for CubemapSky {
    fn name(&self) -> &'static str {
        "cubemap_sky"
    }

    fn render_before_transparent(
        &mut self,
        gbuffer: &GBuffer,
        input: RenderbufferHandle,
        pipeline: &mut Pipeline,
        ctx: &mut FrameCtx<'_>,
    ) -> RenderbufferHandle {
        if !shader_ready(ctx.hub, self.shader) {
            return input;
        }
        let Some(env_id) = ctx.module.active_environment() else {
            return input;
        };
        let Some(env) = ctx.module.environment(env_id) else {
            return input;
        };
        let Some(sky_id) = env.cubemap_sky else {
            return input;
        };
        let Some(sky) = ctx.hub.textures.get(sky_id) else {
            return input;
        };
        if !sky.header.is_ready() {
            return input;
        }
        let sky_handle = sky.handle;
        let sky_intensity = env.sky_intensity;

        pipeline.begin_block(ctx, "sky");
        pipeline.set_render_targets_readonly_ds(ctx, &[input], Some(gbuffer.ds), true);
        let state = StateFlags::stencil(
            StencilFunc::Equal,
            0,
            0xff,
            0,
            StencilOp::Keep,
            StencilOp::Keep,
            StencilOp::Replace,
        );

        #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C)]
        struct SkyUniforms {
            intensity: f32,
            texture: BindlessHandle,
            _pad: [u32; 2],
        }
        let block = SkyUniforms {
            intensity: sky_intensity,
            texture: ctx.gpu.bindless_handle(sky_handle),
            _pad: [0; 2],
        };
        pipeline.set_uniform(ctx, &block);
        let shader = self.shader;
        pipeline.draw_array(ctx, 0, 3, shader, 0, state);
        pipeline.end_block(ctx);
        input
    }
}
