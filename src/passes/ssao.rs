//! Screen-Space Ambient Occlusion
//!
//! Half-resolution compute pass producing an R8 occlusion buffer from the
//! depth and normal targets, then a second compute merging it into the
//! G-buffer's AO channel (gbuffer B alpha).

use glam::Vec2;

use crate::gal::{BindlessHandle, RwBindlessHandle, TextureFlags, TextureFormat};
use crate::passes::shader_ready;
use crate::pipeline::plugin::{FrameCtx, GBuffer, RenderPlugin};
use crate::pipeline::renderbuffer::{RenderbufferDesc, RenderbufferSize};
use crate::pipeline::Pipeline;
use crate::resources::{ResourceHub, ShaderId};

pub struct Ssao {
    shader: ShaderId,
    blit_shader: ShaderId,
    pub enabled: bool,
    pub radius: f32,
    pub intensity: f32,
}

impl Ssao {
    #[must_use]
    pub fn new(hub: &mut ResourceHub) -> Self {
        Self {
            shader: hub.load_shader("pipelines/ssao.shd"),
            blit_shader: hub.load_shader("pipelines/ssao_blit.shd"),
            enabled: true,
            radius: 0.2,
            intensity: 3.0,
        }
    }
}

impl RenderPlugin for Ssao {
    fn name(&self) -> &'static str {
        "ssao"
    }

    fn render_before_light_pass(
        &mut self,
        gbuffer: &GBuffer,
        pipeline: &mut Pipeline,
        ctx: &mut FrameCtx<'_>,
    ) {
        if !self.enabled {
            return;
        }
        if !shader_ready(ctx.hub, self.shader) || !shader_ready(ctx.hub, self.blit_shader) {
            return;
        }

        pipeline.begin_block(ctx, "ssao");
        let ssao_rb = pipeline.create_renderbuffer(
            ctx,
            &RenderbufferDesc {
                size: RenderbufferSize::Relative(0.5, 0.5),
                format: TextureFormat::R8,
                flags: TextureFlags::COMPUTE_WRITE,
                debug_name: "ssao",
            },
        );

        let vp = pipeline.viewport().clone();
        let half = (vp.w.max(1) / 2, vp.h.max(1) / 2);

        #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C)]
        struct OcclusionUniforms {
            radius: f32,
            intensity: f32,
            width: f32,
            height: f32,
            normal_buffer: BindlessHandle,
            depth_buffer: BindlessHandle,
            output: RwBindlessHandle,
            _pad: u32,
        }
        let block = OcclusionUniforms {
            radius: self.radius,
            intensity: self.intensity,
            width: half.0 as f32,
            height: half.1 as f32,
            normal_buffer: pipeline.to_bindless(ctx, gbuffer.b),
            depth_buffer: pipeline.to_bindless(ctx, gbuffer.ds),
            output: pipeline.to_rw_bindless(ctx, ssao_rb),
            _pad: 0,
        };
        pipeline.set_uniform(ctx, &block);
        pipeline.dispatch(
            ctx,
            self.shader,
            (half.0 as u32 + 15) / 16,
            (half.1 as u32 + 15) / 16,
            1,
            0,
        );
        ctx.stream.memory_barrier_texture(pipeline.to_texture(ssao_rb));

        #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C)]
        struct MergeUniforms {
            size: Vec2,
            ssao_buf: BindlessHandle,
            gbuffer_b: RwBindlessHandle,
        }
        let block = MergeUniforms {
            size: Vec2::new(vp.w as f32, vp.h as f32),
            ssao_buf: pipeline.to_bindless(ctx, ssao_rb),
            gbuffer_b: pipeline.to_rw_bindless(ctx, gbuffer.b),
        };
        pipeline.set_uniform(ctx, &block);
        ctx.stream.barrier_write_texture(pipeline.to_texture(gbuffer.b));
        pipeline.dispatch(
            ctx,
            self.blit_shader,
            (vp.w as u32 + 15) / 16,
            (vp.h as u32 + 15) / 16,
            1,
            0,
        );
        pipeline.end_block(ctx);
    }
}
