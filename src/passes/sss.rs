//! Screen-Space Shadows
//!
//! Ray-marches the depth buffer toward the sun in screen space, then
//! temporally reprojects against a history buffer and folds the result
//! into the G-buffer's shadow channel (gbuffer C).

use glam::Vec2;

use crate::gal::{BindlessHandle, RwBindlessHandle, TextureFlags, TextureFormat};
use crate::passes::shader_ready;
use crate::pipeline::plugin::{FrameCtx, GBuffer, RenderPlugin};
use crate::pipeline::renderbuffer::{
    RenderbufferDesc, RenderbufferHandle, RenderbufferSize,
};
use crate::pipeline::Pipeline;
use crate::resources::{ResourceHub, ShaderId};
use crate::stream::ClearFlags;

#[derive(Default)]
struct SssData {
    history: Option<RenderbufferHandle>,
}

pub struct Sss {
    shader: ShaderId,
    blit_shader: ShaderId,
    pub enabled: bool,
    pub max_steps: u32,
    pub stride: f32,
    pub current_frame_weight: f32,
}

impl Sss {
    #[must_use]
    pub fn new(hub: &mut ResourceHub) -> Self {
        Self {
            shader: hub.load_shader("pipelines/sss.shd"),
            blit_shader: hub.load_shader("pipelines/sss_blit.shd"),
            enabled: false,
            max_steps: 20,
            stride: 4.0,
            current_frame_weight: 0.1,
        }
    }
}

impl RenderPlugin for Sss {
    fn name(&self) -> &'static str {
        "sss"
    }

    fn render_before_light_pass(
        &mut self,
        gbuffer: &GBuffer,
        pipeline: &mut Pipeline,
        ctx: &mut FrameCtx<'_>,
    ) {
        if !shader_ready(ctx.hub, self.shader) || !shader_ready(ctx.hub, self.blit_shader) {
            return;
        }
        if !self.enabled {
            pipeline.plugin_data::<SssData>().history = None;
            return;
        }

        pipeline.begin_block(ctx, "sss");
        let desc = RenderbufferDesc {
            size: RenderbufferSize::Relative(1.0, 1.0),
            format: TextureFormat::R8,
            flags: TextureFlags::COMPUTE_WRITE | TextureFlags::RENDER_TARGET,
            debug_name: "sss",
        };
        let sss = pipeline.create_renderbuffer(ctx, &desc);

        let history = match pipeline.plugin_data::<SssData>().history {
            Some(rb) => rb,
            None => {
                let rb = pipeline.create_renderbuffer(ctx, &desc);
                pipeline.set_render_targets(ctx, &[rb], None);
                pipeline.clear(ctx, ClearFlags::ALL, [1.0, 1.0, 1.0, 1.0], 0.0, 0);
                pipeline.plugin_data::<SssData>().history = Some(rb);
                rb
            }
        };

        let vp = pipeline.viewport().clone();

        #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C)]
        struct MarchUniforms {
            size: Vec2,
            max_steps: f32,
            stride: f32,
            depth: BindlessHandle,
            sss_buffer: RwBindlessHandle,
        }
        let block = MarchUniforms {
            size: Vec2::new(vp.w as f32, vp.h as f32),
            max_steps: self.max_steps as f32,
            stride: self.stride,
            depth: pipeline.to_bindless(ctx, gbuffer.ds),
            sss_buffer: pipeline.to_rw_bindless(ctx, sss),
        };
        pipeline.set_uniform(ctx, &block);
        pipeline.dispatch(
            ctx,
            self.shader,
            (vp.w as u32 + 15) / 16,
            (vp.h as u32 + 15) / 16,
            1,
            0,
        );
        ctx.stream.memory_barrier_texture(pipeline.to_texture(sss));

        #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C)]
        struct ResolveUniforms {
            size: Vec2,
            current_frame_weight: f32,
            _pad: f32,
            sss: RwBindlessHandle,
            history: BindlessHandle,
            depth: BindlessHandle,
            gbuffer_c: RwBindlessHandle,
        }
        let block = ResolveUniforms {
            size: Vec2::new(vp.w as f32, vp.h as f32),
            current_frame_weight: self.current_frame_weight,
            _pad: 0.0,
            sss: pipeline.to_rw_bindless(ctx, sss),
            history: pipeline.to_bindless(ctx, history),
            depth: pipeline.to_bindless(ctx, gbuffer.ds),
            gbuffer_c: pipeline.to_rw_bindless(ctx, gbuffer.c),
        };
        pipeline.set_uniform(ctx, &block);
        pipeline.dispatch(
            ctx,
            self.blit_shader,
            (vp.w as u32 + 15) / 16,
            (vp.h as u32 + 15) / 16,
            1,
            0,
        );
        ctx.stream.memory_barrier_texture(pipeline.to_texture(gbuffer.c));

        // This frame's march becomes the next frame's history.
        pipeline.plugin_data::<SssData>().history = Some(sss);
        pipeline.keep_renderbuffer_alive(sss);
        pipeline.end_block(ctx);
    }
}
