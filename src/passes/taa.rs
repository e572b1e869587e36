//! Temporal Anti-Aliasing
//!
//! Jittered projection + history blend with neighborhood clamping against
//! the motion-vector target, resolved in a full-screen pass. The resolved
//! frame becomes next frame's history. Disabling TAA also disables pixel
//! jitter and drops the history so re-enabling starts clean.

use glam::Vec2;

use crate::gal::{BindlessHandle, StateFlags, TextureFlags, TextureFormat};
use crate::passes::shader_ready;
use crate::pipeline::plugin::{FrameCtx, GBuffer, RenderPlugin};
use crate::pipeline::renderbuffer::{RenderbufferDesc, RenderbufferHandle, RenderbufferSize};
use crate::pipeline::Pipeline;
use crate::resources::{ResourceHub, ShaderId};
use crate::stream::ClearFlags;

#[derive(Default)]
struct TaaData {
    history: Option<RenderbufferHandle>,
}

pub struct Taa {
    shader: ShaderId,
    pub enabled: bool,
    /// Blend weight of the current frame against the history.
    pub current_frame_weight: f32,
}

impl Taa {
    #[must_use]
    pub fn new(hub: &mut ResourceHub) -> Self {
        Self {
            shader: hub.load_shader("pipelines/taa.shd"),
            enabled: true,
            current_frame_weight: 0.1,
        }
    }
}

impl RenderPlugin for Taa {
    fn name(&self) -> &'static str {
        "taa"
    }

    fn render_aa(
        &mut self,
        gbuffer: &GBuffer,
        input: RenderbufferHandle,
        pipeline: &mut Pipeline,
        ctx: &mut FrameCtx<'_>,
    ) -> Option<RenderbufferHandle> {
        if !self.enabled {
            pipeline.plugin_data::<TaaData>().history = None;
            pipeline.enable_pixel_jitter(false);
            return None;
        }
        if !shader_ready(ctx.hub, self.shader) {
            return None;
        }

        pipeline.enable_pixel_jitter(true);
        pipeline.begin_block(ctx, "taa");

        let desc = RenderbufferDesc {
            size: RenderbufferSize::Relative(1.0, 1.0),
            format: TextureFormat::RGBA16F,
            flags: TextureFlags::RENDER_TARGET | TextureFlags::NO_MIPS,
            debug_name: "taa",
        };
        let history = match pipeline.plugin_data::<TaaData>().history {
            Some(rb) => rb,
            None => {
                let rb = pipeline.create_renderbuffer(ctx, &desc);
                pipeline.set_render_targets(ctx, &[rb], None);
                pipeline.clear(ctx, ClearFlags::ALL, [1.0, 1.0, 1.0, 1.0], 0.0, 0);
                pipeline.plugin_data::<TaaData>().history = Some(rb);
                rb
            }
        };

        let resolved = pipeline.create_renderbuffer(
            ctx,
            &RenderbufferDesc {
                debug_name: "taa2",
                ..desc.clone()
            },
        );

        let display = pipeline.display_size();

        #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C)]
        struct TaaUniforms {
            size: Vec2,
            current_frame_weight: f32,
            _pad: f32,
            history: BindlessHandle,
            current: BindlessHandle,
            motion_vectors: BindlessHandle,
            _pad2: u32,
        }
        let block = TaaUniforms {
            size: Vec2::new(display.x as f32, display.y as f32),
            current_frame_weight: self.current_frame_weight,
            _pad: 0.0,
            history: pipeline.to_bindless(ctx, history),
            current: pipeline.to_bindless(ctx, input),
            motion_vectors: pipeline.to_bindless(ctx, gbuffer.d),
            _pad2: 0,
        };
        pipeline.set_render_targets(ctx, &[resolved], None);
        pipeline.set_uniform(ctx, &block);
        let shader = self.shader;
        pipeline.draw_array(ctx, 0, 3, shader, 0, StateFlags::empty());

        // Copy the resolved result out; the resolve target itself is kept
        // as next frame's history.
        let output = pipeline.create_renderbuffer(
            ctx,
            &RenderbufferDesc {
                size: RenderbufferSize::Relative(1.0, 1.0),
                format: TextureFormat::RGBA16F,
                flags: TextureFlags::RENDER_TARGET | TextureFlags::NO_MIPS,
                debug_name: "taa_output",
            },
        );
        pipeline.set_render_targets(ctx, &[output], None);
        let src = pipeline.to_bindless(ctx, resolved);
        pipeline.render_textured_quad(ctx, src, false, false);

        pipeline.plugin_data::<TaaData>().history = Some(resolved);
        pipeline.keep_renderbuffer_alive(resolved);
        pipeline.end_block(ctx);
        Some(output)
    }
}
