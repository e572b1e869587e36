//! Depth of Field
//!
//! Per-pixel circle of confusion from linearized depth, variable-radius
//! gather ignoring samples closer than `sharp_range`, composited back into
//! the input buffer with a textured-quad blit.

use crate::gal::{BindlessHandle, StateFlags, TextureFormat};
use crate::passes::shader_ready;
use crate::pipeline::plugin::{FrameCtx, GBuffer, RenderPlugin};
use crate::pipeline::renderbuffer::{RenderbufferDesc, RenderbufferHandle, RenderbufferSize};
use crate::pipeline::Pipeline;
use crate::resources::{ResourceHub, ShaderId};

pub struct Dof {
    shader: ShaderId,
}

impl Dof {
    #[must_use]
    pub fn new(hub: &mut ResourceHub) -> Self {
        Self {
            shader: hub.load_shader("pipelines/dof.shd"),
        }
    }
}

impl RenderPlugin for Dof {
    fn name(&self) -> &'static str {
        "dof"
    }

    fn render_before_tonemap(
        &mut self,
        gbuffer: &GBuffer,
        input: RenderbufferHandle,
        pipeline: &mut Pipeline,
        ctx: &mut FrameCtx<'_>,
    ) -> RenderbufferHandle {
        if !shader_ready(ctx.hub, self.shader) {
            return input;
        }
        let Some(camera_id) = ctx.module.active_camera() else {
            return input;
        };
        let Some(entity) = ctx.module.camera(camera_id) else {
            return input;
        };
        let camera = entity.camera.clone();
        if !camera.dof_enabled {
            return input;
        }

        pipeline.begin_block(ctx, "dof");
        let dof_rb = pipeline.create_renderbuffer(
            ctx,
            &RenderbufferDesc {
                size: RenderbufferSize::Relative(1.0, 1.0),
                format: TextureFormat::RGBA16F,
                flags: crate::gal::TextureFlags::RENDER_TARGET | crate::gal::TextureFlags::NO_MIPS,
                debug_name: "dof",
            },
        );

        #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C)]
        struct DofUniforms {
            distance: f32,
            range: f32,
            max_blur_size: f32,
            sharp_range: f32,
            texture: BindlessHandle,
            depth: BindlessHandle,
            _pad: [u32; 2],
        }
        let block = DofUniforms {
            distance: camera.dof_distance,
            range: camera.dof_range,
            max_blur_size: camera.dof_max_blur_size,
            sharp_range: camera.dof_sharp_range,
            texture: pipeline.to_bindless(ctx, input),
            depth: pipeline.to_bindless(ctx, gbuffer.ds),
            _pad: [0; 2],
        };

        pipeline.set_uniform(ctx, &block);
        pipeline.set_render_targets(ctx, &[dof_rb], None);
        let shader = self.shader;
        pipeline.draw_array(ctx, 0, 3, shader, 0, StateFlags::empty());

        // Composite back into the input so downstream passes keep their
        // expected buffer.
        pipeline.set_render_targets(ctx, &[input], None);
        let src = pipeline.to_bindless(ctx, dof_rb);
        pipeline.render_textured_quad(ctx, src, false, false);

        pipeline.end_block(ctx);
        input
    }
}
