//! Top-Down Ambient Occlusion
//!
//! Maintains a 512×512 D32 depth map rendered top-down from a fixed
//! orthographic view centered on the camera, then modulates the G-buffer's
//! AO channel with a height-derived occlusion term.

use glam::{DVec3, IVec2, Mat4, Quat, Vec3};

use crate::gal::{BindlessHandle, RwBindlessHandle, TextureFormat};
use crate::passes::shader_ready;
use crate::pipeline::bucket::{BucketDesc, SortOrder};
use crate::pipeline::plugin::{FrameCtx, GBuffer, RenderPlugin};
use crate::pipeline::renderbuffer::{
    RenderbufferDesc, RenderbufferHandle, RenderbufferSize,
};
use crate::pipeline::Pipeline;
use crate::resources::{ResourceHub, ShaderId};
use crate::scene::camera::ShiftedFrustum;
use crate::scene::CameraParams;
use crate::stream::ClearFlags;

/// Top-down map resolution.
const MAP_SIZE: i32 = 512;

#[derive(Default)]
struct TdaoData {
    depth_map: Option<RenderbufferHandle>,
}

pub struct Tdao {
    shader: ShaderId,
    pub enabled: bool,
    pub xz_range: f32,
    pub y_range: f32,
    pub intensity: f32,
}

impl Tdao {
    #[must_use]
    pub fn new(hub: &mut ResourceHub) -> Self {
        Self {
            shader: hub.load_shader("pipelines/tdao.shd"),
            enabled: true,
            xz_range: 100.0,
            y_range: 200.0,
            intensity: 0.3,
        }
    }

    fn top_down_params(&self, camera_pos: DVec3) -> CameraParams {
        // Straight down: -90° around X.
        let rot = Quat::from_xyzw(-std::f32::consts::FRAC_1_SQRT_2, 0.0, 0.0, std::f32::consts::FRAC_1_SQRT_2);
        let forward = rot * Vec3::Z;
        let up = rot * Vec3::Y;
        let frustum = ShiftedFrustum::compute_ortho(
            camera_pos,
            forward,
            up,
            self.xz_range,
            self.xz_range,
            -0.5 * self.y_range,
            0.5 * self.y_range,
        );
        let projection = Mat4::orthographic_rh(
            -self.xz_range,
            self.xz_range,
            -self.xz_range,
            self.xz_range,
            0.5 * self.y_range,
            -0.5 * self.y_range,
        );
        CameraParams {
            pos: camera_pos,
            rot,
            view: Mat4::from_quat(rot).inverse(),
            projection,
            frustum,
            lod_multiplier: 1.0,
            is_shadow: false,
        }
    }
}

impl RenderPlugin for Tdao {
    fn name(&self) -> &'static str {
        "tdao"
    }

    fn render_before_light_pass(
        &mut self,
        gbuffer: &GBuffer,
        pipeline: &mut Pipeline,
        ctx: &mut FrameCtx<'_>,
    ) {
        if !self.enabled {
            pipeline.plugin_data::<TdaoData>().depth_map = None;
            return;
        }
        if !shader_ready(ctx.hub, self.shader) {
            return;
        }

        pipeline.begin_block(ctx, "tdao");
        let depth_map = match pipeline.plugin_data::<TdaoData>().depth_map {
            Some(rb) => rb,
            None => {
                let rb = pipeline.create_renderbuffer(
                    ctx,
                    &RenderbufferDesc {
                        size: RenderbufferSize::Fixed(IVec2::splat(MAP_SIZE)),
                        format: TextureFormat::D32,
                        flags: crate::gal::TextureFlags::RENDER_TARGET,
                        debug_name: "tdao",
                    },
                );
                pipeline.plugin_data::<TdaoData>().depth_map = Some(rb);
                rb
            }
        };
        pipeline.keep_renderbuffer_alive(depth_map);

        // Re-render the map around the current camera.
        let camera_pos = pipeline.viewport().pos;
        let params = self.top_down_params(camera_pos);

        pipeline.set_render_targets(ctx, &[], Some(depth_map));
        pipeline.clear(ctx, ClearFlags::ALL, [0.0, 0.0, 0.0, 1.0], 0.0, 0);
        pipeline.set_viewport(ctx, 0, 0, MAP_SIZE, MAP_SIZE);
        pipeline.pass(ctx, &params);
        let view_id = pipeline.cull(
            ctx,
            &params,
            &[
                BucketDesc {
                    layer: "default",
                    define: "DEPTH",
                    sort: SortOrder::Default,
                },
                BucketDesc {
                    layer: "impostor",
                    define: "DEPTH",
                    sort: SortOrder::Default,
                },
            ],
        );
        pipeline.render_bucket(ctx, view_id, 0);
        pipeline.render_bucket(ctx, view_id, 1);

        // Restore the full-view viewport for the modulation dispatch.
        let vp = pipeline.viewport().clone();
        pipeline.set_viewport(ctx, 0, 0, vp.w, vp.h);

        #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C)]
        struct TdaoUniforms {
            intensity: f32,
            width: f32,
            height: f32,
            range: f32,
            half_depth_range: f32,
            scale: f32,
            depth_offset: f32,
            _pad: f32,
            depth_buffer: BindlessHandle,
            gbuffer_b: RwBindlessHandle,
            topdown_depthmap: BindlessHandle,
            _pad2: u32,
        }
        let block = TdaoUniforms {
            intensity: self.intensity,
            width: vp.w as f32,
            height: vp.h as f32,
            range: self.xz_range,
            half_depth_range: self.y_range * 0.5,
            scale: 0.01,
            depth_offset: 0.02,
            _pad: 0.0,
            depth_buffer: pipeline.to_bindless(ctx, gbuffer.ds),
            gbuffer_b: pipeline.to_rw_bindless(ctx, gbuffer.b),
            topdown_depthmap: pipeline.to_bindless(ctx, depth_map),
            _pad2: 0,
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
        pipeline.end_block(ctx);
    }
}
