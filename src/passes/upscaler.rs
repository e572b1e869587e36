//! External Upscaler Integration (FSR3-class)
//!
//! Consumes color + depth + motion vectors and produces an upscaled
//! output through a backend-native escape hatch on the draw stream. The
//! driver context is created per pipeline instance and reference-counted
//! by use: a context unused for [`CONTEXT_RETIRE_AGE`] frames is
//! destroyed.
//!
//! The backend is external (a DLL shim in production); it receives native
//! handles through [`UpscalerBackend`]. A missing backend self-disables
//! the plugin and the pipeline falls back to its other AA plugins.

use std::sync::Arc;

use glam::{IVec2, Vec2};
use parking_lot::Mutex;

use crate::gal::{Gpu, TextureFlags, TextureFormat, TextureHandle};
use crate::pipeline::plugin::{FrameCtx, GBuffer, RenderPlugin};
use crate::pipeline::renderbuffer::{RenderbufferDesc, RenderbufferHandle, RenderbufferSize};
use crate::pipeline::Pipeline;
use crate::resources::ResourceHub;

/// Frames a context may go unused before retirement.
pub const CONTEXT_RETIRE_AGE: u32 = 6;

/// Backend-owned context identifier.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct UpscaleContextId(pub u64);

/// Inputs handed to the backend each dispatch. Handles are GAL handles the
/// backend resolves against the [`Gpu`] it is called with.
#[derive(Clone, Copy, Debug)]
pub struct UpscaleInputs {
    pub color: TextureHandle,
    pub depth: TextureHandle,
    pub motion_vectors: TextureHandle,
    pub output: TextureHandle,
    pub render_size: IVec2,
    pub display_size: IVec2,
    pub jitter: Vec2,
    /// Reverse-Z depth: 1 at the near plane.
    pub depth_inverted: bool,
}

/// The foreign upscaler driver. Called on the render thread from stream
/// lambdas.
pub trait UpscalerBackend: Send {
    /// Creates a context for `render_size` inputs. `None` = driver
    /// unavailable; the plugin self-disables.
    fn create_context(&mut self, gpu: &mut Gpu, render_size: IVec2) -> Option<UpscaleContextId>;
    fn dispatch(&mut self, gpu: &mut Gpu, context: UpscaleContextId, inputs: &UpscaleInputs);
    fn destroy_context(&mut self, gpu: &mut Gpu, context: UpscaleContextId);
}

struct Context {
    pipeline_id: u64,
    size: IVec2,
    /// Shared with stream lambdas: the backend context is created on the
    /// render thread at first dispatch.
    backend_context: Arc<Mutex<Option<UpscaleContextId>>>,
    frames_since_last_use: u32,
    /// Unusable after a resize; kept only until the GPU drains.
    orphaned: bool,
}

pub struct Upscaler {
    backend: Arc<Mutex<dyn UpscalerBackend>>,
    contexts: Vec<Context>,
    pub enabled: bool,
}

impl Upscaler {
    #[must_use]
    pub fn new(_hub: &mut ResourceHub, backend: Arc<Mutex<dyn UpscalerBackend>>) -> Self {
        Self {
            backend,
            contexts: Vec::new(),
            enabled: true,
        }
    }

    /// Number of live driver contexts; observable for retirement tests.
    #[must_use]
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    fn context_index(&mut self, pipeline_id: u64, size: IVec2) -> usize {
        for (i, ctx) in self.contexts.iter_mut().enumerate() {
            if ctx.pipeline_id == pipeline_id && !ctx.orphaned {
                ctx.frames_since_last_use = 0;
                if ctx.size == size {
                    return i;
                }
                // Size changed: the GPU may still consume the old context,
                // so orphan it and let the age-out path destroy it.
                ctx.orphaned = true;
                break;
            }
        }
        self.contexts.push(Context {
            pipeline_id,
            size,
            backend_context: Arc::new(Mutex::new(None)),
            frames_since_last_use: 0,
            orphaned: false,
        });
        self.contexts.len() - 1
    }
}

impl RenderPlugin for Upscaler {
    fn name(&self) -> &'static str {
        "upscaler"
    }

    fn frame(&mut self, gpu: &mut Gpu) {
        let backend = self.backend.clone();
        self.contexts.retain_mut(|ctx| {
            ctx.frames_since_last_use += 1;
            if ctx.frames_since_last_use < CONTEXT_RETIRE_AGE {
                return true;
            }
            if let Some(id) = ctx.backend_context.lock().take() {
                backend.lock().destroy_context(gpu, id);
            }
            false
        });
    }

    fn render_aa(
        &mut self,
        gbuffer: &GBuffer,
        input: RenderbufferHandle,
        pipeline: &mut Pipeline,
        ctx: &mut FrameCtx<'_>,
    ) -> Option<RenderbufferHandle> {
        if !self.enabled {
            return None;
        }

        let vp = pipeline.viewport().clone();
        let render_size = IVec2::new(vp.w.max(1), vp.h.max(1));
        let display_size = pipeline.display_size();
        let index = self.context_index(pipeline.instance_id(), render_size);

        // Upscalers require a jittered projection.
        pipeline.enable_pixel_jitter(true);
        pipeline.begin_block(ctx, "upscale");

        let output = pipeline.create_renderbuffer(
            ctx,
            &RenderbufferDesc {
                size: RenderbufferSize::Fixed(display_size),
                format: TextureFormat::RGBA16F,
                flags: TextureFlags::RENDER_TARGET
                    | TextureFlags::NO_MIPS
                    | TextureFlags::COMPUTE_WRITE,
                debug_name: "upscale_output",
            },
        );

        let inputs = UpscaleInputs {
            color: pipeline.to_texture(input),
            depth: pipeline.to_texture(gbuffer.ds),
            motion_vectors: pipeline.to_texture(gbuffer.d),
            output: pipeline.to_texture(output),
            render_size,
            display_size,
            jitter: pipeline.current_jitter(),
            depth_inverted: true,
        };

        // Backend calls run with native handles on the render thread; the
        // context id writes back through the shared slot.
        let backend = self.backend.clone();
        let slot = self.contexts[index].backend_context.clone();
        ctx.stream.push_lambda(move |gpu: &mut Gpu| {
            let mut backend = backend.lock();
            let mut context = slot.lock();
            if context.is_none() {
                *context = backend.create_context(gpu, inputs.render_size);
            }
            if let Some(id) = *context {
                backend.dispatch(gpu, id, &inputs);
            }
        });

        pipeline.end_block(ctx);
        Some(output)
    }

    fn shutdown(&mut self, _stream: &mut crate::stream::DrawStream) {
        // Contexts drain through frame(); nothing stream-owned here.
        self.contexts.clear();
    }
}
