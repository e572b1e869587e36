//! Render Plugins
//!
//! Post-processing hooks composed by the [`Pipeline`]. All hooks are
//! optional; every default is a pass-through. The hook order per frame is
//! part of the pipeline contract:
//!
//! 1. `render_before_light_pass` (SSAO, TDAO, SSS)
//! 2. `render_before_transparent` (sky, atmosphere)
//! 3. `render_before_tonemap` (DOF, bloom)
//! 4. `tonemap` — first registered plugin claiming it wins
//! 5. `render_aa` — at most one produces output
//! 6. `render_after_tonemap` (film grain) — reverse registration order
//! 7. `debug_output` — first claimer replaces the final image
//!
//! `render_before_*` hooks run in registration order; `render_after_*`
//! hooks run in reverse registration order, so a plugin wrapping the frame
//! sees symmetric entry/exit points.
//!
//! Plugins never fail a frame: a missing shader or unready resource makes
//! the hook return its input unchanged.
//!
//! [`Pipeline`]: crate::pipeline::Pipeline

use crate::gal::Gpu;
use crate::pipeline::renderbuffer::RenderbufferHandle;
use crate::pipeline::Pipeline;
use crate::resources::ResourceHub;
use crate::scene::RenderModule;
use crate::stream::DrawStream;

/// Borrowed per-frame services handed to every hook alongside the
/// pipeline.
pub struct FrameCtx<'a> {
    pub gpu: &'a Gpu,
    pub stream: &'a mut DrawStream,
    pub module: &'a RenderModule,
    pub hub: &'a mut ResourceHub,
}

/// The G-buffer layout produced by the geometry pass.
///
/// | Target | Contents |
/// |--------|----------|
/// | A | albedo RGB + metallic |
/// | B | normals + roughness + AO |
/// | C | emissive + translucency |
/// | D | motion vectors |
/// | DS | depth + stencil |
#[derive(Clone, Copy, Debug)]
pub struct GBuffer {
    pub a: RenderbufferHandle,
    pub b: RenderbufferHandle,
    pub c: RenderbufferHandle,
    pub d: RenderbufferHandle,
    pub ds: RenderbufferHandle,
}

/// A post-process plugin. Hooks default to pass-through.
pub trait RenderPlugin {
    fn name(&self) -> &'static str;

    /// Once per frame, before any view renders. Used for time-based
    /// housekeeping (context retirement, history invalidation).
    fn frame(&mut self, gpu: &mut Gpu) {
        let _ = gpu;
    }

    /// Releases plugin-owned GPU resources through the stream's deferred
    /// path. Called once at renderer teardown.
    fn shutdown(&mut self, stream: &mut DrawStream) {
        let _ = stream;
    }

    /// May write to existing G-buffer channels or produce buffers sampled
    /// by later passes.
    fn render_before_light_pass(
        &mut self,
        gbuffer: &GBuffer,
        pipeline: &mut Pipeline,
        ctx: &mut FrameCtx<'_>,
    ) {
        let (_, _, _) = (gbuffer, pipeline, ctx);
    }

    /// Composites into HDR before transparents draw (sky, atmosphere).
    fn render_before_transparent(
        &mut self,
        gbuffer: &GBuffer,
        hdr: RenderbufferHandle,
        pipeline: &mut Pipeline,
        ctx: &mut FrameCtx<'_>,
    ) -> RenderbufferHandle {
        let (_, _, _) = (gbuffer, pipeline, ctx);
        hdr
    }

    /// HDR-space effects before tonemapping (DOF, bloom).
    fn render_before_tonemap(
        &mut self,
        gbuffer: &GBuffer,
        hdr: RenderbufferHandle,
        pipeline: &mut Pipeline,
        ctx: &mut FrameCtx<'_>,
    ) -> RenderbufferHandle {
        let (_, _, _) = (gbuffer, pipeline, ctx);
        hdr
    }

    /// Claims tonemapping. The first registered claimer owns it; returning
    /// `false` defers to the next plugin or the default operator.
    fn tonemap(
        &mut self,
        hdr: RenderbufferHandle,
        output: &mut RenderbufferHandle,
        pipeline: &mut Pipeline,
        ctx: &mut FrameCtx<'_>,
    ) -> bool {
        let (_, _, _, _) = (hdr, output, pipeline, ctx);
        false
    }

    /// Anti-aliasing. Returning `Some` consumes the input; at most one
    /// plugin produces output per frame.
    fn render_aa(
        &mut self,
        gbuffer: &GBuffer,
        input: RenderbufferHandle,
        pipeline: &mut Pipeline,
        ctx: &mut FrameCtx<'_>,
    ) -> Option<RenderbufferHandle> {
        let (_, _, _, _) = (gbuffer, input, pipeline, ctx);
        None
    }

    /// LDR-space effects after tonemapping (film grain).
    fn render_after_tonemap(
        &mut self,
        gbuffer: &GBuffer,
        input: RenderbufferHandle,
        pipeline: &mut Pipeline,
        ctx: &mut FrameCtx<'_>,
    ) -> RenderbufferHandle {
        let (_, _, _) = (gbuffer, pipeline, ctx);
        input
    }

    /// Debug visualization. Returning `true` replaces the final output
    /// with whatever the plugin drew.
    fn debug_output(
        &mut self,
        input: RenderbufferHandle,
        pipeline: &mut Pipeline,
        ctx: &mut FrameCtx<'_>,
    ) -> bool {
        let (_, _, _) = (input, pipeline, ctx);
        false
    }
}

/// Ordered plugin list. Registration order defines hook order.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Box<dyn RenderPlugin>>,
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Box<dyn RenderPlugin>) {
        log::info!("registered render plugin '{}'", plugin.name());
        self.plugins.push(plugin);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn RenderPlugin>> {
        self.plugins.iter_mut()
    }

    pub fn iter_mut_rev(&mut self) -> impl Iterator<Item = &mut Box<dyn RenderPlugin>> {
        self.plugins.iter_mut().rev()
    }

    /// Per-frame housekeeping tick for every plugin.
    pub fn frame(&mut self, gpu: &mut Gpu) {
        for plugin in &mut self.plugins {
            plugin.frame(gpu);
        }
    }

    /// Tears every plugin down.
    pub fn shutdown(&mut self, stream: &mut DrawStream) {
        for plugin in &mut self.plugins {
            plugin.shutdown(stream);
        }
    }
}
