//! Renderer
//!
//! Top-level glue owning the GAL context, the resource hub, the plugin
//! registry, and the frame's draw streams. One `frame()` call runs the
//! whole per-frame sequence:
//!
//! 1. `Gpu::begin_frame` — wait on the slot fence, retire deferred work
//! 2. resource hub pump (apply completed loads, request dependencies)
//! 3. plugin housekeeping ticks
//! 4. `Pipeline::render` into the frame stream
//! 5. execute the frame stream, then the end-of-frame stream (deaths)
//! 6. `Gpu::end_frame` + present
//!
//! Worker threads record into their own [`DrawStream`]s and hand them over
//! with [`Renderer::submit_stream`]; segments merge in submission order
//! ahead of the pipeline's stream.

use std::sync::Arc;

use glam::IVec2;

use crate::errors::Result;
use crate::gal::{Gpu, TextureHandle, WindowId};
use crate::pipeline::plugin::PluginRegistry;
use crate::pipeline::Pipeline;
use crate::resources::resource::ResourceIo;
use crate::resources::ResourceHub;
use crate::scene::RenderModule;
use crate::settings::RenderSettings;
use crate::stream::exec::{execute, ExecStats};
use crate::stream::DrawStream;

pub struct Renderer {
    pub gpu: Gpu,
    pub hub: ResourceHub,
    pub plugins: PluginRegistry,
    /// Streams handed over by worker threads, merged ahead of the frame.
    submitted: Vec<DrawStream>,
    /// Commands deferred to the end of the frame (resource deaths).
    end_frame_stream: DrawStream,
    last_stats: ExecStats,
}

impl Renderer {
    /// Initializes the GAL and resource system. The calling thread becomes
    /// the render thread.
    pub async fn new(settings: &RenderSettings, io: Arc<dyn ResourceIo>) -> Result<Self> {
        let gpu = Gpu::new(settings).await?;
        let hub = ResourceHub::new(io);
        Ok(Self {
            gpu,
            hub,
            plugins: PluginRegistry::new(),
            submitted: Vec::new(),
            end_frame_stream: DrawStream::new(),
            last_stats: ExecStats::default(),
        })
    }

    /// Registers the built-in post-process stack.
    pub fn register_default_plugins(&mut self) {
        crate::passes::register_default_plugins(&mut self.plugins, &mut self.hub);
    }

    /// Queues a worker-recorded stream. Executed next frame, in submission
    /// order, before the pipeline's own commands.
    pub fn submit_stream(&mut self, stream: DrawStream) {
        self.submitted.push(stream);
    }

    /// Stream for commands that must run after all rendering this frame
    /// (deferred destroys).
    pub fn end_frame_stream(&mut self) -> &mut DrawStream {
        &mut self.end_frame_stream
    }

    /// Renders one frame of `module` through `pipeline` into `window`.
    pub fn frame(
        &mut self,
        pipeline: &mut Pipeline,
        module: &RenderModule,
        window: WindowId,
        size: IVec2,
    ) -> Result<()> {
        let output = self
            .gpu
            .register_backbuffer(window, size.x as u32, size.y as u32)?;
        self.frame_to_target(pipeline, module, output, size);
        self.gpu.destroy_texture(output);
        self.gpu.present();
        Ok(())
    }

    /// Headless variant: renders into an existing GAL texture without a
    /// swapchain. Used by tests and offscreen capture.
    pub fn frame_to_target(
        &mut self,
        pipeline: &mut Pipeline,
        module: &RenderModule,
        output: TextureHandle,
        size: IVec2,
    ) {
        self.gpu.begin_frame();

        let mut frame_stream = DrawStream::new();
        for stream in self.submitted.drain(..) {
            frame_stream.merge(stream);
        }

        self.hub.update(&self.gpu, &mut frame_stream);
        self.plugins.frame(&mut self.gpu);

        pipeline.render(
            &self.gpu,
            &mut frame_stream,
            module,
            &mut self.hub,
            &mut self.plugins,
            output,
            size,
        );

        frame_stream.merge(std::mem::take(&mut self.end_frame_stream));
        self.last_stats = execute(frame_stream, &mut self.gpu);

        self.gpu.end_frame();
    }

    /// Execution counters of the last frame.
    #[must_use]
    pub fn last_stats(&self) -> ExecStats {
        self.last_stats
    }

    /// Flushes in-flight frames and tears plugins down.
    pub fn shutdown(mut self) {
        let mut stream = DrawStream::new();
        self.plugins.shutdown(&mut stream);
        self.gpu.begin_frame();
        execute(stream, &mut self.gpu);
        self.gpu.end_frame();
        self.gpu.shutdown();
    }
}
