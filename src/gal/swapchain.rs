//! Swapchain / Window Table
//!
//! A small table of window slots, each holding a presentation surface and
//! its configuration. Windows not drawn to for more than one frame are
//! retired. Resizing and vsync changes flush all in-flight frames first;
//! the [`Gpu`](crate::gal::Gpu) front end enforces that ordering.

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::errors::{PyreError, Result};

/// Identifier of a window slot, stable for the window's lifetime.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct WindowId(pub u64);

/// One presentation target.
pub struct WindowSlot {
    pub id: WindowId,
    pub surface: wgpu::Surface<'static>,
    pub config: wgpu::SurfaceConfiguration,
    /// Frame counter value of the last frame that drew to this window.
    pub last_drawn_frame: u64,
    /// Acquired backbuffer for the current frame, if any.
    pub current: Option<wgpu::SurfaceTexture>,
}

/// The set of live window slots.
#[derive(Default)]
pub struct SwapchainSet {
    windows: Vec<WindowSlot>,
    next_id: u64,
}

impl SwapchainSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a surface + swapchain for `window` and returns its slot id.
    pub fn add_window<W>(
        &mut self,
        instance: &wgpu::Instance,
        adapter: &wgpu::Adapter,
        device: &wgpu::Device,
        window: W,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> Result<WindowId>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        let surface = instance
            .create_surface(window)
            .map_err(|e| PyreError::SurfaceError(e.to_string()))?;
        let mut config = surface
            .get_default_config(adapter, width, height)
            .ok_or_else(|| PyreError::SurfaceError("surface not supported by adapter".into()))?;
        config.present_mode = present_mode(vsync);
        surface.configure(device, &config);

        let id = WindowId(self.next_id);
        self.next_id += 1;
        self.windows.push(WindowSlot {
            id,
            surface,
            config,
            last_drawn_frame: 0,
            current: None,
        });
        Ok(id)
    }

    #[must_use]
    pub fn get(&mut self, id: WindowId) -> Option<&mut WindowSlot> {
        self.windows.iter_mut().find(|w| w.id == id)
    }

    /// Acquires the backbuffer of `id` for this frame and returns a view of
    /// it. The acquired texture is held until [`present`](Self::present).
    pub fn acquire(
        &mut self,
        device: &wgpu::Device,
        id: WindowId,
        frame_counter: u64,
    ) -> Result<wgpu::TextureView> {
        let slot = self
            .get(id)
            .ok_or_else(|| PyreError::SurfaceError("unknown window".into()))?;
        if slot.current.is_none() {
            let texture = match slot.surface.get_current_texture() {
                wgpu::CurrentSurfaceTexture::Success(t)
                | wgpu::CurrentSurfaceTexture::Suboptimal(t) => t,
                wgpu::CurrentSurfaceTexture::Outdated | wgpu::CurrentSurfaceTexture::Lost => {
                    slot.surface.configure(device, &slot.config);
                    match slot.surface.get_current_texture() {
                        wgpu::CurrentSurfaceTexture::Success(t)
                        | wgpu::CurrentSurfaceTexture::Suboptimal(t) => t,
                        other => {
                            return Err(PyreError::SurfaceError(format!("{other:?}")));
                        }
                    }
                }
                other => return Err(PyreError::SurfaceError(format!("{other:?}"))),
            };
            slot.current = Some(texture);
        }
        slot.last_drawn_frame = frame_counter;
        let view = slot
            .current
            .as_ref()
            .unwrap()
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        Ok(view)
    }

    /// Presents every window drawn this frame and retires windows that have
    /// gone undrawn for more than one frame.
    pub fn present(&mut self, frame_counter: u64) {
        for slot in &mut self.windows {
            if let Some(texture) = slot.current.take() {
                texture.present();
            }
        }
        self.windows.retain(|w| {
            let retired = frame_counter > w.last_drawn_frame + 1;
            if retired {
                log::info!("retiring idle window {:?}", w.id);
            }
            !retired
        });
    }

    /// Reconfigures a window's swapchain after a resize. Callers must have
    /// flushed all in-flight frames.
    pub fn resize(&mut self, device: &wgpu::Device, id: WindowId, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        if let Some(slot) = self.get(id) {
            slot.current = None;
            slot.config.width = width;
            slot.config.height = height;
            slot.surface.configure(device, &slot.config);
        }
    }

    /// Applies a new vsync mode to every window. Callers must have flushed
    /// all in-flight frames.
    pub fn set_vsync(&mut self, device: &wgpu::Device, vsync: bool) {
        for slot in &mut self.windows {
            slot.current = None;
            slot.config.present_mode = present_mode(vsync);
            slot.surface.configure(device, &slot.config);
        }
    }

    #[must_use]
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }
}

fn present_mode(vsync: bool) -> wgpu::PresentMode {
    if vsync {
        wgpu::PresentMode::AutoVsync
    } else {
        wgpu::PresentMode::AutoNoVsync
    }
}
