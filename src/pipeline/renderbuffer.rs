//! Renderbuffer Pool
//!
//! Pool-allocated transient textures with a lifetime of one frame.
//! `keep_alive` extends a buffer across the frame boundary (TAA history,
//! TDAO depth map). Unkept buffers return to the free pool at frame end;
//! buffers idle for several frames are destroyed by [`RenderbufferPool::trim`].
//!
//! ```text
//! allocate() ──► Active ──end_frame()──► Free(idle)
//!                  │  ▲                     │
//!        keep_alive│  └──── reuse ──────────┘
//!                  ▼
//!                Kept ──end_frame()──► Active (next frame)
//! ```
//!
//! Within one frame the pool never hands the same entry out twice, so a
//! renderbuffer cannot alias another one bound in the same pass.

use glam::IVec2;

use crate::gal::{Gpu, TextureFlags, TextureFormat, TextureHandle};
use crate::stream::DrawStream;

/// Sizing of a renderbuffer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RenderbufferSize {
    /// Fraction of the viewport (x, y).
    Relative(f32, f32),
    Fixed(IVec2),
}

/// Creation descriptor of a pooled renderbuffer.
#[derive(Clone, Debug)]
pub struct RenderbufferDesc {
    pub size: RenderbufferSize,
    pub format: TextureFormat,
    pub flags: TextureFlags,
    pub debug_name: &'static str,
}

impl Default for RenderbufferDesc {
    fn default() -> Self {
        Self {
            size: RenderbufferSize::Relative(1.0, 1.0),
            format: TextureFormat::RGBA16F,
            flags: TextureFlags::RENDER_TARGET | TextureFlags::NO_MIPS,
            debug_name: "renderbuffer",
        }
    }
}

/// Handle to a pooled renderbuffer. Stable while the buffer is active or
/// kept; invalid after the entry returns to the free pool.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RenderbufferHandle(u32);

impl RenderbufferHandle {
    pub const INVALID: Self = Self(u32::MAX);

    #[must_use]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct PoolKey {
    width: u32,
    height: u32,
    format: TextureFormat,
    flags: TextureFlags,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum EntryState {
    Free { idle_frames: u32 },
    Active,
    Kept,
}

struct Entry {
    key: PoolKey,
    handle: TextureHandle,
    state: EntryState,
}

/// The pipeline's transient texture pool.
#[derive(Default)]
pub struct RenderbufferPool {
    entries: Vec<Entry>,
}

impl RenderbufferPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve_size(desc: &RenderbufferDesc, viewport: IVec2) -> (u32, u32) {
        match desc.size {
            RenderbufferSize::Fixed(size) => (size.x.max(1) as u32, size.y.max(1) as u32),
            RenderbufferSize::Relative(x, y) => (
                ((viewport.x as f32 * x) as i32).max(1) as u32,
                ((viewport.y as f32 * y) as i32).max(1) as u32,
            ),
        }
    }

    /// Allocates a renderbuffer, reusing a free compatible texture when one
    /// exists. The GAL texture is created through the draw stream on a pool
    /// miss.
    pub fn allocate(
        &mut self,
        gpu: &Gpu,
        stream: &mut DrawStream,
        desc: &RenderbufferDesc,
        viewport: IVec2,
    ) -> RenderbufferHandle {
        let (width, height) = Self::resolve_size(desc, viewport);
        let flags = desc.flags | TextureFlags::RENDER_TARGET | TextureFlags::NO_MIPS;
        let key = PoolKey {
            width,
            height,
            format: desc.format,
            flags,
        };

        for (i, entry) in self.entries.iter_mut().enumerate() {
            if matches!(entry.state, EntryState::Free { .. }) && entry.key == key {
                entry.state = EntryState::Active;
                return RenderbufferHandle(i as u32);
            }
        }

        let handle = gpu.alloc_texture_handle();
        stream.create_texture(handle, width, height, 1, desc.format, flags, desc.debug_name);
        self.entries.push(Entry {
            key,
            handle,
            state: EntryState::Active,
        });
        RenderbufferHandle(self.entries.len() as u32 - 1)
    }

    /// GAL texture behind a renderbuffer.
    #[must_use]
    pub fn texture(&self, handle: RenderbufferHandle) -> TextureHandle {
        self.entries
            .get(handle.0 as usize)
            .map_or(TextureHandle::INVALID, |e| e.handle)
    }

    /// Pixel size of a renderbuffer.
    #[must_use]
    pub fn size(&self, handle: RenderbufferHandle) -> IVec2 {
        self.entries.get(handle.0 as usize).map_or(IVec2::ZERO, |e| {
            IVec2::new(e.key.width as i32, e.key.height as i32)
        })
    }

    /// Extends a renderbuffer past the frame boundary. It stays valid (and
    /// keeps its contents) into the next frame.
    pub fn keep_alive(&mut self, handle: RenderbufferHandle) {
        if let Some(entry) = self.entries.get_mut(handle.0 as usize) {
            if entry.state == EntryState::Active {
                entry.state = EntryState::Kept;
            }
        }
    }

    /// Frame boundary: unkept active buffers return to the free pool, kept
    /// buffers re-arm for the next frame, free buffers age.
    pub fn end_frame(&mut self) {
        for entry in &mut self.entries {
            entry.state = match entry.state {
                EntryState::Active => EntryState::Free { idle_frames: 0 },
                EntryState::Kept => EntryState::Active,
                EntryState::Free { idle_frames } => EntryState::Free {
                    idle_frames: idle_frames + 1,
                },
            };
        }
    }

    /// Destroys pooled textures idle for more than `max_idle_frames`.
    pub fn trim(&mut self, stream: &mut DrawStream, max_idle_frames: u32) {
        for entry in &mut self.entries {
            if let EntryState::Free { idle_frames } = entry.state {
                if idle_frames > max_idle_frames && entry.handle.is_valid() {
                    stream.destroy_texture(entry.handle);
                    entry.handle = TextureHandle::INVALID;
                }
            }
        }
        self.entries.retain(|e| e.handle.is_valid());
    }

    /// Number of live pooled textures (active + kept + free).
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of buffers currently active or kept.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| !matches!(e.state, EntryState::Free { .. }))
            .count()
    }
}
