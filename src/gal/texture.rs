//! GAL Textures
//!
//! A [`GpuTexture`] owns a native image, a resource-state tag, and a stable
//! bindless slot. Texture *views* share the native image, own their own
//! slot, and never release the image.
//!
//! # Lazy state tracking
//!
//! The `state` tag reflects the last transition recorded into the draw
//! stream, not the GPU's true state. Every read/write in the pipeline goes
//! through [`GpuTexture::set_state`], which records a transition only when
//! the tag actually changes. The transition counter exists so an API-level
//! trace of a frame can be checked against the tags.

use bitflags::bitflags;

use crate::gal::heaps::BindlessSlot;

bitflags! {
    /// Creation flags for GAL textures.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct TextureFlags: u32 {
        const SRGB          = 1 << 0;
        const NO_MIPS       = 1 << 1;
        const IS_3D         = 1 << 2;
        const IS_CUBE       = 1 << 3;
        const RENDER_TARGET = 1 << 4;
        const COMPUTE_WRITE = 1 << 5;
        const READBACK      = 1 << 6;
    }
}

/// Backend-agnostic texture formats used throughout the renderer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TextureFormat {
    R8,
    RG8,
    RGBA8,
    R16F,
    RG16F,
    RGBA16F,
    R32F,
    RG32F,
    RGBA32F,
    R11G11B10F,
    D32,
    D24S8,
    BC1,
    BC3,
    BC5,
}

/// Per-format properties: native mapping, texel/block sizes.
#[derive(Clone, Copy)]
pub struct FormatDesc {
    pub compressed: bool,
    pub block_bytes: u32,
    pub native: wgpu::TextureFormat,
    pub srgb_variant: Option<wgpu::TextureFormat>,
}

impl FormatDesc {
    /// Lookup table entry for a format.
    #[must_use]
    pub const fn of(format: TextureFormat) -> FormatDesc {
        use wgpu::TextureFormat as N;
        const fn d(
            compressed: bool,
            block_bytes: u32,
            native: N,
            srgb_variant: Option<N>,
        ) -> FormatDesc {
            FormatDesc {
                compressed,
                block_bytes,
                native,
                srgb_variant,
            }
        }
        match format {
            TextureFormat::R8 => d(false, 1, N::R8Unorm, None),
            TextureFormat::RG8 => d(false, 2, N::Rg8Unorm, None),
            TextureFormat::RGBA8 => d(false, 4, N::Rgba8Unorm, Some(N::Rgba8UnormSrgb)),
            TextureFormat::R16F => d(false, 2, N::R16Float, None),
            TextureFormat::RG16F => d(false, 4, N::Rg16Float, None),
            TextureFormat::RGBA16F => d(false, 8, N::Rgba16Float, None),
            TextureFormat::R32F => d(false, 4, N::R32Float, None),
            TextureFormat::RG32F => d(false, 8, N::Rg32Float, None),
            TextureFormat::RGBA32F => d(false, 16, N::Rgba32Float, None),
            TextureFormat::R11G11B10F => d(false, 4, N::Rg11b10Ufloat, None),
            TextureFormat::D32 => d(false, 4, N::Depth32Float, None),
            TextureFormat::D24S8 => d(false, 4, N::Depth24PlusStencil8, None),
            TextureFormat::BC1 => d(true, 8, N::Bc1RgbaUnorm, Some(N::Bc1RgbaUnormSrgb)),
            TextureFormat::BC3 => d(true, 16, N::Bc3RgbaUnorm, Some(N::Bc3RgbaUnormSrgb)),
            TextureFormat::BC5 => d(true, 16, N::Bc5RgUnorm, None),
        }
    }

    /// Bytes per row of `w` texels, without alignment padding.
    #[must_use]
    pub const fn row_bytes(&self, w: u32) -> u32 {
        if self.compressed {
            w.div_ceil(4) * self.block_bytes
        } else {
            w * self.block_bytes
        }
    }

    /// Number of rows in the copy layout of an image `h` texels tall.
    #[must_use]
    pub const fn row_count(&self, h: u32) -> u32 {
        if self.compressed { h.div_ceil(4) } else { h }
    }

    /// Total unpadded byte size of one `w`×`h` layer.
    #[must_use]
    pub const fn layer_bytes(&self, w: u32, h: u32) -> u32 {
        self.row_bytes(w) * self.row_count(h)
    }

    #[must_use]
    pub const fn has_depth(&self) -> bool {
        matches!(
            self.native,
            wgpu::TextureFormat::Depth32Float | wgpu::TextureFormat::Depth24PlusStencil8
        )
    }
}

impl TextureFormat {
    /// Resolves the native format, honoring the SRGB creation flag.
    #[must_use]
    pub fn native(self, flags: TextureFlags) -> wgpu::TextureFormat {
        let desc = FormatDesc::of(self);
        if flags.contains(TextureFlags::SRGB) {
            desc.srgb_variant.unwrap_or(desc.native)
        } else {
            desc.native
        }
    }
}

/// Resource states mirrored from the draw stream's transition commands.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ResourceState {
    /// State right after creation, before the first recorded transition.
    Undefined,
    GenericRead,
    RenderTarget,
    DepthWrite,
    DepthRead,
    UnorderedAccess,
    CopySrc,
    CopyDst,
    IndirectArgument,
    Present,
}

/// Lazy state tag shared by textures and buffers.
///
/// Transitions are counted so frame traces can verify state coherence.
#[derive(Debug)]
pub struct StateTag {
    state: ResourceState,
    transitions: u64,
}

impl StateTag {
    #[must_use]
    pub fn new(initial: ResourceState) -> Self {
        Self {
            state: initial,
            transitions: 0,
        }
    }

    /// Records a transition to `new_state` and returns the previous state.
    /// No-op (and not counted) when the tag already matches.
    pub fn set(&mut self, new_state: ResourceState) -> ResourceState {
        let old = self.state;
        if old != new_state {
            self.state = new_state;
            self.transitions += 1;
        }
        old
    }

    #[must_use]
    pub fn current(&self) -> ResourceState {
        self.state
    }

    /// Number of *effective* transitions recorded so far.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transitions
    }
}

/// Immutable creation descriptor of a texture.
#[derive(Clone, Debug)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    /// Depth for 3D textures, array layer count otherwise (6 for cubes).
    pub depth: u32,
    pub mip_count: u32,
    pub format: TextureFormat,
    pub flags: TextureFlags,
}

impl TextureDesc {
    /// Mip count implied by the dimensions and the `NO_MIPS` flag.
    #[must_use]
    pub fn implied_mips(width: u32, height: u32, flags: TextureFlags) -> u32 {
        if flags.contains(TextureFlags::NO_MIPS) {
            1
        } else {
            32 - width.max(height).max(1).leading_zeros()
        }
    }
}

/// A GAL texture: native image + state tag + bindless slot.
pub struct GpuTexture {
    pub desc: TextureDesc,
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    /// Storage-capable view, present when `COMPUTE_WRITE` was requested.
    pub rw_view: Option<wgpu::TextureView>,
    pub slot: BindlessSlot,
    pub state: StateTag,
    /// Views share the native image of another texture and must not
    /// destroy it.
    pub is_view: bool,
    pub debug_name: String,
}

impl GpuTexture {
    /// The state a texture starts in, chosen from its creation flags the
    /// same way the backend picks an initial `D3D12_RESOURCE_STATE`.
    #[must_use]
    pub fn initial_state(flags: TextureFlags, format: TextureFormat) -> ResourceState {
        if FormatDesc::of(format).has_depth() {
            ResourceState::DepthWrite
        } else if flags.contains(TextureFlags::COMPUTE_WRITE) {
            ResourceState::UnorderedAccess
        } else if flags.contains(TextureFlags::RENDER_TARGET) {
            ResourceState::RenderTarget
        } else {
            ResourceState::GenericRead
        }
    }

    /// Records a state transition, returning the previous state.
    pub fn set_state(&mut self, new_state: ResourceState) -> ResourceState {
        self.state.set(new_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_tag_skips_redundant_transitions() {
        let mut tag = StateTag::new(ResourceState::GenericRead);
        assert_eq!(tag.set(ResourceState::CopyDst), ResourceState::GenericRead);
        assert_eq!(tag.set(ResourceState::CopyDst), ResourceState::CopyDst);
        assert_eq!(tag.transition_count(), 1);
        tag.set(ResourceState::GenericRead);
        assert_eq!(tag.transition_count(), 2);
    }

    #[test]
    fn compressed_row_pitch_rounds_to_blocks() {
        let bc1 = FormatDesc::of(TextureFormat::BC1);
        assert_eq!(bc1.row_bytes(4), 8);
        assert_eq!(bc1.row_bytes(5), 16);
        assert_eq!(bc1.layer_bytes(8, 8), 32);
    }

    #[test]
    fn implied_mips_counts_full_chain() {
        assert_eq!(TextureDesc::implied_mips(256, 256, TextureFlags::empty()), 9);
        assert_eq!(TextureDesc::implied_mips(256, 64, TextureFlags::NO_MIPS), 1);
        assert_eq!(TextureDesc::implied_mips(1, 1, TextureFlags::empty()), 1);
    }

    #[test]
    fn depth_formats_start_depth_write() {
        assert_eq!(
            GpuTexture::initial_state(TextureFlags::RENDER_TARGET, TextureFormat::D32),
            ResourceState::DepthWrite
        );
        assert_eq!(
            GpuTexture::initial_state(TextureFlags::COMPUTE_WRITE, TextureFormat::RGBA8),
            ResourceState::UnorderedAccess
        );
    }
}
