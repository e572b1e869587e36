//! GAL Programs and the Render State Word
//!
//! A [`Program`] bundles compiled shader stages, an input-attribute layout,
//! a 64-bit render-state word, a topology, and a stable hash that doubles as
//! the PSO cache key. The state word is baked into the hash, so identical
//! source with different state yields distinct pipelines.
//!
//! # State word layout (backend detail; the flag *semantics* are the contract)
//!
//! ```text
//! bits  0..2   cull mode           (0 none, 1 back, 2 front)
//! bit   2      depth test enable
//! bit   3      depth fn greater
//! bit   4      depth fn equal      (neither set + test on = always)
//! bit   5      depth write
//! bit   6      wireframe
//! bits  8..24  blend factors       (src rgb, dst rgb, src a, dst a; 4 bits each)
//! bits 24..26  stencil function    (0 disabled, 1 always, 2 equal, 3 not equal)
//! bits 26..35  stencil ops         (sfail, zfail, zpass; 3 bits each)
//! bits 40..48  stencil ref
//! bits 48..56  stencil read mask
//! bits 56..64  stencil write mask
//! ```

use smallvec::SmallVec;

use crate::utils::hash::{StableHash, StableHasher};

bitflags::bitflags! {
    /// 64-bit render state word.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub struct StateFlags: u64 {
        const CULL_BACK       = 1 << 0;
        const CULL_FRONT      = 1 << 1;
        const DEPTH_FUNCTION  = 1 << 2;
        const DEPTH_FN_GREATER = 1 << 3;
        const DEPTH_FN_EQUAL  = 1 << 4;
        const DEPTH_WRITE     = 1 << 5;
        const WIREFRAME       = 1 << 6;

        // Multi-bit fields below are accessed through the pack/unpack
        // helpers, never through named flags.
        const _BLEND_MASK     = 0xffff << Self::BLEND_SHIFT;
        const _STENCIL_MASK   = 0x7ff << Self::STENCIL_SHIFT | 0xffff_ff << 40;
    }
}

/// Blend factors encodable in the state word.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum BlendFactor {
    Zero = 0,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstColor,
    OneMinusDstColor,
    DstAlpha,
    OneMinusDstAlpha,
    Src1Color,
    OneMinusSrc1Color,
    Src1Alpha,
    OneMinusSrc1Alpha,
}

impl BlendFactor {
    fn from_bits(bits: u64) -> Self {
        match bits & 0xf {
            0 => Self::Zero,
            1 => Self::One,
            2 => Self::SrcColor,
            3 => Self::OneMinusSrcColor,
            4 => Self::SrcAlpha,
            5 => Self::OneMinusSrcAlpha,
            6 => Self::DstColor,
            7 => Self::OneMinusDstColor,
            8 => Self::DstAlpha,
            9 => Self::OneMinusDstAlpha,
            10 => Self::Src1Color,
            11 => Self::OneMinusSrc1Color,
            12 => Self::Src1Alpha,
            _ => Self::OneMinusSrc1Alpha,
        }
    }

    #[must_use]
    pub fn native(self) -> wgpu::BlendFactor {
        use wgpu::BlendFactor as N;
        match self {
            Self::Zero => N::Zero,
            Self::One => N::One,
            Self::SrcColor => N::Src,
            Self::OneMinusSrcColor => N::OneMinusSrc,
            Self::SrcAlpha => N::SrcAlpha,
            Self::OneMinusSrcAlpha => N::OneMinusSrcAlpha,
            Self::DstColor => N::Dst,
            Self::OneMinusDstColor => N::OneMinusDst,
            Self::DstAlpha => N::DstAlpha,
            Self::OneMinusDstAlpha => N::OneMinusDstAlpha,
            Self::Src1Color => N::Src1,
            Self::OneMinusSrc1Color => N::OneMinusSrc1,
            Self::Src1Alpha => N::Src1Alpha,
            Self::OneMinusSrc1Alpha => N::OneMinusSrc1Alpha,
        }
    }
}

/// Stencil comparison encodable in the state word.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum StencilFunc {
    Disabled = 0,
    Always,
    Equal,
    NotEqual,
}

/// Stencil ops encodable in the state word.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum StencilOp {
    Keep = 0,
    Zero,
    Replace,
    IncrClamp,
    DecrClamp,
    Invert,
    IncrWrap,
    DecrWrap,
}

impl StencilOp {
    fn from_bits(bits: u64) -> Self {
        match bits & 0x7 {
            0 => Self::Keep,
            1 => Self::Zero,
            2 => Self::Replace,
            3 => Self::IncrClamp,
            4 => Self::DecrClamp,
            5 => Self::Invert,
            6 => Self::IncrWrap,
            _ => Self::DecrWrap,
        }
    }

    #[must_use]
    pub fn native(self) -> wgpu::StencilOperation {
        use wgpu::StencilOperation as N;
        match self {
            Self::Keep => N::Keep,
            Self::Zero => N::Zero,
            Self::Replace => N::Replace,
            Self::IncrClamp => N::IncrementClamp,
            Self::DecrClamp => N::DecrementClamp,
            Self::Invert => N::Invert,
            Self::IncrWrap => N::IncrementWrap,
            Self::DecrWrap => N::DecrementWrap,
        }
    }
}

impl StateFlags {
    const BLEND_SHIFT: u64 = 8;
    const STENCIL_SHIFT: u64 = 24;

    /// Packs blend factors into a state word.
    #[must_use]
    pub fn blend(
        src_rgb: BlendFactor,
        dst_rgb: BlendFactor,
        src_a: BlendFactor,
        dst_a: BlendFactor,
    ) -> Self {
        let bits = (src_rgb as u64)
            | (dst_rgb as u64) << 4
            | (src_a as u64) << 8
            | (dst_a as u64) << 12;
        Self::from_bits_retain(bits << Self::BLEND_SHIFT)
    }

    /// Packs a stencil configuration into a state word.
    #[must_use]
    pub fn stencil(
        func: StencilFunc,
        reference: u8,
        read_mask: u8,
        write_mask: u8,
        sfail: StencilOp,
        zfail: StencilOp,
        zpass: StencilOp,
    ) -> Self {
        let bits = ((func as u64)
            | (sfail as u64) << 2
            | (zfail as u64) << 5
            | (zpass as u64) << 8)
            << Self::STENCIL_SHIFT
            | u64::from(reference) << 40
            | u64::from(read_mask) << 48
            | u64::from(write_mask) << 56;
        Self::from_bits_retain(bits)
    }

    /// Additive blending (ONE, ONE).
    #[must_use]
    pub fn blend_add() -> Self {
        Self::blend(
            BlendFactor::One,
            BlendFactor::One,
            BlendFactor::One,
            BlendFactor::One,
        )
    }

    /// True when any blend factor field is set (non-opaque).
    #[must_use]
    pub fn has_blend(self) -> bool {
        self.bits() & (0xffff << Self::BLEND_SHIFT) != 0
    }

    /// Unpacks `(src_rgb, dst_rgb, src_a, dst_a)`.
    #[must_use]
    pub fn blend_factors(self) -> (BlendFactor, BlendFactor, BlendFactor, BlendFactor) {
        let bits = self.bits() >> Self::BLEND_SHIFT;
        (
            BlendFactor::from_bits(bits),
            BlendFactor::from_bits(bits >> 4),
            BlendFactor::from_bits(bits >> 8),
            BlendFactor::from_bits(bits >> 12),
        )
    }

    #[must_use]
    pub fn stencil_func(self) -> StencilFunc {
        match (self.bits() >> Self::STENCIL_SHIFT) & 0x3 {
            0 => StencilFunc::Disabled,
            1 => StencilFunc::Always,
            2 => StencilFunc::Equal,
            _ => StencilFunc::NotEqual,
        }
    }

    /// Unpacks `(sfail, zfail, zpass)`.
    #[must_use]
    pub fn stencil_ops(self) -> (StencilOp, StencilOp, StencilOp) {
        let bits = self.bits() >> Self::STENCIL_SHIFT;
        (
            StencilOp::from_bits(bits >> 2),
            StencilOp::from_bits(bits >> 5),
            StencilOp::from_bits(bits >> 8),
        )
    }

    /// Unpacks `(reference, read_mask, write_mask)`.
    #[must_use]
    pub fn stencil_masks(self) -> (u8, u8, u8) {
        let bits = self.bits();
        ((bits >> 40) as u8, (bits >> 48) as u8, (bits >> 56) as u8)
    }

    #[must_use]
    pub fn cull_mode(self) -> Option<wgpu::Face> {
        if self.contains(Self::CULL_BACK) {
            Some(wgpu::Face::Back)
        } else if self.contains(Self::CULL_FRONT) {
            Some(wgpu::Face::Front)
        } else {
            None
        }
    }

    #[must_use]
    pub fn depth_compare(self) -> wgpu::CompareFunction {
        if !self.contains(Self::DEPTH_FUNCTION) {
            return wgpu::CompareFunction::Always;
        }
        if self.contains(Self::DEPTH_FN_GREATER) {
            wgpu::CompareFunction::Greater
        } else if self.contains(Self::DEPTH_FN_EQUAL) {
            wgpu::CompareFunction::Equal
        } else {
            wgpu::CompareFunction::Always
        }
    }
}

/// Vertex attribute semantics understood by the input layout.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum AttributeSemantic {
    Position = 0,
    Normal,
    Tangent,
    Bitangent,
    Color0,
    Color1,
    Joints,
    Weights,
    Texcoord0,
    Texcoord1,
    AmbientOcclusion,
}

/// Attribute component types in the vertex stream.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum AttributeType {
    F32 = 0,
    I16,
    U8,
    U8Norm,
    I16Norm,
}

impl AttributeType {
    #[must_use]
    pub const fn byte_size(self) -> u32 {
        match self {
            Self::F32 => 4,
            Self::I16 | Self::I16Norm => 2,
            Self::U8 | Self::U8Norm => 1,
        }
    }
}

/// One attribute of a vertex declaration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attribute {
    pub semantic: AttributeSemantic,
    pub ty: AttributeType,
    pub components: u8,
    pub byte_offset: u32,
}

impl Attribute {
    #[must_use]
    pub fn native_format(&self) -> wgpu::VertexFormat {
        use wgpu::VertexFormat as V;
        match (self.ty, self.components) {
            (AttributeType::F32, 1) => V::Float32,
            (AttributeType::F32, 2) => V::Float32x2,
            (AttributeType::F32, 3) => V::Float32x3,
            (AttributeType::F32, 4) => V::Float32x4,
            (AttributeType::I16, 2) => V::Sint16x2,
            (AttributeType::I16, 4) => V::Sint16x4,
            (AttributeType::I16Norm, 2) => V::Snorm16x2,
            (AttributeType::I16Norm, 4) => V::Snorm16x4,
            (AttributeType::U8, 4) => V::Uint8x4,
            (AttributeType::U8Norm, 4) => V::Unorm8x4,
            _ => V::Float32x4,
        }
    }
}

/// Vertex input layout: up to 16 attributes in one interleaved stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VertexDecl {
    pub attributes: SmallVec<[Attribute; 16]>,
    pub stride: u32,
}

impl VertexDecl {
    pub fn push(&mut self, semantic: AttributeSemantic, ty: AttributeType, components: u8) {
        self.attributes.push(Attribute {
            semantic,
            ty,
            components,
            byte_offset: self.stride,
        });
        self.stride += ty.byte_size() * u32::from(components);
    }

    fn hash_into(&self, hasher: &mut StableHasher) {
        hasher.write_u32(self.stride);
        for a in &self.attributes {
            hasher.write(&[a.semantic as u8, a.ty as u8, a.components]);
            hasher.write_u32(a.byte_offset);
        }
    }
}

/// Primitive topologies supported by the draw path.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[repr(u8)]
pub enum PrimitiveTopology {
    #[default]
    Triangles = 0,
    TriangleStrip,
    Lines,
    Points,
}

impl PrimitiveTopology {
    #[must_use]
    pub fn native(self) -> wgpu::PrimitiveTopology {
        match self {
            Self::Triangles => wgpu::PrimitiveTopology::TriangleList,
            Self::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
            Self::Lines => wgpu::PrimitiveTopology::LineList,
            Self::Points => wgpu::PrimitiveTopology::PointList,
        }
    }
}

/// Shader stages of a program. Either graphics (vertex + fragment) or
/// compute; never both.
pub enum ProgramStages {
    Graphics {
        vertex: wgpu::ShaderModule,
        fragment: wgpu::ShaderModule,
    },
    Compute(wgpu::ShaderModule),
}

/// Creation descriptor for [`Program`]. Sources are WGSL text; the stable
/// hash is computed over sources, layout, state word and topology.
pub struct ProgramDesc<'a> {
    pub vertex_src: Option<&'a str>,
    pub fragment_src: Option<&'a str>,
    pub compute_src: Option<&'a str>,
    pub decl: VertexDecl,
    pub state: StateFlags,
    pub topology: PrimitiveTopology,
    pub debug_name: &'a str,
}

impl ProgramDesc<'_> {
    /// Stable PSO-key hash of this program.
    #[must_use]
    pub fn stable_hash(&self) -> StableHash {
        let mut h = StableHasher::new();
        h.write(self.vertex_src.unwrap_or("").as_bytes());
        h.write(self.fragment_src.unwrap_or("").as_bytes());
        h.write(self.compute_src.unwrap_or("").as_bytes());
        self.decl.hash_into(&mut h);
        h.write_u64(self.state.bits());
        h.write(&[self.topology as u8]);
        h.finish()
    }
}

/// A compiled GAL program.
pub struct Program {
    pub stages: ProgramStages,
    pub decl: VertexDecl,
    pub state: StateFlags,
    pub topology: PrimitiveTopology,
    pub hash: StableHash,
    pub debug_name: String,
}

impl Program {
    #[must_use]
    pub fn is_compute(&self) -> bool {
        matches!(self.stages, ProgramStages::Compute(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_factors_round_trip() {
        let state = StateFlags::blend(
            BlendFactor::One,
            BlendFactor::Src1Color,
            BlendFactor::One,
            BlendFactor::One,
        );
        let (sr, dr, sa, da) = state.blend_factors();
        assert_eq!(sr, BlendFactor::One);
        assert_eq!(dr, BlendFactor::Src1Color);
        assert_eq!(sa, BlendFactor::One);
        assert_eq!(da, BlendFactor::One);
        assert!(state.has_blend());
        assert!(!StateFlags::DEPTH_WRITE.has_blend());
    }

    #[test]
    fn stencil_round_trip() {
        let state = StateFlags::stencil(
            StencilFunc::Equal,
            0,
            0xff,
            0,
            StencilOp::Keep,
            StencilOp::Keep,
            StencilOp::Replace,
        );
        assert_eq!(state.stencil_func(), StencilFunc::Equal);
        let (sfail, zfail, zpass) = state.stencil_ops();
        assert_eq!(sfail, StencilOp::Keep);
        assert_eq!(zfail, StencilOp::Keep);
        assert_eq!(zpass, StencilOp::Replace);
        assert_eq!(state.stencil_masks(), (0, 0xff, 0));
    }

    #[test]
    fn state_word_fields_do_not_collide() {
        let state = StateFlags::CULL_BACK
            | StateFlags::DEPTH_FUNCTION
            | StateFlags::DEPTH_FN_GREATER
            | StateFlags::DEPTH_WRITE
            | StateFlags::blend(
                BlendFactor::SrcAlpha,
                BlendFactor::OneMinusSrcAlpha,
                BlendFactor::One,
                BlendFactor::One,
            )
            | StateFlags::stencil(
                StencilFunc::Always,
                1,
                0xff,
                0xff,
                StencilOp::Keep,
                StencilOp::Keep,
                StencilOp::Replace,
            );
        assert_eq!(state.cull_mode(), Some(wgpu::Face::Back));
        assert_eq!(state.depth_compare(), wgpu::CompareFunction::Greater);
        let (sr, dr, ..) = state.blend_factors();
        assert_eq!(sr, BlendFactor::SrcAlpha);
        assert_eq!(dr, BlendFactor::OneMinusSrcAlpha);
        assert_eq!(state.stencil_func(), StencilFunc::Always);
        assert_eq!(state.stencil_masks(), (1, 0xff, 0xff));
    }

    #[test]
    fn program_hash_depends_on_state_word() {
        let base = ProgramDesc {
            vertex_src: Some("@vertex fn vs_main() {}"),
            fragment_src: Some("@fragment fn fs_main() {}"),
            compute_src: None,
            decl: VertexDecl::default(),
            state: StateFlags::empty(),
            topology: PrimitiveTopology::Triangles,
            debug_name: "t",
        };
        let with_state = ProgramDesc {
            state: StateFlags::DEPTH_WRITE,
            decl: VertexDecl::default(),
            ..base
        };
        assert_ne!(base.stable_hash(), with_state.stable_hash());
    }

    #[test]
    fn vertex_decl_accumulates_offsets() {
        let mut decl = VertexDecl::default();
        decl.push(AttributeSemantic::Position, AttributeType::F32, 3);
        decl.push(AttributeSemantic::Normal, AttributeType::F32, 3);
        decl.push(AttributeSemantic::Texcoord0, AttributeType::F32, 2);
        assert_eq!(decl.stride, 32);
        assert_eq!(decl.attributes[1].byte_offset, 12);
        assert_eq!(decl.attributes[2].byte_offset, 24);
    }
}
