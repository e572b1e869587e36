//! Post-process Plugins
//!
//! The built-in plugin set composed by the pipeline's hook chain:
//!
//! | Plugin | Hook | Effect |
//! |--------|------|--------|
//! | [`Ssao`] | before-light | screen-space ambient occlusion into gbuffer B |
//! | [`Tdao`] | before-light | top-down ambient occlusion from an ortho depth map |
//! | [`Sss`] | before-light | screen-space shadows with temporal reprojection |
//! | [`Atmo`] | before-transparent | precomputed atmospheric scattering + fog |
//! | [`CubemapSky`] | before-transparent | stencil-masked sky cubemap |
//! | [`Dof`] | before-tonemap | depth of field |
//! | [`Bloom`] | before-tonemap / tonemap | bloom chain + auto-exposed tonemap |
//! | [`Taa`] | AA | temporal anti-aliasing |
//! | [`Upscaler`] | AA | FSR3-class external upscaler |
//! | [`FilmGrain`] | after-tonemap | blue-noise grain |
//!
//! Plugins self-disable on missing shaders or unready resources: every
//! hook degrades to a pass-through, never an error.

mod atmo;
mod bloom;
mod dof;
mod film_grain;
mod sky;
mod sss;
mod ssao;
mod taa;
mod tdao;
mod upscaler;

pub use atmo::Atmo;
pub use bloom::{Bloom, BloomCapture};
pub use dof::Dof;
pub use film_grain::FilmGrain;
pub use sky::CubemapSky;
pub use ssao::Ssao;
pub use sss::Sss;
pub use taa::Taa;
pub use tdao::Tdao;
pub use upscaler::{UpscaleContextId, UpscaleInputs, Upscaler, UpscalerBackend};

use crate::resources::{ResourceHub, ShaderId};

/// A shader usable this frame.
pub(crate) fn shader_ready(hub: &ResourceHub, id: ShaderId) -> bool {
    hub.shaders.get(id).is_some_and(|s| s.header.is_ready())
}

/// Registers the full built-in plugin stack in its canonical order.
pub fn register_default_plugins(
    registry: &mut crate::pipeline::plugin::PluginRegistry,
    hub: &mut ResourceHub,
) {
    registry.register(Box::new(Ssao::new(hub)));
    registry.register(Box::new(Tdao::new(hub)));
    registry.register(Box::new(Sss::new(hub)));
    registry.register(Box::new(Atmo::new(hub)));
    registry.register(Box::new(CubemapSky::new(hub)));
    registry.register(Box::new(Dof::new(hub)));
    registry.register(Box::new(Bloom::new(hub)));
    registry.register(Box::new(Taa::new(hub)));
    registry.register(Box::new(FilmGrain::new(hub)));
}
