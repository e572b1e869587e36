//! Environment Component
//!
//! Atmosphere, sky, sunlight and fog parameters of a world. One
//! environment is active per world; plugins read it every frame and
//! no-op when their feature flag is off.

use glam::Vec3;

use crate::resources::TextureResId;

#[derive(Clone, Debug)]
pub struct Environment {
    // Atmosphere (radii in kilometers, scattering in 1/m).
    pub atmo_enabled: bool,
    pub ground_r: f32,
    pub atmo_r: f32,
    pub height_distribution_rayleigh: f32,
    pub height_distribution_mie: f32,
    pub scatter_rayleigh: Vec3,
    pub scatter_mie: Vec3,
    pub absorb_mie: Vec3,

    // Sunlight.
    pub sunlight_color: Vec3,
    pub sunlight_strength: f32,
    pub sun_direction: Vec3,

    // Fog.
    pub fog_enabled: bool,
    pub fog_scattering: Vec3,
    pub fog_top: f32,
    pub godrays_enabled: bool,

    // Cubemap sky.
    pub cubemap_sky: Option<TextureResId>,
    pub sky_intensity: f32,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            atmo_enabled: false,
            ground_r: 6378.0,
            atmo_r: 6478.0,
            height_distribution_rayleigh: 8.0,
            height_distribution_mie: 1.2,
            scatter_rayleigh: Vec3::new(5.802, 13.558, 33.1),
            scatter_mie: Vec3::splat(3.996),
            absorb_mie: Vec3::splat(4.4),
            sunlight_color: Vec3::ONE,
            sunlight_strength: 10.0,
            sun_direction: Vec3::new(0.0, -1.0, 0.0),
            fog_enabled: false,
            fog_scattering: Vec3::splat(0.02),
            fog_top: 100.0,
            godrays_enabled: false,
            cubemap_sky: None,
            sky_intensity: 1.0,
        }
    }
}
