//! Light Components

use glam::{DVec3, Vec3};

/// Omnidirectional light with a finite range.
#[derive(Clone, Debug)]
pub struct PointLight {
    pub position: DVec3,
    pub color: Vec3,
    pub intensity: f32,
    pub range: f32,
    /// Spot cone angle in radians; ≥ π means omnidirectional.
    pub fov: f32,
    pub direction: Vec3,
    pub casts_shadows: bool,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            position: DVec3::ZERO,
            color: Vec3::ONE,
            intensity: 10.0,
            range: 10.0,
            fov: std::f32::consts::PI,
            direction: Vec3::NEG_Y,
            casts_shadows: false,
        }
    }
}
