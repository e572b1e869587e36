//! Cameras, Viewports and Shifted Frusta
//!
//! Camera positions are double precision so very large worlds keep
//! sub-millimeter stability; everything GPU-facing is rebased around a
//! per-view origin. A [`ShiftedFrustum`] stores its planes relative to its
//! own origin, which is subtracted from world coordinates on upload.
//!
//! Reverse-Z throughout: depth clears to 0, comparison is `Greater`, near
//! plane maps to NDC z = 1.

use glam::{DVec3, Mat4, Quat, Vec3, Vec4, Vec4Swizzles};

use crate::utils::halton;

/// Render-facing camera parameters of one view.
#[derive(Clone, Debug)]
pub struct CameraParams {
    pub pos: DVec3,
    pub rot: Quat,
    pub view: Mat4,
    pub projection: Mat4,
    pub frustum: ShiftedFrustum,
    pub lod_multiplier: f32,
    pub is_shadow: bool,
}

impl CameraParams {
    /// View-projection with the view translated to the frustum origin.
    #[must_use]
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}

/// One view's output rectangle + camera placement.
#[derive(Clone, Debug)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub fov: f32,
    pub near: f32,
    pub is_ortho: bool,
    pub ortho_size: f32,
    pub pos: DVec3,
    pub rot: Quat,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            w: 0,
            h: 0,
            fov: 60f32.to_radians(),
            near: 0.1,
            is_ortho: false,
            ortho_size: 10.0,
            pos: DVec3::ZERO,
            rot: Quat::IDENTITY,
        }
    }
}

impl Viewport {
    /// Projection matrix, optionally jittered by a subpixel offset in
    /// pixels.
    #[must_use]
    pub fn projection_with_jitter(&self, jitter: glam::Vec2) -> Mat4 {
        let aspect = self.w.max(1) as f32 / self.h.max(1) as f32;
        let mut proj = if self.is_ortho {
            ortho_reverse_z(
                -self.ortho_size * aspect,
                self.ortho_size * aspect,
                -self.ortho_size,
                self.ortho_size,
                self.near,
                10_000.0,
            )
        } else {
            Mat4::perspective_infinite_reverse_rh(self.fov, aspect, self.near)
        };
        // Subpixel shift in NDC units.
        proj.z_axis.x += 2.0 * jitter.x / self.w.max(1) as f32;
        proj.z_axis.y += 2.0 * jitter.y / self.h.max(1) as f32;
        proj
    }

    #[must_use]
    pub fn projection(&self) -> Mat4 {
        self.projection_with_jitter(glam::Vec2::ZERO)
    }

    /// View matrix around the viewport's own origin (translation removed).
    #[must_use]
    pub fn view_rotation(&self) -> Mat4 {
        Mat4::from_quat(self.rot).inverse()
    }

    /// Camera parameters for this viewport, with an optional jitter.
    #[must_use]
    pub fn camera_params(&self, jitter: glam::Vec2, lod_multiplier: f32) -> CameraParams {
        let projection = self.projection_with_jitter(jitter);
        let view = self.view_rotation();
        let frustum = ShiftedFrustum::from_view_projection(projection * view, self.pos);
        CameraParams {
            pos: self.pos,
            rot: self.rot,
            view,
            projection,
            frustum,
            lod_multiplier,
            is_shadow: false,
        }
    }
}

/// Halton(2,3) subpixel jitter for frame `index`, centered on zero.
#[must_use]
pub fn pixel_jitter(index: u32) -> glam::Vec2 {
    const PERIOD: u32 = 8;
    let i = index % PERIOD + 1;
    glam::Vec2::new(halton(i, 2) - 0.5, halton(i, 3) - 0.5)
}

/// One frustum plane: `normal · p + d >= 0` on the inside.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    fn from_vec4(v: Vec4) -> Self {
        let normal = v.xyz();
        let len = normal.length();
        Self {
            normal: normal / len,
            d: v.w / len,
        }
    }

    #[must_use]
    pub fn distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p) + self.d
    }
}

/// A frustum carrying its own world origin, planes in origin-relative
/// single precision.
#[derive(Clone, Debug)]
pub struct ShiftedFrustum {
    pub origin: DVec3,
    /// left, right, bottom, top, near, far. Infinite-far projections leave
    /// five effective planes; the far plane is pushed out instead.
    pub planes: [Plane; 6],
}

impl ShiftedFrustum {
    /// Gribb–Hartmann plane extraction from an origin-relative
    /// view-projection matrix.
    #[must_use]
    pub fn from_view_projection(view_projection: Mat4, origin: DVec3) -> Self {
        let m = view_projection;
        let row = |i: usize| Vec4::new(m.x_axis[i], m.y_axis[i], m.z_axis[i], m.w_axis[i]);
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));
        // Reverse-Z clip: 0 <= z_clip <= w_clip. Near plane is w - z,
        // far plane is z alone (degenerate for infinite projections).
        let near = r3 - r2;
        let far = if r2.xyz().length() < 1e-6 {
            // Infinite projection: synthesize a far plane opposing the
            // near plane, pushed out.
            Vec4::new(-near.x, -near.y, -near.z, 1e9)
        } else {
            r2
        };
        Self {
            origin,
            planes: [
                Plane::from_vec4(r3 + r0),
                Plane::from_vec4(r3 - r0),
                Plane::from_vec4(r3 + r1),
                Plane::from_vec4(r3 - r1),
                Plane::from_vec4(near),
                Plane::from_vec4(far),
            ],
        }
    }

    /// Orthographic frustum from basis vectors, centered on the origin.
    #[must_use]
    pub fn compute_ortho(
        origin: DVec3,
        forward: Vec3,
        up: Vec3,
        half_width: f32,
        half_height: f32,
        near: f32,
        far: f32,
    ) -> Self {
        let right = forward.cross(up).normalize();
        let up = right.cross(forward).normalize();
        let planes = [
            Plane {
                normal: right,
                d: half_width,
            },
            Plane {
                normal: -right,
                d: half_width,
            },
            Plane {
                normal: up,
                d: half_height,
            },
            Plane {
                normal: -up,
                d: half_height,
            },
            Plane {
                normal: forward,
                d: -near,
            },
            Plane {
                normal: -forward,
                d: far,
            },
        ];
        Self { origin, planes }
    }

    /// Rebases a world position into this frustum's origin space.
    #[must_use]
    pub fn to_local(&self, p: DVec3) -> Vec3 {
        (p - self.origin).as_vec3()
    }

    /// Sphere test with a double-precision world center.
    #[must_use]
    pub fn intersects_sphere(&self, center: DVec3, radius: f32) -> bool {
        let c = self.to_local(center);
        self.planes.iter().all(|p| p.distance(c) >= -radius)
    }

    /// AABB test with origin-relative corners.
    #[must_use]
    pub fn intersects_aabb(&self, min: Vec3, max: Vec3) -> bool {
        self.planes.iter().all(|plane| {
            // Positive vertex: corner farthest along the plane normal.
            let v = Vec3::new(
                if plane.normal.x >= 0.0 { max.x } else { min.x },
                if plane.normal.y >= 0.0 { max.y } else { min.y },
                if plane.normal.z >= 0.0 { max.z } else { min.z },
            );
            plane.distance(v) >= 0.0
        })
    }
}

/// Camera component stored by the render module. Post-process knobs live
/// here so the artist tunes them per camera.
#[derive(Clone, Debug)]
pub struct Camera {
    pub fov: f32,
    pub near: f32,
    pub is_ortho: bool,
    pub ortho_size: f32,
    pub screen_width: u32,
    pub screen_height: u32,

    pub film_grain_intensity: f32,

    pub dof_enabled: bool,
    pub dof_distance: f32,
    pub dof_range: f32,
    pub dof_max_blur_size: f32,
    pub dof_sharp_range: f32,

    pub bloom_enabled: bool,
    pub bloom_tonemap_enabled: bool,
    pub bloom_accomodation_speed: f32,
    pub bloom_avg_bloom_multiplier: f32,
    pub bloom_exposure: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            fov: 60f32.to_radians(),
            near: 0.1,
            is_ortho: false,
            ortho_size: 10.0,
            screen_width: 0,
            screen_height: 0,
            film_grain_intensity: 0.0,
            dof_enabled: false,
            dof_distance: 10.0,
            dof_range: 5.0,
            dof_max_blur_size: 8.0,
            dof_sharp_range: 1.0,
            bloom_enabled: true,
            bloom_tonemap_enabled: true,
            bloom_accomodation_speed: 1.0,
            bloom_avg_bloom_multiplier: 1.0,
            bloom_exposure: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-4;

    #[test]
    fn reverse_z_near_maps_to_1() {
        let vp = Viewport {
            w: 100,
            h: 100,
            ..Default::default()
        };
        let proj = vp.projection();
        let near_point = proj * Vec4::new(0.0, 0.0, -vp.near, 1.0);
        assert!((near_point.z / near_point.w - 1.0).abs() < EPSILON);
    }

    #[test]
    fn reverse_z_far_maps_to_0() {
        let vp = Viewport {
            w: 100,
            h: 100,
            ..Default::default()
        };
        let proj = vp.projection();
        let far_point = proj * Vec4::new(0.0, 0.0, -100_000.0, 1.0);
        assert!((far_point.z / far_point.w).abs() < 0.01);
    }

    #[test]
    fn jitter_disabled_is_exactly_zero() {
        let vp = Viewport {
            w: 128,
            h: 128,
            ..Default::default()
        };
        assert_eq!(vp.projection(), vp.projection_with_jitter(glam::Vec2::ZERO));
    }

    #[test]
    fn jitter_mean_converges_to_zero() {
        let n = 64;
        let mut sum = glam::Vec2::ZERO;
        for i in 0..n {
            sum += pixel_jitter(i);
        }
        let mean = sum / n as f32;
        assert!(mean.length() < 1.0 / n as f32 + 0.05, "mean {mean}");
    }

    #[test]
    fn frustum_contains_point_in_front() {
        let vp = Viewport {
            w: 100,
            h: 100,
            ..Default::default()
        };
        let params = vp.camera_params(glam::Vec2::ZERO, 1.0);
        // Looking down -Z from the origin.
        assert!(params.frustum.intersects_sphere(DVec3::new(0.0, 0.0, -10.0), 0.1));
        assert!(!params.frustum.intersects_sphere(DVec3::new(0.0, 0.0, 10.0), 0.1));
    }

    #[test]
    fn shifted_frustum_rebases_large_world_positions() {
        let origin = DVec3::new(1e9, 0.0, 0.0);
        let vp = Viewport {
            w: 100,
            h: 100,
            pos: origin,
            ..Default::default()
        };
        let params = vp.camera_params(glam::Vec2::ZERO, 1.0);
        assert!(params
            .frustum
            .intersects_sphere(origin + DVec3::new(0.0, 0.0, -5.0), 0.1));
    }

    #[test]
    fn ortho_frustum_bounds() {
        let f = ShiftedFrustum::compute_ortho(
            DVec3::ZERO,
            Vec3::NEG_Z,
            Vec3::Y,
            10.0,
            10.0,
            -100.0,
            100.0,
        );
        assert!(f.intersects_sphere(DVec3::new(0.0, 0.0, -5.0), 1.0));
        assert!(!f.intersects_sphere(DVec3::new(50.0, 0.0, -5.0), 1.0));
    }
}

fn ortho_reverse_z(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
    // glam's RH ortho maps near→0, far→1; swap the depth range.
    Mat4::orthographic_rh(left, right, bottom, top, far, near)
}
