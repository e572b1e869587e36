//! Render Module
//!
//! Per-world store of render-facing components: cameras, environments,
//! point lights, and model instances. The pipeline consumes it through a
//! narrow interface: active camera/environment lookup, light enumeration,
//! and culling.
//!
//! Entities are slotmap keys; components hold no back-pointers, so
//! deleting an entity is a plain removal.

pub mod camera;
pub mod culling;
pub mod environment;
pub mod light;

use glam::{DVec3, Quat};
use slotmap::SlotMap;

use crate::resources::ModelId;

pub use camera::{Camera, CameraParams, pixel_jitter, Plane, ShiftedFrustum, Viewport};
pub use culling::{cull, VisibleInstance};
pub use environment::Environment;
pub use light::PointLight;

slotmap::new_key_type! {
    pub struct CameraId;
    pub struct EnvironmentId;
    pub struct LightId;
    pub struct InstanceId;
}

/// One placed model.
#[derive(Clone, Debug)]
pub struct ModelInstance {
    pub model: ModelId,
    pub position: DVec3,
    pub rotation: Quat,
    pub scale: f32,
    /// Forced LOD level; `None` selects by distance.
    pub lod_override: Option<u32>,
}

/// A camera entity: component + placement.
#[derive(Clone, Debug)]
pub struct CameraEntity {
    pub camera: Camera,
    pub position: DVec3,
    pub rotation: Quat,
}

/// Per-world component store.
#[derive(Default)]
pub struct RenderModule {
    cameras: SlotMap<CameraId, CameraEntity>,
    environments: SlotMap<EnvironmentId, Environment>,
    lights: SlotMap<LightId, PointLight>,
    instances: SlotMap<InstanceId, ModelInstance>,
    active_camera: Option<CameraId>,
    active_environment: Option<EnvironmentId>,
}

impl RenderModule {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ── Cameras ────────────────────────────────────────────────────────────

    pub fn create_camera(&mut self, entity: CameraEntity) -> CameraId {
        let id = self.cameras.insert(entity);
        if self.active_camera.is_none() {
            self.active_camera = Some(id);
        }
        id
    }

    pub fn destroy_camera(&mut self, id: CameraId) {
        self.cameras.remove(id);
        if self.active_camera == Some(id) {
            self.active_camera = self.cameras.keys().next();
        }
    }

    pub fn set_active_camera(&mut self, id: CameraId) {
        if self.cameras.contains_key(id) {
            self.active_camera = Some(id);
        }
    }

    #[must_use]
    pub fn active_camera(&self) -> Option<CameraId> {
        self.active_camera
    }

    #[must_use]
    pub fn camera(&self, id: CameraId) -> Option<&CameraEntity> {
        self.cameras.get(id)
    }

    #[must_use]
    pub fn camera_mut(&mut self, id: CameraId) -> Option<&mut CameraEntity> {
        self.cameras.get_mut(id)
    }

    /// Viewport of the active camera for the given output size.
    #[must_use]
    pub fn active_viewport(&self, width: u32, height: u32) -> Option<Viewport> {
        let id = self.active_camera?;
        let entity = self.cameras.get(id)?;
        Some(Viewport {
            x: 0,
            y: 0,
            w: width as i32,
            h: height as i32,
            fov: entity.camera.fov,
            near: entity.camera.near,
            is_ortho: entity.camera.is_ortho,
            ortho_size: entity.camera.ortho_size,
            pos: entity.position,
            rot: entity.rotation,
        })
    }

    // ── Environments ───────────────────────────────────────────────────────

    pub fn create_environment(&mut self, env: Environment) -> EnvironmentId {
        let id = self.environments.insert(env);
        if self.active_environment.is_none() {
            self.active_environment = Some(id);
        }
        id
    }

    pub fn destroy_environment(&mut self, id: EnvironmentId) {
        self.environments.remove(id);
        if self.active_environment == Some(id) {
            self.active_environment = self.environments.keys().next();
        }
    }

    #[must_use]
    pub fn active_environment(&self) -> Option<EnvironmentId> {
        self.active_environment
    }

    #[must_use]
    pub fn environment(&self, id: EnvironmentId) -> Option<&Environment> {
        self.environments.get(id)
    }

    #[must_use]
    pub fn environment_mut(&mut self, id: EnvironmentId) -> Option<&mut Environment> {
        self.environments.get_mut(id)
    }

    // ── Lights ─────────────────────────────────────────────────────────────

    pub fn create_light(&mut self, light: PointLight) -> LightId {
        self.lights.insert(light)
    }

    pub fn destroy_light(&mut self, id: LightId) {
        self.lights.remove(id);
    }

    pub fn lights(&self) -> impl Iterator<Item = (LightId, &PointLight)> {
        self.lights.iter()
    }

    #[must_use]
    pub fn light_mut(&mut self, id: LightId) -> Option<&mut PointLight> {
        self.lights.get_mut(id)
    }

    // ── Model instances ────────────────────────────────────────────────────

    pub fn create_model_instance(&mut self, instance: ModelInstance) -> InstanceId {
        self.instances.insert(instance)
    }

    pub fn destroy_model_instance(&mut self, id: InstanceId) {
        self.instances.remove(id);
    }

    #[must_use]
    pub fn model_instance(&self, id: InstanceId) -> Option<&ModelInstance> {
        self.instances.get(id)
    }

    #[must_use]
    pub fn model_instance_mut(&mut self, id: InstanceId) -> Option<&mut ModelInstance> {
        self.instances.get_mut(id)
    }

    pub fn model_instances(&self) -> impl Iterator<Item = (InstanceId, &ModelInstance)> {
        self.instances.iter()
    }

    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_camera_becomes_active() {
        let mut module = RenderModule::new();
        assert!(module.active_camera().is_none());
        let a = module.create_camera(CameraEntity {
            camera: Camera::default(),
            position: DVec3::ZERO,
            rotation: Quat::IDENTITY,
        });
        let _b = module.create_camera(CameraEntity {
            camera: Camera::default(),
            position: DVec3::ZERO,
            rotation: Quat::IDENTITY,
        });
        assert_eq!(module.active_camera(), Some(a));
        module.destroy_camera(a);
        assert!(module.active_camera().is_some());
    }
}
