//! Frustum Culling
//!
//! Two-phase visibility: a cheap sphere rejection against the shifted
//! frustum, then an AABB confirmation in origin-relative space. Produces
//! visible instances with their squared view distance for LOD selection
//! and transparent back-to-front ordering.

use crate::resources::ResourceHub;
use crate::scene::camera::CameraParams;
use crate::scene::{InstanceId, RenderModule};

/// One visible model instance.
#[derive(Clone, Copy, Debug)]
pub struct VisibleInstance {
    pub instance: InstanceId,
    /// Squared distance from the view origin, LOD-multiplier applied.
    pub squared_distance: f32,
    pub lod: u32,
}

/// Culls the module's model instances against `params`.
#[must_use]
pub fn cull(
    module: &RenderModule,
    hub: &ResourceHub,
    params: &CameraParams,
) -> Vec<VisibleInstance> {
    let mut visible = Vec::new();
    for (id, instance) in module.model_instances() {
        let Some(model) = hub.models.get(instance.model) else {
            continue;
        };
        if !model.header.is_ready() {
            continue;
        }

        let radius = model.bounding_radius * instance.scale;
        if !params.frustum.intersects_sphere(instance.position, radius) {
            continue;
        }

        // AABB confirmation in frustum-local space, conservatively
        // world-aligned (rotation folded into the bounding extent).
        let center = params.frustum.to_local(instance.position);
        let extent = (model.aabb.max - model.aabb.min) * 0.5 * instance.scale;
        let extent = glam::Vec3::splat(extent.length().max(radius * 0.5));
        if !params
            .frustum
            .intersects_aabb(center - extent, center + extent)
        {
            continue;
        }

        let squared_distance = ((instance.position - params.pos).length_squared() as f32)
            * params.lod_multiplier
            * params.lod_multiplier;
        let lod = model.lod_for_distance(squared_distance) as u32;
        visible.push(VisibleInstance {
            instance: id,
            squared_distance,
            lod,
        });
    }
    visible
}
