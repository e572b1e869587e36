//! Culling & Bucket Tests
//!
//! Tests for:
//! - frustum culling of model instances (sphere + AABB phases)
//! - large-world stability through shifted frusta
//! - LOD selection by squared distance
//! - bucket sorting (opaque batching, transparent back-to-front)

use glam::{DVec3, Quat, Vec3};

use pyre::pipeline::bucket::{batch_runs, sort_items, BucketItem, SortOrder};
use pyre::resources::model::{Aabb, ModelResource};
use pyre::resources::resource::ResourceState;
use pyre::resources::{MemoryIo, ResourceHub};
use pyre::scene::{cull, CameraEntity, ModelInstance, RenderModule, Viewport};
use pyre::scene::camera::Camera;

/// Installs a synthetic ready model (unit sphere bounds) into the hub.
fn install_unit_model(hub: &mut ResourceHub) -> pyre::resources::ModelId {
    let mut model = ModelResource::new("unit.msh");
    model.aabb = Aabb {
        min: Vec3::splat(-0.5),
        max: Vec3::splat(0.5),
    };
    model.bounding_radius = 0.9;
    model.lods.push(pyre::resources::Lod {
        to_mesh: 0,
        squared_distance: 100.0,
    });
    model.lods.push(pyre::resources::Lod {
        to_mesh: 0,
        squared_distance: f32::MAX,
    });
    model.header.state = ResourceState::Ready;
    hub.models.insert(model)
}

fn camera_params(pos: DVec3) -> pyre::scene::CameraParams {
    let vp = Viewport {
        w: 800,
        h: 600,
        pos,
        ..Default::default()
    };
    vp.camera_params(glam::Vec2::ZERO, 1.0)
}

// ============================================================================
// Visibility
// ============================================================================

#[test]
fn instance_in_front_is_visible() {
    let mut hub = ResourceHub::new(MemoryIo::new());
    let model = install_unit_model(&mut hub);
    let mut module = RenderModule::new();
    module.create_model_instance(ModelInstance {
        model,
        position: DVec3::new(0.0, 0.0, -10.0),
        rotation: Quat::IDENTITY,
        scale: 1.0,
        lod_override: None,
    });

    let visible = cull(&module, &hub, &camera_params(DVec3::ZERO));
    assert_eq!(visible.len(), 1);
}

#[test]
fn instance_behind_camera_is_culled() {
    let mut hub = ResourceHub::new(MemoryIo::new());
    let model = install_unit_model(&mut hub);
    let mut module = RenderModule::new();
    module.create_model_instance(ModelInstance {
        model,
        position: DVec3::new(0.0, 0.0, 50.0),
        rotation: Quat::IDENTITY,
        scale: 1.0,
        lod_override: None,
    });

    let visible = cull(&module, &hub, &camera_params(DVec3::ZERO));
    assert!(visible.is_empty());
}

#[test]
fn unready_models_never_appear() {
    let mut hub = ResourceHub::new(MemoryIo::new());
    let model = {
        let mut m = ModelResource::new("loading.msh");
        m.bounding_radius = 1.0;
        hub.models.insert(m) // state stays Empty
    };
    let mut module = RenderModule::new();
    module.create_model_instance(ModelInstance {
        model,
        position: DVec3::new(0.0, 0.0, -5.0),
        rotation: Quat::IDENTITY,
        scale: 1.0,
        lod_override: None,
    });
    assert!(cull(&module, &hub, &camera_params(DVec3::ZERO)).is_empty());
}

#[test]
fn large_world_culling_stays_stable() {
    // A camera and mesh nine orders of magnitude from the origin: the
    // shifted frustum keeps the test in single-precision range.
    let origin = DVec3::new(1.0e9, -3.0e8, 2.0e9);
    let mut hub = ResourceHub::new(MemoryIo::new());
    let model = install_unit_model(&mut hub);
    let mut module = RenderModule::new();
    module.create_model_instance(ModelInstance {
        model,
        position: origin + DVec3::new(0.0, 0.0, -20.0),
        rotation: Quat::IDENTITY,
        scale: 1.0,
        lod_override: None,
    });
    module.create_model_instance(ModelInstance {
        model,
        position: origin + DVec3::new(0.0, 0.0, 20.0),
        rotation: Quat::IDENTITY,
        scale: 1.0,
        lod_override: None,
    });

    let visible = cull(&module, &hub, &camera_params(origin));
    assert_eq!(visible.len(), 1);
}

// ============================================================================
// LOD selection
// ============================================================================

#[test]
fn lod_switches_with_distance() {
    let mut hub = ResourceHub::new(MemoryIo::new());
    let model = install_unit_model(&mut hub);
    let mut module = RenderModule::new();
    let near = module.create_model_instance(ModelInstance {
        model,
        position: DVec3::new(0.0, 0.0, -5.0),
        rotation: Quat::IDENTITY,
        scale: 1.0,
        lod_override: None,
    });
    let far = module.create_model_instance(ModelInstance {
        model,
        position: DVec3::new(0.0, 0.0, -200.0),
        rotation: Quat::IDENTITY,
        scale: 1.0,
        lod_override: None,
    });

    let visible = cull(&module, &hub, &camera_params(DVec3::ZERO));
    let lod_of = |id| visible.iter().find(|v| v.instance == id).unwrap().lod;
    assert_eq!(lod_of(near), 0);
    assert_eq!(lod_of(far), 1);
}

#[test]
fn lod_multiplier_scales_selection() {
    let mut hub = ResourceHub::new(MemoryIo::new());
    let model = install_unit_model(&mut hub);
    let mut module = RenderModule::new();
    module.create_model_instance(ModelInstance {
        model,
        position: DVec3::new(0.0, 0.0, -8.0),
        rotation: Quat::IDENTITY,
        scale: 1.0,
        lod_override: None,
    });

    let mut params = camera_params(DVec3::ZERO);
    assert_eq!(cull(&module, &hub, &params)[0].lod, 0);
    // A 2× multiplier pushes the same instance past the LOD threshold.
    params.lod_multiplier = 2.0;
    assert_eq!(cull(&module, &hub, &params)[0].lod, 1);
}

// ============================================================================
// Bucket ordering
// ============================================================================

fn item(batch_key: u64, dist: f32) -> BucketItem {
    let mut map: slotmap::SlotMap<pyre::scene::InstanceId, ()> = slotmap::SlotMap::with_key();
    BucketItem {
        instance: map.insert(()),
        mesh_index: 0,
        batch_key,
        squared_distance: dist,
    }
}

#[test]
fn opaque_items_batch_by_material_mesh_key() {
    let mut items = vec![item(7, 2.0), item(3, 1.0), item(7, 0.5), item(3, 9.0)];
    sort_items(&mut items, SortOrder::Default);
    let runs: Vec<usize> = batch_runs(&items).map(<[BucketItem]>::len).collect();
    assert_eq!(runs, vec![2, 2]);
}

#[test]
fn transparent_items_draw_back_to_front() {
    let mut items = vec![item(1, 4.0), item(2, 25.0), item(3, 9.0)];
    sort_items(&mut items, SortOrder::Depth);
    let order: Vec<f32> = items.iter().map(|i| i.squared_distance).collect();
    assert_eq!(order, vec![25.0, 9.0, 4.0]);
}

// ============================================================================
// Module bookkeeping
// ============================================================================

#[test]
fn active_camera_viewport_matches_output() {
    let mut module = RenderModule::new();
    module.create_camera(CameraEntity {
        camera: Camera::default(),
        position: DVec3::new(1.0, 2.0, 3.0),
        rotation: Quat::IDENTITY,
    });
    let vp = module.active_viewport(1280, 720).unwrap();
    assert_eq!((vp.w, vp.h), (1280, 720));
    assert_eq!(vp.pos, DVec3::new(1.0, 2.0, 3.0));
}

#[test]
fn no_camera_means_no_viewport() {
    let module = RenderModule::new();
    assert!(module.active_viewport(640, 480).is_none());
}
