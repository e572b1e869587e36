//! End-to-End Render Tests
//!
//! These drive the full stack (GAL → draw stream → pipeline → plugins)
//! against a real adapter. Machines without a compatible GPU skip them:
//! every test begins by trying to create the context and returns early on
//! failure.
//!
//! Covered scenarios:
//! - empty scene: clear + present, no renderbuffer leak, AA skipped
//! - single opaque mesh: center pixel matches the material base color
//! - TAA on/off parity: converged output matches the unjittered path
//! - bloom extract energy conservation
//! - swapchain resize: all frame fences observed signaled first
//! - plugin hook ordering and tonemap claiming
//! - `use_program` idempotence (zero extra PSO binds)
//! - deferred release through the frame graveyard
//! - GPU round-trip laws (buffer update/readback, texture copy/readback)
//! - renderbuffer pool non-aliasing within a frame
//! - upscaler context retirement after idle frames

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use glam::{DVec3, IVec2, Quat};

use pyre::gal::{BufferFlags, Gpu, StateFlags, TextureFlags, TextureFormat, TextureHandle, WindowId};
use pyre::passes::{
    Bloom, BloomCapture, Taa, UpscaleContextId, UpscaleInputs, Upscaler, UpscalerBackend,
};
use pyre::pipeline::plugin::{FrameCtx, GBuffer, RenderPlugin};
use pyre::pipeline::renderbuffer::{
    RenderbufferDesc, RenderbufferHandle, RenderbufferPool, RenderbufferSize,
};
use pyre::pipeline::Pipeline;
use pyre::resources::formats::msh::{MshAttribute, MshFile, MshFlags, MshLod, MshMesh};
use pyre::resources::{MemoryIo, ShaderId};
use pyre::scene::camera::Camera;
use pyre::scene::{CameraEntity, ModelInstance, RenderModule};
use pyre::settings::RenderSettings;
use pyre::stream::DrawStream;
use pyre::Renderer;

fn test_renderer() -> Option<Renderer> {
    let settings = RenderSettings {
        power_preference: wgpu::PowerPreference::LowPower,
        ..Default::default()
    };
    match pollster::block_on(Renderer::new(&settings, MemoryIo::new())) {
        Ok(renderer) => Some(renderer),
        Err(err) => {
            eprintln!("no compatible adapter, skipping: {err}");
            None
        }
    }
}

fn offscreen_target(gpu: &mut Gpu, size: IVec2) -> TextureHandle {
    let handle = gpu.alloc_texture_handle();
    gpu.begin_frame();
    gpu.create_texture(
        handle,
        size.x as u32,
        size.y as u32,
        1,
        TextureFormat::RGBA8,
        TextureFlags::RENDER_TARGET | TextureFlags::NO_MIPS,
        "test_target",
    );
    gpu.end_frame();
    handle
}

fn add_camera(module: &mut RenderModule) {
    module.create_camera(CameraEntity {
        camera: Camera::default(),
        position: DVec3::ZERO,
        rotation: Quat::IDENTITY,
    });
}

// ============================================================================
// Scenario: empty scene
// ============================================================================

#[test]
fn empty_scene_clears_and_leaks_nothing() {
    let Some(mut renderer) = test_renderer() else {
        return;
    };
    let size = IVec2::new(320, 240);
    let target = offscreen_target(&mut renderer.gpu, size);
    let module = RenderModule::new();
    let mut pipeline = Pipeline::new(&mut renderer.hub);

    renderer.frame_to_target(&mut pipeline, &module, target, size);
    let after_first = pipeline.renderbuffer_count();
    assert_eq!(after_first, 0, "no camera → no renderbuffers");

    renderer.frame_to_target(&mut pipeline, &module, target, size);
    assert_eq!(pipeline.renderbuffer_count(), after_first);
    assert!(renderer.last_stats().commands > 0);
}

#[test]
fn scene_with_camera_recycles_renderbuffers() {
    let Some(mut renderer) = test_renderer() else {
        return;
    };
    let size = IVec2::new(320, 240);
    let target = offscreen_target(&mut renderer.gpu, size);
    let mut module = RenderModule::new();
    add_camera(&mut module);
    let mut pipeline = Pipeline::new(&mut renderer.hub);

    renderer.frame_to_target(&mut pipeline, &module, target, size);
    let pool_after_first = pipeline.renderbuffer_count();
    for _ in 0..4 {
        renderer.frame_to_target(&mut pipeline, &module, target, size);
    }
    // Steady state: the pool stops growing.
    assert_eq!(pipeline.renderbuffer_count(), pool_after_first);
}

// ============================================================================
// Plugin ordering & claiming
// ============================================================================

#[derive(Default)]
struct CallLog(Arc<Mutex<Vec<&'static str>>>);

struct Probe {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
    claim_tonemap: bool,
}

impl RenderPlugin for Probe {
    fn name(&self) -> &'static str {
        self.name
    }

    fn render_before_transparent(
        &mut self,
        _gbuffer: &GBuffer,
        hdr: RenderbufferHandle,
        _pipeline: &mut Pipeline,
        _ctx: &mut FrameCtx<'_>,
    ) -> RenderbufferHandle {
        self.log.lock().unwrap().push(self.name);
        hdr
    }

    fn tonemap(
        &mut self,
        hdr: RenderbufferHandle,
        output: &mut RenderbufferHandle,
        _pipeline: &mut Pipeline,
        _ctx: &mut FrameCtx<'_>,
    ) -> bool {
        if self.claim_tonemap {
            self.log.lock().unwrap().push("claimed");
            *output = hdr;
            return true;
        }
        false
    }

    fn render_after_tonemap(
        &mut self,
        _gbuffer: &GBuffer,
        input: RenderbufferHandle,
        _pipeline: &mut Pipeline,
        _ctx: &mut FrameCtx<'_>,
    ) -> RenderbufferHandle {
        self.log.lock().unwrap().push("after");
        input
    }
}

#[test]
fn hooks_run_in_registration_order() {
    let Some(mut renderer) = test_renderer() else {
        return;
    };
    let log = CallLog::default().0;
    renderer.plugins.register(Box::new(Probe {
        name: "first",
        log: log.clone(),
        claim_tonemap: true,
    }));
    renderer.plugins.register(Box::new(Probe {
        name: "second",
        log: log.clone(),
        claim_tonemap: true,
    }));

    let size = IVec2::new(128, 128);
    let target = offscreen_target(&mut renderer.gpu, size);
    let mut module = RenderModule::new();
    add_camera(&mut module);
    let mut pipeline = Pipeline::new(&mut renderer.hub);
    renderer.frame_to_target(&mut pipeline, &module, target, size);

    let calls = log.lock().unwrap().clone();
    // before-* hooks: registration order; tonemap: first claimer wins once;
    // after-* hooks: reverse registration order.
    assert_eq!(calls, vec!["first", "second", "claimed", "after", "after"]);
}

// ============================================================================
// PSO bind idempotence
// ============================================================================

#[test]
fn redundant_use_program_costs_no_extra_binds() {
    let Some(mut renderer) = test_renderer() else {
        return;
    };
    let size = IVec2::new(64, 64);
    let target = offscreen_target(&mut renderer.gpu, size);

    renderer.gpu.begin_frame();
    let program = renderer.gpu.alloc_program_handle();
    renderer.gpu.create_program(
        program,
        &pyre::gal::ProgramDesc {
            vertex_src: Some(
                "@vertex fn vs_main(@builtin(vertex_index) i: u32) -> @builtin(position) vec4f {
                     return vec4f(0.0, 0.0, 0.0, 1.0);
                 }",
            ),
            fragment_src: Some(
                "@fragment fn fs_main() -> @location(0) vec4f { return vec4f(1.0); }",
            ),
            compute_src: None,
            decl: pyre::gal::VertexDecl::default(),
            state: pyre::gal::StateFlags::empty(),
            topology: pyre::gal::PrimitiveTopology::Triangles,
            debug_name: "idempotence",
        },
    );

    let mut stream = DrawStream::new();
    stream.set_framebuffer(&[target], None, false);
    stream.viewport(0, 0, size.x, size.y);
    stream.use_program(program);
    stream.draw_arrays(0, 3);
    stream.use_program(program);
    stream.draw_arrays(0, 3);
    stream.use_program(program);
    stream.draw_arrays(0, 3);

    let stats = pyre::stream::exec::execute(stream, &mut renderer.gpu);
    renderer.gpu.end_frame();

    assert_eq!(stats.draws, 3);
    assert_eq!(stats.pso_binds, 1, "re-binding the same program is free");
}

// ============================================================================
// Deferred release
// ============================================================================

#[test]
fn destroyed_resources_wait_for_frame_retirement() {
    let Some(mut renderer) = test_renderer() else {
        return;
    };
    let gpu = &mut renderer.gpu;

    gpu.begin_frame();
    let buffer = gpu.alloc_buffer_handle();
    gpu.create_buffer(buffer, pyre::gal::BufferFlags::empty(), 256, None, "tmp");
    gpu.destroy_buffer(buffer);

    // The handle is dead immediately, the native object is not: it sits in
    // the frame graveyard until this frame's fence signals.
    assert!(gpu.buffer(buffer).is_none());
    assert_eq!(gpu.current_frame().to_release.len(), 1);
    assert_eq!(gpu.current_frame().to_heap_release.len(), 1);
    gpu.end_frame();

    // Re-acquiring the slot waits on the fence and drains the graveyard.
    gpu.begin_frame();
    assert!(gpu.current_frame().to_release.is_empty());
    assert!(gpu.current_frame().to_heap_release.is_empty());
    gpu.end_frame();
}

// ============================================================================
// Upscaler context retirement
// ============================================================================

#[derive(Default)]
struct MockBackend {
    created: AtomicU32,
    destroyed: AtomicU32,
}

impl UpscalerBackend for MockBackend {
    fn create_context(&mut self, _gpu: &mut Gpu, _size: IVec2) -> Option<UpscaleContextId> {
        let id = self.created.fetch_add(1, Ordering::Relaxed);
        Some(UpscaleContextId(u64::from(id) + 1))
    }

    fn dispatch(&mut self, _gpu: &mut Gpu, _ctx: UpscaleContextId, _inputs: &UpscaleInputs) {}

    fn destroy_context(&mut self, _gpu: &mut Gpu, _ctx: UpscaleContextId) {
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn upscaler_context_retires_after_idle_frames() {
    let Some(mut renderer) = test_renderer() else {
        return;
    };
    let backend = Arc::new(parking_lot::Mutex::new(MockBackend::default()));
    let upscaler = Upscaler::new(&mut renderer.hub, backend.clone());
    renderer.plugins.register(Box::new(upscaler));

    let size = IVec2::new(160, 120);
    let target = offscreen_target(&mut renderer.gpu, size);
    let mut module = RenderModule::new();
    add_camera(&mut module);
    let mut pipeline = Pipeline::new(&mut renderer.hub);

    // One rendered frame creates one context.
    renderer.frame_to_target(&mut pipeline, &module, target, size);
    assert_eq!(backend.lock().created.load(Ordering::Relaxed), 1);

    // Seven idle frames (no pipeline render) age it out.
    let empty = RenderModule::new();
    for _ in 0..7 {
        renderer.frame_to_target(&mut pipeline, &empty, target, size);
    }
    assert_eq!(backend.lock().destroyed.load(Ordering::Relaxed), 1);
}

// ============================================================================
// Shader sources for the concrete scenarios
// ============================================================================
//
// Real WGSL compiled against the root layout: six dynamic uniform slots at
// group 0, the bindless texture table at group 1. Post-process shaders
// fetch with `textureLoad`, so results are pixel-exact.

const BINDLESS_DECL: &str =
    "@group(1) @binding(0) var textures: binding_array<texture_2d<f32>, 4096>;";

const FULLSCREEN_VS: &str = r"
@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4f {
    var positions = array<vec2f, 3>(vec2f(-1.0, -1.0), vec2f(3.0, -1.0), vec2f(-1.0, 3.0));
    return vec4f(positions[index], 0.5, 1.0);
}
";

fn post_shader(body: &str) -> Vec<u8> {
    format!("{BINDLESS_DECL}\n{body}\n{FULLSCREEN_VS}").into_bytes()
}

/// Deferred resolve: pass the albedo target through into HDR.
fn light_shader() -> Vec<u8> {
    post_shader(
        r"
struct LightUniforms {
    sunlight: vec4f,
    sun_direction: vec4f,
    fog: vec4f,
    light_count: u32,
    gbuffer_a: u32,
    gbuffer_b: u32,
    gbuffer_c: u32,
    depth_map: u32,
    pad0: u32,
    pad1: u32,
    pad2: u32,
    lights: array<vec4f, 32>,
}
@group(0) @binding(5) var<uniform> light_data: LightUniforms;
@fragment
fn fs_main(@builtin(position) frag: vec4f) -> @location(0) vec4f {
    return textureLoad(textures[light_data.gbuffer_a], vec2i(frag.xy), 0);
}
",
    )
}

/// Resolve that ignores the G-buffer: HDR starts black.
fn black_light_shader() -> Vec<u8> {
    post_shader(
        r"
@fragment
fn fs_main() -> @location(0) vec4f {
    return vec4f(0.0, 0.0, 0.0, 1.0);
}
",
    )
}

fn tonemap_shader() -> Vec<u8> {
    post_shader(
        r"
struct TonemapUniforms { exposure: f32, source: u32, pad0: u32, pad1: u32 }
@group(0) @binding(5) var<uniform> tonemap_data: TonemapUniforms;
@fragment
fn fs_main(@builtin(position) frag: vec4f) -> @location(0) vec4f {
    let color = textureLoad(textures[tonemap_data.source], vec2i(frag.xy), 0);
    return vec4f(color.rgb * tonemap_data.exposure, color.a);
}
",
    )
}

fn quad_shader() -> Vec<u8> {
    post_shader(
        r"
struct QuadUniforms {
    offset_scale: vec4f,
    r_mask: vec4f,
    g_mask: vec4f,
    b_mask: vec4f,
    a_mask: vec4f,
    source: u32,
    pad0: u32,
    pad1: u32,
    pad2: u32,
}
@group(0) @binding(5) var<uniform> quad_data: QuadUniforms;
@fragment
fn fs_main(@builtin(position) frag: vec4f) -> @location(0) vec4f {
    let color = textureLoad(textures[quad_data.source], vec2i(frag.xy), 0);
    return vec4f(
        dot(color, quad_data.r_mask),
        dot(color, quad_data.g_mask),
        dot(color, quad_data.b_mask),
        dot(color, quad_data.a_mask),
    );
}
",
    )
}

/// History blend with a 3×3 neighborhood clamp.
fn taa_shader() -> Vec<u8> {
    post_shader(
        r"
struct TaaUniforms {
    size: vec2f,
    weight: f32,
    pad: f32,
    history: u32,
    current: u32,
    motion: u32,
    pad2: u32,
}
@group(0) @binding(5) var<uniform> taa_data: TaaUniforms;
@fragment
fn fs_main(@builtin(position) frag: vec4f) -> @location(0) vec4f {
    let p = vec2i(frag.xy);
    let current = textureLoad(textures[taa_data.current], p, 0);
    var lo = current;
    var hi = current;
    for (var dy = -1; dy <= 1; dy++) {
        for (var dx = -1; dx <= 1; dx++) {
            let q = clamp(p + vec2i(dx, dy), vec2i(0, 0), vec2i(taa_data.size) - vec2i(1, 1));
            let neighbor = textureLoad(textures[taa_data.current], q, 0);
            lo = min(lo, neighbor);
            hi = max(hi, neighbor);
        }
    }
    let history = clamp(textureLoad(textures[taa_data.history], p, 0), lo, hi);
    return mix(history, current, taa_data.weight);
}
",
    )
}

/// Energy-preserving bright extract: each half-res texel averages its 2×2
/// source footprint, scaled by the exposure multiplier.
fn bloom_extract_shader() -> Vec<u8> {
    post_shader(
        r"
struct ExtractUniforms { avg_multiplier: f32, histogram: u32, source: u32, pad0: u32 }
@group(0) @binding(5) var<uniform> extract_data: ExtractUniforms;
@fragment
fn fs_main(@builtin(position) frag: vec4f) -> @location(0) vec4f {
    let base = vec2i(frag.xy) * 2;
    var sum = vec4f(0.0);
    for (var dy = 0; dy < 2; dy++) {
        for (var dx = 0; dx < 2; dx++) {
            sum += textureLoad(textures[extract_data.source], base + vec2i(dx, dy), 0);
        }
    }
    return sum * 0.25 * extract_data.avg_multiplier;
}
",
    )
}

fn bloom_tonemap_shader() -> Vec<u8> {
    post_shader(
        r"
struct BloomTonemapUniforms { exposure: f32, source: u32, accum: u32, pad0: u32 }
@group(0) @binding(5) var<uniform> bloom_tonemap_data: BloomTonemapUniforms;
@fragment
fn fs_main(@builtin(position) frag: vec4f) -> @location(0) vec4f {
    return textureLoad(textures[bloom_tonemap_data.source], vec2i(frag.xy), 0);
}
",
    )
}

fn bright_pixel_shader() -> Vec<u8> {
    post_shader(
        r"
@fragment
fn fs_main() -> @location(0) vec4f {
    return vec4f(10.0, 10.0, 10.0, 1.0);
}
",
    )
}

fn stub_shader() -> Vec<u8> {
    post_shader(
        r"
@fragment
fn fs_main() -> @location(0) vec4f {
    return vec4f(0.0);
}
",
    )
}

fn avg_luminance_shader() -> Vec<u8> {
    b"@compute @workgroup_size(16, 16, 1) fn main() {}".to_vec()
}

/// Flat-color geometry shader: transforms by the per-view and per-instance
/// blocks, writes a constant base color into the G-buffer.
fn flat_material_shader() -> Vec<u8> {
    br"
struct PassUniforms {
    view: mat4x4f,
    projection: mat4x4f,
    view_projection: mat4x4f,
    inv_view_projection: mat4x4f,
    viewport: vec4f,
    jitter: vec4f,
}
@group(0) @binding(1) var<uniform> pass_data: PassUniforms;
struct Instances { model: array<mat4x4f, 64> }
@group(0) @binding(3) var<uniform> instance_data: Instances;
@vertex
fn vs_main(@builtin(instance_index) instance_id: u32, @location(0) position: vec3f) -> @builtin(position) vec4f {
    let world = instance_data.model[instance_id] * vec4f(position, 1.0);
    return pass_data.view_projection * world;
}
struct GbufferOut {
    @location(0) a: vec4f,
    @location(1) b: vec4f,
    @location(2) c: vec4f,
    @location(3) d: vec4f,
}
@fragment
fn fs_main() -> GbufferOut {
    var result: GbufferOut;
    result.a = vec4f(0.2, 0.4, 0.8, 1.0);
    result.b = vec4f(0.0, 0.0, 1.0, 1.0);
    result.c = vec4f(0.0, 0.0, 0.0, 1.0);
    result.d = vec4f(0.0, 0.0, 0.0, 0.0);
    return result;
}
"
    .to_vec()
}

/// The flat material's base color after RGBA8 quantization.
const FLAT_BASE_COLOR: [u8; 3] = [51, 102, 204];

const FLAT_MATERIAL: &[u8] = br#"{ "shader": "shaders/flat.shd", "backface_culling": false }"#;

// ============================================================================
// Scene-test harness
// ============================================================================

fn cube_msh_bytes() -> Vec<u8> {
    let corners = [
        [-0.5f32, -0.5, -0.5],
        [0.5, -0.5, -0.5],
        [0.5, 0.5, -0.5],
        [-0.5, 0.5, -0.5],
        [-0.5, -0.5, 0.5],
        [0.5, -0.5, 0.5],
        [0.5, 0.5, 0.5],
        [-0.5, 0.5, 0.5],
    ];
    let mut vertices = Vec::new();
    for corner in corners {
        for v in corner {
            vertices.extend_from_slice(&v.to_le_bytes());
        }
        for v in [0.0f32, 0.0, 1.0] {
            vertices.extend_from_slice(&v.to_le_bytes()); // normal
        }
        for v in [0.0f32, 0.0] {
            vertices.extend_from_slice(&v.to_le_bytes()); // uv
        }
    }
    let index_list: [u16; 36] = [
        4, 5, 6, 4, 6, 7, // front (+z, toward the camera)
        0, 2, 1, 0, 3, 2, // back
        0, 4, 7, 0, 7, 3, // left
        1, 2, 6, 1, 6, 5, // right
        3, 7, 6, 3, 6, 2, // top
        0, 1, 5, 0, 5, 4, // bottom
    ];
    let mut indices = Vec::new();
    for i in index_list {
        indices.extend_from_slice(&i.to_le_bytes());
    }
    MshFile {
        flags: MshFlags::INDICES_16BIT,
        meshes: vec![MshMesh {
            material_name: "materials/flat.mat".into(),
            attribute_array_offset: 0,
            attribute_array_size: vertices.len() as i32,
            indices_offset: 0,
            tri_count: 12,
            name: "cube".into(),
            attributes: vec![
                MshAttribute {
                    name: "in_position".into(),
                    ty: 0,
                },
                MshAttribute {
                    name: "in_normal".into(),
                    ty: 0,
                },
                MshAttribute {
                    name: "in_uv0".into(),
                    ty: 0,
                },
            ],
        }],
        indices,
        indices_count: 36,
        vertices,
        bones: Vec::new(),
        lods: vec![MshLod {
            to_mesh: 0,
            squared_distance: f32::MAX,
        }],
    }
    .write()
}

fn scene_renderer(files: &[(&str, Vec<u8>)]) -> Option<Renderer> {
    let io = MemoryIo::new();
    for (path, bytes) in files {
        io.insert(path, bytes.clone());
    }
    let settings = RenderSettings {
        power_preference: wgpu::PowerPreference::LowPower,
        ..Default::default()
    };
    match pollster::block_on(Renderer::new(&settings, io)) {
        Ok(renderer) => Some(renderer),
        Err(err) => {
            eprintln!("no compatible adapter, skipping: {err}");
            None
        }
    }
}

/// Renders until the hub settles (async loads + dependencies), then one
/// more frame so every draw sees ready resources.
fn pump(
    renderer: &mut Renderer,
    pipeline: &mut Pipeline,
    module: &RenderModule,
    target: TextureHandle,
    size: IVec2,
) {
    for _ in 0..100 {
        renderer.frame_to_target(pipeline, module, target, size);
        if renderer.hub.is_idle() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(2));
    }
    renderer.frame_to_target(pipeline, module, target, size);
}

fn add_cube_instance(renderer: &mut Renderer, module: &mut RenderModule) {
    let model = renderer.hub.load_model("models/cube.msh");
    module.create_model_instance(ModelInstance {
        model,
        position: DVec3::new(0.0, 0.0, -3.0),
        rotation: Quat::IDENTITY,
        scale: 1.0,
        lod_override: None,
    });
}

/// Schedules a readback and drains it through the frame ring.
fn read_texture_sync(gpu: &mut Gpu, target: TextureHandle) -> Vec<u8> {
    let (tx, rx) = flume::bounded(1);
    gpu.begin_frame();
    let _ = gpu.read_texture(
        target,
        Box::new(move |bytes| {
            let _ = tx.send(bytes.to_vec());
        }),
    );
    gpu.end_frame();
    // Re-acquiring the slot waits on the fence and fires the callback.
    gpu.begin_frame();
    gpu.end_frame();
    rx.try_recv().unwrap_or_default()
}

fn f16_to_f32(bits: u16) -> f32 {
    let sign = if bits & 0x8000 != 0 { -1.0f32 } else { 1.0 };
    let exponent = (bits >> 10) & 0x1f;
    let mantissa = f32::from(bits & 0x3ff);
    sign * match exponent {
        0 => mantissa * 2f32.powi(-24),
        31 => {
            if mantissa == 0.0 {
                f32::INFINITY
            } else {
                f32::NAN
            }
        }
        _ => (1.0 + mantissa / 1024.0) * 2f32.powi(i32::from(exponent) - 15),
    }
}

// ============================================================================
// Scenario: single opaque mesh
// ============================================================================

#[test]
fn single_opaque_mesh_center_pixel_matches_material_color() {
    let Some(mut renderer) = scene_renderer(&[
        ("pipelines/gbuffer.shd", flat_material_shader()),
        ("pipelines/light.shd", light_shader()),
        ("pipelines/tonemap.shd", tonemap_shader()),
        ("pipelines/textured_quad.shd", quad_shader()),
        ("shaders/flat.shd", flat_material_shader()),
        ("materials/flat.mat", FLAT_MATERIAL.to_vec()),
        ("models/cube.msh", cube_msh_bytes()),
    ]) else {
        return;
    };

    let size = IVec2::new(128, 128);
    let target = offscreen_target(&mut renderer.gpu, size);
    let mut pipeline = Pipeline::new(&mut renderer.hub);
    let mut module = RenderModule::new();
    add_camera(&mut module);
    add_cube_instance(&mut renderer, &mut module);

    pump(&mut renderer, &mut pipeline, &module, target, size);
    renderer.frame_to_target(&mut pipeline, &module, target, size);
    assert!(renderer.last_stats().draws > 0, "mesh never drew");

    let pixels = read_texture_sync(&mut renderer.gpu, target);
    assert!(!pixels.is_empty(), "readback produced no data");
    let center = ((size.y / 2 * size.x) + size.x / 2) as usize * 4;
    for (channel, expected) in FLAT_BASE_COLOR.iter().enumerate() {
        let got = pixels[center + channel];
        assert!(
            (i32::from(got) - i32::from(*expected)).abs() <= 1,
            "center channel {channel}: got {got}, expected {expected} ±1"
        );
    }
}

// ============================================================================
// Scenario: TAA on/off parity
// ============================================================================

fn render_cube_scene(with_taa: bool, frames: u32) -> Option<Vec<u8>> {
    let mut files = vec![
        ("pipelines/gbuffer.shd", flat_material_shader()),
        ("pipelines/light.shd", light_shader()),
        ("pipelines/tonemap.shd", tonemap_shader()),
        ("pipelines/textured_quad.shd", quad_shader()),
        ("shaders/flat.shd", flat_material_shader()),
        ("materials/flat.mat", FLAT_MATERIAL.to_vec()),
        ("models/cube.msh", cube_msh_bytes()),
    ];
    if with_taa {
        files.push(("pipelines/taa.shd", taa_shader()));
    }
    let mut renderer = scene_renderer(&files)?;
    if with_taa {
        let taa = Taa::new(&mut renderer.hub);
        renderer.plugins.register(Box::new(taa));
    }

    let size = IVec2::new(128, 128);
    let target = offscreen_target(&mut renderer.gpu, size);
    let mut pipeline = Pipeline::new(&mut renderer.hub);
    let mut module = RenderModule::new();
    add_camera(&mut module);
    add_cube_instance(&mut renderer, &mut module);

    pump(&mut renderer, &mut pipeline, &module, target, size);
    for _ in 0..frames {
        renderer.frame_to_target(&mut pipeline, &module, target, size);
    }
    Some(read_texture_sync(&mut renderer.gpu, target))
}

#[test]
fn taa_output_converges_to_taa_disabled_output() {
    let Some(with_taa) = render_cube_scene(true, 8) else {
        return;
    };
    let Some(without_taa) = render_cube_scene(false, 1) else {
        return;
    };
    assert!(!with_taa.is_empty() && !without_taa.is_empty());

    // Static camera + static scene: after 8 frames the clamped history has
    // converged onto the unjittered image at the probe pixel.
    let center = ((64 * 128) + 64) * 4;
    for channel in 0..3 {
        let a = i32::from(with_taa[center + channel]);
        let b = i32::from(without_taa[center + channel]);
        assert!(
            (a - b).abs() <= 1,
            "channel {channel} diverged: taa {a} vs reference {b}"
        );
    }
}

// ============================================================================
// Scenario: bloom extract energy conservation
// ============================================================================

/// Writes one full-bright pixel into HDR ahead of bloom.
struct BrightPixel {
    shader: ShaderId,
    x: i32,
    y: i32,
}

impl RenderPlugin for BrightPixel {
    fn name(&self) -> &'static str {
        "bright_pixel"
    }

    fn render_before_tonemap(
        &mut self,
        _gbuffer: &GBuffer,
        input: RenderbufferHandle,
        pipeline: &mut Pipeline,
        ctx: &mut FrameCtx<'_>,
    ) -> RenderbufferHandle {
        let ready = ctx
            .hub
            .shaders
            .get(self.shader)
            .is_some_and(|s| s.header.is_ready());
        if !ready {
            return input;
        }
        pipeline.set_render_targets(ctx, &[input], None);
        pipeline.set_viewport(ctx, self.x, self.y, 1, 1);
        let shader = self.shader;
        pipeline.draw_array(ctx, 0, 3, shader, 0, StateFlags::empty());
        let vp = pipeline.viewport().clone();
        pipeline.set_viewport(ctx, 0, 0, vp.w, vp.h);
        input
    }
}

#[test]
fn bloom_extract_conserves_energy() {
    let Some(mut renderer) = scene_renderer(&[
        ("pipelines/light.shd", black_light_shader()),
        ("pipelines/tonemap.shd", tonemap_shader()),
        ("pipelines/textured_quad.shd", quad_shader()),
        ("pipelines/bloom.shd", bloom_extract_shader()),
        ("pipelines/bloom_tonemap.shd", bloom_tonemap_shader()),
        ("pipelines/blur.shd", stub_shader()),
        ("pipelines/bloom_blur.shd", stub_shader()),
        ("pipelines/avg_luminance.shd", avg_luminance_shader()),
        ("shaders/bright.shd", bright_pixel_shader()),
    ]) else {
        return;
    };

    let bright_shader = renderer.hub.load_shader("shaders/bright.shd");
    renderer.plugins.register(Box::new(BrightPixel {
        shader: bright_shader,
        x: 64,
        y: 64,
    }));
    let mut bloom = Bloom::new(&mut renderer.hub);
    bloom.capture_extract = true;
    renderer.plugins.register(Box::new(bloom));

    let size = IVec2::new(128, 128);
    let target = offscreen_target(&mut renderer.gpu, size);
    let mut pipeline = Pipeline::new(&mut renderer.hub);
    let mut module = RenderModule::new();
    add_camera(&mut module);

    pump(&mut renderer, &mut pipeline, &module, target, size);
    renderer.frame_to_target(&mut pipeline, &module, target, size);

    let extracted = pipeline.plugin_data::<BloomCapture>().extracted;
    assert!(extracted.is_valid(), "bloom extract never ran");
    let bytes = read_texture_sync(&mut renderer.gpu, extracted);
    assert!(!bytes.is_empty(), "extract readback produced no data");

    // Sum RGB energy over the half-res buffer; each texel covers 4 source
    // pixels.
    let mut energy = 0.0f64;
    for texel in bytes.chunks_exact(8) {
        for channel in 0..3 {
            let bits = u16::from_le_bytes([texel[channel * 2], texel[channel * 2 + 1]]);
            energy += f64::from(f16_to_f32(bits));
        }
    }
    energy *= 4.0;

    // One (10, 10, 10) pixel in, default avg_bloom_multiplier of 1.
    let expected = 30.0;
    assert!(
        (energy - expected).abs() <= expected * 0.01,
        "extracted energy {energy} differs from {expected} by more than 1%"
    );
}

// ============================================================================
// Scenario: swapchain resize
// ============================================================================

#[test]
fn resize_observes_all_frame_fences_before_reconfigure() {
    let Some(mut renderer) = test_renderer() else {
        return;
    };
    let gpu = &mut renderer.gpu;

    // Put a pending death into every frame slot of the ring.
    for _ in 0..3 {
        gpu.begin_frame();
        let buffer = gpu.alloc_buffer_handle();
        gpu.create_buffer(buffer, BufferFlags::empty(), 128, None, "resize_probe");
        gpu.destroy_buffer(buffer);
        gpu.end_frame();
        gpu.present();
    }
    assert_eq!(gpu.pending_release_count(), 3);

    // Resize flushes the ring first: every slot's fence is observed
    // signaled and its graveyard drained before any buffers recreate.
    gpu.resize_window(WindowId(0), 1280, 720);
    assert_eq!(gpu.pending_release_count(), 0);

    // The next frame cycle (present included) succeeds after the resize.
    gpu.begin_frame();
    gpu.end_frame();
    gpu.present();
}

// ============================================================================
// Round-trip laws
// ============================================================================

#[test]
fn buffer_update_readback_round_trip() {
    let Some(mut renderer) = test_renderer() else {
        return;
    };
    let gpu = &mut renderer.gpu;
    let data: Vec<u8> = (0..1024u32).map(|i| (i * 7 + 3) as u8).collect();

    gpu.begin_frame();
    let buffer = gpu.alloc_buffer_handle();
    gpu.create_buffer(buffer, BufferFlags::empty(), data.len() as u64, None, "roundtrip");
    gpu.update_buffer(buffer, &data);
    let (tx, rx) = flume::bounded(1);
    let _ = gpu.read_buffer(
        buffer,
        Box::new(move |bytes| {
            let _ = tx.send(bytes.to_vec());
        }),
    );
    gpu.end_frame();
    gpu.begin_frame();
    gpu.end_frame();

    assert_eq!(rx.try_recv().unwrap_or_default(), data);
}

#[test]
fn texture_copy_readback_round_trip() {
    let Some(mut renderer) = test_renderer() else {
        return;
    };
    let gpu = &mut renderer.gpu;
    // 4×4 RGBA8 with a distinct value per byte.
    let data: Vec<u8> = (0..64u32).map(|i| (i * 11 + 1) as u8).collect();

    gpu.begin_frame();
    let src = gpu.alloc_texture_handle();
    gpu.create_texture(src, 4, 4, 1, TextureFormat::RGBA8, TextureFlags::NO_MIPS, "rt_src");
    gpu.update_texture(src, 0, 0, 0, 0, 4, 4, &data);
    let dst = gpu.alloc_texture_handle();
    gpu.create_texture(dst, 4, 4, 1, TextureFormat::RGBA8, TextureFlags::NO_MIPS, "rt_dst");
    gpu.copy_texture(dst, src, 0, 0);
    let (tx, rx) = flume::bounded(1);
    let _ = gpu.read_texture(
        dst,
        Box::new(move |bytes| {
            let _ = tx.send(bytes.to_vec());
        }),
    );
    gpu.end_frame();
    gpu.begin_frame();
    gpu.end_frame();

    assert_eq!(rx.try_recv().unwrap_or_default(), data);
}

// ============================================================================
// Renderbuffer pool non-aliasing
// ============================================================================

#[test]
fn same_descriptor_renderbuffers_never_alias_within_a_frame() {
    let Some(renderer) = test_renderer() else {
        return;
    };
    let mut pool = RenderbufferPool::new();
    let mut stream = DrawStream::new();
    let desc = RenderbufferDesc {
        size: RenderbufferSize::Relative(1.0, 1.0),
        format: TextureFormat::RGBA8,
        flags: TextureFlags::RENDER_TARGET | TextureFlags::NO_MIPS,
        debug_name: "alias_probe",
    };
    let viewport = IVec2::new(256, 256);

    // Two same-descriptor allocations in one frame are distinct entries
    // over distinct textures, so a pass can never see one buffer as both
    // attachment and SRV/UAV.
    let a = pool.allocate(&renderer.gpu, &mut stream, &desc, viewport);
    let b = pool.allocate(&renderer.gpu, &mut stream, &desc, viewport);
    assert_ne!(a, b);
    assert_ne!(pool.texture(a), pool.texture(b));
    assert_eq!(pool.total_count(), 2);

    // After the frame boundary both recycle instead of growing the pool,
    // and a reused pair still never aliases.
    pool.end_frame();
    let c = pool.allocate(&renderer.gpu, &mut stream, &desc, viewport);
    let d = pool.allocate(&renderer.gpu, &mut stream, &desc, viewport);
    assert_ne!(pool.texture(c), pool.texture(d));
    assert_eq!(pool.total_count(), 2);
}
