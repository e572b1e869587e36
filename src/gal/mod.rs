//! GPU Abstraction Layer
//!
//! A thin, thread-aware wrapper over wgpu exposing the renderer's resource
//! model: bindless descriptor slots, lazily tracked resource states, a
//! deterministic PSO cache, and a ring of in-flight [`Frame`] slots.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                      Gpu                          │
//! │  textures / buffers / programs / queries          │
//! ├───────────────┬──────────────┬───────────────────┤
//! │ BindlessHeap  │   PsoCache   │  Frame ring (×3)  │
//! │ (stable+      │ (hash → PSO) │  fence, scratch,  │
//! │  transient)   │              │  graveyard        │
//! ├───────────────┴──────────────┴───────────────────┤
//! │            wgpu device / queue / surfaces         │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! # Threading
//!
//! Handle allocation is lock-free and callable from any thread; everything
//! that records into the command encoder is restricted to the render thread
//! and debug-asserts against a cached thread id. Cross-thread work reaches
//! the GAL through the draw stream.

pub mod binding;
pub mod buffer;
pub mod frame;
pub mod heaps;
pub mod program;
pub mod pso;
pub mod query;
pub mod swapchain;
pub mod texture;

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::ThreadId;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::errors::{PyreError, Result};
use crate::settings::RenderSettings;

pub use binding::{BindGroupCaches, UniformBinding, UNIFORM_BINDING_SIZE};
pub use buffer::{BufferFlags, GpuBuffer};
pub use frame::{Frame, ReadbackCallback, ReadbackHandle, ScratchBuffer, TextureRead};
pub use heaps::{
    AttachmentRing, BindlessHandle, BindlessHeap, BindlessSlot, RwBindlessHandle, SamplerHeap,
    NULL_BUFFER_SLOT, NULL_TEXTURE_SLOT,
};
pub use program::{
    Attribute, AttributeSemantic, AttributeType, BlendFactor, PrimitiveTopology, Program,
    ProgramDesc, ProgramStages, StateFlags, StencilFunc, StencilOp, VertexDecl,
};
pub use pso::{ComputePsoId, FramebufferLayout, PsoCache, RenderPsoId, RootLayout};
pub use query::{Query, QueryKind, QueryPool};
pub use swapchain::{SwapchainSet, WindowId};
pub use texture::{
    FormatDesc, GpuTexture, ResourceState, StateTag, TextureDesc, TextureFlags, TextureFormat,
};

/// Number of frames in flight.
pub const NUM_BACKBUFFERS: usize = 3;

/// Default per-frame scratch upload capacity.
const SCRATCH_CAPACITY: usize = 8 * 1024 * 1024;
/// Stable bindless slots available to content.
const BINDLESS_CAPACITY: u32 = 16 * 1024;
/// Transient descriptors per frame.
const TRANSIENT_CAPACITY: u32 = 8 * 1024;
/// Attachment views writable per frame.
const ATTACHMENT_CAPACITY: u32 = 1024;

macro_rules! define_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Clone, Copy, PartialEq, Eq, Hash, Debug,
            bytemuck::Pod, bytemuck::Zeroable,
        )]
        #[repr(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub const INVALID: Self = Self(0);

            #[must_use]
            pub fn is_valid(self) -> bool {
                self.0 != 0
            }
        }
    };
}

define_handle!(
    /// Handle to a GAL texture. Mintable from any thread; resolved on the
    /// render thread.
    TextureHandle
);
define_handle!(
    /// Handle to a GAL buffer.
    BufferHandle
);
define_handle!(
    /// Handle to a GAL program.
    ProgramHandle
);
define_handle!(
    /// Handle to a GAL query.
    QueryHandle
);

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

fn next_handle() -> u64 {
    NEXT_HANDLE.fetch_add(1, Ordering::Relaxed)
}

/// Optional external capture integration (RenderDoc-class). Invoked at
/// `Frame::end` when a capture was requested.
pub type CaptureTrigger = Box<dyn Fn() + Send>;

/// The process-wide GPU context.
pub struct Gpu {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,

    pub heap: BindlessHeap,
    pub samplers: SamplerHeap,
    pub attachment_ring: AttachmentRing,
    pub root: RootLayout,
    pub pso: PsoCache,
    pub query_pool: QueryPool,
    pub swapchains: SwapchainSet,

    textures: FxHashMap<TextureHandle, GpuTexture>,
    buffers: FxHashMap<BufferHandle, GpuBuffer>,
    programs: FxHashMap<ProgramHandle, Program>,
    queries: FxHashMap<QueryHandle, Query>,

    frames: Vec<Frame>,
    frame_index: usize,
    frame_counter: u64,
    encoder: Option<wgpu::CommandEncoder>,
    binding_caches: BindGroupCaches,

    render_thread: ThreadId,
    vsync: Mutex<bool>,
    /// Bindless slots reserved at handle-allocation time, consumed when the
    /// deferred creation executes. Lets any thread embed bindless indices
    /// in uniform data before the draw stream drains.
    pending_slots: Mutex<FxHashMap<u64, BindlessSlot>>,
    capture_trigger: Option<CaptureTrigger>,

    /// 1×1 white texture bound behind reserved slot 0.
    pub null_texture: TextureHandle,
    /// 16-byte zero buffer bound behind reserved slot 1.
    pub null_buffer: BufferHandle,
}

impl Gpu {
    /// Initializes the GPU context. The calling thread becomes the render
    /// thread.
    pub async fn new(settings: &RenderSettings) -> Result<Self> {
        let instance = if settings.validation {
            wgpu::Instance::new(wgpu::InstanceDescriptor {
                flags: wgpu::InstanceFlags::DEBUG | wgpu::InstanceFlags::VALIDATION,
                ..wgpu::InstanceDescriptor::new_without_display_handle()
            })
        } else {
            wgpu::Instance::default()
        };

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: settings.power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| PyreError::AdapterRequestFailed(e.to_string()))?;

        // The bindless table is part of the GAL contract: a DX12-class
        // adapter is assumed. Shaders index the table with values read
        // from uniform blocks, which needs the non-uniform-indexing
        // feature on top of plain binding arrays.
        let required_features = settings.required_features
            | wgpu::Features::TEXTURE_BINDING_ARRAY
            | wgpu::Features::SAMPLED_TEXTURE_AND_STORAGE_BUFFER_ARRAY_NON_UNIFORM_INDEXING;
        let mut required_limits = settings.required_limits.clone();
        required_limits.max_binding_array_elements_per_shader_stage = required_limits
            .max_binding_array_elements_per_shader_stage
            .max(pso::BINDLESS_TABLE_SIZE);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: None,
                required_features,
                required_limits,
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await?;

        let heap = BindlessHeap::new(BINDLESS_CAPACITY, TRANSIENT_CAPACITY);
        let samplers = SamplerHeap::new(&device);
        let root = RootLayout::new(&device);
        let query_pool = QueryPool::new(&device, &queue, settings.required_features);
        let frames = (0..NUM_BACKBUFFERS)
            .map(|_| Frame::new(&device, SCRATCH_CAPACITY))
            .collect();

        let mut gpu = Self {
            instance,
            adapter,
            device,
            queue,
            heap,
            samplers,
            attachment_ring: AttachmentRing::new(ATTACHMENT_CAPACITY),
            root,
            pso: PsoCache::new(),
            query_pool,
            swapchains: SwapchainSet::new(),
            textures: FxHashMap::default(),
            buffers: FxHashMap::default(),
            programs: FxHashMap::default(),
            queries: FxHashMap::default(),
            frames,
            frame_index: 0,
            frame_counter: 0,
            encoder: None,
            binding_caches: BindGroupCaches::default(),
            render_thread: std::thread::current().id(),
            vsync: Mutex::new(settings.vsync),
            pending_slots: Mutex::new(FxHashMap::default()),
            capture_trigger: None,
            null_texture: TextureHandle::INVALID,
            null_buffer: BufferHandle::INVALID,
        };
        gpu.create_null_resources();
        log::info!("GAL initialized on {:?}", gpu.adapter.get_info().name);
        Ok(gpu)
    }

    /// Tears the context down: flushes every in-flight frame so deferred
    /// releases run, then drops native objects.
    pub fn shutdown(mut self) {
        self.flush_all();
    }

    #[inline]
    fn check_render_thread(&self) {
        debug_assert_eq!(
            std::thread::current().id(),
            self.render_thread,
            "GAL command recording is restricted to the render thread"
        );
    }

    fn create_null_resources(&mut self) {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("null_texture"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[255u8; 4],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let handle = TextureHandle(next_handle());
        self.textures.insert(
            handle,
            GpuTexture {
                desc: TextureDesc {
                    width: 1,
                    height: 1,
                    depth: 1,
                    mip_count: 1,
                    format: TextureFormat::RGBA8,
                    flags: TextureFlags::NO_MIPS,
                },
                texture,
                view,
                rw_view: None,
                slot: NULL_TEXTURE_SLOT,
                state: StateTag::new(ResourceState::GenericRead),
                is_view: false,
                debug_name: "null_texture".into(),
            },
        );
        self.null_texture = handle;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("null_buffer"),
            size: 16,
            usage: GpuBuffer::usages(BufferFlags::SHADER_BUFFER),
            mapped_at_creation: false,
        });
        let handle = BufferHandle(next_handle());
        self.buffers.insert(
            handle,
            GpuBuffer {
                buffer,
                size: 16,
                flags: BufferFlags::SHADER_BUFFER,
                slot: NULL_BUFFER_SLOT,
                state: StateTag::new(ResourceState::GenericRead),
                mapped: None,
                debug_name: "null_buffer".into(),
            },
        );
        self.null_buffer = handle;
    }

    // ── Handle allocation (thread-safe) ─────────────────────────────────────

    /// Allocates a texture handle and reserves its bindless slot so
    /// recording threads can reference it before creation executes.
    #[must_use]
    pub fn alloc_texture_handle(&self) -> TextureHandle {
        let handle = TextureHandle(next_handle());
        self.pending_slots.lock().insert(handle.0, self.heap.reserve());
        handle
    }

    /// Allocates a buffer handle and reserves its bindless slot.
    #[must_use]
    pub fn alloc_buffer_handle(&self) -> BufferHandle {
        let handle = BufferHandle(next_handle());
        self.pending_slots.lock().insert(handle.0, self.heap.reserve());
        handle
    }

    #[must_use]
    pub fn alloc_program_handle(&self) -> ProgramHandle {
        ProgramHandle(next_handle())
    }

    #[must_use]
    pub fn alloc_query_handle(&self) -> QueryHandle {
        QueryHandle(next_handle())
    }

    // ── Resource creation (render thread) ───────────────────────────────────

    /// Creates a texture under a pre-allocated handle.
    pub fn create_texture(
        &mut self,
        handle: TextureHandle,
        width: u32,
        height: u32,
        depth: u32,
        format: TextureFormat,
        flags: TextureFlags,
        debug_name: &str,
    ) {
        self.check_render_thread();
        let native_format = format.native(flags);
        let mip_count = TextureDesc::implied_mips(width, height, flags);

        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC;
        if flags.contains(TextureFlags::RENDER_TARGET) || FormatDesc::of(format).has_depth() {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        if flags.contains(TextureFlags::COMPUTE_WRITE) {
            usage |= wgpu::TextureUsages::STORAGE_BINDING;
        }

        let (dimension, layers) = if flags.contains(TextureFlags::IS_3D) {
            (wgpu::TextureDimension::D3, 1)
        } else if flags.contains(TextureFlags::IS_CUBE) {
            (wgpu::TextureDimension::D2, 6)
        } else {
            (wgpu::TextureDimension::D2, depth.max(1))
        };

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(debug_name),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: if flags.contains(TextureFlags::IS_3D) {
                    depth.max(1)
                } else {
                    layers
                },
            },
            mip_level_count: mip_count,
            sample_count: 1,
            dimension,
            format: native_format,
            usage,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(debug_name),
            dimension: if flags.contains(TextureFlags::IS_CUBE) {
                Some(wgpu::TextureViewDimension::Cube)
            } else {
                None
            },
            ..Default::default()
        });
        let rw_view = flags.contains(TextureFlags::COMPUTE_WRITE).then(|| {
            texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some(debug_name),
                base_mip_level: 0,
                mip_level_count: Some(1),
                ..Default::default()
            })
        });

        let slot = self
            .pending_slots
            .lock()
            .remove(&handle.0)
            .unwrap_or_else(|| self.heap.reserve());
        self.textures.insert(
            handle,
            GpuTexture {
                desc: TextureDesc {
                    width,
                    height,
                    depth: depth.max(1),
                    mip_count,
                    format,
                    flags,
                },
                texture,
                view,
                rw_view,
                slot,
                state: StateTag::new(GpuTexture::initial_state(flags, format)),
                is_view: false,
                debug_name: debug_name.to_string(),
            },
        );
        self.invalidate_bindless();
    }

    /// Creates a view sharing `src`'s native image. The view owns its own
    /// bindless slot and never releases the image.
    pub fn create_texture_view(&mut self, handle: TextureHandle, src: TextureHandle) {
        self.check_render_thread();
        let Some(source) = self.textures.get(&src) else {
            log::error!("create_texture_view: unknown source texture");
            return;
        };
        let texture = source.texture.clone();
        let desc = source.desc.clone();
        let debug_name = format!("{}_view", source.debug_name);
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&debug_name),
            ..Default::default()
        });
        let state = source.state.current();
        let slot = self
            .pending_slots
            .lock()
            .remove(&handle.0)
            .unwrap_or_else(|| self.heap.reserve());
        self.textures.insert(
            handle,
            GpuTexture {
                desc,
                texture,
                view,
                rw_view: None,
                slot,
                state: StateTag::new(state),
                is_view: true,
                debug_name,
            },
        );
        self.invalidate_bindless();
    }

    /// Creates a buffer under a pre-allocated handle, optionally with
    /// initial contents.
    pub fn create_buffer(
        &mut self,
        handle: BufferHandle,
        flags: BufferFlags,
        size: u64,
        data: Option<&[u8]>,
        debug_name: &str,
    ) {
        self.check_render_thread();
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(debug_name),
            size,
            usage: GpuBuffer::usages(flags),
            mapped_at_creation: false,
        });
        if let Some(data) = data {
            self.queue.write_buffer(&buffer, 0, data);
        }
        let mapped = flags.contains(BufferFlags::MAPPABLE).then(|| {
            let mut mirror = vec![0u8; size as usize];
            if let Some(data) = data {
                mirror[..data.len()].copy_from_slice(data);
            }
            mirror
        });
        let slot = self
            .pending_slots
            .lock()
            .remove(&handle.0)
            .unwrap_or_else(|| self.heap.reserve());
        self.buffers.insert(
            handle,
            GpuBuffer {
                buffer,
                size,
                flags,
                slot,
                state: StateTag::new(GpuBuffer::initial_state(flags)),
                mapped,
                debug_name: debug_name.to_string(),
            },
        );
    }

    /// Compiles a program under a pre-allocated handle.
    pub fn create_program(&mut self, handle: ProgramHandle, desc: &ProgramDesc<'_>) {
        self.check_render_thread();
        let hash = desc.stable_hash();
        let module = |src: &str, label: &str| {
            self.device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(label),
                    source: wgpu::ShaderSource::Wgsl(src.into()),
                })
        };
        let stages = if let Some(cs) = desc.compute_src {
            ProgramStages::Compute(module(cs, desc.debug_name))
        } else {
            ProgramStages::Graphics {
                vertex: module(desc.vertex_src.unwrap_or(""), desc.debug_name),
                fragment: module(desc.fragment_src.unwrap_or(""), desc.debug_name),
            }
        };
        self.programs.insert(
            handle,
            Program {
                stages,
                decl: desc.decl.clone(),
                state: desc.state,
                topology: desc.topology,
                hash,
                debug_name: desc.debug_name.to_string(),
            },
        );
    }

    /// Creates a query object.
    pub fn create_query(&mut self, handle: QueryHandle, kind: QueryKind) {
        self.queries.insert(
            handle,
            Query {
                kind,
                idx: 0,
                result: 0,
                ready: false,
            },
        );
    }

    // ── Resource destruction (deferred) ─────────────────────────────────────

    /// Enqueues a texture's death. The native image and bindless slot are
    /// released when the current frame retires.
    pub fn destroy_texture(&mut self, handle: TextureHandle) {
        self.check_render_thread();
        if let Some(texture) = self.textures.remove(&handle) {
            let frame = &mut self.frames[self.frame_index];
            frame.to_heap_release.push(texture.slot);
            frame.to_release.push(frame::DeferredRelease::Texture(texture.texture));
            self.invalidate_bindless();
        }
    }

    /// Enqueues a buffer's death.
    pub fn destroy_buffer(&mut self, handle: BufferHandle) {
        self.check_render_thread();
        if let Some(buffer) = self.buffers.remove(&handle) {
            let frame = &mut self.frames[self.frame_index];
            frame.to_heap_release.push(buffer.slot);
            frame.to_release.push(frame::DeferredRelease::Buffer(buffer.buffer));
            // Drop cached bind groups referencing the dead buffer.
            self.binding_caches
                .uniform_groups
                .retain(|(key, _), _| !key.contains(&handle.0));
            self.binding_caches
                .storage_groups
                .retain(|key, _| !key.contains(&handle.0));
        }
    }

    /// Drops a program immediately; PSOs referencing it stay in the cache.
    pub fn destroy_program(&mut self, handle: ProgramHandle) {
        self.programs.remove(&handle);
    }

    pub fn destroy_query(&mut self, handle: QueryHandle) {
        self.queries.remove(&handle);
    }

    // ── Resource access ─────────────────────────────────────────────────────

    #[must_use]
    pub fn texture(&self, handle: TextureHandle) -> Option<&GpuTexture> {
        self.textures.get(&handle)
    }

    #[must_use]
    pub fn texture_mut(&mut self, handle: TextureHandle) -> Option<&mut GpuTexture> {
        self.textures.get_mut(&handle)
    }

    #[must_use]
    pub fn buffer(&self, handle: BufferHandle) -> Option<&GpuBuffer> {
        self.buffers.get(&handle)
    }

    #[must_use]
    pub fn buffer_mut(&mut self, handle: BufferHandle) -> Option<&mut GpuBuffer> {
        self.buffers.get_mut(&handle)
    }

    #[must_use]
    pub fn program(&self, handle: ProgramHandle) -> Option<&Program> {
        self.programs.get(&handle)
    }

    #[must_use]
    pub fn query(&self, handle: QueryHandle) -> Option<&Query> {
        self.queries.get(&handle)
    }

    #[must_use]
    pub fn query_mut(&mut self, handle: QueryHandle) -> Option<&mut Query> {
        self.queries.get_mut(&handle)
    }

    /// Sampled bindless handle of a texture; the null-texture slot when the
    /// handle is stale.
    #[must_use]
    pub fn bindless_handle(&self, handle: TextureHandle) -> BindlessHandle {
        if let Some(t) = self.textures.get(&handle) {
            return t.slot.read_handle();
        }
        self.pending_slots
            .lock()
            .get(&handle.0)
            .map_or(NULL_TEXTURE_SLOT.read_handle(), |s| s.read_handle())
    }

    /// Storage bindless handle of a compute-writable texture.
    #[must_use]
    pub fn rw_bindless_handle(&self, handle: TextureHandle) -> RwBindlessHandle {
        if let Some(t) = self.textures.get(&handle) {
            return t.slot.write_handle();
        }
        self.pending_slots
            .lock()
            .get(&handle.0)
            .map_or(NULL_TEXTURE_SLOT.write_handle(), |s| s.write_handle())
    }

    /// Sampled bindless handle of a buffer.
    #[must_use]
    pub fn buffer_bindless_handle(&self, handle: BufferHandle) -> BindlessHandle {
        if let Some(b) = self.buffers.get(&handle) {
            return b.slot.read_handle();
        }
        self.pending_slots
            .lock()
            .get(&handle.0)
            .map_or(NULL_BUFFER_SLOT.read_handle(), |s| s.read_handle())
    }

    /// Storage bindless handle of a shader buffer.
    #[must_use]
    pub fn buffer_rw_bindless_handle(&self, handle: BufferHandle) -> RwBindlessHandle {
        if let Some(b) = self.buffers.get(&handle) {
            return b.slot.write_handle();
        }
        self.pending_slots
            .lock()
            .get(&handle.0)
            .map_or(NULL_BUFFER_SLOT.write_handle(), |s| s.write_handle())
    }

    // ── Uploads & copies (render thread, recorded into the frame encoder) ──

    /// Writes `data` into a device-heap buffer through the frame scratch,
    /// bracketed by state transitions on the lazy tracker.
    pub fn update_buffer(&mut self, handle: BufferHandle, data: &[u8]) {
        self.check_render_thread();
        let Some(buffer) = self.buffers.get_mut(&handle) else {
            log::error!("update_buffer: stale handle");
            return;
        };
        if let Some(mirror) = &mut buffer.mapped {
            mirror[..data.len()].copy_from_slice(data);
        }
        let old = buffer.set_state(ResourceState::CopyDst);
        let offset = self.frames[self.frame_index].scratch.alloc(data);
        let encoder = self
            .encoder
            .as_mut()
            .expect("update_buffer outside a frame");
        encoder.copy_buffer_to_buffer(
            &self.frames[self.frame_index].scratch.gpu,
            offset,
            &self.buffers[&handle].buffer,
            0,
            data.len() as u64,
        );
        self.buffers.get_mut(&handle).unwrap().set_state(old);
    }

    /// Uploads one mip region of a texture through the frame scratch with
    /// 256-byte row alignment.
    pub fn update_texture(
        &mut self,
        handle: TextureHandle,
        mip: u32,
        x: u32,
        y: u32,
        z: u32,
        width: u32,
        height: u32,
        data: &[u8],
    ) {
        self.check_render_thread();
        let Some(texture) = self.textures.get_mut(&handle) else {
            log::error!("update_texture: stale handle");
            return;
        };
        let desc = FormatDesc::of(texture.desc.format);
        let row_bytes = desc.row_bytes(width);
        let rows = desc.row_count(height);
        let padded = row_bytes.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

        let old = texture.set_state(ResourceState::CopyDst);

        // Repack rows with copy alignment into the scratch.
        let mut staged = vec![0u8; (padded * rows) as usize];
        for row in 0..rows {
            let src = (row * row_bytes) as usize;
            let dst = (row * padded) as usize;
            staged[dst..dst + row_bytes as usize]
                .copy_from_slice(&data[src..src + row_bytes as usize]);
        }
        let offset = self.frames[self.frame_index].scratch.alloc(&staged);

        let texture_ref = &self.textures[&handle];
        let encoder = self
            .encoder
            .as_mut()
            .expect("update_texture outside a frame");
        encoder.copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer: &self.frames[self.frame_index].scratch.gpu,
                layout: wgpu::TexelCopyBufferLayout {
                    offset,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(rows),
                },
            },
            wgpu::TexelCopyTextureInfo {
                texture: &texture_ref.texture,
                mip_level: mip,
                origin: wgpu::Origin3d { x, y, z },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.textures.get_mut(&handle).unwrap().set_state(old);
    }

    /// Copies matching mips and layers from `src` into `dst` at the given
    /// offset (cubemap faces included).
    pub fn copy_texture(&mut self, dst: TextureHandle, src: TextureHandle, dst_x: u32, dst_y: u32) {
        self.check_render_thread();
        let (Some(_), Some(_)) = (self.textures.get(&dst), self.textures.get(&src)) else {
            log::error!("copy_texture: stale handle");
            return;
        };
        let src_old = self.textures.get_mut(&src).unwrap().set_state(ResourceState::CopySrc);
        let dst_old = self.textures.get_mut(&dst).unwrap().set_state(ResourceState::CopyDst);

        let src_tex = &self.textures[&src];
        let dst_tex = &self.textures[&dst];
        let layers = if src_tex.desc.flags.contains(TextureFlags::IS_CUBE) {
            6
        } else {
            1
        };
        let mips = src_tex.desc.mip_count.min(dst_tex.desc.mip_count);
        let encoder = self.encoder.as_mut().expect("copy_texture outside a frame");
        for mip in 0..mips {
            let width = (src_tex.desc.width >> mip).max(1);
            let height = (src_tex.desc.height >> mip).max(1);
            encoder.copy_texture_to_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &src_tex.texture,
                    mip_level: mip,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyTextureInfo {
                    texture: &dst_tex.texture,
                    mip_level: mip,
                    origin: wgpu::Origin3d {
                        x: dst_x >> mip,
                        y: dst_y >> mip,
                        z: 0,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: layers,
                },
            );
        }

        self.textures.get_mut(&src).unwrap().set_state(src_old);
        self.textures.get_mut(&dst).unwrap().set_state(dst_old);
    }

    /// Places a texture's mip 0 into a linear buffer using the API's
    /// padded row layout.
    pub fn copy_texture_to_buffer(&mut self, dst: BufferHandle, src: TextureHandle) {
        self.check_render_thread();
        let (Some(_), Some(_)) = (self.buffers.get(&dst), self.textures.get(&src)) else {
            log::error!("copy_texture_to_buffer: stale handle");
            return;
        };
        let src_old = self.textures.get_mut(&src).unwrap().set_state(ResourceState::CopySrc);
        let dst_old = self.buffers.get_mut(&dst).unwrap().set_state(ResourceState::CopyDst);

        let texture = &self.textures[&src];
        let desc = FormatDesc::of(texture.desc.format);
        let padded = desc
            .row_bytes(texture.desc.width)
            .next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let rows = desc.row_count(texture.desc.height);
        let encoder = self
            .encoder
            .as_mut()
            .expect("copy_texture_to_buffer outside a frame");
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.buffers[&dst].buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(rows),
                },
            },
            wgpu::Extent3d {
                width: texture.desc.width,
                height: texture.desc.height,
                depth_or_array_layers: 1,
            },
        );

        self.textures.get_mut(&src).unwrap().set_state(src_old);
        self.buffers.get_mut(&dst).unwrap().set_state(dst_old);
    }

    /// Schedules an asynchronous GPU→CPU texture read. The callback fires
    /// with tightly packed rows when the current frame retires.
    pub fn read_texture(
        &mut self,
        handle: TextureHandle,
        callback: ReadbackCallback,
    ) -> ReadbackHandle {
        self.check_render_thread();
        let Some(texture) = self.textures.get_mut(&handle) else {
            log::error!("read_texture: stale handle");
            return ReadbackHandle(0);
        };
        let desc = FormatDesc::of(texture.desc.format);
        let row_bytes = desc.row_bytes(texture.desc.width);
        let rows = desc.row_count(texture.desc.height);
        let layers = if texture.desc.flags.contains(TextureFlags::IS_CUBE) {
            6
        } else {
            1
        };
        let padded = row_bytes.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

        let old = texture.set_state(ResourceState::CopySrc);

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("texture_readback"),
            size: u64::from(padded) * u64::from(rows) * u64::from(layers),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let texture_ref = &self.textures[&handle];
        let encoder = self.encoder.as_mut().expect("read_texture outside a frame");
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &texture_ref.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(rows),
                },
            },
            wgpu::Extent3d {
                width: texture_ref.desc.width,
                height: texture_ref.desc.height,
                depth_or_array_layers: layers,
            },
        );
        self.textures.get_mut(&handle).unwrap().set_state(old);

        let id = next_handle();
        self.frames[self.frame_index].texture_reads.push(TextureRead {
            id,
            staging,
            padded_row_bytes: padded,
            row_bytes,
            rows,
            layers,
            callback: Some(callback),
        });
        ReadbackHandle(id)
    }

    /// Schedules an asynchronous GPU→CPU buffer read of the whole buffer.
    /// The callback fires with the contents when the current frame
    /// retires.
    pub fn read_buffer(
        &mut self,
        handle: BufferHandle,
        callback: ReadbackCallback,
    ) -> ReadbackHandle {
        self.check_render_thread();
        let Some(buffer) = self.buffers.get_mut(&handle) else {
            log::error!("read_buffer: stale handle");
            return ReadbackHandle(0);
        };
        let size = buffer.size;
        let old = buffer.set_state(ResourceState::CopySrc);

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("buffer_readback"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let encoder = self.encoder.as_mut().expect("read_buffer outside a frame");
        encoder.copy_buffer_to_buffer(&self.buffers[&handle].buffer, 0, &staging, 0, size);
        self.buffers.get_mut(&handle).unwrap().set_state(old);

        // One tight row: the texture-read unpack path degenerates to a
        // straight copy.
        let id = next_handle();
        self.frames[self.frame_index].texture_reads.push(TextureRead {
            id,
            staging,
            padded_row_bytes: size as u32,
            row_bytes: size as u32,
            rows: 1,
            layers: 1,
            callback: Some(callback),
        });
        ReadbackHandle(id)
    }

    /// Unregisters a pending readback's callback. In-flight GPU work still
    /// completes; only the notification is dropped.
    pub fn cancel_readback(&mut self, handle: ReadbackHandle) {
        for frame in &mut self.frames {
            for read in &mut frame.texture_reads {
                if read.id == handle.0 {
                    read.callback = None;
                    return;
                }
            }
        }
    }

    // ── Frame lifecycle ─────────────────────────────────────────────────────

    /// Index of the current frame slot.
    #[must_use]
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Monotonic frame counter.
    #[must_use]
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// Current frame slot.
    #[must_use]
    pub fn current_frame(&mut self) -> &mut Frame {
        &mut self.frames[self.frame_index]
    }

    /// Native objects queued in any frame slot's graveyard, still awaiting
    /// fence retirement. Zero right after a full flush.
    #[must_use]
    pub fn pending_release_count(&self) -> usize {
        self.frames.iter().map(|f| f.to_release.len()).sum()
    }

    /// Command encoder of the current frame.
    ///
    /// # Panics
    ///
    /// Panics when called outside `begin_frame`/`end_frame`.
    #[must_use]
    pub fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        self.check_render_thread();
        self.encoder.as_mut().expect("no frame in progress")
    }

    /// Acquires the current frame slot: stalls iff the CPU is
    /// `NUM_BACKBUFFERS - 1` frames ahead, then retires that slot's
    /// deferred work.
    pub fn begin_frame(&mut self) {
        self.check_render_thread();
        let index = self.frame_index;
        let frame = &mut self.frames[index];
        frame.begin(
            &self.device,
            &self.heap,
            &mut self.queries,
            &mut self.query_pool,
            index,
        );
        self.heap.next_frame(index as u32);
        self.attachment_ring.next_frame();
        self.encoder = Some(self.device.create_command_encoder(
            &wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            },
        ));
    }

    /// Closes the current frame: resolves queries, submits, signals the
    /// fence, fires capture triggers.
    pub fn end_frame(&mut self) {
        self.check_render_thread();
        let encoder = self.encoder.take().expect("end_frame without begin_frame");
        let index = self.frame_index;
        let capture = self.frames[index].capture_requested;
        self.frames[index].end(&self.queue, encoder, &self.query_pool, index);
        if capture {
            if let Some(trigger) = &self.capture_trigger {
                trigger();
            }
        }
    }

    /// Presents all windows drawn this frame and advances the ring.
    pub fn present(&mut self) {
        self.check_render_thread();
        self.frame_counter += 1;
        self.swapchains.present(self.frame_counter);
        self.frame_index = (self.frame_index + 1) % NUM_BACKBUFFERS;
    }

    /// Blocks until every in-flight frame retires and runs their deferred
    /// releases.
    pub fn flush_all(&mut self) {
        self.check_render_thread();
        for i in 0..NUM_BACKBUFFERS {
            let frame = &mut self.frames[i];
            frame.begin(
                &self.device,
                &self.heap,
                &mut self.queries,
                &mut self.query_pool,
                i,
            );
        }
    }

    /// Toggles vsync: flushes the ring, then reconfigures every swapchain.
    pub fn set_vsync(&mut self, vsync: bool) {
        self.check_render_thread();
        {
            let mut current = self.vsync.lock();
            if *current == vsync {
                return;
            }
            *current = vsync;
        }
        self.flush_all();
        self.swapchains.set_vsync(&self.device, vsync);
    }

    #[must_use]
    pub fn vsync(&self) -> bool {
        *self.vsync.lock()
    }

    /// Resizes a window's swapchain. All frame fences are observed signaled
    /// before the buffers are recreated.
    pub fn resize_window(&mut self, id: WindowId, width: u32, height: u32) {
        self.check_render_thread();
        self.flush_all();
        self.swapchains.resize(&self.device, id, width, height);
    }

    /// Installs an external capture trigger.
    pub fn set_capture_trigger(&mut self, trigger: CaptureTrigger) {
        self.capture_trigger = Some(trigger);
    }

    /// Requests a capture of the current frame.
    pub fn request_capture(&mut self) {
        self.frames[self.frame_index].capture_requested = true;
    }
}
