//! Frame Slots
//!
//! `NUM_BACKBUFFERS` frames ride in flight. Each [`Frame`] owns its own
//! submission fence, scratch upload buffer, CPU bump arena, query readback
//! buffers, deferred-release lists, and pending texture reads.
//!
//! `begin()` is the renderer's only steady-state blocking point: it waits
//! on this slot's fence (a CPU stall iff the CPU is more than
//! `NUM_BACKBUFFERS - 1` frames ahead), resolves queries, fires readback
//! callbacks, then releases everything the retired frame deferred.

use bumpalo::Bump;
use rustc_hash::FxHashMap;

use crate::gal::heaps::{BindlessHeap, BindlessSlot};
use crate::gal::query::{Query, QueryPool, QUERY_CAPACITY};
use crate::gal::QueryHandle;

/// Callback invoked with tightly packed texel rows once a texture read
/// completes.
pub type ReadbackCallback = Box<dyn FnOnce(&[u8]) + Send>;

/// Opaque handle used to cancel a pending texture read.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ReadbackHandle(pub(crate) u64);

/// Native objects whose release is deferred until the frame retires.
pub enum DeferredRelease {
    Texture(wgpu::Texture),
    Buffer(wgpu::Buffer),
}

/// A pending GPU→CPU texture read.
pub struct TextureRead {
    pub id: u64,
    pub staging: wgpu::Buffer,
    /// Padded row pitch used by the copy (256-byte aligned).
    pub padded_row_bytes: u32,
    /// Tight row size handed to the callback.
    pub row_bytes: u32,
    pub rows: u32,
    pub layers: u32,
    pub callback: Option<ReadbackCallback>,
}

/// A query awaiting resolve in this frame's readback range.
pub struct QueryResolve {
    pub query: QueryHandle,
    /// Slot inside this frame's region of the query set.
    pub slot: u32,
}

/// Monotonic bump allocator over a per-frame upload buffer. CPU writes land
/// in the staging mirror; `flush` pushes the used range to the GPU ring in
/// one write before submit.
pub struct ScratchBuffer {
    pub gpu: wgpu::Buffer,
    staging: Vec<u8>,
    cursor: usize,
    capacity: usize,
}

/// Alignment of every scratch allocation (uniform offset alignment).
pub const SCRATCH_ALIGN: usize = 256;

impl ScratchBuffer {
    #[must_use]
    pub fn new(device: &wgpu::Device, capacity: usize, label: &str) -> Self {
        let gpu = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: capacity as u64,
            usage: wgpu::BufferUsages::UNIFORM
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            gpu,
            staging: vec![0; capacity],
            cursor: 0,
            capacity,
        }
    }

    /// Copies `data` into the scratch and returns its byte offset in the
    /// upload buffer. Overflow is a programming error: the scratch is sized
    /// for the worst-case per-frame upload volume.
    pub fn alloc(&mut self, data: &[u8]) -> u64 {
        let offset = self.cursor;
        let end = offset + data.len();
        assert!(end <= self.capacity, "frame scratch buffer overflow");
        self.staging[offset..end].copy_from_slice(data);
        self.cursor = end.next_multiple_of(SCRATCH_ALIGN);
        offset as u64
    }

    /// Bytes currently used.
    #[must_use]
    pub fn used(&self) -> usize {
        self.cursor
    }

    /// Uploads the used range. Called once right before submit.
    pub fn flush(&self, queue: &wgpu::Queue) {
        if self.cursor > 0 {
            queue.write_buffer(&self.gpu, 0, &self.staging[..self.cursor]);
        }
    }

    /// Resets the bump pointer. The previous contents are safe to overwrite
    /// because the frame that used them has retired.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}

/// One element of the in-flight frame ring.
pub struct Frame {
    /// Fence of the last submission that used this slot.
    pub fence: Option<wgpu::SubmissionIndex>,
    pub scratch: ScratchBuffer,
    /// CPU arena for readback packing and other frame-transient blobs.
    pub arena: Bump,

    pub to_release: Vec<DeferredRelease>,
    pub to_heap_release: Vec<BindlessSlot>,
    pub texture_reads: Vec<TextureRead>,
    pub to_resolve: Vec<QueryResolve>,
    pub to_resolve_stats: Vec<QueryResolve>,

    timestamp_resolve: wgpu::Buffer,
    timestamp_readback: wgpu::Buffer,
    stats_resolve: wgpu::Buffer,
    stats_readback: wgpu::Buffer,

    pub capture_requested: bool,
}

impl Frame {
    #[must_use]
    pub fn new(device: &wgpu::Device, scratch_capacity: usize) -> Self {
        let query_bytes = u64::from(QUERY_CAPACITY) * 8;
        let resolve = |label| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: query_bytes,
                usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        };
        let readback = |label| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: query_bytes,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            })
        };
        Self {
            fence: None,
            scratch: ScratchBuffer::new(device, scratch_capacity, "Frame Scratch"),
            arena: Bump::new(),
            to_release: Vec::new(),
            to_heap_release: Vec::new(),
            texture_reads: Vec::new(),
            to_resolve: Vec::new(),
            to_resolve_stats: Vec::new(),
            timestamp_resolve: resolve("Timestamp Resolve"),
            timestamp_readback: readback("Timestamp Readback"),
            stats_resolve: resolve("Stats Resolve"),
            stats_readback: readback("Stats Readback"),
            capture_requested: false,
        }
    }

    /// True when the GPU has finished this slot's last submission.
    #[must_use]
    pub fn is_finished(&self, device: &wgpu::Device) -> bool {
        match &self.fence {
            None => true,
            Some(idx) => device
                .poll(wgpu::PollType::Wait {
                    submission_index: Some(idx.clone()),
                    timeout: Some(std::time::Duration::ZERO),
                })
                .is_ok(),
        }
    }

    /// Blocks until this slot's fence signals.
    pub fn wait(&mut self, device: &wgpu::Device) {
        if let Some(idx) = self.fence.take() {
            if let Err(err) = device.poll(wgpu::PollType::Wait {
                submission_index: Some(idx),
                timeout: None,
            }) {
                log::error!("GPU wait failed: {err:?}");
            }
        }
    }

    /// Begins reuse of this slot: waits on the fence, resolves queries,
    /// fires readbacks, releases deferred resources, resets scratch.
    pub fn begin(
        &mut self,
        device: &wgpu::Device,
        heap: &BindlessHeap,
        queries: &mut FxHashMap<QueryHandle, Query>,
        query_pool: &mut QueryPool,
        frame_index: usize,
    ) {
        self.wait(device);

        // Query results from the retired use of this slot.
        if !self.to_resolve.is_empty() {
            Self::read_query_buffer(device, &self.timestamp_readback, &self.to_resolve, queries);
            self.to_resolve.clear();
        }
        if !self.to_resolve_stats.is_empty() {
            Self::read_query_buffer(device, &self.stats_readback, &self.to_resolve_stats, queries);
            self.to_resolve_stats.clear();
        }
        query_pool.reset(frame_index);

        // Completed texture reads: pack tight rows into arena memory and
        // invoke the callbacks.
        for mut read in self.texture_reads.drain(..) {
            let Some(callback) = read.callback.take() else {
                continue; // cancelled
            };
            let slice = read.staging.slice(..);
            let (tx, rx) = flume::bounded(1);
            slice.map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });
            let _ = device.poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            });
            if rx.recv().is_ok_and(|r| r.is_ok()) {
                let data = slice.get_mapped_range();
                let total = (read.row_bytes * read.rows * read.layers) as usize;
                let packed = self.arena.alloc_slice_fill_copy(total, 0u8);
                let mut dst = 0;
                for layer in 0..read.layers {
                    let layer_base = (layer * read.padded_row_bytes * read.rows) as usize;
                    for row in 0..read.rows {
                        let src = layer_base + (row * read.padded_row_bytes) as usize;
                        let n = read.row_bytes as usize;
                        packed[dst..dst + n].copy_from_slice(&data[src..src + n]);
                        dst += n;
                    }
                }
                drop(data);
                read.staging.unmap();
                callback(packed);
            } else {
                log::error!("texture readback mapping failed");
            }
        }

        // Deferred releases: safe now, nothing in flight references them.
        self.to_release.clear();
        for slot in self.to_heap_release.drain(..) {
            heap.release(slot);
        }

        self.scratch.reset();
        self.arena.reset();
    }

    /// Ends recording for this slot: resolves query ranges, flushes the
    /// scratch upload, submits, and signals the fence.
    pub fn end(
        &mut self,
        queue: &wgpu::Queue,
        mut encoder: wgpu::CommandEncoder,
        query_pool: &QueryPool,
        frame_index: usize,
    ) {
        if let Some(set) = &query_pool.timestamp_set {
            let used = query_pool.used(frame_index);
            if used > 0 {
                let first = frame_index as u32 * QUERY_CAPACITY;
                encoder.resolve_query_set(set, first..first + used, &self.timestamp_resolve, 0);
                encoder.copy_buffer_to_buffer(
                    &self.timestamp_resolve,
                    0,
                    &self.timestamp_readback,
                    0,
                    u64::from(used) * 8,
                );
            }
        }
        if let Some(set) = &query_pool.stats_set {
            let used = query_pool.stats_used(frame_index);
            if used > 0 {
                let first = frame_index as u32 * QUERY_CAPACITY;
                encoder.resolve_query_set(set, first..first + used, &self.stats_resolve, 0);
                encoder.copy_buffer_to_buffer(
                    &self.stats_resolve,
                    0,
                    &self.stats_readback,
                    0,
                    u64::from(used) * 8,
                );
            }
        }

        self.scratch.flush(queue);
        self.fence = Some(queue.submit(Some(encoder.finish())));
        self.capture_requested = false;
    }

    fn read_query_buffer(
        device: &wgpu::Device,
        readback: &wgpu::Buffer,
        resolves: &[QueryResolve],
        queries: &mut FxHashMap<QueryHandle, Query>,
    ) {
        let slice = readback.slice(..);
        let (tx, rx) = flume::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        });
        if rx.recv().is_ok_and(|r| r.is_ok()) {
            {
                let data = slice.get_mapped_range();
                for resolve in resolves {
                    if let Some(q) = queries.get_mut(&resolve.query) {
                        let base = (resolve.slot * 8) as usize;
                        let mut bytes = [0u8; 8];
                        bytes.copy_from_slice(&data[base..base + 8]);
                        q.result = u64::from_le_bytes(bytes);
                        q.ready = true;
                    }
                }
            }
            readback.unmap();
        }
    }
}
