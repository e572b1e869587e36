//! Descriptor & Heap Managers
//!
//! Bindless SRV/UAV table, sampler set, and the per-frame transient
//! descriptor regions. Slots are CPU-side indices into a large descriptor
//! table; shaders receive them inside uniform blocks instead of per-draw
//! rebinding.
//!
//! # Invariants
//!
//! - A slot is stable from [`BindlessHeap::reserve`] until the frame that
//!   enqueued its release retires.
//! - Slots 0 and 1 are reserved at init for the null texture and the null
//!   buffer respectively.
//! - Transient allocations partition by frame index and never touch the
//!   free-list mutex; overflowing a transient region is a programming
//!   error (hard assert).

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::gal::NUM_BACKBUFFERS;

/// Stable bindless slot owned by exactly one resource.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BindlessSlot(pub(crate) u32);

/// Slot 0: SRV of the null texture.
pub const NULL_TEXTURE_SLOT: BindlessSlot = BindlessSlot(0);
/// Slot 1: SRV of the null buffer.
pub const NULL_BUFFER_SLOT: BindlessSlot = BindlessSlot(1);

impl BindlessSlot {
    /// Read (sampled) view of this slot, as written into uniform blocks.
    #[must_use]
    pub const fn read_handle(self) -> BindlessHandle {
        BindlessHandle(self.0)
    }

    /// Write (storage) view of this slot. Valid only for resources created
    /// with a compute-write flag.
    #[must_use]
    pub const fn write_handle(self) -> RwBindlessHandle {
        RwBindlessHandle(self.0)
    }

    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Shader-visible index of a sampled resource.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(transparent)]
pub struct BindlessHandle(pub u32);

/// Shader-visible index of a storage (read-write) resource.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(transparent)]
pub struct RwBindlessHandle(pub u32);

/// One frame's transient descriptor region.
struct TransientRegion {
    cursor: AtomicU32,
}

/// Handle to a contiguous transient descriptor range, valid for one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransientRange {
    pub frame: u32,
    pub first: u32,
    pub count: u32,
}

/// Bindless SRV/UAV heap: stable slots from a free list plus
/// backbuffer-indexed transient regions.
pub struct BindlessHeap {
    free: Mutex<Vec<u32>>,
    capacity: u32,
    transient_capacity: u32,
    transient: [TransientRegion; NUM_BACKBUFFERS],
    live: AtomicU32,
}

impl BindlessHeap {
    /// Creates a heap with `capacity` stable slots and
    /// `transient_capacity` descriptors per in-flight frame. Slots 0 and 1
    /// are pre-reserved for the null texture/buffer.
    #[must_use]
    pub fn new(capacity: u32, transient_capacity: u32) -> Self {
        assert!(capacity > 2, "bindless heap too small");
        // Free list pops from the back; push high indices first so low
        // slots are handed out in ascending order.
        let free: Vec<u32> = (2..capacity).rev().collect();
        Self {
            free: Mutex::new(free),
            capacity,
            transient_capacity,
            transient: std::array::from_fn(|_| TransientRegion {
                cursor: AtomicU32::new(0),
            }),
            live: AtomicU32::new(2),
        }
    }

    /// Allocates a stable slot. Thread-safe. Exhaustion is a programming
    /// error: the heap is sized at init for the content budget.
    #[must_use]
    pub fn reserve(&self) -> BindlessSlot {
        let id = self
            .free
            .lock()
            .pop()
            .expect("bindless descriptor heap exhausted");
        self.live.fetch_add(1, Ordering::Relaxed);
        BindlessSlot(id)
    }

    /// Returns a slot to the free list. Called from frame retirement only;
    /// callers go through the frame graveyard, never directly.
    pub fn release(&self, slot: BindlessSlot) {
        debug_assert!(slot.0 >= 2, "released a reserved null slot");
        self.free.lock().push(slot.0);
        self.live.fetch_sub(1, Ordering::Relaxed);
    }

    /// Allocates a contiguous descriptor range in frame `frame_index`'s
    /// transient region. Lock-free; regions partition by frame.
    #[must_use]
    pub fn alloc_transient(&self, frame_index: u32, count: u32) -> TransientRange {
        let region = &self.transient[frame_index as usize % NUM_BACKBUFFERS];
        let first = region.cursor.fetch_add(count, Ordering::Relaxed);
        assert!(
            first + count <= self.transient_capacity,
            "transient descriptor region overflow ({} + {count} > {})",
            first,
            self.transient_capacity
        );
        TransientRange {
            frame: frame_index,
            first,
            count,
        }
    }

    /// Rotates to the next frame's transient region. The previous region's
    /// allocations are assumed complete once that frame's fence signals.
    pub fn next_frame(&self, frame_index: u32) {
        self.transient[frame_index as usize % NUM_BACKBUFFERS]
            .cursor
            .store(0, Ordering::Relaxed);
    }

    /// Number of live stable slots (includes the two null slots).
    #[must_use]
    pub fn live_count(&self) -> u32 {
        self.live.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

/// Per-frame ring bookkeeping for render-target / depth-stencil views.
/// Each `set_framebuffer` writes fresh views; the ring only asserts the
/// per-frame budget and rotates with the backbuffer index.
pub struct AttachmentRing {
    capacity: u32,
    cursor: u32,
}

impl AttachmentRing {
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            cursor: 0,
        }
    }

    pub fn write(&mut self, count: u32) {
        self.cursor += count;
        assert!(
            self.cursor <= self.capacity,
            "attachment view ring overflow"
        );
    }

    pub fn next_frame(&mut self) {
        self.cursor = 0;
    }
}

/// Fixed sampler set, created once at init. Index layout is part of the
/// shader contract.
pub struct SamplerHeap {
    pub samplers: Vec<wgpu::Sampler>,
}

/// Indices into [`SamplerHeap::samplers`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u32)]
pub enum SamplerIndex {
    LinearWrap = 0,
    LinearClamp,
    PointWrap,
    PointClamp,
    Anisotropic,
    ShadowCompare,
}

impl SamplerHeap {
    #[must_use]
    pub fn new(device: &wgpu::Device) -> Self {
        let linear = |address: wgpu::AddressMode| wgpu::SamplerDescriptor {
            address_mode_u: address,
            address_mode_v: address,
            address_mode_w: address,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Linear,
            ..Default::default()
        };
        let point = |address: wgpu::AddressMode| wgpu::SamplerDescriptor {
            address_mode_u: address,
            address_mode_v: address,
            address_mode_w: address,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            ..Default::default()
        };
        let samplers = vec![
            device.create_sampler(&linear(wgpu::AddressMode::Repeat)),
            device.create_sampler(&linear(wgpu::AddressMode::ClampToEdge)),
            device.create_sampler(&point(wgpu::AddressMode::Repeat)),
            device.create_sampler(&point(wgpu::AddressMode::ClampToEdge)),
            device.create_sampler(&wgpu::SamplerDescriptor {
                anisotropy_clamp: 8,
                ..linear(wgpu::AddressMode::Repeat)
            }),
            device.create_sampler(&wgpu::SamplerDescriptor {
                compare: Some(wgpu::CompareFunction::GreaterEqual),
                ..linear(wgpu::AddressMode::ClampToEdge)
            }),
        ];
        Self { samplers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_slots_are_never_handed_out() {
        let heap = BindlessHeap::new(16, 8);
        for _ in 0..14 {
            let slot = heap.reserve();
            assert!(slot.index() >= 2);
        }
    }

    #[test]
    fn slots_are_stable_and_reusable_after_release() {
        let heap = BindlessHeap::new(16, 8);
        let a = heap.reserve();
        let b = heap.reserve();
        assert_ne!(a, b);
        let a_index = a.index();
        heap.release(a);
        // A later reservation may reuse the index, but b is untouched.
        let c = heap.reserve();
        assert_ne!(c, b);
        assert_eq!(c.index(), a_index);
    }

    #[test]
    fn transient_regions_partition_by_frame() {
        let heap = BindlessHeap::new(16, 64);
        let r0 = heap.alloc_transient(0, 8);
        let r1 = heap.alloc_transient(1, 8);
        assert_eq!(r0.first, 0);
        assert_eq!(r1.first, 0);
        let r0b = heap.alloc_transient(0, 4);
        assert_eq!(r0b.first, 8);
        heap.next_frame(0);
        assert_eq!(heap.alloc_transient(0, 4).first, 0);
    }

    #[test]
    #[should_panic(expected = "transient descriptor region overflow")]
    fn transient_overflow_asserts() {
        let heap = BindlessHeap::new(16, 8);
        let _ = heap.alloc_transient(0, 9);
    }
}
