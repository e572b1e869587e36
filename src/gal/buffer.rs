//! GAL Buffers
//!
//! Mappable buffers live in the upload heap and expose a persistent CPU
//! copy; non-mappable buffers live in the device heap and are updated
//! through the current frame's scratch upload buffer.

use bitflags::bitflags;

use crate::gal::heaps::BindlessSlot;
use crate::gal::texture::{ResourceState, StateTag};

bitflags! {
    /// Creation flags for GAL buffers.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct BufferFlags: u32 {
        /// CPU-visible; keeps a persistent write-through pointer.
        const MAPPABLE      = 1 << 0;
        /// Bindable as a structured/storage buffer (gets a UAV view).
        const SHADER_BUFFER = 1 << 1;
    }
}

/// A GAL buffer: native resource + state tag + bindless slot.
pub struct GpuBuffer {
    pub buffer: wgpu::Buffer,
    pub size: u64,
    pub flags: BufferFlags,
    pub slot: BindlessSlot,
    pub state: StateTag,
    /// Persistent CPU mirror for `MAPPABLE` buffers. Writes go here and are
    /// flushed through the scratch buffer on the next update command.
    pub mapped: Option<Vec<u8>>,
    pub debug_name: String,
}

impl GpuBuffer {
    #[must_use]
    pub fn initial_state(flags: BufferFlags) -> ResourceState {
        if flags.contains(BufferFlags::SHADER_BUFFER) {
            ResourceState::UnorderedAccess
        } else {
            ResourceState::GenericRead
        }
    }

    /// Native usage bits implied by the creation flags.
    #[must_use]
    pub fn usages(flags: BufferFlags) -> wgpu::BufferUsages {
        let mut usage = wgpu::BufferUsages::COPY_DST
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::VERTEX
            | wgpu::BufferUsages::INDEX
            | wgpu::BufferUsages::UNIFORM;
        if flags.contains(BufferFlags::SHADER_BUFFER) {
            usage |= wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::INDIRECT;
        }
        usage
    }

    /// Records a state transition, returning the previous state.
    pub fn set_state(&mut self, new_state: ResourceState) -> ResourceState {
        self.state.set(new_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_buffers_get_storage_usage() {
        assert!(GpuBuffer::usages(BufferFlags::SHADER_BUFFER).contains(wgpu::BufferUsages::STORAGE));
        assert!(!GpuBuffer::usages(BufferFlags::empty()).contains(wgpu::BufferUsages::STORAGE));
    }
}
