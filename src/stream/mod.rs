//! Draw Stream
//!
//! A typed, append-only byte-code stream whose opcodes mirror the GAL. Any
//! thread records into its own stream; streams merge on the render thread
//! in submission order, and [`exec::execute`] drains the result into GAL
//! calls through a single dispatch loop.
//!
//! # Encoding
//!
//! One opcode byte, then a POD payload, then optional length-prefixed blob
//! data. Payloads are read back with unaligned POD reads, so no padding is
//! inserted between commands. Lambdas ride in a side list; their order in
//! the list matches the order of `Lambda` opcodes in the byte stream.

pub mod exec;

use crate::gal::heaps::BindlessHandle;
use crate::gal::{
    BufferFlags, BufferHandle, Gpu, ProgramHandle, QueryHandle, TextureFlags, TextureFormat,
    TextureHandle,
};

/// Backend escape hatch recorded with [`DrawStream::push_lambda`].
pub type StreamLambda = Box<dyn FnOnce(&mut Gpu) + Send>;

bitflags::bitflags! {
    /// Attachment clear selection.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct ClearFlags: u32 {
        const COLOR   = 1 << 0;
        const DEPTH   = 1 << 1;
        const STENCIL = 1 << 2;
        const ALL     = Self::COLOR.bits() | Self::DEPTH.bits() | Self::STENCIL.bits();
    }
}

/// Decoded clear request, tracked by the executor until a pass opens.
#[derive(Clone, Copy, Debug)]
pub struct ClearCmdState {
    pub flags: ClearFlags,
    pub color: [f32; 4],
    pub depth: f32,
    pub stencil: u32,
}

/// Draw stream opcodes. Payload layouts live next to each variant's
/// recording method.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Op {
    CreateBuffer = 0,
    CreateTexture,
    CreateTextureView,
    DestroyBuffer,
    DestroyTexture,
    UpdateBuffer,
    UpdateTexture,
    BindVertexBuffer,
    BindIndexBuffer,
    BindIndirectBuffer,
    BindUniformData,
    BindUniformBuffer,
    BindShaderBuffers,
    SetFramebuffer,
    Viewport,
    Scissor,
    Clear,
    UseProgram,
    DrawArrays,
    DrawArraysInstanced,
    DrawIndexed,
    DrawIndexedInstanced,
    DrawIndirect,
    Dispatch,
    CopyTexture,
    BarrierRead,
    BarrierWrite,
    MemoryBarrier,
    BeginDebugGroup,
    EndDebugGroup,
    BeginQuery,
    EndQuery,
    Timestamp,
    Lambda,
}

impl Op {
    fn from_u8(v: u8) -> Op {
        assert!(v <= Op::Lambda as u8, "corrupt draw stream opcode {v}");
        // Contiguous discriminants starting at 0.
        unsafe { std::mem::transmute(v) }
    }
}

// ─── Payload records ──────────────────────────────────────────────────────────

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct CreateBufferCmd {
    pub handle: BufferHandle,
    pub size: u64,
    pub flags: u32,
    pub has_data: u32,
}

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct CreateTextureCmd {
    pub handle: TextureHandle,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub format: u32,
    pub flags: u32,
    pub _pad: u32,
}

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct CreateTextureViewCmd {
    pub handle: TextureHandle,
    pub src: TextureHandle,
}

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct UpdateTextureCmd {
    pub handle: TextureHandle,
    pub mip: u32,
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct BindVertexBufferCmd {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub slot: u32,
    pub stride: u32,
}

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct BindIndexBufferCmd {
    pub buffer: BufferHandle,
    pub u16_indices: u32,
    pub _pad: u32,
}

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct BindUniformBufferCmd {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub slot: u32,
    pub size: u32,
}

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct SetFramebufferCmd {
    pub colors: [TextureHandle; 8],
    pub depth_stencil: TextureHandle,
    pub color_count: u32,
    pub readonly_ds: u32,
}

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct RectCmd {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct ClearCmd {
    pub flags: u32,
    pub color: [f32; 4],
    pub depth: f32,
    pub stencil: u32,
    pub _pad: u32,
}

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct DrawCmd {
    pub first: u32,
    pub count: u32,
    pub instance_count: u32,
    pub _pad: u32,
}

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct DrawIndirectCmd {
    pub buffer: BufferHandle,
    pub offset: u64,
}

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct DispatchCmd {
    pub program: ProgramHandle,
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub _pad: u32,
}

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct CopyTextureCmd {
    pub dst: TextureHandle,
    pub src: TextureHandle,
    pub dst_x: u32,
    pub dst_y: u32,
}

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct BarrierCmd {
    pub handle: u64,
    pub is_buffer: u32,
    pub _pad: u32,
}

// ─── Stream ───────────────────────────────────────────────────────────────────

/// Append-only command stream. Cheap to create per thread per frame.
#[derive(Default)]
pub struct DrawStream {
    bytes: Vec<u8>,
    lambdas: Vec<StreamLambda>,
    commands: u32,
}

impl DrawStream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of commands recorded.
    #[must_use]
    pub fn command_count(&self) -> u32 {
        self.commands
    }

    /// Appends `other` after this stream's commands. Ordering across merged
    /// segments is the submission order chosen by the caller.
    pub fn merge(&mut self, mut other: DrawStream) {
        self.bytes.append(&mut other.bytes);
        self.lambdas.append(&mut other.lambdas);
        self.commands += other.commands;
    }

    fn op(&mut self, op: Op) {
        self.bytes.push(op as u8);
        self.commands += 1;
    }

    fn payload<T: bytemuck::Pod>(&mut self, value: &T) {
        self.bytes.extend_from_slice(bytemuck::bytes_of(value));
    }

    fn blob(&mut self, data: &[u8]) {
        self.payload(&(data.len() as u32));
        self.bytes.extend_from_slice(data);
    }

    // ── Resource lifetime ──────────────────────────────────────────────────

    pub fn create_buffer(
        &mut self,
        handle: BufferHandle,
        flags: BufferFlags,
        size: u64,
        data: Option<&[u8]>,
        name: &str,
    ) {
        self.op(Op::CreateBuffer);
        self.payload(&CreateBufferCmd {
            handle,
            size,
            flags: flags.bits(),
            has_data: u32::from(data.is_some()),
        });
        self.blob(name.as_bytes());
        if let Some(data) = data {
            self.blob(data);
        }
    }

    pub fn create_texture(
        &mut self,
        handle: TextureHandle,
        width: u32,
        height: u32,
        depth: u32,
        format: TextureFormat,
        flags: TextureFlags,
        name: &str,
    ) {
        self.op(Op::CreateTexture);
        self.payload(&CreateTextureCmd {
            handle,
            width,
            height,
            depth,
            format: format as u32,
            flags: flags.bits(),
            _pad: 0,
        });
        self.blob(name.as_bytes());
    }

    pub fn create_texture_view(&mut self, handle: TextureHandle, src: TextureHandle) {
        self.op(Op::CreateTextureView);
        self.payload(&CreateTextureViewCmd { handle, src });
    }

    pub fn destroy_buffer(&mut self, handle: BufferHandle) {
        self.op(Op::DestroyBuffer);
        self.payload(&handle);
    }

    pub fn destroy_texture(&mut self, handle: TextureHandle) {
        self.op(Op::DestroyTexture);
        self.payload(&handle);
    }

    pub fn update_buffer(&mut self, handle: BufferHandle, data: &[u8]) {
        self.op(Op::UpdateBuffer);
        self.payload(&handle);
        self.blob(data);
    }

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
        self.op(Op::UpdateTexture);
        self.payload(&UpdateTextureCmd {
            handle,
            mip,
            x,
            y,
            z,
            width,
            height,
        });
        self.blob(data);
    }

    // ── Binding ────────────────────────────────────────────────────────────

    pub fn bind_vertex_buffer(
        &mut self,
        slot: u32,
        buffer: BufferHandle,
        offset: u64,
        stride: u32,
    ) {
        self.op(Op::BindVertexBuffer);
        self.payload(&BindVertexBufferCmd {
            buffer,
            offset,
            slot,
            stride,
        });
    }

    pub fn bind_index_buffer(&mut self, buffer: BufferHandle, u16_indices: bool) {
        self.op(Op::BindIndexBuffer);
        self.payload(&BindIndexBufferCmd {
            buffer,
            u16_indices: u32::from(u16_indices),
            _pad: 0,
        });
    }

    pub fn bind_indirect_buffer(&mut self, buffer: BufferHandle) {
        self.op(Op::BindIndirectBuffer);
        self.payload(&buffer);
    }

    /// Uploads an anonymous uniform block to `slot` through the frame
    /// scratch at execution time.
    pub fn bind_uniform_data(&mut self, slot: u32, data: &[u8]) {
        self.op(Op::BindUniformData);
        self.payload(&slot);
        self.blob(data);
    }

    /// Typed convenience over [`bind_uniform_data`](Self::bind_uniform_data).
    pub fn bind_uniform<T: bytemuck::Pod>(&mut self, slot: u32, value: &T) {
        self.bind_uniform_data(slot, bytemuck::bytes_of(value));
    }

    pub fn bind_uniform_buffer(
        &mut self,
        slot: u32,
        buffer: BufferHandle,
        offset: u64,
        size: u32,
    ) {
        self.op(Op::BindUniformBuffer);
        self.payload(&BindUniformBufferCmd {
            buffer,
            offset,
            slot,
            size,
        });
    }

    /// Binds up to 8 storage buffers into the bounded shader-buffer table.
    pub fn bind_shader_buffers(&mut self, buffers: &[BufferHandle]) {
        assert!(buffers.len() <= 8);
        let mut table = [BufferHandle::INVALID; 8];
        table[..buffers.len()].copy_from_slice(buffers);
        self.op(Op::BindShaderBuffers);
        self.payload(&table);
    }

    // ── Render state ───────────────────────────────────────────────────────

    pub fn set_framebuffer(
        &mut self,
        colors: &[TextureHandle],
        depth_stencil: Option<TextureHandle>,
        readonly_ds: bool,
    ) {
        assert!(colors.len() <= 8, "too many color attachments");
        let mut cmd = SetFramebufferCmd {
            colors: [TextureHandle::INVALID; 8],
            depth_stencil: depth_stencil.unwrap_or(TextureHandle::INVALID),
            color_count: colors.len() as u32,
            readonly_ds: u32::from(readonly_ds),
        };
        cmd.colors[..colors.len()].copy_from_slice(colors);
        self.op(Op::SetFramebuffer);
        self.payload(&cmd);
    }

    pub fn viewport(&mut self, x: i32, y: i32, w: i32, h: i32) {
        self.op(Op::Viewport);
        self.payload(&RectCmd { x, y, w, h });
    }

    pub fn scissor(&mut self, x: i32, y: i32, w: i32, h: i32) {
        self.op(Op::Scissor);
        self.payload(&RectCmd { x, y, w, h });
    }

    pub fn clear(&mut self, flags: ClearFlags, color: [f32; 4], depth: f32, stencil: u32) {
        self.op(Op::Clear);
        self.payload(&ClearCmd {
            flags: flags.bits(),
            color,
            depth,
            stencil,
            _pad: 0,
        });
    }

    pub fn use_program(&mut self, program: ProgramHandle) {
        self.op(Op::UseProgram);
        self.payload(&program);
    }

    // ── Draws ──────────────────────────────────────────────────────────────

    pub fn draw_arrays(&mut self, first: u32, count: u32) {
        self.op(Op::DrawArrays);
        self.payload(&DrawCmd {
            first,
            count,
            instance_count: 1,
            _pad: 0,
        });
    }

    pub fn draw_arrays_instanced(&mut self, count: u32, instance_count: u32) {
        self.op(Op::DrawArraysInstanced);
        self.payload(&DrawCmd {
            first: 0,
            count,
            instance_count,
            _pad: 0,
        });
    }

    pub fn draw_indexed(&mut self, first: u32, count: u32) {
        self.op(Op::DrawIndexed);
        self.payload(&DrawCmd {
            first,
            count,
            instance_count: 1,
            _pad: 0,
        });
    }

    pub fn draw_indexed_instanced(&mut self, count: u32, instance_count: u32) {
        self.op(Op::DrawIndexedInstanced);
        self.payload(&DrawCmd {
            first: 0,
            count,
            instance_count,
            _pad: 0,
        });
    }

    pub fn draw_indirect(&mut self, buffer: BufferHandle, offset: u64) {
        self.op(Op::DrawIndirect);
        self.payload(&DrawIndirectCmd { buffer, offset });
    }

    pub fn dispatch(&mut self, program: ProgramHandle, x: u32, y: u32, z: u32) {
        self.op(Op::Dispatch);
        self.payload(&DispatchCmd {
            program,
            x,
            y,
            z,
            _pad: 0,
        });
    }

    pub fn copy_texture(
        &mut self,
        dst: TextureHandle,
        src: TextureHandle,
        dst_x: u32,
        dst_y: u32,
    ) {
        self.op(Op::CopyTexture);
        self.payload(&CopyTextureCmd {
            dst,
            src,
            dst_x,
            dst_y,
        });
    }

    // ── Barriers ───────────────────────────────────────────────────────────

    pub fn barrier_read_texture(&mut self, texture: TextureHandle) {
        self.op(Op::BarrierRead);
        self.payload(&BarrierCmd {
            handle: texture.0,
            is_buffer: 0,
            _pad: 0,
        });
    }

    pub fn barrier_write_texture(&mut self, texture: TextureHandle) {
        self.op(Op::BarrierWrite);
        self.payload(&BarrierCmd {
            handle: texture.0,
            is_buffer: 0,
            _pad: 0,
        });
    }

    pub fn memory_barrier_texture(&mut self, texture: TextureHandle) {
        self.op(Op::MemoryBarrier);
        self.payload(&BarrierCmd {
            handle: texture.0,
            is_buffer: 0,
            _pad: 0,
        });
    }

    pub fn barrier_read_buffer(&mut self, buffer: BufferHandle) {
        self.op(Op::BarrierRead);
        self.payload(&BarrierCmd {
            handle: buffer.0,
            is_buffer: 1,
            _pad: 0,
        });
    }

    pub fn barrier_write_buffer(&mut self, buffer: BufferHandle) {
        self.op(Op::BarrierWrite);
        self.payload(&BarrierCmd {
            handle: buffer.0,
            is_buffer: 1,
            _pad: 0,
        });
    }

    pub fn memory_barrier_buffer(&mut self, buffer: BufferHandle) {
        self.op(Op::MemoryBarrier);
        self.payload(&BarrierCmd {
            handle: buffer.0,
            is_buffer: 1,
            _pad: 0,
        });
    }

    // ── Debug & profiling ──────────────────────────────────────────────────

    pub fn begin_debug_group(&mut self, name: &str) {
        self.op(Op::BeginDebugGroup);
        self.blob(name.as_bytes());
    }

    pub fn end_debug_group(&mut self) {
        self.op(Op::EndDebugGroup);
    }

    pub fn begin_query(&mut self, query: QueryHandle) {
        self.op(Op::BeginQuery);
        self.payload(&query);
    }

    pub fn end_query(&mut self, query: QueryHandle) {
        self.op(Op::EndQuery);
        self.payload(&query);
    }

    pub fn timestamp(&mut self, query: QueryHandle) {
        self.op(Op::Timestamp);
        self.payload(&query);
    }

    /// Records a backend escape hatch executed in stream order on the
    /// render thread (e.g. handing native handles to a foreign upscaler).
    pub fn push_lambda(&mut self, f: impl FnOnce(&mut Gpu) + Send + 'static) {
        self.op(Op::Lambda);
        self.lambdas.push(Box::new(f));
    }
}

/// Cursor over a recorded stream's bytes.
pub(crate) struct StreamReader<'a> {
    bytes: &'a [u8],
    cursor: usize,
    lambdas: std::vec::IntoIter<StreamLambda>,
}

impl<'a> StreamReader<'a> {
    pub(crate) fn new(bytes: &'a [u8], lambdas: Vec<StreamLambda>) -> Self {
        Self {
            bytes,
            cursor: 0,
            lambdas: lambdas.into_iter(),
        }
    }

    pub(crate) fn next_op(&mut self) -> Option<Op> {
        if self.cursor >= self.bytes.len() {
            return None;
        }
        let op = Op::from_u8(self.bytes[self.cursor]);
        self.cursor += 1;
        Some(op)
    }

    pub(crate) fn read<T: bytemuck::Pod>(&mut self) -> T {
        let size = std::mem::size_of::<T>();
        let value = bytemuck::pod_read_unaligned(&self.bytes[self.cursor..self.cursor + size]);
        self.cursor += size;
        value
    }

    pub(crate) fn read_blob(&mut self) -> &'a [u8] {
        let len = self.read::<u32>() as usize;
        let bytes: &'a [u8] = self.bytes;
        let blob = &bytes[self.cursor..self.cursor + len];
        self.cursor += len;
        blob
    }

    pub(crate) fn read_str(&mut self) -> &'a str {
        std::str::from_utf8(self.read_blob()).unwrap_or("")
    }

    pub(crate) fn next_lambda(&mut self) -> Option<StreamLambda> {
        self.lambdas.next()
    }
}

impl DrawStream {
    pub(crate) fn into_parts(self) -> (Vec<u8>, Vec<StreamLambda>) {
        (self.bytes, self.lambdas)
    }
}

/// Convenience: the bindless handle payload type used inside uniform
/// blocks is re-exported here for recording code.
pub type UniformBindless = BindlessHandle;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_decode_in_recorded_order() {
        let mut stream = DrawStream::new();
        stream.begin_debug_group("pass");
        stream.viewport(0, 0, 640, 480);
        stream.draw_arrays(0, 3);
        stream.end_debug_group();
        assert_eq!(stream.command_count(), 4);

        let (bytes, lambdas) = stream.into_parts();
        let mut reader = StreamReader::new(&bytes, lambdas);
        assert_eq!(reader.next_op(), Some(Op::BeginDebugGroup));
        assert_eq!(reader.read_str(), "pass");
        assert_eq!(reader.next_op(), Some(Op::Viewport));
        let rect: RectCmd = reader.read();
        assert_eq!((rect.w, rect.h), (640, 480));
        assert_eq!(reader.next_op(), Some(Op::DrawArrays));
        let draw: DrawCmd = reader.read();
        assert_eq!(draw.count, 3);
        assert_eq!(reader.next_op(), Some(Op::EndDebugGroup));
        assert_eq!(reader.next_op(), None);
    }

    #[test]
    fn merge_preserves_segment_order() {
        let mut a = DrawStream::new();
        a.viewport(0, 0, 1, 1);
        let mut b = DrawStream::new();
        b.viewport(0, 0, 2, 2);
        a.merge(b);

        let (bytes, lambdas) = a.into_parts();
        let mut reader = StreamReader::new(&bytes, lambdas);
        assert_eq!(reader.next_op(), Some(Op::Viewport));
        assert_eq!(reader.read::<RectCmd>().w, 1);
        assert_eq!(reader.next_op(), Some(Op::Viewport));
        assert_eq!(reader.read::<RectCmd>().w, 2);
    }

    #[test]
    fn uniform_payload_round_trips() {
        #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C)]
        struct Block {
            intensity: f32,
            _pad: [f32; 3],
        }
        let mut stream = DrawStream::new();
        stream.bind_uniform(
            5,
            &Block {
                intensity: 0.5,
                _pad: [0.0; 3],
            },
        );
        let (bytes, lambdas) = stream.into_parts();
        let mut reader = StreamReader::new(&bytes, lambdas);
        assert_eq!(reader.next_op(), Some(Op::BindUniformData));
        assert_eq!(reader.read::<u32>(), 5);
        let blob = reader.read_blob();
        let block: Block = bytemuck::pod_read_unaligned(blob);
        assert!((block.intensity - 0.5).abs() < f32::EPSILON);
    }
}
