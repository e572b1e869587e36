//! Texture Resources
//!
//! Runtime texture container (`.ptx`): a small header followed by tightly
//! packed mip 0 payload. Content conversion (DDS/TGA/PNG import) happens in
//! the asset pipeline, outside this crate; the runtime consumes only this
//! container.
//!
//! ```text
//! magic: u32 = 'PTX ', version: u32
//! width, height, depth: u32; format: u32; flags: u32
//! payload: layer-major tight rows, mip 0
//! ```

use crate::errors::{PyreError, Result};
use crate::gal::{FormatDesc, Gpu, TextureFlags, TextureFormat, TextureHandle};
use crate::resources::formats::{BinReader, BinWriter};
use crate::resources::resource::{ResourceHeader, ResourceState};
use crate::stream::DrawStream;

pub const MAGIC: u32 = u32::from_le_bytes(*b"PTX ");
pub const VERSION: u32 = 1;

/// Parsed `.ptx` header + payload.
#[derive(Clone, Debug, PartialEq)]
pub struct PtxFile {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub format: TextureFormat,
    pub flags: TextureFlags,
    pub payload: Vec<u8>,
}

fn format_from_u32(raw: u32) -> TextureFormat {
    match raw {
        0 => TextureFormat::R8,
        1 => TextureFormat::RG8,
        2 => TextureFormat::RGBA8,
        3 => TextureFormat::R16F,
        4 => TextureFormat::RG16F,
        5 => TextureFormat::RGBA16F,
        6 => TextureFormat::R32F,
        7 => TextureFormat::RG32F,
        8 => TextureFormat::RGBA32F,
        9 => TextureFormat::R11G11B10F,
        10 => TextureFormat::D32,
        11 => TextureFormat::D24S8,
        12 => TextureFormat::BC1,
        13 => TextureFormat::BC3,
        _ => TextureFormat::BC5,
    }
}

impl PtxFile {
    pub fn read(bytes: &[u8], path: &str) -> Result<PtxFile> {
        let mut r = BinReader::new(bytes, path);
        let magic = r.u32()?;
        if magic != MAGIC {
            return Err(PyreError::BadMagic {
                path: path.to_string(),
                expected: MAGIC,
                got: magic,
            });
        }
        let version = r.u32()?;
        if version > VERSION {
            return Err(PyreError::UnsupportedVersion {
                path: path.to_string(),
                version,
            });
        }
        let width = r.u32()?;
        let height = r.u32()?;
        let depth = r.u32()?;
        let format = format_from_u32(r.u32()?);
        let flags = TextureFlags::from_bits_truncate(r.u32()?);
        let expected = FormatDesc::of(format).layer_bytes(width, height) as usize
            * depth.max(1) as usize
            * if flags.contains(TextureFlags::IS_CUBE) { 6 } else { 1 };
        let payload = r.bytes(expected)?.to_vec();
        Ok(PtxFile {
            width,
            height,
            depth,
            format,
            flags,
            payload,
        })
    }

    #[must_use]
    pub fn write(&self) -> Vec<u8> {
        let mut w = BinWriter::new();
        w.u32(MAGIC);
        w.u32(VERSION);
        w.u32(self.width);
        w.u32(self.height);
        w.u32(self.depth);
        w.u32(self.format as u32);
        w.u32(self.flags.bits());
        w.raw(&self.payload);
        w.into_bytes()
    }
}

/// A loaded texture resource owning one GAL texture.
pub struct TextureResource {
    pub header: ResourceHeader,
    pub handle: TextureHandle,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl TextureResource {
    #[must_use]
    pub fn new(path: &str) -> Self {
        Self {
            header: ResourceHeader::new(path),
            handle: TextureHandle::INVALID,
            width: 0,
            height: 0,
            format: TextureFormat::RGBA8,
        }
    }

    /// Parses the container and records GAL texture creation + upload.
    pub fn load(&mut self, bytes: &[u8], gpu: &Gpu, stream: &mut DrawStream) -> bool {
        let file = match PtxFile::read(bytes, &self.header.path) {
            Ok(file) => file,
            Err(err) => {
                log::error!("{err}");
                return false;
            }
        };
        let handle = gpu.alloc_texture_handle();
        stream.create_texture(
            handle,
            file.width,
            file.height,
            file.depth,
            file.format,
            file.flags | TextureFlags::NO_MIPS,
            &self.header.path,
        );
        stream.update_texture(handle, 0, 0, 0, 0, file.width, file.height, &file.payload);
        self.handle = handle;
        self.width = file.width;
        self.height = file.height;
        self.format = file.format;
        self.header.size = bytes.len() as u64;
        true
    }

    /// Enqueues destruction of the GAL texture. The deferred-release queue
    /// keeps in-flight frames safe.
    pub fn unload(&mut self, stream: &mut DrawStream) {
        if self.handle.is_valid() {
            stream.destroy_texture(self.handle);
            self.handle = TextureHandle::INVALID;
        }
        self.header.state = ResourceState::Empty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_round_trip() {
        let file = PtxFile {
            width: 2,
            height: 2,
            depth: 1,
            format: TextureFormat::RGBA8,
            flags: TextureFlags::SRGB,
            payload: vec![0xab; 16],
        };
        let read = PtxFile::read(&file.write(), "t.ptx").unwrap();
        assert_eq!(read, file);
    }

    #[test]
    fn payload_size_is_validated() {
        let file = PtxFile {
            width: 4,
            height: 4,
            depth: 1,
            format: TextureFormat::RGBA8,
            flags: TextureFlags::empty(),
            payload: vec![0; 8], // too small for 4×4 RGBA8
        };
        assert!(matches!(
            PtxFile::read(&file.write(), "t.ptx"),
            Err(PyreError::TruncatedFile(_))
        ));
    }
}
