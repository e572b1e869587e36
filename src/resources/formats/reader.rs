//! Little-endian binary cursor
//!
//! Shared by all format parsers. Reads fail with
//! [`PyreError::TruncatedFile`] instead of panicking, so a corrupt asset
//! parks its resource in the failed state rather than unwinding a frame.

use crate::errors::{PyreError, Result};

pub struct BinReader<'a> {
    bytes: &'a [u8],
    cursor: usize,
    /// Path used in error messages.
    path: &'a str,
}

impl<'a> BinReader<'a> {
    #[must_use]
    pub fn new(bytes: &'a [u8], path: &'a str) -> Self {
        Self {
            bytes,
            cursor: 0,
            path,
        }
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.cursor
    }

    pub fn bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.remaining() < count {
            return Err(PyreError::TruncatedFile(self.path.to_string()));
        }
        let slice = &self.bytes[self.cursor..self.cursor + count];
        self.cursor += count;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.bytes(2)?.try_into().unwrap()))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    pub fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    pub fn vec3(&mut self) -> Result<glam::Vec3> {
        Ok(glam::Vec3::new(self.f32()?, self.f32()?, self.f32()?))
    }

    pub fn quat(&mut self) -> Result<glam::Quat> {
        Ok(glam::Quat::from_xyzw(
            self.f32()?,
            self.f32()?,
            self.f32()?,
            self.f32()?,
        ))
    }

    /// `len(i32)` + UTF-8 bytes.
    pub fn string(&mut self) -> Result<String> {
        let len = self.i32()?;
        if len < 0 {
            return Err(PyreError::InvalidString(self.path.to_string()));
        }
        let bytes = self.bytes(len as usize)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| PyreError::InvalidString(self.path.to_string()))
    }
}

/// Little-endian writer mirroring [`BinReader`].
#[derive(Default)]
pub struct BinWriter {
    bytes: Vec<u8>,
}

impl BinWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn raw(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    pub fn u16(&mut self, v: u16) {
        self.raw(&v.to_le_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.raw(&v.to_le_bytes());
    }

    pub fn i32(&mut self, v: i32) {
        self.raw(&v.to_le_bytes());
    }

    pub fn f32(&mut self, v: f32) {
        self.raw(&v.to_le_bytes());
    }

    pub fn vec3(&mut self, v: glam::Vec3) {
        self.f32(v.x);
        self.f32(v.y);
        self.f32(v.z);
    }

    pub fn quat(&mut self, v: glam::Quat) {
        self.f32(v.x);
        self.f32(v.y);
        self.f32(v.z);
        self.f32(v.w);
    }

    pub fn string(&mut self, s: &str) {
        self.i32(s.len() as i32);
        self.raw(s.as_bytes());
    }
}
