//! Error Types
//!
//! The main error type [`PyreError`] covers GPU initialization failures,
//! resource decoding errors, and file-format violations. All public APIs
//! return [`Result<T>`], an alias for `std::result::Result<T, PyreError>`.
//!
//! Render calls themselves never surface errors by unwinding: a failed
//! resource parks in its failed state and downstream consumers degrade to
//! no-ops (see the resource hub).

use thiserror::Error;

use crate::utils::hash::StableHash;

/// The main error type for the Pyre renderer.
#[derive(Error, Debug)]
pub enum PyreError {
    // ========================================================================
    // GPU & Device Errors
    // ========================================================================
    /// Failed to request a compatible GPU adapter.
    #[error("Failed to request WGPU adapter: {0}")]
    AdapterRequestFailed(String),

    /// Failed to create the GPU device.
    #[error("Failed to create WGPU device: {0}")]
    DeviceCreateFailed(#[from] wgpu::RequestDeviceError),

    /// Window system error.
    #[error("Window system error: {0}")]
    WindowError(#[from] raw_window_handle::HandleError),

    /// Failed to create or configure a presentation surface.
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// The device was lost mid-frame. Fatal: callers log and abort the
    /// renderer rather than attempt recovery.
    #[error("GPU device lost: {0}")]
    DeviceLost(String),

    // ========================================================================
    // Resource Loading Errors
    // ========================================================================
    /// The requested resource was not found on disk.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// A binary resource file had an unexpected magic number.
    #[error("Bad magic in {path}: expected {expected:#010x}, got {got:#010x}")]
    BadMagic {
        /// File being parsed
        path: String,
        /// Expected magic value
        expected: u32,
        /// Value actually read
        got: u32,
    },

    /// A binary resource file carried an unsupported version.
    #[error("Unsupported version {version} in {path}")]
    UnsupportedVersion {
        /// File being parsed
        path: String,
        /// Version word read from the header
        version: u32,
    },

    /// A binary resource file ended before its declared contents.
    #[error("Truncated file: {0}")]
    TruncatedFile(String),

    /// Shader source failed to compile.
    #[error("Shader compile error in {path}: {message}")]
    ShaderCompile {
        /// Shader source path
        path: String,
        /// Compiler diagnostics
        message: String,
    },

    /// A cached shader blob did not match its recorded hash.
    #[error("Stale shader blob for hash {0:?}")]
    StaleShaderBlob(StableHash),

    // ========================================================================
    // I/O & Parsing Errors
    // ========================================================================
    /// File I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Metadata sidecar parse error.
    #[error("Metadata parse error: {0}")]
    MetadataError(#[from] serde_json::Error),

    /// Malformed UTF-8 in a string field of a binary format.
    #[error("Invalid string data in {0}")]
    InvalidString(String),
}

/// Alias for `Result<T, PyreError>`.
pub type Result<T> = std::result::Result<T, PyreError>;
