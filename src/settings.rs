//! Render Settings Configuration
//!
//! Configuration options consumed by [`Gpu::init`](crate::gal::Gpu) and the
//! pipeline. The engine is embeddable: settings are plain data with a
//! sensible [`Default`], no config-file machinery.
//!
//! # Example
//!
//! ```rust,ignore
//! use pyre::settings::RenderSettings;
//!
//! let settings = RenderSettings {
//!     vsync: false,
//!     clear_color: wgpu::Color { r: 0.1, g: 0.2, b: 0.3, a: 1.0 },
//!     ..Default::default()
//! };
//! ```

/// Configuration options for the rendering system.
///
/// | Field | Description | Default |
/// |-------|-------------|---------|
/// | `vsync` | Vertical sync enabled | `true` |
/// | `clear_color` | Background clear color | Black |
/// | `power_preference` | GPU selection preference | `HighPerformance` |
/// | `required_features` | Required wgpu features | Empty |
/// | `required_limits` | Required wgpu limits | Default |
/// | `depth_format` | Depth buffer format | `Depth32Float` |
/// | `validation` | Enable API validation layer output | `false` |
#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// Background clear color for the backbuffer.
    pub clear_color: wgpu::Color,

    /// Enable vertical synchronization.
    ///
    /// Toggling this at runtime flushes every in-flight frame and
    /// reconfigures all swapchains.
    pub vsync: bool,

    /// GPU adapter selection preference.
    pub power_preference: wgpu::PowerPreference,

    /// Required wgpu features that must be supported by the adapter.
    ///
    /// Timestamp and pipeline-statistics queries degrade to no-ops when the
    /// corresponding features are absent; they are never required.
    pub required_features: wgpu::Features,

    /// Required wgpu limits.
    pub required_limits: wgpu::Limits,

    /// Depth buffer texture format.
    ///
    /// `Depth32Float` is assumed by the reverse-Z pipeline (clear to 0,
    /// `Greater` comparison).
    pub depth_format: wgpu::TextureFormat,

    /// Emit API validation output. Maps to the debug-output flag of the
    /// backend; has no effect in release builds of the underlying driver.
    pub validation: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            clear_color: wgpu::Color {
                r: 0.0,
                g: 0.0,
                b: 0.0,
                a: 1.0,
            },
            vsync: true,
            depth_format: wgpu::TextureFormat::Depth32Float,
            validation: false,
        }
    }
}
