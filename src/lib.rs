//! Pyre — a real-time render pipeline core.
//!
//! The crate is the rendering heart of an embeddable 3D engine: a
//! thread-aware GPU abstraction layer over wgpu, an append-only draw
//! stream drained on the render thread, reference-counted render
//! resources with async loading, and a frame-graph pipeline composing a
//! post-process plugin chain.
//!
//! ```text
//! scene (RenderModule) ──► Pipeline ──► DrawStream ──► Gpu (GAL) ──► wgpu
//!                             ▲
//!                      RenderPlugin chain
//! ```

pub mod errors;
pub mod gal;
pub mod passes;
pub mod pipeline;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod settings;
pub mod stream;
pub mod utils;

pub use errors::{PyreError, Result};
pub use gal::{Gpu, StateFlags, TextureFlags, TextureFormat};
pub use pipeline::plugin::{PluginRegistry, RenderPlugin};
pub use pipeline::Pipeline;
pub use renderer::Renderer;
pub use resources::{DiskIo, MemoryIo, ResourceHub};
pub use scene::{Camera, Environment, PointLight, RenderModule, Viewport};
pub use settings::RenderSettings;
pub use stream::DrawStream;
pub use utils::hash::StableHash;
