//! # Peelite
//!
//! Renders one translucent mesh three ways and lets you switch between them:
//!
//! - **Alpha testing**: a mask texture cuts the surface; what is left is opaque.
//! - **Alpha blending**: depth prime, then one source-over color pass. Cheap,
//!   but only the nearest surface at each pixel is ever seen.
//! - **Depth peeling**: order-independent transparency. Each pass peels the
//!   next layer behind the previous one and under-blends it into an
//!   accumulation buffer until an occlusion query reports an empty layer.
//!
//! ## Quick Start
//!
//! ```no_run
//! use peelite::{AppConfig, RenderMode};
//!
//! fn main() -> anyhow::Result<()> {
//!     peelite::run(AppConfig::new().mode(RenderMode::DepthPeeling).transparency(0.6))
//! }
//! ```
//!
//! The renderer is usable without the window: build a [`GpuContext::headless`]
//! context and call [`TransparencyRenderer::render`] with an offscreen view.

mod app;
mod camera;
mod config;
mod error;
mod geometry;
mod gpu;
mod input;
mod material;
mod mesh;
pub mod oit;
mod texture;

pub use app::{Action, Controls, load_geometry, run};
pub use camera::Camera;
pub use config::{AppConfig, BACKGROUND_PRESETS, ConfigError};
pub use error::RenderError;
pub use geometry::{GeometryError, RawGeometry};
pub use gpu::GpuContext;
pub use input::{Command, Input};
pub use material::{DirectionalLight, Material, SceneUniforms};
pub use mesh::{Mesh, Transform, Vertex3d};
pub use oit::{FrameParams, FrameStats, PeelCap, PeelReport, RenderMode, Termination, TransparencyRenderer};
pub use texture::Texture;

// Re-export glam math types for convenience
pub use glam::{Mat4, Quat, Vec3, Vec4};
