//! Frame-graph layer: orchestrates per-frame GPU work on top of `strata-gfx`.
//!
//! # Invariants
//! - Every per-frame mutable resource exists once per frame in flight and is
//!   only touched after the slot's previous submission has completed.
//! - A frame's copy submission completes before the graphics submission that
//!   reads its output; an empty copy is never submitted.
//! - Missing shaders, materials, models and textures skip the affected draw.
//!   Device failures propagate as [`RenderError`].
//!
//! # Renderers
//! - [`WorldRenderer`]: deferred geometry and lighting into an offscreen
//!   target, batched into instanced indirect draws.
//! - [`SurfaceRenderer`]: composites UI draw lists recorded through
//!   [`GuiRenderer`] onto a caller supplied image.

pub mod config;
pub mod context;
mod error;
pub mod frame;
pub mod gpu_data;
pub mod gui;
pub mod pass;
pub mod pipelines;
pub mod surface;
pub mod world;

pub use config::{ConfigError, RenderSettings, RendererConfig, SurfaceConfig};
pub use context::{EngineContext, Profiler};
pub use error::RenderError;
pub use frame::{FrameCounter, FrameRing, FrameSync};
pub use gui::{DrawBackend, DrawBuffer, DrawRequest, GuiFrame, GuiRenderer, GuiShaders};
pub use pass::{PassDescription, RenderPass};
pub use surface::{SurfaceImage, SurfaceRenderer, SurfaceStats};
pub use world::{TargetHandles, WorldFrameStats, WorldRenderer, WorldRendererExtension};

pub fn crate_info() -> &'static str {
    "strata-render v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("render"));
    }
}
