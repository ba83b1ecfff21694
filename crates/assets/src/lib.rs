//! Resource collaborator: resolves stable ids to device objects.
//!
//! Renderers consume resources by [`ResourceId`](strata_common::ResourceId),
//! never by raw device handles they would have to keep alive themselves.
//!
//! # Layout
//! - Models are packed into one shared vertex buffer and one shared index
//!   buffer; a model is a list of index ranges.
//! - Textures live in a bindless table. Reloading a texture moves it to a new
//!   slot and bumps the table generation.

mod bindless;
pub mod primitives;
mod store;

pub use bindless::BindlessTable;
pub use store::{
    GeometryBuffers, Material, MeshRange, Model, ResourceStore, Shader, StoreConfig, TextureEntry,
};

use strata_common::ResourceId;
use strata_gfx::GfxError;

/// Errors from resource operations.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error(transparent)]
    Gfx(#[from] GfxError),
    #[error("resource not found: {0:?}")]
    NotFound(ResourceId),
    #[error("resource already registered: {0:?}")]
    Duplicate(ResourceId),
    #[error("resource {id:?} is not an {expected}")]
    Mismatch {
        id: ResourceId,
        expected: &'static str,
    },
    #[error("bindless table full ({0} slots)")]
    BindlessFull(u32),
    #[error("geometry buffers cannot fit {vertices} vertices / {indices} indices")]
    GeometryFull { vertices: usize, indices: usize },
}

pub fn crate_info() -> &'static str {
    "strata-assets v0.1.0"
}
