//! World collaborator for the renderers.
//!
//! Entities carry a [`Transform`](strata_common::Transform) plus optional
//! render-facing components. Renderers never hold references into the world;
//! they pull snapshots ([`World::renderables`], [`World::lights`],
//! [`World::active_camera`]) once per tick.
//!
//! # Invariants
//! - Iteration order is deterministic (BTreeMap keyed by `EntityId`).
//! - Despawning an entity removes all of its components.

mod components;
mod world;

pub use components::{Atmosphere, Camera, Light, LightKind, MeshComponent, Name, Spin};
pub use world::{EntityData, PlacedLight, Renderable, World};

pub fn crate_info() -> &'static str {
    "strata-ecs v0.1.0"
}
