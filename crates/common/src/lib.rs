//! Shared value types used across the strata crates.
//!
//! Everything here is plain data: no GPU state, no world state.

mod types;

pub use types::{EntityId, Extent2D, ResourceId, Transform};
