//! GPU contract for the strata frame graph.
//!
//! The renderer never talks to a graphics API directly. It records
//! [`CommandStream`]s and hands them to a [`GpuDevice`], which may be wgpu,
//! a native API, or the [`HeadlessDevice`] used by tests and headless runs.
//!
//! # Invariants
//! - Host writes are staged; device memory only changes when a recorded copy
//!   executes on the GPU timeline.
//! - Every allocation is owned by exactly one wrapper and destroyed explicitly.
//! - Timeline semaphore values only grow.

mod buffer;
mod command;
mod descriptor;
mod device;
mod error;
mod handle;
mod headless;
mod pipeline;
mod resource;
mod semaphore;
mod texture;
mod upload;

pub use buffer::{Buffer, COPY_ALIGNMENT};
pub use command::{
    ColorTarget, Command, CommandStream, DepthTarget, LoadOp, RenderPassBegin, ScissorRect,
    StoreOp, TextureBarrier, Viewport,
};
pub use descriptor::{
    DescriptorKind, DescriptorResource, DescriptorSetDesc, DescriptorSlot, DescriptorWrite,
    SamplerKind,
};
pub use device::{GpuDevice, Submission};
pub use error::GfxError;
pub use handle::{
    BufferHandle, DescriptorSetHandle, PipelineHandle, SemaphoreData, SemaphoreHandle,
    TextureHandle,
};
pub use headless::{
    CompletionMode, DeviceCall, Hazard, HeadlessDevice, ResourceRef, SubmissionRecord,
};
pub use pipeline::{
    BlendMode, CompareOp, DepthState, GuiVertex, MeshVertex, PipelineDesc, VertexLayout,
};
pub use resource::{
    BufferDesc, BufferUsage, IndexFormat, QueueKind, ResourceState, TextureDesc, TextureFormat,
    TextureUsage,
};
pub use semaphore::TimelineSemaphore;
pub use texture::Texture;
pub use upload::{UploadQueue, Uploadable};

pub fn crate_info() -> &'static str {
    "strata-gfx v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("gfx"));
    }
}
