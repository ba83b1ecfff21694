use crate::command::CommandStream;
use crate::descriptor::{DescriptorSetDesc, DescriptorWrite};
use crate::error::GfxError;
use crate::handle::{
    BufferHandle, DescriptorSetHandle, PipelineHandle, SemaphoreData, SemaphoreHandle,
    TextureHandle,
};
use crate::pipeline::PipelineDesc;
use crate::resource::{BufferDesc, QueueKind, TextureDesc};

/// One queue submission: closed streams, semaphore values to wait for before
/// execution, and semaphore values to signal once execution completes.
#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    pub queue: QueueKind,
    pub streams: &'a [&'a CommandStream],
    pub waits: &'a [SemaphoreData],
    pub signals: &'a [SemaphoreData],
}

/// The graphics backend seen by the frame graph.
///
/// Creation calls fail with [`GfxError`]; destroy calls are infallible and the
/// caller guarantees no pending submission still references the handle.
pub trait GpuDevice {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle, GfxError>;
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, GfxError>;
    fn destroy_texture(&mut self, texture: TextureHandle);

    fn create_semaphore(&mut self, label: &str) -> Result<SemaphoreHandle, GfxError>;
    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle);

    fn create_descriptor_set(
        &mut self,
        desc: &DescriptorSetDesc,
    ) -> Result<DescriptorSetHandle, GfxError>;
    fn update_descriptor_set(
        &mut self,
        set: DescriptorSetHandle,
        writes: &[DescriptorWrite],
    ) -> Result<(), GfxError>;
    fn destroy_descriptor_set(&mut self, set: DescriptorSetHandle);

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineHandle, GfxError>;
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);

    /// Queue closed streams for execution. Waits and signals are timeline
    /// values; signal values must exceed any value previously submitted for
    /// the same semaphore.
    fn submit(&mut self, submission: &Submission<'_>) -> Result<(), GfxError>;

    /// Highest value the GPU has signaled on `semaphore`.
    fn completed_value(&self, semaphore: SemaphoreHandle) -> u64;

    /// Block until `semaphore` reaches `value`.
    fn wait_semaphore(&mut self, semaphore: SemaphoreHandle, value: u64) -> Result<(), GfxError>;

    /// Block until every submission has completed.
    fn wait_idle(&mut self) -> Result<(), GfxError>;
}
