//! wgpu backend for the strata frame graph.
//!
//! [`WgpuDevice`] implements [`strata_gfx::GpuDevice`] on a headless wgpu
//! device, and [`shaders`] carries the WGSL of the built-in pipelines.
//!
//! # Invariants
//! - Handles are never reused within one device.
//! - A semaphore's completed value only moves forward, driven by
//!   `Queue::on_submitted_work_done` callbacks observed while polling.

mod convert;
mod device;
pub mod shaders;

pub use device::{WgpuDevice, required_features};

pub fn crate_info() -> &'static str {
    "strata-render-wgpu v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_gfx::{
        Buffer, BufferUsage, CommandStream, GpuDevice, QueueKind, SemaphoreData, Submission,
        TextureFormat,
    };
    use strata_render::pipelines;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("wgpu"));
    }

    /// Skipped on machines without an adapter that supports the required
    /// features.
    fn device() -> Option<WgpuDevice> {
        match WgpuDevice::new_headless() {
            Ok(device) => Some(device),
            Err(e) => {
                eprintln!("skipping GPU test: {e}");
                None
            }
        }
    }

    #[test]
    fn built_in_pipelines_compile() {
        let Some(mut device) = device() else { return };
        let capacity = 16;
        let descs = [
            pipelines::geometry_pipeline_desc("geometry", &shaders::geometry_shader(), capacity),
            pipelines::lighting_pipeline_desc(&shaders::lighting_shader(), capacity),
            pipelines::skybox_pipeline_desc(&shaders::skybox_shader(), capacity),
            pipelines::gui_pipeline_desc(
                "gui",
                shaders::GUI_SHADER,
                capacity,
                TextureFormat::Rgba8Unorm,
            ),
        ];
        for desc in &descs {
            let pipeline = device.create_pipeline(desc).unwrap();
            device.destroy_pipeline(pipeline);
        }
    }

    #[test]
    fn broken_shader_is_a_creation_error() {
        let Some(mut device) = device() else { return };
        let desc = pipelines::lighting_pipeline_desc("fn vs_main( {", 4);
        assert!(matches!(
            device.create_pipeline(&desc),
            Err(strata_gfx::GfxError::Creation { kind: "pipeline", .. })
        ));
    }

    #[test]
    fn copy_submission_signals_semaphore() {
        let Some(mut device) = device() else { return };
        let semaphore = device.create_semaphore("copy").unwrap();
        let mut buffer = Buffer::create(&mut device, 64, BufferUsage::Storage, "data").unwrap();
        buffer.write_slice(0, &[1.0f32, 2.0, 3.0, 4.0]);
        let mut stream = CommandStream::new(QueueKind::Transfer, "copy");
        assert!(buffer.copy(&mut stream));
        stream.close();
        let signal = SemaphoreData::new(semaphore, 1);
        device
            .submit(&Submission {
                queue: QueueKind::Transfer,
                streams: &[&stream],
                waits: &[],
                signals: &[signal],
            })
            .unwrap();
        device.wait_semaphore(semaphore, 1).unwrap();
        assert_eq!(device.completed_value(semaphore), 1);
        assert!(matches!(
            device.wait_semaphore(semaphore, 2),
            Err(strata_gfx::GfxError::WaitNeverSignaled { value: 2, submitted: 1, .. })
        ));
        buffer.destroy(&mut device);
        device.destroy_semaphore(semaphore);
    }
}
