use strata_common::Extent2D;

use crate::command::{CommandStream, TextureBarrier};
use crate::device::GpuDevice;
use crate::error::GfxError;
use crate::handle::TextureHandle;
use crate::resource::{ResourceState, TextureDesc, TextureFormat, TextureUsage};
use crate::upload::Uploadable;

/// A device texture with its tracked logical state and optional pending
/// pixel upload.
#[derive(Debug)]
pub struct Texture {
    handle: TextureHandle,
    desc: TextureDesc,
    state: ResourceState,
    pending: Option<Vec<u8>>,
}

impl Texture {
    pub fn create(
        device: &mut dyn GpuDevice,
        label: impl Into<String>,
        extent: Extent2D,
        format: TextureFormat,
        usage: TextureUsage,
    ) -> Result<Self, GfxError> {
        assert!(
            !extent.is_zero_area(),
            "texture extent must be non-zero"
        );
        let desc = TextureDesc {
            label: label.into(),
            extent,
            format,
            usage,
        };
        let handle = device.create_texture(&desc)?;
        Ok(Self {
            handle,
            desc,
            state: ResourceState::Undefined,
            pending: None,
        })
    }

    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    pub fn extent(&self) -> Extent2D {
        self.desc.extent
    }

    pub fn format(&self) -> TextureFormat {
        self.desc.format
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// Overwrite the tracked state, for transitions performed implicitly by a
    /// render pass.
    pub fn set_state(&mut self, state: ResourceState) {
        self.state = state;
    }

    /// Build a barrier to `to` and update the tracked state. `None` when the
    /// texture is already there.
    pub fn transition(&mut self, to: ResourceState) -> Option<TextureBarrier> {
        if self.state == to {
            return None;
        }
        let barrier = TextureBarrier {
            texture: self.handle,
            from: self.state,
            to,
        };
        self.state = to;
        Some(barrier)
    }

    /// Stage a full-image pixel upload, recorded by the next [`Texture::copy`].
    pub fn write_pixels(&mut self, data: Vec<u8>) {
        assert_eq!(
            data.len() as u64,
            self.desc.byte_size(),
            "pixel data size mismatch for texture '{}'",
            self.desc.label
        );
        self.pending = Some(data);
    }

    pub fn has_pending_upload(&self) -> bool {
        self.pending.is_some()
    }

    pub fn copy(&mut self, stream: &mut CommandStream) -> bool {
        let Some(data) = self.pending.take() else {
            return false;
        };
        stream.barrier(self.transition(ResourceState::CopyDestination).into_iter().collect());
        stream.copy_texture(self.handle, self.desc.extent, data);
        stream.barrier(self.transition(ResourceState::ShaderReadOnly).into_iter().collect());
        true
    }

    pub fn destroy(self, device: &mut dyn GpuDevice) {
        device.destroy_texture(self.handle);
    }
}

impl Uploadable for Texture {
    fn copy(&mut self, stream: &mut CommandStream) -> bool {
        Texture::copy(self, stream)
    }

    fn label(&self) -> &str {
        &self.desc.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::headless::HeadlessDevice;
    use crate::resource::QueueKind;

    fn texture(device: &mut HeadlessDevice) -> Texture {
        Texture::create(
            device,
            "albedo",
            Extent2D::new(2, 2),
            TextureFormat::Rgba8Unorm,
            TextureUsage::Sampled,
        )
        .unwrap()
    }

    #[test]
    fn transition_tracks_state() {
        let mut device = HeadlessDevice::new();
        let mut tex = texture(&mut device);
        let barrier = tex.transition(ResourceState::ColorAttachment).unwrap();
        assert_eq!(barrier.from, ResourceState::Undefined);
        assert_eq!(barrier.to, ResourceState::ColorAttachment);
        assert!(tex.transition(ResourceState::ColorAttachment).is_none());
    }

    #[test]
    fn upload_wraps_copy_in_barriers() {
        let mut device = HeadlessDevice::new();
        let mut tex = texture(&mut device);
        tex.write_pixels(vec![255; 16]);

        let mut stream = CommandStream::new(QueueKind::Graphics, "gfx");
        assert!(tex.copy(&mut stream));
        assert!(!tex.has_pending_upload());
        assert_eq!(stream.len(), 3);
        assert!(matches!(stream.commands()[1], Command::CopyTexture { .. }));
        assert_eq!(tex.state(), ResourceState::ShaderReadOnly);
        assert!(!tex.copy(&mut stream));
    }

    #[test]
    #[should_panic(expected = "size mismatch")]
    fn wrong_pixel_size_panics() {
        let mut device = HeadlessDevice::new();
        let mut tex = texture(&mut device);
        tex.write_pixels(vec![0; 3]);
    }
}
