use std::ops::Range;

use bytemuck::Pod;

use crate::command::CommandStream;
use crate::device::GpuDevice;
use crate::error::GfxError;
use crate::handle::BufferHandle;
use crate::resource::{BufferDesc, BufferUsage};
use crate::upload::Uploadable;

/// Granularity of buffer copies: offsets and lengths of recorded copies are
/// multiples of this, and allocations are rounded up to it.
pub const COPY_ALIGNMENT: u64 = 4;

/// A device buffer paired with a host staging copy.
///
/// Host writes land in the staging copy and widen a dirty range. [`Buffer::copy`]
/// records the dirty bytes into a stream, so the device contents only change
/// when that stream executes.
#[derive(Debug)]
pub struct Buffer {
    handle: BufferHandle,
    desc: BufferDesc,
    staging: Vec<u8>,
    dirty: Option<Range<u64>>,
}

impl Buffer {
    pub fn create(
        device: &mut dyn GpuDevice,
        size: u64,
        usage: BufferUsage,
        label: impl Into<String>,
    ) -> Result<Self, GfxError> {
        assert!(size > 0, "buffer size must be positive");
        let size = size.next_multiple_of(COPY_ALIGNMENT);
        let desc = BufferDesc {
            label: label.into(),
            size,
            usage,
        };
        let handle = device.create_buffer(&desc)?;
        tracing::trace!(label = %desc.label, size, ?usage, "buffer created");
        Ok(Self {
            handle,
            staging: vec![0; size as usize],
            desc,
            dirty: None,
        })
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn size(&self) -> u64 {
        self.desc.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.desc.usage
    }

    pub fn label(&self) -> &str {
        &self.desc.label
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.is_some()
    }

    pub fn dirty_range(&self) -> Option<Range<u64>> {
        self.dirty.clone()
    }

    /// Host view of the staged contents.
    pub fn staged(&self) -> &[u8] {
        &self.staging
    }

    /// Write bytes into the staging copy at `offset`. Out-of-range writes are
    /// a programming error.
    pub fn buffer_data(&mut self, offset: u64, data: &[u8]) {
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= self.desc.size);
        let Some(end) = end else {
            panic!(
                "write of {} bytes at offset {offset} overflows buffer '{}' of size {}",
                data.len(),
                self.desc.label,
                self.desc.size
            );
        };
        self.staging[offset as usize..end as usize].copy_from_slice(data);
        self.dirty = Some(match self.dirty.take() {
            Some(range) => range.start.min(offset)..range.end.max(end),
            None => offset..end,
        });
    }

    pub fn write_pod<T: Pod>(&mut self, offset: u64, value: &T) {
        self.buffer_data(offset, bytemuck::bytes_of(value));
    }

    pub fn write_slice<T: Pod>(&mut self, offset: u64, values: &[T]) {
        self.buffer_data(offset, bytemuck::cast_slice(values));
    }

    /// Record the dirty range into `stream` and clear it. Returns whether a
    /// copy was recorded.
    ///
    /// The recorded range is widened to [`COPY_ALIGNMENT`] and is never empty;
    /// the extra bytes come from the staging copy, which mirrors every write.
    pub fn copy(&mut self, stream: &mut CommandStream) -> bool {
        let Some(range) = self.dirty.take() else {
            return false;
        };
        let size = self.desc.size;
        let end = range
            .end
            .next_multiple_of(COPY_ALIGNMENT)
            .max(range.start - range.start % COPY_ALIGNMENT + COPY_ALIGNMENT)
            .min(size);
        let start = (range.start - range.start % COPY_ALIGNMENT).min(end - COPY_ALIGNMENT);
        stream.copy_buffer(
            self.handle,
            start,
            &self.staging[start as usize..end as usize],
        );
        true
    }

    pub fn destroy(self, device: &mut dyn GpuDevice) {
        device.destroy_buffer(self.handle);
    }
}

impl Uploadable for Buffer {
    fn copy(&mut self, stream: &mut CommandStream) -> bool {
        Buffer::copy(self, stream)
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

    #[test]
    fn clean_buffer_records_nothing() {
        let mut device = HeadlessDevice::new();
        let mut buffer = Buffer::create(&mut device, 64, BufferUsage::Uniform, "view").unwrap();
        let mut stream = CommandStream::new(QueueKind::Transfer, "copy");
        assert!(!buffer.copy(&mut stream));
        assert!(stream.is_empty());
    }

    #[test]
    fn copy_records_dirty_range_and_clears_it() {
        let mut device = HeadlessDevice::new();
        let mut buffer = Buffer::create(&mut device, 64, BufferUsage::Storage, "objects").unwrap();
        buffer.buffer_data(8, &[1, 2, 3, 4]);
        buffer.buffer_data(20, &[9]);
        assert_eq!(buffer.dirty_range(), Some(8..21));

        let mut stream = CommandStream::new(QueueKind::Transfer, "copy");
        assert!(buffer.copy(&mut stream));
        assert!(!buffer.is_dirty());
        match &stream.commands()[0] {
            Command::CopyBuffer {
                dst,
                dst_offset,
                data,
            } => {
                assert_eq!(*dst, buffer.handle());
                assert_eq!(*dst_offset, 8);
                assert_eq!(data.len(), 16);
                assert_eq!(&data[..4], &[1, 2, 3, 4]);
                assert_eq!(data[12], 9);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(!buffer.copy(&mut stream));
        assert_eq!(stream.len(), 1);
    }

    fn recorded_copy(stream: &CommandStream) -> (u64, usize) {
        match stream.commands().last() {
            Some(Command::CopyBuffer {
                dst_offset, data, ..
            }) => (*dst_offset, data.len()),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn empty_write_still_records_a_copy() {
        let mut device = HeadlessDevice::new();
        let mut buffer = Buffer::create(&mut device, 16, BufferUsage::Storage, "lights").unwrap();
        let mut stream = CommandStream::new(QueueKind::Transfer, "copy");

        buffer.buffer_data(4, &[]);
        assert!(buffer.is_dirty());
        assert!(buffer.copy(&mut stream));
        assert_eq!(recorded_copy(&stream), (4, 4));
        assert!(!buffer.copy(&mut stream));

        buffer.buffer_data(16, &[]);
        assert!(buffer.copy(&mut stream));
        assert_eq!(recorded_copy(&stream), (12, 4));
    }

    #[test]
    fn copies_are_widened_to_the_alignment() {
        let mut device = HeadlessDevice::new();
        let mut buffer = Buffer::create(&mut device, 10, BufferUsage::Storage, "odd").unwrap();
        assert_eq!(buffer.size(), 12);
        let mut stream = CommandStream::new(QueueKind::Transfer, "copy");

        buffer.buffer_data(1, &[7, 8, 9]);
        assert_eq!(buffer.dirty_range(), Some(1..4));
        assert!(buffer.copy(&mut stream));
        assert_eq!(recorded_copy(&stream), (0, 4));

        buffer.buffer_data(9, &[5]);
        assert!(buffer.copy(&mut stream));
        let (offset, len) = recorded_copy(&stream);
        assert_eq!((offset, len), (8, 4));
        assert_eq!(offset % COPY_ALIGNMENT, 0);
        assert_eq!(len as u64 % COPY_ALIGNMENT, 0);

        stream.close();
        device
            .submit(&crate::Submission {
                queue: QueueKind::Transfer,
                streams: &[&stream],
                waits: &[],
                signals: &[],
            })
            .unwrap();
        let memory = device.read_buffer(buffer.handle()).unwrap();
        assert_eq!(&memory[..4], &[0, 7, 8, 9]);
        assert_eq!(memory[9], 5);
    }

    #[test]
    fn write_pod_stages_bytes() {
        let mut device = HeadlessDevice::new();
        let mut buffer = Buffer::create(&mut device, 16, BufferUsage::Uniform, "u").unwrap();
        buffer.write_pod(4, &7u32);
        assert_eq!(&buffer.staged()[4..8], &7u32.to_ne_bytes());
    }

    #[test]
    #[should_panic(expected = "overflows buffer")]
    fn out_of_range_write_panics() {
        let mut device = HeadlessDevice::new();
        let mut buffer = Buffer::create(&mut device, 16, BufferUsage::Uniform, "u").unwrap();
        buffer.buffer_data(12, &[0; 8]);
    }

    #[test]
    #[should_panic(expected = "size must be positive")]
    fn zero_size_panics() {
        let mut device = HeadlessDevice::new();
        let _ = Buffer::create(&mut device, 0, BufferUsage::Uniform, "u");
    }
}
