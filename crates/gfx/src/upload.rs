use crate::buffer::Buffer;
use crate::command::CommandStream;
use crate::texture::Texture;

/// A resource that can record its pending host data into a stream.
pub trait Uploadable {
    /// Record pending data and clear it. Returns whether anything was recorded.
    fn copy(&mut self, stream: &mut CommandStream) -> bool;

    fn label(&self) -> &str;
}

/// Upload requests collected for one frame and flushed in insertion order.
///
/// The queue borrows its resources; it lives only as long as the frame's
/// update step.
#[derive(Default)]
pub struct UploadQueue<'a> {
    requests: Vec<&'a mut dyn Uploadable>,
}

impl<'a> UploadQueue<'a> {
    pub fn new() -> Self {
        Self {
            requests: Vec::new(),
        }
    }

    pub fn add_buffer_request(&mut self, buffer: &'a mut Buffer) {
        self.requests.push(buffer);
    }

    pub fn add_texture_request(&mut self, texture: &'a mut Texture) {
        self.requests.push(texture);
    }

    pub fn add_request(&mut self, resource: &'a mut dyn Uploadable) {
        self.requests.push(resource);
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Record every pending copy into `stream` and empty the queue. Returns
    /// whether at least one copy was recorded.
    pub fn flush_all(&mut self, stream: &mut CommandStream) -> bool {
        let _span = tracing::info_span!("upload_flush", requests = self.requests.len()).entered();
        let mut recorded = 0usize;
        for request in self.requests.drain(..) {
            if request.copy(stream) {
                tracing::trace!(resource = request.label(), "upload recorded");
                recorded += 1;
            }
        }
        tracing::debug!(recorded, "upload queue flushed");
        recorded > 0
    }
}
