//! Backend-agnostic command recording.
//!
//! A [`CommandStream`] is an ordered list of [`Command`]s for one queue. It is
//! reset at the start of a frame, recorded into, closed, and submitted. Copy
//! commands carry their payload, so later host writes to the source wrapper
//! cannot change what an already-recorded copy uploads.

use strata_common::Extent2D;

use crate::handle::{BufferHandle, DescriptorSetHandle, PipelineHandle, TextureHandle};
use crate::resource::{IndexFormat, QueueKind, ResourceState};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn from_extent(extent: Extent2D) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScissorRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ScissorRect {
    pub fn from_extent(extent: Extent2D) -> Self {
        Self {
            x: 0,
            y: 0,
            width: extent.width,
            height: extent.height,
        }
    }

    /// Intersect with the render-target area. `None` when nothing is left.
    pub fn clamp_to(&self, extent: Extent2D) -> Option<Self> {
        let x0 = self.x.min(extent.width);
        let y0 = self.y.min(extent.height);
        let x1 = self.x.saturating_add(self.width).min(extent.width);
        let y1 = self.y.saturating_add(self.height).min(extent.height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadOp {
    Clear,
    Load,
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Store,
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorTarget {
    pub texture: TextureHandle,
    pub load: LoadOp,
    pub store: StoreOp,
    pub clear_color: [f32; 4],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthTarget {
    pub texture: TextureHandle,
    pub load: LoadOp,
    pub store: StoreOp,
    pub clear_depth: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassBegin {
    pub label: String,
    pub colors: Vec<ColorTarget>,
    pub depth: Option<DepthTarget>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureBarrier {
    pub texture: TextureHandle,
    pub from: ResourceState,
    pub to: ResourceState,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CopyBuffer {
        dst: BufferHandle,
        dst_offset: u64,
        data: Vec<u8>,
    },
    CopyTexture {
        dst: TextureHandle,
        extent: Extent2D,
        data: Vec<u8>,
    },
    Barrier(Vec<TextureBarrier>),
    BeginRenderPass(RenderPassBegin),
    EndRenderPass,
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    BindPipeline(PipelineHandle),
    BindDescriptorSet {
        index: u32,
        set: DescriptorSetHandle,
    },
    BindVertexBuffer {
        buffer: BufferHandle,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: BufferHandle,
        offset: u64,
        format: IndexFormat,
    },
    PushConstants(Vec<u8>),
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    DrawIndexedIndirect {
        buffer: BufferHandle,
        offset: u64,
        draw_count: u32,
        stride: u32,
    },
}

impl Command {
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            Self::Draw { .. } | Self::DrawIndexed { .. } | Self::DrawIndexedIndirect { .. }
        )
    }
}

/// Recording target for one queue.
#[derive(Debug, Clone)]
pub struct CommandStream {
    label: String,
    queue: QueueKind,
    commands: Vec<Command>,
    closed: bool,
    in_render_pass: bool,
}

impl CommandStream {
    pub fn new(queue: QueueKind, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            queue,
            commands: Vec::new(),
            closed: false,
            in_render_pass: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn queue(&self) -> QueueKind {
        self.queue
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of draw commands recorded so far.
    pub fn draw_count(&self) -> usize {
        self.commands.iter().filter(|c| c.is_draw()).count()
    }

    /// Drop all recorded commands and reopen the stream. Only legal once the
    /// GPU is done with the previous submission of this stream.
    pub fn reset(&mut self) {
        self.commands.clear();
        self.closed = false;
        self.in_render_pass = false;
    }

    pub fn close(&mut self) {
        assert!(
            !self.in_render_pass,
            "closing stream '{}' with an open render pass",
            self.label
        );
        self.closed = true;
    }

    fn record(&mut self, command: Command) {
        assert!(
            !self.closed,
            "recording into closed stream '{}'",
            self.label
        );
        self.commands.push(command);
    }

    fn record_graphics(&mut self, command: Command) {
        assert_eq!(
            self.queue,
            QueueKind::Graphics,
            "graphics command on {:?} stream '{}'",
            self.queue,
            self.label
        );
        self.record(command);
    }

    pub fn copy_buffer(&mut self, dst: BufferHandle, dst_offset: u64, data: &[u8]) {
        self.record(Command::CopyBuffer {
            dst,
            dst_offset,
            data: data.to_vec(),
        });
    }

    pub fn copy_texture(&mut self, dst: TextureHandle, extent: Extent2D, data: Vec<u8>) {
        self.record(Command::CopyTexture { dst, extent, data });
    }

    /// Record a barrier batch; empty batches are dropped.
    pub fn barrier(&mut self, barriers: Vec<TextureBarrier>) {
        if !barriers.is_empty() {
            self.record(Command::Barrier(barriers));
        }
    }

    pub fn begin_render_pass(&mut self, begin: RenderPassBegin) {
        assert!(
            !self.in_render_pass,
            "render pass '{}' begun inside another pass on stream '{}'",
            begin.label,
            self.label
        );
        self.record_graphics(Command::BeginRenderPass(begin));
        self.in_render_pass = true;
    }

    pub fn end_render_pass(&mut self) {
        assert!(
            self.in_render_pass,
            "end_render_pass without begin on stream '{}'",
            self.label
        );
        self.record_graphics(Command::EndRenderPass);
        self.in_render_pass = false;
    }

    pub fn in_render_pass(&self) -> bool {
        self.in_render_pass
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.record_graphics(Command::SetViewport(viewport));
    }

    pub fn set_scissor(&mut self, scissor: ScissorRect) {
        self.record_graphics(Command::SetScissor(scissor));
    }

    pub fn bind_pipeline(&mut self, pipeline: PipelineHandle) {
        self.record_graphics(Command::BindPipeline(pipeline));
    }

    pub fn bind_descriptor_set(&mut self, index: u32, set: DescriptorSetHandle) {
        self.record_graphics(Command::BindDescriptorSet { index, set });
    }

    pub fn bind_vertex_buffer(&mut self, buffer: BufferHandle, offset: u64) {
        self.record_graphics(Command::BindVertexBuffer { buffer, offset });
    }

    pub fn bind_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat) {
        self.record_graphics(Command::BindIndexBuffer {
            buffer,
            offset,
            format,
        });
    }

    pub fn push_constants(&mut self, data: &[u8]) {
        self.record_graphics(Command::PushConstants(data.to_vec()));
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.record_graphics(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex: 0,
            first_instance: 0,
        });
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.record_graphics(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });
    }

    pub fn draw_indexed_indirect(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) {
        self.record_graphics(Command::DrawIndexedIndirect {
            buffer,
            offset,
            draw_count,
            stride,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn begin(texture: u32) -> RenderPassBegin {
        RenderPassBegin {
            label: "test".into(),
            colors: vec![ColorTarget {
                texture: TextureHandle(texture),
                load: LoadOp::Clear,
                store: StoreOp::Store,
                clear_color: [0.0; 4],
            }],
            depth: None,
        }
    }

    #[test]
    fn records_in_order() {
        let mut s = CommandStream::new(QueueKind::Graphics, "gfx");
        s.begin_render_pass(begin(1));
        s.bind_pipeline(PipelineHandle(2));
        s.draw(3, 1);
        s.end_render_pass();
        s.close();

        assert_eq!(s.len(), 4);
        assert_eq!(s.draw_count(), 1);
        assert!(matches!(s.commands()[1], Command::BindPipeline(PipelineHandle(2))));
        assert!(s.is_closed());
    }

    #[test]
    fn reset_reopens() {
        let mut s = CommandStream::new(QueueKind::Transfer, "copy");
        s.copy_buffer(BufferHandle(1), 0, &[1, 2, 3]);
        s.close();
        s.reset();
        assert!(s.is_empty());
        assert!(!s.is_closed());
        s.copy_buffer(BufferHandle(1), 0, &[4]);
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn empty_barrier_is_dropped() {
        let mut s = CommandStream::new(QueueKind::Graphics, "gfx");
        s.barrier(Vec::new());
        assert!(s.is_empty());
    }

    #[test]
    #[should_panic(expected = "closed stream")]
    fn recording_after_close_panics() {
        let mut s = CommandStream::new(QueueKind::Transfer, "copy");
        s.close();
        s.copy_buffer(BufferHandle(1), 0, &[0]);
    }

    #[test]
    #[should_panic(expected = "graphics command")]
    fn draw_on_transfer_queue_panics() {
        let mut s = CommandStream::new(QueueKind::Transfer, "copy");
        s.draw(3, 1);
    }

    #[test]
    #[should_panic(expected = "without begin")]
    fn unbalanced_end_panics() {
        let mut s = CommandStream::new(QueueKind::Graphics, "gfx");
        s.end_render_pass();
    }

    #[test]
    #[should_panic(expected = "open render pass")]
    fn close_inside_pass_panics() {
        let mut s = CommandStream::new(QueueKind::Graphics, "gfx");
        s.begin_render_pass(begin(1));
        s.close();
    }

    #[test]
    fn scissor_clamp() {
        let extent = Extent2D::new(100, 50);
        let r = ScissorRect {
            x: 90,
            y: 10,
            width: 40,
            height: 100,
        };
        assert_eq!(
            r.clamp_to(extent),
            Some(ScissorRect {
                x: 90,
                y: 10,
                width: 10,
                height: 40
            })
        );
        let outside = ScissorRect {
            x: 200,
            y: 0,
            width: 10,
            height: 10,
        };
        assert_eq!(outside.clamp_to(extent), None);
    }
}
