use strata_gfx::{CommandStream, UploadQueue};

/// Optional add-on invoked at fixed points of a world render, e.g. editor
/// gizmos. Every hook has an empty default.
///
/// Call order per frame: `pre_tick`, `tick`, then inside `render`:
/// `copy_buffers` while the upload queue is open, `render` inside the
/// geometry pass and `render_forward` inside the lighting pass after the
/// skybox.
pub trait WorldRendererExtension {
    fn name(&self) -> &str;

    /// Logic-only work before the render thread starts the frame.
    fn pre_tick(&mut self) {}

    fn tick(&mut self, _delta: f32) {}

    /// Register this frame's dirty buffers with the frame's upload queue.
    fn copy_buffers<'a>(&'a mut self, _frame: usize, _queue: &mut UploadQueue<'a>) {}

    /// Record draws into the G-buffer.
    fn render(&mut self, _frame: usize, _stream: &mut CommandStream) {}

    /// Record forward draws over the lit image; depth is the geometry
    /// pass's depth.
    fn render_forward(&mut self, _frame: usize, _stream: &mut CommandStream) {}
}
