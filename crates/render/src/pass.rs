//! Render passes.
//!
//! A [`RenderPass`] owns, per frame-in-flight slot, the pass's uniform and
//! storage buffers and one descriptor set (bound at index [`PASS_SET`]). It
//! references, but does not own, the textures it renders into. The pass kind
//! is a [`PassDescription`] resolved once into a [`PassLayout`].
//!
//! Per slot the pass moves through
//! `Uninitialized -> Created -> (Recording -> Ended)* -> Destroyed`.

use strata_gfx::{
    Buffer, BufferUsage, ColorTarget, CommandStream, DepthTarget, DescriptorKind,
    DescriptorSetDesc, DescriptorSetHandle, DescriptorSlot, DescriptorWrite, GfxError, GpuDevice,
    LoadOp, RenderPassBegin, ScissorRect, StoreOp, TextureHandle, UploadQueue, Viewport,
};

use crate::gpu_data::{
    GpuDrawArguments, GpuDrawInstance, GpuLightingData, GpuMaterialData, GpuObjectData,
    GpuViewData,
};

/// Descriptor set index of the global bindless set.
pub const GLOBAL_SET: u32 = 0;
/// Descriptor set index of the per-pass set.
pub const PASS_SET: u32 = 1;

/// Lighting pass texture bindings, filled by the G-buffer owner.
pub const LIGHTING_ALBEDO_BINDING: u32 = 2;
pub const LIGHTING_POSITION_BINDING: u32 = 3;
pub const LIGHTING_NORMAL_BINDING: u32 = 4;
/// GUI material blob buffer, filled by the surface renderer.
pub const GUI_MATERIALS_BINDING: u32 = 0;

/// Names of the per-pass buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassBufferKey {
    View,
    Objects,
    Materials,
    DrawInstances,
    DrawArguments,
    Lighting,
}

/// What kind of pass to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassDescription {
    /// G-buffer pass: three color targets plus depth, indirect draws.
    Deferred {
        max_objects: u32,
        max_materials: u32,
        max_draws: u32,
    },
    /// Full-screen lighting and skybox into one color target, depth loaded.
    Lighting,
    /// UI compositing onto a surface image.
    Gui,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassBufferSpec {
    pub key: PassBufferKey,
    /// Binding in the pass set; `None` for buffers only used as draw sources.
    pub binding: Option<u32>,
    pub kind: DescriptorKind,
    pub usage: BufferUsage,
    pub size: u64,
}

/// A description resolved into buffers, descriptor slots and attachments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassLayout {
    pub label: &'static str,
    pub buffers: Vec<PassBufferSpec>,
    /// Slots bound by the pass owner through [`RenderPass::bind_resources`].
    pub external: Vec<DescriptorSlot>,
    pub color_slots: usize,
    pub has_depth: bool,
}

fn size_of<T>() -> u64 {
    std::mem::size_of::<T>() as u64
}

impl PassDescription {
    pub fn layout(&self) -> PassLayout {
        match *self {
            Self::Deferred {
                max_objects,
                max_materials,
                max_draws,
            } => PassLayout {
                label: "geometry",
                buffers: vec![
                    PassBufferSpec {
                        key: PassBufferKey::View,
                        binding: Some(0),
                        kind: DescriptorKind::UniformBuffer,
                        usage: BufferUsage::Uniform,
                        size: size_of::<GpuViewData>(),
                    },
                    PassBufferSpec {
                        key: PassBufferKey::Objects,
                        binding: Some(1),
                        kind: DescriptorKind::StorageBuffer,
                        usage: BufferUsage::Storage,
                        size: size_of::<GpuObjectData>() * max_objects as u64,
                    },
                    PassBufferSpec {
                        key: PassBufferKey::Materials,
                        binding: Some(2),
                        kind: DescriptorKind::StorageBuffer,
                        usage: BufferUsage::Storage,
                        size: size_of::<GpuMaterialData>() * max_materials as u64,
                    },
                    PassBufferSpec {
                        key: PassBufferKey::DrawInstances,
                        binding: Some(3),
                        kind: DescriptorKind::StorageBuffer,
                        usage: BufferUsage::Storage,
                        size: size_of::<GpuDrawInstance>() * max_objects as u64,
                    },
                    PassBufferSpec {
                        key: PassBufferKey::DrawArguments,
                        binding: None,
                        kind: DescriptorKind::StorageBuffer,
                        usage: BufferUsage::Indirect,
                        size: size_of::<GpuDrawArguments>() * max_draws as u64,
                    },
                ],
                external: Vec::new(),
                color_slots: 3,
                has_depth: true,
            },
            Self::Lighting => PassLayout {
                label: "lighting",
                buffers: vec![
                    PassBufferSpec {
                        key: PassBufferKey::View,
                        binding: Some(0),
                        kind: DescriptorKind::UniformBuffer,
                        usage: BufferUsage::Uniform,
                        size: size_of::<GpuViewData>(),
                    },
                    PassBufferSpec {
                        key: PassBufferKey::Lighting,
                        binding: Some(1),
                        kind: DescriptorKind::UniformBuffer,
                        usage: BufferUsage::Uniform,
                        size: size_of::<GpuLightingData>(),
                    },
                ],
                external: vec![
                    DescriptorSlot::new(LIGHTING_ALBEDO_BINDING, DescriptorKind::Texture),
                    DescriptorSlot::new(LIGHTING_POSITION_BINDING, DescriptorKind::Texture),
                    DescriptorSlot::new(LIGHTING_NORMAL_BINDING, DescriptorKind::Texture),
                ],
                color_slots: 1,
                has_depth: true,
            },
            Self::Gui => PassLayout {
                label: "gui",
                buffers: Vec::new(),
                external: vec![DescriptorSlot::new(
                    GUI_MATERIALS_BINDING,
                    DescriptorKind::StorageBuffer,
                )],
                color_slots: 1,
                has_depth: false,
            },
        }
    }
}

impl PassLayout {
    /// Layout of the pass set; pipelines drawing in this pass list it at
    /// index [`PASS_SET`].
    pub fn descriptor_set_desc(&self) -> DescriptorSetDesc {
        let mut slots: Vec<DescriptorSlot> = self
            .buffers
            .iter()
            .filter_map(|b| b.binding.map(|binding| DescriptorSlot::new(binding, b.kind)))
            .chain(self.external.iter().copied())
            .collect();
        slots.sort_by_key(|s| s.binding);
        DescriptorSetDesc {
            label: format!("{}-pass-set", self.label),
            slots,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorAttachment {
    pub clear_color: [f32; 4],
    pub texture: TextureHandle,
    pub is_swapchain: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthAttachment {
    pub use_depth: bool,
    pub texture: TextureHandle,
    pub load: LoadOp,
    pub store: StoreOp,
    pub clear_depth: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Uninitialized,
    Created,
    Recording,
    Ended,
    Destroyed,
}

#[derive(Debug)]
struct PassFrame {
    buffers: Vec<(PassBufferKey, Buffer)>,
    descriptor_set: DescriptorSetHandle,
    colors: Vec<Option<ColorAttachment>>,
    depth: Option<DepthAttachment>,
    state: PassState,
    open_scopes: u32,
}

#[derive(Debug)]
pub struct RenderPass {
    label: String,
    description: PassDescription,
    layout: PassLayout,
    frames_in_flight: usize,
    frames: Vec<PassFrame>,
    destroyed: bool,
}

impl RenderPass {
    pub fn new(label: impl Into<String>, description: PassDescription, frames_in_flight: usize) -> Self {
        assert!(frames_in_flight > 0, "frames in flight must be positive");
        Self {
            label: label.into(),
            layout: description.layout(),
            description,
            frames_in_flight,
            frames: Vec::new(),
            destroyed: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn description(&self) -> PassDescription {
        self.description
    }

    pub fn layout(&self) -> &PassLayout {
        &self.layout
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Allocate per-frame buffers and descriptor sets and bind the buffers
    /// into each frame's set once.
    pub fn create(&mut self, device: &mut dyn GpuDevice) -> Result<(), GfxError> {
        assert!(
            self.frames.is_empty() && !self.destroyed,
            "render pass '{}' created twice",
            self.label
        );
        let set_desc = self.layout.descriptor_set_desc();
        for frame in 0..self.frames_in_flight {
            let mut buffers = Vec::with_capacity(self.layout.buffers.len());
            let mut writes = Vec::new();
            for spec in &self.layout.buffers {
                let buffer = Buffer::create(
                    device,
                    spec.size,
                    spec.usage,
                    format!("{}-{:?}-{frame}", self.label, spec.key),
                )?;
                if let Some(binding) = spec.binding {
                    writes.push(DescriptorWrite::buffer(binding, buffer.handle()));
                }
                buffers.push((spec.key, buffer));
            }
            let descriptor_set = device.create_descriptor_set(&DescriptorSetDesc {
                label: format!("{}-{frame}", set_desc.label),
                slots: set_desc.slots.clone(),
            })?;
            if !writes.is_empty() {
                device.update_descriptor_set(descriptor_set, &writes)?;
            }
            self.frames.push(PassFrame {
                buffers,
                descriptor_set,
                colors: vec![None; self.layout.color_slots],
                depth: None,
                state: PassState::Created,
                open_scopes: 0,
            });
        }
        tracing::debug!(pass = %self.label, frames = self.frames_in_flight, "render pass created");
        Ok(())
    }

    pub fn state(&self, frame: usize) -> PassState {
        if self.destroyed {
            return PassState::Destroyed;
        }
        self.frames
            .get(frame)
            .map(|f| f.state)
            .unwrap_or(PassState::Uninitialized)
    }

    fn frame(&self, frame: usize) -> &PassFrame {
        assert!(
            !self.destroyed && !self.frames.is_empty(),
            "render pass '{}' used while {:?}",
            self.label,
            self.state(frame)
        );
        assert!(
            frame < self.frames.len(),
            "frame index {frame} out of range for pass '{}'",
            self.label
        );
        &self.frames[frame]
    }

    fn frame_mut(&mut self, frame: usize) -> &mut PassFrame {
        self.frame(frame);
        &mut self.frames[frame]
    }

    pub fn set_color_attachment(&mut self, frame: usize, slot: usize, attachment: ColorAttachment) {
        let label = self.label.clone();
        let pass_frame = self.frame_mut(frame);
        assert!(
            slot < pass_frame.colors.len(),
            "pass '{label}' has no color slot {slot}"
        );
        pass_frame.colors[slot] = Some(attachment);
    }

    pub fn set_depth_attachment(&mut self, frame: usize, attachment: DepthAttachment) {
        assert!(
            self.layout.has_depth,
            "pass '{}' has no depth attachment",
            self.label
        );
        self.frame_mut(frame).depth = Some(attachment);
    }

    pub fn color_attachment(&self, frame: usize, slot: usize) -> Option<&ColorAttachment> {
        self.frame(frame).colors.get(slot)?.as_ref()
    }

    pub fn depth_attachment(&self, frame: usize) -> Option<&DepthAttachment> {
        self.frame(frame).depth.as_ref()
    }

    pub fn descriptor_set(&self, frame: usize) -> DescriptorSetHandle {
        self.frame(frame).descriptor_set
    }

    /// Bind owner-provided resources into the external slots of a frame's
    /// set. Used for textures after they are (re)created.
    pub fn bind_resources(
        &mut self,
        device: &mut dyn GpuDevice,
        frame: usize,
        writes: &[DescriptorWrite],
    ) -> Result<(), GfxError> {
        for write in writes {
            assert!(
                self.layout.external.iter().any(|s| s.binding == write.binding),
                "binding {} of pass '{}' is not an external slot",
                write.binding,
                self.label
            );
        }
        let set = self.frame(frame).descriptor_set;
        device.update_descriptor_set(set, writes)
    }

    /// Start recording this pass into `stream`: render-pass begin with the
    /// frame's attachments, viewport, scissor and the pass set.
    pub fn begin(
        &mut self,
        stream: &mut CommandStream,
        viewport: Viewport,
        scissor: ScissorRect,
        frame: usize,
    ) {
        let label = self.label.clone();
        let pass_frame = self.frame_mut(frame);
        assert!(
            matches!(pass_frame.state, PassState::Created | PassState::Ended),
            "pass '{label}' frame {frame} begun while {:?}",
            pass_frame.state
        );
        let colors = pass_frame
            .colors
            .iter()
            .enumerate()
            .map(|(slot, attachment)| {
                let Some(attachment) = attachment else {
                    panic!("pass '{label}' frame {frame} has no color attachment in slot {slot}");
                };
                ColorTarget {
                    texture: attachment.texture,
                    load: LoadOp::Clear,
                    store: StoreOp::Store,
                    clear_color: attachment.clear_color,
                }
            })
            .collect();
        let depth = pass_frame
            .depth
            .filter(|d| d.use_depth)
            .map(|d| DepthTarget {
                texture: d.texture,
                load: d.load,
                store: d.store,
                clear_depth: d.clear_depth,
            });
        stream.begin_render_pass(RenderPassBegin {
            label: label.clone(),
            colors,
            depth,
        });
        stream.set_viewport(viewport);
        stream.set_scissor(scissor);
        stream.bind_descriptor_set(PASS_SET, pass_frame.descriptor_set);
        pass_frame.state = PassState::Recording;
        pass_frame.open_scopes += 1;
    }

    pub fn end(&mut self, stream: &mut CommandStream, frame: usize) {
        let label = self.label.clone();
        let pass_frame = self.frame_mut(frame);
        assert!(
            pass_frame.state == PassState::Recording,
            "pass '{label}' frame {frame} ended while {:?}",
            pass_frame.state
        );
        stream.end_render_pass();
        pass_frame.state = PassState::Ended;
        pass_frame.open_scopes -= 1;
    }

    /// True when every `begin` on this slot has a matching `end`.
    pub fn is_balanced(&self, frame: usize) -> bool {
        self.frames
            .get(frame)
            .map(|f| f.open_scopes == 0)
            .unwrap_or(true)
    }

    pub fn has_buffer(&self, key: PassBufferKey) -> bool {
        self.layout.buffers.iter().any(|b| b.key == key)
    }

    pub fn buffer(&self, frame: usize, key: PassBufferKey) -> &Buffer {
        let label = &self.label;
        self.frame(frame)
            .buffers
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, b)| b)
            .unwrap_or_else(|| panic!("pass '{label}' has no {key:?} buffer"))
    }

    /// The named per-frame buffer; callers stage writes into it before
    /// `begin`. Panics when the pass kind has no such buffer.
    pub fn buffer_mut(&mut self, frame: usize, key: PassBufferKey) -> &mut Buffer {
        let label = self.label.clone();
        self.frame_mut(frame)
            .buffers
            .iter_mut()
            .find(|(k, _)| *k == key)
            .map(|(_, b)| b)
            .unwrap_or_else(|| panic!("pass '{label}' has no {key:?} buffer"))
    }

    pub fn add_buffers_to_upload_queue<'a>(&'a mut self, frame: usize, queue: &mut UploadQueue<'a>) {
        for (_, buffer) in self.frame_mut(frame).buffers.iter_mut() {
            queue.add_buffer_request(buffer);
        }
    }

    /// Release every per-frame buffer and set. The owner must have drained
    /// the GPU; no slot may be mid-recording.
    pub fn destroy(&mut self, device: &mut dyn GpuDevice) {
        if self.destroyed {
            return;
        }
        for (i, frame) in self.frames.iter().enumerate() {
            assert!(
                frame.state != PassState::Recording,
                "pass '{}' destroyed while frame {i} is recording",
                self.label
            );
        }
        for frame in self.frames.drain(..) {
            for (_, buffer) in frame.buffers {
                buffer.destroy(device);
            }
            device.destroy_descriptor_set(frame.descriptor_set);
        }
        self.destroyed = true;
        tracing::debug!(pass = %self.label, "render pass destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::Extent2D;
    use strata_gfx::{
        Command, DescriptorResource, HeadlessDevice, QueueKind,
    };

    fn lighting(device: &mut HeadlessDevice, frames: usize) -> RenderPass {
        let mut pass = RenderPass::new("lighting", PassDescription::Lighting, frames);
        pass.create(device).unwrap();
        for frame in 0..frames {
            pass.set_color_attachment(
                frame,
                0,
                ColorAttachment {
                    clear_color: [0.0; 4],
                    texture: TextureHandle(100 + frame as u32),
                    is_swapchain: false,
                },
            );
            pass.set_depth_attachment(
                frame,
                DepthAttachment {
                    use_depth: true,
                    texture: TextureHandle(200 + frame as u32),
                    load: LoadOp::Load,
                    store: StoreOp::Store,
                    clear_depth: 1.0,
                },
            );
        }
        pass
    }

    fn extent() -> Extent2D {
        Extent2D::new(4, 4)
    }

    #[test]
    fn layouts_resolve_per_kind() {
        let deferred = PassDescription::Deferred {
            max_objects: 8,
            max_materials: 4,
            max_draws: 2,
        }
        .layout();
        assert_eq!(deferred.color_slots, 3);
        let set = deferred.descriptor_set_desc();
        assert_eq!(set.slots.len(), 4);
        let args = deferred
            .buffers
            .iter()
            .find(|b| b.key == PassBufferKey::DrawArguments)
            .unwrap();
        assert_eq!(args.size, 40);
        assert!(args.binding.is_none());

        let gui = PassDescription::Gui.layout();
        assert!(gui.buffers.is_empty());
        assert!(!gui.has_depth);
    }

    #[test]
    fn create_binds_buffers_once_per_frame() {
        let mut device = HeadlessDevice::new();
        let pass = lighting(&mut device, 2);
        for frame in 0..2 {
            let writes = device.descriptor_writes(pass.descriptor_set(frame)).unwrap();
            assert_eq!(
                writes.get(&0),
                Some(&DescriptorResource::Buffer(
                    pass.buffer(frame, PassBufferKey::View).handle()
                ))
            );
            assert!(writes.contains_key(&1));
        }
        assert_ne!(pass.descriptor_set(0), pass.descriptor_set(1));
    }

    #[test]
    fn begin_end_records_and_balances() {
        let mut device = HeadlessDevice::new();
        let mut pass = lighting(&mut device, 2);
        let mut stream = CommandStream::new(QueueKind::Graphics, "gfx");
        pass.begin(
            &mut stream,
            Viewport::from_extent(extent()),
            ScissorRect::from_extent(extent()),
            1,
        );
        assert!(!pass.is_balanced(1));
        assert!(pass.is_balanced(0));
        assert_eq!(pass.state(1), PassState::Recording);
        pass.end(&mut stream, 1);
        assert!(pass.is_balanced(1));
        assert_eq!(pass.state(1), PassState::Ended);

        match &stream.commands()[0] {
            Command::BeginRenderPass(begin) => {
                assert_eq!(begin.colors[0].texture, TextureHandle(101));
                let depth = begin.depth.unwrap();
                assert_eq!(depth.texture, TextureHandle(201));
                assert_eq!(depth.load, LoadOp::Load);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            stream.commands()[3],
            Command::BindDescriptorSet { index: PASS_SET, .. }
        ));
        assert!(matches!(stream.commands().last(), Some(Command::EndRenderPass)));

        // Ended slots can begin again next frame.
        pass.begin(
            &mut stream,
            Viewport::from_extent(extent()),
            ScissorRect::from_extent(extent()),
            1,
        );
        pass.end(&mut stream, 1);
        pass.destroy(&mut device);
        assert_eq!(pass.state(0), PassState::Destroyed);
    }

    #[test]
    #[should_panic(expected = "used while Uninitialized")]
    fn begin_before_create_panics() {
        let mut pass = RenderPass::new("lighting", PassDescription::Lighting, 2);
        let mut stream = CommandStream::new(QueueKind::Graphics, "gfx");
        pass.begin(
            &mut stream,
            Viewport::from_extent(extent()),
            ScissorRect::from_extent(extent()),
            0,
        );
    }

    #[test]
    #[should_panic(expected = "begun while Recording")]
    fn double_begin_panics() {
        let mut device = HeadlessDevice::new();
        let mut pass = lighting(&mut device, 1);
        let mut a = CommandStream::new(QueueKind::Graphics, "a");
        let mut b = CommandStream::new(QueueKind::Graphics, "b");
        let vp = Viewport::from_extent(extent());
        let sc = ScissorRect::from_extent(extent());
        pass.begin(&mut a, vp, sc, 0);
        pass.begin(&mut b, vp, sc, 0);
    }

    #[test]
    #[should_panic(expected = "ended while Created")]
    fn end_without_begin_panics() {
        let mut device = HeadlessDevice::new();
        let mut pass = lighting(&mut device, 1);
        let mut stream = CommandStream::new(QueueKind::Graphics, "gfx");
        pass.end(&mut stream, 0);
    }

    #[test]
    #[should_panic(expected = "destroyed while frame 0 is recording")]
    fn destroy_while_recording_panics() {
        let mut device = HeadlessDevice::new();
        let mut pass = lighting(&mut device, 1);
        let mut stream = CommandStream::new(QueueKind::Graphics, "gfx");
        pass.begin(
            &mut stream,
            Viewport::from_extent(extent()),
            ScissorRect::from_extent(extent()),
            0,
        );
        pass.destroy(&mut device);
    }

    #[test]
    #[should_panic(expected = "no DrawArguments buffer")]
    fn missing_buffer_key_panics() {
        let mut device = HeadlessDevice::new();
        let mut pass = lighting(&mut device, 1);
        pass.buffer_mut(0, PassBufferKey::DrawArguments);
    }

    #[test]
    #[should_panic(expected = "no color attachment")]
    fn begin_without_attachment_panics() {
        let mut device = HeadlessDevice::new();
        let mut pass = RenderPass::new("gui", PassDescription::Gui, 1);
        pass.create(&mut device).unwrap();
        let mut stream = CommandStream::new(QueueKind::Graphics, "gfx");
        pass.begin(
            &mut stream,
            Viewport::from_extent(extent()),
            ScissorRect::from_extent(extent()),
            0,
        );
    }

    #[test]
    fn pass_buffers_flow_through_upload_queue() {
        let mut device = HeadlessDevice::new();
        let mut pass = lighting(&mut device, 2);
        pass.buffer_mut(0, PassBufferKey::Lighting).write_pod(0, &[1.0f32; 4]);
        pass.buffer_mut(1, PassBufferKey::View).write_pod(0, &[2.0f32; 4]);

        let mut stream = CommandStream::new(QueueKind::Transfer, "copy");
        let mut queue = UploadQueue::new();
        pass.add_buffers_to_upload_queue(0, &mut queue);
        assert_eq!(queue.len(), 2);
        assert!(queue.flush_all(&mut stream));
        // Only frame 0's dirty buffer is recorded.
        assert_eq!(stream.len(), 1);
        assert!(pass.buffer(1, PassBufferKey::View).is_dirty());
    }

    #[test]
    fn external_textures_rebind() {
        let mut device = HeadlessDevice::new();
        let mut pass = lighting(&mut device, 1);
        pass.bind_resources(
            &mut device,
            0,
            &[DescriptorWrite::texture(LIGHTING_ALBEDO_BINDING, TextureHandle(7))],
        )
        .unwrap();
        pass.bind_resources(
            &mut device,
            0,
            &[DescriptorWrite::texture(LIGHTING_ALBEDO_BINDING, TextureHandle(8))],
        )
        .unwrap();
        let writes = device.descriptor_writes(pass.descriptor_set(0)).unwrap();
        assert_eq!(
            writes.get(&LIGHTING_ALBEDO_BINDING),
            Some(&DescriptorResource::Texture(TextureHandle(8)))
        );
    }

    #[test]
    #[should_panic(expected = "not an external slot")]
    fn binding_owned_slot_panics() {
        let mut device = HeadlessDevice::new();
        let mut pass = lighting(&mut device, 1);
        let _ = pass.bind_resources(&mut device, 0, &[DescriptorWrite::texture(0, TextureHandle(1))]);
    }
}
