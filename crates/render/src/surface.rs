//! UI compositor.
//!
//! The logic side appends [`GuiFrame`]s with [`SurfaceRenderer::tick`]; the
//! render side takes them over in one step with
//! [`SurfaceRenderer::sync_render`] and draws the taken frame onto a caller
//! supplied [`SurfaceImage`]. Texture references are re-resolved right
//! before upload so a reload between record and render still draws the
//! right texture.

use std::sync::Arc;

use strata_assets::ResourceStore;
use strata_common::{Extent2D, ResourceId};
use strata_gfx::{
    Buffer, BufferUsage, CommandStream, DescriptorSetHandle, DescriptorWrite, GfxError, GpuDevice,
    GuiVertex, IndexFormat, ResourceState, ScissorRect, SemaphoreData, SemaphoreHandle, Texture,
    TextureFormat, TextureHandle, TextureUsage, UploadQueue, Viewport,
};

use crate::config::SurfaceConfig;
use crate::context::EngineContext;
use crate::error::RenderError;
use crate::frame::{FrameRing, FrameSync};
use crate::gui::{DrawRequest, GuiFrame, GuiRenderer, GuiShaders};
use crate::pass::{ColorAttachment, GLOBAL_SET, GUI_MATERIALS_BINDING, PassDescription, RenderPass};
use crate::pipelines::{create_global_set, update_global_set};

const VERTEX_BYTES: u64 = std::mem::size_of::<GuiVertex>() as u64;
const INDEX_BYTES: u64 = std::mem::size_of::<u32>() as u64;

/// A presentable image the compositor draws onto. Acquiring and presenting
/// it is the caller's business; the compositor leaves it in
/// [`ResourceState::Present`].
#[derive(Debug)]
pub struct SurfaceImage {
    texture: Texture,
}

impl SurfaceImage {
    pub fn create(
        device: &mut dyn GpuDevice,
        label: impl Into<String>,
        extent: Extent2D,
        format: TextureFormat,
    ) -> Result<Self, GfxError> {
        Ok(Self {
            texture: Texture::create(device, label, extent, format, TextureUsage::ColorTarget)?,
        })
    }

    pub fn handle(&self) -> TextureHandle {
        self.texture.handle()
    }

    pub fn extent(&self) -> Extent2D {
        self.texture.extent()
    }

    pub fn state(&self) -> ResourceState {
        self.texture.state()
    }

    pub fn destroy(self, device: &mut dyn GpuDevice) {
        self.texture.destroy(device);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SurfaceStats {
    pub frame: usize,
    pub requests: u32,
    pub draws: u32,
    /// Requests whose shader is not registered.
    pub skipped: u32,
    /// Requests whose texture did not resolve at upload time.
    pub invalid: u32,
    /// Requests whose clip rect lies outside the image.
    pub clipped: u32,
    pub pipeline_binds: u32,
    /// Buffers recreated at a larger size this frame.
    pub grown: u32,
    pub copy_submitted: bool,
}

#[derive(Debug)]
struct SurfaceFrame {
    sync: FrameSync,
    vertices: Buffer,
    indices: Buffer,
    materials: Buffer,
    global_set: DescriptorSetHandle,
    global_generation: u64,
    upload_wait: SemaphoreData,
}

impl SurfaceFrame {
    fn destroy(self, device: &mut dyn GpuDevice) {
        self.vertices.destroy(device);
        self.indices.destroy(device);
        self.materials.destroy(device);
        device.destroy_descriptor_set(self.global_set);
        self.sync.destroy(device);
    }
}

/// Recreate `buffer` at the next power of two when `needed` bytes do not fit.
/// Returns whether it grew.
fn ensure_capacity(
    device: &mut dyn GpuDevice,
    buffer: &mut Buffer,
    needed: u64,
) -> Result<bool, GfxError> {
    if needed <= buffer.size() {
        return Ok(false);
    }
    let size = needed.next_power_of_two();
    let grown = Buffer::create(device, size, buffer.usage(), buffer.label().to_owned())?;
    tracing::debug!(buffer = buffer.label(), from = buffer.size(), to = size, "gui buffer grown");
    std::mem::replace(buffer, grown).destroy(device);
    Ok(true)
}

/// Push constants of one GUI draw: material byte offset and kind tag.
fn draw_constants(request: &DrawRequest) -> Option<[u32; 4]> {
    let offset = u32::try_from(request.material_offset).ok()?;
    Some([offset, request.material.kind.tag(), 0, 0])
}

pub struct SurfaceRenderer {
    config: SurfaceConfig,
    context: Arc<EngineContext>,
    frames: FrameRing<SurfaceFrame>,
    pass: RenderPass,
    cpu: GuiFrame,
    render: GuiFrame,
    stats: SurfaceStats,
}

impl SurfaceRenderer {
    pub fn new(
        device: &mut dyn GpuDevice,
        resources: &ResourceStore,
        config: SurfaceConfig,
        context: Arc<EngineContext>,
    ) -> Result<Self, RenderError> {
        config.validate()?;
        let frames_in_flight = config.frames_in_flight;
        let mut pass = RenderPass::new("gui", PassDescription::Gui, frames_in_flight);
        pass.create(device)?;
        let frames = FrameRing::try_new(frames_in_flight, |i| -> Result<SurfaceFrame, GfxError> {
            Ok(SurfaceFrame {
                sync: FrameSync::create(&mut *device, &format!("surface-{i}"))?,
                vertices: Buffer::create(
                    &mut *device,
                    config.initial_vertices as u64 * VERTEX_BYTES,
                    BufferUsage::Vertex,
                    format!("gui-vertices-{i}"),
                )?,
                indices: Buffer::create(
                    &mut *device,
                    config.initial_indices as u64 * INDEX_BYTES,
                    BufferUsage::Index,
                    format!("gui-indices-{i}"),
                )?,
                materials: Buffer::create(
                    &mut *device,
                    config.initial_material_bytes as u64,
                    BufferUsage::Storage,
                    format!("gui-materials-{i}"),
                )?,
                global_set: create_global_set(&mut *device, resources)?,
                global_generation: resources.bindless_generation(),
                upload_wait: SemaphoreData::NONE,
            })
        })?;
        for (i, frame) in frames.iter().enumerate() {
            pass.bind_resources(
                device,
                i,
                &[DescriptorWrite::buffer(GUI_MATERIALS_BINDING, frame.materials.handle())],
            )?;
        }
        tracing::debug!(frames_in_flight, "surface renderer created");
        Ok(Self {
            config,
            context,
            frames,
            pass,
            cpu: GuiFrame::default(),
            render: GuiFrame::default(),
            stats: SurfaceStats::default(),
        })
    }

    pub fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    pub fn shaders(&self) -> GuiShaders {
        GuiShaders::from_config(&self.config)
    }

    /// A recorder for one tick of UI draws.
    pub fn gui<'r>(&self, resources: &'r ResourceStore) -> GuiRenderer<'r> {
        GuiRenderer::new(resources, self.shaders())
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    pub fn pass(&self) -> &RenderPass {
        &self.pass
    }

    pub fn frame_signal_semaphore(&self, frame: usize) -> SemaphoreHandle {
        self.frames.get(frame).sync.signal_semaphore()
    }

    pub fn vertex_buffer_size(&self, frame: usize) -> u64 {
        self.frames.get(frame).vertices.size()
    }

    pub fn material_buffer(&self, frame: usize) -> &Buffer {
        &self.frames.get(frame).materials
    }

    pub fn last_stats(&self) -> SurfaceStats {
        self.stats
    }

    pub fn cpu_request_count(&self) -> usize {
        self.cpu.requests.len()
    }

    pub fn render_request_count(&self) -> usize {
        self.render.requests.len()
    }

    /// Requests taken by the last [`SurfaceRenderer::sync_render`], with their
    /// late-patched state after a render.
    pub fn render_frame(&self) -> &GuiFrame {
        &self.render
    }

    /// Append one flushed tick of UI draws to the logic-side list.
    pub fn tick(&mut self, frame: GuiFrame) {
        self.cpu.append(frame);
    }

    /// Hand the logic-side list to the render side and start a new one.
    pub fn sync_render(&mut self) {
        self.render = std::mem::take(&mut self.cpu);
        tracing::trace!(requests = self.render.requests.len(), "surface draw list synced");
    }

    /// Record the taken draw list onto `image` in slot `frame`. The copy for
    /// the slot is submitted here; the returned stream is closed and goes
    /// out with [`SurfaceRenderer::submit`].
    pub fn render(
        &mut self,
        device: &mut dyn GpuDevice,
        frame: usize,
        resources: &ResourceStore,
        image: &mut SurfaceImage,
    ) -> Result<&CommandStream, RenderError> {
        let context = Arc::clone(&self.context);
        let _scope = context.profiler.scope("surface_render");
        let _span = tracing::info_span!("surface_render", frame).entered();

        let mut stats = SurfaceStats {
            frame,
            requests: self.render.requests.len() as u32,
            ..SurfaceStats::default()
        };
        {
            let surface_frame = self.frames.get_mut(frame);
            surface_frame.sync.begin_frame(device)?;
            let generation = resources.bindless_generation();
            if surface_frame.global_generation != generation {
                update_global_set(device, surface_frame.global_set, resources)?;
                surface_frame.global_generation = generation;
            }
            surface_frame.upload_wait = resources.upload_semaphore();
        }
        self.update_buffers(device, frame, resources, &mut stats)?;

        let Self {
            config,
            frames,
            pass,
            render,
            stats: last_stats,
            ..
        } = self;
        let surface_frame = frames.get_mut(frame);
        stats.copy_submitted = surface_frame.sync.submit_copy(device)?;

        let extent = image.extent();
        let stream = &mut surface_frame.sync.graphics;
        stream.barrier(
            image
                .texture
                .transition(ResourceState::ColorAttachment)
                .into_iter()
                .collect(),
        );
        pass.set_color_attachment(
            frame,
            0,
            ColorAttachment {
                clear_color: config.clear_color,
                texture: image.handle(),
                is_swapchain: true,
            },
        );
        pass.begin(stream, Viewport::from_extent(extent), ScissorRect::from_extent(extent), frame);
        stream.bind_descriptor_set(GLOBAL_SET, surface_frame.global_set);
        stream.bind_vertex_buffer(surface_frame.vertices.handle(), 0);
        stream.bind_index_buffer(surface_frame.indices.handle(), 0, IndexFormat::U32);

        let mut bound: Option<ResourceId> = None;
        for request in &render.requests {
            if !request.valid {
                continue;
            }
            if bound != Some(request.shader) {
                let Some(shader) = resources.shader(request.shader) else {
                    tracing::warn!(frame, shader = ?request.shader, "gui shader missing; draw skipped");
                    stats.skipped += 1;
                    continue;
                };
                stream.bind_pipeline(shader.pipeline);
                bound = Some(request.shader);
                stats.pipeline_binds += 1;
            }
            let Some(scissor) = request.clip.to_scissor().clamp_to(extent) else {
                stats.clipped += 1;
                continue;
            };
            let Some(constants) = draw_constants(request) else {
                tracing::warn!(
                    frame,
                    offset = request.material_offset,
                    "gui material offset does not fit a push constant; draw skipped"
                );
                stats.skipped += 1;
                continue;
            };
            stream.set_scissor(scissor);
            stream.push_constants(bytemuck::cast_slice(&constants));
            stream.draw_indexed(request.index_count, 1, request.first_index, request.vertex_offset, 0);
            stats.draws += 1;
        }
        pass.end(stream, frame);
        stream.barrier(
            image
                .texture
                .transition(ResourceState::Present)
                .into_iter()
                .collect(),
        );
        stream.close();

        tracing::trace!(
            frame,
            requests = stats.requests,
            draws = stats.draws,
            skipped = stats.skipped,
            invalid = stats.invalid,
            clipped = stats.clipped,
            grown = stats.grown,
            "surface frame recorded"
        );
        *last_stats = stats;
        Ok(&surface_frame.sync.graphics)
    }

    /// Submit the stream recorded by [`SurfaceRenderer::render`], waiting on
    /// `waits`, this slot's copy and the store's last upload.
    pub fn submit(
        &mut self,
        device: &mut dyn GpuDevice,
        frame: usize,
        waits: &[SemaphoreData],
    ) -> Result<SemaphoreData, RenderError> {
        let surface_frame = self.frames.get_mut(frame);
        let mut all_waits = waits.to_vec();
        all_waits.push(surface_frame.upload_wait);
        Ok(surface_frame.sync.submit_graphics(device, &all_waits)?)
    }

    /// Late-patch texture indices, then stage and upload this slot's
    /// geometry and materials, growing buffers as needed.
    fn update_buffers(
        &mut self,
        device: &mut dyn GpuDevice,
        frame: usize,
        resources: &ResourceStore,
        stats: &mut SurfaceStats,
    ) -> Result<(), GfxError> {
        for request in &mut self.render.requests {
            let Some(slot) = request.material.kind.texture_mut() else {
                continue;
            };
            match resources.texture(slot.id) {
                Some(entry) => {
                    slot.bindless_index = entry.bindless_index;
                    request.valid = true;
                }
                None => {
                    if request.valid {
                        tracing::warn!(frame, texture = ?slot.id, "gui texture vanished before render; draw skipped");
                    }
                    slot.bindless_index = 0;
                    request.valid = false;
                }
            }
            if !request.valid {
                stats.invalid += 1;
            }
        }
        let blob = self.render.material_blob();

        let render = &self.render;
        let surface_frame = self.frames.get_mut(frame);
        let vertex_bytes = render.vertices.len() as u64 * VERTEX_BYTES;
        let index_bytes = render.indices.len() as u64 * INDEX_BYTES;
        if ensure_capacity(device, &mut surface_frame.vertices, vertex_bytes)? {
            stats.grown += 1;
        }
        if ensure_capacity(device, &mut surface_frame.indices, index_bytes)? {
            stats.grown += 1;
        }
        if ensure_capacity(device, &mut surface_frame.materials, blob.len() as u64)? {
            stats.grown += 1;
            self.pass.bind_resources(
                device,
                frame,
                &[DescriptorWrite::buffer(
                    GUI_MATERIALS_BINDING,
                    surface_frame.materials.handle(),
                )],
            )?;
        }

        if !render.vertices.is_empty() {
            surface_frame.vertices.write_slice(0, &render.vertices);
        }
        if !render.indices.is_empty() {
            surface_frame.indices.write_slice(0, &render.indices);
        }
        surface_frame.materials.buffer_data(0, &blob);

        let _span = tracing::info_span!("upload_flush", frame).entered();
        let mut queue = UploadQueue::new();
        queue.add_buffer_request(&mut surface_frame.vertices);
        queue.add_buffer_request(&mut surface_frame.indices);
        queue.add_buffer_request(&mut surface_frame.materials);
        queue.flush_all(&mut surface_frame.sync.copy);
        Ok(())
    }

    /// Drain the device and release everything this renderer owns.
    pub fn destroy(mut self, device: &mut dyn GpuDevice) -> Result<(), RenderError> {
        device.wait_idle()?;
        self.pass.destroy(device);
        for frame in self.frames.into_vec() {
            frame.destroy(device);
        }
        tracing::debug!("surface renderer destroyed");
        Ok(())
    }
}
