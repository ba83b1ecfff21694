//! Deferred renderer for one world.
//!
//! Per frame: update view, lighting, object and material data, batch draws
//! by shader then mesh, upload on the transfer queue, record the geometry
//! pass into the G-buffer and the lighting pass into the output target, and
//! submit waiting on the caller's semaphore and this frame's copy.
//!
//! Size-relative targets are owned here, one set per frame in flight, and
//! handed to the passes by handle.

mod batch;
mod extension;

pub use batch::{DrawBatches, DrawItem, ShaderBatch, build_batches};
pub use extension::WorldRendererExtension;

use std::collections::BTreeMap;
use std::sync::Arc;

use bytemuck::Zeroable;
use glam::Vec3;
use strata_assets::ResourceStore;
use strata_common::{Extent2D, ResourceId, Transform};
use strata_ecs::{Atmosphere, Camera, LightKind, PlacedLight, Renderable, World};
use strata_gfx::{
    DescriptorSetHandle, DescriptorWrite, GfxError, GpuDevice, IndexFormat, LoadOp,
    ResourceState, SamplerKind, ScissorRect, SemaphoreData, SemaphoreHandle, StoreOp, Texture,
    TextureHandle, TextureUsage, UploadQueue, Viewport,
};

use crate::config::RendererConfig;
use crate::context::EngineContext;
use crate::error::RenderError;
use crate::frame::{FrameRing, FrameSync};
use crate::gpu_data::{
    GpuDrawArguments, GpuLight, GpuLightingData, GpuMaterialData, GpuObjectData, GpuViewData,
    MAX_LIGHTS,
};
use crate::pass::{
    ColorAttachment, DepthAttachment, GLOBAL_SET, LIGHTING_ALBEDO_BINDING,
    LIGHTING_NORMAL_BINDING, LIGHTING_POSITION_BINDING, PassBufferKey, PassDescription,
    RenderPass,
};
use crate::pipelines::{
    DEPTH_FORMAT, GBUFFER_ALBEDO_FORMAT, GBUFFER_NORMAL_FORMAT, GBUFFER_POSITION_FORMAT,
    LIGHTING_OUTPUT_FORMAT, create_global_set, update_global_set,
};

/// Handles of one frame slot's size-relative targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetHandles {
    pub albedo: TextureHandle,
    pub position: TextureHandle,
    pub normal: TextureHandle,
    pub depth: TextureHandle,
    pub output: TextureHandle,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorldFrameStats {
    pub frame: usize,
    pub objects: u32,
    /// Indirect draw records issued by the geometry pass.
    pub draws: u32,
    pub skipped: u32,
    pub pipeline_binds: u32,
    pub copy_submitted: bool,
}

/// World state pulled by [`WorldRenderer::fetch_renderables`].
#[derive(Debug, Clone, Default)]
struct RenderSnapshot {
    renderables: Vec<Renderable>,
    lights: Vec<PlacedLight>,
    camera: Option<(Transform, Camera)>,
    atmosphere: Atmosphere,
    time: f32,
}

#[derive(Debug)]
struct FrameTargets {
    albedo: Texture,
    position: Texture,
    normal: Texture,
    depth: Texture,
    output: Texture,
}

impl FrameTargets {
    fn create(device: &mut dyn GpuDevice, frame: usize, size: Extent2D) -> Result<Self, GfxError> {
        let label = |name: &str| format!("world-{name}-{frame}");
        Ok(Self {
            albedo: Texture::create(
                device,
                label("albedo"),
                size,
                GBUFFER_ALBEDO_FORMAT,
                TextureUsage::ColorTarget,
            )?,
            position: Texture::create(
                device,
                label("position"),
                size,
                GBUFFER_POSITION_FORMAT,
                TextureUsage::ColorTarget,
            )?,
            normal: Texture::create(
                device,
                label("normal"),
                size,
                GBUFFER_NORMAL_FORMAT,
                TextureUsage::ColorTarget,
            )?,
            depth: Texture::create(device, label("depth"), size, DEPTH_FORMAT, TextureUsage::DepthTarget)?,
            output: Texture::create(
                device,
                label("output"),
                size,
                LIGHTING_OUTPUT_FORMAT,
                TextureUsage::ColorTarget,
            )?,
        })
    }

    fn handles(&self) -> TargetHandles {
        TargetHandles {
            albedo: self.albedo.handle(),
            position: self.position.handle(),
            normal: self.normal.handle(),
            depth: self.depth.handle(),
            output: self.output.handle(),
        }
    }

    fn destroy(self, device: &mut dyn GpuDevice) {
        for texture in [self.albedo, self.position, self.normal, self.depth, self.output] {
            texture.destroy(device);
        }
    }
}

#[derive(Debug)]
struct WorldFrame {
    sync: FrameSync,
    targets: Option<FrameTargets>,
    global_set: DescriptorSetHandle,
    global_generation: u64,
}

pub struct WorldRenderer {
    config: RendererConfig,
    context: Arc<EngineContext>,
    size: Extent2D,
    frames: FrameRing<WorldFrame>,
    geometry_pass: RenderPass,
    lighting_pass: RenderPass,
    extensions: Vec<Box<dyn WorldRendererExtension>>,
    snapshot: RenderSnapshot,
    delta: f32,
    stats: WorldFrameStats,
}

impl WorldRenderer {
    pub fn new(
        device: &mut dyn GpuDevice,
        resources: &ResourceStore,
        config: RendererConfig,
        context: Arc<EngineContext>,
        size: Extent2D,
    ) -> Result<Self, RenderError> {
        config.validate()?;
        let frames_in_flight = config.frames_in_flight;
        let mut geometry_pass = RenderPass::new(
            "geometry",
            PassDescription::Deferred {
                max_objects: config.max_objects,
                max_materials: config.max_materials,
                max_draws: config.max_draws,
            },
            frames_in_flight,
        );
        geometry_pass.create(device)?;
        let mut lighting_pass = RenderPass::new("lighting", PassDescription::Lighting, frames_in_flight);
        lighting_pass.create(device)?;

        let frames = FrameRing::try_new(frames_in_flight, |i| -> Result<WorldFrame, GfxError> {
            Ok(WorldFrame {
                sync: FrameSync::create(&mut *device, &format!("world-{i}"))?,
                targets: None,
                global_set: create_global_set(&mut *device, resources)?,
                global_generation: resources.bindless_generation(),
            })
        })?;

        let mut renderer = Self {
            config,
            context,
            size: Extent2D::default(),
            frames,
            geometry_pass,
            lighting_pass,
            extensions: Vec::new(),
            snapshot: RenderSnapshot::default(),
            delta: 0.0,
            stats: WorldFrameStats::default(),
        };
        renderer.resize(device, size)?;
        tracing::debug!(frames_in_flight, width = size.width, height = size.height, "world renderer created");
        Ok(renderer)
    }

    pub fn add_extension(&mut self, extension: Box<dyn WorldRendererExtension>) {
        tracing::debug!(extension = extension.name(), "world renderer extension added");
        self.extensions.push(extension);
    }

    pub fn extension_names(&self) -> Vec<&str> {
        self.extensions.iter().map(|e| e.name()).collect()
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn size(&self) -> Extent2D {
        self.size
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    pub fn geometry_pass(&self) -> &RenderPass {
        &self.geometry_pass
    }

    pub fn lighting_pass(&self) -> &RenderPass {
        &self.lighting_pass
    }

    /// Semaphore signaled by `frame`'s graphics submission.
    pub fn frame_signal_semaphore(&self, frame: usize) -> SemaphoreHandle {
        self.frames.get(frame).sync.signal_semaphore()
    }

    pub fn global_set(&self, frame: usize) -> DescriptorSetHandle {
        self.frames.get(frame).global_set
    }

    pub fn targets(&self, frame: usize) -> Option<TargetHandles> {
        self.frames.get(frame).targets.as_ref().map(FrameTargets::handles)
    }

    /// Lit image of `frame`, left in shader-readable state after its render.
    pub fn output_texture(&self, frame: usize) -> Option<TextureHandle> {
        self.targets(frame).map(|t| t.output)
    }

    pub fn last_stats(&self) -> WorldFrameStats {
        self.stats
    }

    /// Pull this tick's renderables, lights, camera and atmosphere.
    pub fn fetch_renderables(&mut self, world: &World) {
        self.snapshot = RenderSnapshot {
            renderables: world.renderables(),
            lights: world.lights(),
            camera: world.active_camera(),
            atmosphere: *world.atmosphere(),
            time: world.time() as f32,
        };
    }

    pub fn pre_tick(&mut self) {
        for extension in &mut self.extensions {
            extension.pre_tick();
        }
    }

    pub fn tick(&mut self, delta: f32) {
        self.delta = delta;
        for extension in &mut self.extensions {
            extension.tick(delta);
        }
    }

    /// Recreate every slot's targets at `size` and re-register them with the
    /// passes. A zero-area size only pauses rendering.
    pub fn resize(&mut self, device: &mut dyn GpuDevice, size: Extent2D) -> Result<(), RenderError> {
        let has_targets = self.frames.iter().all(|f| f.targets.is_some());
        if size == self.size && (size.is_zero_area() || has_targets) {
            return Ok(());
        }
        self.size = size;
        if size.is_zero_area() {
            tracing::debug!(width = size.width, height = size.height, "zero-area viewport; rendering paused");
            return Ok(());
        }
        let _span = tracing::info_span!("world_resize", width = size.width, height = size.height).entered();
        device.wait_idle()?;
        for frame in 0..self.frames.len() {
            let world_frame = self.frames.get_mut(frame);
            if let Some(old) = world_frame.targets.take() {
                old.destroy(device);
            }
            let targets = FrameTargets::create(device, frame, size)?;
            let handles = targets.handles();
            world_frame.targets = Some(targets);
            self.attach(device, frame, handles)?;
        }
        tracing::debug!(width = size.width, height = size.height, "world targets recreated");
        Ok(())
    }

    fn attach(
        &mut self,
        device: &mut dyn GpuDevice,
        frame: usize,
        targets: TargetHandles,
    ) -> Result<(), GfxError> {
        let clear = self.config.clear_color;
        for (slot, texture) in [targets.albedo, targets.position, targets.normal]
            .into_iter()
            .enumerate()
        {
            self.geometry_pass.set_color_attachment(
                frame,
                slot,
                ColorAttachment {
                    clear_color: if slot == 0 { clear } else { [0.0; 4] },
                    texture,
                    is_swapchain: false,
                },
            );
        }
        self.geometry_pass.set_depth_attachment(
            frame,
            DepthAttachment {
                use_depth: true,
                texture: targets.depth,
                load: LoadOp::Clear,
                store: StoreOp::Store,
                clear_depth: 1.0,
            },
        );
        self.lighting_pass.set_color_attachment(
            frame,
            0,
            ColorAttachment {
                clear_color: clear,
                texture: targets.output,
                is_swapchain: false,
            },
        );
        // Lighting reuses the geometry depth for the skybox and forward draws.
        self.lighting_pass.set_depth_attachment(
            frame,
            DepthAttachment {
                use_depth: true,
                texture: targets.depth,
                load: LoadOp::Load,
                store: StoreOp::Store,
                clear_depth: 1.0,
            },
        );
        self.lighting_pass.bind_resources(
            device,
            frame,
            &[
                DescriptorWrite::texture(LIGHTING_ALBEDO_BINDING, targets.albedo),
                DescriptorWrite::texture(LIGHTING_POSITION_BINDING, targets.position),
                DescriptorWrite::texture(LIGHTING_NORMAL_BINDING, targets.normal),
            ],
        )
    }

    /// Record and submit one frame into slot `frame`. Returns the value the
    /// next consumer must wait on; `wait` itself when nothing was rendered.
    pub fn render(
        &mut self,
        device: &mut dyn GpuDevice,
        resources: &ResourceStore,
        frame: usize,
        wait: SemaphoreData,
    ) -> Result<SemaphoreData, RenderError> {
        if self.size.is_zero_area() || self.frames.get(frame).targets.is_none() {
            tracing::trace!(frame, "zero-area viewport; frame skipped");
            return Ok(wait);
        }
        let context = Arc::clone(&self.context);
        let _scope = context.profiler.scope("world_render");
        let _span = tracing::info_span!("world_render", frame).entered();

        {
            let world_frame = self.frames.get_mut(frame);
            world_frame.sync.begin_frame(device)?;
            let generation = resources.bindless_generation();
            if world_frame.global_generation != generation {
                update_global_set(device, world_frame.global_set, resources)?;
                world_frame.global_generation = generation;
            }
        }

        let mut stats = WorldFrameStats {
            frame,
            ..WorldFrameStats::default()
        };
        let batches = self.update_buffers(resources, frame, &mut stats);

        let Self {
            config,
            size,
            frames,
            geometry_pass,
            lighting_pass,
            extensions,
            stats: last_stats,
            ..
        } = self;
        let WorldFrame {
            sync,
            targets,
            global_set,
            ..
        } = frames.get_mut(frame);

        {
            let mut queue = UploadQueue::new();
            geometry_pass.add_buffers_to_upload_queue(frame, &mut queue);
            lighting_pass.add_buffers_to_upload_queue(frame, &mut queue);
            for extension in extensions.iter_mut() {
                extension.copy_buffers(frame, &mut queue);
            }
            queue.flush_all(&mut sync.copy);
        }
        stats.copy_submitted = sync.submit_copy(device)?;

        let Some(targets) = targets.as_mut() else {
            unreachable!("frame {frame} has no targets at a non-zero size");
        };
        let stream = &mut sync.graphics;
        let viewport = Viewport::from_extent(*size);
        let scissor = ScissorRect::from_extent(*size);

        stream.barrier(
            [
                targets.albedo.transition(ResourceState::ColorAttachment),
                targets.position.transition(ResourceState::ColorAttachment),
                targets.normal.transition(ResourceState::ColorAttachment),
                targets.depth.transition(ResourceState::DepthAttachment),
            ]
            .into_iter()
            .flatten()
            .collect(),
        );

        geometry_pass.begin(stream, viewport, scissor, frame);
        stream.bind_descriptor_set(GLOBAL_SET, *global_set);
        let geometry = resources.geometry();
        stream.bind_vertex_buffer(geometry.vertex_buffer(), 0);
        stream.bind_index_buffer(geometry.index_buffer(), 0, IndexFormat::U32);
        let arguments = geometry_pass.buffer(frame, PassBufferKey::DrawArguments).handle();
        let mut bound = None;
        for batch in &batches.shaders {
            if bound != Some(batch.pipeline) {
                stream.bind_pipeline(batch.pipeline);
                bound = Some(batch.pipeline);
                stats.pipeline_binds += 1;
            }
            stream.draw_indexed_indirect(
                arguments,
                batch.byte_offset(),
                batch.argument_count,
                GpuDrawArguments::STRIDE,
            );
        }
        for extension in extensions.iter_mut() {
            extension.render(frame, stream);
        }
        geometry_pass.end(stream, frame);

        stream.barrier(
            [
                targets.albedo.transition(ResourceState::ShaderReadOnly),
                targets.position.transition(ResourceState::ShaderReadOnly),
                targets.normal.transition(ResourceState::ShaderReadOnly),
                targets.output.transition(ResourceState::ColorAttachment),
            ]
            .into_iter()
            .flatten()
            .collect(),
        );

        lighting_pass.begin(stream, viewport, scissor, frame);
        stream.bind_descriptor_set(GLOBAL_SET, *global_set);
        for (role, id) in [
            ("lighting", config.lighting_shader),
            ("skybox", config.skybox_shader),
        ] {
            match resources.shader(id) {
                Some(shader) => {
                    stream.bind_pipeline(shader.pipeline);
                    stats.pipeline_binds += 1;
                    stream.draw(3, 1);
                }
                None => {
                    tracing::warn!(frame, ?id, role, "shader missing; full-screen draw skipped");
                    stats.skipped += 1;
                }
            }
        }
        for extension in extensions.iter_mut() {
            extension.render_forward(frame, stream);
        }
        lighting_pass.end(stream, frame);
        stream.barrier(
            targets
                .output
                .transition(ResourceState::ShaderReadOnly)
                .into_iter()
                .collect(),
        );

        let signal = sync.submit_graphics(device, &[wait, resources.upload_semaphore()])?;
        tracing::trace!(
            frame,
            objects = stats.objects,
            draws = stats.draws,
            skipped = stats.skipped,
            pipeline_binds = stats.pipeline_binds,
            copy = stats.copy_submitted,
            signal = signal.value,
            "world frame submitted"
        );
        *last_stats = stats;
        Ok(signal)
    }

    fn update_buffers(
        &mut self,
        resources: &ResourceStore,
        frame: usize,
        stats: &mut WorldFrameStats,
    ) -> DrawBatches {
        let view = self.view_data();
        self.geometry_pass
            .buffer_mut(frame, PassBufferKey::View)
            .write_pod(0, &view);
        self.lighting_pass
            .buffer_mut(frame, PassBufferKey::View)
            .write_pod(0, &view);
        let lighting = self.lighting_data(resources);
        self.lighting_pass
            .buffer_mut(frame, PassBufferKey::Lighting)
            .write_pod(0, &lighting);

        let (items, objects, materials) = self.collect_draws(resources, stats);
        let batches = build_batches(&items, self.config.max_draws);
        if batches.dropped > 0 {
            tracing::warn!(
                dropped = batches.dropped,
                max_draws = self.config.max_draws,
                "indirect draw capacity exceeded"
            );
            stats.skipped += batches.dropped;
        }

        let pass = &mut self.geometry_pass;
        if !objects.is_empty() {
            pass.buffer_mut(frame, PassBufferKey::Objects).write_slice(0, &objects);
        }
        if !materials.is_empty() {
            pass.buffer_mut(frame, PassBufferKey::Materials).write_slice(0, &materials);
        }
        if !batches.instances.is_empty() {
            pass.buffer_mut(frame, PassBufferKey::DrawInstances)
                .write_slice(0, &batches.instances);
        }
        if !batches.arguments.is_empty() {
            pass.buffer_mut(frame, PassBufferKey::DrawArguments)
                .write_slice(0, &batches.arguments);
        }
        stats.objects = objects.len() as u32;
        stats.draws = batches.arguments.len() as u32;
        batches
    }

    fn view_data(&self) -> GpuViewData {
        let (transform, camera) = self.snapshot.camera.unwrap_or_else(|| {
            (
                Transform::from_position(Vec3::new(0.0, 1.0, 5.0)),
                Camera::default(),
            )
        });
        GpuViewData::new(
            Camera::view(&transform),
            camera.projection(self.size.aspect()),
            transform.position,
            (self.size.width as f32, self.size.height as f32),
            self.snapshot.time,
            self.delta,
            (camera.near, camera.far),
        )
    }

    fn lighting_data(&self, resources: &ResourceStore) -> GpuLightingData {
        let atmosphere = &self.snapshot.atmosphere;
        let mut data = GpuLightingData::zeroed();
        data.sun_direction = atmosphere.sun_direction.normalize_or_zero().extend(0.0).to_array();
        data.sun_color = atmosphere.sun_color.extend(atmosphere.sun_intensity).to_array();
        data.ambient = atmosphere.ambient.extend(1.0).to_array();
        data.sky_zenith = atmosphere.sky_zenith.extend(1.0).to_array();
        data.sky_horizon = atmosphere.sky_horizon.extend(1.0).to_array();

        let lights = &self.snapshot.lights;
        if lights.len() > MAX_LIGHTS {
            tracing::debug!(lights = lights.len(), max = MAX_LIGHTS, "extra lights ignored");
        }
        for (slot, placed) in data.lights.iter_mut().zip(lights) {
            let (kind, range) = match placed.light.kind {
                LightKind::Directional => (0.0, 0.0),
                LightKind::Point { range } => (1.0, range),
            };
            *slot = GpuLight {
                position: placed.position.extend(kind).to_array(),
                direction: placed.direction.extend(range).to_array(),
                color: placed.light.color.extend(placed.light.intensity).to_array(),
            };
        }

        let skybox = atmosphere.skybox.and_then(|id| {
            let entry = resources.texture(id);
            if entry.is_none() {
                tracing::warn!(?id, "skybox texture missing; gradient sky used");
            }
            entry.map(|t| t.bindless_index)
        });
        data.counts = [
            lights.len().min(MAX_LIGHTS) as u32,
            skybox.unwrap_or(0),
            skybox.is_some() as u32,
            0,
        ];
        data
    }

    /// Resolve every renderable against the store. Anything unresolved is
    /// logged and skipped.
    fn collect_draws(
        &self,
        resources: &ResourceStore,
        stats: &mut WorldFrameStats,
    ) -> (Vec<DrawItem>, Vec<GpuObjectData>, Vec<GpuMaterialData>) {
        let max_objects = self.config.max_objects as usize;
        let max_materials = self.config.max_materials as usize;
        let mut items = Vec::new();
        let mut objects = Vec::new();
        let mut materials = Vec::new();
        let mut material_slots: BTreeMap<ResourceId, u32> = BTreeMap::new();

        for (i, renderable) in self.snapshot.renderables.iter().enumerate() {
            if objects.len() == max_objects {
                let remaining = (self.snapshot.renderables.len() - i) as u32;
                tracing::warn!(remaining, max_objects, "object capacity exceeded");
                stats.skipped += remaining;
                break;
            }
            let mesh_component = renderable.mesh;
            let Some(mesh) = resources.mesh(mesh_component.model, mesh_component.mesh_index) else {
                tracing::warn!(
                    entity = ?renderable.entity,
                    model = ?mesh_component.model,
                    mesh = mesh_component.mesh_index,
                    "mesh missing; draw skipped"
                );
                stats.skipped += 1;
                continue;
            };
            let Some(material) = resources.material(mesh_component.material) else {
                tracing::warn!(
                    entity = ?renderable.entity,
                    material = ?mesh_component.material,
                    "material missing; draw skipped"
                );
                stats.skipped += 1;
                continue;
            };
            let Some(shader) = resources.shader(material.shader) else {
                tracing::warn!(
                    entity = ?renderable.entity,
                    shader = ?material.shader,
                    "shader missing; draw skipped"
                );
                stats.skipped += 1;
                continue;
            };

            let material_index = match material_slots.get(&mesh_component.material) {
                Some(&index) => index,
                None => {
                    let albedo_index = match material.albedo {
                        None => 0,
                        Some(id) => match resources.texture(id) {
                            Some(texture) => texture.bindless_index,
                            None => {
                                tracing::warn!(
                                    entity = ?renderable.entity,
                                    texture = ?id,
                                    "albedo texture missing; draw skipped"
                                );
                                stats.skipped += 1;
                                continue;
                            }
                        },
                    };
                    if materials.len() == max_materials {
                        tracing::warn!(max_materials, "material capacity exceeded; draw skipped");
                        stats.skipped += 1;
                        continue;
                    }
                    let sampler_index = match material.sampler.and_then(|id| resources.sampler(id)) {
                        Some(SamplerKind::Nearest) => 1,
                        _ => 0,
                    };
                    let index = materials.len() as u32;
                    materials.push(GpuMaterialData {
                        base_color: material.base_color,
                        albedo_index,
                        sampler_index,
                        roughness: material.roughness,
                        metallic: material.metallic,
                    });
                    material_slots.insert(mesh_component.material, index);
                    index
                }
            };

            let object_index = objects.len() as u32;
            objects.push(GpuObjectData::from_model(renderable.transform.matrix()));
            items.push(DrawItem {
                object_index,
                material_index,
                shader: material.shader,
                pipeline: shader.pipeline,
                mesh_key: (mesh_component.model, mesh_component.mesh_index),
                mesh,
            });
        }
        (items, objects, materials)
    }

    /// Drain the device and release everything this renderer owns.
    pub fn destroy(mut self, device: &mut dyn GpuDevice) -> Result<(), RenderError> {
        device.wait_idle()?;
        self.geometry_pass.destroy(device);
        self.lighting_pass.destroy(device);
        for frame in self.frames.into_vec() {
            if let Some(targets) = frame.targets {
                targets.destroy(device);
            }
            device.destroy_descriptor_set(frame.global_set);
            frame.sync.destroy(device);
        }
        tracing::debug!("world renderer destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use strata_assets::{Material, StoreConfig, primitives};
    use strata_ecs::{Light, MeshComponent};
    use strata_gfx::{
        Buffer, BufferUsage, Command, CommandStream, CompletionMode, DescriptorResource,
        DeviceCall, HeadlessDevice, QueueKind,
    };

    use crate::pipelines::{
        geometry_pipeline_desc, lighting_pipeline_desc, skybox_pipeline_desc,
    };

    const OPAQUE: ResourceId = ResourceId(20);
    const ALT: ResourceId = ResourceId(21);
    const CUBE: ResourceId = ResourceId(30);
    const PLANE: ResourceId = ResourceId(31);
    const RED: ResourceId = ResourceId(40);
    const BLUE: ResourceId = ResourceId(41);
    const GREEN_ALT: ResourceId = ResourceId(42);

    fn store(device: &mut HeadlessDevice) -> ResourceStore {
        let mut store = ResourceStore::new(
            device,
            StoreConfig {
                bindless_capacity: 16,
                max_vertices: 1024,
                max_indices: 4096,
            },
        )
        .unwrap();
        let (vertices, indices) = primitives::cube();
        store.register_model(CUBE, "cube", &vertices, &indices).unwrap();
        let (vertices, indices) = primitives::plane(5.0);
        store.register_model(PLANE, "plane", &vertices, &indices).unwrap();
        let config = RendererConfig::default();
        store
            .register_shader(device, OPAQUE, &geometry_pipeline_desc("opaque", "", 16))
            .unwrap();
        store
            .register_shader(device, ALT, &geometry_pipeline_desc("alt", "", 16))
            .unwrap();
        store
            .register_shader(device, config.lighting_shader, &lighting_pipeline_desc("", 16))
            .unwrap();
        store
            .register_shader(device, config.skybox_shader, &skybox_pipeline_desc("", 16))
            .unwrap();
        store.register_material(RED, Material::new("red", OPAQUE));
        store.register_material(
            BLUE,
            Material {
                base_color: [0.0, 0.0, 1.0, 1.0],
                ..Material::new("blue", OPAQUE)
            },
        );
        store.register_material(GREEN_ALT, Material::new("green", ALT));
        store.upload_pending(device).unwrap();
        store
    }

    fn renderer(device: &mut HeadlessDevice, store: &ResourceStore, size: Extent2D) -> WorldRenderer {
        WorldRenderer::new(
            device,
            store,
            RendererConfig {
                max_objects: 64,
                max_materials: 16,
                max_draws: 16,
                ..RendererConfig::default()
            },
            Arc::new(EngineContext::new()),
            size,
        )
        .unwrap()
    }

    fn spawn_mesh(world: &mut World, x: f32, model: ResourceId, material: ResourceId) {
        let id = world.spawn(Transform::from_position(Vec3::new(x, 0.0, 0.0)));
        world.set_mesh(
            id,
            MeshComponent {
                model,
                mesh_index: 0,
                material,
            },
        );
    }

    fn scene() -> World {
        let mut world = World::new();
        spawn_mesh(&mut world, 0.0, CUBE, RED);
        spawn_mesh(&mut world, 2.0, CUBE, BLUE);
        spawn_mesh(&mut world, 4.0, CUBE, RED);
        spawn_mesh(&mut world, 0.0, PLANE, GREEN_ALT);
        let light = world.spawn(Transform::from_position(Vec3::Y * 3.0));
        world.set_light(light, Light::default());
        world
    }

    fn last_graphics(device: &HeadlessDevice) -> &strata_gfx::SubmissionRecord {
        device
            .submissions()
            .iter()
            .rev()
            .find(|s| s.queue == QueueKind::Graphics)
            .unwrap()
    }

    #[test]
    fn first_render_signals_frame_zero_semaphore() {
        let mut device = HeadlessDevice::new();
        let store = ResourceStore::new(&mut device, StoreConfig::default()).unwrap();
        let mut renderer = WorldRenderer::new(
            &mut device,
            &store,
            RendererConfig {
                frames_in_flight: 2,
                ..RendererConfig::default()
            },
            Arc::new(EngineContext::new()),
            Extent2D::new(4, 4),
        )
        .unwrap();
        let signal = renderer
            .render(&mut device, &store, 0, SemaphoreData::NONE)
            .unwrap();
        assert_eq!(signal.value, 1);
        assert_eq!(signal.semaphore, renderer.frame_signal_semaphore(0));
        assert_ne!(renderer.frame_signal_semaphore(0), renderer.frame_signal_semaphore(1));
    }

    #[test]
    fn draws_are_batched_by_shader_then_mesh() {
        let mut device = HeadlessDevice::new();
        let store = store(&mut device);
        let mut renderer = renderer(&mut device, &store, Extent2D::new(8, 8));
        renderer.fetch_renderables(&scene());
        renderer.tick(0.016);
        renderer
            .render(&mut device, &store, 0, SemaphoreData::NONE)
            .unwrap();

        let stats = renderer.last_stats();
        assert_eq!(stats.objects, 4);
        assert_eq!(stats.draws, 2);
        assert_eq!(stats.skipped, 0);
        // Two geometry shaders plus lighting and skybox.
        assert_eq!(stats.pipeline_binds, 4);
        assert!(stats.copy_submitted);

        let graphics = last_graphics(&device);
        let indirect: Vec<(u64, u32)> = graphics
            .commands
            .iter()
            .filter_map(|c| match c {
                Command::DrawIndexedIndirect {
                    offset,
                    draw_count,
                    stride,
                    ..
                } => {
                    assert_eq!(*stride, 20);
                    Some((*offset, *draw_count))
                }
                _ => None,
            })
            .collect();
        assert_eq!(indirect.len(), 2);
        assert!(indirect.contains(&(0, 1)));
        assert!(indirect.contains(&(20, 1)));
        // Lighting and skybox.
        assert_eq!(graphics.draw_count(), 4);

        let args = device
            .read_buffer(renderer.geometry_pass().buffer(0, PassBufferKey::DrawArguments).handle())
            .unwrap();
        let records: Vec<GpuDrawArguments> = (0..2)
            .map(|i| bytemuck::pod_read_unaligned(&args[i * 20..(i + 1) * 20]))
            .collect();
        let cube = records.iter().find(|r| r.index_count == 36).unwrap();
        assert_eq!(cube.instance_count, 3);
        let plane = records.iter().find(|r| r.index_count == 6).unwrap();
        assert_eq!(plane.instance_count, 1);
    }

    #[test]
    fn graphics_waits_on_copy_and_caller() {
        let mut device = HeadlessDevice::new();
        let store = store(&mut device);
        let mut renderer = renderer(&mut device, &store, Extent2D::new(4, 4));
        let other = device.create_semaphore("external").unwrap();
        let external = SemaphoreData::new(other, 0);
        renderer.render(&mut device, &store, 0, external).unwrap();

        let graphics = last_graphics(&device);
        let copy = device
            .submissions()
            .iter()
            .rev()
            .find(|s| s.queue == QueueKind::Transfer)
            .unwrap();
        assert!(graphics.waits.contains(&copy.signals[0]));
        assert!(graphics.waits.contains(&store.upload_semaphore()));
        // A zero-valued wait is dropped.
        assert!(!graphics.waits.iter().any(|w| w.semaphore == other));
    }

    #[test]
    fn missing_resources_skip_single_draws() {
        let mut device = HeadlessDevice::new();
        let mut store = store(&mut device);
        store.register_material(ResourceId(50), Material::new("no-shader", ResourceId(999)));
        store.register_material(
            ResourceId(51),
            Material {
                albedo: Some(ResourceId(998)),
                ..Material::new("no-texture", OPAQUE)
            },
        );
        let mut renderer = renderer(&mut device, &store, Extent2D::new(4, 4));
        let mut world = World::new();
        spawn_mesh(&mut world, 0.0, CUBE, RED);
        spawn_mesh(&mut world, 1.0, CUBE, ResourceId(997));
        spawn_mesh(&mut world, 2.0, ResourceId(996), RED);
        spawn_mesh(&mut world, 3.0, CUBE, ResourceId(50));
        spawn_mesh(&mut world, 4.0, CUBE, ResourceId(51));
        renderer.fetch_renderables(&world);
        let signal = renderer
            .render(&mut device, &store, 0, SemaphoreData::NONE)
            .unwrap();
        assert_eq!(signal.value, 1);
        let stats = renderer.last_stats();
        assert_eq!(stats.objects, 1);
        assert_eq!(stats.skipped, 4);
        assert_eq!(stats.draws, 1);
    }

    #[test]
    fn missing_lighting_shader_is_skipped() {
        let mut device = HeadlessDevice::new();
        let store = store(&mut device);
        let mut renderer = WorldRenderer::new(
            &mut device,
            &store,
            RendererConfig {
                lighting_shader: ResourceId(1234),
                max_objects: 8,
                ..RendererConfig::default()
            },
            Arc::new(EngineContext::new()),
            Extent2D::new(4, 4),
        )
        .unwrap();
        renderer
            .render(&mut device, &store, 0, SemaphoreData::NONE)
            .unwrap();
        assert_eq!(renderer.last_stats().skipped, 1);
        assert_eq!(last_graphics(&device).draw_count(), 1);
    }

    #[test]
    fn zero_area_render_returns_wait_unchanged() {
        let mut device = HeadlessDevice::new();
        let store = store(&mut device);
        let submitted = device.submissions().len();
        let mut renderer = renderer(&mut device, &store, Extent2D::new(0, 4));
        let wait = SemaphoreData::new(SemaphoreHandle(77), 5);
        assert_eq!(renderer.render(&mut device, &store, 0, wait).unwrap(), wait);
        assert_eq!(device.submissions().len(), submitted);
        assert!(renderer.output_texture(0).is_none());

        renderer.resize(&mut device, Extent2D::new(4, 4)).unwrap();
        let signal = renderer.render(&mut device, &store, 0, SemaphoreData::NONE).unwrap();
        assert_eq!(signal.value, 1);

        // Shrinking to zero keeps the old targets and pauses rendering.
        let before = renderer.targets(0);
        renderer.resize(&mut device, Extent2D::new(4, 0)).unwrap();
        assert_eq!(renderer.targets(0), before);
        assert_eq!(renderer.render(&mut device, &store, 0, wait).unwrap(), wait);
    }

    #[test]
    fn resize_recreates_and_rebinds_targets() {
        let mut device = HeadlessDevice::new();
        let store = store(&mut device);
        let mut renderer = renderer(&mut device, &store, Extent2D::new(4, 4));
        renderer.render(&mut device, &store, 0, SemaphoreData::NONE).unwrap();
        let old: Vec<TargetHandles> = (0..2).map(|f| renderer.targets(f).unwrap()).collect();

        let idles = |device: &HeadlessDevice| {
            device.calls().iter().filter(|c| **c == DeviceCall::WaitIdle).count()
        };
        let before = idles(&device);
        let size = Extent2D::new(8, 6);
        renderer.resize(&mut device, size).unwrap();
        assert_eq!(idles(&device), before + 1);
        for frame in 0..2 {
            let new = renderer.targets(frame).unwrap();
            for handle in [new.albedo, new.position, new.normal, new.depth, new.output] {
                assert_eq!(device.texture_desc(handle).unwrap().extent, size);
            }
            let stale = old[frame];
            for handle in [stale.albedo, stale.position, stale.normal, stale.depth, stale.output] {
                assert!(!device.is_texture_alive(handle));
            }

            let geometry = renderer.geometry_pass();
            assert_eq!(geometry.color_attachment(frame, 0).unwrap().texture, new.albedo);
            assert_eq!(geometry.color_attachment(frame, 2).unwrap().texture, new.normal);
            assert_eq!(geometry.depth_attachment(frame).unwrap().texture, new.depth);
            let lighting = renderer.lighting_pass();
            assert_eq!(lighting.color_attachment(frame, 0).unwrap().texture, new.output);
            let depth = lighting.depth_attachment(frame).unwrap();
            assert_eq!(depth.texture, new.depth);
            assert_eq!(depth.load, LoadOp::Load);

            let writes = device.descriptor_writes(lighting.descriptor_set(frame)).unwrap();
            assert_eq!(
                writes.get(&LIGHTING_POSITION_BINDING),
                Some(&DescriptorResource::Texture(new.position))
            );
        }
        renderer.render(&mut device, &store, 1, SemaphoreData::NONE).unwrap();
        assert!(device.hazards().is_empty());
    }

    #[test]
    fn slots_are_reused_only_after_gpu_completion() {
        let mut device = HeadlessDevice::with_mode(CompletionMode::Manual);
        let store = store(&mut device);
        let mut renderer = renderer(&mut device, &store, Extent2D::new(4, 4));
        let world = scene();
        let mut last = SemaphoreData::NONE;
        for n in 0..6 {
            let frame = n % 2;
            renderer.fetch_renderables(&world);
            let submissions_before = device.submissions().len();
            let previous = device
                .submissions()
                .iter()
                .rev()
                .find(|s| s.signals.iter().any(|sig| sig.semaphore == renderer.frame_signal_semaphore(frame)))
                .map(|s| s.index);
            last = renderer.render(&mut device, &store, frame, last).unwrap();
            if let Some(index) = previous {
                // The slot's previous graphics submission finished before
                // any new submission was made from it.
                assert!(device.submissions()[index].completed);
                assert!(device.submissions().len() > submissions_before);
            }
        }
        assert!(device.hazards().is_empty(), "{:?}", device.hazards());
        assert!(device.pending_count() > 0);
        device.complete_all();
        assert_eq!(device.pending_count(), 0);
    }

    #[test]
    fn global_set_follows_bindless_generation() {
        let mut device = HeadlessDevice::new();
        let mut store = store(&mut device);
        let mut renderer = renderer(&mut device, &store, Extent2D::new(4, 4));
        renderer.render(&mut device, &store, 0, SemaphoreData::NONE).unwrap();
        store
            .register_texture(&mut device, ResourceId(60), "checker", Extent2D::new(1, 1), vec![9; 4])
            .unwrap();
        store.upload_pending(&mut device).unwrap();
        let handle = store.texture(ResourceId(60)).unwrap().handle();

        renderer.render(&mut device, &store, 0, SemaphoreData::NONE).unwrap();
        let set = renderer.global_set(0);
        match device.descriptor_writes(set).unwrap().get(&0) {
            Some(DescriptorResource::TextureArray(handles)) => assert!(handles.contains(&handle)),
            other => panic!("unexpected {other:?}"),
        }
        // Frame 1 has not rendered since, so its set is still stale.
        match device.descriptor_writes(renderer.global_set(1)).unwrap().get(&0) {
            Some(DescriptorResource::TextureArray(handles)) => assert!(!handles.contains(&handle)),
            other => panic!("unexpected {other:?}"),
        }
    }

    struct Recorder {
        log: Rc<RefCell<Vec<&'static str>>>,
        buffer: Buffer,
    }

    impl WorldRendererExtension for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn pre_tick(&mut self) {
            self.log.borrow_mut().push("pre_tick");
        }

        fn tick(&mut self, _delta: f32) {
            self.log.borrow_mut().push("tick");
        }

        fn copy_buffers<'a>(&'a mut self, _frame: usize, queue: &mut UploadQueue<'a>) {
            self.log.borrow_mut().push("copy_buffers");
            self.buffer.write_pod(0, &[7u32; 4]);
            queue.add_buffer_request(&mut self.buffer);
        }

        fn render(&mut self, _frame: usize, stream: &mut CommandStream) {
            self.log.borrow_mut().push("render");
            assert!(stream.in_render_pass());
        }

        fn render_forward(&mut self, _frame: usize, stream: &mut CommandStream) {
            self.log.borrow_mut().push("render_forward");
            stream.draw(3, 1);
        }
    }

    #[test]
    fn extension_hooks_run_in_order() {
        let mut device = HeadlessDevice::new();
        let store = store(&mut device);
        let mut renderer = renderer(&mut device, &store, Extent2D::new(4, 4));
        let log = Rc::new(RefCell::new(Vec::new()));
        let buffer = Buffer::create(&mut device, 16, BufferUsage::Storage, "gizmos").unwrap();
        let gizmo_buffer = buffer.handle();
        renderer.add_extension(Box::new(Recorder {
            log: Rc::clone(&log),
            buffer,
        }));
        assert_eq!(renderer.extension_names(), vec!["recorder"]);

        renderer.pre_tick();
        renderer.tick(0.016);
        renderer.render(&mut device, &store, 0, SemaphoreData::NONE).unwrap();
        assert_eq!(
            *log.borrow(),
            vec!["pre_tick", "tick", "copy_buffers", "render", "render_forward"]
        );
        assert_eq!(device.read_buffer(gizmo_buffer).unwrap()[0], 7);
        // Lighting, skybox and the extension's forward draw.
        assert_eq!(last_graphics(&device).draw_count(), 3);
    }

    #[test]
    fn invalid_config_is_rejected_before_allocating() {
        let mut device = HeadlessDevice::new();
        let store = ResourceStore::new(&mut device, StoreConfig::default()).unwrap();
        let live = device.live_object_count();
        let result = WorldRenderer::new(
            &mut device,
            &store,
            RendererConfig {
                max_draws: 0,
                ..RendererConfig::default()
            },
            Arc::new(EngineContext::new()),
            Extent2D::new(4, 4),
        );
        assert!(matches!(result, Err(RenderError::Config(_))));
        assert_eq!(device.live_object_count(), live);
    }

    #[test]
    fn destroy_releases_everything() {
        let mut device = HeadlessDevice::with_mode(CompletionMode::Manual);
        let store = store(&mut device);
        let mut renderer = renderer(&mut device, &store, Extent2D::new(4, 4));
        renderer.fetch_renderables(&scene());
        renderer.render(&mut device, &store, 0, SemaphoreData::NONE).unwrap();
        renderer.render(&mut device, &store, 1, SemaphoreData::NONE).unwrap();
        renderer.resize(&mut device, Extent2D::new(6, 6)).unwrap();
        renderer.destroy(&mut device).unwrap();
        store.destroy(&mut device).unwrap();
        assert_eq!(device.live_object_count(), 0);
        assert!(device.hazards().is_empty());
    }
}
