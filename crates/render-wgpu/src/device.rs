use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use strata_common::Extent2D;
use strata_gfx::{
    BufferDesc, BufferHandle, COPY_ALIGNMENT, Command, DescriptorResource, DescriptorSetDesc, DescriptorSetHandle,
    DescriptorSlot, DescriptorWrite, GfxError, GpuDevice, PipelineDesc, PipelineHandle,
    RenderPassBegin, SamplerKind, SemaphoreHandle, Submission, TextureDesc, TextureHandle,
};

use crate::convert;

/// Features the frame graph relies on: a bindless texture table indexed per
/// material, push constants for GUI draws and `first_instance` in indirect
/// records.
pub fn required_features() -> wgpu::Features {
    wgpu::Features::TEXTURE_BINDING_ARRAY
        | wgpu::Features::SAMPLED_TEXTURE_AND_STORAGE_BUFFER_ARRAY_NON_UNIFORM_INDEXING
        | wgpu::Features::PUSH_CONSTANTS
        | wgpu::Features::INDIRECT_FIRST_INSTANCE
}

struct TextureState {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TextureDesc,
}

struct SemaphoreState {
    label: String,
    submitted: u64,
    completed: Arc<AtomicU64>,
}

struct SetState {
    desc: DescriptorSetDesc,
    layout: usize,
    resources: BTreeMap<u32, DescriptorResource>,
    /// Built groups keyed by the textures swapped for the placeholder.
    groups: HashMap<Vec<u32>, wgpu::BindGroup>,
}

impl SetState {
    /// Textures of this set that are also attachments of the current pass.
    fn conflicts(&self, attachments: &BTreeSet<u32>) -> Vec<u32> {
        if attachments.is_empty() {
            return Vec::new();
        }
        let mut found: BTreeSet<u32> = BTreeSet::new();
        for resource in self.resources.values() {
            match resource {
                DescriptorResource::Texture(t) if attachments.contains(&t.0) => {
                    found.insert(t.0);
                }
                DescriptorResource::TextureArray(handles) => {
                    found.extend(handles.iter().map(|t| t.0).filter(|id| attachments.contains(id)));
                }
                _ => {}
            }
        }
        found.into_iter().collect()
    }
}

/// [`GpuDevice`] on a single wgpu queue, without a window.
///
/// The transfer and graphics queues of the contract share wgpu's one queue,
/// so cross-queue waits are satisfied by submission order. Barriers are
/// implicit in wgpu and ignored. Buffer and texture copies go through
/// `Queue::write_buffer`/`write_texture` and land before the commands of the
/// submission that carries them.
///
/// A texture cannot be sampled and attached in the same pass, so a set bound
/// inside a pass gets a bind group where the pass's attachments are replaced
/// by a 1x1 placeholder.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_info: wgpu::AdapterInfo,
    next_id: u32,
    buffers: HashMap<u32, (wgpu::Buffer, BufferDesc)>,
    textures: HashMap<u32, TextureState>,
    semaphores: HashMap<u32, SemaphoreState>,
    layouts: Vec<wgpu::BindGroupLayout>,
    layout_index: HashMap<Vec<DescriptorSlot>, usize>,
    sets: HashMap<u32, SetState>,
    pipelines: HashMap<u32, wgpu::RenderPipeline>,
    linear_sampler: wgpu::Sampler,
    nearest_sampler: wgpu::Sampler,
    placeholder: wgpu::TextureView,
}

impl WgpuDevice {
    /// Open the first adapter that supports [`required_features`].
    pub fn new_headless() -> Result<Self, GfxError> {
        pollster::block_on(Self::request())
    }

    async fn request() -> Result<Self, GfxError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| GfxError::Unsupported("no graphics adapter available".into()))?;
        let adapter_info = adapter.get_info();
        let missing = required_features() - adapter.features();
        if !missing.is_empty() {
            return Err(GfxError::Unsupported(format!(
                "adapter '{}' lacks {missing:?}",
                adapter_info.name
            )));
        }
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("strata_device"),
                    required_features: required_features(),
                    required_limits: adapter.limits(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| GfxError::DeviceLost(e.to_string()))?;
        tracing::info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            "wgpu device created"
        );

        let sampler = |label: &str, filter: wgpu::FilterMode| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::Repeat,
                address_mode_v: wgpu::AddressMode::Repeat,
                mag_filter: filter,
                min_filter: filter,
                ..Default::default()
            })
        };
        let linear_sampler = sampler("linear_sampler", wgpu::FilterMode::Linear);
        let nearest_sampler = sampler("nearest_sampler", wgpu::FilterMode::Nearest);
        let placeholder = device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("placeholder"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
            .create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self {
            device,
            queue,
            adapter_info,
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            semaphores: HashMap::new(),
            layouts: Vec::new(),
            layout_index: HashMap::new(),
            sets: HashMap::new(),
            pipelines: HashMap::new(),
            linear_sampler,
            nearest_sampler,
            placeholder,
        })
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&wgpu::Buffer, GfxError> {
        self.buffers
            .get(&handle.0)
            .map(|(buffer, _)| buffer)
            .ok_or(GfxError::UnknownHandle {
                kind: "buffer",
                id: handle.0,
            })
    }

    fn texture(&self, handle: TextureHandle) -> Result<&TextureState, GfxError> {
        self.textures.get(&handle.0).ok_or(GfxError::UnknownHandle {
            kind: "texture",
            id: handle.0,
        })
    }

    fn pipeline(&self, handle: PipelineHandle) -> Result<&wgpu::RenderPipeline, GfxError> {
        self.pipelines.get(&handle.0).ok_or(GfxError::UnknownHandle {
            kind: "pipeline",
            id: handle.0,
        })
    }

    fn sampled_view(
        &self,
        texture: TextureHandle,
        excluded: &[u32],
    ) -> Result<&wgpu::TextureView, GfxError> {
        if excluded.contains(&texture.0) {
            Ok(&self.placeholder)
        } else {
            self.texture(texture).map(|t| &t.view)
        }
    }

    fn set(&self, handle: DescriptorSetHandle) -> Result<&SetState, GfxError> {
        self.sets.get(&handle.0).ok_or(GfxError::UnknownHandle {
            kind: "descriptor set",
            id: handle.0,
        })
    }

    fn bind_group(
        &self,
        handle: DescriptorSetHandle,
        attachments: &BTreeSet<u32>,
    ) -> Result<&wgpu::BindGroup, GfxError> {
        let set = self.set(handle)?;
        let key = set.conflicts(attachments);
        set.groups.get(&key).ok_or_else(|| GfxError::Creation {
            kind: "bind group",
            label: set.desc.label.clone(),
            reason: "set used before it was built".into(),
        })
    }

    /// Layouts are shared between sets and pipelines with equal slots.
    fn layout_for(&mut self, desc: &DescriptorSetDesc) -> usize {
        if let Some(&index) = self.layout_index.get(&desc.slots) {
            return index;
        }
        let entries: Vec<wgpu::BindGroupLayoutEntry> =
            desc.slots.iter().map(convert::layout_entry).collect();
        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&desc.label),
                entries: &entries,
            });
        self.layouts.push(layout);
        let index = self.layouts.len() - 1;
        self.layout_index.insert(desc.slots.clone(), index);
        index
    }

    /// Build the bind group of `handle` as seen from a pass attaching
    /// `attachments`. Every slot must be bound.
    fn build_bind_group(
        &mut self,
        handle: DescriptorSetHandle,
        attachments: &BTreeSet<u32>,
    ) -> Result<(), GfxError> {
        let set = self.set(handle)?;
        let excluded = set.conflicts(attachments);
        if set.groups.contains_key(&excluded) {
            return Ok(());
        }

        let mut arrays: BTreeMap<u32, Vec<&wgpu::TextureView>> = BTreeMap::new();
        for (binding, resource) in &set.resources {
            if let DescriptorResource::TextureArray(handles) = resource {
                let views = handles
                    .iter()
                    .map(|h| self.sampled_view(*h, &excluded))
                    .collect::<Result<Vec<_>, _>>()?;
                arrays.insert(*binding, views);
            }
        }
        let mut entries = Vec::with_capacity(set.desc.slots.len());
        for slot in &set.desc.slots {
            let resource = set.resources.get(&slot.binding).ok_or_else(|| GfxError::Creation {
                kind: "bind group",
                label: set.desc.label.clone(),
                reason: format!("binding {} was never written", slot.binding),
            })?;
            let resource = match resource {
                DescriptorResource::Buffer(buffer) => self.buffer(*buffer)?.as_entire_binding(),
                DescriptorResource::Texture(texture) => {
                    wgpu::BindingResource::TextureView(self.sampled_view(*texture, &excluded)?)
                }
                DescriptorResource::TextureArray(_) => {
                    wgpu::BindingResource::TextureViewArray(&arrays[&slot.binding])
                }
                DescriptorResource::Sampler(SamplerKind::Linear) => {
                    wgpu::BindingResource::Sampler(&self.linear_sampler)
                }
                DescriptorResource::Sampler(SamplerKind::Nearest) => {
                    wgpu::BindingResource::Sampler(&self.nearest_sampler)
                }
            };
            entries.push(wgpu::BindGroupEntry {
                binding: slot.binding,
                resource,
            });
        }
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&set.desc.label),
            layout: &self.layouts[set.layout],
            entries: &entries,
        });
        if let Some(set) = self.sets.get_mut(&handle.0) {
            set.groups.insert(excluded, group);
        }
        Ok(())
    }

    /// Replay the draw and state commands of one submission into `encoder`.
    /// Set binds made outside a render pass carry into the next one.
    fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        commands: &[&Command],
    ) -> Result<(), GfxError> {
        let mut pass: Option<wgpu::RenderPass<'static>> = None;
        let mut attachments: BTreeSet<u32> = BTreeSet::new();
        let mut sets: BTreeMap<u32, DescriptorSetHandle> = BTreeMap::new();
        for command in commands {
            match command {
                Command::CopyBuffer { .. } | Command::CopyTexture { .. } | Command::Barrier(_) => {}
                Command::BeginRenderPass(begin) => {
                    attachments = pass_attachments(begin);
                    let colors = begin
                        .colors
                        .iter()
                        .map(|c| Ok((self.texture(c.texture)?, c)))
                        .collect::<Result<Vec<_>, GfxError>>()?;
                    let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = colors
                        .iter()
                        .map(|(state, target)| {
                            Some(wgpu::RenderPassColorAttachment {
                                view: &state.view,
                                resolve_target: None,
                                ops: wgpu::Operations {
                                    load: convert::color_load(target.load, target.clear_color),
                                    store: convert::store(target.store),
                                },
                            })
                        })
                        .collect();
                    let depth = match &begin.depth {
                        Some(d) => Some((self.texture(d.texture)?, d)),
                        None => None,
                    };
                    let depth_stencil_attachment =
                        depth.map(|(state, target)| wgpu::RenderPassDepthStencilAttachment {
                            view: &state.view,
                            depth_ops: Some(wgpu::Operations {
                                load: convert::depth_load(target.load, target.clear_depth),
                                store: convert::store(target.store),
                            }),
                            stencil_ops: None,
                        });
                    let mut render_pass = encoder
                        .begin_render_pass(&wgpu::RenderPassDescriptor {
                            label: Some(&begin.label),
                            color_attachments: &color_attachments,
                            depth_stencil_attachment,
                            ..Default::default()
                        })
                        .forget_lifetime();
                    for (index, set) in &sets {
                        render_pass.set_bind_group(*index, self.bind_group(*set, &attachments)?, &[]);
                    }
                    pass = Some(render_pass);
                }
                Command::EndRenderPass => {
                    pass = None;
                    attachments.clear();
                }
                Command::BindDescriptorSet { index, set } => {
                    sets.insert(*index, *set);
                    if let Some(pass) = pass.as_mut() {
                        pass.set_bind_group(*index, self.bind_group(*set, &attachments)?, &[]);
                    }
                }
                other => {
                    let Some(pass) = pass.as_mut() else {
                        return Err(GfxError::Creation {
                            kind: "command",
                            label: format!("{other:?}"),
                            reason: "recorded outside a render pass".into(),
                        });
                    };
                    self.encode_pass_command(pass, other)?;
                }
            }
        }
        Ok(())
    }

    fn encode_pass_command(
        &self,
        pass: &mut wgpu::RenderPass<'static>,
        command: &Command,
    ) -> Result<(), GfxError> {
        match command {
            Command::SetViewport(v) => {
                pass.set_viewport(v.x, v.y, v.width, v.height, v.min_depth, v.max_depth);
            }
            Command::SetScissor(s) => pass.set_scissor_rect(s.x, s.y, s.width, s.height),
            Command::BindPipeline(pipeline) => pass.set_pipeline(self.pipeline(*pipeline)?),
            Command::BindVertexBuffer { buffer, offset } => {
                pass.set_vertex_buffer(0, self.buffer(*buffer)?.slice(*offset..));
            }
            Command::BindIndexBuffer {
                buffer,
                offset,
                format,
            } => {
                pass.set_index_buffer(
                    self.buffer(*buffer)?.slice(*offset..),
                    convert::index_format(*format),
                );
            }
            Command::PushConstants(data) => {
                pass.set_push_constants(wgpu::ShaderStages::VERTEX_FRAGMENT, 0, data);
            }
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => pass.draw(
                *first_vertex..first_vertex + vertex_count,
                *first_instance..first_instance + instance_count,
            ),
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            } => pass.draw_indexed(
                *first_index..first_index + index_count,
                *vertex_offset,
                *first_instance..first_instance + instance_count,
            ),
            Command::DrawIndexedIndirect {
                buffer,
                offset,
                draw_count,
                stride,
            } => {
                let buffer = self.buffer(*buffer)?;
                for i in 0..*draw_count as u64 {
                    pass.draw_indexed_indirect(buffer, offset + i * *stride as u64);
                }
            }
            Command::CopyBuffer { .. }
            | Command::CopyTexture { .. }
            | Command::Barrier(_)
            | Command::BeginRenderPass(_)
            | Command::EndRenderPass
            | Command::BindDescriptorSet { .. } => {}
        }
        Ok(())
    }

    fn apply_copies(&self, commands: &[&Command]) -> Result<(), GfxError> {
        check_copy_alignment(commands)?;
        for command in commands {
            match command {
                Command::CopyBuffer {
                    dst,
                    dst_offset,
                    data,
                } => self.queue.write_buffer(self.buffer(*dst)?, *dst_offset, data),
                Command::CopyTexture { dst, extent, data } => {
                    let state = self.texture(*dst)?;
                    let bytes_per_pixel = state.desc.format.bytes_per_pixel();
                    self.queue.write_texture(
                        wgpu::TexelCopyTextureInfo {
                            texture: &state.texture,
                            mip_level: 0,
                            origin: wgpu::Origin3d::ZERO,
                            aspect: wgpu::TextureAspect::All,
                        },
                        data,
                        wgpu::TexelCopyBufferLayout {
                            offset: 0,
                            bytes_per_row: Some(extent.width * bytes_per_pixel),
                            rows_per_image: Some(extent.height),
                        },
                        extent3d(*extent),
                    );
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Surface validation errors raised while `f` runs as a [`GfxError`].
    fn validated<T>(
        &self,
        kind: &'static str,
        label: &str,
        f: impl FnOnce(&wgpu::Device) -> T,
    ) -> Result<T, GfxError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            None => Ok(value),
            Some(error) => Err(GfxError::Creation {
                kind,
                label: label.to_owned(),
                reason: error.to_string(),
            }),
        }
    }
}

/// `Queue::write_buffer` rejects unaligned ranges through the uncaptured
/// error handler, so they are refused before anything is written.
fn check_copy_alignment(commands: &[&Command]) -> Result<(), GfxError> {
    for command in commands {
        if let Command::CopyBuffer {
            dst_offset, data, ..
        } = command
        {
            let len = data.len() as u64;
            if dst_offset % COPY_ALIGNMENT != 0 || len % COPY_ALIGNMENT != 0 {
                return Err(GfxError::Unsupported(format!(
                    "buffer copy of {len} bytes at offset {dst_offset} is not {COPY_ALIGNMENT}-byte aligned"
                )));
            }
        }
    }
    Ok(())
}

fn pass_attachments(begin: &RenderPassBegin) -> BTreeSet<u32> {
    begin
        .colors
        .iter()
        .map(|c| c.texture.0)
        .chain(begin.depth.iter().map(|d| d.texture.0))
        .collect()
}

fn extent3d(extent: Extent2D) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: extent.width,
        height: extent.height,
        depth_or_array_layers: 1,
    }
}

impl GpuDevice for WgpuDevice {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle, GfxError> {
        let buffer = self.validated("buffer", &desc.label, |device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&desc.label),
                size: desc.size,
                usage: convert::buffer_usage(desc.usage),
                mapped_at_creation: false,
            })
        })?;
        let id = self.next_id();
        self.buffers.insert(id, (buffer, desc.clone()));
        Ok(BufferHandle(id))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some((buffer, _)) = self.buffers.remove(&buffer.0) {
            buffer.destroy();
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, GfxError> {
        let texture = self.validated("texture", &desc.label, |device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(&desc.label),
                size: extent3d(desc.extent),
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: convert::texture_format(desc.format),
                usage: convert::texture_usage(desc.usage),
                view_formats: &[],
            })
        })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = self.next_id();
        self.textures.insert(
            id,
            TextureState {
                texture,
                view,
                desc: desc.clone(),
            },
        );
        Ok(TextureHandle(id))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(state) = self.textures.remove(&texture.0) {
            state.texture.destroy();
        }
    }

    fn create_semaphore(&mut self, label: &str) -> Result<SemaphoreHandle, GfxError> {
        let id = self.next_id();
        self.semaphores.insert(
            id,
            SemaphoreState {
                label: label.to_owned(),
                submitted: 0,
                completed: Arc::new(AtomicU64::new(0)),
            },
        );
        Ok(SemaphoreHandle(id))
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        self.semaphores.remove(&semaphore.0);
    }

    fn create_descriptor_set(
        &mut self,
        desc: &DescriptorSetDesc,
    ) -> Result<DescriptorSetHandle, GfxError> {
        let layout = self.layout_for(desc);
        let id = self.next_id();
        self.sets.insert(
            id,
            SetState {
                desc: desc.clone(),
                layout,
                resources: BTreeMap::new(),
                groups: HashMap::new(),
            },
        );
        Ok(DescriptorSetHandle(id))
    }

    fn update_descriptor_set(
        &mut self,
        set: DescriptorSetHandle,
        writes: &[DescriptorWrite],
    ) -> Result<(), GfxError> {
        let state = self.sets.get_mut(&set.0).ok_or(GfxError::UnknownHandle {
            kind: "descriptor set",
            id: set.0,
        })?;
        for write in writes {
            if state.desc.slot(write.binding).is_none() {
                return Err(GfxError::Creation {
                    kind: "descriptor write",
                    label: state.desc.label.clone(),
                    reason: format!("no binding {}", write.binding),
                });
            }
            state.resources.insert(write.binding, write.resource.clone());
        }
        state.groups.clear();
        Ok(())
    }

    fn destroy_descriptor_set(&mut self, set: DescriptorSetHandle) {
        self.sets.remove(&set.0);
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineHandle, GfxError> {
        let layout_indices: Vec<usize> = desc.set_layouts.iter().map(|s| self.layout_for(s)).collect();
        let layouts: Vec<&wgpu::BindGroupLayout> =
            layout_indices.iter().map(|&i| &self.layouts[i]).collect();
        let push_constant_ranges: Vec<wgpu::PushConstantRange> = if desc.push_constant_bytes > 0 {
            vec![wgpu::PushConstantRange {
                stages: wgpu::ShaderStages::VERTEX_FRAGMENT,
                range: 0..desc.push_constant_bytes,
            }]
        } else {
            Vec::new()
        };
        let vertex_buffers: Vec<wgpu::VertexBufferLayout> = match desc.vertex_layout {
            strata_gfx::VertexLayout::None => Vec::new(),
            layout => vec![wgpu::VertexBufferLayout {
                array_stride: layout.stride(),
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: convert::vertex_attributes(layout),
            }],
        };
        let targets: Vec<Option<wgpu::ColorTargetState>> = desc
            .color_formats
            .iter()
            .map(|format| {
                Some(wgpu::ColorTargetState {
                    format: convert::texture_format(*format),
                    blend: Some(convert::blend(desc.blend)),
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();
        let depth_stencil = desc.depth.map(|depth| wgpu::DepthStencilState {
            format: convert::texture_format(depth.format),
            depth_write_enabled: depth.write,
            depth_compare: convert::compare(depth.compare),
            stencil: Default::default(),
            bias: Default::default(),
        });

        let pipeline = self.validated("pipeline", &desc.label, |device| {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&desc.label),
                source: wgpu::ShaderSource::Wgsl(desc.source.as_str().into()),
            });
            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&desc.label),
                bind_group_layouts: &layouts,
                push_constant_ranges: &push_constant_ranges,
            });
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&desc.label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &vertex_buffers,
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &targets,
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    ..Default::default()
                },
                depth_stencil,
                multisample: Default::default(),
                multiview: None,
                cache: None,
            })
        })?;
        let id = self.next_id();
        self.pipelines.insert(id, pipeline);
        tracing::debug!(pipeline = %desc.label, id, "wgpu pipeline created");
        Ok(PipelineHandle(id))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        self.pipelines.remove(&pipeline.0);
    }

    fn submit(&mut self, submission: &Submission<'_>) -> Result<(), GfxError> {
        let commands: Vec<&Command> = submission
            .streams
            .iter()
            .flat_map(|stream| stream.commands())
            .collect();
        // Every (set, pass) pairing the encoder will bind.
        let mut needed: Vec<(DescriptorSetHandle, BTreeSet<u32>)> = Vec::new();
        let mut bound: BTreeMap<u32, DescriptorSetHandle> = BTreeMap::new();
        let mut attachments: Option<BTreeSet<u32>> = None;
        for command in &commands {
            match command {
                Command::BeginRenderPass(begin) => {
                    let pass = pass_attachments(begin);
                    needed.extend(bound.values().map(|set| (*set, pass.clone())));
                    attachments = Some(pass);
                }
                Command::EndRenderPass => attachments = None,
                Command::BindDescriptorSet { index, set } => {
                    bound.insert(*index, *set);
                    if let Some(pass) = &attachments {
                        needed.push((*set, pass.clone()));
                    }
                }
                _ => {}
            }
        }
        for (set, pass) in needed {
            self.build_bind_group(set, &pass)?;
        }
        for signal in submission.signals.iter().filter(|s| !s.is_none()) {
            let state = self
                .semaphores
                .get(&signal.semaphore.0)
                .ok_or(GfxError::UnknownHandle {
                    kind: "semaphore",
                    id: signal.semaphore.0,
                })?;
            assert!(
                signal.value > state.submitted,
                "semaphore '{}' signal value {} is not above {}",
                state.label,
                signal.value,
                state.submitted
            );
        }

        self.apply_copies(&commands)?;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("strata_submission"),
            });
        self.encode(&mut encoder, &commands)?;
        self.queue.submit(std::iter::once(encoder.finish()));

        for signal in submission.signals.iter().filter(|s| !s.is_none()) {
            if let Some(state) = self.semaphores.get_mut(&signal.semaphore.0) {
                state.submitted = signal.value;
                let completed = Arc::clone(&state.completed);
                let value = signal.value;
                self.queue.on_submitted_work_done(move || {
                    completed.fetch_max(value, Ordering::AcqRel);
                });
            }
        }
        tracing::trace!(
            queue = ?submission.queue,
            commands = commands.len(),
            signals = submission.signals.len(),
            "wgpu submit"
        );
        Ok(())
    }

    fn completed_value(&self, semaphore: SemaphoreHandle) -> u64 {
        let _ = self.device.poll(wgpu::Maintain::Poll);
        self.semaphores
            .get(&semaphore.0)
            .map(|s| s.completed.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    fn wait_semaphore(&mut self, semaphore: SemaphoreHandle, value: u64) -> Result<(), GfxError> {
        let state = self.semaphores.get(&semaphore.0).ok_or(GfxError::UnknownHandle {
            kind: "semaphore",
            id: semaphore.0,
        })?;
        if value > state.submitted {
            return Err(GfxError::WaitNeverSignaled {
                semaphore: semaphore.0,
                value,
                submitted: state.submitted,
            });
        }
        if state.completed.load(Ordering::Acquire) >= value {
            return Ok(());
        }
        let completed = Arc::clone(&state.completed);
        let _ = self.device.poll(wgpu::Maintain::Wait);
        if completed.load(Ordering::Acquire) < value {
            return Err(GfxError::DeviceLost(format!(
                "semaphore {} stalled below {value}",
                semaphore.0
            )));
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<(), GfxError> {
        let _ = self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_gfx::{Buffer, BufferUsage, CommandStream, HeadlessDevice, QueueKind};

    #[test]
    fn unaligned_buffer_copies_are_refused() {
        let mut stream = CommandStream::new(QueueKind::Transfer, "copy");
        stream.copy_buffer(BufferHandle(1), 0, &[1, 2, 3, 4]);
        stream.copy_buffer(BufferHandle(1), 1, &[7, 8, 9]);
        let commands: Vec<&Command> = stream.commands().iter().collect();
        assert!(check_copy_alignment(&commands[..1]).is_ok());
        assert!(matches!(
            check_copy_alignment(&commands),
            Err(GfxError::Unsupported(_))
        ));
    }

    #[test]
    fn buffer_writes_always_pass_the_alignment_check() {
        let mut device = HeadlessDevice::new();
        let mut buffer = Buffer::create(&mut device, 10, BufferUsage::Storage, "odd").unwrap();
        let mut stream = CommandStream::new(QueueKind::Transfer, "copy");
        buffer.buffer_data(1, &[7, 8, 9]);
        assert!(buffer.copy(&mut stream));
        buffer.buffer_data(9, &[]);
        assert!(buffer.copy(&mut stream));
        let commands: Vec<&Command> = stream.commands().iter().collect();
        assert!(check_copy_alignment(&commands).is_ok());
    }
}
