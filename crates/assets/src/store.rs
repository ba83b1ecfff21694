use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strata_common::{Extent2D, ResourceId};
use strata_gfx::{
    Buffer, BufferHandle, BufferUsage, CommandStream, GpuDevice, MeshVertex, PipelineDesc,
    PipelineHandle, QueueKind, SamplerKind, SemaphoreData, Submission, Texture, TextureFormat,
    TextureHandle, TextureUsage, TimelineSemaphore, UploadQueue,
};

use crate::AssetError;
use crate::bindless::BindlessTable;

/// Capacities of the store's device-side tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub bindless_capacity: u32,
    pub max_vertices: u32,
    pub max_indices: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            bindless_capacity: 256,
            max_vertices: 65_536,
            max_indices: 196_608,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Shader {
    pub name: String,
    pub pipeline: PipelineHandle,
}

#[derive(Debug)]
enum TextureSource {
    Owned(Texture),
    /// Rendered by someone else; the store only indexes it.
    External(TextureHandle),
}

#[derive(Debug)]
pub struct TextureEntry {
    pub name: String,
    pub extent: Extent2D,
    pub bindless_index: u32,
    source: TextureSource,
}

impl TextureEntry {
    pub fn handle(&self) -> TextureHandle {
        match &self.source {
            TextureSource::Owned(texture) => texture.handle(),
            TextureSource::External(handle) => *handle,
        }
    }
}

/// Index range of one sub-mesh inside the shared geometry buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshRange {
    pub first_index: u32,
    pub index_count: u32,
    pub vertex_offset: i32,
}

#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub meshes: Vec<MeshRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    pub shader: ResourceId,
    pub base_color: [f32; 4],
    pub albedo: Option<ResourceId>,
    pub sampler: Option<ResourceId>,
    pub roughness: f32,
    pub metallic: f32,
}

impl Material {
    pub fn new(name: impl Into<String>, shader: ResourceId) -> Self {
        Self {
            name: name.into(),
            shader,
            base_color: [0.8, 0.8, 0.8, 1.0],
            albedo: None,
            sampler: None,
            roughness: 0.5,
            metallic: 0.0,
        }
    }
}

/// Shared vertex and index buffers all models are packed into.
#[derive(Debug)]
pub struct GeometryBuffers {
    pub vertices: Buffer,
    pub indices: Buffer,
    vertex_count: u32,
    index_count: u32,
}

impl GeometryBuffers {
    pub fn vertex_buffer(&self) -> BufferHandle {
        self.vertices.handle()
    }

    pub fn index_buffer(&self) -> BufferHandle {
        self.indices.handle()
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// Resolves stable [`ResourceId`]s to device objects.
///
/// Lookups return `None` for unknown ids; renderers treat that as "skip the
/// dependent draw". The store owns every device object it creates except
/// external textures, and releases them in [`ResourceStore::destroy`].
#[derive(Debug)]
pub struct ResourceStore {
    shaders: BTreeMap<ResourceId, Shader>,
    textures: BTreeMap<ResourceId, TextureEntry>,
    samplers: BTreeMap<ResourceId, SamplerKind>,
    models: BTreeMap<ResourceId, Model>,
    materials: BTreeMap<ResourceId, Material>,
    geometry: GeometryBuffers,
    bindless: BindlessTable,
    fallback: Texture,
    retired: Vec<Texture>,
    upload_stream: CommandStream,
    upload_semaphore: TimelineSemaphore,
}

impl ResourceStore {
    pub fn new(device: &mut dyn GpuDevice, config: StoreConfig) -> Result<Self, AssetError> {
        let vertex_bytes = config.max_vertices as u64 * std::mem::size_of::<MeshVertex>() as u64;
        let index_bytes = config.max_indices as u64 * 4;
        let geometry = GeometryBuffers {
            vertices: Buffer::create(device, vertex_bytes, BufferUsage::Vertex, "geometry-vertices")?,
            indices: Buffer::create(device, index_bytes, BufferUsage::Index, "geometry-indices")?,
            vertex_count: 0,
            index_count: 0,
        };
        let mut fallback = Texture::create(
            device,
            "fallback-white",
            Extent2D::new(1, 1),
            TextureFormat::Rgba8Unorm,
            TextureUsage::Sampled,
        )?;
        fallback.write_pixels(vec![255; 4]);
        let bindless = BindlessTable::new(config.bindless_capacity, fallback.handle());
        let upload_semaphore = TimelineSemaphore::create(device, "resource-upload")?;
        tracing::debug!(
            bindless = config.bindless_capacity,
            vertices = config.max_vertices,
            indices = config.max_indices,
            "resource store created"
        );
        Ok(Self {
            shaders: BTreeMap::new(),
            textures: BTreeMap::new(),
            samplers: BTreeMap::new(),
            models: BTreeMap::new(),
            materials: BTreeMap::new(),
            geometry,
            bindless,
            fallback,
            retired: Vec::new(),
            upload_stream: CommandStream::new(QueueKind::Transfer, "resource-upload"),
            upload_semaphore,
        })
    }

    // --- Shaders ---

    pub fn register_shader(
        &mut self,
        device: &mut dyn GpuDevice,
        id: ResourceId,
        desc: &PipelineDesc,
    ) -> Result<PipelineHandle, AssetError> {
        if self.shaders.contains_key(&id) {
            return Err(AssetError::Duplicate(id));
        }
        let pipeline = device.create_pipeline(desc)?;
        self.shaders.insert(
            id,
            Shader {
                name: desc.label.clone(),
                pipeline,
            },
        );
        Ok(pipeline)
    }

    pub fn shader(&self, id: ResourceId) -> Option<&Shader> {
        self.shaders.get(&id)
    }

    // --- Textures ---

    /// Create a sampled texture from RGBA8 pixels and give it a bindless slot.
    /// Pixels reach the device with the next [`ResourceStore::upload_pending`].
    pub fn register_texture(
        &mut self,
        device: &mut dyn GpuDevice,
        id: ResourceId,
        name: impl Into<String>,
        extent: Extent2D,
        pixels: Vec<u8>,
    ) -> Result<u32, AssetError> {
        if self.textures.contains_key(&id) {
            return Err(AssetError::Duplicate(id));
        }
        let name = name.into();
        let mut texture = Texture::create(
            device,
            name.clone(),
            extent,
            TextureFormat::Rgba8Unorm,
            TextureUsage::Sampled,
        )?;
        texture.write_pixels(pixels);
        let Some(bindless_index) = self.bindless.allocate(texture.handle()) else {
            texture.destroy(device);
            return Err(AssetError::BindlessFull(self.bindless.capacity()));
        };
        tracing::debug!(?id, %name, bindless_index, "texture registered");
        self.textures.insert(
            id,
            TextureEntry {
                name,
                extent,
                bindless_index,
                source: TextureSource::Owned(texture),
            },
        );
        Ok(bindless_index)
    }

    /// Index a texture owned elsewhere, e.g. a renderer's output target.
    pub fn register_external_texture(
        &mut self,
        id: ResourceId,
        name: impl Into<String>,
        handle: TextureHandle,
        extent: Extent2D,
    ) -> Result<u32, AssetError> {
        if self.textures.contains_key(&id) {
            return Err(AssetError::Duplicate(id));
        }
        let bindless_index = self
            .bindless
            .allocate(handle)
            .ok_or(AssetError::BindlessFull(self.bindless.capacity()))?;
        self.textures.insert(
            id,
            TextureEntry {
                name: name.into(),
                extent,
                bindless_index,
                source: TextureSource::External(handle),
            },
        );
        Ok(bindless_index)
    }

    /// Point an external texture id at a new handle. The texture moves to a
    /// fresh bindless slot; records made against the old slot must be
    /// re-resolved through [`ResourceStore::texture`].
    pub fn reload_external_texture(
        &mut self,
        id: ResourceId,
        handle: TextureHandle,
        extent: Extent2D,
    ) -> Result<u32, AssetError> {
        let entry = self.textures.get_mut(&id).ok_or(AssetError::NotFound(id))?;
        let TextureSource::External(current) = &mut entry.source else {
            return Err(AssetError::Mismatch {
                id,
                expected: "external texture",
            });
        };
        let new_index = self
            .bindless
            .allocate(handle)
            .ok_or(AssetError::BindlessFull(self.bindless.capacity()))?;
        self.bindless.release(entry.bindless_index);
        tracing::debug!(?id, from = entry.bindless_index, to = new_index, "texture reloaded");
        *current = handle;
        entry.bindless_index = new_index;
        entry.extent = extent;
        Ok(new_index)
    }

    /// Replace an owned texture's pixels with a new texture in a new slot.
    /// The old texture is retired and destroyed by
    /// [`ResourceStore::release_retired`] once the device is idle.
    pub fn reload_texture(
        &mut self,
        device: &mut dyn GpuDevice,
        id: ResourceId,
        extent: Extent2D,
        pixels: Vec<u8>,
    ) -> Result<u32, AssetError> {
        let entry = self.textures.get_mut(&id).ok_or(AssetError::NotFound(id))?;
        let TextureSource::Owned(_) = &entry.source else {
            return Err(AssetError::Mismatch {
                id,
                expected: "owned texture",
            });
        };
        let mut texture = Texture::create(
            device,
            entry.name.clone(),
            extent,
            TextureFormat::Rgba8Unorm,
            TextureUsage::Sampled,
        )?;
        texture.write_pixels(pixels);
        let Some(new_index) = self.bindless.allocate(texture.handle()) else {
            texture.destroy(device);
            return Err(AssetError::BindlessFull(self.bindless.capacity()));
        };
        self.bindless.release(entry.bindless_index);
        entry.bindless_index = new_index;
        entry.extent = extent;
        if let TextureSource::Owned(old) =
            std::mem::replace(&mut entry.source, TextureSource::Owned(texture))
        {
            self.retired.push(old);
        }
        Ok(new_index)
    }

    /// Forget a texture. Owned textures are retired, not destroyed.
    pub fn remove_texture(&mut self, id: ResourceId) -> bool {
        let Some(entry) = self.textures.remove(&id) else {
            return false;
        };
        self.bindless.release(entry.bindless_index);
        if let TextureSource::Owned(texture) = entry.source {
            self.retired.push(texture);
        }
        true
    }

    pub fn texture(&self, id: ResourceId) -> Option<&TextureEntry> {
        self.textures.get(&id)
    }

    pub fn bindless_generation(&self) -> u64 {
        self.bindless.generation()
    }

    pub fn bindless_capacity(&self) -> u32 {
        self.bindless.capacity()
    }

    /// Handles for the global texture array, fallback-filled.
    pub fn bindless_handles(&self) -> Vec<TextureHandle> {
        self.bindless.handles()
    }

    // --- Samplers ---

    pub fn register_sampler(&mut self, id: ResourceId, kind: SamplerKind) {
        self.samplers.insert(id, kind);
    }

    pub fn sampler(&self, id: ResourceId) -> Option<SamplerKind> {
        self.samplers.get(&id).copied()
    }

    // --- Models ---

    /// Append geometry to the shared buffers as a single-mesh model.
    pub fn register_model(
        &mut self,
        id: ResourceId,
        name: impl Into<String>,
        vertices: &[MeshVertex],
        indices: &[u32],
    ) -> Result<(), AssetError> {
        self.register_model_meshes(id, name, &[(vertices, indices)])
    }

    pub fn register_model_meshes(
        &mut self,
        id: ResourceId,
        name: impl Into<String>,
        meshes: &[(&[MeshVertex], &[u32])],
    ) -> Result<(), AssetError> {
        if self.models.contains_key(&id) {
            return Err(AssetError::Duplicate(id));
        }
        let needed_vertices: usize = meshes.iter().map(|(v, _)| v.len()).sum();
        let needed_indices: usize = meshes.iter().map(|(_, i)| i.len()).sum();
        let vertex_capacity = self.geometry.vertices.size() / std::mem::size_of::<MeshVertex>() as u64;
        let index_capacity = self.geometry.indices.size() / 4;
        if self.geometry.vertex_count as u64 + needed_vertices as u64 > vertex_capacity
            || self.geometry.index_count as u64 + needed_indices as u64 > index_capacity
        {
            return Err(AssetError::GeometryFull {
                vertices: needed_vertices,
                indices: needed_indices,
            });
        }

        let mut ranges = Vec::with_capacity(meshes.len());
        for (vertices, indices) in meshes {
            let vertex_offset = self.geometry.vertex_count;
            let first_index = self.geometry.index_count;
            self.geometry.vertices.write_slice(
                vertex_offset as u64 * std::mem::size_of::<MeshVertex>() as u64,
                vertices,
            );
            self.geometry
                .indices
                .write_slice(first_index as u64 * 4, indices);
            self.geometry.vertex_count += vertices.len() as u32;
            self.geometry.index_count += indices.len() as u32;
            ranges.push(MeshRange {
                first_index,
                index_count: indices.len() as u32,
                vertex_offset: vertex_offset as i32,
            });
        }
        let name = name.into();
        tracing::debug!(?id, %name, meshes = ranges.len(), "model registered");
        self.models.insert(
            id,
            Model {
                name,
                meshes: ranges,
            },
        );
        Ok(())
    }

    pub fn model(&self, id: ResourceId) -> Option<&Model> {
        self.models.get(&id)
    }

    pub fn mesh(&self, model: ResourceId, mesh_index: u32) -> Option<MeshRange> {
        self.models
            .get(&model)?
            .meshes
            .get(mesh_index as usize)
            .copied()
    }

    pub fn geometry(&self) -> &GeometryBuffers {
        &self.geometry
    }

    // --- Materials ---

    pub fn register_material(&mut self, id: ResourceId, material: Material) {
        self.materials.insert(id, material);
    }

    pub fn material(&self, id: ResourceId) -> Option<&Material> {
        self.materials.get(&id)
    }

    // --- Device transfer ---

    pub fn has_pending_uploads(&self) -> bool {
        self.geometry.vertices.is_dirty()
            || self.geometry.indices.is_dirty()
            || self.fallback.has_pending_upload()
            || self.textures.values().any(|t| match &t.source {
                TextureSource::Owned(texture) => texture.has_pending_upload(),
                TextureSource::External(_) => false,
            })
    }

    /// Submit staged geometry and pixels on the transfer queue. Returns the
    /// value consumers must wait on, or `NONE` when nothing was pending.
    ///
    /// Geometry buffers are shared by every frame in flight, so writing them
    /// first drains the device.
    pub fn upload_pending(&mut self, device: &mut dyn GpuDevice) -> Result<SemaphoreData, AssetError> {
        if !self.has_pending_uploads() {
            return Ok(SemaphoreData::NONE);
        }
        let _span = tracing::info_span!("resource_upload").entered();
        if self.geometry.vertices.is_dirty() || self.geometry.indices.is_dirty() {
            device.wait_idle()?;
        }
        self.upload_semaphore.wait_last(device)?;
        self.upload_stream.reset();

        let mut queue = UploadQueue::new();
        queue.add_buffer_request(&mut self.geometry.vertices);
        queue.add_buffer_request(&mut self.geometry.indices);
        queue.add_texture_request(&mut self.fallback);
        for entry in self.textures.values_mut() {
            if let TextureSource::Owned(texture) = &mut entry.source {
                queue.add_texture_request(texture);
            }
        }
        if !queue.flush_all(&mut self.upload_stream) {
            return Ok(SemaphoreData::NONE);
        }
        self.upload_stream.close();
        let signal = self.upload_semaphore.next_signal();
        device.submit(&Submission {
            queue: QueueKind::Transfer,
            streams: &[&self.upload_stream],
            waits: &[],
            signals: &[signal],
        })?;
        Ok(signal)
    }

    /// Last upload signal; `value == 0` before the first upload.
    pub fn upload_semaphore(&self) -> SemaphoreData {
        self.upload_semaphore.current()
    }

    /// Destroy retired textures after draining the device.
    pub fn release_retired(&mut self, device: &mut dyn GpuDevice) -> Result<usize, AssetError> {
        if self.retired.is_empty() {
            return Ok(0);
        }
        device.wait_idle()?;
        let count = self.retired.len();
        for texture in self.retired.drain(..) {
            texture.destroy(device);
        }
        Ok(count)
    }

    /// Release every owned device object. Renderers using the store must be
    /// destroyed first.
    pub fn destroy(mut self, device: &mut dyn GpuDevice) -> Result<(), AssetError> {
        device.wait_idle()?;
        for texture in self.retired.drain(..) {
            texture.destroy(device);
        }
        for (_, entry) in std::mem::take(&mut self.textures) {
            if let TextureSource::Owned(texture) = entry.source {
                texture.destroy(device);
            }
        }
        for (_, shader) in std::mem::take(&mut self.shaders) {
            device.destroy_pipeline(shader.pipeline);
        }
        self.fallback.destroy(device);
        self.geometry.vertices.destroy(device);
        self.geometry.indices.destroy(device);
        self.upload_semaphore.destroy(device);
        tracing::debug!("resource store destroyed");
        Ok(())
    }
}
