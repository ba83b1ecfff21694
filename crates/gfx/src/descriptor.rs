use crate::handle::{BufferHandle, TextureHandle};

/// Kind of resource a descriptor slot accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    UniformBuffer,
    StorageBuffer,
    Texture,
    /// Bindless texture table of fixed capacity.
    TextureArray { count: u32 },
    Sampler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSlot {
    pub binding: u32,
    pub kind: DescriptorKind,
}

impl DescriptorSlot {
    pub const fn new(binding: u32, kind: DescriptorKind) -> Self {
        Self { binding, kind }
    }
}

/// Layout of a descriptor set. Pipelines declare the same layouts so a set
/// created from a description is compatible with any pipeline that lists it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DescriptorSetDesc {
    pub label: String,
    pub slots: Vec<DescriptorSlot>,
}

impl DescriptorSetDesc {
    pub fn slot(&self, binding: u32) -> Option<&DescriptorSlot> {
        self.slots.iter().find(|s| s.binding == binding)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerKind {
    Linear,
    Nearest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorResource {
    Buffer(BufferHandle),
    Texture(TextureHandle),
    TextureArray(Vec<TextureHandle>),
    Sampler(SamplerKind),
}

/// One binding update applied by `GpuDevice::update_descriptor_set`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub resource: DescriptorResource,
}

impl DescriptorWrite {
    pub fn buffer(binding: u32, buffer: BufferHandle) -> Self {
        Self {
            binding,
            resource: DescriptorResource::Buffer(buffer),
        }
    }

    pub fn texture(binding: u32, texture: TextureHandle) -> Self {
        Self {
            binding,
            resource: DescriptorResource::Texture(texture),
        }
    }
}
