//! Mapping from contract types to wgpu types.

use std::num::NonZeroU32;

use strata_gfx::{
    BlendMode, BufferUsage, CompareOp, DescriptorKind, DescriptorSlot, IndexFormat, LoadOp,
    StoreOp, TextureFormat, TextureUsage, VertexLayout,
};

pub(crate) const MESH_ATTRIBUTES: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
    0 => Float32x3,
    1 => Float32x3,
    2 => Float32x2,
];

pub(crate) const GUI_ATTRIBUTES: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
    0 => Float32x2,
    1 => Float32x2,
    2 => Float32x4,
];

pub(crate) fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

/// Every buffer is a copy destination.
pub(crate) fn buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
    let bound = match usage {
        BufferUsage::Vertex => wgpu::BufferUsages::VERTEX,
        BufferUsage::Index => wgpu::BufferUsages::INDEX,
        BufferUsage::Uniform => wgpu::BufferUsages::UNIFORM,
        BufferUsage::Storage => wgpu::BufferUsages::STORAGE,
        BufferUsage::Indirect => wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::STORAGE,
    };
    bound | wgpu::BufferUsages::COPY_DST
}

pub(crate) fn texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
    match usage {
        TextureUsage::ColorTarget => {
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST
        }
        TextureUsage::DepthTarget => {
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING
        }
        TextureUsage::Sampled => {
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST
        }
    }
}

pub(crate) fn index_format(format: IndexFormat) -> wgpu::IndexFormat {
    match format {
        IndexFormat::U16 => wgpu::IndexFormat::Uint16,
        IndexFormat::U32 => wgpu::IndexFormat::Uint32,
    }
}

pub(crate) fn compare(op: CompareOp) -> wgpu::CompareFunction {
    match op {
        CompareOp::Less => wgpu::CompareFunction::Less,
        CompareOp::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareOp::Always => wgpu::CompareFunction::Always,
    }
}

pub(crate) fn blend(mode: BlendMode) -> wgpu::BlendState {
    match mode {
        BlendMode::Opaque => wgpu::BlendState::REPLACE,
        BlendMode::Alpha => wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING,
    }
}

pub(crate) fn color_load(load: LoadOp, clear: [f32; 4]) -> wgpu::LoadOp<wgpu::Color> {
    match load {
        LoadOp::Load => wgpu::LoadOp::Load,
        LoadOp::Clear | LoadOp::DontCare => wgpu::LoadOp::Clear(wgpu::Color {
            r: clear[0] as f64,
            g: clear[1] as f64,
            b: clear[2] as f64,
            a: clear[3] as f64,
        }),
    }
}

pub(crate) fn depth_load(load: LoadOp, clear: f32) -> wgpu::LoadOp<f32> {
    match load {
        LoadOp::Load => wgpu::LoadOp::Load,
        LoadOp::Clear | LoadOp::DontCare => wgpu::LoadOp::Clear(clear),
    }
}

pub(crate) fn store(op: StoreOp) -> wgpu::StoreOp {
    match op {
        StoreOp::Store => wgpu::StoreOp::Store,
        StoreOp::Discard => wgpu::StoreOp::Discard,
    }
}

pub(crate) fn vertex_attributes(layout: VertexLayout) -> &'static [wgpu::VertexAttribute] {
    match layout {
        VertexLayout::None => &[],
        VertexLayout::Mesh => &MESH_ATTRIBUTES,
        VertexLayout::Gui => &GUI_ATTRIBUTES,
    }
}

pub(crate) fn layout_entry(slot: &DescriptorSlot) -> wgpu::BindGroupLayoutEntry {
    let texture = wgpu::BindingType::Texture {
        sample_type: wgpu::TextureSampleType::Float { filterable: true },
        view_dimension: wgpu::TextureViewDimension::D2,
        multisampled: false,
    };
    let (ty, count) = match slot.kind {
        DescriptorKind::UniformBuffer => (
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            None,
        ),
        DescriptorKind::StorageBuffer => (
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            None,
        ),
        DescriptorKind::Texture => (texture, None),
        DescriptorKind::TextureArray { count } => (texture, NonZeroU32::new(count)),
        DescriptorKind::Sampler => (
            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            None,
        ),
    };
    wgpu::BindGroupLayoutEntry {
        binding: slot.binding,
        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
        ty,
        count,
    }
}
