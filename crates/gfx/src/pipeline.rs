use bytemuck::{Pod, Zeroable};

use crate::descriptor::DescriptorSetDesc;
use crate::resource::TextureFormat;

/// Vertex layout of the shared mesh geometry buffers.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

/// Vertex layout produced by the vector-graphics tessellator.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct GuiVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
    pub color: [f32; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexLayout {
    /// Vertices are generated in the shader (full-screen triangles, skybox).
    None,
    Mesh,
    Gui,
}

impl VertexLayout {
    pub fn stride(self) -> u64 {
        match self {
            Self::None => 0,
            Self::Mesh => std::mem::size_of::<MeshVertex>() as u64,
            Self::Gui => std::mem::size_of::<GuiVertex>() as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Opaque,
    /// Premultiplied alpha.
    Alpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Less,
    LessEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub format: TextureFormat,
    pub write: bool,
    pub compare: CompareOp,
}

/// Everything needed to build a graphics pipeline. `source` is WGSL with
/// `vs_main` and `fs_main` entry points; backends that do not compile shaders
/// ignore it.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDesc {
    pub label: String,
    pub source: String,
    pub vertex_layout: VertexLayout,
    pub color_formats: Vec<TextureFormat>,
    pub blend: BlendMode,
    pub depth: Option<DepthState>,
    pub set_layouts: Vec<DescriptorSetDesc>,
    pub push_constant_bytes: u32,
}
