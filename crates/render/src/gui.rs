//! Draw-request collection for the UI compositor.
//!
//! The vector-graphics tessellator calls a [`DrawBackend`] once per draw
//! buffer. [`GuiRenderer`] appends the buffer's vertices and indices to a
//! [`GuiFrame`] and records a [`DrawRequest`] with its material. Textures are
//! resolved to bindless indices at record time; the surface renderer
//! re-resolves them right before upload, since a reload can move a texture
//! between the two.

use bytemuck::{Pod, Zeroable};
use strata_assets::ResourceStore;
use strata_common::ResourceId;
use strata_gfx::{GuiVertex, ScissorRect};

use crate::config::SurfaceConfig;

/// Size of the serialized material header: canvas size, bindless index and
/// kind tag.
pub const MATERIAL_HEADER_BYTES: u64 = 16;
const MATERIAL_ALIGN: u64 = 16;

/// Clip rectangle in canvas pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ClipRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whole-pixel rectangle covering the clip; negative origins are cut.
    pub fn to_scissor(&self) -> ScissorRect {
        let x0 = self.x.max(0.0).floor();
        let y0 = self.y.max(0.0).floor();
        let x1 = (self.x + self.width).max(0.0).ceil();
        let y1 = (self.y + self.height).max(0.0).ceil();
        ScissorRect {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0).max(0.0) as u32,
            height: (y1 - y0).max(0.0) as u32,
        }
    }
}

/// One tessellated draw buffer as handed over by the vector-graphics library.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawBuffer {
    pub vertices: Vec<GuiVertex>,
    pub indices: Vec<u32>,
    pub clip: ClipRect,
}

/// A texture reference inside a material: stable id plus the bindless index
/// it resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureSlot {
    pub id: ResourceId,
    pub bindless_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gradient {
    pub start_color: [f32; 4],
    pub end_color: [f32; 4],
    /// Canvas-space endpoints.
    pub start: [f32; 2],
    pub end: [f32; 2],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SdfTextStyle {
    pub color: [f32; 4],
    pub thickness: f32,
    pub softness: f32,
    pub outline_color: [f32; 4],
    pub outline_thickness: f32,
}

/// Per-shape material parameters. Each variant has its own GPU layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GuiMaterialKind {
    Default { color: [f32; 4] },
    Gradient(Gradient),
    Textured { texture: TextureSlot, tint: [f32; 4] },
    SimpleText { atlas: TextureSlot, color: [f32; 4] },
    SdfText { atlas: TextureSlot, style: SdfTextStyle },
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct MaterialHeader {
    canvas_size: [f32; 2],
    bindless_index: u32,
    kind: u32,
}

impl GuiMaterialKind {
    /// Tag shared with the GUI shaders.
    pub fn tag(&self) -> u32 {
        match self {
            Self::Default { .. } => 0,
            Self::Gradient(_) => 1,
            Self::Textured { .. } => 2,
            Self::SimpleText { .. } => 3,
            Self::SdfText { .. } => 4,
        }
    }

    pub fn texture(&self) -> Option<&TextureSlot> {
        match self {
            Self::Textured { texture, .. } => Some(texture),
            Self::SimpleText { atlas, .. } | Self::SdfText { atlas, .. } => Some(atlas),
            Self::Default { .. } | Self::Gradient(_) => None,
        }
    }

    pub fn texture_mut(&mut self) -> Option<&mut TextureSlot> {
        match self {
            Self::Textured { texture, .. } => Some(texture),
            Self::SimpleText { atlas, .. } | Self::SdfText { atlas, .. } => Some(atlas),
            Self::Default { .. } | Self::Gradient(_) => None,
        }
    }

    fn body(&self) -> Vec<[f32; 4]> {
        match *self {
            Self::Default { color } => vec![color],
            Self::Gradient(g) => vec![
                g.start_color,
                g.end_color,
                [g.start[0], g.start[1], g.end[0], g.end[1]],
            ],
            Self::Textured { tint, .. } => vec![tint],
            Self::SimpleText { color, .. } => vec![color],
            Self::SdfText { style, .. } => vec![
                style.color,
                style.outline_color,
                [style.thickness, style.softness, style.outline_thickness, 0.0],
            ],
        }
    }
}

/// Material of one draw request, serialized into the frame's material
/// buffer at `DrawRequest::material_offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuiMaterialData {
    pub canvas_size: [f32; 2],
    pub kind: GuiMaterialKind,
}

impl GuiMaterialData {
    /// Serialized size, a multiple of 16.
    pub fn byte_size(&self) -> u64 {
        let raw = MATERIAL_HEADER_BYTES + self.kind.body().len() as u64 * 16;
        raw.div_ceil(MATERIAL_ALIGN) * MATERIAL_ALIGN
    }

    pub fn serialize_into(&self, out: &mut Vec<u8>) {
        let start = out.len();
        let header = MaterialHeader {
            canvas_size: self.canvas_size,
            bindless_index: self.kind.texture().map_or(0, |t| t.bindless_index),
            kind: self.kind.tag(),
        };
        out.extend_from_slice(bytemuck::bytes_of(&header));
        out.extend_from_slice(bytemuck::cast_slice(&self.kind.body()));
        out.resize(start + self.byte_size() as usize, 0);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrawRequest {
    pub first_index: u32,
    pub index_count: u32,
    pub vertex_offset: i32,
    pub clip: ClipRect,
    pub shader: ResourceId,
    pub material: GuiMaterialData,
    /// Byte offset of the material in the frame's material buffer.
    pub material_offset: u64,
    /// False when a referenced texture did not resolve; the draw is skipped.
    pub valid: bool,
}

/// Geometry and requests of one tick (or of several ticks once appended).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuiFrame {
    pub vertices: Vec<GuiVertex>,
    pub indices: Vec<u32>,
    pub requests: Vec<DrawRequest>,
    /// Total serialized material size.
    pub material_bytes: u64,
}

impl GuiFrame {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Append `other`, rebasing its offsets past this frame's data.
    pub fn append(&mut self, other: GuiFrame) {
        let vertex_base = self.vertices.len() as i32;
        let index_base = self.indices.len() as u32;
        let material_base = self.material_bytes;
        self.vertices.extend(other.vertices);
        self.indices.extend(other.indices);
        self.requests.extend(other.requests.into_iter().map(|mut request| {
            request.vertex_offset += vertex_base;
            request.first_index += index_base;
            request.material_offset += material_base;
            request
        }));
        self.material_bytes += other.material_bytes;
    }

    /// Serialize every material back to back, in request order.
    pub fn material_blob(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.material_bytes as usize);
        for request in &self.requests {
            debug_assert_eq!(request.material_offset, bytes.len() as u64);
            request.material.serialize_into(&mut bytes);
        }
        bytes
    }
}

/// Shader ids per material kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuiShaders {
    pub default: ResourceId,
    pub gradient: ResourceId,
    pub textured: ResourceId,
    pub text: ResourceId,
    pub sdf_text: ResourceId,
}

impl GuiShaders {
    pub fn from_config(config: &SurfaceConfig) -> Self {
        Self {
            default: config.default_shader,
            gradient: config.gradient_shader,
            textured: config.textured_shader,
            text: config.text_shader,
            sdf_text: config.sdf_text_shader,
        }
    }
}

/// Callbacks of the vector-graphics library, one per shape type.
pub trait DrawBackend {
    fn draw_default(&mut self, buffer: &DrawBuffer, color: [f32; 4]);
    fn draw_gradient(&mut self, buffer: &DrawBuffer, gradient: Gradient);
    fn draw_textured(&mut self, buffer: &DrawBuffer, texture: ResourceId, tint: [f32; 4]);
    fn draw_simple_text(&mut self, buffer: &DrawBuffer, atlas: ResourceId, color: [f32; 4]);
    fn draw_sdf_text(&mut self, buffer: &DrawBuffer, atlas: ResourceId, style: SdfTextStyle);
}

/// Collects one tick of UI draws.
pub struct GuiRenderer<'r> {
    resources: &'r ResourceStore,
    shaders: GuiShaders,
    frame: GuiFrame,
}

impl<'r> GuiRenderer<'r> {
    pub fn new(resources: &'r ResourceStore, shaders: GuiShaders) -> Self {
        Self {
            resources,
            shaders,
            frame: GuiFrame::default(),
        }
    }

    pub fn request_count(&self) -> usize {
        self.frame.requests.len()
    }

    /// Finish the tick: stamp `canvas_size` into every material and hand the
    /// frame over.
    pub fn flush_gui(&mut self, canvas_size: [f32; 2]) -> GuiFrame {
        let mut frame = std::mem::take(&mut self.frame);
        for request in &mut frame.requests {
            request.material.canvas_size = canvas_size;
        }
        frame
    }

    fn resolve(&self, id: ResourceId) -> (TextureSlot, bool) {
        match self.resources.texture(id) {
            Some(entry) => (
                TextureSlot {
                    id,
                    bindless_index: entry.bindless_index,
                },
                true,
            ),
            None => {
                tracing::warn!(?id, "gui texture missing at record time");
                (
                    TextureSlot {
                        id,
                        bindless_index: 0,
                    },
                    false,
                )
            }
        }
    }

    fn push(&mut self, buffer: &DrawBuffer, shader: ResourceId, kind: GuiMaterialKind, valid: bool) {
        if buffer.indices.is_empty() {
            return;
        }
        let frame = &mut self.frame;
        let material = GuiMaterialData {
            canvas_size: [0.0; 2],
            kind,
        };
        let request = DrawRequest {
            first_index: frame.indices.len() as u32,
            index_count: buffer.indices.len() as u32,
            vertex_offset: frame.vertices.len() as i32,
            clip: buffer.clip,
            shader,
            material,
            material_offset: frame.material_bytes,
            valid,
        };
        frame.material_bytes += material.byte_size();
        frame.vertices.extend_from_slice(&buffer.vertices);
        frame.indices.extend_from_slice(&buffer.indices);
        frame.requests.push(request);
    }
}

impl DrawBackend for GuiRenderer<'_> {
    fn draw_default(&mut self, buffer: &DrawBuffer, color: [f32; 4]) {
        self.push(buffer, self.shaders.default, GuiMaterialKind::Default { color }, true);
    }

    fn draw_gradient(&mut self, buffer: &DrawBuffer, gradient: Gradient) {
        self.push(buffer, self.shaders.gradient, GuiMaterialKind::Gradient(gradient), true);
    }

    fn draw_textured(&mut self, buffer: &DrawBuffer, texture: ResourceId, tint: [f32; 4]) {
        let (texture, valid) = self.resolve(texture);
        self.push(
            buffer,
            self.shaders.textured,
            GuiMaterialKind::Textured { texture, tint },
            valid,
        );
    }

    fn draw_simple_text(&mut self, buffer: &DrawBuffer, atlas: ResourceId, color: [f32; 4]) {
        let (atlas, valid) = self.resolve(atlas);
        self.push(
            buffer,
            self.shaders.text,
            GuiMaterialKind::SimpleText { atlas, color },
            valid,
        );
    }

    fn draw_sdf_text(&mut self, buffer: &DrawBuffer, atlas: ResourceId, style: SdfTextStyle) {
        let (atlas, valid) = self.resolve(atlas);
        self.push(
            buffer,
            self.shaders.sdf_text,
            GuiMaterialKind::SdfText { atlas, style },
            valid,
        );
    }
}

/// Two triangles covering `[x, y, w, h]` with UVs 0..1.
pub fn quad(x: f32, y: f32, width: f32, height: f32, color: [f32; 4]) -> DrawBuffer {
    let corner = |px: f32, py: f32, u: f32, v: f32| GuiVertex {
        position: [px, py],
        uv: [u, v],
        color,
    };
    DrawBuffer {
        vertices: vec![
            corner(x, y, 0.0, 0.0),
            corner(x + width, y, 1.0, 0.0),
            corner(x + width, y + height, 1.0, 1.0),
            corner(x, y + height, 0.0, 1.0),
        ],
        indices: vec![0, 1, 2, 0, 2, 3],
        clip: ClipRect::new(x, y, width, height),
    }
}
