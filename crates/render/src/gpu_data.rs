//! Plain-old-data layouts shared with shaders.
//!
//! Every struct is `#[repr(C)]` with 16-byte aligned members so the same
//! bytes are valid as WGSL uniform or storage data.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

pub const MAX_LIGHTS: usize = 16;

/// Per-view constants of the geometry and lighting passes.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct GpuViewData {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub view_projection: [[f32; 4]; 4],
    pub inverse_view_projection: [[f32; 4]; 4],
    pub camera_position: [f32; 4],
    /// width, height, 1/width, 1/height
    pub viewport: [f32; 4],
    /// time, delta, near, far
    pub time: [f32; 4],
}

impl GpuViewData {
    pub fn new(
        view: Mat4,
        projection: Mat4,
        camera_position: Vec3,
        viewport: (f32, f32),
        time: f32,
        delta: f32,
        near_far: (f32, f32),
    ) -> Self {
        let view_projection = projection * view;
        let (w, h) = viewport;
        Self {
            view: view.to_cols_array_2d(),
            projection: projection.to_cols_array_2d(),
            view_projection: view_projection.to_cols_array_2d(),
            inverse_view_projection: view_projection.inverse().to_cols_array_2d(),
            camera_position: camera_position.extend(1.0).to_array(),
            viewport: [w, h, 1.0 / w.max(1.0), 1.0 / h.max(1.0)],
            time: [time, delta, near_far.0, near_far.1],
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct GpuLight {
    /// xyz position, w = 0 directional / 1 point
    pub position: [f32; 4],
    /// xyz direction, w = range
    pub direction: [f32; 4],
    /// rgb color, w = intensity
    pub color: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct GpuLightingData {
    pub sun_direction: [f32; 4],
    /// rgb, w = intensity
    pub sun_color: [f32; 4],
    pub ambient: [f32; 4],
    pub sky_zenith: [f32; 4],
    pub sky_horizon: [f32; 4],
    /// x = light count, y = skybox bindless index, z = 1 when a skybox
    /// texture is set
    pub counts: [u32; 4],
    pub lights: [GpuLight; MAX_LIGHTS],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct GpuObjectData {
    pub model: [[f32; 4]; 4],
    pub normal: [[f32; 4]; 4],
}

impl GpuObjectData {
    pub fn from_model(model: Mat4) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            normal: model.inverse().transpose().to_cols_array_2d(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct GpuMaterialData {
    pub base_color: [f32; 4],
    pub albedo_index: u32,
    /// 0 linear, 1 nearest
    pub sampler_index: u32,
    pub roughness: f32,
    pub metallic: f32,
}

/// Layout of one indexed indirect draw record as consumed by the GPU.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuDrawArguments {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

impl GpuDrawArguments {
    pub const STRIDE: u32 = std::mem::size_of::<Self>() as u32;
}

/// Per-instance indices read by the geometry shader via `instance_index`.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuDrawInstance {
    pub object_index: u32,
    pub material_index: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_match_shader_expectations() {
        assert_eq!(GpuDrawArguments::STRIDE, 20);
        assert_eq!(std::mem::size_of::<GpuDrawInstance>(), 8);
        assert_eq!(std::mem::size_of::<GpuMaterialData>(), 32);
        assert_eq!(std::mem::size_of::<GpuObjectData>(), 128);
        assert_eq!(std::mem::size_of::<GpuLight>(), 48);
        assert_eq!(std::mem::size_of::<GpuViewData>() % 16, 0);
        assert_eq!(std::mem::size_of::<GpuLightingData>() % 16, 0);
    }

    #[test]
    fn normal_matrix_undoes_non_uniform_scale() {
        let model = Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        let data = GpuObjectData::from_model(model);
        let normal = Mat4::from_cols_array_2d(&data.normal);
        let n = normal.transform_vector3(Vec3::X);
        assert!((n.x - 0.5).abs() < 1e-6);
    }
}
