use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};
use strata_common::{ResourceId, Transform};

/// Human-readable name component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Name(pub String);

/// Renderable mesh: one sub-mesh of a model drawn with a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshComponent {
    pub model: ResourceId,
    pub mesh_index: u32,
    pub material: ResourceId,
}

/// Perspective camera. The view comes from the owning entity's transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub fov_y_radians: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            fov_y_radians: std::f32::consts::FRAC_PI_4,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    /// Right-handed projection with a `[0, 1]` depth range.
    pub fn projection(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y_radians, aspect.max(f32::EPSILON), self.near, self.far)
    }

    pub fn view(transform: &Transform) -> Mat4 {
        Mat4::look_to_rh(transform.position, transform.forward(), transform.up())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LightKind {
    /// Direction is the owning entity's forward axis.
    Directional,
    Point { range: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Light {
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            kind: LightKind::Point { range: 10.0 },
            color: Vec3::ONE,
            intensity: 1.0,
        }
    }
}

/// Constant rotation about `axis`, advanced by [`crate::World::step`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Spin {
    pub axis: Vec3,
    pub radians_per_second: f32,
}

/// World-wide sky and ambient parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Atmosphere {
    pub sun_direction: Vec3,
    pub sun_color: Vec3,
    pub sun_intensity: f32,
    pub ambient: Vec3,
    pub sky_zenith: Vec3,
    pub sky_horizon: Vec3,
    /// Cube or equirect texture sampled by the skybox; gradient sky when unset.
    pub skybox: Option<ResourceId>,
}

impl Default for Atmosphere {
    fn default() -> Self {
        Self {
            sun_direction: Vec3::new(-0.4, -1.0, -0.3).normalize(),
            sun_color: Vec3::new(1.0, 0.96, 0.9),
            sun_intensity: 3.0,
            ambient: Vec3::splat(0.08),
            sky_zenith: Vec3::new(0.18, 0.32, 0.62),
            sky_horizon: Vec3::new(0.72, 0.8, 0.9),
            skybox: None,
        }
    }
}
