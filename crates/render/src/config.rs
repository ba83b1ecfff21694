use std::path::Path;

use serde::{Deserialize, Serialize};
use strata_common::ResourceId;

/// Engine constants for the world renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Number of independently resourced frames the GPU may work on at once.
    pub frames_in_flight: usize,
    /// Capacity of the per-frame object array.
    pub max_objects: u32,
    /// Capacity of the per-frame material array.
    pub max_materials: u32,
    /// Capacity of the per-frame indirect argument array.
    pub max_draws: u32,
    pub clear_color: [f32; 4],
    pub lighting_shader: ResourceId,
    pub skybox_shader: ResourceId,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            max_objects: 4096,
            max_materials: 256,
            max_draws: 1024,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            lighting_shader: ResourceId(1),
            skybox_shader: ResourceId(2),
        }
    }
}

/// Engine constants for the UI compositor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub frames_in_flight: usize,
    pub default_shader: ResourceId,
    pub gradient_shader: ResourceId,
    pub textured_shader: ResourceId,
    pub text_shader: ResourceId,
    pub sdf_text_shader: ResourceId,
    /// Starting capacities of the per-frame GUI buffers; they grow on demand.
    pub initial_vertices: u32,
    pub initial_indices: u32,
    pub initial_material_bytes: u32,
    pub clear_color: [f32; 4],
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            default_shader: ResourceId(10),
            gradient_shader: ResourceId(11),
            textured_shader: ResourceId(12),
            text_shader: ResourceId(13),
            sdf_text_shader: ResourceId(14),
            initial_vertices: 4096,
            initial_indices: 8192,
            initial_material_bytes: 16384,
            clear_color: [0.05, 0.05, 0.06, 1.0],
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Top-level render settings file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub world: RendererConfig,
    pub surface: SurfaceConfig,
}

impl RenderSettings {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_yaml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Use one frames-in-flight count for both renderers.
    pub fn set_frames_in_flight(&mut self, frames: usize) {
        self.world.frames_in_flight = frames;
        self.surface.frames_in_flight = frames;
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.world.validate()?;
        self.surface.validate()
    }
}

impl RendererConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_frames_in_flight("world.frames_in_flight", self.frames_in_flight)?;
        check_positive(&[
            ("world.max_objects", self.max_objects),
            ("world.max_materials", self.max_materials),
            ("world.max_draws", self.max_draws),
        ])
    }
}

impl SurfaceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_frames_in_flight("surface.frames_in_flight", self.frames_in_flight)?;
        check_positive(&[
            ("surface.initial_vertices", self.initial_vertices),
            ("surface.initial_indices", self.initial_indices),
            ("surface.initial_material_bytes", self.initial_material_bytes),
        ])
    }
}

fn check_frames_in_flight(name: &str, frames: usize) -> Result<(), ConfigError> {
    if !(1..=4).contains(&frames) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in 1..=4, got {frames}"
        )));
    }
    Ok(())
}

fn check_positive(values: &[(&str, u32)]) -> Result<(), ConfigError> {
    for (name, value) in values {
        if *value == 0 {
            return Err(ConfigError::Invalid(format!("{name} must be positive")));
        }
    }
    Ok(())
}
