//! Demo content: built-in shaders, a checkered floor, spinning cubes and a
//! few lights.

use glam::{Quat, Vec3};
use strata_assets::{Material, ResourceStore, primitives};
use strata_common::{Extent2D, ResourceId, Transform};
use strata_ecs::{Camera, Light, LightKind, MeshComponent, Spin, World};
use strata_gfx::{GpuDevice, SamplerKind, TextureFormat};
use strata_render::RenderSettings;
use strata_render::pipelines::{
    geometry_pipeline_desc, gui_pipeline_desc, lighting_pipeline_desc, skybox_pipeline_desc,
};
use strata_render_wgpu::shaders;

pub const SURFACE_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

pub const GEOMETRY_SHADER: ResourceId = ResourceId(20);
pub const CUBE: ResourceId = ResourceId(30);
pub const FLOOR: ResourceId = ResourceId(31);
pub const CHECKER: ResourceId = ResourceId(40);
pub const NEAREST: ResourceId = ResourceId(41);
pub const FLOOR_MATERIAL: ResourceId = ResourceId(50);
/// Cube materials take consecutive ids from here.
pub const CUBE_MATERIALS: u64 = 51;
const CUBE_COLORS: [[f32; 4]; 3] = [
    [0.9, 0.2, 0.2, 1.0],
    [0.2, 0.5, 0.9, 1.0],
    [0.9, 0.8, 0.3, 1.0],
];

/// Register every pipeline the renderers look up by id.
pub fn register_shaders(
    device: &mut dyn GpuDevice,
    resources: &mut ResourceStore,
    settings: &RenderSettings,
) -> anyhow::Result<()> {
    let capacity = resources.bindless_capacity();
    resources.register_shader(
        device,
        GEOMETRY_SHADER,
        &geometry_pipeline_desc("geometry", &shaders::geometry_shader(), capacity),
    )?;
    resources.register_shader(
        device,
        settings.world.lighting_shader,
        &lighting_pipeline_desc(&shaders::lighting_shader(), capacity),
    )?;
    resources.register_shader(
        device,
        settings.world.skybox_shader,
        &skybox_pipeline_desc(&shaders::skybox_shader(), capacity),
    )?;
    let surface = &settings.surface;
    for (label, id) in [
        ("gui-default", surface.default_shader),
        ("gui-gradient", surface.gradient_shader),
        ("gui-textured", surface.textured_shader),
        ("gui-text", surface.text_shader),
        ("gui-sdf-text", surface.sdf_text_shader),
    ] {
        resources.register_shader(
            device,
            id,
            &gui_pipeline_desc(label, shaders::GUI_SHADER, capacity, SURFACE_FORMAT),
        )?;
    }
    Ok(())
}

fn checker_pixels(size: u32, cell: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let v = if (x / cell + y / cell) % 2 == 0 { 230 } else { 90 };
            pixels.extend_from_slice(&[v, v, v, 255]);
        }
    }
    pixels
}

/// Models, the checker texture and materials.
pub fn register_content(
    device: &mut dyn GpuDevice,
    resources: &mut ResourceStore,
) -> anyhow::Result<()> {
    let (vertices, indices) = primitives::cube();
    resources.register_model(CUBE, "cube", &vertices, &indices)?;
    let (vertices, indices) = primitives::plane(12.0);
    resources.register_model(FLOOR, "floor", &vertices, &indices)?;

    resources.register_texture(
        device,
        CHECKER,
        "checker",
        Extent2D::new(64, 64),
        checker_pixels(64, 8),
    )?;
    resources.register_sampler(NEAREST, SamplerKind::Nearest);
    resources.register_material(
        FLOOR_MATERIAL,
        Material {
            albedo: Some(CHECKER),
            sampler: Some(NEAREST),
            roughness: 0.9,
            ..Material::new("floor", GEOMETRY_SHADER)
        },
    );
    for (i, color) in CUBE_COLORS.iter().enumerate() {
        resources.register_material(
            ResourceId(CUBE_MATERIALS + i as u64),
            Material {
                base_color: *color,
                roughness: 0.4,
                metallic: 0.1 * i as f32,
                ..Material::new(format!("cube-{i}"), GEOMETRY_SHADER)
            },
        );
    }
    Ok(())
}

/// A floor, `cubes` spinning cubes in a ring, a camera and two point lights.
pub fn build_world(cubes: usize) -> World {
    let mut world = World::new();

    let floor = world.spawn(Transform::from_position(Vec3::new(0.0, -0.5, 0.0)));
    world.set_name(floor, "floor");
    world.set_mesh(
        floor,
        MeshComponent {
            model: FLOOR,
            mesh_index: 0,
            material: FLOOR_MATERIAL,
        },
    );

    for i in 0..cubes {
        let angle = i as f32 / cubes.max(1) as f32 * std::f32::consts::TAU;
        let radius = 2.0 + (i / 12) as f32 * 1.5;
        let id = world.spawn(Transform::from_position(Vec3::new(
            angle.cos() * radius,
            0.5,
            angle.sin() * radius,
        )));
        world.set_name(id, format!("cube-{i}"));
        world.set_mesh(
            id,
            MeshComponent {
                model: CUBE,
                mesh_index: 0,
                material: ResourceId(CUBE_MATERIALS + (i % CUBE_COLORS.len()) as u64),
            },
        );
        world.set_spin(
            id,
            Spin {
                axis: Vec3::new(0.3, 1.0, 0.1),
                radians_per_second: 0.5 + i as f32 * 0.1,
            },
        );
    }

    let eye = Vec3::new(0.0, 4.0, 9.0);
    let camera = world.spawn(Transform {
        position: eye,
        rotation: Quat::from_rotation_x(-0.4),
        ..Transform::default()
    });
    world.set_name(camera, "camera");
    world.set_camera(camera, Camera::default());

    for (position, color) in [
        (Vec3::new(3.0, 3.0, 0.0), Vec3::new(1.0, 0.6, 0.3)),
        (Vec3::new(-3.0, 2.0, 2.0), Vec3::new(0.3, 0.6, 1.0)),
    ] {
        let light = world.spawn(Transform::from_position(position));
        world.set_light(
            light,
            Light {
                kind: LightKind::Point { range: 12.0 },
                color,
                intensity: 2.0,
            },
        );
    }
    world
}
