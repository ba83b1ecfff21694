//! WGSL for the built-in pipelines.
//!
//! Group 0 is the global set: bindless textures, linear sampler, nearest
//! sampler. Group 1 is the pass set laid out by `strata_render::pass`.
//! Struct layouts mirror `strata_render::gpu_data`.

/// Common declarations prepended to every world shader.
const WORLD_PRELUDE: &str = r#"
@group(0) @binding(0) var textures: binding_array<texture_2d<f32>>;
@group(0) @binding(1) var linear_sampler: sampler;
@group(0) @binding(2) var nearest_sampler: sampler;

struct View {
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    view_projection: mat4x4<f32>,
    inverse_view_projection: mat4x4<f32>,
    camera_position: vec4<f32>,
    viewport: vec4<f32>,
    time: vec4<f32>,
};
"#;

const GEOMETRY_BODY: &str = r#"
struct Object {
    model: mat4x4<f32>,
    normal: mat4x4<f32>,
};

struct Material {
    base_color: vec4<f32>,
    albedo_index: u32,
    sampler_index: u32,
    roughness: f32,
    metallic: f32,
};

struct Instance {
    object_index: u32,
    material_index: u32,
};

@group(1) @binding(0) var<uniform> view: View;
@group(1) @binding(1) var<storage, read> objects: array<Object>;
@group(1) @binding(2) var<storage, read> materials: array<Material>;
@group(1) @binding(3) var<storage, read> instances: array<Instance>;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) world_normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) @interpolate(flat) material_index: u32,
};

struct GBuffer {
    @location(0) albedo: vec4<f32>,
    @location(1) position: vec4<f32>,
    @location(2) normal: vec4<f32>,
};

@vertex
fn vs_main(vertex: VertexInput, @builtin(instance_index) instance_index: u32) -> VertexOutput {
    let instance = instances[instance_index];
    let object = objects[instance.object_index];
    let world = object.model * vec4<f32>(vertex.position, 1.0);

    var out: VertexOutput;
    out.clip_position = view.view_projection * world;
    out.world_position = world.xyz;
    out.world_normal = normalize((object.normal * vec4<f32>(vertex.normal, 0.0)).xyz);
    out.uv = vertex.uv;
    out.material_index = instance.material_index;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> GBuffer {
    let material = materials[in.material_index];
    var texel: vec4<f32>;
    if material.sampler_index == 1u {
        texel = textureSampleLevel(textures[material.albedo_index], nearest_sampler, in.uv, 0.0);
    } else {
        texel = textureSampleLevel(textures[material.albedo_index], linear_sampler, in.uv, 0.0);
    }
    let albedo = material.base_color * texel;

    var out: GBuffer;
    out.albedo = vec4<f32>(albedo.rgb, material.roughness);
    out.position = vec4<f32>(in.world_position, material.metallic);
    out.normal = vec4<f32>(normalize(in.world_normal), 1.0);
    return out;
}
"#;

const LIGHTING_SET: &str = r#"
struct Light {
    position: vec4<f32>,
    direction: vec4<f32>,
    color: vec4<f32>,
};

struct Lighting {
    sun_direction: vec4<f32>,
    sun_color: vec4<f32>,
    ambient: vec4<f32>,
    sky_zenith: vec4<f32>,
    sky_horizon: vec4<f32>,
    counts: vec4<u32>,
    lights: array<Light, 16>,
};

@group(1) @binding(0) var<uniform> view: View;
@group(1) @binding(1) var<uniform> lighting: Lighting;
@group(1) @binding(2) var gbuffer_albedo: texture_2d<f32>;
@group(1) @binding(3) var gbuffer_position: texture_2d<f32>;
@group(1) @binding(4) var gbuffer_normal: texture_2d<f32>;

// Oversized triangle covering the viewport at depth `z`.
fn fullscreen_position(index: u32, z: f32) -> vec4<f32> {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, z, 1.0);
}
"#;

const LIGHTING_BODY: &str = r#"
@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    return fullscreen_position(index, 0.0);
}

fn shade(light: Light, position: vec3<f32>, normal: vec3<f32>) -> vec3<f32> {
    var to_light: vec3<f32>;
    var attenuation = 1.0;
    if light.position.w == 0.0 {
        to_light = normalize(-light.direction.xyz);
    } else {
        let delta = light.position.xyz - position;
        let dist = length(delta);
        to_light = delta / max(dist, 0.0001);
        let range = max(light.direction.w, 0.0001);
        attenuation = clamp(1.0 - dist / range, 0.0, 1.0);
        attenuation = attenuation * attenuation;
    }
    let diffuse = max(dot(normal, to_light), 0.0);
    return light.color.rgb * light.color.w * diffuse * attenuation;
}

@fragment
fn fs_main(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {
    let coord = vec2<i32>(frag.xy);
    let normal_sample = textureLoad(gbuffer_normal, coord, 0);
    if normal_sample.w == 0.0 {
        discard;
    }
    let albedo = textureLoad(gbuffer_albedo, coord, 0);
    let position = textureLoad(gbuffer_position, coord, 0).xyz;
    let normal = normalize(normal_sample.xyz);

    let sun_dir = normalize(-lighting.sun_direction.xyz);
    var light = lighting.ambient.rgb;
    light += lighting.sun_color.rgb * lighting.sun_color.w * max(dot(normal, sun_dir), 0.0);
    let count = min(lighting.counts.x, 16u);
    for (var i = 0u; i < count; i += 1u) {
        light += shade(lighting.lights[i], position, normal);
    }
    return vec4<f32>(albedo.rgb * light, 1.0);
}
"#;

const SKYBOX_BODY: &str = r#"
struct SkyOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) ndc: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> SkyOutput {
    var out: SkyOutput;
    out.clip_position = fullscreen_position(index, 1.0);
    out.ndc = out.clip_position.xy;
    return out;
}

const PI: f32 = 3.14159265;

@fragment
fn fs_main(in: SkyOutput) -> @location(0) vec4<f32> {
    let far = view.inverse_view_projection * vec4<f32>(in.ndc, 1.0, 1.0);
    let direction = normalize(far.xyz / far.w - view.camera_position.xyz);
    if lighting.counts.z == 1u {
        let uv = vec2<f32>(
            atan2(direction.z, direction.x) / (2.0 * PI) + 0.5,
            acos(clamp(direction.y, -1.0, 1.0)) / PI,
        );
        return textureSampleLevel(textures[lighting.counts.y], linear_sampler, uv, 0.0);
    }
    let t = clamp(direction.y, 0.0, 1.0);
    return vec4<f32>(mix(lighting.sky_horizon.rgb, lighting.sky_zenith.rgb, t), 1.0);
}
"#;

/// Every GUI material kind in one module, selected by the push constant tag.
pub const GUI_SHADER: &str = r#"
@group(0) @binding(0) var textures: binding_array<texture_2d<f32>>;
@group(0) @binding(1) var linear_sampler: sampler;
@group(0) @binding(2) var nearest_sampler: sampler;

struct DrawConstants {
    material_offset: u32,
    kind: u32,
    pad0: u32,
    pad1: u32,
};

var<push_constant> constants: DrawConstants;

// Header vec4: canvas width, canvas height, bindless index bits, kind bits.
@group(1) @binding(0) var<storage, read> materials: array<vec4<f32>>;

struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) color: vec4<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) pixel: vec2<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) color: vec4<f32>,
};

fn material(slot: u32) -> vec4<f32> {
    return materials[constants.material_offset / 16u + slot];
}

@vertex
fn vs_main(vertex: VertexInput) -> VertexOutput {
    let canvas = max(material(0u).xy, vec2<f32>(1.0, 1.0));
    let ndc = vec2<f32>(
        vertex.position.x / canvas.x * 2.0 - 1.0,
        1.0 - vertex.position.y / canvas.y * 2.0,
    );
    var out: VertexOutput;
    out.clip_position = vec4<f32>(ndc, 0.0, 1.0);
    out.pixel = vertex.position;
    out.uv = vertex.uv;
    out.color = vertex.color;
    return out;
}

fn sample_bound(uv: vec2<f32>) -> vec4<f32> {
    let index = bitcast<u32>(material(0u).z);
    return textureSampleLevel(textures[index], linear_sampler, uv, 0.0);
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    var color: vec4<f32>;
    switch constants.kind {
        case 1u: {
            let ends = material(3u);
            let start = ends.xy;
            let axis = ends.zw - start;
            let t = clamp(dot(in.pixel - start, axis) / max(dot(axis, axis), 0.0001), 0.0, 1.0);
            color = mix(material(1u), material(2u), t);
        }
        case 2u: {
            color = sample_bound(in.uv) * material(1u);
        }
        case 3u: {
            let glyph = material(1u);
            color = vec4<f32>(glyph.rgb, glyph.a * sample_bound(in.uv).a);
        }
        case 4u: {
            let fill = material(1u);
            let outline = material(2u);
            let params = material(3u);
            let dist = sample_bound(in.uv).a;
            let edge = 1.0 - params.x;
            let soft = max(params.y, 0.0001);
            let inner = smoothstep(edge - soft, edge + soft, dist);
            let outer = smoothstep(edge - params.z - soft, edge - params.z + soft, dist);
            let body = mix(outline, fill, inner);
            color = vec4<f32>(body.rgb, body.a * outer);
        }
        default: {
            color = material(1u);
        }
    }
    color = color * in.color;
    return vec4<f32>(color.rgb * color.a, color.a);
}
"#;

/// G-buffer pass over instanced indirect mesh draws.
pub fn geometry_shader() -> String {
    format!("{WORLD_PRELUDE}{GEOMETRY_BODY}")
}

/// Full-screen deferred lighting over the G-buffer.
pub fn lighting_shader() -> String {
    format!("{WORLD_PRELUDE}{LIGHTING_SET}{LIGHTING_BODY}")
}

/// Sky gradient or equirectangular texture at the far plane.
pub fn skybox_shader() -> String {
    format!("{WORLD_PRELUDE}{LIGHTING_SET}{SKYBOX_BODY}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_module_has_both_entry_points() {
        for source in [
            geometry_shader(),
            lighting_shader(),
            skybox_shader(),
            GUI_SHADER.to_owned(),
        ] {
            assert!(source.contains("fn vs_main"));
            assert!(source.contains("fn fs_main"));
        }
    }

    #[test]
    fn gui_kinds_cover_every_tag() {
        for tag in ["case 1u", "case 2u", "case 3u", "case 4u", "default"] {
            assert!(GUI_SHADER.contains(tag), "missing {tag}");
        }
    }

    #[test]
    fn lighting_set_bindings_are_declared_once() {
        let source = skybox_shader();
        assert_eq!(source.matches("@group(1) @binding(0)").count(), 1);
        assert_eq!(source.matches("@group(0) @binding(0)").count(), 1);
    }
}
