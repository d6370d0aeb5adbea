//! Built-in WGSL programs.

/// Lit, textured meshes. Group 0 holds the frame globals, group 1 the object
/// block, group 2 the albedo texture.
pub const SCENE_SHADER: &str = r#"
const MAX_LIGHTS: u32 = 16u;

struct Light {
    kind: u32,
    color: vec3<f32>,
    direction: vec3<f32>,
    position: vec3<f32>,
}

struct Globals {
    camera_position: vec3<f32>,
    light_count: u32,
    lights: array<Light, 16>,
}

struct Object {
    model: mat4x4<f32>,
    model_view_projection: mat4x4<f32>,
}

@group(0) @binding(0) var<uniform> globals: Globals;
@group(1) @binding(0) var<uniform> object: Object;
@group(2) @binding(0) var albedo_texture: texture_2d<f32>;
@group(2) @binding(1) var albedo_sampler: sampler;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
}

@vertex
fn vs_mesh(vertex: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    let position = vec4<f32>(vertex.position, 1.0);
    out.clip_position = object.model_view_projection * position;
    out.world_position = (object.model * position).xyz;
    out.normal = (object.model * vec4<f32>(vertex.normal, 0.0)).xyz;
    out.uv = vertex.uv;
    return out;
}

@fragment
fn fs_mesh(frag: VertexOutput) -> @location(0) vec4<f32> {
    let albedo = textureSample(albedo_texture, albedo_sampler, frag.uv);
    let normal = normalize(frag.normal);

    var lighting = vec3<f32>(0.1, 0.1, 0.1);
    let count = min(globals.light_count, MAX_LIGHTS);
    for (var i = 0u; i < count; i = i + 1u) {
        let light = globals.lights[i];
        var to_light = -light.direction;
        var attenuation = 1.0;
        if light.kind == 1u {
            let delta = light.position - frag.world_position;
            let dist = max(length(delta), 0.0001);
            to_light = delta / dist;
            attenuation = 1.0 / (1.0 + 0.09 * dist + 0.032 * dist * dist);
        }
        lighting = lighting + light.color * max(dot(normal, to_light), 0.0) * attenuation;
    }

    return vec4<f32>(albedo.rgb * lighting, albedo.a);
}
"#;

/// Copies the offscreen color attachment onto a full-screen quad.
pub const BLIT_SHADER: &str = r#"
@group(0) @binding(0) var color_texture: texture_2d<f32>;
@group(0) @binding(1) var color_sampler: sampler;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_blit(@location(0) position: vec3<f32>, @location(2) uv: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(position.xy, 0.0, 1.0);
    // Render targets store their top row first
    out.uv = vec2<f32>(uv.x, 1.0 - uv.y);
    return out;
}

@fragment
fn fs_blit(frag: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(color_texture, color_sampler, frag.uv);
}
"#;
