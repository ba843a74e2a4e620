//! Deferred lighting pass
//!
//! Performs lighting calculations using G-buffer data.
//! Renders a fullscreen triangle into the swapchain image and accumulates lighting from
//! all lights, with cascaded shadows for the first directional light.

use super::gbuffer_pass::GBufferViews;
use super::shadow_pass::ShadowPass;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::config::RendererConfig;
use crate::error::RendererResult;
use crate::scene::{GpuLight, Scene};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

/// Per-frame lighting parameters (std140 compatible)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightingUniforms {
    pub inv_proj: Mat4,
    pub inv_view: Mat4,
    pub ambient: Vec4,
    pub light_count: u32,
    pub cascade_count: u32,
    pub pcf: u32,
    pub shadow_debug: u32,
    pub shadow_bias: f32,
    pub shadow_map_size: f32,
    /// Index of the light casting cascaded shadows, -1 for none
    pub shadow_light: i32,
    pub _padding: u32,
}

impl LightingUniforms {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

struct LightingSlot {
    uniform_buffer: BufferHandle,
    light_buffer: BufferHandle,
    bind_group: Option<BindGroupHandle>,
}

/// Deferred lighting pass
pub struct LightingPass {
    max_lights: u32,
    pcf: bool,
    shadow_debug: bool,
    shadow_bias: f32,

    layout: BindGroupLayoutHandle,
    pipeline: RenderPipelineHandle,
    shadow_sampler: SamplerHandle,
    slots: Vec<LightingSlot>,
    size: (u32, u32),
}

impl LightingPass {
    pub fn new<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        config: &RendererConfig,
        frames_in_flight: usize,
    ) -> RendererResult<Self> {
        let gbuffer_texture = BindingType::Texture {
            sample_type: TextureSampleType::Float { filterable: false },
            view_dimension: TextureViewDimension::D2,
        };
        let layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::new(0, ShaderStageFlags::FRAGMENT, gbuffer_texture.clone()),
            BindGroupLayoutEntry::new(1, ShaderStageFlags::FRAGMENT, gbuffer_texture.clone()),
            BindGroupLayoutEntry::new(2, ShaderStageFlags::FRAGMENT, gbuffer_texture),
            BindGroupLayoutEntry::new(
                3,
                ShaderStageFlags::FRAGMENT,
                BindingType::Texture {
                    sample_type: TextureSampleType::Depth,
                    view_dimension: TextureViewDimension::D2,
                },
            ),
            BindGroupLayoutEntry::new(4, ShaderStageFlags::FRAGMENT, BindingType::UniformBuffer),
            BindGroupLayoutEntry::new(
                5,
                ShaderStageFlags::FRAGMENT,
                BindingType::StorageBuffer { read_only: true },
            ),
            BindGroupLayoutEntry::new(
                6,
                ShaderStageFlags::FRAGMENT,
                BindingType::StorageBuffer { read_only: true },
            ),
            BindGroupLayoutEntry::new(
                7,
                ShaderStageFlags::FRAGMENT,
                BindingType::Texture {
                    sample_type: TextureSampleType::Depth,
                    view_dimension: TextureViewDimension::D2Array,
                },
            ),
            BindGroupLayoutEntry::new(8, ShaderStageFlags::FRAGMENT, BindingType::Sampler { comparison: true }),
        ])?;

        let pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("deferred lighting".into()),
            vertex_shader: DEFERRED_LIGHTING_SHADER.to_string(),
            fragment_shader: Some(DEFERRED_LIGHTING_SHADER.to_string()),
            vertex_layouts: Vec::new(),
            bind_group_layouts: vec![layout],
            push_constant_ranges: Vec::new(),
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode: CullMode::None,
            depth_stencil: None,
            color_targets: vec![ColorTargetState {
                format: backend.swapchain_format(),
            }],
        })?;

        let shadow_sampler = backend.create_sampler(&SamplerDescriptor {
            label: Some("shadow comparison sampler".into()),
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            mipmap_filter: FilterMode::Nearest,
            compare: Some(CompareFunction::LessEqual),
            ..Default::default()
        })?;

        let mut slots = Vec::with_capacity(frames_in_flight);
        for slot in 0..frames_in_flight {
            slots.push(LightingSlot {
                uniform_buffer: backend.create_buffer(&BufferDescriptor {
                    label: Some(format!("lighting uniforms {}", slot)),
                    size: LightingUniforms::SIZE,
                    usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                })?,
                light_buffer: backend.create_buffer(&BufferDescriptor {
                    label: Some(format!("lights {}", slot)),
                    size: config.max_lights as u64 * std::mem::size_of::<GpuLight>() as u64,
                    usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
                })?,
                bind_group: None,
            });
        }

        Ok(Self {
            max_lights: config.max_lights,
            pcf: config.shadow_pcf,
            shadow_debug: config.shadow_debug,
            shadow_bias: config.shadow_bias,
            layout,
            pipeline,
            shadow_sampler,
            slots,
            size: (0, 0),
        })
    }

    /// Point every slot at the current G-buffer. Called at start-up and after resize.
    pub fn bind_inputs<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        gbuffer: GBufferViews,
        size: (u32, u32),
        shadows: &ShadowPass,
    ) -> RendererResult<()> {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(bind_group) = slot.bind_group.take() {
                backend.destroy_bind_group(bind_group);
            }
            let Some(cascades) = shadows.cascade_buffer(index) else {
                continue;
            };

            let buffer = |buffer| BindGroupEntry::Buffer {
                buffer,
                offset: 0,
                size: None,
            };
            slot.bind_group = Some(backend.create_bind_group(
                self.layout,
                &[
                    (0, BindGroupEntry::Texture(gbuffer.albedo)),
                    (1, BindGroupEntry::Texture(gbuffer.normal)),
                    (2, BindGroupEntry::Texture(gbuffer.physical)),
                    (3, BindGroupEntry::Texture(gbuffer.depth)),
                    (4, buffer(slot.uniform_buffer)),
                    (5, buffer(slot.light_buffer)),
                    (6, buffer(cascades)),
                    (7, BindGroupEntry::Texture(shadows.shadow_map_view())),
                    (8, BindGroupEntry::Sampler(self.shadow_sampler)),
                ],
            )?);
        }
        self.size = size;
        log::debug!("lighting inputs bound at {}x{}", size.0, size.1);
        Ok(())
    }

    /// Upload lights and frame parameters for `slot`
    pub fn update<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        scene: &Scene,
        cascade_count: u32,
        shadow_map_size: u32,
        slot: usize,
    ) {
        let Some(slot) = self.slots.get(slot) else {
            return;
        };

        let camera = scene.camera();
        let view = camera.view_matrix();
        let lights: Vec<GpuLight> = scene
            .lights()
            .iter()
            .take(self.max_lights as usize)
            .map(|light| light.to_gpu_data(view))
            .collect();
        let shadow_light = scene
            .lights()
            .iter()
            .take(lights.len())
            .position(|light| light.is_directional())
            .map_or(-1, |index| index as i32);

        let uniforms = LightingUniforms {
            inv_proj: camera.projection_matrix().inverse(),
            inv_view: view.inverse(),
            ambient: scene.ambient_light(),
            light_count: lights.len() as u32,
            cascade_count,
            pcf: self.pcf as u32,
            shadow_debug: self.shadow_debug as u32,
            shadow_bias: self.shadow_bias,
            shadow_map_size: shadow_map_size as f32,
            shadow_light,
            _padding: 0,
        };
        backend.write_buffer(slot.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));
        if !lights.is_empty() {
            backend.write_buffer(slot.light_buffer, 0, bytemuck::cast_slice(&lights));
        }
    }

    /// Record the fullscreen lighting pass into `target`
    pub fn record<B: GraphicsBackend + ?Sized>(&self, backend: &mut B, target: TextureViewHandle, slot: usize) {
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("deferred lighting".into()),
            color_attachments: vec![ColorAttachment {
                view: target,
                load_op: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: None,
        });
        backend.set_viewport(0.0, 0.0, self.size.0 as f32, self.size.1 as f32, 0.0, 1.0);

        if let Some(bind_group) = self.slots.get(slot).and_then(|s| s.bind_group) {
            backend.set_render_pipeline(self.pipeline);
            backend.set_bind_group(0, bind_group);
            backend.draw(0..3, 0..1);
        }

        backend.end_render_pass();
    }

    pub fn destroy<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) {
        for slot in self.slots.drain(..) {
            if let Some(bind_group) = slot.bind_group {
                backend.destroy_bind_group(bind_group);
            }
            backend.destroy_buffer(slot.uniform_buffer);
            backend.destroy_buffer(slot.light_buffer);
        }
    }
}

/// Deferred lighting shader
pub const DEFERRED_LIGHTING_SHADER: &str = r#"
// Deferred lighting shader
// Performs PBR lighting using G-buffer data, everything in view space

struct LightingUniforms {
    inv_proj: mat4x4<f32>,
    inv_view: mat4x4<f32>,
    ambient: vec4<f32>,
    light_count: u32,
    cascade_count: u32,
    pcf: u32,
    shadow_debug: u32,
    shadow_bias: f32,
    shadow_map_size: f32,
    shadow_light: i32,
    padding: u32,
}

struct Light {
    // xyz = view-space position or direction toward the light, w = 0 for directional
    position: vec4<f32>,
    // xyz = color, w = intensity
    color: vec4<f32>,
}

struct Cascade {
    proj_view: mat4x4<f32>,
    split: vec4<f32>,
}

@group(0) @binding(0) var gbuffer_albedo: texture_2d<f32>;
@group(0) @binding(1) var gbuffer_normal: texture_2d<f32>;
@group(0) @binding(2) var gbuffer_physical: texture_2d<f32>;
@group(0) @binding(3) var gbuffer_depth: texture_depth_2d;
@group(0) @binding(4) var<uniform> frame: LightingUniforms;
@group(0) @binding(5) var<storage, read> lights: array<Light>;
@group(0) @binding(6) var<storage, read> cascades: array<Cascade>;
@group(0) @binding(7) var shadow_map: texture_depth_2d_array;
@group(0) @binding(8) var shadow_sampler: sampler_comparison;

const PI: f32 = 3.14159265359;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

// Fullscreen triangle
@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var output: VertexOutput;
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    output.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    output.uv = vec2<f32>(x, 1.0 - y);
    return output;
}

fn view_position(uv: vec2<f32>, depth: f32) -> vec3<f32> {
    let ndc = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
    let position = frame.inv_proj * ndc;
    return position.xyz / position.w;
}

fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let denom = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    return a2 / max(PI * denom * denom, 0.0001);
}

fn geometry_schlick_ggx(n_dot_x: f32, roughness: f32) -> f32 {
    let r = roughness + 1.0;
    let k = (r * r) / 8.0;
    return n_dot_x / (n_dot_x * (1.0 - k) + k);
}

fn fresnel_schlick(cos_theta: f32, f0: vec3<f32>) -> vec3<f32> {
    return f0 + (1.0 - f0) * pow(clamp(1.0 - cos_theta, 0.0, 1.0), 5.0);
}

fn select_cascade(view_depth: f32) -> u32 {
    var cascade = frame.cascade_count - 1u;
    for (var i = 0u; i < frame.cascade_count; i = i + 1u) {
        if (view_depth < cascades[i].split.x) {
            cascade = i;
            break;
        }
    }
    return cascade;
}

fn shadow_factor(world_position: vec3<f32>, cascade: u32) -> f32 {
    let clip = cascades[cascade].proj_view * vec4<f32>(world_position, 1.0);
    let ndc = clip.xyz / clip.w;
    let uv = ndc.xy * vec2<f32>(0.5, -0.5) + 0.5;
    if (any(uv < vec2<f32>(0.0)) || any(uv > vec2<f32>(1.0)) || ndc.z > 1.0) {
        return 1.0;
    }

    let reference = ndc.z - frame.shadow_bias;
    if (frame.pcf == 0u) {
        return textureSampleCompareLevel(shadow_map, shadow_sampler, uv, i32(cascade), reference);
    }

    let texel = 1.0 / frame.shadow_map_size;
    var lit = 0.0;
    for (var x = -1; x <= 1; x = x + 1) {
        for (var y = -1; y <= 1; y = y + 1) {
            let offset = vec2<f32>(f32(x), f32(y)) * texel;
            lit = lit + textureSampleCompareLevel(shadow_map, shadow_sampler, uv + offset, i32(cascade), reference);
        }
    }
    return lit / 9.0;
}

fn cascade_tint(cascade: u32) -> vec3<f32> {
    var tint = vec3<f32>(1.0, 1.0, 0.25);
    switch cascade {
        case 0u: { tint = vec3<f32>(1.0, 0.25, 0.25); }
        case 1u: { tint = vec3<f32>(0.25, 1.0, 0.25); }
        case 2u: { tint = vec3<f32>(0.25, 0.25, 1.0); }
        default: {}
    }
    return tint;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(input.position.xy);
    let depth = textureLoad(gbuffer_depth, pixel, 0);

    // Background
    if (depth >= 1.0) {
        return vec4<f32>(0.0, 0.0, 0.0, 1.0);
    }

    let albedo_sample = textureLoad(gbuffer_albedo, pixel, 0);
    let physical = textureLoad(gbuffer_physical, pixel, 0);
    let albedo = albedo_sample.rgb;
    let roughness = clamp(physical.r, 0.05, 1.0);
    let metallic = physical.g;
    let ao = physical.b;

    let n = normalize(textureLoad(gbuffer_normal, pixel, 0).xyz);
    let position = view_position(input.uv, depth);
    let v = normalize(-position);
    let n_dot_v = max(dot(n, v), 0.0001);
    let f0 = mix(vec3<f32>(0.04), albedo, metallic);

    var cascade = 0u;
    var shadow = 1.0;
    if (frame.shadow_light >= 0 && frame.cascade_count > 0u) {
        cascade = select_cascade(-position.z);
        let world_position = (frame.inv_view * vec4<f32>(position, 1.0)).xyz;
        shadow = shadow_factor(world_position, cascade);
    }

    var color = frame.ambient.rgb * albedo * ao;
    for (var i = 0u; i < frame.light_count; i = i + 1u) {
        let light = lights[i];
        var l: vec3<f32>;
        var attenuation = 1.0;
        if (light.position.w == 0.0) {
            l = normalize(light.position.xyz);
        } else {
            let to_light = light.position.xyz - position;
            let dist = length(to_light);
            l = to_light / max(dist, 0.0001);
            attenuation = 1.0 / (1.0 + 0.09 * dist + 0.032 * dist * dist);
        }
        if (i32(i) == frame.shadow_light) {
            attenuation = attenuation * shadow;
        }

        let h = normalize(v + l);
        let n_dot_l = max(dot(n, l), 0.0);
        let n_dot_h = max(dot(n, h), 0.0);

        let f = fresnel_schlick(max(dot(h, v), 0.0), f0);
        let d = distribution_ggx(n_dot_h, roughness);
        let g = geometry_schlick_ggx(n_dot_v, roughness) * geometry_schlick_ggx(n_dot_l, roughness);
        let specular = d * g * f / max(4.0 * n_dot_v * n_dot_l, 0.0001);
        let diffuse = (vec3<f32>(1.0) - f) * (1.0 - metallic) * albedo / PI;

        let radiance = light.color.rgb * light.color.w * attenuation;
        color = color + (diffuse + specular) * radiance * n_dot_l;
    }

    if (frame.shadow_debug != 0u && frame.cascade_count > 0u) {
        color = color * cascade_tint(cascade);
    }

    return vec4<f32>(color, 1.0);
}
"#;
