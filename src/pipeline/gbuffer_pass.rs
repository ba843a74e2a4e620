//! G-Buffer generation pass for deferred rendering
//!
//! Renders geometry to multiple render targets (MRT):
//! - Albedo (base color)
//! - View-space normals
//! - Physical properties (roughness, metallic, ambient occlusion)
//! - Depth buffer

use crate::arena::{DrawBatch, ResourceArena};
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::config::RendererConfig;
use crate::error::RendererResult;
use crate::resources::TextureCache;
use crate::scene::CameraUniformData;

pub const ALBEDO_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;
pub const NORMAL_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const PHYSICAL_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Render targets written by the geometry pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GBufferViews {
    pub albedo: TextureViewHandle,
    pub normal: TextureViewHandle,
    pub physical: TextureViewHandle,
    pub depth: TextureViewHandle,
}

struct GBuffer {
    textures: Vec<TextureHandle>,
    views: GBufferViews,
    width: u32,
    height: u32,
}

impl GBuffer {
    fn new<B: GraphicsBackend + ?Sized>(backend: &mut B, width: u32, height: u32) -> RendererResult<Self> {
        let mut textures = Vec::with_capacity(4);
        let mut target = |label: &str, format| -> RendererResult<TextureViewHandle> {
            let texture = backend.create_texture(&TextureDescriptor {
                label: Some(label.into()),
                width,
                height,
                format,
                usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
                ..Default::default()
            })?;
            textures.push(texture);
            Ok(backend.create_texture_view(texture, &TextureViewDescriptor::default())?)
        };

        let views = GBufferViews {
            albedo: target("gbuffer albedo", ALBEDO_FORMAT)?,
            normal: target("gbuffer normal", NORMAL_FORMAT)?,
            physical: target("gbuffer physical", PHYSICAL_FORMAT)?,
            depth: target("gbuffer depth", DEPTH_FORMAT)?,
        };

        Ok(Self {
            textures,
            views,
            width,
            height,
        })
    }

    fn destroy<B: GraphicsBackend + ?Sized>(&self, backend: &mut B) {
        for view in [self.views.albedo, self.views.normal, self.views.physical, self.views.depth] {
            backend.destroy_texture_view(view);
        }
        for texture in &self.textures {
            backend.destroy_texture(*texture);
        }
    }
}

/// Deferred geometry pass
pub struct GeometryPass {
    max_textures: u32,
    gbuffer: GBuffer,
    pipeline: RenderPipelineHandle,
    material_layout: BindGroupLayoutHandle,
    material_bind_group: Option<BindGroupHandle>,
    sampler: SamplerHandle,
    camera_buffers: Vec<BufferHandle>,
    camera_bind_groups: Vec<BindGroupHandle>,
}

impl GeometryPass {
    pub fn new<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        config: &RendererConfig,
        frames_in_flight: usize,
        width: u32,
        height: u32,
    ) -> RendererResult<Self> {
        let gbuffer = GBuffer::new(backend, width, height)?;

        let camera_layout = backend.create_bind_group_layout(&[BindGroupLayoutEntry::new(
            0,
            ShaderStageFlags::VERTEX,
            BindingType::UniformBuffer,
        )])?;
        let material_layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::new(
                0,
                ShaderStageFlags::FRAGMENT,
                BindingType::StorageBuffer { read_only: true },
            ),
            BindGroupLayoutEntry::new(
                1,
                ShaderStageFlags::FRAGMENT,
                BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: true },
                    view_dimension: TextureViewDimension::D2,
                },
            )
            .with_count(config.max_textures),
            BindGroupLayoutEntry::new(2, ShaderStageFlags::FRAGMENT, BindingType::Sampler { comparison: false }),
        ])?;

        let shader = geometry_shader(config.max_textures);
        let pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("geometry".into()),
            vertex_shader: shader.clone(),
            fragment_shader: Some(shader),
            vertex_layouts: vec![Vertex::layout(), InstanceData::layout()],
            bind_group_layouts: vec![camera_layout, material_layout],
            push_constant_ranges: Vec::new(),
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode: CullMode::Back,
            depth_stencil: Some(DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: CompareFunction::Less,
            }),
            color_targets: vec![
                ColorTargetState { format: ALBEDO_FORMAT },
                ColorTargetState { format: NORMAL_FORMAT },
                ColorTargetState { format: PHYSICAL_FORMAT },
            ],
        })?;

        let sampler = backend.create_sampler(&SamplerDescriptor {
            label: Some("material sampler".into()),
            address_mode_u: AddressMode::Repeat,
            address_mode_v: AddressMode::Repeat,
            address_mode_w: AddressMode::Repeat,
            ..Default::default()
        })?;

        let mut camera_buffers = Vec::with_capacity(frames_in_flight);
        let mut camera_bind_groups = Vec::with_capacity(frames_in_flight);
        for slot in 0..frames_in_flight {
            let buffer = backend.create_buffer(&BufferDescriptor {
                label: Some(format!("geometry camera {}", slot)),
                size: std::mem::size_of::<CameraUniformData>() as u64,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            })?;
            camera_bind_groups.push(backend.create_bind_group(
                camera_layout,
                &[(
                    0,
                    BindGroupEntry::Buffer {
                        buffer,
                        offset: 0,
                        size: None,
                    },
                )],
            )?);
            camera_buffers.push(buffer);
        }

        Ok(Self {
            max_textures: config.max_textures,
            gbuffer,
            pipeline,
            material_layout,
            material_bind_group: None,
            sampler,
            camera_buffers,
            camera_bind_groups,
        })
    }

    pub fn views(&self) -> GBufferViews {
        self.gbuffer.views
    }

    pub fn size(&self) -> (u32, u32) {
        (self.gbuffer.width, self.gbuffer.height)
    }

    /// Rebind the material buffer and the texture array after models were loaded
    pub fn load_models<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        arena: &ResourceArena,
        textures: &TextureCache,
    ) -> RendererResult<()> {
        if let Some(bind_group) = self.material_bind_group.take() {
            backend.destroy_bind_group(bind_group);
        }
        let views = textures.bindings(self.max_textures as usize);
        if views.is_empty() {
            return Ok(());
        }

        self.material_bind_group = Some(backend.create_bind_group(
            self.material_layout,
            &[
                (
                    0,
                    BindGroupEntry::Buffer {
                        buffer: arena.material_buffer(),
                        offset: 0,
                        size: None,
                    },
                ),
                (1, BindGroupEntry::TextureArray(views)),
                (2, BindGroupEntry::Sampler(self.sampler)),
            ],
        )?);
        Ok(())
    }

    /// Recreate the render targets for a new surface size
    pub fn resize<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        width: u32,
        height: u32,
    ) -> RendererResult<()> {
        let gbuffer = GBuffer::new(backend, width, height)?;
        self.gbuffer.destroy(backend);
        self.gbuffer = gbuffer;
        Ok(())
    }

    pub fn update_camera<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        slot: usize,
        camera: &CameraUniformData,
    ) {
        if let Some(&buffer) = self.camera_buffers.get(slot) {
            backend.write_buffer(buffer, 0, bytemuck::bytes_of(camera));
        }
    }

    /// Record the G-buffer pass into the open encoder
    pub fn record<B: GraphicsBackend + ?Sized>(&self, backend: &mut B, batch: &DrawBatch, slot: usize) {
        let views = self.gbuffer.views;
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("geometry".into()),
            color_attachments: vec![
                ColorAttachment {
                    view: views.albedo,
                    load_op: LoadOp::Clear([0.0, 0.0, 0.0, 0.0]),
                    store_op: StoreOp::Store,
                },
                ColorAttachment {
                    view: views.normal,
                    load_op: LoadOp::Clear([0.0, 0.0, 0.0, 0.0]),
                    store_op: StoreOp::Store,
                },
                ColorAttachment {
                    view: views.physical,
                    load_op: LoadOp::Clear([0.0, 0.0, 0.0, 0.0]),
                    store_op: StoreOp::Store,
                },
            ],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: views.depth,
                depth_load_op: LoadOp::Clear([1.0, 0.0, 0.0, 0.0]),
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            }),
        });
        backend.set_viewport(
            0.0,
            0.0,
            self.gbuffer.width as f32,
            self.gbuffer.height as f32,
            0.0,
            1.0,
        );

        // Nothing to shade until the first model set bound its materials
        if let (Some(&camera), Some(materials)) =
            (self.camera_bind_groups.get(slot), self.material_bind_group)
        {
            backend.set_render_pipeline(self.pipeline);
            backend.set_bind_group(0, camera);
            backend.set_bind_group(1, materials);
            batch.record(backend);
        }

        backend.end_render_pass();
    }

    pub fn destroy<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) {
        self.gbuffer.destroy(backend);
        if let Some(bind_group) = self.material_bind_group.take() {
            backend.destroy_bind_group(bind_group);
        }
        for bind_group in self.camera_bind_groups.drain(..) {
            backend.destroy_bind_group(bind_group);
        }
        for buffer in self.camera_buffers.drain(..) {
            backend.destroy_buffer(buffer);
        }
    }
}

/// Geometry shader source with the texture array sized to `max_textures`
pub fn geometry_shader(max_textures: u32) -> String {
    GEOMETRY_SHADER.replace("MAX_TEXTURES", &max_textures.to_string())
}

/// G-Buffer generation shader
pub const GEOMETRY_SHADER: &str = r#"
// G-Buffer generation shader for deferred rendering

struct CameraUniforms {
    view: mat4x4<f32>,
    proj: mat4x4<f32>,
    view_proj: mat4x4<f32>,
}

struct Material {
    diffuse_color: vec4<f32>,
    texture_index: i32,
    normal_index: i32,
    metal_rough_index: i32,
    roughness: f32,
    metallic: f32,
    padding_0: f32,
    padding_1: f32,
    padding_2: f32,
}

@group(0) @binding(0) var<uniform> camera: CameraUniforms;
@group(1) @binding(0) var<storage, read> materials: array<Material>;
@group(1) @binding(1) var textures: binding_array<texture_2d<f32>, MAX_TEXTURES>;
@group(1) @binding(2) var texture_sampler: sampler;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) tangent: vec3<f32>,
    @location(3) bitangent: vec3<f32>,
    @location(4) uv: vec2<f32>,
    @location(5) model_0: vec4<f32>,
    @location(6) model_1: vec4<f32>,
    @location(7) model_2: vec4<f32>,
    @location(8) model_3: vec4<f32>,
    @location(9) material_index: u32,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) normal: vec3<f32>,
    @location(1) tangent: vec3<f32>,
    @location(2) bitangent: vec3<f32>,
    @location(3) uv: vec2<f32>,
    @location(4) @interpolate(flat) material_index: u32,
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    let model = mat4x4<f32>(in.model_0, in.model_1, in.model_2, in.model_3);
    let model_view = camera.view * model;
    let model_view_3 = mat3x3<f32>(model_view[0].xyz, model_view[1].xyz, model_view[2].xyz);

    var out: VertexOutput;
    out.clip_position = camera.proj * model_view * vec4<f32>(in.position, 1.0);
    out.normal = model_view_3 * in.normal;
    out.tangent = model_view_3 * in.tangent;
    out.bitangent = model_view_3 * in.bitangent;
    out.uv = in.uv;
    out.material_index = in.material_index;
    return out;
}

struct GBufferOutput {
    @location(0) albedo: vec4<f32>,
    @location(1) normal: vec4<f32>,
    @location(2) physical: vec4<f32>,
}

fn safe_normalize(v: vec3<f32>) -> vec3<f32> {
    let len = length(v);
    return select(vec3<f32>(0.0), v / len, len > 0.0);
}

@fragment
fn fs_main(in: VertexOutput) -> GBufferOutput {
    let material = materials[in.material_index];

    // Sample unconditionally and select afterwards; -1 marks a missing texture
    let diffuse = textureSample(textures[max(material.texture_index, 0)], texture_sampler, in.uv);
    let normal_map = textureSample(textures[max(material.normal_index, 0)], texture_sampler, in.uv);
    let metal_rough = textureSample(textures[max(material.metal_rough_index, 0)], texture_sampler, in.uv);

    let albedo = select(material.diffuse_color, diffuse * material.diffuse_color, material.texture_index >= 0);

    var normal = safe_normalize(in.normal);
    if (material.normal_index >= 0) {
        let tbn = mat3x3<f32>(safe_normalize(in.tangent), safe_normalize(in.bitangent), normal);
        normal = safe_normalize(tbn * (normal_map.rgb * 2.0 - 1.0));
    }

    let roughness = select(material.roughness, metal_rough.g, material.metal_rough_index >= 0);
    let metallic = select(material.metallic, metal_rough.b, material.metal_rough_index >= 0);

    var out: GBufferOutput;
    out.albedo = albedo;
    out.normal = vec4<f32>(normal, 1.0);
    out.physical = vec4<f32>(roughness, metallic, 1.0, 1.0);
    return out;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessBackend, RecordedCommand};

    #[test]
    fn test_shader_texture_array_matches_config() {
        let shader = geometry_shader(64);
        assert!(shader.contains("binding_array<texture_2d<f32>, 64>"));
        assert!(!shader.contains("MAX_TEXTURES"));
    }

    #[test]
    fn test_resize_recreates_targets() {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut pass = GeometryPass::new(&mut backend, &RendererConfig::default(), 3, 64, 64).unwrap();
        let before = pass.views();
        let textures = backend.live_texture_count();

        pass.resize(&mut backend, 128, 32).unwrap();
        assert_ne!(pass.views(), before);
        assert_eq!(pass.size(), (128, 32));
        assert_eq!(backend.live_texture_count(), textures);
    }

    #[test]
    fn test_texture_array_is_padded_to_max_textures() {
        let mut backend = HeadlessBackend::new(64, 64);
        let config = RendererConfig::default().with_max_textures(8);
        let arena = ResourceArena::new(&mut backend, &config).unwrap();
        let mut textures = TextureCache::new();
        textures.ensure_default(&mut backend, None).unwrap();

        let mut pass = GeometryPass::new(&mut backend, &config, 1, 64, 64).unwrap();
        pass.load_models(&mut backend, &arena, &textures).unwrap();

        let entries = backend
            .bind_group_entries(pass.material_bind_group.unwrap())
            .unwrap();
        let array = entries.iter().find_map(|(binding, entry)| match entry {
            BindGroupEntry::TextureArray(views) if *binding == 1 => Some(views.len()),
            _ => None,
        });
        assert_eq!(array, Some(8));
        assert!(backend.validation_errors().is_empty());
    }

    #[test]
    fn test_no_draws_before_materials_are_bound() {
        let mut backend = HeadlessBackend::new(64, 64);
        let pass = GeometryPass::new(&mut backend, &RendererConfig::default(), 1, 64, 64).unwrap();

        backend.begin_commands("geometry");
        pass.record(&mut backend, &DrawBatch::new(), 0);
        backend.submit(&SubmitInfo::default()).unwrap();

        let commands = &backend.submissions().last().unwrap().commands;
        assert!(!commands
            .iter()
            .any(|c| matches!(c, RecordedCommand::SetRenderPipeline(_))));
        assert!(matches!(commands.last(), Some(RecordedCommand::EndRenderPass)));
    }
}
