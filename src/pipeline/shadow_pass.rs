//! Cascaded shadow map rendering
//!
//! The shadow map is one depth texture with a layer per cascade. Each layer is rendered
//! in its own pass with the cascade index pushed to the vertex shader, drawing the same
//! indirect batches as the geometry pass.

use super::cascade::{GpuCascade, ShadowCascades};
use crate::arena::DrawBatch;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::config::RendererConfig;
use crate::error::RendererResult;
use crate::scene::Scene;

pub const SHADOW_MAP_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Depth-only rendering of every shadow cascade
pub struct ShadowPass {
    map_size: u32,
    cascades: ShadowCascades,
    cascade_count: u32,

    texture: TextureHandle,
    layer_views: Vec<TextureViewHandle>,
    array_view: TextureViewHandle,

    pipeline: RenderPipelineHandle,
    cascade_buffers: Vec<BufferHandle>,
    bind_groups: Vec<BindGroupHandle>,
}

impl ShadowPass {
    pub fn new<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        config: &RendererConfig,
        frames_in_flight: usize,
    ) -> RendererResult<Self> {
        let cascade_count = config.shadow_cascades;
        let texture = backend.create_texture(&TextureDescriptor {
            label: Some("shadow map".into()),
            width: config.shadow_map_size,
            height: config.shadow_map_size,
            array_layers: cascade_count,
            format: SHADOW_MAP_FORMAT,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
            ..Default::default()
        })?;
        let layer_views = (0..cascade_count)
            .map(|layer| backend.create_texture_view(texture, &TextureViewDescriptor::layer(layer)))
            .collect::<BackendResult<Vec<_>>>()?;
        let array_view = backend.create_texture_view(texture, &TextureViewDescriptor::array(cascade_count))?;

        let layout = backend.create_bind_group_layout(&[BindGroupLayoutEntry::new(
            0,
            ShaderStageFlags::VERTEX,
            BindingType::StorageBuffer { read_only: true },
        )])?;

        let pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("shadow".into()),
            vertex_shader: SHADOW_SHADER.to_string(),
            fragment_shader: None,
            vertex_layouts: vec![Vertex::layout(), InstanceData::layout()],
            bind_group_layouts: vec![layout],
            push_constant_ranges: vec![PushConstantRange {
                stages: ShaderStageFlags::VERTEX,
                size: std::mem::size_of::<u32>() as u32,
            }],
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode: CullMode::None,
            depth_stencil: Some(DepthStencilState {
                format: SHADOW_MAP_FORMAT,
                depth_write_enabled: true,
                depth_compare: CompareFunction::LessEqual,
            }),
            color_targets: Vec::new(),
        })?;

        let mut cascade_buffers = Vec::with_capacity(frames_in_flight);
        let mut bind_groups = Vec::with_capacity(frames_in_flight);
        for slot in 0..frames_in_flight {
            let buffer = backend.create_buffer(&BufferDescriptor {
                label: Some(format!("shadow cascades {}", slot)),
                size: cascade_count as u64 * GpuCascade::SIZE,
                usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
            })?;
            bind_groups.push(backend.create_bind_group(
                layout,
                &[(
                    0,
                    BindGroupEntry::Buffer {
                        buffer,
                        offset: 0,
                        size: None,
                    },
                )],
            )?);
            cascade_buffers.push(buffer);
        }

        Ok(Self {
            map_size: config.shadow_map_size,
            cascades: ShadowCascades::new(cascade_count, config.cascade_split_lambda),
            cascade_count,
            texture,
            layer_views,
            array_view,
            pipeline,
            cascade_buffers,
            bind_groups,
        })
    }

    pub fn cascades(&self) -> &ShadowCascades {
        &self.cascades
    }

    pub fn cascade_count(&self) -> u32 {
        self.cascade_count
    }

    pub fn map_size(&self) -> u32 {
        self.map_size
    }

    /// Layered depth view the lighting pass samples
    pub fn shadow_map_view(&self) -> TextureViewHandle {
        self.array_view
    }

    pub fn cascade_buffer(&self, slot: usize) -> Option<BufferHandle> {
        self.cascade_buffers.get(slot).copied()
    }

    /// Refit the cascades if the scene changed and upload them for `slot`
    pub fn update<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B, scene: &Scene, slot: usize) {
        self.cascades.update(scene);
        self.upload(backend, slot);
    }

    /// Refit after the camera projection changed
    pub fn refit(&mut self, scene: &Scene) {
        self.cascades.refit(scene);
    }

    fn upload<B: GraphicsBackend + ?Sized>(&self, backend: &mut B, slot: usize) {
        if let Some(buffer) = self.cascade_buffer(slot) {
            backend.write_buffer(buffer, 0, bytemuck::cast_slice(&self.cascades.gpu_data()));
        }
    }

    /// Record one depth pass per cascade into the open encoder
    pub fn record<B: GraphicsBackend + ?Sized>(&self, backend: &mut B, batch: &DrawBatch, slot: usize) {
        let Some(&bind_group) = self.bind_groups.get(slot) else {
            return;
        };

        for (cascade, &view) in self.layer_views.iter().enumerate() {
            backend.begin_render_pass(&RenderPassDescriptor {
                label: Some(format!("shadow cascade {}", cascade)),
                color_attachments: Vec::new(),
                depth_stencil_attachment: Some(DepthStencilAttachment {
                    view,
                    depth_load_op: LoadOp::Clear([1.0, 0.0, 0.0, 0.0]),
                    depth_store_op: StoreOp::Store,
                    depth_clear_value: 1.0,
                }),
            });
            backend.set_viewport(0.0, 0.0, self.map_size as f32, self.map_size as f32, 0.0, 1.0);
            backend.set_render_pipeline(self.pipeline);
            backend.set_bind_group(0, bind_group);
            backend.set_push_constants(
                ShaderStageFlags::VERTEX,
                0,
                bytemuck::bytes_of(&(cascade as u32)),
            );
            batch.record(backend);
            backend.end_render_pass();
        }
    }

    pub fn destroy<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) {
        for bind_group in self.bind_groups.drain(..) {
            backend.destroy_bind_group(bind_group);
        }
        for buffer in self.cascade_buffers.drain(..) {
            backend.destroy_buffer(buffer);
        }
        for view in self.layer_views.drain(..).chain(std::iter::once(self.array_view)) {
            backend.destroy_texture_view(view);
        }
        backend.destroy_texture(self.texture);
    }
}

/// Depth-only shader; positions are moved into the selected cascade's light space
pub const SHADOW_SHADER: &str = r#"
struct Cascade {
    proj_view: mat4x4<f32>,
    split: vec4<f32>,
}

struct ShadowPush {
    cascade: u32,
}

@group(0) @binding(0) var<storage, read> cascades: array<Cascade>;

var<push_constant> shadow_push: ShadowPush;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(5) model_0: vec4<f32>,
    @location(6) model_1: vec4<f32>,
    @location(7) model_2: vec4<f32>,
    @location(8) model_3: vec4<f32>,
}

@vertex
fn vs_main(in: VertexInput) -> @builtin(position) vec4<f32> {
    let model = mat4x4<f32>(in.model_0, in.model_1, in.model_2, in.model_3);
    return cascades[shadow_push.cascade].proj_view * model * vec4<f32>(in.position, 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessBackend, RecordedCommand};

    #[test]
    fn test_one_pass_per_cascade_layer() {
        let mut backend = HeadlessBackend::new(64, 64);
        let config = RendererConfig::default().with_shadows(4, 512);
        let pass = ShadowPass::new(&mut backend, &config, 2).unwrap();

        backend.begin_commands("shadows");
        pass.record(&mut backend, &DrawBatch::new(), 1);
        backend.submit(&SubmitInfo::default()).unwrap();

        let commands = &backend.submissions().last().unwrap().commands;
        let pushed: Vec<u32> = commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::SetPushConstants { data, .. } => Some(bytemuck::pod_read_unaligned(data)),
                _ => None,
            })
            .collect();
        assert_eq!(pushed, vec![0, 1, 2, 3]);

        let depth_views: Vec<TextureViewHandle> = commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::BeginRenderPass { depth_view, .. } => *depth_view,
                _ => None,
            })
            .collect();
        for (layer, view) in depth_views.iter().enumerate() {
            let desc = backend.texture_view_descriptor(*view).unwrap();
            assert_eq!(desc.base_array_layer, layer as u32);
            assert_eq!(desc.array_layer_count, 1);
        }
    }

    #[test]
    fn test_cascades_upload_to_slot_buffer() {
        let mut backend = HeadlessBackend::new(64, 64);
        let config = RendererConfig::default();
        let mut pass = ShadowPass::new(&mut backend, &config, 3).unwrap();
        let scene = Scene::default();

        pass.update(&mut backend, &scene, 2);
        let data = backend.buffer_data(pass.cascade_buffer(2).unwrap()).unwrap();
        let first: GpuCascade = bytemuck::pod_read_unaligned(&data[..GpuCascade::SIZE as usize]);
        assert_eq!(first, pass.cascades().cascades()[0].to_gpu());
        let untouched = backend.buffer_data(pass.cascade_buffer(0).unwrap()).unwrap();
        assert!(untouched.iter().all(|b| *b == 0));
    }
}
