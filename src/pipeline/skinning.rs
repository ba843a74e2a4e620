//! Compute-shader skinning
//!
//! One generic kernel skins any mesh: the offsets of the source vertices, the skin
//! weights, the joint matrices of the current frame and the destination copy are pushed
//! per dispatch. Every animated entity mesh owns a slice of the skinned vertex buffer,
//! which the geometry and shadow passes then draw like any other vertex buffer.

use crate::arena::ResourceArena;
use crate::backend::traits::*;
use crate::error::RendererResult;
use crate::scene::Scene;
use bytemuck::{Pod, Zeroable};

/// Vertices handled by one workgroup
pub const LOCAL_SIZE_X: u32 = 32;

const FLOAT_SIZE: u64 = std::mem::size_of::<f32>() as u64;
const MATRIX_SIZE: u64 = std::mem::size_of::<glam::Mat4>() as u64;

/// Per-dispatch push constants.
///
/// Vertex and weight offsets count floats, the joint offset counts matrices.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct SkinningParams {
    pub src_offset: u32,
    pub src_size: u32,
    pub weights_offset: u32,
    pub joint_offset: u32,
    pub dst_offset: u32,
}

impl SkinningParams {
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkinningState {
    Idle,
    Recording,
    Submitted,
}

/// Compute stage writing the skinned vertex buffer
pub struct SkinningCompute {
    pipeline: ComputePipelineHandle,
    layout: BindGroupLayoutHandle,
    bind_group: Option<BindGroupHandle>,
    bound_generation: Option<u64>,
    fence: FenceHandle,
    done: SemaphoreHandle,
    state: SkinningState,
    last_dispatches: u32,
}

impl SkinningCompute {
    pub fn new<B: GraphicsBackend + ?Sized>(backend: &mut B) -> RendererResult<Self> {
        let storage = |binding, read_only| {
            BindGroupLayoutEntry::new(
                binding,
                ShaderStageFlags::COMPUTE,
                BindingType::StorageBuffer { read_only },
            )
        };
        let layout = backend.create_bind_group_layout(&[
            storage(0, true),
            storage(1, true),
            storage(2, false),
            storage(3, true),
        ])?;

        let pipeline = backend.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("skinning".into()),
            shader: SKINNING_SHADER.to_string(),
            entry_point: "main".into(),
            bind_group_layouts: vec![layout],
            push_constant_ranges: vec![PushConstantRange {
                stages: ShaderStageFlags::COMPUTE,
                size: SkinningParams::SIZE,
            }],
        })?;

        Ok(Self {
            pipeline,
            layout,
            bind_group: None,
            bound_generation: None,
            fence: backend.create_fence(true),
            done: backend.create_semaphore(),
            state: SkinningState::Idle,
            last_dispatches: 0,
        })
    }

    pub fn state(&self) -> SkinningState {
        self.state
    }

    /// Semaphore signaled by every skinning submission
    pub fn done_semaphore(&self) -> SemaphoreHandle {
        self.done
    }

    /// Dispatches recorded by the last `record_frame`
    pub fn last_dispatches(&self) -> u32 {
        self.last_dispatches
    }

    /// Rebind the four storage buffers after the arena recreated its animated buffers
    pub fn on_resources_rebuilt<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        arena: &ResourceArena,
    ) -> RendererResult<()> {
        if self.bound_generation == Some(arena.animated_generation()) {
            return Ok(());
        }
        if let Some(bind_group) = self.bind_group.take() {
            backend.destroy_bind_group(bind_group);
        }

        if let Some(skinned) = arena.skinned_vertex_buffer() {
            let whole = |buffer| BindGroupEntry::Buffer {
                buffer,
                offset: 0,
                size: None,
            };
            self.bind_group = Some(backend.create_bind_group(
                self.layout,
                &[
                    (0, whole(arena.vertex_buffer())),
                    (1, whole(arena.weight_buffer())),
                    (2, whole(skinned)),
                    (3, whole(arena.joint_matrix_buffer())),
                ],
            )?);
        }
        log::debug!(
            "skinning bindings rebuilt for animated generation {}",
            arena.animated_generation()
        );
        self.bound_generation = Some(arena.animated_generation());
        Ok(())
    }

    /// Skin every playing entity mesh into the skinned vertex buffer and submit.
    ///
    /// The submission signals [`Self::done_semaphore`]; the geometry submission of the
    /// same frame has to wait on it.
    pub fn record_frame<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        arena: &ResourceArena,
        scene: &Scene,
    ) -> RendererResult<()> {
        backend.wait_for_fence(self.fence)?;
        backend.reset_fence(self.fence);
        self.state = SkinningState::Recording;

        backend.begin_commands("skinning");
        backend.pipeline_barrier(MemoryBarrier::VertexReadToComputeWrite);

        let mut dispatches = 0;
        if let Some(bind_group) = self.bind_group {
            backend.begin_compute_pass(Some("skinning"));
            backend.set_compute_pipeline(self.pipeline);
            backend.set_bind_group(0, bind_group);

            for target in &arena.draw_set().skinning_targets {
                let Some(params) = skinning_params(arena, scene, target) else {
                    continue;
                };
                let groups = target.mesh.vertex_count().div_ceil(LOCAL_SIZE_X);
                backend.set_push_constants(ShaderStageFlags::COMPUTE, 0, bytemuck::bytes_of(&params));
                backend.dispatch_compute(groups, 1, 1);
                dispatches += 1;
            }
            backend.end_compute_pass();
        }

        backend.pipeline_barrier(MemoryBarrier::ComputeWriteToVertexRead);
        backend.submit(&SubmitInfo {
            signal_semaphores: &[self.done],
            fence: Some(self.fence),
            ..Default::default()
        })?;

        log::trace!("skinning submitted with {} dispatches", dispatches);
        self.last_dispatches = dispatches;
        self.state = SkinningState::Submitted;
        Ok(())
    }

    /// Block until the last submission finished
    pub fn wait<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) -> RendererResult<()> {
        if self.state == SkinningState::Submitted {
            backend.wait_for_fence(self.fence)?;
        }
        self.state = SkinningState::Idle;
        Ok(())
    }
}

/// Push constants for one entity mesh, `None` when it should not be skinned this frame
fn skinning_params(
    arena: &ResourceArena,
    scene: &Scene,
    target: &crate::arena::SkinningTarget,
) -> Option<SkinningParams> {
    let model = arena.models().get(target.model)?;
    let animation = scene
        .entities_by_model(&model.id)
        .get(target.entity)?
        .animation()?;
    if !animation.started {
        return None;
    }

    let Some(joint_offset) = model.joint_offset(animation.animation_index, animation.current_frame)
    else {
        log::warn!(
            "{}: animation {} frame {} doesn't exist, skipping skinning",
            model.id,
            animation.animation_index,
            animation.current_frame
        );
        return None;
    };

    Some(SkinningParams {
        src_offset: (target.mesh.vertices_offset / FLOAT_SIZE) as u32,
        src_size: (target.mesh.vertices_size / FLOAT_SIZE) as u32,
        weights_offset: (target.mesh.weights_offset / FLOAT_SIZE) as u32,
        joint_offset: (joint_offset / MATRIX_SIZE) as u32,
        dst_offset: (target.dst_offset / FLOAT_SIZE) as u32,
    })
}

/// Skinning kernel; vertices and weights are read as raw floats
pub const SKINNING_SHADER: &str = r#"
struct SkinningParams {
    src_offset: u32,
    src_size: u32,
    weights_offset: u32,
    joint_offset: u32,
    dst_offset: u32,
}

@group(0) @binding(0) var<storage, read> src_vertices: array<f32>;
@group(0) @binding(1) var<storage, read> weights: array<f32>;
@group(0) @binding(2) var<storage, read_write> dst_vertices: array<f32>;
@group(0) @binding(3) var<storage, read> joint_matrices: array<mat4x4<f32>>;

var<push_constant> params: SkinningParams;

const VERTEX_FLOATS: u32 = 14u;
const WEIGHT_FLOATS: u32 = 8u;

fn load_vec3(base: u32) -> vec3<f32> {
    return vec3<f32>(src_vertices[base], src_vertices[base + 1u], src_vertices[base + 2u]);
}

fn store_vec3(base: u32, value: vec3<f32>) {
    dst_vertices[base] = value.x;
    dst_vertices[base + 1u] = value.y;
    dst_vertices[base + 2u] = value.z;
}

fn skin_direction(skin: mat4x4<f32>, direction: vec3<f32>) -> vec3<f32> {
    let skinned = (skin * vec4<f32>(direction, 0.0)).xyz;
    let len = length(skinned);
    return select(vec3<f32>(0.0), skinned / len, len > 0.0);
}

@compute @workgroup_size(32)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let local = id.x * VERTEX_FLOATS;
    if (local >= params.src_size) {
        return;
    }
    let src = params.src_offset + local;
    let dst = params.dst_offset + local;
    let w = params.weights_offset + id.x * WEIGHT_FLOATS;

    var skin = mat4x4<f32>(vec4<f32>(0.0), vec4<f32>(0.0), vec4<f32>(0.0), vec4<f32>(0.0));
    for (var i = 0u; i < 4u; i = i + 1u) {
        let weight = weights[w + i];
        let joint = u32(weights[w + 4u + i]);
        skin = skin + joint_matrices[params.joint_offset + joint] * weight;
    }

    let position = skin * vec4<f32>(load_vec3(src), 1.0);
    store_vec3(dst, position.xyz);
    store_vec3(dst + 3u, skin_direction(skin, load_vec3(src + 3u)));
    store_vec3(dst + 6u, skin_direction(skin, load_vec3(src + 6u)));
    store_vec3(dst + 9u, skin_direction(skin, load_vec3(src + 9u)));
    dst_vertices[dst + 12u] = src_vertices[src + 12u];
    dst_vertices[dst + 13u] = src_vertices[src + 13u];
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessBackend, RecordedCommand};
    use crate::config::RendererConfig;
    use crate::resources::{AnimationFrame, MeshData, Model, PrecomputedAnimation, SkinWeight, TextureCache};
    use crate::scene::{AnimationState, Entity};

    fn rig() -> Model {
        let mesh = MeshData::cube();
        let weights = vec![SkinWeight::single(0); mesh.vertex_count()];
        Model::new("rig")
            .with_mesh(MeshData::plane(1.0, 1.0, 1).with_weights(vec![SkinWeight::single(0); 4]))
            .with_mesh(mesh.with_weights(weights))
            .with_animation(PrecomputedAnimation::new(
                "idle",
                1.0,
                vec![AnimationFrame::identity(), AnimationFrame::identity()],
            ))
    }

    fn setup(scene: &Scene) -> (HeadlessBackend, ResourceArena, SkinningCompute) {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut arena = ResourceArena::new(&mut backend, &RendererConfig::default()).unwrap();
        arena
            .load_models(&mut backend, &mut TextureCache::new(), &[rig()], None)
            .unwrap();
        arena.load_entities(&mut backend, scene).unwrap();
        let mut skinning = SkinningCompute::new(&mut backend).unwrap();
        skinning.on_resources_rebuilt(&mut backend, &arena).unwrap();
        (backend, arena, skinning)
    }

    #[test]
    fn test_params_use_float_and_matrix_units() {
        let mut scene = Scene::default();
        scene.add_entity(Entity::new("a", "rig").with_animation(AnimationState::new(0)));
        let mut state = AnimationState::new(0);
        state.current_frame = 1;
        scene.add_entity(Entity::new("b", "rig").with_animation(state));
        let (mut backend, arena, mut skinning) = setup(&scene);

        skinning.record_frame(&mut backend, &arena, &scene).unwrap();
        assert_eq!(skinning.state(), SkinningState::Submitted);

        let submission = backend.submissions().last().unwrap();
        let params: Vec<SkinningParams> = submission
            .commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::SetPushConstants { data, .. } => Some(bytemuck::pod_read_unaligned(data)),
                _ => None,
            })
            .collect();
        assert_eq!(params.len(), 4);

        // plane: 4 vertices, cube: 24 vertices
        assert_eq!(params[0].src_size, 4 * 14);
        assert_eq!(params[1].src_offset, 4 * 14);
        assert_eq!(params[1].weights_offset, 4 * 8);
        assert_eq!(params[2].dst_offset, 28 * 14);
        assert_eq!(params[0].joint_offset, 0);
        assert_eq!(params[2].joint_offset, 150);

        let dispatches: Vec<u32> = submission
            .commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::Dispatch { x, .. } => Some(*x),
                _ => None,
            })
            .collect();
        assert_eq!(dispatches, vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_barriers_wrap_the_dispatches() {
        let mut scene = Scene::default();
        scene.add_entity(Entity::new("a", "rig").with_animation(AnimationState::new(0)));
        let (mut backend, arena, mut skinning) = setup(&scene);

        skinning.record_frame(&mut backend, &arena, &scene).unwrap();
        let submission = backend.submissions().last().unwrap();
        assert_eq!(
            submission.commands.first(),
            Some(&RecordedCommand::Barrier(MemoryBarrier::VertexReadToComputeWrite))
        );
        assert_eq!(
            submission.commands.last(),
            Some(&RecordedCommand::Barrier(MemoryBarrier::ComputeWriteToVertexRead))
        );
        assert_eq!(submission.signal_semaphores, vec![skinning.done_semaphore()]);
    }

    #[test]
    fn test_stopped_and_invalid_animations_are_skipped() {
        let mut scene = Scene::default();
        let mut stopped = AnimationState::new(0);
        stopped.stop();
        let mut past_end = AnimationState::new(0);
        past_end.current_frame = 9;
        scene.add_entity(Entity::new("a", "rig").with_animation(stopped));
        scene.add_entity(Entity::new("b", "rig").with_animation(past_end));
        scene.add_entity(Entity::new("c", "rig").with_animation(AnimationState::new(3)));
        let (mut backend, arena, mut skinning) = setup(&scene);

        skinning.record_frame(&mut backend, &arena, &scene).unwrap();
        assert_eq!(skinning.last_dispatches(), 0);
    }

    #[test]
    fn test_rebind_only_on_new_generation() {
        let mut scene = Scene::default();
        scene.add_entity(Entity::new("a", "rig").with_animation(AnimationState::new(0)));
        let (mut backend, mut arena, mut skinning) = setup(&scene);
        let first = skinning.bind_group;
        assert!(first.is_some());

        skinning.on_resources_rebuilt(&mut backend, &arena).unwrap();
        assert_eq!(skinning.bind_group, first);

        scene.add_entity(Entity::new("b", "rig").with_animation(AnimationState::new(0)));
        arena.load_entities(&mut backend, &scene).unwrap();
        skinning.on_resources_rebuilt(&mut backend, &arena).unwrap();
        assert_ne!(skinning.bind_group, first);
    }
}
