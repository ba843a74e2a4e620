//! Indirect draw commands built from the scene's entities
//!
//! Two batches come out of every rebuild. Static entities share their model's bind-pose
//! vertices and are instanced per mesh. Animated entities each get their own copy of the
//! mesh in the skinned vertex buffer, so they are drawn one command per entity and mesh.

use super::{ArenaMesh, ArenaModel, ResourceArena};
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::scene::Scene;

/// Where one instance record gets its transform and material from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceSource {
    /// Index into the arena's model list
    pub model: usize,
    /// Index into the scene's entity list for that model
    pub entity: usize,
    pub material_index: u32,
}

/// One animated entity mesh the skinning stage has to write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkinningTarget {
    pub model: usize,
    pub entity: usize,
    pub mesh: ArenaMesh,
    /// Byte offset of this copy in the skinned vertex buffer
    pub dst_offset: u64,
}

/// CPU side of the indirect draw buffers.
///
/// Instance sources line up with the commands that consume them: command `i` reads
/// `instance_count` records starting at its `first_instance`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndirectDrawSet {
    pub static_commands: Vec<DrawIndexedIndirect>,
    pub static_instances: Vec<InstanceSource>,
    pub animated_commands: Vec<DrawIndexedIndirect>,
    pub animated_instances: Vec<InstanceSource>,
    pub skinning_targets: Vec<SkinningTarget>,
    /// Bytes the skinned vertex buffer needs
    pub skinned_size: u64,
}

impl IndirectDrawSet {
    pub fn build(models: &[ArenaModel], scene: &Scene) -> Self {
        let mut set = Self::default();

        for (model_index, model) in models.iter().enumerate() {
            let entities = scene.entities_by_model(&model.id);
            if entities.is_empty() {
                continue;
            }

            let (animated, still): (Vec<usize>, Vec<usize>) = (0..entities.len())
                .partition(|&i| model.has_animations() && entities[i].animation().is_some());

            if !still.is_empty() {
                for mesh in &model.meshes {
                    set.static_commands.push(DrawIndexedIndirect {
                        index_count: mesh.index_count,
                        instance_count: still.len() as u32,
                        first_index: mesh.first_index(),
                        base_vertex: mesh.base_vertex(),
                        first_instance: set.static_instances.len() as u32,
                    });
                    set.static_instances
                        .extend(still.iter().map(|&entity| InstanceSource {
                            model: model_index,
                            entity,
                            material_index: mesh.material_index,
                        }));
                }
            }

            for &entity in &animated {
                for mesh in &model.meshes {
                    let dst_offset = set.skinned_size;
                    set.animated_commands.push(DrawIndexedIndirect {
                        index_count: mesh.index_count,
                        instance_count: 1,
                        first_index: mesh.first_index(),
                        base_vertex: (dst_offset / Vertex::SIZE) as i32,
                        first_instance: set.animated_instances.len() as u32,
                    });
                    set.animated_instances.push(InstanceSource {
                        model: model_index,
                        entity,
                        material_index: mesh.material_index,
                    });
                    set.skinning_targets.push(SkinningTarget {
                        model: model_index,
                        entity,
                        mesh: *mesh,
                        dst_offset,
                    });
                    set.skinned_size += mesh.vertices_size;
                }
            }
        }

        set
    }

    /// Sum of `instance_count` over the static commands
    pub fn static_instance_count(&self) -> u32 {
        self.static_commands.iter().map(|c| c.instance_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.static_commands.is_empty() && self.animated_commands.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BatchDraw {
    vertex_buffer: BufferHandle,
    instance_buffer: BufferHandle,
    indirect_buffer: BufferHandle,
    count: u32,
}

/// Buffer bindings and indirect draws of one frame slot, shared by the geometry and the
/// shadow passes.
///
/// Rebuilt lazily: a slot only picks up new arena buffers the first time it renders after
/// an entity rebuild or a swapchain change.
#[derive(Debug, Default)]
pub struct DrawBatch {
    generation: Option<u64>,
    index_buffer: Option<BufferHandle>,
    draws: Vec<BatchDraw>,
}

impl DrawBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_current(&self, arena: &ResourceArena) -> bool {
        self.generation == Some(arena.entities_generation())
    }

    /// Force a rebuild on next use
    pub fn invalidate(&mut self) {
        self.generation = None;
    }

    pub fn rebuild(&mut self, arena: &ResourceArena, slot: usize) {
        log::debug!("rebuilding draw batch for frame slot {}", slot);
        self.draws.clear();
        self.index_buffer = Some(arena.index_buffer());

        let draw_set = arena.draw_set();
        let instances = arena.instance_buffers(slot);

        if let (Some(indirect_buffer), Some(instance_buffer)) =
            (arena.static_indirect_buffer(), instances.and_then(|i| i.static_buffer))
        {
            self.draws.push(BatchDraw {
                vertex_buffer: arena.vertex_buffer(),
                instance_buffer,
                indirect_buffer,
                count: draw_set.static_commands.len() as u32,
            });
        }

        if let (Some(indirect_buffer), Some(instance_buffer), Some(vertex_buffer)) = (
            arena.animated_indirect_buffer(),
            instances.and_then(|i| i.animated_buffer),
            arena.skinned_vertex_buffer(),
        ) {
            self.draws.push(BatchDraw {
                vertex_buffer,
                instance_buffer,
                indirect_buffer,
                count: draw_set.animated_commands.len() as u32,
            });
        }

        self.generation = Some(arena.entities_generation());
    }

    /// Indirect commands issued per `record`
    pub fn command_count(&self) -> u32 {
        self.draws.iter().map(|d| d.count).sum()
    }

    /// Bind both batches and issue their indirect draws into the open render pass
    pub fn record<B: GraphicsBackend + ?Sized>(&self, backend: &mut B) {
        let Some(index_buffer) = self.index_buffer else {
            return;
        };
        backend.set_index_buffer(index_buffer, 0, IndexFormat::Uint32);
        for draw in &self.draws {
            backend.set_vertex_buffer(0, draw.vertex_buffer, 0);
            backend.set_vertex_buffer(1, draw.instance_buffer, 0);
            backend.draw_indexed_indirect(draw.indirect_buffer, 0, draw.count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{AnimationState, Entity};
    use glam::Vec3;

    fn mesh(vertices: u64, indices: u32, vertices_offset: u64, indices_offset: u64) -> ArenaMesh {
        ArenaMesh {
            vertices_offset,
            vertices_size: vertices * Vertex::SIZE,
            indices_offset,
            index_count: indices,
            weights_offset: 0,
            material_index: 0,
        }
    }

    #[test]
    fn test_static_instances_follow_command_order() {
        let models = vec![
            ArenaModel::new("a", vec![mesh(4, 6, 0, 0), mesh(4, 6, 4 * Vertex::SIZE, 24)]),
            ArenaModel::new("b", vec![mesh(3, 3, 8 * Vertex::SIZE, 48)]),
        ];
        let mut scene = Scene::default();
        scene.add_entity(Entity::new("b0", "b"));
        scene.add_entity(Entity::new("a0", "a"));
        scene.add_entity(Entity::new("a1", "a").with_position(Vec3::X));

        let set = IndirectDrawSet::build(&models, &scene);
        assert_eq!(set.static_commands.len(), 3);
        assert_eq!(set.static_instance_count(), 5);
        assert_eq!(set.static_commands[1].base_vertex, 4);
        assert_eq!(set.static_commands[1].first_index, 6);
        assert_eq!(set.static_commands[2].first_instance, 4);
        assert_eq!(set.static_instances[4].model, 1);

        for command in &set.static_commands {
            let first = command.first_instance as usize;
            let sources = &set.static_instances[first..first + command.instance_count as usize];
            assert!(sources.windows(2).all(|w| w[0].model == w[1].model));
        }
    }

    #[test]
    fn test_animation_state_without_clips_is_static() {
        let models = vec![ArenaModel::new("prop", vec![mesh(4, 6, 0, 0)])];
        let mut scene = Scene::default();
        scene.add_entity(Entity::new("p", "prop").with_animation(AnimationState::new(0)));

        let set = IndirectDrawSet::build(&models, &scene);
        assert_eq!(set.static_instance_count(), 1);
        assert!(set.animated_commands.is_empty());
        assert_eq!(set.skinned_size, 0);
    }

    #[test]
    fn test_animated_instances_pack_per_entity_then_mesh() {
        let mut rig = ArenaModel::new("rig", vec![mesh(10, 12, 0, 0), mesh(5, 6, 10 * Vertex::SIZE, 48)]);
        rig.animations.push(super::super::ArenaAnimation {
            name: "walk".into(),
            frame_offsets: vec![0],
        });
        let mut scene = Scene::default();
        scene.add_entity(Entity::new("r0", "rig").with_animation(AnimationState::new(0)));
        scene.add_entity(Entity::new("r1", "rig").with_animation(AnimationState::new(0)));

        let set = IndirectDrawSet::build(&[rig], &scene);
        let entities: Vec<usize> = set.animated_instances.iter().map(|s| s.entity).collect();
        assert_eq!(entities, vec![0, 0, 1, 1]);

        let offsets: Vec<u64> = set.skinning_targets.iter().map(|t| t.dst_offset).collect();
        assert_eq!(offsets, vec![0, 10 * Vertex::SIZE, 15 * Vertex::SIZE, 25 * Vertex::SIZE]);
        assert_eq!(set.animated_commands[2].base_vertex, 15);
        assert_eq!(set.skinned_size, 30 * Vertex::SIZE);
    }
}
