//! GPU resource arena
//!
//! All mesh, material and animation data lives in five fixed-capacity device buffers
//! created at startup. Models are appended through staging buffers and addressed by the
//! byte offsets recorded at load time. The arena also owns the buffers that change with
//! the entity set: indirect commands, per-slot instance records and the skinned vertex
//! output.

mod draw_batch;
mod region;

pub use draw_batch::*;
pub use region::*;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::config::RendererConfig;
use crate::error::RendererResult;
use crate::resources::{GpuMaterial, MaterialData, Model, TextureCache, TexturePlan, JOINT_FRAME_SIZE};
use crate::scene::Scene;

/// Offsets of one mesh inside the arena buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaMesh {
    pub vertices_offset: u64,
    pub vertices_size: u64,
    pub indices_offset: u64,
    pub index_count: u32,
    /// Only meaningful for meshes of animated models
    pub weights_offset: u64,
    /// Global material index; 0 is the default material
    pub material_index: u32,
}

impl ArenaMesh {
    pub fn vertex_count(&self) -> u32 {
        (self.vertices_size / Vertex::SIZE) as u32
    }

    pub fn base_vertex(&self) -> i32 {
        (self.vertices_offset / Vertex::SIZE) as i32
    }

    pub fn first_index(&self) -> u32 {
        (self.indices_offset / std::mem::size_of::<u32>() as u64) as u32
    }
}

/// Joint-matrix buffer offsets of every frame of one animation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArenaAnimation {
    pub name: String,
    pub frame_offsets: Vec<u64>,
}

/// A loaded model as the arena sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArenaModel {
    pub id: String,
    pub meshes: Vec<ArenaMesh>,
    pub animations: Vec<ArenaAnimation>,
}

impl ArenaModel {
    pub fn new(id: impl Into<String>, meshes: Vec<ArenaMesh>) -> Self {
        Self {
            id: id.into(),
            meshes,
            animations: Vec::new(),
        }
    }

    pub fn has_animations(&self) -> bool {
        !self.animations.is_empty()
    }

    /// Byte offset of a frame's joint matrices
    pub fn joint_offset(&self, animation: usize, frame: usize) -> Option<u64> {
        self.animations
            .get(animation)?
            .frame_offsets
            .get(frame)
            .copied()
    }
}

/// Instance record buffers of one frame slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotInstances {
    pub static_buffer: Option<BufferHandle>,
    pub animated_buffer: Option<BufferHandle>,
}

/// Owner of every device buffer the frame pipeline draws from
pub struct ResourceArena {
    vertices: ArenaRegion,
    indices: ArenaRegion,
    materials: ArenaRegion,
    joint_matrices: ArenaRegion,
    weights: ArenaRegion,
    models: Vec<ArenaModel>,

    draw_set: IndirectDrawSet,
    static_indirect: Option<BufferHandle>,
    animated_indirect: Option<BufferHandle>,
    skinned_vertices: Option<BufferHandle>,
    slots: Vec<SlotInstances>,

    transfer_fence: FenceHandle,
    max_textures: usize,
    entities_generation: u64,
    animated_generation: u64,
}

impl ResourceArena {
    /// Create the arena buffers and write the default material
    pub fn new<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        config: &RendererConfig,
    ) -> RendererResult<Self> {
        log::info!(
            "Creating resource arena ({} B vertices, {} B indices, {} materials)",
            config.max_vertices_size,
            config.max_indices_size,
            config.max_materials
        );

        let vertices = ArenaRegion::new(
            backend,
            "vertices",
            config.max_vertices_size,
            BufferUsage::VERTEX | BufferUsage::STORAGE,
        )?;
        let indices = ArenaRegion::new(backend, "indices", config.max_indices_size, BufferUsage::INDEX)?;
        let materials = ArenaRegion::new(
            backend,
            "materials",
            config.max_materials as u64 * GpuMaterial::SIZE,
            BufferUsage::STORAGE,
        )?;
        let joint_matrices = ArenaRegion::new(
            backend,
            "joint matrices",
            config.max_joint_matrices_size,
            BufferUsage::STORAGE,
        )?;
        let weights = ArenaRegion::new(backend, "weights", config.max_weights_size, BufferUsage::STORAGE)?;

        let transfer_fence = backend.create_fence(false);
        let slots = vec![SlotInstances::default(); backend.frames_in_flight() as usize];

        let mut arena = Self {
            vertices,
            indices,
            materials,
            joint_matrices,
            weights,
            models: Vec::new(),
            draw_set: IndirectDrawSet::default(),
            static_indirect: None,
            animated_indirect: None,
            skinned_vertices: None,
            slots,
            transfer_fence,
            max_textures: config.max_textures as usize,
            entities_generation: 0,
            animated_generation: 0,
        };

        let mut plan = arena.materials.plan();
        let default_material = GpuMaterial::new(&MaterialData::default(), None, None, None);
        plan.push(bytemuck::bytes_of(&default_material))?;
        backend.begin_commands("arena default material");
        let staging = arena.materials.stage(backend, plan)?;
        arena.finish_transfer(backend, staging.into_iter().collect())?;

        Ok(arena)
    }

    /// Append models to the arena.
    ///
    /// Every region size and texture index is planned before anything is decoded or
    /// written, so a model set that doesn't fit fails with `CapacityExceeded` and leaves
    /// both the arena and the texture cache as they were. Returns the newly loaded models.
    pub fn load_models<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        textures: &mut TextureCache,
        models: &[Model],
        default_texture: Option<&str>,
    ) -> RendererResult<&[ArenaModel]> {
        for model in models {
            model.validate()?;
        }

        let mut vertices = self.vertices.plan();
        let mut indices = self.indices.plan();
        let mut materials = self.materials.plan();
        let mut joint_matrices = self.joint_matrices.plan();
        let mut weights = self.weights.plan();
        let mut texture_plan = textures.plan(self.max_textures);
        let mut loaded = Vec::with_capacity(models.len());

        for model in models {
            let mut material_indices = Vec::with_capacity(model.materials.len());
            for material in &model.materials {
                let gpu = GpuMaterial::new(
                    material,
                    reserve_texture(&mut texture_plan, &material.diffuse_texture, TextureFormat::Rgba8UnormSrgb)?,
                    reserve_texture(&mut texture_plan, &material.normal_texture, TextureFormat::Rgba8Unorm)?,
                    reserve_texture(&mut texture_plan, &material.metal_rough_texture, TextureFormat::Rgba8Unorm)?,
                );
                let offset = materials.push(bytemuck::bytes_of(&gpu))?;
                material_indices.push((offset / GpuMaterial::SIZE) as u32);
            }

            let mut meshes = Vec::with_capacity(model.meshes.len());
            for (i, mesh) in model.meshes.iter().enumerate() {
                let material_index = match material_indices.get(mesh.material_index) {
                    Some(&index) => index,
                    None => {
                        log::debug!(
                            "{}: mesh {} uses material {} of {}, falling back to the default",
                            model.id,
                            i,
                            mesh.material_index,
                            material_indices.len()
                        );
                        0
                    }
                };

                let vertex_data = mesh.interleave();
                let vertices_offset = vertices.push(bytemuck::cast_slice(&vertex_data))?;
                let indices_offset = indices.push(bytemuck::cast_slice(&mesh.indices))?;
                let weights_offset = if model.has_animations() {
                    weights.push(bytemuck::cast_slice(&mesh.weights))?
                } else {
                    weights.cursor()
                };

                meshes.push(ArenaMesh {
                    vertices_offset,
                    vertices_size: mesh.vertices_size(),
                    indices_offset,
                    index_count: mesh.index_count() as u32,
                    weights_offset,
                    material_index,
                });
            }

            let mut animations = Vec::with_capacity(model.animations.len());
            for animation in &model.animations {
                let mut frame_offsets = Vec::with_capacity(animation.frame_count());
                for frame in &animation.frames {
                    frame_offsets.push(joint_matrices.push(bytemuck::cast_slice(frame.joint_matrices()))?);
                }
                debug_assert_eq!(frame_offsets.len() as u64 * JOINT_FRAME_SIZE, animation.joint_data_size());
                animations.push(ArenaAnimation {
                    name: animation.name.clone(),
                    frame_offsets,
                });
            }

            loaded.push(ArenaModel {
                id: model.id.clone(),
                meshes,
                animations,
            });
        }

        textures.load_planned(backend, texture_plan)?;

        backend.begin_commands("arena model upload");
        let mut staging = Vec::new();
        staging.extend(self.materials.stage(backend, materials)?);
        staging.extend(self.vertices.stage(backend, vertices)?);
        staging.extend(self.indices.stage(backend, indices)?);
        staging.extend(self.joint_matrices.stage(backend, joint_matrices)?);
        staging.extend(self.weights.stage(backend, weights)?);
        self.finish_transfer(backend, staging)?;

        textures.ensure_default(backend, default_texture)?;

        log::debug!(
            "Loaded {} model(s); arena vertices {}/{} B, indices {}/{} B",
            loaded.len(),
            self.vertices.used(),
            self.vertices.capacity(),
            self.indices.used(),
            self.indices.capacity()
        );

        let first = self.models.len();
        self.models.extend(loaded);
        Ok(&self.models[first..])
    }

    /// Rebuild the indirect draw set and every buffer sized by it.
    ///
    /// The caller must make sure the GPU no longer reads the previous buffers.
    pub fn load_entities<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        scene: &Scene,
    ) -> RendererResult<&IndirectDrawSet> {
        let draw_set = IndirectDrawSet::build(&self.models, scene);
        log::debug!(
            "Rebuilding entities: {} static commands ({} instances), {} animated commands",
            draw_set.static_commands.len(),
            draw_set.static_instance_count(),
            draw_set.animated_commands.len()
        );

        for buffer in [self.static_indirect.take(), self.animated_indirect.take()]
            .into_iter()
            .flatten()
        {
            backend.destroy_buffer(buffer);
        }
        self.static_indirect = create_indirect_buffer(backend, "static indirect", &draw_set.static_commands)?;
        self.animated_indirect =
            create_indirect_buffer(backend, "animated indirect", &draw_set.animated_commands)?;

        let had_skinned = self.skinned_vertices.take();
        if let Some(buffer) = had_skinned {
            backend.destroy_buffer(buffer);
        }
        if draw_set.skinned_size > 0 {
            self.skinned_vertices = Some(backend.create_buffer(&BufferDescriptor {
                label: Some("skinned vertices".into()),
                size: draw_set.skinned_size,
                usage: BufferUsage::VERTEX | BufferUsage::STORAGE,
            })?);
        }
        if had_skinned.is_some() || self.skinned_vertices.is_some() {
            self.animated_generation += 1;
        }

        for (i, slot) in self.slots.iter_mut().enumerate() {
            for buffer in [slot.static_buffer.take(), slot.animated_buffer.take()]
                .into_iter()
                .flatten()
            {
                backend.destroy_buffer(buffer);
            }
            slot.static_buffer = create_instance_buffer(
                backend,
                &format!("static instances {}", i),
                draw_set.static_instances.len(),
            )?;
            slot.animated_buffer = create_instance_buffer(
                backend,
                &format!("animated instances {}", i),
                draw_set.animated_instances.len(),
            )?;
        }

        self.draw_set = draw_set;
        self.entities_generation += 1;
        Ok(&self.draw_set)
    }

    /// Rewrite the instance records of one frame slot from the current entity transforms.
    ///
    /// Only instance buffers are touched; the indirect commands stay as built.
    pub fn load_instance_data<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        scene: &Scene,
        slot: usize,
    ) {
        let Some(buffers) = self.slots.get(slot) else {
            log::warn!("no instance buffers for frame slot {}", slot);
            return;
        };

        for (buffer, sources) in [
            (buffers.static_buffer, &self.draw_set.static_instances),
            (buffers.animated_buffer, &self.draw_set.animated_instances),
        ] {
            let Some(buffer) = buffer else {
                continue;
            };
            let records: Vec<InstanceData> = sources
                .iter()
                .map(|source| self.instance_record(scene, source))
                .collect();
            backend.write_buffer(buffer, 0, bytemuck::cast_slice(&records));
        }
    }

    fn instance_record(&self, scene: &Scene, source: &InstanceSource) -> InstanceData {
        let entity = self
            .models
            .get(source.model)
            .and_then(|model| scene.entities_by_model(&model.id).get(source.entity));
        match entity {
            Some(entity) => InstanceData::new(entity.model_matrix(), source.material_index),
            None => {
                log::warn!(
                    "entity {} of model {} vanished without an entity rebuild",
                    source.entity,
                    source.model
                );
                InstanceData::new(glam::Mat4::ZERO, source.material_index)
            }
        }
    }

    fn finish_transfer<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        staging: Vec<BufferHandle>,
    ) -> RendererResult<()> {
        backend.submit(&SubmitInfo {
            fence: Some(self.transfer_fence),
            ..Default::default()
        })?;
        backend.wait_for_fence(self.transfer_fence)?;
        backend.reset_fence(self.transfer_fence);
        for buffer in staging {
            backend.destroy_buffer(buffer);
        }
        Ok(())
    }

    pub fn models(&self) -> &[ArenaModel] {
        &self.models
    }

    pub fn draw_set(&self) -> &IndirectDrawSet {
        &self.draw_set
    }

    pub fn vertex_buffer(&self) -> BufferHandle {
        self.vertices.buffer()
    }

    pub fn index_buffer(&self) -> BufferHandle {
        self.indices.buffer()
    }

    pub fn material_buffer(&self) -> BufferHandle {
        self.materials.buffer()
    }

    pub fn joint_matrix_buffer(&self) -> BufferHandle {
        self.joint_matrices.buffer()
    }

    pub fn weight_buffer(&self) -> BufferHandle {
        self.weights.buffer()
    }

    pub fn skinned_vertex_buffer(&self) -> Option<BufferHandle> {
        self.skinned_vertices
    }

    pub fn static_indirect_buffer(&self) -> Option<BufferHandle> {
        self.static_indirect
    }

    pub fn animated_indirect_buffer(&self) -> Option<BufferHandle> {
        self.animated_indirect
    }

    pub fn instance_buffers(&self, slot: usize) -> Option<&SlotInstances> {
        self.slots.get(slot)
    }

    /// Regions in a fixed order: vertices, indices, materials, joint matrices, weights
    pub fn regions(&self) -> [&ArenaRegion; 5] {
        [
            &self.vertices,
            &self.indices,
            &self.materials,
            &self.joint_matrices,
            &self.weights,
        ]
    }

    /// Changes on every `load_entities`
    pub fn entities_generation(&self) -> u64 {
        self.entities_generation
    }

    /// Changes whenever the skinned vertex buffer is recreated
    pub fn animated_generation(&self) -> u64 {
        self.animated_generation
    }

    pub fn destroy<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) {
        log::info!("Destroying resource arena");
        for region in self.regions() {
            region.destroy(backend);
        }
        let mut owned = vec![
            self.static_indirect.take(),
            self.animated_indirect.take(),
            self.skinned_vertices.take(),
        ];
        for slot in &mut self.slots {
            owned.push(slot.static_buffer.take());
            owned.push(slot.animated_buffer.take());
        }
        for buffer in owned.into_iter().flatten() {
            backend.destroy_buffer(buffer);
        }
    }
}

fn reserve_texture(
    plan: &mut TexturePlan,
    path: &Option<String>,
    format: TextureFormat,
) -> RendererResult<Option<usize>> {
    match path {
        Some(path) => plan.reserve(path, format),
        None => Ok(None),
    }
}

fn create_indirect_buffer<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    label: &str,
    commands: &[DrawIndexedIndirect],
) -> RendererResult<Option<BufferHandle>> {
    if commands.is_empty() {
        return Ok(None);
    }
    let buffer = backend.create_buffer_init(
        &BufferDescriptor {
            label: Some(label.to_string()),
            size: commands.len() as u64 * DrawIndexedIndirect::SIZE,
            usage: BufferUsage::INDIRECT | BufferUsage::COPY_DST,
        },
        bytemuck::cast_slice(commands),
    )?;
    Ok(Some(buffer))
}

fn create_instance_buffer<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    label: &str,
    count: usize,
) -> RendererResult<Option<BufferHandle>> {
    if count == 0 {
        return Ok(None);
    }
    let buffer = backend.create_buffer(&BufferDescriptor {
        label: Some(label.to_string()),
        size: count as u64 * InstanceData::SIZE,
        usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
    })?;
    Ok(Some(buffer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;
    use crate::error::RendererError;
    use crate::resources::{AnimationFrame, MeshData, PrecomputedAnimation, SkinWeight};
    use crate::scene::{AnimationState, Entity};
    use glam::{Mat4, Vec3};

    fn small_config() -> RendererConfig {
        RendererConfig::default().with_capacities(4096, 1024, 8, 64 * 1024, 4096)
    }

    fn arena() -> (HeadlessBackend, ResourceArena, TextureCache) {
        let mut backend = HeadlessBackend::new(64, 64);
        let arena = ResourceArena::new(&mut backend, &small_config()).unwrap();
        (backend, arena, TextureCache::new())
    }

    #[test]
    fn test_default_material_is_written_first() {
        let (backend, arena, _) = arena();
        assert_eq!(arena.regions()[2].used(), GpuMaterial::SIZE);
        let data = backend.buffer_data(arena.material_buffer()).unwrap();
        let material: GpuMaterial = bytemuck::pod_read_unaligned(&data[..GpuMaterial::SIZE as usize]);
        assert_eq!(material, GpuMaterial::default());
    }

    #[test]
    fn test_meshes_get_disjoint_increasing_offsets() {
        let (mut backend, mut arena, mut textures) = arena();
        let first = Model::new("first").with_mesh(MeshData::cube()).with_mesh(MeshData::cube());
        let second = Model::new("second").with_mesh(MeshData::plane(1.0, 1.0, 2));

        arena
            .load_models(&mut backend, &mut textures, &[first], None)
            .unwrap();
        arena
            .load_models(&mut backend, &mut textures, &[second], None)
            .unwrap();

        let meshes: Vec<ArenaMesh> = arena.models().iter().flat_map(|m| m.meshes.clone()).collect();
        for pair in meshes.windows(2) {
            assert_eq!(pair[0].vertices_offset + pair[0].vertices_size, pair[1].vertices_offset);
            assert!(pair[0].indices_offset < pair[1].indices_offset);
        }
        let last = meshes.last().unwrap();
        assert_eq!(arena.regions()[0].used(), last.vertices_offset + last.vertices_size);
        assert!(arena.regions()[0].used() <= arena.regions()[0].capacity());
        assert!(backend.validation_errors().is_empty());
        assert_eq!(textures.len(), 1);
    }

    #[test]
    fn test_overflow_is_rejected_before_any_write() {
        let (mut backend, mut arena, mut textures) = arena();
        let big = Model::new("big").with_mesh(MeshData::plane(1.0, 1.0, 16));
        let before = backend.submissions().len();

        let result = arena.load_models(&mut backend, &mut textures, &[big], None);
        assert!(matches!(
            result,
            Err(RendererError::CapacityExceeded { region: "vertices", .. })
        ));
        assert_eq!(arena.regions()[0].used(), 0);
        assert_eq!(arena.regions()[1].used(), 0);
        assert!(arena.models().is_empty());
        assert_eq!(backend.submissions().len(), before);
    }

    #[test]
    fn test_texture_overflow_is_rejected_before_any_upload() {
        let mut backend = HeadlessBackend::new(64, 64);
        let config = small_config().with_max_textures(2);
        let mut arena = ResourceArena::new(&mut backend, &config).unwrap();
        let mut textures = TextureCache::new();
        textures.ensure_default(&mut backend, None).unwrap();
        let live = backend.live_texture_count();

        // Three distinct files next to the default texture; none of them exist, so
        // reaching the decoder would fail with a texture error instead
        let model = Model::new("textured")
            .with_mesh(MeshData::cube())
            .with_material(MaterialData::default().with_diffuse_texture("a.png"))
            .with_material(MaterialData::default().with_diffuse_texture("b.png"))
            .with_material(MaterialData::default().with_normal_texture("c.png"));

        let result = arena.load_models(&mut backend, &mut textures, &[model], None);
        assert!(matches!(
            result,
            Err(RendererError::CapacityExceeded {
                region: "textures",
                available: 2,
                ..
            })
        ));
        assert_eq!(textures.len(), 1);
        assert_eq!(backend.live_texture_count(), live);
        assert_eq!(arena.regions()[2].used(), GpuMaterial::SIZE);
        assert!(arena.models().is_empty());
    }

    #[test]
    fn test_unknown_material_falls_back_to_default() {
        let (mut backend, mut arena, mut textures) = arena();
        let model = Model::new("m")
            .with_material(MaterialData::default().with_roughness(0.5))
            .with_mesh(MeshData::cube().with_material(0))
            .with_mesh(MeshData::cube().with_material(7));

        let loaded = arena
            .load_models(&mut backend, &mut textures, &[model], None)
            .unwrap();
        assert_eq!(loaded[0].meshes[0].material_index, 1);
        assert_eq!(loaded[0].meshes[1].material_index, 0);
    }

    #[test]
    fn test_animation_frames_are_uploaded_in_order() {
        let (mut backend, mut arena, mut textures) = arena();
        let moved = Mat4::from_translation(Vec3::Y);
        let mesh = MeshData::cube();
        let weights = vec![SkinWeight::single(0); mesh.vertex_count()];
        let model = Model::new("rig").with_mesh(mesh.with_weights(weights)).with_animation(
            PrecomputedAnimation::new(
                "bob",
                1.0,
                vec![AnimationFrame::identity(), AnimationFrame::from_targeted(&[(0, moved)])],
            ),
        );

        let loaded = arena
            .load_models(&mut backend, &mut textures, &[model], None)
            .unwrap();
        let second = loaded[0].joint_offset(0, 1).unwrap();
        assert_eq!(second, JOINT_FRAME_SIZE);
        assert!(loaded[0].joint_offset(0, 2).is_none());

        let data = backend.buffer_data(arena.joint_matrix_buffer()).unwrap();
        let start = second as usize;
        let matrix: Mat4 = bytemuck::pod_read_unaligned(&data[start..start + 64]);
        assert_eq!(matrix, moved);
    }

    #[test]
    fn test_instance_rewrite_leaves_indirect_commands_alone() {
        let (mut backend, mut arena, mut textures) = arena();
        arena
            .load_models(&mut backend, &mut textures, &[Model::new("box").with_mesh(MeshData::cube())], None)
            .unwrap();
        let mut scene = Scene::default();
        scene.add_entity(Entity::new("a", "box"));
        scene.add_entity(Entity::new("b", "box").with_position(Vec3::X));
        arena.load_entities(&mut backend, &scene).unwrap();

        let indirect = arena.static_indirect_buffer().unwrap();
        let commands_before = backend.buffer_data(indirect).unwrap().to_vec();

        scene.entity_mut("box", "b").unwrap().transform.translate(Vec3::Z);
        arena.load_instance_data(&mut backend, &scene, 1);

        assert_eq!(backend.buffer_data(indirect).unwrap(), commands_before.as_slice());
        let instances = arena.instance_buffers(1).unwrap().static_buffer.unwrap();
        let records: Vec<InstanceData> = backend
            .buffer_data(instances)
            .unwrap()
            .chunks_exact(InstanceData::SIZE as usize)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[1],
            InstanceData::new(Mat4::from_translation(Vec3::new(1.0, 0.0, 1.0)), 0)
        );
    }

    #[test]
    fn test_skinned_buffer_recreation_bumps_generation() {
        let (mut backend, mut arena, mut textures) = arena();
        let mesh = MeshData::cube();
        let weights = vec![SkinWeight::single(0); mesh.vertex_count()];
        let model = Model::new("rig")
            .with_mesh(mesh.with_weights(weights))
            .with_animation(PrecomputedAnimation::new("idle", 1.0, vec![AnimationFrame::identity()]));
        arena
            .load_models(&mut backend, &mut textures, &[model], None)
            .unwrap();

        let mut scene = Scene::default();
        scene.add_entity(Entity::new("static", "rig"));
        arena.load_entities(&mut backend, &scene).unwrap();
        assert_eq!(arena.animated_generation(), 0);
        assert!(arena.skinned_vertex_buffer().is_none());

        scene.add_entity(Entity::new("dancer", "rig").with_animation(AnimationState::new(0)));
        arena.load_entities(&mut backend, &scene).unwrap();
        assert_eq!(arena.animated_generation(), 1);
        let skinned = arena.skinned_vertex_buffer().unwrap();
        assert_eq!(
            backend.buffer_descriptor(skinned).unwrap().size,
            24 * Vertex::SIZE
        );
    }
}
