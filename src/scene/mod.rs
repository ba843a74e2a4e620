//! Scene management
//!
//! The scene is owned by the host application. The renderer only reads it, apart from
//! clearing the change flags once a frame has consumed them.

mod camera;
mod light;
mod transform;

pub use camera::*;
pub use light::*;
pub use transform::*;

use crate::config::RendererConfig;
use crate::error::{RendererError, RendererResult};
use glam::{Mat4, Vec3, Vec4};
use std::collections::HashMap;

/// Playback position of an entity's skeletal animation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationState {
    pub animation_index: usize,
    pub current_frame: usize,
    pub started: bool,
}

impl AnimationState {
    /// Playing state at the first frame of `animation_index`
    pub fn new(animation_index: usize) -> Self {
        Self {
            animation_index,
            current_frame: 0,
            started: true,
        }
    }

    /// Move a started animation forward one frame, wrapping at `frame_count`
    pub fn advance(&mut self, frame_count: usize) {
        if !self.started || frame_count == 0 {
            return;
        }
        self.current_frame = (self.current_frame + 1) % frame_count;
    }

    pub fn start(&mut self) {
        self.started = true;
    }

    pub fn stop(&mut self) {
        self.started = false;
    }
}

/// A renderable instance of a model
#[derive(Debug, Clone, PartialEq)]
///
/// The id, model and presence of an animation decide which draw batch the entity lands
/// in, so they can only change through [`Scene`].
pub struct Entity {
    id: String,
    model_id: String,
    pub transform: Transform,
    animation: Option<AnimationState>,
}

impl Entity {
    pub fn new(id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model_id: model_id.into(),
            transform: Transform::default(),
            animation: None,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.transform.position = position;
        self
    }

    pub fn with_animation(mut self, animation: AnimationState) -> Self {
        self.animation = Some(animation);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn animation(&self) -> Option<AnimationState> {
        self.animation
    }

    /// Playback control of an existing animation
    pub fn animation_mut(&mut self) -> Option<&mut AnimationState> {
        self.animation.as_mut()
    }

    pub fn model_matrix(&self) -> Mat4 {
        self.transform.matrix()
    }
}

/// The scene containing all renderable content
pub struct Scene {
    camera: Camera,
    lights: Vec<Light>,
    ambient_light: Vec4,
    entities: HashMap<String, Vec<Entity>>,
    max_lights: usize,
    entities_generation: u64,
    light_changed: bool,
    camera_moved: bool,
}

impl Scene {
    pub fn new(config: &RendererConfig) -> Self {
        let projection = Projection::perspective(config.fov, 16.0 / 9.0, config.z_near, config.z_far);
        Self {
            camera: Camera {
                projection,
                ..Default::default()
            },
            lights: Vec::new(),
            ambient_light: Vec4::new(0.3, 0.3, 0.3, 1.0),
            entities: HashMap::new(),
            max_lights: config.max_lights as usize,
            entities_generation: 0,
            light_changed: true,
            camera_moved: true,
        }
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Mutable camera access; flags the camera as moved
    pub fn camera_mut(&mut self) -> &mut Camera {
        self.camera_moved = true;
        &mut self.camera
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    /// Replace every light.
    ///
    /// More than `max_lights` lights is rejected and the current lights are kept.
    pub fn set_lights(&mut self, lights: Vec<Light>) -> RendererResult<()> {
        if lights.len() > self.max_lights {
            return Err(RendererError::TooManyLights {
                count: lights.len(),
                max: self.max_lights,
            });
        }
        self.lights = lights;
        self.light_changed = true;
        Ok(())
    }

    pub fn ambient_light(&self) -> Vec4 {
        self.ambient_light
    }

    pub fn set_ambient_light(&mut self, ambient: Vec4) {
        self.ambient_light = ambient;
        self.light_changed = true;
    }

    /// First directional light, which casts the cascaded shadows
    pub fn shadow_light(&self) -> Option<&Light> {
        self.lights.iter().find(|l| l.is_directional())
    }

    pub fn add_entity(&mut self, entity: Entity) {
        self.entities
            .entry(entity.model_id.clone())
            .or_default()
            .push(entity);
        self.entities_generation += 1;
    }

    pub fn remove_entity(&mut self, model_id: &str, entity_id: &str) -> Option<Entity> {
        let entities = self.entities.get_mut(model_id)?;
        let position = entities.iter().position(|e| e.id == entity_id)?;
        let removed = entities.remove(position);
        if entities.is_empty() {
            self.entities.remove(model_id);
        }
        self.entities_generation += 1;
        Some(removed)
    }

    pub fn clear_entities(&mut self) {
        self.entities.clear();
        self.entities_generation += 1;
    }

    /// Entities of one model in insertion order
    pub fn entities_by_model(&self, model_id: &str) -> &[Entity] {
        self.entities.get(model_id).map_or(&[], |e| e.as_slice())
    }

    /// Mutable entity access for transforms and animation playback.
    ///
    /// Nothing reachable from here moves the entity between draw batches, so no draw
    /// commands are rebuilt.
    pub fn entity_mut(&mut self, model_id: &str, entity_id: &str) -> Option<&mut Entity> {
        self.entities
            .get_mut(model_id)?
            .iter_mut()
            .find(|e| e.id == entity_id)
    }

    pub fn entities_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut().flatten()
    }

    /// Attach or replace an entity's animation.
    ///
    /// An entity that had none moves to the animated batch, which rebuilds the draw
    /// commands. Returns false when the entity doesn't exist.
    pub fn set_animation(&mut self, model_id: &str, entity_id: &str, animation: AnimationState) -> bool {
        let Some(entity) = self.entity_mut(model_id, entity_id) else {
            return false;
        };
        let added = entity.animation.replace(animation).is_none();
        if added {
            self.entities_generation += 1;
        }
        true
    }

    /// Detach an entity's animation, moving it back to the static batch
    pub fn clear_animation(&mut self, model_id: &str, entity_id: &str) -> Option<AnimationState> {
        let removed = self.entity_mut(model_id, entity_id)?.animation.take()?;
        self.entities_generation += 1;
        Some(removed)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.values().map(Vec::len).sum()
    }

    /// Stamp that changes whenever entities are added or removed, or gain or lose an
    /// animation
    pub fn entities_generation(&self) -> u64 {
        self.entities_generation
    }

    pub fn light_changed(&self) -> bool {
        self.light_changed
    }

    pub fn camera_moved(&self) -> bool {
        self.camera_moved
    }

    pub fn clear_change_flags(&mut self) {
        self.light_changed = false;
        self.camera_moved = false;
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new(&RendererConfig::default())
    }
}
