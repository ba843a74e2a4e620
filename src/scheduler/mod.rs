//! Frame scheduling
//!
//! The [`FrameScheduler`] owns the arena, the passes and the scene, and drives one frame
//! through a fixed sequence of stages. GPU work of a frame is split into three
//! submissions chained by semaphores:
//!
//! 1. skinning compute, signaling the skinning semaphore
//! 2. shadow and geometry passes, waiting on skinning and signaling the slot semaphore
//! 3. lighting and overlay, waiting on the slot semaphore and signaling the slot fence
//!
//! A slot's fence is waited on before its instance data is rewritten, so at most
//! `frames_in_flight` frames are queued at any time.

mod frame_slot;

pub use frame_slot::FrameSlot;

use crate::arena::ResourceArena;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::config::RendererConfig;
use crate::error::RendererResult;
use crate::pipeline::{GeometryPass, LightingPass, ShadowPass, SkinningCompute};
use crate::resources::{Model, TextureCache};
use crate::scene::Scene;

/// Stage a frame is in, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    Idle,
    AcquireImage,
    Resize,
    WaitFrameFence,
    RebuildIfEntitiesChanged,
    UpdatePerFrameUniforms,
    DispatchSkinning,
    SubmitGeometryAndShadow,
    SubmitLighting,
    Present,
}

/// What happened to a requested frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was submitted and handed to the presentation engine
    Presented { slot: usize },
    /// Nothing was rendered, e.g. because the window is minimized
    Skipped,
}

/// Hook for drawing on top of the lit image, such as a GUI.
///
/// Called with the lighting submission still open. The descriptor targets the final
/// color image and loads its contents.
pub trait Overlay<B: GraphicsBackend + ?Sized> {
    fn record(&mut self, backend: &mut B, pass: &RenderPassDescriptor) -> RendererResult<()>;
}

/// Orchestrates per-frame ordering, frames in flight and swapchain recreation
pub struct FrameScheduler<B: GraphicsBackend> {
    backend: B,
    config: RendererConfig,
    scene: Scene,
    textures: TextureCache,
    arena: ResourceArena,

    skinning: SkinningCompute,
    shadows: ShadowPass,
    geometry: GeometryPass,
    lighting: LightingPass,

    slots: Vec<FrameSlot>,
    built_generation: Option<u64>,
    pending_resize: Option<(u32, u32)>,
    stage: FrameStage,
    frame_count: u64,
}

impl<B: GraphicsBackend> FrameScheduler<B> {
    /// Create every GPU resource of the pipeline.
    ///
    /// Fails if the configuration is invalid or the device lacks a required feature.
    pub fn new(mut backend: B, config: RendererConfig) -> RendererResult<Self> {
        config.validate()?;
        let missing = DeviceFeatures::REQUIRED.missing_from(backend.features());
        if !missing.is_empty() {
            return Err(BackendError::MissingFeature(missing.join(", ")).into());
        }

        let frames_in_flight = backend.frames_in_flight() as usize;
        let (width, height) = backend.surface_size();
        log::info!(
            "Creating frame scheduler: {}x{}, {} frames in flight",
            width,
            height,
            frames_in_flight
        );

        let mut textures = TextureCache::new();
        textures.ensure_default(&mut backend, config.default_texture_path.as_deref())?;
        let arena = ResourceArena::new(&mut backend, &config)?;

        let skinning = SkinningCompute::new(&mut backend)?;
        let shadows = ShadowPass::new(&mut backend, &config, frames_in_flight)?;
        let mut geometry = GeometryPass::new(&mut backend, &config, frames_in_flight, width, height)?;
        geometry.load_models(&mut backend, &arena, &textures)?;
        let mut lighting = LightingPass::new(&mut backend, &config, frames_in_flight)?;
        lighting.bind_inputs(&mut backend, geometry.views(), geometry.size(), &shadows)?;

        let slots = (0..frames_in_flight)
            .map(|index| FrameSlot::new(&mut backend, index))
            .collect();

        let mut scene = Scene::new(&config);
        scene.camera_mut().set_aspect(width as f32, height as f32);

        Ok(Self {
            backend,
            config,
            scene,
            textures,
            arena,
            skinning,
            shadows,
            geometry,
            lighting,
            slots,
            built_generation: None,
            pending_resize: None,
            stage: FrameStage::Idle,
            frame_count: 0,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn arena(&self) -> &ResourceArena {
        &self.arena
    }

    pub fn textures(&self) -> &TextureCache {
        &self.textures
    }

    pub fn skinning(&self) -> &SkinningCompute {
        &self.skinning
    }

    pub fn shadows(&self) -> &ShadowPass {
        &self.shadows
    }

    pub fn geometry(&self) -> &GeometryPass {
        &self.geometry
    }

    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    pub fn stage(&self) -> FrameStage {
        self.stage
    }

    /// Frames presented so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Upload a set of models.
    ///
    /// Blocks until the device is idle, appends the models to the arena, rebinds the
    /// material textures and forces an entity rebuild on the next frame.
    pub fn load_models(&mut self, models: &[Model]) -> RendererResult<()> {
        self.skinning.wait(&mut self.backend)?;
        self.backend.wait_idle()?;

        let loaded = self.arena.load_models(
            &mut self.backend,
            &mut self.textures,
            models,
            self.config.default_texture_path.as_deref(),
        )?;
        log::debug!(
            "loaded {} models ({} textures cached)",
            loaded.len(),
            self.textures.len()
        );

        self.geometry
            .load_models(&mut self.backend, &self.arena, &self.textures)?;
        self.built_generation = None;
        Ok(())
    }

    /// Move every started animation one frame forward
    pub fn advance_animations(&mut self) {
        let models = self.arena.models();
        for entity in self.scene.entities_mut() {
            let Some(state) = entity.animation() else {
                continue;
            };
            let frames = models
                .iter()
                .find(|model| model.id == entity.model_id())
                .and_then(|model| model.animations.get(state.animation_index))
                .map_or(0, |a| a.frame_offsets.len());
            if let Some(animation) = entity.animation_mut() {
                animation.advance(frames);
            }
        }
    }

    /// Window resize signal; applied at the start of the next frame
    pub fn resize(&mut self, width: u32, height: u32) {
        self.pending_resize = Some((width, height));
    }

    /// Render and present one frame
    pub fn render_frame(&mut self, overlay: Option<&mut dyn Overlay<B>>) -> RendererResult<FrameOutcome> {
        let outcome = self.run_frame(overlay);
        self.set_stage(FrameStage::Idle);
        outcome
    }

    fn run_frame(&mut self, overlay: Option<&mut dyn Overlay<B>>) -> RendererResult<FrameOutcome> {
        if let Some((width, height)) = self.pending_resize {
            if width == 0 || height == 0 {
                log::trace!("surface is {}x{}, skipping frame", width, height);
                return Ok(FrameOutcome::Skipped);
            }
            self.set_stage(FrameStage::Resize);
            self.pending_resize = None;
            self.recreate_swapchain(width, height)?;
        }
        let (width, height) = self.backend.surface_size();
        if width == 0 || height == 0 {
            log::trace!("surface is {}x{}, skipping frame", width, height);
            return Ok(FrameOutcome::Skipped);
        }

        self.set_stage(FrameStage::AcquireImage);
        let frame = match self.backend.begin_frame() {
            Ok(frame) => frame,
            Err(BackendError::SurfaceOutdated) => {
                log::warn!("swapchain out of date on acquire, recreating");
                self.set_stage(FrameStage::Resize);
                let (width, height) = self.backend.surface_size();
                self.recreate_swapchain(width, height)?;
                return Ok(FrameOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };

        if (frame.width, frame.height) != self.geometry.size() {
            self.set_stage(FrameStage::Resize);
            self.recreate_swapchain(frame.width, frame.height)?;
        }
        let slot = frame.image_index as usize % self.slots.len();

        self.set_stage(FrameStage::WaitFrameFence);
        self.backend.wait_for_fence(self.slots[slot].fence())?;

        self.set_stage(FrameStage::RebuildIfEntitiesChanged);
        self.rebuild_entities_if_changed()?;
        self.slots[slot].refresh_batch(&self.arena);

        self.set_stage(FrameStage::UpdatePerFrameUniforms);
        self.update_uniforms(slot);

        self.set_stage(FrameStage::DispatchSkinning);
        self.skinning
            .record_frame(&mut self.backend, &self.arena, &self.scene)?;

        self.set_stage(FrameStage::SubmitGeometryAndShadow);
        let batch = self.slots[slot].batch();
        self.backend.begin_commands("geometry and shadow");
        self.shadows.record(&mut self.backend, batch, slot);
        self.geometry.record(&mut self.backend, batch, slot);
        self.backend.submit(&SubmitInfo {
            wait_semaphores: &[self.skinning.done_semaphore()],
            signal_semaphores: &[self.slots[slot].geometry_done()],
            fence: None,
        })?;

        self.set_stage(FrameStage::SubmitLighting);
        self.backend.begin_commands("lighting");
        self.lighting
            .record(&mut self.backend, frame.swapchain_view, slot);
        if let Some(overlay) = overlay {
            let pass = RenderPassDescriptor {
                label: Some("overlay".into()),
                color_attachments: vec![ColorAttachment {
                    view: frame.swapchain_view,
                    load_op: LoadOp::Load,
                    store_op: StoreOp::Store,
                }],
                depth_stencil_attachment: None,
            };
            overlay.record(&mut self.backend, &pass)?;
        }
        let fence = self.slots[slot].fence();
        self.backend.reset_fence(fence);
        self.backend.submit(&SubmitInfo {
            wait_semaphores: &[self.slots[slot].geometry_done()],
            signal_semaphores: &[],
            fence: Some(fence),
        })?;

        self.set_stage(FrameStage::Present);
        match self.backend.end_frame() {
            Ok(()) => {}
            Err(BackendError::SurfaceOutdated) => {
                log::warn!("swapchain suboptimal on present, recreating next frame");
                self.pending_resize = Some(self.backend.surface_size());
            }
            Err(e) => return Err(e.into()),
        }

        self.slots[slot].mark_rendered();
        self.frame_count += 1;
        Ok(FrameOutcome::Presented { slot })
    }

    fn set_stage(&mut self, stage: FrameStage) {
        log::trace!("frame {}: {:?} -> {:?}", self.frame_count, self.stage, stage);
        self.stage = stage;
    }

    fn rebuild_entities_if_changed(&mut self) -> RendererResult<()> {
        let generation = self.scene.entities_generation();
        if self.built_generation == Some(generation) {
            return Ok(());
        }

        // Other slots may still read the buffers that are about to be replaced
        self.skinning.wait(&mut self.backend)?;
        self.backend.wait_idle()?;

        self.arena.load_entities(&mut self.backend, &self.scene)?;
        self.skinning
            .on_resources_rebuilt(&mut self.backend, &self.arena)?;
        self.built_generation = Some(generation);
        Ok(())
    }

    fn update_uniforms(&mut self, slot: usize) {
        self.arena
            .load_instance_data(&mut self.backend, &self.scene, slot);
        self.geometry
            .update_camera(&mut self.backend, slot, &self.scene.camera().uniform_data());
        self.shadows.update(&mut self.backend, &self.scene, slot);
        self.lighting.update(
            &mut self.backend,
            &self.scene,
            self.shadows.cascade_count(),
            self.shadows.map_size(),
            slot,
        );
        self.scene.clear_change_flags();
    }

    fn recreate_swapchain(&mut self, width: u32, height: u32) -> RendererResult<()> {
        self.skinning.wait(&mut self.backend)?;
        self.backend.wait_idle()?;
        self.backend.resize(width, height);

        // The surface may clamp the requested size
        let (width, height) = self.backend.surface_size();
        log::info!("Recreating swapchain resources at {}x{}", width, height);

        self.geometry.resize(&mut self.backend, width, height)?;
        self.lighting.bind_inputs(
            &mut self.backend,
            self.geometry.views(),
            self.geometry.size(),
            &self.shadows,
        )?;
        for slot in &mut self.slots {
            slot.invalidate();
        }

        self.scene
            .camera_mut()
            .set_aspect(width as f32, height as f32);
        self.shadows.refit(&self.scene);
        Ok(())
    }

    /// Wait for the device and release every GPU resource
    pub fn shutdown(&mut self) -> RendererResult<()> {
        log::info!("Shutting down frame scheduler after {} frames", self.frame_count);
        self.skinning.wait(&mut self.backend)?;
        self.backend.wait_idle()?;

        self.lighting.destroy(&mut self.backend);
        self.geometry.destroy(&mut self.backend);
        self.shadows.destroy(&mut self.backend);
        self.arena.destroy(&mut self.backend);
        self.textures.destroy(&mut self.backend);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;

    fn scheduler() -> FrameScheduler<HeadlessBackend> {
        let config = RendererConfig::default().with_capacities(64 * 1024, 16 * 1024, 16, 64 * 1024, 16 * 1024);
        FrameScheduler::new(HeadlessBackend::new(320, 240), config).unwrap()
    }

    #[test]
    fn test_stage_returns_to_idle() {
        let mut scheduler = scheduler();
        let outcome = scheduler.render_frame(None).unwrap();
        assert_eq!(outcome, FrameOutcome::Presented { slot: 0 });
        assert_eq!(scheduler.stage(), FrameStage::Idle);
        assert_eq!(scheduler.frame_count(), 1);
    }

    #[test]
    fn test_missing_feature_is_fatal() {
        let backend = HeadlessBackend::new(8, 8).with_features(DeviceFeatures::PUSH_CONSTANTS);
        let result = FrameScheduler::new(backend, RendererConfig::default());
        assert!(matches!(
            result,
            Err(crate::error::RendererError::Backend(BackendError::MissingFeature(_)))
        ));
    }

    #[test]
    fn test_camera_aspect_follows_surface() {
        let mut scheduler = scheduler();
        assert_eq!(scheduler.scene().camera().projection.aspect, 320.0 / 240.0);

        scheduler.resize(200, 100);
        scheduler.render_frame(None).unwrap();
        assert_eq!(scheduler.scene().camera().projection.aspect, 2.0);
        assert_eq!(scheduler.geometry().size(), (200, 100));
    }

    #[test]
    fn test_change_flags_cleared_after_frame() {
        let mut scheduler = scheduler();
        assert!(scheduler.scene().camera_moved());
        scheduler.render_frame(None).unwrap();
        assert!(!scheduler.scene().camera_moved());
        assert!(!scheduler.scene().light_changed());
    }
}
