//! Frame pipeline integration tests.
//!
//! These tests drive the full frame scheduler on the headless backend and check draw
//! batching, the per-frame submission order, frames in flight and swapchain recovery.
//!
//! # Test Categories
//!
//! - **Batching Tests**: indirect commands and instance records built from the scene
//! - **Submission Tests**: semaphore and fence chaining between the three submissions
//! - **Swapchain Tests**: resize, stale surfaces and minimized windows
//! - **Loading Tests**: arena capacity and scene validation

mod common;

use common::*;
use glam::Vec3;
use rstest::rstest;
use skinned_renderer::backend::headless::{HeadlessBackend, RecordedCommand};
use skinned_renderer::backend::{GraphicsBackend, LoadOp, MemoryBarrier, RenderPassDescriptor, Vertex};
use skinned_renderer::{
    AnimationState, Entity, FrameOutcome, Light, MaterialData, Overlay, RendererError, RendererResult,
};

// ============================================================================
// Batching Tests
// ============================================================================

#[test]
fn test_static_meshes_are_instanced_per_mesh() {
    let mut scheduler = scheduler();
    scheduler.load_models(&[static_model("crate")]).unwrap();
    for i in 0..3 {
        scheduler
            .scene_mut()
            .add_entity(Entity::new(format!("crate {}", i), "crate"));
    }
    scheduler.render_frame(None).unwrap();

    let buffer = scheduler.arena().static_indirect_buffer().unwrap();
    let commands = read_commands(scheduler.backend(), buffer);
    assert_eq!(commands.len(), 2);

    assert_eq!(commands[0].index_count, 300);
    assert_eq!(commands[1].index_count, 150);
    assert_eq!(commands[1].first_index, 300);
    assert_eq!(commands[1].base_vertex, 4);
    for command in &commands {
        assert_eq!(command.instance_count, 3);
    }
    assert_eq!(commands[0].first_instance, 0);
    assert_eq!(commands[1].first_instance, 3);
    assert!(scheduler.arena().animated_indirect_buffer().is_none());
}

#[test]
fn test_animated_entities_get_one_draw_each() {
    let mut scheduler = scheduler();
    scheduler.load_models(&[animated_model("rig", 4)]).unwrap();
    for i in 0..2 {
        scheduler.scene_mut().add_entity(
            Entity::new(format!("rig {}", i), "rig").with_animation(AnimationState::new(0)),
        );
    }
    scheduler.render_frame(None).unwrap();

    let draw_set = scheduler.arena().draw_set();
    assert!(draw_set.static_commands.is_empty());
    assert_eq!(draw_set.animated_commands.len(), 2);
    for (i, command) in draw_set.animated_commands.iter().enumerate() {
        assert_eq!(command.instance_count, 1);
        assert_eq!(command.first_instance, i as u32);
    }

    let mesh_size = 4 * Vertex::SIZE;
    assert_eq!(draw_set.skinning_targets[0].dst_offset, 0);
    assert_eq!(draw_set.skinning_targets[1].dst_offset, mesh_size);
    assert_eq!(draw_set.animated_commands[1].base_vertex, 4);
    assert_eq!(draw_set.skinned_size, 2 * mesh_size);

    let buffer = scheduler.arena().animated_indirect_buffer().unwrap();
    assert_eq!(read_commands(scheduler.backend(), buffer), draw_set.animated_commands);
    assert_eq!(scheduler.skinning().last_dispatches(), 2);
}

#[rstest]
#[case::empty(0, 0)]
#[case::single(1, 0)]
#[case::mixed(4, 2)]
#[case::only_animated(0, 3)]
fn test_static_instances_cover_still_entities(#[case] still: usize, #[case] animated: usize) {
    let mut scheduler = scheduler();
    scheduler
        .load_models(&[static_model("crate"), animated_model("rig", 2)])
        .unwrap();
    for i in 0..still {
        scheduler
            .scene_mut()
            .add_entity(Entity::new(format!("crate {}", i), "crate"));
    }
    for i in 0..animated {
        scheduler.scene_mut().add_entity(
            Entity::new(format!("rig {}", i), "rig").with_animation(AnimationState::new(0)),
        );
    }
    scheduler.render_frame(None).unwrap();

    let draw_set = scheduler.arena().draw_set();
    let instances: u32 = draw_set.static_commands.iter().map(|c| c.instance_count).sum();
    assert_eq!(instances as usize, still * 2);
    assert_eq!(draw_set.static_instances.len(), still * 2);
    assert_eq!(draw_set.animated_commands.len(), animated);
}

#[test]
fn test_rig_without_animation_state_is_drawn_static() {
    let mut scheduler = scheduler();
    scheduler.load_models(&[animated_model("rig", 2)]).unwrap();
    scheduler.scene_mut().add_entity(Entity::new("posed", "rig"));
    scheduler.render_frame(None).unwrap();

    let draw_set = scheduler.arena().draw_set();
    assert_eq!(draw_set.static_commands.len(), 1);
    assert!(draw_set.animated_commands.is_empty());
    assert_eq!(scheduler.skinning().last_dispatches(), 0);
}

#[test]
fn test_toggling_animation_moves_entity_between_batches() {
    let mut scheduler = scheduler();
    scheduler.load_models(&[animated_model("rig", 4)]).unwrap();
    scheduler.scene_mut().add_entity(Entity::new("posed", "rig"));
    scheduler.render_frame(None).unwrap();
    assert_eq!(scheduler.arena().draw_set().static_commands.len(), 1);
    let generation = scheduler.arena().entities_generation();

    assert!(scheduler
        .scene_mut()
        .set_animation("rig", "posed", AnimationState::new(0)));
    scheduler.render_frame(None).unwrap();

    let draw_set = scheduler.arena().draw_set();
    assert!(draw_set.static_commands.is_empty());
    assert_eq!(draw_set.animated_commands.len(), 1);
    assert_eq!(scheduler.arena().entities_generation(), generation + 1);
    assert_eq!(scheduler.skinning().last_dispatches(), 1);

    assert!(scheduler.scene_mut().clear_animation("rig", "posed").is_some());
    scheduler.render_frame(None).unwrap();

    let draw_set = scheduler.arena().draw_set();
    assert_eq!(draw_set.static_commands.len(), 1);
    assert!(draw_set.animated_commands.is_empty());
    assert!(scheduler.arena().animated_indirect_buffer().is_none());
    assert_eq!(scheduler.skinning().last_dispatches(), 0);
}

#[test]
fn test_transform_update_only_rewrites_instance_records() {
    let mut scheduler = scheduler_with(small_config(), 1);
    scheduler.load_models(&[static_model("crate")]).unwrap();
    for i in 0..3 {
        scheduler
            .scene_mut()
            .add_entity(Entity::new(format!("crate {}", i), "crate"));
    }
    scheduler.render_frame(None).unwrap();

    let indirect = scheduler.arena().static_indirect_buffer().unwrap();
    let instances = scheduler.arena().instance_buffers(0).unwrap().static_buffer.unwrap();
    let commands_before = scheduler.backend().buffer_data(indirect).unwrap().to_vec();
    let records_before = scheduler.backend().buffer_data(instances).unwrap().to_vec();
    let generation = scheduler.arena().entities_generation();

    scheduler
        .scene_mut()
        .entity_mut("crate", "crate 1")
        .unwrap()
        .transform
        .position = Vec3::new(5.0, 0.0, 0.0);
    scheduler.render_frame(None).unwrap();

    assert_eq!(scheduler.arena().entities_generation(), generation);
    assert_eq!(scheduler.backend().buffer_data(indirect).unwrap(), &commands_before[..]);

    let records_after = scheduler.backend().buffer_data(instances).unwrap();
    assert_eq!(records_after.len(), records_before.len());
    let changed: Vec<usize> = records_before
        .chunks_exact(68)
        .zip(records_after.chunks_exact(68))
        .enumerate()
        .filter(|(_, (before, after))| before != after)
        .map(|(i, _)| i)
        .collect();
    // Entity 1 is instanced once per mesh
    assert_eq!(changed, vec![1, 4]);
}

#[test]
fn test_entity_rebuild_only_when_generation_changes() {
    let mut scheduler = scheduler();
    scheduler.load_models(&[static_model("crate")]).unwrap();
    scheduler.scene_mut().add_entity(Entity::new("a", "crate"));
    scheduler.render_frame(None).unwrap();
    let generation = scheduler.arena().entities_generation();

    scheduler.render_frame(None).unwrap();
    scheduler.render_frame(None).unwrap();
    assert_eq!(scheduler.arena().entities_generation(), generation);

    scheduler.scene_mut().add_entity(Entity::new("b", "crate"));
    scheduler.render_frame(None).unwrap();
    assert_eq!(scheduler.arena().entities_generation(), generation + 1);
    assert_eq!(scheduler.arena().draw_set().static_commands[0].instance_count, 2);
}

// ============================================================================
// Skinning Tests
// ============================================================================

#[test]
fn test_stopped_and_missing_animations_are_not_skinned() {
    let mut scheduler = scheduler();
    scheduler.load_models(&[animated_model("rig", 2)]).unwrap();

    let mut stopped = AnimationState::new(0);
    stopped.stop();
    let scene = scheduler.scene_mut();
    scene.add_entity(Entity::new("playing", "rig").with_animation(AnimationState::new(0)));
    scene.add_entity(Entity::new("stopped", "rig").with_animation(stopped));
    scene.add_entity(Entity::new("unknown", "rig").with_animation(AnimationState::new(7)));

    scheduler.render_frame(None).unwrap();
    assert_eq!(scheduler.arena().draw_set().animated_commands.len(), 3);
    assert_eq!(scheduler.skinning().last_dispatches(), 1);
}

#[test]
fn test_animations_advance_and_wrap() {
    let mut scheduler = scheduler();
    scheduler.load_models(&[animated_model("rig", 3)]).unwrap();
    scheduler
        .scene_mut()
        .add_entity(Entity::new("walker", "rig").with_animation(AnimationState::new(0)));

    for _ in 0..4 {
        scheduler.advance_animations();
    }
    let state = scheduler.scene().entities_by_model("rig")[0].animation().unwrap();
    assert_eq!(state.current_frame, 1);
}

// ============================================================================
// Submission Tests
// ============================================================================

#[test]
fn test_submissions_are_chained_by_semaphores() {
    let mut scheduler = scheduler();
    scheduler.backend_mut().take_submissions();

    let outcome = scheduler.render_frame(None).unwrap();
    assert_eq!(outcome, FrameOutcome::Presented { slot: 0 });

    let submissions = scheduler.backend().submissions();
    assert_eq!(
        submission_labels(submissions),
        vec!["skinning", "geometry and shadow", "lighting"]
    );

    let skinned = scheduler.skinning().done_semaphore();
    let slot = &scheduler.slots()[0];
    assert_eq!(submissions[0].signal_semaphores, vec![skinned]);
    assert_eq!(submissions[1].wait_semaphores, vec![skinned]);
    assert_eq!(submissions[1].signal_semaphores, vec![slot.geometry_done()]);
    assert_eq!(submissions[2].wait_semaphores, vec![slot.geometry_done()]);
    assert_eq!(submissions[2].fence, Some(slot.fence()));

    let skinning = &submissions[0].commands;
    assert_eq!(
        skinning.first(),
        Some(&RecordedCommand::Barrier(MemoryBarrier::VertexReadToComputeWrite))
    );
    assert_eq!(
        skinning.last(),
        Some(&RecordedCommand::Barrier(MemoryBarrier::ComputeWriteToVertexRead))
    );

    // One pass per shadow cascade, then the G-buffer pass
    let passes = count_commands(&submissions[1], |c| matches!(c, RecordedCommand::BeginRenderPass { .. }));
    assert_eq!(passes, scheduler.config().shadow_cascades as usize + 1);
    assert!(scheduler.backend().validation_errors().is_empty());
}

#[rstest]
#[case::single(1)]
#[case::double(2)]
#[case::triple(3)]
fn test_frame_slots_cycle(#[case] frames_in_flight: u32) {
    let mut scheduler = scheduler_with(small_config(), frames_in_flight);
    assert_eq!(scheduler.slots().len(), frames_in_flight as usize);

    for frame in 0..frames_in_flight * 2 {
        let outcome = scheduler.render_frame(None).unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::Presented {
                slot: (frame % frames_in_flight) as usize
            }
        );
    }

    for slot in scheduler.slots() {
        assert_eq!(slot.frames_rendered(), 2);
        let waits = scheduler
            .backend()
            .fence_waits()
            .iter()
            .filter(|f| **f == slot.fence())
            .count();
        assert_eq!(waits, 2);
    }
    assert_eq!(scheduler.backend().presented_frames(), frames_in_flight as u64 * 2);
}

struct RecordingOverlay {
    passes: Vec<RenderPassDescriptor>,
}

impl Overlay<HeadlessBackend> for RecordingOverlay {
    fn record(&mut self, backend: &mut HeadlessBackend, pass: &RenderPassDescriptor) -> RendererResult<()> {
        backend.begin_render_pass(pass);
        backend.draw(0..6, 0..1);
        backend.end_render_pass();
        self.passes.push(pass.clone());
        Ok(())
    }
}

#[test]
fn test_overlay_draws_over_lit_image() {
    let mut scheduler = scheduler();
    let mut overlay = RecordingOverlay { passes: Vec::new() };
    scheduler.backend_mut().take_submissions();

    scheduler
        .render_frame(Some(&mut overlay as &mut dyn Overlay<HeadlessBackend>))
        .unwrap();

    assert_eq!(overlay.passes.len(), 1);
    let attachment = &overlay.passes[0].color_attachments[0];
    assert_eq!(attachment.load_op, LoadOp::Load);
    assert_eq!(attachment.view, scheduler.backend().swapchain_view());

    let lighting = scheduler.backend().submissions().last().unwrap();
    assert_eq!(lighting.label, "lighting");
    let draws: Vec<u32> = lighting
        .commands
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::Draw { vertices, .. } => Some(vertices.end),
            _ => None,
        })
        .collect();
    assert_eq!(draws, vec![3, 6]);
}

// ============================================================================
// Swapchain Tests
// ============================================================================

#[test]
fn test_resize_recreates_swapchain_resources() {
    let mut scheduler = scheduler();
    scheduler.load_models(&[static_model("crate")]).unwrap();
    scheduler.scene_mut().add_entity(Entity::new("a", "crate"));
    scheduler.render_frame(None).unwrap();
    let idle_waits = scheduler.backend().idle_waits();

    scheduler.resize(640, 480);
    let outcome = scheduler.render_frame(None).unwrap();
    assert_eq!(outcome, FrameOutcome::Presented { slot: 1 });

    assert!(scheduler.backend().idle_waits() > idle_waits);
    assert_eq!(scheduler.geometry().size(), (640, 480));
    assert_eq!(scheduler.scene().camera().projection.aspect, 640.0 / 480.0);

    // Slot 1 re-recorded its batch, slot 0 does so the next time it is used
    assert!(scheduler.slots()[1].batch().is_current(scheduler.arena()));
    assert!(!scheduler.slots()[0].batch().is_current(scheduler.arena()));
    assert_eq!(scheduler.slots()[1].batch().command_count(), 2);
}

#[test]
fn test_window_resize_outside_renderer_is_detected() {
    let mut scheduler = scheduler();
    scheduler.render_frame(None).unwrap();

    scheduler.backend_mut().set_window_size(400, 200);
    scheduler.render_frame(None).unwrap();
    assert_eq!(scheduler.geometry().size(), (400, 200));
    assert_eq!(scheduler.scene().camera().projection.aspect, 2.0);
}

#[test]
fn test_stale_surface_on_acquire_is_recovered() {
    let mut scheduler = scheduler();
    scheduler.backend_mut().mark_surface_outdated(1);
    let idle_waits = scheduler.backend().idle_waits();

    assert_eq!(scheduler.render_frame(None).unwrap(), FrameOutcome::Skipped);
    assert!(scheduler.backend().idle_waits() > idle_waits);
    assert!(matches!(
        scheduler.render_frame(None).unwrap(),
        FrameOutcome::Presented { .. }
    ));
}

#[test]
fn test_suboptimal_present_recreates_next_frame() {
    let mut scheduler = scheduler();
    scheduler.backend_mut().mark_present_outdated(1);

    assert!(matches!(
        scheduler.render_frame(None).unwrap(),
        FrameOutcome::Presented { .. }
    ));
    let idle_waits = scheduler.backend().idle_waits();
    scheduler.render_frame(None).unwrap();
    assert!(scheduler.backend().idle_waits() > idle_waits);
}

#[rstest]
#[case::zero_width(0, 240)]
#[case::zero_height(320, 0)]
#[case::minimized(0, 0)]
fn test_zero_sized_surface_skips_frames(#[case] width: u32, #[case] height: u32) {
    let mut scheduler = scheduler();
    scheduler.backend_mut().take_submissions();

    scheduler.resize(width, height);
    assert_eq!(scheduler.render_frame(None).unwrap(), FrameOutcome::Skipped);
    assert!(scheduler.backend().submissions().is_empty());

    scheduler.resize(100, 50);
    assert!(matches!(
        scheduler.render_frame(None).unwrap(),
        FrameOutcome::Presented { .. }
    ));
    assert_eq!(scheduler.geometry().size(), (100, 50));
}

#[test]
fn test_zero_sized_window_skips_frames() {
    let mut scheduler = scheduler();
    scheduler.backend_mut().set_window_size(0, 0);
    assert_eq!(scheduler.render_frame(None).unwrap(), FrameOutcome::Skipped);
    assert_eq!(scheduler.frame_count(), 0);
}

// ============================================================================
// Loading Tests
// ============================================================================

#[test]
fn test_arena_overflow_fails_load_and_keeps_arena() {
    let config = small_config().with_capacities(256, 64 * 1024, 32, 256 * 1024, 64 * 1024);
    let mut scheduler = scheduler_with(config, 2);

    let result = scheduler.load_models(&[static_model("too big")]);
    assert!(matches!(
        result,
        Err(RendererError::CapacityExceeded {
            region: "vertices",
            available: 256,
            ..
        })
    ));
    assert!(scheduler.arena().models().is_empty());
    assert_eq!(scheduler.arena().regions()[0].used(), 0);
}

#[test]
fn test_texture_overflow_fails_load() {
    let mut scheduler = scheduler_with(small_config().with_max_textures(2), 2);
    assert_eq!(scheduler.textures().len(), 1);

    let model = static_model("textured")
        .with_material(MaterialData::default().with_diffuse_texture("first.png"))
        .with_material(MaterialData::default().with_diffuse_texture("second.png"))
        .with_material(MaterialData::default().with_metal_rough_texture("third.png"));
    let result = scheduler.load_models(&[model]);

    assert!(matches!(
        result,
        Err(RendererError::CapacityExceeded {
            region: "textures",
            available: 2,
            ..
        })
    ));
    assert_eq!(scheduler.textures().len(), 1);
    assert!(scheduler.arena().models().is_empty());
}

#[test]
fn test_arena_offsets_are_monotonic() {
    let mut scheduler = scheduler();
    scheduler
        .load_models(&[static_model("a"), animated_model("b", 2), static_model("c")])
        .unwrap();

    let meshes: Vec<_> = scheduler
        .arena()
        .models()
        .iter()
        .flat_map(|m| m.meshes.iter().copied())
        .collect();
    for pair in meshes.windows(2) {
        assert_eq!(pair[0].vertices_offset + pair[0].vertices_size, pair[1].vertices_offset);
        assert!(pair[0].indices_offset < pair[1].indices_offset);
    }
    for region in scheduler.arena().regions() {
        assert!(region.used() <= region.capacity());
    }
}

#[test]
fn test_too_many_lights_keeps_previous_lights() {
    let mut scheduler = scheduler_with(small_config().with_max_lights(2), 1);
    let sun = Light::directional(Vec3::Y, Vec3::ONE, 1.0);
    scheduler.scene_mut().set_lights(vec![sun]).unwrap();

    let lamp = Light::point(Vec3::ZERO, Vec3::ONE, 1.0);
    let result = scheduler
        .scene_mut()
        .set_lights(vec![sun, lamp, lamp]);
    assert!(matches!(
        result,
        Err(RendererError::TooManyLights { count: 3, max: 2 })
    ));
    assert_eq!(scheduler.scene().lights(), &[sun][..]);
    assert!(matches!(
        scheduler.render_frame(None).unwrap(),
        FrameOutcome::Presented { .. }
    ));
}
