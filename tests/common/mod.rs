//! Common utilities for the frame pipeline integration tests.
//!
//! Everything runs on the headless backend, so tests can inspect buffers and the
//! submission log without a GPU.

#![allow(dead_code)]

use glam::{Mat4, Vec3};
use skinned_renderer::backend::headless::{HeadlessBackend, RecordedCommand, Submission};
use skinned_renderer::backend::{BufferHandle, DrawIndexedIndirect};
use skinned_renderer::resources::{AnimationFrame, MaterialData, MeshData, Model, PrecomputedAnimation, SkinWeight};
use skinned_renderer::{FrameScheduler, RendererConfig};

pub type TestScheduler = FrameScheduler<HeadlessBackend>;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Capacities small enough to keep the headless buffers cheap
pub fn small_config() -> RendererConfig {
    RendererConfig::default().with_capacities(256 * 1024, 64 * 1024, 32, 256 * 1024, 64 * 1024)
}

pub fn scheduler_with(config: RendererConfig, frames_in_flight: u32) -> TestScheduler {
    init_logging();
    let backend = HeadlessBackend::new(320, 240).with_frames_in_flight(frames_in_flight);
    FrameScheduler::new(backend, config).expect("scheduler creation")
}

pub fn scheduler() -> TestScheduler {
    scheduler_with(small_config(), 3)
}

/// Mesh with four vertices and `index_count` indices cycling over them
pub fn quad_mesh(index_count: usize) -> MeshData {
    let positions = vec![Vec3::ZERO, Vec3::X, Vec3::new(1.0, 1.0, 0.0), Vec3::Y];
    let indices = (0..index_count as u32).map(|i| i % 4).collect();
    MeshData::new(positions, indices)
}

/// Two static meshes with 300 and 150 indices
pub fn static_model(id: &str) -> Model {
    Model::new(id)
        .with_mesh(quad_mesh(300))
        .with_mesh(quad_mesh(150).with_material(1))
        .with_material(MaterialData::default())
        .with_material(MaterialData::default().with_roughness(0.5))
}

/// One skinned mesh and an animation of `frames` frames moving joint 1
pub fn animated_model(id: &str, frames: usize) -> Model {
    let mesh = quad_mesh(6);
    let weights = vec![SkinWeight::single(1); mesh.vertex_count()];
    let animation = PrecomputedAnimation::new(
        "walk",
        1.0,
        (0..frames)
            .map(|f| AnimationFrame::from_targeted(&[(1, Mat4::from_translation(Vec3::X * f as f32))]))
            .collect(),
    );
    Model::new(id)
        .with_mesh(mesh.with_weights(weights))
        .with_material(MaterialData::default())
        .with_animation(animation)
}

pub fn read_commands(backend: &HeadlessBackend, buffer: BufferHandle) -> Vec<DrawIndexedIndirect> {
    backend
        .buffer_data(buffer)
        .expect("indirect buffer")
        .chunks_exact(DrawIndexedIndirect::SIZE as usize)
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

pub fn submission_labels(submissions: &[Submission]) -> Vec<&str> {
    submissions.iter().map(|s| s.label.as_str()).collect()
}

pub fn count_commands(submission: &Submission, matches: impl Fn(&RecordedCommand) -> bool) -> usize {
    submission.commands.iter().filter(|c| matches(c)).count()
}
