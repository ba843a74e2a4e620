//! Skinned Renderer - A deferred renderer with GPU skinning and cascaded shadows
//!
//! Rendering goes through a [`GraphicsBackend`](backend::GraphicsBackend) seam with two
//! implementations:
//! - **wgpu**: the production backend, created from a winit window
//! - **headless**: an in-memory recording backend used by tests and for CPU-only
//!   validation of frame sequencing
//!
//! # Features
//! - Fixed-capacity resource arena with staged uploads of meshes, materials, skin weights
//!   and precomputed joint matrices
//! - Instanced indirect draws for static meshes, one draw per entity mesh for animated ones
//! - Compute skinning into a separate vertex buffer
//! - Deferred G-buffer and lighting passes with cascaded shadow maps
//! - Frame-in-flight scheduling with fences, semaphores and swapchain recreation

pub mod arena;
pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod resources;
pub mod scene;
pub mod scheduler;
pub mod window;

pub use arena::{IndirectDrawSet, ResourceArena};
pub use backend::headless::HeadlessBackend;
pub use backend::wgpu_backend::WgpuBackend;
pub use config::RendererConfig;
pub use engine::Engine;
pub use error::{RendererError, RendererResult};
pub use resources::{MaterialData, MeshData, Model, PrecomputedAnimation, TextureCache};
pub use scene::{AnimationState, Camera, Entity, Light, Scene, Transform};
pub use scheduler::{FrameOutcome, FrameScheduler, FrameStage, Overlay};
pub use window::Window;
