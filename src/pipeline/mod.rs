//! Deferred rendering pipeline
//!
//! This module implements the per-frame GPU work:
//! 1. Skinning - Compute pass deforming animated meshes into the skinned vertex buffer
//! 2. Shadow pass - Depth-only rendering of every shadow cascade
//! 3. Geometry pass - Renders geometry to multiple render targets
//! 4. Lighting pass - Fullscreen pass computing lighting from the G-buffer

pub mod cascade;
pub mod gbuffer_pass;
pub mod lighting_pass;
pub mod shadow_pass;
pub mod skinning;

pub use cascade::{CascadeShadow, GpuCascade, ShadowCascades};
pub use gbuffer_pass::{GBufferViews, GeometryPass};
pub use lighting_pass::{LightingPass, LightingUniforms};
pub use shadow_pass::ShadowPass;
pub use skinning::{SkinningCompute, SkinningParams, SkinningState};
