//! Fixed startup configuration

use crate::error::{RendererError, RendererResult};

/// Configuration for initializing the renderer.
///
/// Read once at startup; the arena capacities and pass resolutions never change while
/// the renderer is alive.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Vertical field of view in degrees
    pub fov: f32,
    pub z_near: f32,
    pub z_far: f32,

    /// Byte capacity of the shared vertex buffer
    pub max_vertices_size: u64,
    /// Byte capacity of the shared index buffer
    pub max_indices_size: u64,
    /// Number of material records, including the default material
    pub max_materials: u32,
    /// Byte capacity of the joint-matrix buffer
    pub max_joint_matrices_size: u64,
    /// Byte capacity of the skin-weight buffer
    pub max_weights_size: u64,
    /// Length of the material texture array
    pub max_textures: u32,
    pub max_lights: u32,

    pub shadow_cascades: u32,
    pub shadow_map_size: u32,
    pub shadow_bias: f32,
    pub shadow_pcf: bool,
    /// Tint each pixel by the cascade it sampled
    pub shadow_debug: bool,
    /// Blend between logarithmic (1.0) and uniform (0.0) cascade splits
    pub cascade_split_lambda: f32,

    /// Requested number of frames in flight
    pub frames_in_flight: u32,
    pub vsync: bool,
    /// Texture used for materials without one; a white texel when `None`
    pub default_texture_path: Option<String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            fov: 60.0,
            z_near: 1.0,
            z_far: 100.0,
            max_vertices_size: 20_000_000,
            max_indices_size: 5_000_000,
            max_materials: 500,
            max_joint_matrices_size: 2_000_000,
            max_weights_size: 100_000,
            max_textures: 256,
            max_lights: 10,
            shadow_cascades: 3,
            shadow_map_size: 2048,
            shadow_bias: 0.00005,
            shadow_pcf: false,
            shadow_debug: false,
            cascade_split_lambda: 0.95,
            frames_in_flight: 3,
            vsync: true,
            default_texture_path: None,
        }
    }
}

impl RendererConfig {
    pub fn with_capacities(
        mut self,
        vertices_size: u64,
        indices_size: u64,
        max_materials: u32,
        joint_matrices_size: u64,
        weights_size: u64,
    ) -> Self {
        self.max_vertices_size = vertices_size;
        self.max_indices_size = indices_size;
        self.max_materials = max_materials;
        self.max_joint_matrices_size = joint_matrices_size;
        self.max_weights_size = weights_size;
        self
    }

    pub fn with_max_textures(mut self, max_textures: u32) -> Self {
        self.max_textures = max_textures;
        self
    }

    pub fn with_max_lights(mut self, max_lights: u32) -> Self {
        self.max_lights = max_lights;
        self
    }

    pub fn with_shadows(mut self, cascades: u32, map_size: u32) -> Self {
        self.shadow_cascades = cascades;
        self.shadow_map_size = map_size;
        self
    }

    pub fn with_shadow_pcf(mut self, enabled: bool) -> Self {
        self.shadow_pcf = enabled;
        self
    }

    pub fn with_shadow_debug(mut self, enabled: bool) -> Self {
        self.shadow_debug = enabled;
        self
    }

    pub fn with_clip_planes(mut self, z_near: f32, z_far: f32) -> Self {
        self.z_near = z_near;
        self.z_far = z_far;
        self
    }

    pub fn with_frames_in_flight(mut self, frames: u32) -> Self {
        self.frames_in_flight = frames;
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_default_texture(mut self, path: impl Into<String>) -> Self {
        self.default_texture_path = Some(path.into());
        self
    }

    /// Reject values the GPU layouts cannot represent
    pub fn validate(&self) -> RendererResult<()> {
        let fail = |msg: String| Err(RendererError::InvalidConfig(msg));

        if !(self.z_near > 0.0 && self.z_far > self.z_near) {
            return fail(format!(
                "clip planes must satisfy 0 < near < far, got {} and {}",
                self.z_near, self.z_far
            ));
        }
        if !(self.fov > 0.0 && self.fov < 180.0) {
            return fail(format!("field of view {} is out of range", self.fov));
        }
        if self.max_materials == 0 {
            return fail("at least one material slot is required for the default material".into());
        }
        if self.max_textures == 0 {
            return fail("max_textures must be positive".into());
        }
        if self.max_lights == 0 {
            return fail("max_lights must be positive".into());
        }
        if self.shadow_cascades == 0 {
            return fail("at least one shadow cascade is required".into());
        }
        if self.shadow_map_size == 0 {
            return fail("shadow map size must be positive".into());
        }
        if !(0.0..=1.0).contains(&self.cascade_split_lambda) {
            return fail(format!(
                "cascade split lambda {} is outside [0, 1]",
                self.cascade_split_lambda
            ));
        }
        if self.frames_in_flight == 0 {
            return fail("frames_in_flight must be positive".into());
        }
        for (name, size) in [
            ("vertex", self.max_vertices_size),
            ("index", self.max_indices_size),
            ("joint matrix", self.max_joint_matrices_size),
            ("weight", self.max_weights_size),
        ] {
            if size == 0 || size % 4 != 0 {
                return fail(format!(
                    "{} capacity {} must be a positive multiple of 4",
                    name, size
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.shadow_cascades, 3);
        assert_eq!(config.max_lights, 10);
        assert_eq!(config.z_far, 100.0);
    }

    #[test]
    fn test_inverted_clip_planes_rejected() {
        let config = RendererConfig::default().with_clip_planes(10.0, 1.0);
        assert!(matches!(
            config.validate(),
            Err(RendererError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_unaligned_capacity_rejected() {
        let config = RendererConfig::default().with_capacities(1001, 4000, 4, 9600, 320);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_cascades_rejected() {
        let config = RendererConfig::default().with_shadows(0, 1024);
        assert!(config.validate().is_err());
    }
}
