//! Material definitions for the G-buffer pass

use bytemuck::{Pod, Zeroable};
use glam::Vec4;

/// Material as delivered by the importer
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialData {
    /// Albedo texture; its alpha channel may carry ambient occlusion
    pub diffuse_texture: Option<String>,
    pub normal_texture: Option<String>,
    /// Metallic in blue, roughness in green
    pub metal_rough_texture: Option<String>,
    pub diffuse_color: Vec4,
    pub roughness: f32,
    pub metallic: f32,
}

impl Default for MaterialData {
    fn default() -> Self {
        Self {
            diffuse_texture: None,
            normal_texture: None,
            metal_rough_texture: None,
            diffuse_color: Vec4::ONE,
            roughness: 0.0,
            metallic: 0.0,
        }
    }
}

impl MaterialData {
    pub fn with_diffuse_color(mut self, color: Vec4) -> Self {
        self.diffuse_color = color;
        self
    }

    pub fn with_diffuse_texture(mut self, path: impl Into<String>) -> Self {
        self.diffuse_texture = Some(path.into());
        self
    }

    pub fn with_normal_texture(mut self, path: impl Into<String>) -> Self {
        self.normal_texture = Some(path.into());
        self
    }

    pub fn with_metal_rough_texture(mut self, path: impl Into<String>) -> Self {
        self.metal_rough_texture = Some(path.into());
        self
    }

    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.roughness = roughness;
        self
    }

    pub fn with_metallic(mut self, metallic: f32) -> Self {
        self.metallic = metallic;
        self
    }
}

/// Material record in the arena's storage buffer (std430)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuMaterial {
    pub diffuse_color: [f32; 4],
    /// Texture array slots, -1 when the material has none
    pub texture_index: i32,
    pub normal_index: i32,
    pub metal_rough_index: i32,
    pub roughness: f32,
    pub metallic: f32,
    pub _padding: [f32; 3],
}

impl GpuMaterial {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    pub fn new(
        material: &MaterialData,
        texture: Option<usize>,
        normal: Option<usize>,
        metal_rough: Option<usize>,
    ) -> Self {
        let slot = |index: Option<usize>| index.map_or(-1, |i| i as i32);
        Self {
            diffuse_color: material.diffuse_color.to_array(),
            texture_index: slot(texture),
            normal_index: slot(normal),
            metal_rough_index: slot(metal_rough),
            roughness: material.roughness,
            metallic: material.metallic,
            _padding: [0.0; 3],
        }
    }
}

impl Default for GpuMaterial {
    fn default() -> Self {
        Self::new(&MaterialData::default(), None, None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_material_layout() {
        assert_eq!(GpuMaterial::SIZE, 48);
    }

    #[test]
    fn test_default_material_has_no_textures() {
        let material = GpuMaterial::default();
        assert_eq!(material.diffuse_color, [1.0; 4]);
        assert_eq!(material.texture_index, -1);
        assert_eq!(material.normal_index, -1);
        assert_eq!(material.metal_rough_index, -1);
        assert_eq!(material.roughness, 0.0);
    }

    #[test]
    fn test_texture_slots_are_recorded() {
        let data = MaterialData::default().with_roughness(0.7);
        let material = GpuMaterial::new(&data, Some(3), None, Some(0));
        assert_eq!(material.texture_index, 3);
        assert_eq!(material.normal_index, -1);
        assert_eq!(material.metal_rough_index, 0);
        assert_eq!(material.roughness, 0.7);
    }
}
