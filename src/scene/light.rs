//! Scene lights

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Light in world space.
///
/// A homogeneous `w` of zero makes the light directional, with `xyz` pointing from the
/// scene toward the light. Any other `w` places a point light at `xyz`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub position: Vec4,
    pub color: Vec3,
    pub intensity: f32,
}

impl Light {
    pub fn directional(toward_light: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            position: toward_light.normalize_or_zero().extend(0.0),
            color,
            intensity,
        }
    }

    pub fn point(position: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            position: position.extend(1.0),
            color,
            intensity,
        }
    }

    pub fn is_directional(&self) -> bool {
        self.position.w == 0.0
    }

    /// Convert to GPU data format, moving the light into view space
    pub fn to_gpu_data(&self, view: Mat4) -> GpuLight {
        let view_position = view * self.position;
        GpuLight {
            position: view_position.truncate().extend(self.position.w),
            color: self.color.extend(self.intensity),
        }
    }
}

/// GPU-friendly light data structure
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuLight {
    /// xyz = view-space position or direction, w = kind
    pub position: Vec4,
    /// xyz = color, w = intensity
    pub color: Vec4,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directional_light_ignores_view_translation() {
        let view = Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0));
        let light = Light::directional(Vec3::Y, Vec3::ONE, 1.0);
        let gpu = light.to_gpu_data(view);
        assert_eq!(gpu.position, Vec4::new(0.0, 1.0, 0.0, 0.0));
        assert!(light.is_directional());
    }

    #[test]
    fn test_point_light_moves_into_view_space() {
        let view = Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0));
        let light = Light::point(Vec3::ONE, Vec3::X, 3.0);
        let gpu = light.to_gpu_data(view);
        assert_eq!(gpu.position, Vec4::new(6.0, 1.0, 1.0, 1.0));
        assert_eq!(gpu.color, Vec4::new(1.0, 0.0, 0.0, 3.0));
        assert_eq!(std::mem::size_of::<GpuLight>(), 32);
    }
}
