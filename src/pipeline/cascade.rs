//! Cascaded shadow map fitting
//!
//! The camera frustum is cut into slices along the view direction, and each slice is
//! enclosed by a light-space orthographic box. Near slices are small, so they get more
//! shadow-map texels per world unit.

use crate::scene::{Camera, Scene};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Toward-light direction used when the scene has no directional light
pub const DEFAULT_LIGHT_DIRECTION: Vec3 = Vec3::Y;

/// One cascade as the shaders read it
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuCascade {
    pub proj_view: Mat4,
    /// x = far split distance in view space, positive
    pub split: Vec4,
}

impl GpuCascade {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeShadow {
    pub proj_view: Mat4,
    /// Distance from the camera where this cascade ends
    pub split_distance: f32,
}

impl CascadeShadow {
    pub fn to_gpu(&self) -> GpuCascade {
        GpuCascade {
            proj_view: self.proj_view,
            split: Vec4::new(self.split_distance, 0.0, 0.0, 0.0),
        }
    }
}

/// Far distance of every cascade.
///
/// Blends a logarithmic and a uniform split scheme by `lambda`. The result is strictly
/// increasing and the last entry is `far`.
pub fn split_distances(near: f32, far: f32, count: u32, lambda: f32) -> Vec<f32> {
    let range = far - near;
    let ratio = far / near;

    (0..count)
        .map(|i| {
            if i + 1 == count {
                return far;
            }
            let p = (i + 1) as f32 / count as f32;
            let log = near * ratio.powf(p);
            let uniform = near + range * p;
            let d = lambda * (log - uniform) + uniform;
            near + range * ((d - near) / range)
        })
        .collect()
}

/// Fit one orthographic light volume around each slice of the camera frustum
pub fn compute_cascades(camera: &Camera, toward_light: Vec3, count: u32, lambda: f32) -> Vec<CascadeShadow> {
    let near = camera.projection.near;
    let far = camera.projection.far;
    let range = far - near;
    let inverse = (camera.projection_matrix() * camera.view_matrix()).inverse();

    let ndc_corners = [
        Vec3::new(-1.0, 1.0, 0.0),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(1.0, -1.0, 0.0),
        Vec3::new(-1.0, -1.0, 0.0),
        Vec3::new(-1.0, 1.0, 1.0),
        Vec3::new(1.0, 1.0, 1.0),
        Vec3::new(1.0, -1.0, 1.0),
        Vec3::new(-1.0, -1.0, 1.0),
    ];
    let world_corners = ndc_corners.map(|c| inverse.project_point3(c));

    let light_dir = toward_light.try_normalize().unwrap_or(DEFAULT_LIGHT_DIRECTION);
    let up = if light_dir.dot(Vec3::Y).abs() > 0.99 {
        Vec3::Z
    } else {
        Vec3::Y
    };

    let mut last_split = 0.0;
    split_distances(near, far, count, lambda)
        .into_iter()
        .map(|split_distance| {
            let split = (split_distance - near) / range;

            let mut corners = world_corners;
            for j in 0..4 {
                let ray = world_corners[j + 4] - world_corners[j];
                corners[j + 4] = world_corners[j] + ray * split;
                corners[j] = world_corners[j] + ray * last_split;
            }
            last_split = split;

            let center = corners.iter().copied().sum::<Vec3>() / corners.len() as f32;
            let radius = corners
                .iter()
                .map(|c| c.distance(center))
                .fold(0.0f32, f32::max);
            let radius = (radius * 16.0).ceil() / 16.0;

            let light_view = Mat4::look_at_rh(center + light_dir * radius, center, up);
            let light_proj = Mat4::orthographic_rh(-radius, radius, -radius, radius, 0.0, 2.0 * radius);

            CascadeShadow {
                proj_view: light_proj * light_view,
                split_distance,
            }
        })
        .collect()
}

/// Cascades that are only refit when the camera or the lights changed
#[derive(Debug)]
pub struct ShadowCascades {
    count: u32,
    lambda: f32,
    cascades: Vec<CascadeShadow>,
}

impl ShadowCascades {
    pub fn new(count: u32, lambda: f32) -> Self {
        Self {
            count,
            lambda,
            cascades: Vec::new(),
        }
    }

    pub fn cascades(&self) -> &[CascadeShadow] {
        &self.cascades
    }

    /// Refit when the scene says so, or when nothing was fitted yet. Returns whether the
    /// cascades were recomputed.
    pub fn update(&mut self, scene: &Scene) -> bool {
        let dirty = scene.camera_moved() || scene.light_changed() || self.cascades.is_empty();
        if dirty {
            self.refit(scene);
        }
        dirty
    }

    /// Refit unconditionally, e.g. after the projection changed with a resize
    pub fn refit(&mut self, scene: &Scene) {
        let toward_light = scene
            .shadow_light()
            .map_or(DEFAULT_LIGHT_DIRECTION, |light| light.position.truncate());
        self.cascades = compute_cascades(scene.camera(), toward_light, self.count, self.lambda);
        log::trace!("refit {} shadow cascades", self.cascades.len());
    }

    pub fn gpu_data(&self) -> Vec<GpuCascade> {
        self.cascades.iter().map(CascadeShadow::to_gpu).collect()
    }
}
