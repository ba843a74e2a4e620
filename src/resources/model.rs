//! Imported models and precomputed skeletal animations

use crate::error::{RendererError, RendererResult};
use crate::resources::{MaterialData, MeshData};
use glam::Mat4;

/// Joint matrices stored per animation frame
pub const MAX_JOINTS: usize = 150;

/// Bytes occupied by one frame of joint matrices
pub const JOINT_FRAME_SIZE: u64 = (MAX_JOINTS * std::mem::size_of::<Mat4>()) as u64;

/// Joint matrices of one animation frame, always `MAX_JOINTS` long
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationFrame {
    joints: Vec<Mat4>,
}

impl AnimationFrame {
    /// Frame from the matrices of the first joints; the rest stay identity
    pub fn new(joints: &[Mat4]) -> Self {
        if joints.len() > MAX_JOINTS {
            log::warn!(
                "animation frame has {} joints, dropping those past {}",
                joints.len(),
                MAX_JOINTS
            );
        }
        let mut frame = Self::identity();
        for (slot, matrix) in frame.joints.iter_mut().zip(joints) {
            *slot = *matrix;
        }
        frame
    }

    /// Frame that only moves the listed joints
    pub fn from_targeted(targets: &[(usize, Mat4)]) -> Self {
        let mut frame = Self::identity();
        for &(joint, matrix) in targets {
            if let Some(slot) = frame.joints.get_mut(joint) {
                *slot = matrix;
            }
        }
        frame
    }

    pub fn identity() -> Self {
        Self {
            joints: vec![Mat4::IDENTITY; MAX_JOINTS],
        }
    }

    pub fn joint_matrices(&self) -> &[Mat4] {
        &self.joints
    }
}

/// Animation sampled ahead of time into fixed frames
#[derive(Debug, Clone, PartialEq)]
pub struct PrecomputedAnimation {
    pub name: String,
    /// Duration in seconds
    pub duration: f64,
    pub frames: Vec<AnimationFrame>,
}

impl PrecomputedAnimation {
    pub fn new(name: impl Into<String>, duration: f64, frames: Vec<AnimationFrame>) -> Self {
        Self {
            name: name.into(),
            duration,
            frames,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Joint matrices of frame `index`, `None` past the last frame
    pub fn frame(&self, index: usize) -> Option<&[Mat4]> {
        self.frames.get(index).map(|f| f.joint_matrices())
    }

    /// Bytes this animation occupies in the joint-matrix buffer
    pub fn joint_data_size(&self) -> u64 {
        self.frames.len() as u64 * JOINT_FRAME_SIZE
    }
}

/// Immutable imported asset
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub id: String,
    pub meshes: Vec<MeshData>,
    pub materials: Vec<MaterialData>,
    pub animations: Vec<PrecomputedAnimation>,
}

impl Model {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_mesh(mut self, mesh: MeshData) -> Self {
        self.meshes.push(mesh);
        self
    }

    pub fn with_material(mut self, material: MaterialData) -> Self {
        self.materials.push(material);
        self
    }

    pub fn with_animation(mut self, animation: PrecomputedAnimation) -> Self {
        self.animations.push(animation);
        self
    }

    pub fn has_animations(&self) -> bool {
        !self.animations.is_empty()
    }

    /// Check the invariants the arena relies on when laying out GPU data
    pub fn validate(&self) -> RendererResult<()> {
        for (i, mesh) in self.meshes.iter().enumerate() {
            let vertex_count = mesh.vertex_count() as u32;
            if let Some(&index) = mesh.indices.iter().find(|&&index| index >= vertex_count) {
                return Err(RendererError::InvalidModel(format!(
                    "{}: mesh {} references vertex {} of {}",
                    self.id, i, index, vertex_count
                )));
            }
            if self.has_animations() && mesh.weights.len() != mesh.vertex_count() {
                return Err(RendererError::InvalidModel(format!(
                    "{}: animated mesh {} has {} skin weights for {} vertices",
                    self.id,
                    i,
                    mesh.weights.len(),
                    mesh.vertex_count()
                )));
            }
            if !self.has_animations() {
                continue;
            }
            let joint_range = 0.0..MAX_JOINTS as f32;
            for (v, weight) in mesh.weights.iter().enumerate() {
                if let Some(&joint) = weight.joints.iter().find(|j| !joint_range.contains(*j)) {
                    return Err(RendererError::InvalidModel(format!(
                        "{}: mesh {} vertex {} is bound to joint {} of {}",
                        self.id, i, v, joint, MAX_JOINTS
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::SkinWeight;
    use glam::Vec3;

    fn triangle() -> MeshData {
        MeshData::new(vec![Vec3::ZERO, Vec3::X, Vec3::Y], vec![0, 1, 2])
    }

    #[test]
    fn test_frame_pads_untargeted_joints_with_identity() {
        let moved = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let animation = PrecomputedAnimation::new(
            "wave",
            1.0,
            vec![
                AnimationFrame::from_targeted(&[(4, moved)]),
                AnimationFrame::new(&[moved, moved]),
            ],
        );

        for f in 0..animation.frame_count() {
            let joints = animation.frame(f).unwrap();
            assert_eq!(joints.len(), MAX_JOINTS);
            assert!(joints[10..].iter().all(|m| *m == Mat4::IDENTITY));
        }
        assert_eq!(animation.frame(0).unwrap()[4], moved);
        assert_eq!(animation.frame(1).unwrap()[1], moved);
        assert!(animation.frame(2).is_none());
    }

    #[test]
    fn test_joint_frame_size() {
        assert_eq!(JOINT_FRAME_SIZE, 9600);
    }

    #[test]
    fn test_animated_mesh_requires_weights() {
        let animation = PrecomputedAnimation::new("idle", 1.0, vec![AnimationFrame::identity()]);
        let model = Model::new("rig")
            .with_mesh(triangle())
            .with_animation(animation.clone());
        assert!(matches!(model.validate(), Err(RendererError::InvalidModel(_))));

        let model = Model::new("rig")
            .with_mesh(triangle().with_weights(vec![SkinWeight::single(0); 3]))
            .with_animation(animation);
        assert!(model.validate().is_ok());
    }

    #[test]
    fn test_joint_past_max_joints_rejected() {
        let animation = PrecomputedAnimation::new("idle", 1.0, vec![AnimationFrame::identity()]);
        let last = MAX_JOINTS as u32 - 1;
        let weights = vec![
            SkinWeight::single(0),
            SkinWeight::single(last),
            SkinWeight::new([0.5, 0.5, 0.0, 0.0], [2, last + 1, 0, 0]),
        ];
        let model = Model::new("rig")
            .with_mesh(triangle().with_weights(weights.clone()))
            .with_animation(animation.clone());
        assert!(matches!(model.validate(), Err(RendererError::InvalidModel(_))));

        let mut in_range = weights;
        in_range[2] = SkinWeight::single(last);
        let model = Model::new("rig")
            .with_mesh(triangle().with_weights(in_range))
            .with_animation(animation);
        assert!(model.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_index_rejected() {
        let model = Model::new("broken").with_mesh(MeshData::new(vec![Vec3::ZERO], vec![0, 1, 0]));
        assert!(model.validate().is_err());
    }
}
