//! Imported mesh data and primitive generation

use crate::backend::types::Vertex;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// Per-vertex skinning influences.
///
/// Joint ids are stored as floats because the skinning shader reads the whole record
/// from one `array<f32>`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct SkinWeight {
    pub weights: [f32; 4],
    pub joints: [f32; 4],
}

impl SkinWeight {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    pub fn new(weights: [f32; 4], joints: [u32; 4]) -> Self {
        Self {
            weights,
            joints: joints.map(|j| j as f32),
        }
    }

    /// Full influence of a single joint
    pub fn single(joint: u32) -> Self {
        Self::new([1.0, 0.0, 0.0, 0.0], [joint, 0, 0, 0])
    }
}

/// Mesh as delivered by the importer, one attribute stream per array
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub tangents: Vec<Vec3>,
    pub bitangents: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
    pub indices: Vec<u32>,
    /// Index into the owning model's material list
    pub material_index: usize,
    /// One entry per vertex for skinned meshes, empty otherwise
    pub weights: Vec<SkinWeight>,
}

impl MeshData {
    pub fn new(positions: Vec<Vec3>, indices: Vec<u32>) -> Self {
        Self {
            positions,
            indices,
            ..Default::default()
        }
    }

    pub fn with_material(mut self, material_index: usize) -> Self {
        self.material_index = material_index;
        self
    }

    pub fn with_weights(mut self, weights: Vec<SkinWeight>) -> Self {
        self.weights = weights;
        self
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    /// Size of the interleaved vertex data in bytes
    pub fn vertices_size(&self) -> u64 {
        self.vertex_count() as u64 * Vertex::SIZE
    }

    pub fn indices_size(&self) -> u64 {
        self.index_count() as u64 * 4
    }

    pub fn weights_size(&self) -> u64 {
        self.weights.len() as u64 * SkinWeight::SIZE
    }

    /// Interleave the attribute streams. Missing attributes are zero-filled.
    pub fn interleave(&self) -> Vec<Vertex> {
        self.positions
            .iter()
            .enumerate()
            .map(|(i, &position)| Vertex {
                position,
                normal: self.normals.get(i).copied().unwrap_or_default(),
                tangent: self.tangents.get(i).copied().unwrap_or_default(),
                bitangent: self.bitangents.get(i).copied().unwrap_or_default(),
                uv: self.uvs.get(i).copied().unwrap_or_default(),
            })
            .collect()
    }

    /// Create a unit cube centered at origin
    pub fn cube() -> Self {
        let faces = [
            (Vec3::Z, Vec3::X),
            (-Vec3::Z, -Vec3::X),
            (Vec3::X, -Vec3::Z),
            (-Vec3::X, Vec3::Z),
            (Vec3::Y, Vec3::X),
            (-Vec3::Y, Vec3::X),
        ];

        let mut mesh = MeshData::default();
        for (face, (normal, tangent)) in faces.into_iter().enumerate() {
            let bitangent = normal.cross(tangent);
            let corners = [
                (-0.5, -0.5, Vec2::new(0.0, 1.0)),
                (0.5, -0.5, Vec2::new(1.0, 1.0)),
                (0.5, 0.5, Vec2::new(1.0, 0.0)),
                (-0.5, 0.5, Vec2::new(0.0, 0.0)),
            ];
            for (u, v, uv) in corners {
                mesh.positions.push(normal * 0.5 + tangent * u + bitangent * v);
                mesh.normals.push(normal);
                mesh.tangents.push(tangent);
                mesh.bitangents.push(bitangent);
                mesh.uvs.push(uv);
            }

            // Two triangles per face
            let base = face as u32 * 4;
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        mesh
    }

    /// Create a plane on the XZ axis
    pub fn plane(width: f32, depth: f32, subdivisions: u32) -> Self {
        let subdivisions = subdivisions.max(1);
        let mut mesh = MeshData::default();

        let half_width = width / 2.0;
        let half_depth = depth / 2.0;
        let step_x = width / subdivisions as f32;
        let step_z = depth / subdivisions as f32;

        for z in 0..=subdivisions {
            for x in 0..=subdivisions {
                let px = -half_width + x as f32 * step_x;
                let pz = -half_depth + z as f32 * step_z;

                mesh.positions.push(Vec3::new(px, 0.0, pz));
                mesh.normals.push(Vec3::Y);
                mesh.tangents.push(Vec3::X);
                mesh.bitangents.push(Vec3::Z);
                mesh.uvs
                    .push(Vec2::new(x as f32 / subdivisions as f32, z as f32 / subdivisions as f32));
            }
        }

        for z in 0..subdivisions {
            for x in 0..subdivisions {
                let current = z * (subdivisions + 1) + x;
                let next = current + subdivisions + 1;

                mesh.indices.extend_from_slice(&[
                    current,
                    next,
                    current + 1,
                    current + 1,
                    next,
                    next + 1,
                ]);
            }
        }

        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleave_zero_fills_missing_streams() {
        let mesh = MeshData::new(vec![Vec3::ONE, Vec3::X], vec![0, 1, 0]);
        let vertices = mesh.interleave();
        assert_eq!(vertices.len(), 2);
        assert_eq!(vertices[1].position, Vec3::X);
        assert_eq!(vertices[1].normal, Vec3::ZERO);
        assert_eq!(vertices[1].uv, Vec2::ZERO);
        assert_eq!(mesh.vertices_size(), 112);
    }

    #[test]
    fn test_cube_has_outward_normals() {
        let cube = MeshData::cube();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.index_count(), 36);
        for (position, normal) in cube.positions.iter().zip(&cube.normals) {
            assert!(position.dot(*normal) > 0.0);
        }
    }

    #[test]
    fn test_skin_weight_layout() {
        assert_eq!(SkinWeight::SIZE, 32);
        let weight = SkinWeight::single(7);
        assert_eq!(weight.joints[0], 7.0);
        assert_eq!(weight.weights.iter().sum::<f32>(), 1.0);
    }
}
