//! CPU-side mesh storage and procedural primitives.

use crate::backend::Vertex;
use glam::{Vec2, Vec3, Vec4};

/// Vertex and index data for one mesh, kept on the CPU until a backend
/// uploads it.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub name: String,
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            name: name.to_string(),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Vertex data reinterpreted as bytes for buffer upload.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Index data reinterpreted as bytes for buffer upload.
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Unit cube centered at the origin, four vertices per face so the
    /// normals stay hard.
    pub fn cube() -> Self {
        // (outward normal, texture U axis, texture V axis); U x V faces out,
        // which keeps the winding counter-clockwise from outside.
        const FACES: [(Vec3, Vec3, Vec3); 6] = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        ];

        let mut mesh = Mesh::new("cube");
        for (normal, u_axis, v_axis) in FACES {
            let base = mesh.vertices.len() as u32;
            for (su, sv) in [(-1.0f32, -1.0f32), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                mesh.vertices.push(Vertex {
                    position: normal * 0.5 + u_axis * (0.5 * su) + v_axis * (0.5 * sv),
                    normal,
                    uv: Vec2::new((su + 1.0) * 0.5, (1.0 - sv) * 0.5),
                    tangent: u_axis.extend(1.0),
                });
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        mesh
    }

    /// UV sphere of radius 0.5 with `segments` steps around the equator and
    /// `rings` steps from pole to pole.
    pub fn uv_sphere(segments: u32, rings: u32) -> Self {
        let mut mesh = Mesh::new("sphere");

        for ring in 0..=rings {
            let phi = ring as f32 / rings as f32 * std::f32::consts::PI;
            let (sin_phi, cos_phi) = phi.sin_cos();

            for segment in 0..=segments {
                let theta = segment as f32 / segments as f32 * std::f32::consts::TAU;
                let (sin_theta, cos_theta) = theta.sin_cos();

                let radial = Vec3::new(sin_phi * cos_theta, cos_phi, sin_phi * sin_theta);
                mesh.vertices.push(Vertex {
                    position: radial * 0.5,
                    normal: radial.normalize_or_zero(),
                    uv: Vec2::new(
                        segment as f32 / segments as f32,
                        ring as f32 / rings as f32,
                    ),
                    // Tangent follows increasing theta.
                    tangent: Vec3::new(-sin_theta, 0.0, cos_theta).extend(1.0),
                });
            }
        }

        grid_indices(&mut mesh.indices, rings, segments);
        mesh
    }

    /// Flat plane in the XZ axes centered at the origin, `subdivisions`
    /// cells per side.
    pub fn plane(width: f32, depth: f32, subdivisions: u32) -> Self {
        let mut mesh = Mesh::new("plane");

        for row in 0..=subdivisions {
            let v = row as f32 / subdivisions as f32;
            for col in 0..=subdivisions {
                let u = col as f32 / subdivisions as f32;
                mesh.vertices.push(Vertex {
                    position: Vec3::new((u - 0.5) * width, 0.0, (v - 0.5) * depth),
                    normal: Vec3::Y,
                    uv: Vec2::new(u, v),
                    tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
                });
            }
        }

        grid_indices(&mut mesh.indices, subdivisions, subdivisions);
        mesh
    }
}

/// Two CCW triangles per cell of a row-major vertex grid that has `cols + 1`
/// vertices per row.
fn grid_indices(indices: &mut Vec<u32>, rows: u32, cols: u32) {
    for row in 0..rows {
        for col in 0..cols {
            let here = row * (cols + 1) + col;
            let below = here + cols + 1;
            indices.extend_from_slice(&[here, below, here + 1, here + 1, below, below + 1]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_indices_in_range(mesh: &Mesh) {
        let count = mesh.vertex_count() as u32;
        for &index in &mesh.indices {
            assert!(index < count, "index {} out of range {}", index, count);
        }
    }

    #[test]
    fn test_cube_has_24_vertices_and_12_triangles() {
        let cube = Mesh::cube();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.triangle_count(), 12);
        assert_indices_in_range(&cube);
        assert_eq!(cube.vertex_bytes().len(), 24 * std::mem::size_of::<Vertex>());
    }

    #[test]
    fn test_cube_normals_point_away_from_center() {
        let cube = Mesh::cube();
        for vertex in &cube.vertices {
            assert!(vertex.position.dot(vertex.normal) > 0.0);
        }
    }

    #[test]
    fn test_uv_sphere_counts_follow_segments_and_rings() {
        let sphere = Mesh::uv_sphere(16, 12);
        assert_eq!(sphere.vertex_count(), 17 * 13);
        assert_eq!(sphere.triangle_count(), (16 * 12 * 2) as usize);
        assert_indices_in_range(&sphere);
    }

    #[test]
    fn test_sphere_positions_lie_on_half_unit_radius() {
        let sphere = Mesh::uv_sphere(8, 8);
        for vertex in &sphere.vertices {
            assert!((vertex.position.length() - 0.5).abs() < 1e-5);
        }
    }

    #[test]
    fn test_plane_is_flat_and_indexed() {
        let plane = Mesh::plane(10.0, 10.0, 4);
        assert_eq!(plane.vertex_count(), 25);
        assert_eq!(plane.triangle_count(), 32);
        assert_indices_in_range(&plane);
        for vertex in &plane.vertices {
            assert_eq!(vertex.position.y, 0.0);
            assert_eq!(vertex.normal, Vec3::Y);
        }
    }
}
