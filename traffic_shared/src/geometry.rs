//! Mesh geometry.
//!
//! Base meshes are immutable once built. Anything that poses them writes into
//! separate working buffers.

use std::fmt::Write as _;

use crate::math::{Axis, Vec3};

/// Triangle mesh with counter-clockwise winding.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Mesh {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<[u32; 3]>,
}

impl Mesh {
    pub fn new(vertices: Vec<Vec3>, indices: Vec<[u32; 3]>) -> Self {
        Self { vertices, indices }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    /// Axis-aligned box centred on the origin.
    pub fn cuboid(half_extents: Vec3) -> Self {
        let Vec3 { x, y, z } = half_extents;
        let vertices = vec![
            Vec3::new(-x, -y, -z),
            Vec3::new(x, -y, -z),
            Vec3::new(x, y, -z),
            Vec3::new(-x, y, -z),
            Vec3::new(-x, -y, z),
            Vec3::new(x, -y, z),
            Vec3::new(x, y, z),
            Vec3::new(-x, y, z),
        ];
        let indices = vec![
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [3, 6, 2],
            [3, 7, 6],
            [0, 4, 7],
            [0, 7, 3],
            [1, 2, 6],
            [1, 6, 5],
        ];
        Self { vertices, indices }
    }

    /// Procedural wheel: two n-gon faces at `x = ±width/2` joined by a tread.
    ///
    /// Vertex layout per face is the centre followed by `sides` rim points, so
    /// the mesh has `2 * (sides + 1)` vertices and `4 * sides` triangles.
    pub fn wheel(sides: u32, radius: f32, width: f32) -> Self {
        let n = sides.max(3);
        let mut vertices = Vec::with_capacity(2 * (n as usize + 1));
        for face_x in [width / 2.0, -width / 2.0] {
            vertices.push(Vec3::new(face_x, 0.0, 0.0));
            for j in 0..n {
                let angle = (360.0 / n as f32 * (j + 1) as f32).to_radians();
                vertices.push(Vec3::new(face_x, radius * angle.sin(), radius * angle.cos()));
            }
        }

        let mut indices = Vec::with_capacity(4 * n as usize);
        for i in 0..n {
            if i < n - 1 {
                indices.push([0, i + 2, i + 1]);
                indices.push([n + 1, n + 2 + i, n + 3 + i]);
                indices.push([1 + i, 2 + i, n + 2 + i]);
                indices.push([2 + i, n + 3 + i, n + 2 + i]);
            } else {
                indices.push([0, 1, 1 + i]);
                indices.push([n + 1, n + 2 + i, n + 2]);
                indices.push([1 + i, 1, n + 2 + i]);
                indices.push([1, n + 2, n + 2 + i]);
            }
        }
        Self { vertices, indices }
    }

    /// Unit normal of each triangle.
    pub fn face_normals(&self) -> Vec<Vec3> {
        self.indices
            .iter()
            .map(|&[a, b, c]| {
                let (a, b, c) = (
                    self.vertices[a as usize],
                    self.vertices[b as usize],
                    self.vertices[c as usize],
                );
                (b - a).cross(c - a).normalize_or_zero()
            })
            .collect()
    }

    /// Wavefront OBJ text with one normal per face (`f a//n b//n c//n`).
    pub fn to_obj(&self) -> String {
        let mut out = String::from("# Vertices:\n\n");
        for v in &self.vertices {
            let _ = writeln!(out, "v {:.4} {:.4} {:.4}", v.x, v.y, v.z);
        }
        out.push_str("\n# Normals:\n\n");
        for n in self.face_normals() {
            let _ = writeln!(out, "vn {:.4} {:.4} {:.4}", n.x, n.y, n.z);
        }
        out.push_str("\n# Faces:\n\n");
        for (i, [a, b, c]) in self.indices.iter().enumerate() {
            let n = i + 1;
            let _ = writeln!(out, "f {}//{n} {}//{n} {}//{n}", a + 1, b + 1, c + 1);
        }
        out
    }
}

/// Area-weighted vertex normals for `vertices` under the triangles of `indices`.
///
/// Vertices referenced by no triangle keep a zero normal.
pub fn compute_normals(vertices: &[Vec3], indices: &[[u32; 3]], out: &mut Vec<Vec3>) {
    out.clear();
    out.resize(vertices.len(), Vec3::ZERO);
    for &[a, b, c] in indices {
        let (a, b, c) = (a as usize, b as usize, c as usize);
        let n = (vertices[b] - vertices[a]).cross(vertices[c] - vertices[a]);
        out[a] += n;
        out[b] += n;
        out[c] += n;
    }
    for n in out.iter_mut() {
        *n = n.normalize_or_zero();
    }
}

/// A sub-mesh that spins about its own pivot while following the body.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticulatedPart {
    /// Offset from the body origin; the compositor uses `x` and `z`.
    pub pivot: Vec3,
    /// Radians per second.
    pub spin_rate: f32,
    pub mesh: Mesh,
}

/// Root mesh plus any number of articulated parts.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyGeometry {
    pub root: Mesh,
    pub parts: Vec<ArticulatedPart>,
    pub spin_axis: Axis,
}

/// Wheel pivots of the stock vehicle, front-left first.
pub const VEHICLE_WHEEL_PIVOTS: [Vec3; 4] = [
    Vec3::new(0.127, 0.065, 0.246),
    Vec3::new(-0.127, 0.065, 0.246),
    Vec3::new(0.127, 0.065, -0.246),
    Vec3::new(-0.127, 0.065, -0.246),
];

impl BodyGeometry {
    /// Four-wheeled vehicle: `root` chassis and a copy of `wheel` at each pivot.
    pub fn vehicle(root: Mesh, wheel: Mesh, spin_rate: f32, spin_axis: Axis) -> Self {
        let parts = VEHICLE_WHEEL_PIVOTS
            .iter()
            .map(|&pivot| ArticulatedPart {
                pivot,
                spin_rate,
                mesh: wheel.clone(),
            })
            .collect();
        Self {
            root,
            parts,
            spin_axis,
        }
    }

    /// Number of meshes, root included.
    pub fn mesh_count(&self) -> usize {
        1 + self.parts.len()
    }
}
