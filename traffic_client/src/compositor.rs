//! Transform compositor.
//!
//! Poses a body (root mesh plus articulated parts) from displacement, facing
//! and elapsed time. Every frame starts again from the immutable base meshes,
//! so a pose never depends on previous frames.
//!
//! Composite transforms, with `p` a part's pivot in the ground plane:
//!
//! ```text
//! root   = T(d) · R_up(facing) · S(s)
//! part_k = T(d) · T(-p.x, 0, -p.z) · R_up(facing) · T(p.x, 0, p.z) · R_spin(rate_k · t)
//! ```
//!
//! `part_k` is relative to the part's mount point: a wheel hangs off the body
//! at `p`, so its world-space vertices are `T(p) · part_k · v`. With that
//! offset the hub lands at `d + (0, p.y, 0) + R_up(facing) · (p.x, 0, p.z)`.

use std::sync::Arc;

use traffic_shared::{
    geometry::{compute_normals, ArticulatedPart, BodyGeometry, Mesh},
    math::{Axis, Mat4, Vec3},
};

/// Degrees subtracted from the motion heading so the mesh's authored
/// forward axis (+Z) lines up with the direction of travel.
pub const FACING_OFFSET_DEG: f32 = 90.0;

/// Facing angle about the up axis for a motion direction.
pub fn facing_angle(direction: Vec3) -> f32 {
    direction.heading_deg() - FACING_OFFSET_DEG
}

/// Everything a frame's transforms are derived from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub displacement: Vec3,
    pub facing_deg: f32,
    /// Seconds since start; drives part spin.
    pub elapsed: f32,
}

impl Pose {
    pub fn new(displacement: Vec3, direction: Vec3, elapsed: f32) -> Self {
        Self {
            displacement,
            facing_deg: facing_angle(direction),
            elapsed,
        }
    }
}

/// Working buffers for one posed mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PosedMesh {
    pub vertices: Vec<Vec3>,
    pub normals: Vec<Vec3>,
}

/// Working buffers for a whole body; index 0 is the root.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PosedBody {
    pub meshes: Vec<PosedMesh>,
}

/// Shared base geometry plus the root scale.
#[derive(Debug, Clone)]
pub struct Compositor {
    geometry: Arc<BodyGeometry>,
    scale: f32,
}

impl Compositor {
    pub fn new(geometry: Arc<BodyGeometry>, scale: f32) -> Self {
        Self { geometry, scale }
    }

    pub fn geometry(&self) -> &BodyGeometry {
        &self.geometry
    }

    /// Buffers sized for this compositor's geometry.
    pub fn new_body(&self) -> PosedBody {
        let mut meshes = Vec::with_capacity(self.geometry.mesh_count());
        meshes.push(PosedMesh::sized(&self.geometry.root));
        meshes.extend(self.geometry.parts.iter().map(|p| PosedMesh::sized(&p.mesh)));
        PosedBody { meshes }
    }

    pub fn root_transform(&self, pose: &Pose) -> Mat4 {
        Mat4::translation(pose.displacement)
            * Mat4::rotation(pose.facing_deg, Axis::Y)
            * Mat4::uniform_scale(self.scale)
    }

    pub fn part_transform(&self, pose: &Pose, part: &ArticulatedPart) -> Mat4 {
        let pivot = Vec3::new(part.pivot.x, 0.0, part.pivot.z);
        let spin_deg = (part.spin_rate * pose.elapsed).to_degrees();
        Mat4::translation(pose.displacement)
            * Mat4::translation(-pivot)
            * Mat4::rotation(pose.facing_deg, Axis::Y)
            * Mat4::translation(pivot)
            * Mat4::rotation(spin_deg, self.geometry.spin_axis)
    }

    /// `part_transform` followed by the part's mount offset; maps base part
    /// vertices to world space.
    pub fn part_world_transform(&self, pose: &Pose, part: &ArticulatedPart) -> Mat4 {
        Mat4::translation(part.pivot) * self.part_transform(pose, part)
    }

    /// Rewrites every buffer in `body` from the base meshes, in world space.
    pub fn compose(&self, pose: &Pose, body: &mut PosedBody) {
        body.meshes
            .resize_with(self.geometry.mesh_count(), PosedMesh::default);

        let (root, parts) = body.meshes.split_at_mut(1);
        apply(&self.root_transform(pose), &self.geometry.root, &mut root[0]);
        for (part, out) in self.geometry.parts.iter().zip(parts.iter_mut()) {
            apply(&self.part_world_transform(pose, part), &part.mesh, out);
        }
    }
}

impl PosedMesh {
    fn sized(base: &Mesh) -> Self {
        Self {
            vertices: base.vertices.clone(),
            normals: vec![Vec3::ZERO; base.vertices.len()],
        }
    }
}

fn apply(transform: &Mat4, base: &Mesh, out: &mut PosedMesh) {
    out.vertices.clear();
    out.vertices
        .extend(base.vertices.iter().map(|&v| transform.transform_point(v)));
    compute_normals(&out.vertices, &base.indices, &mut out.normals);
}
