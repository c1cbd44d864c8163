//! Math types.
//!
//! This module intentionally stays small and deterministic.
//! It avoids SIMD/unsafe and focuses on stable semantics.
//!
//! Conventions (fixed, the compositor depends on them):
//! - `Mat4` is column-major: `m[column][row]`.
//! - Points are column vectors; `a * b` applies `b` first.
//! - Angles passed to rotation constructors are in degrees.
//! - About X, positive angles turn +Y toward +Z; about Y, +X toward +Z;
//!   about Z, +X toward +Y.

use std::ops::{Add, AddAssign, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

/// 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Canonical forward direction given to freshly tracked entities.
    pub const FORWARD: Self = Self {
        x: 1.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn cross(self, rhs: Self) -> Self {
        Self::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }

    pub fn len_sq(self) -> f32 {
        self.dot(self)
    }

    pub fn len(self) -> f32 {
        self.len_sq().sqrt()
    }

    /// Exact zero test, no epsilon.
    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }

    /// Unit vector, or zero when the length is zero.
    pub fn normalize_or_zero(self) -> Self {
        let len = self.len();
        if len > 0.0 {
            self * (1.0 / len)
        } else {
            Self::ZERO
        }
    }

    /// Linear interpolation with `t` clamped to $[0,1]$.
    pub fn lerp(self, to: Self, t: f32) -> Self {
        self.lerp_unclamped(to, t.clamp(0.0, 1.0))
    }

    /// Linear interpolation that extrapolates when `t` leaves $[0,1]$.
    ///
    /// Weighted form so `t = 0` and `t = 1` return the endpoints exactly.
    pub fn lerp_unclamped(self, to: Self, t: f32) -> Self {
        let s = 1.0 - t;
        Self::new(
            self.x * s + to.x * t,
            self.y * s + to.y * t,
            self.z * s + to.z * t,
        )
    }

    /// Heading in the ground plane, `atan2(z, x)` in degrees.
    pub fn heading_deg(self) -> f32 {
        self.z.atan2(self.x).to_degrees()
    }
}

impl Add for Vec3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Vec3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Neg for Vec3 {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Principal axis for rotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    #[default]
    X,
    Y,
    Z,
}

/// 4x4 matrix (column-major).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mat4 {
    pub m: [[f32; 4]; 4],
}

impl Default for Mat4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mat4 {
    pub const IDENTITY: Self = Self {
        m: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    pub fn translation(t: Vec3) -> Self {
        let mut out = Self::IDENTITY;
        out.m[3] = [t.x, t.y, t.z, 1.0];
        out
    }

    pub fn scale(s: Vec3) -> Self {
        let mut out = Self::IDENTITY;
        out.m[0][0] = s.x;
        out.m[1][1] = s.y;
        out.m[2][2] = s.z;
        out
    }

    pub fn uniform_scale(s: f32) -> Self {
        Self::scale(Vec3::new(s, s, s))
    }

    /// Rotation by `angle_deg` about a principal axis.
    pub fn rotation(angle_deg: f32, axis: Axis) -> Self {
        let (s, c) = angle_deg.to_radians().sin_cos();
        let mut out = Self::IDENTITY;
        match axis {
            Axis::X => {
                out.m[1] = [0.0, c, s, 0.0];
                out.m[2] = [0.0, -s, c, 0.0];
            }
            Axis::Y => {
                out.m[0] = [c, 0.0, s, 0.0];
                out.m[2] = [-s, 0.0, c, 0.0];
            }
            Axis::Z => {
                out.m[0] = [c, s, 0.0, 0.0];
                out.m[1] = [-s, c, 0.0, 0.0];
            }
        }
        out
    }

    /// Applies the matrix to a point (w = 1).
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        let m = &self.m;
        Vec3::new(
            m[0][0] * p.x + m[1][0] * p.y + m[2][0] * p.z + m[3][0],
            m[0][1] * p.x + m[1][1] * p.y + m[2][1] * p.z + m[3][1],
            m[0][2] * p.x + m[1][2] * p.y + m[2][2] * p.z + m[3][2],
        )
    }
}

impl Mul for Mat4 {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        let mut out = [[0.0f32; 4]; 4];
        for (col, out_col) in out.iter_mut().enumerate() {
            for (row, cell) in out_col.iter_mut().enumerate() {
                *cell = (0..4).map(|k| self.m[k][row] * rhs.m[col][k]).sum();
            }
        }
        Self { m: out }
    }
}
