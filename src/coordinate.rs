//! Conversion from MMD space (left-handed, Y-up) to the target space (right-handed, Z-up).
//!
//! The position rule is a Y/Z swap, a reflection. Everything else here is
//! derived from it or fixed by how physics engines read the values.

use glam::{Mat3, Quat, Vec3};

/// The Y/Z swap as a matrix. Symmetric, self-inverse, determinant -1.
pub const SWAP_YZ: Mat3 = Mat3::from_cols(Vec3::X, Vec3::Z, Vec3::Y);

/// `(x, y, z) -> (x, z, y)`
#[inline]
pub fn convert_position(v: Vec3) -> Vec3 {
    Vec3::new(v.x, v.z, v.y)
}

/// same swap as positions, never scaled
#[inline]
pub fn convert_normal(n: Vec3) -> Vec3 {
    convert_position(n)
}

/// Euler angles of rigid bodies and joints: swap, then negate every component.
#[inline]
pub fn convert_rigid_rotation(r: Vec3) -> Vec3 {
    -convert_position(r)
}

/// Rotation limits of joints: swap and negate, which exchanges the bounds.
///
/// Returns `(-swap(max), -swap(min))`, so `min <= max` still holds per axis.
#[inline]
pub fn convert_joint_limits(min: Vec3, max: Vec3) -> (Vec3, Vec3) {
    (convert_rigid_rotation(max), convert_rigid_rotation(min))
}

/// `(a, b, c) -> (c, b, a)`
#[inline]
pub fn reverse_winding<T: Copy>(face: [T; 3]) -> [T; 3] {
    [face[2], face[1], face[0]]
}

/// A rotation `R` expressed in MMD space, as the rotation `S·R·S` in target space.
///
/// The axis of a rotation is a pseudovector, so under the reflection it maps to
/// `-S·axis` while the angle is kept: `(x, y, z, w) -> (-x, -z, -y, w)`.
#[inline]
pub fn convert_rotation_quaternion(q: Quat) -> Quat {
    Quat::from_xyzw(-q.x, -q.z, -q.y, q.w)
}
