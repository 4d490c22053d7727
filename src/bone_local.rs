//! Motion keyframes from MMD bone space into target bone-local space.
//!
//! MMD keyframes rotate about the world-aligned axes at the bone. A target bone
//! has its own rest frame `R` (bone to armature), so a keyframe becomes
//! `Rᵀ·S·Q·S·R` for rotations and `Rᵀ·S·t` for translations, `S` being the Y/Z swap.
//!
//! `M = -(Rᵀ·S)` is a proper rotation whose conjugation gives exactly that
//! rotation. [`bone_local_conversion_matrix`] snaps it to a signed axis
//! permutation; [`BoneConverter::exact`] keeps it as is.

use crate::config::PERMUTATION_SNAP_TOLERANCE;
use crate::coordinate::SWAP_YZ;
use crate::error::GeometryError;
use crate::interpolation::{BezierCurve, BoneChannel};
use crate::motion::BoneKeyframe;
use crate::types::AngleLimits;
use glam::{Mat3, Mat4, Quat, Vec3};

/// Rest pose of a target armature.
pub trait RestPose {
    fn bone_count(&self) -> usize;
    /// rest frame of `bone` in armature space
    fn bone_matrix(&self, bone: usize) -> Option<Mat4>;
    /// rest frame of `bone` relative to its parent, the bone matrix for roots
    fn local_to_parent(&self, bone: usize) -> Option<Mat4>;
}

/// A snapped conversion operator.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BoneLocalConversion {
    /// signed axis permutation with determinant +1
    pub matrix: Mat3,
    /// largest entry moved by the snap
    pub deviation: f32,
}

impl BoneLocalConversion {
    /// The reflection translations go through, `Rᵀ·S`.
    pub fn translation_matrix(&self) -> Mat3 {
        -self.matrix
    }

    pub fn rotation(&self) -> Quat {
        Quat::from_mat3(&self.matrix)
    }
}

/// Builds the snapped operator for a bone with rest frame `rest` (bone to armature).
///
/// Negates the rotation part, swaps its Y and Z rows, transposes, then snaps
/// to the nearest signed permutation. Fails when an entry has to move by more
/// than [`PERMUTATION_SNAP_TOLERANCE`].
pub fn bone_local_conversion_matrix(rest: Mat4) -> Result<BoneLocalConversion, GeometryError> {
    let exact = negated_operator(Mat3::from_mat4(rest));
    let matrix = snap_to_permutation(exact);
    let deviation = max_deviation(exact, matrix);
    if deviation > PERMUTATION_SNAP_TOLERANCE {
        return Err(GeometryError {
            deviation,
            tolerance: PERMUTATION_SNAP_TOLERANCE,
        });
    }
    Ok(BoneLocalConversion { matrix, deviation })
}

/// `-(S·R)ᵀ`, the swap of rows Y and Z being `S·R`
fn negated_operator(rest: Mat3) -> Mat3 {
    -(SWAP_YZ * rest).transpose()
}

/// Greedy: repeatedly take the largest |entry| among unused rows and columns.
fn snap_to_permutation(m: Mat3) -> Mat3 {
    let mut rows = vec![0_usize, 1, 2];
    let mut cols = vec![0_usize, 1, 2];
    let mut snapped = Mat3::ZERO;
    for _ in 0..3 {
        let (mut best_row, mut best_col) = (rows[0], cols[0]);
        for &row in &rows {
            for &col in &cols {
                if entry(m, row, col).abs() > entry(m, best_row, best_col).abs() {
                    best_row = row;
                    best_col = col;
                }
            }
        }
        rows.retain(|&r| r != best_row);
        cols.retain(|&c| c != best_col);
        let sign = if entry(m, best_row, best_col) < 0.0 {
            -1.0
        } else {
            1.0
        };
        snapped.col_mut(best_col)[best_row] = sign;
    }
    snapped
}

fn entry(m: Mat3, row: usize, col: usize) -> f32 {
    m.col(col)[row]
}

fn max_deviation(a: Mat3, b: Mat3) -> f32 {
    (a - b)
        .to_cols_array()
        .iter()
        .fold(0.0_f32, |max, d| max.max(d.abs()))
}

/// A keyframe in target bone-local space.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BoneLocalKeyframe {
    pub frame: u32,
    pub location: Vec3,
    pub rotation: Quat,
    /// curves of the target X, Y and Z location channels
    pub location_curves: [BezierCurve; 3],
    pub rotation_curve: BezierCurve,
}

/// Converts one keyframe with a snapped operator; `scale` applies to the location.
pub fn apply_bone_local(
    conversion: &BoneLocalConversion,
    keyframe: &BoneKeyframe,
    scale: f32,
) -> BoneLocalKeyframe {
    BoneConverter::from_conversion(conversion, scale).convert_keyframe(keyframe)
}

/// Per-bone keyframe converter.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BoneConverter {
    /// `Rᵀ·S`
    matrix: Mat3,
    rotation: Quat,
    scale: f32,
    axis_map: InterpolationAxisMap,
}

impl BoneConverter {
    /// Unsnapped operator, for bones whose rest frame is not axis aligned.
    pub fn exact(rest: Mat4, scale: f32) -> Self {
        let negated = negated_operator(Mat3::from_mat4(rest));
        Self {
            matrix: -negated,
            rotation: Quat::from_mat3(&negated).normalize(),
            scale,
            axis_map: InterpolationAxisMap::new(negated),
        }
    }

    /// Snapped operator, failing like [`bone_local_conversion_matrix`].
    pub fn snapped(rest: Mat4, scale: f32) -> Result<Self, GeometryError> {
        Ok(Self::from_conversion(
            &bone_local_conversion_matrix(rest)?,
            scale,
        ))
    }

    pub fn from_conversion(conversion: &BoneLocalConversion, scale: f32) -> Self {
        Self {
            matrix: conversion.translation_matrix(),
            rotation: conversion.rotation(),
            scale,
            axis_map: InterpolationAxisMap::new(conversion.matrix),
        }
    }

    /// Snapped converter for `bone` of `pose`, `None` for an unknown bone.
    pub fn for_bone<P: RestPose + ?Sized>(
        pose: &P,
        bone: usize,
        scale: f32,
    ) -> Option<Result<Self, GeometryError>> {
        pose.bone_matrix(bone).map(|rest| Self::snapped(rest, scale))
    }

    pub fn axis_map(&self) -> InterpolationAxisMap {
        self.axis_map
    }

    pub fn convert_location(&self, location: Vec3) -> Vec3 {
        self.matrix * location * self.scale
    }

    /// `M·q·M⁻¹`, normalized. A zero quaternion is read as the identity.
    pub fn convert_rotation(&self, rotation: Quat) -> Quat {
        let rotation = if rotation.length_squared() == 0.0 {
            Quat::IDENTITY
        } else {
            rotation
        };
        (self.rotation * rotation * self.rotation.conjugate()).normalize()
    }

    pub fn convert_keyframe(&self, keyframe: &BoneKeyframe) -> BoneLocalKeyframe {
        let curves = keyframe.curves();
        BoneLocalKeyframe {
            frame: keyframe.frame,
            location: self.convert_location(keyframe.position),
            rotation: self.convert_rotation(keyframe.rotation),
            location_curves: self
                .axis_map
                .channels()
                .map(|channel| *curves.channel(channel)),
            rotation_curve: curves.rotation,
        }
    }

    /// Converts a bone's keyframes in frame order with continuous quaternion signs.
    pub fn convert_track<'a, I>(&self, keyframes: I) -> Vec<BoneLocalKeyframe>
    where
        I: IntoIterator<Item = &'a BoneKeyframe>,
    {
        let mut keyframes: Vec<&BoneKeyframe> = keyframes.into_iter().collect();
        keyframes.sort_by_key(|k| k.frame);
        let mut converted: Vec<BoneLocalKeyframe> = keyframes
            .into_iter()
            .map(|k| self.convert_keyframe(k))
            .collect();
        let mut rotations: Vec<Quat> = converted.iter().map(|k| k.rotation).collect();
        make_quaternions_continuous(&mut rotations);
        for (keyframe, rotation) in converted.iter_mut().zip(rotations) {
            keyframe.rotation = rotation;
        }
        converted
    }

    /// IK limits of a bone as stored on [`IkLink`](crate::types::IkLink),
    /// in this bone's local frame.
    pub fn convert_ik_limits(&self, limits: AngleLimits) -> AngleLimits {
        convert_ik_limits(&Mat3::from_quat(self.rotation), limits)
    }
}

/// Maps stored IK limits through a conversion and re-orders each axis so
/// `lower <= upper`.
///
/// The stored limits have Y and Z swapped already, which `matrix` expects
/// unswapped, so the swap is applied again first.
pub fn convert_ik_limits(matrix: &Mat3, limits: AngleLimits) -> AngleLimits {
    let a = *matrix * (SWAP_YZ * limits.lower);
    let b = *matrix * (SWAP_YZ * limits.upper);
    AngleLimits {
        lower: a.min(b),
        upper: a.max(b),
    }
}

/// Which source interpolation channel drives each target location axis.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct InterpolationAxisMap {
    indices: [usize; 3],
}

impl Default for InterpolationAxisMap {
    fn default() -> Self {
        Self { indices: [0, 1, 2] }
    }
}

impl InterpolationAxisMap {
    /// From the two dominant entries of a conversion operator.
    pub fn new(m: Mat3) -> Self {
        let mut entries: Vec<(f32, usize, usize)> = (0..3)
            .flat_map(|i| (0..3).map(move |j| (-entry(m, i, j).abs(), i, j)))
            .collect();
        entries.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut indices = [0_usize, 1, 2];
        let (_, i, j) = entries[0];
        if i != j {
            indices.swap(i, j);
        }
        if let Some(&(_, i2, j2)) = entries.iter().find(|e| e.1 != i && e.2 != j) {
            if indices[i2] != j2 {
                if let Some(at) = indices.iter().position(|&x| x == j2) {
                    indices.swap(i2, at);
                }
            }
        }
        Self { indices }
    }

    /// source channel of target X, Y and Z
    pub fn channels(&self) -> [BoneChannel; 3] {
        self.indices.map(|i| match i {
            0 => BoneChannel::X,
            1 => BoneChannel::Y,
            _ => BoneChannel::Z,
        })
    }

    pub fn remap<T: Copy>(&self, xyz: [T; 3]) -> [T; 3] {
        self.indices.map(|i| xyz[i])
    }
}

/// Flips the sign of each quaternion that is closer to the negation of its predecessor.
///
/// `rotations` must already be in frame order.
pub fn make_quaternions_continuous(rotations: &mut [Quat]) {
    for i in 1..rotations.len() {
        let prev = rotations[i - 1];
        let q = rotations[i];
        if (prev + q).length_squared() < (prev - q).length_squared() {
            rotations[i] = -q;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::coordinate::{convert_position, convert_rotation_quaternion};
    use crate::interpolation::{encode_bone_block, LINEAR_CONTROL_BYTES};

    fn same_rotation(a: Quat, b: Quat) -> bool {
        a.abs_diff_eq(b, 1e-5) || a.abs_diff_eq(-b, 1e-5)
    }

    fn keyframe(frame: u32, position: Vec3, rotation: Quat) -> BoneKeyframe {
        BoneKeyframe {
            name: "センター".to_owned(),
            frame,
            position,
            rotation,
            interpolation: encode_bone_block([LINEAR_CONTROL_BYTES; 4]),
        }
    }

    #[test]
    fn identity_rest_reduces_to_the_axis_swap() {
        let conversion = bone_local_conversion_matrix(Mat4::IDENTITY).unwrap();
        assert_eq!(conversion.deviation, 0.0);
        assert_eq!(conversion.matrix, -SWAP_YZ);
        assert_eq!(conversion.matrix.determinant(), 1.0);

        let q = Quat::from_euler(glam::EulerRot::YXZ, 0.4, -0.2, 1.3);
        let t = Vec3::new(1.0, 2.0, 3.0);
        let converted = apply_bone_local(&conversion, &keyframe(0, t, q), 0.5);
        assert!(converted
            .location
            .abs_diff_eq(convert_position(t) * 0.5, 1e-6));
        assert!(same_rotation(converted.rotation, convert_rotation_quaternion(q)));
    }

    #[test]
    fn conjugation_matches_matrix_form() {
        let rest = Mat4::from_quat(Quat::from_rotation_z(std::f32::consts::FRAC_PI_2))
            * Mat4::from_translation(Vec3::new(0.0, 4.0, 0.0));
        let conversion = bone_local_conversion_matrix(rest).unwrap();
        let r = Mat3::from_mat4(rest);
        let q = Quat::from_rotation_x(0.3) * Quat::from_rotation_y(-0.8);
        let expected = r.transpose() * SWAP_YZ * Mat3::from_quat(q) * SWAP_YZ * r;
        let converter = BoneConverter::from_conversion(&conversion, 1.0);
        let actual = Mat3::from_quat(converter.convert_rotation(q));
        assert!(actual.abs_diff_eq(expected, 1e-5));

        let t = Vec3::new(1.0, 2.0, 3.0);
        assert!(converter
            .convert_location(t)
            .abs_diff_eq(r.transpose() * SWAP_YZ * t, 1e-5));
    }

    #[test]
    fn small_noise_is_snapped() {
        let rest = Mat4::from_quat(Quat::from_rotation_x(0.05));
        let conversion = bone_local_conversion_matrix(rest).unwrap();
        assert_eq!(conversion.matrix, -SWAP_YZ);
        assert!(conversion.deviation > 0.0 && conversion.deviation < 0.1);
    }

    #[test]
    fn oblique_rest_fails_the_snap() {
        let rest = Mat4::from_quat(Quat::from_rotation_y(std::f32::consts::FRAC_PI_4));
        let error = bone_local_conversion_matrix(rest).unwrap_err();
        assert_eq!(error.tolerance, PERMUTATION_SNAP_TOLERANCE);
        assert!(error.deviation > 0.25);
        // the exact converter still handles it
        let converter = BoneConverter::exact(rest, 1.0);
        let r = Mat3::from_mat4(rest);
        let q = Quat::from_rotation_z(0.6);
        let expected = r.transpose() * SWAP_YZ * Mat3::from_quat(q) * SWAP_YZ * r;
        assert!(Mat3::from_quat(converter.convert_rotation(q)).abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn zero_quaternion_is_identity() {
        let converter = BoneConverter::exact(Mat4::IDENTITY, 1.0);
        let q = converter.convert_rotation(Quat::from_xyzw(0.0, 0.0, 0.0, 0.0));
        assert!(same_rotation(q, Quat::IDENTITY));
    }

    #[test]
    fn continuity_pass_flips_opposite_signs() {
        let a = Quat::from_rotation_y(0.1);
        let b = -Quat::from_rotation_y(0.2);
        let c = Quat::from_rotation_y(0.3);
        let mut rotations = [a, b, c];
        make_quaternions_continuous(&mut rotations);
        assert_eq!(rotations[1], -b);
        assert_eq!(rotations[2], c);
        for pair in rotations.windows(2) {
            assert!(pair[0].dot(pair[1]) > 0.0);
        }
    }

    #[test]
    fn track_is_sorted_then_made_continuous() {
        let converter = BoneConverter::exact(Mat4::IDENTITY, 1.0);
        let keyframes = vec![
            keyframe(20, Vec3::ZERO, -Quat::from_rotation_x(0.2)),
            keyframe(0, Vec3::ZERO, Quat::from_rotation_x(0.1)),
            keyframe(10, Vec3::X, Quat::from_rotation_x(0.15)),
        ];
        let track = converter.convert_track(&keyframes);
        assert_eq!(track.iter().map(|k| k.frame).collect::<Vec<_>>(), vec![0, 10, 20]);
        assert_eq!(track[1].location, Vec3::X);
        for pair in track.windows(2) {
            assert!(pair[0].rotation.dot(pair[1].rotation) > 0.0);
        }
    }

    #[test]
    fn axis_map_follows_the_permutation() {
        assert_eq!(InterpolationAxisMap::new(Mat3::IDENTITY).remap([0, 1, 2]), [0, 1, 2]);
        // identity rest: target Y is source Z
        let map = BoneConverter::exact(Mat4::IDENTITY, 1.0).axis_map();
        assert_eq!(map.channels(), [BoneChannel::X, BoneChannel::Z, BoneChannel::Y]);

        let block = encode_bone_block([[1, 1, 1, 1], [2, 2, 2, 2], [3, 3, 3, 3], LINEAR_CONTROL_BYTES]);
        let mut k = keyframe(0, Vec3::ZERO, Quat::IDENTITY);
        k.interpolation = block;
        let converted = BoneConverter::exact(Mat4::IDENTITY, 1.0).convert_keyframe(&k);
        assert_eq!(converted.location_curves[1], BezierCurve::from_bytes([3, 3, 3, 3]));
        assert_eq!(converted.rotation_curve, BezierCurve::linear());
    }

    #[test]
    fn ik_limits_are_reordered() {
        let limits = AngleLimits {
            lower: Vec3::new(-0.5, 0.0, -0.1),
            upper: Vec3::new(0.0, 0.0, 0.2),
        };
        let converter = BoneConverter::snapped(Mat4::IDENTITY, 1.0).unwrap();
        let local = converter.convert_ik_limits(limits);
        assert!(local.lower.cmple(local.upper).all());
        // -S·S = -I for the identity rest, so each axis is negated and exchanged
        assert!(local.lower.abs_diff_eq(Vec3::new(0.0, 0.0, -0.2), 1e-6));
        assert!(local.upper.abs_diff_eq(Vec3::new(0.5, 0.0, 0.1), 1e-6));
    }
}
