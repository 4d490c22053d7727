//! Reference rest pose built from a parsed model.
//!
//! Bones follow the target convention: local Y runs from head to tail, roll
//! twists the frame about it. Heads and tails are in target space, already scaled.

use crate::bone_local::RestPose;
use crate::config::ArmatureOptions;
use crate::types::{Bone, LocalAxes, Model, TailSpec};
use glam::{Mat3, Mat4, Vec2, Vec3};

/// Japanese names whose roll is derived from the head/tail geometry.
const AUTO_ROLL_NAMES: &[&str] = &[
    "左肩", "左腕", "左ひじ", "左手首", "右肩", "右腕", "右ひじ", "右手首",
];
/// any bone whose name contains one of these is a finger bone
const FINGER_NAMES: &[&str] = &["親指", "人指", "中指", "薬指", "小指"];

#[derive(Debug, Clone, PartialEq)]
pub struct ArmatureBone {
    pub name: String,
    pub name_jp: String,
    pub parent: Option<usize>,
    pub head: Vec3,
    pub tail: Vec3,
    pub roll: f32,
    /// bone to armature space
    pub matrix: Mat4,
}

impl ArmatureBone {
    pub fn length(&self) -> f32 {
        (self.tail - self.head).length()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Armature {
    bones: Vec<ArmatureBone>,
}

impl Armature {
    pub fn new(model: &Model, options: &ArmatureOptions) -> Self {
        let bones = model
            .bones
            .iter()
            .map(|bone| {
                let head = bone.position;
                let tail = bone_tail(model, bone, options);
                let roll = bone_roll(bone, head, tail, options);
                ArmatureBone {
                    name: bone.name.clone(),
                    name_jp: bone.name_jp.clone(),
                    parent: bone.parent,
                    head,
                    tail,
                    roll,
                    matrix: bone_matrix(head, tail, roll),
                }
            })
            .collect::<Vec<_>>();
        log::debug!("armature: {} bones", bones.len());
        Self { bones }
    }

    pub fn bones(&self) -> &[ArmatureBone] {
        &self.bones
    }

    pub fn bone(&self, index: usize) -> Option<&ArmatureBone> {
        self.bones.get(index)
    }

    /// by target name, then by Japanese name
    pub fn find(&self, name: &str) -> Option<usize> {
        self.bones
            .iter()
            .position(|b| b.name == name)
            .or_else(|| self.bones.iter().position(|b| b.name_jp == name))
    }
}

impl RestPose for Armature {
    fn bone_count(&self) -> usize {
        self.bones.len()
    }

    fn bone_matrix(&self, bone: usize) -> Option<Mat4> {
        self.bone(bone).map(|b| b.matrix)
    }

    fn local_to_parent(&self, bone: usize) -> Option<Mat4> {
        let b = self.bone(bone)?;
        match b.parent.and_then(|p| self.bone(p)) {
            Some(parent) => Some(parent.matrix.inverse() * b.matrix),
            None => Some(b.matrix),
        }
    }
}

/// Tail of `bone`, never closer to the head than `options.min_bone_length`.
pub fn bone_tail(model: &Model, bone: &Bone, options: &ArmatureOptions) -> Vec3 {
    let head = bone.position;
    let tail = match bone.tail {
        TailSpec::PointAt(target) => target.and_then(|t| model.bones.get(t)).map(|t| t.position),
        TailSpec::Offset(offset) => Some(head + offset),
    };
    match tail {
        Some(tail) if (tail - head).length() > options.min_bone_length => tail,
        _ => degenerate_tail(head, options),
    }
}

pub fn degenerate_tail(head: Vec3, options: &ArmatureOptions) -> Vec3 {
    let direction = options
        .degenerate_tail_direction
        .try_normalize()
        .unwrap_or(Vec3::Y);
    head + direction * options.min_bone_length
}

fn bone_roll(bone: &Bone, head: Vec3, tail: Vec3, options: &ArmatureOptions) -> f32 {
    match bone.local_axes {
        LocalAxes::Explicit { x, z } => update_bone_roll(head, tail, x, z),
        LocalAxes::Derived if options.auto_roll && is_auto_roll_bone(&bone.name_jp) => {
            auto_bone_roll(head, tail)
        }
        LocalAxes::Derived => 0.0,
    }
}

pub fn is_auto_roll_bone(name_jp: &str) -> bool {
    AUTO_ROLL_NAMES.contains(&name_jp) || FINGER_NAMES.iter().any(|f| name_jp.contains(f))
}

/// Rotation part of a bone's frame: Y along `nor` (unit length), twisted by `roll`.
///
/// Above the thresholds the matrix is the shortest rotation taking +Y to `nor`;
/// for `nor` at -Y it is the half turn about Z.
pub fn vec_roll_to_mat3(nor: Vec3, roll: f32) -> Mat3 {
    const SAFE_THRESHOLD: f32 = 6.1e-3;
    const CRITICAL_THRESHOLD: f32 = 2.5e-4;
    let (x, y, z) = (nor.x, nor.y, nor.z);
    let mut theta = 1.0 + y;
    let theta_alt = x * x + z * z;
    let b = if theta > SAFE_THRESHOLD || theta_alt > CRITICAL_THRESHOLD * CRITICAL_THRESHOLD {
        if theta <= SAFE_THRESHOLD {
            theta = 0.5 * theta_alt + 0.125 * theta_alt * theta_alt;
        }
        Mat3::from_cols(
            Vec3::new(1.0 - x * x / theta, -x, -x * z / theta),
            Vec3::new(x, y, z),
            Vec3::new(-x * z / theta, -z, 1.0 - z * z / theta),
        )
    } else {
        Mat3::from_diagonal(Vec3::new(-1.0, -1.0, 1.0))
    };
    Mat3::from_axis_angle(nor, roll) * b
}

/// Bone to armature matrix for a head, tail and roll.
pub fn bone_matrix(head: Vec3, tail: Vec3, roll: f32) -> Mat4 {
    let nor = (tail - head).try_normalize().unwrap_or(Vec3::Y);
    let m = vec_roll_to_mat3(nor, roll);
    Mat4::from_cols(
        m.x_axis.extend(0.0),
        m.y_axis.extend(0.0),
        m.z_axis.extend(0.0),
        head.extend(1.0),
    )
}

/// Roll that turns the bone's Z axis towards `axis` projected onto the plane
/// perpendicular to the bone.
pub fn roll_to_vector(head: Vec3, tail: Vec3, axis: Vec3) -> f32 {
    let nor = match (tail - head).try_normalize() {
        Some(nor) => nor,
        None => return 0.0,
    };
    let z = vec_roll_to_mat3(nor, 0.0).z_axis;
    let projected = axis - nor * axis.dot(nor);
    if projected.length_squared() < 1e-12 {
        return 0.0;
    }
    let roll = z.angle_between(projected);
    if z.cross(projected).dot(nor) < 0.0 {
        -roll
    } else {
        roll
    }
}

/// Roll from a declared local X/Z axis pair.
///
/// The pair is made orthonormal, then the bone is aligned to the axis after the
/// one it runs closest to (before it when it runs against that axis).
pub fn update_bone_roll(head: Vec3, tail: Vec3, x_axis: Vec3, z_axis: Vec3) -> f32 {
    let x = x_axis.normalize_or_zero();
    let y = z_axis.normalize_or_zero().cross(x).normalize_or_zero();
    let z = x.cross(y).normalize_or_zero();
    let axes = [x, y, z];
    let vector = tail - head;
    let (idx, val) = axes
        .iter()
        .map(|axis| vector.dot(*axis))
        .enumerate()
        .fold((0, 0.0_f32), |best, (i, d)| {
            if d.abs() > best.1.abs() {
                (i, d)
            } else {
                best
            }
        });
    let align = if val < 0.0 {
        axes[(idx + 2) % 3]
    } else {
        axes[(idx + 1) % 3]
    };
    roll_to_vector(head, tail, align)
}

/// Roll of arm and finger bones from their direction in the X-Z plane.
pub fn auto_bone_roll(head: Vec3, tail: Vec3) -> f32 {
    let xz = Vec2::new(tail.x - head.x, tail.z - head.z).normalize_or_zero();
    let theta = xz.y.atan2(xz.x);
    let length = (tail - head).length();
    let p3 = tail + Vec3::new(-length * theta.sin(), 0.0, length * theta.cos());
    let y = (tail - head).normalize_or_zero();
    let x = y.cross((p3 - head).normalize_or_zero());
    update_bone_roll(head, tail, y, x)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bone_local::bone_local_conversion_matrix;
    use crate::coordinate::SWAP_YZ;
    use crate::types::BoneFlags;

    fn bone(name_jp: &str, position: Vec3, parent: Option<usize>, tail: TailSpec) -> Bone {
        Bone {
            name: name_jp.to_owned(),
            name_jp: name_jp.to_owned(),
            name_en: String::new(),
            position,
            parent,
            transform_order: 0,
            flags: BoneFlags::ROTATABLE | BoneFlags::IS_VISIBLE,
            tail,
            grant: None,
            fixed_axis: None,
            local_axes: LocalAxes::Derived,
            external_parent: None,
            ik: None,
        }
    }

    fn model(bones: Vec<Bone>) -> Model {
        Model {
            bones,
            ..Model::empty()
        }
    }

    const DIRECTIONS: [Vec3; 6] = [Vec3::X, Vec3::Y, Vec3::Z, Vec3::NEG_X, Vec3::NEG_Y, Vec3::NEG_Z];

    #[test]
    fn bone_frame_is_a_rotation_along_the_bone() {
        let mut directions = DIRECTIONS.to_vec();
        directions.push(Vec3::new(1.0, 2.0, -0.5).normalize());
        directions.push(Vec3::new(1e-5, -1.0, 0.0).normalize());
        for nor in directions {
            for roll in [0.0_f32, 0.7, -2.0] {
                let m = vec_roll_to_mat3(nor, roll);
                assert!(m.y_axis.abs_diff_eq(nor, 1e-4), "{} {}", nor, roll);
                assert!((m.determinant() - 1.0).abs() < 1e-4);
                assert!((m.transpose() * m).abs_diff_eq(Mat3::IDENTITY, 1e-4));
            }
        }
        assert_eq!(vec_roll_to_mat3(Vec3::Y, 0.0), Mat3::IDENTITY);
    }

    #[test]
    fn roll_to_vector_inverts_the_roll() {
        let head = Vec3::new(0.1, 0.2, 0.3);
        for nor in [Vec3::X, Vec3::Z, Vec3::new(0.3, -0.4, 0.8).normalize()] {
            for roll in [0.0_f32, 0.5, -1.2, 3.0] {
                let z = vec_roll_to_mat3(nor, roll).z_axis;
                let found = roll_to_vector(head, head + nor, z);
                assert!((found - roll).abs() < 1e-3, "{} {} {}", nor, roll, found);
            }
        }
    }

    #[test]
    fn degenerate_bone_has_identity_rest_and_plain_swap() {
        let options = ArmatureOptions::default();
        let m = model(vec![
            bone("センター", Vec3::new(0.0, 0.0, 0.64), None, TailSpec::Offset(Vec3::ZERO)),
            bone("グルーブ", Vec3::new(0.0, 0.0, 0.64), Some(0), TailSpec::PointAt(Some(0))),
            bone("腰", Vec3::new(0.0, 0.0, 0.8), Some(0), TailSpec::PointAt(None)),
        ]);
        let armature = Armature::new(&m, &options);
        for b in armature.bones() {
            assert!(b.tail.abs_diff_eq(b.head + Vec3::Y * options.min_bone_length, 1e-7));
            assert_eq!(b.roll, 0.0);
            let rotation = Mat3::from_mat4(b.matrix);
            assert!(rotation.abs_diff_eq(Mat3::IDENTITY, 1e-6));
            let conversion = bone_local_conversion_matrix(b.matrix).unwrap();
            assert_eq!(conversion.matrix, -SWAP_YZ);
        }
    }

    #[test]
    fn degenerate_direction_changes_the_frame() {
        let options = ArmatureOptions {
            degenerate_tail_direction: Vec3::NEG_Y,
            ..Default::default()
        };
        let m = model(vec![bone("腰", Vec3::ZERO, None, TailSpec::PointAt(None))]);
        let armature = Armature::new(&m, &options);
        let rotation = Mat3::from_mat4(armature.bones()[0].matrix);
        assert!(rotation.abs_diff_eq(Mat3::from_diagonal(Vec3::new(-1.0, -1.0, 1.0)), 1e-6));
        let conversion = bone_local_conversion_matrix(armature.bones()[0].matrix).unwrap();
        assert_ne!(conversion.matrix, -SWAP_YZ);
    }

    #[test]
    fn tails() {
        let options = ArmatureOptions::default();
        let m = model(vec![
            bone("上半身", Vec3::new(0.0, 0.0, 1.0), None, TailSpec::PointAt(Some(1))),
            bone("首", Vec3::new(0.0, 0.0, 1.4), Some(0), TailSpec::Offset(Vec3::new(0.0, 0.0, 0.1))),
            bone("頭", Vec3::new(0.0, 0.0, 1.5), Some(1), TailSpec::Offset(Vec3::new(0.0, 0.0, 0.0005))),
        ]);
        let armature = Armature::new(&m, &options);
        assert_eq!(armature.bones()[0].tail, Vec3::new(0.0, 0.0, 1.4));
        assert!(armature.bones()[1].tail.abs_diff_eq(Vec3::new(0.0, 0.0, 1.5), 1e-6));
        assert!(armature.bones()[2]
            .tail
            .abs_diff_eq(Vec3::new(0.0, 0.001, 1.5), 1e-6));
        assert_eq!(armature.find("首"), Some(1));
        assert_eq!(armature.bone_count(), 3);
    }

    #[test]
    fn local_to_parent_composes_to_bone_matrix() {
        let options = ArmatureOptions::default();
        let m = model(vec![
            bone("上半身", Vec3::new(0.0, 0.0, 1.0), None, TailSpec::PointAt(Some(1))),
            bone("左腕", Vec3::new(0.2, 0.0, 1.4), Some(0), TailSpec::Offset(Vec3::new(0.3, 0.0, -0.1))),
        ]);
        let armature = Armature::new(&m, &options);
        assert_eq!(armature.local_to_parent(0), armature.bone_matrix(0));
        let parent = armature.bone_matrix(0).unwrap();
        let local = armature.local_to_parent(1).unwrap();
        assert!((parent * local).abs_diff_eq(armature.bone_matrix(1).unwrap(), 1e-5));
        assert_eq!(armature.bone_matrix(2), None);
    }

    #[test]
    fn explicit_axes_align_the_frame() {
        let head = Vec3::ZERO;
        let tail = Vec3::X;
        let roll = update_bone_roll(head, tail, Vec3::X, Vec3::Y);
        let m = vec_roll_to_mat3(Vec3::X, roll);
        assert!(m.z_axis.abs_diff_eq(Vec3::NEG_Z, 1e-5), "{}", m.z_axis);

        let mut b = bone("左人指先", head, None, TailSpec::Offset(tail));
        b.local_axes = LocalAxes::Explicit {
            x: Vec3::X,
            z: Vec3::Y,
        };
        let armature = Armature::new(&model(vec![b]), &ArmatureOptions::default());
        assert!((armature.bones()[0].roll - roll).abs() < 1e-6);
    }

    #[test]
    fn auto_roll_of_a_horizontal_arm_points_z_up() {
        let roll = auto_bone_roll(Vec3::ZERO, Vec3::X);
        let m = vec_roll_to_mat3(Vec3::X, roll);
        assert!(m.z_axis.abs_diff_eq(Vec3::Z, 1e-5), "{}", m.z_axis);

        let arm = bone("左腕", Vec3::ZERO, None, TailSpec::Offset(Vec3::X));
        let other = bone("スカート", Vec3::ZERO, None, TailSpec::Offset(Vec3::X));
        let armature = Armature::new(&model(vec![arm.clone(), other]), &ArmatureOptions::default());
        assert!((armature.bones()[0].roll - roll).abs() < 1e-6);
        assert_eq!(armature.bones()[1].roll, 0.0);

        let options = ArmatureOptions {
            auto_roll: false,
            ..Default::default()
        };
        assert_eq!(Armature::new(&model(vec![arm]), &options).bones()[0].roll, 0.0);
    }

    #[test]
    fn auto_roll_names() {
        assert!(is_auto_roll_bone("右ひじ"));
        assert!(is_auto_roll_bone("左小指２"));
        assert!(is_auto_roll_bone("右親指先"));
        assert!(!is_auto_roll_bone("左足"));
        assert!(!is_auto_roll_bone("左腕捩"));
    }
}
