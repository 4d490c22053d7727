//! Motion data read from a VMD file.
//!
//! Values are in MMD space exactly as stored. Keyframes keep file order, which
//! is not sorted by frame; [`Motion::bone_tracks`] and [`Motion::morph_tracks`]
//! give per-name streams in temporal order.

use crate::interpolation::{BoneInterpolation, CameraInterpolation};
use glam::{Quat, Vec3};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct BoneKeyframe {
    pub name: String,
    pub frame: u32,
    pub position: Vec3,
    /// as stored, a zero quaternion is kept
    pub rotation: Quat,
    pub interpolation: [u8; 64],
}

impl BoneKeyframe {
    pub fn curves(&self) -> BoneInterpolation {
        BoneInterpolation::from_block(&self.interpolation)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MorphKeyframe {
    pub name: String,
    pub frame: u32,
    pub weight: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraKeyframe {
    pub frame: u32,
    pub distance: f32,
    pub position: Vec3,
    /// Euler angles in radians
    pub rotation: Vec3,
    pub interpolation: [u8; 24],
    /// degrees
    pub fov: u32,
    pub orthographic: bool,
}

impl CameraKeyframe {
    pub fn curves(&self) -> CameraInterpolation {
        CameraInterpolation::from_block(&self.interpolation)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LightKeyframe {
    pub frame: u32,
    pub color: Vec3,
    pub direction: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShadowKeyframe {
    pub frame: u32,
    /// 0 off, 1 and 2 the two MMD shadow modes
    pub mode: u8,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IkState {
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyKeyframe {
    pub frame: u32,
    pub visible: bool,
    pub ik_states: Vec<IkState>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Motion {
    pub model_name: String,
    pub bone_keyframes: Vec<BoneKeyframe>,
    pub morph_keyframes: Vec<MorphKeyframe>,
    pub camera_keyframes: Vec<CameraKeyframe>,
    pub light_keyframes: Vec<LightKeyframe>,
    pub shadow_keyframes: Vec<ShadowKeyframe>,
    pub property_keyframes: Vec<PropertyKeyframe>,
}

impl Motion {
    /// Bone keyframes grouped by bone name, each group sorted by frame.
    ///
    /// The sort is stable, so keyframes sharing a frame keep file order.
    pub fn bone_tracks(&self) -> BTreeMap<&str, Vec<&BoneKeyframe>> {
        group_by_name(&self.bone_keyframes, |k| k.name.as_str(), |k| k.frame)
    }

    pub fn morph_tracks(&self) -> BTreeMap<&str, Vec<&MorphKeyframe>> {
        group_by_name(&self.morph_keyframes, |k| k.name.as_str(), |k| k.frame)
    }

    /// Enabled flag of every IK bone named by a property keyframe, in frame order.
    pub fn ik_tracks(&self) -> BTreeMap<&str, Vec<(u32, bool)>> {
        let mut properties: Vec<&PropertyKeyframe> = self.property_keyframes.iter().collect();
        properties.sort_by_key(|k| k.frame);
        let mut tracks: BTreeMap<&str, Vec<(u32, bool)>> = BTreeMap::new();
        for keyframe in properties {
            for state in &keyframe.ik_states {
                tracks
                    .entry(state.name.as_str())
                    .or_default()
                    .push((keyframe.frame, state.enabled));
            }
        }
        tracks
    }

    /// last frame over every stream, 0 for an empty motion
    pub fn max_frame(&self) -> u32 {
        let frames = self
            .bone_keyframes
            .iter()
            .map(|k| k.frame)
            .chain(self.morph_keyframes.iter().map(|k| k.frame))
            .chain(self.camera_keyframes.iter().map(|k| k.frame))
            .chain(self.light_keyframes.iter().map(|k| k.frame))
            .chain(self.shadow_keyframes.iter().map(|k| k.frame))
            .chain(self.property_keyframes.iter().map(|k| k.frame));
        frames.max().unwrap_or(0)
    }

    pub fn is_camera_motion(&self) -> bool {
        self.bone_keyframes.is_empty()
            && self.morph_keyframes.is_empty()
            && !self.camera_keyframes.is_empty()
    }
}

fn group_by_name<'a, T>(
    keyframes: &'a [T],
    name: impl Fn(&'a T) -> &'a str,
    frame: impl Fn(&T) -> u32,
) -> BTreeMap<&'a str, Vec<&'a T>> {
    let mut tracks: BTreeMap<&str, Vec<&T>> = BTreeMap::new();
    for keyframe in keyframes {
        tracks.entry(name(keyframe)).or_default().push(keyframe);
    }
    for track in tracks.values_mut() {
        track.sort_by_key(|k| frame(*k));
    }
    tracks
}
