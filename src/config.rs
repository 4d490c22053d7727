//! Parse and rest-pose options, and the per-file parse context.

use crate::types::{Header, IndexWidth, PmxVersion, TextEncoding, VertexIndexWidth};
use glam::Vec3;

/// Uniform scale applied to every position-bearing field of a model.
pub const DEFAULT_SCALE: f32 = 0.08;

/// Bones shorter than this (target units, after scaling) get a synthetic tail.
pub const MIN_BONE_LENGTH: f32 = 0.001;

/// Direction of the synthetic tail of a zero-length bone, in target space.
///
/// A +Y bone with zero roll has the identity rest orientation, so the
/// bone-local conversion of such a bone is the plain axis swap.
pub const DEGENERATE_TAIL_DIRECTION: Vec3 = Vec3::Y;

/// Largest accepted |entry - snapped entry| when snapping a bone-local operator
/// to a signed axis permutation.
pub const PERMUTATION_SNAP_TOLERANCE: f32 = 0.1;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ParseOptions {
    pub scale: f32,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            scale: DEFAULT_SCALE,
        }
    }
}

impl ParseOptions {
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }
}

/// How the reference rest pose builds bone tails and rolls.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ArmatureOptions {
    pub min_bone_length: f32,
    pub degenerate_tail_direction: Vec3,
    /// derive the roll of arm and finger bones from their head/tail geometry
    pub auto_roll: bool,
}

impl Default for ArmatureOptions {
    fn default() -> Self {
        Self {
            min_bone_length: MIN_BONE_LENGTH,
            degenerate_tail_direction: DEGENERATE_TAIL_DIRECTION,
            auto_roll: true,
        }
    }
}

/// Everything a decode step needs to know about the file being read.
///
/// Built once from the header and the caller's options, then passed by reference.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ParseContext {
    pub version: PmxVersion,
    pub encoding: TextEncoding,
    pub additional_uv: usize,
    pub vertex_index: VertexIndexWidth,
    pub texture_index: IndexWidth,
    pub material_index: IndexWidth,
    pub bone_index: IndexWidth,
    pub morph_index: IndexWidth,
    pub rigid_index: IndexWidth,
    pub scale: f32,
}

impl ParseContext {
    pub fn new(header: &Header, options: &ParseOptions) -> Self {
        Self {
            version: header.version,
            encoding: header.encoding,
            additional_uv: usize::from(header.additional_uv),
            vertex_index: header.vertex_index,
            texture_index: header.texture_index,
            material_index: header.material_index,
            bone_index: header.bone_index,
            morph_index: header.morph_index,
            rigid_index: header.rigid_index,
            scale: options.scale,
        }
    }
}
