//! PMX type definitions.
//!
//! Every vector here is already in the target convention (right-handed, Z-up)
//! and every position-bearing field is already scaled.
//! Cross references are dense array indices, `None` where the file stores -1.

use crate::error::ParseErrorKind;
use bitflags::bitflags;
use glam::{Quat, Vec2, Vec3, Vec4};
use std::ops::Range;

/// Text encoding of a string field.
///
/// PMX files declare `Utf16Le` or `Utf8` in their globals, VMD files always use `ShiftJis`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TextEncoding {
    Utf16Le,
    Utf8,
    ShiftJis,
}

impl TextEncoding {
    pub(crate) fn encoding(self) -> &'static encoding_rs::Encoding {
        match self {
            TextEncoding::Utf16Le => encoding_rs::UTF_16LE,
            TextEncoding::Utf8 => encoding_rs::UTF_8,
            TextEncoding::ShiftJis => encoding_rs::SHIFT_JIS,
        }
    }
}

impl TryFrom<u8> for TextEncoding {
    type Error = ParseErrorKind;

    /// PMX globals byte 0
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Utf16Le),
            1 => Ok(Self::Utf8),
            x => Err(ParseErrorKind::InvalidEncoding(x)),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PmxVersion {
    V20,
    V21,
}

/// Byte width of a signed index field. All bits set decodes to -1 ("none").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndexWidth {
    Width1,
    Width2,
    Width4,
}

/// Byte width of a vertex index field. Vertex indices are unsigned below 4 bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VertexIndexWidth {
    Width1,
    Width2,
    Width4,
}

impl TryFrom<u8> for IndexWidth {
    type Error = ParseErrorKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Width1),
            2 => Ok(Self::Width2),
            4 => Ok(Self::Width4),
            x => Err(ParseErrorKind::InvalidIndexWidth(x)),
        }
    }
}

impl From<IndexWidth> for u8 {
    fn from(width: IndexWidth) -> Self {
        match width {
            IndexWidth::Width1 => 1,
            IndexWidth::Width2 => 2,
            IndexWidth::Width4 => 4,
        }
    }
}

impl TryFrom<u8> for VertexIndexWidth {
    type Error = ParseErrorKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Width1),
            2 => Ok(Self::Width2),
            4 => Ok(Self::Width4),
            x => Err(ParseErrorKind::InvalidIndexWidth(x)),
        }
    }
}

impl From<VertexIndexWidth> for u8 {
    fn from(width: VertexIndexWidth) -> Self {
        match width {
            VertexIndexWidth::Width1 => 1,
            VertexIndexWidth::Width2 => 2,
            VertexIndexWidth::Width4 => 4,
        }
    }
}

/// PMX仕様.txt 156~173
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub version: PmxVersion,
    pub encoding: TextEncoding,
    /// 0..=4
    pub additional_uv: u8,
    pub vertex_index: VertexIndexWidth,
    pub texture_index: IndexWidth,
    pub material_index: IndexWidth,
    pub bone_index: IndexWidth,
    pub morph_index: IndexWidth,
    pub rigid_index: IndexWidth,
}

/// Pmx embedded comments and names
#[derive(Debug, Default, Eq, PartialEq, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub name_en: String,
    pub comment: String,
    pub comment_en: String,
}

/// Defining how to calculate skinning.
///
/// refer PMX仕様.txt 190~197
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum VertexWeight {
    /// a bone with weight 1.0
    BDEF1(Option<usize>),
    /// second bone gets `1.0 - weight`
    BDEF2 {
        bones: [Option<usize>; 2],
        weight: f32,
    },
    /// 4 bones without normalized weights guaranty.
    BDEF4 {
        bones: [Option<usize>; 4],
        weights: [f32; 4],
    },
    /// spherical deform, `c`, `r0` and `r1` converted like positions
    SDEF {
        bones: [Option<usize>; 2],
        weight: f32,
        c: Vec3,
        r0: Vec3,
        r1: Vec3,
    },
    /// dual quaternion deform (PMX 2.1), same payload as BDEF4
    QDEF {
        bones: [Option<usize>; 4],
        weights: [f32; 4],
    },
}

impl VertexWeight {
    pub fn bones(&self) -> &[Option<usize>] {
        match self {
            VertexWeight::BDEF1(bone) => std::slice::from_ref(bone),
            VertexWeight::BDEF2 { bones, .. } | VertexWeight::SDEF { bones, .. } => bones,
            VertexWeight::BDEF4 { bones, .. } | VertexWeight::QDEF { bones, .. } => bones,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    /// one entry per additional uv channel declared in the header
    pub additional_uvs: Vec<Vec4>,
    pub weight: VertexWeight,
    pub edge_scale: f32,
}

/// One triangle, winding already reversed for the target handedness.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Face {
    pub vertices: [usize; 3],
}

/// how to apply sphere mode texture
/// refer PMX仕様.txt 295
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SphereModeKind {
    Mul,
    Add,
    SubTexture,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SphereMode {
    pub texture: Option<usize>,
    pub kind: SphereModeKind,
}

/// represent which texture need to use for toon
/// * Texture use texture in texture list
/// * Shared use one of the ten toon textures bundled with MMD
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Toon {
    Texture(Option<usize>),
    Shared(u8),
}

///  refer PMX仕様.txt 276~310
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub name_en: String,
    pub diffuse: Vec4,
    pub specular: Vec3,
    pub specular_factor: f32,
    pub ambient: Vec3,
    pub flags: MaterialFlags,
    pub edge_color: Vec4,
    pub edge_size: f32,
    pub texture: Option<usize>,
    pub sphere: Option<SphereMode>,
    pub toon: Toon,
    pub memo: String,
    /// number of face indices this material claims, always a multiple of 3
    pub index_count: usize,
}

impl Material {
    pub fn double_sided(&self) -> bool {
        self.flags.contains(MaterialFlags::DISABLE_CULLING)
    }

    pub fn casts_shadow(&self) -> bool {
        self.flags
            .intersects(MaterialFlags::GROUND_SHADOW | MaterialFlags::DRAW_SHADOW)
    }

    pub fn receives_shadow(&self) -> bool {
        self.flags.contains(MaterialFlags::RECEIVE_SHADOW)
    }

    pub fn has_edge(&self) -> bool {
        self.flags.contains(MaterialFlags::HAS_EDGE)
    }
}

///refer PMX仕様.txt 348 ~ 354
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum TailSpec {
    PointAt(Option<usize>),
    /// offset from the bone's own head, converted and scaled
    Offset(Vec3),
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum LocalAxes {
    /// declared local X and Z axes, converted to target space
    Explicit { x: Vec3, z: Vec3 },
    Derived,
}

/// additional transform taken from another bone
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GrantParent {
    pub source: Option<usize>,
    /// may be negative
    pub factor: f32,
    pub rotation: bool,
    pub translation: bool,
    pub local: bool,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct AngleLimits {
    pub lower: Vec3,
    pub upper: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IkLink {
    pub bone: Option<usize>,
    /// Euler limits in radians with the Y and Z components swapped.
    /// Mapping them into a bone's local frame is [`convert_ik_limits`](crate::bone_local::convert_ik_limits).
    pub limits: Option<AngleLimits>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ik {
    pub target: Option<usize>,
    pub iterations: i32,
    /// radians per iteration
    pub limit_angle: f32,
    pub links: Vec<IkLink>,
}

/// represent one bone
///
/// refer PMX仕様.txt 313 ~ 395
#[derive(Debug, Clone, PartialEq)]
pub struct Bone {
    /// target-language name, unique within the model
    pub name: String,
    pub name_jp: String,
    pub name_en: String,
    pub position: Vec3,
    pub parent: Option<usize>,
    pub transform_order: i32,
    pub flags: BoneFlags,
    pub tail: TailSpec,
    pub grant: Option<GrantParent>,
    pub fixed_axis: Option<Vec3>,
    pub local_axes: LocalAxes,
    pub external_parent: Option<i32>,
    pub ik: Option<Ik>,
}

impl Bone {
    pub fn is_ik(&self) -> bool {
        self.ik.is_some()
    }

    pub fn visible(&self) -> bool {
        self.flags.contains(BoneFlags::IS_VISIBLE)
    }

    pub fn physics_after_deform(&self) -> bool {
        self.flags.contains(BoneFlags::PHYSICS_AFTER_DEFORM)
    }
}

/// morph panel position in MMD
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ControlPanel {
    System,
    BottomLeft,
    TopLeft,
    TopRight,
    BottomRight,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GroupMorph {
    pub morph: usize,
    pub factor: f32,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct VertexMorph {
    pub vertex: usize,
    pub offset: Vec3,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct UvMorph {
    pub vertex: usize,
    pub offset: Vec4,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BoneMorph {
    pub bone: usize,
    pub translation: Vec3,
    pub rotation: Quat,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MaterialMorphOp {
    Multiply,
    Add,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MaterialMorph {
    /// `None` applies to every material
    pub material: Option<usize>,
    pub op: MaterialMorphOp,
    pub diffuse: Vec4,
    pub specular: Vec3,
    pub specular_factor: f32,
    pub ambient: Vec3,
    pub edge_color: Vec4,
    pub edge_size: f32,
    pub texture_factor: Vec4,
    pub sphere_texture_factor: Vec4,
    pub toon_texture_factor: Vec4,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ImpulseMorph {
    pub rigid: usize,
    pub local: bool,
    pub velocity: Vec3,
    pub torque: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MorphKind {
    Group(Vec<GroupMorph>),
    Vertex(Vec<VertexMorph>),
    Bone(Vec<BoneMorph>),
    /// `channel` 0 is the primary uv, 1..=4 the additional ones
    Uv { channel: u8, offsets: Vec<UvMorph> },
    Material(Vec<MaterialMorph>),
    Flip(Vec<GroupMorph>),
    Impulse(Vec<ImpulseMorph>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Morph {
    pub name: String,
    pub name_en: String,
    pub panel: ControlPanel,
    pub kind: MorphKind,
}

///from PMX仕様.txt 476 ~ 497
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DisplayItem {
    Bone(usize),
    Morph(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplayFrame {
    pub name: String,
    pub name_en: String,
    pub special: bool,
    pub items: Vec<DisplayItem>,
}

/// Collision shape with its dimensions, scaled.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum RigidShape {
    Sphere { radius: f32 },
    /// half extents along the target axes
    Box { half_extents: Vec3 },
    Capsule { radius: f32, height: f32 },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RigidMode {
    /// follows its bone, unaffected by the simulation
    Static,
    /// simulated, drives its bone
    Dynamic,
    /// simulated rotation, position follows the bone
    DynamicWithBonePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rigid {
    pub name: String,
    pub name_en: String,
    pub bone: Option<usize>,
    /// collision group number, 0..=15
    pub group: u8,
    /// raw 16-bit mask, bit `g` cleared means no collision with group `g`
    pub collision_mask: u16,
    pub shape: RigidShape,
    pub position: Vec3,
    /// Euler angles, see [`convert_rigid_rotation`](crate::coordinate::convert_rigid_rotation)
    pub rotation: Vec3,
    pub mass: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub restitution: f32,
    pub friction: f32,
    pub mode: RigidMode,
}

impl Rigid {
    pub fn collides_with_group(&self, group: u8) -> bool {
        group < 16 && self.collision_mask & (1 << group) != 0
    }

    pub fn excludes_group(&self, group: u8) -> bool {
        group < 16 && !self.collides_with_group(group)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum JointKind {
    Spring6Dof,
    SixDof,
    PointToPoint,
    ConeTwist,
    Slider,
    Hinge,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Joint {
    pub name: String,
    pub name_en: String,
    pub kind: JointKind,
    pub rigid_a: Option<usize>,
    pub rigid_b: Option<usize>,
    pub position: Vec3,
    pub rotation: Vec3,
    pub translation_limits: AngleLimits,
    pub rotation_limits: AngleLimits,
    pub spring_translation: Vec3,
    pub spring_rotation: Vec3,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SoftBodyForm {
    TriMesh,
    Rope,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SoftBodyAeroModel {
    VPoint,
    VTwoSided,
    VOneSided,
    FTwoSided,
    FOneSided,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SoftBodyAnchor {
    pub rigid: usize,
    pub vertex: usize,
    pub near_mode: bool,
}

/// PMX 2.1 soft body, read verbatim apart from the references.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftBody {
    pub name: String,
    pub name_en: String,
    pub form: SoftBodyForm,
    pub material: Option<usize>,
    pub group: u8,
    pub collision_mask: u16,
    pub flags: u8,
    pub b_link_distance: i32,
    pub clusters: i32,
    pub mass: f32,
    pub collision_margin: f32,
    pub aero_model: SoftBodyAeroModel,
    /// config: vcf dp dg lf pr vc df mt chr khr shr ahr
    pub config: [f32; 12],
    /// cluster: srhr skhr sshr sr_splt sk_splt ss_splt
    pub cluster: [f32; 6],
    /// iteration: v p d c
    pub iterations: [i32; 4],
    /// material: lst ast vst
    pub stiffness: [f32; 3],
    pub anchors: Vec<SoftBodyAnchor>,
    pub pinned_vertices: Vec<usize>,
}

/// A fully parsed model. Immutable once returned by the reader.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub header: Header,
    pub info: ModelInfo,
    pub vertices: Vec<Vertex>,
    pub faces: Vec<Face>,
    pub textures: Vec<String>,
    pub materials: Vec<Material>,
    pub bones: Vec<Bone>,
    pub morphs: Vec<Morph>,
    pub display_frames: Vec<DisplayFrame>,
    pub rigid_bodies: Vec<Rigid>,
    pub joints: Vec<Joint>,
    pub soft_bodies: Vec<SoftBody>,
}

impl Model {
    /// Triangle range of every material, in material order.
    pub fn material_ranges(&self) -> Vec<Range<usize>> {
        let mut start = 0;
        self.materials
            .iter()
            .map(|material| {
                let end = start + material.index_count / 3;
                let range = start..end;
                start = end;
                range
            })
            .collect()
    }

    /// Looks a bone up by its target-language or Japanese name.
    pub fn bone_index(&self, name: &str) -> Option<usize> {
        self.bones
            .iter()
            .position(|bone| bone.name == name)
            .or_else(|| self.bones.iter().position(|bone| bone.name_jp == name))
    }

    /// Target-language morph names, in morph order.
    pub fn morph_names(&self) -> Vec<String> {
        crate::translations::resolve_morph_names(
            self.morphs
                .iter()
                .map(|morph| (morph.name.as_str(), morph.name_en.as_str())),
        )
    }

    /// a PMX 2.0 model with no elements
    #[cfg(test)]
    pub(crate) fn empty() -> Self {
        Self {
            header: Header {
                version: PmxVersion::V20,
                encoding: TextEncoding::Utf8,
                additional_uv: 0,
                vertex_index: VertexIndexWidth::Width2,
                texture_index: IndexWidth::Width1,
                material_index: IndexWidth::Width1,
                bone_index: IndexWidth::Width2,
                morph_index: IndexWidth::Width1,
                rigid_index: IndexWidth::Width1,
            },
            info: ModelInfo::default(),
            vertices: vec![],
            faces: vec![],
            textures: vec![],
            materials: vec![],
            bones: vec![],
            morphs: vec![],
            display_frames: vec![],
            rigid_bodies: vec![],
            joints: vec![],
            soft_bodies: vec![],
        }
    }
}

bitflags! {
    pub struct MaterialFlags :u8 {
        const DISABLE_CULLING =0x01;
        const GROUND_SHADOW =0x02;
        const DRAW_SHADOW =0x04;
        const RECEIVE_SHADOW= 0x08;
        const HAS_EDGE =0x10;
        const VERTEX_COLOR = 0x20;
        const POINT_DRAW = 0x40;
        const LINE_DRAW =  0x80;
    }
}

bitflags! {
    pub struct BoneFlags : u16{
        const CONNECT_TO_OTHER_BONE=0x01;
        const ROTATABLE =0x02;
        const TRANSLATABLE =0x04;
        const IS_VISIBLE =0x08;
        const ENABLED = 0x10;
        const IK = 0x20;
        const INHERIT_LOCAL = 0x80;
        const INHERIT_ROTATION =0x100;
        const INHERIT_TRANSLATION = 0x200;
        const FIXED_AXIS = 0x400;
        const LOCAL_COORDINATE = 0x800;
        const PHYSICS_AFTER_DEFORM = 0x1000;
        const EXTERNAL_PARENT_DEFORM = 0x2000;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn index_width_rejects_three_bytes() {
        assert_eq!(IndexWidth::try_from(2), Ok(IndexWidth::Width2));
        assert_eq!(
            IndexWidth::try_from(3),
            Err(ParseErrorKind::InvalidIndexWidth(3))
        );
        assert_eq!(u8::from(VertexIndexWidth::Width4), 4);
    }

    #[test]
    fn collision_mask_bits() {
        let rigid = Rigid {
            name: String::new(),
            name_en: String::new(),
            bone: None,
            group: 0,
            collision_mask: 0xFFFF & !(1 << 3),
            shape: RigidShape::Sphere { radius: 1.0 },
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            mass: 1.0,
            linear_damping: 0.0,
            angular_damping: 0.0,
            restitution: 0.0,
            friction: 0.0,
            mode: RigidMode::Dynamic,
        };
        assert!(rigid.collides_with_group(2));
        assert!(rigid.excludes_group(3));
        assert!(!rigid.collides_with_group(16));
        assert!(!rigid.excludes_group(16));
    }

    #[test]
    fn morph_names_are_translated_and_unique() {
        let morph = |name: &str, name_en: &str| Morph {
            name: name.to_owned(),
            name_en: name_en.to_owned(),
            panel: ControlPanel::TopRight,
            kind: MorphKind::Vertex(vec![]),
        };
        let model = Model {
            morphs: vec![morph("あ", ""), morph("笑顔", " smile "), morph("あ", ""), morph("独自", "")],
            ..Model::empty()
        };
        assert_eq!(model.morph_names(), vec!["A", "smile", "A.001", "独自"]);
    }
}
