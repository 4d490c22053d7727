//! # PMX reading module.
//! this module separated to some parts.To avoid invalid reading.
//!
//! |Current stage|product|Next stage|
//! |-------------|-------|----------|
//! |[`ModelInfoStage`]|[`ModelInfo`]|[`VerticesStage`]|
//! |[`VerticesStage`]|[`Vec<Vertex>`]|[`FacesStage`]|
//! |[`FacesStage`]|[`Vec<Face>`]|[`TexturesStage`]|
//! |[`TexturesStage`]|[`Vec<String>`]|[`MaterialsStage`]|
//! |[`MaterialsStage`]|[`Vec<Material>`]|[`BonesStage`]|
//! |[`BonesStage`]|[`Vec<Bone>`]|[`MorphsStage`]|
//! |[`MorphsStage`]|[`Vec<Morph>`]|[`FrameStage`]|
//! |[`FrameStage`]|[`Vec<DisplayFrame>`]|[`RigidStage`]|
//! |[`RigidStage`]|[`Vec<Rigid>`]|[`JointStage`]|
//! |[`JointStage`]|[`Vec<Joint>`]|[`Option<SoftBodyStage>`]|
//! |[`SoftBodyStage`]|[`Vec<SoftBody>`]|There are no reader|
//!
//! Positions, normals and rotations are converted to the target space as each
//! element is decoded. References to earlier sections are checked when read,
//! references to later sections (vertex and bone to bone, morph to morph and rigid body)
//! once the rigid bodies are read.
//! ```rust
//! # fn run(bytes: &[u8]) -> Result<(), mmd_import::ParseError> {
//! let options = mmd_import::ParseOptions::default();
//! let model_info_stage = mmd_import::reader::ModelInfoStage::new(bytes, &options)?;
//! let (model_info, vertices_stage) = model_info_stage.read()?;
//! # Ok(())
//! # }
//! ```
//!
//! [`parse_model`] runs every stage.

use crate::binary_reader::BinaryReader;
use crate::config::{ParseContext, ParseOptions};
use crate::coordinate::{
    convert_joint_limits, convert_normal, convert_position, convert_rigid_rotation,
    convert_rotation_quaternion, reverse_winding,
};
use crate::error::{ParseError, ParseErrorKind, Section, WithElement};
use crate::translations::resolve_bone_names;
use crate::types::{
    AngleLimits, Bone, BoneFlags, BoneMorph, ControlPanel, DisplayFrame, DisplayItem, Face,
    GrantParent, GroupMorph, Header, Ik, IkLink, ImpulseMorph, IndexWidth, Joint, JointKind,
    LocalAxes, Material, MaterialFlags, MaterialMorph, MaterialMorphOp, Model, ModelInfo, Morph,
    MorphKind, PmxVersion, Rigid, RigidMode, RigidShape, SoftBody, SoftBodyAeroModel,
    SoftBodyAnchor, SoftBodyForm, SphereMode, SphereModeKind, TailSpec, TextEncoding, Toon,
    UvMorph, Vertex, VertexIndexWidth, VertexMorph, VertexWeight,
};
use glam::Vec3;

/// Reads a whole PMX 2.0/2.1 file.
///
/// Fails on the first structural problem; no partial model is returned.
pub fn parse_model(bytes: &[u8], options: &ParseOptions) -> Result<Model, ParseError> {
    let stage = ModelInfoStage::new(bytes, options)?;
    let header = stage.header();
    let (info, stage) = stage.read()?;
    let (vertices, stage) = stage.read()?;
    let (faces, stage) = stage.read()?;
    let (textures, stage) = stage.read()?;
    let (materials, stage) = stage.read()?;
    let (bones, stage) = stage.read()?;
    let (morphs, stage) = stage.read()?;
    let (display_frames, stage) = stage.read()?;
    let (rigid_bodies, stage) = stage.read()?;
    let (joints, stage) = stage.read()?;
    let soft_bodies = match stage {
        Some(stage) => stage.read()?,
        None => Vec::new(),
    };
    log::info!(
        "parsed PMX {:?} \"{}\": {} vertices, {} faces, {} textures, {} materials, {} bones, {} morphs, {} display frames, {} rigid bodies, {} joints, {} soft bodies",
        header.version,
        info.name,
        vertices.len(),
        faces.len(),
        textures.len(),
        materials.len(),
        bones.len(),
        morphs.len(),
        display_frames.len(),
        rigid_bodies.len(),
        joints.len(),
        soft_bodies.len(),
    );
    Ok(Model {
        header,
        info,
        vertices,
        faces,
        textures,
        materials,
        bones,
        morphs,
        display_frames,
        rigid_bodies,
        joints,
        soft_bodies,
    })
}

fn read_header(inner: &mut BinaryReader<'_>) -> Result<Header, ParseError> {
    inner.enter(Section::Header);
    let start = inner.offset();
    let magic = inner.take(4)?;
    if magic != b"PMX " {
        return Err(ParseError::new(
            Section::Header,
            start,
            ParseErrorKind::BadMagic {
                found: magic.to_vec(),
            },
        ));
    }
    let start = inner.offset();
    let version = inner.read_f32()?;
    let version = if version == 2.0 {
        PmxVersion::V20
    } else if version == 2.1 {
        PmxVersion::V21
    } else {
        return Err(ParseError::new(
            Section::Header,
            start,
            ParseErrorKind::UnsupportedVersion(version),
        ));
    };
    let start = inner.offset();
    let length = inner.read_u8()?;
    if length < 8 {
        return Err(ParseError::new(
            Section::Header,
            start,
            ParseErrorKind::CountMismatch {
                field: "globals",
                count: usize::from(length),
                detail: "at least 8 bytes required",
            },
        ));
    }
    let start = inner.offset();
    let config = inner.take(usize::from(length))?;
    if length > 8 {
        log::debug!("skipping {} unknown globals bytes", length - 8);
    }
    let at = |i: usize, kind: ParseErrorKind| ParseError::new(Section::Header, start + i, kind);
    let encoding = TextEncoding::try_from(config[0]).map_err(|kind| at(0, kind))?;
    let additional_uv = config[1];
    if additional_uv > 4 {
        return Err(at(1, ParseErrorKind::TooManyAdditionalUvs(additional_uv)));
    }
    let index = |i: usize| IndexWidth::try_from(config[i]).map_err(|kind| at(i, kind));
    Ok(Header {
        version,
        encoding,
        additional_uv,
        vertex_index: VertexIndexWidth::try_from(config[2]).map_err(|kind| at(2, kind))?,
        texture_index: index(3)?,
        material_index: index(4)?,
        bone_index: index(5)?,
        morph_index: index(6)?,
        rigid_index: index(7)?,
    })
}

pub struct ModelInfoStage<'a>(ReaderInner<'a>);

impl<'a> ModelInfoStage<'a> {
    /// the start of reader module.
    /// # Errors
    /// * magic number is not `PMX `
    /// * version is neither 2.0 nor 2.1
    /// * globals declare an unknown encoding or index width
    pub fn new(bytes: &'a [u8], options: &ParseOptions) -> Result<ModelInfoStage<'a>, ParseError> {
        let mut inner = BinaryReader::new(bytes);
        let header = read_header(&mut inner)?;
        log::debug!("PMX header {:?}", header);
        Ok(ModelInfoStage(ReaderInner {
            inner,
            header,
            ctx: ParseContext::new(&header, options),
            lens: Lens::default(),
            element: 0,
            pending: Vec::new(),
            face_index_count: 0,
        }))
    }

    pub fn header(&self) -> Header {
        self.0.header
    }

    pub fn read(mut self) -> Result<(ModelInfo, VerticesStage<'a>), ParseError> {
        self.0.inner.enter(Section::ModelInfo);
        let info = ModelInfo {
            name: self.0.read_text()?,
            name_en: self.0.read_text()?,
            comment: self.0.read_text()?,
            comment_en: self.0.read_text()?,
        };
        Ok((info, VerticesStage(self.0)))
    }
}

pub struct VerticesStage<'a>(ReaderInner<'a>);

impl<'a> VerticesStage<'a> {
    pub fn read(mut self) -> Result<(Vec<Vertex>, FacesStage<'a>), ParseError> {
        let vertices = self
            .0
            .read_section(Section::Vertices, 37, Self::read_pmx_vertex)?;
        self.0.lens.vertices = Some(vertices.len());
        Ok((vertices, FacesStage(self.0)))
    }

    fn read_pmx_vertex(r: &mut ReaderInner<'_>) -> Result<Vertex, ParseError> {
        let position = r.read_position()?;
        let normal = convert_normal(r.inner.read_vec3()?);
        let uv = r.inner.read_vec2()?;
        let additional_uvs = (0..r.ctx.additional_uv)
            .map(|_| r.inner.read_vec4())
            .collect::<Result<Vec<_>, _>>()?;
        let weight_type = r.inner.read_u8()?;
        let weight = match weight_type {
            0 => VertexWeight::BDEF1(r.read_ref(Referent::Bone, "weight bone")?),
            1 => VertexWeight::BDEF2 {
                bones: [
                    r.read_ref(Referent::Bone, "weight bone")?,
                    r.read_ref(Referent::Bone, "weight bone")?,
                ],
                weight: r.inner.read_f32()?,
            },
            2 | 4 => {
                let bones = [
                    r.read_ref(Referent::Bone, "weight bone")?,
                    r.read_ref(Referent::Bone, "weight bone")?,
                    r.read_ref(Referent::Bone, "weight bone")?,
                    r.read_ref(Referent::Bone, "weight bone")?,
                ];
                let weights = r.inner.read_vec4()?.to_array();
                if weight_type == 2 {
                    VertexWeight::BDEF4 { bones, weights }
                } else {
                    VertexWeight::QDEF { bones, weights }
                }
            }
            3 => VertexWeight::SDEF {
                bones: [
                    r.read_ref(Referent::Bone, "weight bone")?,
                    r.read_ref(Referent::Bone, "weight bone")?,
                ],
                weight: r.inner.read_f32()?,
                c: r.read_position()?,
                r0: r.read_position()?,
                r1: r.read_position()?,
            },
            x => return Err(r.unknown_tag("weight type", x)),
        };
        Ok(Vertex {
            position,
            normal,
            uv,
            additional_uvs,
            weight,
            edge_scale: r.inner.read_f32()?,
        })
    }
}

pub struct FacesStage<'a>(ReaderInner<'a>);

impl<'a> FacesStage<'a> {
    /// Read the faces, three vertex indices each, emitted in reversed order.
    pub fn read(mut self) -> Result<(Vec<Face>, TexturesStage<'a>), ParseError> {
        let r = &mut self.0;
        r.inner.enter(Section::Faces);
        let start = r.inner.offset();
        let index_count = r.inner.read_count(usize::from(u8::from(r.ctx.vertex_index)))?;
        if index_count % 3 != 0 {
            return Err(ParseError::new(
                Section::Faces,
                start,
                ParseErrorKind::CountMismatch {
                    field: "face indices",
                    count: index_count,
                    detail: "not a multiple of 3",
                },
            ));
        }
        log::debug!("{}: {} triangles", Section::Faces, index_count / 3);
        let mut faces = Vec::with_capacity(index_count / 3);
        for i in 0..index_count / 3 {
            r.element = i;
            let face = (|| {
                Ok::<_, ParseError>([
                    r.read_vertex()?,
                    r.read_vertex()?,
                    r.read_vertex()?,
                ])
            })()
            .at_element(i)?;
            faces.push(Face {
                vertices: reverse_winding(face),
            });
        }
        r.face_index_count = index_count;
        Ok((faces, TexturesStage(self.0)))
    }
}

pub struct TexturesStage<'a>(ReaderInner<'a>);

impl<'a> TexturesStage<'a> {
    /// Read relative texture path from current reading file
    ///
    /// # Note
    /// for Unix like -system user you need to convert \ to /
    pub fn read(mut self) -> Result<(Vec<String>, MaterialsStage<'a>), ParseError> {
        let textures = self
            .0
            .read_section(Section::Textures, 4, |r| r.read_text())?;
        self.0.lens.textures = Some(textures.len());
        Ok((textures, MaterialsStage(self.0)))
    }
}

pub struct MaterialsStage<'a>(ReaderInner<'a>);

impl<'a> MaterialsStage<'a> {
    ///Read material's information contains name ambient diffuse specular etc parameters.
    ///
    /// please read [Material](crate::types::Material) doc
    pub fn read(mut self) -> Result<(Vec<Material>, BonesStage<'a>), ParseError> {
        let mut claimed = 0_usize;
        let materials = self.0.read_section(Section::Materials, 80, |r| {
            let material = Self::read_pmx_material(r)?;
            claimed += material.index_count;
            if claimed > r.face_index_count {
                return Err(r.inner.error(ParseErrorKind::CountMismatch {
                    field: "material index count",
                    count: claimed,
                    detail: "materials claim more face indices than the file has",
                }));
            }
            Ok(material)
        })?;
        if claimed < self.0.face_index_count {
            log::warn!(
                "{} face indices are not claimed by any material",
                self.0.face_index_count - claimed
            );
        }
        self.0.lens.materials = Some(materials.len());
        Ok((materials, BonesStage(self.0)))
    }

    fn read_pmx_material(r: &mut ReaderInner<'_>) -> Result<Material, ParseError> {
        let name = r.read_text()?;
        let name_en = r.read_text()?;
        let diffuse = r.inner.read_vec4()?;
        let specular = r.inner.read_vec3()?;
        let specular_factor = r.inner.read_f32()?;
        let ambient = r.inner.read_vec3()?;
        let flags = MaterialFlags::from_bits_truncate(r.inner.read_u8()?);
        let edge_color = r.inner.read_vec4()?;
        let edge_size = r.inner.read_f32()?;
        let texture = r.read_ref(Referent::Texture, "texture")?;
        let sphere_texture = r.read_ref(Referent::Texture, "sphere texture")?;
        let sphere = match r.inner.read_u8()? {
            0 => None,
            1 => Some(SphereModeKind::Mul),
            2 => Some(SphereModeKind::Add),
            3 => Some(SphereModeKind::SubTexture),
            x => return Err(r.unknown_tag("sphere mode", x)),
        }
        .map(|kind| SphereMode {
            texture: sphere_texture,
            kind,
        });
        let toon = match r.inner.read_u8()? {
            0 => Toon::Texture(r.read_ref(Referent::Texture, "toon texture")?),
            1 => Toon::Shared(r.inner.read_u8()?),
            x => return Err(r.unknown_tag("toon mode", x)),
        };
        let memo = r.read_text()?;
        let start = r.inner.offset();
        let index_count = r.inner.read_i32()?;
        let index_count = usize::try_from(index_count).map_err(|_| {
            ParseError::new(
                Section::Materials,
                start,
                ParseErrorKind::NegativeCount(index_count),
            )
        })?;
        if index_count % 3 != 0 {
            return Err(ParseError::new(
                Section::Materials,
                start,
                ParseErrorKind::CountMismatch {
                    field: "material index count",
                    count: index_count,
                    detail: "not a multiple of 3",
                },
            ));
        }
        Ok(Material {
            name,
            name_en,
            diffuse,
            specular,
            specular_factor,
            ambient,
            flags,
            edge_color,
            edge_size,
            texture,
            sphere,
            toon,
            memo,
            index_count,
        })
    }
}

pub struct BonesStage<'a>(ReaderInner<'a>);

impl<'a> BonesStage<'a> {
    /// read bone's information parent child IK etc.
    ///
    /// Target-language names are resolved once every bone is known.
    pub fn read(mut self) -> Result<(Vec<Bone>, MorphsStage<'a>), ParseError> {
        let mut bones = self
            .0
            .read_section(Section::Bones, 20, Self::read_pmx_bone)?;
        let names = resolve_bone_names(
            bones
                .iter()
                .map(|bone| (bone.name_jp.as_str(), bone.name_en.as_str())),
        );
        for (bone, name) in bones.iter_mut().zip(names) {
            bone.name = name;
        }
        self.0.lens.bones = Some(bones.len());
        Ok((bones, MorphsStage(self.0)))
    }

    fn read_pmx_bone(r: &mut ReaderInner<'_>) -> Result<Bone, ParseError> {
        let name_jp = r.read_text()?;
        let name_en = r.read_text()?;
        let position = r.read_position()?;
        let parent = r.read_ref(Referent::Bone, "parent")?;
        let transform_order = r.inner.read_i32()?;
        let flags = BoneFlags::from_bits_truncate(r.inner.read_u16()?);
        let tail = if flags.contains(BoneFlags::CONNECT_TO_OTHER_BONE) {
            TailSpec::PointAt(r.read_ref(Referent::Bone, "tail")?)
        } else {
            TailSpec::Offset(r.read_position()?)
        };
        let rotation = flags.contains(BoneFlags::INHERIT_ROTATION);
        let translation = flags.contains(BoneFlags::INHERIT_TRANSLATION);
        let grant = if rotation || translation {
            Some(GrantParent {
                source: r.read_ref(Referent::Bone, "grant parent")?,
                factor: r.inner.read_f32()?,
                rotation,
                translation,
                local: flags.contains(BoneFlags::INHERIT_LOCAL),
            })
        } else {
            None
        };
        let fixed_axis = if flags.contains(BoneFlags::FIXED_AXIS) {
            Some(convert_normal(r.inner.read_vec3()?))
        } else {
            None
        };
        let local_axes = if flags.contains(BoneFlags::LOCAL_COORDINATE) {
            LocalAxes::Explicit {
                x: convert_normal(r.inner.read_vec3()?),
                z: convert_normal(r.inner.read_vec3()?),
            }
        } else {
            LocalAxes::Derived
        };
        let external_parent = if flags.contains(BoneFlags::EXTERNAL_PARENT_DEFORM) {
            Some(r.inner.read_i32()?)
        } else {
            None
        };
        let ik = if flags.contains(BoneFlags::IK) {
            let target = r.read_ref(Referent::Bone, "ik target")?;
            let iterations = r.inner.read_i32()?;
            let limit_angle = r.inner.read_f32()?;
            let link_count = r
                .inner
                .read_count(usize::from(u8::from(r.ctx.bone_index)) + 1)?;
            let links = (0..link_count)
                .map(|_| Self::read_iklink(r))
                .collect::<Result<Vec<_>, _>>()?;
            Some(Ik {
                target,
                iterations,
                limit_angle,
                links,
            })
        } else {
            None
        };
        Ok(Bone {
            name: String::new(),
            name_jp,
            name_en,
            position,
            parent,
            transform_order,
            flags,
            tail,
            grant,
            fixed_axis,
            local_axes,
            external_parent,
            ik,
        })
    }

    fn read_iklink(r: &mut ReaderInner<'_>) -> Result<IkLink, ParseError> {
        let bone = r.read_ref(Referent::Bone, "ik link")?;
        let limits = if r.inner.read_bool()? {
            Some(AngleLimits {
                lower: convert_position(r.inner.read_vec3()?),
                upper: convert_position(r.inner.read_vec3()?),
            })
        } else {
            None
        };
        Ok(IkLink { bone, limits })
    }
}

pub struct MorphsStage<'a>(ReaderInner<'a>);

impl<'a> MorphsStage<'a> {
    pub fn read(mut self) -> Result<(Vec<Morph>, FrameStage<'a>), ParseError> {
        let morphs = self
            .0
            .read_section(Section::Morphs, 14, Self::read_pmx_morph)?;
        self.0.lens.morphs = Some(morphs.len());
        Ok((morphs, FrameStage(self.0)))
    }

    fn read_pmx_morph(r: &mut ReaderInner<'_>) -> Result<Morph, ParseError> {
        let name = r.read_text()?;
        let name_en = r.read_text()?;
        let panel = match r.inner.read_u8()? {
            0 => ControlPanel::System,
            1 => ControlPanel::BottomLeft,
            2 => ControlPanel::TopLeft,
            3 => ControlPanel::TopRight,
            4 => ControlPanel::BottomRight,
            x => return Err(r.unknown_tag("morph panel", x)),
        };
        let kind = match r.inner.read_u8()? {
            0 => MorphKind::Group(r.read_offsets(Self::read_group_morph)?),
            1 => MorphKind::Vertex(r.read_offsets(Self::read_vertex_morph)?),
            2 => MorphKind::Bone(r.read_offsets(Self::read_bone_morph)?),
            x @ 3..=7 => MorphKind::Uv {
                channel: x - 3,
                offsets: r.read_offsets(Self::read_uv_morph)?,
            },
            8 => MorphKind::Material(r.read_offsets(Self::read_material_morph)?),
            9 => MorphKind::Flip(r.read_offsets(Self::read_group_morph)?),
            10 => MorphKind::Impulse(r.read_offsets(Self::read_impulse_morph)?),
            x => return Err(r.unknown_tag("morph kind", x)),
        };
        Ok(Morph {
            name,
            name_en,
            panel,
            kind,
        })
    }

    fn read_group_morph(r: &mut ReaderInner<'_>) -> Result<GroupMorph, ParseError> {
        Ok(GroupMorph {
            morph: r.read_required_ref(Referent::Morph, "morph")?,
            factor: r.inner.read_f32()?,
        })
    }

    fn read_vertex_morph(r: &mut ReaderInner<'_>) -> Result<VertexMorph, ParseError> {
        Ok(VertexMorph {
            vertex: r.read_vertex()?,
            offset: r.read_position()?,
        })
    }

    fn read_uv_morph(r: &mut ReaderInner<'_>) -> Result<UvMorph, ParseError> {
        Ok(UvMorph {
            vertex: r.read_vertex()?,
            offset: r.inner.read_vec4()?,
        })
    }

    fn read_bone_morph(r: &mut ReaderInner<'_>) -> Result<BoneMorph, ParseError> {
        Ok(BoneMorph {
            bone: r.read_required_ref(Referent::Bone, "bone")?,
            translation: r.read_position()?,
            rotation: convert_rotation_quaternion(r.inner.read_quat()?),
        })
    }

    fn read_material_morph(r: &mut ReaderInner<'_>) -> Result<MaterialMorph, ParseError> {
        let material = r.read_ref(Referent::Material, "material")?;
        let op = match r.inner.read_u8()? {
            0 => MaterialMorphOp::Multiply,
            1 => MaterialMorphOp::Add,
            x => return Err(r.unknown_tag("material morph operation", x)),
        };
        Ok(MaterialMorph {
            material,
            op,
            diffuse: r.inner.read_vec4()?,
            specular: r.inner.read_vec3()?,
            specular_factor: r.inner.read_f32()?,
            ambient: r.inner.read_vec3()?,
            edge_color: r.inner.read_vec4()?,
            edge_size: r.inner.read_f32()?,
            texture_factor: r.inner.read_vec4()?,
            sphere_texture_factor: r.inner.read_vec4()?,
            toon_texture_factor: r.inner.read_vec4()?,
        })
    }

    fn read_impulse_morph(r: &mut ReaderInner<'_>) -> Result<ImpulseMorph, ParseError> {
        Ok(ImpulseMorph {
            rigid: r.read_required_ref(Referent::Rigid, "rigid body")?,
            local: r.inner.read_bool()?,
            velocity: r.read_position()?,
            torque: convert_position(r.inner.read_vec3()?),
        })
    }
}

pub struct FrameStage<'a>(ReaderInner<'a>);

impl<'a> FrameStage<'a> {
    /// read `MMD` display frames
    pub fn read(mut self) -> Result<(Vec<DisplayFrame>, RigidStage<'a>), ParseError> {
        let frames = self.0.read_section(Section::DisplayFrames, 13, |r| {
            let name = r.read_text()?;
            let name_en = r.read_text()?;
            let special = r.inner.read_bool()?;
            let items = r.read_offsets(|r| match r.inner.read_u8()? {
                0 => Ok(DisplayItem::Bone(r.read_required_ref(Referent::Bone, "bone")?)),
                1 => Ok(DisplayItem::Morph(
                    r.read_required_ref(Referent::Morph, "morph")?,
                )),
                x => Err(r.unknown_tag("display item", x)),
            })?;
            Ok(DisplayFrame {
                name,
                name_en,
                special,
                items,
            })
        })?;
        Ok((frames, RigidStage(self.0)))
    }
}

pub struct RigidStage<'a>(ReaderInner<'a>);

impl<'a> RigidStage<'a> {
    /// Reads the rigid bodies, then checks every reference made to a later section.
    pub fn read(mut self) -> Result<(Vec<Rigid>, JointStage<'a>), ParseError> {
        let rigid_bodies = self
            .0
            .read_section(Section::RigidBodies, 70, Self::read_rigid)?;
        self.0.lens.rigids = Some(rigid_bodies.len());
        self.0.resolve_pending()?;
        Ok((rigid_bodies, JointStage(self.0)))
    }

    fn read_rigid(r: &mut ReaderInner<'_>) -> Result<Rigid, ParseError> {
        let name = r.read_text()?;
        let name_en = r.read_text()?;
        let bone = r.read_ref(Referent::Bone, "bone")?;
        let group = r.inner.read_u8()?;
        if group > 15 {
            return Err(r.unknown_tag("collision group", group));
        }
        let collision_mask = r.inner.read_u16()?;
        let shape_offset = r.inner.offset();
        let shape = r.inner.read_u8()?;
        let size = r.inner.read_vec3()? * r.ctx.scale;
        let shape = match shape {
            0 => RigidShape::Sphere { radius: size.x },
            1 => RigidShape::Box {
                half_extents: convert_position(size),
            },
            2 => RigidShape::Capsule {
                radius: size.x,
                height: size.y,
            },
            x => return Err(r.unknown_tag_at(shape_offset, "rigid shape", i64::from(x))),
        };
        let position = r.read_position()?;
        let rotation = convert_rigid_rotation(r.inner.read_vec3()?);
        let mass = r.inner.read_f32()?;
        let linear_damping = r.inner.read_f32()?;
        let angular_damping = r.inner.read_f32()?;
        let restitution = r.inner.read_f32()?;
        let friction = r.inner.read_f32()?;
        let mode = match r.inner.read_u8()? {
            0 => RigidMode::Static,
            1 => RigidMode::Dynamic,
            2 => RigidMode::DynamicWithBonePosition,
            x => return Err(r.unknown_tag("rigid mode", x)),
        };
        Ok(Rigid {
            name,
            name_en,
            bone,
            group,
            collision_mask,
            shape,
            position,
            rotation,
            mass,
            linear_damping,
            angular_damping,
            restitution,
            friction,
            mode,
        })
    }
}

pub struct JointStage<'a>(ReaderInner<'a>);

impl<'a> JointStage<'a> {
    /// `Some` only for PMX 2.1 files with bytes left after the joints.
    pub fn read(mut self) -> Result<(Vec<Joint>, Option<SoftBodyStage<'a>>), ParseError> {
        let joints = self.0.read_section(Section::Joints, 107, Self::read_joint)?;
        let next = if self.0.header.version == PmxVersion::V21 && !self.0.inner.is_empty() {
            Some(SoftBodyStage(self.0))
        } else {
            self.0.warn_trailing();
            None
        };
        Ok((joints, next))
    }

    fn read_joint(r: &mut ReaderInner<'_>) -> Result<Joint, ParseError> {
        let name = r.read_text()?;
        let name_en = r.read_text()?;
        let kind = match r.inner.read_u8()? {
            0 => JointKind::Spring6Dof,
            1 => JointKind::SixDof,
            2 => JointKind::PointToPoint,
            3 => JointKind::ConeTwist,
            4 => JointKind::Slider,
            5 => JointKind::Hinge,
            x => return Err(r.unknown_tag("joint kind", x)),
        };
        let rigid_a = r.read_ref(Referent::Rigid, "rigid body a")?;
        let rigid_b = r.read_ref(Referent::Rigid, "rigid body b")?;
        let position = r.read_position()?;
        let rotation = convert_rigid_rotation(r.inner.read_vec3()?);
        let translation_limits = AngleLimits {
            lower: r.read_position()?,
            upper: r.read_position()?,
        };
        let rotation_lower = r.inner.read_vec3()?;
        let rotation_upper = r.inner.read_vec3()?;
        let (lower, upper) = convert_joint_limits(rotation_lower, rotation_upper);
        Ok(Joint {
            name,
            name_en,
            kind,
            rigid_a,
            rigid_b,
            position,
            rotation,
            translation_limits,
            rotation_limits: AngleLimits { lower, upper },
            spring_translation: convert_position(r.inner.read_vec3()?),
            spring_rotation: convert_position(r.inner.read_vec3()?),
        })
    }
}

pub struct SoftBodyStage<'a>(ReaderInner<'a>);

impl<'a> SoftBodyStage<'a> {
    pub fn read(mut self) -> Result<Vec<SoftBody>, ParseError> {
        let soft_bodies = self
            .0
            .read_section(Section::SoftBodies, 8, Self::read_soft_body)?;
        self.0.warn_trailing();
        Ok(soft_bodies)
    }

    fn read_soft_body(r: &mut ReaderInner<'_>) -> Result<SoftBody, ParseError> {
        let name = r.read_text()?;
        let name_en = r.read_text()?;
        let form = match r.inner.read_u8()? {
            0 => SoftBodyForm::TriMesh,
            1 => SoftBodyForm::Rope,
            x => return Err(r.unknown_tag("soft body form", x)),
        };
        let material = r.read_ref(Referent::Material, "material")?;
        let group = r.inner.read_u8()?;
        let collision_mask = r.inner.read_u16()?;
        let flags = r.inner.read_u8()?;
        let b_link_distance = r.inner.read_i32()?;
        let clusters = r.inner.read_i32()?;
        let mass = r.inner.read_f32()?;
        let collision_margin = r.inner.read_f32()?;
        let aero_offset = r.inner.offset();
        let aero_model = match r.inner.read_i32()? {
            0 => SoftBodyAeroModel::VPoint,
            1 => SoftBodyAeroModel::VTwoSided,
            2 => SoftBodyAeroModel::VOneSided,
            3 => SoftBodyAeroModel::FTwoSided,
            4 => SoftBodyAeroModel::FOneSided,
            x => return Err(r.unknown_tag_at(aero_offset, "aero model", i64::from(x))),
        };
        let mut config = [0.0; 12];
        for value in config.iter_mut() {
            *value = r.inner.read_f32()?;
        }
        let mut cluster = [0.0; 6];
        for value in cluster.iter_mut() {
            *value = r.inner.read_f32()?;
        }
        let mut iterations = [0; 4];
        for value in iterations.iter_mut() {
            *value = r.inner.read_i32()?;
        }
        let mut stiffness = [0.0; 3];
        for value in stiffness.iter_mut() {
            *value = r.inner.read_f32()?;
        }
        let anchors = r.read_offsets(|r| {
            Ok(SoftBodyAnchor {
                rigid: r.read_required_ref(Referent::Rigid, "anchor rigid body")?,
                vertex: r.read_vertex()?,
                near_mode: r.inner.read_bool()?,
            })
        })?;
        let pinned_vertices = r.read_offsets(|r| r.read_vertex())?;
        Ok(SoftBody {
            name,
            name_en,
            form,
            material,
            group,
            collision_mask,
            flags,
            b_link_distance,
            clusters,
            mass,
            collision_margin,
            aero_model,
            config,
            cluster,
            iterations,
            stiffness,
            anchors,
            pinned_vertices,
        })
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Referent {
    Vertex,
    Texture,
    Material,
    Bone,
    Morph,
    Rigid,
}

/// element counts of the sections read so far
#[derive(Debug, Default)]
struct Lens {
    vertices: Option<usize>,
    textures: Option<usize>,
    materials: Option<usize>,
    bones: Option<usize>,
    morphs: Option<usize>,
    rigids: Option<usize>,
}

impl Lens {
    fn of(&self, referent: Referent) -> Option<usize> {
        match referent {
            Referent::Vertex => self.vertices,
            Referent::Texture => self.textures,
            Referent::Material => self.materials,
            Referent::Bone => self.bones,
            Referent::Morph => self.morphs,
            Referent::Rigid => self.rigids,
        }
    }
}

/// a reference into a section that was not read yet
#[derive(Debug)]
struct PendingRef {
    referent: Referent,
    field: &'static str,
    index: usize,
    section: Section,
    element: usize,
    offset: usize,
}

struct ReaderInner<'a> {
    inner: BinaryReader<'a>,
    header: Header,
    ctx: ParseContext,
    lens: Lens,
    /// element of the current section being decoded
    element: usize,
    pending: Vec<PendingRef>,
    face_index_count: usize,
}

impl<'a> ReaderInner<'a> {
    fn read_section<T>(
        &mut self,
        section: Section,
        min_element_size: usize,
        mut read: impl FnMut(&mut Self) -> Result<T, ParseError>,
    ) -> Result<Vec<T>, ParseError> {
        self.inner.enter(section);
        let count = self.inner.read_count(min_element_size)?;
        log::debug!("{}: {} elements", section, count);
        let mut items = Vec::with_capacity(count);
        for i in 0..count {
            self.element = i;
            items.push(read(self).at_element(i)?);
        }
        Ok(items)
    }

    /// count-prefixed list inside an element
    fn read_offsets<T>(
        &mut self,
        mut read: impl FnMut(&mut Self) -> Result<T, ParseError>,
    ) -> Result<Vec<T>, ParseError> {
        let count = self.inner.read_count(1)?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(read(self)?);
        }
        Ok(items)
    }

    fn read_text(&mut self) -> Result<String, ParseError> {
        self.inner.read_text(self.ctx.encoding)
    }

    /// converted and scaled
    fn read_position(&mut self) -> Result<Vec3, ParseError> {
        Ok(convert_position(self.inner.read_vec3()?) * self.ctx.scale)
    }

    /// for a one-byte tag that was just consumed
    fn unknown_tag(&self, field: &'static str, value: u8) -> ParseError {
        self.unknown_tag_at(self.inner.offset() - 1, field, i64::from(value))
    }

    fn unknown_tag_at(&self, offset: usize, field: &'static str, value: i64) -> ParseError {
        ParseError::new(
            self.inner.section(),
            offset,
            ParseErrorKind::UnknownTag { field, value },
        )
    }

    fn width(&self, referent: Referent) -> IndexWidth {
        match referent {
            Referent::Vertex => match self.ctx.vertex_index {
                VertexIndexWidth::Width1 => IndexWidth::Width1,
                VertexIndexWidth::Width2 => IndexWidth::Width2,
                VertexIndexWidth::Width4 => IndexWidth::Width4,
            },
            Referent::Texture => self.ctx.texture_index,
            Referent::Material => self.ctx.material_index,
            Referent::Bone => self.ctx.bone_index,
            Referent::Morph => self.ctx.morph_index,
            Referent::Rigid => self.ctx.rigid_index,
        }
    }

    fn read_vertex(&mut self) -> Result<usize, ParseError> {
        let start = self.inner.offset();
        let raw = self.inner.read_vertex_index(self.ctx.vertex_index)?;
        self.check(Referent::Vertex, "vertex", raw, start)
    }

    /// -1 reads as `None`
    fn read_ref(
        &mut self,
        referent: Referent,
        field: &'static str,
    ) -> Result<Option<usize>, ParseError> {
        let width = self.width(referent);
        let start = self.inner.offset();
        match self.inner.read_index(width)? {
            -1 => Ok(None),
            raw => self.check(referent, field, i64::from(raw), start).map(Some),
        }
    }

    /// -1 is an error
    fn read_required_ref(
        &mut self,
        referent: Referent,
        field: &'static str,
    ) -> Result<usize, ParseError> {
        let width = self.width(referent);
        let start = self.inner.offset();
        let raw = self.inner.read_index(width)?;
        self.check(referent, field, i64::from(raw), start)
    }

    fn check(
        &mut self,
        referent: Referent,
        field: &'static str,
        raw: i64,
        offset: usize,
    ) -> Result<usize, ParseError> {
        let section = self.inner.section();
        let out_of_range = |len| {
            ParseError::new(
                section,
                offset,
                ParseErrorKind::IndexOutOfRange {
                    field,
                    index: raw,
                    len,
                },
            )
        };
        let index = match usize::try_from(raw) {
            Ok(index) => index,
            Err(_) => return Err(out_of_range(self.lens.of(referent).unwrap_or(0))),
        };
        match self.lens.of(referent) {
            Some(len) if index >= len => Err(out_of_range(len)),
            Some(_) => Ok(index),
            None => {
                self.pending.push(PendingRef {
                    referent,
                    field,
                    index,
                    section,
                    element: self.element,
                    offset,
                });
                Ok(index)
            }
        }
    }

    fn resolve_pending(&mut self) -> Result<(), ParseError> {
        for pending in self.pending.drain(..) {
            let len = self.lens.of(pending.referent).unwrap_or(0);
            if pending.index >= len {
                return Err(ParseError {
                    section: pending.section,
                    element: Some(pending.element),
                    offset: pending.offset,
                    kind: ParseErrorKind::IndexOutOfRange {
                        field: pending.field,
                        index: pending.index as i64,
                        len,
                    },
                });
            }
        }
        Ok(())
    }

    fn warn_trailing(&self) {
        if !self.inner.is_empty() {
            log::warn!(
                "{} trailing bytes after the last section at byte {}",
                self.inner.remaining(),
                self.inner.offset()
            );
        }
    }
}
