//! # VMD reading module.
//!
//! |Section|record size|
//! |-------|-----------|
//! |header|50 (30 signature + 20 model name)|
//! |bone keyframes|111|
//! |morph keyframes|23|
//! |camera keyframes|61|
//! |light keyframes|28|
//! |shadow keyframes|9|
//! |property keyframes|9 + 21 per IK state|
//!
//! Every section is a 4-byte count followed by its records. Names are null
//! padded Shift_JIS. No coordinate conversion is applied here.

use crate::binary_reader::BinaryReader;
use crate::error::{ParseError, ParseErrorKind, Section, WithElement};
use crate::motion::{
    BoneKeyframe, CameraKeyframe, IkState, LightKeyframe, Motion, MorphKeyframe,
    PropertyKeyframe, ShadowKeyframe,
};
use crate::types::TextEncoding;

pub const SIGNATURE: &[u8] = b"Vocaloid Motion Data 0002";
pub const SIGNATURE_LENGTH: usize = 30;
pub const MODEL_NAME_LENGTH: usize = 20;
pub const BONE_NAME_LENGTH: usize = 15;
pub const IK_NAME_LENGTH: usize = 20;

/// Reads a whole VMD file.
///
/// The file may end cleanly at any section boundary after the morph keyframes;
/// the sections left out are empty. Ending inside a section is a truncation error.
pub fn parse_motion(bytes: &[u8]) -> Result<Motion, ParseError> {
    let mut reader = MotionReader {
        inner: BinaryReader::new(bytes),
    };
    let model_name = reader.read_header()?;
    let bone_keyframes = reader.read_section(Section::BoneKeyframes, 111, MotionReader::read_bone)?;
    let morph_keyframes =
        reader.read_section(Section::MorphKeyframes, 23, MotionReader::read_morph)?;
    let camera_keyframes =
        reader.read_optional_section(Section::CameraKeyframes, 61, MotionReader::read_camera)?;
    let light_keyframes =
        reader.read_optional_section(Section::LightKeyframes, 28, MotionReader::read_light)?;
    let shadow_keyframes =
        reader.read_optional_section(Section::ShadowKeyframes, 9, MotionReader::read_shadow)?;
    let property_keyframes = reader.read_optional_section(
        Section::PropertyKeyframes,
        9,
        MotionReader::read_property,
    )?;
    if !reader.inner.is_empty() {
        log::warn!(
            "{} trailing bytes after the last VMD section",
            reader.inner.remaining()
        );
    }
    log::info!(
        "parsed VMD for \"{}\": {} bone, {} morph, {} camera, {} light, {} shadow, {} property keyframes",
        model_name,
        bone_keyframes.len(),
        morph_keyframes.len(),
        camera_keyframes.len(),
        light_keyframes.len(),
        shadow_keyframes.len(),
        property_keyframes.len(),
    );
    Ok(Motion {
        model_name,
        bone_keyframes,
        morph_keyframes,
        camera_keyframes,
        light_keyframes,
        shadow_keyframes,
        property_keyframes,
    })
}

struct MotionReader<'a> {
    inner: BinaryReader<'a>,
}

impl<'a> MotionReader<'a> {
    fn read_header(&mut self) -> Result<String, ParseError> {
        self.inner.enter(Section::MotionHeader);
        let signature = self.inner.take(SIGNATURE_LENGTH)?;
        if !signature.starts_with(SIGNATURE) {
            let end = signature
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(SIGNATURE_LENGTH);
            return Err(ParseError::new(
                Section::MotionHeader,
                0,
                ParseErrorKind::BadMagic {
                    found: signature[..end].to_vec(),
                },
            ));
        }
        self.read_name(MODEL_NAME_LENGTH)
    }

    fn read_name(&mut self, length: usize) -> Result<String, ParseError> {
        self.inner.read_fixed_text(length, TextEncoding::ShiftJis)
    }

    /// unsigned 4-byte record count that must fit in the rest of the file
    fn read_count(&mut self, min_record_size: usize) -> Result<usize, ParseError> {
        let count = self.inner.read_u32()? as usize;
        let needed = count.saturating_mul(min_record_size);
        if needed > self.inner.remaining() {
            return Err(self.inner.error(ParseErrorKind::Truncated {
                needed,
                remaining: self.inner.remaining(),
            }));
        }
        Ok(count)
    }

    fn read_section<T>(
        &mut self,
        section: Section,
        min_record_size: usize,
        mut read: impl FnMut(&mut Self) -> Result<T, ParseError>,
    ) -> Result<Vec<T>, ParseError> {
        self.inner.enter(section);
        let count = self.read_count(min_record_size)?;
        log::debug!("{}: {} records", section, count);
        let mut records = Vec::with_capacity(count);
        for i in 0..count {
            records.push(read(self).at_element(i)?);
        }
        Ok(records)
    }

    /// empty when the file ends right before the section
    fn read_optional_section<T>(
        &mut self,
        section: Section,
        min_record_size: usize,
        read: impl FnMut(&mut Self) -> Result<T, ParseError>,
    ) -> Result<Vec<T>, ParseError> {
        if self.inner.is_empty() {
            log::debug!("{}: absent", section);
            return Ok(Vec::new());
        }
        self.read_section(section, min_record_size, read)
    }

    fn read_bone(&mut self) -> Result<BoneKeyframe, ParseError> {
        let name = self.read_name(BONE_NAME_LENGTH)?;
        let frame = self.inner.read_u32()?;
        let position = self.inner.read_vec3()?;
        let rotation = self.inner.read_quat()?;
        let mut interpolation = [0_u8; 64];
        interpolation.copy_from_slice(self.inner.take(64)?);
        Ok(BoneKeyframe {
            name,
            frame,
            position,
            rotation,
            interpolation,
        })
    }

    fn read_morph(&mut self) -> Result<MorphKeyframe, ParseError> {
        Ok(MorphKeyframe {
            name: self.read_name(BONE_NAME_LENGTH)?,
            frame: self.inner.read_u32()?,
            weight: self.inner.read_f32()?,
        })
    }

    fn read_camera(&mut self) -> Result<CameraKeyframe, ParseError> {
        let frame = self.inner.read_u32()?;
        let distance = self.inner.read_f32()?;
        let position = self.inner.read_vec3()?;
        let rotation = self.inner.read_vec3()?;
        let mut interpolation = [0_u8; 24];
        interpolation.copy_from_slice(self.inner.take(24)?);
        let fov = self.inner.read_u32()?;
        let orthographic = self.inner.read_bool()?;
        Ok(CameraKeyframe {
            frame,
            distance,
            position,
            rotation,
            interpolation,
            fov,
            orthographic,
        })
    }

    fn read_light(&mut self) -> Result<LightKeyframe, ParseError> {
        Ok(LightKeyframe {
            frame: self.inner.read_u32()?,
            color: self.inner.read_vec3()?,
            direction: self.inner.read_vec3()?,
        })
    }

    fn read_shadow(&mut self) -> Result<ShadowKeyframe, ParseError> {
        Ok(ShadowKeyframe {
            frame: self.inner.read_u32()?,
            mode: self.inner.read_u8()?,
            distance: self.inner.read_f32()?,
        })
    }

    fn read_property(&mut self) -> Result<PropertyKeyframe, ParseError> {
        let frame = self.inner.read_u32()?;
        let visible = self.inner.read_bool()?;
        let count = self.read_count(IK_NAME_LENGTH + 1)?;
        let mut ik_states = Vec::with_capacity(count);
        for _ in 0..count {
            ik_states.push(IkState {
                name: self.read_name(IK_NAME_LENGTH)?,
                enabled: self.inner.read_bool()?,
            });
        }
        Ok(PropertyKeyframe {
            frame,
            visible,
            ik_states,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::binary_writer::BinaryWriter;
    use crate::interpolation::{encode_bone_block, LINEAR_CONTROL_BYTES};
    use glam::{Quat, Vec3};

    fn header(w: &mut BinaryWriter, model: &str) {
        let mut signature = SIGNATURE.to_vec();
        signature.resize(SIGNATURE_LENGTH, 0);
        w.write_bytes(&signature);
        w.write_fixed_text(MODEL_NAME_LENGTH, model);
    }

    fn write_bone(w: &mut BinaryWriter, name: &str, frame: u32, position: [f32; 3], rotation: [f32; 4]) {
        w.write_fixed_text(BONE_NAME_LENGTH, name)
            .write_u32(frame)
            .write_vec3(position)
            .write_vec4(rotation)
            .write_bytes(&encode_bone_block([LINEAR_CONTROL_BYTES; 4]));
    }

    /// header, one identity keyframe for センター, no morphs
    fn single_keyframe() -> BinaryWriter {
        let mut w = BinaryWriter::default();
        header(&mut w, "初音ミク");
        w.write_u32(1);
        write_bone(&mut w, "センター", 0, [0.0; 3], [0.0, 0.0, 0.0, 1.0]);
        w.write_u32(0);
        w
    }

    fn full_motion() -> Vec<u8> {
        let mut w = BinaryWriter::default();
        header(&mut w, "model");
        w.write_u32(2);
        write_bone(&mut w, "右腕", 15, [1.0, 2.0, 3.0], [0.0, 0.0, 0.0, 0.0]);
        write_bone(&mut w, "右腕", 5, [0.0; 3], [0.0, 0.0, 0.0, 1.0]);
        w.write_u32(1);
        w.write_fixed_text(BONE_NAME_LENGTH, "まばたき")
            .write_u32(7)
            .write_f32(0.75);
        w.write_u32(1);
        w.write_u32(3)
            .write_f32(-45.0)
            .write_vec3([0.0, 10.0, 0.0])
            .write_vec3([0.1, 0.2, 0.3])
            .write_bytes(&[20; 24])
            .write_u32(30)
            .write_u8(1);
        w.write_u32(1);
        w.write_u32(0)
            .write_vec3([0.6, 0.6, 0.6])
            .write_vec3([-0.5, -1.0, 0.5]);
        w.write_u32(1);
        w.write_u32(0).write_u8(1).write_f32(8875.0);
        w.write_u32(1);
        w.write_u32(0).write_u8(1).write_u32(2);
        w.write_fixed_text(IK_NAME_LENGTH, "左足ＩＫ").write_u8(0);
        w.write_fixed_text(IK_NAME_LENGTH, "右足ＩＫ").write_u8(1);
        w.into_bytes()
    }

    #[test]
    fn single_identity_keyframe() {
        let bytes = single_keyframe().into_bytes();
        let motion = parse_motion(&bytes).unwrap();
        assert_eq!(motion.model_name, "初音ミク");
        assert_eq!(motion.bone_keyframes.len(), 1);
        let keyframe = &motion.bone_keyframes[0];
        assert_eq!(keyframe.name, "センター");
        assert_eq!(keyframe.frame, 0);
        assert_eq!(keyframe.position, Vec3::ZERO);
        assert_eq!(keyframe.rotation, Quat::IDENTITY);
        assert!(motion.morph_keyframes.is_empty());
        assert!(motion.camera_keyframes.is_empty());
        assert!(motion.property_keyframes.is_empty());
    }

    #[test]
    fn name_field_is_exactly_fifteen_bytes() {
        // 14 bytes of double-byte characters and one ASCII byte, no null
        let mut w = BinaryWriter::default();
        header(&mut w, "");
        w.write_u32(1);
        write_bone(&mut w, "左ひじ補助先端1", 0, [0.0; 3], [0.0, 0.0, 0.0, 1.0]);
        w.write_u32(0);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), 50 + 4 + 111 + 4);
        let motion = parse_motion(&bytes).unwrap();
        assert_eq!(motion.bone_keyframes[0].name, "左ひじ補助先端1");
        assert_eq!(motion.model_name, "");
    }

    #[test]
    fn every_section() {
        let motion = parse_motion(&full_motion()).unwrap();
        assert_eq!(motion.bone_keyframes.len(), 2);
        // zero quaternions are kept as stored
        assert_eq!(motion.bone_keyframes[0].rotation, Quat::from_xyzw(0.0, 0.0, 0.0, 0.0));
        assert_eq!(motion.bone_keyframes[0].position, Vec3::new(1.0, 2.0, 3.0));
        let track = &motion.bone_tracks()["右腕"];
        assert_eq!(track.iter().map(|k| k.frame).collect::<Vec<_>>(), vec![5, 15]);

        assert_eq!(motion.morph_keyframes[0].name, "まばたき");
        assert_eq!(motion.morph_keyframes[0].weight, 0.75);

        let camera = &motion.camera_keyframes[0];
        assert_eq!(camera.frame, 3);
        assert_eq!(camera.distance, -45.0);
        assert_eq!(camera.fov, 30);
        assert!(camera.orthographic);
        assert_eq!(camera.curves().fov.x1, 20.0 / 127.0);

        assert_eq!(motion.light_keyframes[0].color, Vec3::splat(0.6));
        assert_eq!(motion.shadow_keyframes[0].mode, 1);
        assert_eq!(motion.shadow_keyframes[0].distance, 8875.0);

        let property = &motion.property_keyframes[0];
        assert!(property.visible);
        assert_eq!(
            property.ik_states,
            vec![
                IkState {
                    name: "左足ＩＫ".to_owned(),
                    enabled: false
                },
                IkState {
                    name: "右足ＩＫ".to_owned(),
                    enabled: true
                },
            ]
        );
        assert_eq!(motion.max_frame(), 15);
    }

    #[test]
    fn truncated_inside_a_section_fails() {
        let bytes = full_motion();
        // only the boundaries after the morph section are clean ends
        let boundaries = section_boundaries(&bytes);
        for end in 0..bytes.len() {
            let result = parse_motion(&bytes[..end]);
            assert_eq!(result.is_ok(), boundaries.contains(&end), "cut at {}", end);
        }
    }

    /// offsets where the camera, light, shadow or property section would start
    fn section_boundaries(bytes: &[u8]) -> Vec<usize> {
        let morphs_end = 50 + 4 + 2 * 111 + 4 + 23;
        let camera_end = morphs_end + 4 + 61;
        let light_end = camera_end + 4 + 28;
        let shadow_end = light_end + 4 + 9;
        assert_eq!(shadow_end + 4 + 9 + 2 * 21, bytes.len());
        vec![morphs_end, camera_end, light_end, shadow_end]
    }

    #[test]
    fn missing_morph_section_is_truncation() {
        let mut w = BinaryWriter::default();
        header(&mut w, "");
        w.write_u32(0);
        let bytes = w.into_bytes();
        let error = parse_motion(&bytes).unwrap_err();
        assert_eq!(error.section, Section::MorphKeyframes);
        assert_eq!(error.offset, 54);
    }

    #[test]
    fn bad_signature() {
        let mut bytes = single_keyframe().into_bytes();
        bytes[0] = b'X';
        let error = parse_motion(&bytes).unwrap_err();
        assert_eq!(error.section, Section::MotionHeader);
        assert!(matches!(error.kind, ParseErrorKind::BadMagic { .. }));

        // the version 1 signature is not accepted
        let mut w = BinaryWriter::default();
        let mut signature = b"Vocaloid Motion Data file".to_vec();
        signature.resize(SIGNATURE_LENGTH, 0);
        w.write_bytes(&signature).write_fixed_text(MODEL_NAME_LENGTH, "");
        w.write_u32(0).write_u32(0);
        assert!(parse_motion(&w.into_bytes()).is_err());
    }

    #[test]
    fn element_index_of_a_bad_record() {
        let mut w = BinaryWriter::default();
        header(&mut w, "");
        w.write_u32(0);
        w.write_u32(2);
        w.write_fixed_text(BONE_NAME_LENGTH, "あ").write_u32(0).write_f32(1.0);
        w.write_fixed_text(BONE_NAME_LENGTH, "い").write_u32(0).write_f32(f32::INFINITY);
        let bytes = w.into_bytes();
        let error = parse_motion(&bytes).unwrap_err();
        assert_eq!(error.section, Section::MorphKeyframes);
        assert_eq!(error.element, Some(1));
        assert_eq!(error.offset, bytes.len() - 4);
        assert_eq!(error.kind, ParseErrorKind::NonFinite { field: "f32" });
    }

    #[test]
    fn oversized_count_is_rejected_before_reading() {
        let mut w = BinaryWriter::default();
        header(&mut w, "");
        w.write_u32(u32::MAX);
        let error = parse_motion(&w.into_bytes()).unwrap_err();
        assert_eq!(error.section, Section::BoneKeyframes);
        assert!(matches!(error.kind, ParseErrorKind::Truncated { .. }));
    }
}
