//! Error types shared by the model reader, the motion reader and the bone-local converter.

use std::fmt;
use thiserror::Error;

/// Where in a file an error was detected.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Section {
    Header,
    ModelInfo,
    Vertices,
    Faces,
    Textures,
    Materials,
    Bones,
    Morphs,
    DisplayFrames,
    RigidBodies,
    Joints,
    SoftBodies,
    MotionHeader,
    BoneKeyframes,
    MorphKeyframes,
    CameraKeyframes,
    LightKeyframes,
    ShadowKeyframes,
    PropertyKeyframes,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Section::Header => "header",
            Section::ModelInfo => "model info",
            Section::Vertices => "vertices",
            Section::Faces => "faces",
            Section::Textures => "textures",
            Section::Materials => "materials",
            Section::Bones => "bones",
            Section::Morphs => "morphs",
            Section::DisplayFrames => "display frames",
            Section::RigidBodies => "rigid bodies",
            Section::Joints => "joints",
            Section::SoftBodies => "soft bodies",
            Section::MotionHeader => "motion header",
            Section::BoneKeyframes => "bone keyframes",
            Section::MorphKeyframes => "morph keyframes",
            Section::CameraKeyframes => "camera keyframes",
            Section::LightKeyframes => "light keyframes",
            Section::ShadowKeyframes => "shadow keyframes",
            Section::PropertyKeyframes => "property keyframes",
        };
        f.write_str(name)
    }
}

/// What went wrong, grouped as format, referential and domain errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseErrorKind {
    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("bad magic {found:?}")]
    BadMagic { found: Vec<u8> },
    #[error("unsupported version {0}")]
    UnsupportedVersion(f32),
    #[error("negative element count {0}")]
    NegativeCount(i32),
    #[error("{field}: count {count} does not fit ({detail})")]
    CountMismatch {
        field: &'static str,
        count: usize,
        detail: &'static str,
    },
    #[error("{field}: index {index} out of range for {len} elements")]
    IndexOutOfRange {
        field: &'static str,
        index: i64,
        len: usize,
    },
    #[error("{field}: unknown tag {value}")]
    UnknownTag { field: &'static str, value: i64 },
    #[error("invalid index width {0}")]
    InvalidIndexWidth(u8),
    #[error("invalid text encoding {0}")]
    InvalidEncoding(u8),
    #[error("too many additional uv channels: {0}")]
    TooManyAdditionalUvs(u8),
    #[error("{field}: non-finite float")]
    NonFinite { field: &'static str },
}

/// A fatal parse failure with the location it was detected at.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub section: Section,
    /// index of the element inside `section`, `None` for section-level failures
    pub element: Option<usize>,
    /// byte offset of the read that detected the problem
    pub offset: usize,
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub(crate) fn new(section: Section, offset: usize, kind: ParseErrorKind) -> Self {
        Self {
            section,
            element: None,
            offset,
            kind,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.element {
            Some(element) => write!(
                f,
                "{} #{} at byte {}: {}",
                self.section, element, self.offset, self.kind
            ),
            None => write!(f, "{} at byte {}: {}", self.section, self.offset, self.kind),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

/// The rest orientation of a bone is too far from any signed axis permutation.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("bone rest orientation is not axis aligned: deviation {deviation} exceeds {tolerance}")]
pub struct GeometryError {
    pub deviation: f32,
    pub tolerance: f32,
}

#[derive(Debug, Error)]
pub enum MmdError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("geometry error: {0}")]
    Geometry(#[from] GeometryError),
}

pub type Result<T> = std::result::Result<T, MmdError>;

/// attach the element index to a reader failure.
pub(crate) trait WithElement<T> {
    fn at_element(self, index: usize) -> std::result::Result<T, ParseError>;
}

impl<T> WithElement<T> for std::result::Result<T, ParseError> {
    fn at_element(self, index: usize) -> std::result::Result<T, ParseError> {
        self.map_err(|mut e| {
            if e.element.is_none() {
                e.element = Some(index);
            }
            e
        })
    }
}
