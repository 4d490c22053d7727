//! PMX model and VMD motion reader.
//!
//! Models come out in a right-handed Z-up frame, scaled by
//! [`ParseOptions::scale`]; motions keep MMD space and are brought into bone
//! space with a [`BoneConverter`].
//!
//! ```no_run
//! use mmd_import::{parse_model, parse_motion, Armature, ArmatureOptions, BoneConverter, ParseOptions};
//!
//! let model = parse_model(&std::fs::read("/path/to/model.pmx")?, &ParseOptions::default())?;
//! let motion = parse_motion(&std::fs::read("/path/to/motion.vmd")?)?;
//! let armature = Armature::new(&model, &ArmatureOptions::default());
//! for (name, keyframes) in motion.bone_tracks() {
//!     if let Some(bone) = armature.find(name) {
//!         if let Some(Ok(converter)) = BoneConverter::for_bone(&armature, bone, 1.0) {
//!             let _local = converter.convert_track(keyframes);
//!         }
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod binary_reader;
#[cfg(test)]
mod binary_writer;

pub mod armature;
pub mod bone_local;
pub mod config;
pub mod coordinate;
pub mod error;
pub mod interpolation;
pub mod motion;
pub mod motion_reader;
pub mod physics;
pub mod reader;
pub mod translations;
pub mod types;

pub use armature::Armature;
pub use bone_local::{apply_bone_local, bone_local_conversion_matrix, BoneConverter, RestPose};
pub use config::{ArmatureOptions, ParseOptions};
pub use error::{GeometryError, MmdError, ParseError, ParseErrorKind, Result, Section};
pub use motion::Motion;
pub use motion_reader::parse_motion;
pub use reader::parse_model;
pub use types::Model;
