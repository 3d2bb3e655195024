//! Build-configuration discovery and cache hook injection.
//!
//! After the firmware config generator has produced
//! `<project>/.<namespace>/build/<target>/`, this crate finds that directory,
//! deploys the compiler-cache wrapper script into it and registers the script
//! as a pre-build hook in the build-system config, at most once.

#![warn(missing_docs)]

pub mod description;
pub mod document;
pub mod error;
pub mod locate;
pub mod patch;
pub mod script;

pub use description::device_name_from_description;
pub use document::{BuildConfigDocument, Item, KeyEntry, Section};
pub use error::InjectError;
pub use locate::{build_base_dir, locate_build_dir, locate_build_dir_preferring, BuildDirLookup};
pub use patch::{ConfigPatcher, PatchOutcome, PatchSpec};
pub use script::render_wrapper_script;
