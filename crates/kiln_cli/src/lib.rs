//! The `kiln` build pipeline.
//!
//! [`Pipeline`] runs the firmware config generator, finds the generated build
//! directory, injects the compiler-cache wrapper into it and finally hands off
//! to the real compile command, whose exit code becomes the pipeline's.

#![warn(missing_docs)]

pub mod pipeline;
pub mod project;
pub mod status;

pub use pipeline::{
    Collaborators, CommandCollaborators, Pipeline, PipelineReport, PipelineState,
};
pub use project::{load_project_config, project_root, resolve_settings, resolve_wrapper_binary};
pub use status::Status;
