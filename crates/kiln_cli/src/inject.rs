//! `kiln inject`: locate the build directory and patch it, nothing else.

use std::path::Path;

use kiln_cli::{
    load_project_config, project_root, resolve_settings, resolve_wrapper_binary,
    CommandCollaborators, Pipeline, Status,
};

use crate::GlobalArgs;

/// Runs the `kiln inject` command.
///
/// Returns 0 when the build directory is (now) configured, 1 otherwise.
pub fn run(description: &Path, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let root = project_root(description);
    let config = load_project_config(global.config.as_deref(), &root)?;
    let settings = resolve_settings(&config)?;

    let wrapper_binary = resolve_wrapper_binary(&config.pipeline);
    let collaborators = CommandCollaborators::new(&config.pipeline, &settings);
    let pipeline = Pipeline::new(
        config.pipeline,
        settings,
        wrapper_binary,
        collaborators,
        Status::new(global.quiet),
    );

    match pipeline.inject(description)? {
        Some(outcome) if outcome.is_configured() => Ok(0),
        _ => Ok(1),
    }
}
