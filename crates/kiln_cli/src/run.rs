//! `kiln run`: the full generate, inject, compile pipeline.

use kiln_cli::{
    load_project_config, project_root, resolve_settings, resolve_wrapper_binary,
    CommandCollaborators, Pipeline, Status,
};

use crate::{GlobalArgs, RunArgs};

/// Runs the `kiln run` command.
///
/// Returns the compile command's exit code.
pub fn run(args: &RunArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let root = project_root(&args.description);
    let config = load_project_config(global.config.as_deref(), &root)?;
    let settings = resolve_settings(&config)?;

    let status = Status::new(global.quiet);
    if global.verbose {
        status.line(
            "Cache",
            format_args!("{} (max {})", settings.dir.display(), settings.max_size),
        );
    }

    let wrapper_binary = resolve_wrapper_binary(&config.pipeline);
    let collaborators = CommandCollaborators::new(&config.pipeline, &settings);
    let pipeline = Pipeline::new(
        config.pipeline,
        settings,
        wrapper_binary,
        collaborators,
        status,
    );

    let report = pipeline.run(&args.subcommand, &args.description, &args.extra)?;
    Ok(report.exit_code)
}
