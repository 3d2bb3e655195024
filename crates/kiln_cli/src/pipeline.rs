//! The build pipeline state machine.
//!
//! ```text
//! Init -> ConfigGenerated -> BuildDirResolved -> Patched | Skipped -> Compiling -> Done
//!                                    \________________________________/
//!                                       (no build directory found)
//! ```
//!
//! Every step before `Compiling` is best-effort: failures are reported and the
//! pipeline moves on. Only the compile step decides the exit code.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use kiln_config::{CacheSettings, PipelineConfig};
use kiln_inject::{
    build_base_dir, device_name_from_description, locate_build_dir_preferring,
    render_wrapper_script, BuildDirLookup, ConfigPatcher, PatchOutcome, PatchSpec,
};

use crate::project::project_root;
use crate::status::Status;

/// One step of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    /// Nothing has happened yet.
    Init,
    /// The config generator ran (successfully or not).
    ConfigGenerated,
    /// The build directory lookup finished; `None` when nothing was found.
    BuildDirResolved {
        /// The build directory chosen, if any.
        dir: Option<PathBuf>,
    },
    /// The patcher ran against the build directory.
    Patched(PatchOutcome),
    /// The patcher failed; the build proceeds without the cache.
    Skipped {
        /// Why patching failed.
        reason: String,
    },
    /// The real compile command is running.
    Compiling,
    /// The compile command finished.
    Done,
}

/// Everything a pipeline run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// States in the order they were entered.
    pub transitions: Vec<PipelineState>,
    /// Exit code of the compile command.
    pub exit_code: i32,
    /// Patch outcome, when a build directory was found and patched.
    pub patch: Option<PatchOutcome>,
}

/// The external tools the pipeline drives.
pub trait Collaborators {
    /// Generates the build tree for `description`. Returns the exit status.
    fn generate_config(&self, description: &Path) -> io::Result<i32>;

    /// Runs `subcommand` (e.g. `compile`, `upload`) and returns its exit code.
    fn compile(&self, subcommand: &str, description: &Path, extra: &[String]) -> io::Result<i32>;
}

impl<C: Collaborators + ?Sized> Collaborators for &C {
    fn generate_config(&self, description: &Path) -> io::Result<i32> {
        (**self).generate_config(description)
    }

    fn compile(&self, subcommand: &str, description: &Path, extra: &[String]) -> io::Result<i32> {
        (**self).compile(subcommand, description, extra)
    }
}

/// Collaborators backed by the commands configured in `[pipeline]`.
///
/// Commands run in the project root with the description passed by file
/// name, `[pipeline.env]` and the `KILN_CACHE_*` variables applied, and
/// stdio inherited.
#[derive(Debug, Clone)]
pub struct CommandCollaborators {
    generate: Vec<String>,
    compile: Vec<String>,
    env: Vec<(String, String)>,
}

impl CommandCollaborators {
    /// Builds collaborators from pipeline config and resolved cache settings.
    pub fn new(config: &PipelineConfig, settings: &CacheSettings) -> Self {
        let mut env: Vec<(String, String)> = settings
            .env_vars()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        env.extend(config.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self {
            generate: config.generate.clone(),
            compile: config.compile.clone(),
            env,
        }
    }

    fn command(&self, argv: &[String], description: &Path) -> io::Result<Command> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(project_root(description))
            .envs(self.env.iter().map(|(k, v)| (k, v)));
        Ok(cmd)
    }
}

/// The description as seen from the project root.
fn description_arg(description: &Path) -> &std::ffi::OsStr {
    description
        .file_name()
        .unwrap_or(description.as_os_str())
}

impl Collaborators for CommandCollaborators {
    fn generate_config(&self, description: &Path) -> io::Result<i32> {
        let status = self
            .command(&self.generate, description)?
            .arg(description_arg(description))
            .status()?;
        Ok(status.code().unwrap_or(1))
    }

    fn compile(&self, subcommand: &str, description: &Path, extra: &[String]) -> io::Result<i32> {
        let status = self
            .command(&self.compile, description)?
            .arg(subcommand)
            .arg(description_arg(description))
            .args(extra)
            .status()?;
        Ok(status.code().unwrap_or(1))
    }
}

/// Drives one build: generate, locate, inject, compile.
pub struct Pipeline<C> {
    config: PipelineConfig,
    settings: CacheSettings,
    wrapper_binary: PathBuf,
    collaborators: C,
    status: Status,
}

impl<C: Collaborators> Pipeline<C> {
    /// Creates a pipeline.
    pub fn new(
        config: PipelineConfig,
        settings: CacheSettings,
        wrapper_binary: PathBuf,
        collaborators: C,
        status: Status,
    ) -> Self {
        Self {
            config,
            settings,
            wrapper_binary,
            collaborators,
            status,
        }
    }

    /// Runs the whole pipeline for `description`.
    ///
    /// Returns an error only when the compile command cannot be started.
    pub fn run(
        &self,
        subcommand: &str,
        description: &Path,
        extra: &[String],
    ) -> Result<PipelineReport, Box<dyn std::error::Error>> {
        let mut transitions = vec![PipelineState::Init];

        self.status.line("Generating", description.display());
        match self.collaborators.generate_config(description) {
            Ok(0) => {}
            Ok(code) => self.status.warning(format_args!(
                "config generation exited with status {code}, continuing"
            )),
            Err(err) => self
                .status
                .warning(format_args!("config generation failed: {err}, continuing")),
        }
        transitions.push(PipelineState::ConfigGenerated);

        let dir = self.locate(description);
        transitions.push(PipelineState::BuildDirResolved { dir: dir.clone() });

        let mut patch = None;
        if let Some(dir) = &dir {
            match self.patch(dir) {
                Ok(outcome) => {
                    transitions.push(PipelineState::Patched(outcome.clone()));
                    patch = Some(outcome);
                }
                Err(err) => {
                    self.status
                        .warning(format_args!("cache injection failed: {err}"));
                    transitions.push(PipelineState::Skipped {
                        reason: err.to_string(),
                    });
                }
            }
        }

        transitions.push(PipelineState::Compiling);
        self.status.line(
            "Compiling",
            format_args!("{subcommand} {}", description.display()),
        );
        let exit_code = self
            .collaborators
            .compile(subcommand, description, extra)
            .map_err(|e| format!("failed to run compile command: {e}"))?;
        transitions.push(PipelineState::Done);

        tracing::debug!(target: "kiln.pipeline", exit_code, ?transitions, "pipeline finished");
        Ok(PipelineReport {
            transitions,
            exit_code,
            patch,
        })
    }

    /// Locates and patches without generating or compiling.
    ///
    /// Returns `None` when there is no build directory to patch.
    pub fn inject(
        &self,
        description: &Path,
    ) -> Result<Option<PatchOutcome>, Box<dyn std::error::Error>> {
        match self.locate(description) {
            Some(dir) => Ok(Some(self.patch(&dir)?)),
            None => Ok(None),
        }
    }

    /// Finds the build directory and reports the decision.
    fn locate(&self, description: &Path) -> Option<PathBuf> {
        let base = build_base_dir(description, &self.config.namespace);
        let hint = device_name_from_description(description);

        let lookup = match locate_build_dir_preferring(&base, hint.as_deref()) {
            Ok(lookup) => lookup,
            Err(err) => {
                self.status
                    .warning(format_args!("cannot read {}: {err}", base.display()));
                return None;
            }
        };

        match &lookup {
            BuildDirLookup::BaseMissing => self.status.line(
                "Skipped",
                format_args!("cache injection, {} does not exist", base.display()),
            ),
            BuildDirLookup::Empty => self.status.line(
                "Skipped",
                format_args!("cache injection, no build directory in {}", base.display()),
            ),
            BuildDirLookup::Found { dir, others } => {
                if lookup.is_ambiguous() {
                    let names: Vec<String> =
                        others.iter().map(|p| p.display().to_string()).collect();
                    self.status.warning(format_args!(
                        "multiple build directories found, using {} and ignoring {}",
                        dir.display(),
                        names.join(", ")
                    ));
                }
                self.status.line("Located", dir.display());
            }
        }
        lookup.dir().map(Path::to_path_buf)
    }

    /// Deploys the wrapper into `dir` and reports the outcome.
    fn patch(&self, dir: &Path) -> Result<PatchOutcome, kiln_inject::InjectError> {
        let script = render_wrapper_script(&self.settings, &self.wrapper_binary);
        let patcher = ConfigPatcher::new(PatchSpec::from_config(&self.config));
        let outcome = patcher.patch(dir, &script)?;

        match &outcome {
            PatchOutcome::Injected { .. } => self.status.line("Injected", &outcome),
            PatchOutcome::AlreadyConfigured => self.status.line("Skipped", &outcome),
            PatchOutcome::ConfigMissing { .. } | PatchOutcome::EnvironmentMissing { .. } => {
                self.status
                    .warning(format_args!("{outcome}, building without cache"))
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_common::ByteSize;
    use kiln_config::FingerprintMode;

    struct Fixed(i32);

    impl Collaborators for Fixed {
        fn generate_config(&self, _: &Path) -> io::Result<i32> {
            Ok(0)
        }

        fn compile(&self, _: &str, _: &Path, _: &[String]) -> io::Result<i32> {
            Ok(self.0)
        }
    }

    fn settings() -> CacheSettings {
        CacheSettings {
            dir: PathBuf::from("/tmp/kiln-cache"),
            max_size: ByteSize::new(1 << 20),
            compress: true,
            compress_level: 6,
            fingerprint: FingerprintMode::Direct,
        }
    }

    fn pipeline(code: i32) -> Pipeline<Fixed> {
        Pipeline::new(
            PipelineConfig::default(),
            settings(),
            PathBuf::from("/usr/bin/kiln-cc"),
            Fixed(code),
            Status::new(true),
        )
    }

    #[test]
    fn compile_exit_code_is_propagated() {
        let tmp = tempfile::tempdir().unwrap();
        let description = tmp.path().join("node.yaml");
        let report = pipeline(3).run("compile", &description, &[]).unwrap();
        assert_eq!(report.exit_code, 3);
        assert_eq!(report.transitions.last(), Some(&PipelineState::Done));
    }

    #[test]
    fn inject_without_build_dir_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let description = tmp.path().join("node.yaml");
        assert_eq!(pipeline(0).inject(&description).unwrap(), None);
    }

    #[test]
    fn description_arg_is_file_name() {
        assert_eq!(
            description_arg(Path::new("/configs/node.yaml")),
            std::ffi::OsStr::new("node.yaml")
        );
    }

    #[test]
    fn command_collaborators_export_cache_settings() {
        let mut config = PipelineConfig::default();
        config.env.insert("PLATFORMIO_CORE_DIR".into(), "/pio".into());
        let collaborators = CommandCollaborators::new(&config, &settings());
        assert!(collaborators
            .env
            .iter()
            .any(|(k, v)| k == "KILN_CACHE_DIR" && v == "/tmp/kiln-cache"));
        assert!(collaborators
            .env
            .iter()
            .any(|(k, v)| k == "PLATFORMIO_CORE_DIR" && v == "/pio"));
    }

    #[test]
    fn empty_command_is_an_error() {
        let config = PipelineConfig {
            compile: Vec::new(),
            ..PipelineConfig::default()
        };
        let collaborators = CommandCollaborators::new(&config, &settings());
        let err = collaborators
            .compile("compile", Path::new("node.yaml"), &[])
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
