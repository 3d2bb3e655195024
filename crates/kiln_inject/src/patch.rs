//! Deploying the wrapper script and registering it as a pre-build hook.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use kiln_config::PipelineConfig;

use crate::document::BuildConfigDocument;
use crate::error::InjectError;

/// What to patch and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSpec {
    /// Build-system config file name inside the build directory.
    pub config_name: String,
    /// File name the wrapper script is deployed under.
    pub wrapper_name: String,
    /// Key listing pre/post build scripts.
    pub hook_key: String,
    /// Explicit environment to patch; the first `[env:NAME]` otherwise.
    pub environment: Option<String>,
}

impl PatchSpec {
    /// Takes the relevant fields from the pipeline configuration.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            config_name: config.config_name.clone(),
            wrapper_name: config.wrapper_name.clone(),
            hook_key: config.hook_key.clone(),
            environment: config.environment.clone(),
        }
    }
}

/// Result of a patch run. None of these stop the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The config already references the wrapper; nothing was changed.
    AlreadyConfigured,
    /// The hook entry was added to the named environment.
    Injected {
        /// Environment name of the patched `[env:NAME]` section.
        environment: String,
    },
    /// The build directory has no config file.
    ConfigMissing {
        /// Where the config was expected.
        path: PathBuf,
    },
    /// The config has no matching `[env:NAME]` section; it was left untouched.
    EnvironmentMissing {
        /// The config file.
        path: PathBuf,
    },
}

impl PatchOutcome {
    /// True when builds in the directory will go through the wrapper.
    pub fn is_configured(&self) -> bool {
        matches!(self, Self::AlreadyConfigured | Self::Injected { .. })
    }
}

impl fmt::Display for PatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyConfigured => write!(f, "already configured"),
            Self::Injected { environment } => write!(f, "injected into [env:{environment}]"),
            Self::ConfigMissing { path } => write!(f, "config file missing: {}", path.display()),
            Self::EnvironmentMissing { path } => {
                write!(f, "no environment section in {}", path.display())
            }
        }
    }
}

/// Pure result of patching config text.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TextPatch {
    AlreadyConfigured,
    EnvironmentMissing,
    Injected { environment: String, text: String },
}

/// Makes a build directory route compiler calls through the cache wrapper.
#[derive(Debug, Clone)]
pub struct ConfigPatcher {
    spec: PatchSpec,
}

impl ConfigPatcher {
    /// Creates a patcher.
    pub fn new(spec: PatchSpec) -> Self {
        Self { spec }
    }

    /// The hook entry this patcher inserts, e.g. `pre:kiln_cache_wrapper.py`.
    pub fn hook_entry(&self) -> String {
        format!("pre:{}", self.spec.wrapper_name)
    }

    /// Path of the config file inside `build_dir`.
    pub fn config_path(&self, build_dir: &Path) -> PathBuf {
        build_dir.join(&self.spec.config_name)
    }

    /// Writes the wrapper script into `build_dir`, replacing any older copy.
    pub fn deploy_wrapper(&self, build_dir: &Path, script: &str) -> Result<PathBuf, InjectError> {
        let path = build_dir.join(&self.spec.wrapper_name);
        fs::write(&path, script).map_err(|e| InjectError::io(&path, e))?;
        tracing::debug!(target: "kiln.inject", path = %path.display(), "deployed wrapper script");
        Ok(path)
    }

    /// Deploys the wrapper, then registers it in the config if needed.
    pub fn patch(&self, build_dir: &Path, script: &str) -> Result<PatchOutcome, InjectError> {
        self.deploy_wrapper(build_dir, script)?;
        self.patch_config(build_dir)
    }

    /// Registers the wrapper in the config file, in place, at most once.
    pub fn patch_config(&self, build_dir: &Path) -> Result<PatchOutcome, InjectError> {
        let path = self.config_path(build_dir);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PatchOutcome::ConfigMissing { path });
            }
            Err(err) => return Err(InjectError::io(&path, err)),
        };
        let text =
            String::from_utf8(bytes).map_err(|_| InjectError::NotUtf8 { path: path.clone() })?;

        match self.patch_text(&text) {
            TextPatch::AlreadyConfigured => Ok(PatchOutcome::AlreadyConfigured),
            TextPatch::EnvironmentMissing => Ok(PatchOutcome::EnvironmentMissing { path }),
            TextPatch::Injected { environment, text } => {
                fs::write(&path, text).map_err(|e| InjectError::io(&path, e))?;
                Ok(PatchOutcome::Injected { environment })
            }
        }
    }

    fn patch_text(&self, text: &str) -> TextPatch {
        let mut doc = BuildConfigDocument::parse(text);
        if doc.has_hook_entry(&self.spec.hook_key, &self.spec.wrapper_name) {
            return TextPatch::AlreadyConfigured;
        }

        let Some(index) = doc.environment_index(self.spec.environment.as_deref()) else {
            return TextPatch::EnvironmentMissing;
        };
        let environment = doc.sections()[index]
            .environment()
            .unwrap_or_default()
            .to_string();

        doc.append_value(index, &self.spec.hook_key, &self.hook_entry());
        TextPatch::Injected {
            environment,
            text: doc.to_string(),
        }
    }
}
