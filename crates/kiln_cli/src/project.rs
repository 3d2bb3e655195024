//! Project-level helpers: root directory, config file, wrapper binary.

use std::path::{Path, PathBuf};

use kiln_config::{CacheSettings, ConfigError, KilnConfig, PipelineConfig};

/// Name of the wrapper executable installed next to `kiln`.
const WRAPPER_EXE: &str = "kiln-cc";

/// The project root: the directory containing the description file.
pub fn project_root(description: &Path) -> PathBuf {
    match description.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Loads `kiln.toml`.
///
/// An explicit `--config` path must exist. Otherwise the file is looked up in
/// `project_root` and defaults apply when it is absent.
pub fn load_project_config(
    explicit: Option<&Path>,
    project_root: &Path,
) -> Result<KilnConfig, ConfigError> {
    match explicit {
        Some(path) if path.is_dir() => {
            kiln_config::load_config_file(&path.join(kiln_config::CONFIG_FILE_NAME))
        }
        Some(path) => kiln_config::load_config_file(path),
        None => kiln_config::load_config(project_root),
    }
}

/// Resolves cache settings from `[cache]` overlaid with the process
/// environment.
pub fn resolve_settings(config: &KilnConfig) -> Result<CacheSettings, ConfigError> {
    kiln_config::resolve_cache_settings(&config.cache, |key| std::env::var(key).ok())
}

/// The `kiln-cc` path written into the wrapper script.
///
/// Uses `wrapper_binary` from the config when set, else `kiln-cc` next to the
/// running executable, else the bare name for a `PATH` lookup.
pub fn resolve_wrapper_binary(config: &PipelineConfig) -> PathBuf {
    if let Some(path) = &config.wrapper_binary {
        return path.clone();
    }
    let file_name = format!("{WRAPPER_EXE}{}", std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&file_name)))
        .filter(|candidate| candidate.is_file())
        .unwrap_or_else(|| PathBuf::from(file_name))
}
