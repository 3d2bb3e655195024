//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::KilnConfig;
use kiln_common::ByteSize;
use std::path::Path;

/// Name of the configuration file looked up in the project root.
pub const CONFIG_FILE_NAME: &str = "kiln.toml";

/// Loads `<project_dir>/kiln.toml`, falling back to defaults when it is absent.
pub fn load_config(project_dir: &Path) -> Result<KilnConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE_NAME);
    if !config_path.is_file() {
        return Ok(KilnConfig::default());
    }
    load_config_file(&config_path)
}

/// Loads and validates a configuration file that must exist.
pub fn load_config_file(path: &Path) -> Result<KilnConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_str(&content)
}

/// Parses and validates a `kiln.toml` configuration from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<KilnConfig, ConfigError> {
    let config: KilnConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Returns true when `name` can be used as a single path component.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Validates that configuration values are usable before any work starts.
fn validate_config(config: &KilnConfig) -> Result<(), ConfigError> {
    let pipeline = &config.pipeline;
    if !is_plain_file_name(&pipeline.namespace) {
        return Err(invalid("pipeline.namespace", "must be a plain directory name"));
    }
    if !is_plain_file_name(&pipeline.config_name) {
        return Err(invalid("pipeline.config_name", "must be a plain file name"));
    }
    if !is_plain_file_name(&pipeline.wrapper_name) {
        return Err(invalid("pipeline.wrapper_name", "must be a plain file name"));
    }
    if pipeline.hook_key.is_empty()
        || pipeline
            .hook_key
            .contains(|c: char| c.is_whitespace() || c == '=')
    {
        return Err(invalid(
            "pipeline.hook_key",
            "must be a single token without '='",
        ));
    }
    if pipeline.generate.is_empty() {
        return Err(invalid("pipeline.generate", "command must not be empty"));
    }
    if pipeline.compile.is_empty() {
        return Err(invalid("pipeline.compile", "command must not be empty"));
    }

    let cache = &config.cache;
    cache
        .max_size
        .parse::<ByteSize>()
        .map_err(|e| invalid("cache.max_size", e.to_string()))?;
    if cache.compress_level > 9 {
        return Err(invalid("cache.compress_level", "must be between 0 and 9"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FingerprintMode;

    #[test]
    fn parse_empty_config_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.pipeline.namespace, "esphome");
        assert_eq!(config.cache.compress_level, 6);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[pipeline]
namespace = "fw"
config_name = "build.ini"
wrapper_name = "cache_hook.py"
hook_key = "extra_scripts"
environment = "kitchen"
generate = ["fwgen", "--only-generate"]
compile = ["fwtool", "--verbose"]
wrapper_binary = "/usr/local/bin/kiln-cc"

[pipeline.env]
PLATFORMIO_CORE_DIR = "/data/pio"

[cache]
dir = "/data/cache"
max_size = "500M"
compress = false
compress_level = 1
fingerprint = "preprocessed"
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.pipeline.namespace, "fw");
        assert_eq!(config.pipeline.environment.as_deref(), Some("kitchen"));
        assert_eq!(config.pipeline.compile, vec!["fwtool", "--verbose"]);
        assert_eq!(
            config.pipeline.env.get("PLATFORMIO_CORE_DIR").map(String::as_str),
            Some("/data/pio")
        );
        assert_eq!(config.cache.dir, Path::new("/data/cache"));
        assert!(!config.cache.compress);
        assert_eq!(config.cache.fingerprint, FingerprintMode::Preprocessed);
    }

    #[test]
    fn invalid_toml_errors() {
        let err = load_config_from_str("this is not valid toml {{{}}}").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn unknown_fingerprint_mode_errors() {
        let err = load_config_from_str("[cache]\nfingerprint = \"fast\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn compress_level_out_of_range() {
        let err = load_config_from_str("[cache]\ncompress_level = 12\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "cache.compress_level"
        ));
    }

    #[test]
    fn bad_max_size() {
        let err = load_config_from_str("[cache]\nmax_size = \"huge\"\n").unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "cache.max_size")
        );
    }

    #[test]
    fn wrapper_name_with_separator_rejected() {
        let err =
            load_config_from_str("[pipeline]\nwrapper_name = \"../hook.py\"\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "pipeline.wrapper_name"
        ));
    }

    #[test]
    fn empty_compile_command_rejected() {
        let err = load_config_from_str("[pipeline]\ncompile = []\n").unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "pipeline.compile")
        );
    }

    #[test]
    fn hook_key_with_equals_rejected() {
        let err = load_config_from_str("[pipeline]\nhook_key = \"a=b\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.pipeline.config_name, "platformio.ini");
    }

    #[test]
    fn project_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[pipeline]\nnamespace = \"custom\"\n",
        )
        .unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.pipeline.namespace, "custom");
    }

    #[test]
    fn explicit_file_must_exist() {
        let err = load_config_file(Path::new("/nonexistent/dir/kiln.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
