//! Configuration types deserialized from `kiln.toml`.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// The top-level configuration parsed from `kiln.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KilnConfig {
    /// How the pipeline drives the external generator and compiler.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Where and how compiled objects are cached.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Pipeline settings: collaborator commands and build directory conventions.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Tool namespace; the build base directory is `<project>/.<namespace>/build`.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// File name of the build-system config inside the build directory.
    #[serde(default = "default_config_name")]
    pub config_name: String,
    /// File name the wrapper script is deployed under.
    #[serde(default = "default_wrapper_name")]
    pub wrapper_name: String,
    /// Key in the environment section that lists pre/post build scripts.
    #[serde(default = "default_hook_key")]
    pub hook_key: String,
    /// Explicit `[env:NAME]` section to patch. Defaults to the first one found.
    #[serde(default)]
    pub environment: Option<String>,
    /// Config-generation command; the description path is appended.
    #[serde(default = "default_generate")]
    pub generate: Vec<String>,
    /// Compile command; the subcommand and description path are appended.
    #[serde(default = "default_compile")]
    pub compile: Vec<String>,
    /// Extra environment variables for both collaborator commands.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Path to the `kiln-cc` executable referenced from the wrapper script.
    #[serde(default)]
    pub wrapper_binary: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            config_name: default_config_name(),
            wrapper_name: default_wrapper_name(),
            hook_key: default_hook_key(),
            environment: None,
            generate: default_generate(),
            compile: default_compile(),
            env: BTreeMap::new(),
            wrapper_binary: None,
        }
    }
}

fn default_namespace() -> String {
    "esphome".to_string()
}

fn default_config_name() -> String {
    "platformio.ini".to_string()
}

fn default_wrapper_name() -> String {
    "kiln_cache_wrapper.py".to_string()
}

fn default_hook_key() -> String {
    "extra_scripts".to_string()
}

fn default_generate() -> Vec<String> {
    vec![
        "esphome".to_string(),
        "compile".to_string(),
        "--only-generate".to_string(),
    ]
}

fn default_compile() -> Vec<String> {
    vec!["esphome".to_string()]
}

/// Object cache settings as written in `kiln.toml`.
///
/// `max_size` stays a string here and is parsed into a
/// [`ByteSize`](kiln_common::ByteSize) during resolution.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Cache root directory.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    /// Maximum total size of stored entries (e.g. "2G").
    #[serde(default = "default_max_size")]
    pub max_size: String,
    /// Whether entries are zlib-compressed.
    #[serde(default = "default_compress")]
    pub compress: bool,
    /// Compression level, 0 through 9.
    #[serde(default = "default_compress_level")]
    pub compress_level: u32,
    /// What the fingerprint hashes for the translation unit.
    #[serde(default)]
    pub fingerprint: FingerprintMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            max_size: default_max_size(),
            compress: default_compress(),
            compress_level: default_compress_level(),
            fingerprint: FingerprintMode::default(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/opt/esphome-cache/kiln")
}

fn default_max_size() -> String {
    "2G".to_string()
}

fn default_compress() -> bool {
    true
}

fn default_compress_level() -> u32 {
    6
}

/// How a translation unit's contents enter the fingerprint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintMode {
    /// Hash the source and every file the compiler lists for `-M`.
    #[default]
    Direct,
    /// Hash the compiler's preprocessed (`-E`) output.
    Preprocessed,
}

impl FingerprintMode {
    /// Parses the lowercase name used in `kiln.toml` and the environment.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "direct" => Some(Self::Direct),
            "preprocessed" => Some(Self::Preprocessed),
            _ => None,
        }
    }
}

impl fmt::Display for FingerprintMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Preprocessed => write!(f, "preprocessed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stock_esphome() {
        let config = KilnConfig::default();
        assert_eq!(config.pipeline.namespace, "esphome");
        assert_eq!(config.pipeline.config_name, "platformio.ini");
        assert_eq!(config.pipeline.hook_key, "extra_scripts");
        assert_eq!(
            config.pipeline.generate,
            vec!["esphome", "compile", "--only-generate"]
        );
        assert_eq!(config.cache.max_size, "2G");
        assert!(config.cache.compress);
        assert_eq!(config.cache.compress_level, 6);
        assert_eq!(config.cache.fingerprint, FingerprintMode::Direct);
    }

    #[test]
    fn fingerprint_mode_names() {
        assert_eq!(
            FingerprintMode::from_name("Preprocessed"),
            Some(FingerprintMode::Preprocessed)
        );
        assert_eq!(
            FingerprintMode::from_name("direct"),
            Some(FingerprintMode::Direct)
        );
        assert_eq!(FingerprintMode::from_name("fast"), None);
        assert_eq!(FingerprintMode::Preprocessed.to_string(), "preprocessed");
    }
}
