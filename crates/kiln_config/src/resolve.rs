//! Cache settings resolution: merging `kiln.toml` values with the environment.

use crate::error::ConfigError;
use crate::types::{CacheConfig, FingerprintMode};
use kiln_common::ByteSize;
use std::path::PathBuf;

/// Environment variable overriding the cache directory.
pub const ENV_CACHE_DIR: &str = "KILN_CACHE_DIR";
/// Environment variable overriding the maximum cache size.
pub const ENV_CACHE_MAXSIZE: &str = "KILN_CACHE_MAXSIZE";
/// Environment variable toggling compression (`1`/`0`, `true`/`false`).
pub const ENV_CACHE_COMPRESS: &str = "KILN_CACHE_COMPRESS";
/// Environment variable overriding the compression level.
pub const ENV_CACHE_COMPRESSLEVEL: &str = "KILN_CACHE_COMPRESSLEVEL";
/// Environment variable overriding the fingerprint mode.
pub const ENV_CACHE_FINGERPRINT: &str = "KILN_CACHE_FINGERPRINT";

/// Fully resolved cache settings.
///
/// This is the value handed to the cache store and the wrapper invoker; neither
/// reads the environment on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Cache root directory.
    pub dir: PathBuf,
    /// Maximum total size of stored entries.
    pub max_size: ByteSize,
    /// Whether entries are zlib-compressed.
    pub compress: bool,
    /// Compression level, 0 through 9.
    pub compress_level: u32,
    /// What the fingerprint hashes for the translation unit.
    pub fingerprint: FingerprintMode,
}

impl CacheSettings {
    /// Resolves settings from defaults overlaid with the process environment.
    ///
    /// Used by `kiln-cc`, which only sees what the wrapper script exported.
    pub fn from_env() -> Result<Self, ConfigError> {
        resolve_cache_settings(&CacheConfig::default(), |key| std::env::var(key).ok())
    }

    /// Returns the `KILN_CACHE_*` variables that reproduce these settings.
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        vec![
            (ENV_CACHE_DIR, self.dir.display().to_string()),
            (ENV_CACHE_MAXSIZE, self.max_size.bytes().to_string()),
            (
                ENV_CACHE_COMPRESS,
                if self.compress { "1" } else { "0" }.to_string(),
            ),
            (ENV_CACHE_COMPRESSLEVEL, self.compress_level.to_string()),
            (ENV_CACHE_FINGERPRINT, self.fingerprint.to_string()),
        ]
    }
}

/// Resolves cache settings from a `[cache]` table and an environment lookup.
///
/// Environment values take precedence over the file. Empty environment values
/// are treated as unset.
pub fn resolve_cache_settings(
    config: &CacheConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<CacheSettings, ConfigError> {
    let env = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    let dir = env(ENV_CACHE_DIR)
        .map(PathBuf::from)
        .unwrap_or_else(|| config.dir.clone());

    let (size_key, size_text) = match env(ENV_CACHE_MAXSIZE) {
        Some(v) => (ENV_CACHE_MAXSIZE, v),
        None => ("cache.max_size", config.max_size.clone()),
    };
    let max_size = size_text
        .parse::<ByteSize>()
        .map_err(|e| invalid(size_key, e.to_string()))?;

    let compress = match env(ENV_CACHE_COMPRESS) {
        Some(v) => parse_bool(&v)
            .ok_or_else(|| invalid(ENV_CACHE_COMPRESS, "expected 1/0 or true/false"))?,
        None => config.compress,
    };

    let compress_level = match env(ENV_CACHE_COMPRESSLEVEL) {
        Some(v) => v
            .trim()
            .parse::<u32>()
            .map_err(|_| invalid(ENV_CACHE_COMPRESSLEVEL, "expected an integer"))?,
        None => config.compress_level,
    };
    if compress_level > 9 {
        return Err(invalid("cache.compress_level", "must be between 0 and 9"));
    }

    let fingerprint = match env(ENV_CACHE_FINGERPRINT) {
        Some(v) => FingerprintMode::from_name(&v)
            .ok_or_else(|| invalid(ENV_CACHE_FINGERPRINT, "expected direct or preprocessed"))?,
        None => config.fingerprint,
    };

    Ok(CacheSettings {
        dir,
        max_size,
        compress,
        compress_level,
        fingerprint,
    })
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn file_values_without_env() {
        let settings = resolve_cache_settings(&CacheConfig::default(), lookup_from(&[])).unwrap();
        assert_eq!(settings.dir, PathBuf::from("/opt/esphome-cache/kiln"));
        assert_eq!(settings.max_size.bytes(), 2_000_000_000);
        assert!(settings.compress);
        assert_eq!(settings.compress_level, 6);
        assert_eq!(settings.fingerprint, FingerprintMode::Direct);
    }

    #[test]
    fn env_overrides_file() {
        let lookup = lookup_from(&[
            (ENV_CACHE_DIR, "/tmp/kc"),
            (ENV_CACHE_MAXSIZE, "100M"),
            (ENV_CACHE_COMPRESS, "0"),
            (ENV_CACHE_COMPRESSLEVEL, "3"),
            (ENV_CACHE_FINGERPRINT, "preprocessed"),
        ]);
        let settings = resolve_cache_settings(&CacheConfig::default(), lookup).unwrap();
        assert_eq!(settings.dir, PathBuf::from("/tmp/kc"));
        assert_eq!(settings.max_size.bytes(), 100_000_000);
        assert!(!settings.compress);
        assert_eq!(settings.compress_level, 3);
        assert_eq!(settings.fingerprint, FingerprintMode::Preprocessed);
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let lookup = lookup_from(&[(ENV_CACHE_DIR, ""), (ENV_CACHE_COMPRESS, "  ")]);
        let settings = resolve_cache_settings(&CacheConfig::default(), lookup).unwrap();
        assert_eq!(settings.dir, PathBuf::from("/opt/esphome-cache/kiln"));
        assert!(settings.compress);
    }

    #[test]
    fn bad_env_bool_errors() {
        let lookup = lookup_from(&[(ENV_CACHE_COMPRESS, "maybe")]);
        let err = resolve_cache_settings(&CacheConfig::default(), lookup).unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref key, .. } if key == ENV_CACHE_COMPRESS)
        );
    }

    #[test]
    fn env_level_out_of_range_errors() {
        let lookup = lookup_from(&[(ENV_CACHE_COMPRESSLEVEL, "42")]);
        assert!(resolve_cache_settings(&CacheConfig::default(), lookup).is_err());
    }

    #[test]
    fn env_vars_reproduce_settings() {
        let original = resolve_cache_settings(
            &CacheConfig::default(),
            lookup_from(&[(ENV_CACHE_DIR, "/srv/cache"), (ENV_CACHE_COMPRESS, "false")]),
        )
        .unwrap();
        let exported: Vec<(String, String)> = original
            .env_vars()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let map: HashMap<String, String> = exported.into_iter().collect();
        let back =
            resolve_cache_settings(&CacheConfig::default(), move |k| map.get(k).cloned()).unwrap();
        assert_eq!(original, back);
    }
}
