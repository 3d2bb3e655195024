//! Parsing and validation of `kiln.toml` pipeline configuration.
//!
//! The configuration file is optional: every field has a default matching a
//! stock ESPHome + PlatformIO setup. Cache settings can additionally be
//! overridden through `KILN_CACHE_*` environment variables, which is how the
//! deployed wrapper script hands them to each `kiln-cc` process.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod resolve;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_file, load_config_from_str, CONFIG_FILE_NAME};
pub use resolve::{resolve_cache_settings, CacheSettings};
pub use types::*;
