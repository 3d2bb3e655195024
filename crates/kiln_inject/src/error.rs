//! Error types for build directory discovery and config patching.

use std::path::PathBuf;

/// Errors raised while locating or patching a build directory.
///
/// Expected absences (no build directory, no config file) are not errors;
/// they are reported through [`BuildDirLookup`](crate::BuildDirLookup) and
/// [`PatchOutcome`](crate::PatchOutcome).
#[derive(Debug, thiserror::Error)]
pub enum InjectError {
    /// Reading or writing a file or directory failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The build-system config is not valid UTF-8 text.
    #[error("{path} is not valid UTF-8")]
    NotUtf8 {
        /// The offending config file.
        path: PathBuf,
    },
}

impl InjectError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
