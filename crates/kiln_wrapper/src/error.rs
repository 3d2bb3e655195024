//! Error types for the compiler wrapper.

use std::path::PathBuf;

use kiln_cache::CacheError;

/// Errors raised while wrapping a compiler invocation.
#[derive(Debug, thiserror::Error)]
pub enum WrapperError {
    /// The compiler could not be started.
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        /// The compiler as given on the command line.
        program: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Reading a source or object file failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Preprocessing for the fingerprint failed.
    #[error("preprocessor exited with status {status}")]
    Preprocess {
        /// Exit status of the `-E` or `-M` run.
        status: i32,
    },

    /// The `-M` run printed no dependency rule.
    #[error("compiler reported no dependencies")]
    NoDependencies,

    /// Writing compiler output to our own stdout or stderr failed.
    #[error("failed to forward compiler output: {0}")]
    Forward(#[source] std::io::Error),

    /// The cache store failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl WrapperError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
