//! Locating the generated build directory.
//!
//! The config generator writes one build tree per target under
//! `<project root>/.<namespace>/build/`. In normal operation exactly one tree
//! exists there. When several do (multi-target builds) the first by name is
//! chosen and the rest are reported in [`BuildDirLookup::Found::others`].

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::InjectError;

/// Result of looking for the build directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildDirLookup {
    /// The build base directory does not exist (generation produced nothing).
    BaseMissing,
    /// The base directory exists but holds no subdirectories.
    Empty,
    /// A build directory was chosen.
    Found {
        /// The chosen build directory.
        dir: PathBuf,
        /// Other candidate directories that were not chosen, sorted by name.
        others: Vec<PathBuf>,
    },
}

impl BuildDirLookup {
    /// The chosen directory, if any.
    pub fn dir(&self) -> Option<&Path> {
        match self {
            Self::Found { dir, .. } => Some(dir),
            _ => None,
        }
    }

    /// True when more than one candidate existed.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Found { others, .. } if !others.is_empty())
    }
}

/// Derives `<project root>/.<namespace>/build` from a description file path.
///
/// The project root is the directory containing the description file.
pub fn build_base_dir(description: &Path, namespace: &str) -> PathBuf {
    let root = match description.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    root.join(format!(".{namespace}")).join("build")
}

/// Finds the build directory under `base`, picking the first by name.
pub fn locate_build_dir(base: &Path) -> Result<BuildDirLookup, InjectError> {
    locate_build_dir_preferring(base, None)
}

/// Finds the build directory under `base`.
///
/// If `preferred` names an existing child directory it is chosen; otherwise
/// the first child directory by name is.
pub fn locate_build_dir_preferring(
    base: &Path,
    preferred: Option<&str>,
) -> Result<BuildDirLookup, InjectError> {
    let mut children = match list_child_dirs(base)? {
        Some(children) => children,
        None => return Ok(BuildDirLookup::BaseMissing),
    };
    if children.is_empty() {
        return Ok(BuildDirLookup::Empty);
    }

    let index = preferred
        .and_then(|name| {
            children
                .iter()
                .position(|c| c.file_name().is_some_and(|n| n == name))
        })
        .unwrap_or(0);
    let dir = children.remove(index);

    if !children.is_empty() {
        tracing::debug!(
            target: "kiln.inject",
            chosen = %dir.display(),
            candidates = children.len() + 1,
            "multiple build directories present"
        );
    }
    Ok(BuildDirLookup::Found {
        dir,
        others: children,
    })
}

/// Lists immediate child directories sorted by name, or `None` if `base`
/// is not a directory.
fn list_child_dirs(base: &Path) -> Result<Option<Vec<PathBuf>>, InjectError> {
    if !base.is_dir() {
        return Ok(None);
    }
    let entries = match fs::read_dir(base) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(InjectError::io(base, err)),
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| InjectError::io(base, e))?;
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(Some(dirs))
}
