//! Running the real compiler.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::UNIX_EPOCH;

use crate::error::WrapperError;

/// Output of a compiler run with captured streams.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    /// Exit status; 0 is success.
    pub status: i32,
    /// Everything written to stdout.
    pub stdout: Vec<u8>,
    /// Everything written to stderr.
    pub stderr: Vec<u8>,
}

impl CapturedOutput {
    /// True if the compiler exited with status 0.
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Access to the real compiler.
pub trait Toolchain {
    /// Runs the compiler capturing both output streams.
    fn run_captured(
        &self,
        compiler: &str,
        args: &[String],
        working_dir: &Path,
    ) -> Result<CapturedOutput, WrapperError>;

    /// Runs the compiler with inherited stdio and returns its exit status.
    fn run_inherited(
        &self,
        compiler: &str,
        args: &[String],
        working_dir: &Path,
    ) -> Result<i32, WrapperError>;

    /// Bytes identifying the compiler binary, so that upgrading the toolchain
    /// changes every fingerprint.
    fn identity(&self, compiler: &str) -> Vec<u8>;
}

impl<T: Toolchain + ?Sized> Toolchain for &T {
    fn run_captured(
        &self,
        compiler: &str,
        args: &[String],
        working_dir: &Path,
    ) -> Result<CapturedOutput, WrapperError> {
        (**self).run_captured(compiler, args, working_dir)
    }

    fn run_inherited(
        &self,
        compiler: &str,
        args: &[String],
        working_dir: &Path,
    ) -> Result<i32, WrapperError> {
        (**self).run_inherited(compiler, args, working_dir)
    }

    fn identity(&self, compiler: &str) -> Vec<u8> {
        (**self).identity(compiler)
    }
}

/// The compiler found on disk, run via [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemToolchain;

impl Toolchain for SystemToolchain {
    fn run_captured(
        &self,
        compiler: &str,
        args: &[String],
        working_dir: &Path,
    ) -> Result<CapturedOutput, WrapperError> {
        let output = Command::new(compiler)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| WrapperError::Spawn {
                program: compiler.to_string(),
                source,
            })?;
        Ok(CapturedOutput {
            status: exit_code(output.status),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn run_inherited(
        &self,
        compiler: &str,
        args: &[String],
        working_dir: &Path,
    ) -> Result<i32, WrapperError> {
        let status = Command::new(compiler)
            .args(args)
            .current_dir(working_dir)
            .status()
            .map_err(|source| WrapperError::Spawn {
                program: compiler.to_string(),
                source,
            })?;
        Ok(exit_code(status))
    }

    fn identity(&self, compiler: &str) -> Vec<u8> {
        let mut id = compiler.as_bytes().to_vec();
        let Some(path) = resolve_program(compiler) else {
            return id;
        };
        id.push(0);
        id.extend_from_slice(path.to_string_lossy().as_bytes());
        if let Ok(meta) = fs::metadata(&path) {
            id.extend_from_slice(&meta.len().to_le_bytes());
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_nanos())
                .unwrap_or_default();
            id.extend_from_slice(&mtime.to_le_bytes());
        }
        id
    }
}

/// Maps an exit status to a process exit code; death by signal becomes 1.
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

/// Finds the executable `program` refers to, searching `PATH` for bare names.
fn resolve_program(program: &str) -> Option<PathBuf> {
    let direct = Path::new(program);
    if direct.components().count() > 1 {
        return direct.is_file().then(|| direct.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
