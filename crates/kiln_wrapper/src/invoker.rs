//! Cache-consulting compiler invocation.

use std::fs;
use std::io::Write;

use kiln_cache::fs::atomic_write;
use kiln_cache::{CacheEntry, CacheStore};
use kiln_common::{ContentHash, FingerprintBuilder};
use kiln_config::{CacheSettings, FingerprintMode};

use crate::depfile::parse_dependencies;
use crate::error::WrapperError;
use crate::invocation::{CompileUnit, CompilerInvocation, Uncacheable};
use crate::toolchain::Toolchain;

/// Bumped whenever the fingerprint inputs change shape, so old entries stop
/// matching.
pub const WRAPPER_FORMAT_VERSION: u32 = 2;

/// How the cache took part in an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheUse {
    /// The object came from the cache; the compiler did not run.
    Hit,
    /// The compiler ran. `stored` tells whether its result entered the cache.
    Miss {
        /// Whether the compiled object was inserted.
        stored: bool,
    },
    /// The invocation was passed through untouched.
    Uncacheable(Uncacheable),
    /// Fingerprinting failed and the compiler ran without the cache.
    Bypassed,
}

/// Result of one wrapped invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeReport {
    /// Exit code to return to the build system.
    pub exit_code: i32,
    /// How the cache was used.
    pub cache: CacheUse,
}

/// Runs compiler invocations through the cache.
pub struct WrapperInvoker<T> {
    store: CacheStore,
    mode: FingerprintMode,
    toolchain: T,
}

impl<T: Toolchain> WrapperInvoker<T> {
    /// Creates an invoker over the store described by `settings`.
    pub fn new(settings: &CacheSettings, toolchain: T) -> Self {
        Self {
            store: CacheStore::new(settings),
            mode: settings.fingerprint,
            toolchain,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Computes the cache key of a cacheable invocation.
    ///
    /// [`FingerprintMode::Direct`] hashes every file the compiler lists for
    /// `-M`, so a changed header changes the key.
    /// [`FingerprintMode::Preprocessed`] hashes the `-E` output instead.
    pub fn fingerprint(
        &self,
        invocation: &CompilerInvocation,
        unit: &CompileUnit,
    ) -> Result<ContentHash, WrapperError> {
        let mut fp = FingerprintBuilder::new();
        fp.part("format", &WRAPPER_FORMAT_VERSION.to_le_bytes())
            .part("mode", self.mode.to_string().as_bytes())
            .part("compiler", invocation.compiler.as_bytes())
            .part("compiler-id", &self.toolchain.identity(&invocation.compiler));
        for arg in &unit.args_without_output {
            fp.part("arg", arg.as_bytes());
        }

        match self.mode {
            FingerprintMode::Direct => {
                // Relative include paths resolve against the working directory.
                fp.part("cwd", invocation.working_dir.to_string_lossy().as_bytes());
                let source =
                    fs::read(&unit.source).map_err(|e| WrapperError::io(&unit.source, e))?;
                fp.part("source", &source);

                let args = invocation.dependency_args(unit);
                let rule = self.run_for_fingerprint(invocation, args)?;
                let deps = parse_dependencies(&String::from_utf8_lossy(&rule));
                if deps.is_empty() {
                    return Err(WrapperError::NoDependencies);
                }
                for dep in deps {
                    let path = invocation.working_dir.join(&dep);
                    let content = fs::read(&path).map_err(|e| WrapperError::io(&path, e))?;
                    fp.part("dep", dep.as_bytes()).part("dep-content", &content);
                }
            }
            FingerprintMode::Preprocessed => {
                let args = invocation.preprocess_args(unit);
                let preprocessed = self.run_for_fingerprint(invocation, args)?;
                fp.part("preprocessed", &preprocessed);
            }
        }
        Ok(fp.finish())
    }

    /// Runs the compiler in a non-compiling mode and returns its stdout.
    fn run_for_fingerprint(
        &self,
        invocation: &CompilerInvocation,
        args: Vec<String>,
    ) -> Result<Vec<u8>, WrapperError> {
        let output = self
            .toolchain
            .run_captured(&invocation.compiler, &args, &invocation.working_dir)?;
        if !output.success() {
            return Err(WrapperError::Preprocess {
                status: output.status,
            });
        }
        Ok(output.stdout)
    }

    /// Runs `invocation`, serving it from the cache when possible.
    ///
    /// Compiler output on a miss and stored output on a hit both go to
    /// `stdout`/`stderr`. Uncacheable invocations run with inherited stdio.
    pub fn invoke(
        &self,
        invocation: &CompilerInvocation,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<InvokeReport, WrapperError> {
        let unit = match invocation.analyze() {
            Ok(unit) => unit,
            Err(reason) => {
                tracing::debug!(target: "kiln.wrapper", %reason, "passing through");
                let exit_code = self.pass_through(invocation)?;
                return Ok(InvokeReport {
                    exit_code,
                    cache: CacheUse::Uncacheable(reason),
                });
            }
        };

        let key = match self.fingerprint(invocation, &unit) {
            Ok(key) => key,
            Err(err) => {
                tracing::debug!(target: "kiln.wrapper", error = %err, "fingerprint failed");
                let exit_code = self.pass_through(invocation)?;
                return Ok(InvokeReport {
                    exit_code,
                    cache: CacheUse::Bypassed,
                });
            }
        };

        if let Some(entry) = self.store.lookup(&key) {
            match atomic_write(&unit.output, &entry.object) {
                Ok(()) => {
                    tracing::debug!(target: "kiln.wrapper", key = %key, "cache hit");
                    stdout.write_all(&entry.stdout).map_err(WrapperError::Forward)?;
                    stderr.write_all(&entry.stderr).map_err(WrapperError::Forward)?;
                    return Ok(InvokeReport {
                        exit_code: 0,
                        cache: CacheUse::Hit,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        target: "kiln.wrapper",
                        error = %err,
                        "failed to place cached object, compiling"
                    );
                }
            }
        }

        let output = self.toolchain.run_captured(
            &invocation.compiler,
            &invocation.args,
            &invocation.working_dir,
        )?;
        stdout.write_all(&output.stdout).map_err(WrapperError::Forward)?;
        stderr.write_all(&output.stderr).map_err(WrapperError::Forward)?;

        if !output.success() {
            return Ok(InvokeReport {
                exit_code: output.status,
                cache: CacheUse::Miss { stored: false },
            });
        }

        let status = output.status;
        let stored = match fs::read(&unit.output) {
            Ok(object) => {
                let entry = CacheEntry {
                    object,
                    stdout: output.stdout,
                    stderr: output.stderr,
                };
                match self.store.insert(&key, &entry) {
                    // A concurrent trim may already have removed it.
                    Ok(()) => self.store.contains(&key),
                    Err(err) => {
                        tracing::warn!(
                            target: "kiln.wrapper",
                            error = %err,
                            "failed to store object"
                        );
                        false
                    }
                }
            }
            Err(err) => {
                tracing::warn!(
                    target: "kiln.wrapper",
                    path = %unit.output.display(),
                    error = %err,
                    "compiler produced no readable object"
                );
                false
            }
        };

        Ok(InvokeReport {
            exit_code: status,
            cache: CacheUse::Miss { stored },
        })
    }

    fn pass_through(&self, invocation: &CompilerInvocation) -> Result<i32, WrapperError> {
        self.toolchain.run_inherited(
            &invocation.compiler,
            &invocation.args,
            &invocation.working_dir,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::CapturedOutput;
    use kiln_common::ByteSize;
    use std::path::Path;

    /// Compiler that preprocesses to a fixed string, reports `main.c` and
    /// `config.h` as the only dependencies, and never compiles.
    struct EchoPreprocessor(&'static str);

    impl Toolchain for EchoPreprocessor {
        fn run_captured(
            &self,
            _compiler: &str,
            args: &[String],
            _working_dir: &Path,
        ) -> Result<CapturedOutput, WrapperError> {
            let stdout = if args.iter().any(|a| a == "-M") {
                b"main.o: main.c \\\n config.h\n".to_vec()
            } else {
                assert!(args.iter().any(|a| a == "-E"));
                self.0.as_bytes().to_vec()
            };
            Ok(CapturedOutput {
                status: 0,
                stdout,
                stderr: Vec::new(),
            })
        }

        fn run_inherited(&self, _: &str, _: &[String], _: &Path) -> Result<i32, WrapperError> {
            Ok(0)
        }

        fn identity(&self, compiler: &str) -> Vec<u8> {
            compiler.as_bytes().to_vec()
        }
    }

    fn settings(dir: &Path, mode: FingerprintMode) -> CacheSettings {
        CacheSettings {
            dir: dir.join("cache"),
            max_size: ByteSize::new(1 << 30),
            compress: false,
            compress_level: 0,
            fingerprint: mode,
        }
    }

    fn unit_in(dir: &Path, source: &str, extra: &[&str]) -> (CompilerInvocation, CompileUnit) {
        fs::write(dir.join("main.c"), source).unwrap();
        if !dir.join("config.h").exists() {
            fs::write(dir.join("config.h"), "#define LEVEL 1\n").unwrap();
        }
        let mut argv = vec!["cc".to_string(), "-c".to_string(), "main.c".to_string()];
        argv.extend(extra.iter().map(|s| s.to_string()));
        let inv = CompilerInvocation::parse(argv, dir).unwrap();
        let unit = inv.analyze().unwrap();
        (inv, unit)
    }

    #[test]
    fn direct_fingerprint_follows_source_content() {
        let tmp = tempfile::tempdir().unwrap();
        let invoker = WrapperInvoker::new(
            &settings(tmp.path(), FingerprintMode::Direct),
            EchoPreprocessor(""),
        );

        let (inv, unit) = unit_in(tmp.path(), "int a;", &[]);
        let first = invoker.fingerprint(&inv, &unit).unwrap();
        assert_eq!(first, invoker.fingerprint(&inv, &unit).unwrap());

        let (inv, unit) = unit_in(tmp.path(), "int b;", &[]);
        assert_ne!(first, invoker.fingerprint(&inv, &unit).unwrap());
    }

    #[test]
    fn direct_fingerprint_follows_header_content() {
        let tmp = tempfile::tempdir().unwrap();
        let invoker = WrapperInvoker::new(
            &settings(tmp.path(), FingerprintMode::Direct),
            EchoPreprocessor(""),
        );

        let (inv, unit) = unit_in(tmp.path(), "#include \"config.h\"", &[]);
        let before = invoker.fingerprint(&inv, &unit).unwrap();
        fs::write(tmp.path().join("config.h"), "#define LEVEL 2\n").unwrap();
        assert_ne!(before, invoker.fingerprint(&inv, &unit).unwrap());
    }

    #[test]
    fn missing_dependency_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let invoker = WrapperInvoker::new(
            &settings(tmp.path(), FingerprintMode::Direct),
            EchoPreprocessor(""),
        );
        let (inv, unit) = unit_in(tmp.path(), "int a;", &[]);
        fs::remove_file(tmp.path().join("config.h")).unwrap();
        assert!(matches!(
            invoker.fingerprint(&inv, &unit),
            Err(WrapperError::Io { .. })
        ));
    }

    #[test]
    fn fingerprint_ignores_output_path_but_not_flags() {
        let tmp = tempfile::tempdir().unwrap();
        let invoker = WrapperInvoker::new(
            &settings(tmp.path(), FingerprintMode::Direct),
            EchoPreprocessor(""),
        );

        let (a, unit_a) = unit_in(tmp.path(), "int a;", &["-o", "x.o"]);
        let (b, unit_b) = unit_in(tmp.path(), "int a;", &["-o", "y.o"]);
        let (c, unit_c) = unit_in(tmp.path(), "int a;", &["-O2"]);
        let key_a = invoker.fingerprint(&a, &unit_a).unwrap();
        assert_eq!(key_a, invoker.fingerprint(&b, &unit_b).unwrap());
        assert_ne!(key_a, invoker.fingerprint(&c, &unit_c).unwrap());
    }

    #[test]
    fn preprocessed_fingerprint_uses_compiler_output() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = settings(tmp.path(), FingerprintMode::Preprocessed);

        let (inv, unit) = unit_in(tmp.path(), "#include \"a.h\"", &[]);
        let one = WrapperInvoker::new(&cfg, EchoPreprocessor("int a;"))
            .fingerprint(&inv, &unit)
            .unwrap();
        let two = WrapperInvoker::new(&cfg, EchoPreprocessor("int b;"))
            .fingerprint(&inv, &unit)
            .unwrap();
        assert_ne!(one, two);
    }

    #[test]
    fn missing_source_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let invoker = WrapperInvoker::new(
            &settings(tmp.path(), FingerprintMode::Direct),
            EchoPreprocessor(""),
        );
        let inv = CompilerInvocation::parse(
            vec!["cc".to_string(), "-c".to_string(), "gone.c".to_string()],
            tmp.path(),
        )
        .unwrap();
        let unit = inv.analyze().unwrap();
        assert!(matches!(
            invoker.fingerprint(&inv, &unit),
            Err(WrapperError::Io { .. })
        ));
    }
}
