//! Compiler command-line analysis.
//!
//! Only plain "compile one source file to one object file" invocations are
//! cached. Everything else (linking, preprocessing to stdout, dependency
//! generation, response files) is classified as [`Uncacheable`] and passed
//! through.

use std::fmt;
use std::path::{Path, PathBuf};

/// Source file extensions the wrapper knows how to cache.
const SOURCE_EXTENSIONS: &[&str] = &[
    "c", "cc", "cp", "cpp", "cxx", "c++", "C", "CPP", "ino", "s", "S", "sx",
];

/// Options whose value is the following argument.
const OPTIONS_WITH_VALUE: &[&str] = &[
    "-D",
    "-U",
    "-I",
    "-include",
    "-imacros",
    "-isystem",
    "-iquote",
    "-idirafter",
    "-iprefix",
    "-iwithprefix",
    "-iwithprefixbefore",
    "-isysroot",
    "-x",
    "-MT",
    "-MQ",
    "-L",
    "-l",
    "-T",
    "-u",
    "-z",
    "-Xlinker",
    "-Xassembler",
    "-Xpreprocessor",
    "-aux-info",
    "--param",
];

/// A compiler command line as received by `kiln-cc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerInvocation {
    /// The real compiler, as given (path or bare name looked up on `PATH`).
    pub compiler: String,
    /// Arguments for the compiler.
    pub args: Vec<String>,
    /// Directory the compiler runs in; relative paths resolve against it.
    pub working_dir: PathBuf,
}

/// What a cacheable invocation reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileUnit {
    /// The single source file, resolved against the working directory.
    pub source: PathBuf,
    /// The object file the compiler will write.
    pub output: PathBuf,
    /// Arguments with `-o <path>` removed; the fingerprint input.
    pub args_without_output: Vec<String>,
}

/// Why an invocation is passed straight to the compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Uncacheable {
    /// No `-c`: the compiler links.
    NotCompileOnly,
    /// No source file among the inputs.
    NoSource,
    /// More than one source file.
    MultipleSources,
    /// An input the wrapper does not recognize as a source file.
    UnknownInput(String),
    /// `-E` or `-S`: the output is not an object file.
    NonObjectOutput(String),
    /// `-M`-family dependency generation has side outputs.
    DependencyOutput(String),
    /// `@file` arguments hide the real command line.
    ResponseFile,
    /// Source read from stdin.
    StdinInput,
    /// Object written to stdout.
    StdoutOutput,
    /// An option expecting a value ended the command line.
    MissingValue(String),
}

impl fmt::Display for Uncacheable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotCompileOnly => write!(f, "not a compile-only invocation"),
            Self::NoSource => write!(f, "no source file"),
            Self::MultipleSources => write!(f, "multiple source files"),
            Self::UnknownInput(input) => write!(f, "unrecognized input `{input}`"),
            Self::NonObjectOutput(flag) => write!(f, "`{flag}` does not produce an object file"),
            Self::DependencyOutput(flag) => write!(f, "dependency generation `{flag}`"),
            Self::ResponseFile => write!(f, "response file argument"),
            Self::StdinInput => write!(f, "source read from stdin"),
            Self::StdoutOutput => write!(f, "output written to stdout"),
            Self::MissingValue(flag) => write!(f, "`{flag}` is missing its value"),
        }
    }
}

impl CompilerInvocation {
    /// Splits `argv` (without the wrapper's own name) into compiler and
    /// arguments. Returns `None` when `argv` is empty.
    pub fn parse(argv: Vec<String>, working_dir: impl Into<PathBuf>) -> Option<Self> {
        let mut argv = argv.into_iter();
        let compiler = argv.next()?;
        Some(Self {
            compiler,
            args: argv.collect(),
            working_dir: working_dir.into(),
        })
    }

    /// Classifies the invocation, returning the compile unit when cacheable.
    pub fn analyze(&self) -> Result<CompileUnit, Uncacheable> {
        let mut compile_only = false;
        let mut output: Option<&str> = None;
        let mut sources: Vec<&str> = Vec::new();
        let mut args_without_output = Vec::with_capacity(self.args.len());

        let mut iter = self.args.iter();
        while let Some(arg) = iter.next() {
            let arg = arg.as_str();

            if arg == "-o" {
                let value = iter
                    .next()
                    .ok_or_else(|| Uncacheable::MissingValue(arg.to_string()))?;
                output = Some(value);
                continue;
            }
            if let Some(value) = arg.strip_prefix("-o") {
                output = Some(value);
                continue;
            }

            args_without_output.push(arg.to_string());

            if arg.starts_with('@') {
                return Err(Uncacheable::ResponseFile);
            }
            if arg == "-" {
                return Err(Uncacheable::StdinInput);
            }

            match arg {
                "-c" => compile_only = true,
                "-E" | "-S" => return Err(Uncacheable::NonObjectOutput(arg.to_string())),
                "-M" | "-MM" | "-MD" | "-MMD" | "-MF" | "-MG" | "-MP" => {
                    return Err(Uncacheable::DependencyOutput(arg.to_string()));
                }
                _ if OPTIONS_WITH_VALUE.contains(&arg) => {
                    let value = iter
                        .next()
                        .ok_or_else(|| Uncacheable::MissingValue(arg.to_string()))?;
                    args_without_output.push(value.clone());
                }
                _ if arg.starts_with("-MF") => {
                    return Err(Uncacheable::DependencyOutput(arg.to_string()));
                }
                _ if arg.starts_with('-') => {}
                _ if is_source(arg) => sources.push(arg),
                _ => return Err(Uncacheable::UnknownInput(arg.to_string())),
            }
        }

        if !compile_only {
            return Err(Uncacheable::NotCompileOnly);
        }
        let source = match sources.as_slice() {
            [] => return Err(Uncacheable::NoSource),
            [one] => *one,
            _ => return Err(Uncacheable::MultipleSources),
        };

        let output = match output {
            Some("-") => return Err(Uncacheable::StdoutOutput),
            Some(path) => PathBuf::from(path),
            None => default_object_name(source),
        };

        Ok(CompileUnit {
            source: self.working_dir.join(source),
            output: self.working_dir.join(output),
            args_without_output,
        })
    }

    /// Arguments that make the compiler preprocess the unit to stdout.
    pub fn preprocess_args(&self, unit: &CompileUnit) -> Vec<String> {
        without_compile_flag(unit, "-E")
    }

    /// Arguments that make the compiler print the unit's make rule, listing
    /// every file it reads (forced includes and system headers too), to
    /// stdout.
    pub fn dependency_args(&self, unit: &CompileUnit) -> Vec<String> {
        without_compile_flag(unit, "-M")
    }
}

/// The unit's arguments with `-c` swapped for `mode`.
fn without_compile_flag(unit: &CompileUnit, mode: &str) -> Vec<String> {
    let mut args: Vec<String> = unit
        .args_without_output
        .iter()
        .filter(|a| a.as_str() != "-c")
        .cloned()
        .collect();
    args.push(mode.to_string());
    args
}

fn is_source(arg: &str) -> bool {
    Path::new(arg)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
}

/// `dir/foo.cpp` compiles to `foo.o` in the working directory.
fn default_object_name(source: &str) -> PathBuf {
    let stem = Path::new(source)
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_default();
    let mut name = stem;
    name.push(".o");
    PathBuf::from(name)
}
