//! The compiler wrapper behind `kiln-cc`.
//!
//! The build system invokes `kiln-cc <compiler> <args...>` for every
//! translation unit. The wrapper fingerprints the invocation, serves the
//! object file from the [`CacheStore`](kiln_cache::CacheStore) on a hit and
//! runs the real compiler (storing its result) on a miss. Anything it cannot
//! reason about is passed straight through to the compiler.

#![warn(missing_docs)]

pub mod depfile;
pub mod error;
pub mod invocation;
pub mod invoker;
pub mod toolchain;

pub use error::WrapperError;
pub use invocation::{CompileUnit, CompilerInvocation, Uncacheable};
pub use invoker::{CacheUse, InvokeReport, WrapperInvoker, WRAPPER_FORMAT_VERSION};
pub use toolchain::{CapturedOutput, SystemToolchain, Toolchain};
