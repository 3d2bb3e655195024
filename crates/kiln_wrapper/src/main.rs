//! `kiln-cc`: compiler front-end that consults the kiln cache.
//!
//! Usage: `kiln-cc <compiler> [args...]`. Cache settings come from the
//! `KILN_CACHE_*` variables exported by the wrapper script.

use std::io::{self, Write};
use std::process;

use kiln_config::CacheSettings;
use kiln_wrapper::{CompilerInvocation, SystemToolchain, Toolchain, WrapperInvoker};
use tracing_subscriber::EnvFilter;

/// Environment variable holding `tracing` filter directives.
const LOG_ENV: &str = "KILN_LOG";

fn main() {
    init_logging();

    match run() {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("kiln-cc: error: {e}");
            process::exit(1);
        }
    }
}

fn run() -> Result<i32, Box<dyn std::error::Error>> {
    let argv = std::env::args_os()
        .skip(1)
        .map(|arg| {
            arg.into_string()
                .map_err(|arg| format!("argument is not valid UTF-8: {}", arg.to_string_lossy()))
        })
        .collect::<Result<Vec<String>, String>>()?;

    let Some(invocation) = CompilerInvocation::parse(argv, std::env::current_dir()?) else {
        eprintln!("usage: kiln-cc <compiler> [args...]");
        return Ok(1);
    };

    let settings = match CacheSettings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            // Bad cache settings must never break the build.
            tracing::warn!(target: "kiln.wrapper", error = %err, "cache disabled");
            return Ok(SystemToolchain.run_inherited(
                &invocation.compiler,
                &invocation.args,
                &invocation.working_dir,
            )?);
        }
    };

    let invoker = WrapperInvoker::new(&settings, SystemToolchain);
    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr().lock();
    let report = invoker.invoke(&invocation, &mut stdout, &mut stderr)?;
    stdout.flush()?;
    tracing::debug!(
        target: "kiln.wrapper",
        cache = ?report.cache,
        exit_code = report.exit_code,
        "done"
    );
    Ok(report.exit_code)
}

/// Logging is off unless `KILN_LOG` asks for it; the build system parses
/// compiler stderr.
fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("off"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}
