//! Human-readable status lines on stderr.

use std::fmt::Display;

/// Writes one status line per pipeline decision unless quiet.
#[derive(Debug, Clone, Copy, Default)]
pub struct Status {
    quiet: bool,
}

impl Status {
    /// Creates a reporter; `quiet` suppresses everything but errors.
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    /// Prints `verb` right-aligned followed by `message`.
    pub fn line(&self, verb: &str, message: impl Display) {
        if !self.quiet {
            eprintln!("{}", format_line(verb, message));
        }
    }

    /// Prints a `warning:` line.
    pub fn warning(&self, message: impl Display) {
        if !self.quiet {
            eprintln!("warning: {message}");
        }
    }
}

fn format_line(verb: &str, message: impl Display) -> String {
    format!("{verb:>12} {message}")
}
