//! Rendering the wrapper script deployed into the build directory.

use std::path::Path;

use kiln_config::CacheSettings;

const TEMPLATE: &str = include_str!("../templates/kiln_cache_wrapper.py");

/// Renders the pre-build script that points the build at `kiln-cc`.
///
/// The cache settings are baked into the script as environment variables for
/// the compiler processes, so each `kiln-cc` sees exactly what the pipeline
/// resolved.
pub fn render_wrapper_script(settings: &CacheSettings, wrapper_binary: &Path) -> String {
    let cache_env = settings
        .env_vars()
        .into_iter()
        .map(|(name, value)| format!("    {}: {},", python_str(name), python_str(&value)))
        .collect::<Vec<_>>()
        .join("\n");

    TEMPLATE
        .replace(
            "@KILN_CC@",
            &python_str(&wrapper_binary.display().to_string()),
        )
        .replace("@CACHE_ENV@", &cache_env)
}

/// Quotes `s` as a double-quoted Python string literal.
fn python_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}
