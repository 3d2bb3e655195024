//! Reading the device name out of a firmware description file.
//!
//! The config generator names the build directory after the device, so the
//! name is a useful hint when several build directories exist.

use std::path::Path;

/// Returns `esphome: name:` from a YAML description, if it is a literal.
///
/// Only the `name:` key directly under the top-level `esphome:` block counts.
/// Tagged values (`!secret ...`) and substitutions (`${...}`) cannot be
/// resolved here and yield `None`, as does an unreadable file.
pub fn device_name_from_description(path: &Path) -> Option<String> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            tracing::debug!(
                target: "kiln.inject",
                path = %path.display(),
                error = %err,
                "could not read description for device name"
            );
            return None;
        }
    };
    device_name_from_yaml(&text)
}

fn device_name_from_yaml(text: &str) -> Option<String> {
    let mut in_esphome = false;
    let mut block_indent: Option<usize> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let indent = line.len() - line.trim_start().len();

        if indent == 0 {
            in_esphome = trimmed.split('#').next().map(str::trim) == Some("esphome:");
            block_indent = None;
            continue;
        }
        if !in_esphome {
            continue;
        }

        // Only direct children of `esphome:` share the first child's indent.
        let child_indent = *block_indent.get_or_insert(indent);
        if indent != child_indent {
            continue;
        }
        if let Some(value) = trimmed.strip_prefix("name:") {
            return literal_value(value);
        }
    }
    None
}

fn literal_value(raw: &str) -> Option<String> {
    let value = match raw.find(" #") {
        Some(i) => &raw[..i],
        None => raw,
    };
    let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
    if value.is_empty() || value.starts_with('!') || value.contains("${") {
        return None;
    }
    Some(value.to_string())
}
