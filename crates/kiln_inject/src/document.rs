//! Lossless model of the line-oriented build-system config (`platformio.ini`).
//!
//! The document keeps every input line verbatim, terminator included, and only
//! adds structure on top: sections with their header line, and keys with their
//! first line and indented continuation lines. Writing an unmodified document
//! reproduces the input byte for byte.
//!
//! Parsing follows the INI dialect the build system uses:
//! - a section header is a line whose trimmed form is `[name]`;
//! - a key starts in column 0, is not a comment, and contains `=`; its name is
//!   the trimmed text before the first `=`;
//! - indented lines after a key continue its value, and blank lines between
//!   such continuations belong to the value as well;
//! - `;` and `#` start full-line comments, and inline comments when preceded
//!   by whitespace.

use std::fmt;

/// A parsed build-system config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfigDocument {
    preamble: Vec<Item>,
    sections: Vec<Section>,
    eol: &'static str,
}

/// A `[name]` section and everything up to the next header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    header: String,
    name: String,
    items: Vec<Item>,
}

/// One element inside a section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    /// A `key = value` assignment with its continuation lines.
    Key(KeyEntry),
    /// Anything else (blank line, comment, unrecognized text), kept verbatim.
    Raw(String),
}

/// A key and its raw lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    name: String,
    first: String,
    continuations: Vec<String>,
}

impl BuildConfigDocument {
    /// Parses config text. Parsing never fails: unrecognized lines are kept
    /// as raw items.
    pub fn parse(text: &str) -> Self {
        let eol = if text.contains("\r\n") { "\r\n" } else { "\n" };
        let mut doc = Self {
            preamble: Vec::new(),
            sections: Vec::new(),
            eol,
        };
        let mut current_key: Option<KeyEntry> = None;
        let mut pending_blank: Vec<String> = Vec::new();

        for line in text.split_inclusive('\n') {
            let content = line_content(line);
            let trimmed = content.trim();
            let indented = content.starts_with([' ', '\t']);

            if trimmed.is_empty() {
                if current_key.is_some() {
                    pending_blank.push(line.to_string());
                } else {
                    doc.push_item(Item::Raw(line.to_string()));
                }
                continue;
            }

            if indented {
                if let Some(key) = current_key.as_mut() {
                    key.continuations.append(&mut pending_blank);
                    key.continuations.push(line.to_string());
                    continue;
                }
            }

            doc.close_key(&mut current_key, &mut pending_blank);

            if is_comment(trimmed) {
                doc.push_item(Item::Raw(line.to_string()));
            } else if let Some(name) = section_name(trimmed) {
                doc.sections.push(Section {
                    header: line.to_string(),
                    name,
                    items: Vec::new(),
                });
            } else if indented {
                doc.push_item(Item::Raw(line.to_string()));
            } else if let Some(name) = key_name(content) {
                current_key = Some(KeyEntry {
                    name,
                    first: line.to_string(),
                    continuations: Vec::new(),
                });
            } else {
                doc.push_item(Item::Raw(line.to_string()));
            }
        }
        doc.close_key(&mut current_key, &mut pending_blank);
        doc
    }

    fn push_item(&mut self, item: Item) {
        match self.sections.last_mut() {
            Some(section) => section.items.push(item),
            None => self.preamble.push(item),
        }
    }

    fn close_key(&mut self, key: &mut Option<KeyEntry>, pending_blank: &mut Vec<String>) {
        if let Some(key) = key.take() {
            self.push_item(Item::Key(key));
        }
        for line in pending_blank.drain(..) {
            self.push_item(Item::Raw(line));
        }
    }

    /// All sections in file order.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Index of the environment section to patch.
    ///
    /// With `explicit = Some("kitchen")` only `[env:kitchen]` matches.
    /// Otherwise the first `[env:NAME]` section is chosen; the shared `[env]`
    /// section never is.
    pub fn environment_index(&self, explicit: Option<&str>) -> Option<usize> {
        self.sections.iter().position(|s| match explicit {
            Some(name) => s.environment() == Some(name),
            None => s.environment().is_some(),
        })
    }

    /// True if any `key` in the document lists `script`, with or without a
    /// `pre:`/`post:` prefix.
    pub fn has_hook_entry(&self, key: &str, script: &str) -> bool {
        self.preamble
            .iter()
            .chain(self.sections.iter().flat_map(|s| s.items.iter()))
            .filter_map(|item| match item {
                Item::Key(k) if k.name == key => Some(k),
                _ => None,
            })
            .flat_map(|k| k.values())
            .any(|value| refers_to_script(&value, script))
    }

    /// Adds `value` to `key` in the section at `section`.
    ///
    /// If the section already has the key, `value` is appended as a new
    /// continuation line after the existing ones. Otherwise the key is created
    /// directly below the section header with `value` as its only entry.
    ///
    /// # Panics
    ///
    /// Panics if `section` is out of bounds.
    pub fn append_value(&mut self, section: usize, key: &str, value: &str) {
        let eol = self.eol;
        let section = &mut self.sections[section];

        let existing = section.items.iter_mut().find_map(|item| match item {
            Item::Key(k) if k.name == key => Some(k),
            _ => None,
        });

        match existing {
            Some(entry) => {
                let indent = entry.continuation_indent().to_string();
                let last = entry
                    .continuations
                    .last_mut()
                    .unwrap_or(&mut entry.first);
                terminate(last, eol);
                entry.continuations.push(format!("{indent}{value}{eol}"));
            }
            None => {
                terminate(&mut section.header, eol);
                section.items.insert(
                    0,
                    Item::Key(KeyEntry {
                        name: key.to_string(),
                        first: format!("{key} ={eol}"),
                        continuations: vec![format!("{DEFAULT_INDENT}{value}{eol}")],
                    }),
                );
            }
        }
    }
}

impl fmt::Display for BuildConfigDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in &self.preamble {
            item.fmt(f)?;
        }
        for section in &self.sections {
            f.write_str(&section.header)?;
            for item in &section.items {
                item.fmt(f)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Raw(line) => f.write_str(line),
            Item::Key(key) => {
                f.write_str(&key.first)?;
                for line in &key.continuations {
                    f.write_str(line)?;
                }
                Ok(())
            }
        }
    }
}

impl Section {
    /// Name inside the brackets, e.g. `env:kitchen`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Environment name for `[env:NAME]` sections.
    pub fn environment(&self) -> Option<&str> {
        self.name
            .strip_prefix("env:")
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }

    /// Items in file order.
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// The first key with the given name.
    pub fn key(&self, name: &str) -> Option<&KeyEntry> {
        self.items.iter().find_map(|item| match item {
            Item::Key(k) if k.name == name => Some(k),
            _ => None,
        })
    }
}

/// Indentation for continuation lines when none can be copied.
const DEFAULT_INDENT: &str = "    ";

impl KeyEntry {
    /// The key name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value entries with comments removed, split on newlines and commas.
    pub fn values(&self) -> Vec<String> {
        let mut parts: Vec<&str> = Vec::new();
        if let Some((_, value)) = line_content(&self.first).split_once('=') {
            parts.push(value);
        }
        for line in &self.continuations {
            let trimmed = line_content(line).trim();
            if !trimmed.is_empty() && !is_comment(trimmed) {
                parts.push(trimmed);
            }
        }
        parts
            .into_iter()
            .flat_map(|part| strip_inline_comment(part).split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Leading whitespace of the first non-blank continuation line.
    fn continuation_indent(&self) -> &str {
        self.continuations
            .iter()
            .map(|line| line_content(line))
            .find(|content| !content.trim().is_empty())
            .map(|content| &content[..content.len() - content.trim_start().len()])
            .unwrap_or(DEFAULT_INDENT)
    }
}

/// A line without its terminator.
fn line_content(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

/// Appends a terminator to the final line of a file that lacked one.
fn terminate(line: &mut String, eol: &str) {
    if !line.ends_with('\n') {
        line.push_str(eol);
    }
}

fn is_comment(trimmed: &str) -> bool {
    trimmed.starts_with(';') || trimmed.starts_with('#')
}

/// Cuts an inline `;`/`#` comment that is preceded by whitespace.
fn strip_inline_comment(text: &str) -> &str {
    let mut prev_is_space = false;
    for (i, c) in text.char_indices() {
        if (c == ';' || c == '#') && prev_is_space {
            return &text[..i];
        }
        prev_is_space = c.is_whitespace();
    }
    text
}

fn section_name(trimmed: &str) -> Option<String> {
    let text = strip_inline_comment(trimmed).trim();
    let inner = text.strip_prefix('[')?.strip_suffix(']')?.trim();
    (!inner.is_empty()).then(|| inner.to_string())
}

fn key_name(content: &str) -> Option<String> {
    let (name, _) = content.split_once('=')?;
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// True if a hook value names `script`, e.g. `pre:script.py` or
/// `$PROJECT_DIR/script.py`.
fn refers_to_script(value: &str, script: &str) -> bool {
    let path = value
        .strip_prefix("pre:")
        .or_else(|| value.strip_prefix("post:"))
        .unwrap_or(value)
        .trim();
    path == script || path.ends_with(&format!("/{script}"))
}
