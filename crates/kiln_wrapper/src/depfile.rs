//! Reading the make rule a compiler prints for `-M`.
//!
//! ```text
//! main.o: main.c include/config.h \
//!  /usr/include/stdio.h
//! ```
//!
//! Continuation backslashes join lines, `\ ` escapes a space inside a path and
//! `$$` stands for `$`.

use std::collections::HashSet;

/// Returns the prerequisites of every rule in `text`, in order and without
/// duplicates.
pub fn parse_dependencies(text: &str) -> Vec<String> {
    let joined = text.replace("\\\r\n", " ").replace("\\\n", " ");
    let mut seen = HashSet::new();
    let mut deps = Vec::new();
    for line in joined.lines() {
        let Some(prerequisites) = after_target(line) else {
            continue;
        };
        for dep in split_words(prerequisites) {
            if seen.insert(dep.clone()) {
                deps.push(dep);
            }
        }
    }
    deps
}

/// Text after the rule's `target:` separator. A colon followed by a
/// non-space (`C:\src`) belongs to a path.
fn after_target(line: &str) -> Option<&str> {
    let mut chars = line.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let ends_target = chars.peek().map_or(true, |&(_, next)| next.is_whitespace());
        if c == ':' && ends_target {
            return Some(&line[i + 1..]);
        }
    }
    None
}

fn split_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&' ') => {
                chars.next();
                word.push(' ');
            }
            '$' if chars.peek() == Some(&'$') => {
                chars.next();
                word.push('$');
            }
            c if c.is_whitespace() => {
                if !word.is_empty() {
                    words.push(std::mem::take(&mut word));
                }
            }
            c => word.push(c),
        }
    }
    if !word.is_empty() {
        words.push(word);
    }
    words
}
