//! Marker-delimited section extraction.
//!
//! Generated text is expected to contain sections of the form `#Name#` followed
//! by a body that runs until the next line starting with `#` or the end of the
//! text. A sentinel `\n#` is appended before matching so that the last section
//! is always bounded.

use dashmap::DashMap;
use regex::Regex;
use std::sync::LazyLock;

pub const MARKER: char = '#';

/// Compiled extraction pattern per section name.
static SECTION_PATTERNS: LazyLock<DashMap<String, Regex>> = LazyLock::new(DashMap::new);

/// Render `name` as a section marker, e.g. `#Symptoms#`.
pub fn marker(name: &str) -> String {
    format!("{MARKER}{name}{MARKER}")
}

/// Render `name` as a speaker header, e.g. `##Doctor A##`.
pub fn header(name: &str) -> String {
    format!("{MARKER}{MARKER}{name}{MARKER}{MARKER}")
}

/// Body of the first `#name#` section in `text`, trimmed and stripped of marker
/// characters. `None` when the section does not occur.
pub fn extract(text: &str, name: &str) -> Option<String> {
    let re = section_pattern(name)?;
    let bounded = format!("{text}\n{MARKER}");

    re.captures(&bounded)
        .and_then(|caps| caps.get(1))
        .map(|body| {
            body.as_str()
                .replace(&marker(name), "")
                .replace(MARKER, "")
                .trim()
                .to_string()
        })
}

fn section_pattern(name: &str) -> Option<Regex> {
    if let Some(re) = SECTION_PATTERNS.get(name) {
        return Some(re.clone());
    }
    let pattern = format!(r"(?s){}(.*?)\n{}", regex::escape(&marker(name)), MARKER);
    let re = Regex::new(&pattern).ok()?;
    SECTION_PATTERNS.insert(name.to_string(), re.clone());
    Some(re)
}

/// Render one section in the canonical layout.
pub fn render(name: &str, body: &str) -> String {
    format!("{}\n{}\n\n", marker(name), body.trim())
}

/// Keep the reply from the first occurrence of `list_marker` onward, dropping any
/// preamble. Replies without the marker are kept whole.
pub fn from_first<'a>(reply: &'a str, list_marker: &str) -> &'a str {
    match reply.find(list_marker) {
        Some(idx) => &reply[idx..],
        None => reply,
    }
}

/// Join speaker headers as "A, B and C".
pub fn join_names(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}
