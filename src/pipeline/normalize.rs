//! Normalisation: deterministic cleanup of service-reported entity fields.
//!
//! Document AI reports entity types as they were labelled in the processor
//! schema (`Invoice Date`, `invoice_date`, `Line Item`), and mention text
//! exactly as OCR read it, line breaks included. A report that groups by
//! type needs one canonical spelling per type, and a spreadsheet cell needs
//! single-line text.
//!
//! Each rule is a pure `&str → String` function and independently testable.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Canonical entity type: trimmed, lower-cased, whitespace runs → `_`.
///
/// `"Invoice  Date"` → `"invoice_date"`. Hierarchy separators (`/`) are
/// kept so nested types stay readable.
pub fn normalize_entity_type(raw: &str) -> String {
    let cleaned = remove_invisible_chars(raw);
    RE_WHITESPACE
        .replace_all(cleaned.trim(), "_")
        .to_lowercase()
}

/// Type of a nested property, qualified by its parent.
///
/// Some processors already report children as `parent/child`; those are
/// returned unchanged rather than double-prefixed.
pub fn nested_entity_type(parent: &str, child: &str) -> String {
    let child = normalize_entity_type(child);
    if child.starts_with(&format!("{parent}/")) {
        child
    } else {
        format!("{parent}/{child}")
    }
}

/// Single-line mention text: invisible characters removed, whitespace
/// runs (including OCR line breaks) collapsed to one space.
pub fn clean_mention(raw: &str) -> String {
    let cleaned = remove_invisible_chars(raw);
    RE_WHITESPACE.replace_all(cleaned.trim(), " ").into_owned()
}

/// Normalised value, or `None` when the service sent an empty one.
pub fn clean_normalized_value(raw: &str) -> Option<String> {
    let v = clean_mention(raw);
    if v.is_empty() {
        None
    } else {
        Some(v)
    }
}

const INVISIBLE: [char; 6] = [
    '\u{200B}', // zero-width space
    '\u{200C}', // zero-width non-joiner
    '\u{200D}', // zero-width joiner
    '\u{2060}', // word joiner
    '\u{FEFF}', // BOM
    '\u{00AD}', // soft hyphen
];

fn remove_invisible_chars(input: &str) -> String {
    input.chars().filter(|c| !INVISIBLE.contains(c)).collect()
}
