//! Identifier and label handling for embedding input.
//!
//! Prepares an ontology class for embedding:
//! 1. Derive the local name from the URI
//! 2. Fall back to the local name when the label is empty
//! 3. Join as `"{local_name}: {label}"`
//! 4. Truncate to max length with ellipsis

/// Maximum canonical text length (characters, not tokens)
const MAX_TEXT_LENGTH: usize = 512;

/// Ellipsis suffix when text is truncated
const TRUNCATION_SUFFIX: &str = "...";

/// Local name of a URI: the part after the last `#`, else after the last `/`.
pub fn local_name(identifier: &str) -> &str {
    if let Some(idx) = identifier.rfind('#') {
        &identifier[idx + 1..]
    } else if let Some(idx) = identifier.rfind('/') {
        &identifier[idx + 1..]
    } else {
        identifier
    }
}

/// Namespace prefix of a URI, including the trailing `#` or `/`.
pub fn namespace_prefix(identifier: &str) -> &str {
    if let Some(idx) = identifier.rfind('#') {
        &identifier[..=idx]
    } else if let Some(idx) = identifier.rfind('/') {
        &identifier[..=idx]
    } else {
        identifier
    }
}

/// Label to display and embed, falling back to the local name.
pub fn display_label(label: &str, short_name: &str) -> String {
    let label = label.trim();
    if label.is_empty() {
        short_name.to_string()
    } else {
        label.to_string()
    }
}

/// Text the catalog embedding is computed from.
pub fn canonical_text(short_name: &str, label: &str) -> String {
    let short_name = short_name.trim();
    let label = label.trim();

    let text = if label.is_empty() {
        short_name.to_string()
    } else {
        format!("{}: {}", short_name, label)
    };

    truncate_text(&text)
}

fn truncate_text(text: &str) -> String {
    if text.chars().count() <= MAX_TEXT_LENGTH {
        return text.to_string();
    }

    let max_chars = MAX_TEXT_LENGTH - TRUNCATION_SUFFIX.len();
    let truncated: String = text.chars().take(max_chars).collect();

    format!("{}{}", truncated, TRUNCATION_SUFFIX)
}
