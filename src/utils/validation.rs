//! Input validation utilities

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::anonymous_name;

/// Control characters and runs of whitespace
static CONTROL_CHARS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\p{Cc}\p{Cf}]+").expect("control character pattern is valid")
});

static WHITESPACE_RUNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Turn the `username` query value into the name shown to other users.
///
/// Control characters are removed, whitespace is collapsed and the result is
/// cut to `max_len` characters. An empty result falls back to the anonymous
/// name derived from the connection id.
pub fn resolve_user_name(requested: Option<&str>, connection_id: &str, max_len: usize) -> String {
    let cleaned = requested
        .map(|name| {
            let stripped = CONTROL_CHARS.replace_all(name, " ");
            WHITESPACE_RUNS.replace_all(stripped.trim(), " ").into_owned()
        })
        .unwrap_or_default();

    if cleaned.is_empty() {
        return anonymous_name(connection_id);
    }

    cleaned.chars().take(max_len).collect::<String>().trim_end().to_string()
}

/// Validate the content of an announcement
pub fn validate_announcement(content: &str, max_len: usize) -> bool {
    !content.trim().is_empty() && content.len() <= max_len
}
