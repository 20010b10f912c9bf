//! Utility functions

/// Trim a string and return `None` if it is empty
#[must_use]
pub fn normalize_text_option(text: Option<String>) -> Option<String> {
    text.and_then(|value| {
        let trimmed = value.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}

/// Check whether a string looks like an http(s) URL
#[must_use]
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Collapse whitespace and truncate text for log and error messages
#[must_use]
pub fn compact_text(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.len() <= 180 {
        collapsed
    } else {
        let mut cut = 180;
        while !collapsed.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &collapsed[..cut])
    }
}

/// Current Unix timestamp in milliseconds
#[must_use]
pub fn unix_timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
