//! Small helpers shared by the config, auth and remote mirror clients.

/// Longest remote error body kept in an error message.
const MAX_ERROR_TEXT_CHARS: usize = 180;

/// Trimmed value, or `None` when missing or blank.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|trimmed| !trimmed.is_empty())
        .map(ToOwned::to_owned)
}

pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// One-line excerpt of a response body for error messages.
pub fn compact_text(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_ERROR_TEXT_CHARS)
        .collect()
}

/// Current Unix timestamp in seconds, the unit auth sessions expire in.
pub fn unix_timestamp_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_normalize_to_none() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some(" \t ".to_string())), None);
        assert_eq!(
            normalize_text_option(Some(" https://api.example.com ".to_string())),
            Some("https://api.example.com".to_string())
        );
    }

    #[test]
    fn only_http_schemes_are_urls() {
        assert!(is_http_url("http://localhost:8080"));
        assert!(is_http_url("https://api.example.com"));
        assert!(!is_http_url("libsql://db.example.com"));
        assert!(!is_http_url("api.example.com"));
    }

    #[test]
    fn compact_text_flattens_and_truncates() {
        assert_eq!(compact_text("  bad\n  gateway  "), "bad gateway");
        assert_eq!(compact_text(&"x".repeat(500)).len(), MAX_ERROR_TEXT_CHARS);
    }
}
