//! API handlers and shared request validation helpers.

pub mod auth;
pub mod health;
pub mod users;
pub mod verify;

use axum::http::{HeaderMap, header};
use regex::Regex;

/// Lightweight email sanity check applied before any account write.
pub(crate) fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

/// Idempotent endpoints treat a request payload as malformed.
pub(crate) fn has_body(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .is_some_and(|length| length > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn valid_email_accepts_simple() {
        assert!(valid_email("user@example.com"));
    }

    #[test]
    fn valid_email_rejects_missing_at() {
        assert!(!valid_email("user.example.com"));
    }

    #[test]
    fn valid_email_rejects_spaces() {
        assert!(!valid_email("user name@example.com"));
    }

    #[test]
    fn valid_email_rejects_missing_tld() {
        assert!(!valid_email("user@example"));
    }

    #[test]
    fn has_body_detects_content_length() {
        let mut headers = HeaderMap::new();
        assert!(!has_body(&headers));

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
        assert!(!has_body(&headers));

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        assert!(has_body(&headers));
    }
}
