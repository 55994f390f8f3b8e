//! # Konto (user-account service)
//!
//! `konto` is a small account service: register an account, authenticate
//! with per-request Basic credentials, read and update the authenticated
//! profile, and confirm ownership of the registered email address through
//! a time-boxed verification token.
//!
//! ## Request pipeline
//!
//! Every request passes an ordered set of stages, each of which may
//! terminate it early:
//!
//! 1. A `Cache-Control: no-cache` directive is attached to every response.
//! 2. Known paths are checked against a fixed method allow-list (405 on a
//!    miss) and anonymous endpoints reject requests that carry an
//!    `Authorization` header (400).
//! 3. The protected route group resolves Basic credentials to a typed
//!    [`api::handlers::auth::Principal`] (401 on failure) which is then
//!    threaded to handlers through request extensions.
//! 4. The same group requires the account's email to be verified (403
//!    otherwise) before the handler runs.
//!
//! ## Verification
//!
//! Account creation issues a single verification token and enqueues a
//! notification row in a database-backed outbox; a background worker
//! publishes those rows to the configured topic with retry and backoff.
//! Tokens are accepted only within a configurable window from issuance
//! (120 seconds by default); expired tokens stay on record but are inert.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        // Should be a hex string (full SHA-1 is 40 chars, but could be short)
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }
}
