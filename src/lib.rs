//! # Otpgate (Passwordless Email Authentication)
//!
//! `otpgate` proves control of an email address with a short numeric
//! one-time code delivered out of band, and exchanges a valid code for a
//! long-lived session token.
//!
//! ## Flow
//!
//! 1. `request_code`: the issuance bucket is consulted, any previous code for
//!    the identity is deleted, and a new Argon2id-hashed code is stored. The
//!    plaintext code is handed to the delivery hook and never persisted.
//! 2. `submit_code`: the login-attempt bucket is consulted, the code is checked
//!    and consumed under a per-identity lock, the access policy hook decides,
//!    and on `Allow` a session token is written into the caller's session
//!    carrier after a full reset of its previous state.
//! 3. Every authenticated request re-reads the session from the store, so
//!    logout and account-wide revocation take effect immediately.
//!
//! ## Timing
//!
//! Verifying a code for an identity without a live record still runs one
//! Argon2 comparison against a placeholder hash, so "no such identity" and
//! "wrong code" are indistinguishable by latency.
//!
//! ## Storage
//!
//! The core depends only on the [`storage::OtpStore`] and
//! [`storage::SessionStore`] traits. [`storage::PgStore`] implements both on
//! PostgreSQL; [`storage::MemoryStore`] keeps everything in process.

pub mod auth;
pub mod cli;
pub mod error;
pub mod storage;

pub use error::AuthError;

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
