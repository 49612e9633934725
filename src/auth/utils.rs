//! Small helpers for identity validation, code/token generation and hashing.

use anyhow::{Context, Result, anyhow};
use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::SaltString,
};
use base64::Engine;
use rand::{Rng, RngCore, rngs::OsRng};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

const LIVE_CONNECTION_DOMAIN: &[u8] = b"otpgate.live-connection.v1:";

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok())
        .as_ref()
        .is_some_and(|regex| regex.is_match(email_normalized))
}

/// Random zero-padded numeric code of `digits` characters.
pub(crate) fn generate_otp_code(digits: usize) -> String {
    let mut rng = OsRng;
    (0..digits)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Create a new session token for the caller's session store.
/// The raw value is only handed back to the caller; the store keeps a hash.
pub(crate) fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a session token so raw values never touch the store.
pub(crate) fn hash_session_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Identifier for real-time connections bound to a session.
///
/// Derived one-way from the token hash, so it changes with the token and
/// cannot be turned back into a credential.
pub(crate) fn live_connection_id(token_hash: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(LIVE_CONNECTION_DOMAIN);
    hasher.update(token_hash);
    let digest = hasher.finalize();
    format!(
        "live_{}",
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
    )
}

/// Argon2id hashing for one-time codes.
///
/// Holds a placeholder hash computed with the same parameters, so a lookup
/// with no stored record can spend the same work as a real comparison.
#[derive(Clone)]
pub(crate) struct OtpHasher {
    argon2: Argon2<'static>,
    placeholder: String,
}

impl OtpHasher {
    pub(crate) fn new(memory_kib: u32, iterations: u32) -> Result<Self> {
        let params = Params::new(memory_kib, iterations, 1, None)
            .map_err(|err| anyhow!("invalid Argon2 parameters: {err}"))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let placeholder = hash_with(&argon2, "000000")?;
        Ok(Self {
            argon2,
            placeholder,
        })
    }

    pub(crate) fn hash(&self, code: &str) -> Result<String> {
        hash_with(&self.argon2, code)
    }

    pub(crate) fn verify(&self, code: &str, hashed: &str) -> bool {
        PasswordHash::new(hashed).is_ok_and(|parsed| {
            self.argon2
                .verify_password(code.as_bytes(), &parsed)
                .is_ok()
        })
    }

    /// Compare against the placeholder and discard the result.
    pub(crate) fn verify_placeholder(&self, code: &str) {
        let _ = self.verify(code, &self.placeholder);
    }
}

fn hash_with(argon2: &Argon2<'_>, code: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(argon2
        .hash_password(code.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash code: {err}"))?
        .to_string())
}
