//! One-time code lifecycle: issue, verify-and-consume, expiry.
//!
//! Flow Overview:
//! 1) `issue` validates the identity, replaces any live record with a fresh
//!    Argon2id hash, and returns the plaintext to the caller only.
//! 2) `verify` locks the identity's record, checks expiry before the hash so an
//!    expired correct code reports `Expired`, and deletes the record on success.
//! 3) A missing record still costs one hash comparison (against a placeholder).

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

use super::state::AuthConfig;
use super::types::{IssuedCode, OtpRecord};
use super::utils::{OtpHasher, generate_otp_code, normalize_email, valid_email};
use crate::error::AuthError;
use crate::storage::OtpStore;

pub struct OtpLedger {
    store: Arc<dyn OtpStore>,
    hasher: OtpHasher,
    code_length: usize,
    expiration_minutes: i64,
}

/// Whole minutes elapsed, compared against the configured expiration.
pub(crate) fn is_expired(created_at: DateTime<Utc>, now: DateTime<Utc>, minutes: i64) -> bool {
    now.signed_duration_since(created_at).num_minutes() >= minutes
}

impl OtpLedger {
    /// # Errors
    /// Returns an error if the configured Argon2 cost is invalid.
    pub fn new(store: Arc<dyn OtpStore>, config: &AuthConfig) -> anyhow::Result<Self> {
        let hasher = OtpHasher::new(config.otp_hash_memory_kib(), config.otp_hash_iterations())?;
        Ok(Self {
            store,
            hasher,
            code_length: config.otp_code_length(),
            expiration_minutes: config.otp_expiration_minutes(),
        })
    }

    fn expiration(&self) -> Option<TimeDelta> {
        TimeDelta::try_minutes(self.expiration_minutes)
    }

    /// Moment a record created at `created_at` stops being accepted.
    /// Saturates at the latest representable instant.
    #[must_use]
    pub fn expires_at(&self, created_at: DateTime<Utc>) -> DateTime<Utc> {
        self.expiration()
            .and_then(|expiration| created_at.checked_add_signed(expiration))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Issue a new code for `identity`, superseding any previous one.
    ///
    /// # Errors
    /// `ValidationFailed` for a malformed email (before any storage access),
    /// `Storage` if the store fails.
    pub async fn issue(&self, identity: &str) -> Result<IssuedCode, AuthError> {
        let identity = normalize_email(identity);
        if !valid_email(&identity) {
            return Err(AuthError::invalid_email("is not a valid email address"));
        }

        let code = generate_otp_code(self.code_length);
        let hashed_secret = self.hasher.hash(&code).map_err(AuthError::Storage)?;
        let record = OtpRecord {
            id: Uuid::now_v7(),
            identity,
            hashed_secret,
            created_at: Utc::now(),
        };

        self.store.replace_otp(&record).await.map_err(|err| {
            error!("Failed to store otp: {err:#}");
            AuthError::Storage(err)
        })?;
        debug!(identity = %record.identity, otp_id = %record.id, "otp issued");

        Ok(IssuedCode {
            code: SecretString::from(code),
            record,
        })
    }

    /// Check `candidate` for `identity` and consume the record on success.
    ///
    /// Precedence: missing record → `InvalidCode`; expired → `Expired`;
    /// hash mismatch → `InvalidCode`.
    ///
    /// # Errors
    /// `InvalidCode`, `Expired`, or `Storage`.
    pub async fn verify(
        &self,
        identity: &str,
        candidate: &SecretString,
    ) -> Result<OtpRecord, AuthError> {
        let identity = normalize_email(identity);
        let candidate = candidate.expose_secret().trim();
        let now = Utc::now();

        let check = |record: Option<&OtpRecord>| -> Result<(), AuthError> {
            let Some(record) = record else {
                self.hasher.verify_placeholder(candidate);
                return Err(AuthError::InvalidCode);
            };
            if is_expired(record.created_at, now, self.expiration_minutes) {
                return Err(AuthError::Expired);
            }
            if self.hasher.verify(candidate, &record.hashed_secret) {
                Ok(())
            } else {
                Err(AuthError::InvalidCode)
            }
        };

        let outcome = self
            .store
            .consume_otp(&identity, &check)
            .await
            .map_err(|err| {
                error!("Failed to verify otp: {err:#}");
                AuthError::Storage(err)
            })?;

        match &outcome {
            Ok(record) => debug!(identity = %identity, otp_id = %record.id, "otp consumed"),
            Err(err) => debug!(identity = %identity, "otp rejected: {err}"),
        }
        outcome
    }

    /// Drop a record whose delivery failed. A newer record for the same
    /// identity is left alone.
    ///
    /// # Errors
    /// `Storage` if the store fails.
    pub async fn discard(&self, record: &OtpRecord) -> Result<(), AuthError> {
        self.store
            .discard_otp(record.id)
            .await
            .map_err(AuthError::Storage)
    }

    /// Delete records that can no longer be verified.
    ///
    /// # Errors
    /// `Storage` if the store fails.
    pub async fn purge_expired(&self) -> Result<u64, AuthError> {
        // A window too wide to subtract means nothing has expired yet.
        let Some(cutoff) = self
            .expiration()
            .and_then(|expiration| Utc::now().checked_sub_signed(expiration))
        else {
            return Ok(0);
        };
        self.store
            .purge_otps(cutoff)
            .await
            .map_err(AuthError::Storage)
    }
}
