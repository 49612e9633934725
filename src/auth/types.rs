//! Records and outcomes exchanged between the ledgers, the stores and callers.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;
use uuid::Uuid;

/// One live code per identity. Never updated in place.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OtpRecord {
    pub id: Uuid,
    pub identity: String,
    /// Argon2id PHC string of the plaintext code.
    pub hashed_secret: String,
    pub created_at: DateTime<Utc>,
}

/// A stored session. The raw token never reaches the store, only its SHA-256.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRecord {
    pub token_hash: Vec<u8>,
    pub identity: String,
    pub created_at: DateTime<Utc>,
}

/// Result of `OtpLedger::issue`: the plaintext goes to the delivery hook only.
#[derive(Debug)]
pub struct IssuedCode {
    pub code: SecretString,
    pub record: OtpRecord,
}

/// Result of `SessionLedger::create`: the raw bearer token plus its record.
#[derive(Debug)]
pub struct IssuedSession {
    pub token: SecretString,
    pub record: SessionRecord,
}

/// Returned by `request_code`; deliberately carries no secret.
#[derive(Clone, Debug, Serialize)]
pub struct CodeRequested {
    pub identity: String,
    pub expires_at: DateTime<Utc>,
}

/// Returned by `submit_code` once the token has been written into the carrier.
#[derive(Clone, Debug, Serialize)]
pub struct LoginOutcome {
    pub identity: String,
    pub live_connection_id: String,
    pub remembered: bool,
    pub created_at: DateTime<Utc>,
}

/// A resolved, unexpired session for the current caller.
#[derive(Clone, Debug, Serialize)]
pub struct CurrentSession {
    pub identity: String,
    pub live_connection_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Rows removed by `prune`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub otps: u64,
    pub sessions: u64,
}
