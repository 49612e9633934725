//! Store operations required by the OTP and session ledgers.
//!
//! The ledgers never cache records; every call goes to the store, which is
//! the single source of truth. Implementations must provide:
//!
//! - `replace_otp`: delete any record for the identity and insert the new one
//!   as one atomic unit, so at most one code is live per identity.
//! - `consume_otp`: read the identity's record under an exclusive lock, run
//!   the caller's check, and delete the record in the same transaction when
//!   the check passes.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::types::{OtpRecord, SessionRecord};
use crate::error::AuthError;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Decides whether a locked OTP row may be consumed. Receives `None` when the
/// identity has no record.
pub type OtpCheck<'a> = &'a (dyn Fn(Option<&OtpRecord>) -> Result<(), AuthError> + Send + Sync);

/// Outcome when inserting a session; `Conflict` means the token hash exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    Conflict,
}

#[async_trait]
pub trait OtpStore: Send + Sync {
    async fn replace_otp(&self, record: &OtpRecord) -> Result<()>;

    /// Returns the deleted record when `check` passed, or the check's error.
    async fn consume_otp(
        &self,
        identity: &str,
        check: OtpCheck<'_>,
    ) -> Result<Result<OtpRecord, AuthError>>;

    /// Remove one specific record, leaving any newer record alone.
    async fn discard_otp(&self, id: Uuid) -> Result<()>;

    async fn find_otp(&self, identity: &str) -> Result<Option<OtpRecord>>;

    /// Delete records created at or before `cutoff`.
    async fn purge_otps(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, record: &SessionRecord) -> Result<InsertOutcome>;

    async fn find_session(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>>;

    /// Idempotent; succeeds when nothing matches.
    async fn delete_session(&self, token_hash: &[u8]) -> Result<()>;

    /// Returns the token hashes of the deleted sessions.
    async fn delete_sessions_for(&self, identity: &str) -> Result<Vec<Vec<u8>>>;

    /// Delete records created strictly before `cutoff`.
    async fn purge_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}
