//! In-process store. One mutex per table; each operation holds it for its
//! whole read-check-write sequence, which gives the same per-identity
//! exclusion the database gets from row locks.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{InsertOutcome, OtpCheck, OtpStore, SessionStore};
use crate::auth::types::{OtpRecord, SessionRecord};
use crate::error::AuthError;

#[derive(Debug, Default)]
pub struct MemoryStore {
    otps: Mutex<HashMap<String, OtpRecord>>,
    sessions: Mutex<HashMap<Vec<u8>, SessionRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shift a stored code's creation time into the past. Used by fixtures.
    pub async fn backdate_otp(&self, identity: &str, by: TimeDelta) -> bool {
        let mut otps = self.otps.lock().await;
        otps.get_mut(identity).is_some_and(|record| {
            record.created_at -= by;
            true
        })
    }

    /// Shift every session of `identity` into the past. Used by fixtures.
    pub async fn backdate_sessions(&self, identity: &str, by: TimeDelta) -> usize {
        let mut sessions = self.sessions.lock().await;
        let mut shifted = 0;
        for record in sessions.values_mut().filter(|record| record.identity == identity) {
            record.created_at -= by;
            shifted += 1;
        }
        shifted
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[async_trait]
impl OtpStore for MemoryStore {
    async fn replace_otp(&self, record: &OtpRecord) -> Result<()> {
        self.otps
            .lock()
            .await
            .insert(record.identity.clone(), record.clone());
        Ok(())
    }

    async fn consume_otp(
        &self,
        identity: &str,
        check: OtpCheck<'_>,
    ) -> Result<Result<OtpRecord, AuthError>> {
        let mut otps = self.otps.lock().await;
        if let Err(err) = check(otps.get(identity)) {
            return Ok(Err(err));
        }
        Ok(otps.remove(identity).ok_or(AuthError::InvalidCode))
    }

    async fn discard_otp(&self, id: Uuid) -> Result<()> {
        self.otps.lock().await.retain(|_, record| record.id != id);
        Ok(())
    }

    async fn find_otp(&self, identity: &str) -> Result<Option<OtpRecord>> {
        Ok(self.otps.lock().await.get(identity).cloned())
    }

    async fn purge_otps(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut otps = self.otps.lock().await;
        let before = otps.len();
        otps.retain(|_, record| record.created_at > cutoff);
        Ok(u64::try_from(before - otps.len()).unwrap_or(u64::MAX))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, record: &SessionRecord) -> Result<InsertOutcome> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&record.token_hash) {
            return Ok(InsertOutcome::Conflict);
        }
        sessions.insert(record.token_hash.clone(), record.clone());
        Ok(InsertOutcome::Created)
    }

    async fn find_session(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.lock().await.get(token_hash).cloned())
    }

    async fn delete_session(&self, token_hash: &[u8]) -> Result<()> {
        self.sessions.lock().await.remove(token_hash);
        Ok(())
    }

    async fn delete_sessions_for(&self, identity: &str) -> Result<Vec<Vec<u8>>> {
        let mut sessions = self.sessions.lock().await;
        let hashes: Vec<Vec<u8>> = sessions
            .values()
            .filter(|record| record.identity == identity)
            .map(|record| record.token_hash.clone())
            .collect();
        for hash in &hashes {
            sessions.remove(hash);
        }
        Ok(hashes)
    }

    async fn purge_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, record| record.created_at >= cutoff);
        Ok(u64::try_from(before - sessions.len()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn otp(identity: &str) -> OtpRecord {
        OtpRecord {
            id: Uuid::new_v4(),
            identity: identity.to_string(),
            hashed_secret: "hash".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn replace_keeps_one_record_per_identity() -> Result<()> {
        let store = MemoryStore::new();
        let first = otp("a@example.com");
        let second = otp("a@example.com");
        store.replace_otp(&first).await?;
        store.replace_otp(&second).await?;

        assert_eq!(store.find_otp("a@example.com").await?, Some(second));
        Ok(())
    }

    #[tokio::test]
    async fn consume_keeps_record_when_check_fails() -> Result<()> {
        let store = MemoryStore::new();
        let record = otp("a@example.com");
        store.replace_otp(&record).await?;

        let rejected = store
            .consume_otp("a@example.com", &|_| Err(AuthError::InvalidCode))
            .await?;
        assert!(matches!(rejected, Err(AuthError::InvalidCode)));
        assert!(store.find_otp("a@example.com").await?.is_some());

        let accepted = store.consume_otp("a@example.com", &|_| Ok(())).await?;
        assert_eq!(accepted.ok(), Some(record));
        assert!(store.find_otp("a@example.com").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn discard_only_matches_id() -> Result<()> {
        let store = MemoryStore::new();
        let first = otp("a@example.com");
        let second = otp("a@example.com");
        store.replace_otp(&first).await?;
        store.replace_otp(&second).await?;

        store.discard_otp(first.id).await?;
        assert!(store.find_otp("a@example.com").await?.is_some());
        store.discard_otp(second.id).await?;
        assert!(store.find_otp("a@example.com").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn purge_removes_old_rows() -> Result<()> {
        let store = MemoryStore::new();
        store.replace_otp(&otp("old@example.com")).await?;
        store.replace_otp(&otp("new@example.com")).await?;
        assert!(store.backdate_otp("old@example.com", TimeDelta::hours(1)).await);

        let purged = store.purge_otps(Utc::now() - TimeDelta::minutes(30)).await?;
        assert_eq!(purged, 1);
        assert!(store.find_otp("new@example.com").await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn otp_purge_includes_cutoff() -> Result<()> {
        let store = MemoryStore::new();
        let record = otp("edge@example.com");
        store.replace_otp(&record).await?;

        assert_eq!(store.purge_otps(record.created_at).await?, 1);
        assert!(store.find_otp("edge@example.com").await?.is_none());
        Ok(())
    }
}
