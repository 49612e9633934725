//! Session token lifecycle.
//!
//! Tokens are 32 random bytes, base64url encoded. Only the SHA-256 of a token
//! is stored and used as the lookup key. Expiry is lazy: a record older than
//! the validity window reads as absent but stays until `purge_expired`.

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{debug, error};

use super::state::AuthConfig;
use super::types::{IssuedSession, SessionRecord};
use super::utils::{generate_session_token, hash_session_token, live_connection_id};
use crate::error::AuthError;
use crate::storage::{InsertOutcome, SessionStore};

const INSERT_ATTEMPTS: usize = 3;

pub struct SessionLedger {
    store: Arc<dyn SessionStore>,
    validity_days: i64,
}

impl SessionLedger {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, config: &AuthConfig) -> Self {
        Self {
            store,
            validity_days: config.session_validity_days(),
        }
    }

    fn validity(&self) -> Option<TimeDelta> {
        TimeDelta::try_days(self.validity_days)
    }

    /// Saturates at the latest representable instant.
    #[must_use]
    pub fn expires_at(&self, record: &SessionRecord) -> DateTime<Utc> {
        self.validity()
            .and_then(|validity| record.created_at.checked_add_signed(validity))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Create a session for `identity` and return the raw token once.
    ///
    /// # Errors
    /// `Storage` if the store fails or no unique token could be inserted.
    pub async fn create(&self, identity: &str) -> Result<IssuedSession, AuthError> {
        for _ in 0..INSERT_ATTEMPTS {
            let token = generate_session_token().map_err(AuthError::Storage)?;
            let record = SessionRecord {
                token_hash: hash_session_token(&token),
                identity: identity.to_string(),
                created_at: Utc::now(),
            };

            let outcome = self.store.insert_session(&record).await.map_err(|err| {
                error!("Failed to insert session: {err:#}");
                AuthError::Storage(err)
            })?;
            if outcome == InsertOutcome::Created {
                debug!(identity = %identity, "session created");
                return Ok(IssuedSession {
                    token: SecretString::from(token),
                    record,
                });
            }
        }

        Err(AuthError::Storage(anyhow::anyhow!(
            "failed to generate unique session token"
        )))
    }

    /// Resolve a raw token. Expired records read as `None`.
    ///
    /// # Errors
    /// `Storage` if the store fails.
    pub async fn find_by_token(&self, token: &str) -> Result<Option<SessionRecord>, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(None);
        }
        let record = self
            .store
            .find_session(&hash_session_token(token))
            .await
            .map_err(|err| {
                error!("Failed to lookup session: {err:#}");
                AuthError::Storage(err)
            })?;

        let now = Utc::now();
        Ok(record.filter(|record| {
            self.validity()
                .map_or(true, |validity| now.signed_duration_since(record.created_at) <= validity)
        }))
    }

    /// Idempotent: succeeds when the token is unknown.
    ///
    /// # Errors
    /// `Storage` if the store fails.
    pub async fn delete_by_token(&self, token: &str) -> Result<(), AuthError> {
        self.store
            .delete_session(&hash_session_token(token.trim()))
            .await
            .map_err(|err| {
                error!("Failed to delete session: {err:#}");
                AuthError::Storage(err)
            })
    }

    /// Remove every session of `identity`, returning how many were removed.
    ///
    /// # Errors
    /// `Storage` if the store fails.
    pub async fn delete_all_by_identity(&self, identity: &str) -> Result<u64, AuthError> {
        let revoked = self.revoke_all_by_identity(identity).await?;
        Ok(u64::try_from(revoked.len()).unwrap_or(u64::MAX))
    }

    /// Like `delete_all_by_identity`, returning the live-connection ids of
    /// the removed sessions.
    ///
    /// # Errors
    /// `Storage` if the store fails.
    pub async fn revoke_all_by_identity(&self, identity: &str) -> Result<Vec<String>, AuthError> {
        let hashes = self
            .store
            .delete_sessions_for(identity)
            .await
            .map_err(|err| {
                error!("Failed to delete sessions: {err:#}");
                AuthError::Storage(err)
            })?;
        debug!(identity = %identity, count = hashes.len(), "sessions revoked");
        Ok(hashes.iter().map(|hash| live_connection_id(hash)).collect())
    }

    /// Delete records past the validity window.
    ///
    /// # Errors
    /// `Storage` if the store fails.
    pub async fn purge_expired(&self) -> Result<u64, AuthError> {
        let Some(cutoff) = self
            .validity()
            .and_then(|validity| Utc::now().checked_sub_signed(validity))
        else {
            return Ok(0);
        };
        self.store
            .purge_sessions(cutoff)
            .await
            .map_err(AuthError::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use anyhow::Result;
    use secrecy::ExposeSecret;

    fn ledger() -> (SessionLedger, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (SessionLedger::new(store.clone(), &AuthConfig::new()), store)
    }

    #[tokio::test]
    async fn create_then_find() -> Result<()> {
        let (ledger, _store) = ledger();
        let issued = ledger.create("a@example.com").await?;

        let found = ledger.find_by_token(issued.token.expose_secret()).await?;
        assert_eq!(found, Some(issued.record.clone()));
        assert_ne!(
            issued.record.token_hash,
            issued.token.expose_secret().as_bytes()
        );
        Ok(())
    }

    #[tokio::test]
    async fn unknown_or_empty_token_is_absent() -> Result<()> {
        let (ledger, _store) = ledger();
        assert!(ledger.find_by_token("nope").await?.is_none());
        assert!(ledger.find_by_token("  ").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn expired_session_is_absent_but_kept() -> Result<()> {
        let (ledger, store) = ledger();
        let issued = ledger.create("a@example.com").await?;
        store
            .backdate_sessions("a@example.com", TimeDelta::days(61))
            .await;

        assert!(ledger
            .find_by_token(issued.token.expose_secret())
            .await?
            .is_none());
        assert_eq!(store.session_count().await, 1);

        assert_eq!(ledger.purge_expired().await?, 1);
        assert_eq!(store.session_count().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn delete_by_token_is_idempotent() -> Result<()> {
        let (ledger, _store) = ledger();
        let issued = ledger.create("a@example.com").await?;
        let token = issued.token.expose_secret();

        ledger.delete_by_token(token).await?;
        ledger.delete_by_token(token).await?;
        ledger.delete_by_token("never-issued").await?;
        assert!(ledger.find_by_token(token).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn delete_all_by_identity_leaves_others() -> Result<()> {
        let (ledger, _store) = ledger();
        let a1 = ledger.create("a").await?;
        let a2 = ledger.create("a").await?;
        let b = ledger.create("b").await?;

        assert_eq!(ledger.delete_all_by_identity("a").await?, 2);
        assert!(ledger.find_by_token(a1.token.expose_secret()).await?.is_none());
        assert!(ledger.find_by_token(a2.token.expose_secret()).await?.is_none());
        assert_eq!(
            ledger
                .find_by_token(b.token.expose_secret())
                .await?
                .map(|record| record.identity),
            Some("b".to_string())
        );
        assert_eq!(ledger.delete_all_by_identity("a").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn revoke_returns_live_connection_ids() -> Result<()> {
        let (ledger, _store) = ledger();
        let issued = ledger.create("a").await?;

        let ids = ledger.revoke_all_by_identity("a").await?;
        assert_eq!(ids, vec![live_connection_id(&issued.record.token_hash)]);
        Ok(())
    }

    #[tokio::test]
    async fn unrepresentable_validity_never_expires() -> Result<()> {
        // Deserialized configs skip the builder clamp.
        let mut json = serde_json::to_value(AuthConfig::new())?;
        json["session_validity_days"] = serde_json::json!(200_000_000);
        let config: AuthConfig = serde_json::from_value(json)?;
        let store = Arc::new(MemoryStore::new());
        let ledger = SessionLedger::new(store.clone(), &config);

        let issued = ledger.create("a@example.com").await?;
        assert_eq!(ledger.expires_at(&issued.record), DateTime::<Utc>::MAX_UTC);
        assert!(ledger
            .find_by_token(issued.token.expose_secret())
            .await?
            .is_some());
        assert_eq!(ledger.purge_expired().await?, 0);
        assert_eq!(store.session_count().await, 1);
        Ok(())
    }
}
