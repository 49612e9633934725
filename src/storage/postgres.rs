//! PostgreSQL store.
//!
//! Per-identity OTP operations take `pg_advisory_xact_lock(hashtext(identity))`
//! first, so issue and verify for the same identity never interleave even when
//! no row exists yet to lock. Session operations are single statements.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::{Instrument, debug};
use uuid::Uuid;

use super::{InsertOutcome, OtpCheck, OtpStore, SessionStore};
use crate::auth::types::{OtpRecord, SessionRecord};
use crate::error::AuthError;

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a small pool to `dsn`.
    ///
    /// # Errors
    /// Returns an error if the database is unreachable or the DSN is invalid.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(dsn)
            .await
            .context("failed to connect to database")?;
        Ok(Self::new(pool))
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

async fn lock_identity(tx: &mut Transaction<'_, Postgres>, identity: &str) -> Result<()> {
    let query = "SELECT pg_advisory_xact_lock(hashtext($1))";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(identity)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to lock identity")?;
    Ok(())
}

fn otp_from_row(row: &sqlx::postgres::PgRow) -> OtpRecord {
    OtpRecord {
        id: row.get("id"),
        identity: row.get("identity"),
        hashed_secret: row.get("hashed_secret"),
        created_at: row.get("created_at"),
    }
}

fn session_from_row(row: &sqlx::postgres::PgRow) -> SessionRecord {
    SessionRecord {
        token_hash: row.get("token_hash"),
        identity: row.get("identity"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl OtpStore for PgStore {
    async fn replace_otp(&self, record: &OtpRecord) -> Result<()> {
        // Delete and insert commit together; readers see the old code or the new one.
        let mut tx = self.pool.begin().await.context("begin issue transaction")?;
        lock_identity(&mut tx, &record.identity).await?;

        let query = "DELETE FROM otp_records WHERE identity = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&record.identity)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to delete previous otp")?;

        let query = r"
            INSERT INTO otp_records (id, identity, hashed_secret, created_at)
            VALUES ($1, $2, $3, $4)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(record.id)
            .bind(&record.identity)
            .bind(&record.hashed_secret)
            .bind(record.created_at)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert otp")?;

        tx.commit().await.context("commit issue transaction")?;
        Ok(())
    }

    async fn consume_otp(
        &self,
        identity: &str,
        check: OtpCheck<'_>,
    ) -> Result<Result<OtpRecord, AuthError>> {
        let mut tx = self.pool.begin().await.context("begin verify transaction")?;
        lock_identity(&mut tx, identity).await?;

        let query = r"
            SELECT id, identity, hashed_secret, created_at
            FROM otp_records
            WHERE identity = $1
            FOR UPDATE
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(identity)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .context("failed to lookup otp")?;
        let record = row.as_ref().map(otp_from_row);

        if let Err(err) = check(record.as_ref()) {
            tx.rollback().await.context("rollback verify transaction")?;
            return Ok(Err(err));
        }
        let Some(record) = record else {
            tx.rollback().await.context("rollback verify transaction")?;
            return Ok(Err(AuthError::InvalidCode));
        };

        // Single use: the row goes away in the same transaction that accepted it.
        let query = "DELETE FROM otp_records WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(record.id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to consume otp")?;

        tx.commit().await.context("commit verify transaction")?;
        Ok(Ok(record))
    }

    async fn discard_otp(&self, id: Uuid) -> Result<()> {
        let query = "DELETE FROM otp_records WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to discard otp")?;
        Ok(())
    }

    async fn find_otp(&self, identity: &str) -> Result<Option<OtpRecord>> {
        let query = r"
            SELECT id, identity, hashed_secret, created_at
            FROM otp_records
            WHERE identity = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(identity)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup otp")?;
        Ok(row.as_ref().map(otp_from_row))
    }

    async fn purge_otps(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let query = "DELETE FROM otp_records WHERE created_at <= $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(cutoff)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to purge otps")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn insert_session(&self, record: &SessionRecord) -> Result<InsertOutcome> {
        let query = r"
            INSERT INTO session_records (token_hash, identity, created_at)
            VALUES ($1, $2, $3)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(&record.token_hash)
            .bind(&record.identity)
            .bind(record.created_at)
            .execute(&self.pool)
            .instrument(span)
            .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Created),
            Err(err) if is_unique_violation(&err) => {
                debug!("session token hash collision");
                Ok(InsertOutcome::Conflict)
            }
            Err(err) => Err(err).context("failed to insert session"),
        }
    }

    async fn find_session(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>> {
        let query = r"
            SELECT token_hash, identity, created_at
            FROM session_records
            WHERE token_hash = $1
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session")?;
        Ok(row.as_ref().map(session_from_row))
    }

    async fn delete_session(&self, token_hash: &[u8]) -> Result<()> {
        // Logout is idempotent; it's fine if no rows are deleted.
        let query = "DELETE FROM session_records WHERE token_hash = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete session")?;
        Ok(())
    }

    async fn delete_sessions_for(&self, identity: &str) -> Result<Vec<Vec<u8>>> {
        let query = "DELETE FROM session_records WHERE identity = $1 RETURNING token_hash";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(identity)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete sessions for identity")?;
        Ok(rows.iter().map(|row| row.get("token_hash")).collect())
    }

    async fn purge_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let query = "DELETE FROM session_records WHERE created_at < $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(cutoff)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to purge sessions")?;
        Ok(result.rows_affected())
    }
}
