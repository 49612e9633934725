//! Login state machine over the OTP and session ledgers.
//!
//! Flow Overview:
//! 1) `request_code`: issuance bucket → `OtpLedger::issue` → `deliver_code`.
//!    A failed delivery discards the code and surfaces `Delivery`.
//! 2) `submit_code`: login-attempt bucket → `OtpLedger::verify` →
//!    `decide_login` → `SessionLedger::create`. The carrier is fully reset
//!    before the new token is written (session fixation).
//! 3) `current_session` / `logout` / `revoke_identity` re-read the store on
//!    every call; nothing is cached here.

use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::carrier::SessionCarrier;
use super::hooks::{AccessDecision, AuthHooks, LiveConnections, MessageContext};
use super::otp::OtpLedger;
use super::rate_limit::{RateLimiter, limiter_for};
use super::session::SessionLedger;
use super::state::AuthConfig;
use super::types::{CodeRequested, CurrentSession, LoginOutcome, PruneReport, SessionRecord};
use super::utils::{hash_session_token, live_connection_id, normalize_email};
use crate::error::AuthError;
use crate::storage::{OtpStore, SessionStore};

pub struct AuthOrchestrator {
    config: AuthConfig,
    otp: OtpLedger,
    sessions: SessionLedger,
    issuance_limiter: Arc<dyn RateLimiter>,
    login_limiter: Arc<dyn RateLimiter>,
    hooks: Arc<dyn AuthHooks>,
    live_connections: Option<Arc<dyn LiveConnections>>,
}

impl AuthOrchestrator {
    /// # Errors
    /// Returns an error if the configured Argon2 cost is invalid.
    pub fn new(
        config: AuthConfig,
        otp_store: Arc<dyn OtpStore>,
        session_store: Arc<dyn SessionStore>,
        hooks: Arc<dyn AuthHooks>,
    ) -> anyhow::Result<Self> {
        let otp = OtpLedger::new(otp_store, &config)?;
        let sessions = SessionLedger::new(session_store, &config);
        let issuance_limiter =
            limiter_for(config.rate_limiting_enabled(), config.otp_issuance_rate());
        let login_limiter =
            limiter_for(config.rate_limiting_enabled(), config.login_attempt_rate());
        Ok(Self {
            config,
            otp,
            sessions,
            issuance_limiter,
            login_limiter,
            hooks,
            live_connections: None,
        })
    }

    /// Share limiters across orchestrators, or substitute custom ones.
    #[must_use]
    pub fn with_rate_limiters(
        mut self,
        issuance: Arc<dyn RateLimiter>,
        login: Arc<dyn RateLimiter>,
    ) -> Self {
        self.issuance_limiter = issuance;
        self.login_limiter = login;
        self
    }

    #[must_use]
    pub fn with_live_connections(mut self, live_connections: Arc<dyn LiveConnections>) -> Self {
        self.live_connections = Some(live_connections);
        self
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn otp(&self) -> &OtpLedger {
        &self.otp
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionLedger {
        &self.sessions
    }

    /// Issue a code for `identity` and hand it to the delivery hook.
    ///
    /// # Errors
    /// `RateLimited` (nothing issued or delivered), `ValidationFailed`,
    /// `Delivery` (the issued code is discarded), or `Storage`.
    pub async fn request_code(&self, identity: &str) -> Result<CodeRequested, AuthError> {
        let identity = normalize_email(identity);

        if let Err(limited) = self.issuance_limiter.take(&identity) {
            warn!(identity = %identity, "otp issuance rate limited");
            return Err(limited.into());
        }

        let issued = self.otp.issue(&identity).await?;

        if let Err(err) = self
            .hooks
            .deliver_code(&issued.record.identity, &issued.code)
            .await
        {
            error!(identity = %issued.record.identity, "Failed to deliver otp: {err:#}");
            if let Err(discard_err) = self.otp.discard(&issued.record).await {
                error!(
                    otp_id = %issued.record.id,
                    "Failed to discard undelivered otp: {discard_err:#}"
                );
            }
            return Err(AuthError::Delivery(err));
        }

        Ok(CodeRequested {
            expires_at: self.otp.expires_at(issued.record.created_at),
            identity: issued.record.identity,
        })
    }

    /// Exchange a code for a session written into `carrier`.
    ///
    /// On success the carrier has been reset (remember-me slot included), then
    /// given the new token and its live-connection id; the token is mirrored
    /// into the remember-me slot when enabled.
    ///
    /// # Errors
    /// `RateLimited`, `InvalidCode`, `Expired`, `AccessDenied`, or `Storage`.
    pub async fn submit_code(
        &self,
        carrier: &mut dyn SessionCarrier,
        identity: &str,
        code: &SecretString,
    ) -> Result<LoginOutcome, AuthError> {
        let identity = normalize_email(identity);

        if let Err(limited) = self.login_limiter.take(&identity) {
            warn!(identity = %identity, "login attempt rate limited");
            return Err(limited.into());
        }

        let record = self.otp.verify(&identity, code).await?;

        if self.hooks.decide_login(&record.identity).await == AccessDecision::Deny {
            warn!(identity = %record.identity, "login denied by access policy");
            return Err(AuthError::AccessDenied);
        }

        let issued = self.sessions.create(&record.identity).await?;
        let token = issued.token.expose_secret();
        let live_id = live_connection_id(&issued.record.token_hash);

        carrier.reset();
        carrier.clear_remember_token();
        carrier.put_session_token(token, &live_id);
        let remembered = self.config.remember_me_enabled();
        if remembered {
            carrier.put_remember_token(token, self.config.session_validity());
        }
        debug!(identity = %record.identity, remembered, "login completed");

        Ok(LoginOutcome {
            identity: issued.record.identity,
            live_connection_id: live_id,
            remembered,
            created_at: issued.record.created_at,
        })
    }

    /// Resolve the caller's session, if any.
    ///
    /// Falls back to the remember-me token when the primary session is empty,
    /// restoring it into the primary slot. A stale remember-me token is cleared.
    ///
    /// # Errors
    /// `Storage` if the store fails.
    pub async fn current_session(
        &self,
        carrier: &mut dyn SessionCarrier,
    ) -> Result<Option<CurrentSession>, AuthError> {
        if let Some(token) = carrier.session_token() {
            let record = self.sessions.find_by_token(&token).await?;
            return Ok(record.map(|record| self.describe(&record)));
        }

        let Some(token) = carrier.remember_token() else {
            return Ok(None);
        };
        match self.sessions.find_by_token(&token).await? {
            Some(record) => {
                let session = self.describe(&record);
                carrier.put_session_token(&token, &session.live_connection_id);
                debug!(identity = %record.identity, "session restored from remember token");
                Ok(Some(session))
            }
            None => {
                carrier.clear_remember_token();
                Ok(None)
            }
        }
    }

    /// Like `current_session`, but absence is an error.
    ///
    /// # Errors
    /// `Unauthorized` without a live session, or `Storage`.
    pub async fn require_session(
        &self,
        carrier: &mut dyn SessionCarrier,
    ) -> Result<CurrentSession, AuthError> {
        self.current_session(carrier)
            .await?
            .ok_or(AuthError::Unauthorized)
    }

    /// End the caller's session and reset the carrier, even if no session was found.
    ///
    /// # Errors
    /// `Storage` if the store fails; the carrier is reset either way.
    pub async fn logout(&self, carrier: &mut dyn SessionCarrier) -> Result<(), AuthError> {
        let token = carrier.session_token().or_else(|| carrier.remember_token());
        carrier.reset();
        carrier.clear_remember_token();

        let Some(token) = token else {
            return Ok(());
        };
        self.sessions.delete_by_token(&token).await?;

        let live_id = live_connection_id(&hash_session_token(token.trim()));
        if let Some(live_connections) = &self.live_connections {
            live_connections.disconnect(&live_id).await;
        }
        debug!("session logged out");
        Ok(())
    }

    /// Revoke every session of `identity` and disconnect their live connections.
    ///
    /// # Errors
    /// `Storage` if the store fails.
    pub async fn revoke_identity(&self, identity: &str) -> Result<u64, AuthError> {
        let identity = normalize_email(identity);
        let live_ids = self.sessions.revoke_all_by_identity(&identity).await?;
        if let Some(live_connections) = &self.live_connections {
            for live_id in &live_ids {
                live_connections.disconnect(live_id).await;
            }
        }
        Ok(u64::try_from(live_ids.len()).unwrap_or(u64::MAX))
    }

    /// Delete expired codes and sessions.
    ///
    /// # Errors
    /// `Storage` if the store fails.
    pub async fn prune(&self) -> Result<PruneReport, AuthError> {
        let otps = self.otp.purge_expired().await?;
        let sessions = self.sessions.purge_expired().await?;
        debug!(otps, sessions, "pruned expired records");
        Ok(PruneReport { otps, sessions })
    }

    /// Translated message for user-facing errors, `None` for the rest.
    #[must_use]
    pub fn user_message(&self, err: &AuthError, identity: Option<&str>) -> Option<String> {
        let kind = err.message_kind()?;
        let context = MessageContext {
            identity: identity.map(normalize_email),
            countdown: err.countdown(),
        };
        Some(self.hooks.translate(kind, &context))
    }

    fn describe(&self, record: &SessionRecord) -> CurrentSession {
        CurrentSession {
            identity: record.identity.clone(),
            live_connection_id: live_connection_id(&record.token_hash),
            created_at: record.created_at,
            expires_at: self.sessions.expires_at(record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::carrier::MemoryCarrier;
    use crate::auth::hooks::{MessageKind, default_message};
    use crate::auth::types::OtpRecord;
    use crate::storage::{MemoryStore, OtpCheck, OtpStore};
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Default)]
    struct Recorder {
        codes: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl AuthHooks for Recorder {
        async fn deliver_code(&self, identity: &str, code: &SecretString) -> anyhow::Result<()> {
            if let Ok(mut codes) = self.codes.lock() {
                codes.push((identity.to_string(), code.expose_secret().to_string()));
            }
            Ok(())
        }

        async fn decide_login(&self, _identity: &str) -> AccessDecision {
            AccessDecision::Allow
        }

        fn translate(&self, kind: MessageKind, context: &MessageContext) -> String {
            default_message(kind, context)
        }
    }

    impl Recorder {
        fn last_code(&self) -> Option<SecretString> {
            self.codes
                .lock()
                .ok()
                .and_then(|codes| codes.last().map(|(_, code)| SecretString::from(code.clone())))
        }
    }

    struct Undeliverable;

    #[async_trait]
    impl AuthHooks for Undeliverable {
        async fn deliver_code(&self, _identity: &str, _code: &SecretString) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("smtp unavailable"))
        }

        async fn decide_login(&self, _identity: &str) -> AccessDecision {
            AccessDecision::Allow
        }

        fn translate(&self, kind: MessageKind, context: &MessageContext) -> String {
            default_message(kind, context)
        }
    }

    /// Delegates to `MemoryStore` but cannot discard.
    struct StuckOtps(MemoryStore);

    #[async_trait]
    impl OtpStore for StuckOtps {
        async fn replace_otp(&self, record: &OtpRecord) -> anyhow::Result<()> {
            self.0.replace_otp(record).await
        }

        async fn consume_otp(
            &self,
            identity: &str,
            check: OtpCheck<'_>,
        ) -> anyhow::Result<Result<OtpRecord, AuthError>> {
            self.0.consume_otp(identity, check).await
        }

        async fn discard_otp(&self, _id: Uuid) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("connection reset"))
        }

        async fn find_otp(&self, identity: &str) -> anyhow::Result<Option<OtpRecord>> {
            self.0.find_otp(identity).await
        }

        async fn purge_otps(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
            self.0.purge_otps(cutoff).await
        }
    }

    fn orchestrator(config: AuthConfig) -> Result<(AuthOrchestrator, Arc<Recorder>)> {
        let store = Arc::new(MemoryStore::new());
        let hooks = Arc::new(Recorder::default());
        let orchestrator = AuthOrchestrator::new(
            config.with_otp_hash_cost(64, 1),
            store.clone(),
            store,
            hooks.clone(),
        )?;
        Ok((orchestrator, hooks))
    }

    #[tokio::test]
    async fn second_request_within_window_is_rate_limited() -> Result<()> {
        let (orchestrator, hooks) = orchestrator(AuthConfig::new())?;
        orchestrator.request_code("u@x.com").await?;

        let err = orchestrator.request_code("U@x.com").await.err();
        let countdown = err.as_ref().and_then(AuthError::countdown);
        assert!(countdown.is_some_and(|countdown| countdown <= Duration::from_secs(60)));
        assert_eq!(hooks.codes.lock().map(|codes| codes.len()).ok(), Some(1));

        let message = err.and_then(|err| orchestrator.user_message(&err, Some("u@x.com")));
        assert!(message.is_some_and(|message| message.starts_with("Too many attempts")));
        Ok(())
    }

    #[tokio::test]
    async fn failed_discard_still_reports_delivery_error() -> Result<()> {
        let orchestrator = AuthOrchestrator::new(
            AuthConfig::new().with_otp_hash_cost(64, 1),
            Arc::new(StuckOtps(MemoryStore::new())),
            Arc::new(MemoryStore::new()),
            Arc::new(Undeliverable),
        )?;

        let err = orchestrator.request_code("u@x.com").await.err();
        assert!(matches!(err, Some(AuthError::Delivery(_))));
        Ok(())
    }

    #[tokio::test]
    async fn oversized_windows_do_not_panic() -> Result<()> {
        let (orchestrator, _hooks) = orchestrator(
            AuthConfig::new()
                .with_otp_expiration_minutes(i64::MAX)
                .with_session_validity_days(200_000_000),
        )?;

        let requested = orchestrator.request_code("u@x.com").await?;
        assert!(requested.expires_at > Utc::now());
        let report = orchestrator.prune().await?;
        assert_eq!((report.otps, report.sessions), (0, 0));
        Ok(())
    }

    #[tokio::test]
    async fn disabled_rate_limiting_never_limits() -> Result<()> {
        let (orchestrator, _hooks) = orchestrator(AuthConfig::new().with_rate_limiting(false))?;
        for _ in 0..3 {
            orchestrator.request_code("u@x.com").await?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn submit_resets_carrier_and_mirrors_token() -> Result<()> {
        let (orchestrator, hooks) = orchestrator(AuthConfig::new())?;
        orchestrator.request_code("u@x.com").await?;
        let code = hooks.last_code().ok_or_else(|| anyhow::anyhow!("no code"))?;

        let mut carrier = MemoryCarrier::with_session_token("attacker-fixed-token");
        let outcome = orchestrator.submit_code(&mut carrier, "u@x.com", &code).await?;

        assert_eq!(carrier.resets(), 1);
        assert!(outcome.remembered);
        let token = carrier.session_token();
        assert!(token.as_deref().is_some_and(|token| token != "attacker-fixed-token"));
        assert_eq!(carrier.remember_token(), token);
        assert_eq!(carrier.remember_max_age(), Some(Duration::from_secs(60 * 86_400)));
        assert_eq!(
            carrier.live_connection_id(),
            Some(outcome.live_connection_id.as_str())
        );
        Ok(())
    }

    #[tokio::test]
    async fn remember_me_disabled_leaves_remember_slot_empty() -> Result<()> {
        let (orchestrator, hooks) = orchestrator(AuthConfig::new().with_remember_me(false))?;
        orchestrator.request_code("u@x.com").await?;
        let code = hooks.last_code().ok_or_else(|| anyhow::anyhow!("no code"))?;

        let mut carrier = MemoryCarrier::new();
        let outcome = orchestrator.submit_code(&mut carrier, "u@x.com", &code).await?;
        assert!(!outcome.remembered);
        assert!(carrier.session_token().is_some());
        assert_eq!(carrier.remember_token(), None);
        Ok(())
    }

    #[tokio::test]
    async fn login_drops_remember_token_of_previous_identity() -> Result<()> {
        let (orchestrator, hooks) = orchestrator(AuthConfig::new().with_remember_me(false))?;
        let planted = orchestrator.sessions().create("other@x.com").await?;
        orchestrator.request_code("u@x.com").await?;
        let code = hooks.last_code().ok_or_else(|| anyhow::anyhow!("no code"))?;

        let mut carrier =
            MemoryCarrier::with_remember_token(planted.token.expose_secret(), Duration::from_secs(60));
        orchestrator.submit_code(&mut carrier, "u@x.com", &code).await?;
        assert_eq!(carrier.remember_token(), None);

        // Primary session ends; nothing may fall back to the other identity.
        carrier.reset();
        assert!(orchestrator.current_session(&mut carrier).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn require_session_without_token_is_unauthorized() -> Result<()> {
        let (orchestrator, _hooks) = orchestrator(AuthConfig::new())?;
        let mut carrier = MemoryCarrier::new();
        let err = orchestrator.require_session(&mut carrier).await.err();

        assert!(matches!(err, Some(AuthError::Unauthorized)));
        let message = err.and_then(|err| orchestrator.user_message(&err, None));
        assert_eq!(message.as_deref(), Some("You must sign in to continue."));
        Ok(())
    }

    #[tokio::test]
    async fn stale_remember_token_is_cleared() -> Result<()> {
        let (orchestrator, _hooks) = orchestrator(AuthConfig::new())?;
        let mut carrier = MemoryCarrier::with_remember_token("gone", Duration::from_secs(60));

        assert!(orchestrator.current_session(&mut carrier).await?.is_none());
        assert_eq!(carrier.remember_token(), None);
        Ok(())
    }
}
