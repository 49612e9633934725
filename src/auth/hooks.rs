//! Collaborators invoked by the orchestrator but implemented by the embedding
//! application: code delivery, access policy, message translation, and
//! real-time connection teardown.

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Serialize;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AccessDecision {
    Allow,
    Deny,
}

/// User-facing error categories handed to [`AuthHooks::translate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum MessageKind {
    RateLimited,
    Unauthorized,
    AccessDenied,
}

#[derive(Clone, Debug, Default)]
pub struct MessageContext {
    pub identity: Option<String>,
    pub countdown: Option<Duration>,
}

#[async_trait]
pub trait AuthHooks: Send + Sync {
    /// Deliver `code` to `identity` out of band.
    ///
    /// # Errors
    /// Any error aborts the issuance; the stored code is discarded.
    async fn deliver_code(&self, identity: &str, code: &SecretString) -> anyhow::Result<()>;

    /// Access policy; must not have side effects.
    async fn decide_login(&self, identity: &str) -> AccessDecision;

    fn translate(&self, kind: MessageKind, context: &MessageContext) -> String;
}

/// Told about sessions that ended so bound real-time connections can be closed.
#[async_trait]
pub trait LiveConnections: Send + Sync {
    async fn disconnect(&self, live_connection_id: &str);
}

/// English messages, used when the embedding application has no catalog.
#[must_use]
pub fn default_message(kind: MessageKind, context: &MessageContext) -> String {
    match kind {
        MessageKind::RateLimited => match context.countdown {
            Some(countdown) => format!(
                "Too many attempts, try again in {} seconds.",
                countdown.as_secs().max(1)
            ),
            None => "Too many attempts, try again later.".to_string(),
        },
        MessageKind::Unauthorized => "You must sign in to continue.".to_string(),
        MessageKind::AccessDenied => "Access denied.".to_string(),
    }
}
