//! Collaborators for running the auth flow from a terminal.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::sync::{Mutex, PoisonError};
use tracing::info;

use crate::auth::{
    AccessDecision, AuthHooks, LiveConnections, MessageContext, MessageKind, default_message,
};

/// Holds the last delivered code for the command output and admits
/// identities by email domain.
#[derive(Debug, Default)]
pub struct ConsoleHooks {
    allowed_domains: Vec<String>,
    delivered: Mutex<Option<(String, SecretString)>>,
}

impl ConsoleHooks {
    /// An empty list admits every identity.
    #[must_use]
    pub fn new(allowed_domains: Vec<String>) -> Self {
        Self {
            allowed_domains,
            delivered: Mutex::new(None),
        }
    }

    /// Take the code delivered to `identity`, if it was the last delivery.
    pub fn take_code(&self, identity: &str) -> Option<SecretString> {
        let mut delivered = self.delivered.lock().unwrap_or_else(PoisonError::into_inner);
        match delivered.take() {
            Some((to, code)) if to == identity => Some(code),
            other => {
                *delivered = other;
                None
            }
        }
    }

    fn admits(&self, identity: &str) -> bool {
        if self.allowed_domains.is_empty() {
            return true;
        }
        identity
            .rsplit_once('@')
            .is_some_and(|(_, domain)| self.allowed_domains.iter().any(|allowed| allowed == domain))
    }
}

#[async_trait]
impl AuthHooks for ConsoleHooks {
    async fn deliver_code(&self, identity: &str, code: &SecretString) -> anyhow::Result<()> {
        *self.delivered.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((identity.to_string(), SecretString::from(code.expose_secret())));
        Ok(())
    }

    async fn decide_login(&self, identity: &str) -> AccessDecision {
        if self.admits(identity) {
            AccessDecision::Allow
        } else {
            AccessDecision::Deny
        }
    }

    fn translate(&self, kind: MessageKind, context: &MessageContext) -> String {
        default_message(kind, context)
    }
}

/// A one-shot process holds no sockets; disconnects are only logged.
#[derive(Debug, Default)]
pub struct LoggedDisconnects;

#[async_trait]
impl LiveConnections for LoggedDisconnects {
    async fn disconnect(&self, live_connection_id: &str) {
        info!(live_connection_id = %live_connection_id, "live connection disconnect requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_domain_list_allows_everyone() {
        let hooks = ConsoleHooks::default();
        assert_eq!(
            hooks.decide_login("anyone@anywhere.test").await,
            AccessDecision::Allow
        );
    }

    #[tokio::test]
    async fn domain_list_filters_identities() {
        let hooks = ConsoleHooks::new(vec!["example.com".to_string()]);
        assert_eq!(
            hooks.decide_login("user@example.com").await,
            AccessDecision::Allow
        );
        assert_eq!(
            hooks.decide_login("user@example.com.evil.test").await,
            AccessDecision::Deny
        );
        assert_eq!(hooks.decide_login("no-at-sign").await, AccessDecision::Deny);
    }

    #[test]
    fn translate_uses_default_messages() {
        let hooks = ConsoleHooks::default();
        assert_eq!(
            hooks.translate(MessageKind::AccessDenied, &MessageContext::default()),
            "Access denied."
        );
    }

    #[tokio::test]
    async fn delivered_code_is_taken_once_per_identity() -> anyhow::Result<()> {
        let hooks = ConsoleHooks::default();
        hooks
            .deliver_code("a@example.com", &SecretString::from("123456"))
            .await?;

        assert!(hooks.take_code("b@example.com").is_none());
        assert_eq!(
            hooks
                .take_code("a@example.com")
                .map(|code| code.expose_secret().to_string()),
            Some("123456".to_string())
        );
        assert!(hooks.take_code("a@example.com").is_none());
        Ok(())
    }
}
