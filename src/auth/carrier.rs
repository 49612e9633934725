//! The external session/cookie store, seen from the orchestrator as a capability.
//!
//! The orchestrator never owns session state: it reads the opaque token from
//! the carrier, writes a fresh one after login, and asks for a full reset on
//! login and logout.

use std::time::Duration;

pub trait SessionCarrier: Send {
    /// Token from the primary (short-lived) session, if any.
    fn session_token(&self) -> Option<String>;

    /// Token mirrored into the long-lived remember-me store, if any.
    fn remember_token(&self) -> Option<String>;

    /// Discard every value held by the primary session.
    fn reset(&mut self);

    fn put_session_token(&mut self, token: &str, live_connection_id: &str);

    fn put_remember_token(&mut self, token: &str, max_age: Duration);

    fn clear_remember_token(&mut self);
}

/// In-process carrier, for the CLI and tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryCarrier {
    session_token: Option<String>,
    live_connection_id: Option<String>,
    remember_token: Option<(String, Duration)>,
    resets: usize,
}

impl MemoryCarrier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_session_token(token: impl Into<String>) -> Self {
        Self {
            session_token: Some(token.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_remember_token(token: impl Into<String>, max_age: Duration) -> Self {
        Self {
            remember_token: Some((token.into(), max_age)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn live_connection_id(&self) -> Option<&str> {
        self.live_connection_id.as_deref()
    }

    #[must_use]
    pub fn remember_max_age(&self) -> Option<Duration> {
        self.remember_token.as_ref().map(|(_, max_age)| *max_age)
    }

    /// How many times the primary session was reset.
    #[must_use]
    pub fn resets(&self) -> usize {
        self.resets
    }
}

impl SessionCarrier for MemoryCarrier {
    fn session_token(&self) -> Option<String> {
        self.session_token.clone()
    }

    fn remember_token(&self) -> Option<String> {
        self.remember_token.as_ref().map(|(token, _)| token.clone())
    }

    fn reset(&mut self) {
        self.session_token = None;
        self.live_connection_id = None;
        self.resets += 1;
    }

    fn put_session_token(&mut self, token: &str, live_connection_id: &str) {
        self.session_token = Some(token.to_string());
        self.live_connection_id = Some(live_connection_id.to_string());
    }

    fn put_remember_token(&mut self, token: &str, max_age: Duration) {
        self.remember_token = Some((token.to_string(), max_age));
    }

    fn clear_remember_token(&mut self) {
        self.remember_token = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_keeps_remember_token() {
        let mut carrier = MemoryCarrier::with_remember_token("r", Duration::from_secs(5));
        carrier.put_session_token("s", "live");
        carrier.reset();

        assert_eq!(carrier.session_token(), None);
        assert_eq!(carrier.live_connection_id(), None);
        assert_eq!(carrier.remember_token().as_deref(), Some("r"));
        assert_eq!(carrier.resets(), 1);

        carrier.clear_remember_token();
        assert_eq!(carrier.remember_token(), None);
    }
}
