//! Error taxonomy shared by the ledgers and the orchestrator.

use std::time::Duration;

use crate::auth::{MessageKind, RateLimited};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Malformed input, reported per field.
    #[error("{field}: {message}")]
    ValidationFailed {
        field: &'static str,
        message: String,
    },

    #[error("Rate limited: retry in {}s", countdown.as_secs())]
    RateLimited { countdown: Duration },

    #[error("Invalid code")]
    InvalidCode,

    #[error("Code expired")]
    Expired,

    #[error("Access denied")]
    AccessDenied,

    #[error("Unauthorized")]
    Unauthorized,

    /// The out-of-band delivery collaborator failed; the issued code was discarded.
    #[error("Code delivery failed")]
    Delivery(#[source] anyhow::Error),

    /// The backing store failed. Never retried here.
    #[error("Storage failure")]
    Storage(#[source] anyhow::Error),
}

impl AuthError {
    pub(crate) fn invalid_email(message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            field: "email",
            message: message.into(),
        }
    }

    /// Classify errors that are rendered to end users through `translate`.
    #[must_use]
    pub fn message_kind(&self) -> Option<MessageKind> {
        match self {
            Self::RateLimited { .. } => Some(MessageKind::RateLimited),
            Self::Unauthorized => Some(MessageKind::Unauthorized),
            Self::AccessDenied => Some(MessageKind::AccessDenied),
            _ => None,
        }
    }

    /// Remaining wait for `RateLimited`, `None` otherwise.
    #[must_use]
    pub fn countdown(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { countdown } => Some(*countdown),
            _ => None,
        }
    }
}

impl From<RateLimited> for AuthError {
    fn from(err: RateLimited) -> Self {
        Self::RateLimited {
            countdown: err.countdown,
        }
    }
}
