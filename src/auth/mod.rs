//! Passwordless login: one-time codes, session tokens, and the orchestrator
//! that ties them to a caller's session carrier.
//!
//! ## Rate Limiting
//!
//! Two independent buckets, both keyed by the normalized identity:
//!
//! - **Code issuance:** 1 code per identity per minute by default.
//! - **Login attempts:** 10 submissions per identity per 10 minutes by default.
//!
//! A rejected request reports the seconds until the next token refills.
//!
//! ## Codes
//!
//! Codes are numeric, 6 digits by default, valid for 10 minutes, stored only
//! as Argon2id hashes, and consumed on first successful use. Issuing a new
//! code supersedes the previous one.
//!
//! ## Sessions
//!
//! Session tokens are opaque bearer strings. The store keys sessions by the
//! SHA-256 of the token, and a session older than the validity window
//! (60 days by default) reads as absent.

mod carrier;
mod hooks;
mod orchestrator;
mod otp;
mod rate_limit;
mod session;
mod state;
pub(crate) mod types;
mod utils;

pub use carrier::{MemoryCarrier, SessionCarrier};
pub use hooks::{
    AccessDecision, AuthHooks, LiveConnections, MessageContext, MessageKind, default_message,
};
pub use orchestrator::AuthOrchestrator;
pub use otp::OtpLedger;
pub use rate_limit::{NoopRateLimiter, RateLimited, RateLimiter, TokenBucket, limiter_for};
pub use session::SessionLedger;
pub use state::{
    AuthConfig, MAX_OTP_EXPIRATION_MINUTES, MAX_SESSION_VALIDITY_DAYS, RateLimitConfig,
};
pub use types::{
    CodeRequested, CurrentSession, IssuedCode, IssuedSession, LoginOutcome, OtpRecord,
    PruneReport, SessionRecord,
};
