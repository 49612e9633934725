//! Auth configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_OTP_CODE_LENGTH: usize = 6;
const DEFAULT_OTP_EXPIRATION_MINUTES: i64 = 10;
const DEFAULT_SESSION_VALIDITY_DAYS: i64 = 60;
pub const MAX_OTP_EXPIRATION_MINUTES: i64 = 24 * 60;
pub const MAX_SESSION_VALIDITY_DAYS: i64 = 10 * 365;
const DEFAULT_OTP_ISSUANCE_CAPACITY: u32 = 1;
const DEFAULT_OTP_ISSUANCE_WINDOW: Duration = Duration::from_secs(60);
const DEFAULT_LOGIN_ATTEMPT_CAPACITY: u32 = 10;
const DEFAULT_LOGIN_ATTEMPT_WINDOW: Duration = Duration::from_secs(10 * 60);
// Argon2 library defaults (m=19 MiB, t=2).
const DEFAULT_OTP_HASH_MEMORY_KIB: u32 = 19 * 1024;
const DEFAULT_OTP_HASH_ITERATIONS: u32 = 2;

/// Capacity and refill window of one token bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub capacity: u32,
    #[serde(with = "seconds")]
    pub window: Duration,
}

impl RateLimitConfig {
    #[must_use]
    pub const fn new(capacity: u32, window: Duration) -> Self {
        Self { capacity, window }
    }
}

mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    otp_code_length: usize,
    otp_expiration_minutes: i64,
    otp_hash_memory_kib: u32,
    otp_hash_iterations: u32,
    session_validity_days: i64,
    remember_me_enabled: bool,
    rate_limiting_enabled: bool,
    otp_issuance_rate: RateLimitConfig,
    login_attempt_rate: RateLimitConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            otp_code_length: DEFAULT_OTP_CODE_LENGTH,
            otp_expiration_minutes: DEFAULT_OTP_EXPIRATION_MINUTES,
            otp_hash_memory_kib: DEFAULT_OTP_HASH_MEMORY_KIB,
            otp_hash_iterations: DEFAULT_OTP_HASH_ITERATIONS,
            session_validity_days: DEFAULT_SESSION_VALIDITY_DAYS,
            remember_me_enabled: true,
            rate_limiting_enabled: true,
            otp_issuance_rate: RateLimitConfig::new(
                DEFAULT_OTP_ISSUANCE_CAPACITY,
                DEFAULT_OTP_ISSUANCE_WINDOW,
            ),
            login_attempt_rate: RateLimitConfig::new(
                DEFAULT_LOGIN_ATTEMPT_CAPACITY,
                DEFAULT_LOGIN_ATTEMPT_WINDOW,
            ),
        }
    }

    /// Number of digits in issued codes; clamped to at least one.
    #[must_use]
    pub fn with_otp_code_length(mut self, digits: usize) -> Self {
        self.otp_code_length = digits.max(1);
        self
    }

    /// Clamped to `1..=MAX_OTP_EXPIRATION_MINUTES`.
    #[must_use]
    pub fn with_otp_expiration_minutes(mut self, minutes: i64) -> Self {
        self.otp_expiration_minutes = minutes.clamp(1, MAX_OTP_EXPIRATION_MINUTES);
        self
    }

    /// Argon2 cost for code hashes. Lower values are only meant for tests.
    #[must_use]
    pub fn with_otp_hash_cost(mut self, memory_kib: u32, iterations: u32) -> Self {
        self.otp_hash_memory_kib = memory_kib;
        self.otp_hash_iterations = iterations;
        self
    }

    /// Clamped to `1..=MAX_SESSION_VALIDITY_DAYS`.
    #[must_use]
    pub fn with_session_validity_days(mut self, days: i64) -> Self {
        self.session_validity_days = days.clamp(1, MAX_SESSION_VALIDITY_DAYS);
        self
    }

    #[must_use]
    pub fn with_remember_me(mut self, enabled: bool) -> Self {
        self.remember_me_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_rate_limiting(mut self, enabled: bool) -> Self {
        self.rate_limiting_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_otp_issuance_rate(mut self, rate: RateLimitConfig) -> Self {
        self.otp_issuance_rate = rate;
        self
    }

    #[must_use]
    pub fn with_login_attempt_rate(mut self, rate: RateLimitConfig) -> Self {
        self.login_attempt_rate = rate;
        self
    }

    #[must_use]
    pub fn otp_code_length(&self) -> usize {
        self.otp_code_length
    }

    #[must_use]
    pub fn otp_expiration_minutes(&self) -> i64 {
        self.otp_expiration_minutes
    }

    #[must_use]
    pub fn otp_hash_memory_kib(&self) -> u32 {
        self.otp_hash_memory_kib
    }

    #[must_use]
    pub fn otp_hash_iterations(&self) -> u32 {
        self.otp_hash_iterations
    }

    #[must_use]
    pub fn session_validity_days(&self) -> i64 {
        self.session_validity_days
    }

    /// Session validity as a `Duration`, used for remember-me cookie max-age.
    #[must_use]
    pub fn session_validity(&self) -> Duration {
        let days = u64::try_from(self.session_validity_days).unwrap_or(0);
        Duration::from_secs(days.saturating_mul(24 * 60 * 60))
    }

    #[must_use]
    pub fn remember_me_enabled(&self) -> bool {
        self.remember_me_enabled
    }

    #[must_use]
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limiting_enabled
    }

    #[must_use]
    pub fn otp_issuance_rate(&self) -> RateLimitConfig {
        self.otp_issuance_rate
    }

    #[must_use]
    pub fn login_attempt_rate(&self) -> RateLimitConfig {
        self.login_attempt_rate
    }
}
