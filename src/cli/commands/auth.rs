use clap::{Arg, ArgAction, ArgMatches, Command};
use std::time::Duration;

use crate::auth::{
    AuthConfig, MAX_OTP_EXPIRATION_MINUTES, MAX_SESSION_VALIDITY_DAYS, RateLimitConfig,
};

pub const ARG_OTP_CODE_LENGTH: &str = "otp-code-length";
pub const ARG_OTP_EXPIRATION_MINUTES: &str = "otp-expiration-minutes";
pub const ARG_OTP_HASH_MEMORY_KIB: &str = "otp-hash-memory-kib";
pub const ARG_OTP_HASH_ITERATIONS: &str = "otp-hash-iterations";
pub const ARG_SESSION_VALIDITY_DAYS: &str = "session-validity-days";
pub const ARG_REMEMBER_ME: &str = "remember-me";
pub const ARG_RATE_LIMITING: &str = "rate-limiting";
pub const ARG_OTP_ISSUANCE_CAPACITY: &str = "otp-issuance-capacity";
pub const ARG_OTP_ISSUANCE_WINDOW_SECONDS: &str = "otp-issuance-window-seconds";
pub const ARG_LOGIN_ATTEMPT_CAPACITY: &str = "login-attempt-capacity";
pub const ARG_LOGIN_ATTEMPT_WINDOW_SECONDS: &str = "login-attempt-window-seconds";
pub const ARG_ALLOWED_DOMAIN: &str = "allowed-domain";

#[derive(Debug, Clone)]
pub struct Options {
    pub config: AuthConfig,
    /// Email domains allowed to log in; empty allows everyone.
    pub allowed_domains: Vec<String>,
}

impl Options {
    /// Parse auth arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a value with a default is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get = |id: &str| -> anyhow::Result<u64> {
            matches
                .get_one::<u64>(id)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };
        let get_u32 = |id: &str| -> anyhow::Result<u32> {
            matches
                .get_one::<u32>(id)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };
        let get_i64 = |id: &str| -> anyhow::Result<i64> {
            matches
                .get_one::<i64>(id)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };
        let get_bool = |id: &str| matches.get_one::<bool>(id).copied().unwrap_or(true);

        let code_length = matches
            .get_one::<usize>(ARG_OTP_CODE_LENGTH)
            .copied()
            .unwrap_or(6);

        let config = AuthConfig::new()
            .with_otp_code_length(code_length)
            .with_otp_expiration_minutes(get_i64(ARG_OTP_EXPIRATION_MINUTES)?)
            .with_otp_hash_cost(
                get_u32(ARG_OTP_HASH_MEMORY_KIB)?,
                get_u32(ARG_OTP_HASH_ITERATIONS)?,
            )
            .with_session_validity_days(get_i64(ARG_SESSION_VALIDITY_DAYS)?)
            .with_remember_me(get_bool(ARG_REMEMBER_ME))
            .with_rate_limiting(get_bool(ARG_RATE_LIMITING))
            .with_otp_issuance_rate(RateLimitConfig::new(
                get_u32(ARG_OTP_ISSUANCE_CAPACITY)?,
                Duration::from_secs(get(ARG_OTP_ISSUANCE_WINDOW_SECONDS)?),
            ))
            .with_login_attempt_rate(RateLimitConfig::new(
                get_u32(ARG_LOGIN_ATTEMPT_CAPACITY)?,
                Duration::from_secs(get(ARG_LOGIN_ATTEMPT_WINDOW_SECONDS)?),
            ));

        let allowed_domains = matches
            .get_many::<String>(ARG_ALLOWED_DOMAIN)
            .map(|values| {
                values
                    .map(|domain| domain.trim().trim_start_matches('@').to_lowercase())
                    .filter(|domain| !domain.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            config,
            allowed_domains,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_otp_args(command);
    let command = with_session_args(command);
    let command = with_rate_limit_args(command);
    command.arg(
        Arg::new(ARG_ALLOWED_DOMAIN)
            .long(ARG_ALLOWED_DOMAIN)
            .help("Email domain allowed to log in (repeatable, default: any)")
            .env("OTPGATE_ALLOWED_DOMAINS")
            .value_delimiter(',')
            .action(ArgAction::Append)
            .global(true),
    )
}

fn with_otp_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OTP_CODE_LENGTH)
                .long(ARG_OTP_CODE_LENGTH)
                .help("Number of digits in issued codes")
                .env("OTPGATE_OTP_CODE_LENGTH")
                .default_value("6")
                .global(true)
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_OTP_EXPIRATION_MINUTES)
                .long(ARG_OTP_EXPIRATION_MINUTES)
                .help("Minutes an issued code stays valid")
                .env("OTPGATE_OTP_EXPIRATION_MINUTES")
                .default_value("10")
                .global(true)
                .value_parser(clap::value_parser!(i64).range(1..=MAX_OTP_EXPIRATION_MINUTES)),
        )
        .arg(
            Arg::new(ARG_OTP_HASH_MEMORY_KIB)
                .long(ARG_OTP_HASH_MEMORY_KIB)
                .help("Argon2 memory cost for code hashes, in KiB")
                .env("OTPGATE_OTP_HASH_MEMORY_KIB")
                .default_value("19456")
                .global(true)
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_OTP_HASH_ITERATIONS)
                .long(ARG_OTP_HASH_ITERATIONS)
                .help("Argon2 iterations for code hashes")
                .env("OTPGATE_OTP_HASH_ITERATIONS")
                .default_value("2")
                .global(true)
                .value_parser(clap::value_parser!(u32)),
        )
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_VALIDITY_DAYS)
                .long(ARG_SESSION_VALIDITY_DAYS)
                .help("Days a session token stays valid")
                .env("OTPGATE_SESSION_VALIDITY_DAYS")
                .default_value("60")
                .global(true)
                .value_parser(clap::value_parser!(i64).range(1..=MAX_SESSION_VALIDITY_DAYS)),
        )
        .arg(
            Arg::new(ARG_REMEMBER_ME)
                .long(ARG_REMEMBER_ME)
                .help("Mirror session tokens into the remember-me store")
                .env("OTPGATE_REMEMBER_ME")
                .default_value("true")
                .global(true)
                .value_parser(clap::value_parser!(bool)),
        )
}

fn with_rate_limit_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RATE_LIMITING)
                .long(ARG_RATE_LIMITING)
                .help("Enable per-identity rate limiting")
                .env("OTPGATE_RATE_LIMITING")
                .default_value("true")
                .global(true)
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_OTP_ISSUANCE_CAPACITY)
                .long(ARG_OTP_ISSUANCE_CAPACITY)
                .help("Codes issued per identity per window")
                .env("OTPGATE_OTP_ISSUANCE_CAPACITY")
                .default_value("1")
                .global(true)
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_OTP_ISSUANCE_WINDOW_SECONDS)
                .long(ARG_OTP_ISSUANCE_WINDOW_SECONDS)
                .help("Code issuance window in seconds")
                .env("OTPGATE_OTP_ISSUANCE_WINDOW_SECONDS")
                .default_value("60")
                .global(true)
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_LOGIN_ATTEMPT_CAPACITY)
                .long(ARG_LOGIN_ATTEMPT_CAPACITY)
                .help("Code submissions per identity per window")
                .env("OTPGATE_LOGIN_ATTEMPT_CAPACITY")
                .default_value("10")
                .global(true)
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_LOGIN_ATTEMPT_WINDOW_SECONDS)
                .long(ARG_LOGIN_ATTEMPT_WINDOW_SECONDS)
                .help("Login attempt window in seconds")
                .env("OTPGATE_LOGIN_ATTEMPT_WINDOW_SECONDS")
                .default_value("600")
                .global(true)
                .value_parser(clap::value_parser!(u64)),
        )
}
