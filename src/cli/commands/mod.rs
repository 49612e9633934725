pub mod auth;
pub mod logging;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_DSN: &str = "dsn";
pub const ARG_DB_PASSWORD: &str = "db-password";
pub const ARG_EMAIL: &str = "email";
pub const ARG_CODE: &str = "code";
pub const ARG_TOKEN: &str = "token";

pub const CMD_REQUEST_CODE: &str = "request-code";
pub const CMD_SUBMIT_CODE: &str = "submit-code";
pub const CMD_SESSION: &str = "session";
pub const CMD_LOGOUT: &str = "logout";
pub const CMD_REVOKE: &str = "revoke";
pub const CMD_PRUNE: &str = "prune";

fn email_arg() -> Arg {
    Arg::new(ARG_EMAIL)
        .short('e')
        .long(ARG_EMAIL)
        .help("Email address used as the login identity")
        .required(true)
}

fn token_arg() -> Arg {
    Arg::new(ARG_TOKEN)
        .short('t')
        .long(ARG_TOKEN)
        .help("Session token returned by submit-code")
        .env("OTPGATE_SESSION_TOKEN")
        .hide_env_values(true)
        .required(true)
}

fn subcommands() -> Vec<Command> {
    vec![
        Command::new(CMD_REQUEST_CODE)
            .about("Issue a one-time code and print it (stands in for email delivery)")
            .arg(email_arg()),
        Command::new(CMD_SUBMIT_CODE)
            .about("Exchange a one-time code for a session token")
            .arg(email_arg())
            .arg(
                Arg::new(ARG_CODE)
                    .short('c')
                    .long(ARG_CODE)
                    .help("One-time code received from request-code")
                    .required(true),
            ),
        Command::new(CMD_SESSION)
            .about("Show the session behind a token")
            .arg(token_arg()),
        Command::new(CMD_LOGOUT)
            .about("End the session behind a token")
            .arg(token_arg()),
        Command::new(CMD_REVOKE)
            .about("Revoke every session of an identity")
            .arg(email_arg()),
        Command::new(CMD_PRUNE).about("Delete expired codes and sessions"),
    ]
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("otpgate")
        .about("Passwordless email authentication")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Database connection string")
                .long_help(
                    "Database connection string. The password may be omitted here and passed with --db-password instead.",
                )
                .env("OTPGATE_DSN")
                .global(true),
        )
        .arg(
            Arg::new(ARG_DB_PASSWORD)
                .long(ARG_DB_PASSWORD)
                .help("Database password, injected into the DSN")
                .env("OTPGATE_DB_PASSWORD")
                .hide_env_values(true)
                .global(true),
        )
        .subcommands(subcommands());

    let command = auth::with_args(command);
    logging::with_args(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DSN: &str = "postgres://otpgate@localhost:5432/otpgate";

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "otpgate");
        assert_eq!(
            command.get_about().map(ToString::to_string),
            Some("Passwordless email authentication".to_string())
        );
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn test_subcommands_present() {
        let command = new();
        let names: Vec<&str> = command.get_subcommands().map(Command::get_name).collect();
        assert_eq!(
            names,
            vec![
                CMD_REQUEST_CODE,
                CMD_SUBMIT_CODE,
                CMD_SESSION,
                CMD_LOGOUT,
                CMD_REVOKE,
                CMD_PRUNE
            ]
        );
    }

    #[test]
    fn test_check_dsn_and_submit_code() {
        temp_env::with_vars([("OTPGATE_DSN", None::<&str>)], || {
            let matches = new().try_get_matches_from([
                "otpgate",
                "--dsn",
                DSN,
                CMD_SUBMIT_CODE,
                "--email",
                "user@example.com",
                "--code",
                "123456",
            ]);
            assert!(matches.is_ok());
            let Ok(matches) = matches else { return };

            assert_eq!(matches.get_one::<String>(ARG_DSN).cloned(), Some(DSN.to_string()));
            let sub = matches.subcommand_matches(CMD_SUBMIT_CODE);
            assert_eq!(
                sub.and_then(|sub| sub.get_one::<String>(ARG_CODE)).cloned(),
                Some("123456".to_string())
            );
        });
    }

    #[test]
    fn test_dsn_after_subcommand() {
        temp_env::with_vars([("OTPGATE_DSN", None::<&str>)], || {
            let matches = new().try_get_matches_from(["otpgate", CMD_PRUNE, "--dsn", DSN]);
            assert!(matches.is_ok());
            let Ok(matches) = matches else { return };
            assert_eq!(matches.get_one::<String>(ARG_DSN).cloned(), Some(DSN.to_string()));
        });
    }

    #[test]
    fn test_subcommand_is_required() {
        temp_env::with_vars([("OTPGATE_DSN", Some(DSN))], || {
            assert!(new().try_get_matches_from(["otpgate"]).is_err());
        });
    }

    #[test]
    fn test_check_env() {
        temp_env::with_vars(
            [
                ("OTPGATE_DSN", Some(DSN)),
                ("OTPGATE_DB_PASSWORD", Some("s3cret")),
                ("OTPGATE_LOG_LEVEL", Some("info")),
            ],
            || {
                let matches = new().try_get_matches_from(["otpgate", CMD_PRUNE]);
                assert!(matches.is_ok());
                let Ok(matches) = matches else { return };

                assert_eq!(matches.get_one::<String>(ARG_DSN).cloned(), Some(DSN.to_string()));
                assert_eq!(
                    matches.get_one::<String>(ARG_DB_PASSWORD).cloned(),
                    Some("s3cret".to_string())
                );
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    Some(2)
                );
            },
        );
    }

    #[test]
    fn test_check_log_level_env() {
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, &level) in levels.iter().enumerate() {
            temp_env::with_vars(
                [("OTPGATE_LOG_LEVEL", Some(level)), ("OTPGATE_DSN", Some(DSN))],
                || {
                    let matches = new().get_matches_from(vec!["otpgate", CMD_PRUNE]);
                    assert_eq!(
                        matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                        u8::try_from(index).ok()
                    );
                },
            );
        }
    }

    #[test]
    fn test_check_log_level_verbosity() {
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, _) in levels.iter().enumerate() {
            temp_env::with_vars([("OTPGATE_LOG_LEVEL", None::<String>)], || {
                let mut args = vec![
                    "otpgate".to_string(),
                    "--dsn".to_string(),
                    DSN.to_string(),
                    CMD_PRUNE.to_string(),
                ];

                // Add the appropriate number of "-v" flags based on the index
                if index > 0 {
                    args.push(format!("-{}", "v".repeat(index)));
                }

                let matches = new().get_matches_from(args);
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    u8::try_from(index).ok()
                );
            });
        }
    }
}
