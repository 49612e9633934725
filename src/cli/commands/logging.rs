use clap::{Arg, ArgAction, ArgMatches, Command, builder::ValueParser};
use ulid::Ulid;

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_OTLP_ENDPOINT: &str = "otlp-endpoint";
pub const ARG_OTLP_HEADER: &str = "otlp-header";
pub const ARG_INSTANCE_ID: &str = "instance-id";

/// Where spans are exported, when an OTLP endpoint is configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exporter {
    pub endpoint: String,
    pub headers: Vec<(String, String)>,
    /// Reported as `service.instance.id`; one fresh ULID per run unless given.
    pub instance_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub exporter: Option<Exporter>,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let exporter = matches
            .get_one::<String>(ARG_OTLP_ENDPOINT)
            .map(|endpoint| Exporter {
                endpoint: endpoint.clone(),
                headers: matches
                    .get_many::<(String, String)>(ARG_OTLP_HEADER)
                    .map(|headers| headers.cloned().collect())
                    .unwrap_or_default(),
                instance_id: matches
                    .get_one::<String>(ARG_INSTANCE_ID)
                    .cloned()
                    .unwrap_or_else(|| Ulid::new().to_string()),
            });
        Self { exporter }
    }
}

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

// The exporter speaks plaintext gRPC, so a bare host:port gets `http://`.
fn validator_endpoint() -> ValueParser {
    ValueParser::from(move |endpoint: &str| -> std::result::Result<String, String> {
        let endpoint = endpoint.trim().trim_end_matches('/');
        if endpoint.is_empty() {
            return Err("endpoint must not be empty".to_string());
        }
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            Ok(endpoint.to_string())
        } else {
            Ok(format!("http://{endpoint}"))
        }
    })
}

fn validator_header() -> ValueParser {
    ValueParser::from(
        move |pair: &str| -> std::result::Result<(String, String), String> {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("expected key=value, got '{pair}'"))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(format!("missing header name in '{pair}'"));
            }
            Ok((key.to_ascii_lowercase(), value.trim().to_string()))
        },
    )
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("OTPGATE_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(validator_log_level()),
        )
        .arg(
            Arg::new(ARG_OTLP_ENDPOINT)
                .long(ARG_OTLP_ENDPOINT)
                .help("OTLP/gRPC collector for traces, e.g. localhost:4317 (default: no export)")
                .env("OTPGATE_OTLP_ENDPOINT")
                .global(true)
                .value_parser(validator_endpoint()),
        )
        .arg(
            Arg::new(ARG_OTLP_HEADER)
                .long(ARG_OTLP_HEADER)
                .help("Metadata sent to the collector as key=value; keys ending in -bin take base64")
                .env("OTPGATE_OTLP_HEADERS")
                .hide_env_values(true)
                .value_delimiter(',')
                .action(ArgAction::Append)
                .global(true)
                .value_parser(validator_header()),
        )
        .arg(
            Arg::new(ARG_INSTANCE_ID)
                .long(ARG_INSTANCE_ID)
                .help("Instance id reported with exported traces (default: random ULID)")
                .env("OTPGATE_INSTANCE_ID")
                .global(true),
        )
}
