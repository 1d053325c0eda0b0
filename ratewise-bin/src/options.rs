use crate::verbosity::Verbosity;
use anyhow::{Context, Error, Result, anyhow};
use clap::builder::PossibleValuesParser;
use clap::{Parser, Subcommand, builder::TypedValueParser};
use const_format::{concatcp, formatcp};
use http::{
    HeaderMap,
    header::{HeaderName, HeaderValue},
};
use ratewise_lib::ratelimit::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_CREDENTIAL_THRESHOLD, DEFAULT_DELAY, DEFAULT_MAX_QUEUE_SIZE,
    DEFAULT_MAX_RETRIES, DEFAULT_QUEUE_WORKERS, DEFAULT_READ_TIMEOUT, DEFAULT_RETRY_AFTER,
    DEFAULT_THROTTLE_THRESHOLD, EndpointConfigs, RuleConfig,
};
use ratewise_lib::{DEFAULT_USER_AGENT, Priority, RateLimitConfig};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::Path;
use std::{fmt, fs, path::PathBuf, str::FromStr, time::Duration};
use strum::{Display, EnumString, VariantNames};

pub(crate) const RATEWISE_CONFIG_FILE: &str = "ratewise.toml";

// clap requires `&str` defaults whereas serde expects typed values
const DEFAULT_DELAY_STR: &str = "200ms";
const DEFAULT_CONNECT_TIMEOUT_STR: &str = "10s";
const DEFAULT_READ_TIMEOUT_STR: &str = "30s";
const DEFAULT_RETRY_AFTER_STR: &str = "5s";
const THROTTLE_THRESHOLD_STR: &str = concatcp!(DEFAULT_THROTTLE_THRESHOLD);
const CREDENTIAL_THRESHOLD_STR: &str = concatcp!(DEFAULT_CREDENTIAL_THRESHOLD);
const MAX_QUEUE_SIZE_STR: &str = concatcp!(DEFAULT_MAX_QUEUE_SIZE);
const QUEUE_WORKERS_STR: &str = concatcp!(DEFAULT_QUEUE_WORKERS);
const MAX_RETRIES_STR: &str = concatcp!(DEFAULT_MAX_RETRIES);
// Show the default config file without making it mandatory
const HELP_MSG_CONFIG_FILE: &str = formatcp!(
    "Configuration file to use\n\n[default: {}]",
    RATEWISE_CONFIG_FILE,
);

/// Output format of results and status reports
#[derive(
    Debug, Deserialize, Default, Clone, Copy, Display, EnumString, VariantNames, PartialEq, Eq,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub(crate) enum OutputFormat {
    /// One line per request, followed by a readable status summary
    #[default]
    Text,
    /// A single JSON document
    Json,
}

// Generate the functions for serde defaults
macro_rules! default_function {
    ( $( $name:ident : $T:ty = $e:expr; )* ) => {
        $(
            #[allow(clippy::missing_const_for_fn)]
            fn $name() -> $T {
                $e
            }
        )*
    };
}

default_function! {
    default_delay: Duration = DEFAULT_DELAY;
    throttle_threshold: u64 = DEFAULT_THROTTLE_THRESHOLD;
    credential_threshold: u64 = DEFAULT_CREDENTIAL_THRESHOLD;
    max_queue_size: usize = DEFAULT_MAX_QUEUE_SIZE;
    queue_workers: usize = DEFAULT_QUEUE_WORKERS;
    max_retries: u64 = DEFAULT_MAX_RETRIES;
    connect_timeout: Duration = DEFAULT_CONNECT_TIMEOUT;
    read_timeout: Duration = DEFAULT_READ_TIMEOUT;
    retry_after: Duration = DEFAULT_RETRY_AFTER;
    user_agent: String = DEFAULT_USER_AGENT.to_string();
    verbosity: Verbosity = Verbosity::default();
}

// Macro for merging configuration values
macro_rules! fold_in {
    ($cli:ident , $toml:ident ; $ty:ident { $(..$ignore:ident,)* $( $key:ident : $default:expr, )* } ) => {
        if (false) {
            #[allow(dead_code, unused, clippy::diverging_sub_expression)]
            let _check_fold_in_exhaustivity = $ty {
                $($key: unreachable!(), )*
                $($ignore: unreachable!(), )*
            };
        };
        $(
            if $cli.$key == $default && $toml.$key != $default {
                $cli.$key = $toml.$key;
            }
        )*
    };
}

/// An API token; never printed
#[derive(Clone)]
pub(crate) struct Token(SecretString);

impl Token {
    pub(crate) fn into_secret(self) -> SecretString {
        self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(****)")
    }
}

impl FromStr for Token {
    type Err = Error;

    fn from_str(token: &str) -> Result<Self> {
        let token = token.trim();
        if token.is_empty() {
            return Err(anyhow!("Credential must not be empty"));
        }
        Ok(Token(SecretString::from(token)))
    }
}

impl<'de> Deserialize<'de> for Token {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let token = String::deserialize(deserializer)?;
        token.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse a single header into a [`HeaderName`] and [`HeaderValue`]
///
/// Headers are expected to be in format `Header-Name: Header-Value`.
/// The header name and value are trimmed of whitespace.
///
/// # Errors
///
/// This fails if the header does not contain a `:` character or if the
/// header name contains invalid characters.
fn parse_single_header(header: &str) -> Result<(HeaderName, HeaderValue)> {
    let parts: Vec<&str> = header.splitn(2, ':').collect();
    match parts.as_slice() {
        [name, value] => {
            let name = name.trim();
            let name = HeaderName::from_str(name)
                .map_err(|e| anyhow!("Unable to convert header name '{name}': {e}"))?;
            let value = HeaderValue::from_str(value.trim())
                .map_err(|e| anyhow!("Unable to read value of header with name '{name}': {e}"))?;
            Ok((name, value))
        }
        _ => Err(anyhow!(
            "Invalid header format. Expected colon-separated string in the format 'HeaderName: HeaderValue'"
        )),
    }
}

/// Parses a single HTTP header into a tuple of (String, String)
#[derive(Clone, Debug)]
struct HeaderParser;

impl TypedValueParser for HeaderParser {
    type Value = (String, String);

    fn parse_ref(
        &self,
        _cmd: &clap::Command,
        _arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> Result<Self::Value, clap::Error> {
        let invalid = |message: String| clap::Error::raw(clap::error::ErrorKind::InvalidValue, message);

        let header_str = value
            .to_str()
            .ok_or_else(|| invalid("Header value contains invalid UTF-8".to_string()))?;
        let (name, value) = parse_single_header(header_str).map_err(|e| invalid(e.to_string()))?;
        let value = value
            .to_str()
            .map_err(|_| invalid("Header value contains invalid UTF-8".to_string()))?;

        Ok((name.to_string(), value.to_string()))
    }
}

impl clap::builder::ValueParserFactory for HeaderParser {
    type Parser = HeaderParser;
    fn value_parser() -> Self::Parser {
        HeaderParser
    }
}

/// Extension trait for converting a Vec of header pairs to a `HeaderMap`
pub(crate) trait HeaderMapExt {
    /// Convert a collection of header key-value pairs to a `HeaderMap`
    fn from_header_pairs(headers: &[(String, String)]) -> Result<HeaderMap, Error>;
}

impl HeaderMapExt for HeaderMap {
    fn from_header_pairs(headers: &[(String, String)]) -> Result<HeaderMap, Error> {
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| anyhow!("Invalid header name '{name}': {e}"))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| anyhow!("Invalid header value for '{name}': {e}"))?;
            header_map.insert(header_name, header_value);
        }
        Ok(header_map)
    }
}

/// ratewise sends HTTP requests through an adaptive scheduler which paces
/// requests per endpoint, rotates API credentials and backs off when an
/// upstream API reports its rate limit as exhausted.
#[derive(Parser, Debug)]
#[command(version, about, next_display_order = None)]
pub(crate) struct RatewiseOptions {
    #[command(subcommand)]
    pub(crate) command: Command,

    /// Configuration file to use
    #[arg(short, long = "config", global = true)]
    #[arg(help = HELP_MSG_CONFIG_FILE)]
    pub(crate) config_file: Option<PathBuf>,

    #[clap(flatten)]
    pub(crate) config: Config,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum Command {
    /// Fetch URLs through the scheduler and report the rate-limit state
    /// observed along the way
    Fetch(FetchArgs),

    /// Print the effective configuration, and the endpoint and settings each
    /// given target resolves to
    Status {
        /// Targets to classify
        targets: Vec<String>,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub(crate) struct FetchArgs {
    /// URLs to fetch, in order
    #[arg(required = true)]
    pub(crate) urls: Vec<String>,

    /// Submit all requests to the queue instead of sending them one by one
    #[arg(long)]
    pub(crate) queue: bool,

    /// Queue priority of the requests; lower values are served first
    #[arg(long, default_value_t = 0, requires = "queue", allow_negative_numbers = true)]
    pub(crate) priority: Priority,
}

// Custom deserializer function for the header field
fn deserialize_headers<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    let map = HashMap::<String, String>::deserialize(deserializer)?;
    Ok(map.into_iter().collect())
}

/// The main configuration for ratewise
#[derive(Parser, Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    /// Verbose program output
    #[clap(flatten)]
    #[serde(default = "verbosity")]
    pub(crate) verbose: Verbosity,

    /// Pause before every request to the same endpoint
    #[arg(
        long,
        global = true,
        env = "RATE_LIMIT_DEFAULT_DELAY",
        default_value = DEFAULT_DELAY_STR,
        value_parser = humantime::parse_duration
    )]
    #[serde(default = "default_delay", with = "humantime_serde")]
    pub(crate) default_delay: Duration,

    /// Remaining quota at or below which requests to an endpoint are slowed down
    #[arg(long, global = true, env = "RATE_LIMIT_THROTTLE_THRESHOLD", default_value = &THROTTLE_THRESHOLD_STR)]
    #[serde(default = "throttle_threshold")]
    pub(crate) throttle_threshold: u64,

    /// Remaining quota at or below which a credential is rotated away from
    #[arg(long, global = true, env = "RATE_LIMIT_CREDENTIAL_THRESHOLD", default_value = &CREDENTIAL_THRESHOLD_STR)]
    #[serde(default = "credential_threshold")]
    pub(crate) credential_threshold: u64,

    /// Maximum number of requests waiting in the queue
    #[arg(long, global = true, env = "RATE_LIMIT_MAX_QUEUE_SIZE", default_value = &MAX_QUEUE_SIZE_STR)]
    #[serde(default = "max_queue_size")]
    pub(crate) max_queue_size: usize,

    /// Number of workers serving the queue
    #[arg(long, global = true, env = "RATE_LIMIT_QUEUE_WORKERS", default_value = &QUEUE_WORKERS_STR)]
    #[serde(default = "queue_workers")]
    pub(crate) queue_workers: usize,

    /// Maximum number of retries per request
    #[arg(long, global = true, env = "RATE_LIMIT_MAX_RETRIES", default_value = &MAX_RETRIES_STR)]
    #[serde(default = "max_retries")]
    pub(crate) max_retries: u64,

    /// Time allowed to establish a connection
    #[arg(
        long,
        global = true,
        env = "RATE_LIMIT_CONNECT_TIMEOUT",
        default_value = DEFAULT_CONNECT_TIMEOUT_STR,
        value_parser = humantime::parse_duration
    )]
    #[serde(default = "connect_timeout", with = "humantime_serde")]
    pub(crate) connect_timeout: Duration,

    /// Time allowed for a whole request
    #[arg(
        long,
        global = true,
        env = "RATE_LIMIT_READ_TIMEOUT",
        default_value = DEFAULT_READ_TIMEOUT_STR,
        value_parser = humantime::parse_duration
    )]
    #[serde(default = "read_timeout", with = "humantime_serde")]
    pub(crate) read_timeout: Duration,

    /// Wait after `429 Too Many Requests` when the response has no
    /// `Retry-After` header
    #[arg(
        long,
        global = true,
        env = "RATE_LIMIT_RETRY_AFTER",
        default_value = DEFAULT_RETRY_AFTER_STR,
        value_parser = humantime::parse_duration
    )]
    #[serde(default = "retry_after", with = "humantime_serde")]
    pub(crate) retry_after: Duration,

    /// API token sent as bearer credential; repeat or separate with commas
    /// to rotate between several tokens in the given order
    #[arg(
        long = "credential",
        global = true,
        env = "RATE_LIMIT_CREDENTIALS",
        hide_env_values = true,
        value_delimiter = ','
    )]
    #[serde(default)]
    pub(crate) credentials: Vec<Token>,

    /// User agent
    #[arg(short, long, global = true, default_value = DEFAULT_USER_AGENT)]
    #[serde(default = "user_agent")]
    pub(crate) user_agent: String,

    /// Custom request header
    #[arg(
        long = "header",
        short = 'H',
        global = true,
        value_parser = HeaderParser,
        number_of_values = 1
    )]
    #[serde(default)]
    #[serde(deserialize_with = "deserialize_headers")]
    pub(crate) header: Vec<(String, String)>,

    /// Output format
    #[arg(
        short,
        long,
        global = true,
        default_value = "text",
        value_parser = PossibleValuesParser::new(OutputFormat::VARIANTS).map(|s| s.parse::<OutputFormat>().unwrap())
    )]
    #[serde(default)]
    pub(crate) format: OutputFormat,

    /// Classification rules, only available in the configuration file
    #[arg(skip)]
    #[serde(default)]
    pub(crate) rules: Vec<RuleConfig>,

    /// Per-endpoint overrides, only available in the configuration file
    #[arg(skip)]
    #[serde(default)]
    pub(crate) endpoints: EndpointConfigs,
}

impl Config {
    /// Special handling for merging headers
    ///
    /// Overwrites existing headers in `self` with the values from `other`.
    fn merge_headers(&mut self, other: &[(String, String)]) {
        let self_map = self.header.iter().cloned().collect::<HashMap<_, _>>();
        let other_map = other.iter().cloned().collect::<HashMap<_, _>>();

        // Command line headers win
        let merged_map: HashMap<_, _> = other_map.into_iter().chain(self_map).collect();
        self.header = merged_map.into_iter().collect();
    }

    /// Load configuration from a file
    pub(crate) fn load_from_file(path: &Path) -> Result<Config> {
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).with_context(|| "Failed to parse configuration file")
    }

    /// Merge the configuration from TOML into the CLI configuration
    pub(crate) fn merge(&mut self, toml: Config) {
        self.merge_headers(&toml.header);

        // Credentials from the command line or environment replace the
        // configured ones as a whole
        if self.credentials.is_empty() {
            self.credentials = toml.credentials;
        }

        // Rules and endpoint overrides are only available in TOML
        self.rules = toml.rules;
        self.endpoints = toml.endpoints;

        // NOTE: if you see an error within this macro call, check to make sure that
        // that the fields provided to fold_in! match all the fields of the Config struct.
        fold_in! {
            // Destination and source configs
            self, toml;

            Config {
                // Keys which are handled outside of fold_in
                ..header,
                ..credentials,
                ..rules,
                ..endpoints,

                // Keys with defaults to assign
                verbose: Verbosity::default(),
                default_delay: DEFAULT_DELAY,
                throttle_threshold: DEFAULT_THROTTLE_THRESHOLD,
                credential_threshold: DEFAULT_CREDENTIAL_THRESHOLD,
                max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
                queue_workers: DEFAULT_QUEUE_WORKERS,
                max_retries: DEFAULT_MAX_RETRIES,
                connect_timeout: DEFAULT_CONNECT_TIMEOUT,
                read_timeout: DEFAULT_READ_TIMEOUT,
                retry_after: DEFAULT_RETRY_AFTER,
                user_agent: DEFAULT_USER_AGENT,
                format: OutputFormat::default(),
            }
        }
    }

    /// Scheduling configuration for the library
    pub(crate) fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            default_delay: self.default_delay,
            throttle_threshold: self.throttle_threshold,
            credential_threshold: self.credential_threshold,
            max_queue_size: self.max_queue_size,
            queue_workers: self.queue_workers,
            max_retries: self.max_retries,
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            retry_after: self.retry_after,
            rules: self.rules.clone(),
            ..RateLimitConfig::default()
        }
        .with_endpoint_overrides(self.endpoints.clone())
    }

    /// Credentials in rotation order
    pub(crate) fn secrets(&self) -> Vec<SecretString> {
        self.credentials
            .iter()
            .cloned()
            .map(Token::into_secret)
            .collect()
    }
}
