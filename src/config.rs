//! Pipeline configuration.
//!
//! Every knob has a documented default; only the API key is required.
//! Durations are written in TOML as integer milliseconds.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::logging::{SharedLogger, TracingLogger};

// ─── Defaults ────────────────────────────────────────────────────

pub const DEFAULT_ENDPOINT: &str = "api.graphmetrics.io";
pub const DEFAULT_SCHEME: &str = "https";
pub const DEFAULT_FIELD_QUEUE_CAPACITY: usize = 1000;
pub const DEFAULT_OPERATION_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);
/// 8 retries with a 1 s → 60 s exponential wait is roughly five minutes.
pub const DEFAULT_MAX_RETRIES: usize = 8;
pub const DEFAULT_RETRY_WAIT_MIN: Duration = Duration::from_secs(1);
pub const DEFAULT_RETRY_WAIT_MAX: Duration = Duration::from_secs(60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Prefix of the environment variables read by [`Configuration::from_env`].
pub const ENV_PREFIX: &str = "GRAPHQL_USAGE_";

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.into()
}
fn default_scheme() -> String {
    DEFAULT_SCHEME.into()
}
fn default_field_queue_capacity() -> usize {
    DEFAULT_FIELD_QUEUE_CAPACITY
}
fn default_operation_queue_capacity() -> usize {
    DEFAULT_OPERATION_QUEUE_CAPACITY
}
fn default_flush_interval() -> Duration {
    DEFAULT_FLUSH_INTERVAL
}
fn default_stop_timeout() -> Duration {
    DEFAULT_STOP_TIMEOUT
}
fn default_max_retries() -> usize {
    DEFAULT_MAX_RETRIES
}
fn default_retry_wait_min() -> Duration {
    DEFAULT_RETRY_WAIT_MIN
}
fn default_retry_wait_max() -> Duration {
    DEFAULT_RETRY_WAIT_MAX
}
fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}
fn default_sdk_version() -> String {
    crate::VERSION.into()
}
fn default_logger() -> SharedLogger {
    Arc::new(TracingLogger::default())
}

// ─── Configuration ───────────────────────────────────────────────

#[derive(Clone, Deserialize)]
pub struct Configuration {
    /// Key sent as `x-api-key` on every report.
    #[serde(default)]
    pub api_key: String,

    /// Version of the serving application; third component of every context key.
    #[serde(default)]
    pub server_version: String,

    /// Collector host (and optional port), without scheme.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// `http` or `https`.
    #[serde(default = "default_scheme")]
    pub scheme: String,

    #[serde(default = "default_field_queue_capacity")]
    pub field_queue_capacity: usize,

    #[serde(default = "default_operation_queue_capacity")]
    pub operation_queue_capacity: usize,

    #[serde(
        default = "default_flush_interval",
        rename = "flush_interval_ms",
        deserialize_with = "millis"
    )]
    pub flush_interval: Duration,

    /// Upper bound on the shutdown wait for in-flight reports.
    #[serde(
        default = "default_stop_timeout",
        rename = "stop_timeout_ms",
        deserialize_with = "millis"
    )]
    pub stop_timeout: Duration,

    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(
        default = "default_retry_wait_min",
        rename = "retry_wait_min_ms",
        deserialize_with = "millis"
    )]
    pub retry_wait_min: Duration,

    #[serde(
        default = "default_retry_wait_max",
        rename = "retry_wait_max_ms",
        deserialize_with = "millis"
    )]
    pub retry_wait_max: Duration,

    #[serde(
        default = "default_request_timeout",
        rename = "request_timeout_ms",
        deserialize_with = "millis"
    )]
    pub request_timeout: Duration,

    /// Enables debug-level pipeline diagnostics on the default logger.
    #[serde(default)]
    pub debug: bool,

    /// Version advertised in the user agent.
    #[serde(default = "default_sdk_version")]
    pub sdk_version: String,

    #[serde(skip, default = "default_logger")]
    pub logger: SharedLogger,
}

fn millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("api_key", &"<redacted>")
            .field("server_version", &self.server_version)
            .field("endpoint", &self.endpoint)
            .field("scheme", &self.scheme)
            .field("field_queue_capacity", &self.field_queue_capacity)
            .field("operation_queue_capacity", &self.operation_queue_capacity)
            .field("flush_interval", &self.flush_interval)
            .field("stop_timeout", &self.stop_timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_wait_min", &self.retry_wait_min)
            .field("retry_wait_max", &self.retry_wait_max)
            .field("request_timeout", &self.request_timeout)
            .field("debug", &self.debug)
            .field("sdk_version", &self.sdk_version)
            .finish_non_exhaustive()
    }
}

impl Configuration {
    /// Defaults everywhere except the API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            server_version: String::new(),
            endpoint: default_endpoint(),
            scheme: default_scheme(),
            field_queue_capacity: DEFAULT_FIELD_QUEUE_CAPACITY,
            operation_queue_capacity: DEFAULT_OPERATION_QUEUE_CAPACITY,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_wait_min: DEFAULT_RETRY_WAIT_MIN,
            retry_wait_max: DEFAULT_RETRY_WAIT_MAX,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            debug: false,
            sdk_version: default_sdk_version(),
            logger: default_logger(),
        }
    }

    /// Parse a TOML document, then validate it.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content)?;
        config.logger = Arc::new(TracingLogger::new(config.debug));
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Build from `GRAPHQL_USAGE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Build from an arbitrary key lookup (keys without the env prefix).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(lookup("API_KEY").unwrap_or_default());

        if let Some(v) = lookup("SERVER_VERSION") {
            config.server_version = v;
        }
        if let Some(v) = lookup("ENDPOINT") {
            config.endpoint = v;
        }
        if let Some(v) = lookup("SCHEME") {
            config.scheme = v;
        }
        if let Some(v) = lookup("FIELD_QUEUE_CAPACITY") {
            config.field_queue_capacity = parse_number("field_queue_capacity", &v)?;
        }
        if let Some(v) = lookup("OPERATION_QUEUE_CAPACITY") {
            config.operation_queue_capacity = parse_number("operation_queue_capacity", &v)?;
        }
        if let Some(v) = lookup("FLUSH_INTERVAL_MS") {
            config.flush_interval = Duration::from_millis(parse_number("flush_interval_ms", &v)?);
        }
        if let Some(v) = lookup("STOP_TIMEOUT_MS") {
            config.stop_timeout = Duration::from_millis(parse_number("stop_timeout_ms", &v)?);
        }
        if let Some(v) = lookup("MAX_RETRIES") {
            config.max_retries = parse_number("max_retries", &v)?;
        }
        if let Some(v) = lookup("RETRY_WAIT_MIN_MS") {
            config.retry_wait_min = Duration::from_millis(parse_number("retry_wait_min_ms", &v)?);
        }
        if let Some(v) = lookup("RETRY_WAIT_MAX_MS") {
            config.retry_wait_max = Duration::from_millis(parse_number("retry_wait_max_ms", &v)?);
        }
        if let Some(v) = lookup("REQUEST_TIMEOUT_MS") {
            config.request_timeout =
                Duration::from_millis(parse_number("request_timeout_ms", &v)?);
        }
        if let Some(v) = lookup("SDK_VERSION") {
            config.sdk_version = v;
        }
        if let Some(v) = lookup("DEBUG") {
            config.debug = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }

        config.logger = Arc::new(TracingLogger::new(config.debug));
        config.validate()?;
        Ok(config)
    }

    pub fn with_server_version(mut self, version: impl Into<String>) -> Self {
        self.server_version = version.into();
        self
    }

    pub fn with_endpoint(mut self, scheme: impl Into<String>, endpoint: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_logger(mut self, logger: SharedLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingField("api_key"));
        }
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::MissingField("endpoint"));
        }
        if self.scheme != "http" && self.scheme != "https" {
            return Err(ConfigError::invalid(
                "scheme",
                format!("expected http or https, got {:?}", self.scheme),
            ));
        }
        if self.field_queue_capacity == 0 {
            return Err(ConfigError::invalid("field_queue_capacity", "must be at least 1"));
        }
        if self.operation_queue_capacity == 0 {
            return Err(ConfigError::invalid("operation_queue_capacity", "must be at least 1"));
        }
        if self.flush_interval.is_zero() {
            return Err(ConfigError::invalid("flush_interval", "must be non-zero"));
        }
        if self.retry_wait_min > self.retry_wait_max {
            return Err(ConfigError::invalid(
                "retry_wait_min",
                "must not exceed retry_wait_max",
            ));
        }
        Ok(())
    }

    /// `{scheme}://{endpoint}/reporting`
    pub fn reporting_url(&self) -> String {
        format!("{}://{}/reporting", self.scheme, self.endpoint)
    }

    pub fn user_agent(&self) -> String {
        format!("sdk/rust/{}", self.sdk_version)
    }
}

fn parse_number<T: std::str::FromStr>(field: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::invalid(field, format!("not a number: {raw:?}")))
}
