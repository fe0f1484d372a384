//! Error types for the usage-reporting pipeline.
//!
//! Nothing in the aggregation or delivery path is allowed to abort the host
//! application. Most of these values end their life in a log line; only the
//! lifecycle calls (`start`/`stop`), configuration loading, and signature
//! computation hand them back to the embedding application.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the quantile histogram.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HistogramError {
    #[error("invalid histogram input: {0}")]
    InvalidInput(f64),

    #[error("relative accuracy {0} cannot index the tracked range with 16-bit buckets")]
    InvalidAccuracy(f64),
}

/// Errors raised while computing an operation signature.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("query parse error: {0}")]
    Parse(String),

    #[error("schema parse error: {0}")]
    Schema(String),
}

/// Failure of a single delivery attempt or of a whole delivery task.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("unable to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("unable to compress snapshot: {0}")]
    Compress(#[from] std::io::Error),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("collector answered with status {status}")]
    Status { status: u16 },

    #[error("giving up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: usize,
        last: Box<DeliveryError>,
    },
}

impl DeliveryError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(err) => err.is_connect() || err.is_timeout() || err.is_request(),
            Self::Status { status } => {
                *status == 429 || (*status >= 500 && *status != 501)
            }
            Self::Serialize(_) | Self::Compress(_) | Self::Exhausted { .. } => false,
        }
    }
}

/// Errors surfaced by [`crate::sender::Sender::stop`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SenderError {
    #[error("sending remaining requests timed out after {0:?}")]
    StopTimeout(Duration),
}

/// Errors surfaced by the aggregator lifecycle calls.
#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("aggregator already started")]
    AlreadyStarted,

    #[error("aggregator already stopped")]
    AlreadyStopped,

    #[error("sender error: {0}")]
    Sender(#[from] SenderError),

    #[error("aggregation task failed: {0}")]
    Task(String),
}

/// Errors that can occur while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            message: message.into(),
        }
    }
}
