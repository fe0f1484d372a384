//! In-process GraphQL usage reporting.
//!
//! Resolver and operation timings flow from a [`UsageExtension`] into the
//! [`Aggregator`], which keeps per-client latency histograms and error
//! counts and periodically hands them to the [`Sender`] for delivery to a
//! remote collector. Each distinct operation shape is reported once, keyed
//! by the hash of its literal-free [signature](signature::operation_signature).

pub mod aggregator;
pub mod client;
pub mod config;
pub mod error;
pub mod extension;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod sender;
pub mod signature;

pub use aggregator::{Aggregator, Phase, SnapshotSink, Submission};
pub use client::{ClientDetails, ClientExtractor, ExtensionsExtractor, HeaderExtractor};
pub use config::Configuration;
pub use error::{
    AggregatorError, ConfigError, DeliveryError, HistogramError, SenderError, SignatureError,
};
pub use extension::{FieldInfo, FieldObservation, OperationObservation, UsageExtension};
pub use logging::{Logger, SharedLogger, TracingLogger};
pub use metrics::{FieldMessage, OperationKind, OperationMessage};
pub use sender::Sender;
pub use signature::{operation_hash, operation_signature, Schema};

/// Crate version, reported in the user agent.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
