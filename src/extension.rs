//! Framework adapter.
//!
//! A GraphQL server integration calls into [`UsageExtension`] from its
//! resolver and request hooks. The extension resolves the caller identity,
//! computes each operation's signature exactly once, and submits samples to
//! the [`Aggregator`] without blocking.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::aggregator::{Aggregator, Phase, Submission};
use crate::client::{AnonymousExtractor, ClientExtractor};
use crate::config::Configuration;
use crate::error::{AggregatorError, DeliveryError, SignatureError};
use crate::logging::SharedLogger;
use crate::metrics::{FieldMessage, OperationKind, OperationMessage};
use crate::signature::{operation_hash, operation_signature, Schema};

/// Static description of the field being resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldInfo {
    pub type_name: String,
    pub field_name: String,
    pub return_type: String,
}

impl FieldInfo {
    pub fn new(
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        return_type: impl Into<String>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            field_name: field_name.into(),
            return_type: return_type.into(),
        }
    }
}

/// One finished resolver call, as seen by the host framework.
#[derive(Debug, Clone)]
pub struct FieldObservation {
    pub field: FieldInfo,
    pub error: Option<String>,
    pub duration: Duration,
}

/// One finished request, as seen by the host framework.
#[derive(Debug, Clone)]
pub struct OperationObservation {
    /// `""` for an anonymous operation.
    pub name: String,
    pub kind: OperationKind,
    pub query: String,
    pub has_errors: bool,
    pub duration: Duration,
}

pub struct UsageExtension<Ctx: ?Sized> {
    aggregator: Aggregator,
    schema: Arc<Schema>,
    extractor: Box<dyn ClientExtractor<Ctx>>,
    logger: SharedLogger,
}

impl<Ctx: ?Sized> UsageExtension<Ctx> {
    /// Report over HTTP with anonymous callers. Use
    /// [`with_extractor`](Self::with_extractor) to identify them.
    pub fn new(config: &Configuration, schema: Arc<Schema>) -> Result<Self, DeliveryError> {
        let aggregator = Aggregator::with_http_sender(config)?;
        Ok(Self::with_aggregator(config, aggregator, schema))
    }

    pub fn with_aggregator(config: &Configuration, aggregator: Aggregator, schema: Arc<Schema>) -> Self {
        Self {
            aggregator,
            schema,
            extractor: Box::new(AnonymousExtractor),
            logger: Arc::clone(&config.logger),
        }
    }

    pub fn with_extractor(mut self, extractor: impl ClientExtractor<Ctx> + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn phase(&self) -> Phase {
        self.aggregator.phase()
    }

    pub fn start(&self) -> Result<(), AggregatorError> {
        self.aggregator.start()
    }

    pub fn record_field(&self, ctx: &Ctx, observation: FieldObservation) -> Submission {
        let FieldObservation { field, error, duration } = observation;
        self.aggregator.push_field(FieldMessage {
            type_name: field.type_name,
            field_name: field.field_name,
            return_type: field.return_type,
            error,
            duration,
            client: self.extractor.extract(ctx),
        })
    }

    /// Compute the signature and submit the operation sample.
    ///
    /// A query that cannot be normalized is logged and its operation sample
    /// dropped; the error is handed back for the caller's own reporting.
    pub fn record_operation(
        &self,
        ctx: &Ctx,
        observation: OperationObservation,
    ) -> Result<Submission, SignatureError> {
        let signature = match operation_signature(&self.schema, &observation.query, &observation.name) {
            Ok(signature) => signature,
            Err(err) => {
                self.logger.error(
                    "unable to compute operation signature",
                    &[("operation", &observation.name), ("error", &err)],
                );
                return Err(err);
            }
        };
        let hash = operation_hash(&signature);

        Ok(self.aggregator.push_operation(OperationMessage {
            name: observation.name,
            kind: observation.kind,
            query: observation.query,
            signature,
            hash,
            has_errors: observation.has_errors,
            duration: observation.duration,
            client: self.extractor.extract(ctx),
        }))
    }

    /// Run `resolver`, time it, and record the field. The resolver's result
    /// is returned untouched.
    pub async fn time_field<F, T, E>(&self, ctx: &Ctx, field: FieldInfo, resolver: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let start = Instant::now();
        let result = resolver.await;
        let observation = FieldObservation {
            field,
            error: result.as_ref().err().map(ToString::to_string),
            duration: start.elapsed(),
        };
        self.record_field(ctx, observation);
        result
    }

    /// Stop the aggregator: drain, flush, wait for deliveries.
    pub async fn close(&self) -> Result<(), AggregatorError> {
        self.aggregator.stop().await
    }
}
