//! In-memory metrics model for one flush window.
//!
//! `UsageMetrics` → one entry per context → `types[type][field]` and
//! `operations[hash]`. Leaves are created lazily on first observation and
//! each owns its own histogram; nothing is ever merged across windows.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::histogram::Histogram;
use crate::error::HistogramError;

// ─── Keys ────────────────────────────────────────────────────────

/// The `(client name, client version, server version)` partition key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsContext {
    pub client_name: String,
    pub client_version: String,
    pub server_version: String,
}

impl MetricsContext {
    pub fn new(
        client_name: impl Into<String>,
        client_version: impl Into<String>,
        server_version: impl Into<String>,
    ) -> Self {
        Self {
            client_name: client_name.into(),
            client_version: client_version.into(),
            server_version: server_version.into(),
        }
    }
}

// ─── Leaves ──────────────────────────────────────────────────────

/// Per `(context, type, field)` resolver statistics.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMetrics {
    /// Last return type observed in this window.
    pub return_type: String,
    pub count: u32,
    pub error_count: u32,
    pub histogram: Histogram,
}

impl FieldMetrics {
    /// Fold one resolver execution in. On error nothing is modified.
    pub fn record(
        &mut self,
        duration: Duration,
        has_error: bool,
        return_type: &str,
    ) -> Result<(), HistogramError> {
        self.histogram.add_duration(duration)?;
        self.count = self.count.saturating_add(1);
        if has_error {
            self.error_count = self.error_count.saturating_add(1);
        }
        if self.return_type != return_type {
            self.return_type = return_type.to_owned();
        }
        Ok(())
    }
}

/// Per `(context, operation hash)` request statistics.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMetrics {
    pub count: u32,
    pub error_count: u32,
    pub histogram: Histogram,
}

impl OperationMetrics {
    pub fn record(&mut self, duration: Duration, has_error: bool) -> Result<(), HistogramError> {
        self.histogram.add_duration(duration)?;
        self.count = self.count.saturating_add(1);
        if has_error {
            self.error_count = self.error_count.saturating_add(1);
        }
        Ok(())
    }
}

// ─── Per-context container ───────────────────────────────────────

pub type TypeMetrics = BTreeMap<String, FieldMetrics>;

#[derive(Debug, Clone, Serialize)]
pub struct ContextualizedUsageMetrics {
    pub context: MetricsContext,
    pub types: BTreeMap<String, TypeMetrics>,
    pub operations: BTreeMap<String, OperationMetrics>,
}

impl ContextualizedUsageMetrics {
    pub fn new(context: MetricsContext) -> Self {
        Self {
            context,
            types: BTreeMap::new(),
            operations: BTreeMap::new(),
        }
    }

    /// Locate or lazily create the `(type, field)` leaf.
    pub fn field_metrics_mut(&mut self, type_name: &str, field_name: &str) -> &mut FieldMetrics {
        self.types
            .entry(type_name.to_owned())
            .or_default()
            .entry(field_name.to_owned())
            .or_default()
    }

    /// Locate or lazily create the operation leaf for `hash`.
    pub fn operation_metrics_mut(&mut self, hash: &str) -> &mut OperationMetrics {
        self.operations.entry(hash.to_owned()).or_default()
    }

    pub fn field_metrics(&self, type_name: &str, field_name: &str) -> Option<&FieldMetrics> {
        self.types.get(type_name)?.get(field_name)
    }

    pub fn operation_metrics(&self, hash: &str) -> Option<&OperationMetrics> {
        self.operations.get(hash)
    }
}

// ─── Snapshot ────────────────────────────────────────────────────

/// Everything accumulated during one flush window.
///
/// Owned by the aggregation task until handed to the sender, then immutable.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageMetrics {
    /// End of the window; set when the snapshot is flushed.
    pub timestamp: DateTime<Utc>,
    pub contexts: Vec<ContextualizedUsageMetrics>,
}

impl UsageMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn context(&self, context: &MetricsContext) -> Option<&ContextualizedUsageMetrics> {
        self.contexts.iter().find(|c| &c.context == context)
    }

    /// Locate or lazily create the container for `context`.
    ///
    /// Linear scan: a server typically sees a handful of clients per window.
    pub fn context_mut(&mut self, context: &MetricsContext) -> &mut ContextualizedUsageMetrics {
        let position = match self.contexts.iter().position(|c| &c.context == context) {
            Some(position) => position,
            None => {
                self.contexts
                    .push(ContextualizedUsageMetrics::new(context.clone()));
                self.contexts.len() - 1
            }
        };
        &mut self.contexts[position]
    }

    /// Record one field sample. A rejected duration leaves the model untouched,
    /// including the lazily created containers.
    pub fn record_field(
        &mut self,
        context: &MetricsContext,
        type_name: &str,
        field_name: &str,
        return_type: &str,
        duration: Duration,
        has_error: bool,
    ) -> Result<(), HistogramError> {
        Histogram::default().validate(duration.as_nanos() as f64)?;
        self.context_mut(context)
            .field_metrics_mut(type_name, field_name)
            .record(duration, has_error, return_type)
    }

    /// Record one operation sample. Same no-partial-update rule as
    /// [`record_field`](Self::record_field).
    pub fn record_operation(
        &mut self,
        context: &MetricsContext,
        hash: &str,
        duration: Duration,
        has_error: bool,
    ) -> Result<(), HistogramError> {
        Histogram::default().validate(duration.as_nanos() as f64)?;
        self.context_mut(context)
            .operation_metrics_mut(hash)
            .record(duration, has_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(name: &str) -> MetricsContext {
        MetricsContext::new(name, "1.0", "S1")
    }

    #[test]
    fn test_contexts_partition_by_all_three_keys() {
        let mut metrics = UsageMetrics::new();
        metrics.context_mut(&MetricsContext::new("A", "1.0", "S1"));
        metrics.context_mut(&MetricsContext::new("A", "1.0", "S1"));
        metrics.context_mut(&MetricsContext::new("A", "1.1", "S1"));
        metrics.context_mut(&MetricsContext::new("A", "1.0", "S2"));
        metrics.context_mut(&MetricsContext::new("", "", ""));
        assert_eq!(metrics.contexts.len(), 4);
    }

    #[test]
    fn test_record_field_counts_and_return_type() {
        let mut metrics = UsageMetrics::new();
        let c = ctx("A");
        metrics
            .record_field(&c, "Query", "user", "User", Duration::from_millis(5), false)
            .unwrap();
        metrics
            .record_field(&c, "Query", "user", "User!", Duration::from_millis(7), true)
            .unwrap();

        let field = metrics.context(&c).unwrap().field_metrics("Query", "user").unwrap();
        assert_eq!(field.count, 2);
        assert_eq!(field.error_count, 1);
        // last seen wins
        assert_eq!(field.return_type, "User!");
        assert_eq!(field.histogram.count(), 2);
    }

    #[test]
    fn test_record_operation() {
        let mut metrics = UsageMetrics::new();
        let c = ctx("A");
        metrics.record_operation(&c, "h1", Duration::from_millis(1), false).unwrap();
        metrics.record_operation(&c, "h1", Duration::from_millis(2), true).unwrap();
        metrics.record_operation(&c, "h2", Duration::from_millis(3), false).unwrap();

        let context = metrics.context(&c).unwrap();
        assert_eq!(context.operation_metrics("h1").unwrap().count, 2);
        assert_eq!(context.operation_metrics("h1").unwrap().error_count, 1);
        assert_eq!(context.operation_metrics("h2").unwrap().count, 1);
    }

    #[test]
    fn test_empty_until_first_sample() {
        let mut metrics = UsageMetrics::new();
        assert!(metrics.is_empty());
        metrics
            .record_operation(&ctx("A"), "h", Duration::ZERO, false)
            .unwrap();
        assert!(!metrics.is_empty());
    }

    #[test]
    fn test_wire_shape() {
        let mut metrics = UsageMetrics::new();
        let c = MetricsContext::new("A", "1.0", "S1");
        metrics
            .record_field(&c, "Query", "user", "User", Duration::from_millis(5), false)
            .unwrap();
        metrics
            .record_operation(&c, "abc", Duration::from_millis(9), true)
            .unwrap();

        let json = serde_json::to_value(&metrics).unwrap();
        assert!(json["timestamp"].is_string());

        let context = &json["contexts"][0];
        assert_eq!(context["context"]["clientName"], "A");
        assert_eq!(context["context"]["clientVersion"], "1.0");
        assert_eq!(context["context"]["serverVersion"], "S1");

        let user = &context["types"]["Query"]["user"];
        assert_eq!(user["returnType"], "User");
        assert_eq!(user["count"], 1);
        assert_eq!(user["errorCount"], 0);
        assert_eq!(user["histogram"]["counts"], serde_json::json!([1]));
        assert_eq!(user["histogram"]["indexes"].as_array().unwrap().len(), 1);

        let operation = &context["operations"]["abc"];
        assert_eq!(operation["count"], 1);
        assert_eq!(operation["errorCount"], 1);
    }
}
