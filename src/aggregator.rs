//! The aggregation task.
//!
//! Producers (resolvers, request handlers) hand samples over through two
//! bounded queues without ever blocking: a full queue drops the sample and
//! logs a warning. A single task owns the in-memory model, folds samples
//! in, and on every tick swaps the model for a fresh one and passes the old
//! one to the [`SnapshotSink`].
//!
//! Shutdown closes the queues, drains whatever they still hold, flushes once
//! more and then waits for the sink.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::client::ClientDetails;
use crate::config::Configuration;
use crate::error::{AggregatorError, DeliveryError, SenderError};
use crate::logging::SharedLogger;
use crate::metrics::{
    DefinitionRegistry, FieldMessage, MetricsContext, OperationMessage, UsageDefinitions,
    UsageMetrics,
};
use crate::sender::Sender;

/// Where flushed snapshots go.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    /// Hand over a non-empty metrics snapshot. Must not block.
    fn send_metrics(&self, metrics: UsageMetrics);

    /// Hand over newly discovered definitions. Must not block.
    fn send_definitions(&self, definitions: UsageDefinitions);

    /// Wait for everything handed over so far.
    async fn stop(&self) -> Result<(), SenderError>;
}

// ─── Lifecycle ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    /// Created, queues accept and buffer samples, nothing is consumed.
    Idle = 0,
    Running = 1,
    /// Queues closed, remaining samples being folded in.
    Draining = 2,
    /// Final snapshot handed to the sink, waiting on it.
    Flushed = 3,
    Stopped = 4,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Draining,
            3 => Self::Flushed,
            _ => Self::Stopped,
        }
    }
}

/// Outcome of a non-blocking submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Queued,
    /// Introspection sample, never recorded.
    Filtered,
    /// Queue full; the sample was discarded.
    Dropped,
    /// The aggregator is shutting down or stopped.
    Closed,
}

struct Queues {
    fields: mpsc::Receiver<FieldMessage>,
    operations: mpsc::Receiver<OperationMessage>,
}

enum Lifecycle {
    Idle(Queues),
    Running {
        stop_tx: oneshot::Sender<()>,
        handle: JoinHandle<()>,
    },
    Stopped,
}

// ─── Aggregation state ───────────────────────────────────────────

/// Everything the aggregation task owns.
struct AggregationState {
    metrics: UsageMetrics,
    registry: DefinitionRegistry,
    server_version: String,
    logger: SharedLogger,
}

impl AggregationState {
    fn new(server_version: String, logger: SharedLogger) -> Self {
        Self {
            metrics: UsageMetrics::new(),
            registry: DefinitionRegistry::new(),
            server_version,
            logger,
        }
    }

    fn context(&self, client: &ClientDetails) -> MetricsContext {
        MetricsContext::new(&client.name, &client.version, &self.server_version)
    }

    fn process_field(&mut self, msg: FieldMessage) {
        let context = self.context(&msg.client);
        let result = self.metrics.record_field(
            &context,
            &msg.type_name,
            &msg.field_name,
            &msg.return_type,
            msg.duration,
            msg.error.is_some(),
        );
        if let Err(err) = result {
            self.logger.error(
                "unable to record field sample",
                &[("type", &msg.type_name), ("field", &msg.field_name), ("error", &err)],
            );
        }
    }

    fn process_operation(&mut self, msg: OperationMessage) {
        if self.registry.observe(&msg.name, &msg.hash, &msg.signature) {
            self.logger.debug(
                "new operation definition",
                &[("operation", &msg.name), ("hash", &msg.hash)],
            );
        }

        let context = self.context(&msg.client);
        let result = self
            .metrics
            .record_operation(&context, &msg.hash, msg.duration, msg.has_errors);
        if let Err(err) = result {
            self.logger.error(
                "unable to record operation sample",
                &[("operation", &msg.name), ("error", &err)],
            );
        }
    }

    /// Swap the window out and hand it to `sink`. Empty windows are never sent.
    fn flush(&mut self, sink: &dyn SnapshotSink) {
        let now = Utc::now();

        if !self.metrics.is_empty() {
            let mut metrics = std::mem::take(&mut self.metrics);
            metrics.timestamp = now;
            self.logger
                .debug("flushing metrics", &[("contexts", &metrics.contexts.len())]);
            sink.send_metrics(metrics);
        }

        if let Some(mut definitions) = self.registry.take_pending() {
            definitions.timestamp = now;
            self.logger.debug(
                "flushing definitions",
                &[("operations", &definitions.operations.len())],
            );
            sink.send_definitions(definitions);
        }
    }

    /// Fold in whatever is still queued. The queues are closed first so
    /// nothing can slip in behind the drain.
    fn drain(&mut self, queues: &mut Queues) {
        queues.fields.close();
        queues.operations.close();

        let mut drained = 0usize;
        while let Ok(msg) = queues.fields.try_recv() {
            self.process_field(msg);
            drained += 1;
        }
        while let Ok(msg) = queues.operations.try_recv() {
            self.process_operation(msg);
            drained += 1;
        }
        self.logger.debug("queues drained", &[("messages", &drained)]);
    }
}

// ─── Aggregator ──────────────────────────────────────────────────

pub struct Aggregator {
    field_tx: mpsc::Sender<FieldMessage>,
    operation_tx: mpsc::Sender<OperationMessage>,
    lifecycle: Mutex<Lifecycle>,
    phase: Arc<AtomicU8>,
    sink: Arc<dyn SnapshotSink>,
    flush_interval: Duration,
    server_version: String,
    logger: SharedLogger,
}

impl Aggregator {
    pub fn new(config: &Configuration, sink: Arc<dyn SnapshotSink>) -> Self {
        let (field_tx, fields) = mpsc::channel(config.field_queue_capacity.max(1));
        let (operation_tx, operations) = mpsc::channel(config.operation_queue_capacity.max(1));

        Self {
            field_tx,
            operation_tx,
            lifecycle: Mutex::new(Lifecycle::Idle(Queues { fields, operations })),
            phase: Arc::new(AtomicU8::new(Phase::Idle as u8)),
            sink,
            // A zero period would make the ticker panic.
            flush_interval: config.flush_interval.max(Duration::from_millis(1)),
            server_version: config.server_version.clone(),
            logger: Arc::clone(&config.logger),
        }
    }

    /// An aggregator reporting over HTTP to the configured collector.
    pub fn with_http_sender(config: &Configuration) -> Result<Self, DeliveryError> {
        let sender = Sender::new(config)?;
        Ok(Self::new(config, Arc::new(sender)))
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Spawn the aggregation task. Must be called within a Tokio runtime.
    pub fn start(&self) -> Result<(), AggregatorError> {
        let mut lifecycle = self.lifecycle.lock();
        let queues = match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Idle(queues) => queues,
            running @ Lifecycle::Running { .. } => {
                *lifecycle = running;
                return Err(AggregatorError::AlreadyStarted);
            }
            Lifecycle::Stopped => return Err(AggregatorError::AlreadyStopped),
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        let state = AggregationState::new(self.server_version.clone(), Arc::clone(&self.logger));
        let handle = tokio::spawn(run(
            state,
            queues,
            stop_rx,
            self.flush_interval,
            Arc::clone(&self.sink),
            Arc::clone(&self.phase),
        ));

        *lifecycle = Lifecycle::Running { stop_tx, handle };
        self.phase.store(Phase::Running as u8, Ordering::Release);
        self.logger.debug(
            "aggregator started",
            &[("flush_interval_ms", &self.flush_interval.as_millis())],
        );
        Ok(())
    }

    /// Enqueue a field sample without waiting.
    pub fn push_field(&self, msg: FieldMessage) -> Submission {
        if msg.is_reserved() {
            return Submission::Filtered;
        }
        match self.field_tx.try_send(msg) {
            Ok(()) => Submission::Queued,
            Err(TrySendError::Full(msg)) => {
                self.logger.warn(
                    "field queue is full, dropping message",
                    &[("type", &msg.type_name), ("field", &msg.field_name)],
                );
                Submission::Dropped
            }
            Err(TrySendError::Closed(msg)) => {
                self.logger.debug(
                    "aggregator stopped, rejecting field message",
                    &[("type", &msg.type_name), ("field", &msg.field_name)],
                );
                Submission::Closed
            }
        }
    }

    /// Enqueue an operation sample without waiting.
    pub fn push_operation(&self, msg: OperationMessage) -> Submission {
        match self.operation_tx.try_send(msg) {
            Ok(()) => Submission::Queued,
            Err(TrySendError::Full(msg)) => {
                self.logger.warn(
                    "operation queue is full, dropping message",
                    &[("operation", &msg.name), ("hash", &msg.hash)],
                );
                Submission::Dropped
            }
            Err(TrySendError::Closed(msg)) => {
                self.logger.debug(
                    "aggregator stopped, rejecting operation message",
                    &[("operation", &msg.name)],
                );
                Submission::Closed
            }
        }
    }

    /// Drain, flush a last time, then stop the sink.
    ///
    /// Works from `Idle` too: samples buffered before `start` are still
    /// reported. A second call fails with [`AggregatorError::AlreadyStopped`].
    pub async fn stop(&self) -> Result<(), AggregatorError> {
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Stopped);
        self.logger.debug("stopping aggregator", &[]);

        match previous {
            Lifecycle::Idle(mut queues) => {
                self.phase.store(Phase::Draining as u8, Ordering::Release);
                let mut state =
                    AggregationState::new(self.server_version.clone(), Arc::clone(&self.logger));
                state.drain(&mut queues);
                state.flush(self.sink.as_ref());
                self.phase.store(Phase::Flushed as u8, Ordering::Release);
            }
            Lifecycle::Running { stop_tx, handle } => {
                // The task also stops if this send fails: the receiver resolves either way.
                let _ = stop_tx.send(());
                if let Err(err) = handle.await {
                    // Snapshots flushed before the failure are still waited on.
                    if let Err(stop_err) = self.sink.stop().await {
                        self.logger.error("unable to stop sender", &[("error", &stop_err)]);
                    }
                    self.phase.store(Phase::Stopped as u8, Ordering::Release);
                    return Err(AggregatorError::Task(err.to_string()));
                }
            }
            Lifecycle::Stopped => return Err(AggregatorError::AlreadyStopped),
        }

        let result = self.sink.stop().await;
        self.phase.store(Phase::Stopped as u8, Ordering::Release);
        result.map_err(AggregatorError::from)
    }
}

async fn run(
    mut state: AggregationState,
    mut queues: Queues,
    mut stop_rx: oneshot::Receiver<()>,
    flush_interval: Duration,
    sink: Arc<dyn SnapshotSink>,
    phase: Arc<AtomicU8>,
) {
    // First tick one full interval from now, not immediately.
    let mut ticker = interval_at(Instant::now() + flush_interval, flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            Some(msg) = queues.fields.recv() => state.process_field(msg),
            Some(msg) = queues.operations.recv() => state.process_operation(msg),
            _ = ticker.tick() => state.flush(sink.as_ref()),
            _ = &mut stop_rx => break,
        }
    }

    phase.store(Phase::Draining as u8, Ordering::Release);
    state.drain(&mut queues);
    state.flush(sink.as_ref());
    phase.store(Phase::Flushed as u8, Ordering::Release);
}
