//! Delivery of flushed snapshots to the collector.
//!
//! Every snapshot becomes one gzip-compressed JSON POST, run on its own
//! tracked task so the aggregation loop never waits on the network.
//! Failures are retried with capped exponential backoff and, once given up
//! on, end as a single error log line.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use serde::Serialize;
use tokio_util::task::TaskTracker;

use crate::aggregator::SnapshotSink;
use crate::config::Configuration;
use crate::error::{DeliveryError, SenderError};
use crate::logging::SharedLogger;
use crate::metrics::{UsageDefinitions, UsageMetrics};

pub const API_KEY_HEADER: &str = "x-api-key";
const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Capped exponential backoff: retry `n` waits `min(wait_min * 2^(n-1), wait_max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub wait_min: Duration,
    pub wait_max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Configuration) -> Self {
        Self {
            max_retries: config.max_retries,
            wait_min: config.retry_wait_min,
            wait_max: config.retry_wait_max,
        }
    }

    /// Initial attempt plus retries.
    pub fn max_attempts(&self) -> usize {
        self.max_retries.saturating_add(1)
    }

    /// Wait before retry number `retry` (1-based).
    pub fn backoff(&self, retry: usize) -> Duration {
        let shift = u32::try_from(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        let factor = 1u32.checked_shl(shift).unwrap_or(u32::MAX);
        self.wait_min.saturating_mul(factor).min(self.wait_max)
    }
}

/// Serialize `payload` as JSON and gzip it.
pub fn encode<T: Serialize>(payload: &T) -> Result<Vec<u8>, DeliveryError> {
    let json = serde_json::to_vec(payload)?;
    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 4), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

struct Endpoint {
    client: Client,
    api_key: String,
    user_agent: String,
    retry: RetryPolicy,
    logger: SharedLogger,
}

impl Endpoint {
    async fn deliver<T: Serialize>(&self, url: &str, payload: &T) {
        let result = match encode(payload) {
            Ok(body) => self.post_with_retry(url, body).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(attempts) => {
                self.logger.debug(
                    "reporting request sent",
                    &[("url", &url), ("attempts", &attempts)],
                );
            }
            Err(err) => {
                self.logger
                    .error("unable to send reporting request", &[("error", &err), ("url", &url)]);
            }
        }
    }

    /// Returns the number of attempts it took.
    async fn post_with_retry(&self, url: &str, body: Vec<u8>) -> Result<usize, DeliveryError> {
        let attempts = self.retry.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self.post(url, body.clone()).await {
                Ok(()) => return Ok(attempt),
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= attempts {
                return Err(DeliveryError::Exhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let wait = self.retry.backoff(attempt);
            self.logger.debug(
                "retrying reporting request",
                &[("url", &url), ("attempt", &attempt), ("error", &err), ("wait_ms", &wait.as_millis())],
            );
            tokio::time::sleep(wait).await;
        }
    }

    async fn post(&self, url: &str, body: Vec<u8>) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_ENCODING, "gzip")
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .header(USER_AGENT, &self.user_agent)
            .header(API_KEY_HEADER, &self.api_key)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status {
                status: status.as_u16(),
            })
        }
    }
}

/// Ships snapshots on background tasks and waits for them on [`stop`](Sender::stop).
pub struct Sender {
    endpoint: Arc<Endpoint>,
    tracker: TaskTracker,
    metrics_url: Arc<str>,
    definitions_url: Arc<str>,
    stop_timeout: Duration,
    logger: SharedLogger,
}

impl Sender {
    pub fn new(config: &Configuration) -> Result<Self, DeliveryError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        let base = config.reporting_url();

        Ok(Self {
            endpoint: Arc::new(Endpoint {
                client,
                api_key: config.api_key.clone(),
                user_agent: config.user_agent(),
                retry: RetryPolicy::from_config(config),
                logger: Arc::clone(&config.logger),
            }),
            tracker: TaskTracker::new(),
            metrics_url: format!("{base}/metrics").into(),
            definitions_url: format!("{base}/definitions").into(),
            stop_timeout: config.stop_timeout,
            logger: Arc::clone(&config.logger),
        })
    }

    pub fn metrics_url(&self) -> &str {
        &self.metrics_url
    }

    pub fn definitions_url(&self) -> &str {
        &self.definitions_url
    }

    /// Deliveries still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn send_metrics(&self, metrics: UsageMetrics) {
        if !self.accepting("metrics") {
            return;
        }
        let endpoint = Arc::clone(&self.endpoint);
        let url = Arc::clone(&self.metrics_url);
        self.tracker.spawn(async move {
            endpoint.deliver(&url, &metrics).await;
        });
    }

    pub fn send_definitions(&self, definitions: UsageDefinitions) {
        if !self.accepting("definitions") {
            return;
        }
        let endpoint = Arc::clone(&self.endpoint);
        let url = Arc::clone(&self.definitions_url);
        self.tracker.spawn(async move {
            endpoint.deliver(&url, &definitions).await;
        });
    }

    /// Once stopped, snapshots are dropped instead of spawned.
    fn accepting(&self, kind: &'static str) -> bool {
        if self.tracker.is_closed() {
            self.logger.warn("sender stopped, dropping snapshot", &[("kind", &kind)]);
            return false;
        }
        true
    }

    /// Wait for every in-flight delivery, up to the stop timeout. Deliveries
    /// still running after the timeout are left to finish on their own.
    pub async fn stop(&self) -> Result<(), SenderError> {
        self.logger.debug("stopping sender", &[("in_flight", &self.tracker.len())]);
        self.tracker.close();

        match tokio::time::timeout(self.stop_timeout, self.tracker.wait()).await {
            Ok(()) => Ok(()),
            Err(_) => {
                self.logger.error(
                    "sending remaining requests timed out",
                    &[("timeout_ms", &self.stop_timeout.as_millis())],
                );
                Err(SenderError::StopTimeout(self.stop_timeout))
            }
        }
    }
}

#[async_trait]
impl SnapshotSink for Sender {
    fn send_metrics(&self, metrics: UsageMetrics) {
        Sender::send_metrics(self, metrics);
    }

    fn send_definitions(&self, definitions: UsageDefinitions) {
        Sender::send_definitions(self, definitions);
    }

    async fn stop(&self) -> Result<(), SenderError> {
        Sender::stop(self).await
    }
}
