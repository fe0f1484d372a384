//! Logging capability used by the pipeline.
//!
//! The pipeline never talks to a global logger directly: every component
//! receives an `Arc<dyn Logger>` from the [`Configuration`](crate::Configuration).
//! The default [`TracingLogger`] forwards to `tracing`, so an application
//! that already installs a subscriber gets pipeline diagnostics for free.

use std::fmt;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

/// One structured key/value pair attached to a log line.
pub type Field<'a> = (&'static str, &'a dyn fmt::Display);

/// Leveled logging capability.
pub trait Logger: Send + Sync {
    fn debug(&self, message: &str, fields: &[Field<'_>]);
    fn info(&self, message: &str, fields: &[Field<'_>]);
    fn warn(&self, message: &str, fields: &[Field<'_>]);
    fn error(&self, message: &str, fields: &[Field<'_>]);
}

pub type SharedLogger = Arc<dyn Logger>;

/// Renders fields as `key=value key=value`.
struct DisplayFields<'a>(&'a [Field<'a>]);

impl fmt::Display for DisplayFields<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

/// Default [`Logger`] backed by `tracing`.
///
/// `debug` lines are suppressed unless the configuration's debug toggle is on,
/// regardless of the subscriber's filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger {
    debug: bool,
}

impl TracingLogger {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }
}

impl Logger for TracingLogger {
    fn debug(&self, message: &str, fields: &[Field<'_>]) {
        if self.debug {
            tracing::debug!(target: "graphql_usage", fields = %DisplayFields(fields), "{message}");
        }
    }

    fn info(&self, message: &str, fields: &[Field<'_>]) {
        tracing::info!(target: "graphql_usage", fields = %DisplayFields(fields), "{message}");
    }

    fn warn(&self, message: &str, fields: &[Field<'_>]) {
        tracing::warn!(target: "graphql_usage", fields = %DisplayFields(fields), "{message}");
    }

    fn error(&self, message: &str, fields: &[Field<'_>]) {
        tracing::error!(target: "graphql_usage", fields = %DisplayFields(fields), "{message}");
    }
}

/// Install a global fmt subscriber. Meant for binaries and demos only; a
/// library embedding the pipeline should leave subscriber setup to its host.
///
/// `RUST_LOG` wins when set. Returns `false` if a subscriber was already set.
pub fn init_tracing(debug: bool) -> bool {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .try_init()
        .is_ok()
}
