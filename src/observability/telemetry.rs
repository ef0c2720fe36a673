//! Error tracking for worker panics, backed by Sentry.
//!
//! # Data Flow
//! ```text
//! main → telemetry::init (sentry client, guard held for the process)
//! pool task panics
//!     → PanicReporter::report → Sentry event tagged with task / spawn site
//! pool task finishes
//!     → PanicReporter::start_task transaction (sampled by traces_sample_rate)
//! ```

use std::fmt;
use std::sync::Arc;

use sentry::protocol::{Event, Level as SentryLevel};
use sentry::types::{Dsn, ParseDsnError};
use sentry::{ClientInitGuard, ClientOptions, Hub, Transaction, TransactionContext};

use crate::config::TelemetryConfig;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid sentry dsn: {0}")]
    InvalidDsn(#[from] ParseDsnError),
}

/// Client options for `config`. An empty DSN yields a disabled client.
pub fn client_options(config: &TelemetryConfig) -> Result<ClientOptions, TelemetryError> {
    let dsn = match config.dsn.trim() {
        "" => None,
        raw => Some(raw.parse::<Dsn>()?),
    };
    let traces_sample_rate = if config.tracing_enabled {
        config.traces_sample_rate as f32
    } else {
        0.0
    };

    Ok(ClientOptions {
        dsn,
        attach_stacktrace: config.attach_stacktrace,
        sample_rate: config.sample_rate as f32,
        traces_sample_rate,
        release: sentry::release_name!(),
        ..ClientOptions::default()
    })
}

/// Initialize the Sentry client. Errors are flushed when the guard drops,
/// so it must live as long as the process.
pub fn init(config: &TelemetryConfig) -> Result<ClientInitGuard, TelemetryError> {
    let options = client_options(config)?;
    let active = options.dsn.is_some();
    let guard = sentry::init(options);
    if active {
        tracing::info!(sample_rate = config.sample_rate, "Sentry error tracking enabled");
    } else {
        tracing::warn!("Telemetry enabled without a DSN, events are dropped");
    }
    Ok(guard)
}

/// One captured panic from a pool task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicReport {
    pub task: String,
    pub message: String,
    /// Source location that spawned the task.
    pub spawned_at: Option<String>,
}

/// Sends pool panics to the hub that was current at construction.
#[derive(Clone)]
pub struct PanicReporter {
    hub: Arc<Hub>,
}

impl fmt::Debug for PanicReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanicReporter")
            .field("client", &self.hub.client().is_some())
            .finish()
    }
}

impl PanicReporter {
    pub fn new() -> Self {
        Self {
            hub: Hub::current(),
        }
    }

    /// Capture `report` as an error event.
    pub fn report(&self, report: PanicReport) {
        let mut event = Event {
            message: Some(format!("Pool task panicked: {}", report.message)),
            level: SentryLevel::Error,
            logger: Some("plugin_daemon::pool".into()),
            ..Event::default()
        };
        event.tags.insert("task".into(), report.task);
        if let Some(spawned_at) = report.spawned_at {
            event.tags.insert("spawned_at".into(), spawned_at);
        }
        self.hub.capture_event(event);
    }

    /// Open a performance transaction around one pool task.
    pub fn start_task(&self, task: &str) -> Transaction {
        self.hub
            .start_transaction(TransactionContext::new(task, "pool.task"))
    }
}

impl Default for PanicReporter {
    fn default() -> Self {
        Self::new()
    }
}
