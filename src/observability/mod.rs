//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events → layer.rs (SinkLayer) → logging.rs (Logger)
//!         → file sink (plain)  logs/app.log
//!         → console sink (ANSI colored) stdout
//!     → metrics.rs (counters, gauges)
//!     → telemetry.rs (pool panic reports)
//! ```
//!
//! # Design Decisions
//! - Exactly one Logger per process, installed before any subsystem starts
//! - `LOG_LEVEL` gates records; `RUST_LOG` narrows noisy dependency targets
//! - Metrics are cheap (atomic increments) and opt-in for exposition

pub mod layer;
pub mod logging;
pub mod metrics;
pub mod telemetry;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::observability::layer::SinkLayer;
use crate::observability::logging::{Logger, LoggingError};

pub use logging::{global, install, Level};

/// Target directives used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,plugin_daemon=debug,tower_http=info";

/// Open the sinks, install the process logger and route `tracing` into it.
pub fn init(config: &LoggingConfig) -> Result<Logger, LoggingError> {
    let logger = Logger::open(config)?;
    install(logger.clone())?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(SinkLayer::new(logger.clone()))
        .try_init()?;

    Ok(logger)
}
