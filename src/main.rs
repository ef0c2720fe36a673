//! Plugin daemon
//!
//! # Architecture Overview
//!
//! ```text
//!   config.toml ──▶ config ──▶ App::start
//!                                 │
//!       ┌─────────────────────────┼────────────────────────────┐
//!       ▼          ▼              ▼             ▼              ▼
//!     pool ──▶ database ──▶ storage ──▶ plugin manager ──▶ cluster
//!                               │             │ registrations  │
//!                               ▼             └───────────────▶│
//!                          persistence                        ▼
//!                                                        http server
//!
//!   SIGINT/SIGTERM ──▶ App::wait_for_signal ──▶ cluster.close()
//!                                           ◀── stop notification
//! ```
//!
//! Every record goes through the observability logger: colored on the
//! console, plain in `logs/app.log`. A fatal error is written at PANIC level
//! and the process exits with status 1.

use std::path::PathBuf;
use std::process;

use clap::Parser;

use plugin_daemon::config::watcher::{apply_logging_updates, ConfigWatcher};
use plugin_daemon::config::{self, ConfigError, DaemonConfig, LoggingConfig};
use plugin_daemon::error::{Context, Fatal, Stage};
use plugin_daemon::lifecycle::{signals, LifecycleError};
use plugin_daemon::observability::{self, logging::Logger, metrics, telemetry, Level};
use plugin_daemon::{App, DaemonSubsystems};

#[derive(Debug, Parser)]
#[command(name = "plugin-daemon", version, about = "Plugin hosting daemon")]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Minimum log level, overrides LOG_LEVEL.
    #[arg(long)]
    log_level: Option<Level>,

    /// Reload the [logging] section when the config file changes.
    #[arg(long, requires = "config")]
    watch: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded: Result<DaemonConfig, ConfigError> = match &cli.config {
        Some(path) => config::load_config(path),
        None => Ok(DaemonConfig::default()),
    };
    let logging = match &loaded {
        Ok(config) => config.logging.clone(),
        Err(_) => LoggingConfig::default(),
    };

    let logger = match observability::init(&logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("failed to initialize logging: {e}");
            process::exit(1);
        }
    };
    if let Some(level) = cli.log_level {
        logger.set_min_level(level);
    }

    let config = match loaded.stage(Stage::Config) {
        Ok(config) => config,
        Err(fatal) => exit_fatal(&logger, &fatal),
    };

    tracing::info!(
        bind_address = %config.server.bind_address,
        storage = %config.storage.kind,
        pool_size = config.pool.size,
        "plugin-daemon v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    // flushes pending events on drop
    let _sentry = if config.telemetry.enabled {
        match telemetry::init(&config.telemetry).stage(Stage::Telemetry) {
            Ok(guard) => Some(guard),
            Err(fatal) => exit_fatal(&logger, &fatal),
        }
    } else {
        None
    };

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    // keep the watcher alive for the life of the process
    let _watcher = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(watcher) => {
                    tokio::spawn(apply_logging_updates(logger.clone(), updates));
                    Some(watcher)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable");
                    None
                }
            }
        }
        _ => None,
    };

    let mut app = App::new(DaemonSubsystems::new());
    if let Err(fatal) = app.start(&config).await {
        exit_fatal(&logger, &fatal);
    }

    let mut signals = match signals::listen()
        .map_err(LifecycleError::from)
        .stage(Stage::Shutdown)
    {
        Ok(signals) => signals,
        Err(fatal) => exit_fatal(&logger, &fatal),
    };

    if let Err(fatal) = app.wait_for_signal(&mut signals, &config.shutdown).await {
        exit_fatal(&logger, &fatal);
    }
}

/// Write `fatal` at PANIC level to both sinks, then exit with status 1.
#[track_caller]
fn exit_fatal(logger: &Logger, fatal: &Fatal) -> ! {
    logger.fatal(fatal);
    process::exit(1);
}
