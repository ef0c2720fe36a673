//! Configuration file watcher for runtime logging toggles.
//!
//! Only the `[logging]` section is applied on reload; every other section
//! is read once at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::LoggingConfig;
use crate::observability::logging::Logger;

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<LoggingConfig>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for logging section updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<LoggingConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx;
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    match load_config(&path) {
                        Ok(new_config) => {
                            let _ = tx.send(new_config.logging);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to reload config, keeping current logging settings");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Apply reloaded logging settings until the sender side is dropped.
pub async fn apply_logging_updates(
    logger: Logger,
    mut updates: mpsc::UnboundedReceiver<LoggingConfig>,
) {
    while let Some(update) = updates.recv().await {
        if update.enabled != logger.is_enabled() {
            // announce before muting, otherwise the record is swallowed
            tracing::info!(enabled = update.enabled, "Logging toggled by config reload");
            logger.set_enabled(update.enabled);
        }
    }
}
