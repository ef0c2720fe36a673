//! Shared utilities for integration tests.

use std::sync::Arc;

use plugin_daemon::config::DaemonConfig;
use plugin_daemon::plugin::{PluginDeclaration, PluginManager};
use plugin_daemon::storage::{LocalStorage, SharedStorage};
use tempfile::TempDir;

/// Config rooted in `dir` with an ephemeral HTTP port.
pub fn test_config(dir: &TempDir) -> DaemonConfig {
    let mut config = DaemonConfig::default();
    config.server.bind_address = "127.0.0.1:0".into();
    config.pool.size = 16;
    config.storage.kind = "local".into();
    config.storage.local.root = dir.path().join("storage").to_string_lossy().into_owned();
    config.logging.directory = dir.path().join("logs").to_string_lossy().into_owned();
    config
}

/// Install plugins into the storage `config` points at, as a previous run would have.
pub async fn preinstall(config: &DaemonConfig, plugins: &[(&str, &str, &str)]) {
    let storage: SharedStorage = Arc::new(LocalStorage::new(&config.storage.local.root).unwrap());
    let manager = PluginManager::new(storage, &config.plugin);
    for (author, name, version) in plugins {
        manager
            .install(PluginDeclaration::new(author, name, version), b"package")
            .await
            .unwrap();
    }
}
