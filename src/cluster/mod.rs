//! Cluster participation for this node.
//!
//! # Responsibilities
//! - Track the plugins this node serves (fed by plugin manager registrations)
//! - Run the heartbeat loop on the worker pool
//! - Leave the cluster on close and signal the one-shot stop notification
//!
//! # Data Flow
//! ```text
//! close() ──trigger──▶ heartbeat loop exits ──▶ leave() ──▶ StopHandle::notify
//!                                                              │
//! notify_stopped() ◀──────────── StopNotification ◀────────────┘
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time;

use crate::config::ClusterConfig;
use crate::lifecycle::shutdown::{Shutdown, StopHandle, StopNotification};
use crate::observability::metrics;
use crate::plugin::{PluginDeclaration, PluginManager};
use crate::pool::WorkerPool;

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("cluster already launched")]
    AlreadyLaunched,
}

#[derive(Debug)]
pub struct Cluster {
    node_id: String,
    heartbeat_interval: Duration,
    manager: Arc<PluginManager>,
    pool: WorkerPool,
    plugins: DashMap<String, PluginDeclaration>,
    shutdown: Shutdown,
    stopped: StopHandle,
    launched: AtomicBool,
    closed: AtomicBool,
    heartbeats: AtomicU64,
}

impl Cluster {
    pub fn new(config: &ClusterConfig, manager: Arc<PluginManager>, pool: WorkerPool) -> Self {
        let node_id = config
            .node_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Self {
            node_id,
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
            manager,
            pool,
            plugins: DashMap::new(),
            shutdown: Shutdown::new(),
            stopped: StopHandle::new(),
            launched: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            heartbeats: AtomicU64::new(0),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn manager(&self) -> &Arc<PluginManager> {
        &self.manager
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    pub fn has_plugin(&self, identity: &str) -> bool {
        self.plugins.contains_key(identity)
    }

    pub fn heartbeats(&self) -> u64 {
        self.heartbeats.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Serve `plugin` from this node.
    pub fn register_plugin(&self, plugin: &PluginDeclaration) {
        self.plugins.insert(plugin.identity(), plugin.clone());
        metrics::record_registered_plugins(self.plugins.len());
        tracing::debug!(node = %self.node_id, plugin = %plugin.identity(), "Plugin joined cluster");
    }

    /// Join the cluster and start heartbeating.
    pub fn launch(self: Arc<Self>) -> Result<(), ClusterError> {
        // subscribe before the closed check so a concurrent close is not lost
        let mut closing = self.shutdown.subscribe();
        if self.launched.swap(true, Ordering::SeqCst) {
            return Err(ClusterError::AlreadyLaunched);
        }
        if self.is_closed() {
            self.leave();
            return Ok(());
        }

        tracing::info!(node = %self.node_id, plugins = self.plugin_count(), "Cluster launched");
        let cluster = self.clone();
        self.pool.spawn("cluster-heartbeat", async move {
            let mut ticker = time::interval(cluster.heartbeat_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => cluster.beat(),
                    _ = closing.recv() => break,
                }
            }
            cluster.leave();
        });
        Ok(())
    }

    /// Request the node to leave. Returns immediately; completion is
    /// reported through [`Cluster::notify_stopped`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(node = %self.node_id, "Cluster close requested");
        self.shutdown.trigger();
        if !self.launched.load(Ordering::SeqCst) {
            self.leave();
        }
    }

    pub fn notify_stopped(&self) -> StopNotification {
        self.stopped.subscribe()
    }

    fn beat(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(node = %self.node_id, plugins = self.plugin_count(), "Cluster heartbeat");
    }

    fn leave(&self) {
        if self.stopped.is_stopped() {
            return;
        }
        self.plugins.clear();
        metrics::record_registered_plugins(0);
        tracing::info!(node = %self.node_id, "Node left cluster");
        self.stopped.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginConfig;
    use crate::storage::{LocalStorage, SharedStorage};

    fn cluster(dir: &tempfile::TempDir) -> Arc<Cluster> {
        let storage: SharedStorage = Arc::new(LocalStorage::new(dir.path().to_str().unwrap()).unwrap());
        let manager = Arc::new(PluginManager::new(storage, &PluginConfig::default()));
        let pool = WorkerPool::new(4, None).unwrap();
        let config = ClusterConfig {
            node_id: Some("node-1".into()),
            heartbeat_interval_secs: 1,
        };
        Arc::new(Cluster::new(&config, manager, pool))
    }

    #[tokio::test]
    async fn test_close_after_launch_notifies_stop() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = cluster(&dir);
        cluster.register_plugin(&PluginDeclaration::new("a", "b", "1"));
        assert!(cluster.has_plugin("a/b:1"));

        cluster.clone().launch().unwrap();
        let stopped = cluster.notify_stopped();
        assert!(!stopped.is_stopped());

        cluster.close();
        time::timeout(Duration::from_secs(2), stopped.wait()).await.unwrap();
        assert_eq!(cluster.plugin_count(), 0);
    }

    #[tokio::test]
    async fn test_close_before_launch_stops_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = cluster(&dir);

        cluster.close();
        cluster.close();
        assert!(cluster.notify_stopped().is_stopped());
        // launching a closed cluster does not start heartbeating
        cluster.clone().launch().unwrap();
        assert_eq!(cluster.heartbeats(), 0);
    }

    #[tokio::test]
    async fn test_double_launch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = cluster(&dir);

        cluster.clone().launch().unwrap();
        assert!(matches!(
            cluster.clone().launch(),
            Err(ClusterError::AlreadyLaunched)
        ));
        cluster.close();
    }

    #[test]
    fn test_node_id_generated_when_unset() {
        let dir = tempfile::tempdir().unwrap();
        let storage: SharedStorage = Arc::new(LocalStorage::new(dir.path().to_str().unwrap()).unwrap());
        let manager = Arc::new(PluginManager::new(storage, &PluginConfig::default()));
        let pool = WorkerPool::new(1, None).unwrap();

        let cluster = Cluster::new(&ClusterConfig::default(), manager, pool);
        assert!(uuid::Uuid::parse_str(cluster.node_id()).is_ok());
    }
}
