//! Production wiring of the startup steps.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::cluster::Cluster;
use crate::config::{DaemonConfig, DatabaseConfig, PoolConfig, StorageConfig};
use crate::db::Database;
use crate::error::Error;
use crate::http::HttpServer;
use crate::lifecycle::shutdown::StopNotification;
use crate::lifecycle::{ClusterHandle, LifecycleState, PluginManagerHandle, Subsystems};
use crate::observability::telemetry::PanicReporter;
use crate::persistence::Persistence;
use crate::plugin::{PluginDeclaration, PluginManager, RegisterHandler};
use crate::pool::{PoolError, WorkerPool};
use crate::storage::{self, SharedStorage};

/// Handles produced while starting, kept for the life of the process.
#[derive(Debug)]
pub struct DaemonSubsystems {
    pool: OnceLock<WorkerPool>,
    database: OnceLock<Database>,
    persistence: OnceLock<Persistence>,
    server_addr: OnceLock<SocketAddr>,
    lifecycle: watch::Sender<LifecycleState>,
}

impl DaemonSubsystems {
    pub fn new() -> Self {
        let (lifecycle, _) = watch::channel(LifecycleState::Uninitialized);
        Self {
            pool: OnceLock::new(),
            database: OnceLock::new(),
            persistence: OnceLock::new(),
            server_addr: OnceLock::new(),
            lifecycle,
        }
    }

    pub fn pool(&self) -> Option<&WorkerPool> {
        self.pool.get()
    }

    pub fn database(&self) -> Option<&Database> {
        self.database.get()
    }

    pub fn persistence(&self) -> Option<&Persistence> {
        self.persistence.get()
    }

    /// Address the HTTP server is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server_addr.get().copied()
    }
}

impl Default for DaemonSubsystems {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Subsystems for DaemonSubsystems {
    type Manager = PluginManager;
    type Cluster = Cluster;

    fn init_pool(&self, config: &PoolConfig, reporter: Option<PanicReporter>) -> Result<(), Error> {
        let pool = WorkerPool::new(config.size, reporter)?;
        let _ = self.pool.set(pool);
        Ok(())
    }

    async fn init_database(&self, config: &DatabaseConfig) -> Result<(), Error> {
        let database = Database::connect(config).await?;
        let _ = self.database.set(database);
        Ok(())
    }

    fn init_storage(&self, config: &StorageConfig) -> Result<SharedStorage, Error> {
        Ok(storage::select_storage(config)?)
    }

    fn new_plugin_manager(
        &self,
        storage: SharedStorage,
        config: &DaemonConfig,
    ) -> Result<Arc<PluginManager>, Error> {
        Ok(Arc::new(PluginManager::new(storage, &config.plugin)))
    }

    fn new_cluster(
        &self,
        config: &DaemonConfig,
        manager: Arc<PluginManager>,
    ) -> Result<Arc<Cluster>, Error> {
        let pool = self.pool.get().cloned().ok_or(PoolError::NotInitialized)?;
        Ok(Arc::new(Cluster::new(&config.cluster, manager, pool)))
    }

    async fn init_persistence(&self, storage: SharedStorage, config: &DaemonConfig) -> Result<(), Error> {
        let persistence = Persistence::new(storage, &config.persistence)?;
        let _ = self.persistence.set(persistence);
        Ok(())
    }

    async fn start_server(&self, config: &DaemonConfig, cluster: Arc<Cluster>) -> Result<(), Error> {
        let stop = cluster.notify_stopped();
        let server = HttpServer::new(cluster, self.lifecycle.subscribe());
        let addr = server.start(&config.server.bind_address, stop).await?;
        let _ = self.server_addr.set(addr);
        Ok(())
    }

    fn on_state(&self, state: LifecycleState) {
        self.lifecycle.send_replace(state);
    }
}

#[async_trait]
impl PluginManagerHandle for PluginManager {
    fn add_register_handler(&self, handler: RegisterHandler) {
        PluginManager::add_register_handler(self, handler);
    }

    async fn launch(&self) -> Result<usize, Error> {
        Ok(PluginManager::launch(self).await?)
    }
}

impl ClusterHandle for Cluster {
    fn register_plugin(&self, plugin: &PluginDeclaration) {
        Cluster::register_plugin(self, plugin);
    }

    fn launch(self: Arc<Self>) -> Result<(), Error> {
        Ok(Cluster::launch(self)?)
    }

    fn close(&self) {
        Cluster::close(self);
    }

    fn notify_stopped(&self) -> StopNotification {
        Cluster::notify_stopped(self)
    }
}
