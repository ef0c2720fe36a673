//! Startup orchestration and the shutdown handshake.
//!
//! # Responsibilities
//! - Initialize all subsystems in dependency order
//! - Forward plugin registrations to the cluster
//! - Wait for a termination signal, close the cluster and wait for it to stop
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)
//! - Construction goes through [`Subsystems`] so the order can be observed
//!   with a test double

use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::shutdown::StopNotification;
use super::signals::Signal;
use super::state::LifecycleState;
use super::LifecycleError;
use crate::config::{DaemonConfig, DatabaseConfig, PoolConfig, ShutdownConfig, StorageConfig};
use crate::error::{Context, Error, Fatal, Stage};
use crate::observability::telemetry::PanicReporter;
use crate::plugin::{PluginDeclaration, RegisterHandler};
use crate::storage::SharedStorage;

/// What the orchestrator needs from the plugin manager.
#[async_trait]
pub trait PluginManagerHandle: Send + Sync + 'static {
    fn add_register_handler(&self, handler: RegisterHandler);

    /// Start serving plugins. Returns how many were registered.
    async fn launch(&self) -> Result<usize, Error>;
}

/// What the orchestrator needs from the cluster.
pub trait ClusterHandle: Send + Sync + 'static {
    fn register_plugin(&self, plugin: &PluginDeclaration);

    fn launch(self: Arc<Self>) -> Result<(), Error>;

    /// Non-blocking close request.
    fn close(&self);

    fn notify_stopped(&self) -> StopNotification;
}

/// Constructors for every collaborator started by [`App::start`].
#[async_trait]
pub trait Subsystems: Send + Sync {
    type Manager: PluginManagerHandle;
    type Cluster: ClusterHandle;

    fn init_pool(&self, config: &PoolConfig, reporter: Option<PanicReporter>) -> Result<(), Error>;

    async fn init_database(&self, config: &DatabaseConfig) -> Result<(), Error>;

    fn init_storage(&self, config: &StorageConfig) -> Result<SharedStorage, Error>;

    fn new_plugin_manager(
        &self,
        storage: SharedStorage,
        config: &DaemonConfig,
    ) -> Result<Arc<Self::Manager>, Error>;

    fn new_cluster(
        &self,
        config: &DaemonConfig,
        manager: Arc<Self::Manager>,
    ) -> Result<Arc<Self::Cluster>, Error>;

    async fn init_persistence(&self, storage: SharedStorage, config: &DaemonConfig) -> Result<(), Error>;

    async fn start_server(&self, config: &DaemonConfig, cluster: Arc<Self::Cluster>) -> Result<(), Error>;

    /// Called after every lifecycle transition.
    fn on_state(&self, _state: LifecycleState) {}
}

pub struct App<S: Subsystems> {
    subsystems: S,
    state: LifecycleState,
    cluster: Option<Arc<S::Cluster>>,
}

impl<S: Subsystems> App<S> {
    pub fn new(subsystems: S) -> Self {
        Self {
            subsystems,
            state: LifecycleState::Uninitialized,
            cluster: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn subsystems(&self) -> &S {
        &self.subsystems
    }

    fn transition(&mut self, to: LifecycleState) -> Result<(), LifecycleError> {
        if !self.state.can_transition_to(to) {
            return Err(LifecycleError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::debug!(from = %self.state, to = %to, "Lifecycle transition");
        self.state = to;
        self.subsystems.on_state(to);
        Ok(())
    }

    /// Run the startup sequence. The first failing step is returned and
    /// no later step runs.
    pub async fn start(&mut self, config: &DaemonConfig) -> Result<(), Fatal> {
        self.transition(LifecycleState::Starting).stage(Stage::Startup)?;
        let s = &self.subsystems;

        // 1. pool, reporting task panics only when telemetry is on
        let reporter = config.telemetry.enabled.then(PanicReporter::new);
        s.init_pool(&config.pool, reporter).stage(Stage::Pool)?;

        // 2. database
        s.init_database(&config.database).await.stage(Stage::Database)?;

        // 3. storage
        let storage = s.init_storage(&config.storage).stage(Stage::Storage)?;

        // 4. plugin manager
        let manager = s
            .new_plugin_manager(storage.clone(), config)
            .stage(Stage::PluginManager)?;

        // 5. cluster
        let cluster = s
            .new_cluster(config, manager.clone())
            .stage(Stage::Cluster)?;

        // 6. registrations flow into the cluster
        let target = cluster.clone();
        manager.add_register_handler(Arc::new(move |plugin: &PluginDeclaration| {
            target.register_plugin(plugin);
        }));

        // 7. plugins
        let registered = manager.launch().await.stage(Stage::PluginLaunch)?;
        tracing::info!(registered, "Plugins launched");

        // 8. persistence
        s.init_persistence(storage, config)
            .await
            .stage(Stage::Persistence)?;

        // 9. cluster
        cluster.clone().launch().stage(Stage::ClusterLaunch)?;

        // 10. http server
        s.start_server(config, cluster.clone())
            .await
            .stage(Stage::HttpServer)?;

        self.cluster = Some(cluster);
        self.transition(LifecycleState::Running).stage(Stage::Startup)?;
        tracing::info!("Plugin daemon started");
        Ok(())
    }

    /// Block until a termination signal arrives, close the cluster and wait
    /// for its stop notification. Signals received meanwhile are ignored.
    pub async fn wait_for_signal(
        &mut self,
        signals: &mut mpsc::Receiver<Signal>,
        config: &ShutdownConfig,
    ) -> Result<Signal, Fatal> {
        let cluster = match (&self.cluster, self.state) {
            (Some(cluster), LifecycleState::Running) => cluster.clone(),
            _ => {
                return Err(LifecycleError::InvalidTransition {
                    from: self.state,
                    to: LifecycleState::ShuttingDown,
                })
                .stage(Stage::Shutdown)
            }
        };

        tracing::info!("Listening signal for gracefully shutdown");
        let signal = signals
            .recv()
            .await
            .ok_or(LifecycleError::SignalsClosed)
            .stage(Stage::Shutdown)?;
        tracing::info!("Received signal: {signal}");
        self.transition(LifecycleState::ShuttingDown).stage(Stage::Shutdown)?;

        let stopped = cluster.notify_stopped();
        cluster.close();

        let wait = async {
            let mut stopped = pin!(stopped.wait());
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    Some(extra) = signals.recv() => {
                        tracing::info!("Received signal: {extra}, already shutting down");
                    }
                }
            }
        };
        match config.cluster_stop_timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), wait)
                .await
                .map_err(|_| LifecycleError::StopTimeout(secs))
                .stage(Stage::Shutdown)?,
            None => wait.await,
        }

        tracing::info!("Cluster stopped.");
        self.transition(LifecycleState::Stopped).stage(Stage::Shutdown)?;
        Ok(signal)
    }

    /// Start, then serve until a termination signal completes shutdown.
    pub async fn run(
        &mut self,
        config: &DaemonConfig,
        signals: &mut mpsc::Receiver<Signal>,
    ) -> Result<Signal, Fatal> {
        self.start(config).await?;
        self.wait_for_signal(signals, &config.shutdown).await
    }
}
