//! Crate-wide error types.

use std::fmt;

use crate::cluster::ClusterError;
use crate::config::ConfigError;
use crate::db::DatabaseError;
use crate::http::ServerError;
use crate::lifecycle::LifecycleError;
use crate::observability::logging::LoggingError;
use crate::observability::telemetry::TelemetryError;
use crate::persistence::PersistenceError;
use crate::plugin::PluginError;
use crate::pool::PoolError;
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Plugin(#[from] PluginError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Where a fatal error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Startup,
    Telemetry,
    Pool,
    Database,
    Storage,
    PluginManager,
    Cluster,
    PluginLaunch,
    Persistence,
    ClusterLaunch,
    HttpServer,
    Shutdown,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Config => "failed to load config",
            Stage::Startup => "failed to start",
            Stage::Telemetry => "failed to init sentry",
            Stage::Pool => "failed to init routine pool",
            Stage::Database => "failed to init database",
            Stage::Storage => "failed to create storage",
            Stage::PluginManager => "failed to init plugin manager",
            Stage::Cluster => "failed to init cluster",
            Stage::PluginLaunch => "failed to launch plugin manager",
            Stage::Persistence => "failed to init persistence",
            Stage::ClusterLaunch => "failed to launch cluster",
            Stage::HttpServer => "failed to start http server",
            Stage::Shutdown => "failed to shut down",
        };
        f.write_str(s)
    }
}

/// An unrecoverable error. The entry point logs it at PANIC level and
/// exits with status 1.
#[derive(Debug, thiserror::Error)]
#[error("{stage}: {source}")]
pub struct Fatal {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl Fatal {
    pub fn new(stage: Stage, source: impl Into<Error>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}

/// Attach a [`Stage`] to a fallible step.
pub trait Context<T> {
    fn stage(self, stage: Stage) -> Result<T, Fatal>;
}

impl<T, E: Into<Error>> Context<T> for Result<T, E> {
    fn stage(self, stage: Stage) -> Result<T, Fatal> {
        self.map_err(|e| Fatal::new(stage, e))
    }
}
