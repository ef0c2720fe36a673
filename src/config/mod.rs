//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → DaemonConfig (validated, immutable)
//!     → handed by reference to every startup step
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → only the [logging] section is applied
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only the logging toggle reloads
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    ClusterConfig, DaemonConfig, DatabaseConfig, LocalStorageConfig, LoggingConfig,
    ObservabilityConfig, PersistenceConfig, PluginConfig, PoolConfig, S3StorageConfig,
    ServerConfig, ShutdownConfig, StorageConfig, TelemetryConfig, TencentCosConfig,
};
