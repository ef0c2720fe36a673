//! Plugin daemon: lifecycle core of a plugin hosting node.

// Core subsystems
pub mod cluster;
pub mod config;
pub mod daemon;
pub mod db;
pub mod http;
pub mod persistence;
pub mod plugin;
pub mod pool;
pub mod storage;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;
pub mod observability;

pub use config::schema::DaemonConfig;
pub use daemon::DaemonSubsystems;
pub use error::{Error, Fatal, Stage};
pub use lifecycle::{App, LifecycleState, Signal};
