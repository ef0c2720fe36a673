//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     pool → database → storage → plugin manager → cluster
//!       → register handler → launch plugins → persistence
//!       → launch cluster → HTTP server
//!
//! Shutdown (startup.rs, shutdown.rs):
//!     Signal received → cluster.close() → wait for stop notification → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → forwarded on a channel
//! ```
//!
//! # Design Decisions
//! - Ordered startup: each step consumes handles produced by earlier ones
//! - Fail fast: the first failing step is returned as [`crate::error::Fatal`]
//! - No rollback: the entry point exits on a fatal error

pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod state;

pub use shutdown::{Shutdown, StopHandle, StopNotification};
pub use signals::Signal;
pub use startup::{App, ClusterHandle, PluginManagerHandle, Subsystems};
pub use state::LifecycleState;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("invalid lifecycle transition {from} -> {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
    #[error("signal channel closed before a termination signal arrived")]
    SignalsClosed,
    #[error("failed to install signal handlers: {0}")]
    Signals(#[from] std::io::Error),
    #[error("cluster did not stop within {0}s")]
    StopTimeout(u64),
}
