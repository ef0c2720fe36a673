//! HTTP interface of the daemon.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, tracing layer)
//!     → handler reads cluster / plugin manager state
//!     → JSON response
//! ```

pub mod server;

pub use server::{HttpServer, ServerError};
