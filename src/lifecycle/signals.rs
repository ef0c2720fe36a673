//! OS signal handling.
//!
//! # Responsibilities
//! - Register SIGINT and SIGTERM handlers
//! - Forward every delivery into a channel the orchestrator waits on
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Once registered, repeated signals no longer kill the process; the
//!   orchestrator logs and ignores them while shutting down

use std::fmt;

use tokio::sync::mpsc;

/// Termination request delivered by the operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Interrupt => f.write_str("SIGINT"),
            Signal::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Start listening for termination signals.
#[cfg(unix)]
pub fn listen() -> std::io::Result<mpsc::Receiver<Signal>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let (tx, rx) = mpsc::channel(4);

    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                Some(()) = interrupt.recv() => Signal::Interrupt,
                Some(()) = terminate.recv() => Signal::Terminate,
                else => break,
            };
            if tx.send(received).await.is_err() {
                break;
            }
        }
    });

    Ok(rx)
}

/// Start listening for termination signals.
#[cfg(not(unix))]
pub fn listen() -> std::io::Result<mpsc::Receiver<Signal>> {
    let (tx, rx) = mpsc::channel(4);

    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(Signal::Interrupt).await.is_err() {
                break;
            }
        }
    });

    Ok(rx)
}
