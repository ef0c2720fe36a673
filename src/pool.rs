//! Bounded worker pool shared by every long-running subsystem.
//!
//! # Responsibilities
//! - Cap the number of concurrently running background tasks
//! - Catch task panics and forward them to Sentry
//!
//! # Design Decisions
//! - Tasks wait for a semaphore permit on their own task, so `spawn` never blocks
//! - Without a reporter panics are absorbed and logged at WARN

use std::any::Any;
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;

use sentry::protocol::SpanStatus;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::observability::logging::FatalPanic;
use crate::observability::metrics;
use crate::observability::telemetry::{PanicReport, PanicReporter};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool size must be greater than zero")]
    ZeroSize,
    #[error("worker pool not initialized")]
    NotInitialized,
}

/// Semaphore-bounded task spawner.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    size: usize,
    reporter: Option<PanicReporter>,
}

impl WorkerPool {
    pub fn new(size: usize, reporter: Option<PanicReporter>) -> Result<Self, PoolError> {
        if size == 0 {
            return Err(PoolError::ZeroSize);
        }

        tracing::info!(size, telemetry = reporter.is_some(), "Worker pool initialized");
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
            reporter,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not currently held by a running task.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Run `future` once a permit is free. The returned handle resolves
    /// after the task finished, panicked, or the pool was closed.
    #[track_caller]
    pub fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let location = Location::caller().to_string();
        let semaphore = self.semaphore.clone();
        let reporter = self.reporter.clone();
        let name = name.to_string();
        metrics::record_pool_task();

        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                tracing::debug!(task = %name, "Worker pool closed, task dropped");
                return;
            };

            let transaction = reporter.as_ref().map(|r| r.start_task(&name));
            let outcome = tokio::spawn(future).await;
            if let Some(transaction) = transaction {
                let status = match &outcome {
                    Ok(()) => SpanStatus::Ok,
                    Err(e) if e.is_panic() => SpanStatus::InternalError,
                    Err(_) => SpanStatus::Cancelled,
                };
                transaction.set_status(status);
                transaction.finish();
            }

            match outcome {
                Ok(()) => {}
                Err(e) if e.is_panic() => {
                    let message = panic_message(e.into_panic());
                    metrics::record_task_panic(&name);
                    match &reporter {
                        Some(reporter) => {
                            reporter.report(PanicReport {
                                task: name,
                                message,
                                spawned_at: Some(location),
                            });
                        }
                        None => tracing::warn!(task = %name, "Pool task panicked: {message}"),
                    }
                }
                Err(_) => tracing::debug!(task = %name, "Pool task cancelled"),
            }
        })
    }

    /// Stop handing out permits; queued tasks are dropped.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(fatal) = payload.downcast_ref::<FatalPanic>() {
        fatal.message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
