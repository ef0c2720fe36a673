//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the Axum router with the daemon's handlers
//! - Wire up request tracing
//! - Bind the listener and serve on its own task
//! - Stop accepting once the cluster reports it has stopped

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::cluster::Cluster;
use crate::lifecycle::shutdown::StopNotification;
use crate::lifecycle::state::LifecycleState;
use crate::plugin::PluginDeclaration;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub cluster: Arc<Cluster>,
    pub lifecycle: watch::Receiver<LifecycleState>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub node_id: String,
    pub state: LifecycleState,
    pub plugins: usize,
    pub heartbeats: u64,
}

pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(cluster: Arc<Cluster>, lifecycle: watch::Receiver<LifecycleState>) -> Self {
        let state = AppState { cluster, lifecycle };
        Self {
            router: Self::build_router(state),
        }
    }

    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/health/check", get(health_check))
            .route("/plugins", get(list_plugins))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Bind `bind_address` and serve on a background task until `stop`
    /// resolves. Returns the bound address.
    pub async fn start(
        self,
        bind_address: &str,
        stop: StopNotification,
    ) -> Result<SocketAddr, ServerError> {
        let listener = TcpListener::bind(bind_address)
            .await
            .map_err(|source| ServerError::Bind {
                address: bind_address.to_string(),
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| ServerError::Bind {
            address: bind_address.to_string(),
            source,
        })?;
        tracing::info!(address = %addr, "HTTP server starting");

        tokio::spawn(async move {
            let result = axum::serve(listener, self.router)
                .with_graceful_shutdown(stop.wait())
                .await;
            match result {
                Ok(()) => tracing::info!("HTTP server stopped"),
                Err(e) => tracing::error!(error = %e, "HTTP server failed"),
            }
        });

        Ok(addr)
    }
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        node_id: state.cluster.node_id().to_string(),
        state: *state.lifecycle.borrow(),
        plugins: state.cluster.plugin_count(),
        heartbeats: state.cluster.heartbeats(),
    })
}

async fn list_plugins(State(state): State<AppState>) -> Json<Vec<PluginDeclaration>> {
    Json(state.cluster.manager().plugins())
}
