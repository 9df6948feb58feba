//! Health Endpoint Adapter
//!
//! HTTP `GET /health` for orchestrator liveness/readiness probes.

use crate::domain::ServiceStatus;
use crate::infrastructure::{ServiceState, ShutdownController};
use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Build the health router.
pub fn router(state: ServiceState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Status code reported for a service status.
pub fn status_code(status: ServiceStatus) -> StatusCode {
    if status.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn health_handler(State(state): State<ServiceState>) -> (StatusCode, &'static str) {
    let status = state.status();
    (status_code(status), status.as_str())
}

/// Health Endpoint - inbound HTTP adapter.
pub struct HealthEndpoint {
    listener: TcpListener,
    state: ServiceState,
}

impl HealthEndpoint {
    /// Bind the health socket.
    pub async fn bind(addr: &str, state: ServiceState) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow::anyhow!("failed to bind health endpoint on {}: {}", addr, e))?;
        Ok(Self { listener, state })
    }

    /// Address the endpoint is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until shutdown, letting in-flight requests complete.
    pub async fn run(self, shutdown: ShutdownController) -> anyhow::Result<()> {
        tracing::info!("health endpoint on {}", self.listener.local_addr()?);

        axum::serve(self.listener, router(self.state))
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!("health endpoint stopped");
        Ok(())
    }
}
