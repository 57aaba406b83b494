//! Health Check Server - Liveness and Readiness Probes
//!
//! Exposes /live and /ready endpoints via axum 0.7 for container
//! health checks and monitoring. Readiness depends on the aggregate
//! endpoint being reachable and the engine having started.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::broadcast;
use tracing::{info, instrument};

/// Shared health state polled by readiness probes.
#[derive(Debug, Clone)]
pub struct HealthState {
    /// Whether the aggregate endpoint answered its last health check.
    pub source_healthy: Arc<AtomicBool>,
    /// Whether every configured product is being synchronized.
    pub engine_running: Arc<AtomicBool>,
}

impl HealthState {
    /// Create a new health state: source assumed healthy, engine not started.
    pub fn new() -> Self {
        Self {
            source_healthy: Arc::new(AtomicBool::new(true)),
            engine_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_source_healthy(&self, healthy: bool) {
        self.source_healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn set_engine_running(&self, running: bool) {
        self.engine_running.store(running, Ordering::Relaxed);
    }

    /// Check if the service is ready to serve traffic.
    pub fn is_ready(&self) -> bool {
        self.source_healthy.load(Ordering::Relaxed) && self.engine_running.load(Ordering::Relaxed)
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Axum-based health check HTTP server.
pub struct HealthServer {
    /// Health state shared with all components.
    state: Arc<HealthState>,
    /// Bind port (default 8080 from config).
    port: u16,
}

impl HealthServer {
    /// Create a new health server.
    pub const fn new(state: Arc<HealthState>, port: u16) -> Self {
        Self { state, port }
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .with_state(Arc::clone(&self.state))
    }

    /// Serve the probes until shutdown.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let app = self.router();
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!(address = %addr, "Health server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Liveness probe: always returns 200 if the process is running.
    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    /// Readiness probe: returns 200 only once the engine runs and the
    /// aggregate endpoint is reachable.
    async fn readiness(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
        if state.is_ready() {
            (StatusCode::OK, "READY")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_requires_engine_and_source() {
        let state = HealthState::new();
        assert!(!state.is_ready());

        state.set_engine_running(true);
        assert!(state.is_ready());

        state.set_source_healthy(false);
        assert!(!state.is_ready());
    }
}
