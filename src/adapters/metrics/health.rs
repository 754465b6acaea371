//! Health Check Server - Probes and Metrics Exposition
//!
//! Exposes /live, /ready and /metrics via axum 0.7 for Docker health
//! checks and scraping. Readiness tracks streaming connectivity and
//! whether the coordinator loop is running.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::broadcast;
use tracing::{info, instrument};

use super::prometheus::MetricsRegistry;

/// Shared health state polled by readiness probes.
#[derive(Debug, Clone)]
pub struct HealthState {
    /// Whether the streaming feed is connected (held true when
    /// streaming is disabled, so equity-only setups stay ready).
    pub stream_healthy: Arc<std::sync::atomic::AtomicBool>,
    /// Whether the coordinator loop is running.
    pub engine_running: Arc<std::sync::atomic::AtomicBool>,
}

impl HealthState {
    /// Create a new health state (all healthy by default).
    pub fn new() -> Self {
        Self {
            stream_healthy: Arc::new(std::sync::atomic::AtomicBool::new(true)),
            engine_running: Arc::new(std::sync::atomic::AtomicBool::new(true)),
        }
    }

    /// Check if the engine is ready to serve its feeds.
    pub fn is_ready(&self) -> bool {
        use std::sync::atomic::Ordering;
        self.stream_healthy.load(Ordering::Relaxed)
            && self.engine_running.load(Ordering::Relaxed)
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Router state shared by all probe handlers.
#[derive(Clone)]
struct ServerState {
    health: Arc<HealthState>,
    metrics: Arc<MetricsRegistry>,
}

/// Axum-based observability HTTP server.
///
/// Serves liveness (/live), readiness (/ready) and Prometheus
/// exposition (/metrics) on one bind address.
pub struct HealthServer {
    /// Health state shared with the coordinator.
    state: Arc<HealthState>,
    /// Metrics registry rendered by /metrics.
    metrics: Arc<MetricsRegistry>,
    /// Bind address (default 0.0.0.0:8080 from config).
    bind_address: String,
}

impl HealthServer {
    /// Create a new health server.
    pub fn new(
        state: Arc<HealthState>,
        metrics: Arc<MetricsRegistry>,
        bind_address: String,
    ) -> Self {
        Self {
            state,
            metrics,
            bind_address,
        }
    }

    /// Run the server until the shutdown signal fires.
    #[instrument(skip(self, shutdown_rx), fields(address = %self.bind_address))]
    pub async fn run(
        self,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let app = Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .route("/metrics", get(Self::metrics))
            .with_state(ServerState {
                health: Arc::clone(&self.state),
                metrics: Arc::clone(&self.metrics),
            });

        let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;

        info!(address = %self.bind_address, "Health server started");

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

    /// Readiness probe: 200 only while feeds and coordinator are healthy.
    async fn readiness(State(state): State<ServerState>) -> impl IntoResponse {
        if state.health.is_ready() {
            (StatusCode::OK, "READY")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }

    /// Prometheus text exposition.
    async fn metrics(State(state): State<ServerState>) -> impl IntoResponse {
        state.metrics.render()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;

    #[test]
    fn test_readiness_follows_stream_and_engine_flags() {
        let state = HealthState::new();
        assert!(state.is_ready());

        state.stream_healthy.store(false, Ordering::Relaxed);
        assert!(!state.is_ready());

        state.stream_healthy.store(true, Ordering::Relaxed);
        state.engine_running.store(false, Ordering::Relaxed);
        assert!(!state.is_ready());
    }
}
