//! Prometheus Metrics Registry - Feed Observability
//!
//! Registers the engine's Prometheus metrics: update throughput by
//! source, polling failures, fired alerts, and stream connectivity.
//! Rendering happens in the health server's /metrics route.

use prometheus::{Encoder, Gauge, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::error;

/// Centralized Prometheus metrics for the feed engine.
///
/// All metrics follow the naming convention `pricewatch_*`. Label sets
/// stay low-cardinality: sources and providers are a fixed handful,
/// reasons come from a closed error taxonomy.
pub struct MetricsRegistry {
    /// Prometheus registry.
    registry: Registry,
    /// Price updates processed, by feed source.
    pub updates_total: IntCounterVec,
    /// Poll cycle failures, by provider and failure reason.
    pub poll_errors_total: IntCounterVec,
    /// Alerts fired, by condition.
    pub alerts_fired_total: IntCounterVec,
    /// Streaming connection status (1 = connected, 0 = not).
    pub stream_connected: Gauge,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let updates_total = IntCounterVec::new(
            Opts::new(
                "pricewatch_updates_total",
                "Price updates processed, by feed source",
            ),
            &["source"],
        )?;

        let poll_errors_total = IntCounterVec::new(
            Opts::new(
                "pricewatch_poll_errors_total",
                "Failed quote fetches, by provider and reason",
            ),
            &["provider", "reason"],
        )?;

        let alerts_fired_total = IntCounterVec::new(
            Opts::new(
                "pricewatch_alerts_fired_total",
                "Alert events fired, by condition",
            ),
            &["condition"],
        )?;

        let stream_connected = Gauge::new(
            "pricewatch_stream_connected",
            "Streaming feed status (1=connected, 0=disconnected)",
        )?;

        // Register all metrics
        registry.register(Box::new(updates_total.clone()))?;
        registry.register(Box::new(poll_errors_total.clone()))?;
        registry.register(Box::new(alerts_fired_total.clone()))?;
        registry.register(Box::new(stream_connected.clone()))?;

        Ok(Self {
            registry,
            updates_total,
            poll_errors_total,
            alerts_fired_total,
            stream_connected,
        })
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
