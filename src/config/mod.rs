//! Configuration Module - TOML-based Engine Configuration
//!
//! Loads and validates configuration from `config.toml`. The watchlist,
//! feed cadence and alert policy are all externalized here - nothing is
//! hardcoded in the domain layer.

pub mod hot_reload;
pub mod loader;

use serde::Deserialize;

use crate::domain::instrument::{Currency, Instrument};

/// Top-level engine configuration.
///
/// Loaded from `config.toml` at startup and re-read by the hot-reload
/// watcher. All fields are validated before the engine begins operation.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Engine identity and logging.
  pub engine: EngineConfig,
  /// Feed cadence and routing.
  #[serde(default)]
  pub feeds: FeedsConfig,
  /// Alert policy.
  #[serde(default)]
  pub alerts: AlertsConfig,
  /// Metrics and monitoring.
  #[serde(default)]
  pub metrics: MetricsConfig,
  /// Watchlist instruments, one `[[symbols]]` table each.
  pub symbols: Vec<Instrument>,
}

/// Engine identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
  /// Human-readable engine name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

/// Feed configuration: streaming switch, polling cadence, currency.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedsConfig {
  /// Whether crypto instruments ride the streaming feed.
  #[serde(default = "default_true")]
  pub streaming_enabled: bool,
  /// Equity polling interval in seconds (validated >= 5).
  #[serde(default = "default_poll_interval")]
  pub poll_interval_secs: u64,
  /// Display currency streamed quotes are keyed in.
  #[serde(default)]
  pub display_currency: Currency,
  /// Streaming endpoint override. None = production endpoint.
  pub stream_url: Option<String>,
}

impl Default for FeedsConfig {
  fn default() -> Self {
    Self {
      streaming_enabled: true,
      poll_interval_secs: default_poll_interval(),
      display_currency: Currency::default(),
      stream_url: None,
    }
  }
}

/// Alert policy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
  /// Global alert switch. Off by default; per-instrument rules only
  /// fire while this is on.
  #[serde(default)]
  pub enabled: bool,
  /// Per-instrument re-fire suppression window in seconds.
  #[serde(default = "default_cooldown")]
  pub cooldown_secs: u64,
}

impl Default for AlertsConfig {
  fn default() -> Self {
    Self {
      enabled: false,
      cooldown_secs: default_cooldown(),
    }
  }
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Enable the /live, /ready, /metrics HTTP server.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Observability server bind address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      bind_address: default_metrics_addr(),
    }
  }
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

fn default_poll_interval() -> u64 {
  60
}

fn default_cooldown() -> u64 {
  3600
}

fn default_metrics_addr() -> String {
  "0.0.0.0:8080".to_string()
}
