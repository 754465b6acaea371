//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, normalizing tickers, validating all
//! parameters, and providing clear error messages for misconfiguration.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::AppConfig;

/// Lower bound on the equity polling cadence.
const MIN_POLL_INTERVAL_SECS: u64 = 5;

/// Load and validate configuration from a TOML file.
///
/// # Arguments
/// * `path` - Path to the config.toml file
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let mut config: AppConfig = toml::from_str(&content)
    .with_context(|| "Failed to parse config.toml")?;

  normalize_config(&mut config);
  validate_config(&config)?;

  info!(
    symbols = config.symbols.len(),
    streaming = config.feeds.streaming_enabled,
    poll_interval_secs = config.feeds.poll_interval_secs,
    alerts = config.alerts.enabled,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Normalize user-entered fields before validation.
///
/// Tickers are case-insensitive in the file but every internal map is
/// keyed by the uppercase form.
fn normalize_config(config: &mut AppConfig) {
  for symbol in &mut config.symbols {
    symbol.ticker = symbol.ticker.trim().to_uppercase();
  }
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - Non-empty watchlist with unique instrument identities
/// - Positive alert thresholds
/// - Sane polling cadence
fn validate_config(config: &AppConfig) -> Result<()> {
  // Watchlist validation
  anyhow::ensure!(
    !config.symbols.is_empty(),
    "At least one symbol must be configured"
  );

  let mut seen = HashSet::new();
  for (i, symbol) in config.symbols.iter().enumerate() {
    anyhow::ensure!(
      !symbol.ticker.is_empty(),
      "Symbol {} has an empty ticker",
      i
    );
    anyhow::ensure!(
      seen.insert(symbol.id()),
      "Duplicate symbol: {}",
      symbol.id()
    );

    if let Some(rule) = &symbol.alert {
      if let Some(above) = rule.above {
        anyhow::ensure!(
          above > 0.0,
          "Symbol {} alert.above must be positive, got {}",
          symbol.ticker,
          above
        );
      }
      if let Some(below) = rule.below {
        anyhow::ensure!(
          below > 0.0,
          "Symbol {} alert.below must be positive, got {}",
          symbol.ticker,
          below
        );
      }
      if let Some(percent) = rule.percent_change {
        anyhow::ensure!(
          percent > 0.0,
          "Symbol {} alert.percent_change must be positive, got {}",
          symbol.ticker,
          percent
        );
      }
    }
  }

  // Feed validation
  anyhow::ensure!(
    config.feeds.poll_interval_secs >= MIN_POLL_INTERVAL_SECS,
    "poll_interval_secs must be at least {}, got {}",
    MIN_POLL_INTERVAL_SECS,
    config.feeds.poll_interval_secs
  );

  // Metrics validation
  if config.metrics.enabled {
    anyhow::ensure!(
      !config.metrics.bind_address.is_empty(),
      "Metrics bind_address must not be empty when metrics are enabled"
    );
  }

  Ok(())
}
