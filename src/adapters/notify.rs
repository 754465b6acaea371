//! Log Notifier - Alert Delivery via Structured Logs
//!
//! Renders fired alerts as warn-level log lines with structured fields.
//! Stands in for richer delivery targets (desktop banners, webhooks);
//! anything scraping the JSON log stream can pick alerts out by field.

use tracing::warn;

use crate::domain::alerts::AlertEvent;
use crate::ports::alert_sink::AlertSink;

/// Alert sink that writes each fired event as one structured log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl LogNotifier {
  pub const fn new() -> Self {
    Self
  }
}

impl AlertSink for LogNotifier {
  fn deliver(&self, event: &AlertEvent) {
    warn!(
      alert_id = %event.id,
      instrument = %event.instrument_id,
      ticker = %event.ticker,
      condition = %event.condition,
      "ALERT: {}",
      event.message
    );
  }
}
