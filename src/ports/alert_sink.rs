//! Alert Sink Port - Outbound Notification Interface
//!
//! Seam between the engine and whatever renders notifications (desktop
//! banners, chat webhooks, plain logs). The coordinator pushes every
//! fired event through this trait, fire-and-forget.

use crate::domain::alerts::AlertEvent;

/// Trait for alert delivery targets.
///
/// Delivery must not block the feed path and must never fail loudly;
/// sinks swallow their own errors and log them.
pub trait AlertSink: Send + Sync + 'static {
  /// Delivers one fired alert.
  fn deliver(&self, event: &AlertEvent);
}
