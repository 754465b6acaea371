//! Price observations and quote normalization.
//!
//! One observation is the normalized output of any feed: spot price, 24h
//! percent change against a provider-supplied reference, optional day-range
//! extras, and the wall-clock receipt time. Staleness is computed at read
//! time, never stored.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Age beyond which an observation is considered stale.
pub const STALE_AFTER_SECS: i64 = 60;

/// Percent change of `price` against a 24h reference level.
///
/// The reference is the session open (streamed crypto) or previous close
/// (polled equities). A zero reference yields 0 rather than dividing.
pub fn percent_change_24h(price: f64, reference: f64) -> f64 {
    if reference.abs() < f64::EPSILON {
        return 0.0;
    }
    (price - reference) / reference * 100.0
}

/// Latest normalized price snapshot for one product key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    /// Last traded / quoted price.
    pub price: f64,
    /// Percent change against the 24h reference.
    pub percent_change_24h: f64,
    /// 24h high, when the feed carries it.
    pub high_24h: Option<f64>,
    /// 24h low, when the feed carries it.
    pub low_24h: Option<f64>,
    /// 24h volume, when the feed carries it.
    pub volume_24h: Option<f64>,
    /// Receipt time at normalization, not the venue timestamp.
    pub observed_at: DateTime<Utc>,
}

impl PriceObservation {
    /// Builds an observation from a price and its 24h reference level.
    /// Day-range extras start empty; streaming frames fill them in.
    pub fn new(price: f64, reference: f64, observed_at: DateTime<Utc>) -> Self {
        Self {
            price,
            percent_change_24h: percent_change_24h(price, reference),
            high_24h: None,
            low_24h: None,
            volume_24h: None,
            observed_at,
        }
    }

    /// Staleness against an explicit clock: strictly older than the window.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.observed_at) > Duration::seconds(STALE_AFTER_SECS)
    }

    /// Staleness against the current wall clock.
    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now())
    }
}
