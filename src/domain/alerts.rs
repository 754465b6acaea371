//! Threshold alert evaluation.
//!
//! Stateful evaluator owned by the feed coordinator: one instance per
//! process, constructed at startup and passed by reference. Holds the
//! per-instrument suppression records and the process-wide cooldown.
//! Delivery is the caller's job; `check` only decides and records.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::instrument::{AlertRule, Instrument, InstrumentId};
use crate::domain::observation::PriceObservation;

/// Default suppression window between alerts for one instrument.
pub const DEFAULT_COOLDOWN_SECS: u64 = 3600;

/// Which threshold matched. Order here mirrors evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertCondition {
    /// Price at or above the upper limit.
    Above,
    /// Price at or below the lower limit.
    Below,
    /// Absolute 24h percent change at or above the magnitude.
    PercentMove,
}

impl std::fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Above => write!(f, "above"),
            Self::Below => write!(f, "below"),
            Self::PercentMove => write!(f, "percent_move"),
        }
    }
}

/// A fired alert, ready for delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Unique event id for downstream dedup.
    pub id: Uuid,
    /// Owning instrument's stable id.
    pub instrument_id: InstrumentId,
    /// Uppercase ticker, for rendering.
    pub ticker: String,
    /// Condition that matched.
    pub condition: AlertCondition,
    /// Human-readable description naming the condition and current value.
    pub message: String,
    /// Evaluation clock at the moment of firing.
    pub fired_at: DateTime<Utc>,
}

/// Evaluates alert rules against incoming observations.
///
/// At most one event per evaluation: conditions run in fixed order
/// (above, below, percent move) and the first match wins. A match starts
/// the cooldown for the whole instrument, so a different condition cannot
/// fire during the window either.
#[derive(Debug)]
pub struct AlertEvaluator {
    cooldown_secs: i64,
    last_fired: HashMap<InstrumentId, DateTime<Utc>>,
}

impl Default for AlertEvaluator {
    fn default() -> Self {
        Self::new(std::time::Duration::from_secs(DEFAULT_COOLDOWN_SECS))
    }
}

impl AlertEvaluator {
    pub fn new(cooldown: std::time::Duration) -> Self {
        Self {
            cooldown_secs: i64::try_from(cooldown.as_secs()).unwrap_or(i64::MAX),
            last_fired: HashMap::new(),
        }
    }

    /// Replaces the process-wide cooldown. Applies to subsequent
    /// evaluations only; running suppression windows keep their start time.
    pub fn set_cooldown(&mut self, cooldown: std::time::Duration) {
        self.cooldown_secs = i64::try_from(cooldown.as_secs()).unwrap_or(i64::MAX);
    }

    /// Evaluates one freshly applied observation against the instrument's
    /// rule. Returns the event to deliver, or `None` when nothing fires.
    pub fn check(
        &mut self,
        instrument: &Instrument,
        observation: &PriceObservation,
        now: DateTime<Utc>,
    ) -> Option<AlertEvent> {
        let rule = instrument.alert.as_ref()?;
        if !rule.enabled {
            return None;
        }

        let instrument_id = instrument.id();
        if let Some(last) = self.last_fired.get(&instrument_id) {
            if now.signed_duration_since(*last) < Duration::seconds(self.cooldown_secs) {
                return None;
            }
        }

        let (condition, message) = Self::first_match(&instrument.ticker, rule, observation)?;
        self.last_fired.insert(instrument_id.clone(), now);

        Some(AlertEvent {
            id: Uuid::new_v4(),
            instrument_id,
            ticker: instrument.ticker.clone(),
            condition,
            message,
            fired_at: now,
        })
    }

    /// Fixed-order threshold scan; first match wins.
    fn first_match(
        ticker: &str,
        rule: &AlertRule,
        obs: &PriceObservation,
    ) -> Option<(AlertCondition, String)> {
        if let Some(above) = rule.above {
            if obs.price >= above {
                return Some((
                    AlertCondition::Above,
                    format!("{ticker} above ${above:.2}: now ${:.2}", obs.price),
                ));
            }
        }
        if let Some(below) = rule.below {
            if obs.price <= below {
                return Some((
                    AlertCondition::Below,
                    format!("{ticker} below ${below:.2}: now ${:.2}", obs.price),
                ));
            }
        }
        if let Some(threshold) = rule.percent_change {
            let change = obs.percent_change_24h;
            if change.abs() >= threshold {
                let direction = if change >= 0.0 { "up" } else { "down" };
                return Some((
                    AlertCondition::PercentMove,
                    format!("{ticker} {direction} {:.1}% in 24h", change.abs()),
                ));
            }
        }
        None
    }
}
