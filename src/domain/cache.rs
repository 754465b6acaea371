//! Unified price cache.
//!
//! Single keyed store all feeds write into and external renderers read
//! from. Last write wins per key; nothing is ever evicted. Lock sections
//! are short and synchronous, so a std `RwLock` is used rather than the
//! async one.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::domain::instrument::ProductKey;
use crate::domain::observation::PriceObservation;

/// Thread-safe map of product key to latest observation.
#[derive(Debug, Default)]
pub struct PriceCache {
    inner: RwLock<HashMap<ProductKey, PriceObservation>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an observation, unconditionally replacing any previous one.
    pub fn put(&self, key: ProductKey, observation: PriceObservation) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, observation);
    }

    /// Latest observation for a key, if one has ever arrived.
    pub fn get(&self, key: &str) -> Option<PriceObservation> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Staleness of a key's observation against an explicit clock.
    ///
    /// `None` means no observation exists: unknown is distinct from stale,
    /// and callers must not treat the two alike.
    pub fn staleness_at(&self, key: &str, now: DateTime<Utc>) -> Option<bool> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|obs| obs.is_stale_at(now))
    }

    /// Staleness against the current wall clock. `None` when unknown.
    pub fn is_stale(&self, key: &str) -> Option<bool> {
        self.staleness_at(key, Utc::now())
    }

    /// Full key-to-observation map for external list rendering.
    pub fn snapshot(&self) -> HashMap<ProductKey, PriceObservation> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// True when observations exist and every one of them is stale.
    /// The all-feeds-dead signal for external status displays.
    pub fn all_stale_at(&self, now: DateTime<Utc>) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        !inner.is_empty() && inner.values().all(|obs| obs.is_stale_at(now))
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
