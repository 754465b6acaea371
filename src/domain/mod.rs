//! Domain layer - Core business logic and models.
//!
//! This module contains the pure domain logic for the price engine.
//! No external dependencies allowed here (hexagonal architecture inner ring).
//! All types are serializable and testable in isolation.

pub mod alerts;
pub mod cache;
pub mod instrument;
pub mod observation;

// Re-export core types for convenience
pub use alerts::{AlertCondition, AlertEvaluator, AlertEvent};
pub use cache::PriceCache;
pub use instrument::{
    AlertRule, Currency, Instrument, InstrumentId, MarketKind, PollProvider, ProductKey,
};
pub use observation::{PriceObservation, STALE_AFTER_SECS, percent_change_24h};
