//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the usecases layer requires
//! from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `QuoteFetcher`: Pull-based REST quote providers
//! - `AlertSink`: Outbound alert delivery

pub mod alert_sink;
pub mod quote_fetcher;

pub use alert_sink::AlertSink;
pub use quote_fetcher::{ProviderError, Quote, QuoteFetcher};
