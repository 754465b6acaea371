//! Quote Fetcher Port - Pull-Based Provider Interface
//!
//! Defines the trait a REST quote provider implements to plug into the
//! generic polling worker, plus the error taxonomy those providers map
//! their HTTP and payload failures into.

use async_trait::async_trait;
use thiserror::Error;

/// A single fetched quote: latest price plus the 24h reference level
/// (previous close for equities) percent change is computed against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
  /// Latest traded price.
  pub price: f64,
  /// Previous close, falling back to the price when the venue omits it.
  pub previous_close: f64,
}

/// Provider-side failure for one ticker fetch.
///
/// Variants are owned strings so events stay `Clone` and can ride the
/// poller's broadcast error channel. One ticker's failure never aborts
/// the rest of its polling cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
  /// Credentials rejected (401/403). Persistent until config changes.
  #[error("unauthorized: check API credentials")]
  Unauthorized,

  /// Provider asked us to back off (429). Clears on its own.
  #[error("rate limited by provider")]
  RateLimited,

  /// Any other non-success HTTP status.
  #[error("unexpected HTTP status {0}")]
  Status(u16),

  /// The venue does not know the ticker.
  #[error("symbol not found: {0}")]
  SymbolNotFound(String),

  /// Body arrived but did not parse as the expected shape.
  #[error("malformed response: {0}")]
  Decode(String),

  /// Body parsed but a required field was absent.
  #[error("response missing {0}")]
  MissingField(&'static str),

  /// Transport-level failure (DNS, TLS, timeout, connreset).
  #[error("network error: {0}")]
  Network(String),
}

impl ProviderError {
  /// Stable low-cardinality name for metric labels.
  pub const fn reason(&self) -> &'static str {
    match self {
      Self::Unauthorized => "unauthorized",
      Self::RateLimited => "rate_limited",
      Self::Status(_) => "http_status",
      Self::SymbolNotFound(_) => "symbol_not_found",
      Self::Decode(_) => "decode",
      Self::MissingField(_) => "missing_field",
      Self::Network(_) => "network",
    }
  }
}

impl From<reqwest::Error> for ProviderError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_decode() {
      Self::Decode(err.to_string())
    } else {
      Self::Network(err.to_string())
    }
  }
}

/// Trait for pull-based quote providers.
///
/// Implementors wrap one REST venue. The polling worker drives them on a
/// fixed interval; they stay oblivious to scheduling, cancellation and
/// downstream routing.
#[async_trait]
pub trait QuoteFetcher: Send + Sync + 'static {
  /// Short stable name used in logs, metrics and provider routing.
  fn provider_id(&self) -> &'static str;

  /// Fetches the latest quote for one uppercase ticker.
  async fn fetch_quote(&self, ticker: &str) -> Result<Quote, ProviderError>;
}
