//! Instrument domain types.
//!
//! Defines the tracked-instrument model: market kind, provider routing,
//! display currency, and per-instrument alert rules. These types are the
//! foundation of the hexagonal architecture's inner ring and double as the
//! watchlist rows in the TOML config.

use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────
// Type aliases consumed by ports and adapters
// ────────────────────────────────────────────

/// Stable instrument identifier (`"{kind}:{TICKER}"`) used for alert
/// suppression records. Survives watchlist reloads.
pub type InstrumentId = String;

/// Provider-facing subscription / cache key.
///
/// Crypto: `"{TICKER}-{CURRENCY}"` (streaming product id).
/// Equity: bare uppercase ticker.
pub type ProductKey = String;

// ────────────────────────────────────────────
// Enums shared across domain and ports
// ────────────────────────────────────────────

/// Broad market category an instrument belongs to.
///
/// The kind decides the ingestion path: crypto instruments ride the
/// streaming feed, equities are polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketKind {
    Crypto,
    Equity,
}

impl std::fmt::Display for MarketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Crypto => write!(f, "crypto"),
            Self::Equity => write!(f, "equity"),
        }
    }
}

/// REST provider an equity instrument is polled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PollProvider {
    /// Alpaca market-data snapshots. Needs API credentials.
    Alpaca,
    /// Yahoo Finance chart endpoint. Unauthenticated.
    #[default]
    Yahoo,
}

impl std::fmt::Display for PollProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alpaca => write!(f, "alpaca"),
            Self::Yahoo => write!(f, "yahoo"),
        }
    }
}

/// Display currency for streamed quotes.
///
/// Only the quote-currency code participates in the engine (product key
/// derivation); formatting lives with external renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    #[default]
    Usd,
    Eur,
    Gbp,
    Jpy,
    Cad,
    Aud,
    Chf,
    Cny,
}

impl Currency {
    /// Quote-currency code as the streaming provider spells it.
    pub const fn code(self) -> &'static str {
        match self {
            Self::Usd => "USD",
            Self::Eur => "EUR",
            Self::Gbp => "GBP",
            Self::Jpy => "JPY",
            Self::Cad => "CAD",
            Self::Aud => "AUD",
            Self::Chf => "CHF",
            Self::Cny => "CNY",
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ────────────────────────────────────────────
// Alert rule
// ────────────────────────────────────────────

/// Per-instrument alert thresholds.
///
/// All thresholds are optional and independent; evaluation order and
/// cooldown policy live in the evaluator, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Master switch for this instrument's alerts.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Fire when price >= this level.
    #[serde(default)]
    pub above: Option<f64>,
    /// Fire when price <= this level.
    #[serde(default)]
    pub below: Option<f64>,
    /// Fire when |24h percent change| >= this magnitude.
    #[serde(default)]
    pub percent_change: Option<f64>,
}

fn default_enabled() -> bool {
    true
}

impl AlertRule {
    /// True when the rule is switched on and carries at least one threshold.
    pub const fn is_armed(&self) -> bool {
        self.enabled
            && (self.above.is_some() || self.below.is_some() || self.percent_change.is_some())
    }
}

// ────────────────────────────────────────────
// Instrument
// ────────────────────────────────────────────

/// A tracked instrument: one watchlist row.
///
/// Deserialized straight from the `[[symbols]]` tables of the config file;
/// the loader uppercases tickers before the engine sees them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    /// Uppercase ticker symbol (`BTC`, `AAPL`).
    pub ticker: String,
    /// Human-readable name. Empty falls back to the ticker.
    #[serde(default)]
    pub name: String,
    /// Market category; decides streaming vs. polling.
    pub kind: MarketKind,
    /// Polling provider for equities. Ignored for crypto.
    #[serde(default)]
    pub provider: PollProvider,
    /// Position in external list renderings.
    #[serde(default)]
    pub sort_order: u32,
    /// Optional alert thresholds.
    #[serde(default)]
    pub alert: Option<AlertRule>,
}

impl Instrument {
    /// Creates an instrument with a normalized ticker and no alert rule.
    pub fn new(ticker: &str, kind: MarketKind) -> Self {
        Self {
            ticker: ticker.trim().to_uppercase(),
            name: String::new(),
            kind,
            provider: PollProvider::default(),
            sort_order: 0,
            alert: None,
        }
    }

    /// Stable identity slug, e.g. `"crypto:BTC"`.
    pub fn id(&self) -> InstrumentId {
        format!("{}:{}", self.kind, self.ticker)
    }

    /// Cache / subscription key for the given display currency.
    pub fn product_key(&self, currency: Currency) -> ProductKey {
        match self.kind {
            MarketKind::Crypto => format!("{}-{}", self.ticker, currency.code()),
            MarketKind::Equity => self.ticker.clone(),
        }
    }

    /// Name for display, falling back to the ticker.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.ticker } else { &self.name }
    }

    /// True when this instrument can currently fire alerts.
    pub fn has_active_alerts(&self) -> bool {
        self.alert.as_ref().is_some_and(AlertRule::is_armed)
    }
}
