//! Alpaca Snapshot Fetcher - Credentialed Equity Quotes
//!
//! Pulls latest-trade snapshots from the Alpaca market-data REST API.
//! Credentials come from the environment. Their absence is not an error:
//! the wiring simply never constructs this fetcher, and Alpaca-routed
//! tickers receive no updates.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::ports::quote_fetcher::{ProviderError, Quote, QuoteFetcher};

const BASE_URL: &str = "https://data.alpaca.markets/v2";

/// Static API credentials, passed through opaquely.
#[derive(Debug, Clone)]
pub struct AlpacaCredentials {
    pub key_id: String,
    pub secret_key: String,
}

impl AlpacaCredentials {
    /// Reads `ALPACA_API_KEY_ID` / `ALPACA_API_SECRET_KEY`.
    /// `None` when either is unset or empty.
    pub fn from_env() -> Option<Self> {
        let key_id = std::env::var("ALPACA_API_KEY_ID").ok()?;
        let secret_key = std::env::var("ALPACA_API_SECRET_KEY").ok()?;
        if key_id.is_empty() || secret_key.is_empty() {
            return None;
        }
        Some(Self { key_id, secret_key })
    }
}

/// Snapshot response, reduced to the fields the engine consumes.
#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    #[serde(rename = "latestTrade")]
    latest_trade: Option<LatestTrade>,
    #[serde(rename = "prevDailyBar")]
    prev_daily_bar: Option<PrevDailyBar>,
}

#[derive(Debug, Deserialize)]
struct LatestTrade {
    /// Trade price.
    p: f64,
}

#[derive(Debug, Deserialize)]
struct PrevDailyBar {
    /// Previous session close.
    c: f64,
}

/// Equity quote fetcher backed by Alpaca's snapshot endpoint.
pub struct AlpacaFetcher {
    http: Client,
    credentials: AlpacaCredentials,
}

impl AlpacaFetcher {
    pub fn new(credentials: AlpacaCredentials) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { http, credentials })
    }
}

#[async_trait]
impl QuoteFetcher for AlpacaFetcher {
    fn provider_id(&self) -> &'static str {
        "alpaca"
    }

    async fn fetch_quote(&self, ticker: &str) -> Result<Quote, ProviderError> {
        let url = format!("{BASE_URL}/stocks/{ticker}/snapshot");
        let response = self
            .http
            .get(&url)
            .header("APCA-API-KEY-ID", &self.credentials.key_id)
            .header("APCA-API-SECRET-KEY", &self.credentials.secret_key)
            .send()
            .await?;

        match response.status().as_u16() {
            200 => {}
            401 | 403 => return Err(ProviderError::Unauthorized),
            429 => return Err(ProviderError::RateLimited),
            status => return Err(ProviderError::Status(status)),
        }

        let snapshot: SnapshotResponse = response.json().await?;
        quote_from_snapshot(&snapshot)
    }
}

/// Validate a decoded snapshot into a quote. A missing previous bar
/// falls back to the trade price (flat 24h change).
fn quote_from_snapshot(snapshot: &SnapshotResponse) -> Result<Quote, ProviderError> {
    let trade = snapshot
        .latest_trade
        .as_ref()
        .ok_or(ProviderError::MissingField("latestTrade"))?;
    let previous_close = snapshot.prev_daily_bar.as_ref().map_or(trade.p, |bar| bar.c);

    Ok(Quote { price: trade.p, previous_close })
}
