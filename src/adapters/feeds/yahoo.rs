//! Yahoo Finance Fetcher - Unauthenticated Equity Quotes
//!
//! Pulls quotes from the public chart endpoint. No credentials, so this
//! is the default route for equity instruments. The endpoint wants a
//! browser-looking User-Agent or it rejects the request.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::ports::quote_fetcher::{ProviderError, Quote, QuoteFetcher};

const BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const USER_AGENT: &str = "Mozilla/5.0";

/// Chart response, reduced to the fields the engine consumes.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<f64>,
    #[serde(rename = "previousClose")]
    previous_close: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

/// Equity quote fetcher backed by Yahoo's chart endpoint.
pub struct YahooFetcher {
    http: Client,
}

impl YahooFetcher {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { http })
    }
}

#[async_trait]
impl QuoteFetcher for YahooFetcher {
    fn provider_id(&self) -> &'static str {
        "yahoo"
    }

    async fn fetch_quote(&self, ticker: &str) -> Result<Quote, ProviderError> {
        let url = format!("{BASE_URL}/{ticker}?interval=1d&range=2d");
        let response = self
            .http
            .get(&url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(ProviderError::Status(status));
        }

        let chart: ChartResponse = response.json().await?;
        quote_from_chart(chart)
    }
}

/// Validate a decoded chart payload into a quote.
///
/// The venue reports symbol-level problems as an in-body error object; a
/// missing previous close falls back to the price (flat 24h change).
fn quote_from_chart(chart: ChartResponse) -> Result<Quote, ProviderError> {
    if let Some(error) = chart.chart.error {
        return Err(ProviderError::SymbolNotFound(format!(
            "{}: {}",
            error.code, error.description
        )));
    }

    let result = chart
        .chart
        .result
        .unwrap_or_default()
        .into_iter()
        .next()
        .ok_or(ProviderError::MissingField("chart.result"))?;

    let price = result
        .meta
        .regular_market_price
        .ok_or(ProviderError::MissingField("regularMarketPrice"))?;
    let previous_close = result.meta.previous_close.unwrap_or(price);

    Ok(Quote { price, previous_close })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> ChartResponse {
        serde_json::from_str(body).expect("valid chart JSON")
    }

    #[test]
    fn test_chart_decodes_and_validates() {
        let body = r#"{
            "chart": {
                "result": [{
                    "meta": {
                        "regularMarketPrice": 190.12,
                        "previousClose": 188.0,
                        "symbol": "AAPL"
                    },
                    "indicators": {"quote": [{"close": [189.0, 190.12]}]}
                }],
                "error": null
            }
        }"#;
        let quote = quote_from_chart(parse(body)).expect("quote");
        assert_eq!(quote.price, 190.12);
        assert_eq!(quote.previous_close, 188.0);
    }

    #[test]
    fn test_chart_error_object_maps_to_symbol_not_found() {
        let body = r#"{
            "chart": {
                "result": null,
                "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}
            }
        }"#;
        match quote_from_chart(parse(body)) {
            Err(ProviderError::SymbolNotFound(detail)) => {
                assert!(detail.contains("delisted"));
            }
            other => panic!("expected SymbolNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_chart_without_price_is_missing_field() {
        let body = r#"{
            "chart": {
                "result": [{"meta": {"previousClose": 10.0, "symbol": "X"}}],
                "error": null
            }
        }"#;
        assert_eq!(
            quote_from_chart(parse(body)),
            Err(ProviderError::MissingField("regularMarketPrice"))
        );
    }

    #[test]
    fn test_missing_previous_close_falls_back_to_price() {
        let body = r#"{
            "chart": {
                "result": [{"meta": {"regularMarketPrice": 42.5, "symbol": "NEWIPO"}}],
                "error": null
            }
        }"#;
        let quote = quote_from_chart(parse(body)).expect("quote");
        assert_eq!(quote.previous_close, 42.5);
    }

    #[test]
    fn test_empty_result_list_is_missing_field() {
        let body = r#"{"chart": {"result": [], "error": null}}"#;
        assert_eq!(
            quote_from_chart(parse(body)),
            Err(ProviderError::MissingField("chart.result"))
        );
    }
}
