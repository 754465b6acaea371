//! Market Data Feed Adapters - Ingestion Workers
//!
//! Provides the two ingestion paths:
//! - Coinbase: streaming WebSocket ticker feed with auto-reconnect
//! - Poller: generic interval-driven REST puller (Alpaca, Yahoo)

pub mod alpaca;
pub mod coinbase;
pub mod poller;
pub mod yahoo;

pub use alpaca::{AlpacaCredentials, AlpacaFetcher};
pub use coinbase::{CoinbaseStream, ConnectionState, StreamConfig, StreamTick};
pub use poller::{PollFailure, PollUpdate, QuotePoller};
pub use yahoo::YahooFetcher;
