//! Streaming Client Tests - Loopback WebSocket Server
//!
//! Exercises the streaming worker against an in-process
//! tokio-tungstenite server: subscribe envelopes, diff-based updates,
//! reconnect behavior, junk-frame tolerance and stream/poller
//! independence through the full pipeline. Millisecond backoff
//! schedules keep the suite fast.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

use pricewatch::adapters::feeds::{CoinbaseStream, ConnectionState, QuotePoller, StreamConfig};
use pricewatch::adapters::metrics::{HealthState, MetricsRegistry};
use pricewatch::adapters::notify::LogNotifier;
use pricewatch::config::AppConfig;
use pricewatch::domain::{PriceCache, PriceObservation};
use pricewatch::ports::quote_fetcher::{ProviderError, Quote, QuoteFetcher};
use pricewatch::usecases::FeedCoordinator;

// ---- Loopback Server Helpers ----

async fn bind_server() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    (listener, format!("ws://{addr}"))
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("client dialed in time")
        .expect("tcp accept");
    accept_async(stream).await.expect("websocket handshake")
}

/// Next text frame from the client, parsed as JSON.
async fn next_envelope(socket: &mut WebSocketStream<TcpStream>) -> serde_json::Value {
    loop {
        let msg = timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("frame in time")
            .expect("socket open")
            .expect("clean frame");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("valid json envelope");
        }
    }
}

async fn send_text(socket: &mut WebSocketStream<TcpStream>, text: &str) {
    socket
        .send(Message::Text(text.to_string()))
        .await
        .expect("server send");
}

async fn wait_for_state<F>(
    rx: &mut watch::Receiver<ConnectionState>,
    mut pred: F,
) -> ConnectionState
where
    F: FnMut(&ConnectionState) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            let current = rx.borrow_and_update().clone();
            if pred(&current) {
                return current;
            }
            rx.changed().await.expect("state channel open");
        }
    })
    .await
    .expect("state reached in time")
}

fn keys(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn fast_config(url: String) -> StreamConfig {
    StreamConfig {
        url,
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        ..StreamConfig::default()
    }
}

fn ticker_frame(product: &str, price: &str, open: &str) -> String {
    format!(
        r#"{{"type":"ticker","product_id":"{product}","price":"{price}","open_24h":"{open}"}}"#
    )
}

/// Fetcher answering every ticker with one fixed price.
struct FixedQuote(f64);

#[async_trait]
impl QuoteFetcher for FixedQuote {
    fn provider_id(&self) -> &'static str {
        "yahoo"
    }

    async fn fetch_quote(&self, _ticker: &str) -> Result<Quote, ProviderError> {
        Ok(Quote { price: self.0, previous_close: self.0 })
    }
}

/// Polls the cache until `key` appears or five seconds elapse.
async fn wait_for_price(cache: &PriceCache, key: &str) -> PriceObservation {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(obs) = cache.get(key) {
            return obs;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "no observation for {key} within 5s"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ---- Streaming Tests ----

#[tokio::test]
async fn test_connect_subscribes_all_and_streams_ticks() {
    let (listener, url) = bind_server().await;
    let stream = CoinbaseStream::new(fast_config(url));
    let mut ticks = stream.subscribe_ticks();
    let mut states = stream.state_stream();

    stream.connect(keys(&["BTC-USD", "ETH-USD"]));
    let mut socket = accept(&listener).await;

    let sub = next_envelope(&mut socket).await;
    assert_eq!(sub["type"], "subscribe");
    assert_eq!(sub["product_ids"], json!(["BTC-USD", "ETH-USD"]));
    assert_eq!(sub["channels"][0]["name"], "ticker");

    wait_for_state(&mut states, ConnectionState::is_connected).await;

    send_text(&mut socket, &ticker_frame("BTC-USD", "50000.0", "49000.0")).await;
    let tick = timeout(Duration::from_secs(5), ticks.recv())
        .await
        .expect("tick in time")
        .expect("tick channel open");
    assert_eq!(tick.product_id, "BTC-USD");
    assert_eq!(tick.price, 50_000.0);
    assert_eq!(tick.open_24h, 49_000.0);

    stream.shutdown().await;
}

#[tokio::test]
async fn test_update_sends_only_the_difference() {
    let (listener, url) = bind_server().await;
    let stream = CoinbaseStream::new(fast_config(url));
    let mut states = stream.state_stream();

    stream.connect(keys(&["BTC-USD", "ETH-USD"]));
    let mut socket = accept(&listener).await;
    let _ = next_envelope(&mut socket).await;
    wait_for_state(&mut states, ConnectionState::is_connected).await;

    // ETH-USD survives both sets, so it must appear in neither message.
    stream.update_subscriptions(keys(&["ETH-USD", "SOL-USD"]));

    let unsub = next_envelope(&mut socket).await;
    assert_eq!(unsub["type"], "unsubscribe");
    assert_eq!(unsub["product_ids"], json!(["BTC-USD"]));

    let sub = next_envelope(&mut socket).await;
    assert_eq!(sub["type"], "subscribe");
    assert_eq!(sub["product_ids"], json!(["SOL-USD"]));

    stream.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_resubscribes_the_full_set() {
    let (listener, url) = bind_server().await;
    let stream = CoinbaseStream::new(fast_config(url));
    let mut states = stream.state_stream();

    stream.connect(keys(&["BTC-USD", "ETH-USD"]));
    let mut socket = accept(&listener).await;
    let _ = next_envelope(&mut socket).await;
    wait_for_state(&mut states, ConnectionState::is_connected).await;

    // Kill the session; the worker retries on its own.
    drop(socket);

    let mut socket2 = accept(&listener).await;
    let resub = next_envelope(&mut socket2).await;
    assert_eq!(resub["type"], "subscribe");
    assert_eq!(
        resub["product_ids"],
        json!(["BTC-USD", "ETH-USD"]),
        "reconnect must subscribe the full set, not a diff"
    );
    wait_for_state(&mut states, ConnectionState::is_connected).await;

    stream.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_during_backoff_cancels_the_retry() {
    let (listener, url) = bind_server().await;
    // Long delay: the worker is guaranteed to be inside the backoff
    // wait when the disconnect lands.
    let stream = CoinbaseStream::new(StreamConfig {
        url,
        base_delay: Duration::from_secs(5),
        max_delay: Duration::from_secs(5),
        ..StreamConfig::default()
    });
    let mut states = stream.state_stream();

    stream.connect(keys(&["BTC-USD"]));
    let mut socket = accept(&listener).await;
    let _ = next_envelope(&mut socket).await;
    wait_for_state(&mut states, ConnectionState::is_connected).await;

    drop(socket);
    let state =
        wait_for_state(&mut states, |s| matches!(s, ConnectionState::Reconnecting { .. })).await;
    assert_eq!(state, ConnectionState::Reconnecting { attempt: 1 });

    let asked = tokio::time::Instant::now();
    stream.disconnect();
    wait_for_state(&mut states, |s| *s == ConnectionState::Disconnected).await;
    assert!(
        asked.elapsed() < Duration::from_secs(2),
        "disconnect must not wait out the retry delay"
    );

    // The cancelled attempt never dials back in.
    assert!(
        timeout(Duration::from_millis(300), listener.accept()).await.is_err(),
        "no reconnect after disconnect"
    );

    stream.shutdown().await;
}

#[tokio::test]
async fn test_junk_frames_do_not_break_the_session() {
    let (listener, url) = bind_server().await;
    let stream = CoinbaseStream::new(fast_config(url));
    let mut ticks = stream.subscribe_ticks();
    let mut states = stream.state_stream();

    stream.connect(keys(&["BTC-USD"]));
    let mut socket = accept(&listener).await;
    let _ = next_envelope(&mut socket).await;
    wait_for_state(&mut states, ConnectionState::is_connected).await;

    // Ack, garbage and a field-less ticker are all skipped in place.
    send_text(&mut socket, r#"{"type":"subscriptions","channels":[]}"#).await;
    send_text(&mut socket, "not json at all").await;
    send_text(&mut socket, r#"{"type":"ticker","product_id":"BTC-USD","open_24h":"1"}"#).await;
    send_text(&mut socket, &ticker_frame("BTC-USD", "101.0", "100.0")).await;

    let tick = timeout(Duration::from_secs(5), ticks.recv())
        .await
        .expect("valid tick in time")
        .expect("tick channel open");
    assert_eq!(tick.price, 101.0);
    // Frames arrive in order, so the junk produced nothing.
    assert!(ticks.try_recv().is_err());
    assert!(stream.state().is_connected());

    stream.shutdown().await;
}

#[tokio::test]
async fn test_stream_and_poller_feed_the_cache_independently() {
    let (listener, url) = bind_server().await;

    let config: AppConfig = toml::from_str(
        r#"
        [engine]
        name = "pricewatch-test"

        [feeds]
        streaming_enabled = true
        poll_interval_secs = 1

        [[symbols]]
        ticker = "BTC"
        kind = "crypto"

        [[symbols]]
        ticker = "AAPL"
        kind = "equity"
        "#,
    )
    .expect("valid config");

    let (config_tx, config_rx) = watch::channel(config);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let coordinator = FeedCoordinator::new(
        CoinbaseStream::new(fast_config(url)),
        None::<QuotePoller<FixedQuote>>,
        QuotePoller::new(FixedQuote(190.25)),
        Arc::new(LogNotifier::new()),
        Arc::new(MetricsRegistry::new().expect("metrics")),
        Arc::new(HealthState::new()),
        config_rx,
        shutdown_rx,
    );
    let cache = coordinator.cache();
    let handle = tokio::spawn(coordinator.run());

    // The coordinator derives the crypto key set and dials out.
    let mut socket = accept(&listener).await;
    let sub = next_envelope(&mut socket).await;
    assert_eq!(sub["type"], "subscribe");
    assert_eq!(sub["product_ids"], json!(["BTC-USD"]));

    send_text(&mut socket, &ticker_frame("BTC-USD", "50000.0", "49000.0")).await;

    // Both pipelines land in the one cache under their own keys.
    let btc = wait_for_price(&cache, "BTC-USD").await;
    assert_eq!(btc.price, 50_000.0);
    let aapl = wait_for_price(&cache, "AAPL").await;
    assert_eq!(aapl.price, 190.25);

    // Kill the stream session. The poller keeps its cadence while the
    // worker reconnects on its own.
    drop(socket);
    let polled_at = aapl.observed_at;
    let mut socket2 = accept(&listener).await;
    let resub = next_envelope(&mut socket2).await;
    assert_eq!(resub["type"], "subscribe");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(obs) = cache.get("AAPL") {
            if obs.observed_at > polled_at {
                break;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "poller stalled after stream loss"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let _ = shutdown_tx.send(());
    timeout(Duration::from_secs(5), handle)
        .await
        .expect("coordinator stopped in time")
        .expect("coordinator task completed")
        .expect("coordinator exited cleanly");
    drop(config_tx);
}
