//! Feed Coordinator - Ingestion and Alerting Loop
//!
//! The central use case that:
//! 1. Partitions the watchlist by market kind
//! 2. Drives the streaming client and the REST pollers
//! 3. Normalizes raw updates into timestamped observations
//! 4. Applies them to the shared price cache
//! 5. Evaluates alert rules inline on every update
//!
//! Event-driven: a single select loop consumes every feed channel, so
//! per-provider cache writes land in arrival order.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, instrument, warn};

use crate::adapters::feeds::{
  CoinbaseStream, ConnectionState, PollFailure, PollUpdate, QuotePoller, StreamTick,
};
use crate::adapters::metrics::{HealthState, MetricsRegistry};
use crate::config::AppConfig;
use crate::domain::{
  AlertEvaluator, AlertEvent, Instrument, MarketKind, PollProvider, PriceCache,
  PriceObservation, ProductKey,
};
use crate::ports::alert_sink::AlertSink;
use crate::ports::quote_fetcher::QuoteFetcher;

/// Outward alert fan-out capacity. Alerts are rare; a small buffer is
/// plenty even for a slow consumer.
const ALERT_CHANNEL_CAPACITY: usize = 256;

/// Coordinator orchestrating feeds, cache and alert evaluation.
pub struct FeedCoordinator<A: QuoteFetcher, Y: QuoteFetcher> {
  /// Streaming client for crypto instruments.
  stream: CoinbaseStream,
  /// Alpaca poller; absent when credentials are not configured.
  alpaca: Option<QuotePoller<A>>,
  /// Yahoo poller, the default equity route.
  yahoo: QuotePoller<Y>,
  /// Outbound alert delivery.
  sink: Arc<dyn AlertSink>,
  /// Shared last-observation store.
  cache: Arc<PriceCache>,
  /// Threshold evaluator with suppression records.
  evaluator: AlertEvaluator,
  /// Prometheus metrics.
  metrics: Arc<MetricsRegistry>,
  /// Readiness flags shared with the health server.
  health: Arc<HealthState>,
  /// Outward alert fan-out.
  alert_tx: broadcast::Sender<AlertEvent>,
  /// Currently applied configuration.
  config: AppConfig,
  /// Streaming product key to owning instrument.
  crypto_by_key: HashMap<ProductKey, Instrument>,
  /// Equity ticker to owning instrument.
  equity_by_ticker: HashMap<String, Instrument>,
  /// Hot-reload channel from the config watcher.
  config_rx: watch::Receiver<AppConfig>,
  /// Shutdown signal receiver.
  shutdown_rx: broadcast::Receiver<()>,
}

impl<A: QuoteFetcher, Y: QuoteFetcher> FeedCoordinator<A, Y> {
  /// Create a new coordinator. Feeds stay idle until [`Self::run`].
  pub fn new(
    stream: CoinbaseStream,
    alpaca: Option<QuotePoller<A>>,
    yahoo: QuotePoller<Y>,
    sink: Arc<dyn AlertSink>,
    metrics: Arc<MetricsRegistry>,
    health: Arc<HealthState>,
    config_rx: watch::Receiver<AppConfig>,
    shutdown_rx: broadcast::Receiver<()>,
  ) -> Self {
    let config = config_rx.borrow().clone();
    let evaluator = AlertEvaluator::new(Duration::from_secs(config.alerts.cooldown_secs));
    let (alert_tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);

    Self {
      stream,
      alpaca,
      yahoo,
      sink,
      cache: Arc::new(PriceCache::new()),
      evaluator,
      metrics,
      health,
      alert_tx,
      config,
      crypto_by_key: HashMap::new(),
      equity_by_ticker: HashMap::new(),
      config_rx,
      shutdown_rx,
    }
  }

  /// Shared price cache for external renderers.
  pub fn cache(&self) -> Arc<PriceCache> {
    Arc::clone(&self.cache)
  }

  /// Get a receiver for fired alerts.
  pub fn subscribe_alerts(&self) -> broadcast::Receiver<AlertEvent> {
    self.alert_tx.subscribe()
  }

  /// Streaming connection state, for status displays.
  pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
    self.stream.state_stream()
  }

  /// Run the main event loop.
  ///
  /// Applies the initial configuration (starting feeds), then consumes
  /// ticks, poll results, state changes and config reloads until the
  /// shutdown signal fires. Feeds are stopped on the way out.
  #[instrument(skip(self), name = "feed_loop")]
  pub async fn run(mut self) -> Result<()> {
    info!(symbols = self.config.symbols.len(), "Starting feed coordinator");

    // Subscribe before feeds start so the immediate first poll pass
    // cannot slip past the receivers.
    let mut tick_rx = self.stream.subscribe_ticks();
    let mut state_rx = self.stream.state_stream();
    let mut yahoo_update_rx = self.yahoo.subscribe_updates();
    let mut yahoo_failure_rx = self.yahoo.subscribe_failures();

    // Parked channels stand in for the alpaca poller when credentials
    // are absent; holding the senders keeps the receivers pending.
    let (mut alpaca_update_rx, mut alpaca_failure_rx, _parked) = match &self.alpaca {
      Some(poller) => (poller.subscribe_updates(), poller.subscribe_failures(), None),
      None => {
        let (update_tx, update_rx) = broadcast::channel(1);
        let (failure_tx, failure_rx) = broadcast::channel(1);
        (update_rx, failure_rx, Some((update_tx, failure_tx)))
      }
    };

    let initial = self.config_rx.borrow_and_update().clone();
    self.apply_config(initial);

    let mut config_watch_live = true;
    let mut stream_watch_live = true;

    loop {
      tokio::select! {
        biased;

        _ = self.shutdown_rx.recv() => {
          info!("Shutdown signal received, stopping coordinator");
          break;
        }

        changed = self.config_rx.changed(), if config_watch_live => {
          if changed.is_ok() {
            let config = self.config_rx.borrow_and_update().clone();
            self.apply_config(config);
          } else {
            debug!("Config watcher gone, keeping current config");
            config_watch_live = false;
          }
        }

        changed = state_rx.changed(), if stream_watch_live => {
          if changed.is_ok() {
            let state = state_rx.borrow_and_update().clone();
            self.handle_stream_state(&state);
          } else {
            warn!("Streaming worker terminated unexpectedly");
            self.health.stream_healthy.store(false, Ordering::Relaxed);
            stream_watch_live = false;
          }
        }

        tick = tick_rx.recv() => match tick {
          Ok(tick) => self.handle_stream_tick(tick),
          Err(broadcast::error::RecvError::Lagged(missed)) => {
            warn!(missed, "Tick receiver lagged, dropped messages");
          }
          Err(broadcast::error::RecvError::Closed) => {}
        },

        update = yahoo_update_rx.recv() => match update {
          Ok(update) => self.handle_poll_update("yahoo", update),
          Err(broadcast::error::RecvError::Lagged(missed)) => {
            warn!(missed, provider = "yahoo", "Poll receiver lagged");
          }
          Err(broadcast::error::RecvError::Closed) => {}
        },

        failure = yahoo_failure_rx.recv() => {
          if let Ok(failure) = failure {
            self.handle_poll_failure("yahoo", &failure);
          }
        }

        update = alpaca_update_rx.recv() => match update {
          Ok(update) => self.handle_poll_update("alpaca", update),
          Err(broadcast::error::RecvError::Lagged(missed)) => {
            warn!(missed, provider = "alpaca", "Poll receiver lagged");
          }
          Err(broadcast::error::RecvError::Closed) => {}
        },

        failure = alpaca_failure_rx.recv() => {
          if let Ok(failure) = failure {
            self.handle_poll_failure("alpaca", &failure);
          }
        }
      }
    }

    self.health.engine_running.store(false, Ordering::Relaxed);
    if let Some(alpaca) = &self.alpaca {
      alpaca.stop();
    }
    self.yahoo.stop();
    self.stream.shutdown().await;
    info!("Feed coordinator stopped");

    Ok(())
  }

  /// Apply a validated configuration: rebuild routing maps, push
  /// settings, and reconcile feed subscriptions with the watchlist.
  fn apply_config(&mut self, config: AppConfig) {
    self.evaluator.set_cooldown(Duration::from_secs(config.alerts.cooldown_secs));

    let currency = config.feeds.display_currency;
    let mut crypto_by_key = HashMap::new();
    let mut equity_by_ticker = HashMap::new();
    let mut alpaca_tickers = Vec::new();
    let mut yahoo_tickers = Vec::new();

    for instrument in &config.symbols {
      match instrument.kind {
        MarketKind::Crypto => {
          crypto_by_key.insert(instrument.product_key(currency), instrument.clone());
        }
        MarketKind::Equity => {
          match instrument.provider {
            PollProvider::Alpaca => alpaca_tickers.push(instrument.ticker.clone()),
            PollProvider::Yahoo => yahoo_tickers.push(instrument.ticker.clone()),
          }
          equity_by_ticker.insert(instrument.ticker.clone(), instrument.clone());
        }
      }
    }

    // Streaming side: connect re-affirms intent and diffs on a live
    // session; a drained watchlist unsubscribes without dropping intent.
    let stream_keys: BTreeSet<ProductKey> = crypto_by_key.keys().cloned().collect();
    if !config.feeds.streaming_enabled {
      self.stream.disconnect();
    } else if stream_keys.is_empty() {
      self.stream.update_subscriptions(stream_keys);
    } else {
      self.stream.connect(stream_keys);
    }

    // Polling side: an interval change needs a restart, a pure watchlist
    // change keeps the running schedule's phase.
    let interval = Duration::from_secs(config.feeds.poll_interval_secs);
    let interval_changed =
      config.feeds.poll_interval_secs != self.config.feeds.poll_interval_secs;

    if let Some(alpaca) = &self.alpaca {
      Self::apply_poller(alpaca, alpaca_tickers, interval, interval_changed);
    } else if !alpaca_tickers.is_empty() {
      warn!(
        symbols = alpaca_tickers.len(),
        "Alpaca credentials missing, alpaca-routed symbols are not polled"
      );
    }
    Self::apply_poller(&self.yahoo, yahoo_tickers, interval, interval_changed);

    info!(
      crypto = crypto_by_key.len(),
      equities = equity_by_ticker.len(),
      streaming = config.feeds.streaming_enabled,
      alerts = config.alerts.enabled,
      "Watchlist applied"
    );

    self.crypto_by_key = crypto_by_key;
    self.equity_by_ticker = equity_by_ticker;
    self.config = config;
  }

  /// Reconcile one poller with its ticker list.
  fn apply_poller<F: QuoteFetcher>(
    poller: &QuotePoller<F>,
    tickers: Vec<String>,
    interval: Duration,
    interval_changed: bool,
  ) {
    if tickers.is_empty() {
      poller.stop();
    } else if interval_changed || !poller.is_running() {
      poller.start(tickers, interval);
    } else {
      poller.update_tickers(tickers);
    }
  }

  /// Route one streamed tick to the cache and the evaluator.
  fn handle_stream_tick(&mut self, tick: StreamTick) {
    let Some(instrument) = self.crypto_by_key.get(&tick.product_id).cloned() else {
      // In-flight frames can trail an unsubscribe.
      debug!(product = %tick.product_id, "Tick for unsubscribed product dropped");
      return;
    };

    let mut observation = PriceObservation::new(tick.price, tick.open_24h, Utc::now());
    observation.high_24h = tick.high_24h;
    observation.low_24h = tick.low_24h;
    observation.volume_24h = tick.volume_24h;

    self.ingest("coinbase", &instrument, tick.product_id, observation);
  }

  /// Route one polled quote to the cache and the evaluator.
  fn handle_poll_update(&mut self, source: &'static str, update: PollUpdate) {
    let Some(instrument) = self.equity_by_ticker.get(&update.ticker).cloned() else {
      debug!(ticker = %update.ticker, "Quote for unlisted ticker dropped");
      return;
    };

    let observation =
      PriceObservation::new(update.quote.price, update.quote.previous_close, Utc::now());
    let key = instrument.product_key(self.config.feeds.display_currency);
    self.ingest(source, &instrument, key, observation);
  }

  /// Store an observation and trigger alert evaluation inline.
  fn ingest(
    &mut self,
    source: &'static str,
    instrument: &Instrument,
    key: ProductKey,
    observation: PriceObservation,
  ) {
    debug!(
      source,
      key = %key,
      price = observation.price,
      change_24h = observation.percent_change_24h,
      "Price update"
    );
    self.metrics.updates_total.with_label_values(&[source]).inc();
    self.cache.put(key, observation.clone());

    if !self.config.alerts.enabled {
      return;
    }
    if let Some(event) = self.evaluator.check(instrument, &observation, Utc::now()) {
      self.dispatch_alert(event);
    }
  }

  /// Deliver a fired alert to the sink and the outward broadcast.
  fn dispatch_alert(&mut self, event: AlertEvent) {
    info!(
      ticker = %event.ticker,
      condition = %event.condition,
      message = %event.message,
      "Alert fired"
    );
    let condition = event.condition.to_string();
    self
      .metrics
      .alerts_fired_total
      .with_label_values(&[condition.as_str()])
      .inc();

    self.sink.deliver(&event);
    let _ = self.alert_tx.send(event);
  }

  /// Count a per-ticker poll failure. The poller already logged it.
  fn handle_poll_failure(&self, provider: &'static str, failure: &PollFailure) {
    debug!(
      provider,
      ticker = %failure.ticker,
      error = %failure.error,
      "Poll failure counted"
    );
    self
      .metrics
      .poll_errors_total
      .with_label_values(&[provider, failure.error.reason()])
      .inc();
  }

  /// Track a streaming state transition in logs, metrics and readiness.
  fn handle_stream_state(&self, state: &ConnectionState) {
    let connected = state.is_connected();
    info!(state = %state, "Stream state changed");
    self.metrics.stream_connected.set(if connected { 1.0 } else { 0.0 });

    let healthy = connected || !self.wants_streaming();
    self.health.stream_healthy.store(healthy, Ordering::Relaxed);
  }

  /// Whether the current watchlist and settings call for a live stream.
  fn wants_streaming(&self) -> bool {
    self.config.feeds.streaming_enabled && !self.crypto_by_key.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use async_trait::async_trait;

  use super::*;
  use crate::adapters::feeds::StreamConfig;
  use crate::adapters::notify::LogNotifier;
  use crate::ports::quote_fetcher::{ProviderError, Quote};

  struct StubFetcher(&'static str);

  #[async_trait]
  impl QuoteFetcher for StubFetcher {
    fn provider_id(&self) -> &'static str {
      self.0
    }

    async fn fetch_quote(&self, _ticker: &str) -> Result<Quote, ProviderError> {
      Ok(Quote { price: 1.0, previous_close: 1.0 })
    }
  }

  #[derive(Default)]
  struct RecordingSink {
    events: Mutex<Vec<AlertEvent>>,
  }

  impl AlertSink for RecordingSink {
    fn deliver(&self, event: &AlertEvent) {
      self.events.lock().unwrap().push(event.clone());
    }
  }

  fn parse_config(content: &str) -> AppConfig {
    toml::from_str(content).expect("valid config")
  }

  /// An invalid endpoint keeps unit tests off the network: the worker
  /// parks in Failed instead of dialing out.
  fn offline_stream() -> CoinbaseStream {
    CoinbaseStream::new(StreamConfig {
      url: "not-a-valid-url".to_string(),
      ..StreamConfig::default()
    })
  }

  fn coordinator(
    config: &AppConfig,
    alpaca: Option<QuotePoller<StubFetcher>>,
    sink: Arc<dyn AlertSink>,
  ) -> FeedCoordinator<StubFetcher, StubFetcher> {
    let (_config_tx, config_rx) = watch::channel(config.clone());
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    FeedCoordinator::new(
      offline_stream(),
      alpaca,
      QuotePoller::new(StubFetcher("yahoo")),
      sink,
      Arc::new(MetricsRegistry::new().expect("metrics")),
      Arc::new(HealthState::new()),
      config_rx,
      shutdown_rx,
    )
  }

  #[tokio::test]
  async fn test_apply_config_partitions_watchlist() {
    let config = parse_config(
      r#"
      [engine]
      name = "test"

      [[symbols]]
      ticker = "BTC"
      kind = "crypto"

      [[symbols]]
      ticker = "AAPL"
      kind = "equity"
      provider = "alpaca"

      [[symbols]]
      ticker = "MSFT"
      kind = "equity"
      "#,
    );
    let mut coordinator = coordinator(
      &config,
      Some(QuotePoller::new(StubFetcher("alpaca"))),
      Arc::new(LogNotifier::new()),
    );

    coordinator.apply_config(config);

    assert!(coordinator.crypto_by_key.contains_key("BTC-USD"));
    assert!(coordinator.equity_by_ticker.contains_key("AAPL"));
    assert!(coordinator.equity_by_ticker.contains_key("MSFT"));
    assert!(coordinator.alpaca.as_ref().is_some_and(QuotePoller::is_running));
    assert!(coordinator.yahoo.is_running());
  }

  #[tokio::test]
  async fn test_poll_update_lands_in_cache_and_fires_alert() {
    let config = parse_config(
      r#"
      [engine]
      name = "test"

      [alerts]
      enabled = true

      [[symbols]]
      ticker = "AAPL"
      kind = "equity"

      [symbols.alert]
      above = 150.0
      "#,
    );
    let sink = Arc::new(RecordingSink::default());
    let mut coordinator = coordinator(&config, None, Arc::clone(&sink) as Arc<dyn AlertSink>);
    coordinator.apply_config(config);

    coordinator.handle_poll_update(
      "yahoo",
      PollUpdate {
        ticker: "AAPL".to_string(),
        quote: Quote { price: 190.12, previous_close: 188.0 },
      },
    );

    let obs = coordinator.cache.get("AAPL").expect("observation cached");
    assert_eq!(obs.price, 190.12);
    assert!((obs.percent_change_24h - 1.127_659_574).abs() < 1e-6);

    let events = sink.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert!(events[0].message.contains("AAPL above $150.00"));
  }

  #[tokio::test]
  async fn test_alerts_disabled_globally_suppresses_rules() {
    let config = parse_config(
      r#"
      [engine]
      name = "test"

      [[symbols]]
      ticker = "AAPL"
      kind = "equity"

      [symbols.alert]
      above = 150.0
      "#,
    );
    let sink = Arc::new(RecordingSink::default());
    let mut coordinator = coordinator(&config, None, Arc::clone(&sink) as Arc<dyn AlertSink>);
    coordinator.apply_config(config);

    coordinator.handle_poll_update(
      "yahoo",
      PollUpdate {
        ticker: "AAPL".to_string(),
        quote: Quote { price: 190.12, previous_close: 188.0 },
      },
    );

    assert!(coordinator.cache.get("AAPL").is_some());
    assert!(sink.events.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_tick_for_unknown_key_is_dropped() {
    let config = parse_config(
      r#"
      [engine]
      name = "test"

      [[symbols]]
      ticker = "BTC"
      kind = "crypto"
      "#,
    );
    let mut coordinator = coordinator(&config, None, Arc::new(LogNotifier::new()));
    coordinator.apply_config(config);

    coordinator.handle_stream_tick(StreamTick {
      product_id: "DOGE-USD".to_string(),
      price: 0.1,
      open_24h: 0.1,
      high_24h: None,
      low_24h: None,
      volume_24h: None,
    });

    assert!(coordinator.cache.is_empty());
  }

  #[tokio::test]
  async fn test_poll_failures_surface_in_metrics() {
    let config = parse_config(
      r#"
      [engine]
      name = "test"

      [[symbols]]
      ticker = "AAPL"
      kind = "equity"
      "#,
    );
    let coordinator = coordinator(&config, None, Arc::new(LogNotifier::new()));

    coordinator.handle_poll_failure(
      "yahoo",
      &PollFailure {
        ticker: "AAPL".to_string(),
        error: ProviderError::RateLimited,
      },
    );

    let body = coordinator.metrics.render();
    assert!(body.contains(
      "pricewatch_poll_errors_total{provider=\"yahoo\",reason=\"rate_limited\"} 1"
    ));
  }
}
