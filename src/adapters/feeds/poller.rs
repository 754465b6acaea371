//! Quote Poller - Interval-Driven REST Ingestion Worker
//!
//! Generic over the `QuoteFetcher` port: one poller instance per REST
//! provider. Runs an immediate pass on start, then repeats on a fixed
//! interval. A generation stamp plus a stop signal make cancellation
//! visible at every suspension point, so a stopped run can never deliver
//! a late result.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ports::quote_fetcher::{ProviderError, Quote, QuoteFetcher};

/// A successfully fetched quote for one ticker.
#[derive(Debug, Clone)]
pub struct PollUpdate {
    pub ticker: String,
    pub quote: Quote,
}

/// A failed fetch for one ticker. Other tickers in the cycle proceed.
#[derive(Debug, Clone)]
pub struct PollFailure {
    pub ticker: String,
    pub error: ProviderError,
}

/// State of the currently running cycle, if any.
struct ActiveRun {
    /// Live ticker set; swapped in place without touching the schedule.
    tickers: Arc<RwLock<Vec<String>>>,
    /// Wakes the worker out of its interval sleep.
    stop_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Interval-driven polling worker over one quote provider.
pub struct QuotePoller<F: QuoteFetcher> {
    fetcher: Arc<F>,
    update_tx: broadcast::Sender<PollUpdate>,
    failure_tx: broadcast::Sender<PollFailure>,
    /// Bumped on every start/stop; a worker only emits while its own
    /// stamp is current.
    generation: Arc<AtomicU64>,
    run: Mutex<Option<ActiveRun>>,
}

impl<F: QuoteFetcher> QuotePoller<F> {
    pub fn new(fetcher: F) -> Self {
        let (update_tx, _) = broadcast::channel(1024);
        let (failure_tx, _) = broadcast::channel(1024);

        Self {
            fetcher: Arc::new(fetcher),
            update_tx,
            failure_tx,
            generation: Arc::new(AtomicU64::new(0)),
            run: Mutex::new(None),
        }
    }

    /// Provider name, for routing and logs.
    pub fn provider_id(&self) -> &'static str {
        self.fetcher.provider_id()
    }

    /// Get a receiver for fetched quotes.
    pub fn subscribe_updates(&self) -> broadcast::Receiver<PollUpdate> {
        self.update_tx.subscribe()
    }

    /// Get a receiver for per-ticker fetch failures.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<PollFailure> {
        self.failure_tx.subscribe()
    }

    /// Starts polling: one immediate pass, then every `interval`.
    ///
    /// A running cycle is stopped first, never overlapped. An empty
    /// ticker list leaves the poller stopped.
    pub fn start(&self, tickers: Vec<String>, interval: Duration) {
        let my_generation = self.halt_current();
        if tickers.is_empty() {
            return;
        }

        let tickers = Arc::new(RwLock::new(tickers));
        let (stop_tx, stop_rx) = broadcast::channel(1);

        let worker = PollWorker {
            fetcher: Arc::clone(&self.fetcher),
            tickers: Arc::clone(&tickers),
            update_tx: self.update_tx.clone(),
            failure_tx: self.failure_tx.clone(),
            generation: Arc::clone(&self.generation),
            my_generation,
            interval,
        };
        let handle = tokio::spawn(worker.run(stop_rx));

        *self.run.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(ActiveRun { tickers, stop_tx, handle });
    }

    /// Stops polling. In-flight requests may finish, but their results
    /// are discarded; nothing is emitted after this returns.
    pub fn stop(&self) {
        self.halt_current();
    }

    /// Replaces the polled ticker set without restarting the schedule;
    /// the next cycle picks it up. No effect while stopped.
    pub fn update_tickers(&self, tickers: Vec<String>) {
        let guard = self.run.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(run) = guard.as_ref() {
            *run.tickers.write().unwrap_or_else(PoisonError::into_inner) = tickers;
        }
    }

    pub fn is_running(&self) -> bool {
        self.run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|run| !run.handle.is_finished())
    }

    /// Invalidates the current generation and signals the worker.
    /// Returns the new generation stamp for a successor run.
    fn halt_current(&self) -> u64 {
        let new_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(run) = self
            .run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = run.stop_tx.send(());
        }
        new_generation
    }
}

/// One polling run; owns nothing shared except channel senders.
struct PollWorker<F: QuoteFetcher> {
    fetcher: Arc<F>,
    tickers: Arc<RwLock<Vec<String>>>,
    update_tx: broadcast::Sender<PollUpdate>,
    failure_tx: broadcast::Sender<PollFailure>,
    generation: Arc<AtomicU64>,
    my_generation: u64,
    interval: Duration,
}

impl<F: QuoteFetcher> PollWorker<F> {
    async fn run(self, mut stop_rx: broadcast::Receiver<()>) {
        info!(
            provider = self.fetcher.provider_id(),
            interval_secs = self.interval.as_secs(),
            "polling started"
        );

        loop {
            self.poll_cycle().await;
            if !self.is_current() {
                break;
            }

            tokio::select! {
                _ = stop_rx.recv() => break,
                () = tokio::time::sleep(self.interval) => {}
            }
            // Re-check after the sleep: a stop during the wait must not
            // leak one more cycle.
            if !self.is_current() {
                break;
            }
        }

        debug!(provider = self.fetcher.provider_id(), "polling stopped");
    }

    /// One pass over the current ticker set. Failures are reported per
    /// ticker and never abort the rest of the pass.
    async fn poll_cycle(&self) {
        let tickers: Vec<String> = self
            .tickers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for ticker in tickers {
            if !self.is_current() {
                return;
            }
            match self.fetcher.fetch_quote(&ticker).await {
                Ok(quote) => {
                    // Post-request check: a stop while the request was in
                    // flight discards the result.
                    if !self.is_current() {
                        return;
                    }
                    let _ = self.update_tx.send(PollUpdate { ticker, quote });
                }
                Err(error) => {
                    if !self.is_current() {
                        return;
                    }
                    warn!(
                        provider = self.fetcher.provider_id(),
                        ticker = %ticker,
                        error = %error,
                        "quote fetch failed"
                    );
                    let _ = self.failure_tx.send(PollFailure { ticker, error });
                }
            }
        }
    }

    fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.my_generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::time::timeout;

    /// Scripted fetcher: errors on tickers listed in `failing`.
    struct StubFetcher {
        failing: Vec<&'static str>,
    }

    #[async_trait]
    impl QuoteFetcher for StubFetcher {
        fn provider_id(&self) -> &'static str {
            "stub"
        }

        async fn fetch_quote(&self, ticker: &str) -> Result<Quote, ProviderError> {
            if self.failing.contains(&ticker) {
                return Err(ProviderError::SymbolNotFound(ticker.to_string()));
            }
            Ok(Quote { price: 100.0, previous_close: 99.0 })
        }
    }

    fn poller(failing: Vec<&'static str>) -> QuotePoller<StubFetcher> {
        QuotePoller::new(StubFetcher { failing })
    }

    #[tokio::test]
    async fn test_start_with_empty_list_stays_stopped() {
        let poller = poller(vec![]);
        poller.start(vec![], Duration::from_millis(50));
        assert!(!poller.is_running());
    }

    #[tokio::test]
    async fn test_first_pass_is_immediate() {
        let poller = poller(vec![]);
        let mut updates = poller.subscribe_updates();

        // Long interval: only the immediate pass can produce this.
        poller.start(vec!["AAPL".to_string()], Duration::from_secs(3600));

        let update = timeout(Duration::from_secs(2), updates.recv())
            .await
            .expect("update within first pass")
            .expect("channel open");
        assert_eq!(update.ticker, "AAPL");
        assert_eq!(update.quote.price, 100.0);
        poller.stop();
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_ticker() {
        let poller = poller(vec!["BAD"]);
        let mut updates = poller.subscribe_updates();
        let mut failures = poller.subscribe_failures();

        poller.start(
            vec!["BAD".to_string(), "MSFT".to_string()],
            Duration::from_secs(3600),
        );

        let failure = timeout(Duration::from_secs(2), failures.recv())
            .await
            .expect("failure reported")
            .expect("channel open");
        assert_eq!(failure.ticker, "BAD");
        assert_eq!(failure.error, ProviderError::SymbolNotFound("BAD".to_string()));

        // The same cycle still delivers the healthy ticker.
        let update = timeout(Duration::from_secs(2), updates.recv())
            .await
            .expect("update despite sibling failure")
            .expect("channel open");
        assert_eq!(update.ticker, "MSFT");
        poller.stop();
    }

    #[tokio::test]
    async fn test_stop_silences_the_channel() {
        let poller = poller(vec![]);
        let mut updates = poller.subscribe_updates();

        poller.start(vec!["AAPL".to_string()], Duration::from_millis(20));
        let _ = timeout(Duration::from_secs(2), updates.recv()).await;

        poller.stop();
        tokio::time::sleep(Duration::from_millis(60)).await;

        // Drain anything sent before the stop was observed, then verify
        // silence over several would-be cycles.
        while updates.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(updates.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_restart_after_stop_runs_a_fresh_cycle() {
        let poller = poller(vec![]);
        let mut updates = poller.subscribe_updates();

        poller.start(vec!["AAPL".to_string()], Duration::from_millis(20));
        let _ = timeout(Duration::from_secs(2), updates.recv()).await;
        poller.stop();
        assert!(!poller.is_running());

        poller.start(vec!["TSLA".to_string()], Duration::from_millis(20));
        assert!(poller.is_running());

        // Only the new watchlist appears once the restart takes over;
        // updates buffered before the stop may still drain first.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let update = timeout(Duration::from_secs(2), updates.recv())
                .await
                .expect("restarted cycle emits")
                .expect("channel open");
            if update.ticker == "TSLA" {
                break;
            }
            assert_eq!(update.ticker, "AAPL");
            assert!(
                tokio::time::Instant::now() < deadline,
                "restart never emitted"
            );
        }
        poller.stop();
    }

    #[tokio::test]
    async fn test_update_tickers_swaps_set_mid_run() {
        let poller = poller(vec![]);
        let mut updates = poller.subscribe_updates();

        poller.start(vec!["AAPL".to_string()], Duration::from_millis(20));
        let first = timeout(Duration::from_secs(2), updates.recv())
            .await
            .expect("initial update")
            .expect("channel open");
        assert_eq!(first.ticker, "AAPL");

        poller.update_tickers(vec!["TSLA".to_string()]);

        // Within a few cycles only the new ticker shows up.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let update = timeout(Duration::from_secs(2), updates.recv())
                .await
                .expect("updates keep flowing")
                .expect("channel open");
            if update.ticker == "TSLA" {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "new ticker never picked up"
            );
        }
        poller.stop();
    }
}
