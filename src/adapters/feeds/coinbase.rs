//! Coinbase WebSocket Feed - Streaming Crypto Price Source
//!
//! Persistent ticker-channel client with auto-reconnect. A single worker
//! task owns the socket, the desired subscription set and the reconnect
//! state; callers drive it through a command channel and consume ticks
//! and connection-state transitions through explicit channels.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite};
use tracing::{debug, info, instrument, warn};

use crate::domain::instrument::ProductKey;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, tungstenite::Message>;

/// Lifecycle of the streaming connection, published on a watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no intent to have one.
    Disconnected,
    /// Handshake or initial subscribe in flight.
    Connecting,
    /// Live session, ticks flowing.
    Connected,
    /// Session lost; a retry is pending. Attempt numbering starts at 1.
    Reconnecting { attempt: u32 },
    /// Non-recoverable local failure. Only an explicit connect leaves it.
    Failed { reason: String },
}

impl ConnectionState {
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting(attempt {attempt})"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Configuration for the streaming client.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// WebSocket endpoint.
    pub url: String,
    /// First reconnect delay; doubles per attempt.
    pub base_delay: std::time::Duration,
    /// Reconnect delay ceiling.
    pub max_delay: std::time::Duration,
    /// Tick broadcast capacity.
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: "wss://ws-feed.exchange.coinbase.com".to_string(),
            base_delay: std::time::Duration::from_secs(1),
            max_delay: std::time::Duration::from_secs(60),
            channel_capacity: 4096,
        }
    }
}

impl StreamConfig {
    /// Delay before reconnect attempt `n`: `base * 2^(n-1)`, capped at the
    /// ceiling. Attempt numbering starts at 1.
    pub fn reconnect_delay(&self, attempt: u32) -> std::time::Duration {
        let exp = attempt.saturating_sub(1);
        if exp >= 32 {
            return self.max_delay;
        }
        self.base_delay.saturating_mul(1 << exp).min(self.max_delay)
    }
}

/// A normalized ticker frame from the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamTick {
    /// Product ID (e.g., "BTC-USD").
    pub product_id: String,
    /// Latest trade price.
    pub price: f64,
    /// 24h session open, the percent-change reference.
    pub open_24h: f64,
    /// 24h high, when present.
    pub high_24h: Option<f64>,
    /// 24h low, when present.
    pub low_24h: Option<f64>,
    /// 24h volume, when present.
    pub volume_24h: Option<f64>,
}

/// Why an inbound frame produced no tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Heartbeats, subscription acks, anything that is not a ticker.
    NotTicker,
    /// Body did not parse as JSON of the expected shape.
    Malformed,
    /// Ticker frame lacking a required field.
    MissingField(&'static str),
    /// Required numeric string failed to parse.
    BadNumber(&'static str),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotTicker => write!(f, "not a ticker frame"),
            Self::Malformed => write!(f, "malformed frame"),
            Self::MissingField(field) => write!(f, "missing {field}"),
            Self::BadNumber(field) => write!(f, "unparseable {field}"),
        }
    }
}

/// Outcome of decoding one text frame: a tick to forward, or a reason to
/// drop it and keep reading.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Tick(StreamTick),
    Skip(SkipReason),
}

/// Subscribe/unsubscribe envelope in the venue's wire shape.
#[derive(Debug, Serialize)]
struct SubscriptionMsg {
    #[serde(rename = "type")]
    msg_type: &'static str,
    product_ids: Vec<String>,
    channels: Vec<ChannelSpec>,
}

#[derive(Debug, Serialize)]
struct ChannelSpec {
    name: &'static str,
    product_ids: Vec<String>,
}

impl SubscriptionMsg {
    fn subscribe(product_ids: Vec<String>) -> Self {
        Self::envelope("subscribe", product_ids)
    }

    fn unsubscribe(product_ids: Vec<String>) -> Self {
        Self::envelope("unsubscribe", product_ids)
    }

    fn envelope(msg_type: &'static str, product_ids: Vec<String>) -> Self {
        Self {
            msg_type,
            product_ids: product_ids.clone(),
            channels: vec![ChannelSpec { name: "ticker", product_ids }],
        }
    }
}

/// Inbound ticker frame. Everything beyond `type` is optional on the wire;
/// validation decides what is required.
#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    msg_type: String,
    product_id: Option<String>,
    price: Option<String>,
    open_24h: Option<String>,
    high_24h: Option<String>,
    low_24h: Option<String>,
    volume_24h: Option<String>,
}

/// Decode one text frame, then validate it into a tick.
///
/// Skips never abort the session; the caller logs the reason at debug
/// and keeps reading. Optional day-range fields degrade to `None` when
/// absent or unparseable.
pub fn decode_frame(text: &str) -> FrameOutcome {
    let Ok(frame) = serde_json::from_str::<InboundFrame>(text) else {
        return FrameOutcome::Skip(SkipReason::Malformed);
    };
    if frame.msg_type != "ticker" {
        return FrameOutcome::Skip(SkipReason::NotTicker);
    }
    let Some(product_id) = frame.product_id else {
        return FrameOutcome::Skip(SkipReason::MissingField("product_id"));
    };
    let Some(price_raw) = frame.price else {
        return FrameOutcome::Skip(SkipReason::MissingField("price"));
    };
    let Ok(price) = price_raw.parse::<f64>() else {
        return FrameOutcome::Skip(SkipReason::BadNumber("price"));
    };
    let Some(open_raw) = frame.open_24h else {
        return FrameOutcome::Skip(SkipReason::MissingField("open_24h"));
    };
    let Ok(open_24h) = open_raw.parse::<f64>() else {
        return FrameOutcome::Skip(SkipReason::BadNumber("open_24h"));
    };

    FrameOutcome::Tick(StreamTick {
        product_id,
        price,
        open_24h,
        high_24h: frame.high_24h.and_then(|s| s.parse().ok()),
        low_24h: frame.low_24h.and_then(|s| s.parse().ok()),
        volume_24h: frame.volume_24h.and_then(|s| s.parse().ok()),
    })
}

/// Difference between the live subscription set and a desired one.
///
/// Returns `(to_remove, to_add)`: keys to unsubscribe (current minus
/// desired) and keys to subscribe (desired minus current), in that send
/// order. Unchanged keys appear in neither.
pub fn subscription_diff(
    current: &BTreeSet<ProductKey>,
    desired: &BTreeSet<ProductKey>,
) -> (Vec<ProductKey>, Vec<ProductKey>) {
    let to_remove = current.difference(desired).cloned().collect();
    let to_add = desired.difference(current).cloned().collect();
    (to_remove, to_add)
}

/// Commands the handle sends into the worker loop.
#[derive(Debug)]
enum StreamCommand {
    Connect(BTreeSet<ProductKey>),
    UpdateSubscriptions(BTreeSet<ProductKey>),
    Disconnect,
}

/// How a streaming session ended, deciding what the worker does next.
enum SessionEnd {
    /// Command channel closed; the process is going down.
    Shutdown,
    /// Explicit disconnect; back to idle with no retry.
    Disconnected,
    /// Transport died while intent is to stay connected; schedule a retry.
    Lost,
    /// Local non-recoverable failure; park in `Failed`.
    Fatal(String),
}

/// Handle to the streaming worker.
///
/// Cheap to clone channel endpoints behind one struct: commands in, ticks
/// and state out. Dropping the handle (or calling [`Self::shutdown`])
/// ends the worker.
pub struct CoinbaseStream {
    cmd_tx: mpsc::UnboundedSender<StreamCommand>,
    tick_tx: broadcast::Sender<StreamTick>,
    state_rx: watch::Receiver<ConnectionState>,
    worker: JoinHandle<()>,
}

impl CoinbaseStream {
    /// Spawns the worker task. The stream stays idle until `connect`.
    pub fn new(config: StreamConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (tick_tx, _) = broadcast::channel(config.channel_capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let worker = StreamWorker {
            config,
            cmd_rx,
            tick_tx: tick_tx.clone(),
            state_tx,
            desired: BTreeSet::new(),
            stay_connected: false,
            attempt: 0,
        };
        let worker = tokio::spawn(worker.run());

        Self { cmd_tx, tick_tx, state_rx, worker }
    }

    /// Opens (or re-affirms) the streaming session for the given keys.
    /// An empty set is a no-op and touches nothing.
    pub fn connect(&self, keys: BTreeSet<ProductKey>) {
        if keys.is_empty() {
            return;
        }
        let _ = self.cmd_tx.send(StreamCommand::Connect(keys));
    }

    /// Replaces the desired subscription set. On a live connection only
    /// the difference is sent; the connection is never torn down for this.
    pub fn update_subscriptions(&self, keys: BTreeSet<ProductKey>) {
        let _ = self.cmd_tx.send(StreamCommand::UpdateSubscriptions(keys));
    }

    /// Drops the intent to stay connected and closes any session.
    /// Safe in every state; a pending reconnect is cancelled.
    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(StreamCommand::Disconnect);
    }

    /// Get a receiver for normalized ticks.
    pub fn subscribe_ticks(&self) -> broadcast::Receiver<StreamTick> {
        self.tick_tx.subscribe()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Watch channel of state transitions, for status displays.
    pub fn state_stream(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Graceful teardown: disconnect, close the command channel and wait
    /// for the worker to exit.
    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(StreamCommand::Disconnect);
        drop(self.cmd_tx);
        let _ = self.worker.await;
    }
}

/// Single owner of all mutable streaming state.
struct StreamWorker {
    config: StreamConfig,
    cmd_rx: mpsc::UnboundedReceiver<StreamCommand>,
    tick_tx: broadcast::Sender<StreamTick>,
    state_tx: watch::Sender<ConnectionState>,
    /// Keys the caller wants subscribed, live connection or not.
    desired: BTreeSet<ProductKey>,
    /// Intent to hold a session. Cleared only by disconnect or fatal error.
    stay_connected: bool,
    /// Consecutive failed attempts; reset on successful subscribe.
    attempt: u32,
}

impl StreamWorker {
    #[instrument(skip(self), fields(url = %self.config.url))]
    async fn run(mut self) {
        loop {
            if !self.stay_connected || self.desired.is_empty() {
                // Idle: no session wanted (or nothing to subscribe). A
                // pending-retry state is parked; Failed stays visible
                // until an explicit connect.
                let parked = matches!(
                    *self.state_tx.borrow(),
                    ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
                );
                if parked {
                    self.set_state(ConnectionState::Disconnected);
                }
                match self.cmd_rx.recv().await {
                    Some(cmd) => self.apply_idle_command(cmd),
                    None => return,
                }
                continue;
            }

            match self.run_session().await {
                SessionEnd::Shutdown => return,
                SessionEnd::Disconnected => {}
                SessionEnd::Lost => {
                    self.attempt += 1;
                    self.set_state(ConnectionState::Reconnecting { attempt: self.attempt });
                    if !self.backoff().await {
                        return;
                    }
                }
                SessionEnd::Fatal(reason) => {
                    warn!(reason = %reason, "stream failed, waiting for explicit connect");
                    self.stay_connected = false;
                    self.set_state(ConnectionState::Failed { reason });
                }
            }
        }
    }

    /// Command handling outside a session and outside a backoff wait.
    fn apply_idle_command(&mut self, cmd: StreamCommand) {
        match cmd {
            StreamCommand::Connect(keys) => {
                if keys.is_empty() {
                    return;
                }
                self.desired = keys;
                self.stay_connected = true;
            }
            StreamCommand::UpdateSubscriptions(keys) => {
                // No session to diff against; the set takes effect when
                // a session next starts.
                self.desired = keys;
            }
            StreamCommand::Disconnect => {
                self.desired.clear();
                self.stay_connected = false;
                self.attempt = 0;
                self.set_state(ConnectionState::Disconnected);
            }
        }
    }

    /// One connection session: handshake, full subscribe, then stream
    /// until a command or the transport ends it.
    async fn run_session(&mut self) -> SessionEnd {
        self.set_state(ConnectionState::Connecting);

        let ws_stream = match connect_async(self.config.url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(tungstenite::Error::Url(e)) => return SessionEnd::Fatal(e.to_string()),
            Err(e) => {
                warn!(error = %e, "stream connect failed");
                return SessionEnd::Lost;
            }
        };
        let (mut write, mut read) = ws_stream.split();

        let full_set: Vec<ProductKey> = self.desired.iter().cloned().collect();
        if let Err(e) = send_subscription(&mut write, &SubscriptionMsg::subscribe(full_set)).await {
            warn!(error = %e, "initial subscribe failed");
            return SessionEnd::Lost;
        }

        self.attempt = 0;
        self.set_state(ConnectionState::Connected);
        info!(products = self.desired.len(), "stream connected");

        loop {
            tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => match cmd {
                    None => {
                        let _ = write.send(tungstenite::Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                    Some(StreamCommand::Disconnect) => {
                        self.desired.clear();
                        self.stay_connected = false;
                        self.attempt = 0;
                        let _ = write.send(tungstenite::Message::Close(None)).await;
                        self.set_state(ConnectionState::Disconnected);
                        return SessionEnd::Disconnected;
                    }
                    Some(StreamCommand::Connect(keys)) => {
                        // Already connected: re-affirm intent, apply as a diff.
                        if !keys.is_empty() {
                            if let Err(e) = self.apply_diff(&mut write, keys).await {
                                warn!(error = %e, "subscription update failed");
                                return SessionEnd::Lost;
                            }
                        }
                    }
                    Some(StreamCommand::UpdateSubscriptions(keys)) => {
                        if let Err(e) = self.apply_diff(&mut write, keys).await {
                            warn!(error = %e, "subscription update failed");
                            return SessionEnd::Lost;
                        }
                    }
                },
                frame = read.next() => match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(tungstenite::Message::Ping(payload))) => {
                        // Pong is handled automatically by tungstenite
                        debug!(len = payload.len(), "stream ping");
                    }
                    Some(Ok(tungstenite::Message::Close(_))) => {
                        warn!("stream closed by server");
                        return SessionEnd::Lost;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "stream transport error");
                        return SessionEnd::Lost;
                    }
                    None => {
                        warn!("stream ended");
                        return SessionEnd::Lost;
                    }
                },
            }
        }
    }

    /// Sends the difference to the desired set over the live connection:
    /// unsubscribe first, then subscribe. Unchanged keys are untouched.
    async fn apply_diff(&mut self, write: &mut WsSink, desired: BTreeSet<ProductKey>) -> Result<()> {
        let (to_remove, to_add) = subscription_diff(&self.desired, &desired);
        self.desired = desired;

        if to_remove.is_empty() && to_add.is_empty() {
            return Ok(());
        }
        info!(removed = to_remove.len(), added = to_add.len(), "updating subscriptions");

        if !to_remove.is_empty() {
            send_subscription(write, &SubscriptionMsg::unsubscribe(to_remove)).await?;
        }
        if !to_add.is_empty() {
            send_subscription(write, &SubscriptionMsg::subscribe(to_add)).await?;
        }
        Ok(())
    }

    /// Decode a text frame; forward ticks, drop everything else.
    fn handle_text(&self, text: &str) {
        match decode_frame(text) {
            FrameOutcome::Tick(tick) => {
                // Broadcast (ignore if no receivers)
                let _ = self.tick_tx.send(tick);
            }
            FrameOutcome::Skip(reason) => {
                debug!(reason = %reason, "frame skipped");
            }
        }
    }

    /// Waits out the retry delay while staying responsive to commands.
    /// Disconnect cancels the pending attempt; an explicit connect skips
    /// the rest of the wait. Returns false when the channel closed.
    async fn backoff(&mut self) -> bool {
        let delay = self.config.reconnect_delay(self.attempt);
        warn!(attempt = self.attempt, delay_ms = delay.as_millis(), "stream lost, retry scheduled");

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => match cmd {
                    None => return false,
                    Some(StreamCommand::Disconnect) => {
                        self.desired.clear();
                        self.stay_connected = false;
                        self.attempt = 0;
                        self.set_state(ConnectionState::Disconnected);
                        return true;
                    }
                    Some(StreamCommand::Connect(keys)) => {
                        if !keys.is_empty() {
                            self.desired = keys;
                            self.stay_connected = true;
                            return true;
                        }
                    }
                    Some(StreamCommand::UpdateSubscriptions(keys)) => {
                        // The retry will subscribe the newest full set.
                        self.desired = keys;
                    }
                },
                () = &mut sleep => return true,
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        debug!(state = %state, "connection state");
        let _ = self.state_tx.send(state);
    }
}

/// Serialize and send one subscription envelope.
async fn send_subscription(write: &mut WsSink, msg: &SubscriptionMsg) -> Result<()> {
    let json = serde_json::to_string(msg).context("Failed to serialize subscription")?;
    write
        .send(tungstenite::Message::Text(json))
        .await
        .context("Failed to send subscription")?;
    Ok(())
}
