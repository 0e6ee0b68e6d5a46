//! Live producers: one task per venue stream or poll, each writing raw
//! messages into its own bounded channel
//!
//! ```text
//! Producer::run()  ──send_timeout──►  mpsc (channel_buffer)  ──►  merge loop
//!        ▲                                   │
//!        └──── supervise() resets on error ◄─┘ full for overflow_grace_ms
//! ```

use super::error_handler::{ExponentialBackoff, StreamError};
use crate::pipeline::normalizer::RawMessage;
use crate::pipeline::types::Venue;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REST_TIMEOUT: Duration = Duration::from_secs(10);
const WS_IDLE: Duration = Duration::from_secs(20);

const BACKOFF_MAX_MS: u64 = 30_000;

/// A venue stream or poll that pushes raw messages into a sink
#[async_trait]
pub trait Producer: Send + Sync {
    fn name(&self) -> String;

    fn venue(&self) -> Venue;

    /// Run until the stream ends or fails. Called again by the supervisor
    /// after every reset.
    async fn run(&self, sink: &ProducerSink) -> Result<(), StreamError>;
}

/// Sending half of one producer's bounded buffer
pub struct ProducerSink {
    name: String,
    venue: Venue,
    tx: mpsc::Sender<RawMessage>,
    overflow_grace: Duration,
    sent: AtomicU64,
}

impl ProducerSink {
    pub fn new(name: impl Into<String>, venue: Venue, tx: mpsc::Sender<RawMessage>, overflow_grace: Duration) -> Self {
        Self { name: name.into(), venue, tx, overflow_grace, sent: AtomicU64::new(0) }
    }

    /// Stamp and enqueue one raw message
    ///
    /// Waits at most `overflow_grace` for buffer space. A buffer that stays
    /// full is reported as `BufferOverflow` instead of dropping the message.
    pub async fn send(&self, body: String) -> Result<(), StreamError> {
        let message = RawMessage::new(self.venue, body);
        match self.tx.send_timeout(message, self.overflow_grace).await {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => Err(StreamError::BufferOverflow {
                producer: self.name.clone(),
                waited_ms: self.overflow_grace.as_millis() as u64,
            }),
            Err(SendTimeoutError::Closed(_)) => Err(StreamError::Closed),
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Reset schedule for one supervised producer, capped at 30 s per wait
pub fn producer_backoff(initial_ms: u64, retries: u32) -> ExponentialBackoff {
    ExponentialBackoff::new(initial_ms, BACKOFF_MAX_MS.max(initial_ms), retries)
}

/// Spawn a producer under supervision
///
/// The task ends when the merge loop drops its receiver (`Ok`) or when the
/// producer keeps failing after every retry (`Err` with the last failure).
pub fn spawn_producer(
    producer: Arc<dyn Producer>,
    tx: mpsc::Sender<RawMessage>,
    overflow_grace: Duration,
    backoff: ExponentialBackoff,
) -> JoinHandle<Result<(), StreamError>> {
    let sink = ProducerSink::new(producer.name(), producer.venue(), tx, overflow_grace);
    tokio::spawn(async move { supervise(producer, sink, backoff).await })
}

async fn supervise(
    producer: Arc<dyn Producer>,
    sink: ProducerSink,
    mut backoff: ExponentialBackoff,
) -> Result<(), StreamError> {
    let name = producer.name();
    log::info!("🔌 Producer started: {}", name);

    loop {
        let sent_before = sink.sent();
        let result = producer.run(&sink).await;
        if sink.sent() > sent_before {
            backoff.reset();
        }

        let failure = match result {
            Err(StreamError::Closed) => {
                log::info!("✅ Producer stopped: {}", name);
                return Ok(());
            }
            Ok(()) => {
                log::warn!("⚠️  {} stream ended, reconnecting", name);
                StreamError::Connect(format!("{} stream ended", name))
            }
            Err(e @ StreamError::BufferOverflow { .. }) => {
                log::error!("❌ {}, resetting producer", e);
                e
            }
            Err(e) => {
                log::warn!("⚠️  {} failed: {}", name, e);
                e
            }
        };

        if sink.is_closed() {
            log::info!("✅ Producer stopped: {}", name);
            return Ok(());
        }
        if backoff.sleep().await.is_err() {
            log::error!("❌ {} giving up: {}", name, failure);
            return Err(failure);
        }
    }
}

/// Splits one WebSocket text frame into the raw messages it carries
pub type FrameSplitter = fn(String) -> Vec<String>;

pub fn single_frame(frame: String) -> Vec<String> {
    vec![frame]
}

/// WebSocket stream producer
pub struct WsProducer {
    name: String,
    venue: Venue,
    url: String,
    /// Text frames sent right after connecting
    subscribe: Vec<String>,
    /// Text keepalive sent when the stream goes quiet; replies are not forwarded
    keepalive: Option<(&'static str, &'static str)>,
    split: FrameSplitter,
}

impl WsProducer {
    pub fn new(name: impl Into<String>, venue: Venue, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            venue,
            url: url.into(),
            subscribe: Vec::new(),
            keepalive: None,
            split: single_frame,
        }
    }

    pub fn with_subscribe(mut self, frames: Vec<String>) -> Self {
        self.subscribe = frames;
        self
    }

    /// `(ping, pong)` text pair
    pub fn with_keepalive(mut self, ping: &'static str, pong: &'static str) -> Self {
        self.keepalive = Some((ping, pong));
        self
    }

    pub fn with_splitter(mut self, split: FrameSplitter) -> Self {
        self.split = split;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn subscribe_frames(&self) -> &[String] {
        &self.subscribe
    }
}

#[async_trait]
impl Producer for WsProducer {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn venue(&self) -> Venue {
        self.venue
    }

    async fn run(&self, sink: &ProducerSink) -> Result<(), StreamError> {
        log::info!("🔗 Connecting {}: {}", self.name, self.url);
        let (ws_stream, _) = timeout(CONNECT_TIMEOUT, connect_async(self.url.as_str()))
            .await
            .map_err(|_| StreamError::Connect(format!("{} connect timed out", self.name)))?
            .map_err(|e| StreamError::Connect(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        for frame in &self.subscribe {
            write.send(Message::Text(frame.clone())).await?;
        }
        log::info!("✅ {} connected", self.name);

        let mut idle_ticks = 0u32;
        loop {
            let next = match timeout(WS_IDLE, read.next()).await {
                Ok(next) => next,
                Err(_) => {
                    idle_ticks += 1;
                    match self.keepalive {
                        Some((ping, _)) if idle_ticks < 2 => {
                            write.send(Message::Text(ping.to_string())).await?;
                            continue;
                        }
                        _ => return Err(StreamError::Protocol(format!("{} idle for {:?}", self.name, WS_IDLE * idle_ticks))),
                    }
                }
            };
            idle_ticks = 0;

            let Some(msg) = next else {
                return Ok(());
            };
            match msg? {
                Message::Text(text) => {
                    if matches!(self.keepalive, Some((_, pong)) if text == pong) {
                        continue;
                    }
                    for body in (self.split)(text) {
                        sink.send(body).await?;
                    }
                }
                Message::Ping(payload) => {
                    write.send(Message::Pong(payload)).await?;
                }
                Message::Close(frame) => {
                    log::warn!("⚠️  {} closed by venue: {:?}", self.name, frame);
                    return Ok(());
                }
                _ => {}
            }
        }
    }
}

/// Periodic REST poll; each response body is one raw message
pub struct RestPoller {
    name: String,
    venue: Venue,
    url: String,
    interval: Duration,
    client: reqwest::Client,
}

impl RestPoller {
    pub fn new(
        name: impl Into<String>,
        venue: Venue,
        url: impl Into<String>,
        interval: Duration,
    ) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .timeout(REST_TIMEOUT)
            .build()
            .map_err(|e| StreamError::Connect(e.to_string()))?;
        Ok(Self { name: name.into(), venue, url: url.into(), interval, client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Producer for RestPoller {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn venue(&self) -> Venue {
        self.venue
    }

    async fn run(&self, sink: &ProducerSink) -> Result<(), StreamError> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let response = self.client.get(&self.url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(StreamError::Protocol(format!("{} returned HTTP {}", self.name, status)));
            }
            let body = response.text().await?;
            sink.send(body).await?;
        }
    }
}
