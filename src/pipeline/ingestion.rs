//! Live ingestion - single merge loop over every producer channel
//!
//! Producers run concurrently, each behind its own bounded channel. This loop
//! is the only consumer: it takes one raw message at a time, in arrival order,
//! and hands it to the session, which sequences and persists it before any
//! feature state is touched. Cross-stream order is therefore arrival order and
//! is not reproducible between live runs; the recorded raw log is what replay
//! reproduces exactly.

use super::config::PipelineConfig;
use super::error::PipelineError;
use super::normalizer::RawMessage;
use super::session::{PipelineSession, SessionStats};
use super::snapshot::Snapshot;
use super::types::NormalizedEvent;
use super::writer_backend::RecordSink;
use crate::streamer_core::error_handler::StreamError;
use crate::streamer_core::producer::{producer_backoff, spawn_producer, Producer};
use std::future::Future;
use std::sync::Arc;
use std::task::Poll;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Duration, Instant};

const THROUGHPUT_LOG_SECS: u64 = 10;

/// Next message from any open channel
///
/// Polling starts one past the channel that delivered last, so a busy stream
/// cannot starve the others. Returns `None` once every channel is closed.
async fn next_message(
    receivers: &mut [mpsc::Receiver<RawMessage>],
    open: &mut [bool],
    cursor: &mut usize,
) -> Option<RawMessage> {
    std::future::poll_fn(|cx| {
        let n = receivers.len();
        for offset in 0..n {
            let i = (*cursor + offset) % n;
            if !open[i] {
                continue;
            }
            match receivers[i].poll_recv(cx) {
                Poll::Ready(Some(message)) => {
                    *cursor = (i + 1) % n;
                    return Poll::Ready(Some(message));
                }
                Poll::Ready(None) => open[i] = false,
                Poll::Pending => {}
            }
        }
        if open.iter().any(|o| *o) {
            Poll::Pending
        } else {
            Poll::Ready(None)
        }
    })
    .await
}

/// Drain producer channels into the session until a stop condition
///
/// Stops on the `stop` future (external signal), on the session's event
/// bound, or when every channel has closed. The session is always finished,
/// so both logs are flushed on every exit path.
pub async fn run_merge_loop<F>(
    mut session: PipelineSession,
    mut receivers: Vec<mpsc::Receiver<RawMessage>>,
    channel_capacity: usize,
    stop: F,
) -> Result<SessionStats, PipelineError>
where
    F: Future<Output = ()>,
{
    log::info!("🚀 Starting live ingestion");
    log::info!("   ├─ Producer channels: {}", receivers.len());
    log::info!("   └─ Waiting for events...");

    tokio::pin!(stop);
    let period = Duration::from_secs(THROUGHPUT_LOG_SECS);
    let mut throughput = interval_at(Instant::now() + period, period);
    let mut open = vec![true; receivers.len()];
    let mut cursor = 0usize;
    let mut window_count = 0u64;
    let mut last_log_time = std::time::Instant::now();
    let mut failure = None;

    loop {
        tokio::select! {
            _ = &mut stop => {
                log::info!("🛑 Stop signal received");
                break;
            }

            message = next_message(&mut receivers, &mut open, &mut cursor) => {
                let Some(raw) = message else {
                    log::warn!("⚠️  All producer channels closed, stopping ingestion");
                    break;
                };
                if let Err(e) = session.ingest_raw(&raw) {
                    log::error!("❌ Ingestion failed: {}", e);
                    failure = Some(e);
                    break;
                }
                window_count += 1;
                if session.is_done() {
                    log::info!("🛑 Max events reached");
                    break;
                }
            }

            _ = throughput.tick() => {
                let elapsed = last_log_time.elapsed().as_secs_f64();
                let queued: usize = receivers.iter().map(|rx| rx.len()).sum();
                let capacity = channel_capacity * receivers.len();
                log::info!(
                    "📊 Ingestion rate: {:.1} events/sec (total: {}) | queued: {}/{}",
                    window_count as f64 / elapsed.max(1e-9),
                    session.stats().events,
                    queued,
                    capacity
                );
                for (i, rx) in receivers.iter().enumerate() {
                    if open[i] && rx.len() > channel_capacity / 2 {
                        log::warn!(
                            "⚠️  Channel {} usage high: {}/{} ({}%)",
                            i,
                            rx.len(),
                            channel_capacity,
                            (rx.len() * 100) / channel_capacity.max(1)
                        );
                    }
                }
                window_count = 0;
                last_log_time = std::time::Instant::now();
            }
        }
    }

    let stats = session.finish()?;
    match failure {
        Some(e) => Err(e),
        None => Ok(stats),
    }
}

/// Record mode: spawn every producer, merge, and persist
///
/// A producer whose buffer kept overflowing through all of its resets ends
/// the run at once: the merge loop stops, both logs are flushed, and the run
/// returns `PipelineError::BufferOverflow`.
pub async fn run_record<F>(
    config: PipelineConfig,
    producers: Vec<Arc<dyn Producer>>,
    raw_sink: Box<dyn RecordSink<NormalizedEvent>>,
    snapshot_sink: Box<dyn RecordSink<Snapshot>>,
    max_events: Option<u64>,
    stop: F,
) -> Result<SessionStats, PipelineError>
where
    F: Future<Output = ()>,
{
    let channel_capacity = config.channel_buffer;
    let overflow_grace = Duration::from_millis(config.overflow_grace_ms);
    let (backoff_ms, retries) = (config.producer_backoff_ms, config.producer_retries);
    let session = PipelineSession::new(config, raw_sink, snapshot_sink, max_events)?;

    let (overflow_tx, mut overflow_rx) = mpsc::unbounded_channel::<String>();
    let mut receivers = Vec::with_capacity(producers.len());
    let mut supervisors = Vec::with_capacity(producers.len());
    for producer in producers {
        let (tx, rx) = mpsc::channel(channel_capacity);
        let name = producer.name();
        let handle = spawn_producer(producer, tx, overflow_grace, producer_backoff(backoff_ms, retries));
        supervisors.push(handle.abort_handle());
        receivers.push(rx);

        let overflow_tx = overflow_tx.clone();
        tokio::spawn(async move {
            match handle.await {
                Ok(Err(StreamError::BufferOverflow { producer, .. })) => {
                    let _ = overflow_tx.send(producer);
                }
                Ok(Err(e)) => log::warn!("⚠️  Producer {} ended with: {}", name, e),
                Ok(Ok(())) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => log::warn!("⚠️  Producer {} task failed: {}", name, e),
            }
        });
    }
    drop(overflow_tx);

    let mut overflowed: Option<String> = None;
    let overflow_seen = &mut overflowed;
    let overflow_reports = &mut overflow_rx;
    let stop_or_overflow = async move {
        tokio::select! {
            _ = stop => {}
            Some(producer) = overflow_reports.recv() => {
                log::error!("❌ Producer {} kept overflowing after every reset, ending run", producer);
                *overflow_seen = Some(producer);
            }
        }
    };

    let result = run_merge_loop(session, receivers, channel_capacity, stop_or_overflow).await;

    for supervisor in supervisors {
        supervisor.abort();
    }
    if overflowed.is_none() {
        overflowed = overflow_rx.try_recv().ok();
    }

    let stats = result?;
    match overflowed {
        Some(producer) => Err(PipelineError::BufferOverflow(producer)),
        None => Ok(stats),
    }
}
