//! Offline run modes: deterministic replay of a raw log and the synthetic
//! stream. Live recording lives in `ingestion`.

use super::config::PipelineConfig;
use super::error::PipelineError;
use super::event_log::ReplayLog;
use super::session::{PipelineSession, SessionStats};
use super::snapshot::Snapshot;
use super::synthetic::SyntheticFeed;
use super::types::NormalizedEvent;
use super::writer_backend::RecordSink;
use std::path::Path;

/// Replay a persisted raw log through a fresh session
///
/// Events keep the `sequence_no` they were recorded with. A sequence
/// violation in the file stops the replay and is returned as an error.
pub fn run_replay(
    config: PipelineConfig,
    raw_log: impl AsRef<Path>,
    snapshot_sink: Box<dyn RecordSink<Snapshot>>,
    max_events: Option<u64>,
) -> Result<SessionStats, PipelineError> {
    let mut session = PipelineSession::replay(config, snapshot_sink, max_events)?;
    let mut replay = ReplayLog::open(raw_log)?;

    log::info!("🚀 Starting replay");
    for event in replay.by_ref() {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                log::error!("❌ Replay aborted: {}", e);
                return Err(e);
            }
        };
        session.ingest_sequenced(&event)?;
        if session.is_done() {
            log::info!("🛑 Max events reached");
            break;
        }
    }

    if replay.malformed_lines() > 0 {
        log::warn!("⚠️  Skipped {} undecodable raw log lines", replay.malformed_lines());
    }
    session.finish()
}

/// Run the synthetic stream through a live-style session
///
/// Events are sequenced and persisted to `raw_sink` exactly like live
/// ingestion, so the raw log can be replayed afterwards.
pub fn run_synthetic(
    config: PipelineConfig,
    steps: u64,
    raw_sink: Box<dyn RecordSink<NormalizedEvent>>,
    snapshot_sink: Box<dyn RecordSink<Snapshot>>,
    max_events: Option<u64>,
) -> Result<SessionStats, PipelineError> {
    let seed = config.seed;
    let mut session = PipelineSession::new(config, raw_sink, snapshot_sink, max_events)?;

    log::info!("🚀 Starting synthetic stream");
    log::info!("   ├─ Steps: {}", steps);
    log::info!("   └─ Seed: {}", seed);

    for pending in SyntheticFeed::btc(steps, seed) {
        session.ingest_pending(pending)?;
        if session.is_done() {
            log::info!("🛑 Max events reached");
            break;
        }
    }

    session.finish()
}
