//! Run-scoped pipeline context
//!
//! A session is created once per run and owns everything stateful: the
//! engine, the ordered event log, the snapshot emitter and the run counters.
//! `finish` is the teardown: it flushes both logs and reports the totals.

use super::config::PipelineConfig;
use super::engine::PipelineEngine;
use super::error::PipelineError;
use super::event_log::OrderedEventLog;
use super::normalizer::{NormalizeError, Normalizer, RawMessage};
use super::regime::TransitionCounts;
use super::snapshot::{Snapshot, SnapshotEmitter};
use super::types::{NormalizedEvent, PendingEvent};
use super::writer_backend::{NullSink, RecordSink};
use serde::Serialize;

/// Totals for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    /// Events forwarded to the engine
    pub events: u64,
    pub snapshots: u64,
    /// Raw messages dropped by the normalizer
    pub malformed: u64,
    /// Control frames that carried no market data
    pub ignored: u64,
    pub transitions: TransitionCounts,
}

pub struct PipelineSession {
    engine: PipelineEngine,
    normalizer: Normalizer,
    event_log: OrderedEventLog,
    emitter: SnapshotEmitter,
    max_events: Option<u64>,
    stats: SessionStats,
}

impl PipelineSession {
    /// Session for live or synthetic ingestion: events are sequenced and
    /// persisted to `raw_sink` before they reach the engine
    pub fn new(
        config: PipelineConfig,
        raw_sink: Box<dyn RecordSink<NormalizedEvent>>,
        snapshot_sink: Box<dyn RecordSink<Snapshot>>,
        max_events: Option<u64>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        log::info!("🧭 Pipeline session");
        log::info!("   ├─ Scales: {}", describe_scales(&config));
        log::info!("   ├─ Snapshot every {} trade prints", config.snapshot_every_trades);
        log::info!("   ├─ Cone: {} paths x {} steps", config.cone.paths, config.cone.steps);
        log::info!("   ├─ Raw log backend: {}", raw_sink.backend_type());
        log::info!("   ├─ Snapshot backend: {}", snapshot_sink.backend_type());
        match max_events {
            Some(n) => log::info!("   └─ Max events: {}", n),
            None => log::info!("   └─ Max events: unbounded"),
        }

        let event_log = OrderedEventLog::resume(raw_sink)?;

        Ok(Self {
            normalizer: Normalizer::new(config.book_depth),
            engine: PipelineEngine::new(config),
            event_log,
            emitter: SnapshotEmitter::new(snapshot_sink),
            max_events,
            stats: SessionStats::default(),
        })
    }

    /// Session for replay: events arrive already sequenced and are not
    /// persisted again
    pub fn replay(
        config: PipelineConfig,
        snapshot_sink: Box<dyn RecordSink<Snapshot>>,
        max_events: Option<u64>,
    ) -> Result<Self, PipelineError> {
        Self::new(config, Box::new(NullSink), snapshot_sink, max_events)
    }

    /// Normalize, sequence and forward one raw venue message
    ///
    /// Malformed messages are logged, counted and dropped.
    pub fn ingest_raw(&mut self, raw: &RawMessage) -> Result<Option<Snapshot>, PipelineError> {
        match self.normalizer.normalize(raw) {
            Ok(Some(pending)) => self.ingest_pending(pending),
            Ok(None) => {
                self.stats.ignored += 1;
                Ok(None)
            }
            Err(e @ NormalizeError::MalformedMessage { .. }) | Err(e @ NormalizeError::UnknownSymbol(_)) => {
                self.stats.malformed += 1;
                log::warn!("⚠️  Dropped message: {}", e);
                Ok(None)
            }
        }
    }

    /// Sequence, persist and forward one canonical event
    pub fn ingest_pending(&mut self, pending: PendingEvent) -> Result<Option<Snapshot>, PipelineError> {
        if self.is_done() {
            return Ok(None);
        }
        let event = self.event_log.append(pending)?;
        self.forward(&event)
    }

    /// Forward an event that already carries its `sequence_no` (replay)
    pub fn ingest_sequenced(&mut self, event: &NormalizedEvent) -> Result<Option<Snapshot>, PipelineError> {
        if self.is_done() {
            return Ok(None);
        }
        self.forward(event)
    }

    fn forward(&mut self, event: &NormalizedEvent) -> Result<Option<Snapshot>, PipelineError> {
        self.stats.events += 1;

        let Some(snapshot) = self.engine.process_event(event) else {
            return Ok(None);
        };
        self.emitter.emit(&snapshot)?;
        self.stats.snapshots += 1;
        Ok(Some(snapshot))
    }

    /// The configured event bound has been reached
    pub fn is_done(&self) -> bool {
        self.max_events.map_or(false, |max| self.stats.events >= max)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats { transitions: self.engine.transitions(), ..self.stats.clone() }
    }

    pub fn engine(&self) -> &PipelineEngine {
        &self.engine
    }

    /// Flush both logs and return the run totals
    pub fn finish(mut self) -> Result<SessionStats, PipelineError> {
        log::info!("🔄 Flushing logs...");
        self.event_log.flush()?;
        self.emitter.flush()?;

        let stats = self.stats();
        log::info!("✅ Session complete");
        log::info!("   ├─ Events: {}", stats.events);
        log::info!("   ├─ Snapshots: {}", stats.snapshots);
        log::info!("   ├─ Malformed: {} (ignored control frames: {})", stats.malformed, stats.ignored);
        log::info!(
            "   └─ Transitions: kingdom {} / phylum {} / class {} / family {}",
            stats.transitions.kingdom,
            stats.transitions.phylum,
            stats.transitions.class,
            stats.transitions.family
        );
        Ok(stats)
    }
}

fn describe_scales(config: &PipelineConfig) -> String {
    config
        .scale_specs()
        .iter()
        .map(|s| format!("{}={}", s.name, s.window))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::config::ConeConfig;
    use crate::pipeline::types::Venue;
    use crate::pipeline::writer_backend::MemorySink;

    fn test_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.snapshot_every_trades = 2;
        config.cone = ConeConfig { steps: 10, paths: 50, ..ConeConfig::default() };
        config
    }

    fn agg_trade(price: &str, maker: bool) -> RawMessage {
        RawMessage::new(
            Venue::Binance,
            format!(
                r#"{{"e":"aggTrade","E":1700000000000,"s":"BTCUSDT","p":"{}","q":"1","T":1700000000000,"m":{}}}"#,
                price, maker
            ),
        )
    }

    #[test]
    fn test_raw_messages_flow_to_both_logs() {
        let raw = MemorySink::new();
        let snapshots = MemorySink::new();
        let mut session =
            PipelineSession::new(test_config(), Box::new(raw.clone()), Box::new(snapshots.clone()), None).unwrap();

        assert!(session.ingest_raw(&agg_trade("100.0", false)).unwrap().is_none());
        assert!(session.ingest_raw(&RawMessage::new(Venue::Binance, "{not json")).unwrap().is_none());
        let snapshot = session.ingest_raw(&agg_trade("101.0", true)).unwrap().unwrap();
        assert_eq!(snapshot.sequence_no, 2);

        let stats = session.finish().unwrap();
        assert_eq!(stats.events, 2);
        assert_eq!(stats.snapshots, 1);
        assert_eq!(stats.malformed, 1);

        let persisted: Vec<u64> = raw.records().iter().map(|e| e.sequence_no).collect();
        assert_eq!(persisted, vec![1, 2]);
        assert_eq!(snapshots.len(), 1);
    }

    #[test]
    fn test_max_events_bound() {
        let raw = MemorySink::new();
        let mut session =
            PipelineSession::new(test_config(), Box::new(raw.clone()), Box::new(MemorySink::new()), Some(3))
                .unwrap();

        for i in 0..10 {
            session.ingest_raw(&agg_trade(&format!("{}", 100 + i), false)).unwrap();
        }
        assert!(session.is_done());
        assert_eq!(session.stats().events, 3);
        assert_eq!(raw.len(), 3);
    }

    #[test]
    fn test_invalid_config_fails_before_ingestion() {
        let mut config = test_config();
        config.snapshot_every_trades = 0;
        let result = PipelineSession::replay(config, Box::new(MemorySink::new()), None);
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }
}
