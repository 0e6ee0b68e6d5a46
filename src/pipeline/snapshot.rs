//! Snapshot record and the derived-log emitter

use super::cone::ConeResult;
use super::features::FeatureVector;
use super::field::FieldSummary;
use super::regime::RegimeStack;
use super::types::Venue;
use super::writer_backend::{RecordSink, WriterError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable market-state record, one line of the derived log
///
/// Field order and contents depend only on the sequenced event stream, so
/// two runs over the same raw log serialize to identical bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub symbol: String,
    pub venue: Venue,
    /// Sequence number of the trade print that triggered the snapshot
    pub sequence_no: u64,
    /// Venue time of that trade, or its receive time when the venue sent none
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    /// Trade prints seen in the session so far, across all symbols
    pub trades_seen: u64,
    /// One entry per scale, finest first
    pub features: Vec<FeatureVector>,
    pub regimes: RegimeStack,
    pub field: FieldSummary,
    pub cone: ConeResult,
}

impl Snapshot {
    pub fn from_jsonl(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Appends snapshots to the derived log
pub struct SnapshotEmitter {
    sink: Box<dyn RecordSink<Snapshot>>,
    emitted: u64,
}

impl SnapshotEmitter {
    pub fn new(sink: Box<dyn RecordSink<Snapshot>>) -> Self {
        Self { sink, emitted: 0 }
    }

    pub fn emit(&mut self, snapshot: &Snapshot) -> Result<(), WriterError> {
        self.sink.append(snapshot)?;
        self.emitted += 1;
        log::debug!(
            "📸 Snapshot {} #{} | {} / {} / {} / {}",
            snapshot.symbol,
            snapshot.sequence_no,
            snapshot.regimes.kingdom.label,
            snapshot.regimes.phylum.label,
            snapshot.regimes.class.label,
            snapshot.regimes.family.label
        );
        Ok(())
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn flush(&mut self) -> Result<(), WriterError> {
        self.sink.flush()
    }

    pub fn backend_type(&self) -> &'static str {
        self.sink.backend_type()
    }
}
