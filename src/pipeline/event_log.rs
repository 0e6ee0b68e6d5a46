//! Ordered event log: the single insertion point for live events and the
//! reader for persisted raw logs
//!
//! Live events get their `sequence_no` here, in arrival order, and are
//! persisted before they are handed downstream. Replay reads the persisted
//! log back in file order and only checks that order, it never re-sequences.

use super::error::PipelineError;
use super::jsonl_writer::RawLogReader;
use super::types::{NormalizedEvent, PendingEvent};
use super::writer_backend::{RecordSink, WriterError};
use std::collections::HashMap;
use std::path::Path;

/// Single-writer sequencer for live ingestion
pub struct OrderedEventLog {
    sink: Box<dyn RecordSink<NormalizedEvent>>,
    last_sequence: HashMap<String, u64>,
    appended: u64,
}

impl OrderedEventLog {
    pub fn new(sink: Box<dyn RecordSink<NormalizedEvent>>) -> Self {
        log::debug!("Ordered event log writing to {} backend", sink.backend_type());
        Self { sink, last_sequence: HashMap::new(), appended: 0 }
    }

    /// Continue after whatever the sink already holds, so a second session
    /// appending to the same raw log keeps every symbol strictly increasing
    pub fn resume(mut sink: Box<dyn RecordSink<NormalizedEvent>>) -> Result<Self, WriterError> {
        let last_sequence = sink.persisted_sequences()?;
        if !last_sequence.is_empty() {
            let mut symbols: Vec<(&String, &u64)> = last_sequence.iter().collect();
            symbols.sort();
            log::info!("📎 Resuming raw log");
            for (i, (symbol, seq)) in symbols.iter().enumerate() {
                let branch = if i + 1 == symbols.len() { "└─" } else { "├─" };
                log::info!("   {} {} after sequence {}", branch, symbol, seq);
            }
        }

        let mut log = Self::new(sink);
        log.last_sequence = last_sequence;
        Ok(log)
    }

    /// Assign the next per-symbol sequence number, persist, and return the
    /// sequenced event for forwarding
    ///
    /// The event is only returned once the raw log accepted it, so anything
    /// the feature engine sees is also in the file.
    pub fn append(&mut self, pending: PendingEvent) -> Result<NormalizedEvent, WriterError> {
        let next = self.last_sequence.get(&pending.symbol).copied().unwrap_or(0) + 1;
        let event = NormalizedEvent::from_pending(next, pending);

        self.sink.append(&event)?;
        self.last_sequence.insert(event.symbol.clone(), next);
        self.appended += 1;

        Ok(event)
    }

    pub fn last_sequence(&self, symbol: &str) -> Option<u64> {
        self.last_sequence.get(symbol).copied()
    }

    pub fn appended(&self) -> u64 {
        self.appended
    }

    pub fn flush(&mut self) -> Result<(), WriterError> {
        self.sink.flush()
    }
}

/// Tracks per-symbol order of events coming back from a raw log
#[derive(Debug, Default)]
pub struct SequenceCheck {
    last: HashMap<String, u64>,
}

impl SequenceCheck {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `event` if its `sequence_no` is strictly above the previous one
    /// for the same symbol
    pub fn check(&mut self, event: &NormalizedEvent) -> Result<(), PipelineError> {
        match self.last.get(&event.symbol) {
            Some(&previous) if event.sequence_no <= previous => Err(PipelineError::OutOfOrder {
                symbol: event.symbol.clone(),
                previous,
                found: event.sequence_no,
            }),
            _ => {
                self.last.insert(event.symbol.clone(), event.sequence_no);
                Ok(())
            }
        }
    }
}

/// Replay source over a persisted raw log
///
/// Yields events in file order. Undecodable lines are logged and skipped;
/// an order violation ends the replay with `PipelineError::OutOfOrder`.
pub struct ReplayLog {
    reader: RawLogReader,
    check: SequenceCheck,
    malformed_lines: u64,
    failed: bool,
}

impl ReplayLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let reader = RawLogReader::open(path)?;
        log::info!("📂 Replaying raw log: {}", path.display());
        Ok(Self { reader, check: SequenceCheck::new(), malformed_lines: 0, failed: false })
    }

    pub fn malformed_lines(&self) -> u64 {
        self.malformed_lines
    }
}

impl Iterator for ReplayLog {
    type Item = Result<NormalizedEvent, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            match self.reader.next()? {
                Err(e) => {
                    self.failed = true;
                    return Some(Err(PipelineError::Io(e)));
                }
                Ok(Err(bad)) => {
                    self.malformed_lines += 1;
                    log::warn!("⚠️  Skipping raw log line {}: {}", bad.line_no, bad.reason);
                }
                Ok(Ok(event)) => {
                    if let Err(e) = self.check.check(&event) {
                        self.failed = true;
                        return Some(Err(e));
                    }
                    return Some(Ok(event));
                }
            }
        }
    }
}
