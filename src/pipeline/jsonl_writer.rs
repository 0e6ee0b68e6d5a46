//! Newline-delimited JSON logs: raw events in, snapshots out

use super::types::NormalizedEvent;
use super::writer_backend::{RecordSink, WriterError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Flush the buffered writer after this many records
const FLUSH_EVERY: u64 = 200;

/// The two fields of a persisted event needed to resume sequencing
#[derive(Deserialize)]
struct SequenceKey {
    symbol: String,
    sequence_no: u64,
}

/// Append-only JSONL writer for one record type
pub struct JsonlWriter<T> {
    file: BufWriter<File>,
    path: PathBuf,
    records_written: u64,
    bytes_written: u64,
    _record: PhantomData<fn(&T)>,
}

impl<T: Serialize> JsonlWriter<T> {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, WriterError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        log::info!("📝 Appending to: {}", path.display());

        Ok(Self {
            file: BufWriter::new(file),
            path: path.to_path_buf(),
            records_written: 0,
            bytes_written: 0,
            _record: PhantomData,
        })
    }

    pub fn write_record(&mut self, record: &T) -> Result<(), WriterError> {
        let json = serde_json::to_string(record)?;
        writeln!(self.file, "{}", json)?;

        self.records_written += 1;
        self.bytes_written += (json.len() + 1) as u64;

        if self.records_written % FLUSH_EVERY == 0 {
            self.file.flush()?;
        }

        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), WriterError> {
        self.file.flush()?;
        Ok(())
    }

    /// Flush and fsync. Consumes the writer so nothing can be appended after.
    pub fn close(mut self) -> Result<(), WriterError> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        log::debug!(
            "Closed {} ({} records, {} bytes)",
            self.path.display(),
            self.records_written,
            self.bytes_written
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }
}

impl<T> Drop for JsonlWriter<T> {
    fn drop(&mut self) {
        let _ = self.file.flush();
    }
}

impl<T: Serialize> RecordSink<T> for JsonlWriter<T> {
    fn append(&mut self, record: &T) -> Result<(), WriterError> {
        self.write_record(record)
    }

    fn flush(&mut self) -> Result<(), WriterError> {
        JsonlWriter::flush(self)
    }

    fn backend_type(&self) -> &'static str {
        "JSONL"
    }

    /// Scan the file for the highest `sequence_no` per symbol. Lines that
    /// carry no sequence are skipped.
    fn persisted_sequences(&mut self) -> Result<HashMap<String, u64>, WriterError> {
        self.file.flush()?;
        let reader = BufReader::new(File::open(&self.path)?);

        let mut last: HashMap<String, u64> = HashMap::new();
        for line in reader.lines() {
            let line = line?;
            let key: SequenceKey = match serde_json::from_str(&line) {
                Ok(key) => key,
                Err(_) => continue,
            };
            let entry = last.entry(key.symbol).or_insert(0);
            *entry = (*entry).max(key.sequence_no);
        }
        Ok(last)
    }
}

/// One line of a raw log that could not be decoded
#[derive(Debug)]
pub struct MalformedLine {
    pub line_no: usize,
    pub reason: String,
}

/// Reads a persisted raw event log in file order.
///
/// Blank lines are skipped; undecodable lines are yielded as `Err` so the
/// caller can log and drop them without stopping the replay.
pub struct RawLogReader {
    lines: std::io::Lines<BufReader<File>>,
    line_no: usize,
}

impl RawLogReader {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(Self { lines: BufReader::new(file).lines(), line_no: 0 })
    }
}

impl Iterator for RawLogReader {
    type Item = std::io::Result<Result<NormalizedEvent, MalformedLine>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            };
            self.line_no += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let parsed = NormalizedEvent::from_jsonl(trimmed).map_err(|e| MalformedLine {
                line_no: self.line_no,
                reason: e.to_string(),
            });
            return Some(Ok(parsed));
        }
    }
}
