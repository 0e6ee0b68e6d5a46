//! Writer backend trait for the append-only raw and derived logs

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug)]
pub enum WriterError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
}

impl From<std::io::Error> for WriterError {
    fn from(err: std::io::Error) -> Self {
        WriterError::Io(err)
    }
}

impl From<serde_json::Error> for WriterError {
    fn from(err: serde_json::Error) -> Self {
        WriterError::Serialization(err)
    }
}

impl std::fmt::Display for WriterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriterError::Io(e) => write!(f, "IO error: {}", e),
            WriterError::Serialization(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for WriterError {}

/// Append-only sink for one record type.
///
/// The pipeline downstream of sequencing is single-threaded, so sinks are
/// synchronous and owned by the session that writes to them.
pub trait RecordSink<T>: Send {
    /// Append a single record
    fn append(&mut self, record: &T) -> Result<(), WriterError>;

    /// Flush pending writes to storage
    fn flush(&mut self) -> Result<(), WriterError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;

    /// Highest `sequence_no` per symbol already in storage. Backends that
    /// start empty every run report nothing.
    fn persisted_sequences(&mut self) -> Result<HashMap<String, u64>, WriterError> {
        Ok(HashMap::new())
    }
}

/// In-memory sink. Clones share the same buffer, so a test can keep one
/// handle and hand the other to a session.
#[derive(Debug)]
pub struct MemorySink<T> {
    records: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for MemorySink<T> {
    fn clone(&self) -> Self {
        Self { records: Arc::clone(&self.records) }
    }
}

impl<T> Default for MemorySink<T> {
    fn default() -> Self {
        Self { records: Arc::new(Mutex::new(Vec::new())) }
    }
}

impl<T: Clone> MemorySink<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<T> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self.records.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send> RecordSink<T> for MemorySink<T> {
    fn append(&mut self, record: &T) -> Result<(), WriterError> {
        match self.records.lock() {
            Ok(mut guard) => guard.push(record.clone()),
            Err(poisoned) => poisoned.into_inner().push(record.clone()),
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), WriterError> {
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

/// Accepts and discards everything (replay runs do not re-persist raw events)
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl<T> RecordSink<T> for NullSink {
    fn append(&mut self, _record: &T) -> Result<(), WriterError> {
        Ok(())
    }

    fn flush(&mut self) -> Result<(), WriterError> {
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_shares_buffer() {
        let sink = MemorySink::<u64>::new();
        let mut handle: Box<dyn RecordSink<u64>> = Box::new(sink.clone());

        handle.append(&1).unwrap();
        handle.append(&2).unwrap();
        handle.flush().unwrap();

        assert_eq!(sink.records(), vec![1, 2]);
        assert_eq!(handle.backend_type(), "memory");
    }
}
