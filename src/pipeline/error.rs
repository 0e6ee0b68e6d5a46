//! Run-level error taxonomy
//!
//! Per-event conditions (malformed message, cold start, degenerate field) are
//! handled where they occur and never surface here. Only conditions that end
//! a run are represented by `PipelineError`.

use super::config::ConfigError;
use super::writer_backend::WriterError;

#[derive(Debug)]
pub enum PipelineError {
    /// Configuration rejected at startup, before any event was processed
    Config(ConfigError),
    /// Raw or derived log could not be written
    Writer(WriterError),
    Io(std::io::Error),
    /// A replayed raw log violates per-symbol sequence order
    OutOfOrder {
        symbol: String,
        previous: u64,
        found: u64,
    },
    /// A producer's buffer stayed full and the producer could not be reset
    BufferOverflow(String),
}

impl From<ConfigError> for PipelineError {
    fn from(err: ConfigError) -> Self {
        PipelineError::Config(err)
    }
}

impl From<WriterError> for PipelineError {
    fn from(err: WriterError) -> Self {
        PipelineError::Writer(err)
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err)
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Config(e) => write!(f, "Configuration error: {}", e),
            PipelineError::Writer(e) => write!(f, "Log writer error: {}", e),
            PipelineError::Io(e) => write!(f, "IO error: {}", e),
            PipelineError::OutOfOrder { symbol, previous, found } => write!(
                f,
                "Raw log out of order for {}: sequence {} follows {}",
                symbol, found, previous
            ),
            PipelineError::BufferOverflow(producer) => {
                write!(f, "Producer buffer overflow: {}", producer)
            }
        }
    }
}

impl std::error::Error for PipelineError {}
