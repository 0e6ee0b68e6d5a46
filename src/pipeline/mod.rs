//! # Market-state pipeline
//!
//! ```text
//! venue producers ──► bounded channels ──► merge loop (ingestion)
//!                                               │
//!                      raw message ──► Normalizer ──► OrderedEventLog ──► raw JSONL log
//!                                                          │ sequence_no
//!                                                          ▼
//!             FeatureEngine ──► RegimeClassifier ──► PotentialField ──► ConeForecaster
//!                                                          │
//!                                                          ▼
//!                                                   Snapshot ──► derived JSONL log
//! ```
//!
//! Everything below the ordered event log is single-threaded and driven only
//! by sequenced events, so replaying a raw log reproduces the derived log
//! byte for byte.
//!
//! ## Module Organization
//!
//! - `types` - canonical events and payloads
//! - `config` - typed TOML configuration, validated at startup
//! - `normalizer` - venue messages to canonical events
//! - `event_log`, `jsonl_writer`, `writer_backend` - sequencing and append-only logs
//! - `windows`, `features`, `stats` - multi-scale feature vectors
//! - `regime` - ordered rule tables per hierarchy level
//! - `field`, `cone` - potential field and trajectory cone
//! - `engine`, `snapshot`, `session` - per-event processing and run context
//! - `ingestion`, `runner`, `synthetic` - live, replay and synthetic run modes

pub mod cone;
pub mod config;
pub mod engine;
pub mod error;
pub mod event_log;
pub mod features;
pub mod field;
pub mod ingestion;
pub mod jsonl_writer;
pub mod normalizer;
pub mod regime;
pub mod runner;
pub mod session;
pub mod snapshot;
pub mod stats;
pub mod synthetic;
pub mod types;
pub mod windows;
pub mod writer_backend;

pub use cone::{ConeForecaster, ConeResult, QuantileBand};
pub use config::{ConfigError, PipelineConfig};
pub use engine::PipelineEngine;
pub use error::PipelineError;
pub use event_log::{OrderedEventLog, ReplayLog};
pub use features::{FeatureEngine, FeatureVector};
pub use field::PotentialField;
pub use jsonl_writer::JsonlWriter;
pub use normalizer::{Normalizer, RawMessage};
pub use regime::{RegimeClassifier, RegimeStack};
pub use session::{PipelineSession, SessionStats};
pub use snapshot::Snapshot;
pub use types::{NormalizedEvent, Payload, PendingEvent, Venue};
pub use writer_backend::{MemorySink, NullSink, RecordSink};
