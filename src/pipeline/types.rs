//! Canonical event schema shared by every pipeline stage
//!
//! Venue adapters produce raw messages, the normalizer turns them into
//! `PendingEvent`s, and the ordered event log stamps each one with a
//! per-symbol `sequence_no` to produce a `NormalizedEvent`. Only the latter
//! ever reaches the feature engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Binance,
    Okx,
    Synthetic,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Binance => "binance",
            Venue::Okx => "okx",
            Venue::Synthetic => "synthetic",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "binance" => Some(Venue::Binance),
            "okx" => Some(Venue::Okx),
            "synthetic" => Some(Venue::Synthetic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TradePrint,
    BookDelta,
    FundingTick,
    OiTick,
    BasisTick,
}

impl EventType {
    /// Trade prints and book deltas enter the scale windows; aux ticks do not
    pub fn is_qualifying(&self) -> bool {
        matches!(self, EventType::TradePrint | EventType::BookDelta)
    }
}

/// Aggressor side of a trade print
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggressorSide {
    Buy,
    Sell,
}

impl AggressorSide {
    pub fn sign(&self) -> f64 {
        match self {
            AggressorSide::Buy => 1.0,
            AggressorSide::Sell => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSide {
    Bid,
    Ask,
}

/// One price level update. `size == 0` removes the level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub side: BookSide,
    pub price: f64,
    pub size: f64,
}

/// A single scalar derivatives reading (funding rate, open interest, basis)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalarReading {
    pub value: f64,
    pub polled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    TradePrint {
        price: f64,
        size: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        side: Option<AggressorSide>,
    },
    BookDelta {
        levels: Vec<BookLevel>,
        /// Replaces the whole book instead of patching it
        snapshot: bool,
    },
    FundingTick(ScalarReading),
    OiTick(ScalarReading),
    BasisTick(ScalarReading),
}

impl Payload {
    pub fn event_type(&self) -> EventType {
        match self {
            Payload::TradePrint { .. } => EventType::TradePrint,
            Payload::BookDelta { .. } => EventType::BookDelta,
            Payload::FundingTick(_) => EventType::FundingTick,
            Payload::OiTick(_) => EventType::OiTick,
            Payload::BasisTick(_) => EventType::BasisTick,
        }
    }
}

/// Normalizer output: a canonical event that has not been sequenced yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEvent {
    pub venue: Venue,
    pub symbol: String,
    /// Venue-reported event time, if the venue sent one
    pub timestamp: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
    pub payload: Payload,
}

/// A sequenced event. `sequence_no` is assigned exactly once by the
/// ordered event log and is the only ordering key downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub sequence_no: u64,
    pub venue: Venue,
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
    pub payload: Payload,
}

impl NormalizedEvent {
    pub fn from_pending(sequence_no: u64, pending: PendingEvent) -> Self {
        Self {
            sequence_no,
            venue: pending.venue,
            symbol: pending.symbol,
            timestamp: pending.timestamp,
            received_at: pending.received_at,
            payload: pending.payload,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    pub fn is_trade(&self) -> bool {
        matches!(self.payload, Payload::TradePrint { .. })
    }

    /// Parse a sequenced event from a raw-log line
    pub fn from_jsonl(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}
