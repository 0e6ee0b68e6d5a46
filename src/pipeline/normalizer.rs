//! Venue wire messages to canonical events
//!
//! Every venue maps into the same five payload kinds. Fields a venue does not
//! send stay `None`; they are never filled in with zero.

use super::types::{AggressorSide, BookLevel, BookSide, Payload, PendingEvent, ScalarReading, Venue};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Quote assets stripped from concatenated instrument names (`BTCUSDT`)
const QUOTE_SUFFIXES: [&str; 5] = ["FDUSD", "USDT", "USDC", "BUSD", "USD"];

/// One unparsed message as received from a venue stream or poll
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub venue: Venue,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

impl RawMessage {
    pub fn new(venue: Venue, body: impl Into<String>) -> Self {
        Self { venue, body: body.into(), received_at: Utc::now() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizeError {
    MalformedMessage { venue: Venue, reason: String },
    UnknownSymbol(String),
}

impl std::fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NormalizeError::MalformedMessage { venue, reason } => {
                write!(f, "Malformed {} message: {}", venue.as_str(), reason)
            }
            NormalizeError::UnknownSymbol(raw) => write!(f, "Unknown symbol: '{}'", raw),
        }
    }
}

impl std::error::Error for NormalizeError {}

/// Numbers arrive as JSON strings from both venues, occasionally as numbers
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WireNumber {
    Num(f64),
    Str(String),
}

impl WireNumber {
    fn parse(&self, field: &str) -> Result<f64, String> {
        let value = match self {
            WireNumber::Num(n) => *n,
            WireNumber::Str(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("field '{}' is not a number: '{}'", field, s))?,
        };
        if value.is_finite() {
            Ok(value)
        } else {
            Err(format!("field '{}' is not finite", field))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "e")]
enum BinanceStreamEvent {
    #[serde(rename = "aggTrade")]
    AggTrade {
        #[serde(rename = "s")]
        symbol: String,
        #[serde(rename = "p")]
        price: WireNumber,
        #[serde(rename = "q")]
        quantity: WireNumber,
        #[serde(rename = "T")]
        trade_time: Option<i64>,
        #[serde(rename = "m")]
        buyer_is_maker: Option<bool>,
    },
    #[serde(rename = "depthUpdate")]
    DepthUpdate {
        #[serde(rename = "s")]
        symbol: String,
        #[serde(rename = "E")]
        event_time: Option<i64>,
        #[serde(rename = "T")]
        transaction_time: Option<i64>,
        #[serde(rename = "b", default)]
        bids: Vec<Vec<WireNumber>>,
        #[serde(rename = "a", default)]
        asks: Vec<Vec<WireNumber>>,
    },
    #[serde(rename = "markPriceUpdate")]
    MarkPriceUpdate {
        #[serde(rename = "s")]
        symbol: String,
        #[serde(rename = "E")]
        event_time: Option<i64>,
        #[serde(rename = "r")]
        funding_rate: Option<WireNumber>,
    },
}

/// REST `/fapi/v1/openInterest`
#[derive(Debug, Deserialize)]
struct BinanceOpenInterest {
    symbol: String,
    #[serde(rename = "openInterest")]
    open_interest: WireNumber,
    time: Option<i64>,
}

/// One row of REST `/futures/data/basis`
#[derive(Debug, Deserialize)]
struct BinanceBasisRow {
    pair: String,
    basis: WireNumber,
    timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OkxArg {
    channel: String,
    #[serde(rename = "instId")]
    inst_id: String,
}

#[derive(Debug, Deserialize)]
struct OkxPush {
    arg: OkxArg,
    action: Option<String>,
    #[serde(default)]
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct OkxTrade {
    px: WireNumber,
    sz: WireNumber,
    side: Option<String>,
    ts: Option<WireNumber>,
}

#[derive(Debug, Deserialize)]
struct OkxBook {
    #[serde(default)]
    bids: Vec<Vec<WireNumber>>,
    #[serde(default)]
    asks: Vec<Vec<WireNumber>>,
    ts: Option<WireNumber>,
}

/// Map a venue instrument name to the canonical base asset
///
/// `BTCUSDT`, `btcusdt`, `BTC-USDT` and `BTC-USDT-SWAP` all map to `BTC`.
pub fn canonical_symbol(raw: &str) -> Result<String, NormalizeError> {
    let upper = raw.trim().to_uppercase();

    let base = match upper.split_once('-') {
        Some((base, _)) => base.to_string(),
        None => QUOTE_SUFFIXES
            .iter()
            .find_map(|quote| upper.strip_suffix(quote))
            .unwrap_or(upper.as_str())
            .to_string(),
    };

    if base.is_empty() || !base.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(NormalizeError::UnknownSymbol(raw.to_string()));
    }
    Ok(base)
}

fn millis_to_utc(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Converts raw venue messages into unsequenced canonical events
#[derive(Debug, Clone)]
pub struct Normalizer {
    book_depth: usize,
}

impl Normalizer {
    pub fn new(book_depth: usize) -> Self {
        Self { book_depth }
    }

    /// Produce zero or one event from a raw message
    ///
    /// `Ok(None)` is returned for control frames (subscription acks, empty
    /// pushes) that carry no market data.
    pub fn normalize(&self, raw: &RawMessage) -> Result<Option<PendingEvent>, NormalizeError> {
        let value: Value = serde_json::from_str(&raw.body)
            .map_err(|e| malformed(raw.venue, format!("invalid JSON: {}", e)))?;

        match raw.venue {
            Venue::Binance => self.normalize_binance(value, raw),
            Venue::Okx => self.normalize_okx(value, raw),
            Venue::Synthetic => Err(malformed(raw.venue, "synthetic events bypass the normalizer")),
        }
    }

    fn normalize_binance(
        &self,
        value: Value,
        raw: &RawMessage,
    ) -> Result<Option<PendingEvent>, NormalizeError> {
        let venue = Venue::Binance;

        // REST basis: array of rows, newest first
        if let Value::Array(rows) = value {
            let Some(first) = rows.into_iter().next() else {
                return Ok(None);
            };
            let row: BinanceBasisRow =
                serde_json::from_value(first).map_err(|e| malformed(venue, e.to_string()))?;
            let basis = row.basis.parse("basis").map_err(|r| malformed(venue, r))?;
            let event_time = row.timestamp.and_then(millis_to_utc);
            return Ok(Some(self.pending(
                venue,
                canonical_symbol(&row.pair)?,
                event_time,
                raw,
                Payload::BasisTick(ScalarReading {
                    value: basis,
                    polled_at: event_time.unwrap_or(raw.received_at),
                }),
            )));
        }

        // REST open interest
        if value.get("openInterest").is_some() {
            let oi: BinanceOpenInterest =
                serde_json::from_value(value).map_err(|e| malformed(venue, e.to_string()))?;
            let open_interest = oi.open_interest.parse("openInterest").map_err(|r| malformed(venue, r))?;
            let event_time = oi.time.and_then(millis_to_utc);
            return Ok(Some(self.pending(
                venue,
                canonical_symbol(&oi.symbol)?,
                event_time,
                raw,
                Payload::OiTick(ScalarReading {
                    value: open_interest,
                    polled_at: event_time.unwrap_or(raw.received_at),
                }),
            )));
        }

        // Combined stream envelope `{stream, data}` or a bare event
        let data = match value {
            Value::Object(mut map) if map.contains_key("stream") => {
                map.remove("data").ok_or_else(|| malformed(venue, "stream envelope without data"))?
            }
            Value::Object(map) if map.contains_key("result") && map.contains_key("id") => {
                // subscription ack
                return Ok(None);
            }
            other => other,
        };

        let event: BinanceStreamEvent =
            serde_json::from_value(data).map_err(|e| malformed(venue, e.to_string()))?;

        match event {
            BinanceStreamEvent::AggTrade { symbol, price, quantity, trade_time, buyer_is_maker } => {
                let price = price.parse("p").map_err(|r| malformed(venue, r))?;
                let size = quantity.parse("q").map_err(|r| malformed(venue, r))?;
                if price <= 0.0 || size < 0.0 {
                    return Err(malformed(venue, format!("bad trade price/size {} / {}", price, size)));
                }
                // buyer is maker => the seller crossed the spread
                let side = buyer_is_maker
                    .map(|m| if m { AggressorSide::Sell } else { AggressorSide::Buy });
                Ok(Some(self.pending(
                    venue,
                    canonical_symbol(&symbol)?,
                    trade_time.and_then(millis_to_utc),
                    raw,
                    Payload::TradePrint { price, size, side },
                )))
            }
            BinanceStreamEvent::DepthUpdate { symbol, event_time, transaction_time, bids, asks } => {
                let levels = self.book_levels(venue, &bids, &asks, true)?;
                Ok(Some(self.pending(
                    venue,
                    canonical_symbol(&symbol)?,
                    transaction_time.or(event_time).and_then(millis_to_utc),
                    raw,
                    Payload::BookDelta { levels, snapshot: true },
                )))
            }
            BinanceStreamEvent::MarkPriceUpdate { symbol, event_time, funding_rate } => {
                let symbol = canonical_symbol(&symbol)?;
                // delivery contracts send an empty funding rate
                let rate = match funding_rate {
                    None => return Ok(None),
                    Some(WireNumber::Str(s)) if s.trim().is_empty() => return Ok(None),
                    Some(rate) => rate.parse("r").map_err(|r| malformed(venue, r))?,
                };
                let event_time = event_time.and_then(millis_to_utc);
                Ok(Some(self.pending(
                    venue,
                    symbol,
                    event_time,
                    raw,
                    Payload::FundingTick(ScalarReading {
                        value: rate,
                        polled_at: event_time.unwrap_or(raw.received_at),
                    }),
                )))
            }
        }
    }

    fn normalize_okx(
        &self,
        value: Value,
        raw: &RawMessage,
    ) -> Result<Option<PendingEvent>, NormalizeError> {
        let venue = Venue::Okx;

        // subscribe / error acks: `{"event": "...", ...}`
        if let Some(event) = value.get("event").and_then(Value::as_str) {
            if event == "error" {
                let msg = value.get("msg").and_then(Value::as_str).unwrap_or("unknown error");
                return Err(malformed(venue, format!("venue error: {}", msg)));
            }
            return Ok(None);
        }

        let push: OkxPush = serde_json::from_value(value).map_err(|e| malformed(venue, e.to_string()))?;
        let symbol = canonical_symbol(&push.arg.inst_id)?;
        let Some(first) = push.data.into_iter().next() else {
            return Ok(None);
        };

        match push.arg.channel.as_str() {
            "trades" | "trades-all" => {
                let trade: OkxTrade =
                    serde_json::from_value(first).map_err(|e| malformed(venue, e.to_string()))?;
                let price = trade.px.parse("px").map_err(|r| malformed(venue, r))?;
                let size = trade.sz.parse("sz").map_err(|r| malformed(venue, r))?;
                if price <= 0.0 || size < 0.0 {
                    return Err(malformed(venue, format!("bad trade price/size {} / {}", price, size)));
                }
                let side = match trade.side.as_deref().map(str::to_lowercase).as_deref() {
                    Some("buy") => Some(AggressorSide::Buy),
                    Some("sell") => Some(AggressorSide::Sell),
                    _ => None,
                };
                let ts = okx_time(trade.ts.as_ref());
                Ok(Some(self.pending(venue, symbol, ts, raw, Payload::TradePrint { price, size, side })))
            }
            channel if channel.starts_with("books") || channel.starts_with("bbo") => {
                let book: OkxBook =
                    serde_json::from_value(first).map_err(|e| malformed(venue, e.to_string()))?;
                // `books5` pushes full snapshots without an action field
                let snapshot = push.action.as_deref().map_or(true, |a| a == "snapshot");
                let levels = self.book_levels(venue, &book.bids, &book.asks, snapshot)?;
                let ts = okx_time(book.ts.as_ref());
                Ok(Some(self.pending(venue, symbol, ts, raw, Payload::BookDelta { levels, snapshot })))
            }
            other => Err(malformed(venue, format!("unsupported channel '{}'", other))),
        }
    }

    /// Parse `[price, size, ...]` rows, best first. Snapshots are truncated to
    /// `book_depth` per side; incremental updates are kept whole so no level
    /// change is lost.
    fn book_levels(
        &self,
        venue: Venue,
        bids: &[Vec<WireNumber>],
        asks: &[Vec<WireNumber>],
        snapshot: bool,
    ) -> Result<Vec<BookLevel>, NormalizeError> {
        let mut levels = Vec::with_capacity(2 * self.book_depth);

        for (side, rows) in [(BookSide::Bid, bids), (BookSide::Ask, asks)] {
            let mut parsed = Vec::with_capacity(rows.len());
            for row in rows {
                if row.len() < 2 {
                    return Err(malformed(venue, "book level needs price and size"));
                }
                let price = row[0].parse("price").map_err(|r| malformed(venue, r))?;
                let size = row[1].parse("size").map_err(|r| malformed(venue, r))?;
                if price <= 0.0 || size < 0.0 {
                    return Err(malformed(venue, format!("bad book level {} / {}", price, size)));
                }
                // a zero level inside a snapshot carries nothing
                if snapshot && size == 0.0 {
                    continue;
                }
                parsed.push(BookLevel { side, price, size });
            }

            match side {
                BookSide::Bid => parsed.sort_by(|a, b| b.price.total_cmp(&a.price)),
                BookSide::Ask => parsed.sort_by(|a, b| a.price.total_cmp(&b.price)),
            }
            if snapshot {
                parsed.truncate(self.book_depth);
            }
            levels.extend(parsed);
        }

        Ok(levels)
    }

    fn pending(
        &self,
        venue: Venue,
        symbol: String,
        timestamp: Option<DateTime<Utc>>,
        raw: &RawMessage,
        payload: Payload,
    ) -> PendingEvent {
        PendingEvent { venue, symbol, timestamp, received_at: raw.received_at, payload }
    }
}

fn okx_time(ts: Option<&WireNumber>) -> Option<DateTime<Utc>> {
    ts.and_then(|t| t.parse("ts").ok()).and_then(|ms| millis_to_utc(ms as i64))
}

fn malformed(venue: Venue, reason: impl Into<String>) -> NormalizeError {
    NormalizeError::MalformedMessage { venue, reason: reason.into() }
}
