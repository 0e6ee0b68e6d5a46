//! Synthetic event stream (no network)
//!
//! Deterministic for a given seed: a latent regime (range, trend up, trend
//! down, high-vol chop) drives a damped velocity walk. Trade prints dominate;
//! a 20-level book snapshot follows every 20th print and a funding / open
//! interest / basis triple every 100th.

use super::stats;
use super::types::{AggressorSide, BookLevel, BookSide, Payload, PendingEvent, ScalarReading, Venue};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;

/// Event times start here so two runs with the same seed serialize identically
const EPOCH_SECS: i64 = 1_700_000_000;
const TRADE_SPACING_MS: i64 = 200;
const BOOK_EVERY: u64 = 20;
const BOOK_LEVELS: usize = 20;
const DERIVS_EVERY: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LatentRegime {
    Range,
    TrendUp,
    TrendDown,
    ChopHighVol,
}

impl LatentRegime {
    /// (drift, sigma) per step
    fn dynamics(self) -> (f64, f64) {
        match self {
            LatentRegime::Range => (0.0, 8.0),
            LatentRegime::TrendUp => (0.9, 10.0),
            LatentRegime::TrendDown => (-0.9, 10.0),
            LatentRegime::ChopHighVol => (0.0, 18.0),
        }
    }

    fn pick(rng: &mut ChaCha8Rng) -> Self {
        let r: f64 = rng.gen();
        if r < 0.45 {
            LatentRegime::Range
        } else if r < 0.65 {
            LatentRegime::TrendUp
        } else if r < 0.85 {
            LatentRegime::TrendDown
        } else {
            LatentRegime::ChopHighVol
        }
    }
}

/// Iterator over synthetic pending events for one symbol
pub struct SyntheticFeed {
    rng: ChaCha8Rng,
    symbol: String,
    steps: u64,
    step: u64,
    pending: VecDeque<PendingEvent>,

    price: f64,
    velocity: f64,
    regime: LatentRegime,
    regime_ttl: i64,
    clock: DateTime<Utc>,

    funding: f64,
    open_interest: f64,
    basis: f64,
}

impl SyntheticFeed {
    pub fn new(symbol: impl Into<String>, steps: u64, seed: u64, start_price: f64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            symbol: symbol.into(),
            steps,
            step: 0,
            pending: VecDeque::new(),
            price: start_price,
            velocity: 0.0,
            regime: LatentRegime::Range,
            regime_ttl: 500,
            clock: Utc.timestamp_opt(EPOCH_SECS, 0).single().unwrap_or_else(Utc::now),
            funding: 0.0001,
            open_interest: 1_000_000.0,
            basis: 5.0,
        }
    }

    /// Default BTC-like stream
    pub fn btc(steps: u64, seed: u64) -> Self {
        Self::new("BTC", steps, seed, 100_000.0)
    }

    fn event(&self, timestamp: DateTime<Utc>, received_at: DateTime<Utc>, payload: Payload) -> PendingEvent {
        PendingEvent {
            venue: Venue::Synthetic,
            symbol: self.symbol.clone(),
            timestamp: Some(timestamp),
            received_at,
            payload,
        }
    }

    /// Advance one trade step and queue everything it produces
    fn advance(&mut self) {
        let i = self.step;
        self.step += 1;

        if self.regime_ttl <= 0 {
            self.regime = LatentRegime::pick(&mut self.rng);
            self.regime_ttl = self.rng.gen_range(300..=1200);
        }
        self.regime_ttl -= 1;

        let (drift, sigma) = self.regime.dynamics();
        let eps = sigma * stats::sample_normal(&mut self.rng);
        self.velocity = 0.90 * self.velocity + drift + eps;
        self.price = (self.price + self.velocity).max(1.0);

        let size = ((0.25 + 0.18 * stats::sample_normal(&mut self.rng)).abs() * (1.0 + sigma / 20.0)).max(0.001);

        // aggressor follows the velocity sign when it is clear
        let side = if self.velocity > 2.0 {
            Some(AggressorSide::Buy)
        } else if self.velocity < -2.0 {
            Some(AggressorSide::Sell)
        } else {
            match self.rng.gen_range(0..3) {
                0 => Some(AggressorSide::Buy),
                1 => Some(AggressorSide::Sell),
                _ => None,
            }
        };

        self.clock = self.clock + Duration::milliseconds(TRADE_SPACING_MS);
        let ts = self.clock;
        let received_at = ts + Duration::milliseconds(self.rng.gen_range(1..=15));

        let trade = self.event(ts, received_at, Payload::TradePrint { price: self.price, size, side });
        self.pending.push_back(trade);

        if i % BOOK_EVERY == 0 {
            let spread = (0.02 * sigma).max(0.5);
            let mut levels = Vec::with_capacity(BOOK_LEVELS * 2);
            for lvl in 0..BOOK_LEVELS {
                let dp = (lvl + 1) as f64 * spread;
                let bid_size = (self.rng.gen::<f64>() * 5.0).max(0.1);
                let ask_size = (self.rng.gen::<f64>() * 5.0).max(0.1);
                levels.push(BookLevel { side: BookSide::Bid, price: self.price - dp, size: bid_size });
                levels.push(BookLevel { side: BookSide::Ask, price: self.price + dp, size: ask_size });
            }
            let book = self.event(ts, received_at, Payload::BookDelta { levels, snapshot: true });
            self.pending.push_back(book);
        }

        if i % DERIVS_EVERY == 0 {
            self.funding += match self.regime {
                LatentRegime::TrendUp => 0.00002,
                LatentRegime::TrendDown => -0.00002,
                _ => 0.0,
            } + 0.00003 * stats::sample_normal(&mut self.rng);
            self.funding = stats::clamp(self.funding, -0.003, 0.003);

            let oi_drift = match self.regime {
                LatentRegime::TrendUp | LatentRegime::TrendDown => 5_000.0,
                _ => 1_000.0,
            };
            self.open_interest += oi_drift + 3_000.0 * stats::sample_normal(&mut self.rng);
            // occasional deleveraging pulse
            if self.regime == LatentRegime::ChopHighVol && self.rng.gen::<f64>() < 0.03 {
                self.open_interest *= 0.95;
            }

            let basis_drift = if self.funding > 0.0 { 0.15 } else { -0.15 };
            self.basis += basis_drift + 0.25 * stats::sample_normal(&mut self.rng);

            let readings = [
                Payload::FundingTick(ScalarReading { value: self.funding, polled_at: received_at }),
                Payload::OiTick(ScalarReading { value: self.open_interest, polled_at: received_at }),
                Payload::BasisTick(ScalarReading { value: self.basis, polled_at: received_at }),
            ];
            for payload in readings {
                let event = self.event(ts, received_at, payload);
                self.pending.push_back(event);
            }
        }
    }
}

impl Iterator for SyntheticFeed {
    type Item = PendingEvent;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pending.is_empty() && self.step < self.steps {
            self.advance();
        }
        self.pending.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::EventType;

    #[test]
    fn test_same_seed_same_stream() {
        let a: Vec<PendingEvent> = SyntheticFeed::btc(300, 7).collect();
        let b: Vec<PendingEvent> = SyntheticFeed::btc(300, 7).collect();
        let c: Vec<PendingEvent> = SyntheticFeed::btc(300, 8).collect();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_event_mix() {
        let events: Vec<PendingEvent> = SyntheticFeed::btc(200, 7).collect();
        let count = |t: EventType| events.iter().filter(|e| e.payload.event_type() == t).count();

        assert_eq!(count(EventType::TradePrint), 200);
        assert_eq!(count(EventType::BookDelta), 10);
        assert_eq!(count(EventType::FundingTick), 2);
        assert_eq!(count(EventType::OiTick), 2);
        assert_eq!(count(EventType::BasisTick), 2);
        assert!(events.iter().all(|e| e.venue == Venue::Synthetic && e.symbol == "BTC"));
    }

    #[test]
    fn test_first_step_order() {
        let first: Vec<EventType> = SyntheticFeed::btc(1, 7).map(|e| e.payload.event_type()).collect();
        assert_eq!(
            first,
            vec![
                EventType::TradePrint,
                EventType::BookDelta,
                EventType::FundingTick,
                EventType::OiTick,
                EventType::BasisTick
            ]
        );
    }

    #[test]
    fn test_prices_stay_positive() {
        let feed = SyntheticFeed::new("ETH", 2_000, 3, 5.0);
        for event in feed {
            if let Payload::TradePrint { price, size, .. } = event.payload {
                assert!(price >= 1.0);
                assert!(size >= 0.001);
            }
        }
    }
}
