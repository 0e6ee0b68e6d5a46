//! Multi-scale feature engine
//!
//! Owns every symbol's scale windows, live book and derivatives history.
//! Windows are updated on each event; feature vectors are only computed
//! when a snapshot is due.

use super::config::{PipelineConfig, ScaleSpec};
use super::stats::{self, EPS};
use super::types::{BookLevel, BookSide, NormalizedEvent, Payload};
use super::windows::{RollingWindow, ScaleSet, ScaleWindow, WindowEvent};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Derivatives readings and their z-scores over recent history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuxFeatures {
    pub funding: Option<f64>,
    pub funding_z: Option<f64>,
    pub open_interest: Option<f64>,
    pub oi_z: Option<f64>,
    pub basis: Option<f64>,
    pub basis_z: Option<f64>,
}

impl AuxFeatures {
    pub fn is_empty(&self) -> bool {
        self.funding.is_none() && self.open_interest.is_none() && self.basis.is_none()
    }
}

/// Features of one scale at one snapshot. Every statistic is `None` while the
/// window is cold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub scale: String,
    pub window: usize,
    /// Qualifying events currently in the window
    pub events: usize,
    pub trade_count: usize,
    /// False during cold start
    pub defined: bool,
    pub log_return: Option<f64>,
    pub cvd: Option<f64>,
    /// Least-squares slope of running CVD per trade print
    pub cvd_slope: Option<f64>,
    pub imbalance: Option<f64>,
    /// Sample standard deviation of consecutive trade log-returns
    pub volatility: Option<f64>,
    pub last_price: Option<f64>,
    pub directional_strength: Option<f64>,
    pub mean_reversion: Option<f64>,
    pub tail_risk: Option<f64>,
    pub vol_ratio: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub progress_sigma: Option<f64>,
    pub aux: AuxFeatures,
}

impl FeatureVector {
    fn undefined(window: &ScaleWindow, trade_count: usize, aux: AuxFeatures) -> Self {
        Self {
            scale: window.name().to_string(),
            window: window.capacity(),
            events: window.len(),
            trade_count,
            defined: false,
            log_return: None,
            cvd: None,
            cvd_slope: None,
            imbalance: None,
            volatility: None,
            last_price: None,
            directional_strength: None,
            mean_reversion: None,
            tail_risk: None,
            vol_ratio: None,
            volume_ratio: None,
            progress_sigma: None,
            aux,
        }
    }
}

/// Order book rebuilt from book deltas, best level first on each side
#[derive(Debug, Clone, Default)]
pub struct BookState {
    bids: Vec<(f64, f64)>,
    asks: Vec<(f64, f64)>,
}

impl BookState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, levels: &[BookLevel], snapshot: bool) {
        if snapshot {
            self.bids.clear();
            self.asks.clear();
        }
        for level in levels {
            let (book, descending) = match level.side {
                BookSide::Bid => (&mut self.bids, true),
                BookSide::Ask => (&mut self.asks, false),
            };
            let pos = book.binary_search_by(|(price, _)| {
                if descending {
                    level.price.total_cmp(price)
                } else {
                    price.total_cmp(&level.price)
                }
            });
            match (pos, level.size > 0.0) {
                (Ok(i), true) => book[i].1 = level.size,
                (Ok(i), false) => {
                    book.remove(i);
                }
                (Err(i), true) => book.insert(i, (level.price, level.size)),
                (Err(_), false) => {}
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Top `depth` bid levels, best first
    pub fn bids(&self, depth: usize) -> &[(f64, f64)] {
        &self.bids[..self.bids.len().min(depth)]
    }

    /// Top `depth` ask levels, best first
    pub fn asks(&self, depth: usize) -> &[(f64, f64)] {
        &self.asks[..self.asks.len().min(depth)]
    }

    /// (bid - ask) / (bid + ask) over the top `depth` levels
    pub fn imbalance(&self, depth: usize) -> Option<f64> {
        let bid: f64 = self.bids(depth).iter().map(|(_, s)| s).sum();
        let ask: f64 = self.asks(depth).iter().map(|(_, s)| s).sum();
        let total = bid + ask;
        if total <= EPS {
            return None;
        }
        Some((bid - ask) / total)
    }
}

/// Bounded history of one derivatives series
#[derive(Debug, Clone)]
struct AuxSeries {
    values: VecDeque<f64>,
    limit: usize,
}

impl AuxSeries {
    fn new(limit: usize) -> Self {
        Self { values: VecDeque::new(), limit }
    }

    fn push(&mut self, value: f64) {
        self.values.push_back(value);
        while self.values.len() > self.limit {
            self.values.pop_front();
        }
    }

    fn latest(&self) -> Option<f64> {
        self.values.back().copied()
    }

    /// z-score of the latest reading against the kept history
    fn latest_z(&self) -> Option<f64> {
        let latest = self.latest()?;
        let (front, back) = self.values.as_slices();
        let all: Vec<f64> = front.iter().chain(back.iter()).copied().collect();
        let mu = stats::mean(&all)?;
        let sd = stats::stdev(&all)?;
        Some(stats::zscore(latest, mu, sd))
    }
}

#[derive(Debug, Clone)]
struct AuxState {
    funding: AuxSeries,
    open_interest: AuxSeries,
    basis: AuxSeries,
}

impl AuxState {
    fn new(limit: usize) -> Self {
        Self {
            funding: AuxSeries::new(limit),
            open_interest: AuxSeries::new(limit),
            basis: AuxSeries::new(limit),
        }
    }

    fn features(&self) -> AuxFeatures {
        AuxFeatures {
            funding: self.funding.latest(),
            funding_z: self.funding.latest_z(),
            open_interest: self.open_interest.latest(),
            oi_z: self.open_interest.latest_z(),
            basis: self.basis.latest(),
            basis_z: self.basis.latest_z(),
        }
    }
}

/// Everything the feature engine keeps for one symbol
#[derive(Debug, Clone)]
pub struct SymbolFeatures {
    scales: ScaleSet,
    book: BookState,
    aux: AuxState,
    last_price: Option<f64>,
    events_seen: u64,
}

impl SymbolFeatures {
    fn new(specs: &[ScaleSpec], aux_history: usize) -> Self {
        Self {
            scales: ScaleSet::new(specs),
            book: BookState::new(),
            aux: AuxState::new(aux_history),
            last_price: None,
            events_seen: 0,
        }
    }

    pub fn book(&self) -> &BookState {
        &self.book
    }

    pub fn last_price(&self) -> Option<f64> {
        self.last_price
    }

    pub fn aux(&self) -> AuxFeatures {
        self.aux.features()
    }

    pub fn scales(&self) -> &ScaleSet {
        &self.scales
    }
}

pub struct FeatureEngine {
    specs: Vec<ScaleSpec>,
    min_window_events: usize,
    book_depth: usize,
    aux_history: usize,
    symbols: HashMap<String, SymbolFeatures>,
}

impl FeatureEngine {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            specs: config.scale_specs(),
            min_window_events: config.min_window_events,
            book_depth: config.book_depth,
            aux_history: config.aux_history,
            symbols: HashMap::new(),
        }
    }

    pub fn specs(&self) -> &[ScaleSpec] {
        &self.specs
    }

    /// Apply one sequenced event to its symbol's state
    pub fn update(&mut self, event: &NormalizedEvent) {
        let specs = &self.specs;
        let aux_history = self.aux_history;
        let state = self
            .symbols
            .entry(event.symbol.clone())
            .or_insert_with(|| SymbolFeatures::new(specs, aux_history));

        state.events_seen += 1;
        match &event.payload {
            Payload::TradePrint { price, .. } => state.last_price = Some(*price),
            Payload::BookDelta { levels, snapshot } => state.book.apply(levels, *snapshot),
            Payload::FundingTick(reading) => state.aux.funding.push(reading.value),
            Payload::OiTick(reading) => state.aux.open_interest.push(reading.value),
            Payload::BasisTick(reading) => state.aux.basis.push(reading.value),
        }
        state.scales.update(event);
    }

    pub fn symbol(&self, symbol: &str) -> Option<&SymbolFeatures> {
        self.symbols.get(symbol)
    }

    /// Feature vectors for every scale of `symbol`, finest first
    pub fn compute(&self, symbol: &str) -> Vec<FeatureVector> {
        let Some(state) = self.symbols.get(symbol) else {
            return Vec::new();
        };
        let aux = state.aux.features();
        state
            .scales
            .windows()
            .iter()
            .map(|window| self.compute_window(window, aux.clone()))
            .collect()
    }

    fn compute_window(&self, window: &ScaleWindow, aux: AuxFeatures) -> FeatureVector {
        let mut prices = Vec::new();
        let mut sizes = Vec::new();
        let mut cvd = 0.0;
        let mut running_cvd = Vec::new();
        for event in window.iter() {
            if let WindowEvent::Trade { price, size, side, .. } = event {
                prices.push(*price);
                sizes.push(*size);
                cvd += side.map_or(0.0, |s| s.sign() * size);
                running_cvd.push(cvd);
            }
        }

        let min_events = self.min_window_events.min(window.capacity());
        if window.len() < min_events {
            return FeatureVector::undefined(window, prices.len(), aux);
        }

        let returns: Vec<f64> = prices.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
        let mean_r = stats::mean(&returns);
        let sd_r = stats::stdev(&returns);

        let log_return = match (prices.first(), prices.last()) {
            (Some(first), Some(last)) if prices.len() >= 2 => Some((last / first).ln()),
            _ => None,
        };

        let directional_strength = match (mean_r, sd_r) {
            (Some(m), Some(sd)) if sd > EPS => Some(1.0 - (-m.abs() / sd).exp()),
            (Some(m), Some(_)) => Some(if m.abs() > EPS { 1.0 } else { 0.0 }),
            _ => None,
        };

        let mean_reversion =
            stats::lag1_autocorrelation(&returns).map(|rho| stats::clamp((1.0 - rho) / 2.0, 0.0, 1.0));

        let tail_risk = match (mean_r, sd_r) {
            (Some(m), Some(sd)) if sd > EPS => {
                let tails = returns.iter().filter(|r| (*r - m).abs() > 2.0 * sd).count();
                Some(tails as f64 / returns.len() as f64)
            }
            (Some(_), Some(_)) => Some(0.0),
            _ => None,
        };

        let vol_ratio = match sd_r {
            Some(sd) if sd > EPS && returns.len() >= 8 => {
                let recent = &returns[returns.len() - returns.len() / 4..];
                stats::stdev(recent).map(|r| r / sd)
            }
            _ => None,
        };

        let volume_ratio = match stats::mean(&sizes) {
            Some(avg) if avg > EPS && sizes.len() >= 4 => {
                let recent = &sizes[sizes.len() - sizes.len() / 4..];
                stats::mean(recent).map(|r| r / avg)
            }
            _ => None,
        };

        let progress_sigma = sd_r.map(|sd| {
            let total: f64 = returns.iter().sum();
            total.abs() / (sd.max(EPS) * (returns.len() as f64).sqrt())
        });

        FeatureVector {
            scale: window.name().to_string(),
            window: window.capacity(),
            events: window.len(),
            trade_count: prices.len(),
            defined: true,
            log_return,
            cvd: Some(cvd),
            cvd_slope: stats::slope(&running_cvd),
            imbalance: self.window_imbalance(window),
            volatility: sd_r,
            last_price: prices.last().copied(),
            directional_strength,
            mean_reversion,
            tail_risk,
            vol_ratio,
            volume_ratio,
            progress_sigma,
            aux,
        }
    }

    /// Imbalance of the book as reconstructed from the deltas inside the
    /// window only, starting at the latest snapshot delta it holds
    fn window_imbalance(&self, window: &ScaleWindow) -> Option<f64> {
        let books: Vec<(&[BookLevel], bool)> = window
            .iter()
            .filter_map(|event| match event {
                WindowEvent::Book { levels, snapshot, .. } => Some((levels.as_slice(), *snapshot)),
                WindowEvent::Trade { .. } => None,
            })
            .collect();
        if books.is_empty() {
            return None;
        }

        let start = books.iter().rposition(|(_, snapshot)| *snapshot).unwrap_or(0);
        let mut book = BookState::new();
        for (levels, snapshot) in &books[start..] {
            book.apply(levels, *snapshot);
        }
        book.imbalance(self.book_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{AggressorSide, ScalarReading, Venue};
    use chrono::{TimeZone, Utc};

    fn make_event(sequence_no: u64, payload: Payload) -> NormalizedEvent {
        NormalizedEvent {
            sequence_no,
            venue: Venue::Synthetic,
            symbol: "BTC".to_string(),
            timestamp: None,
            received_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            payload,
        }
    }

    fn trade(price: f64, size: f64, side: AggressorSide) -> Payload {
        Payload::TradePrint { price, size, side: Some(side) }
    }

    fn book(bid: f64, ask: f64) -> Payload {
        Payload::BookDelta {
            levels: vec![
                BookLevel { side: BookSide::Bid, price: 99.0, size: bid },
                BookLevel { side: BookSide::Ask, price: 101.0, size: ask },
            ],
            snapshot: true,
        }
    }

    fn test_config(windows: &[(&str, usize)]) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.scales = windows.iter().map(|(n, w)| (n.to_string(), *w)).collect();
        config
    }

    #[test]
    fn test_cvd_and_log_return() {
        let mut engine = FeatureEngine::new(&test_config(&[("micro", 500)]));
        let trades = [
            (100.0, 1.0, AggressorSide::Buy),
            (101.0, 2.0, AggressorSide::Buy),
            (99.0, 1.0, AggressorSide::Sell),
            (102.0, 1.0, AggressorSide::Buy),
            (100.0, 1.0, AggressorSide::Sell),
        ];
        for (i, (p, s, side)) in trades.into_iter().enumerate() {
            engine.update(&make_event(i as u64 + 1, trade(p, s, side)));
        }

        let features = engine.compute("BTC");
        assert_eq!(features.len(), 1);
        let micro = &features[0];
        assert!(micro.defined);
        assert_eq!(micro.cvd, Some(2.0));
        assert_eq!(micro.log_return, Some(0.0));
        // running cvd 1, 3, 2, 3, 2
        assert!((micro.cvd_slope.unwrap() - 0.2).abs() < 1e-12);
        assert_eq!(micro.trade_count, 5);
        assert!(micro.volatility.unwrap() > 0.0);
        // no book data in the window
        assert_eq!(micro.imbalance, None);
    }

    #[test]
    fn test_cold_start_is_undefined() {
        let mut engine = FeatureEngine::new(&test_config(&[("micro", 500)]));
        for seq in 1..=3 {
            engine.update(&make_event(seq, trade(100.0 + seq as f64, 1.0, AggressorSide::Buy)));
        }

        let micro = &engine.compute("BTC")[0];
        assert!(!micro.defined);
        assert_eq!(micro.events, 3);
        assert_eq!(micro.cvd, None);
        assert_eq!(micro.cvd_slope, None);
        assert_eq!(micro.log_return, None);
        assert_eq!(micro.volatility, None);
    }

    #[test]
    fn test_cold_start_threshold_capped_by_window() {
        let mut config = test_config(&[("tiny", 3)]);
        config.min_window_events = 10;
        let mut engine = FeatureEngine::new(&config);
        for seq in 1..=3 {
            engine.update(&make_event(seq, trade(100.0, 1.0, AggressorSide::Buy)));
        }
        assert!(engine.compute("BTC")[0].defined);
    }

    #[test]
    fn test_window_imbalance_uses_only_window_books() {
        let mut engine = FeatureEngine::new(&test_config(&[("micro", 6), ("macro", 50)]));

        engine.update(&make_event(1, book(9.0, 1.0)));
        for seq in 2..=7 {
            engine.update(&make_event(seq, trade(100.0 + seq as f64, 1.0, AggressorSide::Buy)));
        }

        let features = engine.compute("BTC");
        // the only book delta fell out of the micro window
        assert_eq!(features[0].imbalance, None);
        assert!((features[1].imbalance.unwrap() - 0.8).abs() < 1e-12);

        engine.update(&make_event(8, book(1.0, 3.0)));
        let features = engine.compute("BTC");
        assert!((features[0].imbalance.unwrap() + 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_aux_features_attached() {
        let mut engine = FeatureEngine::new(&test_config(&[("micro", 10)]));
        let polled_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        for (i, value) in [0.0001, 0.0002, 0.0003].into_iter().enumerate() {
            engine.update(&make_event(
                i as u64 + 1,
                Payload::FundingTick(ScalarReading { value, polled_at }),
            ));
        }

        let aux = engine.symbol("BTC").unwrap().aux();
        assert_eq!(aux.funding, Some(0.0003));
        assert!(aux.funding_z.unwrap() > 0.9);
        assert_eq!(aux.open_interest, None);
        assert_eq!(aux.oi_z, None);
        assert!(!aux.is_empty());
    }

    #[test]
    fn test_book_state_updates() {
        let mut book = BookState::new();
        book.apply(
            &[
                BookLevel { side: BookSide::Bid, price: 99.0, size: 1.0 },
                BookLevel { side: BookSide::Bid, price: 100.0, size: 2.0 },
                BookLevel { side: BookSide::Ask, price: 102.0, size: 1.0 },
                BookLevel { side: BookSide::Ask, price: 101.0, size: 3.0 },
            ],
            true,
        );
        assert_eq!(book.bids(10), &[(100.0, 2.0), (99.0, 1.0)]);
        assert_eq!(book.asks(1), &[(101.0, 3.0)]);

        book.apply(
            &[
                BookLevel { side: BookSide::Bid, price: 100.0, size: 0.0 },
                BookLevel { side: BookSide::Ask, price: 101.5, size: 4.0 },
            ],
            false,
        );
        assert_eq!(book.bids(10), &[(99.0, 1.0)]);
        assert_eq!(book.asks(10), &[(101.0, 3.0), (101.5, 4.0), (102.0, 1.0)]);
    }
}
