//! Pipeline Engine - single-threaded core downstream of sequencing
//!
//! ```text
//! NormalizedEvent
//!     ↓
//! PipelineEngine::process_event()
//!     ↓
//! FeatureEngine (windows, book, derivatives)      every event
//!     ↓
//! RegimeClassifier + PotentialField               every N trade prints
//!     ↓
//! ConeForecaster
//!     ↓
//! Snapshot
//! ```

use super::config::PipelineConfig;
use super::cone::{ConeForecaster, ConeInputs};
use super::features::FeatureEngine;
use super::field::PotentialField;
use super::regime::{RegimeClassifier, TransitionCounts};
use super::snapshot::Snapshot;
use super::types::{NormalizedEvent, Payload};
use std::collections::BTreeMap;

pub struct PipelineEngine {
    config: PipelineConfig,
    features: FeatureEngine,
    forecaster: ConeForecaster,
    /// Per-symbol regime state
    classifiers: BTreeMap<String, RegimeClassifier>,
    /// Trade prints across every symbol, drives the snapshot cadence
    trades_seen: u64,
}

impl PipelineEngine {
    pub fn new(config: PipelineConfig) -> Self {
        let features = FeatureEngine::new(&config);
        let forecaster = ConeForecaster::new(config.cone.clone(), config.seed);
        Self {
            config,
            features,
            forecaster,
            classifiers: BTreeMap::new(),
            trades_seen: 0,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process one sequenced event
    ///
    /// Every event updates feature state. The trade print that completes a
    /// block of `snapshot_every_trades` prints, counted over the whole session,
    /// yields a snapshot for its own symbol.
    pub fn process_event(&mut self, event: &NormalizedEvent) -> Option<Snapshot> {
        self.features.update(event);

        if !event.is_trade() {
            return None;
        }

        self.trades_seen += 1;
        if self.trades_seen % self.config.snapshot_every_trades != 0 {
            return None;
        }

        self.build_snapshot(event, self.trades_seen)
    }

    fn build_snapshot(&mut self, event: &NormalizedEvent, trades_seen: u64) -> Option<Snapshot> {
        let price = match event.payload {
            Payload::TradePrint { price, .. } => price,
            _ => return None,
        };
        let state = self.features.symbol(&event.symbol)?;

        let features = self.features.compute(&event.symbol);

        let classifier = self
            .classifiers
            .entry(event.symbol.clone())
            .or_insert_with(|| RegimeClassifier::new(self.config.regimes.clone()));
        let regimes = classifier.classify(&features);

        let field = PotentialField::build(
            &self.config.field,
            self.config.book_depth,
            price,
            state.book(),
            &state.aux(),
        );

        let finest = features.first();
        let inputs = ConeInputs {
            realized_volatility: finest.and_then(|f| f.volatility),
            cvd_slope: finest.and_then(|f| f.cvd_slope),
            regimes: Some(&regimes),
            ..ConeInputs::new(event.sequence_no, price)
        };
        let cone = self.forecaster.forecast(&inputs, &field);

        Some(Snapshot {
            symbol: event.symbol.clone(),
            venue: event.venue,
            sequence_no: event.sequence_no,
            timestamp: event.timestamp.unwrap_or(event.received_at),
            price,
            trades_seen,
            features,
            regimes,
            field: field.summary(),
            cone,
        })
    }

    /// Regime transitions summed over every symbol
    pub fn transitions(&self) -> TransitionCounts {
        let mut total = TransitionCounts::default();
        for classifier in self.classifiers.values() {
            total.add(&classifier.transitions());
        }
        total
    }

    pub fn transitions_for(&self, symbol: &str) -> Option<TransitionCounts> {
        self.classifiers.get(symbol).map(|c| c.transitions())
    }
}
