//! Trajectory cone forecaster
//!
//! Seeded Monte Carlo over event-steps. Each path carries a velocity that
//! decays with the regime's momentum, is pulled back toward the starting
//! price, pushed down the potential gradient and nudged by order flow:
//!
//! ```text
//! v' = a v + k (p0 - x) - b sigma dU/dtick(x) + g sigma tanh(cvd_slope / s) + sigma z
//! x' = x + v'
//! ```
//!
//! Momentum `a` rises in trending Kingdoms and the field bias `b` rises in
//! crowded Classes. A degenerate field drops every extra force and leaves the
//! plain mean-reverting walk `x' = x + k (p0 - x) + sigma z`.
//!
//! The generator is seeded from the snapshot's `sequence_no` and the run
//! seed, so identical input state gives an identical cone in live and replay.

use super::config::ConeConfig;
use super::field::PotentialField;
use super::regime::RegimeStack;
use super::stats;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Kingdom labels that switch to the trending momentum
const TRENDING_KINGDOMS: [&str; 2] = ["trend", "breakout"];
/// Class labels that switch to the crowded field bias
const CROWDED_CLASSES: [&str; 3] = ["crowded_long", "crowded_short", "squeeze_setup"];

/// One quantile level across the horizon (index 0 is the start price)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileBand {
    pub label: String,
    pub quantile: f64,
    pub values: Vec<f64>,
}

/// Force coefficients used for one cone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConeCoefficients {
    pub momentum: f64,
    pub mean_reversion: f64,
    pub field_bias: f64,
    pub flow_gain: f64,
}

/// Share of paths that reach a price level at any step of the horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelTouch {
    /// `well` (deepest potential) or `barrier` (highest potential)
    pub kind: String,
    pub price: f64,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConeResult {
    pub paths: usize,
    pub horizon: usize,
    pub start_price: f64,
    /// Per-step price sigma used for the noise term
    pub sigma: f64,
    /// True when the field was degenerate and no gradient bias was applied
    pub fallback: bool,
    pub coefficients: ConeCoefficients,
    /// `tanh(cvd_slope / flow_scale)`, zero without a slope or in fallback
    pub flow: f64,
    pub bands: Vec<QuantileBand>,
    pub mean: Vec<f64>,
    pub touches: Vec<LevelTouch>,
}

impl ConeResult {
    pub fn band(&self, label: &str) -> Option<&QuantileBand> {
        self.bands.iter().find(|b| b.label == label)
    }

    pub fn touch(&self, kind: &str) -> Option<&LevelTouch> {
        self.touches.iter().find(|t| t.kind == kind)
    }
}

/// Everything about one snapshot the forecaster reads besides the field
#[derive(Debug, Clone, Copy)]
pub struct ConeInputs<'a> {
    pub sequence_no: u64,
    pub start_price: f64,
    /// Relative per-step volatility of the finest scale
    pub realized_volatility: Option<f64>,
    pub cvd_slope: Option<f64>,
    pub regimes: Option<&'a RegimeStack>,
}

impl<'a> ConeInputs<'a> {
    pub fn new(sequence_no: u64, start_price: f64) -> Self {
        Self { sequence_no, start_price, realized_volatility: None, cvd_slope: None, regimes: None }
    }
}

/// `0.1 -> "p10"`, `0.025 -> "p2.5"`
pub fn quantile_label(q: f64) -> String {
    let pct = q * 100.0;
    if (pct - pct.round()).abs() < 1e-9 {
        format!("p{}", pct.round() as u64)
    } else {
        format!("p{}", pct)
    }
}

/// Stable per-snapshot seed
pub fn snapshot_seed(run_seed: u64, sequence_no: u64) -> u64 {
    // splitmix64 finaliser
    let mut z = run_seed ^ sequence_no.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Share of paths touching `level`: at or above it when the level is above
/// the start, at or below it otherwise
fn touch_probability(start_price: f64, level: f64, highs: &[f64], lows: &[f64]) -> f64 {
    if highs.is_empty() {
        return 0.0;
    }
    let touched = if level >= start_price {
        highs.iter().filter(|h| **h >= level).count()
    } else {
        lows.iter().filter(|l| **l <= level).count()
    };
    touched as f64 / highs.len() as f64
}

pub struct ConeForecaster {
    config: ConeConfig,
    run_seed: u64,
}

impl ConeForecaster {
    pub fn new(config: ConeConfig, run_seed: u64) -> Self {
        Self { config, run_seed }
    }

    /// Price sigma per step: realized return volatility if enabled and
    /// available, the configured relative volatility otherwise
    pub fn step_sigma(&self, price: f64, realized: Option<f64>) -> f64 {
        let relative = match realized {
            Some(vol) if self.config.use_realized_volatility && vol.is_finite() && vol > 0.0 => vol,
            _ => self.config.volatility,
        };
        price.abs() * relative
    }

    /// Coefficients for the current regime stack
    pub fn coefficients(&self, regimes: Option<&RegimeStack>) -> ConeCoefficients {
        let trending = regimes.is_some_and(|r| TRENDING_KINGDOMS.contains(&r.kingdom.label.as_str()));
        let crowded = regimes.is_some_and(|r| CROWDED_CLASSES.contains(&r.class.label.as_str()));
        ConeCoefficients {
            momentum: if trending { self.config.trend_momentum } else { self.config.momentum },
            mean_reversion: self.config.mean_reversion,
            field_bias: if crowded { self.config.crowded_field_bias } else { self.config.field_bias },
            flow_gain: self.config.flow_gain,
        }
    }

    /// Run the simulation for one snapshot
    ///
    /// A degenerate field switches to the unbiased mean-reverting walk.
    pub fn forecast(&self, inputs: &ConeInputs<'_>, field: &PotentialField) -> ConeResult {
        let steps = self.config.steps;
        let n_paths = self.config.paths;
        let start_price = inputs.start_price;
        let sigma = self.step_sigma(start_price, inputs.realized_volatility);
        let fallback = field.is_degenerate();

        let coefficients = if fallback {
            ConeCoefficients {
                momentum: 0.0,
                mean_reversion: self.config.mean_reversion,
                field_bias: 0.0,
                flow_gain: 0.0,
            }
        } else {
            self.coefficients(inputs.regimes)
        };
        let flow = match inputs.cvd_slope {
            Some(slope) if !fallback && slope.is_finite() => (slope / self.config.flow_scale).tanh(),
            _ => 0.0,
        };
        let ConeCoefficients { momentum, mean_reversion: kappa, field_bias: bias, flow_gain } = coefficients;
        let flow_push = flow_gain * sigma * flow;

        let mut rng = ChaCha8Rng::seed_from_u64(snapshot_seed(self.run_seed, inputs.sequence_no));
        let mut positions = vec![start_price; n_paths];
        let mut velocities = vec![0.0; n_paths];
        let mut highs = vec![start_price; n_paths];
        let mut lows = vec![start_price; n_paths];
        let mut sorted = Vec::with_capacity(n_paths);

        let mut bands: Vec<QuantileBand> = self
            .config
            .quantiles
            .iter()
            .map(|q| QuantileBand {
                label: quantile_label(*q),
                quantile: *q,
                values: Vec::with_capacity(steps + 1),
            })
            .collect();
        let mut mean = Vec::with_capacity(steps + 1);

        for band in &mut bands {
            band.values.push(start_price);
        }
        mean.push(start_price);

        for _ in 0..steps {
            for i in 0..n_paths {
                let x = positions[i];
                let gradient = if bias > 0.0 { field.gradient_at(x) } else { 0.0 };
                let z = stats::sample_normal(&mut rng);
                let v = momentum * velocities[i] + kappa * (start_price - x) - bias * sigma * gradient
                    + flow_push
                    + sigma * z;
                velocities[i] = v;
                positions[i] = x + v;
                highs[i] = highs[i].max(positions[i]);
                lows[i] = lows[i].min(positions[i]);
            }

            sorted.clear();
            sorted.extend_from_slice(&positions);
            sorted.sort_by(|a, b| a.total_cmp(b));

            for band in &mut bands {
                let value = stats::quantile_sorted(&sorted, band.quantile).unwrap_or(start_price);
                band.values.push(value);
            }
            mean.push(stats::mean(&positions).unwrap_or(start_price));
        }

        let summary = field.summary();
        let touches = [("well", summary.min_potential_price), ("barrier", summary.max_potential_price)]
            .into_iter()
            .filter_map(|(kind, price)| {
                price.map(|price| LevelTouch {
                    kind: kind.to_string(),
                    price,
                    probability: touch_probability(start_price, price, &highs, &lows),
                })
            })
            .collect();

        ConeResult {
            paths: n_paths,
            horizon: steps,
            start_price,
            sigma,
            fallback,
            coefficients,
            flow,
            bands,
            mean,
            touches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::config::FieldConfig;
    use crate::pipeline::features::{AuxFeatures, BookState};
    use crate::pipeline::regime::RegimeAssignment;
    use crate::pipeline::types::{BookLevel, BookSide};

    fn cone_config() -> ConeConfig {
        ConeConfig { steps: 40, paths: 300, ..ConeConfig::default() }
    }

    fn empty_field(price: f64) -> PotentialField {
        PotentialField::build(&FieldConfig::default(), 20, price, &BookState::new(), &AuxFeatures::default())
    }

    fn well_field() -> PotentialField {
        let mut book = BookState::new();
        book.apply(&[BookLevel { side: BookSide::Bid, price: 95.0, size: 100.0 }], true);
        let field_config = FieldConfig { tick_size: 0.5, range_ticks: 40, ..FieldConfig::default() };
        PotentialField::build(&field_config, 20, 100.0, &book, &AuxFeatures::default())
    }

    fn inputs(sequence_no: u64, realized: f64) -> ConeInputs<'static> {
        ConeInputs { realized_volatility: Some(realized), ..ConeInputs::new(sequence_no, 100.0) }
    }

    fn assignment(label: &str) -> RegimeAssignment {
        RegimeAssignment { label: label.to_string(), confidence: 0.8, scale: "macro".to_string(), held: false }
    }

    fn stack(kingdom: &str, class: &str) -> RegimeStack {
        RegimeStack {
            kingdom: assignment(kingdom),
            phylum: assignment("stable"),
            class: assignment(class),
            family: assignment("neutral"),
        }
    }

    fn assert_ordered(cone: &ConeResult) {
        for step in 0..=cone.horizon {
            let values: Vec<f64> = cone.bands.iter().map(|b| b.values[step]).collect();
            assert!(values.windows(2).all(|w| w[0] <= w[1]), "step {}: {:?}", step, values);
        }
    }

    #[test]
    fn test_quantile_labels() {
        assert_eq!(quantile_label(0.1), "p10");
        assert_eq!(quantile_label(0.5), "p50");
        assert_eq!(quantile_label(0.9), "p90");
        assert_eq!(quantile_label(0.025), "p2.5");
    }

    #[test]
    fn test_degenerate_field_falls_back() {
        let forecaster = ConeForecaster::new(cone_config(), 7);
        let trending = stack("trend", "crowded_long");
        let cone = forecaster.forecast(
            &ConeInputs { cvd_slope: Some(80.0), regimes: Some(&trending), ..ConeInputs::new(42, 100.0) },
            &empty_field(100.0),
        );

        assert!(cone.fallback);
        assert_eq!(cone.coefficients.momentum, 0.0);
        assert_eq!(cone.coefficients.field_bias, 0.0);
        assert_eq!(cone.flow, 0.0);
        assert!(cone.touches.is_empty());
        assert_eq!(cone.horizon, 40);
        assert_eq!(cone.paths, 300);
        assert_eq!(cone.bands.len(), 3);
        assert_eq!(cone.band("p50").unwrap().values.len(), 41);
        assert_eq!(cone.mean.len(), 41);
        assert!(cone.bands.iter().all(|b| b.values[0] == 100.0));
        assert!(cone.mean.iter().all(|v| v.is_finite()));
        assert_ordered(&cone);

        // spread opens up over the horizon
        let p10 = &cone.band("p10").unwrap().values;
        let p90 = &cone.band("p90").unwrap().values;
        assert!(p90[40] - p10[40] > 0.0);
    }

    #[test]
    fn test_same_sequence_same_cone() {
        let forecaster = ConeForecaster::new(cone_config(), 7);
        let field = empty_field(100.0);
        let a = forecaster.forecast(&inputs(10, 0.001), &field);
        let b = forecaster.forecast(&inputs(10, 0.001), &field);
        let c = forecaster.forecast(&inputs(11, 0.001), &field);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_sigma_source() {
        let forecaster = ConeForecaster::new(cone_config(), 7);
        assert!((forecaster.step_sigma(100.0, Some(0.002)) - 0.2).abs() < 1e-12);
        assert!((forecaster.step_sigma(100.0, None) - 0.05).abs() < 1e-12);
        assert!((forecaster.step_sigma(100.0, Some(0.0)) - 0.05).abs() < 1e-12);

        let fixed = ConeForecaster::new(
            ConeConfig { use_realized_volatility: false, ..cone_config() },
            7,
        );
        assert!((fixed.step_sigma(100.0, Some(0.002)) - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_regime_conditioned_coefficients() {
        let config = cone_config();
        let forecaster = ConeForecaster::new(config.clone(), 7);

        let base = forecaster.coefficients(None);
        assert_eq!(base.momentum, config.momentum);
        assert_eq!(base.field_bias, config.field_bias);

        let quiet = forecaster.coefficients(Some(&stack("range", "balanced")));
        assert_eq!(quiet, base);

        let trending = forecaster.coefficients(Some(&stack("breakout", "balanced")));
        assert_eq!(trending.momentum, config.trend_momentum);
        assert_eq!(trending.field_bias, config.field_bias);

        let crowded = forecaster.coefficients(Some(&stack("range", "squeeze_setup")));
        assert_eq!(crowded.momentum, config.momentum);
        assert_eq!(crowded.field_bias, config.crowded_field_bias);
        assert!(config.trend_momentum > config.momentum);
        assert!(config.crowded_field_bias > config.field_bias);
    }

    #[test]
    fn test_well_pulls_paths() {
        let field = well_field();
        let config = ConeConfig {
            steps: 60,
            paths: 500,
            mean_reversion: 0.0,
            momentum: 0.0,
            field_bias: 5.0,
            ..ConeConfig::default()
        };
        let biased = ConeForecaster::new(config.clone(), 7).forecast(&inputs(1, 0.005), &field);
        let neutral =
            ConeForecaster::new(ConeConfig { field_bias: 0.0, ..config }, 7).forecast(&inputs(1, 0.005), &field);

        assert!(!biased.fallback);
        assert_ordered(&biased);
        assert!(biased.mean[60] < neutral.mean[60]);

        let well = biased.touch("well").unwrap();
        assert!((well.price - 95.0).abs() <= 1.0, "well at {}", well.price);
        assert!(well.probability > neutral.touch("well").unwrap().probability);
        for touch in biased.touches.iter().chain(&neutral.touches) {
            assert!((0.0..=1.0).contains(&touch.probability));
        }
    }

    #[test]
    fn test_buying_flow_lifts_the_cone() {
        let field = well_field();
        let config = ConeConfig { field_bias: 0.0, ..cone_config() };
        let forecaster = ConeForecaster::new(config, 7);

        let flat = forecaster.forecast(&inputs(3, 0.002), &field);
        let buying = forecaster.forecast(&ConeInputs { cvd_slope: Some(60.0), ..inputs(3, 0.002) }, &field);

        assert_eq!(flat.flow, 0.0);
        assert!((buying.flow - (60.0f64 / 50.0).tanh()).abs() < 1e-12);
        for step in 1..=buying.horizon {
            assert!(buying.mean[step] > flat.mean[step], "step {}", step);
        }
        assert_ordered(&buying);
    }

    #[test]
    fn test_touch_probability() {
        let highs = [101.0, 103.0, 100.0, 105.0];
        let lows = [99.0, 100.0, 96.0, 98.0];
        assert_eq!(touch_probability(100.0, 103.0, &highs, &lows), 0.5);
        assert_eq!(touch_probability(100.0, 97.0, &highs, &lows), 0.25);
        assert_eq!(touch_probability(100.0, 100.0, &highs, &lows), 1.0);
        assert_eq!(touch_probability(100.0, 110.0, &[], &[]), 0.0);
    }
}
