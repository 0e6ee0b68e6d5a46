//! Regime taxonomy classifier
//!
//! Four levels, each bound to one scale and each driven by an ordered rule
//! table: the first rule whose predicate fires wins, with a fixed default
//! when none does. A level whose inputs are missing reports `unclassified`.
//!
//! Levels are evaluated finest first. A coarser level only adopts a new label
//! on a snapshot where the next finer level also changed, which keeps
//! Kingdom transitions <= Phylum <= Class <= Family over any session.

use super::config::RegimeThresholds;
use super::features::FeatureVector;
use super::stats::clamp;
use serde::{Deserialize, Serialize};

pub const UNCLASSIFIED: &str = "unclassified";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegimeLevel {
    Kingdom,
    Phylum,
    Class,
    Family,
}

impl RegimeLevel {
    /// Evaluation order, finest first
    pub const FINEST_FIRST: [RegimeLevel; 4] =
        [RegimeLevel::Family, RegimeLevel::Class, RegimeLevel::Phylum, RegimeLevel::Kingdom];

    pub fn as_str(&self) -> &'static str {
        match self {
            RegimeLevel::Kingdom => "kingdom",
            RegimeLevel::Phylum => "phylum",
            RegimeLevel::Class => "class",
            RegimeLevel::Family => "family",
        }
    }

    /// Index into the finest-first scale list this level reads from
    ///
    /// Family takes the finest scale, Class the second finest, Phylum the
    /// second coarsest and Kingdom the coarsest. With fewer than four scales
    /// levels share scales.
    pub fn scale_index(&self, scale_count: usize) -> usize {
        let last = scale_count.saturating_sub(1);
        match self {
            RegimeLevel::Family => 0,
            RegimeLevel::Class => 1.min(last),
            RegimeLevel::Phylum => scale_count.saturating_sub(2),
            RegimeLevel::Kingdom => last,
        }
    }
}

/// One row of a rule table: label and a predicate returning a confidence
pub struct RegimeRule {
    pub label: &'static str,
    pub predicate: fn(&FeatureVector, &RegimeThresholds) -> Option<f64>,
}

pub struct RuleTable {
    pub level: RegimeLevel,
    /// Inputs the level cannot do without
    pub ready: fn(&FeatureVector) -> bool,
    pub rules: &'static [RegimeRule],
    pub default_label: &'static str,
    pub default_confidence: f64,
}

impl RuleTable {
    pub fn for_level(level: RegimeLevel) -> &'static RuleTable {
        match level {
            RegimeLevel::Kingdom => &KINGDOM,
            RegimeLevel::Phylum => &PHYLUM,
            RegimeLevel::Class => &CLASS,
            RegimeLevel::Family => &FAMILY,
        }
    }

    /// First matching rule wins
    pub fn classify(&self, features: &FeatureVector, t: &RegimeThresholds) -> (&'static str, f64) {
        if !features.defined || !(self.ready)(features) {
            return (UNCLASSIFIED, 0.0);
        }
        for rule in self.rules {
            if let Some(confidence) = (rule.predicate)(features, t) {
                return (rule.label, clamp(confidence, 0.0, 1.0));
            }
        }
        (self.default_label, self.default_confidence)
    }
}

// Kingdom: trend regime of the coarsest scale

fn crash_or_melt(f: &FeatureVector, t: &RegimeThresholds) -> Option<f64> {
    let tail = f.tail_risk?;
    let strength = f.directional_strength?;
    (tail >= t.crash_tail_risk && strength > t.trend_strength).then(|| 0.5 + 0.5 * strength)
}

fn breakout(f: &FeatureVector, t: &RegimeThresholds) -> Option<f64> {
    let progress = f.progress_sigma?;
    let expanding = f.vol_ratio.map_or(true, |r| r >= 1.0);
    (progress > t.breakout_progress_sigma && expanding)
        .then(|| 0.5 + (progress - t.breakout_progress_sigma) / (2.0 * t.breakout_progress_sigma))
}

fn trend(f: &FeatureVector, t: &RegimeThresholds) -> Option<f64> {
    let strength = f.directional_strength?;
    let mr = f.mean_reversion?;
    (strength > t.trend_strength && mr < 0.45).then_some(strength)
}

fn mean_revert(f: &FeatureVector, t: &RegimeThresholds) -> Option<f64> {
    let strength = f.directional_strength?;
    let mr = f.mean_reversion?;
    (mr > t.mr_strength && strength < 0.55).then_some(mr)
}

fn kingdom_ready(f: &FeatureVector) -> bool {
    f.directional_strength.is_some() && f.mean_reversion.is_some()
}

static KINGDOM: RuleTable = RuleTable {
    level: RegimeLevel::Kingdom,
    ready: kingdom_ready,
    rules: &[
        RegimeRule { label: "crash_or_melt", predicate: crash_or_melt },
        RegimeRule { label: "breakout", predicate: breakout },
        RegimeRule { label: "trend", predicate: trend },
        RegimeRule { label: "mean_revert", predicate: mean_revert },
    ],
    default_label: "range",
    default_confidence: 0.55,
};

// Phylum: volatility state of the second coarsest scale

fn compression(f: &FeatureVector, t: &RegimeThresholds) -> Option<f64> {
    let ratio = f.vol_ratio?;
    (ratio < t.compression_ratio).then(|| 1.0 - ratio)
}

fn expansion(f: &FeatureVector, t: &RegimeThresholds) -> Option<f64> {
    let ratio = f.vol_ratio?;
    (ratio > t.expansion_ratio).then(|| ratio / (2.0 * t.expansion_ratio) + 0.25)
}

fn elevated(f: &FeatureVector, t: &RegimeThresholds) -> Option<f64> {
    let ratio = f.vol_ratio?;
    (ratio > t.elevated_ratio).then(|| ratio / t.expansion_ratio)
}

fn phylum_ready(f: &FeatureVector) -> bool {
    f.vol_ratio.is_some()
}

static PHYLUM: RuleTable = RuleTable {
    level: RegimeLevel::Phylum,
    ready: phylum_ready,
    rules: &[
        RegimeRule { label: "compression", predicate: compression },
        RegimeRule { label: "expansion", predicate: expansion },
        RegimeRule { label: "elevated", predicate: elevated },
    ],
    default_label: "stable",
    default_confidence: 0.55,
};

// Class: positioning, needs every derivatives series

fn deleveraging(f: &FeatureVector, t: &RegimeThresholds) -> Option<f64> {
    let oi_z = f.aux.oi_z?;
    (oi_z < -t.deleveraging_oi_z).then(|| 0.5 + (-oi_z - t.deleveraging_oi_z) / 4.0)
}

fn crowded_long(f: &FeatureVector, t: &RegimeThresholds) -> Option<f64> {
    let (fz, oi_z, bz) = (f.aux.funding_z?, f.aux.oi_z?, f.aux.basis_z?);
    (fz > t.funding_z_crowded && oi_z > t.oi_z_hot && bz > 0.0).then(|| (fz / 2.0 + oi_z / 2.0) / 2.0)
}

fn crowded_short(f: &FeatureVector, t: &RegimeThresholds) -> Option<f64> {
    let (fz, oi_z, bz) = (f.aux.funding_z?, f.aux.oi_z?, f.aux.basis_z?);
    (fz < -t.funding_z_crowded && oi_z > t.oi_z_hot && bz < 0.0).then(|| (-fz / 2.0 + oi_z / 2.0) / 2.0)
}

/// Crowd leaning one way while price moves the other
fn squeeze_setup(f: &FeatureVector, t: &RegimeThresholds) -> Option<f64> {
    let fz = f.aux.funding_z?;
    let oi_z = f.aux.oi_z?;
    let ret = f.log_return?;
    if fz * ret >= 0.0 {
        return None;
    }
    let score = clamp(0.5 * fz.abs() / t.funding_z_crowded + 0.25 * oi_z.max(0.0), 0.0, 1.0);
    (score > t.squeeze_score).then_some(score)
}

fn class_ready(f: &FeatureVector) -> bool {
    f.aux.funding_z.is_some() && f.aux.oi_z.is_some() && f.aux.basis_z.is_some()
}

static CLASS: RuleTable = RuleTable {
    level: RegimeLevel::Class,
    ready: class_ready,
    rules: &[
        RegimeRule { label: "deleveraging", predicate: deleveraging },
        RegimeRule { label: "crowded_long", predicate: crowded_long },
        RegimeRule { label: "crowded_short", predicate: crowded_short },
        RegimeRule { label: "squeeze_setup", predicate: squeeze_setup },
    ],
    default_label: "balanced",
    default_confidence: 0.55,
};

// Family: microstructure of the finest scale

/// Sharp tail move that snaps back
fn stop_run(f: &FeatureVector, t: &RegimeThresholds) -> Option<f64> {
    let score = clamp(f.tail_risk? / t.crash_tail_risk, 0.0, 1.0) * f.mean_reversion?;
    (score > t.stop_run_score).then_some(score)
}

/// Heavy volume that fails to move price
fn absorption(f: &FeatureVector, t: &RegimeThresholds) -> Option<f64> {
    let volume = f.volume_ratio?;
    let progress = f.progress_sigma?;
    (volume > t.absorption_volume_ratio && progress < t.absorption_progress_sigma)
        .then(|| (volume / 2.0) * (1.0 - progress))
}

/// Directional move running out of volume
fn exhaustion(f: &FeatureVector, t: &RegimeThresholds) -> Option<f64> {
    let score = clamp(f.directional_strength? * 2.0 * (1.0 - f.volume_ratio?), 0.0, 1.0);
    (score > t.exhaustion_score).then_some(score)
}

/// Directional move on rising volume
fn impulse(f: &FeatureVector, t: &RegimeThresholds) -> Option<f64> {
    let score = clamp(f.directional_strength? * f.volume_ratio? / 1.5, 0.0, 1.0);
    (score > t.impulse_score).then_some(score)
}

fn bid_pressure(f: &FeatureVector, t: &RegimeThresholds) -> Option<f64> {
    let imbalance = f.imbalance?;
    (imbalance > t.imbalance_pressure).then_some(imbalance)
}

fn ask_pressure(f: &FeatureVector, t: &RegimeThresholds) -> Option<f64> {
    let imbalance = f.imbalance?;
    (imbalance < -t.imbalance_pressure).then(|| -imbalance)
}

fn family_ready(f: &FeatureVector) -> bool {
    f.volatility.is_some()
}

static FAMILY: RuleTable = RuleTable {
    level: RegimeLevel::Family,
    ready: family_ready,
    rules: &[
        RegimeRule { label: "stop_run", predicate: stop_run },
        RegimeRule { label: "absorption", predicate: absorption },
        RegimeRule { label: "exhaustion", predicate: exhaustion },
        RegimeRule { label: "impulse", predicate: impulse },
        RegimeRule { label: "bid_pressure", predicate: bid_pressure },
        RegimeRule { label: "ask_pressure", predicate: ask_pressure },
    ],
    default_label: "neutral",
    default_confidence: 0.55,
};

/// Label of one level at one snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeAssignment {
    pub label: String,
    pub confidence: f64,
    pub scale: String,
    /// The rules proposed a different label that was held back because the
    /// finer level did not change. The previous label is kept with zero
    /// confidence, since the current inputs no longer support it.
    pub held: bool,
}

/// Labels for all four levels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeStack {
    pub kingdom: RegimeAssignment,
    pub phylum: RegimeAssignment,
    pub class: RegimeAssignment,
    pub family: RegimeAssignment,
}

/// Transition counts per level for a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionCounts {
    pub kingdom: u64,
    pub phylum: u64,
    pub class: u64,
    pub family: u64,
}

impl TransitionCounts {
    pub fn get(&self, level: RegimeLevel) -> u64 {
        match level {
            RegimeLevel::Kingdom => self.kingdom,
            RegimeLevel::Phylum => self.phylum,
            RegimeLevel::Class => self.class,
            RegimeLevel::Family => self.family,
        }
    }

    fn bump(&mut self, level: RegimeLevel) {
        match level {
            RegimeLevel::Kingdom => self.kingdom += 1,
            RegimeLevel::Phylum => self.phylum += 1,
            RegimeLevel::Class => self.class += 1,
            RegimeLevel::Family => self.family += 1,
        }
    }

    pub fn add(&mut self, other: &TransitionCounts) {
        self.kingdom += other.kingdom;
        self.phylum += other.phylum;
        self.class += other.class;
        self.family += other.family;
    }

    pub fn is_monotone(&self) -> bool {
        self.kingdom <= self.phylum && self.phylum <= self.class && self.class <= self.family
    }
}

/// Per-symbol classifier. Holds only each level's last label.
#[derive(Debug, Clone)]
pub struct RegimeClassifier {
    thresholds: RegimeThresholds,
    last: [Option<RegimeAssignment>; 4],
    transitions: TransitionCounts,
}

impl RegimeClassifier {
    pub fn new(thresholds: RegimeThresholds) -> Self {
        Self { thresholds, last: [None, None, None, None], transitions: TransitionCounts::default() }
    }

    fn slot(level: RegimeLevel) -> usize {
        match level {
            RegimeLevel::Family => 0,
            RegimeLevel::Class => 1,
            RegimeLevel::Phylum => 2,
            RegimeLevel::Kingdom => 3,
        }
    }

    /// Classify one snapshot's feature vectors (finest first)
    pub fn classify(&mut self, features: &[FeatureVector]) -> RegimeStack {
        let mut finer_changed = true;

        for level in RegimeLevel::FINEST_FIRST {
            let slot = Self::slot(level);
            let table = RuleTable::for_level(level);

            let (label, confidence, scale) = match features.get(level.scale_index(features.len())) {
                Some(fv) => {
                    let (label, confidence) = table.classify(fv, &self.thresholds);
                    (label, confidence, fv.scale.clone())
                }
                None => (UNCLASSIFIED, 0.0, String::new()),
            };

            let candidate = RegimeAssignment { label: label.to_string(), confidence, scale, held: false };

            let next = match self.last[slot].take() {
                None => candidate,
                Some(previous) if previous.label == candidate.label => {
                    finer_changed = false;
                    candidate
                }
                Some(_) if finer_changed => {
                    self.transitions.bump(level);
                    candidate
                }
                Some(previous) => {
                    finer_changed = false;
                    RegimeAssignment { held: true, confidence: 0.0, ..previous }
                }
            };
            self.last[slot] = Some(next);
        }

        let get = |level: RegimeLevel| self.last[Self::slot(level)].clone().unwrap_or(RegimeAssignment {
            label: UNCLASSIFIED.to_string(),
            confidence: 0.0,
            scale: String::new(),
            held: false,
        });

        RegimeStack {
            kingdom: get(RegimeLevel::Kingdom),
            phylum: get(RegimeLevel::Phylum),
            class: get(RegimeLevel::Class),
            family: get(RegimeLevel::Family),
        }
    }

    pub fn transitions(&self) -> TransitionCounts {
        self.transitions
    }
}
