//! Pipeline configuration
//!
//! Loaded from a TOML file (path from `PARTICLE_CONFIG_PATH`) and validated
//! eagerly. Unknown keys and out-of-range values are rejected before any
//! event is processed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

const DEPTH_SPEEDS: [&str; 3] = ["100ms", "250ms", "500ms"];
const BASIS_PERIODS: [&str; 9] = ["5m", "15m", "30m", "1h", "2h", "4h", "6h", "12h", "1d"];

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Cannot read configuration: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Cannot parse configuration: {}", msg),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// One event-count window of the scale space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleSpec {
    pub name: String,
    pub window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Emit one snapshot per this many trade prints, counted across all symbols
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every_trades: u64,

    /// Book levels per side used for the liquidity field
    #[serde(default = "default_book_depth")]
    pub book_depth: usize,

    /// Cold-start threshold, capped at each scale's window size
    #[serde(default = "default_min_window_events")]
    pub min_window_events: usize,

    /// Mixed with `sequence_no` to seed the cone generator
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Readings kept per derivatives series for z-scores
    #[serde(default = "default_aux_history")]
    pub aux_history: usize,

    /// Bounded buffer size per live producer
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,

    /// How long a producer buffer may stay full before the producer is reset
    #[serde(default = "default_overflow_grace_ms")]
    pub overflow_grace_ms: u64,

    /// First delay before a failed producer is reset, doubled per attempt
    #[serde(default = "default_producer_backoff_ms")]
    pub producer_backoff_ms: u64,

    /// Consecutive failed resets before a producer gives up
    #[serde(default = "default_producer_retries")]
    pub producer_retries: u32,

    /// Scale name -> window size in qualifying events
    #[serde(default = "default_scales")]
    pub scales: BTreeMap<String, usize>,

    #[serde(default)]
    pub cone: ConeConfig,

    #[serde(default)]
    pub field: FieldConfig,

    #[serde(default)]
    pub regimes: RegimeThresholds,

    #[serde(default)]
    pub binance: BinanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConeConfig {
    /// Horizon in event-steps
    #[serde(default = "default_cone_steps")]
    pub steps: usize,

    #[serde(default = "default_cone_paths", alias = "n_paths")]
    pub paths: usize,

    #[serde(default = "default_quantiles")]
    pub quantiles: Vec<f64>,

    /// Pull back toward the starting price per step
    #[serde(default = "default_mean_reversion")]
    pub mean_reversion: f64,

    /// Drift per unit of potential gradient, in units of sigma
    #[serde(default = "default_field_bias")]
    pub field_bias: f64,

    /// Relative per-step sigma used when realized volatility is unavailable
    #[serde(default = "default_volatility")]
    pub volatility: f64,

    #[serde(default = "default_true")]
    pub use_realized_volatility: bool,

    /// Share of each path's velocity carried into the next step
    #[serde(default = "default_momentum")]
    pub momentum: f64,

    /// Momentum while the Kingdom is `trend` or `breakout`
    #[serde(default = "default_trend_momentum")]
    pub trend_momentum: f64,

    /// Field bias while the Class is crowded or squeeze-prone
    #[serde(default = "default_crowded_field_bias")]
    pub crowded_field_bias: f64,

    /// Order-flow push per step, in units of sigma
    #[serde(default = "default_flow_gain")]
    pub flow_gain: f64,

    /// CVD slope that maps to `tanh(1)` of the flow push
    #[serde(default = "default_flow_scale")]
    pub flow_scale: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldConfig {
    #[serde(default = "default_tick_size")]
    pub tick_size: f64,

    /// Grid half-width in ticks
    #[serde(default = "default_range_ticks")]
    pub range_ticks: usize,

    /// Distance of the positioning hump from the current price
    #[serde(default = "default_kernel_offset_ticks")]
    pub kernel_offset_ticks: f64,

    #[serde(default = "default_kernel_width_ticks")]
    pub kernel_width_ticks: f64,

    #[serde(default = "default_liquidity_smoothing_ticks")]
    pub liquidity_smoothing_ticks: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegimeThresholds {
    #[serde(default = "default_trend_strength")]
    pub trend_strength: f64,
    #[serde(default = "default_mr_strength")]
    pub mr_strength: f64,
    #[serde(default = "default_crash_tail_risk")]
    pub crash_tail_risk: f64,
    #[serde(default = "default_breakout_progress_sigma")]
    pub breakout_progress_sigma: f64,
    #[serde(default = "default_compression_ratio")]
    pub compression_ratio: f64,
    #[serde(default = "default_expansion_ratio")]
    pub expansion_ratio: f64,
    #[serde(default = "default_elevated_ratio")]
    pub elevated_ratio: f64,
    #[serde(default = "default_funding_z_crowded")]
    pub funding_z_crowded: f64,
    #[serde(default = "default_oi_z_hot")]
    pub oi_z_hot: f64,
    #[serde(default = "default_deleveraging_oi_z")]
    pub deleveraging_oi_z: f64,
    #[serde(default = "default_squeeze_score")]
    pub squeeze_score: f64,
    #[serde(default = "default_stop_run_score")]
    pub stop_run_score: f64,
    #[serde(default = "default_absorption_volume_ratio")]
    pub absorption_volume_ratio: f64,
    #[serde(default = "default_absorption_progress_sigma")]
    pub absorption_progress_sigma: f64,
    #[serde(default = "default_exhaustion_score")]
    pub exhaustion_score: f64,
    #[serde(default = "default_impulse_score")]
    pub impulse_score: f64,
    #[serde(default = "default_imbalance_pressure")]
    pub imbalance_pressure: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BinanceConfig {
    #[serde(default = "default_depth_ms")]
    pub depth_ms: String,
    #[serde(default = "default_true")]
    pub mark_price_1s: bool,
    #[serde(default = "default_oi_poll_s")]
    pub oi_poll_s: f64,
    #[serde(default = "default_basis_poll_s")]
    pub basis_poll_s: f64,
    #[serde(default = "default_basis_period")]
    pub basis_period: String,
}

fn default_snapshot_every() -> u64 {
    200
}
fn default_book_depth() -> usize {
    20
}
fn default_min_window_events() -> usize {
    5
}
fn default_seed() -> u64 {
    7
}
fn default_aux_history() -> usize {
    500
}
fn default_channel_buffer() -> usize {
    5_000
}
fn default_overflow_grace_ms() -> u64 {
    2_000
}
fn default_producer_backoff_ms() -> u64 {
    500
}
fn default_producer_retries() -> u32 {
    10
}
fn default_scales() -> BTreeMap<String, usize> {
    [("micro", 500), ("minor", 2_000), ("major", 8_000), ("macro", 30_000)]
        .into_iter()
        .map(|(name, window)| (name.to_string(), window))
        .collect()
}
fn default_cone_steps() -> usize {
    250
}
fn default_cone_paths() -> usize {
    2_000
}
fn default_quantiles() -> Vec<f64> {
    vec![0.1, 0.5, 0.9]
}
fn default_mean_reversion() -> f64 {
    0.02
}
fn default_field_bias() -> f64 {
    0.5
}
fn default_volatility() -> f64 {
    0.0005
}
fn default_momentum() -> f64 {
    0.80
}
fn default_trend_momentum() -> f64 {
    0.90
}
fn default_crowded_field_bias() -> f64 {
    0.75
}
fn default_flow_gain() -> f64 {
    0.25
}
fn default_flow_scale() -> f64 {
    50.0
}
fn default_true() -> bool {
    true
}
fn default_tick_size() -> f64 {
    1.0
}
fn default_range_ticks() -> usize {
    200
}
fn default_kernel_offset_ticks() -> f64 {
    20.0
}
fn default_kernel_width_ticks() -> f64 {
    25.0
}
fn default_liquidity_smoothing_ticks() -> f64 {
    5.0
}
fn default_trend_strength() -> f64 {
    0.75
}
fn default_mr_strength() -> f64 {
    0.60
}
fn default_crash_tail_risk() -> f64 {
    0.20
}
fn default_breakout_progress_sigma() -> f64 {
    2.5
}
fn default_compression_ratio() -> f64 {
    0.6
}
fn default_expansion_ratio() -> f64 {
    1.5
}
fn default_elevated_ratio() -> f64 {
    1.15
}
fn default_funding_z_crowded() -> f64 {
    1.25
}
fn default_oi_z_hot() -> f64 {
    1.0
}
fn default_deleveraging_oi_z() -> f64 {
    1.5
}
fn default_squeeze_score() -> f64 {
    0.65
}
fn default_stop_run_score() -> f64 {
    0.7
}
fn default_absorption_volume_ratio() -> f64 {
    1.5
}
fn default_absorption_progress_sigma() -> f64 {
    0.25
}
fn default_exhaustion_score() -> f64 {
    0.65
}
fn default_impulse_score() -> f64 {
    0.65
}
fn default_imbalance_pressure() -> f64 {
    0.5
}
fn default_depth_ms() -> String {
    "100ms".to_string()
}
fn default_oi_poll_s() -> f64 {
    5.0
}
fn default_basis_poll_s() -> f64 {
    60.0
}
fn default_basis_period() -> String {
    "5m".to_string()
}

impl Default for ConeConfig {
    fn default() -> Self {
        Self {
            steps: default_cone_steps(),
            paths: default_cone_paths(),
            quantiles: default_quantiles(),
            mean_reversion: default_mean_reversion(),
            field_bias: default_field_bias(),
            volatility: default_volatility(),
            use_realized_volatility: true,
            momentum: default_momentum(),
            trend_momentum: default_trend_momentum(),
            crowded_field_bias: default_crowded_field_bias(),
            flow_gain: default_flow_gain(),
            flow_scale: default_flow_scale(),
        }
    }
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            tick_size: default_tick_size(),
            range_ticks: default_range_ticks(),
            kernel_offset_ticks: default_kernel_offset_ticks(),
            kernel_width_ticks: default_kernel_width_ticks(),
            liquidity_smoothing_ticks: default_liquidity_smoothing_ticks(),
        }
    }
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            trend_strength: default_trend_strength(),
            mr_strength: default_mr_strength(),
            crash_tail_risk: default_crash_tail_risk(),
            breakout_progress_sigma: default_breakout_progress_sigma(),
            compression_ratio: default_compression_ratio(),
            expansion_ratio: default_expansion_ratio(),
            elevated_ratio: default_elevated_ratio(),
            funding_z_crowded: default_funding_z_crowded(),
            oi_z_hot: default_oi_z_hot(),
            deleveraging_oi_z: default_deleveraging_oi_z(),
            squeeze_score: default_squeeze_score(),
            stop_run_score: default_stop_run_score(),
            absorption_volume_ratio: default_absorption_volume_ratio(),
            absorption_progress_sigma: default_absorption_progress_sigma(),
            exhaustion_score: default_exhaustion_score(),
            impulse_score: default_impulse_score(),
            imbalance_pressure: default_imbalance_pressure(),
        }
    }
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            depth_ms: default_depth_ms(),
            mark_price_1s: true,
            oi_poll_s: default_oi_poll_s(),
            basis_poll_s: default_basis_poll_s(),
            basis_period: default_basis_period(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            snapshot_every_trades: default_snapshot_every(),
            book_depth: default_book_depth(),
            min_window_events: default_min_window_events(),
            seed: default_seed(),
            aux_history: default_aux_history(),
            channel_buffer: default_channel_buffer(),
            overflow_grace_ms: default_overflow_grace_ms(),
            producer_backoff_ms: default_producer_backoff_ms(),
            producer_retries: default_producer_retries(),
            scales: default_scales(),
            cone: ConeConfig::default(),
            field: FieldConfig::default(),
            regimes: RegimeThresholds::default(),
            binance: BinanceConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    /// Resolve the configuration file from the environment
    ///
    /// - `PARTICLE_CONFIG_PATH` set: that file must exist and validate
    /// - unset: `config/default.toml` if present, otherwise built-in defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        match env::var("PARTICLE_CONFIG_PATH") {
            Ok(path) => Self::load(path),
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::load(DEFAULT_CONFIG_PATH),
            Err(_) => {
                log::info!("No configuration file found, using built-in defaults");
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Scales ordered from finest (smallest window) to coarsest
    pub fn scale_specs(&self) -> Vec<ScaleSpec> {
        let mut specs: Vec<ScaleSpec> = self
            .scales
            .iter()
            .map(|(name, window)| ScaleSpec { name: name.clone(), window: *window })
            .collect();
        specs.sort_by(|a, b| a.window.cmp(&b.window).then_with(|| a.name.cmp(&b.name)));
        specs
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.snapshot_every_trades == 0 {
            return Err(invalid("snapshot_every_trades must be >= 1"));
        }
        if self.book_depth == 0 || self.book_depth > 1_000 {
            return Err(invalid(format!("book_depth must be in 1..=1000, got {}", self.book_depth)));
        }
        if self.min_window_events < 2 {
            return Err(invalid("min_window_events must be >= 2"));
        }
        if self.aux_history < 2 {
            return Err(invalid("aux_history must be >= 2"));
        }
        if self.channel_buffer == 0 {
            return Err(invalid("channel_buffer must be >= 1"));
        }
        if self.overflow_grace_ms == 0 {
            return Err(invalid("overflow_grace_ms must be >= 1"));
        }
        if self.producer_backoff_ms == 0 {
            return Err(invalid("producer_backoff_ms must be >= 1"));
        }

        if self.scales.is_empty() {
            return Err(invalid("scales must define at least one scale"));
        }
        for (name, window) in &self.scales {
            if name.trim().is_empty() {
                return Err(invalid("scale names cannot be empty"));
            }
            if *window < 2 {
                return Err(invalid(format!("scale '{}' window must be >= 2, got {}", name, window)));
            }
        }

        let cone = &self.cone;
        if cone.steps == 0 {
            return Err(invalid("cone.steps must be >= 1"));
        }
        if cone.paths == 0 || cone.paths > 1_000_000 {
            return Err(invalid(format!("cone.paths must be in 1..=1000000, got {}", cone.paths)));
        }
        if cone.quantiles.is_empty() {
            return Err(invalid("cone.quantiles cannot be empty"));
        }
        for q in &cone.quantiles {
            if !(*q > 0.0 && *q < 1.0) {
                return Err(invalid(format!("cone.quantiles must lie in (0, 1), got {}", q)));
            }
        }
        if cone.quantiles.windows(2).any(|w| w[0] >= w[1]) {
            return Err(invalid("cone.quantiles must be strictly ascending"));
        }
        if !(0.0..=1.0).contains(&cone.mean_reversion) {
            return Err(invalid("cone.mean_reversion must be in [0, 1]"));
        }
        if !(cone.field_bias >= 0.0 && cone.field_bias.is_finite()) {
            return Err(invalid("cone.field_bias must be >= 0"));
        }
        if !(cone.volatility > 0.0 && cone.volatility.is_finite()) {
            return Err(invalid("cone.volatility must be > 0"));
        }
        for (name, value) in [("momentum", cone.momentum), ("trend_momentum", cone.trend_momentum)] {
            if !(0.0..1.0).contains(&value) {
                return Err(invalid(format!("cone.{} must be in [0, 1), got {}", name, value)));
            }
        }
        if !(cone.crowded_field_bias >= 0.0 && cone.crowded_field_bias.is_finite()) {
            return Err(invalid("cone.crowded_field_bias must be >= 0"));
        }
        if !(cone.flow_gain >= 0.0 && cone.flow_gain.is_finite()) {
            return Err(invalid("cone.flow_gain must be >= 0"));
        }
        if !(cone.flow_scale > 0.0 && cone.flow_scale.is_finite()) {
            return Err(invalid("cone.flow_scale must be > 0"));
        }

        let field = &self.field;
        if !(field.tick_size > 0.0 && field.tick_size.is_finite()) {
            return Err(invalid("field.tick_size must be > 0"));
        }
        if field.range_ticks == 0 || field.range_ticks > 100_000 {
            return Err(invalid("field.range_ticks must be in 1..=100000"));
        }
        if !(field.kernel_width_ticks > 0.0 && field.kernel_width_ticks.is_finite()) {
            return Err(invalid("field.kernel_width_ticks must be > 0"));
        }
        if !(field.kernel_offset_ticks >= 0.0 && field.kernel_offset_ticks.is_finite()) {
            return Err(invalid("field.kernel_offset_ticks must be >= 0"));
        }
        if !(field.liquidity_smoothing_ticks >= 0.0 && field.liquidity_smoothing_ticks.is_finite()) {
            return Err(invalid("field.liquidity_smoothing_ticks must be >= 0"));
        }

        let binance = &self.binance;
        if !DEPTH_SPEEDS.contains(&binance.depth_ms.as_str()) {
            return Err(invalid(format!(
                "binance.depth_ms must be one of {:?}, got '{}'",
                DEPTH_SPEEDS, binance.depth_ms
            )));
        }
        if !BASIS_PERIODS.contains(&binance.basis_period.as_str()) {
            return Err(invalid(format!(
                "binance.basis_period must be one of {:?}, got '{}'",
                BASIS_PERIODS, binance.basis_period
            )));
        }
        if !(binance.oi_poll_s > 0.0 && binance.oi_poll_s.is_finite()) {
            return Err(invalid("binance.oi_poll_s must be > 0"));
        }
        if !(binance.basis_poll_s > 0.0 && binance.basis_poll_s.is_finite()) {
            return Err(invalid("binance.basis_poll_s must be > 0"));
        }

        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue(msg.into())
}
