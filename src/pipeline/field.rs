//! Potential field over a price grid
//!
//! Rebuilt from scratch at every snapshot from the current book and
//! derivatives state. Deep liquidity forms wells; crowded positioning forms a
//! hump on the crowded side of the current price.

use super::config::FieldConfig;
use super::features::{AuxFeatures, BookState};
use super::stats::{clamp, EPS};
use serde::{Deserialize, Serialize};

/// Positioning below this crowding level is ignored
const MIN_CROWD: f64 = 0.05;
/// Peak height of the positioning hump
const POSITIONING_SCALE: f64 = 0.75;

#[derive(Debug, Clone, PartialEq)]
pub struct PotentialField {
    center: f64,
    tick_size: f64,
    range_ticks: usize,
    liquidity_weight: Vec<f64>,
    positioning_weight: Vec<f64>,
    potential: Vec<f64>,
    gradient: Vec<f64>,
}

/// Compact description of a field, carried in every snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSummary {
    pub center: f64,
    pub low: f64,
    pub high: f64,
    pub cells: usize,
    pub liquidity_total: f64,
    pub positioning_total: f64,
    /// Zero total weight; the cone ran without gradient bias
    pub degenerate: bool,
    /// Grid price of the deepest well, if any
    pub min_potential_price: Option<f64>,
    /// Grid price of the highest barrier, if any
    pub max_potential_price: Option<f64>,
}

impl PotentialField {
    /// Build the field centred on `price`
    ///
    /// Idempotent: the same book, aux and price always give the same field.
    pub fn build(
        config: &FieldConfig,
        book_depth: usize,
        price: f64,
        book: &BookState,
        aux: &AuxFeatures,
    ) -> Self {
        let range = config.range_ticks;
        let cells = 2 * range + 1;
        let tick = config.tick_size;

        let mut field = Self {
            center: price,
            tick_size: tick,
            range_ticks: range,
            liquidity_weight: vec![0.0; cells],
            positioning_weight: vec![0.0; cells],
            potential: vec![0.0; cells],
            gradient: vec![0.0; cells],
        };

        // (1) bucket the top `book_depth` levels of each side
        for (level_price, size) in book.bids(book_depth).iter().chain(book.asks(book_depth)) {
            if let Some(i) = field.cell_of(*level_price) {
                field.liquidity_weight[i] += size;
            }
        }

        // (2) positioning hump from derivatives crowding
        let fz = aux.funding_z.unwrap_or(0.0);
        let oi_z = aux.oi_z.unwrap_or(0.0);
        let bz = aux.basis_z.unwrap_or(0.0);
        let crowd = clamp((fz.abs() + oi_z.max(0.0) + 0.5 * bz.abs()) / 3.5, 0.0, 1.0);
        if crowd > MIN_CROWD {
            let direction = if fz + 0.5 * bz > 0.0 { 1.0 } else { -1.0 };
            let hump_center = price + direction * config.kernel_offset_ticks * tick;
            let width = config.kernel_width_ticks * tick;
            for i in 0..cells {
                let x = (field.price_at(i) - hump_center) / width;
                field.positioning_weight[i] = POSITIONING_SCALE * crowd * (-0.5 * x * x).exp();
            }
        }

        // (3) U = positioning - smoothed liquidity normalised to [0, 1]
        let smoothed = gaussian_smooth(&field.liquidity_weight, config.liquidity_smoothing_ticks);
        let peak = smoothed.iter().cloned().fold(0.0, f64::max);
        for i in 0..cells {
            let liquidity = if peak > EPS { smoothed[i] / peak } else { 0.0 };
            field.potential[i] = field.positioning_weight[i] - liquidity;
        }

        // (4) dU per tick, central differences inside, one-sided at the edges
        if cells >= 2 {
            for i in 0..cells {
                let (lo, hi) = (i.saturating_sub(1), (i + 1).min(cells - 1));
                field.gradient[i] = (field.potential[hi] - field.potential[lo]) / (hi - lo) as f64;
            }
        }

        field
    }

    fn cell_of(&self, price: f64) -> Option<usize> {
        let offset = ((price - self.center) / self.tick_size).round();
        let index = offset + self.range_ticks as f64;
        if index < 0.0 || index > (2 * self.range_ticks) as f64 || !index.is_finite() {
            return None;
        }
        Some(index as usize)
    }

    pub fn price_at(&self, cell: usize) -> f64 {
        self.center + (cell as f64 - self.range_ticks as f64) * self.tick_size
    }

    pub fn cells(&self) -> usize {
        self.potential.len()
    }

    pub fn liquidity_weight(&self) -> &[f64] {
        &self.liquidity_weight
    }

    pub fn positioning_weight(&self) -> &[f64] {
        &self.positioning_weight
    }

    pub fn potential(&self) -> &[f64] {
        &self.potential
    }

    pub fn total_weight(&self) -> f64 {
        self.liquidity_weight.iter().sum::<f64>() + self.positioning_weight.iter().sum::<f64>()
    }

    /// No book and no positioning inside the grid
    pub fn is_degenerate(&self) -> bool {
        self.total_weight() <= 0.0
    }

    /// Potential gradient per tick at `price`, linearly interpolated between
    /// cells and zero outside the grid
    pub fn gradient_at(&self, price: f64) -> f64 {
        let pos = (price - self.center) / self.tick_size + self.range_ticks as f64;
        let last = (self.cells() - 1) as f64;
        if !(0.0..=last).contains(&pos) {
            return 0.0;
        }
        let lo = pos.floor() as usize;
        let hi = (lo + 1).min(self.cells() - 1);
        let frac = pos - lo as f64;
        self.gradient[lo] + frac * (self.gradient[hi] - self.gradient[lo])
    }

    pub fn summary(&self) -> FieldSummary {
        let degenerate = self.is_degenerate();
        let extreme = |pick_max: bool| -> Option<f64> {
            if degenerate {
                return None;
            }
            let mut best: Option<(usize, f64)> = None;
            for (i, u) in self.potential.iter().enumerate() {
                let better = match best {
                    None => true,
                    Some((_, b)) if pick_max => *u > b,
                    Some((_, b)) => *u < b,
                };
                if better {
                    best = Some((i, *u));
                }
            }
            best.map(|(i, _)| self.price_at(i))
        };

        FieldSummary {
            center: self.center,
            low: self.price_at(0),
            high: self.price_at(self.cells() - 1),
            cells: self.cells(),
            liquidity_total: self.liquidity_weight.iter().sum(),
            positioning_total: self.positioning_weight.iter().sum(),
            degenerate,
            min_potential_price: extreme(false),
            max_potential_price: extreme(true),
        }
    }
}

/// Gaussian smoothing with standard deviation `sigma` cells; identity for 0
fn gaussian_smooth(values: &[f64], sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 || values.is_empty() {
        return values.to_vec();
    }
    let radius = (3.0 * sigma).ceil() as isize;
    let kernel: Vec<f64> = (-radius..=radius)
        .map(|k| (-0.5 * (k as f64 / sigma).powi(2)).exp())
        .collect();

    let n = values.len() as isize;
    (0..n)
        .map(|i| {
            let mut acc = 0.0;
            for (j, w) in kernel.iter().enumerate() {
                let src = i + j as isize - radius;
                if (0..n).contains(&src) {
                    acc += w * values[src as usize];
                }
            }
            acc
        })
        .collect()
}
