//! Small numeric helpers shared by the feature engine, classifier and cone

use rand::Rng;
use rand_distr::StandardNormal;

/// Floor used wherever a dispersion is divided by
pub const EPS: f64 = 1e-12;

pub fn mean(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        return None;
    }
    Some(xs.iter().sum::<f64>() / xs.len() as f64)
}

/// Sample standard deviation (n - 1 denominator)
pub fn stdev(xs: &[f64]) -> Option<f64> {
    let n = xs.len();
    if n < 2 {
        return None;
    }
    let m = xs.iter().sum::<f64>() / n as f64;
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (n - 1) as f64;
    Some(var.max(0.0).sqrt())
}

pub fn zscore(x: f64, mu: f64, sd: f64) -> f64 {
    (x - mu) / sd.max(EPS)
}

pub fn clamp(x: f64, lo: f64, hi: f64) -> f64 {
    x.max(lo).min(hi)
}

/// Lag-1 autocorrelation; `None` below three points or with zero variance
pub fn lag1_autocorrelation(xs: &[f64]) -> Option<f64> {
    if xs.len() < 3 {
        return None;
    }
    let m = mean(xs)?;
    let denom: f64 = xs.iter().map(|x| (x - m).powi(2)).sum();
    if denom <= EPS {
        return None;
    }
    let num: f64 = xs.windows(2).map(|w| (w[0] - m) * (w[1] - m)).sum();
    Some(clamp(num / denom, -1.0, 1.0))
}

/// Quantile of an ascending slice with linear interpolation between ranks
///
/// Monotone in `q` for a fixed slice, so ascending quantile levels always
/// give non-decreasing values.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let q = clamp(q, 0.0, 1.0);
    let h = (sorted.len() - 1) as f64 * q;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    let frac = h - lo as f64;
    Some(sorted[lo] + frac * (sorted[hi] - sorted[lo]))
}

/// Least-squares slope of `ys` against their index; `None` below three points
pub fn slope(ys: &[f64]) -> Option<f64> {
    let n = ys.len();
    if n < 3 {
        return None;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(ys)?;
    let (mut num, mut den) = (0.0, 0.0);
    for (i, y) in ys.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    Some(num / den)
}

pub fn sample_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    rng.sample(StandardNormal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_stdev() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[1.0, 2.0, 3.0]), Some(2.0));
        assert_eq!(stdev(&[1.0]), None);
        let sd = stdev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((sd - 2.138089935299395).abs() < 1e-12);
    }

    #[test]
    fn test_zscore_with_zero_dispersion() {
        assert_eq!(zscore(1.0, 1.0, 0.0), 0.0);
        assert_eq!(zscore(3.0, 1.0, 2.0), 1.0);
    }

    #[test]
    fn test_lag1_autocorrelation() {
        // alternating series is perfectly anti-correlated at lag 1
        let alt = [1.0, -1.0, 1.0, -1.0, 1.0, -1.0];
        assert!(lag1_autocorrelation(&alt).unwrap() < -0.8);
        assert_eq!(lag1_autocorrelation(&[1.0, 1.0, 1.0]), None);
        assert_eq!(lag1_autocorrelation(&[1.0, 2.0]), None);
    }

    #[test]
    fn test_slope() {
        assert_eq!(slope(&[1.0, 2.0]), None);
        assert!((slope(&[1.0, 3.0, 5.0, 7.0]).unwrap() - 2.0).abs() < 1e-12);
        assert_eq!(slope(&[4.0, 4.0, 4.0]), Some(0.0));
    }

    #[test]
    fn test_sample_normal_is_seeded() {
        use rand::SeedableRng;
        use rand_chacha::ChaCha8Rng;

        let mut a = ChaCha8Rng::seed_from_u64(7);
        let mut b = ChaCha8Rng::seed_from_u64(7);
        let xs: Vec<f64> = (0..2_000).map(|_| sample_normal(&mut a)).collect();
        let ys: Vec<f64> = (0..2_000).map(|_| sample_normal(&mut b)).collect();
        assert_eq!(xs, ys);

        let m = mean(&xs).unwrap();
        let sd = stdev(&xs).unwrap();
        assert!(m.abs() < 0.1, "mean {}", m);
        assert!((sd - 1.0).abs() < 0.1, "sd {}", sd);
    }

    #[test]
    fn test_quantile_interpolates() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile_sorted(&xs, 0.0), Some(1.0));
        assert_eq!(quantile_sorted(&xs, 1.0), Some(4.0));
        assert_eq!(quantile_sorted(&xs, 0.5), Some(2.5));
        assert_eq!(quantile_sorted(&[], 0.5), None);

        let mut prev = f64::MIN;
        for i in 0..=20 {
            let v = quantile_sorted(&xs, i as f64 / 20.0).unwrap();
            assert!(v >= prev);
            prev = v;
        }
    }
}
