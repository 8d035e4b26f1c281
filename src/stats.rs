//! Pure statistical primitives shared by the generators, the calibrator and
//! the aggregator.
//!
//! Percentiles use one convention throughout the crate: `rank` is on the
//! 0–100 scale, and the value is linearly interpolated between the order
//! statistics at `rank/100 · (n − 1)`.

use rand::Rng;
use rand_distr::StandardNormal;

/// Arithmetic mean. Zero for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n − 1 denominator). Zero below two observations.
pub fn std_dev(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (n - 1) as f64;
    variance.sqrt()
}

/// Ascending copy, NaN-safe via `total_cmp`.
pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(|a, b| a.total_cmp(b));
    out
}

/// Percentile of an ascending slice; `rank` in 0–100 (clamped).
pub fn percentile(sorted: &[f64], rank: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return sorted[0];
    }
    let h = (rank.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    let frac = h - lo as f64;
    // Bounded by the bracketing order statistics so ranks stay monotone.
    (sorted[lo] + frac * (sorted[hi] - sorted[lo])).max(sorted[lo]).min(sorted[hi])
}

/// Lag-1 sample autocorrelation. Zero for constant or too-short series.
pub fn lag1_autocorrelation(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let (lo, hi) = values.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| {
        (lo.min(x), hi.max(x))
    });
    if lo == hi {
        return 0.0;
    }
    let m = mean(values);
    let denom: f64 = values.iter().map(|x| (x - m).powi(2)).sum();
    // Rounding in the mean leaves a residue of order n·ε·m² on flat series.
    if denom <= n as f64 * f64::EPSILON * m * m {
        return 0.0;
    }
    let num: f64 = values.windows(2).map(|w| (w[1] - m) * (w[0] - m)).sum();
    num / denom
}

/// Lower-triangular Cholesky factor of a correlation matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct CholeskyFactor {
    pub lower: Vec<Vec<f64>>,
    /// True when a negative pivot was clamped (input was not PSD).
    pub clamped: bool,
}

impl CholeskyFactor {
    pub fn identity(n: usize) -> Self {
        let lower = (0..n)
            .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
            .collect();
        CholeskyFactor { lower, clamped: false }
    }

    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    /// `out = L · independent`.
    pub fn correlate(&self, independent: &[f64], out: &mut [f64]) {
        for (i, row) in self.lower.iter().enumerate() {
            out[i] = row[..=i].iter().zip(independent).map(|(l, z)| l * z).sum();
        }
    }
}

/// Cholesky–Banachiewicz factorization.
///
/// Negative diagonal pivots are clamped to zero instead of producing NaN, and
/// columns with a zero pivot contribute nothing below the diagonal. A
/// non-PSD input therefore yields a usable (if degenerate) factor.
pub fn cholesky(matrix: &[Vec<f64>]) -> CholeskyFactor {
    let n = matrix.len();
    let mut lower = vec![vec![0.0; n]; n];
    let mut clamped = false;

    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| lower[i][k] * lower[j][k]).sum();
            if i == j {
                let diag = matrix[i][i] - sum;
                if diag < -1e-12 {
                    clamped = true;
                }
                lower[i][j] = diag.max(0.0).sqrt();
            } else if lower[j][j] > 1e-15 {
                lower[i][j] = (matrix[i][j] - sum) / lower[j][j];
            } else {
                lower[i][j] = 0.0;
            }
        }
    }

    CholeskyFactor { lower, clamped }
}

pub fn standard_normal(rng: &mut impl Rng) -> f64 {
    rng.sample(StandardNormal)
}

/// Fill `out` with correlated standard normals: draws `n` independent normals
/// into `scratch` (in asset order) then applies the factor.
pub fn correlated_normals(
    rng: &mut impl Rng,
    factor: &CholeskyFactor,
    scratch: &mut [f64],
    out: &mut [f64],
) {
    for z in scratch.iter_mut() {
        *z = standard_normal(rng);
    }
    factor.correlate(scratch, out);
}

/// Student-t variate with integer degrees of freedom:
/// `z / sqrt(Σ_{i<df} z_i² / df)`. Draws `df + 1` normals.
pub fn student_t(rng: &mut impl Rng, df: u32) -> f64 {
    let df = df.max(1);
    let z = standard_normal(rng);
    let chi2: f64 = (0..df).map(|_| standard_normal(rng).powi(2)).sum();
    let denom = (chi2 / df as f64).sqrt();
    if denom > 0.0 { z / denom } else { 0.0 }
}
