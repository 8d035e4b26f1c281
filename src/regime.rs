//! Markov regime-switching return generator.

use rand::Rng;

use crate::config::CalibrationMode;
use crate::returns::ReturnPath;
use crate::stats::{self, CholeskyFactor};
use crate::types::{Regime, RegimeParamsMap};

/// Row = current regime, column = next regime, in `Regime` index order.
pub type TransitionMatrix = [[f64; 4]; 4];

pub const DEFAULT_TRANSITIONS: TransitionMatrix = [
    [0.85, 0.10, 0.03, 0.02], // bull
    [0.20, 0.60, 0.10, 0.10], // bear
    [0.05, 0.15, 0.30, 0.50], // crash
    [0.60, 0.10, 0.05, 0.25], // recovery
];

/// Longer bears, stickier crashes, slower recoveries.
pub const CONSERVATIVE_TRANSITIONS: TransitionMatrix = [
    [0.80, 0.13, 0.05, 0.02],
    [0.15, 0.62, 0.13, 0.10],
    [0.05, 0.20, 0.35, 0.40],
    [0.50, 0.15, 0.08, 0.27],
];

pub const HISTORICAL_SURVIVORSHIP_ADJUSTMENT: f64 = 0.015;
pub const CONSERVATIVE_SURVIVORSHIP_ADJUSTMENT: f64 = 0.020;

/// Transition matrix and survivorship haircut for a calibration mode.
pub fn transitions_for(mode: Option<CalibrationMode>) -> (TransitionMatrix, f64) {
    match mode {
        None | Some(CalibrationMode::Historical) => {
            (DEFAULT_TRANSITIONS, HISTORICAL_SURVIVORSHIP_ADJUSTMENT)
        }
        Some(CalibrationMode::Conservative) => {
            (CONSERVATIVE_TRANSITIONS, CONSERVATIVE_SURVIVORSHIP_ADJUSTMENT)
        }
    }
}

/// Walk the cumulative row with a uniform draw `u ∈ [0, 1)`.
/// Rounding slack in the row lands on the last column.
pub fn next_regime(matrix: &TransitionMatrix, current: Regime, u: f64) -> Regime {
    let row = &matrix[current.index()];
    let mut cumulative = 0.0;
    for (j, p) in row.iter().enumerate() {
        cumulative += p;
        if u < cumulative {
            return Regime::from_index(j);
        }
    }
    Regime::from_index(row.len() - 1)
}

#[derive(Debug, Clone)]
pub struct RegimeSwitching {
    /// One parameter map per asset.
    params: Vec<RegimeParamsMap>,
    transitions: TransitionMatrix,
    survivorship: f64,
    factor: CholeskyFactor,
    initial: Regime,
}

impl RegimeSwitching {
    pub fn new(
        params: Vec<RegimeParamsMap>,
        transitions: TransitionMatrix,
        survivorship: f64,
        factor: CholeskyFactor,
    ) -> Self {
        RegimeSwitching { params, transitions, survivorship, factor, initial: Regime::Bull }
    }

    pub fn transitions(&self) -> &TransitionMatrix {
        &self.transitions
    }

    /// Per year: N normals (correlated), then one uniform for the transition.
    pub fn fill(&self, rng: &mut impl Rng, path: &mut ReturnPath) {
        let n = self.params.len();
        let mut independent = vec![0.0; n];
        let mut correlated = vec![0.0; n];
        let mut regime = self.initial;

        for year in 0..path.years() {
            stats::correlated_normals(rng, &self.factor, &mut independent, &mut correlated);
            for (asset, params) in self.params.iter().enumerate() {
                let p = params.get(regime);
                path.set(asset, year, p.mean + p.std_dev * correlated[asset] - self.survivorship);
            }
            regime = next_regime(&self.transitions, regime, rng.random::<f64>());
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;
    use crate::stats::cholesky;

    #[test]
    fn transition_rows_sum_to_one() {
        for matrix in [DEFAULT_TRANSITIONS, CONSERVATIVE_TRANSITIONS] {
            for (i, row) in matrix.iter().enumerate() {
                let sum: f64 = row.iter().sum();
                assert!((sum - 1.0).abs() < 1e-9, "row {i} sums to {sum}");
            }
        }
    }

    #[test]
    fn uncalibrated_runs_use_historical_haircut() {
        let (matrix, survivorship) = transitions_for(None);
        assert_eq!(matrix, DEFAULT_TRANSITIONS);
        assert_eq!(survivorship, HISTORICAL_SURVIVORSHIP_ADJUSTMENT);
        assert_eq!(transitions_for(Some(CalibrationMode::Historical)), (matrix, survivorship));
        let (harsh, haircut) = transitions_for(Some(CalibrationMode::Conservative));
        assert_eq!(harsh, CONSERVATIVE_TRANSITIONS);
        assert_eq!(haircut, CONSERVATIVE_SURVIVORSHIP_ADJUSTMENT);
    }

    #[test]
    fn conservative_matrix_is_harsher() {
        let bull = Regime::Bull.index();
        let crash = Regime::Crash.index();
        assert!(CONSERVATIVE_TRANSITIONS[bull][bull] < DEFAULT_TRANSITIONS[bull][bull]);
        assert!(CONSERVATIVE_TRANSITIONS[crash][crash] > DEFAULT_TRANSITIONS[crash][crash]);
    }

    #[test]
    fn next_regime_walks_cumulative_row() {
        let m = DEFAULT_TRANSITIONS;
        assert_eq!(next_regime(&m, Regime::Bull, 0.0), Regime::Bull);
        assert_eq!(next_regime(&m, Regime::Bull, 0.849), Regime::Bull);
        assert_eq!(next_regime(&m, Regime::Bull, 0.85), Regime::Bear);
        assert_eq!(next_regime(&m, Regime::Bull, 0.96), Regime::Crash);
        assert_eq!(next_regime(&m, Regime::Bull, 0.999_999), Regime::Recovery);
        assert_eq!(next_regime(&m, Regime::Crash, 0.6), Regime::Recovery);
    }

    #[test]
    fn zero_volatility_returns_regime_means_less_survivorship() {
        let mut params = RegimeParamsMap::DEFAULT;
        for r in Regime::ALL {
            params.get_mut(r).std_dev = 0.0;
        }
        let means: Vec<f64> = Regime::ALL.iter().map(|r| params.get(*r).mean - 0.015).collect();
        let model = RegimeSwitching::new(
            vec![params],
            DEFAULT_TRANSITIONS,
            HISTORICAL_SURVIVORSHIP_ADJUSTMENT,
            CholeskyFactor::identity(1),
        );
        let mut path = ReturnPath::new(1, 50);
        model.fill(&mut ChaCha20Rng::seed_from_u64(3), &mut path);
        assert!((path.get(0, 0) - means[0]).abs() < 1e-12, "first year is bull");
        for &v in path.asset(0) {
            assert!(means.iter().any(|m| (m - v).abs() < 1e-12), "{v} is not a regime mean");
        }
    }

    #[test]
    fn perfectly_correlated_assets_move_together() {
        let model = RegimeSwitching::new(
            vec![RegimeParamsMap::DEFAULT, RegimeParamsMap::DEFAULT],
            DEFAULT_TRANSITIONS,
            0.0,
            cholesky(&[vec![1.0, 1.0], vec![1.0, 1.0]]),
        );
        let mut path = ReturnPath::new(2, 30);
        model.fill(&mut ChaCha20Rng::seed_from_u64(11), &mut path);
        for y in 0..30 {
            assert!((path.get(0, y) - path.get(1, y)).abs() < 1e-12, "year {y}");
        }
    }
}
