//! Historical resampling generators.
//!
//! Both models draw one index (or block start) per step and apply it to
//! every asset, so the cross-asset correlation baked into history survives.

use rand::Rng;

use crate::returns::ReturnPath;
use crate::stats;

/// Independent draws of whole historical years.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    histories: Vec<Vec<f64>>,
}

impl Bootstrap {
    /// `histories` must be non-empty and of equal length (validated upstream).
    pub fn new(histories: Vec<Vec<f64>>) -> Self {
        Bootstrap { histories }
    }

    /// One uniform draw per year.
    pub fn fill(&self, rng: &mut impl Rng, path: &mut ReturnPath) {
        let n = self.histories[0].len();
        for year in 0..path.years() {
            let idx = rng.random_range(0..n);
            for (asset, history) in self.histories.iter().enumerate() {
                path.set(asset, year, history[idx]);
            }
        }
    }
}

/// Contiguous-block resampling that keeps serial correlation.
#[derive(Debug, Clone)]
pub struct BlockBootstrap {
    histories: Vec<Vec<f64>>,
    block_size: usize,
}

impl BlockBootstrap {
    /// Block size is clamped to `[1, history_len]`.
    pub fn new(histories: Vec<Vec<f64>>, block_size: usize) -> Self {
        let n = histories[0].len();
        BlockBootstrap { histories, block_size: block_size.clamp(1, n.max(1)) }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Copies whole blocks until the path is full; the last block is truncated.
    /// One uniform draw per block.
    pub fn fill(&self, rng: &mut impl Rng, path: &mut ReturnPath) {
        let n = self.histories[0].len();
        let target = path.years();
        let mut filled = 0;
        while filled < target {
            let start = rng.random_range(0..=n - self.block_size);
            let take = self.block_size.min(target - filled);
            for (asset, history) in self.histories.iter().enumerate() {
                path.asset_mut(asset)[filled..filled + take]
                    .copy_from_slice(&history[start..start + take]);
            }
            filled += take;
        }
    }
}

/// Autocorrelation-driven block length.
///
/// With ρ₁ the lag-1 autocorrelation and `g = 2|ρ₁| / (1 − ρ₁²)`, returns
/// `ceil((1.5n)^(1/3) · max(g, 0.01)^(1/3))` clamped to `[3, n/4]`. Series
/// shorter than 12 observations get the floor of 3.
pub fn optimal_block_length(series: &[f64]) -> usize {
    const MIN_BLOCK: usize = 3;
    let n = series.len();
    let upper = (n / 4).max(MIN_BLOCK);

    let rho = stats::lag1_autocorrelation(series).clamp(-0.99, 0.99);
    let g = 2.0 * rho.abs() / (1.0 - rho * rho);
    let raw = ((1.5 * n as f64).cbrt() * g.max(0.01).cbrt()).ceil();
    if !raw.is_finite() {
        return MIN_BLOCK;
    }
    (raw as usize).clamp(MIN_BLOCK, upper)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    fn rng() -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(42)
    }

    #[test]
    fn bootstrap_values_come_from_history_in_seeded_order() {
        let history = vec![0.10, -0.05, 0.20, 0.00];
        let model = Bootstrap::new(vec![history.clone()]);
        let mut a = ReturnPath::new(1, 4);
        let mut b = ReturnPath::new(1, 4);
        model.fill(&mut rng(), &mut a);
        model.fill(&mut rng(), &mut b);
        for &v in a.asset(0) {
            assert!(history.contains(&v), "{v} not in history");
        }
        assert_eq!(a, b, "same seed must draw the same years");

        let mut c = ReturnPath::new(1, 4);
        let mut other = ChaCha20Rng::seed_from_u64(7);
        model.fill(&mut other, &mut c);
        for &v in c.asset(0) {
            assert!(history.contains(&v));
        }
    }

    #[test]
    fn bootstrap_uses_same_year_for_every_asset() {
        let equity: Vec<f64> = (0..10).map(|i| i as f64 / 100.0).collect();
        let bonds: Vec<f64> = (0..10).map(|i| i as f64 / 1000.0).collect();
        let model = Bootstrap::new(vec![equity, bonds]);
        let mut path = ReturnPath::new(2, 25);
        model.fill(&mut rng(), &mut path);
        for y in 0..25 {
            assert!((path.get(0, y) - path.get(1, y) * 10.0).abs() < 1e-12);
        }
    }

    #[test]
    fn block_bootstrap_copies_contiguous_runs() {
        let history: Vec<f64> = (0..40).map(|i| i as f64).collect();
        let model = BlockBootstrap::new(vec![history], 5);
        let mut path = ReturnPath::new(1, 23);
        model.fill(&mut rng(), &mut path);
        let out = path.asset(0);
        for block in out.chunks(5) {
            for w in block.windows(2) {
                assert_eq!(w[1], w[0] + 1.0, "block {block:?} is not contiguous");
            }
        }
    }

    #[test]
    fn block_larger_than_history_is_clamped() {
        let model = BlockBootstrap::new(vec![vec![0.1, 0.2]], 10);
        assert_eq!(model.block_size(), 2);
        let mut path = ReturnPath::new(1, 7);
        model.fill(&mut rng(), &mut path);
        assert_eq!(path.asset(0), &[0.1, 0.2, 0.1, 0.2, 0.1, 0.2, 0.1]);
    }

    #[test]
    fn flat_history_gets_minimum_block() {
        assert_eq!(optimal_block_length(&[0.07; 40]), 3);
        assert_eq!(optimal_block_length(&[0.1; 200]), 3);
    }

    #[test]
    fn optimal_block_length_short_series_floor() {
        assert_eq!(optimal_block_length(&[0.1, 0.2]), 3);
        assert_eq!(optimal_block_length(&[]), 3);
    }

    proptest! {
        #[test]
        fn prop_block_bootstrap_fills_exact_length(
            history in proptest::collection::vec(-0.5f64..0.5, 1..60),
            block in 1usize..40,
            target in 1usize..120,
            seed in any::<u64>(),
        ) {
            let model = BlockBootstrap::new(vec![history.clone()], block);
            let mut path = ReturnPath::new(1, target);
            // Poison the buffer so unfilled slots are visible.
            path.asset_mut(0).fill(f64::NAN);
            model.fill(&mut ChaCha20Rng::seed_from_u64(seed), &mut path);
            prop_assert_eq!(path.asset(0).len(), target);
            for v in path.asset(0) {
                prop_assert!(history.contains(v));
            }
        }

        #[test]
        fn prop_optimal_block_length_in_bounds(
            series in proptest::collection::vec(-0.6f64..0.6, 12..400),
        ) {
            let b = optimal_block_length(&series);
            prop_assert!(b >= 3);
            prop_assert!(b <= series.len() / 4, "b = {} for n = {}", b, series.len());
        }

        #[test]
        fn prop_optimal_block_length_short_series_at_least_three(
            series in proptest::collection::vec(-0.6f64..0.6, 0..12),
        ) {
            prop_assert!(optimal_block_length(&series) >= 3);
        }
    }
}
