//! Skewed Student-t return generator.
//!
//! Each asset's return is its historical mean plus a scaled, skewed
//! Student-t variate. Variates are drawn independently per asset and
//! then coupled through the correlation factor before scaling.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::returns::ReturnPath;
use crate::stats::{self, CholeskyFactor};
use crate::types::AssetClass;

pub const RETURN_FLOOR: f64 = -0.99;
pub const RETURN_CAP: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FatTailParams {
    pub degrees_of_freedom: u32,
    /// Coefficient of the quadratic skew term `skew · (t² − 1)`.
    pub skew: f64,
    pub volatility_scaling: f64,
    /// Additive annual adjustment; negative values haircut history.
    pub survivorship_bias: f64,
}

impl FatTailParams {
    pub fn for_class(class: AssetClass) -> Self {
        let (degrees_of_freedom, skew, volatility_scaling, survivorship_bias) = match class {
            AssetClass::UsEquity => (5, -0.10, 1.00, -0.005),
            AssetClass::InternationalEquity => (4, -0.15, 1.05, -0.010),
            AssetClass::EmergingMarkets => (3, -0.20, 1.15, -0.015),
            AssetClass::Bonds => (8, -0.05, 1.00, 0.0),
            AssetClass::RealEstate => (4, -0.15, 1.10, -0.010),
            AssetClass::Commodities => (4, 0.05, 1.10, -0.005),
            AssetClass::Cash => (30, 0.0, 1.00, 0.0),
        };
        FatTailParams { degrees_of_freedom, skew, volatility_scaling, survivorship_bias }
    }

    /// Raw Student-t draw with the quadratic skew applied. Not rescaled, so
    /// its variance is `df / (df − 2)` before skew.
    pub fn skewed_variate(&self, rng: &mut impl Rng) -> f64 {
        let t = stats::student_t(rng, self.degrees_of_freedom.max(1));
        t + self.skew * (t * t - 1.0)
    }

    /// Scale a coupled variate to a return and clamp to `[RETURN_FLOOR, RETURN_CAP]`.
    pub fn scale(&self, x: f64, mean: f64, std_dev: f64) -> f64 {
        let r = mean + std_dev * self.volatility_scaling * x + self.survivorship_bias;
        if r.is_nan() { 0.0 } else { r.clamp(RETURN_FLOOR, RETURN_CAP) }
    }
}

#[derive(Debug, Clone)]
struct FatTailAsset {
    params: FatTailParams,
    mean: f64,
    std_dev: f64,
}

#[derive(Debug, Clone)]
pub struct FatTail {
    assets: Vec<FatTailAsset>,
    factor: CholeskyFactor,
}

impl FatTail {
    /// `assets` pairs each class with its historical series.
    pub fn new(assets: &[(AssetClass, &[f64])], factor: CholeskyFactor) -> Self {
        let assets = assets
            .iter()
            .map(|(class, history)| FatTailAsset {
                params: FatTailParams::for_class(*class),
                mean: stats::mean(history),
                std_dev: stats::std_dev(history),
            })
            .collect();
        FatTail { assets, factor }
    }

    /// Per year: one skewed t per asset (df + 1 normals each), in asset order.
    pub fn fill(&self, rng: &mut impl Rng, path: &mut ReturnPath) {
        let n = self.assets.len();
        let mut independent = vec![0.0; n];
        let mut coupled = vec![0.0; n];
        for year in 0..path.years() {
            for (slot, asset) in independent.iter_mut().zip(&self.assets) {
                *slot = asset.params.skewed_variate(rng);
            }
            self.factor.correlate(&independent, &mut coupled);
            for (i, asset) in self.assets.iter().enumerate() {
                path.set(i, year, asset.params.scale(coupled[i], asset.mean, asset.std_dev));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;
    use crate::stats::cholesky;

    #[test]
    fn sample_moments_track_history() {
        let history: Vec<f64> = (0..40).map(|i| if i % 2 == 0 { 0.25 } else { -0.05 }).collect();
        let mut params = FatTailParams::for_class(AssetClass::Bonds);
        params.skew = 0.0;
        params.survivorship_bias = 0.0;
        let model = FatTail {
            assets: vec![FatTailAsset {
                params,
                mean: stats::mean(&history),
                std_dev: stats::std_dev(&history),
            }],
            factor: CholeskyFactor::identity(1),
        };
        let mut path = ReturnPath::new(1, 20_000);
        model.fill(&mut ChaCha20Rng::seed_from_u64(42), &mut path);
        let m = stats::mean(path.asset(0));
        let s = stats::std_dev(path.asset(0));
        assert!((m - 0.10).abs() < 0.01, "mean {m}");
        // t with 8 degrees of freedom has variance 8/6.
        let target = stats::std_dev(&history) * (8.0f64 / 6.0).sqrt();
        assert!((s - target).abs() / target < 0.1, "std dev {s} vs {target}");
    }

    #[test]
    fn variate_is_raw_student_t_then_skewed() {
        let params = FatTailParams::for_class(AssetClass::EmergingMarkets);
        let mut rng = ChaCha20Rng::seed_from_u64(17);
        let mut replay = ChaCha20Rng::seed_from_u64(17);
        for _ in 0..100 {
            let x = params.skewed_variate(&mut rng);
            let t = stats::student_t(&mut replay, 3);
            assert_eq!(x, t + params.skew * (t * t - 1.0));
        }
    }

    #[test]
    fn perfectly_correlated_assets_share_variates() {
        let a = vec![0.1, -0.2, 0.3, 0.05, 0.0];
        let b: Vec<f64> = a.iter().map(|r| r * 0.5).collect();
        let model = FatTail::new(
            &[(AssetClass::UsEquity, a.as_slice()), (AssetClass::UsEquity, b.as_slice())],
            cholesky(&[vec![1.0, 1.0], vec![1.0, 1.0]]),
        );
        let (ma, sa) = (stats::mean(&a), stats::std_dev(&a));
        let (mb, sb) = (stats::mean(&b), stats::std_dev(&b));
        let mut path = ReturnPath::new(2, 40);
        model.fill(&mut ChaCha20Rng::seed_from_u64(9), &mut path);
        let bias = FatTailParams::for_class(AssetClass::UsEquity).survivorship_bias;
        for y in 0..40 {
            let ra = path.get(0, y);
            let rb = path.get(1, y);
            if ra <= RETURN_FLOOR || ra >= RETURN_CAP || rb <= RETURN_FLOOR || rb >= RETURN_CAP {
                continue;
            }
            // Same skewed variate behind both returns.
            let za = (ra - ma - bias) / sa;
            let zb = (rb - mb - bias) / sb;
            assert!((za - zb).abs() < 1e-9, "year {y}: {za} vs {zb}");
        }
    }

    proptest! {
        #[test]
        fn prop_returns_always_clamped(
            history in proptest::collection::vec(-1.0e6f64..1.0e6, 2..30),
            seed in any::<u64>(),
            class_idx in 0usize..7,
        ) {
            let classes = [
                AssetClass::UsEquity,
                AssetClass::InternationalEquity,
                AssetClass::EmergingMarkets,
                AssetClass::Bonds,
                AssetClass::RealEstate,
                AssetClass::Commodities,
                AssetClass::Cash,
            ];
            let model = FatTail::new(
                &[(classes[class_idx], history.as_slice())],
                CholeskyFactor::identity(1),
            );
            let mut path = ReturnPath::new(1, 50);
            model.fill(&mut ChaCha20Rng::seed_from_u64(seed), &mut path);
            for &r in path.asset(0) {
                prop_assert!((RETURN_FLOOR..=RETURN_CAP).contains(&r), "r = {}", r);
            }
        }
    }
}
