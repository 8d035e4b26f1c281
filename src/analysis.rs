use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationReport;
use crate::config::{SimulationConfig, Strategy};
use crate::simulation::{BaselineRecords, LeverageRecords, RunRecords, YearGrid};
use crate::stats;

/// The five reported percentiles, ranks on the 0–100 scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
}

impl Percentiles {
    pub fn of(values: &[f64]) -> Self {
        Self::from_sorted(&stats::sorted(values))
    }

    pub fn from_sorted(sorted: &[f64]) -> Self {
        Percentiles {
            p10: stats::percentile(sorted, 10.0),
            p25: stats::percentile(sorted, 25.0),
            p50: stats::percentile(sorted, 50.0),
            p75: stats::percentile(sorted, 75.0),
            p90: stats::percentile(sorted, 90.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct YearPercentiles {
    /// 1-based simulated year.
    pub year: usize,
    pub percentiles: Percentiles,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    /// Fraction of iterations whose terminal value strictly exceeds the initial value.
    pub success_rate: f64,
    pub median_cagr: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeverageStats {
    pub loan_by_year: Vec<YearPercentiles>,
    pub cumulative_withdrawals: Vec<f64>,
    pub terminal_loan: Percentiles,
    /// Fraction of iterations with at least one forced sale.
    pub forced_liquidation_rate: f64,
    /// Fraction of iterations whose net worth hit zero in some year.
    pub failure_rate: f64,
    pub median_interest: f64,
    pub median_haircut: f64,
    pub median_borrowed_tax: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginCallStats {
    /// Iterations whose first margin call fell in each year (0-based index).
    pub first_call_histogram: Vec<usize>,
    pub probability_by_year: Vec<f64>,
    /// Probability of at least one call by the end of each year.
    pub cumulative_probability: Vec<f64>,
    pub probability: f64,
}

/// Median estates, leveraged (stepped-up basis) against liquidated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstateComparison {
    pub leveraged_estate: f64,
    pub baseline_estate: f64,
    pub advantage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineStats {
    pub success_rate: f64,
    pub depletion_probability: f64,
    pub terminal: Percentiles,
    pub by_year: Vec<YearPercentiles>,
    pub median_capital_gains_tax: f64,
    pub mean_capital_gains_tax: f64,
    pub median_dividend_tax: f64,
    pub mean_dividend_tax: f64,
}

/// Run metadata and counters that explain the numbers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub generator: String,
    pub seed: u64,
    pub block_size: Option<usize>,
    pub calibration: Vec<CalibrationReport>,
    /// The correlation matrix was not positive semi-definite and was clamped.
    pub correlation_clamped: bool,
    /// Iteration-years with a margin call.
    pub margin_calls: usize,
    /// Iteration-years with a forced sale.
    pub forced_liquidations: usize,
    pub failed_iterations: usize,
    /// Largest finite LTV seen by a margin test.
    pub max_ltv: f64,
    /// Iteration-years where the loan was outstanding against zero collateral.
    pub unbounded_ltv_years: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationOutput {
    pub iterations: usize,
    pub years: usize,
    pub initial_value: f64,
    pub terminal_values: Vec<f64>,
    pub terminal: Percentiles,
    pub by_year: Vec<YearPercentiles>,
    pub summary: SummaryStats,
    pub leverage: Option<LeverageStats>,
    pub margin_calls: Option<MarginCallStats>,
    pub estate: Option<EstateComparison>,
    pub baseline: Option<BaselineStats>,
    pub diagnostics: Diagnostics,
}

/// Implied annual growth from `initial` to `terminal`; −100% once wiped out.
pub fn cagr(terminal: f64, initial: f64, years: usize) -> f64 {
    if terminal <= 0.0 || initial <= 0.0 || years == 0 {
        return -1.0;
    }
    (terminal / initial).powf(1.0 / years as f64) - 1.0
}

fn median(values: &[f64]) -> f64 {
    stats::percentile(&stats::sorted(values), 50.0)
}

fn fraction(flags: &[bool]) -> f64 {
    if flags.is_empty() {
        return 0.0;
    }
    flags.iter().filter(|&&f| f).count() as f64 / flags.len() as f64
}

fn year_curve(grid: &YearGrid) -> Vec<YearPercentiles> {
    (0..grid.years())
        .map(|y| YearPercentiles { year: y + 1, percentiles: Percentiles::of(&grid.column(y)) })
        .collect()
}

pub fn summarize(terminal: &[f64], initial_value: f64, years: usize) -> SummaryStats {
    let sorted = stats::sorted(terminal);
    let median = stats::percentile(&sorted, 50.0);
    let success = terminal.iter().filter(|&&v| v > initial_value).count();
    SummaryStats {
        mean: stats::mean(terminal),
        median,
        std_dev: stats::std_dev(terminal),
        min: sorted.first().copied().unwrap_or(0.0),
        max: sorted.last().copied().unwrap_or(0.0),
        success_rate: if terminal.is_empty() { 0.0 } else { success as f64 / terminal.len() as f64 },
        median_cagr: cagr(median, initial_value, years),
    }
}

pub fn leverage_stats(rec: &LeverageRecords) -> LeverageStats {
    LeverageStats {
        loan_by_year: year_curve(&rec.loans),
        cumulative_withdrawals: rec.cumulative_withdrawals.clone(),
        terminal_loan: Percentiles::of(&rec.terminal_loan),
        forced_liquidation_rate: fraction(&rec.forced_liquidation),
        failure_rate: fraction(&rec.failed),
        median_interest: median(&rec.interest),
        median_haircut: median(&rec.haircut),
        median_borrowed_tax: median(&rec.borrowed_tax),
    }
}

pub fn margin_call_stats(rec: &LeverageRecords, years: usize) -> MarginCallStats {
    let n = rec.first_margin_call.len().max(1) as f64;
    let mut histogram = vec![0usize; years];
    for year in rec.first_margin_call.iter().flatten() {
        histogram[*year] += 1;
    }
    let mut running = 0;
    let cumulative_probability = histogram
        .iter()
        .map(|c| {
            running += c;
            running as f64 / n
        })
        .collect();
    MarginCallStats {
        probability_by_year: rec.margin_calls_by_year.iter().map(|&c| c as f64 / n).collect(),
        cumulative_probability,
        probability: histogram.iter().sum::<usize>() as f64 / n,
        first_call_histogram: histogram,
    }
}

pub fn baseline_stats(rec: &BaselineRecords, initial_value: f64) -> BaselineStats {
    let success = rec.terminal.iter().filter(|&&v| v > initial_value).count();
    let n = rec.terminal.len().max(1) as f64;
    BaselineStats {
        success_rate: success as f64 / n,
        depletion_probability: fraction(&rec.depleted),
        terminal: Percentiles::of(&rec.terminal),
        by_year: year_curve(&rec.values),
        median_capital_gains_tax: median(&rec.capital_gains_tax),
        mean_capital_gains_tax: stats::mean(&rec.capital_gains_tax),
        median_dividend_tax: median(&rec.dividend_tax),
        mean_dividend_tax: stats::mean(&rec.dividend_tax),
    }
}

/// Leveraged heirs inherit net worth at a stepped-up basis; the liquidated
/// estate still owes gains tax on its embedded appreciation.
pub fn estate_comparison(
    terminal: &[f64],
    baseline: &BaselineRecords,
    config: &SimulationConfig,
) -> EstateComparison {
    let leveraged_estate = median(terminal);
    let after_tax: Vec<f64> =
        baseline.terminal.iter().map(|&b| b - config.tax.embedded_gains_tax(b)).collect();
    let baseline_estate = median(&after_tax);
    EstateComparison { leveraged_estate, baseline_estate, advantage: leveraged_estate - baseline_estate }
}

pub fn aggregate(
    config: &SimulationConfig,
    records: &RunRecords,
    diagnostics: Diagnostics,
) -> SimulationOutput {
    let leverage = records.leverage.as_ref();
    let estate = match (&config.strategy, records.baseline.as_ref()) {
        (Strategy::Compare { .. }, Some(b)) => {
            Some(estate_comparison(&records.terminal, b, config))
        }
        _ => None,
    };

    SimulationOutput {
        iterations: config.iterations,
        years: config.years,
        initial_value: config.initial_value,
        terminal_values: records.terminal.clone(),
        terminal: Percentiles::of(&records.terminal),
        by_year: year_curve(&records.values),
        summary: summarize(&records.terminal, config.initial_value, config.years),
        leverage: leverage.map(leverage_stats),
        margin_calls: leverage.map(|l| margin_call_stats(l, config.years)),
        estate,
        baseline: records.baseline.as_ref().map(|b| baseline_stats(b, config.initial_value)),
        diagnostics,
    }
}

/// Spread of headline results across independently seeded runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSpread {
    pub runs: usize,
    pub median_terminal: Percentiles,
    pub success_rate: Percentiles,
    pub median_cagr: Percentiles,
}

pub fn run_spread(outputs: &[SimulationOutput]) -> Option<RunSpread> {
    if outputs.len() < 2 {
        return None;
    }
    let pick = |f: fn(&SummaryStats) -> f64| -> Percentiles {
        Percentiles::of(&outputs.iter().map(|o| f(&o.summary)).collect::<Vec<_>>())
    };
    Some(RunSpread {
        runs: outputs.len(),
        median_terminal: pick(|s| s.median),
        success_rate: pick(|s| s.success_rate),
        median_cagr: pick(|s| s.median_cagr),
    })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::config::TaxModel;

    fn grid(rows: &[&[f64]]) -> YearGrid {
        let years = rows.first().map_or(0, |r| r.len());
        let mut g = YearGrid::new(rows.len(), years);
        for (i, row) in rows.iter().enumerate() {
            for (y, v) in row.iter().enumerate() {
                g.set(i, y, *v);
            }
        }
        g
    }

    fn leverage_records(first: Vec<Option<usize>>, by_year: Vec<usize>) -> LeverageRecords {
        let n = first.len();
        let years = by_year.len();
        LeverageRecords {
            loans: YearGrid::new(n, years),
            margin_calls_by_year: by_year,
            first_margin_call: first,
            forced_liquidation: vec![true, false, false, false],
            failed: vec![false; n],
            interest: vec![1.0, 2.0, 3.0, 4.0],
            haircut: vec![0.0; n],
            borrowed_tax: vec![0.0; n],
            terminal_loan: vec![0.0; n],
            cumulative_withdrawals: vec![10.0, 20.0, 30.0],
        }
    }

    #[test]
    fn percentiles_known_values() {
        // h = 0.25 · 4 = 1 → exactly the second order statistic.
        let p = Percentiles::of(&[5.0, 1.0, 4.0, 2.0, 3.0]);
        assert!((p.p50 - 3.0).abs() < 1e-12);
        assert!((p.p25 - 2.0).abs() < 1e-12);
        assert!((p.p10 - 1.4).abs() < 1e-12);
        assert!((p.p90 - 4.6).abs() < 1e-12);
    }

    #[test]
    fn two_value_median_interpolates() {
        let p = Percentiles::of(&[0.5, 1.0]);
        assert!((p.p50 - 0.75).abs() < 1e-12);
    }

    #[test]
    fn cagr_known_values() {
        assert!((cagr(200.0, 100.0, 1) - 1.0).abs() < 1e-12);
        assert!((cagr(121.0, 100.0, 2) - 0.1).abs() < 1e-12);
        assert_eq!(cagr(0.0, 100.0, 10), -1.0);
        assert_eq!(cagr(-5.0, 100.0, 10), -1.0);
    }

    #[test]
    fn success_rate_is_strictly_greater() {
        let s = summarize(&[100.0, 101.0, 99.0, 150.0], 100.0, 5);
        assert!((s.success_rate - 0.5).abs() < 1e-12);
        assert_eq!(s.min, 99.0);
        assert_eq!(s.max, 150.0);
    }

    #[test]
    fn margin_call_probabilities() {
        let rec = leverage_records(vec![Some(0), None, Some(2), Some(0)], vec![2, 1, 2]);
        let m = margin_call_stats(&rec, 3);
        assert_eq!(m.first_call_histogram, vec![2, 0, 1]);
        assert_eq!(m.cumulative_probability, vec![0.5, 0.5, 0.75]);
        assert_eq!(m.probability_by_year, vec![0.5, 0.25, 0.5]);
        assert_eq!(m.probability, 0.75);

        let l = leverage_stats(&rec);
        assert_eq!(l.forced_liquidation_rate, 0.25);
        assert!((l.median_interest - 2.5).abs() < 1e-12);
    }

    #[test]
    fn estate_applies_embedded_gains_tax_to_baseline_only() {
        let mut config = SimulationConfig::canonical();
        let baseline = BaselineRecords {
            values: YearGrid::new(1, 1),
            terminal: vec![1_000_000.0],
            depleted: vec![false],
            capital_gains_tax: vec![0.0],
            dividend_tax: vec![0.0],
        };
        let e = estate_comparison(&[1_000_000.0], &baseline, &config);
        assert!((e.leveraged_estate - 1_000_000.0).abs() < 1e-9);
        assert!((e.baseline_estate - 1_000_000.0 * (1.0 - 0.6 * 0.238)).abs() < 1e-6);
        assert!(e.advantage > 0.0);

        config.tax = TaxModel::Untaxed;
        let e = estate_comparison(&[1_000_000.0], &baseline, &config);
        assert_eq!(e.advantage, 0.0);
    }

    #[test]
    fn year_curve_is_one_based() {
        let rows: [&[f64]; 2] = [&[1.0, 2.0], &[3.0, 4.0]];
        let g = grid(&rows);
        let curve = year_curve(&g);
        assert_eq!(curve.len(), 2);
        assert_eq!(curve[0].year, 1);
        assert!((curve[1].percentiles.p50 - 3.0).abs() < 1e-12);
    }

    #[test]
    fn run_spread_needs_two_runs() {
        assert!(run_spread(&[]).is_none());
    }

    proptest! {
        #[test]
        fn prop_percentiles_are_ordered(
            values in proptest::collection::vec(-1.0e7f64..1.0e7, 1..200),
        ) {
            let p = Percentiles::of(&values);
            prop_assert!(p.p10 <= p.p25);
            prop_assert!(p.p25 <= p.p50);
            prop_assert!(p.p50 <= p.p75);
            prop_assert!(p.p75 <= p.p90);
        }

        #[test]
        fn prop_year_curves_are_ordered(
            rows in proptest::collection::vec(proptest::collection::vec(-1.0e6f64..1.0e6, 5), 1..40),
        ) {
            let refs: Vec<&[f64]> = rows.iter().map(|r| r.as_slice()).collect();
            for yp in year_curve(&grid(&refs)) {
                let p = yp.percentiles;
                prop_assert!(p.p10 <= p.p25 && p.p25 <= p.p50 && p.p50 <= p.p75 && p.p75 <= p.p90);
            }
        }
    }
}
