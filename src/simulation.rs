use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tracing::{debug, info};

use crate::analysis::{self, Diagnostics, SimulationOutput};
use crate::baseline;
use crate::calibration::Severity;
use crate::config::{PortfolioConfig, SimulationConfig};
use crate::control::{Progress, RunControl};
use crate::error::SimError;
use crate::events::{Event, EventLog, SimEvent};
use crate::leverage::{self, LeverageState};
use crate::returns::{ReturnGenerator, ReturnPath};

/// Iterations between cancellation checks and progress reports.
pub const BATCH_SIZE: usize = 1000;

/// Flattened `(iteration, year)` buffer, allocated once per run.
/// Each iteration writes only its own row.
#[derive(Debug, Clone, PartialEq)]
pub struct YearGrid {
    years: usize,
    data: Vec<f64>,
}

impl YearGrid {
    pub fn new(iterations: usize, years: usize) -> Self {
        YearGrid { years, data: vec![0.0; iterations * years] }
    }

    pub fn iterations(&self) -> usize {
        if self.years == 0 { 0 } else { self.data.len() / self.years }
    }

    pub fn years(&self) -> usize {
        self.years
    }

    pub fn get(&self, iteration: usize, year: usize) -> f64 {
        self.data[iteration * self.years + year]
    }

    pub fn set(&mut self, iteration: usize, year: usize, value: f64) {
        self.data[iteration * self.years + year] = value;
    }

    pub fn row(&self, iteration: usize) -> &[f64] {
        &self.data[iteration * self.years..(iteration + 1) * self.years]
    }

    /// Every iteration's value for one year.
    pub fn column(&self, year: usize) -> Vec<f64> {
        self.data.iter().skip(year).step_by(self.years.max(1)).copied().collect()
    }
}

/// Per-iteration leverage outcomes.
#[derive(Debug, Clone)]
pub struct LeverageRecords {
    pub loans: YearGrid,
    /// Iterations with a margin call in each year.
    pub margin_calls_by_year: Vec<usize>,
    pub first_margin_call: Vec<Option<usize>>,
    pub forced_liquidation: Vec<bool>,
    pub failed: Vec<bool>,
    pub interest: Vec<f64>,
    pub haircut: Vec<f64>,
    pub borrowed_tax: Vec<f64>,
    pub terminal_loan: Vec<f64>,
    /// Running withdrawal total per year (identical across iterations).
    pub cumulative_withdrawals: Vec<f64>,
}

impl LeverageRecords {
    fn new(iterations: usize, years: usize, cumulative_withdrawals: Vec<f64>) -> Self {
        LeverageRecords {
            loans: YearGrid::new(iterations, years),
            margin_calls_by_year: vec![0; years],
            first_margin_call: vec![None; iterations],
            forced_liquidation: vec![false; iterations],
            failed: vec![false; iterations],
            interest: vec![0.0; iterations],
            haircut: vec![0.0; iterations],
            borrowed_tax: vec![0.0; iterations],
            terminal_loan: vec![0.0; iterations],
            cumulative_withdrawals,
        }
    }
}

/// Per-iteration baseline outcomes.
#[derive(Debug, Clone)]
pub struct BaselineRecords {
    pub values: YearGrid,
    pub terminal: Vec<f64>,
    pub depleted: Vec<bool>,
    pub capital_gains_tax: Vec<f64>,
    pub dividend_tax: Vec<f64>,
}

impl BaselineRecords {
    fn new(iterations: usize, years: usize) -> Self {
        BaselineRecords {
            values: YearGrid::new(iterations, years),
            terminal: vec![0.0; iterations],
            depleted: vec![false; iterations],
            capital_gains_tax: vec![0.0; iterations],
            dividend_tax: vec![0.0; iterations],
        }
    }
}

/// Everything recorded during a run, ready for aggregation.
#[derive(Debug, Clone)]
pub struct RunRecords {
    /// Terminal value per iteration: net worth when leveraged, else gross.
    pub terminal: Vec<f64>,
    pub values: YearGrid,
    pub leverage: Option<LeverageRecords>,
    pub baseline: Option<BaselineRecords>,
}

pub struct Simulation {
    config: SimulationConfig,
    weights: Vec<f64>,
    rng: ChaCha20Rng,
    generator: ReturnGenerator,
    /// Checkpoint events in the order they fired.
    pub log: EventLog,
    completed: usize,
    batches: usize,
    path: ReturnPath,
    portfolio_returns: Vec<f64>,
    /// `(1+i)^(year+1)`, or all ones for nominal reporting.
    deflators: Vec<f64>,
    /// Gross portfolio value at the horizon, before the net-worth pass.
    terminal_gross: Vec<f64>,
    records: RunRecords,
    diagnostics: Diagnostics,
    /// Set once a cancellation is observed; the run can never complete after.
    cancelled_at: Option<usize>,
    output: Option<SimulationOutput>,
}

impl Simulation {
    /// Validate inputs, build the generator and seed the stream.
    pub fn from_config(
        config: SimulationConfig,
        portfolio: PortfolioConfig,
    ) -> Result<Self, SimError> {
        config.validate()?;
        portfolio.validate()?;
        let setup = ReturnGenerator::build(&config, &portfolio)?;

        let seed = config.seed.unwrap_or_else(|| rand::rng().random());
        let (n, years) = (config.iterations, config.years);

        let mut log = EventLog::new();
        log.push(SimEvent {
            completed: 0,
            event: Event::RunStarted { iterations: n, years, model: config.model, seed },
        });
        for report in &setup.calibration {
            if report.fell_back {
                log.push(SimEvent {
                    completed: 0,
                    event: Event::CalibrationFallback {
                        asset: report.asset.clone(),
                        issues: report.errors().copied().collect(),
                    },
                });
            }
            for issue in report.issues.iter().filter(|i| i.severity() == Severity::Warning) {
                log.push(SimEvent {
                    completed: 0,
                    event: Event::CalibrationWarning { asset: report.asset.clone(), issue: *issue },
                });
            }
        }

        let deflators = (0..years)
            .map(|y| config.inflation.map_or(1.0, |i| (1.0 + i).powi(y as i32 + 1)))
            .collect();
        let leverage = config.strategy.leverage().map(|l| {
            LeverageRecords::new(n, years, l.withdrawal.cumulative(years))
        });
        let baseline = config.strategy.baseline().map(|_| BaselineRecords::new(n, years));

        info!(
            iterations = n,
            years,
            model = setup.generator.name(),
            seed,
            assets = portfolio.assets.len(),
            "simulation starting"
        );

        let diagnostics = Diagnostics {
            generator: setup.generator.name().to_string(),
            seed,
            block_size: setup.block_size,
            calibration: setup.calibration,
            correlation_clamped: setup.correlation_clamped,
            ..Diagnostics::default()
        };

        Ok(Simulation {
            weights: portfolio.weights(),
            rng: ChaCha20Rng::seed_from_u64(seed),
            generator: setup.generator,
            log,
            completed: 0,
            batches: 0,
            path: ReturnPath::new(portfolio.assets.len(), years),
            portfolio_returns: vec![0.0; years],
            deflators,
            terminal_gross: vec![0.0; n],
            records: RunRecords {
                terminal: vec![0.0; n],
                values: YearGrid::new(n, years),
                leverage,
                baseline,
            },
            diagnostics,
            cancelled_at: None,
            output: None,
            config,
        })
    }

    pub fn progress(&self) -> Progress {
        Progress { completed: self.completed, total: self.config.iterations }
    }

    /// Run one batch. Returns `None` once every iteration has run, or after
    /// the run was cancelled.
    pub fn step(&mut self) -> Option<Progress> {
        let total = self.config.iterations;
        if self.completed >= total || self.cancelled_at.is_some() {
            return None;
        }
        let end = (self.completed + BATCH_SIZE).min(total);
        for iteration in self.completed..end {
            self.run_iteration(iteration);
        }
        self.completed = end;
        self.batches += 1;
        self.log.push(SimEvent {
            completed: end,
            event: Event::BatchCompleted {
                batch: self.batches,
                total: total.div_ceil(BATCH_SIZE),
            },
        });
        debug!(batch = self.batches, completed = end, total, "batch complete");
        Some(self.progress())
    }

    /// Drive the run to completion, checking for cancellation before every
    /// batch and reporting progress after each.
    pub fn run(&mut self, control: &mut impl RunControl) -> Result<SimulationOutput, SimError> {
        let total = self.config.iterations;
        while self.completed < total {
            if let Some(completed) = self.cancelled_at {
                return Err(SimError::Cancelled { completed, total });
            }
            if control.is_cancelled() {
                self.cancel();
                return Err(SimError::Cancelled { completed: self.completed, total });
            }
            if let Some(progress) = self.step() {
                control.on_progress(progress);
                std::thread::yield_now();
            }
        }
        self.finish()
    }

    /// Abandon the run. Every later `run`, `step` or `finish` yields nothing.
    pub fn cancel(&mut self) {
        if self.cancelled_at.is_some() || self.output.is_some() {
            return;
        }
        let total = self.config.iterations;
        self.cancelled_at = Some(self.completed);
        self.log.push(SimEvent { completed: self.completed, event: Event::RunCancelled { total } });
        info!(completed = self.completed, total, "simulation cancelled");
    }

    /// Net-worth pass and aggregation. Only valid once every batch has run.
    /// Later calls return the same output without logging again.
    pub fn finish(&mut self) -> Result<SimulationOutput, SimError> {
        let total = self.config.iterations;
        if let Some(completed) = self.cancelled_at {
            return Err(SimError::Cancelled { completed, total });
        }
        if let Some(output) = &self.output {
            return Ok(output.clone());
        }
        if self.completed < total {
            return Err(SimError::Incomplete { completed: self.completed, total });
        }

        let final_deflator = self.deflators.last().copied().unwrap_or(1.0);
        for (i, gross) in self.terminal_gross.iter().enumerate() {
            let loan = self.records.leverage.as_ref().map_or(0.0, |l| l.terminal_loan[i]);
            self.records.terminal[i] = (gross - loan) / final_deflator;
        }

        let d = &self.diagnostics;
        self.log.push(SimEvent {
            completed: total,
            event: Event::DiagnosticSummary {
                margin_calls: d.margin_calls,
                forced_liquidations: d.forced_liquidations,
                failed_iterations: d.failed_iterations,
                correlation_clamped: d.correlation_clamped,
            },
        });
        info!(
            margin_calls = d.margin_calls,
            forced_liquidations = d.forced_liquidations,
            failed_iterations = d.failed_iterations,
            "simulation complete"
        );

        let output = analysis::aggregate(&self.config, &self.records, self.diagnostics.clone());
        self.log.push(SimEvent { completed: total, event: Event::RunCompleted });
        self.output = Some(output.clone());
        Ok(output)
    }

    fn run_iteration(&mut self, iteration: usize) {
        let years = self.config.years;
        let initial = self.config.initial_value;
        let tax = self.config.tax;

        self.generator.fill(&mut self.rng, &mut self.path);
        for year in 0..years {
            self.portfolio_returns[year] = self.path.portfolio_return(year, &self.weights);
        }

        if let (Some(cfg), Some(rec)) =
            (self.config.strategy.leverage(), self.records.leverage.as_mut())
        {
            let mut state = LeverageState::open(initial, cfg.initial_loan);
            let mut failed = state.failed;
            for year in 0..years {
                state = leverage::step(&state, cfg, &tax, self.portfolio_returns[year], year);
                if state.margin_call {
                    rec.margin_calls_by_year[year] += 1;
                    rec.first_margin_call[iteration].get_or_insert(year);
                    self.diagnostics.margin_calls += 1;
                }
                if state.forced_liquidation {
                    rec.forced_liquidation[iteration] = true;
                    self.diagnostics.forced_liquidations += 1;
                }
                if state.tested_ltv.is_finite() {
                    self.diagnostics.max_ltv = self.diagnostics.max_ltv.max(state.tested_ltv);
                } else {
                    self.diagnostics.unbounded_ltv_years += 1;
                }
                failed |= state.failed;

                let deflator = self.deflators[year];
                rec.loans.set(iteration, year, state.loan / deflator);
                self.records.values.set(iteration, year, state.net_worth() / deflator);
            }
            rec.failed[iteration] = failed;
            rec.interest[iteration] = state.cumulative_interest;
            rec.haircut[iteration] = state.cumulative_haircut;
            rec.borrowed_tax[iteration] = state.cumulative_borrowed_tax;
            rec.terminal_loan[iteration] = state.loan;
            self.terminal_gross[iteration] = state.portfolio;
            if failed {
                self.diagnostics.failed_iterations += 1;
            }
        } else {
            let mut value = initial;
            for year in 0..years {
                value = (value * (1.0 + self.portfolio_returns[year])).max(0.0);
                self.records.values.set(iteration, year, value / self.deflators[year]);
            }
            self.terminal_gross[iteration] = value;
        }

        if let (Some(cfg), Some(rec)) =
            (self.config.strategy.baseline(), self.records.baseline.as_mut())
        {
            let result = baseline::simulate(initial, cfg, &tax, &self.portfolio_returns);
            for (year, v) in result.yearly_values.iter().enumerate() {
                rec.values.set(iteration, year, v / self.deflators[year]);
            }
            rec.terminal[iteration] = result.terminal_value / self.deflators[years - 1];
            rec.depleted[iteration] = result.depleted;
            rec.capital_gains_tax[iteration] = result.capital_gains_tax;
            rec.dividend_tax[iteration] = result.dividend_tax;
        }
    }
}

/// Seed of the `run`-th run in a multi-run sweep; wraps at `u64::MAX`.
pub fn seed_for_run(start_seed: u64, run: u64) -> u64 {
    start_seed.wrapping_add(run)
}

/// Validate, build and run to completion in one call.
pub fn run_simulation(
    config: SimulationConfig,
    portfolio: PortfolioConfig,
    control: &mut impl RunControl,
) -> Result<SimulationOutput, SimError> {
    Simulation::from_config(config, portfolio)?.run(control)
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;
    use crate::config::{BaselineConfig, ReturnModel, Strategy, TaxModel, WithdrawalSchedule};
    use crate::control::CancelToken;
    use crate::types::AssetClass;

    fn small(model: ReturnModel, iterations: usize, seed: u64) -> SimulationConfig {
        SimulationConfig {
            iterations,
            years: 20,
            model,
            seed: Some(seed),
            ..SimulationConfig::canonical()
        }
    }

    fn hold_single(history: Vec<f64>, years: usize) -> (SimulationConfig, PortfolioConfig) {
        let config = SimulationConfig {
            iterations: 1,
            years,
            initial_value: 100.0,
            model: ReturnModel::Bootstrap,
            calibration: None,
            seed: Some(42),
            strategy: Strategy::Hold,
            tax: TaxModel::Untaxed,
            ..SimulationConfig::canonical()
        };
        (config, PortfolioConfig::single_asset("Fund", AssetClass::UsEquity, history))
    }

    /// Cancels once progress reaches a threshold percentage.
    struct CancelAt {
        percent: f64,
        cancelled: bool,
        reports: Vec<f64>,
    }

    impl RunControl for CancelAt {
        fn is_cancelled(&self) -> bool {
            self.cancelled
        }

        fn on_progress(&mut self, progress: Progress) {
            self.reports.push(progress.percent());
            if progress.percent() >= self.percent {
                self.cancelled = true;
            }
        }
    }

    #[test]
    fn single_asset_bootstrap_path_follows_seed() {
        let history = vec![0.10, -0.05, 0.20, 0.00];
        let (config, portfolio) = hold_single(history.clone(), 4);
        let out = run_simulation(config, portfolio, &mut ()).unwrap();

        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let mut expected = 100.0;
        for (year, yp) in out.by_year.iter().enumerate() {
            let r = history[rng.random_range(0..history.len())];
            expected *= 1.0 + r;
            assert_eq!(yp.year, year + 1);
            assert!((yp.percentiles.p50 - expected).abs() < 1e-9, "year {year}");
            assert_eq!(yp.percentiles.p10, yp.percentiles.p90, "one iteration");
        }
        assert_eq!(out.terminal_values.len(), 1);
        assert!((out.terminal_values[0] - expected).abs() < 1e-9);
    }

    #[test]
    fn same_seed_gives_byte_identical_output() {
        let a = run_simulation(
            small(ReturnModel::RegimeSwitching, 300, 7),
            PortfolioConfig::canonical(),
            &mut (),
        )
        .unwrap();
        let b = run_simulation(
            small(ReturnModel::RegimeSwitching, 300, 7),
            PortfolioConfig::canonical(),
            &mut (),
        )
        .unwrap();
        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());

        let c = run_simulation(
            small(ReturnModel::RegimeSwitching, 300, 8),
            PortfolioConfig::canonical(),
            &mut (),
        )
        .unwrap();
        assert_ne!(a.terminal_values, c.terminal_values);
    }

    #[test]
    fn cancellation_after_first_batches_returns_no_output() {
        let config = SimulationConfig {
            iterations: 10_000,
            years: 10,
            model: ReturnModel::Bootstrap,
            ..SimulationConfig::canonical()
        };
        let mut control = CancelAt { percent: 30.0, cancelled: false, reports: Vec::new() };
        let mut sim = Simulation::from_config(config, PortfolioConfig::canonical()).unwrap();
        let result = sim.run(&mut control);
        assert_eq!(result, Err(SimError::Cancelled { completed: 3000, total: 10_000 }));
        assert_eq!(control.reports, vec![10.0, 20.0, 30.0]);
        assert!(matches!(
            sim.log.last().map(|e| &e.event),
            Some(Event::RunCancelled { total: 10_000 })
        ));
        assert!(!sim.log.iter().any(|e| e.event == Event::RunCompleted));
    }

    #[test]
    fn cancelled_run_cannot_be_resumed() {
        let mut sim = Simulation::from_config(
            small(ReturnModel::Bootstrap, 3000, 5),
            PortfolioConfig::canonical(),
        )
        .unwrap();
        let mut control = CancelAt { percent: 30.0, cancelled: false, reports: Vec::new() };
        let cancelled = SimError::Cancelled { completed: 1000, total: 3000 };
        assert_eq!(sim.run(&mut control), Err(cancelled.clone()));

        assert_eq!(sim.run(&mut ()), Err(cancelled.clone()));
        assert_eq!(sim.step(), None);
        assert_eq!(sim.finish(), Err(cancelled));
        assert_eq!(sim.progress().completed, 1000);
        let cancels =
            sim.log.iter().filter(|e| matches!(e.event, Event::RunCancelled { .. })).count();
        assert_eq!(cancels, 1);
    }

    #[test]
    fn finish_is_idempotent() {
        let mut sim = Simulation::from_config(
            small(ReturnModel::Bootstrap, 20, 8),
            PortfolioConfig::canonical(),
        )
        .unwrap();
        let first = sim.run(&mut ()).unwrap();
        let logged = sim.log.len();
        assert_eq!(sim.finish().unwrap(), first);
        assert_eq!(sim.run(&mut ()).unwrap(), first);
        assert_eq!(sim.log.len(), logged);
        let completions = sim.log.iter().filter(|e| e.event == Event::RunCompleted).count();
        assert_eq!(completions, 1);

        sim.cancel();
        assert_eq!(sim.finish().unwrap(), first, "cancelling a finished run is a no-op");
    }

    #[test]
    fn pre_cancelled_token_stops_before_first_batch() {
        let token = CancelToken::new();
        token.cancel();
        let mut control = token.clone();
        let result = run_simulation(
            small(ReturnModel::Bootstrap, 50, 1),
            PortfolioConfig::canonical(),
            &mut control,
        );
        let err = result.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err, SimError::Cancelled { completed: 0, total: 50 });
    }

    #[test]
    fn step_exposes_batch_granularity() {
        let mut sim = Simulation::from_config(
            small(ReturnModel::Bootstrap, 2500, 3),
            PortfolioConfig::canonical(),
        )
        .unwrap();
        assert!(matches!(sim.finish(), Err(SimError::Incomplete { completed: 0, total: 2500 })));
        let steps: Vec<usize> = std::iter::from_fn(|| sim.step()).map(|p| p.completed).collect();
        assert_eq!(steps, vec![1000, 2000, 2500]);
        let out = sim.finish().unwrap();
        assert_eq!(out.terminal_values.len(), 2500);
        let batches = sim
            .log
            .iter()
            .filter(|e| matches!(e.event, Event::BatchCompleted { total: 3, .. }))
            .count();
        assert_eq!(batches, 3);
    }

    #[test]
    fn invalid_portfolio_is_rejected_before_running() {
        let mut portfolio = PortfolioConfig::canonical();
        portfolio.assets[0].weight = 0.9;
        let err = Simulation::from_config(small(ReturnModel::Bootstrap, 10, 1), portfolio)
            .err()
            .unwrap();
        assert!(matches!(err, SimError::WeightSum { .. }));
    }

    #[test]
    fn inflation_deflates_recorded_values() {
        let (mut config, portfolio) = hold_single(vec![0.05; 12], 10);
        config.inflation = Some(0.05);
        let out = run_simulation(config, portfolio, &mut ()).unwrap();
        for yp in &out.by_year {
            assert!((yp.percentiles.p50 - 100.0).abs() < 1e-9, "real value is flat");
        }
        assert!((out.summary.median - 100.0).abs() < 1e-9);
    }

    #[test]
    fn compare_mode_reports_every_section() {
        let out = run_simulation(
            small(ReturnModel::FatTail, 400, 11),
            PortfolioConfig::canonical(),
            &mut (),
        )
        .unwrap();
        let leverage = out.leverage.as_ref().unwrap();
        assert_eq!(leverage.loan_by_year.len(), 20);
        assert_eq!(leverage.cumulative_withdrawals.len(), 20);
        assert!((leverage.cumulative_withdrawals[0] - 200_000.0).abs() < 1e-6);
        assert!(out.margin_calls.is_some());
        assert!(out.estate.is_some());
        let baseline = out.baseline.as_ref().unwrap();
        assert_eq!(baseline.by_year.len(), 20);
        assert_eq!(out.diagnostics.generator, "fat-tail");

        // Net-worth pass: terminal values equal the last recorded net worth.
        let last = out.by_year.last().unwrap().percentiles;
        assert!((out.terminal.p50 - last.p50).abs() < 1e-6);
    }

    #[test]
    fn sell_mode_tracks_hold_value_and_reports_baseline() {
        let withdrawal =
            WithdrawalSchedule { annual_amount: 100_000.0, annual_raise: 0.0, start_year: 0 };
        let config = SimulationConfig {
            strategy: Strategy::Sell(BaselineConfig { withdrawal }),
            ..small(ReturnModel::BlockBootstrap, 200, 5)
        };
        let out = run_simulation(config, PortfolioConfig::canonical(), &mut ()).unwrap();
        assert!(out.leverage.is_none());
        assert!(out.margin_calls.is_none());
        assert!(out.estate.is_none());
        let baseline = out.baseline.unwrap();
        assert!(baseline.terminal.p50 < out.terminal.p50, "withdrawals reduce the balance");
        assert!(out.diagnostics.block_size.is_some());
    }

    #[test]
    fn event_log_brackets_the_run() {
        let mut sim = Simulation::from_config(
            small(ReturnModel::RegimeSwitching, 10, 2),
            PortfolioConfig::canonical(),
        )
        .unwrap();
        sim.run(&mut ()).unwrap();
        assert!(matches!(sim.log[0].event, Event::RunStarted { seed: 2, iterations: 10, .. }));
        assert_eq!(sim.log.last().unwrap().event, Event::RunCompleted);
        assert!(sim.log.iter().any(|e| matches!(e.event, Event::DiagnosticSummary { .. })));
    }

    #[test]
    fn sweep_seeds_wrap_instead_of_overflowing() {
        assert_eq!(seed_for_run(42, 3), 45);
        assert_eq!(seed_for_run(u64::MAX, 0), u64::MAX);
        assert_eq!(seed_for_run(u64::MAX, 1), 0);
        assert_eq!(seed_for_run(u64::MAX - 1, 5), 3);
    }

    #[test]
    fn year_grid_columns_gather_one_year() {
        let mut g = YearGrid::new(3, 2);
        for it in 0..3 {
            g.set(it, 0, it as f64);
            g.set(it, 1, 10.0 + it as f64);
        }
        assert_eq!(g.iterations(), 3);
        assert_eq!(g.column(1), vec![10.0, 11.0, 12.0]);
        assert_eq!(g.row(2), &[2.0, 12.0]);
        assert_eq!(g.get(1, 0), 1.0);
    }
}
