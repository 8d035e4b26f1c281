//! Per-iteration return buffers and the generator dispatch.

use rand::Rng;

use crate::bootstrap::{self, BlockBootstrap, Bootstrap};
use crate::calibration::{self, CalibrationReport};
use crate::config::{PortfolioConfig, ReturnModel, SimulationConfig};
use crate::error::SimError;
use crate::fat_tail::FatTail;
use crate::regime::{self, RegimeSwitching};
use crate::stats::{self, CholeskyFactor};
use crate::types::RegimeParamsMap;

/// Asset-major `(asset, year)` buffer of decimal returns for one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnPath {
    assets: usize,
    years: usize,
    data: Vec<f64>,
}

impl ReturnPath {
    pub fn new(assets: usize, years: usize) -> Self {
        ReturnPath { assets, years, data: vec![0.0; assets * years] }
    }

    pub fn n_assets(&self) -> usize {
        self.assets
    }

    pub fn years(&self) -> usize {
        self.years
    }

    pub fn get(&self, asset: usize, year: usize) -> f64 {
        self.data[asset * self.years + year]
    }

    pub fn set(&mut self, asset: usize, year: usize, value: f64) {
        self.data[asset * self.years + year] = value;
    }

    pub fn asset(&self, asset: usize) -> &[f64] {
        &self.data[asset * self.years..(asset + 1) * self.years]
    }

    pub fn asset_mut(&mut self, asset: usize) -> &mut [f64] {
        &mut self.data[asset * self.years..(asset + 1) * self.years]
    }

    /// `Σ w_a · r_a` for one year.
    pub fn portfolio_return(&self, year: usize, weights: &[f64]) -> f64 {
        weights.iter().enumerate().map(|(a, w)| w * self.get(a, year)).sum()
    }
}

/// The configured return model, ready to fill paths.
#[derive(Debug, Clone)]
pub enum ReturnGenerator {
    Bootstrap(Bootstrap),
    BlockBootstrap(BlockBootstrap),
    RegimeSwitching(RegimeSwitching),
    FatTail(FatTail),
}

/// A built generator plus what was learned while building it.
#[derive(Debug, Clone)]
pub struct GeneratorSetup {
    pub generator: ReturnGenerator,
    pub calibration: Vec<CalibrationReport>,
    pub block_size: Option<usize>,
    pub correlation_clamped: bool,
}

impl ReturnGenerator {
    /// Build the model named by `config.model` from validated inputs.
    ///
    /// Fails only on configuration problems (e.g. too little history to
    /// calibrate). Degenerate calibrations fall back inside the report.
    pub fn build(
        config: &SimulationConfig,
        portfolio: &PortfolioConfig,
    ) -> Result<GeneratorSetup, SimError> {
        let histories: Vec<Vec<f64>> =
            portfolio.assets.iter().map(|a| a.history.clone()).collect();

        let setup = match config.model {
            ReturnModel::Bootstrap => GeneratorSetup {
                generator: ReturnGenerator::Bootstrap(Bootstrap::new(histories)),
                calibration: Vec::new(),
                block_size: None,
                correlation_clamped: false,
            },
            ReturnModel::BlockBootstrap => {
                let requested = config
                    .block_size
                    .unwrap_or_else(|| bootstrap::optimal_block_length(&portfolio.blended_history()));
                let model = BlockBootstrap::new(histories, requested);
                GeneratorSetup {
                    block_size: Some(model.block_size()),
                    generator: ReturnGenerator::BlockBootstrap(model),
                    calibration: Vec::new(),
                    correlation_clamped: false,
                }
            }
            ReturnModel::RegimeSwitching => {
                let factor = correlation_factor(portfolio);
                let correlation_clamped = factor.clamped;
                let (transitions, survivorship) = regime::transitions_for(config.calibration);
                let mut reports = Vec::new();
                let params = match config.calibration {
                    None => vec![RegimeParamsMap::DEFAULT; portfolio.assets.len()],
                    Some(mode) => {
                        for asset in &portfolio.assets {
                            reports.push(calibration::calibrate(&asset.name, &asset.history, mode)?);
                        }
                        reports.iter().map(|r| r.params).collect()
                    }
                };
                GeneratorSetup {
                    generator: ReturnGenerator::RegimeSwitching(RegimeSwitching::new(
                        params,
                        transitions,
                        survivorship,
                        factor,
                    )),
                    calibration: reports,
                    block_size: None,
                    correlation_clamped,
                }
            }
            ReturnModel::FatTail => {
                let factor = correlation_factor(portfolio);
                let correlation_clamped = factor.clamped;
                let classes: Vec<_> =
                    portfolio.assets.iter().map(|a| (a.class, a.history.as_slice())).collect();
                GeneratorSetup {
                    generator: ReturnGenerator::FatTail(FatTail::new(&classes, factor)),
                    calibration: Vec::new(),
                    block_size: None,
                    correlation_clamped,
                }
            }
        };
        Ok(setup)
    }

    pub fn name(&self) -> &'static str {
        self.model().name()
    }

    pub fn model(&self) -> ReturnModel {
        match self {
            ReturnGenerator::Bootstrap(_) => ReturnModel::Bootstrap,
            ReturnGenerator::BlockBootstrap(_) => ReturnModel::BlockBootstrap,
            ReturnGenerator::RegimeSwitching(_) => ReturnModel::RegimeSwitching,
            ReturnGenerator::FatTail(_) => ReturnModel::FatTail,
        }
    }

    /// Overwrite every slot of `path` with one iteration's returns.
    pub fn fill(&self, rng: &mut impl Rng, path: &mut ReturnPath) {
        match self {
            ReturnGenerator::Bootstrap(m) => m.fill(rng, path),
            ReturnGenerator::BlockBootstrap(m) => m.fill(rng, path),
            ReturnGenerator::RegimeSwitching(m) => m.fill(rng, path),
            ReturnGenerator::FatTail(m) => m.fill(rng, path),
        }
    }
}

/// Factor for the portfolio's correlation matrix; identity for one asset.
pub fn correlation_factor(portfolio: &PortfolioConfig) -> CholeskyFactor {
    if portfolio.assets.len() == 1 {
        return CholeskyFactor::identity(1);
    }
    stats::cholesky(&portfolio.correlation)
}
