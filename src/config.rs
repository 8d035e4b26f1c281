use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::types::AssetClass;

/// Allowed deviation of the weight sum from 1.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;
/// Allowed asymmetry between `corr[i][j]` and `corr[j][i]`.
pub const SYMMETRY_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnModel {
    /// Independent draws of whole historical years.
    Bootstrap,
    /// Contiguous historical blocks (serial correlation preserved).
    BlockBootstrap,
    /// Four-state Markov chain with per-regime normal returns.
    RegimeSwitching,
    /// Skewed Student-t returns scaled to each asset's history.
    FatTail,
}

impl ReturnModel {
    pub fn name(self) -> &'static str {
        match self {
            ReturnModel::Bootstrap => "bootstrap",
            ReturnModel::BlockBootstrap => "block-bootstrap",
            ReturnModel::RegimeSwitching => "regime-switching",
            ReturnModel::FatTail => "fat-tail",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationMode {
    /// Regime parameters as observed, 1.5% survivorship haircut.
    Historical,
    /// Harsher parameters and transitions, 2.0% survivorship haircut.
    Conservative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compounding {
    Annual,
    /// Interest and withdrawals split into twelve equal sub-steps.
    Monthly,
}

/// Annual cash need, growing by `annual_raise` from `start_year` on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalSchedule {
    pub annual_amount: f64,
    pub annual_raise: f64,
    /// First simulated year (0-based) with a withdrawal.
    pub start_year: usize,
}

impl WithdrawalSchedule {
    pub fn amount_for(&self, year: usize) -> f64 {
        if year < self.start_year {
            return 0.0;
        }
        self.annual_amount * (1.0 + self.annual_raise).powi((year - self.start_year) as i32)
    }

    /// Running total of withdrawals through each year of the horizon.
    pub fn cumulative(&self, years: usize) -> Vec<f64> {
        let mut total = 0.0;
        (0..years)
            .map(|y| {
                total += self.amount_for(y);
                total
            })
            .collect()
    }

    fn validate(&self) -> Result<(), SimError> {
        if !self.annual_amount.is_finite() || self.annual_amount < 0.0 {
            return Err(SimError::InvalidWithdrawal(format!(
                "annual amount {} must be non-negative",
                self.annual_amount
            )));
        }
        if !self.annual_raise.is_finite() || self.annual_raise <= -1.0 {
            return Err(SimError::InvalidWithdrawal(format!(
                "annual raise {} must exceed -1",
                self.annual_raise
            )));
        }
        Ok(())
    }
}

/// Securities-backed line of credit terms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeverageConfig {
    /// Loan balance already drawn at year 0.
    pub initial_loan: f64,
    pub withdrawal: WithdrawalSchedule,
    pub interest_rate: f64,
    /// LTV at or above which a margin call is flagged.
    pub maintenance_margin: f64,
    /// LTV above which securities are force-sold, and the LTV the sale restores.
    pub target_ltv: f64,
    /// Fraction of forced-sale proceeds lost to the haircut.
    pub haircut: f64,
    pub compounding: Compounding,
}

impl LeverageConfig {
    fn validate(&self) -> Result<(), SimError> {
        self.withdrawal.validate()?;
        let bad = |msg: String| Err(SimError::InvalidLeverage(msg));
        if !self.initial_loan.is_finite() || self.initial_loan < 0.0 {
            return bad(format!("initial loan {} must be non-negative", self.initial_loan));
        }
        if !self.interest_rate.is_finite() || self.interest_rate <= -1.0 {
            return bad(format!("interest rate {} must exceed -1", self.interest_rate));
        }
        if !(self.maintenance_margin > 0.0 && self.maintenance_margin <= 1.0) {
            return bad(format!("maintenance margin {} outside (0, 1]", self.maintenance_margin));
        }
        if !(self.target_ltv > 0.0 && self.target_ltv <= 1.0) {
            return bad(format!("target LTV {} outside (0, 1]", self.target_ltv));
        }
        if self.maintenance_margin > self.target_ltv {
            return bad(format!(
                "maintenance margin {} exceeds target LTV {}",
                self.maintenance_margin, self.target_ltv
            ));
        }
        if !(0.0..1.0).contains(&self.haircut) {
            return bad(format!("haircut {} outside [0, 1)", self.haircut));
        }
        Ok(())
    }
}

/// Liquidation-funded withdrawals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineConfig {
    pub withdrawal: WithdrawalSchedule,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaxConfig {
    pub capital_gains_rate: f64,
    /// Cost basis as a fraction of market value.
    pub cost_basis_ratio: f64,
    pub dividend_yield: f64,
    pub dividend_tax_rate: f64,
    pub model_dividends: bool,
}

impl TaxConfig {
    pub fn embedded_gain_fraction(&self) -> f64 {
        1.0 - self.cost_basis_ratio
    }

    /// Dividend tax owed on a position of `value`; zero when dividends are off.
    pub fn dividend_tax(&self, value: f64) -> f64 {
        if !self.model_dividends || value <= 0.0 {
            return 0.0;
        }
        value * self.dividend_yield * self.dividend_tax_rate
    }

    /// Pre-tax sale needed to net `net` after capital gains tax.
    pub fn gross_up(&self, net: f64) -> f64 {
        net / (1.0 - self.embedded_gain_fraction() * self.capital_gains_rate)
    }

    /// Capital gains tax that would be due if `value` were liquidated today.
    pub fn embedded_gains_tax(&self, value: f64) -> f64 {
        value.max(0.0) * self.embedded_gain_fraction() * self.capital_gains_rate
    }

    fn validate(&self) -> Result<(), SimError> {
        let bad = |msg: String| Err(SimError::InvalidTax(msg));
        if !(0.0..1.0).contains(&self.capital_gains_rate) {
            return bad(format!("capital gains rate {} outside [0, 1)", self.capital_gains_rate));
        }
        if !(0.0..=1.0).contains(&self.cost_basis_ratio) {
            return bad(format!("cost basis ratio {} outside [0, 1]", self.cost_basis_ratio));
        }
        if !self.dividend_yield.is_finite() || self.dividend_yield < 0.0 {
            return bad(format!("dividend yield {} must be non-negative", self.dividend_yield));
        }
        if !(0.0..1.0).contains(&self.dividend_tax_rate) {
            return bad(format!("dividend tax rate {} outside [0, 1)", self.dividend_tax_rate));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TaxModel {
    Untaxed,
    Taxable(TaxConfig),
}

impl TaxModel {
    pub fn config(&self) -> Option<&TaxConfig> {
        match self {
            TaxModel::Untaxed => None,
            TaxModel::Taxable(t) => Some(t),
        }
    }

    pub fn dividend_tax(&self, value: f64) -> f64 {
        self.config().map_or(0.0, |t| t.dividend_tax(value))
    }

    pub fn gross_up(&self, net: f64) -> f64 {
        self.config().map_or(net, |t| t.gross_up(net))
    }

    pub fn embedded_gains_tax(&self, value: f64) -> f64 {
        self.config().map_or(0.0, |t| t.embedded_gains_tax(value))
    }
}

/// Which engines run alongside the plain compounding loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Strategy {
    /// Compound the portfolio with no withdrawals.
    Hold,
    /// Fund withdrawals from a securities-backed loan.
    Borrow(LeverageConfig),
    /// Fund withdrawals by selling (reported as the baseline).
    Sell(BaselineConfig),
    /// Both strategies on the same return paths.
    Compare { borrow: LeverageConfig, sell: BaselineConfig },
}

impl Strategy {
    pub fn leverage(&self) -> Option<&LeverageConfig> {
        match self {
            Strategy::Borrow(l) | Strategy::Compare { borrow: l, .. } => Some(l),
            _ => None,
        }
    }

    pub fn baseline(&self) -> Option<&BaselineConfig> {
        match self {
            Strategy::Sell(b) | Strategy::Compare { sell: b, .. } => Some(b),
            _ => None,
        }
    }
}

/// Immutable run parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub iterations: usize,
    pub years: usize,
    pub initial_value: f64,
    /// Annual inflation used to deflate recorded values; `None` reports nominal values.
    pub inflation: Option<f64>,
    pub model: ReturnModel,
    pub calibration: Option<CalibrationMode>,
    pub block_size: Option<usize>,
    /// `None` seeds from OS entropy (non-reproducible).
    pub seed: Option<u64>,
    pub strategy: Strategy,
    pub tax: TaxModel,
}

impl SimulationConfig {
    pub fn canonical() -> Self {
        let withdrawal =
            WithdrawalSchedule { annual_amount: 200_000.0, annual_raise: 0.03, start_year: 0 };
        SimulationConfig {
            iterations: 10_000,
            years: 30,
            initial_value: 5_000_000.0,
            inflation: None,
            model: ReturnModel::RegimeSwitching,
            calibration: Some(CalibrationMode::Historical),
            block_size: None,
            seed: Some(42),
            strategy: Strategy::Compare {
                borrow: LeverageConfig {
                    initial_loan: 0.0,
                    withdrawal,
                    interest_rate: 0.065,
                    maintenance_margin: 0.50,
                    target_ltv: 0.65,
                    haircut: 0.05,
                    compounding: Compounding::Annual,
                },
                sell: BaselineConfig { withdrawal },
            },
            tax: TaxModel::Taxable(TaxConfig {
                capital_gains_rate: 0.238,
                cost_basis_ratio: 0.4,
                dividend_yield: 0.015,
                dividend_tax_rate: 0.238,
                model_dividends: true,
            }),
        }
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if self.iterations == 0 {
            return Err(SimError::NoIterations);
        }
        if self.years == 0 {
            return Err(SimError::NoHorizon);
        }
        if !self.initial_value.is_finite() || self.initial_value <= 0.0 {
            return Err(SimError::InvalidInitialValue(self.initial_value));
        }
        if let Some(i) = self.inflation
            && (!i.is_finite() || i <= -1.0)
        {
            return Err(SimError::InvalidInflation(i));
        }
        if self.block_size == Some(0) {
            return Err(SimError::ZeroBlockSize);
        }
        if let Some(l) = self.strategy.leverage() {
            l.validate()?;
        }
        if let Some(b) = self.strategy.baseline() {
            b.withdrawal.validate()?;
        }
        if let Some(t) = self.tax.config() {
            t.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetConfig {
    pub name: String,
    pub weight: f64,
    pub class: AssetClass,
    /// Periodic (annual) decimal returns, oldest first.
    pub history: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioConfig {
    pub assets: Vec<AssetConfig>,
    pub correlation: Vec<Vec<f64>>,
}

impl PortfolioConfig {
    /// Single asset at full weight with a trivial 1×1 correlation.
    pub fn single_asset(name: &str, class: AssetClass, history: Vec<f64>) -> Self {
        PortfolioConfig {
            assets: vec![AssetConfig { name: name.to_string(), weight: 1.0, class, history }],
            correlation: vec![vec![1.0]],
        }
    }

    /// 70/30 US equity / bond mix over 1974–2023 annual total returns.
    /// Values are rounded approximations for illustration, not a data source.
    pub fn canonical() -> Self {
        let us_equity = vec![
            -0.265, 0.372, 0.238, -0.072, 0.066, 0.184, 0.324, -0.049, 0.214, 0.225, //
            0.063, 0.322, 0.185, 0.052, 0.168, 0.315, -0.031, 0.305, 0.076, 0.101, //
            0.013, 0.376, 0.230, 0.334, 0.286, 0.210, -0.091, -0.119, -0.221, 0.287, //
            0.109, 0.049, 0.158, 0.055, -0.370, 0.265, 0.151, 0.021, 0.160, 0.324, //
            0.137, 0.014, 0.120, 0.218, -0.044, 0.315, 0.184, 0.287, -0.181, 0.263,
        ];
        let bonds = vec![
            0.056, 0.092, 0.156, 0.030, 0.014, 0.019, 0.027, 0.063, 0.326, 0.084, //
            0.151, 0.221, 0.153, 0.028, 0.079, 0.145, 0.090, 0.160, 0.074, 0.098, //
            -0.029, 0.185, 0.036, 0.097, 0.087, -0.008, 0.116, 0.084, 0.103, 0.041, //
            0.043, 0.024, 0.043, 0.070, 0.052, 0.059, 0.065, 0.078, 0.042, -0.020, //
            0.060, 0.005, 0.026, 0.035, 0.000, 0.087, 0.075, -0.015, -0.130, 0.055,
        ];
        PortfolioConfig {
            assets: vec![
                AssetConfig {
                    name: "US Equity".to_string(),
                    weight: 0.7,
                    class: AssetClass::UsEquity,
                    history: us_equity,
                },
                AssetConfig {
                    name: "US Bonds".to_string(),
                    weight: 0.3,
                    class: AssetClass::Bonds,
                    history: bonds,
                },
            ],
            correlation: vec![vec![1.0, 0.1], vec![0.1, 1.0]],
        }
    }

    pub fn weights(&self) -> Vec<f64> {
        self.assets.iter().map(|a| a.weight).collect()
    }

    /// Length of every asset's history (equal once validated).
    pub fn history_len(&self) -> usize {
        self.assets.first().map_or(0, |a| a.history.len())
    }

    /// Weight-blended historical series, used where a single series is needed.
    pub fn blended_history(&self) -> Vec<f64> {
        (0..self.history_len())
            .map(|t| self.assets.iter().map(|a| a.weight * a.history[t]).sum())
            .collect()
    }

    pub fn validate(&self) -> Result<(), SimError> {
        let n = self.assets.len();
        if n == 0 {
            return Err(SimError::NoAssets);
        }
        let expected_len = self.assets[0].history.len();
        for asset in &self.assets {
            if asset.history.is_empty() {
                return Err(SimError::EmptyHistory { asset: asset.name.clone() });
            }
            if asset.history.len() != expected_len {
                return Err(SimError::HistoryLengthMismatch {
                    asset: asset.name.clone(),
                    expected: expected_len,
                    actual: asset.history.len(),
                });
            }
            if let Some(index) = asset.history.iter().position(|r| !r.is_finite()) {
                return Err(SimError::NonFiniteHistory { asset: asset.name.clone(), index });
            }
            if !asset.weight.is_finite() || asset.weight < 0.0 {
                return Err(SimError::InvalidWeight {
                    asset: asset.name.clone(),
                    weight: asset.weight,
                });
            }
        }

        let sum: f64 = self.assets.iter().map(|a| a.weight).sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(SimError::WeightSum { sum });
        }

        let rows = self.correlation.len();
        if rows != n {
            let cols = self.correlation.first().map_or(0, Vec::len);
            return Err(SimError::CorrelationShape { rows, cols, expected: n });
        }
        for row in &self.correlation {
            if row.len() != n {
                return Err(SimError::CorrelationShape { rows, cols: row.len(), expected: n });
            }
        }
        for i in 0..n {
            for j in 0..n {
                let value = self.correlation[i][j];
                if !value.is_finite() || !(-1.0..=1.0).contains(&value) {
                    return Err(SimError::CorrelationOutOfRange { row: i, col: j, value });
                }
                if j > i && (value - self.correlation[j][i]).abs() > SYMMETRY_TOLERANCE {
                    return Err(SimError::CorrelationAsymmetric { row: i, col: j });
                }
            }
        }
        Ok(())
    }
}

/// A complete run description, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub simulation: SimulationConfig,
    pub portfolio: PortfolioConfig,
}

impl Scenario {
    pub fn canonical() -> Self {
        Scenario {
            simulation: SimulationConfig::canonical(),
            portfolio: PortfolioConfig::canonical(),
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self, SimError> {
        serde_json::from_str(s).map_err(|e| SimError::ScenarioParse(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SimError::ScenarioIo(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }
}
