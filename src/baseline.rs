//! Liquidation-funded baseline: withdrawals are raised by selling securities.

use serde::{Deserialize, Serialize};

use crate::config::{BaselineConfig, TaxModel};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineState {
    pub balance: f64,
    pub depleted: bool,
    /// Gross sale of the most recent year.
    pub sale: f64,
    pub capital_gains_tax: f64,
    pub dividend_tax: f64,
    pub withdrawals: f64,
}

impl BaselineState {
    pub fn open(initial_value: f64) -> Self {
        BaselineState {
            balance: initial_value,
            depleted: false,
            sale: 0.0,
            capital_gains_tax: 0.0,
            dividend_tax: 0.0,
            withdrawals: 0.0,
        }
    }
}

/// One year, strictly in order: dividend tax out of the balance, grossed-up
/// sale for the withdrawal, then the market return on what is left.
pub fn step(
    prev: &BaselineState,
    config: &BaselineConfig,
    tax: &TaxModel,
    market_return: f64,
    year: usize,
) -> BaselineState {
    if prev.depleted {
        return BaselineState { balance: 0.0, sale: 0.0, ..*prev };
    }
    let mut balance = prev.balance;

    let dividend_tax = tax.dividend_tax(balance).min(balance);
    balance -= dividend_tax;

    let net = config.withdrawal.amount_for(year);
    let gross = tax.gross_up(net);
    let sale = gross.min(balance);
    // Tax share of whatever was actually sold.
    let gains_tax = if gross > 0.0 { sale * (gross - net) / gross } else { 0.0 };
    balance -= sale;

    let mut depleted = sale < gross || balance <= 0.0;
    balance = if depleted { 0.0 } else { (balance * (1.0 + market_return)).max(0.0) };
    if balance <= 0.0 {
        depleted = true;
    }

    BaselineState {
        balance,
        depleted,
        sale,
        capital_gains_tax: prev.capital_gains_tax + gains_tax,
        dividend_tax: prev.dividend_tax + dividend_tax,
        withdrawals: prev.withdrawals + (sale - gains_tax),
    }
}

/// Outcome of one iteration of the baseline strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineIterationResult {
    pub terminal_value: f64,
    pub depleted: bool,
    pub capital_gains_tax: f64,
    pub dividend_tax: f64,
    /// Balance at the end of each year.
    pub yearly_values: Vec<f64>,
}

/// Drive the baseline across a whole path of weighted portfolio returns.
pub fn simulate(
    initial_value: f64,
    config: &BaselineConfig,
    tax: &TaxModel,
    returns: &[f64],
) -> BaselineIterationResult {
    let mut state = BaselineState::open(initial_value);
    let mut yearly_values = Vec::with_capacity(returns.len());
    for (year, &r) in returns.iter().enumerate() {
        state = step(&state, config, tax, r, year);
        yearly_values.push(state.balance);
    }
    BaselineIterationResult {
        terminal_value: state.balance,
        depleted: state.depleted,
        capital_gains_tax: state.capital_gains_tax,
        dividend_tax: state.dividend_tax,
        yearly_values,
    }
}
