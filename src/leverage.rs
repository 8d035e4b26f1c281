//! SBLOC leverage engine: one deterministic state transition per year.

use serde::{Deserialize, Serialize};

use crate::config::{Compounding, LeverageConfig, TaxModel};

/// Loan-to-value. Zero with no loan, unbounded with a loan and no collateral.
pub fn ltv(loan: f64, portfolio: f64) -> f64 {
    if loan <= 0.0 {
        0.0
    } else if portfolio <= 0.0 {
        f64::INFINITY
    } else {
        loan / portfolio
    }
}

/// Securities to sell so that `(L − S(1−h)) / (V − S) = T`, capped at `V`.
/// When the haircut leaves no more than `T` per unit sold, the sale can never
/// restore the target and everything goes.
pub fn liquidation_amount(loan: f64, portfolio: f64, target: f64, haircut: f64) -> f64 {
    if portfolio <= 0.0 {
        return 0.0;
    }
    let net_per_unit = 1.0 - haircut;
    if net_per_unit <= target {
        return portfolio;
    }
    ((loan - target * portfolio) / (net_per_unit - target)).clamp(0.0, portfolio)
}

/// Account state after a year (or at open).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeverageState {
    pub loan: f64,
    pub portfolio: f64,
    /// LTV after any forced sale.
    pub ltv: f64,
    /// LTV the margin and liquidation tests saw, before any sale.
    pub tested_ltv: f64,
    pub margin_call: bool,
    pub forced_liquidation: bool,
    /// Securities sold this year by the forced liquidation.
    pub liquidated: f64,
    pub withdrawal: f64,
    pub cumulative_interest: f64,
    pub cumulative_haircut: f64,
    pub cumulative_borrowed_tax: f64,
    pub cumulative_withdrawals: f64,
    pub failed: bool,
}

impl LeverageState {
    pub fn open(initial_value: f64, initial_loan: f64) -> Self {
        let ratio = ltv(initial_loan, initial_value);
        LeverageState {
            loan: initial_loan,
            portfolio: initial_value,
            ltv: ratio,
            tested_ltv: ratio,
            margin_call: false,
            forced_liquidation: false,
            liquidated: 0.0,
            withdrawal: 0.0,
            cumulative_interest: 0.0,
            cumulative_haircut: 0.0,
            cumulative_borrowed_tax: 0.0,
            cumulative_withdrawals: 0.0,
            failed: initial_value - initial_loan <= 0.0,
        }
    }

    pub fn net_worth(&self) -> f64 {
        self.portfolio - self.loan
    }
}

/// Advance one year.
///
/// Order: withdrawal for the year, borrowed dividend tax, interest accrual
/// and draw, market return, LTV, margin test, forced liquidation, failure.
pub fn step(
    prev: &LeverageState,
    config: &LeverageConfig,
    tax: &TaxModel,
    market_return: f64,
    year: usize,
) -> LeverageState {
    let withdrawal = config.withdrawal.amount_for(year);
    let mut loan = prev.loan;

    let dividend_tax = tax.dividend_tax(prev.portfolio);
    loan += dividend_tax;

    let loan_before_interest = loan;
    match config.compounding {
        Compounding::Annual => {
            loan *= 1.0 + config.interest_rate;
            loan += withdrawal;
        }
        Compounding::Monthly => {
            let monthly_rate = config.interest_rate / 12.0;
            let monthly_draw = withdrawal / 12.0;
            for _ in 0..12 {
                loan *= 1.0 + monthly_rate;
                loan += monthly_draw;
            }
        }
    }
    let interest = loan - loan_before_interest - withdrawal;

    let mut portfolio = (prev.portfolio * (1.0 + market_return)).max(0.0);

    let tested_ltv = ltv(loan, portfolio);
    let margin_call = tested_ltv >= config.maintenance_margin;

    let mut liquidated = 0.0;
    let mut haircut_loss = 0.0;
    if tested_ltv > config.target_ltv {
        liquidated = liquidation_amount(loan, portfolio, config.target_ltv, config.haircut);
        haircut_loss = liquidated * config.haircut;
        portfolio = (portfolio - liquidated).max(0.0);
        loan = (loan - (liquidated - haircut_loss)).max(0.0);
    }

    let failed = portfolio - loan <= 0.0;
    LeverageState {
        loan,
        portfolio,
        ltv: ltv(loan, portfolio),
        tested_ltv,
        margin_call,
        forced_liquidation: liquidated > 0.0,
        liquidated,
        withdrawal,
        cumulative_interest: prev.cumulative_interest + interest,
        cumulative_haircut: prev.cumulative_haircut + haircut_loss,
        cumulative_borrowed_tax: prev.cumulative_borrowed_tax + dividend_tax,
        cumulative_withdrawals: prev.cumulative_withdrawals + withdrawal,
        failed,
    }
}
