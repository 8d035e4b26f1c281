use thiserror::Error;

/// Every failure a run can surface to its caller.
///
/// Configuration variants are raised before any iteration executes.
/// `Cancelled` is only raised at a batch boundary and discards all work.
/// Numerical degeneracies (zero collateral, non-PSD correlation) and
/// calibration fallbacks are handled in place and never appear here.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error("iteration count must be at least 1")]
    NoIterations,

    #[error("time horizon must be at least 1 year")]
    NoHorizon,

    #[error("initial portfolio value must be positive and finite, got {0}")]
    InvalidInitialValue(f64),

    #[error("portfolio has no assets")]
    NoAssets,

    #[error("asset `{asset}` has an empty return history")]
    EmptyHistory { asset: String },

    #[error("asset `{asset}` has {actual} observations, expected {expected}")]
    HistoryLengthMismatch { asset: String, expected: usize, actual: usize },

    #[error("asset `{asset}` has a non-finite return at index {index}")]
    NonFiniteHistory { asset: String, index: usize },

    #[error("asset `{asset}` has invalid weight {weight}")]
    InvalidWeight { asset: String, weight: f64 },

    #[error("asset weights sum to {sum}, expected 1")]
    WeightSum { sum: f64 },

    #[error("correlation matrix is {rows}x{cols}, expected {expected}x{expected}")]
    CorrelationShape { rows: usize, cols: usize, expected: usize },

    #[error("correlation matrix is not symmetric at ({row}, {col})")]
    CorrelationAsymmetric { row: usize, col: usize },

    #[error("correlation entry ({row}, {col}) = {value} is outside [-1, 1]")]
    CorrelationOutOfRange { row: usize, col: usize, value: f64 },

    #[error("regime calibration needs at least {required} observations, got {actual}")]
    InsufficientHistory { required: usize, actual: usize },

    #[error("block size must be at least 1")]
    ZeroBlockSize,

    #[error("invalid inflation rate {0}")]
    InvalidInflation(f64),

    #[error("invalid leverage configuration: {0}")]
    InvalidLeverage(String),

    #[error("invalid withdrawal configuration: {0}")]
    InvalidWithdrawal(String),

    #[error("invalid tax configuration: {0}")]
    InvalidTax(String),

    #[error("simulation cancelled after {completed} of {total} iterations")]
    Cancelled { completed: usize, total: usize },

    #[error("simulation incomplete: {completed} of {total} iterations")]
    Incomplete { completed: usize, total: usize },

    #[error("failed to read scenario: {0}")]
    ScenarioIo(String),

    #[error("failed to parse scenario: {0}")]
    ScenarioParse(String),
}

impl SimError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SimError::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_distinct_from_configuration_errors() {
        let cancelled = SimError::Cancelled { completed: 3_000, total: 10_000 };
        assert!(cancelled.is_cancelled());
        assert!(!SimError::NoIterations.is_cancelled());
        assert!(!SimError::Incomplete { completed: 1, total: 2 }.is_cancelled());
    }

    #[test]
    fn messages_name_the_offending_asset() {
        let e = SimError::EmptyHistory { asset: "VTI".to_string() };
        assert_eq!(e.to_string(), "asset `VTI` has an empty return history");
    }
}
