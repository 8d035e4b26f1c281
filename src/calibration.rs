//! Regime calibration: classify a historical series into bull/bear/crash/
//! recovery years, estimate per-regime normal parameters, and sanity-check
//! them before they reach the generator.
//!
//! Degenerate calibrations never fail the run. Any error-severity issue
//! replaces the whole parameter set with [`RegimeParamsMap::CONSERVATIVE`]
//! and the report records the fallback.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::CalibrationMode;
use crate::error::SimError;
use crate::stats;
use crate::types::{Regime, RegimeParams, RegimeParamsMap};

pub const MIN_OBSERVATIONS: usize = 10;
/// Buckets smaller than this take the per-regime conservative default.
pub const MIN_REGIME_OBSERVATIONS: usize = 2;

pub const CRASH_PERCENTILE: f64 = 10.0;
/// Upper edge of the bear bucket (crash 10% + bear 20%).
pub const BEAR_PERCENTILE: f64 = 30.0;
/// Lower edge of the recovery bucket (top 15%).
pub const RECOVERY_PERCENTILE: f64 = 85.0;

pub const MAX_STD_DEV: f64 = 0.80;
pub const MIN_BULL_BEAR_SPREAD: f64 = 0.05;

/// Percentile cut points of one series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub crash: f64,
    pub bear: f64,
    pub recovery: f64,
}

impl Thresholds {
    pub fn of(series: &[f64]) -> Self {
        let s = stats::sorted(series);
        Thresholds {
            crash: stats::percentile(&s, CRASH_PERCENTILE),
            bear: stats::percentile(&s, BEAR_PERCENTILE),
            recovery: stats::percentile(&s, RECOVERY_PERCENTILE),
        }
    }

    /// Crash and bear take precedence; recovery covers the top tail and any
    /// positive year that follows a negative one.
    pub fn classify(&self, value: f64, previous: Option<f64>) -> Regime {
        if value <= self.crash {
            Regime::Crash
        } else if value <= self.bear {
            Regime::Bear
        } else if value >= self.recovery || (value > 0.0 && previous.is_some_and(|p| p < 0.0)) {
            Regime::Recovery
        } else {
            Regime::Bull
        }
    }
}

pub fn classify(series: &[f64]) -> Result<Vec<Regime>, SimError> {
    if series.len() < MIN_OBSERVATIONS {
        return Err(SimError::InsufficientHistory {
            required: MIN_OBSERVATIONS,
            actual: series.len(),
        });
    }
    let thresholds = Thresholds::of(series);
    Ok(series
        .iter()
        .enumerate()
        .map(|(i, &r)| thresholds.classify(r, i.checked_sub(1).map(|p| series[p])))
        .collect())
}

/// Observation counts per regime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegimeCounts {
    pub bull: usize,
    pub bear: usize,
    pub crash: usize,
    pub recovery: usize,
}

impl RegimeCounts {
    pub fn of(regimes: &[Regime]) -> Self {
        let mut c = RegimeCounts::default();
        for r in regimes {
            match r {
                Regime::Bull => c.bull += 1,
                Regime::Bear => c.bear += 1,
                Regime::Crash => c.crash += 1,
                Regime::Recovery => c.recovery += 1,
            }
        }
        c
    }
}

/// Empirical mean and sample std dev per regime.
pub fn regime_params(series: &[f64], regimes: &[Regime]) -> RegimeParamsMap {
    let mut map = RegimeParamsMap::CONSERVATIVE;
    for regime in Regime::ALL {
        let bucket: Vec<f64> = series
            .iter()
            .zip(regimes)
            .filter(|(_, r)| **r == regime)
            .map(|(v, _)| *v)
            .collect();
        if bucket.len() >= MIN_REGIME_OBSERVATIONS {
            *map.get_mut(regime) = RegimeParams::new(stats::mean(&bucket), stats::std_dev(&bucket));
        }
    }
    map
}

/// Shift means down and widen dispersion.
pub fn conservative_adjustment(map: &RegimeParamsMap) -> RegimeParamsMap {
    let adjust = |p: RegimeParams, shift: f64, scale: f64| {
        RegimeParams::new(p.mean - shift, p.std_dev * scale)
    };
    RegimeParamsMap {
        bull: adjust(map.bull, map.bull.std_dev.max(0.01), 1.15),
        bear: adjust(map.bear, 0.02, 1.20),
        crash: adjust(map.crash, 0.03, 1.25),
        recovery: adjust(map.recovery, 0.02, 1.20),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ValidationIssue {
    NegativeBullMean { mean: f64 },
    BullNotAboveBear { bull: f64, bear: f64 },
    NarrowBullBearSpread { spread: f64 },
    ExcessiveVolatility { regime: Regime, std_dev: f64 },
}

impl ValidationIssue {
    pub fn severity(&self) -> Severity {
        match self {
            ValidationIssue::NegativeBullMean { .. } | ValidationIssue::BullNotAboveBear { .. } => {
                Severity::Error
            }
            ValidationIssue::NarrowBullBearSpread { .. } => Severity::Warning,
            ValidationIssue::ExcessiveVolatility { regime, .. } => match regime {
                Regime::Bull | Regime::Crash => Severity::Error,
                Regime::Bear | Regime::Recovery => Severity::Warning,
            },
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NegativeBullMean { mean } => write!(f, "bull mean {mean:.4} is negative"),
            Self::BullNotAboveBear { bull, bear } => {
                write!(f, "bull mean {bull:.4} does not exceed bear mean {bear:.4}")
            }
            Self::NarrowBullBearSpread { spread } => {
                write!(f, "bull/bear spread {spread:.4} below {MIN_BULL_BEAR_SPREAD}")
            }
            Self::ExcessiveVolatility { regime, std_dev } => {
                write!(f, "{regime:?} std dev {std_dev:.4} exceeds {MAX_STD_DEV}")
            }
        }
    }
}

pub fn validate(map: &RegimeParamsMap) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    if map.bull.mean < 0.0 {
        issues.push(ValidationIssue::NegativeBullMean { mean: map.bull.mean });
    }
    if map.bull.mean <= map.bear.mean {
        issues.push(ValidationIssue::BullNotAboveBear { bull: map.bull.mean, bear: map.bear.mean });
    } else if map.bull.mean - map.bear.mean < MIN_BULL_BEAR_SPREAD {
        issues.push(ValidationIssue::NarrowBullBearSpread {
            spread: map.bull.mean - map.bear.mean,
        });
    }
    for regime in Regime::ALL {
        let std_dev = map.get(regime).std_dev;
        if std_dev > MAX_STD_DEV {
            issues.push(ValidationIssue::ExcessiveVolatility { regime, std_dev });
        }
    }
    issues
}

/// Outcome of calibrating one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub asset: String,
    pub mode: CalibrationMode,
    pub observations: usize,
    pub thresholds: Thresholds,
    pub counts: RegimeCounts,
    /// Parameters as estimated (after the conservative adjustment, if any).
    pub calibrated: RegimeParamsMap,
    /// Parameters handed to the generator.
    pub params: RegimeParamsMap,
    pub issues: Vec<ValidationIssue>,
    pub fell_back: bool,
}

impl CalibrationReport {
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity() == Severity::Error)
    }
}

pub fn calibrate(
    asset: &str,
    series: &[f64],
    mode: CalibrationMode,
) -> Result<CalibrationReport, SimError> {
    let regimes = classify(series)?;
    let raw = regime_params(series, &regimes);
    let calibrated = match mode {
        CalibrationMode::Historical => raw,
        CalibrationMode::Conservative => conservative_adjustment(&raw),
    };

    let issues = validate(&calibrated);
    let fell_back = issues.iter().any(|i| i.severity() == Severity::Error);
    let params = if fell_back {
        warn!(
            asset,
            errors = issues.iter().filter(|i| i.severity() == Severity::Error).count(),
            "regime calibration rejected, using conservative defaults"
        );
        RegimeParamsMap::CONSERVATIVE
    } else {
        calibrated
    };

    Ok(CalibrationReport {
        asset: asset.to_string(),
        mode,
        observations: series.len(),
        thresholds: Thresholds::of(series),
        counts: RegimeCounts::of(&regimes),
        calibrated,
        params,
        issues,
        fell_back,
    })
}
