use serde::{Deserialize, Serialize};

/// Latent market state of the regime-switching generator.
/// Discriminants index rows/columns of transition matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Regime {
    Bull = 0,
    Bear = 1,
    Crash = 2,
    Recovery = 3,
}

impl Regime {
    pub const ALL: [Regime; 4] = [Regime::Bull, Regime::Bear, Regime::Crash, Regime::Recovery];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Self {
        match i {
            0 => Regime::Bull,
            1 => Regime::Bear,
            2 => Regime::Crash,
            _ => Regime::Recovery,
        }
    }
}

/// Broad asset class; selects the fat-tail parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetClass {
    UsEquity,
    InternationalEquity,
    EmergingMarkets,
    Bonds,
    RealEstate,
    Commodities,
    Cash,
}

/// Normal-distribution parameters for one regime (annual decimal returns).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeParams {
    pub mean: f64,
    pub std_dev: f64,
}

impl RegimeParams {
    pub const fn new(mean: f64, std_dev: f64) -> Self {
        RegimeParams { mean, std_dev }
    }
}

/// Per-regime return parameters for a single asset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeParamsMap {
    pub bull: RegimeParams,
    pub bear: RegimeParams,
    pub crash: RegimeParams,
    pub recovery: RegimeParams,
}

impl RegimeParamsMap {
    /// Long-run equity-like defaults used when no calibration mode is set.
    pub const DEFAULT: RegimeParamsMap = RegimeParamsMap {
        bull: RegimeParams::new(0.12, 0.12),
        bear: RegimeParams::new(-0.08, 0.18),
        crash: RegimeParams::new(-0.30, 0.25),
        recovery: RegimeParams::new(0.20, 0.15),
    };

    /// Global conservative defaults. Calibration falls back to these when the
    /// calibrated set fails validation, and per regime when a bucket is too small.
    pub const CONSERVATIVE: RegimeParamsMap = RegimeParamsMap {
        bull: RegimeParams::new(0.10, 0.14),
        bear: RegimeParams::new(-0.10, 0.20),
        crash: RegimeParams::new(-0.35, 0.28),
        recovery: RegimeParams::new(0.15, 0.18),
    };

    pub fn get(&self, regime: Regime) -> RegimeParams {
        match regime {
            Regime::Bull => self.bull,
            Regime::Bear => self.bear,
            Regime::Crash => self.crash,
            Regime::Recovery => self.recovery,
        }
    }

    pub fn get_mut(&mut self, regime: Regime) -> &mut RegimeParams {
        match regime {
            Regime::Bull => &mut self.bull,
            Regime::Bear => &mut self.bear,
            Regime::Crash => &mut self.crash,
            Regime::Recovery => &mut self.recovery,
        }
    }
}
