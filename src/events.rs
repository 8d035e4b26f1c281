use std::io::Write;

use serde::Serialize;

use crate::calibration::ValidationIssue;
use crate::config::ReturnModel;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Event {
    /// Fires once, before the first batch.
    RunStarted {
        iterations: usize,
        years: usize,
        model: ReturnModel,
        /// Seed actually used; drawn from OS entropy when none was configured.
        seed: u64,
    },
    /// A calibrated parameter set failed validation and was replaced.
    CalibrationFallback {
        asset: String,
        issues: Vec<ValidationIssue>,
    },
    CalibrationWarning {
        asset: String,
        issue: ValidationIssue,
    },
    BatchCompleted {
        batch: usize,
        total: usize,
    },
    RunCancelled {
        total: usize,
    },
    DiagnosticSummary {
        margin_calls: usize,
        forced_liquidations: usize,
        failed_iterations: usize,
        correlation_clamped: bool,
    },
    RunCompleted,
}

/// Log record: an event stamped with the number of iterations finished when it fired.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimEvent {
    pub completed: usize,
    pub event: Event,
}

pub type EventLog = Vec<SimEvent>;

/// One JSON document per line.
pub fn write_ndjson<W: Write, T: Serialize>(
    mut writer: W,
    records: &[T],
) -> Result<(), serde_json::Error> {
    for r in records {
        serde_json::to_writer(&mut writer, r)?;
        writeln!(writer).map_err(serde_json::Error::io)?;
    }
    writer.flush().map_err(serde_json::Error::io)
}
