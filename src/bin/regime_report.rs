use std::env;

use bbd::calibration::{self, CalibrationReport};
use bbd::config::{CalibrationMode, Scenario};
use bbd::types::Regime;

fn main() {
    // Optional scenario file; the canonical portfolio otherwise.
    let scenario = match env::args().nth(1) {
        Some(path) => match Scenario::load(&path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("regime_report: {e}");
                std::process::exit(1);
            }
        },
        None => Scenario::canonical(),
    };

    let mut reports: Vec<CalibrationReport> = Vec::new();
    for asset in &scenario.portfolio.assets {
        for mode in [CalibrationMode::Historical, CalibrationMode::Conservative] {
            match calibration::calibrate(&asset.name, &asset.history, mode) {
                Ok(r) => reports.push(r),
                Err(e) => eprintln!("  {} {mode:?}: {e}", asset.name),
            }
        }
    }

    // NDJSON to stdout.
    for r in &reports {
        match serde_json::to_string(r) {
            Ok(line) => println!("{line}"),
            Err(e) => eprintln!("regime_report: {e}"),
        }
    }

    // Human-readable table to stderr.
    eprintln!("regime_report: {} asset(s), {} report(s)", scenario.portfolio.assets.len(), reports.len());
    for r in &reports {
        let status = if r.fell_back { "FALLBACK" } else { "ok" };
        eprintln!(
            "\n  {} [{:?}] n={} thresholds crash={:.3} bear={:.3} recovery={:.3}  {status}",
            r.asset, r.mode, r.observations, r.thresholds.crash, r.thresholds.bear, r.thresholds.recovery
        );
        eprintln!("  {:<9} | {:>5} | {:>9} | {:>9} | {:>9} | {:>9}", "regime", "n", "cal.mean", "cal.sd", "mean", "sd");
        for regime in Regime::ALL {
            let n = match regime {
                Regime::Bull => r.counts.bull,
                Regime::Bear => r.counts.bear,
                Regime::Crash => r.counts.crash,
                Regime::Recovery => r.counts.recovery,
            };
            let cal = r.calibrated.get(regime);
            let used = r.params.get(regime);
            eprintln!(
                "  {:<9} | {:>5} | {:>9.4} | {:>9.4} | {:>9.4} | {:>9.4}",
                format!("{regime:?}"),
                n,
                cal.mean,
                cal.std_dev,
                used.mean,
                used.std_dev
            );
        }
        for issue in &r.issues {
            eprintln!("    {:?}: {issue}", issue.severity());
        }
    }
}
