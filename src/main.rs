use std::fs::File;
use std::io::{BufWriter, Write};
use std::process;
use std::str::FromStr;

use bbd::analysis::{self, Percentiles, SimulationOutput, YearPercentiles};
use bbd::config::{ReturnModel, Scenario};
use bbd::control::{Progress, RunControl};
use bbd::error::SimError;
use bbd::events;
use bbd::simulation::{self, Simulation};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Progress on stderr, one line per batch.
struct StderrProgress {
    quiet: bool,
}

impl RunControl for StderrProgress {
    fn on_progress(&mut self, progress: Progress) {
        if !self.quiet {
            eprint!("\r  {:>5.1}% ({}/{})", progress.percent(), progress.completed, progress.total);
            if progress.completed == progress.total {
                eprintln!();
            }
        }
    }
}

fn parse_flag<T: FromStr>(flag: &str, value: Option<&String>) -> T {
    match value.and_then(|v| v.parse().ok()) {
        Some(v) => v,
        None => {
            eprintln!("{flag} requires a valid value");
            process::exit(2);
        }
    }
}

fn parse_model(name: &str) -> Option<ReturnModel> {
    [
        ReturnModel::Bootstrap,
        ReturnModel::BlockBootstrap,
        ReturnModel::RegimeSwitching,
        ReturnModel::FatTail,
    ]
    .into_iter()
    .find(|m| m.name() == name)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut config_path: Option<String> = None;
    let mut seed_override: Option<u64> = None;
    let mut iterations_override: Option<usize> = None;
    let mut years_override: Option<usize> = None;
    let mut model_override: Option<ReturnModel> = None;
    let mut runs: Option<u64> = None;
    let mut json_path: Option<String> = None;
    let mut events_path: Option<String> = None;
    let mut quiet = false;

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--config" => {
                i += 1;
                config_path = Some(parse_flag(flag, args.get(i)));
            }
            "--seed" => {
                i += 1;
                seed_override = Some(parse_flag(flag, args.get(i)));
            }
            "--iterations" => {
                i += 1;
                iterations_override = Some(parse_flag(flag, args.get(i)));
            }
            "--years" => {
                i += 1;
                years_override = Some(parse_flag(flag, args.get(i)));
            }
            "--model" => {
                i += 1;
                let name: String = parse_flag(flag, args.get(i));
                model_override = match parse_model(&name) {
                    Some(m) => Some(m),
                    None => {
                        eprintln!(
                            "--model must be one of bootstrap, block-bootstrap, regime-switching, fat-tail"
                        );
                        process::exit(2);
                    }
                };
            }
            "--runs" => {
                i += 1;
                runs = Some(parse_flag(flag, args.get(i)));
            }
            "--json" => {
                i += 1;
                json_path = Some(parse_flag(flag, args.get(i)));
            }
            "--events" => {
                i += 1;
                events_path = Some(parse_flag(flag, args.get(i)));
            }
            "--quiet" => quiet = true,
            other => eprintln!("ignoring unknown argument {other}"),
        }
        i += 1;
    }

    let scenario = match config_path {
        Some(path) => Scenario::load(&path).unwrap_or_else(|e| fail(&e)),
        None => Scenario::canonical(),
    };
    let mut base = scenario.simulation;
    if let Some(s) = seed_override {
        base.seed = Some(s);
    }
    if let Some(n) = iterations_override {
        base.iterations = n;
    }
    if let Some(y) = years_override {
        base.years = y;
    }
    if let Some(m) = model_override {
        base.model = m;
    }
    let portfolio = scenario.portfolio;

    if let Some(n) = runs {
        use rayon::prelude::*;

        let start_seed = base.seed.unwrap_or(42);
        let outputs: Result<Vec<SimulationOutput>, SimError> = (0u64..n)
            .into_par_iter()
            .map(|k| {
                let mut config = base.clone();
                config.seed = Some(simulation::seed_for_run(start_seed, k));
                let mut sim = Simulation::from_config(config, portfolio.clone())?;
                sim.run(&mut ())
            })
            .collect();
        let outputs = outputs.unwrap_or_else(|e| fail(&e));

        if !quiet {
            print_runs(&outputs, start_seed);
            match analysis::run_spread(&outputs) {
                Some(spread) => {
                    println!("\n=== Spread across {} runs ===", spread.runs);
                    print_percentile_header("Metric");
                    print_percentile_row("Median terminal", &spread.median_terminal, 1.0);
                    print_percentile_row("Success rate %", &spread.success_rate, 100.0);
                    print_percentile_row("Median CAGR %", &spread.median_cagr, 100.0);
                }
                None => eprintln!("Warning: spread requires >= 2 runs"),
            }
        }
        if let Some(path) = json_path {
            write_json(&path, &outputs);
        }
        return;
    }

    let mut sim = Simulation::from_config(base, portfolio).unwrap_or_else(|e| fail(&e));
    let output = sim.run(&mut StderrProgress { quiet }).unwrap_or_else(|e| fail(&e));

    if let Some(path) = events_path {
        let file = File::create(&path).unwrap_or_else(|e| fail(&e));
        if let Err(e) = events::write_ndjson(BufWriter::new(file), &sim.log) {
            fail(&e);
        }
        if !quiet {
            println!("Events logged: {} → {path}", sim.log.len());
        }
    }
    if let Some(path) = json_path {
        write_json(&path, &output);
    }
    if !quiet {
        print_output(&output);
    }
}

fn fail(e: &dyn std::fmt::Display) -> ! {
    error!("{e}");
    eprintln!("error: {e}");
    process::exit(1);
}

fn write_json<T: serde::Serialize>(path: &str, value: &T) {
    let file = File::create(path).unwrap_or_else(|e| fail(&e));
    let mut writer = BufWriter::new(file);
    if let Err(e) = serde_json::to_writer_pretty(&mut writer, value) {
        fail(&e);
    }
    if let Err(e) = writeln!(writer) {
        fail(&e);
    }
}

fn print_percentile_header(label: &str) {
    println!(
        "{label:<18} | {:>14} | {:>14} | {:>14} | {:>14} | {:>14}",
        "P10", "P25", "P50", "P75", "P90"
    );
    println!("{}", "-".repeat(18 + 5 * 17));
}

fn print_percentile_row(label: &str, p: &Percentiles, scale: f64) {
    println!(
        "{label:<18} | {:>14.2} | {:>14.2} | {:>14.2} | {:>14.2} | {:>14.2}",
        p.p10 * scale,
        p.p25 * scale,
        p.p50 * scale,
        p.p75 * scale,
        p.p90 * scale
    );
}

fn print_year_curve(title: &str, curve: &[YearPercentiles]) {
    println!("\n=== {title} ===");
    print_percentile_header("Year");
    for yp in curve {
        print_percentile_row(&yp.year.to_string(), &yp.percentiles, 1.0);
    }
}

fn print_output(out: &SimulationOutput) {
    let d = &out.diagnostics;
    println!(
        "\n=== Run: {} iterations × {} years, model {}, seed {} ===",
        out.iterations, out.years, d.generator, d.seed
    );
    if let Some(b) = d.block_size {
        println!("  block length: {b}");
    }
    for report in &d.calibration {
        let status = if report.fell_back { "FALLBACK" } else { "ok" };
        println!(
            "  calibration [{}] {:?}: {status}, {} issue(s)",
            report.asset,
            report.mode,
            report.issues.len()
        );
    }
    if d.correlation_clamped {
        println!("  correlation matrix was not PSD and was clamped");
    }

    let s = &out.summary;
    println!("\n=== Terminal value ===");
    println!("  mean           {:>16.0}", s.mean);
    println!("  median         {:>16.0}", s.median);
    println!("  std dev        {:>16.0}", s.std_dev);
    println!("  success rate   {:>15.1}%", s.success_rate * 100.0);
    println!("  median CAGR    {:>15.2}%", s.median_cagr * 100.0);
    print_percentile_header("");
    print_percentile_row("Terminal", &out.terminal, 1.0);

    print_year_curve("Value by year", &out.by_year);

    if let Some(l) = &out.leverage {
        print_year_curve("Loan balance by year", &l.loan_by_year);
        println!("\n=== Leverage ===");
        println!("  forced liquidation rate {:>7.1}%", l.forced_liquidation_rate * 100.0);
        println!("  failure rate            {:>7.1}%", l.failure_rate * 100.0);
        println!("  median interest         {:>16.0}", l.median_interest);
        println!("  median haircut          {:>16.0}", l.median_haircut);
        println!("  median borrowed tax     {:>16.0}", l.median_borrowed_tax);
        if let Some(total) = l.cumulative_withdrawals.last() {
            println!("  cumulative withdrawals  {total:>16.0}");
        }
    }
    if let Some(m) = &out.margin_calls {
        println!("\n=== Margin calls (any year: {:.1}%) ===", m.probability * 100.0);
        println!("{:>4} | {:>8} | {:>8} | {:>10}", "Year", "First#", "P(call)%", "Cumul.%");
        for (y, first) in m.first_call_histogram.iter().enumerate() {
            println!(
                "{:>4} | {:>8} | {:>7.1}% | {:>9.1}%",
                y + 1,
                first,
                m.probability_by_year[y] * 100.0,
                m.cumulative_probability[y] * 100.0
            );
        }
    }
    if let Some(b) = &out.baseline {
        println!("\n=== Baseline (sell to fund withdrawals) ===");
        println!("  success rate            {:>7.1}%", b.success_rate * 100.0);
        println!("  depletion probability   {:>7.1}%", b.depletion_probability * 100.0);
        println!("  median capital gains tax{:>16.0}", b.median_capital_gains_tax);
        println!("  median dividend tax     {:>16.0}", b.median_dividend_tax);
        print_percentile_header("");
        print_percentile_row("Terminal", &b.terminal, 1.0);
    }
    if let Some(e) = &out.estate {
        println!("\n=== Estate (medians) ===");
        println!("  borrow, stepped-up basis {:>16.0}", e.leveraged_estate);
        println!("  sell, after gains tax    {:>16.0}", e.baseline_estate);
        println!("  advantage                {:>16.0}", e.advantage);
    }
    println!(
        "\n  margin calls {} | forced sales {} | failed iterations {} | max LTV {:.3} | unbounded LTV years {}",
        d.margin_calls, d.forced_liquidations, d.failed_iterations, d.max_ltv, d.unbounded_ltv_years
    );
}

fn print_runs(outputs: &[SimulationOutput], start_seed: u64) {
    println!(
        "{:>8} | {:>16} | {:>9} | {:>8}",
        "Seed", "Median terminal", "Success%", "CAGR%"
    );
    println!("{}", "-".repeat(8 + 3 + 16 + 3 + 9 + 3 + 8));
    for (k, out) in outputs.iter().enumerate() {
        println!(
            "{:>8} | {:>16.0} | {:>8.1}% | {:>7.2}%",
            simulation::seed_for_run(start_seed, k as u64),
            out.summary.median,
            out.summary.success_rate * 100.0,
            out.summary.median_cagr * 100.0
        );
    }
}
