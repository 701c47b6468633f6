//! Top-level CLI definition and dispatch.

use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use mobileload::core::config::{LoadTestConfig, SAMPLE_CONFIG};
use mobileload::core::errors::MlxError;
use mobileload::driver::simulated::{SimulatedDriver, SimulatedProbe, SimulationConfig};
use mobileload::engine::ramp::target_concurrency;
use mobileload::engine::run::{LoadTest, RunContext};
use mobileload::logger::activity::{ActivityLoggerConfig, spawn_logger};
use mobileload::metrics::report::RunReport;
use mobileload::metrics::thresholds::ThresholdResult;

/// mobileload: concurrent virtual users against mobile apps, gated on thresholds.
#[derive(Debug, Parser)]
#[command(
    name = "mlx",
    author,
    version,
    about = "Mobile app load testing: ramp virtual users, aggregate metrics, gate on thresholds",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Load and validate a test plan, then describe it.
    Validate(ValidateArgs),
    /// Run a test plan against the simulated driver.
    Simulate(SimulateArgs),
    /// Print the target-concurrency schedule for a ramp.
    Ramp(RampArgs),
    /// Write a sample test plan.
    Init(InitArgs),
    /// Re-check thresholds from a saved JSON run report.
    Verify(VerifyArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct ConfigArg {
    /// Test plan file (TOML, or JSON with a `.json` extension).
    #[arg(long, short, value_name = "PATH")]
    config: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct ValidateArgs {
    #[command(flatten)]
    config: ConfigArg,
}

#[derive(Debug, Clone, Args)]
struct SimulateArgs {
    #[command(flatten)]
    config: ConfigArg,
    /// Mean per-action latency; each action sleeps uniformly in [N/2, 3N/2].
    #[arg(long, default_value_t = 70, value_name = "MS")]
    latency_ms: u64,
    /// Probability that a single action fails.
    #[arg(long, default_value_t = 0.02, value_name = "RATE", value_parser = parse_rate)]
    action_failure_rate: f64,
    /// Probability that opening a session fails.
    #[arg(long, default_value_t = 0.0, value_name = "RATE", value_parser = parse_rate)]
    session_failure_rate: f64,
    /// Write the full JSON run report here.
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct RampArgs {
    /// Population ceiling.
    #[arg(long, value_name = "N")]
    max_users: usize,
    /// Linear ramp window.
    #[arg(long, default_value_t = 0, value_name = "SECONDS")]
    ramp_up_secs: u64,
    /// Schedule length; defaults to the ramp window.
    #[arg(long, value_name = "SECONDS")]
    duration_secs: Option<u64>,
}

#[derive(Debug, Clone, Args)]
struct InitArgs {
    /// Where to write the sample plan.
    #[arg(long, default_value = "mlx.toml", value_name = "PATH")]
    path: PathBuf,
    /// Overwrite an existing file.
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Clone, Args)]
struct VerifyArgs {
    /// JSON report written by `mlx simulate --report`.
    #[arg(long, value_name = "PATH")]
    report: PathBuf,
    /// Exit non-zero when any threshold failed.
    #[arg(long)]
    fail_on_threshold: bool,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or test plan.
    #[error("{0}")]
    User(String),
    /// One or more thresholds failed.
    #[error("{0}")]
    ThresholdsFailed(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) | Self::ThresholdsFailed(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
        }
    }
}

impl From<MlxError> for CliError {
    fn from(err: MlxError) -> Self {
        if err.is_config_error() {
            Self::User(err.to_string())
        } else {
            Self::Runtime(err.to_string())
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Validate(args) => run_validate(cli, args),
        Command::Simulate(args) => run_simulate(cli, args),
        Command::Ramp(args) => run_ramp(cli, args),
        Command::Init(args) => run_init(cli, args),
        Command::Verify(args) => run_verify(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn parse_rate(raw: &str) -> Result<f64, String> {
    let rate: f64 = raw.parse().map_err(|e: std::num::ParseFloatError| e.to_string())?;
    if (0.0..=1.0).contains(&rate) {
        Ok(rate)
    } else {
        Err(format!("rate must be within [0, 1], got {rate}"))
    }
}

// ──────────────────── validate ────────────────────

fn run_validate(cli: &Cli, args: &ValidateArgs) -> Result<(), CliError> {
    let config = LoadTestConfig::load(&args.config.config)?;
    let hash = config.stable_hash()?;
    let unknown: Vec<&str> = config.unknown_thresholds().collect();
    let total_weight: u64 = config.scenarios.iter().map(|s| u64::from(s.weight)).sum();

    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "{} {} ({})",
                "valid".green().bold(),
                config.test.name.bold(),
                args.config.config.display()
            );
            println!(
                "  duration {}s, up to {} users, ramp {}s, tick {}ms",
                config.test.duration_secs,
                config.virtual_users.max,
                config.virtual_users.ramp_up_secs,
                config.virtual_users.tick_ms,
            );
            for platform in &config.platforms {
                let devices = if platform.devices.is_empty() {
                    "any device".to_string()
                } else {
                    platform.devices.join(", ")
                };
                println!("  platform {} app={} [{devices}]", platform.kind, platform.app);
            }
            for scenario in &config.scenarios {
                let share = scenario_share(scenario.weight, total_weight);
                println!(
                    "  scenario {:<24} weight {:>4} ({share:>5.1}%)  {} actions",
                    scenario.name,
                    scenario.weight,
                    scenario.actions.len()
                );
            }
            for (name, limit) in &config.thresholds {
                println!("  threshold {name} = {limit}");
            }
            for name in &unknown {
                eprintln!(
                    "{} unknown threshold {name:?} will be reported as unknown",
                    "warning:".yellow()
                );
            }
            println!("  config hash {hash}");
        }
        OutputMode::Json => {
            let scenarios: Vec<Value> = config
                .scenarios
                .iter()
                .map(|s| {
                    json!({
                        "name": s.name,
                        "weight": s.weight,
                        "share_pct": scenario_share(s.weight, total_weight),
                        "actions": s.actions.len(),
                    })
                })
                .collect();
            let payload = json!({
                "command": "validate",
                "status": "ok",
                "path": args.config.config.to_string_lossy(),
                "test_name": config.test.name,
                "duration_secs": config.test.duration_secs,
                "max_users": config.virtual_users.max,
                "ramp_up_secs": config.virtual_users.ramp_up_secs,
                "platforms": serde_json::to_value(&config.platforms)?,
                "scenarios": scenarios,
                "thresholds": config.thresholds,
                "unknown_thresholds": unknown,
                "config_hash": hash,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn scenario_share(weight: u32, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        f64::from(weight) / total as f64 * 100.0
    }
}

// ──────────────────── simulate ────────────────────

fn run_simulate(cli: &Cli, args: &SimulateArgs) -> Result<(), CliError> {
    let config = LoadTestConfig::load(&args.config.config)?;
    let plan = config.to_plan()?;

    let (logger, logger_join) = spawn_logger(ActivityLoggerConfig {
        jsonl_config: config.logging.jsonl_config(),
        ..ActivityLoggerConfig::default()
    })?;

    let (min_latency, max_latency) = latency_range(args.latency_ms);
    let driver = SimulatedDriver::new(SimulationConfig {
        min_latency,
        max_latency,
        action_failure_rate: args.action_failure_rate,
        session_failure_rate: args.session_failure_rate,
    });
    let ctx = RunContext::new(Arc::new(driver))
        .with_probe(Arc::new(SimulatedProbe::default()))
        .with_logger(logger.clone());

    let test = LoadTest::new(plan);
    test.stop_signal().install_os_handlers();
    if output_mode(cli) == OutputMode::Human {
        eprintln!(
            "[MLX-RUN] {}: {} users over {}s, ramp {}s (Ctrl-C stops early)",
            config.test.name,
            config.virtual_users.max,
            config.test.duration_secs,
            config.virtual_users.ramp_up_secs,
        );
    }
    let result = test.run(&ctx);

    logger.shutdown();
    let dropped = logger.dropped_events();
    if logger_join.join().is_err() {
        eprintln!("[MLX-LOG] logger thread panicked");
    }
    if dropped > 0 {
        eprintln!("[MLX-LOG] {dropped} activity events dropped");
    }

    let report = result?;
    if let Some(path) = &args.report {
        report.write_json(path)?;
    }

    match output_mode(cli) {
        OutputMode::Human => {
            print_report_human(&report);
            if let Some(path) = &args.report {
                println!("report written to {}", path.display());
            }
        }
        OutputMode::Json => {
            write_json_line(&serde_json::to_value(&report)?)?;
        }
    }

    if report.passed {
        Ok(())
    } else {
        Err(CliError::ThresholdsFailed(format!(
            "{} of {} thresholds failed",
            failed_thresholds(&report.threshold_results),
            report.threshold_results.len()
        )))
    }
}

/// Uniform range centered on `mean_ms`.
fn latency_range(mean_ms: u64) -> (Duration, Duration) {
    let half = mean_ms / 2;
    (
        Duration::from_millis(mean_ms - half),
        Duration::from_millis(mean_ms.saturating_add(half)),
    )
}

fn failed_thresholds(results: &[ThresholdResult]) -> usize {
    results.iter().filter(|r| r.passed == Some(false)).count()
}

fn format_ms(secs: f64) -> String {
    format!("{:.1}ms", secs * 1000.0)
}

fn print_report_human(report: &RunReport) {
    let s = &report.summary;
    let how = if report.stopped_early {
        "stopped early"
    } else {
        "deadline reached"
    };
    println!(
        "{} finished in {:.1}s ({how})",
        report.test_name.bold(),
        report.duration_secs
    );
    println!(
        "  users: peak {} of {}, {} workers, {} failed to start",
        report.peak_active_users,
        report.max_virtual_users,
        report.workers.len(),
        report.failed_starts().count()
    );
    println!(
        "  iterations: {} total, {} ok, {} failed ({:.2}% errors)",
        s.total_actions, s.successful_actions, s.failed_actions, s.error_rate
    );
    let rt = &s.response_time;
    println!(
        "  response time: min {} median {} p95 {} p99 {} max {}",
        format_ms(rt.min),
        format_ms(rt.median),
        format_ms(rt.p95),
        format_ms(rt.p99),
        format_ms(rt.max)
    );
    println!(
        "  device: avg cpu {:.1}% ({} samples), avg memory {:.1} MB, peak {:.1} MB",
        s.device.avg_cpu, s.device.cpu_samples, s.device.avg_memory, s.device.peak_memory
    );
    for (name, stats) in &s.scenarios {
        println!(
            "  scenario {name:<24} {:>6} runs {:>5} failed  avg {}",
            stats.count,
            stats.failures,
            format_ms(stats.avg_duration)
        );
    }
    print_thresholds_human(&report.threshold_results);
    let verdict = if report.passed {
        "PASS".green().bold()
    } else {
        "FAIL".red().bold()
    };
    println!("result: {verdict}");
}

fn print_thresholds_human(results: &[ThresholdResult]) {
    if results.is_empty() {
        println!("  thresholds: none configured");
        return;
    }
    println!("  thresholds:");
    for result in results {
        let (tag, observed) = match (result.passed, result.observed) {
            (Some(true), Some(obs)) => ("pass".green(), format!("{obs:.2}")),
            (Some(false), Some(obs)) => ("FAIL".red(), format!("{obs:.2}")),
            _ => ("????".yellow(), "unknown metric".to_string()),
        };
        println!(
            "    {tag} {:<20} observed {observed:<14} limit {:.2}",
            result.metric, result.limit
        );
    }
}

// ──────────────────── ramp ────────────────────

/// `(second, target)` for every whole second in `[0, duration]`.
fn ramp_schedule(max_users: usize, ramp_up_secs: u64, duration_secs: u64) -> Vec<(u64, usize)> {
    let window = Duration::from_secs(ramp_up_secs);
    (0..=duration_secs)
        .map(|t| (t, target_concurrency(Duration::from_secs(t), window, max_users)))
        .collect()
}

fn run_ramp(cli: &Cli, args: &RampArgs) -> Result<(), CliError> {
    let duration = args.duration_secs.unwrap_or(args.ramp_up_secs);
    let schedule = ramp_schedule(args.max_users, args.ramp_up_secs, duration);

    match output_mode(cli) {
        OutputMode::Human => {
            println!("{:>8}  {:>7}", "second", "target");
            for (t, n) in &schedule {
                println!("{t:>8}  {n:>7}");
            }
        }
        OutputMode::Json => {
            let rows: Vec<Value> = schedule
                .iter()
                .map(|(t, n)| json!({"second": t, "target": n}))
                .collect();
            write_json_line(&json!({
                "command": "ramp",
                "max_users": args.max_users,
                "ramp_up_secs": args.ramp_up_secs,
                "schedule": rows,
            }))?;
        }
    }
    Ok(())
}

// ──────────────────── init ────────────────────

fn run_init(cli: &Cli, args: &InitArgs) -> Result<(), CliError> {
    write_sample_config(&args.path, args.force)?;
    match output_mode(cli) {
        OutputMode::Human => println!("wrote sample test plan to {}", args.path.display()),
        OutputMode::Json => write_json_line(&json!({
            "command": "init",
            "status": "ok",
            "path": args.path.to_string_lossy(),
        }))?,
    }
    Ok(())
}

fn write_sample_config(path: &Path, force: bool) -> Result<(), CliError> {
    if path.exists() && !force {
        return Err(CliError::User(format!(
            "{} already exists; pass --force to overwrite",
            path.display()
        )));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, SAMPLE_CONFIG)?;
    Ok(())
}

// ──────────────────── verify ────────────────────

fn run_verify(cli: &Cli, args: &VerifyArgs) -> Result<(), CliError> {
    let raw = fs::read_to_string(&args.report).map_err(|e| {
        CliError::User(format!("cannot read report {}: {e}", args.report.display()))
    })?;
    let report: RunReport = serde_json::from_str(&raw).map_err(|e| {
        CliError::User(format!("{} is not a run report: {e}", args.report.display()))
    })?;
    let failed = failed_thresholds(&report.threshold_results);

    match output_mode(cli) {
        OutputMode::Human => {
            println!("{} ({})", report.test_name.bold(), report.started_at.to_rfc3339());
            print_thresholds_human(&report.threshold_results);
            let verdict = if report.passed {
                "PASS".green().bold()
            } else {
                "FAIL".red().bold()
            };
            println!("result: {verdict}");
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "verify",
            "test_name": report.test_name,
            "passed": report.passed,
            "failed": failed,
            "threshold_results": serde_json::to_value(&report.threshold_results)?,
        }))?,
    }

    if args.fail_on_threshold && !report.passed {
        return Err(CliError::ThresholdsFailed(format!(
            "{failed} of {} thresholds failed",
            report.threshold_results.len()
        )));
    }
    Ok(())
}

// ──────────────────── output ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("MLX_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
