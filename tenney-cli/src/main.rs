//! # tenney - Just-Intonation Tuner
//!
//! Command-line front-end for `tenney-core`.
//!
//! ## Architecture
//! - **Audio Thread**: cpal callback writing into the capture ring
//! - **Analysis Thread**: single-flight analysis of the newest frame
//! - **Main Thread**: prints results as they arrive on the result channel

mod capture;
mod replay;
mod report;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tenney_core::pipeline::AnalysisPipeline;
use tenney_core::smoothing::SmootherKind;
use tenney_core::{PrimeLimit, RatioSolver, Strictness, TunerConfig, TunerSession};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "tenney")]
#[command(author, version, about = "Just-intonation tuner", long_about = None)]
struct Cli {
    #[command(flatten)]
    tuning: TuningArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Settings shared by every subcommand; flags override the config file.
#[derive(Args)]
struct TuningArgs {
    /// JSON configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Root frequency in Hz
    #[arg(long, global = true)]
    root: Option<f64>,

    /// Prime limit (3, 5, 7, 11 or 13)
    #[arg(long, global = true)]
    limit: Option<PrimeLimit>,

    /// Strictness preset (loose, performance or strict)
    #[arg(long, global = true)]
    strictness: Option<Strictness>,

    /// Frequency smoother (kalman or pll)
    #[arg(long, global = true)]
    smoother: Option<SmootherKind>,
}

#[derive(Subcommand)]
enum Commands {
    /// Tune live from the default input device
    Listen {
        /// Preferred device sample rate
        #[arg(long, default_value = "48000")]
        device_rate: u32,

        /// Minimum time between printed lines, in milliseconds
        #[arg(long, default_value = "100")]
        interval_ms: u64,
    },

    /// Replay a WAV file through the tuner
    Analyze {
        /// Input WAV file
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },

    /// Print the unit-octave ratio table for the prime limit
    Ratios,
}

fn main() -> Result<()> {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.tuning)?;
    info!(
        root_hz = config.root_hz,
        limit = %config.prime_limit,
        strictness = %config.strictness,
        smoother = %config.smoother,
        "tuner configured"
    );

    match cli.command {
        Commands::Listen {
            device_rate,
            interval_ms,
        } => listen(config, device_rate, Duration::from_millis(interval_ms)),
        Commands::Analyze { input } => analyze(config, &input),
        Commands::Ratios => {
            print_ratios(&config);
            Ok(())
        }
    }
}

/// Reads the config file, if any, and applies flag overrides.
fn load_config(args: &TuningArgs) -> Result<TunerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let data = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&data)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => TunerConfig::default(),
    };
    if let Some(root) = args.root {
        config.root_hz = root;
    }
    if let Some(limit) = args.limit {
        config.prime_limit = limit;
    }
    if let Some(strictness) = args.strictness {
        config.strictness = strictness;
        config.custom_profile = None;
    }
    if let Some(smoother) = args.smoother {
        config.smoother = smoother;
    }
    Ok(config.sanitized())
}

fn listen(config: TunerConfig, device_rate: u32, interval: Duration) -> Result<()> {
    let solver = Arc::new(RatioSolver::new(config.solver));
    let capture = capture::start_capture(&config.capture, device_rate)?;
    info!(sample_rate = capture.sample_rate, "listening; press Ctrl-C to stop");

    let session = TunerSession::new(config, solver);
    let (pipeline, results) = AnalysisPipeline::new(session, capture.frames, 16);

    thread::Builder::new()
        .name("analysis".into())
        .spawn(move || analysis_loop(&pipeline))
        .context("spawning analysis thread")?;

    let mut last_printed: Option<Duration> = None;
    for result in results.iter() {
        if result.frequency.is_none() {
            continue;
        }
        let due = last_printed.is_none_or(|last| result.timestamp.saturating_sub(last) >= interval);
        let switched = result.resolution.as_ref().is_some_and(|r| r.switched);
        if due || switched {
            println!("{}", report::format_result(&result));
            last_printed = Some(result.timestamp);
        }
    }
    // The result channel closes only if the analysis thread exits.
    drop(capture.stream);
    Ok(())
}

/// Analyzes frames as the capture thread signals them.
fn analysis_loop(pipeline: &AnalysisPipeline) {
    let mut reported_drops = 0;
    loop {
        if pipeline.wait_for_frame(Duration::from_millis(250)) {
            pipeline.try_analyze();
        }
        let dropped = pipeline.frames().dropped_frames();
        if dropped > reported_drops {
            debug!(dropped, "capture frames dropped so far");
            reported_drops = dropped;
        }
    }
}

fn analyze(config: TunerConfig, input: &Path) -> Result<()> {
    let (samples, sample_rate) = replay::read_mono(input)?;
    info!(
        file = %input.display(),
        sample_rate,
        seconds = samples.len() as f64 / sample_rate.max(1) as f64,
        "replaying"
    );
    let solver = Arc::new(RatioSolver::new(config.solver));
    let count = replay::replay(&samples, sample_rate, config, solver, |result| {
        println!("{}", report::format_result(result));
    });
    info!(frames = count, "replay finished");
    Ok(())
}

fn print_ratios(config: &TunerConfig) {
    let solver = RatioSolver::new(config.solver);
    let table = solver.unit_ratios(config.prime_limit);
    println!("{} unit ratios ({} shown)", config.prime_limit, table.len());
    println!("{:>7}  {:>8}  {:>9}  {:>3}  {:>6}", "ratio", "value", "cents", "n+d", "tenney");
    for unit in table.iter() {
        println!("{}", report::format_unit_ratio(unit));
    }
}
