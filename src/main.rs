use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rtstat::analysis::AnalyserFactory;
use rtstat::generator::{self, LoadProfile};
use rtstat::{
    AnalysisConfig, CounterStorePair, RequestCounter, ResponseTimeSummary, Result, StoreFactory,
};

/// Feed a synthetic request stream through the analytics engine and print
/// one JSON summary per counter.
#[derive(Debug, Parser)]
#[command(name = "rtstat", version)]
struct Args {
    /// JSON analysis configuration; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of synthetic requests to generate
    #[arg(long, default_value_t = 10_000)]
    requests: u64,

    /// Average gap between requests in milliseconds
    #[arg(long, default_value_t = 25)]
    mean_gap_millis: i64,

    /// Seed for the request generator
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "analysis failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    // ── 1. Configuration ─────────────────────────────────────────
    let config = match &args.config {
        Some(path) => AnalysisConfig::from_path(path)?,
        None => AnalysisConfig::default(),
    };
    let period = config.analysis_period()?;
    info!(storage = ?config.storage.kind, %period, "configuration loaded");

    // ── 2. Ingest ────────────────────────────────────────────────
    let mut counters = CounterStorePair::new(
        StoreFactory::new(config.storage.clone())?,
        config.effective_max_unique_counters(),
    );
    let span = args.requests as i64 * args.mean_gap_millis.max(0);
    let profile = LoadProfile {
        requests: args.requests,
        start: period.start().unwrap_or_else(|| Utc::now().timestamp_millis() - span),
        mean_gap_millis: args.mean_gap_millis,
        seed: args.seed,
    };
    for request in generator::generate(profile) {
        counters.add(
            &request.key,
            request.timestamp,
            request.duration_millis,
            request.success,
        )?;
    }
    let successes = counters.success().total_hits()?;
    let failures = counters.failure().total_hits()?;
    info!(successes, failures, counters = counters.success().len(), "ingested requests");

    // ── 3. Analyse ───────────────────────────────────────────────
    let factory = AnalyserFactory::from_config(&config);
    let mut summaries = Vec::new();
    for key in counters.keys() {
        let success = counters
            .success()
            .counter(&key)
            .unwrap_or(RequestCounter::empty());
        let analyser = factory.create(success, counters.failure_counter(&key), &period)?;
        summaries.push(ResponseTimeSummary::from_analyser(
            &analyser,
            &config.report_percentiles,
            successes + failures,
        )?);
    }

    // ── 4. Report ────────────────────────────────────────────────
    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(())
}
