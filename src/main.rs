//! afc-odx - batch origin-destination-interchange inference from AFC taps
//!
//! Reads a schedule feed and a day (or more) of boarding taps, infers
//! alightings, interchanges and journeys, and writes OD-X records plus an
//! aggregated OD matrix.
//!
//! Module structure:
//! - `domain/` - Core types (TapEvent, Leg, Journey, OdMatrix, ScheduleIndex)
//! - `io/` - Schedule feed, tap source and egress files
//! - `services/` - Inference pipeline (matcher, leg builder, classifier, assembler)
//! - `infra/` - Infrastructure (Config, Metrics, Timetable)

use afc_odx::infra::{Config, Metrics};
use afc_odx::io::{load_schedule, load_taps, write_matrix, Egress};
use afc_odx::services::{CancelToken, OdxEngine};
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// AFC ODX inference over a batch of taps
#[derive(Parser, Debug)]
#[command(name = "afc-odx", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/odx.toml")]
    config: String,

    /// Schedule feed (JSON)
    #[arg(short, long)]
    schedule: String,

    /// Tap records (JSON Lines)
    #[arg(short, long)]
    taps: String,

    /// Journey output file, overrides `output.journeys_file`
    #[arg(short, long)]
    output: Option<String>,

    /// OD matrix output file, overrides `output.matrix_file`
    #[arg(short, long)]
    matrix: Option<String>,

    /// Worker threads, overrides `run.workers` (0 = one per core)
    #[arg(short, long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-card issues
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("afc-odx starting");

    let args = Args::parse();

    let mut config = Config::load_from_path(&args.config);
    if let Some(path) = &args.output {
        config = config.with_journeys_file(path);
    }
    if let Some(path) = &args.matrix {
        config = config.with_matrix_file(path);
    }
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }

    info!(
        config_file = %config.config_file(),
        match_early_s = %config.match_time_tolerance_early(),
        match_late_s = %config.match_time_tolerance_late(),
        max_interchange_wait_s = %config.max_interchange_wait(),
        max_interchange_walk_m = %config.max_interchange_walk(),
        max_activity_duration_s = %config.max_activity_duration(),
        new_day_hour = %config.new_day_hour(),
        workers = %config.workers(),
        journeys_file = %config.journeys_file(),
        matrix_file = %config.matrix_file(),
        "config_loaded"
    );

    let schedule = Arc::new(load_schedule(&args.schedule)?);
    let batch = load_taps(&args.taps)?;
    let taps_skipped = batch.skipped;
    let taps = batch.taps;

    let metrics = Arc::new(Metrics::new());
    let engine = OdxEngine::new(schedule, config.clone(), metrics.clone());

    // Handle Ctrl+C: cards not yet started are skipped
    let cancel = CancelToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        signal_cancel.cancel();
    });

    let output = tokio::task::spawn_blocking(move || engine.run(taps, &cancel))
        .await
        .context("Inference worker panicked")??;

    let egress = Egress::new(config.journeys_file(), config.output_append());
    egress
        .write_journeys(&output.journeys)
        .with_context(|| format!("Failed to write journeys to {}", config.journeys_file()))?;
    write_matrix(config.matrix_file(), &output.matrix)
        .with_context(|| format!("Failed to write OD matrix to {}", config.matrix_file()))?;

    for failure in &output.failed {
        warn!(card_id = %failure.card_id(), error = %failure, "card_not_processed");
    }
    info!(
        taps_skipped = taps_skipped,
        journeys = output.journeys.len(),
        od_pairs = output.matrix.len(),
        unknown_destination = output.matrix.unknown_destination(),
        issues = output.issues.len(),
        failed_cards = output.failed.len(),
        cancelled_cards = output.cancelled,
        "batch_summary"
    );
    metrics.report().log();

    info!("afc-odx shutdown complete");
    Ok(())
}
