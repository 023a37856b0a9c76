//! CPU-pinned batch transcription orchestrator.
//!
//! The same binary runs in two modes. By default it orchestrates a batch:
//! build or load the audio catalog, balance it across workers, launch one
//! pinned worker process per bin, sample telemetry and power while they
//! run, and log the QoS summary at the end. With the worker sentinel as
//! first argument it runs the worker loop instead; the supervisor is the
//! only caller of that mode.

use std::env;
use std::path::Path;
use std::process;
use std::sync::Arc;

use tracing::{error, info, warn};

use pinbatch::balance;
use pinbatch::catalog::{self, AudioJob, CommandDurationProbe};
use pinbatch::config::Config;
use pinbatch::constants::worker::{WORKER_EXIT_FAILURE, WORKER_SENTINEL};
use pinbatch::error::Result;
use pinbatch::qos::MetricsCalculator;
use pinbatch::telemetry::{PowerMonitor, TelemetryMonitor};
use pinbatch::worker::{runner, WorkerSupervisor};

#[tokio::main]
async fn main() {
    init_tracing();

    if env::args().nth(1).as_deref() == Some(WORKER_SENTINEL) {
        if let Err(e) = runner::run().await {
            error!("Worker failed: {}", e);
            process::exit(WORKER_EXIT_FAILURE);
        }
        return;
    }

    if let Err(e) = orchestrate().await {
        error!("Batch run failed: {}", e);
        process::exit(1);
    }
}

/// Logs go to stderr: worker stdout carries the event protocol.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn orchestrate() -> Result<()> {
    let config = Arc::new(Config::load()?);
    info!(
        "Batch transcription starting ({} workers, engine {})",
        config.worker_count, config.engine_command
    );

    let jobs = load_or_scan_catalog(&config)?;
    if jobs.is_empty() {
        warn!("No audio files to process");
        return Ok(());
    }

    let distribution = balance::distribute(jobs, config.worker_count, config.capacity_cap());

    let metrics = Arc::new(MetricsCalculator::new());
    info!("Run id {}", metrics.run_id());
    metrics.start_session();

    let mut telemetry = TelemetryMonitor::new(config.monitoring_interval, Path::new("."));
    if config.monitoring_enabled {
        telemetry.start()?;
    }
    let mut power = PowerMonitor::new(&config, Path::new("."));
    if config.power_enabled {
        power.start()?;
    }

    let supervisor = WorkerSupervisor::new(config.clone(), metrics.clone());
    let assignments = supervisor.build_assignments(&distribution)?;
    let stats = supervisor.run(assignments).await?;

    metrics.end_session();
    telemetry.stop().await;
    power.stop().await;

    if stats.interrupted {
        warn!("Run interrupted, the summary covers jobs finished so far");
    }
    if metrics.record_count() == 0 {
        warn!("No in-process records, rebuilding metrics from tracker files");
        match metrics.import_from_trackers(&config.trackers_dir) {
            Ok(count) => info!("Recovered {} entries from trackers", count),
            Err(e) => warn!("Tracker recovery failed: {}", e),
        }
    }

    for line in metrics.summary().to_string().lines() {
        info!("{}", line);
    }
    info!(
        "Batch complete: {} workers launched, {} jobs ok, {} failed, {} workers crashed",
        stats.launched, stats.completed_jobs, stats.failed_jobs, stats.crashed_workers
    );
    Ok(())
}

/// Load the catalog when it exists, otherwise scan the input directory,
/// probe durations and persist the result for the next run.
fn load_or_scan_catalog(config: &Config) -> Result<Vec<AudioJob>> {
    if config.catalog_path.exists() {
        info!("Loading catalog {}", config.catalog_path.display());
        return catalog::read_csv(&config.catalog_path);
    }

    info!(
        "Catalog {} not found, scanning {}",
        config.catalog_path.display(),
        config.input_dir.display()
    );
    let probe = CommandDurationProbe::new(&config.probe_command);
    let jobs = catalog::scan_dir(&config.input_dir, &config.audio_extensions, &probe)?;
    catalog::write_csv(&jobs, &config.catalog_path)?;
    info!("Catalog written to {}", config.catalog_path.display());
    Ok(jobs)
}
