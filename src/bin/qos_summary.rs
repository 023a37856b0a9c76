//! Standalone QoS recap from tracker files.
//!
//! Reads the tracker directory of a finished (or crashed) run and prints
//! the same summary the orchestrator logs at the end of a batch, without
//! re-running anything. The tracker directory comes from the regular
//! configuration chain, so `PINBATCH_TRACKERS_DIR` selects another run.

use anyhow::{Context, Result};

use pinbatch::config::Config;
use pinbatch::qos::MetricsCalculator;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load().context("loading configuration")?;
    let metrics = MetricsCalculator::new();
    let imported = metrics
        .import_from_trackers(&config.trackers_dir)
        .with_context(|| {
            format!(
                "reading tracker files from {}",
                config.trackers_dir.display()
            )
        })?;

    if imported == 0 {
        eprintln!(
            "No progress entries found in {}",
            config.trackers_dir.display()
        );
    }
    println!("{}", metrics.summary());
    Ok(())
}
