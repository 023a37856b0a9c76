//! System resource monitoring.
//!
//! One tokio task per resource kind (CPU, memory, disk I/O) appends to a
//! timestamped CSV series. Power accounting lives in [`power`] behind its
//! own lifecycle handle; its final summary feeds the end-of-run recap.
//! Shutdown is bounded: every task gets a grace period to finish its
//! current cycle, then is aborted.

mod cpu;
mod disk;
mod memory;
pub mod power;
pub mod series;

pub use power::{PowerMonitor, PowerSummary};
pub use series::SeriesWriter;

use std::path::{Path, PathBuf};
use std::time::Duration;

use sysinfo::System;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::constants::telemetry::{
    CPU_SAMPLE_WINDOW_MS, CPU_SERIES_FILE, CPU_SERIES_HEADER, IO_SERIES_FILE, IO_SERIES_HEADER,
    MEMORY_SERIES_FILE, MEMORY_SERIES_HEADER, STOP_GRACE_SECS,
};
use crate::error::Result;

/// Point-in-time CPU and memory reading.
#[derive(Debug, Clone, Copy)]
pub struct SystemSnapshot {
    pub cpu_percent: f32,
    pub memory_percent: f64,
    pub memory_used_gb: f64,
    pub memory_total_gb: f64,
}

/// Measure current CPU and memory usage, independent of any running
/// sampler. Spans the one second window CPU percentages need.
pub async fn snapshot() -> SystemSnapshot {
    let mut system = System::new();
    system.refresh_cpu_usage();
    tokio::time::sleep(Duration::from_millis(CPU_SAMPLE_WINDOW_MS)).await;
    system.refresh_cpu_usage();
    system.refresh_memory();

    let total = system.total_memory();
    let used = system.used_memory();
    SystemSnapshot {
        cpu_percent: system.global_cpu_usage(),
        memory_percent: if total > 0 {
            used as f64 / total as f64 * 100.0
        } else {
            0.0
        },
        memory_used_gb: memory::to_gb(used),
        memory_total_gb: memory::to_gb(total),
    }
}

/// Lifecycle handle over the resource sampling tasks.
pub struct TelemetryMonitor {
    interval: Duration,
    output_dir: PathBuf,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl TelemetryMonitor {
    pub fn new(interval: Duration, output_dir: &Path) -> Self {
        Self {
            interval,
            output_dir: output_dir.to_path_buf(),
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Create the series files and start one sampling task per resource.
    /// Starting twice is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let cpu_writer =
            SeriesWriter::create(&self.output_dir.join(CPU_SERIES_FILE), CPU_SERIES_HEADER)?;
        let memory_writer = SeriesWriter::create(
            &self.output_dir.join(MEMORY_SERIES_FILE),
            MEMORY_SERIES_HEADER,
        )?;
        let io_writer =
            SeriesWriter::create(&self.output_dir.join(IO_SERIES_FILE), IO_SERIES_HEADER)?;

        self.cancel = CancellationToken::new();
        self.handles.push(tokio::spawn(cpu::sample_loop(
            cpu_writer,
            self.interval,
            self.cancel.clone(),
        )));
        self.handles.push(tokio::spawn(memory::sample_loop(
            memory_writer,
            self.interval,
            self.cancel.clone(),
        )));
        self.handles.push(tokio::spawn(disk::sample_loop(
            io_writer,
            self.interval,
            self.cancel.clone(),
        )));

        info!(
            "Telemetry monitoring started ({}s interval)",
            self.interval.as_secs()
        );
        Ok(())
    }

    /// Stop all sampling tasks, aborting any that outlive the grace
    /// period.
    pub async fn stop(&mut self) {
        if !self.is_running() {
            return;
        }

        self.cancel.cancel();
        for mut handle in self.handles.drain(..) {
            match tokio::time::timeout(Duration::from_secs(STOP_GRACE_SECS), &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Telemetry task ended abnormally: {}", e),
                Err(_) => {
                    warn!(
                        "Telemetry task did not stop within {}s, aborting it",
                        STOP_GRACE_SECS
                    );
                    handle.abort();
                }
            }
        }
        info!("Telemetry monitoring stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_creates_series_and_stop_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = TelemetryMonitor::new(Duration::from_secs(3600), dir.path());
        assert!(!monitor.is_running());

        monitor.start().unwrap();
        assert!(monitor.is_running());
        assert!(dir.path().join(CPU_SERIES_FILE).exists());
        assert!(dir.path().join(MEMORY_SERIES_FILE).exists());
        assert!(dir.path().join(IO_SERIES_FILE).exists());

        monitor.stop().await;
        assert!(!monitor.is_running());

        let header = std::fs::read_to_string(dir.path().join(CPU_SERIES_FILE)).unwrap();
        assert!(header.starts_with("Timestamp,CPU_Usage_Percent"));
    }

    #[tokio::test]
    async fn double_start_keeps_one_task_set() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = TelemetryMonitor::new(Duration::from_secs(3600), dir.path());
        monitor.start().unwrap();
        let running = monitor.handles.len();
        monitor.start().unwrap();
        assert_eq!(monitor.handles.len(), running);
        monitor.stop().await;
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = TelemetryMonitor::new(Duration::from_secs(1), dir.path());
        monitor.stop().await;
        assert!(!monitor.is_running());
    }

    #[tokio::test]
    async fn snapshot_reports_sane_values() {
        let snapshot = snapshot().await;
        assert!(snapshot.cpu_percent >= 0.0);
        assert!(snapshot.memory_total_gb > 0.0);
        assert!(snapshot.memory_percent >= 0.0 && snapshot.memory_percent <= 100.0);
    }
}
