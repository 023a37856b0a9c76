//! CPU utilization sampling task.

use std::time::Duration;

use metrics::gauge;
use sysinfo::System;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::constants::telemetry::CPU_SAMPLE_WINDOW_MS;
use crate::telemetry::series::SeriesWriter;

/// Sample global CPU usage once per interval until cancelled.
///
/// Each sample spans a one second window between two refreshes, the
/// spacing sysinfo needs before usage percentages mean anything.
pub(super) async fn sample_loop(
    mut writer: SeriesWriter,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut system = System::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let window = Duration::from_millis(CPU_SAMPLE_WINDOW_MS);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        system.refresh_cpu_usage();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(window) => {}
        }
        system.refresh_cpu_usage();

        let usage = system.global_cpu_usage();
        gauge!("pinbatch_cpu_usage_percent").set(usage as f64);
        if let Err(e) = writer.append(&[format!("{:.2}", usage)]) {
            error!("CPU sampling stopped: {}", e);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::telemetry::CPU_SERIES_HEADER;

    #[tokio::test]
    async fn cancelled_loop_writes_no_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitoring_cpu.csv");
        let writer = SeriesWriter::create(&path, CPU_SERIES_HEADER).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        sample_loop(writer, Duration::from_millis(10), cancel).await;

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[tokio::test]
    async fn one_sample_lands_after_the_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitoring_cpu.csv");
        let writer = SeriesWriter::create(&path, CPU_SERIES_HEADER).unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(sample_loop(writer, Duration::from_secs(3600), cancel.clone()));
        tokio::time::sleep(Duration::from_millis(CPU_SAMPLE_WINDOW_MS + 300)).await;
        cancel.cancel();
        task.await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].matches(',').count(), 1);
    }
}
