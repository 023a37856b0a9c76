//! Memory utilization sampling task.

use std::time::Duration;

use metrics::gauge;
use sysinfo::System;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::constants::telemetry::MEMORY_ALERT_PERCENT;
use crate::telemetry::series::SeriesWriter;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

pub(super) fn to_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB
}

/// Sample memory usage once per interval until cancelled. Crossing the
/// alert threshold logs a warning.
pub(super) async fn sample_loop(
    mut writer: SeriesWriter,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut system = System::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        system.refresh_memory();
        let total = system.total_memory();
        let used = system.used_memory();
        let percent = if total > 0 {
            used as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        if percent > MEMORY_ALERT_PERCENT {
            warn!(
                "Memory usage at {:.1}% ({:.2} GB of {:.2} GB)",
                percent,
                to_gb(used),
                to_gb(total)
            );
        }

        gauge!("pinbatch_memory_usage_percent").set(percent);
        let row = [
            format!("{:.2}", percent),
            format!("{:.2}", to_gb(used)),
            format!("{:.2}", to_gb(total)),
        ];
        if let Err(e) = writer.append(&row) {
            error!("Memory sampling stopped: {}", e);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::telemetry::MEMORY_SERIES_HEADER;

    #[test]
    fn gigabyte_conversion_is_binary() {
        assert!((to_gb(1024 * 1024 * 1024) - 1.0).abs() < 1e-9);
        assert!((to_gb(0)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn rows_carry_percent_used_and_total() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitoring_memory.csv");
        let writer = SeriesWriter::create(&path, MEMORY_SERIES_HEADER).unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(sample_loop(writer, Duration::from_secs(3600), cancel.clone()));
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        task.await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        // Timestamp plus three values.
        assert_eq!(lines[1].matches(',').count(), 3);
    }
}
