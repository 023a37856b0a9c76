//! Disk I/O sampling task.
//!
//! Rates come from deltas between cumulative kernel counters. On Linux
//! the counters are read from `/proc/diskstats`, restricted to whole
//! disks so partitions are not double counted, and occupancy is the
//! fraction of wall time the devices spent with I/O in flight. Elsewhere
//! (or when procfs is unreadable) byte counters come from `sysinfo` and
//! occupancy falls back to a byte-rate heuristic against an assumed
//! sequential throughput.

use std::time::{Duration, Instant};

use metrics::gauge;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::constants::telemetry::{ASSUMED_MAX_DISK_THROUGHPUT_MB_S, SECTOR_SIZE_BYTES};
use crate::telemetry::series::SeriesWriter;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Device name prefixes excluded from accounting (virtual or read-only
/// devices that would distort the totals).
const SKIP_PREFIXES: &[&str] = &["loop", "ram", "zram", "sr"];

/// Cumulative I/O counters summed over all physical disks.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(super) struct DiskCounters {
    pub read_ops: u64,
    pub write_ops: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    /// Milliseconds spent with I/O in flight, 0 when the source has none.
    pub busy_ms: u64,
}

/// Per-second rates derived from two counter snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(super) struct DiskRates {
    pub occupancy_percent: f64,
    pub read_mb_s: f64,
    pub write_mb_s: f64,
    pub read_ops_s: f64,
    pub write_ops_s: f64,
}

/// Sum `/proc/diskstats` rows over whole-disk devices.
///
/// Layout per row: major, minor, name, then the iostats fields. Reads
/// completed is field 4 of the row, sectors read field 6, writes
/// completed field 8, sectors written field 10, and milliseconds doing
/// I/O field 13. Sectors are fixed 512-byte units regardless of the
/// device's logical sector size.
pub(super) fn parse_diskstats<F>(content: &str, is_whole_disk: F) -> DiskCounters
where
    F: Fn(&str) -> bool,
{
    let mut counters = DiskCounters::default();
    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 13 {
            continue;
        }
        let name = parts[2];
        if SKIP_PREFIXES.iter().any(|prefix| name.starts_with(prefix)) {
            continue;
        }
        if !is_whole_disk(name) {
            continue;
        }

        counters.read_ops += parse_u64(parts[3]);
        counters.read_bytes += parse_u64(parts[5]) * SECTOR_SIZE_BYTES;
        counters.write_ops += parse_u64(parts[7]);
        counters.write_bytes += parse_u64(parts[9]) * SECTOR_SIZE_BYTES;
        counters.busy_ms += parse_u64(parts[12]);
    }
    counters
}

fn parse_u64(value: &str) -> u64 {
    value.parse().unwrap_or(0)
}

/// Convert two snapshots into rates over `elapsed_secs`.
///
/// Counter resets (reboot, hotplug) saturate to zero instead of
/// producing huge negative-wrapped rates. Occupancy uses busy time when
/// either snapshot carries it, the throughput heuristic otherwise; busy
/// time sums over devices, so the result is capped at 100.
pub(super) fn rates_between(
    previous: &DiskCounters,
    current: &DiskCounters,
    elapsed_secs: f64,
) -> DiskRates {
    if elapsed_secs <= 0.0 {
        return DiskRates::default();
    }

    let read_mb_s =
        current.read_bytes.saturating_sub(previous.read_bytes) as f64 / BYTES_PER_MB / elapsed_secs;
    let write_mb_s = current.write_bytes.saturating_sub(previous.write_bytes) as f64
        / BYTES_PER_MB
        / elapsed_secs;
    let read_ops_s = current.read_ops.saturating_sub(previous.read_ops) as f64 / elapsed_secs;
    let write_ops_s = current.write_ops.saturating_sub(previous.write_ops) as f64 / elapsed_secs;

    let occupancy_percent = if current.busy_ms > 0 || previous.busy_ms > 0 {
        let busy = current.busy_ms.saturating_sub(previous.busy_ms) as f64;
        (busy / (elapsed_secs * 1000.0) * 100.0).min(100.0)
    } else {
        ((read_mb_s + write_mb_s) / ASSUMED_MAX_DISK_THROUGHPUT_MB_S * 100.0).min(100.0)
    };

    DiskRates {
        occupancy_percent,
        read_mb_s,
        write_mb_s,
        read_ops_s,
        write_ops_s,
    }
}

fn read_counters() -> DiskCounters {
    #[cfg(target_os = "linux")]
    {
        if let Ok(content) = std::fs::read_to_string("/proc/diskstats") {
            return parse_diskstats(&content, |name| {
                std::path::Path::new("/sys/block").join(name).exists()
            });
        }
    }
    sysinfo_counters()
}

/// Byte counters via sysinfo, no op counts or busy time.
fn sysinfo_counters() -> DiskCounters {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let mut counters = DiskCounters::default();
    for disk in disks.list() {
        let usage = disk.usage();
        counters.read_bytes += usage.total_read_bytes;
        counters.write_bytes += usage.total_written_bytes;
    }
    counters
}

/// Sample disk I/O rates once per interval until cancelled.
pub(super) async fn sample_loop(
    mut writer: SeriesWriter,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut previous = read_counters();
    let mut previous_at = Instant::now();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let current = read_counters();
        let now = Instant::now();
        let rates = rates_between(
            &previous,
            &current,
            now.duration_since(previous_at).as_secs_f64(),
        );
        previous = current;
        previous_at = now;

        gauge!("pinbatch_io_usage_percent").set(rates.occupancy_percent);
        let row = [
            format!("{:.2}", rates.occupancy_percent),
            format!("{:.2}", rates.read_mb_s),
            format!("{:.2}", rates.write_mb_s),
            format!("{:.0}", rates.read_ops_s),
            format!("{:.0}", rates.write_ops_s),
        ];
        if let Err(e) = writer.append(&row) {
            error!("Disk sampling stopped: {}", e);
            break;
        }
    }
}
