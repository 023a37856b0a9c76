//! Power draw estimation and energy accounting.
//!
//! The measurement strategy is chosen once at start: RAPL energy
//! counters when the powercap sysfs tree exposes readable package
//! domains, otherwise a linear model on top of a TDP value (configured,
//! or looked up from the physical core count). Each sample integrates
//! into a cumulative energy counter from which cost and carbon figures
//! are derived.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::gauge;
use parking_lot::Mutex;
use sysinfo::System;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::constants::power::{
    FALLBACK_TDP_WATTS, IDLE_POWER_FRACTION, POWERCAP_ROOT, POWER_SAMPLE_WINDOW_MS,
};
use crate::constants::telemetry::{POWER_SERIES_FILE, POWER_SERIES_HEADER, STOP_GRACE_SECS};
use crate::error::Result;
use crate::telemetry::series::SeriesWriter;

/// One RAPL package domain under the powercap tree.
#[derive(Debug, Clone)]
struct RaplDomain {
    label: String,
    energy_path: PathBuf,
    max_energy_uj: u64,
}

impl RaplDomain {
    fn read_energy_uj(&self) -> Option<u64> {
        read_u64_file(&self.energy_path)
    }

    /// Energy delta in microjoules across a possible counter wrap.
    fn delta_uj(&self, before: u64, after: u64) -> u64 {
        if after >= before {
            after - before
        } else {
            self.max_energy_uj
                .saturating_sub(before)
                .saturating_add(after)
        }
    }
}

fn read_u64_file(path: &Path) -> Option<u64> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Package domains with readable energy counters under `root`.
///
/// Subzones (`intel-rapl:N:M`) are skipped: their energy is already
/// accounted for in the parent package counter.
fn discover_rapl_domains(root: &Path) -> Vec<RaplDomain> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut domains = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let dir_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        if !dir_name.starts_with("intel-rapl:") || dir_name.matches(':').count() != 1 {
            continue;
        }

        let label = fs::read_to_string(path.join("name"))
            .unwrap_or_default()
            .trim()
            .to_string();
        if !label.starts_with("package") {
            continue;
        }

        let energy_path = path.join("energy_uj");
        if read_u64_file(&energy_path).is_none() {
            continue;
        }
        let max_energy_uj = read_u64_file(&path.join("max_energy_range_uj")).unwrap_or(u64::MAX);
        domains.push(RaplDomain {
            label,
            energy_path,
            max_energy_uj,
        });
    }
    domains.sort_by(|a, b| a.energy_path.cmp(&b.energy_path));
    domains
}

/// TDP lookup by physical core count, used when no value is configured.
fn tdp_for_cores(physical_cores: usize) -> u32 {
    match physical_cores {
        1..=2 => 15,
        3..=4 => 35,
        5..=8 => 65,
        9..=12 => 95,
        13..=18 => 125,
        19..=32 => 165,
        _ => FALLBACK_TDP_WATTS,
    }
}

fn detect_tdp(configured: Option<u32>) -> f64 {
    match configured {
        Some(watts) => watts as f64,
        None => tdp_for_cores(num_cpus::get_physical()) as f64,
    }
}

struct TdpModel {
    tdp_watts: f64,
    system: System,
}

enum Strategy {
    Rapl(Vec<RaplDomain>),
    Model(TdpModel),
}

impl Strategy {
    fn detect(configured_tdp: Option<u32>) -> Self {
        let domains = discover_rapl_domains(Path::new(POWERCAP_ROOT));
        if !domains.is_empty() {
            for domain in &domains {
                debug!("RAPL domain {} at {}", domain.label, domain.energy_path.display());
            }
            info!(
                "Power monitoring via RAPL counters ({} package domains)",
                domains.len()
            );
            return Strategy::Rapl(domains);
        }

        let tdp_watts = detect_tdp(configured_tdp);
        info!(
            "RAPL unavailable, estimating power from a {:.0} W TDP model",
            tdp_watts
        );
        Strategy::Model(TdpModel {
            tdp_watts,
            system: System::new(),
        })
    }

    /// Average watts over the measurement window, `None` when cancelled
    /// mid-window.
    async fn measure_watts(&mut self, cancel: &CancellationToken) -> Option<f64> {
        let window = Duration::from_millis(POWER_SAMPLE_WINDOW_MS);
        match self {
            Strategy::Rapl(domains) => {
                let before: Vec<Option<u64>> =
                    domains.iter().map(|d| d.read_energy_uj()).collect();
                sleep_unless_cancelled(window, cancel).await?;

                let mut total_uj = 0.0;
                for (domain, before) in domains.iter().zip(before) {
                    if let (Some(before), Some(after)) = (before, domain.read_energy_uj()) {
                        total_uj += domain.delta_uj(before, after) as f64;
                    }
                }
                Some(total_uj / 1_000_000.0 / window.as_secs_f64())
            }
            Strategy::Model(model) => {
                model.system.refresh_cpu_usage();
                sleep_unless_cancelled(window, cancel).await?;
                model.system.refresh_cpu_usage();

                let utilization = model.system.global_cpu_usage() as f64 / 100.0;
                Some(IDLE_POWER_FRACTION * model.tdp_watts + utilization * model.tdp_watts)
            }
        }
    }
}

async fn sleep_unless_cancelled(duration: Duration, cancel: &CancellationToken) -> Option<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        _ = tokio::time::sleep(duration) => Some(()),
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct EnergyTotals {
    energy_kwh: f64,
    samples: u64,
}

/// Energy accounting for one monitored run.
#[derive(Debug, Clone, Copy)]
pub struct PowerSummary {
    pub elapsed_hours: f64,
    pub energy_kwh: f64,
    pub average_power_watts: f64,
    pub cost_eur: f64,
    pub carbon_kg: f64,
}

/// Lifecycle handle for the power sampling task.
pub struct PowerMonitor {
    interval: Duration,
    cost_per_kwh: f64,
    carbon_per_kwh: f64,
    tdp_override: Option<u32>,
    output_dir: PathBuf,
    totals: Arc<Mutex<EnergyTotals>>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
}

impl PowerMonitor {
    pub fn new(config: &Config, output_dir: &Path) -> Self {
        Self {
            interval: config.monitoring_interval,
            cost_per_kwh: config.electricity_cost_per_kwh,
            carbon_per_kwh: config.carbon_intensity,
            tdp_override: config.tdp_watts,
            output_dir: output_dir.to_path_buf(),
            totals: Arc::new(Mutex::new(EnergyTotals::default())),
            cancel: CancellationToken::new(),
            handle: None,
            started_at: None,
            stopped_at: None,
        }
    }

    /// Pick a strategy and start the sampling task. Starting twice is a
    /// no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        let writer = SeriesWriter::create(
            &self.output_dir.join(POWER_SERIES_FILE),
            POWER_SERIES_HEADER,
        )?;
        let strategy = Strategy::detect(self.tdp_override);

        *self.totals.lock() = EnergyTotals::default();
        self.cancel = CancellationToken::new();
        self.started_at = Some(Instant::now());
        self.stopped_at = None;
        self.handle = Some(tokio::spawn(sample_loop(
            strategy,
            writer,
            self.interval,
            self.cost_per_kwh,
            self.carbon_per_kwh,
            self.totals.clone(),
            self.cancel.clone(),
        )));
        Ok(())
    }

    /// Stop sampling and return the final accounting, `None` when the
    /// monitor was never started or produced no sample.
    pub async fn stop(&mut self) -> Option<PowerSummary> {
        let mut handle = self.handle.take()?;
        self.cancel.cancel();
        if tokio::time::timeout(Duration::from_secs(STOP_GRACE_SECS), &mut handle)
            .await
            .is_err()
        {
            warn!(
                "Power sampling did not stop within {}s, aborting it",
                STOP_GRACE_SECS
            );
            handle.abort();
        }
        self.stopped_at = Some(Instant::now());

        let summary = self.summary();
        if let Some(summary) = &summary {
            info!(
                "Energy recap: {:.3} kWh over {:.2} h (average {:.1} W)",
                summary.energy_kwh, summary.elapsed_hours, summary.average_power_watts
            );
            info!(
                "Estimated cost {:.4} EUR, carbon footprint {:.4} kg CO2",
                summary.cost_eur, summary.carbon_kg
            );
        }
        summary
    }

    /// Current accounting, readable while sampling runs.
    pub fn summary(&self) -> Option<PowerSummary> {
        let started_at = self.started_at?;
        let totals = *self.totals.lock();
        if totals.samples == 0 {
            return None;
        }

        let end = self.stopped_at.unwrap_or_else(Instant::now);
        let elapsed_hours = end.duration_since(started_at).as_secs_f64() / 3600.0;
        let average_power_watts = if elapsed_hours > 0.0 {
            totals.energy_kwh / elapsed_hours * 1000.0
        } else {
            0.0
        };

        Some(PowerSummary {
            elapsed_hours,
            energy_kwh: totals.energy_kwh,
            average_power_watts,
            cost_eur: totals.energy_kwh * self.cost_per_kwh,
            carbon_kg: totals.energy_kwh * self.carbon_per_kwh,
        })
    }
}

async fn sample_loop(
    mut strategy: Strategy,
    mut writer: SeriesWriter,
    interval: Duration,
    cost_per_kwh: f64,
    carbon_per_kwh: f64,
    totals: Arc<Mutex<EnergyTotals>>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let interval_hours = interval.as_secs_f64() / 3600.0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let watts = match strategy.measure_watts(&cancel).await {
            Some(watts) => watts,
            None => break,
        };

        let energy_kwh = {
            let mut totals = totals.lock();
            totals.energy_kwh += watts / 1000.0 * interval_hours;
            totals.samples += 1;
            totals.energy_kwh
        };

        gauge!("pinbatch_power_watts").set(watts);
        let row = [
            format!("{:.2}", watts),
            format!("{:.6}", energy_kwh),
            format!("{:.4}", energy_kwh * cost_per_kwh),
            format!("{:.4}", energy_kwh * carbon_per_kwh),
        ];
        if let Err(e) = writer.append(&row) {
            error!("Power sampling stopped: {}", e);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_monitor() -> PowerMonitor {
        PowerMonitor {
            interval: Duration::from_secs(2),
            cost_per_kwh: 0.18,
            carbon_per_kwh: 0.1,
            tdp_override: None,
            output_dir: PathBuf::from("."),
            totals: Arc::new(Mutex::new(EnergyTotals::default())),
            cancel: CancellationToken::new(),
            handle: None,
            started_at: None,
            stopped_at: None,
        }
    }

    #[test]
    fn summary_is_none_before_any_sample() {
        let mut monitor = test_monitor();
        assert!(monitor.summary().is_none());

        monitor.started_at = Some(Instant::now());
        assert!(monitor.summary().is_none());
    }

    #[test]
    fn summary_derives_cost_and_average_power() {
        let mut monitor = test_monitor();
        let now = Instant::now();
        monitor.started_at = Some(now - Duration::from_secs(3600));
        monitor.stopped_at = Some(now);
        *monitor.totals.lock() = EnergyTotals {
            energy_kwh: 0.5,
            samples: 10,
        };

        let summary = monitor.summary().unwrap();
        assert!((summary.elapsed_hours - 1.0).abs() < 1e-3);
        assert!((summary.average_power_watts - 500.0).abs() < 1.0);
        assert!((summary.cost_eur - 0.09).abs() < 1e-6);
        assert!((summary.carbon_kg - 0.05).abs() < 1e-6);
    }

    #[test]
    fn tdp_table_steps_with_core_count() {
        assert_eq!(tdp_for_cores(2), 15);
        assert_eq!(tdp_for_cores(4), 35);
        assert_eq!(tdp_for_cores(8), 65);
        assert_eq!(tdp_for_cores(12), 95);
        assert_eq!(tdp_for_cores(16), 125);
        assert_eq!(tdp_for_cores(32), 165);
        assert_eq!(tdp_for_cores(64), FALLBACK_TDP_WATTS);
    }

    #[test]
    fn configured_tdp_wins_over_detection() {
        assert_eq!(detect_tdp(Some(125)), 125.0);
    }

    #[test]
    fn energy_delta_handles_counter_wrap() {
        let domain = RaplDomain {
            label: "package-0".to_string(),
            energy_path: PathBuf::from("energy_uj"),
            max_energy_uj: 1000,
        };
        assert_eq!(domain.delta_uj(50, 100), 50);
        assert_eq!(domain.delta_uj(100, 50), 950);
    }

    #[test]
    fn discovers_only_readable_package_domains() {
        let dir = tempfile::tempdir().unwrap();
        let package = dir.path().join("intel-rapl:0");
        std::fs::create_dir(&package).unwrap();
        std::fs::write(package.join("name"), "package-0\n").unwrap();
        std::fs::write(package.join("energy_uj"), "123456\n").unwrap();
        std::fs::write(package.join("max_energy_range_uj"), "262143328850\n").unwrap();

        let subzone = dir.path().join("intel-rapl:0:0");
        std::fs::create_dir(&subzone).unwrap();
        std::fs::write(subzone.join("name"), "core\n").unwrap();
        std::fs::write(subzone.join("energy_uj"), "1\n").unwrap();

        let unreadable = dir.path().join("intel-rapl:1");
        std::fs::create_dir(&unreadable).unwrap();
        std::fs::write(unreadable.join("name"), "package-1\n").unwrap();

        let domains = discover_rapl_domains(dir.path());
        assert_eq!(domains.len(), 1);
        assert_eq!(domains[0].label, "package-0");
        assert_eq!(domains[0].max_energy_uj, 262_143_328_850);
    }

    #[test]
    fn missing_powercap_root_yields_no_domains() {
        assert!(discover_rapl_domains(Path::new("/nonexistent/powercap")).is_empty());
    }

    #[tokio::test]
    async fn rapl_loop_appends_a_row_per_sample() {
        let dir = tempfile::tempdir().unwrap();
        let energy_path = dir.path().join("energy_uj");
        std::fs::write(&energy_path, "5000000\n").unwrap();

        let strategy = Strategy::Rapl(vec![RaplDomain {
            label: "package-0".to_string(),
            energy_path,
            max_energy_uj: u64::MAX,
        }]);
        let series_path = dir.path().join("monitoring_power.csv");
        let writer = SeriesWriter::create(&series_path, POWER_SERIES_HEADER).unwrap();
        let totals = Arc::new(Mutex::new(EnergyTotals::default()));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(sample_loop(
            strategy,
            writer,
            Duration::from_secs(3600),
            0.18,
            0.1,
            totals.clone(),
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(POWER_SAMPLE_WINDOW_MS + 300)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(totals.lock().samples, 1);
        let content = std::fs::read_to_string(&series_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        // Unchanged counter reads as zero watts.
        assert!(lines[1].contains(",0.00,0.000000,0.0000,0.0000"));
    }
}
