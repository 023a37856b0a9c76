//! Domain constants for the batch transcription orchestrator.
//!
//! This module contains compile-time constants used throughout the application.
//! These are separated from runtime configuration to provide clear distinction
//! between values that never change and those that can be configured.

/// Worker process constants.
pub mod worker {
    /// Sentinel first argument that switches the binary into worker mode.
    pub const WORKER_SENTINEL: &str = "__worker";

    /// Exit code reported by a worker that failed before or during its batch.
    pub const WORKER_EXIT_FAILURE: i32 = 1;
}

/// Progress tracker file constants.
pub mod tracker {
    /// File name prefix for per-worker tracker files.
    pub const TRACKER_PREFIX: &str = "Tracker";

    /// File name extension for tracker files.
    pub const TRACKER_EXTENSION: &str = ".txt";

    /// Anchor token that marks a progress line as parseable.
    pub const DURATION_ANCHOR: &str = "secondes";

    /// Marker introducing the optional audio duration suffix.
    pub const AUDIO_MARKER: &str = "(audio:";
}

/// Telemetry sampling constants.
pub mod telemetry {
    /// CPU utilization series file name.
    pub const CPU_SERIES_FILE: &str = "monitoring_cpu.csv";

    /// Memory utilization series file name.
    pub const MEMORY_SERIES_FILE: &str = "monitoring_memory.csv";

    /// Disk I/O series file name.
    pub const IO_SERIES_FILE: &str = "monitoring_io.csv";

    /// Power draw series file name.
    pub const POWER_SERIES_FILE: &str = "monitoring_power.csv";

    /// Column header of the CPU series.
    pub const CPU_SERIES_HEADER: &[&str] = &["Timestamp", "CPU_Usage_Percent"];

    /// Column header of the memory series.
    pub const MEMORY_SERIES_HEADER: &[&str] = &[
        "Timestamp",
        "Memory_Usage_Percent",
        "Memory_Used_GB",
        "Memory_Total_GB",
    ];

    /// Column header of the disk I/O series.
    pub const IO_SERIES_HEADER: &[&str] = &[
        "Timestamp",
        "IO_Usage_Percent",
        "Read_MB_s",
        "Write_MB_s",
        "Read_Count",
        "Write_Count",
    ];

    /// Column header of the power series.
    pub const POWER_SERIES_HEADER: &[&str] = &[
        "Timestamp",
        "Power_W",
        "Energy_kWh",
        "Cost_EUR",
        "Carbon_kgCO2",
    ];

    /// Measurement window for CPU utilization samples in milliseconds.
    pub const CPU_SAMPLE_WINDOW_MS: u64 = 1000;

    /// Memory usage percentage above which a warning is logged.
    pub const MEMORY_ALERT_PERCENT: f64 = 95.0;

    /// Assumed sequential throughput of the disk when busy-time counters
    /// are unavailable, used to approximate occupancy from byte rates.
    pub const ASSUMED_MAX_DISK_THROUGHPUT_MB_S: f64 = 500.0;

    /// Block device sector size used by kernel I/O accounting.
    pub const SECTOR_SIZE_BYTES: u64 = 512;

    /// Grace period granted to a sampler to finish its current cycle on stop.
    pub const STOP_GRACE_SECS: u64 = 5;
}

/// Power estimation constants.
pub mod power {
    /// Fraction of TDP drawn by an idle package under the linear model.
    pub const IDLE_POWER_FRACTION: f64 = 0.15;

    /// Measurement window for a single power sample in milliseconds.
    pub const POWER_SAMPLE_WINDOW_MS: u64 = 1000;

    /// TDP assumed when the physical core count matches no table entry.
    pub const FALLBACK_TDP_WATTS: u32 = 95;

    /// Root of the Linux powercap sysfs tree where RAPL domains live.
    pub const POWERCAP_ROOT: &str = "/sys/class/powercap";
}

/// File system constants.
pub mod fs {
    /// Default TOML configuration file name.
    pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

    /// Default YAML configuration file name.
    pub const DEFAULT_YAML_CONFIG_FILE: &str = "config.yaml";

    /// Column header of the audio catalog CSV, kept for compatibility
    /// with catalogs produced by earlier tooling.
    pub const CATALOG_HEADER: &str = "Chemin,Duree(s)";
}
