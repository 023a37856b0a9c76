//! Application-wide runtime configuration.
//!
//! This module centralizes all configurable values, whether loaded from
//! configuration files or environment variables. Workers re-load the same
//! configuration on startup, so orchestrator and worker processes always
//! agree on paths and engine settings.

use figment::{
    providers::{Env, Format, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};

/// Serde helper for Duration serialization/deserialization as seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Default value functions for serde defaults
fn default_input_dir() -> PathBuf {
    PathBuf::from("audio")
}
fn default_catalog_path() -> PathBuf {
    PathBuf::from("catalog.csv")
}
fn default_audio_extensions() -> Vec<String> {
    vec![".mp3".to_string(), ".wav".to_string()]
}
fn default_probe_command() -> String {
    "ffprobe".to_string()
}
fn default_trackers_dir() -> PathBuf {
    PathBuf::from("trackers")
}
fn default_worker_count() -> usize {
    3
}
fn default_engine_command() -> String {
    "whisper".to_string()
}
fn default_language() -> String {
    "fr".to_string()
}
fn default_monitoring_enabled() -> bool {
    true
}
fn default_monitoring_interval() -> Duration {
    Duration::from_secs(2)
}
fn default_power_enabled() -> bool {
    true
}
fn default_electricity_cost() -> f64 {
    0.18
}
fn default_carbon_intensity() -> f64 {
    0.1
}

/// Application configuration loaded from multiple sources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory scanned for audio files when no catalog exists yet
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,

    /// Location of the audio catalog CSV
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,

    /// Audio file extensions considered during the scan
    #[serde(default = "default_audio_extensions")]
    pub audio_extensions: Vec<String>,

    /// External command used to probe audio durations during the scan
    #[serde(default = "default_probe_command")]
    pub probe_command: String,

    /// Directory holding the per-worker progress tracker files
    #[serde(default = "default_trackers_dir")]
    pub trackers_dir: PathBuf,

    /// Number of worker processes to launch
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Logical CPU threads to split across workers (0 = all available)
    #[serde(default)]
    pub cpu_threads: usize,

    /// Explicit per-worker core lists, overriding the automatic split
    #[serde(default)]
    pub worker_cores: Option<Vec<Vec<usize>>>,

    /// Maximum jobs assigned to a single worker (0 = unlimited)
    #[serde(default)]
    pub max_jobs_per_worker: usize,

    /// External transcription engine command
    #[serde(default = "default_engine_command")]
    pub engine_command: String,

    /// Extra arguments passed to the engine before the audio path
    #[serde(default)]
    pub engine_args: Vec<String>,

    /// Transcription language hint passed to the engine
    #[serde(default = "default_language")]
    pub language: String,

    /// Whether resource telemetry sampling is active during the run
    #[serde(default = "default_monitoring_enabled")]
    pub monitoring_enabled: bool,

    /// Interval between telemetry samples
    #[serde(default = "default_monitoring_interval", with = "duration_secs")]
    pub monitoring_interval: Duration,

    /// Whether power draw estimation is active during the run
    #[serde(default = "default_power_enabled")]
    pub power_enabled: bool,

    /// Processor TDP in watts, or None to derive it from the core count
    #[serde(default)]
    pub tdp_watts: Option<u32>,

    /// Electricity price in EUR per kWh
    #[serde(default = "default_electricity_cost")]
    pub electricity_cost_per_kwh: f64,

    /// Grid carbon intensity in kg CO2 per kWh
    #[serde(default = "default_carbon_intensity")]
    pub carbon_intensity: f64,
}

impl Config {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest priority)
    /// 2. config.yaml (if exists)
    /// 3. config.toml (if exists)
    /// 4. Built-in defaults (lowest priority)
    pub fn load() -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Self::default_figment())
            .merge(Toml::file(crate::constants::fs::DEFAULT_CONFIG_FILE))
            .merge(Yaml::file(crate::constants::fs::DEFAULT_YAML_CONFIG_FILE))
            .merge(Env::prefixed("PINBATCH_"))
            .extract()
            .map_err(|e| AppError::Config(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Generate default configuration values
    fn default_figment() -> Figment {
        use figment::providers::Serialized;

        Figment::from(Serialized::defaults(Config {
            input_dir: default_input_dir(),
            catalog_path: default_catalog_path(),
            audio_extensions: default_audio_extensions(),
            probe_command: default_probe_command(),
            trackers_dir: default_trackers_dir(),
            worker_count: default_worker_count(),
            cpu_threads: 0,
            worker_cores: None,
            max_jobs_per_worker: 0,
            engine_command: default_engine_command(),
            engine_args: Vec::new(),
            language: default_language(),
            monitoring_enabled: default_monitoring_enabled(),
            monitoring_interval: default_monitoring_interval(),
            power_enabled: default_power_enabled(),
            tdp_watts: None,
            electricity_cost_per_kwh: default_electricity_cost(),
            carbon_intensity: default_carbon_intensity(),
        }))
    }

    /// Maximum jobs per worker as an optional cap.
    pub fn capacity_cap(&self) -> Option<usize> {
        if self.max_jobs_per_worker == 0 {
            None
        } else {
            Some(self.max_jobs_per_worker)
        }
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(AppError::Config(
                "worker_count must be at least 1".to_string(),
            ));
        }

        if self.monitoring_interval.as_secs() == 0 {
            return Err(AppError::Config(
                "monitoring_interval must be at least 1 second".to_string(),
            ));
        }

        if self.engine_command.is_empty() {
            return Err(AppError::Config(
                "engine_command cannot be empty".to_string(),
            ));
        }

        if self.audio_extensions.is_empty() {
            return Err(AppError::Config(
                "audio_extensions cannot be empty".to_string(),
            ));
        }

        if self.electricity_cost_per_kwh < 0.0 || self.carbon_intensity < 0.0 {
            return Err(AppError::Config(
                "electricity_cost_per_kwh and carbon_intensity must be non-negative".to_string(),
            ));
        }

        if let Some(lists) = &self.worker_cores {
            if lists.iter().any(|cores| cores.is_empty()) {
                return Err(AppError::Config(
                    "worker_cores entries cannot be empty".to_string(),
                ));
            }
        }

        self.validate_path(&self.input_dir, "input_dir")?;
        self.validate_path(&self.trackers_dir, "trackers_dir")?;

        Ok(())
    }

    /// Validate a file path for obviously malformed values.
    fn validate_path(&self, path: &std::path::Path, field_name: &str) -> Result<()> {
        let path_str = path.to_string_lossy();

        if path_str.contains('\0') {
            return Err(AppError::Config(format!(
                "{} contains null bytes",
                field_name
            )));
        }

        if path_str.chars().any(|c| c.is_control() && c != '\t') {
            return Err(AppError::Config(format!(
                "{} contains invalid control characters",
                field_name
            )));
        }

        if path_str.len() > 4096 {
            return Err(AppError::Config(format!(
                "{} is too long (max 4096 characters)",
                field_name
            )));
        }

        Ok(())
    }

    /// Export configuration to TOML format
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("Failed to serialize to TOML: {}", e)))
    }

    /// Export configuration to YAML format
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| AppError::Config(format!("Failed to serialize to YAML: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            input_dir: default_input_dir(),
            catalog_path: default_catalog_path(),
            audio_extensions: default_audio_extensions(),
            probe_command: default_probe_command(),
            trackers_dir: default_trackers_dir(),
            worker_count: default_worker_count(),
            cpu_threads: 0,
            worker_cores: None,
            max_jobs_per_worker: 0,
            engine_command: default_engine_command(),
            engine_args: Vec::new(),
            language: default_language(),
            monitoring_enabled: true,
            monitoring_interval: default_monitoring_interval(),
            power_enabled: true,
            tdp_watts: None,
            electricity_cost_per_kwh: default_electricity_cost(),
            carbon_intensity: default_carbon_intensity(),
        }
    }

    #[test]
    fn defaults_validate() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn zero_workers_rejected() {
        let mut config = base_config();
        config.worker_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_core_list_rejected() {
        let mut config = base_config();
        config.worker_cores = Some(vec![vec![0, 1], vec![]]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn capacity_cap_maps_zero_to_none() {
        let mut config = base_config();
        assert_eq!(config.capacity_cap(), None);
        config.max_jobs_per_worker = 25;
        assert_eq!(config.capacity_cap(), Some(25));
    }

    #[test]
    fn round_trips_through_toml() {
        let config = base_config();
        let rendered = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.worker_count, config.worker_count);
        assert_eq!(parsed.monitoring_interval, config.monitoring_interval);
    }
}
