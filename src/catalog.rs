//! Audio job catalog.
//!
//! The catalog is the input of a batch run: an ordered list of audio files
//! with their playback durations. It can be produced by scanning a directory
//! tree with an external duration probe, persisted to CSV, and read back by
//! later runs or by the orchestrator directly.

use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::constants::fs::CATALOG_HEADER;
use crate::error::{AppError, Result};

/// A single transcription job: an audio file and its playback duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioJob {
    /// Path to the audio file.
    pub path: PathBuf,
    /// Playback duration in seconds.
    pub duration_secs: f64,
}

impl AudioJob {
    /// Create a new job.
    pub fn new(path: impl Into<PathBuf>, duration_secs: f64) -> Self {
        Self {
            path: path.into(),
            duration_secs,
        }
    }

    /// File name component of the job path, used as the job identifier
    /// in progress tracker lines.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }
}

/// Extracts the playback duration of an audio file.
pub trait DurationProbe {
    /// Probe the duration of `path` in seconds.
    fn probe(&self, path: &Path) -> Result<f64>;
}

/// Duration probe backed by an external command printing the duration
/// in seconds on stdout, such as `ffprobe`.
pub struct CommandDurationProbe {
    program: String,
}

impl CommandDurationProbe {
    /// Create a probe invoking `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl DurationProbe for CommandDurationProbe {
    fn probe(&self, path: &Path) -> Result<f64> {
        let output = Command::new(&self.program)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .map_err(|e| AppError::Catalog(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(AppError::Catalog(format!(
                "{} failed for {}: {}",
                self.program,
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        text.trim()
            .parse::<f64>()
            .map_err(|e| AppError::Catalog(format!("unparseable duration for {}: {}", path.display(), e)))
    }
}

/// Recursively scan `root` for audio files matching `extensions` and probe
/// their durations.
///
/// Files whose duration cannot be determined or is not positive are skipped
/// with a warning; video containers without an audio track commonly produce
/// such entries. Unreadable subdirectories are skipped as well. A missing
/// root directory is fatal.
pub fn scan_dir(
    root: &Path,
    extensions: &[String],
    probe: &dyn DurationProbe,
) -> Result<Vec<AudioJob>> {
    if !root.exists() {
        return Err(AppError::Catalog(format!(
            "input directory {} does not exist",
            root.display()
        )));
    }

    let mut jobs = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot access {}: {}", dir.display(), e);
                continue;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Cannot read entry in {}: {}", dir.display(), e);
                    continue;
                }
            };
            let path = entry.path();

            if path.is_dir() {
                pending.push(path);
                continue;
            }

            if !matches_extension(&path, extensions) {
                continue;
            }

            match probe.probe(&path) {
                Ok(duration) if duration > 0.0 && duration.is_finite() => {
                    debug!("Found {} ({:.2}s)", path.display(), duration);
                    jobs.push(AudioJob::new(path, duration));
                }
                Ok(_) => {
                    warn!(
                        "Skipping {} (no detectable audio track)",
                        path.display()
                    );
                }
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                }
            }
        }
    }

    info!("{} audio files found under {}", jobs.len(), root.display());
    Ok(jobs)
}

fn matches_extension(path: &Path, extensions: &[String]) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.to_lowercase(),
        None => return false,
    };
    extensions
        .iter()
        .any(|ext| name.ends_with(&ext.to_lowercase()))
}

/// Write the catalog to a CSV file, creating parent directories as needed.
pub fn write_csv(jobs: &[AudioJob], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file = fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{}", CATALOG_HEADER)?;
    for job in jobs {
        writeln!(writer, "{},{}", job.path.display(), job.duration_secs)?;
    }
    writer.flush()?;

    info!("Catalog written to {} ({} entries)", path.display(), jobs.len());
    Ok(())
}

/// Read a catalog CSV previously written by [`write_csv`].
///
/// The duration is taken from the text after the last comma, so paths
/// containing commas survive the round trip. Malformed rows are skipped
/// with a warning; a missing file is fatal.
pub fn read_csv(path: &Path) -> Result<Vec<AudioJob>> {
    let file = fs::File::open(path)
        .map_err(|e| AppError::Catalog(format!("cannot open catalog {}: {}", path.display(), e)))?;
    let reader = BufReader::new(file);

    let mut jobs = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if index == 0 || line.trim().is_empty() {
            continue;
        }

        let Some((raw_path, raw_duration)) = line.rsplit_once(',') else {
            warn!("Skipping malformed catalog row {}: {}", index + 1, line);
            continue;
        };

        match raw_duration.trim().parse::<f64>() {
            Ok(duration) if duration.is_finite() && duration > 0.0 => {
                jobs.push(AudioJob::new(raw_path, duration));
            }
            _ => {
                warn!("Skipping malformed catalog row {}: {}", index + 1, line);
            }
        }
    }

    info!("{} entries read from {}", jobs.len(), path.display());
    Ok(jobs)
}
