//! Transcription engine interface.
//!
//! The orchestrator never links a speech model. Workers call an external
//! engine through the [`TranscriptionEngine`] trait; the default
//! implementation shells out to a configured command and captures its
//! stdout as the transcript text. Artifact writing (plain text and SRT
//! subtitles) lives here as well, next to the transcript type.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{AppError, Result};

/// One timed segment of a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Segment start in seconds from the beginning of the audio.
    pub start: f64,
    /// Segment end in seconds.
    pub end: f64,
    /// Spoken text of the segment.
    pub text: String,
}

/// Result of transcribing one audio file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// Full transcript text.
    pub text: String,
    /// Timed segments, empty when the engine only produces plain text.
    pub segments: Vec<TranscriptSegment>,
}

impl Transcript {
    /// Write the transcript text to `path`, creating parent directories.
    pub fn write_txt(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.text.trim())?;
        info!("Transcript written to {}", path.display());
        Ok(())
    }

    /// Write the segments as an SRT subtitle file.
    pub fn write_srt(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = fs::File::create(path)?;
        for (index, segment) in self.segments.iter().enumerate() {
            writeln!(file, "{}", index + 1)?;
            writeln!(
                file,
                "{} --> {}",
                format_srt_timestamp(segment.start),
                format_srt_timestamp(segment.end)
            )?;
            writeln!(file, "{}\n", segment.text.trim())?;
        }
        info!("Subtitles written to {}", path.display());
        Ok(())
    }

    /// Paths of the artifacts for `audio_path`, written next to the audio.
    pub fn artifact_paths(audio_path: &Path) -> (PathBuf, PathBuf) {
        let stem = audio_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "transcript".to_string());
        let dir = audio_path.parent().unwrap_or_else(|| Path::new(""));
        (
            dir.join(format!("{stem}_transcript.txt")),
            dir.join(format!("{stem}_transcript.srt")),
        )
    }
}

/// Format seconds as an SRT timestamp, `HH:MM:SS,mmm`.
pub fn format_srt_timestamp(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let hours = (seconds / 3600.0) as u64;
    let minutes = ((seconds % 3600.0) / 60.0) as u64;
    let secs = (seconds % 60.0) as u64;
    let millis = ((seconds % 1.0) * 1000.0) as u64;
    format!("{hours:02}:{minutes:02}:{secs:02},{millis:03}")
}

/// Turns an audio file into a transcript.
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    /// Transcribe `audio_path`. `cpu_cores` is the set the calling worker is
    /// pinned to, passed along so the engine can size its thread pool.
    async fn transcribe(&self, audio_path: &Path, cpu_cores: &[usize]) -> Result<Transcript>;
}

/// Engine invoking an external command and reading the transcript from
/// its stdout.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    language: String,
}

impl CommandEngine {
    /// Create an engine running `program` with `args` before the audio path.
    pub fn new(program: impl Into<String>, args: Vec<String>, language: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            language: language.into(),
        }
    }

    /// Build the engine described by the configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.engine_command.clone(),
            config.engine_args.clone(),
            config.language.clone(),
        )
    }
}

#[async_trait]
impl TranscriptionEngine for CommandEngine {
    async fn transcribe(&self, audio_path: &Path, cpu_cores: &[usize]) -> Result<Transcript> {
        let threads = cpu_cores.len().max(1);
        debug!(
            "Running {} on {} with {} threads",
            self.program,
            audio_path.display(),
            threads
        );

        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg("--language")
            .arg(&self.language)
            .arg("--threads")
            .arg(threads.to_string())
            .arg(audio_path)
            .output()
            .await
            .map_err(|e| AppError::Engine(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Engine(format!(
                "{} failed on {} ({}): {}",
                self.program,
                audio_path.display(),
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        Ok(Transcript {
            text,
            segments: Vec::new(),
        })
    }
}
