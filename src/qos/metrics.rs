//! Session metrics accumulator.
//!
//! One `MetricsCalculator` lives in the orchestrator and is fed from the
//! worker event streams. Because workers run in separate processes, the
//! accumulator can also rebuild itself from the progress tracker files when
//! the in-process records are missing, for example when summarizing a
//! previous run.

use std::fmt;
use std::path::Path;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::tracker;

/// Outcome of a single transcription job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    /// Path or name of the audio file.
    pub file_path: String,
    /// Audio duration in seconds.
    pub audio_secs: f64,
    /// Wall-clock processing time in seconds.
    pub processing_secs: f64,
    /// Whether the transcription succeeded.
    pub success: bool,
}

#[derive(Debug, Default)]
struct SessionState {
    started_at: Option<Instant>,
    ended_at: Option<Instant>,
    records: Vec<JobRecord>,
}

/// Thread-safe QoS metrics calculator for one batch session.
#[derive(Debug)]
pub struct MetricsCalculator {
    run_id: Uuid,
    state: Mutex<SessionState>,
}

impl MetricsCalculator {
    /// Create an empty calculator with a fresh run identifier.
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Identifier of this run, stamped on the summary.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Start a measurement session, clearing any previous records.
    pub fn start_session(&self) {
        let mut state = self.state.lock();
        state.started_at = Some(Instant::now());
        state.ended_at = None;
        state.records.clear();
        info!("Measurement session started (run {})", self.run_id);
    }

    /// End the measurement session.
    pub fn end_session(&self) {
        let mut state = self.state.lock();
        state.ended_at = Some(Instant::now());
        info!("Measurement session ended");
    }

    /// Record one job outcome.
    pub fn add_record(&self, record: JobRecord) {
        debug!(
            "Job recorded: {} ({:.2}s audio, {:.2}s processing, success={})",
            record.file_path, record.audio_secs, record.processing_secs, record.success
        );
        self.state.lock().records.push(record);
    }

    /// Number of recorded jobs.
    pub fn record_count(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Rebuild records from the tracker files in `dir`.
    ///
    /// Tracker lines only exist for finished jobs, so every imported record
    /// counts as successful. Returns the number of imported entries.
    pub fn import_from_trackers(&self, dir: &Path) -> Result<usize> {
        let entries = tracker::load_dir(dir)?;
        let count = entries.len();

        let mut state = self.state.lock();
        for entry in entries {
            state.records.push(JobRecord {
                file_path: entry.job_name,
                audio_secs: entry.audio_secs,
                processing_secs: entry.processing_secs,
                success: true,
            });
        }
        drop(state);

        info!("Imported {} job records from trackers in {}", count, dir.display());
        Ok(count)
    }

    /// Throughput relative to real time: total successful audio duration
    /// divided by total successful processing time. 0.0 without data.
    pub fn throughput(&self) -> f64 {
        let state = self.state.lock();
        if state.records.is_empty() {
            warn!("No records available to compute throughput");
            return 0.0;
        }

        let (audio, processing) = successful_totals(&state.records);
        if processing == 0.0 {
            return 0.0;
        }
        audio / processing
    }

    /// Mean processing time over successful jobs, in seconds.
    pub fn average_processing_secs(&self) -> f64 {
        let state = self.state.lock();
        let successful: Vec<&JobRecord> =
            state.records.iter().filter(|r| r.success).collect();
        if successful.is_empty() {
            return 0.0;
        }
        successful.iter().map(|r| r.processing_secs).sum::<f64>() / successful.len() as f64
    }

    /// Fraction of recorded jobs that succeeded, over all records.
    pub fn success_rate(&self) -> f64 {
        let state = self.state.lock();
        if state.records.is_empty() {
            return 0.0;
        }
        let successes = state.records.iter().filter(|r| r.success).count();
        successes as f64 / state.records.len() as f64
    }

    /// Session duration in seconds: zero before start, live while running,
    /// frozen once ended.
    pub fn session_duration_secs(&self) -> f64 {
        let state = self.state.lock();
        match (state.started_at, state.ended_at) {
            (Some(start), Some(end)) => end.duration_since(start).as_secs_f64(),
            (Some(start), None) => start.elapsed().as_secs_f64(),
            (None, _) => 0.0,
        }
    }

    /// Produce the full session summary.
    pub fn summary(&self) -> QosSummary {
        let state = self.state.lock();
        let total_jobs = state.records.len();
        let successful_jobs = state.records.iter().filter(|r| r.success).count();
        let (total_audio_secs, total_processing_secs) = successful_totals(&state.records);
        drop(state);

        let throughput = if total_processing_secs > 0.0 {
            total_audio_secs / total_processing_secs
        } else {
            0.0
        };
        let average_processing_secs = if successful_jobs > 0 {
            total_processing_secs / successful_jobs as f64
        } else {
            0.0
        };
        let success_rate = if total_jobs > 0 {
            successful_jobs as f64 / total_jobs as f64
        } else {
            0.0
        };

        QosSummary {
            run_id: self.run_id,
            session_duration_secs: self.session_duration_secs(),
            total_jobs,
            successful_jobs,
            failed_jobs: total_jobs - successful_jobs,
            success_rate,
            total_audio_secs,
            total_processing_secs,
            throughput,
            average_processing_secs,
        }
    }
}

impl Default for MetricsCalculator {
    fn default() -> Self {
        Self::new()
    }
}

fn successful_totals(records: &[JobRecord]) -> (f64, f64) {
    records
        .iter()
        .filter(|r| r.success)
        .fold((0.0, 0.0), |(audio, processing), r| {
            (audio + r.audio_secs, processing + r.processing_secs)
        })
}

/// Aggregated metrics for one batch session.
#[derive(Debug, Clone, Serialize)]
pub struct QosSummary {
    pub run_id: Uuid,
    pub session_duration_secs: f64,
    pub total_jobs: usize,
    pub successful_jobs: usize,
    pub failed_jobs: usize,
    pub success_rate: f64,
    pub total_audio_secs: f64,
    pub total_processing_secs: f64,
    pub throughput: f64,
    pub average_processing_secs: f64,
}

impl QosSummary {
    /// Session duration in hours.
    pub fn session_duration_hours(&self) -> f64 {
        self.session_duration_secs / 3600.0
    }

    /// Total successful audio duration in hours.
    pub fn total_audio_hours(&self) -> f64 {
        self.total_audio_secs / 3600.0
    }

    /// Total successful processing time in hours.
    pub fn total_processing_hours(&self) -> f64 {
        self.total_processing_secs / 3600.0
    }
}

impl fmt::Display for QosSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "-".repeat(80);
        writeln!(f, "{}", "=".repeat(80))?;
        writeln!(f, "QOS REPORT - BATCH TRANSCRIPTION (run {})", self.run_id)?;
        writeln!(f, "{}", "=".repeat(80))?;
        writeln!(f)?;
        writeln!(f, "SESSION SUMMARY")?;
        writeln!(f, "{}", rule)?;
        writeln!(f, "Session duration: {:.2} hours", self.session_duration_hours())?;
        writeln!(f, "Total files: {}", self.total_jobs)?;
        writeln!(f, "Successful files: {}", self.successful_jobs)?;
        writeln!(f, "Failed files: {}", self.failed_jobs)?;
        writeln!(f, "Success rate: {:.1}%", self.success_rate * 100.0)?;
        writeln!(f)?;
        writeln!(f, "PERFORMANCE")?;
        writeln!(f, "{}", rule)?;
        writeln!(f, "Total audio duration: {:.2} hours", self.total_audio_hours())?;
        writeln!(f, "Total processing time: {:.2} hours", self.total_processing_hours())?;
        writeln!(f, "Throughput: {:.2}x real time", self.throughput)?;
        writeln!(
            f,
            "Average time per file: {:.2} seconds",
            self.average_processing_secs
        )?;
        writeln!(f)?;
        writeln!(f, "QOS OBJECTIVES")?;
        writeln!(f, "{}", rule)?;
        if self.throughput >= 5.0 {
            writeln!(f, "[ok] Throughput >= 5x real time")?;
        } else if self.throughput >= 1.0 {
            writeln!(f, "[ok] Throughput >= 1x real time")?;
        } else {
            writeln!(f, "[!!] Throughput below real time")?;
        }
        if self.success_rate >= 0.99 {
            writeln!(f, "[ok] Success rate >= 99%")?;
        } else {
            writeln!(f, "[!!] Success rate {:.1}% < 99%", self.success_rate * 100.0)?;
        }
        write!(f, "{}", "=".repeat(80))
    }
}
