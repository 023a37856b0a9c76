//! Per-worker progress tracker files.
//!
//! Each worker owns one plain-text tracker file and appends a line after
//! every finished job, flushed immediately so progress survives a crash.
//! The line format is stable and doubles as a recovery source: metrics can
//! be rebuilt from tracker files alone when in-memory accounting is lost.
//!
//! Format: `{name}: {processing:.2} secondes (audio: {duration:.2})`.
//! The token `secondes` anchors parsing; the text before its last colon is
//! the job name, the number after that colon is the processing time, and
//! the parenthesized suffix carries the audio duration.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::constants::tracker::{AUDIO_MARKER, DURATION_ANCHOR, TRACKER_EXTENSION, TRACKER_PREFIX};
use crate::error::{AppError, Result};

/// One parsed tracker line.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEntry {
    /// Job name as written by the worker, usually the audio file name.
    pub job_name: String,
    /// Wall-clock processing time in seconds.
    pub processing_secs: f64,
    /// Audio duration in seconds, 0.0 when the line predates the suffix.
    pub audio_secs: f64,
}

/// File name of the tracker owned by `worker_index` (1-based).
pub fn tracker_file_name(worker_index: usize) -> String {
    format!("{}{}{}", TRACKER_PREFIX, worker_index, TRACKER_EXTENSION)
}

/// Append-only writer for one worker's tracker file.
#[derive(Debug)]
pub struct TrackerWriter {
    file: File,
    path: PathBuf,
}

impl TrackerWriter {
    /// Create (or truncate) the tracker for `worker_index` and write the
    /// header announcing the batch size.
    pub fn create(dir: &Path, worker_index: usize, job_count: usize) -> Result<Self> {
        fs::create_dir_all(dir)
            .map_err(|e| AppError::Tracker(format!("cannot create {}: {}", dir.display(), e)))?;

        let path = dir.join(tracker_file_name(worker_index));
        let mut file = File::create(&path)
            .map_err(|e| AppError::Tracker(format!("cannot create {}: {}", path.display(), e)))?;
        writeln!(file, "=== worker {} - {} jobs ===\n", worker_index, job_count)
            .and_then(|_| file.flush())
            .map_err(|e| AppError::Tracker(format!("cannot write {}: {}", path.display(), e)))?;

        Ok(Self { file, path })
    }

    /// Append one finished job and flush so the line is durable immediately.
    pub fn append(&mut self, job_name: &str, processing_secs: f64, audio_secs: f64) -> Result<()> {
        writeln!(
            self.file,
            "{}: {:.2} {} {} {:.2})",
            job_name, processing_secs, DURATION_ANCHOR, AUDIO_MARKER, audio_secs
        )
        .and_then(|_| self.file.flush())
        .map_err(|e| AppError::Tracker(format!("cannot append to {}: {}", self.path.display(), e)))
    }

    /// Path of the underlying tracker file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Parse one tracker line.
///
/// Lines without the anchor token (headers, blanks) yield `None`. Lines with
/// the anchor but no parseable name/time also yield `None`; the caller
/// decides whether that deserves a warning.
pub fn parse_line(line: &str) -> Option<ProgressEntry> {
    let (before, after) = line.split_once(DURATION_ANCHOR)?;

    let (name_part, time_part) = before.rsplit_once(':')?;
    let job_name = name_part.trim();
    if job_name.is_empty() {
        return None;
    }
    let processing_secs: f64 = time_part.trim().parse().ok()?;

    let audio_secs = after
        .split_once(AUDIO_MARKER)
        .and_then(|(_, rest)| rest.trim().trim_end_matches(')').trim().parse::<f64>().ok())
        .unwrap_or(0.0);

    Some(ProgressEntry {
        job_name: job_name.to_string(),
        processing_secs,
        audio_secs,
    })
}

/// Load every tracker file in `dir` and parse all progress lines.
///
/// Files are visited in name order for deterministic output. Anchored lines
/// that fail to parse are counted and reported with a warning; unreadable
/// files are skipped the same way. A missing directory is an error.
pub fn load_dir(dir: &Path) -> Result<Vec<ProgressEntry>> {
    let mut tracker_paths: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| AppError::Tracker(format!("cannot read {}: {}", dir.display(), e)))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(TRACKER_PREFIX) && n.ends_with(TRACKER_EXTENSION))
                .unwrap_or(false)
        })
        .collect();
    tracker_paths.sort();

    if tracker_paths.is_empty() {
        warn!("No tracker files found in {}", dir.display());
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    let mut malformed = 0usize;
    for path in &tracker_paths {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                warn!("Cannot read tracker {}: {}", path.display(), e);
                continue;
            }
        };

        for line in BufReader::new(file).lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Cannot read line in {}: {}", path.display(), e);
                    break;
                }
            };
            if !line.contains(DURATION_ANCHOR) {
                continue;
            }
            match parse_line(&line) {
                Some(entry) => entries.push(entry),
                None => {
                    malformed += 1;
                    warn!("Malformed tracker line in {}: {}", path.display(), line);
                }
            }
        }
    }

    info!(
        "Loaded {} progress entries from {} tracker files",
        entries.len(),
        tracker_paths.len()
    );
    if malformed > 0 {
        warn!("{} malformed tracker lines skipped", malformed);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_one_based() {
        assert_eq!(tracker_file_name(1), "Tracker1.txt");
        assert_eq!(tracker_file_name(12), "Tracker12.txt");
    }

    #[test]
    fn parses_full_line() {
        let entry = parse_line("clip.mp3: 243.60 secondes (audio: 300.00)").unwrap();
        assert_eq!(entry.job_name, "clip.mp3");
        assert!((entry.processing_secs - 243.60).abs() < 1e-9);
        assert!((entry.audio_secs - 300.00).abs() < 1e-9);
    }

    #[test]
    fn parses_line_without_audio_suffix() {
        let entry = parse_line("clip.mp3: 243.60 secondes").unwrap();
        assert_eq!(entry.audio_secs, 0.0);
    }

    #[test]
    fn name_keeps_extra_colons() {
        let entry = parse_line("show: episode 2.mp3: 10.50 secondes (audio: 60.00)").unwrap();
        assert_eq!(entry.job_name, "show: episode 2.mp3");
        assert!((entry.processing_secs - 10.5).abs() < 1e-9);
    }

    #[test]
    fn lines_without_anchor_are_ignored() {
        assert!(parse_line("=== worker 1 - 3 jobs ===").is_none());
        assert!(parse_line("").is_none());
    }

    #[test]
    fn anchored_but_malformed_lines_fail() {
        assert!(parse_line("no colon before secondes").is_none());
        assert!(parse_line("clip.mp3: abc secondes").is_none());
    }

    #[test]
    fn written_entries_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = TrackerWriter::create(dir.path(), 1, 2).unwrap();
        writer.append("one.mp3", 12.25, 60.0).unwrap();
        writer.append("two.mp3", 7.0, 30.5).unwrap();

        let entries = load_dir(dir.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].job_name, "one.mp3");
        assert!((entries[0].processing_secs - 12.25).abs() < 0.01);
        assert!((entries[1].audio_secs - 30.5).abs() < 0.01);
    }

    #[test]
    fn create_truncates_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = TrackerWriter::create(dir.path(), 1, 1).unwrap();
        writer.append("stale.mp3", 1.0, 2.0).unwrap();
        drop(writer);

        TrackerWriter::create(dir.path(), 1, 1).unwrap();
        let entries = load_dir(dir.path()).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn load_dir_merges_multiple_workers() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = TrackerWriter::create(dir.path(), 1, 1).unwrap();
        first.append("a.mp3", 1.0, 10.0).unwrap();
        let mut second = TrackerWriter::create(dir.path(), 2, 1).unwrap();
        second.append("b.mp3", 2.0, 20.0).unwrap();

        let entries = load_dir(dir.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].job_name, "a.mp3");
        assert_eq!(entries[1].job_name, "b.mp3");
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert!(load_dir(Path::new("/nonexistent/trackers")).is_err());
    }
}
