//! Supervisor/worker wire protocol.
//!
//! The supervisor writes one JSON [`Assignment`] line on the worker's
//! stdin, then reads newline-delimited JSON [`WorkerEvent`] lines from its
//! stdout until EOF. Stderr is not part of the protocol and stays attached
//! to the parent's stderr for human-readable logs.

use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};

use crate::catalog::AudioJob;
use crate::error::{AppError, Result};

/// Work order handed to a single worker process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    /// 1-based worker index, used for tracker files and logs.
    pub worker_index: usize,
    pub jobs: Vec<AudioJob>,
    /// Cores the worker must pin itself to before processing.
    pub cpu_cores: Vec<usize>,
}

impl Assignment {
    pub fn total_audio_secs(&self) -> f64 {
        self.jobs.iter().map(|job| job.duration_secs).sum()
    }
}

/// Progress notifications emitted by a worker, one JSON object per line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    Started {
        job: String,
        audio_secs: f64,
    },
    Finished {
        job: String,
        audio_secs: f64,
        processing_secs: f64,
    },
    Failed {
        job: String,
        audio_secs: f64,
        processing_secs: f64,
        reason: String,
    },
    /// Final event before the worker exits.
    Done {
        completed: usize,
        failed: usize,
        skipped: usize,
    },
}

/// Serialize one event as a JSON line and flush it immediately.
pub fn write_event<W: Write>(writer: &mut W, event: &WorkerEvent) -> Result<()> {
    serde_json::to_writer(&mut *writer, event)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Read the single assignment line a worker expects on startup.
pub fn read_assignment<R: BufRead>(reader: &mut R) -> Result<Assignment> {
    let mut line = String::new();
    let bytes = reader.read_line(&mut line)?;
    if bytes == 0 {
        return Err(AppError::Worker(
            "stdin closed before an assignment was received".to_string(),
        ));
    }
    let assignment: Assignment = serde_json::from_str(line.trim())?;
    Ok(assignment)
}

/// Parse one stdout line into an event.
pub fn parse_event(line: &str) -> Result<WorkerEvent> {
    let event: WorkerEvent = serde_json::from_str(line.trim())?;
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::path::PathBuf;

    fn sample_assignment() -> Assignment {
        Assignment {
            worker_index: 2,
            jobs: vec![
                AudioJob::new(PathBuf::from("audio/a.mp3"), 120.0),
                AudioJob::new(PathBuf::from("audio/b.wav"), 45.5),
            ],
            cpu_cores: vec![2, 3],
        }
    }

    #[test]
    fn assignment_round_trips_through_a_pipe() {
        let assignment = sample_assignment();
        let encoded = serde_json::to_string(&assignment).unwrap();

        let mut reader = Cursor::new(format!("{}\n", encoded));
        let decoded = read_assignment(&mut reader).unwrap();
        assert_eq!(decoded, assignment);
        assert!((decoded.total_audio_secs() - 165.5).abs() < 1e-9);
    }

    #[test]
    fn missing_assignment_line_is_an_error() {
        let mut reader = Cursor::new(Vec::new());
        assert!(read_assignment(&mut reader).is_err());
    }

    #[test]
    fn events_round_trip_as_json_lines() {
        let events = vec![
            WorkerEvent::Started {
                job: "a.mp3".to_string(),
                audio_secs: 120.0,
            },
            WorkerEvent::Finished {
                job: "a.mp3".to_string(),
                audio_secs: 120.0,
                processing_secs: 14.5,
            },
            WorkerEvent::Failed {
                job: "b.wav".to_string(),
                audio_secs: 45.5,
                processing_secs: 2.0,
                reason: "engine exited with status 1".to_string(),
            },
            WorkerEvent::Done {
                completed: 1,
                failed: 1,
                skipped: 0,
            },
        ];

        let mut buffer = Vec::new();
        for event in &events {
            write_event(&mut buffer, event).unwrap();
        }

        let text = String::from_utf8(buffer).unwrap();
        let decoded: Vec<WorkerEvent> = text
            .lines()
            .map(|line| parse_event(line).unwrap())
            .collect();
        assert_eq!(decoded, events);
    }

    #[test]
    fn event_tag_uses_snake_case() {
        let encoded = serde_json::to_string(&WorkerEvent::Started {
            job: "a.mp3".to_string(),
            audio_secs: 1.0,
        })
        .unwrap();
        assert!(encoded.contains("\"event\":\"started\""));
    }

    #[test]
    fn garbage_line_is_rejected() {
        assert!(parse_event("not json").is_err());
    }
}
