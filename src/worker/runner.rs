//! Worker-mode entry point.
//!
//! Runs inside a child process spawned by the supervisor: reads the
//! assignment from stdin, pins the whole process to its cores, then works
//! through the job list sequentially, reporting progress as JSON events on
//! stdout and human-readable lines in its own tracker file.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::catalog::AudioJob;
use crate::config::Config;
use crate::engine::{CommandEngine, Transcript, TranscriptionEngine};
use crate::error::Result;
use crate::tracker::TrackerWriter;
use crate::worker::affinity;
use crate::worker::protocol::{self, WorkerEvent};

/// Run the worker loop to completion.
///
/// An interrupt (Ctrl-C reaches the whole process group) lets the current
/// job finish and skips the rest.
pub async fn run() -> Result<()> {
    let assignment = {
        let stdin = io::stdin();
        let mut lock = stdin.lock();
        protocol::read_assignment(&mut lock)?
    };
    let worker_index = assignment.worker_index;

    info!(
        "Worker {}: received {} jobs ({:.1}s audio) on cores {:?}",
        worker_index,
        assignment.jobs.len(),
        assignment.total_audio_secs(),
        assignment.cpu_cores
    );

    let effective = affinity::pin_and_verify(&assignment.cpu_cores)?;

    let config = Config::load()?;
    let engine = CommandEngine::from_config(&config);
    let mut tracker = TrackerWriter::create(
        &config.trackers_dir,
        worker_index,
        assignment.jobs.len(),
    )?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                stop.store(true, Ordering::SeqCst);
            }
        });
    }

    let mut out = io::stdout();
    let total = assignment.jobs.len();
    let mut completed = 0usize;
    let mut failed = 0usize;
    let mut skipped = 0usize;

    for (position, job) in assignment.jobs.iter().enumerate() {
        if stop.load(Ordering::SeqCst) {
            skipped = total - position;
            warn!(
                "Worker {}: interrupt received, skipping {} remaining jobs",
                worker_index, skipped
            );
            break;
        }

        let job_name = job.file_name();
        info!(
            "Worker {}: [{}/{}] {} ({:.1}s audio)",
            worker_index,
            position + 1,
            total,
            job_name,
            job.duration_secs
        );
        protocol::write_event(
            &mut out,
            &WorkerEvent::Started {
                job: job_name.clone(),
                audio_secs: job.duration_secs,
            },
        )?;

        let started = Instant::now();
        match process_job(&engine, job, &effective).await {
            Ok(()) => {
                let processing_secs = started.elapsed().as_secs_f64();
                completed += 1;

                // A lost tracker line degrades the recap, not the job.
                if let Err(e) = tracker.append(&job_name, processing_secs, job.duration_secs) {
                    warn!("Worker {}: tracker append failed: {}", worker_index, e);
                }

                let ratio = if processing_secs > 0.0 {
                    job.duration_secs / processing_secs
                } else {
                    0.0
                };
                info!(
                    "Worker {}: {} done in {:.2}s ({:.2}x real time)",
                    worker_index, job_name, processing_secs, ratio
                );
                protocol::write_event(
                    &mut out,
                    &WorkerEvent::Finished {
                        job: job_name,
                        audio_secs: job.duration_secs,
                        processing_secs,
                    },
                )?;
            }
            Err(e) => {
                let processing_secs = started.elapsed().as_secs_f64();
                failed += 1;
                error!(
                    "Worker {}: {} failed after {:.2}s: {}",
                    worker_index, job_name, processing_secs, e
                );
                protocol::write_event(
                    &mut out,
                    &WorkerEvent::Failed {
                        job: job_name,
                        audio_secs: job.duration_secs,
                        processing_secs,
                        reason: e.to_string(),
                    },
                )?;
            }
        }
    }

    protocol::write_event(
        &mut out,
        &WorkerEvent::Done {
            completed,
            failed,
            skipped,
        },
    )?;
    info!(
        "Worker {}: finished with {} completed, {} failed, {} skipped",
        worker_index, completed, failed, skipped
    );
    Ok(())
}

/// Transcribe one file and persist its artifacts. An artifact write
/// failure fails the job.
async fn process_job<E: TranscriptionEngine + ?Sized>(
    engine: &E,
    job: &AudioJob,
    cpu_cores: &[usize],
) -> Result<()> {
    let transcript = engine.transcribe(&job.path, cpu_cores).await?;
    write_artifacts(&job.path, &transcript)
}

fn write_artifacts(audio_path: &Path, transcript: &Transcript) -> Result<()> {
    let (txt_path, srt_path) = Transcript::artifact_paths(audio_path);
    if !transcript.text.trim().is_empty() {
        transcript.write_txt(&txt_path)?;
    }
    if !transcript.segments.is_empty() {
        transcript.write_srt(&srt_path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TranscriptSegment;
    use crate::error::AppError;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FixedEngine {
        transcript: Transcript,
    }

    #[async_trait]
    impl TranscriptionEngine for FixedEngine {
        async fn transcribe(&self, _audio_path: &Path, _cpu_cores: &[usize]) -> Result<Transcript> {
            Ok(self.transcript.clone())
        }
    }

    struct FailingEngine;

    #[async_trait]
    impl TranscriptionEngine for FailingEngine {
        async fn transcribe(&self, _audio_path: &Path, _cpu_cores: &[usize]) -> Result<Transcript> {
            Err(AppError::Engine("model file missing".to_string()))
        }
    }

    #[tokio::test]
    async fn successful_job_writes_both_artifacts() {
        let dir = TempDir::new().unwrap();
        let audio = dir.path().join("clip.mp3");
        std::fs::write(&audio, b"fake").unwrap();

        let engine = FixedEngine {
            transcript: Transcript {
                text: "bonjour tout le monde".to_string(),
                segments: vec![TranscriptSegment {
                    start: 0.0,
                    end: 2.5,
                    text: "bonjour tout le monde".to_string(),
                }],
            },
        };
        let job = AudioJob::new(audio.clone(), 2.5);
        process_job(&engine, &job, &[0]).await.unwrap();

        let txt = dir.path().join("clip_transcript.txt");
        let srt = dir.path().join("clip_transcript.srt");
        assert_eq!(
            std::fs::read_to_string(txt).unwrap().trim(),
            "bonjour tout le monde"
        );
        assert!(std::fs::read_to_string(srt).unwrap().contains("-->"));
    }

    #[tokio::test]
    async fn empty_transcript_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let audio = dir.path().join("silence.wav");
        std::fs::write(&audio, b"fake").unwrap();

        let engine = FixedEngine {
            transcript: Transcript {
                text: "   ".to_string(),
                segments: Vec::new(),
            },
        };
        let job = AudioJob::new(audio, 1.0);
        process_job(&engine, &job, &[0]).await.unwrap();

        assert!(!dir.path().join("silence_transcript.txt").exists());
        assert!(!dir.path().join("silence_transcript.srt").exists());
    }

    #[tokio::test]
    async fn engine_failure_propagates() {
        let dir = TempDir::new().unwrap();
        let job = AudioJob::new(dir.path().join("broken.mp3"), 10.0);
        let err = process_job(&FailingEngine, &job, &[0]).await.unwrap_err();
        assert!(matches!(err, AppError::Engine(_)));
    }
}
