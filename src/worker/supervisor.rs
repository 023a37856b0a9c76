//! Launching and monitoring worker processes.
//!
//! The supervisor turns a balanced distribution into per-worker
//! assignments, re-executes the current binary once per non-empty bin,
//! and folds the event streams back into the shared metrics calculator.
//! Workers are isolated processes: one crashing loses its own remaining
//! jobs but never the batch.

use std::env;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use futures::future::join_all;
use metrics::counter;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::balance::Distribution;
use crate::config::Config;
use crate::constants::worker::WORKER_SENTINEL;
use crate::error::{AppError, Result};
use crate::qos::{JobRecord, MetricsCalculator};
use crate::worker::affinity;
use crate::worker::protocol::{self, Assignment, WorkerEvent};

/// Aggregate result of one supervision run.
#[derive(Debug, Clone, Default)]
pub struct SupervisorStats {
    pub launched: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub crashed_workers: usize,
    pub interrupted: bool,
}

/// Per-worker tally kept while draining its event stream.
#[derive(Debug, Default)]
struct WorkerOutcome {
    completed: usize,
    failed: usize,
    crashed: bool,
}

pub struct WorkerSupervisor {
    config: Arc<Config>,
    metrics: Arc<MetricsCalculator>,
}

impl WorkerSupervisor {
    pub fn new(config: Arc<Config>, metrics: Arc<MetricsCalculator>) -> Self {
        Self { config, metrics }
    }

    /// Pair each non-empty bin with its core set.
    ///
    /// Worker indices are 1-based and follow bin order, so tracker file
    /// names line up with the distribution log. Empty bins are skipped
    /// rather than launched idle.
    pub fn build_assignments(&self, distribution: &Distribution) -> Result<Vec<Assignment>> {
        let core_sets = self.core_sets(distribution.bins.len())?;

        let mut assignments = Vec::new();
        for (index, bin) in distribution.bins.iter().enumerate() {
            if bin.is_empty() {
                warn!("Worker {} has no jobs, not launching it", index + 1);
                continue;
            }
            assignments.push(Assignment {
                worker_index: index + 1,
                jobs: bin.clone(),
                cpu_cores: core_sets[index].clone(),
            });
        }
        Ok(assignments)
    }

    /// Core set per worker slot.
    ///
    /// Explicit `worker_cores` wins when it covers every slot. Otherwise
    /// the thread budget (configured, else detected) is split into
    /// contiguous equal ranges. Fewer cores than workers degrades to one
    /// shared core per worker instead of refusing to run.
    fn core_sets(&self, worker_count: usize) -> Result<Vec<Vec<usize>>> {
        if let Some(explicit) = &self.config.worker_cores {
            if explicit.len() >= worker_count {
                return Ok(explicit[..worker_count].to_vec());
            }
            warn!(
                "worker_cores lists {} sets for {} workers, using automatic split instead",
                explicit.len(),
                worker_count
            );
        }

        let detected = affinity::available_cores().len();
        let threads = if self.config.cpu_threads > 0 {
            self.config.cpu_threads
        } else if detected > 0 {
            detected
        } else {
            num_cpus::get()
        };
        if threads == 0 {
            return Err(AppError::Worker("no usable CPU cores detected".to_string()));
        }

        if threads < worker_count {
            warn!(
                "{} workers for {} cores, workers will share cores",
                worker_count, threads
            );
            return Ok((0..worker_count).map(|index| vec![index % threads]).collect());
        }

        let per_worker = threads / worker_count;
        Ok((0..worker_count)
            .map(|index| (index * per_worker..(index + 1) * per_worker).collect())
            .collect())
    }

    /// Launch all workers and wait for them.
    ///
    /// On Ctrl-C the wait stops and partial stats are returned; the
    /// detached supervision tasks keep draining child pipes so workers
    /// finishing their current job never block on a full stdout.
    pub async fn run(&self, assignments: Vec<Assignment>) -> Result<SupervisorStats> {
        if assignments.is_empty() {
            warn!("No worker assignments, nothing to run");
            return Ok(SupervisorStats::default());
        }

        let exe = env::current_exe()?;
        let mut stats = SupervisorStats {
            launched: assignments.len(),
            ..Default::default()
        };
        info!("Launching {} workers via {}", assignments.len(), exe.display());

        let handles: Vec<_> = assignments
            .into_iter()
            .map(|assignment| {
                let exe = exe.clone();
                let metrics = self.metrics.clone();
                tokio::spawn(supervise_worker(exe, assignment, metrics))
            })
            .collect();

        let joined = join_all(handles);
        tokio::pin!(joined);

        let outcomes = tokio::select! {
            outcomes = &mut joined => outcomes,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupt received, workers will stop after their current job");
                stats.interrupted = true;
                return Ok(stats);
            }
        };

        for outcome in outcomes {
            match outcome {
                Ok(outcome) => {
                    stats.completed_jobs += outcome.completed;
                    stats.failed_jobs += outcome.failed;
                    if outcome.crashed {
                        stats.crashed_workers += 1;
                    }
                }
                Err(e) => {
                    error!("Worker supervision task failed: {}", e);
                    stats.crashed_workers += 1;
                }
            }
        }

        info!(
            "All workers finished: {} completed, {} failed, {} crashed",
            stats.completed_jobs, stats.failed_jobs, stats.crashed_workers
        );
        Ok(stats)
    }
}

/// Drive one worker process from spawn to exit.
async fn supervise_worker(
    exe: PathBuf,
    assignment: Assignment,
    metrics: Arc<MetricsCalculator>,
) -> WorkerOutcome {
    let worker_index = assignment.worker_index;
    let mut outcome = WorkerOutcome::default();

    let mut child = match Command::new(&exe)
        .arg(WORKER_SENTINEL)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            error!("Worker {}: spawn failed: {}", worker_index, e);
            counter!("pinbatch_worker_crashes_total").increment(1);
            outcome.crashed = true;
            return outcome;
        }
    };

    let encoded = match serde_json::to_string(&assignment) {
        Ok(encoded) => encoded,
        Err(e) => {
            error!("Worker {}: assignment encoding failed: {}", worker_index, e);
            let _ = child.kill().await;
            outcome.crashed = true;
            return outcome;
        }
    };

    // Single assignment line, then EOF on the worker's stdin.
    if let Some(mut stdin) = child.stdin.take() {
        let handoff = async {
            stdin.write_all(encoded.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await?;
            std::io::Result::Ok(())
        };
        if let Err(e) = handoff.await {
            error!("Worker {}: assignment handoff failed: {}", worker_index, e);
        }
    }

    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match protocol::parse_event(&line) {
                        Ok(event) => handle_event(worker_index, event, &metrics, &mut outcome),
                        Err(e) => {
                            warn!("Worker {}: unreadable event {:?}: {}", worker_index, line, e)
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Worker {}: event stream read failed: {}", worker_index, e);
                    break;
                }
            }
        }
    }

    match child.wait().await {
        Ok(status) if status.success() => {
            debug!("Worker {}: exited cleanly", worker_index);
        }
        Ok(status) => {
            error!(
                "Worker {}: crashed with {}, its unfinished jobs are lost",
                worker_index, status
            );
            counter!("pinbatch_worker_crashes_total").increment(1);
            outcome.crashed = true;
        }
        Err(e) => {
            error!("Worker {}: wait failed: {}", worker_index, e);
            outcome.crashed = true;
        }
    }

    outcome
}

fn handle_event(
    worker_index: usize,
    event: WorkerEvent,
    metrics: &MetricsCalculator,
    outcome: &mut WorkerOutcome,
) {
    match event {
        WorkerEvent::Started { job, audio_secs } => {
            debug!(
                "Worker {}: started {} ({:.1}s audio)",
                worker_index, job, audio_secs
            );
        }
        WorkerEvent::Finished {
            job,
            audio_secs,
            processing_secs,
        } => {
            outcome.completed += 1;
            metrics.add_record(JobRecord {
                file_path: job,
                audio_secs,
                processing_secs,
                success: true,
            });
            counter!("pinbatch_jobs_completed_total", "worker" => worker_index.to_string())
                .increment(1);
        }
        WorkerEvent::Failed {
            job,
            audio_secs,
            processing_secs,
            reason,
        } => {
            outcome.failed += 1;
            warn!("Worker {}: {} failed: {}", worker_index, job, reason);
            metrics.add_record(JobRecord {
                file_path: job,
                audio_secs,
                processing_secs,
                success: false,
            });
            counter!("pinbatch_jobs_failed_total", "worker" => worker_index.to_string())
                .increment(1);
        }
        WorkerEvent::Done {
            completed,
            failed,
            skipped,
        } => {
            info!(
                "Worker {}: done ({} completed, {} failed, {} skipped)",
                worker_index, completed, failed, skipped
            );
        }
    }
}
