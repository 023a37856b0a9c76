//! Duration-balanced job distribution.
//!
//! Jobs are spread across worker bins so that every worker receives a
//! similar total audio duration. The classic mode is a longest-processing-time
//! greedy: jobs sorted by decreasing duration, each placed into the bin with
//! the smallest running sum, tracked with a min-heap. A fixed-assignment mode
//! bypasses balancing when the input tree already groups files into
//! per-worker directories.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;
use tracing::{info, warn};

use crate::catalog::AudioJob;

/// Marker recognized in parent directory names for fixed assignments.
const GROUP_MARKER: &str = "core";

/// Result of distributing jobs across workers.
#[derive(Debug, Clone, Default)]
pub struct Distribution {
    /// One ordered job list per worker slot.
    pub bins: Vec<Vec<AudioJob>>,
    /// Jobs that no bin could accept under the capacity cap.
    pub dropped: Vec<AudioJob>,
}

impl Distribution {
    /// Total audio duration per bin, in seconds.
    pub fn bin_durations(&self) -> Vec<f64> {
        self.bins
            .iter()
            .map(|bin| bin.iter().map(|job| job.duration_secs).sum())
            .collect()
    }

    /// Number of assigned jobs across all bins.
    pub fn assigned_count(&self) -> usize {
        self.bins.iter().map(Vec::len).sum()
    }

    /// Total assigned audio duration in seconds.
    pub fn total_duration(&self) -> f64 {
        self.bin_durations().iter().sum()
    }
}

/// Distribute jobs across `worker_count` bins.
///
/// Uses the fixed per-directory assignment when the input tree follows the
/// group naming convention, otherwise balances by duration.
pub fn distribute(jobs: Vec<AudioJob>, worker_count: usize, cap: Option<usize>) -> Distribution {
    let distribution = match group_by_core_dirs(&jobs, worker_count, cap) {
        Some(distribution) => {
            info!(
                "Fixed assignment mode: {} directory groups",
                distribution.bins.iter().filter(|b| !b.is_empty()).count()
            );
            distribution
        }
        None => {
            info!("Balancing {} jobs over {} workers by duration", jobs.len(), worker_count);
            balance(jobs, worker_count, cap)
        }
    };

    log_balance_stats(&distribution);
    distribution
}

/// Longest-processing-time greedy balancing.
///
/// Jobs are sorted by decreasing duration and each one goes to the bin with
/// the smallest running sum; ties resolve to the lowest bin index. With a
/// capacity cap, bins holding `cap` jobs stop competing, and once every bin
/// is full the remaining jobs are dropped with a warning.
pub fn balance(jobs: Vec<AudioJob>, worker_count: usize, cap: Option<usize>) -> Distribution {
    if worker_count == 0 {
        warn!("No worker slots available, dropping {} jobs", jobs.len());
        return Distribution {
            bins: Vec::new(),
            dropped: jobs,
        };
    }

    let mut sorted = jobs;
    sorted.sort_by(|a, b| {
        b.duration_secs
            .partial_cmp(&a.duration_secs)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut bins: Vec<Vec<AudioJob>> = vec![Vec::new(); worker_count];
    let mut dropped = Vec::new();

    // Min-heap over (running sum, bin index); the tuple order makes ties
    // resolve to the lowest index.
    let mut heap: BinaryHeap<Reverse<(OrderedFloat<f64>, usize)>> = (0..worker_count)
        .map(|index| Reverse((OrderedFloat(0.0), index)))
        .collect();

    for job in sorted {
        match heap.pop() {
            Some(Reverse((sum, index))) => {
                let new_sum = OrderedFloat(sum.into_inner() + job.duration_secs);
                bins[index].push(job);
                if cap.map_or(true, |cap| bins[index].len() < cap) {
                    heap.push(Reverse((new_sum, index)));
                }
            }
            None => {
                dropped.push(job);
            }
        }
    }

    if !dropped.is_empty() {
        warn!(
            "Capacity cap reached on every worker, {} jobs dropped",
            dropped.len()
        );
    }

    Distribution { bins, dropped }
}

/// Fixed assignment from per-worker directories.
///
/// Active when jobs span more than one parent directory and at least one of
/// the directory names carries the group marker followed by digits. Groups
/// are ordered by that embedded integer, truncated to `worker_count`, and
/// each becomes one bin verbatim (clamped to the capacity cap).
pub fn group_by_core_dirs(
    jobs: &[AudioJob],
    worker_count: usize,
    cap: Option<usize>,
) -> Option<Distribution> {
    let mut groups: Vec<(String, Vec<AudioJob>)> = Vec::new();
    for job in jobs {
        let parent = job
            .path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match groups.iter_mut().find(|(name, _)| *name == parent) {
            Some((_, members)) => members.push(job.clone()),
            None => groups.push((parent, vec![job.clone()])),
        }
    }

    if groups.len() <= 1 || !groups.iter().any(|(name, _)| group_key(name).is_some()) {
        return None;
    }

    groups.sort_by(|(a, _), (b, _)| {
        let ka = group_key(a).unwrap_or(u64::MAX);
        let kb = group_key(b).unwrap_or(u64::MAX);
        ka.cmp(&kb).then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
    });

    let mut dropped = Vec::new();
    if groups.len() > worker_count {
        warn!(
            "{} directory groups found but only {} worker slots, extra groups are dropped",
            groups.len(),
            worker_count
        );
        for (_, members) in groups.drain(worker_count..) {
            dropped.extend(members);
        }
    }

    let mut bins = Vec::with_capacity(worker_count);
    for (name, mut members) in groups {
        if let Some(cap) = cap {
            if members.len() > cap {
                info!(
                    "{}: {} files found, limited to {}",
                    name,
                    members.len(),
                    cap
                );
                dropped.extend(members.split_off(cap));
            }
        }
        let hours = members.iter().map(|j| j.duration_secs).sum::<f64>() / 3600.0;
        info!("Worker slot {} <- {} ({} files, {:.1}h)", bins.len() + 1, name, members.len(), hours);
        bins.push(members);
    }
    bins.resize(worker_count, Vec::new());

    Some(Distribution { bins, dropped })
}

/// Integer embedded after the group marker, if any.
fn group_key(name: &str) -> Option<u64> {
    let lowered = name.to_lowercase();
    let start = lowered.find(GROUP_MARKER)? + GROUP_MARKER.len();
    let digits: String = lowered[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn log_balance_stats(distribution: &Distribution) {
    let durations = distribution.bin_durations();
    for (index, (bin, total)) in distribution.bins.iter().zip(&durations).enumerate() {
        info!(
            "Bin {}: {} files, total duration {:.2}s ({:.2}h)",
            index + 1,
            bin.len(),
            total,
            total / 3600.0
        );
    }

    if durations.is_empty() {
        return;
    }
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;
    let variance =
        durations.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / durations.len() as f64;
    info!(
        "Distribution complete, mean {:.2}s, standard deviation {:.2}s",
        mean,
        variance.sqrt()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(path: &str, duration: f64) -> AudioJob {
        AudioJob::new(path, duration)
    }

    #[test]
    fn heaviest_jobs_placed_first() {
        let jobs = vec![
            job("a.mp3", 10.0),
            job("b.mp3", 8.0),
            job("c.mp3", 5.0),
            job("d.mp3", 3.0),
        ];
        let dist = balance(jobs, 2, None);

        let durations: Vec<Vec<f64>> = dist
            .bins
            .iter()
            .map(|bin| bin.iter().map(|j| j.duration_secs).collect())
            .collect();
        assert_eq!(durations, vec![vec![10.0, 3.0], vec![8.0, 5.0]]);
        assert!(dist.dropped.is_empty());
    }

    #[test]
    fn ties_resolve_to_lowest_bin_index() {
        let jobs = vec![job("a.mp3", 5.0), job("b.mp3", 5.0), job("c.mp3", 5.0)];
        let dist = balance(jobs, 3, None);
        assert_eq!(dist.bins[0].len(), 1);
        assert_eq!(dist.bins[1].len(), 1);
        assert_eq!(dist.bins[2].len(), 1);
    }

    #[test]
    fn equal_durations_spread_within_one_job() {
        let jobs: Vec<AudioJob> = (0..10).map(|i| job(&format!("{i}.mp3"), 100.0)).collect();
        let dist = balance(jobs, 3, None);

        let sizes: Vec<usize> = dist.bins.iter().map(Vec::len).collect();
        let max = *sizes.iter().max().unwrap();
        let min = *sizes.iter().min().unwrap();
        assert!(max - min <= 1);

        let durations = dist.bin_durations();
        let spread = durations.iter().cloned().fold(f64::MIN, f64::max)
            - durations.iter().cloned().fold(f64::MAX, f64::min);
        assert!(spread <= 100.0);
    }

    #[test]
    fn no_jobs_are_lost_or_duplicated() {
        let jobs: Vec<AudioJob> = (0..37)
            .map(|i| job(&format!("{i}.mp3"), 1.0 + (i % 7) as f64 * 13.5))
            .collect();
        let input_total: f64 = jobs.iter().map(|j| j.duration_secs).sum();

        let dist = balance(jobs, 4, None);
        assert_eq!(dist.assigned_count(), 37);
        assert!((dist.total_duration() - input_total).abs() < 1e-9);
    }

    #[test]
    fn capacity_cap_drops_smallest_jobs() {
        let jobs = vec![
            job("a.mp3", 50.0),
            job("b.mp3", 40.0),
            job("c.mp3", 30.0),
            job("d.mp3", 20.0),
            job("e.mp3", 10.0),
        ];
        let dist = balance(jobs, 2, Some(2));

        assert_eq!(dist.assigned_count(), 4);
        assert_eq!(dist.dropped.len(), 1);
        assert_eq!(dist.dropped[0].duration_secs, 10.0);
    }

    #[test]
    fn empty_input_yields_empty_bins() {
        let dist = balance(Vec::new(), 3, None);
        assert_eq!(dist.bins.len(), 3);
        assert!(dist.bins.iter().all(Vec::is_empty));
        assert!(dist.dropped.is_empty());
    }

    #[test]
    fn zero_workers_drop_everything() {
        let dist = balance(vec![job("a.mp3", 1.0)], 0, None);
        assert!(dist.bins.is_empty());
        assert_eq!(dist.dropped.len(), 1);
    }

    #[test]
    fn group_mode_orders_naturally() {
        let jobs = vec![
            job("audio/Core10/late.mp3", 5.0),
            job("audio/Core2/second.mp3", 5.0),
            job("audio/Core1/first.mp3", 5.0),
        ];
        let dist = group_by_core_dirs(&jobs, 3, None).unwrap();

        assert_eq!(dist.bins[0][0].file_name(), "first.mp3");
        assert_eq!(dist.bins[1][0].file_name(), "second.mp3");
        assert_eq!(dist.bins[2][0].file_name(), "late.mp3");
    }

    #[test]
    fn group_mode_truncates_extra_groups() {
        let jobs = vec![
            job("audio/core1/a.mp3", 1.0),
            job("audio/core2/b.mp3", 1.0),
            job("audio/core3/c.mp3", 1.0),
        ];
        let dist = group_by_core_dirs(&jobs, 2, None).unwrap();

        assert_eq!(dist.bins.len(), 2);
        assert_eq!(dist.dropped.len(), 1);
        assert_eq!(dist.dropped[0].file_name(), "c.mp3");
    }

    #[test]
    fn group_mode_honors_capacity_cap() {
        let jobs = vec![
            job("audio/core1/a.mp3", 1.0),
            job("audio/core1/b.mp3", 1.0),
            job("audio/core1/c.mp3", 1.0),
            job("audio/core2/d.mp3", 1.0),
        ];
        let dist = group_by_core_dirs(&jobs, 2, Some(2)).unwrap();

        assert_eq!(dist.bins[0].len(), 2);
        assert_eq!(dist.dropped.len(), 1);
    }

    #[test]
    fn single_directory_is_not_group_mode() {
        let jobs = vec![job("audio/core1/a.mp3", 1.0), job("audio/core1/b.mp3", 1.0)];
        assert!(group_by_core_dirs(&jobs, 2, None).is_none());
    }

    #[test]
    fn unmarked_directories_are_not_group_mode() {
        let jobs = vec![job("audio/north/a.mp3", 1.0), job("audio/south/b.mp3", 1.0)];
        assert!(group_by_core_dirs(&jobs, 2, None).is_none());
    }

    #[test]
    fn group_key_extracts_embedded_integer() {
        assert_eq!(group_key("Core12"), Some(12));
        assert_eq!(group_key("core3_extra"), Some(3));
        assert_eq!(group_key("core"), None);
        assert_eq!(group_key("north"), None);
    }

    #[test]
    fn distribute_falls_back_to_balancing() {
        let jobs = vec![job("flat/a.mp3", 9.0), job("flat/b.mp3", 1.0)];
        let dist = distribute(jobs, 2, None);
        assert_eq!(dist.assigned_count(), 2);
        assert_eq!(dist.bins.len(), 2);
    }
}
