//! Registry, queue, host accounting, and admission control.
//!
//! Everything here lives behind the scheduler's single mutex. Methods run
//! under the lock and hand back the events to emit and the attempts to
//! spawn once the lock is released; nothing in this module performs I/O.

use crate::config::EngineConfig;
use crate::error::TransferError;
use crate::events::DownloadEvent;
use crate::host::{self, HostCounters};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::stats::{DownloadStatistics, SpeedSampler};
use crate::task::{TaskId, TaskInfo, TaskStatus};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// One registry entry. The `received` counter and `abort` token are
/// replaced at every admission so a restart can never append to stale
/// state; the worker holds clones of the previous pair, whose messages
/// then fail the attempt-epoch guard.
pub(crate) struct TaskEntry {
    pub id: TaskId,
    pub url: String,
    pub host: Option<String>,
    pub dest: PathBuf,
    pub priority: i32,
    pub known_size: Option<u64>,
    pub status: TaskStatus,
    pub retry_count: u32,
    /// Admission epoch; bumped each time the task enters `Downloading`.
    pub attempt: u64,
    pub total_size: Option<u64>,
    pub supports_range: bool,
    pub segment_count: usize,
    pub error: Option<String>,
    pub received: Arc<AtomicU64>,
    pub abort: Arc<AtomicBool>,
    pub last_progress: Instant,
}

impl TaskEntry {
    pub(crate) fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id,
            url: self.url.clone(),
            save_path: self.dest.clone(),
            priority: self.priority,
            status: self.status,
            total_size: self.total_size,
            downloaded: self.received.load(Ordering::Relaxed),
            supports_range: self.supports_range,
            segment_count: self.segment_count,
            retry_count: self.retry_count,
            error: self.error.clone(),
        }
    }
}

/// Data an admitted attempt needs; the caller turns it into a worker
/// thread after the lock is dropped.
pub(crate) struct AttemptSpawn {
    pub id: TaskId,
    pub attempt: u64,
    pub url: String,
    pub dest: PathBuf,
    pub known_size: Option<u64>,
    pub abort: Arc<AtomicBool>,
    pub received: Arc<AtomicU64>,
}

pub(crate) struct SchedulerState {
    cfg: Arc<EngineConfig>,
    retry: RetryPolicy,
    pub tasks: HashMap<TaskId, TaskEntry>,
    pub queue: VecDeque<TaskId>,
    pub hosts: HostCounters,
    pub active: usize,
    next_id: u64,
    pub sampler: SpeedSampler,
    pub last_sample_at: Option<Instant>,
    pub current_speed: u64,
    pub completed: usize,
    pub failed: usize,
    all_finished_emitted: bool,
}

impl SchedulerState {
    pub(crate) fn new(cfg: Arc<EngineConfig>) -> Self {
        let retry = RetryPolicy {
            auto_retry: cfg.auto_retry,
            max_retry_count: cfg.max_retry_count,
        };
        Self {
            cfg,
            retry,
            tasks: HashMap::new(),
            queue: VecDeque::new(),
            hosts: HostCounters::new(),
            active: 0,
            next_id: 0,
            sampler: SpeedSampler::new(),
            last_sample_at: None,
            current_speed: 0,
            completed: 0,
            failed: 0,
            all_finished_emitted: false,
        }
    }

    /// Registers a new task in `Queued` and returns its id with the
    /// `Added` event.
    pub(crate) fn register(
        &mut self,
        url: &str,
        dest: PathBuf,
        priority: i32,
        known_size: Option<u64>,
    ) -> (TaskId, DownloadEvent) {
        self.next_id += 1;
        let id = TaskId(self.next_id);
        let entry = TaskEntry {
            id,
            url: url.to_string(),
            host: host::host_of(url),
            dest,
            priority,
            known_size,
            status: TaskStatus::Queued,
            retry_count: 0,
            attempt: 0,
            total_size: known_size,
            supports_range: false,
            segment_count: 1,
            error: None,
            received: Arc::new(AtomicU64::new(0)),
            abort: Arc::new(AtomicBool::new(false)),
            last_progress: Instant::now(),
        };
        self.tasks.insert(id, entry);
        self.queue.push_back(id);
        (
            id,
            DownloadEvent::Added {
                id,
                url: url.to_string(),
            },
        )
    }

    /// Queue drain: admits head tasks while a global slot is free. A head
    /// whose host is at its cap goes back to the tail and the pass stops,
    /// bounding reordering to one queue length per pass.
    pub(crate) fn drain(&mut self) -> (Vec<DownloadEvent>, Vec<AttemptSpawn>) {
        let mut events = Vec::new();
        let mut spawns = Vec::new();

        while self.active < self.cfg.max_concurrent_downloads {
            let Some(id) = self.queue.pop_front() else {
                break;
            };
            let Some(entry) = self.tasks.get(&id) else {
                continue; // cleared while queued
            };
            if entry.status != TaskStatus::Queued {
                continue; // canceled while queued
            }
            if let Some(h) = &entry.host {
                if self.hosts.count(h) >= self.cfg.max_connections_per_host {
                    self.queue.push_back(id);
                    break;
                }
            }

            let entry = self.tasks.get_mut(&id).expect("entry checked above");
            entry.status = TaskStatus::Downloading;
            entry.attempt += 1;
            entry.abort = Arc::new(AtomicBool::new(false));
            entry.received = Arc::new(AtomicU64::new(0));
            entry.error = None;
            entry.last_progress = Instant::now();
            if let Some(h) = &entry.host {
                self.hosts.increment(h);
            }
            self.active += 1;

            events.push(DownloadEvent::Started { id });
            spawns.push(AttemptSpawn {
                id,
                attempt: entry.attempt,
                url: entry.url.clone(),
                dest: entry.dest.clone(),
                known_size: entry.known_size,
                abort: Arc::clone(&entry.abort),
                received: Arc::clone(&entry.received),
            });
        }

        (events, spawns)
    }

    /// Accounting for any exit from `Downloading`: the host slot and the
    /// active slot are released immediately, whatever the outcome.
    pub(crate) fn leave_downloading(&mut self, id: TaskId) {
        if let Some(entry) = self.tasks.get(&id) {
            if let Some(h) = entry.host.clone() {
                self.hosts.decrement(&h);
            }
        }
        self.active = self.active.saturating_sub(1);
    }

    /// Terminal handling for a finished attempt. Caller has verified the
    /// task is still `Downloading` with a matching attempt epoch.
    pub(crate) fn conclude_attempt(
        &mut self,
        id: TaskId,
        outcome: Result<u64, TransferError>,
    ) -> Vec<DownloadEvent> {
        self.leave_downloading(id);
        let Some(entry) = self.tasks.get_mut(&id) else {
            return Vec::new();
        };

        match outcome {
            Ok(size) => {
                entry.status = TaskStatus::Completed;
                entry.total_size = Some(size);
                entry.error = None;
                self.completed += 1;
                tracing::info!(id = %id, size, "download completed");
                vec![DownloadEvent::Finished {
                    id,
                    save_path: entry.dest.clone(),
                }]
            }
            Err(e) => match self.retry.decide(entry.retry_count, &e) {
                RetryDecision::Requeue(next) => {
                    entry.retry_count = next;
                    entry.error = Some(e.to_string());
                    entry.status = TaskStatus::Queued;
                    // Detach from the dying worker's counter so the next
                    // attempt visibly restarts from zero.
                    entry.received = Arc::new(AtomicU64::new(0));
                    self.queue.push_back(id);
                    tracing::warn!(id = %id, retry = next, error = %e, "attempt failed, requeueing");
                    vec![DownloadEvent::Retrying {
                        id,
                        retry_count: next,
                    }]
                }
                RetryDecision::Fail => {
                    entry.status = TaskStatus::Failed;
                    entry.error = Some(e.to_string());
                    self.failed += 1;
                    tracing::warn!(id = %id, error = %e, "download failed");
                    vec![DownloadEvent::Failed {
                        id,
                        error: e.to_string(),
                    }]
                }
            },
        }
    }

    /// Aggregate transferred bytes: completed tasks contribute their
    /// confirmed size, in-flight tasks their live counter, everything else
    /// nothing.
    pub(crate) fn aggregate_bytes(&self) -> u64 {
        self.tasks
            .values()
            .map(|t| match t.status {
                TaskStatus::Completed => t
                    .total_size
                    .unwrap_or_else(|| t.received.load(Ordering::Relaxed)),
                TaskStatus::Downloading => t.received.load(Ordering::Relaxed),
                _ => 0,
            })
            .sum()
    }

    pub(crate) fn snapshot(&self) -> DownloadStatistics {
        DownloadStatistics {
            active_downloads: self
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::Downloading)
                .count(),
            queued_downloads: self
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::Queued)
                .count(),
            completed_tasks: self.completed,
            failed_tasks: self.failed,
            total_downloaded: self.aggregate_bytes(),
            download_speed: self.current_speed,
        }
    }

    /// One-shot completion signal: fires when every registered task is
    /// terminal, at most once per scheduler lifetime.
    pub(crate) fn check_all_finished(&mut self) -> Option<DownloadEvent> {
        if self.all_finished_emitted || self.tasks.is_empty() {
            return None;
        }
        if self.tasks.values().all(|t| t.status.is_terminal()) {
            self.all_finished_emitted = true;
            return Some(DownloadEvent::AllFinished);
        }
        None
    }

    /// Evicts tasks in any terminal state.
    pub(crate) fn clear_finished(&mut self) {
        self.tasks.retain(|_, t| !t.status.is_terminal());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(max_concurrent: usize, per_host: usize) -> SchedulerState {
        let cfg = EngineConfig {
            max_concurrent_downloads: max_concurrent,
            max_connections_per_host: per_host,
            auto_retry: true,
            max_retry_count: 2,
            ..EngineConfig::default()
        };
        SchedulerState::new(Arc::new(cfg))
    }

    fn submit(s: &mut SchedulerState, url: &str) -> TaskId {
        let (id, _) = s.register(url, PathBuf::from("/tmp/x"), 0, None);
        id
    }

    fn downloading_count(s: &SchedulerState) -> usize {
        s.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Downloading)
            .count()
    }

    #[test]
    fn drain_respects_global_cap() {
        let mut s = state(2, 8);
        for i in 0..4 {
            submit(&mut s, &format!("http://h{}.example/f", i));
        }
        let (events, spawns) = s.drain();
        assert_eq!(spawns.len(), 2);
        assert_eq!(events.len(), 2);
        assert_eq!(s.active, 2);
        assert_eq!(downloading_count(&s), s.active);
        assert_eq!(s.queue.len(), 2);
    }

    #[test]
    fn host_cap_requeues_head_and_stops_pass() {
        let mut s = state(8, 1);
        let a = submit(&mut s, "http://same.example/a");
        let b = submit(&mut s, "http://same.example/b");
        let c = submit(&mut s, "http://same.example/c");

        let (_, spawns) = s.drain();
        assert_eq!(spawns.len(), 1);
        assert_eq!(spawns[0].id, a);
        // b was popped, denied, and pushed to the tail; the pass stopped.
        assert_eq!(s.queue.len(), 2);
        assert_eq!(s.tasks[&b].status, TaskStatus::Queued);
        assert_eq!(s.tasks[&c].status, TaskStatus::Queued);

        // Releasing the host slot lets exactly one more through.
        let evs = s.conclude_attempt(a, Ok(100));
        assert!(matches!(evs[0], DownloadEvent::Finished { .. }));
        let (_, spawns) = s.drain();
        assert_eq!(spawns.len(), 1);
        assert_eq!(s.hosts.count("same.example"), 1);
    }

    #[test]
    fn admission_resets_counters_and_bumps_attempt() {
        let mut s = state(8, 8);
        let id = submit(&mut s, "http://h.example/f");
        let (_, spawns) = s.drain();
        assert_eq!(spawns[0].attempt, 1);
        spawns[0].received.store(500, Ordering::Relaxed);

        let _ = s.conclude_attempt(id, Err(TransferError::Http(500)));
        assert_eq!(s.tasks[&id].status, TaskStatus::Queued);
        let (_, spawns) = s.drain();
        assert_eq!(spawns[0].attempt, 2);
        assert_eq!(spawns[0].received.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn retry_budget_exhaustion_fails_task() {
        let mut s = state(8, 8);
        let id = submit(&mut s, "http://h.example/f");
        // max_retry_count = 2 -> attempts 1..=3.
        for expected_retry in 1..=2u32 {
            let _ = s.drain();
            let evs = s.conclude_attempt(id, Err(TransferError::Http(500)));
            assert!(
                matches!(evs[0], DownloadEvent::Retrying { retry_count, .. } if retry_count == expected_retry)
            );
        }
        let _ = s.drain();
        let evs = s.conclude_attempt(id, Err(TransferError::Http(500)));
        assert!(matches!(evs[0], DownloadEvent::Failed { .. }));
        assert_eq!(s.tasks[&id].status, TaskStatus::Failed);
        assert_eq!(s.failed, 1);
        assert_eq!(s.hosts.count("h.example"), 0);
    }

    #[test]
    fn environment_failure_skips_retry() {
        let mut s = state(8, 8);
        let id = submit(&mut s, "http://h.example/f");
        let _ = s.drain();
        let err = TransferError::Setup {
            path: PathBuf::from("/nope"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let evs = s.conclude_attempt(id, Err(err));
        assert!(matches!(evs[0], DownloadEvent::Failed { .. }));
    }

    #[test]
    fn canceled_while_queued_is_skipped_by_drain() {
        let mut s = state(8, 8);
        let id = submit(&mut s, "http://h.example/f");
        s.tasks.get_mut(&id).unwrap().status = TaskStatus::Canceled;
        let (_, spawns) = s.drain();
        assert!(spawns.is_empty());
        assert!(s.queue.is_empty());
    }

    #[test]
    fn all_finished_fires_exactly_once() {
        let mut s = state(8, 8);
        let id = submit(&mut s, "http://h.example/f");
        assert!(s.check_all_finished().is_none());
        let _ = s.drain();
        let _ = s.conclude_attempt(id, Ok(10));
        assert!(matches!(
            s.check_all_finished(),
            Some(DownloadEvent::AllFinished)
        ));
        assert!(s.check_all_finished().is_none());
    }

    #[test]
    fn snapshot_counts_match_registry() {
        let mut s = state(1, 8);
        let a = submit(&mut s, "http://h1.example/a");
        submit(&mut s, "http://h2.example/b");
        let _ = s.drain();
        s.tasks[&a].received.store(1234, Ordering::Relaxed);

        let snap = s.snapshot();
        assert_eq!(snap.active_downloads, 1);
        assert_eq!(snap.queued_downloads, 1);
        assert_eq!(snap.total_downloaded, 1234);

        let _ = s.conclude_attempt(a, Ok(2000));
        let snap = s.snapshot();
        // Completed tasks report their confirmed size, not the live counter.
        assert_eq!(snap.total_downloaded, 2000);
        assert_eq!(snap.completed_tasks, 1);
    }

    #[test]
    fn clear_finished_keeps_live_tasks() {
        let mut s = state(8, 8);
        let a = submit(&mut s, "http://h.example/a");
        let b = submit(&mut s, "http://h.example/b");
        let _ = s.drain();
        let _ = s.conclude_attempt(a, Ok(10));
        s.clear_finished();
        assert!(!s.tasks.contains_key(&a));
        assert!(s.tasks.contains_key(&b));
    }
}
