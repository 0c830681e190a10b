//! Scheduler / orchestrator.
//!
//! Owns the task registry, the pending queue, global and per-host
//! admission control, retry and stall recovery, and periodic statistics.
//! The mutation surface is callable from any thread: all shared state sits
//! behind one mutex, held only for in-memory bookkeeping. Worker
//! completions and the periodic sweeps are processed by a single
//! event-loop task, and every externally visible notification is sent
//! after the lock is released, so a consumer that calls back into the
//! scheduler cannot deadlock.

mod run;
mod state;

use crate::config::EngineConfig;
use crate::events::DownloadEvent;
use crate::stats::DownloadStatistics;
use crate::task::{TaskId, TaskInfo, TaskStatus};
use crate::transfer::{self, CtlMsg, ProgressMsg};
use crate::transport::TransportPool;
use state::{AttemptSpawn, SchedulerState};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// The download engine's public handle. Cheap to clone; all clones drive
/// the same registry.
#[derive(Clone)]
pub struct DownloadScheduler {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) cfg: Arc<EngineConfig>,
    pool: Arc<TransportPool>,
    pub(crate) state: Mutex<SchedulerState>,
    ctl_tx: mpsc::UnboundedSender<CtlMsg>,
    prog_tx: mpsc::Sender<ProgressMsg>,
    events: mpsc::UnboundedSender<DownloadEvent>,
}

impl Inner {
    /// Send collected notifications. Callers must have dropped the state
    /// lock first.
    pub(crate) fn emit(&self, events: Vec<DownloadEvent>) {
        for ev in events {
            let _ = self.events.send(ev);
        }
    }

    /// Turn admission decisions into worker threads.
    pub(crate) fn spawn_attempts(&self, spawns: Vec<AttemptSpawn>) {
        for sp in spawns {
            let ctx = transfer::AttemptContext {
                id: sp.id,
                attempt: sp.attempt,
                url: sp.url,
                dest: sp.dest,
                known_size: sp.known_size,
                cfg: Arc::clone(&self.cfg),
                pool: Arc::clone(&self.pool),
                abort: sp.abort,
                received: sp.received,
                ctl_tx: self.ctl_tx.clone(),
                prog_tx: self.prog_tx.clone(),
            };
            std::thread::spawn(move || transfer::run_attempt(ctx));
        }
    }
}

impl DownloadScheduler {
    /// Builds the scheduler and spawns its event loop. Must be called from
    /// within a tokio runtime. The returned receiver delivers every
    /// lifecycle notification in order.
    pub fn new(cfg: EngineConfig) -> (Self, mpsc::UnboundedReceiver<DownloadEvent>) {
        let cfg = Arc::new(cfg);
        let pool = Arc::new(TransportPool::new(
            cfg.transport_pool_size,
            Duration::from_secs(cfg.request_timeout_secs.max(1)),
        ));
        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        let (prog_tx, prog_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            cfg: Arc::clone(&cfg),
            pool,
            state: Mutex::new(SchedulerState::new(cfg)),
            ctl_tx,
            prog_tx,
            events: event_tx,
        });
        tokio::spawn(run::run_loop(Arc::clone(&inner), ctl_rx, prog_rx));
        (Self { inner }, event_rx)
    }

    /// Registers a download and immediately tries to drain the queue.
    pub fn submit(
        &self,
        url: &str,
        dest: impl Into<PathBuf>,
        priority: i32,
        known_size: Option<u64>,
    ) -> TaskId {
        let (id, events, spawns) = {
            let mut st = self.inner.state.lock().unwrap();
            let (id, added) = st.register(url, dest.into(), priority, known_size);
            let mut events = vec![added];
            let (started, spawns) = st.drain();
            events.extend(started);
            (id, events, spawns)
        };
        tracing::info!(id = %id, url, "download added");
        self.inner.emit(events);
        self.inner.spawn_attempts(spawns);
        id
    }

    /// Batch submission; one task per `(url, destination)` pair.
    pub fn submit_many<I, P>(&self, items: I, priority: i32) -> Vec<TaskId>
    where
        I: IntoIterator<Item = (String, P)>,
        P: Into<PathBuf>,
    {
        items
            .into_iter()
            .map(|(url, dest)| self.submit(&url, dest, priority, None))
            .collect()
    }

    /// Pause a running task: aborts its requests, keeps identity and
    /// counters. Ignored unless the task is `Downloading`.
    pub fn pause(&self, id: TaskId) {
        let (events, spawns) = {
            let mut st = self.inner.state.lock().unwrap();
            let mut events = Vec::new();
            let mut spawns = Vec::new();
            if let Some(entry) = st.tasks.get_mut(&id) {
                if entry.status == TaskStatus::Downloading {
                    entry.abort.store(true, Ordering::Relaxed);
                    entry.status = TaskStatus::Paused;
                    st.leave_downloading(id);
                    events.push(DownloadEvent::Paused { id });
                    let (started, sp) = st.drain();
                    events.extend(started);
                    spawns = sp;
                }
            }
            (events, spawns)
        };
        self.inner.emit(events);
        self.inner.spawn_attempts(spawns);
    }

    /// Resume a paused task: back to the queue, restarting from zero when
    /// admitted. Ignored unless the task is `Paused`.
    pub fn resume(&self, id: TaskId) {
        let (events, spawns) = {
            let mut st = self.inner.state.lock().unwrap();
            let mut events = Vec::new();
            let mut spawns = Vec::new();
            if let Some(entry) = st.tasks.get_mut(&id) {
                if entry.status == TaskStatus::Paused {
                    entry.status = TaskStatus::Queued;
                    st.queue.push_back(id);
                    events.push(DownloadEvent::Resumed { id });
                    let (started, sp) = st.drain();
                    events.extend(started);
                    spawns = sp;
                }
            }
            (events, spawns)
        };
        self.inner.emit(events);
        self.inner.spawn_attempts(spawns);
    }

    /// Cancel permanently. Valid from any non-terminal state; repeated
    /// calls are no-ops.
    pub fn cancel(&self, id: TaskId) {
        let (events, spawns) = {
            let mut st = self.inner.state.lock().unwrap();
            let mut events = Vec::new();
            let mut spawns = Vec::new();
            if let Some(entry) = st.tasks.get_mut(&id) {
                if !entry.status.is_terminal() {
                    let was_downloading = entry.status == TaskStatus::Downloading;
                    entry.abort.store(true, Ordering::Relaxed);
                    entry.status = TaskStatus::Canceled;
                    if was_downloading {
                        st.leave_downloading(id);
                    }
                    events.push(DownloadEvent::Canceled { id });
                    if let Some(ev) = st.check_all_finished() {
                        events.push(ev);
                    }
                    let (started, sp) = st.drain();
                    events.extend(started);
                    spawns = sp;
                }
            }
            (events, spawns)
        };
        self.inner.emit(events);
        self.inner.spawn_attempts(spawns);
    }

    pub fn pause_all(&self) {
        for id in self.task_ids() {
            self.pause(id);
        }
    }

    pub fn resume_all(&self) {
        for id in self.task_ids() {
            self.resume(id);
        }
    }

    pub fn cancel_all(&self) {
        for id in self.task_ids() {
            self.cancel(id);
        }
    }

    /// Evicts every task in a terminal state from the registry.
    pub fn clear_finished(&self) {
        self.inner.state.lock().unwrap().clear_finished();
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        let st = self.inner.state.lock().unwrap();
        let mut ids: Vec<TaskId> = st.tasks.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn task_info(&self, id: TaskId) -> Option<TaskInfo> {
        let st = self.inner.state.lock().unwrap();
        st.tasks.get(&id).map(|t| t.info())
    }

    pub fn task_status(&self, id: TaskId) -> Option<TaskStatus> {
        let st = self.inner.state.lock().unwrap();
        st.tasks.get(&id).map(|t| t.status)
    }

    /// Percent complete (0–100); 0 while the size is unknown.
    pub fn progress(&self, id: TaskId) -> Option<f64> {
        let st = self.inner.state.lock().unwrap();
        st.tasks.get(&id).map(|t| {
            let info = t.info();
            match info.total_size {
                Some(total) if total > 0 => (info.downloaded as f64 * 100.0) / total as f64,
                _ => 0.0,
            }
        })
    }

    /// Point-in-time aggregate snapshot.
    pub fn statistics(&self) -> DownloadStatistics {
        self.inner.state.lock().unwrap().snapshot()
    }

    /// Cancels everything and stops the event loop. Further submissions
    /// are accepted but never admitted; intended as the final call.
    pub fn shutdown(&self) {
        self.cancel_all();
        let _ = self.inner.ctl_tx.send(CtlMsg::Shutdown);
    }
}
