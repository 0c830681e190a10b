//! Scheduler event loop.
//!
//! One task consumes worker completions and progress pings and drives the
//! two periodic sweeps: statistics sampling and stall detection, on
//! independent periods. Handlers take the registry lock, compute the
//! transition, and emit notifications only after the lock is dropped.

use super::Inner;
use crate::error::TransferError;
use crate::events::DownloadEvent;
use crate::task::{TaskId, TaskStatus};
use crate::transfer::{CtlMsg, ProgressMsg};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

pub(crate) async fn run_loop(
    inner: Arc<Inner>,
    mut ctl_rx: mpsc::UnboundedReceiver<CtlMsg>,
    mut prog_rx: mpsc::Receiver<ProgressMsg>,
) {
    let mut stats_tick =
        tokio::time::interval(Duration::from_millis(inner.cfg.stats_interval_ms.max(50)));
    let mut monitor_tick =
        tokio::time::interval(Duration::from_millis(inner.cfg.monitor_interval_ms.max(50)));
    stats_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    monitor_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            msg = ctl_rx.recv() => match msg {
                Some(CtlMsg::Meta { id, attempt, total_size, supports_range, segment_count }) => {
                    handle_meta(&inner, id, attempt, total_size, supports_range, segment_count);
                }
                Some(CtlMsg::Done { id, attempt, outcome }) => {
                    handle_done(&inner, id, attempt, outcome);
                }
                Some(CtlMsg::Shutdown) | None => break,
            },
            Some(msg) = prog_rx.recv() => handle_progress(&inner, msg),
            _ = stats_tick.tick() => stats_sample(&inner),
            _ = monitor_tick.tick() => stall_sweep(&inner),
        }
    }
    tracing::debug!("scheduler event loop stopped");
}

fn handle_meta(
    inner: &Inner,
    id: TaskId,
    attempt: u64,
    total_size: Option<u64>,
    supports_range: bool,
    segment_count: usize,
) {
    let mut st = inner.state.lock().unwrap();
    if let Some(entry) = st.tasks.get_mut(&id) {
        if entry.attempt == attempt && entry.status == TaskStatus::Downloading {
            entry.total_size = total_size;
            entry.supports_range = supports_range;
            entry.segment_count = segment_count;
        }
    }
}

fn handle_done(inner: &Inner, id: TaskId, attempt: u64, outcome: Result<u64, TransferError>) {
    let (events, spawns) = {
        let mut st = inner.state.lock().unwrap();
        let Some(entry) = st.tasks.get(&id) else {
            return;
        };
        // A completion racing a pause/cancel/stall-reset (or a previous
        // attempt's straggler) fails these guards and is a no-op.
        if entry.attempt != attempt || entry.status != TaskStatus::Downloading {
            return;
        }

        let mut events = st.conclude_attempt(id, outcome);
        if let Some(ev) = st.check_all_finished() {
            events.push(ev);
        }
        let (started, spawns) = st.drain();
        events.extend(started);
        (events, spawns)
    };
    inner.emit(events);
    inner.spawn_attempts(spawns);
}

fn handle_progress(inner: &Inner, msg: ProgressMsg) {
    let event = {
        let mut st = inner.state.lock().unwrap();
        let Some(entry) = st.tasks.get_mut(&msg.id) else {
            return;
        };
        if entry.attempt != msg.attempt || entry.status != TaskStatus::Downloading {
            return;
        }
        entry.last_progress = Instant::now();
        DownloadEvent::Progress {
            id: msg.id,
            received: entry.received.load(Ordering::Relaxed),
            total: entry.total_size,
        }
    };
    inner.emit(vec![event]);
}

fn stats_sample(inner: &Inner) {
    let snap = {
        let mut st = inner.state.lock().unwrap();
        let now = Instant::now();
        let elapsed = st
            .last_sample_at
            .map(|t| now.duration_since(t).as_secs_f64())
            .unwrap_or(0.0);
        let bytes = st.aggregate_bytes();
        st.current_speed = st.sampler.sample(bytes, elapsed);
        st.last_sample_at = Some(now);
        st.snapshot()
    };
    if snap.active_downloads > 0
        && snap.download_speed > 0
        && snap.download_speed < inner.cfg.speed_threshold
    {
        tracing::debug!(
            speed = snap.download_speed,
            threshold = inner.cfg.speed_threshold,
            "aggregate throughput below threshold"
        );
    }
    inner.emit(vec![DownloadEvent::StatisticsChanged(snap)]);
}

/// Forcibly resets `Downloading` tasks whose last progress notification is
/// older than the stall threshold; the reset consumes retry budget exactly
/// like a transport failure.
fn stall_sweep(inner: &Inner) {
    if !inner.cfg.speed_monitoring {
        return;
    }
    let threshold = Duration::from_secs(inner.cfg.stall_timeout_secs.max(1));

    let (events, spawns) = {
        let mut st = inner.state.lock().unwrap();
        let now = Instant::now();
        let stalled: Vec<TaskId> = st
            .tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Downloading
                    && now.duration_since(t.last_progress) > threshold
            })
            .map(|t| t.id)
            .collect();
        if stalled.is_empty() {
            return;
        }

        let mut events = Vec::new();
        for id in stalled {
            // A task that finished between enumeration and action would no
            // longer be Downloading; skip it rather than double-count.
            let Some(entry) = st.tasks.get_mut(&id) else {
                continue;
            };
            if entry.status != TaskStatus::Downloading {
                continue;
            }
            entry.abort.store(true, Ordering::Relaxed);
            tracing::warn!(id = %id, "no progress within stall threshold, resetting");
            events.extend(st.conclude_attempt(
                id,
                Err(TransferError::Stalled(inner.cfg.stall_timeout_secs)),
            ));
        }
        if let Some(ev) = st.check_all_finished() {
            events.push(ev);
        }
        let (started, spawns) = st.drain();
        events.extend(started);
        (events, spawns)
    };
    inner.emit(events);
    inner.spawn_attempts(spawns);
}
