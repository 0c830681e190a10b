//! Integration tests: pause/cancel idempotence, registry eviction, and the
//! one-shot completion signal.

mod common;

use adm_core::{DownloadEvent, DownloadScheduler, TaskStatus};
use common::range_server::{self, RangeServerOptions};
use std::time::Duration;
use tempfile::tempdir;

fn stalling_server(len: usize) -> String {
    range_server::start_with_options(
        (0u8..251).cycle().take(len).collect(),
        RangeServerOptions {
            stall_after: Some(1024),
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn cancel_twice_emits_one_event_and_stays_canceled() {
    let url = stalling_server(64 * 1024);
    let dir = tempdir().unwrap();

    let mut cfg = common::test_config();
    cfg.speed_monitoring = false; // keep the sweep out of this test

    let (scheduler, mut events) = DownloadScheduler::new(cfg);
    let id = scheduler.submit(
        &url,
        dir.path().join("x.bin"),
        0,
        Some(64 * 1024), // skip the probe, go straight to a hanging GET
    );

    common::wait_for(&mut events, |e| matches!(e, DownloadEvent::Started { .. })).await;
    scheduler.cancel(id);
    scheduler.cancel(id);
    assert_eq!(scheduler.task_status(id), Some(TaskStatus::Canceled));

    // Exactly one Canceled notification, then AllFinished.
    let seen = common::collect_until_all_finished(&mut events).await;
    let canceled = seen
        .iter()
        .filter(|e| matches!(e, DownloadEvent::Canceled { .. }))
        .count();
    assert_eq!(canceled, 1, "second cancel must be a no-op");
    assert_eq!(scheduler.task_status(id), Some(TaskStatus::Canceled));
    scheduler.shutdown();
}

#[tokio::test]
async fn pause_is_ignored_outside_downloading() {
    let url = stalling_server(64 * 1024);
    let dir = tempdir().unwrap();

    let mut cfg = common::test_config();
    cfg.speed_monitoring = false;
    cfg.max_concurrent_downloads = 1;

    let (scheduler, mut events) = DownloadScheduler::new(cfg);
    let first = scheduler.submit(&url, dir.path().join("a.bin"), 0, Some(64 * 1024));
    let second = scheduler.submit(&url, dir.path().join("b.bin"), 0, Some(64 * 1024));

    common::wait_for(&mut events, |e| matches!(e, DownloadEvent::Started { .. })).await;

    // Pausing a queued task is ignored.
    scheduler.pause(second);
    assert_eq!(scheduler.task_status(second), Some(TaskStatus::Queued));

    // First pause takes effect; the repeat changes nothing.
    scheduler.pause(first);
    assert_eq!(scheduler.task_status(first), Some(TaskStatus::Paused));
    scheduler.pause(first);
    assert_eq!(scheduler.task_status(first), Some(TaskStatus::Paused));

    common::wait_for(&mut events, |e| matches!(e, DownloadEvent::Paused { .. })).await;
    // Give a hypothetical second Paused event a chance to arrive.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut extra_paused = 0;
    while let Ok(ev) = events.try_recv() {
        if matches!(ev, DownloadEvent::Paused { .. }) {
            extra_paused += 1;
        }
    }
    assert_eq!(extra_paused, 0, "pause on a paused task must not re-notify");

    // Resume re-queues; with the slot freed by the pause it restarts.
    scheduler.resume(first);
    common::wait_for(&mut events, |e| matches!(e, DownloadEvent::Resumed { .. })).await;

    scheduler.cancel_all();
    scheduler.shutdown();
}

#[tokio::test]
async fn all_finished_fires_once_per_scheduler_lifetime() {
    let payload: Vec<u8> = (0u8..251).cycle().take(8 * 1024).collect();
    let url = range_server::start(payload.clone());
    let dir = tempdir().unwrap();

    let (scheduler, mut events) = DownloadScheduler::new(common::test_config());
    let known = Some(payload.len() as u64);
    scheduler.submit(&format!("{}a", url), dir.path().join("a.bin"), 0, known);
    scheduler.submit(&format!("{}b", url), dir.path().join("b.bin"), 0, known);

    common::collect_until_all_finished(&mut events).await;

    // A task submitted after the one-shot signal completes quietly.
    scheduler.submit(&format!("{}c", url), dir.path().join("c.bin"), 0, known);
    common::wait_for(&mut events, |e| matches!(e, DownloadEvent::Finished { .. })).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let mut again = false;
    while let Ok(ev) = events.try_recv() {
        if matches!(ev, DownloadEvent::AllFinished) {
            again = true;
        }
    }
    assert!(!again, "AllFinished is one-shot per scheduler lifetime");
    scheduler.shutdown();
}

#[tokio::test]
async fn clear_finished_evicts_terminal_tasks() {
    let payload: Vec<u8> = (0u8..251).cycle().take(4 * 1024).collect();
    let url = range_server::start(payload.clone());
    let dir = tempdir().unwrap();

    let (scheduler, mut events) = DownloadScheduler::new(common::test_config());
    let id = scheduler.submit(&url, dir.path().join("tiny.bin"), 0, Some(payload.len() as u64));

    common::collect_until_all_finished(&mut events).await;
    assert_eq!(scheduler.task_ids(), vec![id]);

    scheduler.clear_finished();
    assert!(scheduler.task_ids().is_empty());
    assert!(scheduler.task_info(id).is_none());
    scheduler.shutdown();
}
