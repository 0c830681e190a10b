#![allow(dead_code)]

pub mod range_server;

use adm_core::{DownloadEvent, EngineConfig};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Config with test-friendly periods; scenario tests override the fields
/// they exercise.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        stats_interval_ms: 100,
        monitor_interval_ms: 100,
        request_timeout_secs: 10,
        transport_pool_size: 4,
        ..EngineConfig::default()
    }
}

/// Collects events until `AllFinished` (inclusive); panics after 60s.
pub async fn collect_until_all_finished(
    events: &mut UnboundedReceiver<DownloadEvent>,
) -> Vec<DownloadEvent> {
    let mut seen = Vec::new();
    let res = tokio::time::timeout(Duration::from_secs(60), async {
        while let Some(ev) = events.recv().await {
            let done = matches!(ev, DownloadEvent::AllFinished);
            seen.push(ev);
            if done {
                break;
            }
        }
    })
    .await;
    assert!(
        res.is_ok(),
        "timed out waiting for AllFinished after {} events",
        seen.len()
    );
    seen
}

/// Waits for an event matching `pred` (discarding others); panics after 30s.
pub async fn wait_for(
    events: &mut UnboundedReceiver<DownloadEvent>,
    mut pred: impl FnMut(&DownloadEvent) -> bool,
) -> DownloadEvent {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let ev = events.recv().await.expect("event channel closed");
            if pred(&ev) {
                return ev;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
