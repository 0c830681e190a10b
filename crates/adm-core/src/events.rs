//! Lifecycle notifications produced to callers.
//!
//! Events are delivered over a single channel; the receiving side is the
//! caller's one logical consumer thread, so handlers never race each other.

use crate::stats::DownloadStatistics;
use crate::task::TaskId;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub enum DownloadEvent {
    /// Task registered and queued.
    Added { id: TaskId, url: String },
    /// Task admitted and its attempt started.
    Started { id: TaskId },
    /// Bytes arrived; `total` is `None` while the size is unknown.
    Progress {
        id: TaskId,
        received: u64,
        total: Option<u64>,
    },
    Paused { id: TaskId },
    Resumed { id: TaskId },
    /// Terminal success; the merged file is at `save_path`.
    Finished { id: TaskId, save_path: PathBuf },
    /// Terminal failure after the retry budget was spent.
    Failed { id: TaskId, error: String },
    Canceled { id: TaskId },
    /// Attempt failed; task went back to the queue.
    Retrying { id: TaskId, retry_count: u32 },
    /// Periodic aggregate sample.
    StatisticsChanged(DownloadStatistics),
    /// Every registered task is terminal and the queue is empty.
    /// Emitted at most once per scheduler lifetime.
    AllFinished,
}
