//! ADM core: a concurrent, adaptive download engine.
//!
//! Callers submit `(URL, destination, priority, optional known size)`
//! tuples. The scheduler bounds concurrency globally and per remote host,
//! decides per task between one stream and N parallel byte-range
//! segments, retries failed attempts, resets stalled ones, and reports
//! aggregate progress and throughput.

pub mod config;
pub mod error;
pub mod events;
pub mod host;
pub mod logging;
pub mod probe;
pub mod retry;
pub mod scheduler;
pub mod segmenter;
pub mod stats;
pub mod task;
mod transfer;
pub mod transport;

pub use config::EngineConfig;
pub use error::TransferError;
pub use events::DownloadEvent;
pub use scheduler::DownloadScheduler;
pub use stats::DownloadStatistics;
pub use task::{TaskId, TaskInfo, TaskStatus};
