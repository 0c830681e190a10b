//! One attempt of one transfer task.
//!
//! An attempt starts from a clean slate (the scheduler hands it fresh
//! counters and a fresh abort token), decides the strategy, runs the
//! single-stream or segmented fetch, and reports exactly one terminal
//! outcome back to the scheduler. Blocking; each attempt runs on its own
//! worker thread.

mod merge;
mod segment;
mod segmented;
mod single;

use crate::config::EngineConfig;
use crate::error::TransferError;
use crate::host;
use crate::probe;
use crate::segmenter::{self, ByteRange};
use crate::task::TaskId;
use crate::transport::TransportPool;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Control messages from attempt workers to the scheduler loop.
#[derive(Debug)]
pub(crate) enum CtlMsg {
    /// Strategy committed: resolved metadata for the registry.
    Meta {
        id: TaskId,
        attempt: u64,
        total_size: Option<u64>,
        supports_range: bool,
        segment_count: usize,
    },
    /// Attempt finished; `Ok` carries the confirmed final size.
    Done {
        id: TaskId,
        attempt: u64,
        outcome: Result<u64, TransferError>,
    },
    /// Stop the scheduler loop.
    Shutdown,
}

/// Progress ping; byte counts live in the task's shared atomic counter.
/// Sent with `try_send` so a full channel drops pings instead of blocking
/// the transfer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProgressMsg {
    pub id: TaskId,
    pub attempt: u64,
}

/// Everything one attempt needs, cloned out of the registry at admission.
pub(crate) struct AttemptContext {
    pub id: TaskId,
    pub attempt: u64,
    pub url: String,
    pub dest: PathBuf,
    pub known_size: Option<u64>,
    pub cfg: Arc<EngineConfig>,
    pub pool: Arc<TransportPool>,
    pub abort: Arc<AtomicBool>,
    pub received: Arc<AtomicU64>,
    pub ctl_tx: tokio::sync::mpsc::UnboundedSender<CtlMsg>,
    pub prog_tx: tokio::sync::mpsc::Sender<ProgressMsg>,
}

/// Entry point for the worker thread. Never panics back into the
/// scheduler; the single `Done` message is the attempt's only terminal
/// signal.
pub(crate) fn run_attempt(ctx: AttemptContext) {
    let outcome = execute(&ctx);
    let _ = ctx.ctl_tx.send(CtlMsg::Done {
        id: ctx.id,
        attempt: ctx.attempt,
        outcome,
    });
}

/// Strategy for one attempt, chosen once and never mutated mid-flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Strategy {
    SingleStream { total: Option<u64> },
    Segmented { total: u64, ranges: Vec<ByteRange> },
}

impl Strategy {
    pub(crate) fn segment_count(&self) -> usize {
        match self {
            Strategy::SingleStream { .. } => 1,
            Strategy::Segmented { ranges, .. } => ranges.len(),
        }
    }

    pub(crate) fn total(&self) -> Option<u64> {
        match self {
            Strategy::SingleStream { total } => *total,
            Strategy::Segmented { total, .. } => Some(*total),
        }
    }
}

/// Segmented fetch requires all of: resolved size above the threshold,
/// server-advertised range support, and a host absent from the
/// segmentation denylist. Anything else falls back to a single stream.
pub(crate) fn decide_strategy(
    cfg: &EngineConfig,
    url: &str,
    total: Option<u64>,
    accept_ranges: bool,
) -> Strategy {
    let denylisted = host::host_of(url)
        .map(|h| host::is_denylisted(&h, &cfg.no_multithread_hosts))
        .unwrap_or(false);

    if let Some(total) = total {
        if total > cfg.large_file_threshold
            && accept_ranges
            && !denylisted
            && cfg.segment_count > 1
        {
            let ranges = segmenter::plan_ranges(total, cfg.segment_count);
            if ranges.len() > 1 {
                return Strategy::Segmented { total, ranges };
            }
        }
    }
    Strategy::SingleStream { total }
}

fn execute(ctx: &AttemptContext) -> Result<u64, TransferError> {
    if let Some(parent) = ctx.dest.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| TransferError::Setup {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }

    // A caller-supplied size at or below the threshold skips the probe:
    // the file is going to be a single stream no matter what the server
    // advertises.
    let (strategy, supports_range) = match ctx.known_size {
        Some(size) if size <= ctx.cfg.large_file_threshold => {
            (Strategy::SingleStream { total: Some(size) }, false)
        }
        _ => {
            let head = probe::probe(&ctx.pool, &ctx.url)
                .map_err(|e| TransferError::Probe(Box::new(e)))?;
            let total = head.content_length.or(ctx.known_size);
            (
                decide_strategy(&ctx.cfg, &ctx.url, total, head.accept_ranges),
                head.accept_ranges,
            )
        }
    };

    if ctx.abort.load(Ordering::Relaxed) {
        return Err(TransferError::Aborted);
    }

    let _ = ctx.ctl_tx.send(CtlMsg::Meta {
        id: ctx.id,
        attempt: ctx.attempt,
        total_size: strategy.total(),
        supports_range,
        segment_count: strategy.segment_count(),
    });

    tracing::debug!(
        id = %ctx.id,
        url = %ctx.url,
        segments = strategy.segment_count(),
        total = ?strategy.total(),
        "attempt strategy committed"
    );

    let notify = {
        let prog_tx = ctx.prog_tx.clone();
        let msg = ProgressMsg {
            id: ctx.id,
            attempt: ctx.attempt,
        };
        move || {
            let _ = prog_tx.try_send(msg);
        }
    };

    match strategy {
        Strategy::SingleStream { total } => single::fetch(
            &ctx.pool,
            &ctx.url,
            &ctx.dest,
            total,
            &ctx.abort,
            &ctx.received,
            notify,
        ),
        Strategy::Segmented { total, ranges } => {
            segmented::fetch_all(
                &ctx.pool,
                &ctx.url,
                &ctx.dest,
                &ranges,
                &ctx.abort,
                &ctx.received,
                &ctx.prog_tx,
                ProgressMsg {
                    id: ctx.id,
                    attempt: ctx.attempt,
                },
            )?;
            let merged = merge::merge(&ctx.dest, ranges.len())?;
            if merged != total {
                return Err(TransferError::PartialTransfer {
                    expected: total,
                    received: merged,
                });
            }
            Ok(total)
        }
    }
}
