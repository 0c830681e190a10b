//! Segmented fetch: one worker thread per range, all-or-nothing.
//!
//! The first real segment failure raises the shared abort flag so every
//! sibling stops; completion requires all segments. Partial files are
//! removed on any failure path before the error is reported.

use super::segment::SegmentFetcher;
use super::ProgressMsg;
use crate::error::TransferError;
use crate::segmenter::ByteRange;
use crate::transport::TransportPool;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};

/// Partial-file path for segment `index`: `dest.partN`.
pub(crate) fn part_path(dest: &Path, index: usize) -> PathBuf {
    let mut os = dest.as_os_str().to_owned();
    os.push(format!(".part{}", index));
    PathBuf::from(os)
}

pub(crate) fn fetch_all(
    pool: &Arc<TransportPool>,
    url: &str,
    dest: &Path,
    ranges: &[ByteRange],
    abort: &Arc<AtomicBool>,
    received: &Arc<AtomicU64>,
    prog_tx: &tokio::sync::mpsc::Sender<ProgressMsg>,
    prog_msg: ProgressMsg,
) -> Result<(), TransferError> {
    let (tx, rx) = mpsc::channel::<(usize, Result<(), TransferError>)>();
    let mut handles = Vec::with_capacity(ranges.len());

    for (index, range) in ranges.iter().copied().enumerate() {
        let tx = tx.clone();
        let pool = Arc::clone(pool);
        let abort = Arc::clone(abort);
        let received = Arc::clone(received);
        let prog_tx = prog_tx.clone();
        let fetcher = SegmentFetcher {
            index,
            url: url.to_string(),
            part_path: part_path(dest, index),
            range,
        };
        handles.push(std::thread::spawn(move || {
            let res = fetcher.fetch(&pool, &abort, &received, || {
                let _ = prog_tx.try_send(prog_msg);
            });
            let _ = tx.send((index, res));
        }));
    }
    drop(tx);

    // Collect every terminal signal; remember the first real failure and
    // cancel the siblings as soon as it appears.
    let mut first_error: Option<(usize, TransferError)> = None;
    let mut externally_aborted = false;
    for _ in 0..ranges.len() {
        let Ok((index, res)) = rx.recv() else { break };
        match res {
            Ok(()) => {}
            Err(e) if e.is_abort() => externally_aborted = true,
            Err(e) => {
                if first_error.is_none() {
                    abort.store(true, Ordering::Relaxed);
                    first_error = Some((index, e));
                } else {
                    tracing::debug!(segment = index, error = %e, "additional segment failure");
                }
            }
        }
    }
    for h in handles {
        let _ = h.join();
    }

    if let Some((index, e)) = first_error {
        cleanup_parts(dest, ranges.len());
        return Err(TransferError::Segment {
            index,
            count: ranges.len(),
            source: Box::new(e),
        });
    }
    if externally_aborted {
        cleanup_parts(dest, ranges.len());
        return Err(TransferError::Aborted);
    }
    Ok(())
}

/// Removes completed partials after a failed or aborted segment set; the
/// failing fetchers have already removed their own.
fn cleanup_parts(dest: &Path, count: usize) {
    for index in 0..count {
        let _ = std::fs::remove_file(part_path(dest, index));
    }
}
