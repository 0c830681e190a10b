//! One byte range of one resource into one partial file.

use crate::error::TransferError;
use crate::segmenter::ByteRange;
use crate::transport::{self, TransportPool};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Fetches one segment. Lives for one attempt; owned exclusively by its
/// parent task's attempt.
pub(crate) struct SegmentFetcher {
    pub index: usize,
    pub url: String,
    pub part_path: PathBuf,
    pub range: ByteRange,
}

impl SegmentFetcher {
    /// Ranged GET into the partial file. Exactly one terminal outcome; on
    /// any failure (or abort) the partial file is deleted so no partial
    /// segment data is left behind.
    pub(crate) fn fetch(
        &self,
        pool: &TransportPool,
        abort: &AtomicBool,
        received: &AtomicU64,
        notify: impl Fn(),
    ) -> Result<(), TransferError> {
        let res = self.fetch_inner(pool, abort, received, notify);
        if res.is_err() {
            let _ = std::fs::remove_file(&self.part_path);
        }
        res
    }

    fn fetch_inner(
        &self,
        pool: &TransportPool,
        abort: &AtomicBool,
        received: &AtomicU64,
        notify: impl Fn(),
    ) -> Result<(), TransferError> {
        let mut file = File::create(&self.part_path).map_err(|e| TransferError::Setup {
            path: self.part_path.clone(),
            source: e,
        })?;
        let mut written = 0u64;
        let mut storage_error: Option<std::io::Error> = None;

        let result = pool.with_handle(|easy| -> Result<u32, TransferError> {
            easy.url(&self.url)?;
            transport::apply_common(easy, pool.request_timeout())?;
            easy.range(&self.range.header_value())?;
            easy.progress(true)?;
            {
                let mut transfer = easy.transfer();
                transfer.progress_function(|_, _, _, _| !abort.load(Ordering::Relaxed))?;
                transfer.write_function(|data| {
                    if abort.load(Ordering::Relaxed) {
                        return Ok(0);
                    }
                    match file.write_all(data) {
                        Ok(()) => {
                            written += data.len() as u64;
                            received.fetch_add(data.len() as u64, Ordering::Relaxed);
                            notify();
                            Ok(data.len())
                        }
                        Err(e) => {
                            storage_error = Some(e);
                            Ok(0)
                        }
                    }
                })?;
                transfer.perform()?;
            }
            transport::check_downgrade(easy, &self.url)?;
            Ok(easy.response_code()?)
        });

        let code = match result {
            Ok(code) => code,
            Err(TransferError::Transport(e)) => {
                if let Some(io) = storage_error.take() {
                    return Err(TransferError::Storage {
                        path: self.part_path.clone(),
                        source: io,
                    });
                }
                if abort.load(Ordering::Relaxed) || e.is_aborted_by_callback() {
                    return Err(TransferError::Aborted);
                }
                return Err(TransferError::Transport(e));
            }
            Err(other) => return Err(other),
        };

        if !(200..300).contains(&code) {
            return Err(TransferError::Http(code));
        }
        // A server that ignored the Range header and sent the full body
        // also trips this check, instead of corrupting the merge.
        if written != self.range.len() {
            return Err(TransferError::PartialTransfer {
                expected: self.range.len(),
                received: written,
            });
        }
        file.sync_all().map_err(|e| TransferError::Storage {
            path: self.part_path.clone(),
            source: e,
        })?;
        Ok(())
    }
}
