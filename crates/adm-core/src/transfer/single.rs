//! Single-stream GET: the whole resource to the destination file.

use crate::error::TransferError;
use crate::transport::{self, TransportPool};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Streams `url` into `dest` (truncated first), updating `received` on
/// every chunk. Returns the confirmed final size: `expected` when known,
/// otherwise the bytes actually written.
pub(crate) fn fetch(
    pool: &TransportPool,
    url: &str,
    dest: &Path,
    expected: Option<u64>,
    abort: &AtomicBool,
    received: &AtomicU64,
    notify: impl Fn(),
) -> Result<u64, TransferError> {
    let mut file = File::create(dest).map_err(|e| TransferError::Setup {
        path: dest.to_path_buf(),
        source: e,
    })?;
    let mut written = 0u64;
    let mut storage_error: Option<std::io::Error> = None;

    let result = pool.with_handle(|easy| -> Result<u32, TransferError> {
        easy.url(url)?;
        transport::apply_common(easy, pool.request_timeout())?;
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
        transport::check_downgrade(easy, url)?;
        Ok(easy.response_code()?)
    });

    let code = match result {
        Ok(code) => code,
        Err(TransferError::Transport(e)) => {
            if let Some(io) = storage_error.take() {
                return Err(TransferError::Storage {
                    path: dest.to_path_buf(),
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
    if let Some(expected) = expected {
        if written != expected {
            return Err(TransferError::PartialTransfer {
                expected,
                received: written,
            });
        }
    }
    file.sync_all().map_err(|e| TransferError::Storage {
        path: dest.to_path_buf(),
        source: e,
    })?;

    Ok(expected.unwrap_or(written))
}
