//! Reusable HTTP transport handles.
//!
//! A fixed set of libcurl easy handles, assigned round-robin by an atomic
//! cursor owned by the pool. Reusing a handle keeps its connection cache
//! warm across requests to the same host. When the assigned slot and every
//! other slot are busy, a transient handle is created for the request so
//! concurrent transfers never serialize behind one another; the retained
//! set stays fixed either way. The pool is read-only after construction.

use crate::error::TransferError;
use curl::easy::Easy;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub struct TransportPool {
    slots: Vec<Mutex<Easy>>,
    cursor: AtomicUsize,
    request_timeout: Duration,
}

impl TransportPool {
    pub fn new(size: usize, request_timeout: Duration) -> Self {
        let size = size.max(1);
        let slots = (0..size).map(|_| Mutex::new(Easy::new())).collect();
        Self {
            slots,
            cursor: AtomicUsize::new(0),
            request_timeout,
        }
    }

    /// Configured per-request timeout (connect deadline for transfers,
    /// overall deadline for probes).
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Runs `f` with a reset handle from the pool, or a transient one if
    /// every slot is in use.
    pub fn with_handle<R>(&self, f: impl FnOnce(&mut Easy) -> R) -> R {
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        for i in 0..self.slots.len() {
            let slot = &self.slots[(start + i) % self.slots.len()];
            if let Ok(mut easy) = slot.try_lock() {
                easy.reset();
                return f(&mut easy);
            }
        }
        let mut transient = Easy::new();
        f(&mut transient)
    }
}

/// Shared request options: bounded redirect following and the connect
/// deadline. Transfers get no hard wall-clock timeout; the stall sweep is
/// the authority on transfers that stop progressing.
pub fn apply_common(easy: &mut Easy, connect_timeout: Duration) -> Result<(), TransferError> {
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.connect_timeout(connect_timeout)?;
    Ok(())
}

/// Refuses redirect chains that downgraded https to plain http. Call after
/// the transfer, when the effective URL is known.
pub fn check_downgrade(easy: &mut Easy, original_url: &str) -> Result<(), TransferError> {
    if !original_url.starts_with("https://") {
        return Ok(());
    }
    if let Ok(Some(effective)) = easy.effective_url() {
        if effective.starts_with("http://") {
            return Err(TransferError::InsecureRedirect(effective.to_string()));
        }
    }
    Ok(())
}
