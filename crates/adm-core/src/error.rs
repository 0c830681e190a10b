//! Transfer error taxonomy.
//!
//! Segment-level errors aggregate into task-level failures; the scheduler's
//! retry policy consults [`TransferError::is_environment`] to decide whether
//! an attempt is worth repeating.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    /// libcurl reported a failure (connect, DNS, timeout, aborted transfer).
    #[error("transport error: {0}")]
    Transport(#[from] curl::Error),

    /// Response carried a non-success status.
    #[error("HTTP {0}")]
    Http(u32),

    /// Metadata probe failed before the transfer could start.
    #[error("metadata probe failed: {0}")]
    Probe(#[source] Box<TransferError>),

    /// A redirect chain downgraded https to plain http.
    #[error("refusing insecure redirect to {0}")]
    InsecureRedirect(String),

    /// Destination or partial file could not be prepared.
    #[error("cannot prepare {path}: {source}")]
    Setup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Write to the destination or a partial file failed mid-transfer.
    #[error("write failed for {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading a partial file or writing the final file failed during merge.
    #[error("merge failed at {path}: {source}")]
    Merge {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Transfer ended with fewer bytes than the confirmed length.
    #[error("partial transfer: expected {expected} bytes, got {received}")]
    PartialTransfer { expected: u64, received: u64 },

    /// One segment of a segmented transfer failed; siblings were canceled.
    #[error("segment {index} of {count} failed: {source}")]
    Segment {
        index: usize,
        count: usize,
        #[source]
        source: Box<TransferError>,
    },

    /// No progress notification within the stall threshold.
    #[error("task stalled: no progress for {0} seconds")]
    Stalled(u64),

    /// The attempt was aborted by pause/cancel/reset.
    #[error("transfer aborted")]
    Aborted,
}

impl TransferError {
    /// True for failures of the environment (filesystem, refused redirect)
    /// that retrying without caller intervention cannot fix.
    pub fn is_environment(&self) -> bool {
        match self {
            TransferError::Setup { .. }
            | TransferError::Storage { .. }
            | TransferError::Merge { .. }
            | TransferError::InsecureRedirect(_) => true,
            TransferError::Segment { source, .. } => source.is_environment(),
            TransferError::Probe(source) => source.is_environment(),
            _ => false,
        }
    }

    /// True when the attempt ended because it was told to stop, not because
    /// it failed.
    pub fn is_abort(&self) -> bool {
        match self {
            TransferError::Aborted => true,
            TransferError::Segment { source, .. } => source.is_abort(),
            _ => false,
        }
    }
}
