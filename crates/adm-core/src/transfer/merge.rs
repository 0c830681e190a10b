//! Concatenates completed segment partials into the destination file.

use super::segmented::part_path;
use crate::error::TransferError;
use std::fs::File;
use std::io;
use std::path::Path;

/// Merges `count` partial files into `dest` in index order, deleting each
/// partial after it is consumed. Returns the merged byte count.
pub(crate) fn merge(dest: &Path, count: usize) -> Result<u64, TransferError> {
    let mut out = File::create(dest).map_err(|e| TransferError::Merge {
        path: dest.to_path_buf(),
        source: e,
    })?;

    let mut total = 0u64;
    for index in 0..count {
        let part = part_path(dest, index);
        let mut input = File::open(&part).map_err(|e| TransferError::Merge {
            path: part.clone(),
            source: e,
        })?;
        total += io::copy(&mut input, &mut out).map_err(|e| TransferError::Merge {
            path: part.clone(),
            source: e,
        })?;
        drop(input);
        std::fs::remove_file(&part).map_err(|e| TransferError::Merge {
            path: part,
            source: e,
        })?;
    }

    out.sync_all().map_err(|e| TransferError::Merge {
        path: dest.to_path_buf(),
        source: e,
    })?;
    Ok(total)
}
