//! HEAD metadata probe.
//!
//! Confirms the resolved size (`Content-Length`) and whether the server
//! advertises byte-range support (`Accept-Ranges: bytes`) before a task
//! commits to a strategy.

use crate::error::TransferError;
use crate::transport::{self, TransportPool};
use std::str;

/// Parsed result of a metadata probe.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// Total size in bytes, if the server sent `Content-Length`.
    pub content_length: Option<u64>,
    /// True if the server sent `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
}

/// Performs a HEAD request and returns parsed metadata.
///
/// Follows redirects but refuses an https→http downgrade. Blocking; call
/// from a worker thread.
pub fn probe(pool: &TransportPool, url: &str) -> Result<ProbeResult, TransferError> {
    let mut lines: Vec<String> = Vec::new();

    let code = pool.with_handle(|easy| -> Result<u32, TransferError> {
        easy.url(url)?;
        easy.nobody(true)?;
        transport::apply_common(easy, pool.request_timeout())?;
        // A probe transfers no body, so a hard deadline is safe here.
        easy.timeout(pool.request_timeout())?;
        {
            let mut transfer = easy.transfer();
            transfer.header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    lines.push(s.trim_end().to_string());
                }
                true
            })?;
            transfer.perform()?;
        }
        transport::check_downgrade(easy, url)?;
        Ok(easy.response_code()?)
    })?;

    if !(200..300).contains(&code) {
        return Err(TransferError::Http(code));
    }
    Ok(parse_headers(&lines))
}

/// Parse collected header lines. With redirects several header blocks
/// accumulate; later values overwrite earlier ones, so the final response
/// wins.
fn parse_headers(lines: &[String]) -> ProbeResult {
    let mut content_length = None;
    let mut accept_ranges = false;

    for line in lines {
        let line = line.trim();
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                if let Ok(n) = value.parse::<u64>() {
                    content_length = Some(n);
                }
            }
            if name.eq_ignore_ascii_case("accept-ranges") {
                accept_ranges = value.eq_ignore_ascii_case("bytes");
            }
        }
    }

    ProbeResult {
        content_length,
        accept_ranges,
    }
}
