//! Host extraction, per-host admission counters, and the segmentation
//! denylist.

use std::collections::HashMap;
use url::Url;

/// Lower-cased host of a URL, if it has one.
pub fn host_of(raw: &str) -> Option<String> {
    Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

/// Default filename when the URL path yields nothing usable.
const DEFAULT_FILENAME: &str = "download.bin";

/// Derives a local filename from the last URL path segment, falling back
/// to a fixed default for bare or unparseable URLs.
pub fn derive_filename(raw: &str) -> String {
    Url::parse(raw)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(|seg| seg.to_string()))
        })
        .filter(|s| !s.is_empty() && s != "." && s != "..")
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string())
}

/// Substring match against the configured denylist patterns.
pub fn is_denylisted(host: &str, patterns: &[String]) -> bool {
    let host = host.to_ascii_lowercase();
    patterns
        .iter()
        .filter(|p| !p.is_empty())
        .any(|p| host.contains(&p.to_ascii_lowercase()))
}

/// In-flight connection count per host. Entries are pruned when a count
/// returns to zero so the table only holds hosts with live work.
#[derive(Debug, Default)]
pub struct HostCounters {
    counts: HashMap<String, usize>,
}

impl HostCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, host: &str) -> usize {
        self.counts.get(host).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, host: &str) {
        *self.counts.entry(host.to_string()).or_insert(0) += 1;
    }

    pub fn decrement(&mut self, host: &str) {
        if let Some(n) = self.counts.get_mut(host) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                self.counts.remove(host);
            }
        }
    }
}
