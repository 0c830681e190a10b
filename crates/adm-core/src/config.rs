use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Global engine configuration loaded from `~/.config/adm/config.toml`.
///
/// Every field has a default so a partial config file is accepted; unknown
/// hosts in `no_multithread_hosts` are matched as case-insensitive
/// substrings of the URL host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of tasks in `Downloading` at once.
    pub max_concurrent_downloads: usize,
    /// Files larger than this (bytes) are candidates for segmented fetch.
    pub large_file_threshold: u64,
    /// Number of segments for a large-file transfer.
    pub segment_count: usize,
    /// Maximum simultaneously active tasks per remote host.
    pub max_connections_per_host: usize,
    /// Per-request connect timeout in seconds.
    pub request_timeout_secs: u64,
    /// Return failed tasks to the queue until the retry budget is spent.
    pub auto_retry: bool,
    /// Maximum automatic retries per task (attempts = retries + 1).
    pub max_retry_count: u32,
    /// Enables the stall sweep.
    pub speed_monitoring: bool,
    /// Aggregate speed (bytes/sec) below which throughput is considered poor.
    pub speed_threshold: u64,
    /// A `Downloading` task with no progress for this long is reset.
    pub stall_timeout_secs: u64,
    /// Statistics sampling period in milliseconds.
    pub stats_interval_ms: u64,
    /// Stall-sweep period in milliseconds (independent of the stats period).
    pub monitor_interval_ms: u64,
    /// Number of reusable transport handles.
    pub transport_pool_size: usize,
    /// Host-name substrings for which segmented fetch is disabled.
    pub no_multithread_hosts: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 32,
            large_file_threshold: 10 * 1024 * 1024,
            segment_count: 4,
            max_connections_per_host: 8,
            request_timeout_secs: 30,
            auto_retry: true,
            max_retry_count: 10,
            speed_monitoring: true,
            speed_threshold: 256 * 1024,
            stall_timeout_secs: 60,
            stats_interval_ms: 1000,
            monitor_interval_ms: 1000,
            transport_pool_size: 8,
            no_multithread_hosts: vec![
                "bmclapi".to_string(),
                "github.com".to_string(),
                "modrinth.com".to_string(),
                "optifine.net".to_string(),
                "curseforge.com".to_string(),
            ],
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("adm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<EngineConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = EngineConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: EngineConfig = toml::from_str(&data)?;
    Ok(cfg)
}
