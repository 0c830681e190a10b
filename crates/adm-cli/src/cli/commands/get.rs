//! `adm get` – submit URLs to the engine and watch them finish.

use adm_core::{host, DownloadEvent, DownloadScheduler, EngineConfig};
use anyhow::Result;
use std::path::PathBuf;
use std::time::Instant;

const PROGRESS_INTERVAL_MS: u128 = 500;

pub async fn run_get(cfg: EngineConfig, urls: Vec<String>, output: PathBuf) -> Result<()> {
    std::fs::create_dir_all(&output)?;

    let (scheduler, mut events) = DownloadScheduler::new(cfg);
    for url in &urls {
        let dest = output.join(host::derive_filename(url));
        let id = scheduler.submit(url, dest, 0, None);
        tracing::debug!(id = %id, url, "submitted");
    }

    let mut failed = 0u32;
    let mut last_print = Instant::now();
    while let Some(event) = events.recv().await {
        match event {
            DownloadEvent::Finished { id, save_path } => {
                println!("{}  done  {}", id, save_path.display());
            }
            DownloadEvent::Failed { id, error } => {
                failed += 1;
                eprintln!("{}  failed: {}", id, error);
            }
            DownloadEvent::Retrying { id, retry_count } => {
                eprintln!("{}  retrying ({})", id, retry_count);
            }
            DownloadEvent::StatisticsChanged(stats) => {
                if last_print.elapsed().as_millis() >= PROGRESS_INTERVAL_MS {
                    let done_mib = stats.total_downloaded as f64 / 1_048_576.0;
                    let rate_mib = stats.download_speed as f64 / 1_048_576.0;
                    println!(
                        "  {} active, {} queued  {:.1} MiB  {:.2} MiB/s",
                        stats.active_downloads, stats.queued_downloads, done_mib, rate_mib
                    );
                    last_print = Instant::now();
                }
            }
            DownloadEvent::AllFinished => break,
            _ => {}
        }
    }
    scheduler.shutdown();

    if failed > 0 {
        anyhow::bail!("{} of {} download(s) failed", failed, urls.len());
    }
    Ok(())
}
