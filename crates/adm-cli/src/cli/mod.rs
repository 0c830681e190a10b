//! CLI for the ADM download manager.

mod commands;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use commands::{run_completions, run_config, run_get};

/// Top-level CLI for the ADM download manager.
#[derive(Debug, Parser)]
#[command(name = "adm")]
#[command(about = "ADM: concurrent adaptive multi-segment downloader", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download one or more URLs.
    Get {
        /// Direct HTTP/HTTPS URLs to download.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Directory to save into (default: current directory).
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Override the configured segment count for large files.
        #[arg(long, value_name = "N")]
        segments: Option<usize>,

        /// Override the configured maximum concurrent downloads.
        #[arg(long, value_name = "N")]
        concurrent: Option<usize>,
    },

    /// Show the effective configuration (TOML), creating it on first use.
    Config {
        /// Print only the config file path.
        #[arg(long)]
        path: bool,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        match cli.command {
            CliCommand::Get {
                urls,
                output,
                segments,
                concurrent,
            } => {
                let mut cfg = adm_core::config::load_or_init()?;
                if let Some(n) = segments {
                    cfg.segment_count = n.max(1);
                }
                if let Some(n) = concurrent {
                    cfg.max_concurrent_downloads = n.max(1);
                }
                let output = match output {
                    Some(dir) => dir,
                    None => std::env::current_dir()?,
                };
                run_get(cfg, urls, output).await?;
            }
            CliCommand::Config { path } => run_config(path)?,
            CliCommand::Completions { shell } => {
                run_completions(shell, &mut Cli::command());
            }
        }

        Ok(())
    }
}
