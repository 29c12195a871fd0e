//! Vault Archiver CLI
//!
//! Local execution entry point. State (archives, moderation records,
//! rate-limit windows) lives under `--storage-dir`, so separate
//! invocations share it.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use vault_archiver::{
    error::{AppError, Result},
    models::{Config, ProgressEvent, ReportRequest, ReportStatus, RunRequest},
    pipeline::{ArchivePipeline, Stores},
    storage::LocalStorage,
    utils::http::HttpFetcher,
};

/// Vault Archiver - crawl a public site into a one-time download
#[derive(Parser, Debug)]
#[command(
    name = "vault-archiver",
    version,
    about = "Crawl a public site and package it into a one-time archive"
)]
struct Cli {
    /// Path to storage directory (config.toml, archives, moderation state)
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Archive a site, streaming NDJSON progress events to stdout
    Run {
        /// Root URL of the site, e.g. https://host.example/vault-a
        url: String,

        /// Confirm you may archive this content
        #[arg(long)]
        consent: bool,

        /// Identity the rate limit is charged to
        #[arg(long, default_value = "local")]
        requester: String,
    },

    /// Download an archive (works once per id)
    Fetch {
        /// Download id printed by `run`
        id: String,

        /// Output file (default: the archive's own file name)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// File a takedown report
    Report {
        /// URL of the archived site
        #[arg(long)]
        url: String,

        #[arg(long)]
        email: String,

        /// owner, copyright, privacy or other
        #[arg(long)]
        reason: String,

        #[arg(long)]
        details: String,

        /// Link proving the claim
        #[arg(long)]
        verification_url: Option<String>,
    },

    /// Block a site identifier
    Block {
        site: String,

        #[arg(long, default_value = "manual block")]
        reason: String,
    },

    /// Remove a site identifier from the block list
    Unblock { site: String },

    /// List filed reports and blocked sites
    Reports {
        /// Only show reports with this status
        #[arg(long)]
        status: Option<String>,
    },

    /// Set the review status of a report
    Resolve {
        id: String,

        /// resolved or dismissed
        #[arg(default_value = "resolved")]
        status: String,
    },

    /// Print run statistics as JSON
    Stats,

    /// Delete expired archives
    Purge,

    /// Validate configuration
    Validate,
}

/// Initialize logging based on verbosity flag. Logs go to stderr.
fn init_logging(verbose: bool, configured: &str) {
    let level = if verbose { "debug" } else { configured };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.storage_dir.join("config.toml");
    let loaded = Config::load(&config_path);
    let level = loaded
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());
    init_logging(cli.verbose, &level);

    let config = loaded.unwrap_or_else(|e| {
        log::warn!(
            "Config load failed from {}: {}. Using defaults.",
            config_path.display(),
            e
        );
        Config::default()
    });

    if let Command::Validate = cli.command {
        log::info!("Validating configuration...");
        if let Err(e) = config.validate() {
            log::error!("Config validation failed: {}", e);
            return Err(e);
        }
        log::info!("✓ Config OK");
        return Ok(());
    }

    let fetcher = Arc::new(HttpFetcher::from_config(&config.crawler)?);
    let storage = Arc::new(LocalStorage::new(&cli.storage_dir));
    let pipeline = ArchivePipeline::new(config, fetcher, Stores::shared(storage))?;

    match cli.command {
        Command::Run {
            url,
            consent,
            requester,
        } => {
            let request = RunRequest {
                root_url: url,
                consent,
                timestamp: chrono::Utc::now().to_rfc3339(),
            };
            let (tx, rx) = mpsc::channel(32);
            let writer = tokio::spawn(write_events(rx));

            let result = pipeline.run(&request, &requester, tx).await;
            if let Ok(Err(e)) = writer.await {
                log::warn!("Progress output failed: {}", e);
            }
            result?;
        }

        Command::Fetch { id, output } => {
            let download = pipeline.retrieve(&id).await?;
            let path = output.unwrap_or_else(|| PathBuf::from(&download.filename));
            tokio::fs::write(&path, &download.bytes).await?;
            log::info!(
                "Saved {} ({} bytes) to {}",
                download.filename,
                download.content_length,
                path.display()
            );
        }

        Command::Report {
            url,
            email,
            reason,
            details,
            verification_url,
        } => {
            let request = ReportRequest {
                vault_url: url,
                email,
                reason_code: reason,
                details,
                verification_url,
            };
            let ticket = pipeline.file_report(&request).await?;
            println!("{}", serde_json::to_string_pretty(&ticket)?);
        }

        Command::Block { site, reason } => {
            pipeline.moderation().block(&site, &reason).await?;
        }

        Command::Unblock { site } => {
            if !pipeline.moderation().unblock(&site).await? {
                log::warn!("{} was not blocked", site);
            }
        }

        Command::Reports { status } => {
            let status: Option<ReportStatus> = status.map(|s| s.parse()).transpose()?;
            let reports: Vec<_> = pipeline
                .moderation()
                .reports()
                .await?
                .into_iter()
                .filter(|r| status.is_none_or(|s| r.status == s))
                .collect();
            let blocked = pipeline.moderation().blocked_sites().await?;

            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "reports": reports,
                    "blocked": blocked.into_iter().collect::<std::collections::BTreeMap<_, _>>(),
                }))?
            );
        }

        Command::Resolve { id, status } => {
            let status: ReportStatus = status.parse()?;
            if status == ReportStatus::Pending {
                return Err(AppError::validation("Resolve to 'resolved' or 'dismissed'"));
            }
            let ticket = pipeline.moderation().resolve(&id, status).await?;
            println!("{}", serde_json::to_string_pretty(&ticket)?);
        }

        Command::Stats => {
            let counters = pipeline.moderation().counters().await;
            println!("{}", serde_json::to_string_pretty(&counters)?);
        }

        Command::Purge => {
            let removed = pipeline.purge_expired().await?;
            log::info!("Removed {} expired archives", removed);
        }

        Command::Validate => {}
    }

    Ok(())
}

/// Write progress events to stdout, one JSON object per line.
async fn write_events(mut rx: mpsc::Receiver<ProgressEvent>) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(event) = rx.recv().await {
        stdout.write_all(event.to_ndjson()?.as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}
