//! crossref-ingest - Crossref metadata importer

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossref_common::logging::{init_logging, LogConfig, LogLevel};
use crossref_ingest::config::Config;
use crossref_ingest::lifecycle;
use crossref_ingest::source::Source;
use crossref_ingest::store::Database;
use crossref_ingest::transport::{FtpConnector, RetryPolicy};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "crossref-ingest")]
#[command(author, version, about = "Crossref metadata importer")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (defaults to ./crossref_db.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reset, create, ingest and resolve
    Run,

    /// Drop all tables
    Reset,

    /// Create the tables
    Create,

    /// Ingest batch files into an existing schema
    Ingest,

    /// Resolve raw citation edges
    Resolve,

    /// Upload a local file to the configured FTP server
    Push {
        /// File to upload
        local: PathBuf,

        /// Remote directory; defaults to ftp.directory
        #[arg(short, long)]
        remote_dir: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("crossref-ingest")
        .build();

    // LOG_* variables take precedence
    let log_config = log_config.merge_env()?;
    let _guard = init_logging(&log_config)?;

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run => {
            config.validate()?;
            let database = Database::from_url(&config.database.url)?;
            let source = Source::from_config(&config)?;

            let summary = lifecycle::full_run(&database, source, &config.pipeline)
                .await
                .context("Full run failed")?;

            info!(
                files_ingested = summary.ingest.files_ingested,
                files_failed = summary.ingest.failures.len(),
                documents = summary.counts.documents,
                resolved_edges = summary.counts.resolved_edges,
                "Done"
            );
        },
        Command::Reset => {
            config.validate_database()?;
            let database = Database::from_url(&config.database.url)?;
            lifecycle::reset_schema(&database).await.context("Reset failed")?;
        },
        Command::Create => {
            config.validate_database()?;
            let database = Database::from_url(&config.database.url)?;
            lifecycle::create_schema(&database).await.context("Create failed")?;
        },
        Command::Ingest => {
            config.validate()?;
            let database = Database::from_url(&config.database.url)?;
            let source = Source::from_config(&config)?;

            let report = lifecycle::run_ingestion(&database, source, &config.pipeline)
                .await
                .context("Ingestion failed")?;

            info!(
                files_ingested = report.files_ingested,
                files_skipped = report.files_skipped,
                files_failed = report.failures.len(),
                "Ingestion complete"
            );
        },
        Command::Resolve => {
            config.validate_database()?;
            let database = Database::from_url(&config.database.url)?;
            lifecycle::resolve_references(&database)
                .await
                .context("Resolution failed")?;
        },
        Command::Push { local, remote_dir } => {
            let ftp = config
                .ftp
                .clone()
                .context("push needs an [ftp] section in the configuration")?;
            let remote_dir = remote_dir.unwrap_or_else(|| ftp.directory.clone());
            let policy = RetryPolicy::from(&config.retry);

            let bytes = tokio::task::spawn_blocking(move || {
                lifecycle::push_file(FtpConnector::new(ftp.connection()), policy, &local, &remote_dir)
            })
            .await??;

            info!(bytes, "Push complete");
        },
    }

    Ok(())
}
