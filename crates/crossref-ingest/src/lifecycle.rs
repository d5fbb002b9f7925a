//! Top-level operations exposed to the CLI
//!
//! A full run is `reset -> create -> ingest -> resolve`. Resolution is only
//! reached once every dispatched file has been committed or has failed, and
//! never when enumeration itself broke.

use std::path::Path;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::error::{LifecycleError, TransportError};
use crate::pipeline::{IngestReport, Pipeline};
use crate::resolver::{self, ResolutionReport};
use crate::source::Source;
use crate::store::{self, Database, TableCounts};
use crate::transport::{Connector, RetryPolicy, RetryingTransport};

/// Everything a full run produced
#[derive(Debug)]
pub struct RunSummary {
    pub ingest: IngestReport,
    pub resolution: ResolutionReport,
    pub counts: TableCounts,
}

pub async fn reset_schema(database: &Database) -> Result<(), LifecycleError> {
    let mut conn = database.connect().await?;
    store::reset_schema(&mut conn).await?;
    Ok(())
}

pub async fn create_schema(database: &Database) -> Result<(), LifecycleError> {
    let mut conn = database.connect().await?;
    store::create_schema(&mut conn).await?;
    Ok(())
}

/// Ingest every file `source` yields
///
/// Failed files are listed in the report and do not fail the call. A broken
/// enumeration does, after the already dispatched files have drained.
pub async fn run_ingestion(
    database: &Database,
    source: Source,
    pipeline: &PipelineConfig,
) -> Result<IngestReport, LifecycleError> {
    info!(
        source = %source.describe(),
        workers = pipeline.workers,
        channel_capacity = pipeline.channel_capacity,
        "Starting ingestion"
    );

    let workers = Pipeline::connect(database, pipeline.workers).await?;
    let files = source.iterate(pipeline.channel_capacity);
    let mut report = workers.run(files).await;

    for failure in &report.failures {
        warn!(path = %failure.path.display(), error = %failure.error, "File left unprocessed");
    }

    match report.producer_error.take() {
        Some(err) => {
            error!(
                files_ingested = report.files_ingested,
                files_failed = report.failures.len(),
                "Ingestion aborted by enumeration failure"
            );
            Err(err.into())
        },
        None => Ok(report),
    }
}

pub async fn resolve_references(database: &Database) -> Result<ResolutionReport, LifecycleError> {
    let mut conn = database.connect().await?;
    Ok(resolver::resolve(&mut conn).await?)
}

pub async fn full_run(
    database: &Database,
    source: Source,
    pipeline: &PipelineConfig,
) -> Result<RunSummary, LifecycleError> {
    reset_schema(database).await?;
    create_schema(database).await?;

    let ingest = run_ingestion(database, source, pipeline).await?;
    let resolution = resolve_references(database).await?;

    let mut conn = database.connect().await?;
    let counts = store::table_counts(&mut conn).await?;

    info!(
        documents = counts.documents,
        resolved_edges = counts.resolved_edges,
        files_failed = ingest.failures.len(),
        "Full run complete"
    );

    Ok(RunSummary {
        ingest,
        resolution,
        counts,
    })
}

/// Upload `local` into `remote_dir`, creating the directory first
///
/// Blocking; run it off the async threads.
pub fn push_file<C: Connector>(
    connector: C,
    policy: RetryPolicy,
    local: &Path,
    remote_dir: &str,
) -> Result<u64, LifecycleError> {
    let name = local
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            TransportError::Permanent(format!("not a file name: {}", local.display()))
        })?;

    let mut transport = RetryingTransport::connect(connector, policy)?;

    // usually fails because the directory already exists
    if let Err(e) = transport.mkdir(remote_dir) {
        warn!(directory = %remote_dir, error = %e, "Could not create remote directory");
    }

    let remote = format!("{}/{}", remote_dir.trim_end_matches('/'), name);
    let bytes = transport.upload(local, &remote)?;
    transport.close();

    info!(local = %local.display(), remote = %remote, bytes, "Uploaded file");
    Ok(bytes)
}
