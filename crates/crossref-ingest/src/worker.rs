//! Per-file ingestion
//!
//! A worker owns one database connection for the whole run. For every handle
//! it reads the file, decodes it off the async threads, writes the batch in a
//! single transaction and only then releases the handle.

use sqlx::postgres::PgConnection;
use std::future::Future;
use std::io::ErrorKind;
use tracing::{debug, warn};

use crate::error::WorkerError;
use crate::model::Batch;
use crate::pipeline::Ingest;
use crate::source::FileHandle;
use crate::store::{self, Database};

/// What happened to one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Ingested { documents: usize, raw_edges: usize },
    /// The file vanished before it could be read; nothing was written
    Skipped,
}

pub struct IngestWorker {
    id: usize,
    conn: PgConnection,
}

impl IngestWorker {
    pub async fn open(id: usize, database: &Database) -> Result<Self, sqlx::Error> {
        let conn = database.connect().await?;
        debug!(worker = id, "Ingest worker connected");
        Ok(Self { id, conn })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Ingest one file and release its handle once the batch is committed
    pub async fn process(&mut self, handle: FileHandle) -> Result<FileOutcome, WorkerError> {
        let path = handle.path().to_path_buf();

        let compressed = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(worker = self.id, path = %path.display(), "Batch file missing, skipping");
                return Ok(FileOutcome::Skipped);
            },
            Err(source) => return Err(WorkerError::Read { path, source }),
        };

        let extracted =
            tokio::task::spawn_blocking(move || Batch::decode(&compressed).map(Batch::extract))
                .await
                .map_err(|e| WorkerError::Panicked(e.to_string()))?
                .map_err(|source| WorkerError::Decode {
                    path: path.clone(),
                    source,
                })?;

        store::write_batch(&mut self.conn, &extracted).await?;

        // rows are durable now; a leftover temp file does not undo that
        release(self.id, handle);

        debug!(
            worker = self.id,
            path = %path.display(),
            documents = extracted.documents.len(),
            raw_edges = extracted.raw_edges.len(),
            "Batch ingested"
        );

        Ok(FileOutcome::Ingested {
            documents: extracted.documents.len(),
            raw_edges: extracted.raw_edges.len(),
        })
    }
}

/// Complete a committed handle; failure only leaves the file behind
fn release(worker: usize, handle: FileHandle) -> bool {
    let path = handle.path().to_path_buf();
    match handle.complete() {
        Ok(()) => true,
        Err(e) => {
            warn!(
                worker,
                path = %path.display(),
                error = %e,
                "Batch committed but its file could not be released"
            );
            false
        },
    }
}

impl Ingest for IngestWorker {
    fn ingest(
        &mut self,
        handle: FileHandle,
    ) -> impl Future<Output = Result<FileOutcome, WorkerError>> + Send {
        self.process(handle)
    }
}
