//! Producer/worker pipeline
//!
//! One blocking producer feeds a bounded channel; the dispatcher pulls handles
//! off it and hands each to an idle worker, waiting for one to finish when all
//! are busy. Once the producer's sentinel arrives every in-flight task is
//! joined before the report is returned, so the caller can rely on all commits
//! being durable.
//!
//! A failing or panicking task only affects its own file.

use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{error, info, warn};

use crate::error::{SourceError, WorkerError};
use crate::source::{FileHandle, FileStream};
use crate::store::Database;
use crate::worker::{FileOutcome, IngestWorker};

/// Something that can ingest one file at a time
pub trait Ingest: Send + 'static {
    fn ingest(
        &mut self,
        handle: FileHandle,
    ) -> impl Future<Output = Result<FileOutcome, WorkerError>> + Send;
}

/// A file that could not be ingested
#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: WorkerError,
}

/// Outcome of a whole ingestion run
#[derive(Debug, Default)]
pub struct IngestReport {
    pub files_ingested: usize,
    pub files_skipped: usize,
    pub documents: usize,
    pub raw_edges: usize,
    pub failures: Vec<FileFailure>,
    /// Set when enumeration stopped early
    pub producer_error: Option<SourceError>,
    pub elapsed: Duration,
}

impl IngestReport {
    pub fn files_processed(&self) -> usize {
        self.files_ingested + self.files_skipped + self.failures.len()
    }

    /// No failed files and a clean enumeration
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.producer_error.is_none()
    }

    fn record(&mut self, path: PathBuf, result: Result<FileOutcome, WorkerError>) {
        match result {
            Ok(FileOutcome::Ingested {
                documents,
                raw_edges,
            }) => {
                self.files_ingested += 1;
                self.documents += documents;
                self.raw_edges += raw_edges;
            },
            Ok(FileOutcome::Skipped) => self.files_skipped += 1,
            Err(error) => {
                error!(path = %path.display(), error = %error, "Failed to ingest batch file");
                self.failures.push(FileFailure { path, error });
            },
        }
    }
}

/// What a finished task hands back; a panicked worker is not returned
struct Finished<W> {
    worker: Option<W>,
    result: Result<FileOutcome, WorkerError>,
}

/// In-flight tasks and the file each one is working on
struct InFlight<W> {
    tasks: JoinSet<Finished<W>>,
    paths: HashMap<Id, PathBuf>,
}

impl<W: Ingest> InFlight<W> {
    fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            paths: HashMap::new(),
        }
    }

    fn spawn(&mut self, worker: W, handle: FileHandle) {
        let path = handle.path().to_path_buf();
        let id = self.tasks.spawn(ingest_one(worker, handle)).id();
        self.paths.insert(id, path);
    }

    /// Wait for the next task and fold it into `report`
    async fn settle_next(&mut self, report: &mut IngestReport) -> Option<Option<W>> {
        let joined = self.tasks.join_next_with_id().await?;
        Some(self.settle(report, joined))
    }

    fn settle(
        &mut self,
        report: &mut IngestReport,
        joined: Result<(Id, Finished<W>), JoinError>,
    ) -> Option<W> {
        match joined {
            Ok((id, finished)) => {
                let path = self.paths.remove(&id).unwrap_or_default();
                report.record(path, finished.result);
                finished.worker
            },
            Err(e) => {
                let path = self.paths.remove(&e.id()).unwrap_or_default();
                report.record(path, Err(WorkerError::Panicked(e.to_string())));
                None
            },
        }
    }
}

async fn ingest_one<W: Ingest>(mut worker: W, handle: FileHandle) -> Finished<W> {
    match AssertUnwindSafe(worker.ingest(handle)).catch_unwind().await {
        Ok(result) => Finished {
            worker: Some(worker),
            result,
        },
        Err(payload) => Finished {
            worker: None,
            result: Err(WorkerError::Panicked(panic_message(payload))),
        },
    }
}

pub struct Pipeline<W: Ingest> {
    workers: Vec<W>,
}

impl Pipeline<IngestWorker> {
    /// Open one connection per worker up front
    pub async fn connect(database: &Database, workers: usize) -> Result<Self, sqlx::Error> {
        let mut pool = Vec::with_capacity(workers);
        for id in 0..workers {
            pool.push(IngestWorker::open(id, database).await?);
        }
        info!(workers, "Ingest workers connected");
        Ok(Self::new(pool))
    }
}

impl<W: Ingest> Pipeline<W> {
    /// Pool over already opened workers
    pub fn new(workers: Vec<W>) -> Self {
        Self { workers }
    }

    /// Number of workers, i.e. the concurrency limit
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Drive `files` to exhaustion and wait for every dispatched task
    pub async fn run(self, mut files: FileStream) -> IngestReport {
        let started = Instant::now();
        let pool_size = self.workers.len();
        let mut idle = self.workers;
        let mut in_flight = InFlight::new();
        let mut report = IngestReport::default();

        while let Some(next) = files.next().await {
            let handle = match next {
                Ok(handle) => handle,
                Err(err) => {
                    error!(error = %err, "File enumeration failed, draining in-flight tasks");
                    report.producer_error = Some(err);
                    break;
                },
            };

            while idle.is_empty() {
                match in_flight.settle_next(&mut report).await {
                    Some(worker) => {
                        idle.extend(worker);
                        Self::log_progress(&report, &files, started);
                    },
                    None => break,
                }
            }

            let Some(worker) = idle.pop() else {
                report.record(handle.path().to_path_buf(), Err(WorkerError::NoWorker));
                continue;
            };

            in_flight.spawn(worker, handle);
        }

        // barrier
        while let Some(worker) = in_flight.settle_next(&mut report).await {
            idle.extend(worker);
        }

        report.elapsed = started.elapsed();

        if idle.len() < pool_size {
            warn!(
                lost = pool_size - idle.len(),
                "Ingest workers were lost to panics during the run"
            );
        }

        info!(
            files_ingested = report.files_ingested,
            files_skipped = report.files_skipped,
            files_failed = report.failures.len(),
            documents = report.documents,
            raw_edges = report.raw_edges,
            elapsed_secs = report.elapsed.as_secs(),
            "Ingestion finished"
        );

        report
    }

    fn log_progress(report: &IngestReport, files: &FileStream, started: Instant) {
        let processed = report.files_processed();
        if processed % 100 == 0 {
            info!(
                processed,
                published = files.published(),
                documents = report.documents,
                elapsed_secs = started.elapsed().as_secs(),
                "Ingestion progress"
            );
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DecodeError, TransportError};
    use crate::source::spawn_producer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Probe {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        done: Arc<Mutex<Vec<PathBuf>>>,
    }

    struct FakeWorker {
        probe: Probe,
        delay: Duration,
    }

    impl Ingest for FakeWorker {
        fn ingest(
            &mut self,
            handle: FileHandle,
        ) -> impl Future<Output = Result<FileOutcome, WorkerError>> + Send {
            let probe = self.probe.clone();
            let delay = self.delay;

            async move {
                let now = probe.active.fetch_add(1, Ordering::SeqCst) + 1;
                probe.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                probe.active.fetch_sub(1, Ordering::SeqCst);

                let path = handle.path().to_path_buf();
                let name = path.file_name().unwrap().to_string_lossy().to_string();

                if name.starts_with("bad") {
                    let source = serde_json::from_str::<u8>("x").unwrap_err();
                    return Err(WorkerError::Decode {
                        path,
                        source: DecodeError::Json(source),
                    });
                }
                if name.starts_with("panic") {
                    panic!("worker exploded on {}", name);
                }
                if name.starts_with("gone") {
                    return Ok(FileOutcome::Skipped);
                }

                probe.done.lock().unwrap().push(path);
                Ok(FileOutcome::Ingested {
                    documents: 1,
                    raw_edges: 2,
                })
            }
        }
    }

    fn workers(probe: &Probe, count: usize, delay_ms: u64) -> Vec<FakeWorker> {
        (0..count)
            .map(|_| FakeWorker {
                probe: probe.clone(),
                delay: Duration::from_millis(delay_ms),
            })
            .collect()
    }

    fn stream(names: &[&str], error: Option<SourceError>) -> FileStream {
        let paths: Vec<PathBuf> = names.iter().map(|n| PathBuf::from("/virtual").join(n)).collect();
        spawn_producer(2, move |publisher| {
            for path in paths {
                publisher.publish(FileHandle::local_persistent(path))?;
            }
            match error {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_barrier_waits_for_every_task() {
        let probe = Probe::default();
        let names: Vec<String> = (0..20).map(|i| format!("{:02}.json.gz", i)).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();

        let report = Pipeline::new(workers(&probe, 3, 20)).run(stream(&names, None)).await;

        assert_eq!(report.files_ingested, 20);
        assert_eq!(report.documents, 20);
        assert_eq!(report.raw_edges, 40);
        assert!(report.is_clean());
        assert_eq!(probe.done.lock().unwrap().len(), 20);
        assert_eq!(probe.active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_never_exceeds_pool_size() {
        let probe = Probe::default();
        let names: Vec<String> = (0..12).map(|i| format!("{}.gz", i)).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();

        Pipeline::new(workers(&probe, 3, 30)).run(stream(&names, None)).await;

        let peak = probe.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {}", peak);
        assert!(peak >= 2, "workers never overlapped");
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let probe = Probe::default();
        let report = Pipeline::new(workers(&probe, 2, 1))
            .run(stream(
                &["good0.gz", "bad1.gz", "good2.gz", "panic3.gz", "gone4.gz", "good5.gz"],
                None,
            ))
            .await;

        assert_eq!(report.files_ingested, 3);
        assert_eq!(report.files_skipped, 1);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.files_processed(), 6);
        assert!(report.producer_error.is_none());
        assert!(!report.is_clean());

        let failed: Vec<_> = report
            .failures
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(failed.contains(&"bad1.gz".to_string()));
        assert!(failed.contains(&"panic3.gz".to_string()));
        assert!(report
            .failures
            .iter()
            .any(|f| matches!(&f.error, WorkerError::Panicked(m) if m.contains("panic3.gz"))));
    }

    #[tokio::test]
    async fn test_producer_error_still_drains_dispatched_tasks() {
        let probe = Probe::default();
        let error = SourceError::Transport(TransportError::Exhausted {
            attempts: 10,
            last: Box::new(TransportError::TransientDisconnect("421".into())),
        });

        let report = Pipeline::new(workers(&probe, 2, 10))
            .run(stream(&["a.gz", "b.gz", "c.gz"], Some(error)))
            .await;

        assert_eq!(report.files_ingested, 3);
        assert_eq!(probe.done.lock().unwrap().len(), 3);
        assert!(matches!(
            report.producer_error,
            Some(SourceError::Transport(TransportError::Exhausted { .. }))
        ));
    }

    #[tokio::test]
    async fn test_lost_workers_fail_remaining_files() {
        let probe = Probe::default();
        let report = Pipeline::new(workers(&probe, 1, 1))
            .run(stream(&["panic0.gz", "good1.gz"], None))
            .await;

        assert_eq!(report.files_ingested, 0);
        assert_eq!(report.failures.len(), 2);
        assert!(matches!(report.failures[1].error, WorkerError::NoWorker));
    }

    /// Panics when dropped, i.e. after the unwind guard has already returned
    struct DropBomb;

    impl Drop for DropBomb {
        fn drop(&mut self) {
            panic!("dropped while settling");
        }
    }

    struct Landmine(DropBomb);

    impl Future for Landmine {
        type Output = Result<FileOutcome, WorkerError>;

        fn poll(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Self::Output> {
            std::task::Poll::Ready(Ok(FileOutcome::Skipped))
        }
    }

    struct LandmineWorker;

    impl Ingest for LandmineWorker {
        fn ingest(
            &mut self,
            _handle: FileHandle,
        ) -> impl Future<Output = Result<FileOutcome, WorkerError>> + Send {
            Landmine(DropBomb)
        }
    }

    #[tokio::test]
    async fn test_escaped_panic_keeps_file_path() {
        let report = Pipeline::new(vec![LandmineWorker])
            .run(stream(&["x.gz"], None))
            .await;

        assert_eq!(report.files_skipped, 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, PathBuf::from("/virtual/x.gz"));
        assert!(matches!(report.failures[0].error, WorkerError::Panicked(_)));
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let probe = Probe::default();
        let pipeline = Pipeline::new(workers(&probe, 4, 1));
        assert_eq!(pipeline.size(), 4);

        let report = pipeline.run(stream(&[], None)).await;
        assert_eq!(report.files_processed(), 0);
        assert!(report.is_clean());
    }
}
