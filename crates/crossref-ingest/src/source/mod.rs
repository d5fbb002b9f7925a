//! Pluggable batch-file sources
//!
//! A [`Source`] enumerates batch files on a dedicated blocking thread and
//! publishes [`FileHandle`]s through a bounded channel. When the channel is
//! full the producer blocks, so downloads never run further ahead of ingestion
//! than the channel capacity.
//!
//! The producer always ends the stream with a sentinel, even when it fails or
//! panics, so the consumer never waits forever.

mod local;
mod remote;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::Config;
use crate::error::SourceError;
use crate::transport::{FtpConnector, RetryPolicy};

pub use local::LocalSource;
pub use remote::RemoteSource;

/// Default number of handles buffered between producer and workers
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Who owns the bytes behind a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Downloaded into the temp directory; deleted once ingested
    RemoteTemporary,
    /// Part of a local corpus; never touched
    LocalPersistent,
}

/// One batch file on local disk
#[derive(Debug)]
pub struct FileHandle {
    path: PathBuf,
    origin: Origin,
}

impl FileHandle {
    /// A download that is deleted once ingested
    pub fn remote_temporary(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            origin: Origin::RemoteTemporary,
        }
    }

    /// A corpus file that is left in place
    pub fn local_persistent(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            origin: Origin::LocalPersistent,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Release the backing file after a successful commit
    pub fn complete(self) -> std::io::Result<()> {
        match self.origin {
            Origin::RemoteTemporary => {
                debug!(path = %self.path.display(), "Removing ingested temp file");
                std::fs::remove_file(&self.path)
            },
            Origin::LocalPersistent => Ok(()),
        }
    }
}

/// What travels over the producer channel
#[derive(Debug)]
pub enum SourceMessage {
    File(FileHandle),
    /// Sentinel; carries the producer's failure, if any
    End(Option<SourceError>),
}

/// Consumer side of a running source
pub struct FileStream {
    rx: mpsc::Receiver<SourceMessage>,
    published: Arc<AtomicUsize>,
    finished: bool,
}

impl FileStream {
    /// Next handle, the producer's error, or `None` once the sentinel arrived
    pub async fn next(&mut self) -> Option<Result<FileHandle, SourceError>> {
        if self.finished {
            return None;
        }

        match self.rx.recv().await {
            Some(SourceMessage::File(handle)) => Some(Ok(handle)),
            Some(SourceMessage::End(None)) => {
                self.finished = true;
                None
            },
            Some(SourceMessage::End(Some(err))) => {
                self.finished = true;
                Some(Err(err))
            },
            None => {
                self.finished = true;
                Some(Err(SourceError::Aborted))
            },
        }
    }

    /// Handles the producer has managed to push so far
    pub fn published(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }
}

/// Producer side; sends the sentinel on every exit path
pub(crate) struct Publisher {
    tx: mpsc::Sender<SourceMessage>,
    published: Arc<AtomicUsize>,
    ended: bool,
}

impl Publisher {
    /// Blocks while the channel is full
    pub(crate) fn publish(&self, handle: FileHandle) -> Result<(), SourceError> {
        self.tx
            .blocking_send(SourceMessage::File(handle))
            .map_err(|_| SourceError::ConsumerGone)?;
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn finish(mut self, result: Result<(), SourceError>) {
        self.ended = true;
        let _ = self.tx.blocking_send(SourceMessage::End(result.err()));
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if !self.ended {
            let _ = self
                .tx
                .blocking_send(SourceMessage::End(Some(SourceError::Aborted)));
        }
    }
}

/// Run `produce` on a blocking thread feeding a channel of `capacity`
///
/// Must be called from within a Tokio runtime.
pub(crate) fn spawn_producer<F>(capacity: usize, produce: F) -> FileStream
where
    F: FnOnce(&Publisher) -> Result<(), SourceError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let published = Arc::new(AtomicUsize::new(0));
    let publisher = Publisher {
        tx,
        published: published.clone(),
        ended: false,
    };

    tokio::task::spawn_blocking(move || {
        let result = produce(&publisher);
        publisher.finish(result);
    });

    FileStream {
        rx,
        published,
        finished: false,
    }
}

/// The configured place batch files come from
pub enum Source {
    Remote(RemoteSource<FtpConnector>),
    Local(LocalSource),
}

impl Source {
    /// FTP wins when configured, otherwise the local directory
    pub fn from_config(config: &Config) -> Result<Self, SourceError> {
        if let Some(ftp) = &config.ftp {
            return Ok(Source::Remote(RemoteSource::new(
                FtpConnector::new(ftp.connection()),
                RetryPolicy::from(&config.retry),
                ftp.directory.clone(),
                ftp.tmpdir.clone(),
            )));
        }

        if let Some(local) = &config.local {
            return Ok(Source::Local(LocalSource::new(
                local.directory.clone(),
                local.extension.clone(),
            )));
        }

        Err(SourceError::Misconfigured(
            "neither [ftp] nor [local] source is configured".to_string(),
        ))
    }

    /// Short label for logs, e.g. `ftp:/pub/crossref`
    pub fn describe(&self) -> String {
        match self {
            Source::Remote(remote) => format!("ftp:{}", remote.directory()),
            Source::Local(local) => format!("local:{}", local.directory().display()),
        }
    }

    /// Start enumerating; the stream is single-use
    pub fn iterate(self, capacity: usize) -> FileStream {
        match self {
            Source::Remote(remote) => remote.iterate(capacity),
            Source::Local(local) => local.iterate(capacity),
        }
    }
}
