//! Error types for the ingestion pipeline
//!
//! Each layer has its own enum so callers can tell which failures are fatal to
//! the whole run (transport, enumeration, resolution) and which only sink a
//! single file (decode, store).

use std::path::PathBuf;
use suppaftp::{FtpError, Status};
use thiserror::Error;

/// FTP transport failures
#[derive(Error, Debug)]
pub enum TransportError {
    /// 421 "service not available": the server dropped the control connection
    #[error("FTP server temporarily unavailable: {0}")]
    TransientDisconnect(String),

    #[error("FTP operation failed: {0}")]
    Permanent(String),

    #[error("FTP retry budget exhausted after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<TransportError>,
    },

    #[error("Local file error during transfer: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn is_transient_disconnect(&self) -> bool {
        matches!(self, TransportError::TransientDisconnect(_))
    }
}

impl From<FtpError> for TransportError {
    fn from(err: FtpError) -> Self {
        match err {
            FtpError::UnexpectedResponse(ref response)
                if matches!(response.status, Status::NotAvailable) =>
            {
                TransportError::TransientDisconnect(err.to_string())
            },
            other => TransportError::Permanent(other.to_string()),
        }
    }
}

/// Failures of the file enumerator (producer side)
#[derive(Error, Debug)]
pub enum SourceError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Failed to enumerate {}: {source}", path.display())]
    Enumerate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Importer configuration error: {0}")]
    Misconfigured(String),

    #[error("File consumer went away before enumeration finished")]
    ConsumerGone,

    #[error("Source producer stopped unexpectedly")]
    Aborted,
}

/// Failures while ingesting a single file; never fatal to the run
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed batch in {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    #[error("Store write failed: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Worker task panicked: {0}")]
    Panicked(String),

    #[error("No ingest worker available")]
    NoWorker,
}

/// Batch content could not be decoded
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("gzip: {0}")]
    Gzip(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures of the lifecycle operations exposed to the CLI
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Database error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Enumeration failed: {0}")]
    Source(#[from] SourceError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Background task failed: {0}")]
    Task(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_disconnect_is_retryable() {
        assert!(TransportError::TransientDisconnect("421".into()).is_transient_disconnect());
        assert!(!TransportError::Permanent("550".into()).is_transient_disconnect());

        let exhausted = TransportError::Exhausted {
            attempts: 10,
            last: Box::new(TransportError::TransientDisconnect("421".into())),
        };
        assert!(!exhausted.is_transient_disconnect());
        assert!(exhausted.to_string().contains("10 attempts"));
    }

    #[test]
    fn test_connection_errors_are_permanent() {
        let err: TransportError =
            FtpError::ConnectionError(std::io::Error::other("reset by peer")).into();
        assert!(matches!(err, TransportError::Permanent(_)));
    }
}
