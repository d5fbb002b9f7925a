//! Retrying FTP transport
//!
//! Wraps a single stateful FTP session. Operations are closures run against
//! the live session; when the server answers 421 the session is dropped, the
//! transport sleeps `backoff_step * (attempt - 1)`, logs in again and re-runs
//! the same closure. Any other failure propagates untouched.
//!
//! Because a closure may run more than once on different sessions it must be
//! self-contained: working directory and transfer state are not preserved
//! across a reconnect.
//!
//! ```rust,ignore
//! let mut ftp = RetryingTransport::connect(FtpConnector::new(config), RetryPolicy::default())?;
//! let names = ftp.execute(|session| {
//!     session.change_dir("/pub/crossref")?;
//!     session.name_list()
//! })?;
//! ```

pub mod ftp;
#[cfg(test)]
pub(crate) mod memory;

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::TransportError;

pub use ftp::{FtpConfig, FtpConnector};

/// Default number of attempts before a transient disconnect becomes fatal
pub const MAX_ATTEMPTS: u32 = 10;

/// Backoff grows by this step per failed attempt (0s, 22s, 44s, ...)
pub const BACKOFF_STEP_SECS: u64 = 22;

/// The FTP commands the ingestion pipeline needs from a session
pub trait FtpSession: Send {
    fn change_dir(&mut self, path: &str) -> Result<(), TransportError>;

    /// Names in the current directory (NLST)
    fn name_list(&mut self) -> Result<Vec<String>, TransportError>;

    fn make_dir(&mut self, path: &str) -> Result<(), TransportError>;

    /// Stream `remote` into `dest`, returning the byte count
    fn retrieve(&mut self, remote: &str, dest: &mut dyn Write) -> Result<u64, TransportError>;

    /// Stream `src` into `remote`, returning the byte count
    fn store(&mut self, remote: &str, src: &mut dyn Read) -> Result<u64, TransportError>;

    fn logout(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Opens and authenticates new sessions
pub trait Connector: Send {
    type Session: FtpSession;

    fn connect(&self) -> Result<Self::Session, TransportError>;
}

/// How hard the transport tries before giving up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            backoff_step: Duration::from_secs(BACKOFF_STEP_SECS),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the `attempt`-th failure (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt.saturating_sub(1)
    }
}

/// One FTP session plus the logic to bring it back after a 421
pub struct RetryingTransport<C: Connector> {
    connector: C,
    policy: RetryPolicy,
    session: Option<C::Session>,
}

impl<C: Connector> RetryingTransport<C> {
    /// Log in once up front; a failure here is not retried
    pub fn connect(connector: C, policy: RetryPolicy) -> Result<Self, TransportError> {
        let session = connector.connect()?;
        Ok(Self {
            connector,
            policy,
            session: Some(session),
        })
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `op` against the live session, reconnecting on transient disconnects
    pub fn execute<T, F>(&mut self, mut op: F) -> Result<T, TransportError>
    where
        F: FnMut(&mut C::Session) -> Result<T, TransportError>,
    {
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            match self.attempt(&mut op) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient_disconnect() => {
                    self.session = None;

                    if attempts >= self.policy.max_attempts {
                        return Err(TransportError::Exhausted {
                            attempts,
                            last: Box::new(err),
                        });
                    }

                    let delay = self.policy.backoff(attempts);
                    warn!(
                        attempt = attempts,
                        max_attempts = self.policy.max_attempts,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "FTP session dropped, reconnecting"
                    );
                    std::thread::sleep(delay);
                },
                Err(err) => return Err(err),
            }
        }
    }

    fn attempt<T, F>(&mut self, op: &mut F) -> Result<T, TransportError>
    where
        F: FnMut(&mut C::Session) -> Result<T, TransportError>,
    {
        if self.session.is_none() {
            debug!("Re-authenticating FTP session");
            self.session = Some(self.connector.connect()?);
        }

        match self.session.as_mut() {
            Some(session) => op(session),
            None => Err(TransportError::Permanent("FTP session unavailable".to_string())),
        }
    }

    /// Entry names under `dir`
    pub fn list(&mut self, dir: &str) -> Result<Vec<String>, TransportError> {
        self.execute(|session| {
            session.change_dir(dir)?;
            session.name_list()
        })
    }

    /// Create `dir` on the server
    pub fn mkdir(&mut self, dir: &str) -> Result<(), TransportError> {
        self.execute(|session| session.make_dir(dir))
    }

    /// Stream `remote` into `local`, truncating it on every attempt
    pub fn download(&mut self, remote: &str, local: &Path) -> Result<u64, TransportError> {
        self.execute(|session| {
            let mut writer = BufWriter::new(File::create(local)?);
            let bytes = session.retrieve(remote, &mut writer)?;
            writer.flush()?;
            Ok(bytes)
        })
    }

    /// Stream `local` into `remote`, reopening it on every attempt
    pub fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, TransportError> {
        self.execute(|session| {
            let mut file = File::open(local)?;
            session.store(remote, &mut file)
        })
    }

    /// Say goodbye to the server; errors are only logged
    pub fn close(mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.logout() {
                warn!("Failed to quit FTP session gracefully: {}", e);
            }
        }
    }
}
