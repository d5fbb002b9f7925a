//! FTP directory source
//!
//! Lists the configured directory once, sorts it, then downloads entries one
//! at a time into the temp directory. Everything goes through the single
//! retrying session, so this never runs in parallel.

use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

use super::{spawn_producer, FileHandle, FileStream, Publisher};
use crate::error::SourceError;
use crate::transport::{Connector, RetryPolicy, RetryingTransport};

pub struct RemoteSource<C: Connector> {
    connector: C,
    policy: RetryPolicy,
    directory: String,
    tmpdir: PathBuf,
}

impl<C: Connector + 'static> RemoteSource<C> {
    pub fn new(connector: C, policy: RetryPolicy, directory: String, tmpdir: PathBuf) -> Self {
        Self {
            connector,
            policy,
            directory,
            tmpdir,
        }
    }

    pub fn directory(&self) -> &str {
        &self.directory
    }

    pub fn tmpdir(&self) -> &Path {
        &self.tmpdir
    }

    pub fn iterate(self, capacity: usize) -> FileStream {
        spawn_producer(capacity, move |publisher| self.produce(publisher))
    }

    fn produce(self, publisher: &Publisher) -> Result<(), SourceError> {
        std::fs::create_dir_all(&self.tmpdir).map_err(|source| SourceError::Enumerate {
            path: self.tmpdir.clone(),
            source,
        })?;

        let mut transport = RetryingTransport::connect(self.connector, self.policy)?;

        let mut names = transport.list(&self.directory)?;
        names.sort();
        let total = names.len();
        info!(directory = %self.directory, entries = total, "Listed remote batch files");

        let started = Instant::now();
        let mut downloaded = 0usize;

        for (index, name) in names.iter().enumerate() {
            // some servers answer NLST with full paths
            let file_name = name.rsplit('/').next().unwrap_or(name.as_str());
            if file_name.is_empty() || file_name.starts_with('.') {
                debug!(name = %name, "Skipping hidden entry");
                continue;
            }

            let remote = remote_path(&self.directory, file_name);
            let local = self.tmpdir.join(file_name);
            let bytes = transport.download(&remote, &local)?;
            downloaded += 1;

            info!(
                file = %file_name,
                bytes,
                file_index = index + 1,
                total,
                elapsed_secs = started.elapsed().as_secs(),
                "Downloaded batch file"
            );

            publisher.publish(FileHandle::remote_temporary(local))?;
        }

        info!(downloaded, "Remote enumeration finished");
        transport.close();
        Ok(())
    }
}

fn remote_path(directory: &str, file_name: &str) -> String {
    format!("{}/{}", directory.trim_end_matches('/'), file_name)
}
