//! Local directory source
//!
//! Walks a directory that already holds a corpus of batch files. Files are
//! handed out as they are found and are never modified or deleted.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{spawn_producer, FileHandle, FileStream, Publisher};
use crate::error::SourceError;

pub struct LocalSource {
    directory: PathBuf,
    extension: String,
}

impl LocalSource {
    pub fn new(directory: PathBuf, extension: String) -> Self {
        Self {
            directory,
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn iterate(self, capacity: usize) -> FileStream {
        spawn_producer(capacity, move |publisher| self.produce(publisher))
    }

    fn matches(&self, path: &Path) -> bool {
        let suffix = format!(".{}", self.extension);
        path.file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.ends_with(&suffix) && !name.starts_with('.'))
            .unwrap_or(false)
    }

    fn produce(self, publisher: &Publisher) -> Result<(), SourceError> {
        let enumerate_error = |source| SourceError::Enumerate {
            path: self.directory.clone(),
            source,
        };

        let entries = std::fs::read_dir(&self.directory).map_err(enumerate_error)?;
        let mut published = 0usize;

        for entry in entries {
            let entry = entry.map_err(enumerate_error)?;
            let path = entry.path();

            if !path.is_file() || !self.matches(&path) {
                debug!(path = %path.display(), "Ignoring directory entry");
                continue;
            }

            publisher.publish(FileHandle::local_persistent(path))?;
            published += 1;
        }

        info!(
            directory = %self.directory.display(),
            files = published,
            "Local enumeration finished"
        );
        Ok(())
    }
}
