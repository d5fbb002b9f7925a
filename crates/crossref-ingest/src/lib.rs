//! crossref-db ingestion library
//!
//! Loads gzip-compressed Crossref metadata batches from an FTP server or a
//! local directory into PostgreSQL, then resolves the citation graph.
//!
//! # Pipeline
//!
//! - [`transport`]: one FTP session that survives 421 disconnects
//! - [`source`]: enumerates batch files on a blocking thread behind a bounded channel
//! - [`worker`]: decodes one file and writes it in a single transaction
//! - [`pipeline`]: dispatches files to a fixed pool of workers and waits for all of them
//! - [`resolver`]: turns raw DOI pairs into document id pairs
//!
//! # Example
//!
//! ```no_run
//! use crossref_ingest::config::Config;
//! use crossref_ingest::lifecycle;
//! use crossref_ingest::source::Source;
//! use crossref_ingest::store::Database;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     let database = Database::from_url(&config.database.url)?;
//!     let source = Source::from_config(&config)?;
//!
//!     let summary = lifecycle::full_run(&database, source, &config.pipeline).await?;
//!     println!("{} resolved edges", summary.counts.resolved_edges);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod pipeline;
pub mod resolver;
pub mod source;
pub mod store;
pub mod transport;
pub mod worker;

pub use config::Config;
pub use error::{LifecycleError, SourceError, TransportError, WorkerError};
pub use pipeline::{IngestReport, Pipeline};
pub use store::Database;
