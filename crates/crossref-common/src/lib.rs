//! crossref-db common library
//!
//! Shared plumbing for the crossref-db workspace members. Right now that is
//! the process-wide logging setup used by the ingestion binary and tests.
//!
//! # Example
//!
//! ```no_run
//! use crossref_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod logging;

pub use logging::{init_logging, LogConfig, LogGuard};
