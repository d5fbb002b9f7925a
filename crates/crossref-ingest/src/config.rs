//! Importer configuration
//!
//! Layered with figment, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. a TOML file (`crossref_db.toml` unless overridden)
//! 3. `DATABASE_URL`
//! 4. `CROSSREF_*` variables, `__` separating sections
//!    (`CROSSREF_PIPELINE__WORKERS=8`, `CROSSREF_FTP__HOST=ftp.example.org`)
//!
//! Exactly one of `[ftp]` and `[local]` selects where batch files come from.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::source::DEFAULT_CHANNEL_CAPACITY;
use crate::transport::{FtpConfig, RetryPolicy, BACKOFF_STEP_SECS, MAX_ATTEMPTS};

/// Config file read when none is given on the command line
pub const DEFAULT_CONFIG_FILE: &str = "crossref_db.toml";

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/crossref";

/// Default FTP control port.
pub const DEFAULT_FTP_PORT: u16 = 21;

/// Default extension of local batch files.
pub const DEFAULT_LOCAL_EXTENSION: &str = "gz";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ftp: Option<FtpSourceConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalSourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Parallel ingest workers, each holding one database connection
    pub workers: usize,
    /// Handles buffered between the producer and the workers
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_step_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpSourceConfig {
    pub host: String,

    #[serde(default = "default_ftp_port")]
    pub port: u16,

    #[serde(default = "default_login")]
    pub login: String,

    #[serde(default = "default_password")]
    pub password: String,

    /// Remote directory holding the batch files
    pub directory: String,

    /// Where downloads wait until a worker has ingested them
    #[serde(default = "default_tmpdir")]
    pub tmpdir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSourceConfig {
    pub directory: PathBuf,

    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_ftp_port() -> u16 {
    DEFAULT_FTP_PORT
}

fn default_login() -> String {
    FtpConfig::default().login
}

fn default_password() -> String {
    FtpConfig::default().password
}

fn default_tmpdir() -> PathBuf {
    std::env::temp_dir().join("crossref-db")
}

fn default_extension() -> String {
    DEFAULT_LOCAL_EXTENSION.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
            },
            pipeline: PipelineConfig::default(),
            retry: RetryConfig::default(),
            ftp: None,
            local: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            backoff_step_secs: BACKOFF_STEP_SECS,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts,
            backoff_step: Duration::from_secs(config.backoff_step_secs),
        }
    }
}

impl FtpSourceConfig {
    pub fn connection(&self) -> FtpConfig {
        FtpConfig {
            host: self.host.clone(),
            port: self.port,
            login: self.login.clone(),
            password: self.password.clone(),
        }
    }
}

impl Config {
    /// Load from `.env`, the config file and the environment
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        if path.is_some() && !file.exists() {
            anyhow::bail!("Config file not found: {}", file.display());
        }

        let figment = Self::defaults()
            .merge(Toml::file(file))
            .merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database.url".into()))
            .merge(Env::prefixed("CROSSREF_").split("__"));

        Self::from_figment(figment)
    }

    /// Built-in defaults as the base layer
    pub fn defaults() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
    }

    pub fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        Ok(figment.extract()?)
    }

    /// Checks every command needs
    pub fn validate_database(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }
        Ok(())
    }

    /// Full validation for commands that ingest
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_database()?;

        if self.pipeline.workers == 0 {
            anyhow::bail!("pipeline.workers must be greater than 0");
        }

        if self.pipeline.channel_capacity == 0 {
            anyhow::bail!("pipeline.channel_capacity must be greater than 0");
        }

        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be greater than 0");
        }

        match (&self.ftp, &self.local) {
            (Some(_), Some(_)) => {
                anyhow::bail!("Configure either [ftp] or [local], not both")
            },
            (None, None) => anyhow::bail!("No source configured: add an [ftp] or [local] section"),
            (Some(ftp), None) => {
                if ftp.host.is_empty() {
                    anyhow::bail!("ftp.host cannot be empty");
                }
                if ftp.directory.is_empty() {
                    anyhow::bail!("ftp.directory cannot be empty");
                }
            },
            (None, Some(local)) => {
                if local.extension.trim_start_matches('.').is_empty() {
                    anyhow::bail!("local.extension cannot be empty");
                }
            },
        }

        Ok(())
    }
}
