//! Typed process configuration from environment variables.
//!
//! Loads once at startup. Everything has a default, so only malformed
//! values fail. Runtime tunables (retries, backoff, timeout) are not here:
//! they live in the store so operators can change them while workers run.

use crate::error::{Error, Result};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file shared by every worker and the CLI.
    pub database_path: PathBuf,
    /// Directory for per-job output sidecars.
    pub log_dir: PathBuf,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let home = home_dir()?;
        Ok(Self {
            database_path: path_var("QUEUECTL_DB")?.unwrap_or_else(|| home.join(".queuectl.db")),
            log_dir: path_var("QUEUECTL_LOG_DIR")?.unwrap_or_else(|| log_dir_under(&home)),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// `~/.queuectl/logs`, or `None` without a home directory.
pub fn default_log_dir() -> Option<PathBuf> {
    home_dir().ok().map(|home| log_dir_under(&home))
}

fn log_dir_under(home: &std::path::Path) -> PathBuf {
    home.join(".queuectl").join("logs")
}

fn path_var(name: &str) -> Result<Option<PathBuf>> {
    match std::env::var(name) {
        Ok(v) if v.trim().is_empty() => Err(Error::Config(format!(
            "environment variable {name} is set but empty"
        ))),
        Ok(v) => Ok(Some(PathBuf::from(v))),
        Err(_) => Ok(None),
    }
}

fn home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| Error::Config("HOME is not set".to_string()))
}
