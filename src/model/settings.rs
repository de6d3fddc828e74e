//! Runtime tunables read by workers for every job.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MAX_RETRIES_KEY: &str = "max_retries";
pub const BASE_BACKOFF_KEY: &str = "base_backoff";
pub const JOB_TIMEOUT_KEY: &str = "job_timeout_sec";

/// Typed snapshot of the `config` relation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub max_retries: u32,
    pub base_backoff: u64,
    pub job_timeout_sec: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: 2,
            job_timeout_sec: 60,
        }
    }
}

impl RuntimeConfig {
    /// Build from raw key/value strings. Missing or unparsable values fall
    /// back to the default for that key only.
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut config = Self::default();
        for (key, value) in entries {
            let value = value.trim();
            match key {
                MAX_RETRIES_KEY => {
                    if let Ok(v) = value.parse() {
                        config.max_retries = v;
                    }
                }
                BASE_BACKOFF_KEY => {
                    if let Ok(v) = value.parse() {
                        config.base_backoff = v;
                    }
                }
                JOB_TIMEOUT_KEY => {
                    if let Ok(v) = value.parse() {
                        config.job_timeout_sec = v;
                    }
                }
                _ => {}
            }
        }
        config
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_sec)
    }

    /// Defaults seeded into a fresh store.
    pub fn default_entries() -> [(&'static str, String); 3] {
        let d = Self::default();
        [
            (MAX_RETRIES_KEY, d.max_retries.to_string()),
            (BASE_BACKOFF_KEY, d.base_backoff.to_string()),
            (JOB_TIMEOUT_KEY, d.job_timeout_sec.to_string()),
        ]
    }
}
