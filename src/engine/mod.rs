//! Worker engine: retry policy, execution harness, worker loop, and the
//! supervisor that owns a pool of workers.

pub mod exec;
pub mod policy;
pub mod supervisor;
pub mod worker;

pub use supervisor::Supervisor;
pub use worker::{Worker, WorkerConfig, WorkerStats};

/// Host identity recorded in heartbeats.
pub(crate) fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
