//! Worker liveness records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Heartbeat row owned by one running worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    pub pid: u32,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl WorkerHeartbeat {
    /// Seen within `freshness` of `now`?
    pub fn is_fresh(&self, now: DateTime<Utc>, freshness: chrono::Duration) -> bool {
        now - self.last_seen <= freshness
    }
}
