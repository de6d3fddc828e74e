//! Dead letter records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::JobId;

/// Snapshot of a job that exhausted its retries. The job row itself stays
/// in the catalog as `dead`; this is the queryable failure log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub id: JobId,
    pub command: String,
    pub attempts: u32,
    pub max_retries: u32,
    pub failed_at: DateTime<Utc>,
}
