//! Job records, lifecycle state and the submission builder.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Priority given to jobs that don't ask for one. Lower runs sooner.
pub const DEFAULT_PRIORITY: i64 = 5;

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A unit of work tracked by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,

    /// Shell command line. Opaque to the engine.
    pub command: String,

    pub state: State,

    /// Number of executions started so far.
    pub attempts: u32,

    /// Executions allowed before the job is dead-lettered.
    pub max_retries: u32,

    /// Lower = served sooner.
    pub priority: i64,

    /// Earliest time the job may be claimed. None = immediately.
    pub run_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Is the job eligible to be claimed at `now`?
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == State::Pending && self.run_at.is_none_or(|at| at <= now)
    }
}

/// Job identifier. Caller-supplied ids are kept verbatim; generated ids are UUIDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Waiting for a worker (possibly not yet due).
    Pending,
    /// Claimed by exactly one worker.
    Processing,
    /// Ran successfully. Terminal.
    Completed,
    /// Execution failed; only seen while deciding between retry and dead.
    Failed,
    /// Exhausted retries. Terminal, mirrored in the DLQ.
    Dead,
}

impl State {
    pub const ALL: [State; 5] = [
        State::Pending,
        State::Processing,
        State::Completed,
        State::Failed,
        State::Dead,
    ];

    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: State) -> bool {
        use State::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Pending) // retry
                | (Processing, Dead)
                | (Failed, Pending)
                | (Failed, Dead)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            State::Pending => "pending",
            State::Processing => "processing",
            State::Completed => "completed",
            State::Failed => "failed",
            State::Dead => "dead",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for State {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        State::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown state: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for submitting new jobs. Validation happens in [`NewJob::validate`],
/// which the store calls before touching the database.
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub(crate) id: Option<JobId>,
    pub(crate) command: String,
    pub(crate) priority: Option<i64>,
    pub(crate) run_at: Option<DateTime<Utc>>,
    pub(crate) max_retries: Option<u32>,
}

/// Wire shape of a JSON submission.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JobSubmission {
    id: Option<String>,
    command: Option<String>,
    priority: Option<i64>,
    run_at: Option<String>,
    max_retries: Option<i64>,
}

impl NewJob {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON submission: `{"command": ..., "id"?, "priority"?, "run_at"?, "max_retries"?}`.
    pub fn from_json(json: &str) -> Result<Self> {
        let sub: JobSubmission = serde_json::from_str(json)
            .map_err(|e| Error::InvalidInput(format!("malformed job json: {e}")))?;

        let command = sub
            .command
            .ok_or_else(|| Error::InvalidInput("job is missing a command".to_string()))?;

        let mut new = NewJob::new(command);
        if let Some(id) = sub.id {
            new = new.id(id);
        }
        if let Some(priority) = sub.priority {
            new = new.priority(priority);
        }
        if let Some(run_at) = sub.run_at {
            new = new.run_at(parse_timestamp(&run_at)?);
        }
        if let Some(max) = sub.max_retries {
            let max = u32::try_from(max)
                .map_err(|_| Error::InvalidInput(format!("max_retries out of range: {max}")))?;
            new = new.max_retries(max);
        }
        new.validate()?;
        Ok(new)
    }

    pub fn id(mut self, id: impl Into<JobId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn run_at(mut self, at: DateTime<Utc>) -> Self {
        self.run_at = Some(at);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(Error::InvalidInput("job command is empty".to_string()));
        }
        if self.id.as_ref().is_some_and(|id| id.0.trim().is_empty()) {
            return Err(Error::InvalidInput("job id is empty".to_string()));
        }
        Ok(())
    }

    /// Build the pending job, filling `max_retries` from the runtime default.
    pub(crate) fn into_job(self, default_max_retries: u32, now: DateTime<Utc>) -> Job {
        Job {
            id: self.id.unwrap_or_else(JobId::generate),
            command: self.command,
            state: State::Pending,
            attempts: 0,
            max_retries: self.max_retries.unwrap_or(default_max_retries),
            priority: self.priority.unwrap_or(DEFAULT_PRIORITY),
            run_at: self.run_at,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Parse an ISO-8601 timestamp. Values without an offset are taken as UTC.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| Error::InvalidInput(format!("invalid timestamp: {s}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn state_round_trips_through_str() {
        for state in State::ALL {
            assert_eq!(state.as_str().parse::<State>().unwrap(), state);
        }
        assert!("queued".parse::<State>().is_err());
    }

    #[test]
    fn retry_and_dead_leave_processing_only() {
        assert!(State::Pending.can_transition_to(State::Processing));
        assert!(State::Processing.can_transition_to(State::Pending));
        assert!(State::Processing.can_transition_to(State::Dead));
        assert!(!State::Pending.can_transition_to(State::Completed));
        assert!(!State::Completed.can_transition_to(State::Pending));
        assert!(!State::Dead.can_transition_to(State::Processing));
    }

    #[test]
    fn naive_timestamps_are_utc() {
        let expected = Utc.with_ymd_and_hms(2025, 11, 8, 10, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2025-11-08T10:30:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2025-11-08T10:30:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2025-11-08T12:30:00+02:00").unwrap(), expected);
        assert!(parse_timestamp("next tuesday").is_err());
    }

    #[test]
    fn json_submission_applies_defaults() {
        let new = NewJob::from_json(r#"{"command": "echo hi"}"#).unwrap();
        let now = Utc::now();
        let job = new.into_job(3, now);
        assert_eq!(job.command, "echo hi");
        assert_eq!(job.priority, DEFAULT_PRIORITY);
        assert_eq!(job.max_retries, 3);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.state, State::Pending);
        assert!(job.run_at.is_none());
        assert!(job.is_due(now));
    }

    #[test]
    fn json_submission_keeps_explicit_fields() {
        let new = NewJob::from_json(
            r#"{"id": "job1", "command": "sleep 2", "priority": 1, "max_retries": 5, "run_at": "2030-01-01T00:00:00"}"#,
        )
        .unwrap();
        let job = new.into_job(3, Utc::now());
        assert_eq!(job.id, JobId::from("job1"));
        assert_eq!(job.priority, 1);
        assert_eq!(job.max_retries, 5);
        assert!(!job.is_due(Utc::now()));
    }

    #[test]
    fn malformed_submissions_are_rejected() {
        for bad in [
            r#"{}"#,
            r#"{"command": "   "}"#,
            r#"{"command": "true", "run_at": "soon"}"#,
            r#"{"command": "true", "max_retries": -1}"#,
            r#"{"command": "true", "colour": "red"}"#,
            "not json",
        ] {
            assert!(
                matches!(NewJob::from_json(bad), Err(Error::InvalidInput(_))),
                "accepted {bad}"
            );
        }
    }
}
