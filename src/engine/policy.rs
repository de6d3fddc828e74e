//! Retry, backoff and dead-letter decision.
//!
//! Pure functions over a job's counters and the runtime tunables, so the
//! failure policy can be tested without spawning processes or sleeping.

use std::time::Duration;

use crate::model::{MetricStatus, State};

/// What to do with a job after one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Ran successfully.
    Complete { attempts: u32 },
    /// Failed with retries left: wait `delay`, then return to `pending`.
    Retry { attempts: u32, delay: Duration },
    /// Failed with no retries left: mark dead and dead-letter.
    Dead { attempts: u32 },
}

impl Decision {
    /// Attempt count to persist, including the execution just finished.
    pub fn attempts(self) -> u32 {
        match self {
            Decision::Complete { attempts }
            | Decision::Retry { attempts, .. }
            | Decision::Dead { attempts } => attempts,
        }
    }

    /// State the job leaves `processing` for.
    pub fn target_state(self) -> State {
        match self {
            Decision::Complete { .. } => State::Completed,
            Decision::Retry { .. } => State::Pending,
            Decision::Dead { .. } => State::Dead,
        }
    }

    /// Completion metric to record. Intermediate retries record none.
    pub fn metric_status(self) -> Option<MetricStatus> {
        match self {
            Decision::Complete { .. } => Some(MetricStatus::Completed),
            Decision::Retry { .. } => None,
            Decision::Dead { .. } => Some(MetricStatus::Failed),
        }
    }
}

/// Decide the next state for a job whose execution just ended.
///
/// `previous_attempts` is the count stored before this execution. The
/// execution itself counts, so a failure that brings attempts up to
/// `max_retries` is terminal.
pub fn decide(succeeded: bool, previous_attempts: u32, max_retries: u32, base_backoff: u64) -> Decision {
    let attempts = previous_attempts.saturating_add(1);
    if succeeded {
        Decision::Complete { attempts }
    } else if attempts < max_retries {
        Decision::Retry {
            attempts,
            delay: backoff_delay(base_backoff, attempts),
        }
    } else {
        Decision::Dead { attempts }
    }
}

/// Exponential backoff: `base ^ attempts` seconds, saturating.
pub fn backoff_delay(base: u64, attempts: u32) -> Duration {
    Duration::from_secs(base.saturating_pow(attempts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_completes_and_counts_the_attempt() {
        assert_eq!(decide(true, 0, 3, 2), Decision::Complete { attempts: 1 });
        assert_eq!(decide(true, 2, 3, 2), Decision::Complete { attempts: 3 });
    }

    #[test]
    fn always_failing_job_retries_then_dies_at_max_retries() {
        let mut attempts = 0;
        let mut delays = Vec::new();
        let last = loop {
            match decide(false, attempts, 3, 2) {
                Decision::Retry { attempts: a, delay } => {
                    attempts = a;
                    delays.push(delay.as_secs());
                }
                other => break other,
            }
        };
        assert_eq!(delays, vec![2, 4]);
        assert_eq!(last, Decision::Dead { attempts: 3 });
        assert_eq!(last.target_state(), State::Dead);
    }

    #[test]
    fn single_retry_budget_dead_letters_immediately() {
        assert_eq!(decide(false, 0, 1, 2), Decision::Dead { attempts: 1 });
        assert_eq!(decide(false, 0, 0, 2), Decision::Dead { attempts: 1 });
    }

    #[test]
    fn backoff_is_exponential_in_attempts() {
        let delays: Vec<u64> = (1..=3).map(|n| backoff_delay(2, n).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8]);
        assert_eq!(backoff_delay(3, 2), Duration::from_secs(9));
        assert_eq!(backoff_delay(0, 1), Duration::ZERO);
        assert_eq!(backoff_delay(u64::MAX, 4), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn metrics_only_for_terminal_outcomes() {
        assert_eq!(decide(true, 0, 3, 2).metric_status(), Some(MetricStatus::Completed));
        assert_eq!(decide(false, 0, 3, 2).metric_status(), None);
        assert_eq!(decide(false, 2, 3, 2).metric_status(), Some(MetricStatus::Failed));
    }
}
