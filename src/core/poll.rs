//! SX-005: Polling primitive for every remote wait.
//!
//! One retry-until-terminal loop parameterized by attempt budget and fixed
//! interval. Change set readiness and stack completion differ only in the
//! check closure and the budget.

use std::time::Duration;

/// Tri-state result of one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T> {
    Pending,
    Ready(T),
    Failed(T),
}

/// Attempt budget and inter-attempt delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl PollBudget {
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Change set creation: 5s x 120 (10 minutes).
    pub const fn change_set() -> Self {
        Self::new(120, Duration::from_secs(5))
    }

    /// Stack create/update: 10s x 360 (1 hour).
    pub const fn stack_operation() -> Self {
        Self::new(360, Duration::from_secs(10))
    }

    /// Upper bound on wall-clock time spent sleeping.
    pub fn max_wait(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

/// Why a poll ended without reaching `Ready`.
#[derive(Debug, PartialEq, Eq)]
pub enum PollError<T, E> {
    /// The check reported a terminal failure.
    Failed(T),
    /// Budget exhausted while still pending.
    TimedOut { attempts: u32 },
    /// The check itself errored.
    Check(E),
}

/// Invoke `check` until it reports a terminal state or the budget runs out.
///
/// `check` receives the 1-based attempt number. Sleeps `budget.interval`
/// between attempts, never after the last one.
pub fn poll_until<T, E, F>(budget: &PollBudget, mut check: F) -> Result<T, PollError<T, E>>
where
    F: FnMut(u32) -> Result<Poll<T>, E>,
{
    for attempt in 1..=budget.max_attempts {
        match check(attempt).map_err(PollError::Check)? {
            Poll::Ready(value) => return Ok(value),
            Poll::Failed(value) => return Err(PollError::Failed(value)),
            Poll::Pending => {
                tracing::debug!(attempt, max = budget.max_attempts, "still pending");
                if attempt < budget.max_attempts && !budget.interval.is_zero() {
                    std::thread::sleep(budget.interval);
                }
            }
        }
    }
    Err(PollError::TimedOut {
        attempts: budget.max_attempts,
    })
}
