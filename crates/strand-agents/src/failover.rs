//! The early-failure rule that decides whether the next candidate model runs.
//!
//! The runner script applies it in bash while a thread runs; the watcher
//! applies it to the completion marker afterwards to explain a failure.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailoverPolicy {
    /// A nonzero exit faster than this means the model never got going
    /// (bad key, unknown model, rate limit) and the next candidate is tried.
    pub early_failure: Duration,
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        Self {
            early_failure: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptVerdict {
    Succeeded,
    /// Early failure with candidates left.
    TryNext,
    /// Late failure, or early failure on the last candidate.
    Failed,
}

/// Decision after one attempt, as a plain value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverDecision {
    pub verdict: AttemptVerdict,
    pub reason: String,
}

impl FailoverPolicy {
    pub fn new(early_failure: Duration) -> Self {
        Self { early_failure }
    }

    /// Threshold as written into runner scripts.
    pub fn threshold_ms(&self) -> u64 {
        u64::try_from(self.early_failure.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn evaluate(&self, exit_code: i32, elapsed: Duration, has_next: bool) -> FailoverDecision {
        if exit_code == 0 {
            return FailoverDecision {
                verdict: AttemptVerdict::Succeeded,
                reason: "agent exited cleanly".to_string(),
            };
        }
        if elapsed >= self.early_failure {
            return FailoverDecision {
                verdict: AttemptVerdict::Failed,
                reason: format!(
                    "exit {exit_code} after {}ms; past the {}ms early-failure window",
                    elapsed.as_millis(),
                    self.early_failure.as_millis()
                ),
            };
        }
        if !has_next {
            return FailoverDecision {
                verdict: AttemptVerdict::Failed,
                reason: format!("exit {exit_code} and no candidate models left"),
            };
        }
        FailoverDecision {
            verdict: AttemptVerdict::TryNext,
            reason: format!(
                "exit {exit_code} after {}ms; trying next candidate",
                elapsed.as_millis()
            ),
        }
    }
}
