//! Retry with exponential backoff, driven by explicit step outcomes.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::TransferConfig;
use crate::error::StepError;
use crate::outcome::TransferStatus;

/// Result of one step (or one whole attempt) as seen by the retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome<T, E = StepError> {
    Success(T),
    /// Worth another attempt after backing off.
    Retryable(E),
    /// No point retrying; the record fails now.
    Fatal(E),
}

impl<T> From<Result<T, StepError>> for StepOutcome<T> {
    fn from(result: Result<T, StepError>) -> Self {
        match result {
            Ok(v) => StepOutcome::Success(v),
            Err(e) if e.is_retryable() => StepOutcome::Retryable(e),
            Err(e) => StepOutcome::Fatal(e),
        }
    }
}

/// Which part of an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Validating the record before any request.
    Prepare,
    Download,
    Stage,
    Upload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub phase: Phase,
    pub error: StepError,
    /// Set when the download was staged before the failure.
    pub staged_path: Option<PathBuf>,
}

impl AttemptFailure {
    pub fn new(phase: Phase, error: StepError) -> Self {
        Self {
            phase,
            error,
            staged_path: None,
        }
    }

    pub fn with_staged(mut self, path: PathBuf) -> Self {
        self.staged_path = Some(path);
        self
    }

    /// Final status when this is the last failure of a record.
    pub fn status(&self) -> TransferStatus {
        if !self.error.is_retryable() {
            return TransferStatus::FailedOther;
        }
        match self.phase {
            Phase::Download => TransferStatus::FailedDownload,
            Phase::Upload => TransferStatus::FailedUpload,
            Phase::Prepare | Phase::Stage => TransferStatus::FailedOther,
        }
    }

    /// Wrap as a loop outcome, retryable or not depending on the error.
    pub fn into_outcome<T>(self) -> StepOutcome<T, AttemptFailure> {
        if self.error.is_retryable() {
            StepOutcome::Retryable(self)
        } else {
            StepOutcome::Fatal(self)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff,
        }
    }

    /// Wait after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_backoff.saturating_mul(1u32 << exp)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Total backoff slept before attempt `attempt` starts.
    pub fn cumulative_backoff_before(&self, attempt: u32) -> Duration {
        (1..attempt).fold(Duration::ZERO, |acc, n| acc.saturating_add(self.backoff_after(n)))
    }
}

impl From<&TransferConfig> for RetryPolicy {
    fn from(cfg: &TransferConfig) -> Self {
        RetryPolicy::new(cfg.max_attempts, cfg.base_backoff)
    }
}

#[derive(Debug)]
pub struct RetryReport<T, E> {
    pub result: Result<T, E>,
    /// Attempts actually made, at least 1.
    pub attempts: u32,
}

/// Run `attempt(n)` for n = 1, 2, ... until success, a fatal outcome, or
/// the policy runs out. `on_backoff(next_attempt, delay, &last_error)` fires
/// before each backoff sleep.
pub async fn retry_loop<T, E, F, Fut, B>(
    policy: &RetryPolicy,
    mut attempt: F,
    mut on_backoff: B,
) -> RetryReport<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = StepOutcome<T, E>>,
    B: FnMut(u32, Duration, &E),
{
    let mut n = 1;
    loop {
        match attempt(n).await {
            StepOutcome::Success(v) => {
                return RetryReport {
                    result: Ok(v),
                    attempts: n,
                }
            }
            StepOutcome::Fatal(e) => {
                return RetryReport {
                    result: Err(e),
                    attempts: n,
                }
            }
            StepOutcome::Retryable(e) => {
                if !policy.should_retry(n) {
                    return RetryReport {
                        result: Err(e),
                        attempts: n,
                    };
                }
                let delay = policy.backoff_after(n);
                on_backoff(n + 1, delay, &e);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                n += 1;
            }
        }
    }
}
