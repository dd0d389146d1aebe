//! Error types for the migration run.
//!
//! `SetupError` covers everything that stops a run before (or instead of)
//! transferring; each variant maps to a distinct process exit code.
//! `StepError` is a single failed download/stage/upload step; it never
//! escapes the transfer engine and ends up as text in a `TransferOutcome`.

use std::time::Duration;

use thiserror::Error;

/// Fatal, run-level failures.
#[derive(Error, Debug)]
pub enum SetupError {
    /// Missing or invalid setting (env var, CLI override).
    #[error("configuration error: {0}")]
    Config(String),

    /// Record source could not be reached or queried.
    #[error("record source error: {0:#}")]
    Source(anyhow::Error),

    /// Anything else that prevents the run from producing its outputs
    /// (log file, staging directory, report file).
    #[error("{0:#}")]
    Other(#[from] anyhow::Error),
}

impl SetupError {
    pub fn config(message: impl Into<String>) -> Self {
        SetupError::Config(message.into())
    }

    /// Process exit code for this failure. 0 is reserved for completed runs.
    pub fn exit_code(&self) -> u8 {
        match self {
            SetupError::Config(_) => 2,
            SetupError::Source(_) => 3,
            SetupError::Other(_) => 1,
        }
    }
}

/// One failed step of a transfer attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("staging error: {0}")]
    Staging(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// The record was never allowed to start.
    #[error("transfer aborted: {0}")]
    Aborted(String),
}

impl StepError {
    /// Whether another attempt has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StepError::InvalidRecord(_) | StepError::Aborted(_))
    }
}
