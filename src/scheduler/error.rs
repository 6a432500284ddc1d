//! Error types for the scheduler module

use std::fmt;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Schedule cannot produce a next run
    InvalidSchedule {
        job: String,
        reason: String,
    },

    /// Daily time string could not be parsed
    InvalidTime {
        value: String,
    },

    /// No tokio runtime available to drive the job
    NoRuntime {
        job: String,
    },

    /// Job run exceeded its configured timeout
    Timeout {
        job: String,
        timeout_ms: u64,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSchedule { job, reason } => {
                write!(f, "Invalid schedule for job '{}': {}", job, reason)
            }
            Self::InvalidTime { value } => {
                write!(f, "Invalid time '{}'. Expected HH:MM", value)
            }
            Self::NoRuntime { job } => {
                write!(f, "Cannot register job '{}' outside a tokio runtime", job)
            }
            Self::Timeout { job, timeout_ms } => {
                write!(f, "Job '{}' timed out after {}ms", job, timeout_ms)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

impl SchedulerError {
    /// Create an invalid schedule error
    pub fn invalid_schedule(job: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSchedule {
            job: job.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid time error
    pub fn invalid_time(value: impl Into<String>) -> Self {
        Self::InvalidTime {
            value: value.into(),
        }
    }

    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::NoRuntime { .. })
    }
}
