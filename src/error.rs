//! Unified error handling for the replicore crate
//!
//! Each module keeps its own error enum; [`Error`] wraps them so callers that
//! cross module boundaries (the binary, embedding applications) can handle
//! them through one type.
//!
//! # Architecture
//!
//! - [`ReplicoreErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! Lease contention is not an error: `acquire` returning `false` is the
//! normal outcome for every follower.
//!
//! # Usage
//!
//! ```rust,ignore
//! use replicore::error::{Error, ErrorCategory, ReplicoreErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     match err.category() {
//!         ErrorCategory::Connectivity => tracing::warn!(error = %err, "store degraded"),
//!         _ if err.is_recoverable() => tracing::info!(error = %err, "retrying"),
//!         _ => tracing::error!(error = %err, "giving up"),
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::buffer::BufferError;
pub use crate::config::ConfigError;
pub use crate::election::ElectionError;
pub use crate::healthcheck::CheckError;
pub use crate::queue::QueueError;
pub use crate::scheduler::error::SchedulerError;
pub use crate::store::StoreError;

/// Common trait for all replicore error types
pub trait ReplicoreErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Coordination store or remote endpoint unreachable
    Connectivity,
    /// A queued record or response could not be decoded
    Decode,
    /// Downstream storage rejected a batch
    Persistence,
    /// An operation did not finish in time
    Timeout,
    /// Configuration and validation errors
    Config,
    /// Scheduler and lifecycle errors
    Scheduler,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Short label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connectivity => "connectivity",
            Self::Decode => "decode",
            Self::Persistence => "persistence",
            Self::Timeout => "timeout",
            Self::Config => "config",
            Self::Scheduler => "scheduler",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the replicore crate
#[derive(Error, Debug)]
pub enum Error {
    /// Coordination store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Election lifecycle errors
    #[error("Election error: {0}")]
    Election(#[from] ElectionError),

    /// Scheduler and timing errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Batching buffer errors
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// Queue producer and ingestion errors
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Health check errors
    #[error("Health check error: {0}")]
    Check(#[from] CheckError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ReplicoreErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_connection(),
            Self::Election(e) => matches!(e, ElectionError::StopTimeout(_)),
            Self::Scheduler(e) => e.is_recoverable(),
            Self::Buffer(e) => e.is_timeout(),
            Self::Queue(e) => e.is_connectivity(),
            Self::Check(e) => matches!(e, CheckError::Timeout | CheckError::Request(_)),
            Self::Config(_) => false,
            Self::Io(_) => true, // I/O errors are often transient
            Self::Json(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(e) if e.is_connection() => ErrorCategory::Connectivity,
            Self::Store(_) => ErrorCategory::Other,
            Self::Election(ElectionError::StopTimeout(_)) => ErrorCategory::Timeout,
            Self::Election(ElectionError::InvalidConfig(_)) => ErrorCategory::Config,
            Self::Election(_) => ErrorCategory::Scheduler,
            Self::Scheduler(SchedulerError::Timeout { .. }) => ErrorCategory::Timeout,
            Self::Scheduler(_) => ErrorCategory::Scheduler,
            Self::Buffer(BufferError::Timeout { .. }) => ErrorCategory::Timeout,
            Self::Buffer(BufferError::InvalidConfig(_)) => ErrorCategory::Config,
            Self::Buffer(BufferError::Closed) => ErrorCategory::Other,
            Self::Queue(QueueError::Encode(_)) => ErrorCategory::Decode,
            Self::Queue(QueueError::Buffer(BufferError::Timeout { .. })) => ErrorCategory::Timeout,
            Self::Queue(QueueError::Buffer(_)) => ErrorCategory::Other,
            Self::Queue(e) if e.is_connectivity() => ErrorCategory::Connectivity,
            Self::Queue(_) => ErrorCategory::Persistence,
            Self::Check(CheckError::Timeout) => ErrorCategory::Timeout,
            Self::Check(CheckError::Request(_)) => ErrorCategory::Connectivity,
            Self::Check(_) => ErrorCategory::Config,
            Self::Config(_) => ErrorCategory::Config,
            Self::Io(_) => ErrorCategory::Persistence,
            Self::Json(_) => ErrorCategory::Decode,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Category and recoverability of an error that crossed an `anyhow`
/// boundary, such as a failed job run. Anything that is not an [`Error`]
/// counts as [`ErrorCategory::Other`] and not recoverable.
pub fn classify(err: &anyhow::Error) -> (ErrorCategory, bool) {
    match err.downcast_ref::<Error>() {
        Some(e) => (e.category(), e.is_recoverable()),
        None => (ErrorCategory::Other, false),
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: format!("{err:#}"),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
