//! Shared hosting queue: producers and the ingestion job
//!
//! ```text
//! HostingRecorder ─▶ QueueProducer ─▶ BatchingBuffer ─▶ push_batch ─┐
//!                                                                   ▼
//!                                                         store list (FIFO)
//!                                                                   │ pop_one × max_per_run
//!                          ┌──────────── QueueIngestion ◀───────────┘
//!                          ├─▶ AnalyticsStore::insert_analytics (one batch)
//!                          ├─▶ LogStore::insert_logs            (one batch)
//!                          └─▶ UsageStore::add_usage            (one batch)
//! ```
//!
//! The store pops atomically, so every record reaches exactly one replica.
//! Sink failures drop that sink's batch; nothing is retried.

pub mod envelope;
pub mod ingestion;
pub mod producer;
pub mod sinks;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::buffer::BufferError;
use crate::store::StoreError;

pub use envelope::{AnalyticsSample, HostingRecord, LogLine};
pub use ingestion::{IngestionReport, QueueIngestion, SinkOutcome, StopReason};
pub use producer::{HostingEvent, HostingRecorder, QueueFlusher, QueueProducer};
pub use sinks::{
    AnalyticsRow, AnalyticsStore, LogRow, LogStore, TracingSink, UsageDelta, UsageStore,
};

/// Queue location and per-run ceiling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Store list holding encoded records
    pub list_key: String,

    /// Records popped per ingestion run at most
    pub max_per_run: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            list_key: "replicore:hosting".to_string(),
            max_per_run: 100,
        }
    }
}

/// Queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// A record could not be serialized
    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    /// The producer buffer rejected the record
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// The store failed while draining
    #[error("Queue pop failed after {popped} records: {source}")]
    Pop {
        popped: usize,
        #[source]
        source: StoreError,
    },
}

impl QueueError {
    /// Whether the failure points at the store connection
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Pop { source, .. } if source.is_connection())
    }
}
