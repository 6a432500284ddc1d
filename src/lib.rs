//! replicore - leader election and leader-aware job scheduling over Redis
//!
//! Lets many identical processes cooperate without a dedicated coordination
//! service: one Redis lease elects a leader, jobs are split between those
//! safe to run everywhere and those that must run on the leader only, and
//! bursty traffic moves through bounded batching buffers and a shared queue.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`store`] - Coordination store vocabulary (Redis and in-memory)
//! - [`election`] - Lease-based leader election node
//! - [`scheduler`] - Replica and master job sets driven by election callbacks
//! - [`buffer`] - Size/time-triggered batching buffer
//! - [`queue`] - Shared queue producer and ingestion job
//! - [`healthcheck`] - Worker-pool HTTP health checks
//! - [`cache`] - Host routing cache
//! - [`config`] - Configuration management and settings
//! - [`metrics`] - Prometheus metrics
//! - [`status`] - HTTP status endpoint
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use replicore::election::{ElectionConfig, NodeBuilder};
//! use replicore::scheduler::{job_fn, Schedule, Scheduler, TaskDefinition};
//! use replicore::store::{RedisStore, RedisStoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(RedisStore::connect(&RedisStoreConfig::default()).await?);
//!     let report = job_fn("report", |_ctx| async { Ok(()) });
//!     let scheduler = Arc::new(
//!         Scheduler::builder()
//!             .master(TaskDefinition::new(report, Schedule::Every(Duration::from_secs(60))))
//!             .build(),
//!     );
//!
//!     let node = scheduler
//!         .attach(NodeBuilder::new(store, ElectionConfig::default()))
//!         .build()?;
//!     node.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     node.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod cache;
pub mod config;
pub mod election;
pub mod error;
pub mod healthcheck;
pub mod metrics;
pub mod queue;
pub mod scheduler;
pub mod status;
pub mod store;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::buffer::{BatchingBuffer, BufferConfig, BufferError, Flusher};
    pub use crate::config::Config;
    pub use crate::election::{ElectionConfig, LeaderTerm, Node, NodeBuilder};
    pub use crate::error::{Error, ErrorCategory, ReplicoreErrorTrait, Result};
    pub use crate::scheduler::{job_fn, Job, JobContext, Schedule, Scheduler, TaskDefinition};
    pub use crate::store::{CoordinationStore, MemoryStore, RedisStore, SharedStore, StoreError};
}
