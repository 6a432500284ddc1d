//! Leader-aware job scheduling
//!
//! Every process runs the same binary, so jobs are split into two sets:
//!
//! - **Replica tasks** are safe to run everywhere at once (queue draining,
//!   cache purging). They are registered once when the election node starts.
//! - **Master tasks** must run on a single process (health-check fan-out).
//!   They are registered when the node is elected and cancelled when it
//!   renounces, with the fencing token of the term in every [`JobContext`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  on_start            ┌───────────────────────────┐
//! │  election    │─────────────────────▶│ Scheduler                 │
//! │  Node        │  on_leader_elected   │  replica: [JobHandle, ..] │
//! │              │─────────────────────▶│  master:  [JobHandle, ..] │
//! │              │  on_leader_renounced │                           │
//! │              │─────────────────────▶│        JobEngine          │
//! └──────────────┘                      └─────────────┬─────────────┘
//!                                                     │ spawn
//!                                          ┌──────────▼──────────┐
//!                                          │ JobDriver per job   │
//!                                          │ (Every / DailyAt)   │
//!                                          └─────────────────────┘
//! ```
//!
//! A handover is at-least-once: the old leader's master jobs may still be
//! mid-run when the new leader starts its own. Master jobs must be
//! idempotent or check their fencing token.
//!
//! # Quick Start
//!
//! ```ignore
//! use replicore::scheduler::{job_fn, Schedule, Scheduler, TaskDefinition};
//!
//! let scheduler = Arc::new(
//!     Scheduler::builder()
//!         .replica(TaskDefinition::new(ingest, Schedule::Every(Duration::from_secs(60))))
//!         .master(TaskDefinition::new(ping, Schedule::Every(Duration::from_secs(60))))
//!         .build(),
//! );
//!
//! let node = scheduler.attach(NodeBuilder::new(store, config)).build()?;
//! node.start().await?;
//! ```
//!
//! # Job Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `run_immediately` | false | Run once on registration |
//! | `timeout` | none | Abandon runs that take longer |
//! | `error_backoff` | none | Extra delay after failures, doubled up to 8x |

pub mod engine;
pub mod error;
pub mod job;
mod leader;

pub use engine::{JobEngine, JobHandle};
pub use error::{SchedulerError, SchedulerResult};
pub use job::{job_fn, Job, JobContext, JobOptions, Schedule, TaskDefinition};
pub use leader::{RegisteredJobs, Scheduler, SchedulerBuilder};
