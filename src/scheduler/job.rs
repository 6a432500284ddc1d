//! Job definitions: what runs, when, and with which options

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::error::{SchedulerError, SchedulerResult};

// ============================================================================
// Job Trait
// ============================================================================

/// A recurring unit of work
///
/// Jobs registered in the master set may run twice around a leadership
/// handover and must therefore be idempotent.
#[async_trait]
pub trait Job: Send + Sync {
    /// Stable name used in logs and metrics
    fn name(&self) -> &str;

    /// Execute one run
    async fn run(&self, ctx: JobContext) -> anyhow::Result<()>;
}

struct FnJob<F> {
    name: String,
    func: F,
}

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: JobContext) -> anyhow::Result<()> {
        (self.func)(ctx).await
    }
}

/// Wrap an async closure as a [`Job`]
pub fn job_fn<F, Fut>(name: impl Into<String>, func: F) -> Arc<dyn Job>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnJob {
        name: name.into(),
        func,
    })
}

// ============================================================================
// Job Context
// ============================================================================

/// Per-run context handed to a job
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Sequence number of this run, starting at 1
    pub run: u64,

    /// Fencing token of the leadership term (master jobs only)
    pub fencing_token: Option<u64>,

    /// When the run started
    pub started_at: DateTime<Utc>,

    cancel: watch::Receiver<bool>,
}

impl JobContext {
    pub(crate) fn new(run: u64, fencing_token: Option<u64>, cancel: watch::Receiver<bool>) -> Self {
        Self {
            run,
            fencing_token,
            started_at: Utc::now(),
            cancel,
        }
    }

    /// Context for invoking a job directly, outside the engine
    pub fn detached() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self::new(1, None, rx)
    }

    /// Whether the job has been unregistered
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once the job is unregistered
    pub async fn cancelled(&mut self) {
        while !*self.cancel.borrow() {
            if self.cancel.changed().await.is_err() {
                return;
            }
        }
    }
}

// ============================================================================
// Schedule
// ============================================================================

/// When a job runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed interval between run starts
    Every(Duration),
    /// Once a day at the given UTC wall-clock time
    DailyAt(NaiveTime),
}

impl Schedule {
    /// Parse a daily schedule from `HH:MM`
    pub fn daily(time: &str) -> SchedulerResult<Self> {
        NaiveTime::parse_from_str(time, "%H:%M")
            .map(Self::DailyAt)
            .map_err(|_| SchedulerError::invalid_time(time))
    }

    /// Validate the schedule
    pub fn validate(&self, job: &str) -> SchedulerResult<()> {
        match self {
            Self::Every(period) if period.is_zero() => Err(SchedulerError::invalid_schedule(
                job,
                "interval must be greater than 0",
            )),
            _ => Ok(()),
        }
    }

    /// Time until the next daily run after `now`
    pub fn until_daily(time: NaiveTime, now: DateTime<Utc>) -> Duration {
        let today = now.date_naive().and_time(time).and_utc();
        let target = if today > now {
            today
        } else {
            today + ChronoDuration::days(1)
        };
        (target - now).to_std().unwrap_or_default()
    }
}

// ============================================================================
// Options and Definitions
// ============================================================================

/// Per-job execution options
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Run once as soon as the job is registered
    pub run_immediately: bool,

    /// Abandon a run that takes longer than this
    pub timeout: Option<Duration>,

    /// Extra delay after a failed run, doubled per consecutive failure (capped at 8x)
    pub error_backoff: Option<Duration>,
}

impl JobOptions {
    /// Run once on registration
    pub fn immediately() -> Self {
        Self {
            run_immediately: true,
            ..Default::default()
        }
    }

    /// Set the run timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the failure backoff
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = Some(backoff);
        self
    }

    /// Backoff applied after `failures` consecutive failures
    pub fn backoff_for(&self, failures: u32) -> Duration {
        match (self.error_backoff, failures) {
            (None, _) | (_, 0) => Duration::ZERO,
            (Some(base), n) => base * 2u32.pow((n - 1).min(3)),
        }
    }
}

/// A job together with its schedule and options
#[derive(Clone)]
pub struct TaskDefinition {
    pub job: Arc<dyn Job>,
    pub schedule: Schedule,
    pub options: JobOptions,
}

impl TaskDefinition {
    /// Define a job with default options
    pub fn new(job: Arc<dyn Job>, schedule: Schedule) -> Self {
        Self {
            job,
            schedule,
            options: JobOptions::default(),
        }
    }

    /// Replace the options
    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    /// Name of the wrapped job
    pub fn name(&self) -> &str {
        self.job.name()
    }
}

impl std::fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("job", &self.job.name())
            .field("schedule", &self.schedule)
            .field("options", &self.options)
            .finish()
    }
}
