//! Job engine: drives each registered job in its own tokio task

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::error::{SchedulerError, SchedulerResult};
use super::job::{Job, JobContext, JobOptions, Schedule, TaskDefinition};
use crate::error::{self, Error};
use crate::metrics;

/// Registers jobs and hands back cancellable handles
#[derive(Debug, Default)]
pub struct JobEngine;

impl JobEngine {
    /// Create an engine
    pub fn new() -> Self {
        Self
    }

    /// Start driving `definition`.
    ///
    /// Must be called from within a tokio runtime. Master jobs pass the
    /// fencing token of the current leadership term.
    pub fn register(
        &self,
        definition: &TaskDefinition,
        fencing_token: Option<u64>,
    ) -> SchedulerResult<JobHandle> {
        let name = definition.name().to_string();
        definition.schedule.validate(&name)?;

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| SchedulerError::NoRuntime { job: name.clone() })?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let driver = JobDriver {
            job: Arc::clone(&definition.job),
            schedule: definition.schedule,
            options: definition.options.clone(),
            fencing_token,
            cancel: cancel_rx,
        };

        tracing::debug!(job = %name, schedule = ?definition.schedule, "Registering job");

        Ok(JobHandle {
            name,
            cancel: cancel_tx,
            task: runtime.spawn(driver.run()),
        })
    }
}

/// A registered job. Dropping the handle also stops the job.
#[derive(Debug)]
pub struct JobHandle {
    name: String,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl JobHandle {
    /// Name of the job
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop scheduling further runs. A run in progress finishes and can
    /// observe the cancellation through its [`JobContext`].
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Whether the driver task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel and wait for the driver task to exit
    pub async fn shutdown(self) {
        self.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(job = %self.name, error = %e, "Job driver ended abnormally");
        }
    }
}

struct JobDriver {
    job: Arc<dyn Job>,
    schedule: Schedule,
    options: JobOptions,
    fencing_token: Option<u64>,
    cancel: watch::Receiver<bool>,
}

impl JobDriver {
    async fn run(mut self) {
        let mut runs = 0u64;
        let mut failures = 0u32;
        let mut next_every = None;

        if self.options.run_immediately && !*self.cancel.borrow() {
            self.execute(&mut runs, &mut failures).await;
        }

        loop {
            let delay = self.next_delay(&mut next_every) + self.options.backoff_for(failures);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.changed() => break,
            }
            if *self.cancel.borrow() {
                break;
            }

            self.execute(&mut runs, &mut failures).await;
        }

        tracing::debug!(job = %self.job.name(), runs, "Job stopped");
    }

    fn next_delay(&self, next_every: &mut Option<Instant>) -> Duration {
        match self.schedule {
            Schedule::Every(period) => {
                let now = Instant::now();
                let mut next = next_every.unwrap_or(now + period);
                // skip ticks missed while a run overran
                while next < now {
                    next += period;
                }
                *next_every = Some(next + period);
                next - now
            }
            Schedule::DailyAt(time) => Schedule::until_daily(time, Utc::now()),
        }
    }

    async fn execute(&self, runs: &mut u64, failures: &mut u32) {
        *runs += 1;
        let run = *runs;
        let name = self.job.name().to_string();
        let ctx = JobContext::new(run, self.fencing_token, self.cancel.clone());
        let _timer = metrics::start_job_timer(&name);

        let job = Arc::clone(&self.job);
        let mut task = tokio::spawn(async move { job.run(ctx).await });

        let outcome = match self.options.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    Ok(Err(Error::from(SchedulerError::Timeout {
                        job: name.clone(),
                        timeout_ms: limit.as_millis() as u64,
                    })
                    .into()))
                }
            },
            None => task.await,
        };

        match outcome {
            Ok(Ok(())) => {
                *failures = 0;
                metrics::record_job_run(&name, "success");
                tracing::debug!(job = %name, run, "Job run completed");
            }
            Ok(Err(e)) => {
                *failures += 1;
                let (category, recoverable) = error::classify(&e);
                metrics::record_job_run(&name, "failure");
                tracing::warn!(
                    job = %name,
                    run,
                    failures = *failures,
                    category = %category,
                    recoverable,
                    error = %e,
                    "Job run failed"
                );
            }
            Err(e) => {
                *failures += 1;
                metrics::record_job_run(&name, "panic");
                tracing::error!(job = %name, run, error = %e, "Job run panicked");
            }
        }
    }
}
