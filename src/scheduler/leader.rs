//! Leader-aware scheduler
//!
//! Holds two fixed tables of task definitions and switches the master table
//! on and off as leadership changes. All three operations take the same
//! lock: they are called from election callbacks that can race with each
//! other and with job dispatch.

use std::sync::{Arc, Mutex, MutexGuard};

use super::engine::{JobEngine, JobHandle};
use super::job::TaskDefinition;
use crate::election::NodeBuilder;
use crate::metrics;

#[derive(Default)]
struct ActiveJobs {
    replica: Vec<JobHandle>,
    master: Vec<JobHandle>,
}

/// Number of jobs currently registered in each set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisteredJobs {
    pub replica: usize,
    pub master: usize,
}

/// Builder collecting replica-safe and master-only tasks
#[derive(Default)]
pub struct SchedulerBuilder {
    replica: Vec<TaskDefinition>,
    master: Vec<TaskDefinition>,
}

impl SchedulerBuilder {
    /// Add a task that runs on every process
    pub fn replica(mut self, task: TaskDefinition) -> Self {
        self.replica.push(task);
        self
    }

    /// Add a task that runs only on the elected leader
    pub fn master(mut self, task: TaskDefinition) -> Self {
        self.master.push(task);
        self
    }

    /// Build the scheduler
    pub fn build(self) -> Scheduler {
        Scheduler {
            engine: JobEngine::new(),
            replica_tasks: self.replica,
            master_tasks: self.master,
            active: Mutex::new(ActiveJobs::default()),
        }
    }
}

/// Registry that keeps replica jobs always on and master jobs on only while leading
pub struct Scheduler {
    engine: JobEngine,
    replica_tasks: Vec<TaskDefinition>,
    master_tasks: Vec<TaskDefinition>,
    active: Mutex<ActiveJobs>,
}

impl Scheduler {
    /// Start building a scheduler
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::default()
    }

    fn active(&self) -> MutexGuard<'_, ActiveJobs> {
        // a panic while holding the lock cannot leave the tables inconsistent
        self.active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn register_all(&self, tasks: &[TaskDefinition], fencing_token: Option<u64>) -> Vec<JobHandle> {
        tasks
            .iter()
            .filter_map(|task| match self.engine.register(task, fencing_token) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::error!(job = %task.name(), error = %e, "Failed to register job, skipping");
                    None
                }
            })
            .collect()
    }

    /// Register every replica-safe task. Only the first call has an effect.
    pub fn register_replica_tasks(&self) -> usize {
        let mut active = self.active();
        if !active.replica.is_empty() {
            tracing::warn!("Replica tasks already registered");
            return active.replica.len();
        }

        active.replica = self.register_all(&self.replica_tasks, None);
        metrics::set_registered_jobs("replica", active.replica.len());
        tracing::info!(
            registered = active.replica.len(),
            defined = self.replica_tasks.len(),
            "Replica tasks registered"
        );
        active.replica.len()
    }

    /// Register every master-only task for a new leadership term.
    ///
    /// Jobs left over from a previous term are cancelled first.
    pub fn register_master_tasks(&self, fencing_token: Option<u64>) -> usize {
        let mut active = self.active();
        if !active.master.is_empty() {
            tracing::warn!(
                stale = active.master.len(),
                "Master tasks still registered, replacing"
            );
            for handle in active.master.drain(..) {
                handle.cancel();
            }
        }

        active.master = self.register_all(&self.master_tasks, fencing_token);
        metrics::set_registered_jobs("master", active.master.len());
        tracing::info!(
            registered = active.master.len(),
            defined = self.master_tasks.len(),
            fencing_token = ?fencing_token,
            "Master tasks registered"
        );
        active.master.len()
    }

    /// Cancel every master job and clear the table
    pub fn stop_master_tasks(&self) -> usize {
        let mut active = self.active();
        let stopped = active.master.len();
        for handle in active.master.drain(..) {
            handle.cancel();
        }
        metrics::set_registered_jobs("master", 0);
        tracing::info!(stopped, "Master tasks stopped");
        stopped
    }

    /// Cancel everything, replica jobs included (process shutdown)
    pub fn stop_all(&self) {
        let mut guard = self.active();
        let active = &mut *guard;
        for handle in active.master.drain(..).chain(active.replica.drain(..)) {
            handle.cancel();
        }
        metrics::set_registered_jobs("master", 0);
        metrics::set_registered_jobs("replica", 0);
    }

    /// Current registration counts
    pub fn registered(&self) -> RegisteredJobs {
        let active = self.active();
        RegisteredJobs {
            replica: active.replica.len(),
            master: active.master.len(),
        }
    }

    /// Names of the currently registered master jobs
    pub fn master_job_names(&self) -> Vec<String> {
        self.active()
            .master
            .iter()
            .map(|h| h.name().to_string())
            .collect()
    }

    /// Wire the election callbacks of `builder` to this scheduler:
    /// start registers replica tasks, election registers master tasks,
    /// renouncement stops them.
    pub fn attach(self: &Arc<Self>, builder: NodeBuilder) -> NodeBuilder {
        let on_start = Arc::clone(self);
        let on_elected = Arc::clone(self);
        let on_renounced = Arc::clone(self);

        builder
            .on_start(move || {
                on_start.register_replica_tasks();
            })
            .on_leader_elected(move |term| {
                on_elected.register_master_tasks(term.generation);
            })
            .on_leader_renounced(move || {
                on_renounced.stop_master_tasks();
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::{job_fn, Schedule};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    fn counting(name: &str, counter: &Arc<AtomicU64>) -> TaskDefinition {
        let counter = Arc::clone(counter);
        TaskDefinition::new(
            job_fn(name, move |_ctx| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
            Schedule::Every(Duration::from_secs(1)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_master_set_switches_with_leadership() {
        let replica_runs = Arc::new(AtomicU64::new(0));
        let master_runs = Arc::new(AtomicU64::new(0));
        let scheduler = Scheduler::builder()
            .replica(counting("ingest", &replica_runs))
            .master(counting("ping", &master_runs))
            .build();

        assert_eq!(scheduler.register_replica_tasks(), 1);
        assert_eq!(scheduler.register_master_tasks(Some(1)), 1);
        assert_eq!(scheduler.master_job_names(), vec!["ping".to_string()]);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(master_runs.load(Ordering::SeqCst), 2);

        assert_eq!(scheduler.stop_master_tasks(), 1);
        assert_eq!(
            scheduler.registered(),
            RegisteredJobs {
                replica: 1,
                master: 0
            }
        );

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(master_runs.load(Ordering::SeqCst), 2);
        assert_eq!(replica_runs.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_replica_registration_is_idempotent() {
        let runs = Arc::new(AtomicU64::new(0));
        let scheduler = Scheduler::builder().replica(counting("a", &runs)).build();

        scheduler.register_replica_tasks();
        scheduler.register_replica_tasks();
        assert_eq!(scheduler.registered().replica, 1);
        scheduler.stop_all();
    }

    #[tokio::test]
    async fn test_reelection_replaces_master_jobs() {
        let runs = Arc::new(AtomicU64::new(0));
        let scheduler = Scheduler::builder().master(counting("m", &runs)).build();

        scheduler.register_master_tasks(Some(1));
        scheduler.register_master_tasks(Some(2));
        assert_eq!(scheduler.registered().master, 1);
    }

    #[tokio::test]
    async fn test_invalid_job_is_omitted() {
        let runs = Arc::new(AtomicU64::new(0));
        let bad = TaskDefinition::new(
            job_fn("bad", |_ctx| async { Ok(()) }),
            Schedule::Every(Duration::ZERO),
        );
        let scheduler = Scheduler::builder()
            .replica(bad)
            .replica(counting("good", &runs))
            .build();

        assert_eq!(scheduler.register_replica_tasks(), 1);
    }

    #[test]
    fn test_stop_master_tasks_when_empty() {
        let scheduler = Scheduler::builder().build();
        assert_eq!(scheduler.stop_master_tasks(), 0);
    }
}
