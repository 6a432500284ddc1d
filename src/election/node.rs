use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::{ElectionConfig, ElectionError, LeaderTerm};
use crate::metrics;
use crate::store::{SharedStore, StoreError};

type Hook = Arc<dyn Fn() + Send + Sync>;
type ElectedHook = Arc<dyn Fn(LeaderTerm) + Send + Sync>;

#[derive(Default)]
struct Hooks {
    on_start: Option<Hook>,
    on_leader_elected: Option<ElectedHook>,
    on_leader_renounced: Option<Hook>,
}

impl Hooks {
    fn started(&self) {
        if let Some(hook) = &self.on_start {
            hook();
        }
    }

    fn elected(&self, term: LeaderTerm) {
        if let Some(hook) = &self.on_leader_elected {
            hook(term);
        }
    }

    fn renounced(&self) {
        if let Some(hook) = &self.on_leader_renounced {
            hook();
        }
    }
}

/// Builder for [`Node`]; callbacks can only be supplied here
pub struct NodeBuilder {
    store: SharedStore,
    config: ElectionConfig,
    id: Option<String>,
    hooks: Hooks,
}

impl NodeBuilder {
    /// Start building a node contending through `store`
    pub fn new(store: SharedStore, config: ElectionConfig) -> Self {
        Self {
            store,
            config,
            id: None,
            hooks: Hooks::default(),
        }
    }

    /// Use a fixed identity instead of a random one
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Called once each time the node starts, before contending
    pub fn on_start<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.on_start = Some(Arc::new(hook));
        self
    }

    /// Called after this node acquires the lease
    pub fn on_leader_elected<F>(mut self, hook: F) -> Self
    where
        F: Fn(LeaderTerm) + Send + Sync + 'static,
    {
        self.hooks.on_leader_elected = Some(Arc::new(hook));
        self
    }

    /// Called when this node gives up or loses the lease
    pub fn on_leader_renounced<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.on_leader_renounced = Some(Arc::new(hook));
        self
    }

    /// Validate the config and build the node
    pub fn build(self) -> Result<Node, ElectionError> {
        self.config.validate()?;

        let (shutdown_tx, _) = watch::channel(false);
        let (leadership, _) = watch::channel(None);

        Ok(Node {
            id: self
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            config: self.config,
            store: self.store,
            hooks: Arc::new(self.hooks),
            leadership: Arc::new(leadership),
            shutdown_tx,
            task: Mutex::new(None),
        })
    }
}

/// A process-local contender for the shared lease
pub struct Node {
    id: String,
    config: ElectionConfig,
    store: SharedStore,
    hooks: Arc<Hooks>,
    leadership: Arc<watch::Sender<Option<LeaderTerm>>>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    /// Identity written as the lease value
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Election settings
    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    /// Whether this node currently believes it holds the lease
    pub fn is_leader(&self) -> bool {
        self.leadership.borrow().is_some()
    }

    /// The current term while leader
    pub fn current_term(&self) -> Option<LeaderTerm> {
        self.leadership.borrow().clone()
    }

    /// Watch leadership transitions
    pub fn subscribe(&self) -> watch::Receiver<Option<LeaderTerm>> {
        self.leadership.subscribe()
    }

    /// Launch the background election loop
    pub async fn start(&self) -> Result<(), ElectionError> {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Err(ElectionError::AlreadyStarted);
        }

        self.shutdown_tx.send_replace(false);
        let election = Election {
            id: self.id.clone(),
            config: self.config.clone(),
            store: Arc::clone(&self.store),
            hooks: Arc::clone(&self.hooks),
            leadership: Arc::clone(&self.leadership),
            shutdown: self.shutdown_tx.subscribe(),
        };

        tracing::info!(node_id = %self.id, key = %self.config.key, "Starting leader election");
        *task = Some(tokio::spawn(election.run()));
        Ok(())
    }

    /// Stop contending, releasing the lease if held.
    ///
    /// Returns once the background task has exited and, if this node was
    /// leader, after `on_leader_renounced` has run. Safe to call on a node
    /// that never started or never led.
    pub async fn stop(&self) -> Result<(), ElectionError> {
        let Some(mut handle) = self.task.lock().await.take() else {
            return Ok(());
        };

        self.shutdown_tx.send_replace(true);

        match tokio::time::timeout(self.config.stop_timeout, &mut handle).await {
            Ok(Ok(())) => {
                tracing::info!(node_id = %self.id, "Leader election stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(ElectionError::TaskFailed(e.to_string())),
            Err(_) => {
                handle.abort();
                tracing::error!(
                    node_id = %self.id,
                    timeout_ms = self.config.stop_timeout.as_millis() as u64,
                    "Leader election did not stop in time, aborted"
                );
                // the task renounces right after clearing leadership, so a
                // term still set here has not been renounced yet
                if self.leadership.send_replace(None).is_some() {
                    metrics::set_leader(false);
                    self.hooks.renounced();
                }
                Err(ElectionError::StopTimeout(self.config.stop_timeout))
            }
        }
    }
}

enum HoldOutcome {
    Shutdown,
    Lost,
}

/// State owned by the background task
struct Election {
    id: String,
    config: ElectionConfig,
    store: SharedStore,
    hooks: Arc<Hooks>,
    leadership: Arc<watch::Sender<Option<LeaderTerm>>>,
    shutdown: watch::Receiver<bool>,
}

impl Election {
    async fn run(mut self) {
        self.hooks.started();

        loop {
            let Some(term) = self.contend().await else {
                break;
            };

            self.leadership.send_replace(Some(term.clone()));
            metrics::set_leader(true);
            metrics::record_election();
            tracing::info!(
                node_id = %self.id,
                key = %self.config.key,
                generation = ?term.generation,
                "Elected leader"
            );
            self.hooks.elected(term);

            match self.hold().await {
                HoldOutcome::Shutdown => {
                    self.renounce().await;
                    break;
                }
                HoldOutcome::Lost => {
                    self.leadership.send_replace(None);
                    metrics::set_leader(false);
                    metrics::record_lease_lost();
                    self.hooks.renounced();
                    if self.sleep_or_shutdown(self.config.wait).await {
                        break;
                    }
                }
            }
        }
    }

    /// Attempt acquisition until it succeeds or shutdown is requested
    async fn contend(&mut self) -> Option<LeaderTerm> {
        loop {
            if *self.shutdown.borrow() {
                return None;
            }

            let backoff = match self
                .store
                .acquire(&self.config.key, &self.id, self.config.ttl)
                .await
            {
                Ok(true) => return Some(self.open_term().await),
                Ok(false) => {
                    tracing::debug!(node_id = %self.id, "Lease held by another node");
                    self.config.wait
                }
                Err(e) if e.is_connection() => {
                    tracing::warn!(
                        node_id = %self.id,
                        error = %e,
                        backoff_ms = self.config.connection_backoff.as_millis() as u64,
                        "Coordination store unreachable during election"
                    );
                    self.config.connection_backoff
                }
                Err(e) => {
                    tracing::warn!(node_id = %self.id, error = %e, "Lease acquisition failed");
                    self.config.wait
                }
            };

            if self.sleep_or_shutdown(backoff).await {
                return None;
            }
        }
    }

    async fn open_term(&self) -> LeaderTerm {
        let generation = match self.store.next_generation(&self.config.key).await {
            Ok(generation) => Some(generation),
            Err(e) => {
                tracing::warn!(node_id = %self.id, error = %e, "Failed to advance lease generation");
                None
            }
        };

        LeaderTerm {
            node_id: self.id.clone(),
            generation,
        }
    }

    /// Renew the lease every `ttl / 2` until shutdown or loss
    async fn hold(&mut self) -> HoldOutcome {
        let period = self.config.renew_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_refresh = Instant::now();

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => return HoldOutcome::Shutdown,
                _ = ticker.tick() => {}
            }

            let renewed = match tokio::time::timeout(period, self.renew()).await {
                Ok(renewed) => renewed,
                Err(_) => Err(StoreError::Connection(format!(
                    "lease renewal did not answer within {}ms",
                    period.as_millis()
                ))),
            };

            match renewed {
                Ok(true) => last_refresh = Instant::now(),
                Ok(false) => {
                    tracing::warn!(node_id = %self.id, key = %self.config.key, "Lease lost, stepping down");
                    return HoldOutcome::Lost;
                }
                Err(e) => {
                    tracing::warn!(node_id = %self.id, error = %e, "Lease renewal failed");
                }
            }

            // the lease has expired server side by now
            if last_refresh.elapsed() >= self.config.ttl {
                tracing::warn!(
                    node_id = %self.id,
                    key = %self.config.key,
                    "No successful renewal for a whole lease period, stepping down"
                );
                return HoldOutcome::Lost;
            }
        }
    }

    /// Extend the lease if it is still ours. Not atomic: see module docs.
    async fn renew(&self) -> crate::store::StoreResult<bool> {
        match self.store.get(&self.config.key).await? {
            Some(holder) if holder == self.id => {
                self.store.refresh(&self.config.key, self.config.ttl).await
            }
            _ => Ok(false),
        }
    }

    async fn renounce(&self) {
        match self.store.release(&self.config.key, &self.id).await {
            Ok(true) => tracing::info!(node_id = %self.id, "Lease released"),
            Ok(false) => tracing::debug!(node_id = %self.id, "Lease already gone at release"),
            Err(e) => tracing::warn!(node_id = %self.id, error = %e, "Failed to release lease"),
        }
        self.leadership.send_replace(None);
        metrics::set_leader(false);
        self.hooks.renounced();
    }

    /// Sleep for `duration`; returns true if shutdown was requested meanwhile
    async fn sleep_or_shutdown(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => *self.shutdown.borrow(),
            _ = self.shutdown.changed() => true,
        }
    }
}
