//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use replicore::cache::HostRoute;
use replicore::election::{ElectionConfig, Node, NodeBuilder};
use replicore::queue::{
    AnalyticsRow, AnalyticsStore, HostingRecord, LogRow, LogStore, UsageDelta, UsageStore,
};
use replicore::store::SharedStore;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Short lease timings for paused-clock tests
pub fn fast_election_config(key: &str) -> ElectionConfig {
    ElectionConfig {
        key: key.to_string(),
        ttl: Duration::from_millis(200),
        wait: Duration::from_millis(20),
        connection_backoff: Duration::from_millis(500),
        stop_timeout: Duration::from_secs(1),
    }
}

/// Callback counters for one node
#[derive(Debug, Default)]
pub struct Hooks {
    pub started: AtomicUsize,
    pub elected: AtomicUsize,
    pub renounced: AtomicUsize,
    pub last_generation: Mutex<Option<u64>>,
}

impl Hooks {
    pub fn elected(&self) -> usize {
        self.elected.load(Ordering::SeqCst)
    }

    pub fn renounced(&self) -> usize {
        self.renounced.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

/// Build a node whose callbacks count into the returned [`Hooks`]
pub fn counted_node(store: SharedStore, config: ElectionConfig, id: &str) -> (Node, Arc<Hooks>) {
    let hooks = Arc::new(Hooks::default());
    let (on_start, on_elected, on_renounced) = (hooks.clone(), hooks.clone(), hooks.clone());

    let node = NodeBuilder::new(store, config)
        .with_id(id)
        .on_start(move || {
            on_start.started.fetch_add(1, Ordering::SeqCst);
        })
        .on_leader_elected(move |term| {
            *on_elected.last_generation.lock().unwrap() = term.generation;
            on_elected.elected.fetch_add(1, Ordering::SeqCst);
        })
        .on_leader_renounced(move || {
            on_renounced.renounced.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();

    (node, hooks)
}

/// Number of nodes that currently believe they lead
pub fn leader_count(nodes: &[Node]) -> usize {
    nodes.iter().filter(|n| n.is_leader()).count()
}

/// Routing used by generated records
pub fn test_route(user: &str) -> HostRoute {
    HostRoute {
        app_id: "app-1".to_string(),
        env_id: "env-1".to_string(),
        deployment_id: "dep-1".to_string(),
        billing_user_id: user.to_string(),
    }
}

/// Record `i` with one log line, bandwidth `i + 1` and an analytics sample
pub fn hosting_record(i: usize) -> HostingRecord {
    let mut record = HostingRecord::new(&test_route(&format!("user-{}", i % 3)), "shop.example.com");
    record.logs.push(replicore::queue::LogLine {
        timestamp: chrono::Utc::now(),
        level: "info".to_string(),
        message: format!("request {i}"),
    });
    record.analytics = Some(replicore::queue::AnalyticsSample {
        timestamp: chrono::Utc::now(),
        path: format!("/item/{i}"),
        status: 200,
        duration_ms: 5,
        country: None,
    });
    record.bandwidth_bytes = (i + 1) as u64;
    record
}

/// Sinks that record every batch; each can be switched to fail
#[derive(Default)]
pub struct RecordingSinks {
    pub analytics: Mutex<Vec<Vec<AnalyticsRow>>>,
    pub logs: Mutex<Vec<Vec<LogRow>>>,
    pub usage: Mutex<Vec<Vec<UsageDelta>>>,
    pub fail_analytics: AtomicBool,
}

impl RecordingSinks {
    /// Total sink invocations
    pub fn calls(&self) -> usize {
        self.analytics.lock().unwrap().len()
            + self.logs.lock().unwrap().len()
            + self.usage.lock().unwrap().len()
    }

    /// Messages of every stored log row, in insertion order
    pub fn log_messages(&self) -> Vec<String> {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .map(|row| row.line.message.clone())
            .collect()
    }
}

#[async_trait]
impl AnalyticsStore for RecordingSinks {
    async fn insert_analytics(&self, rows: Vec<AnalyticsRow>) -> anyhow::Result<()> {
        if self.fail_analytics.load(Ordering::SeqCst) {
            anyhow::bail!("analytics store unavailable");
        }
        self.analytics.lock().unwrap().push(rows);
        Ok(())
    }
}

#[async_trait]
impl LogStore for RecordingSinks {
    async fn insert_logs(&self, rows: Vec<LogRow>) -> anyhow::Result<()> {
        self.logs.lock().unwrap().push(rows);
        Ok(())
    }
}

#[async_trait]
impl UsageStore for RecordingSinks {
    async fn add_usage(&self, deltas: Vec<UsageDelta>) -> anyhow::Result<()> {
        self.usage.lock().unwrap().push(deltas);
        Ok(())
    }
}
