//! Replica-safe queue draining job

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

use super::envelope::HostingRecord;
use super::sinks::{AnalyticsRow, AnalyticsStore, LogRow, LogStore, UsageDelta, UsageStore};
use super::{QueueConfig, QueueError};
use crate::error::Error;
use crate::metrics;
use crate::scheduler::{Job, JobContext};
use crate::store::SharedStore;

/// Why a run stopped popping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `max_per_run` records were popped
    Ceiling,
    /// The queue reported empty
    Empty,
    /// A record could not be decoded
    DecodeError,
    /// The store failed while popping
    StoreError,
}

/// Result of one sink's insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOutcome {
    /// Nothing to insert, sink not called
    Skipped,
    /// Batch of this many rows inserted
    Stored(usize),
    /// Insert failed; the batch was dropped
    Failed(String),
}

/// Summary of one ingestion run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionReport {
    pub popped: usize,
    pub decoded: usize,
    pub stop: StopReason,
    pub analytics: SinkOutcome,
    pub logs: SinkOutcome,
    pub usage: SinkOutcome,
}

#[derive(Default)]
struct Batches {
    analytics: Vec<AnalyticsRow>,
    logs: Vec<LogRow>,
    usage: HashMap<String, UsageDelta>,
}

impl Batches {
    fn add(&mut self, mut record: HostingRecord) {
        if let Some(sample) = record.analytics.take() {
            self.analytics.push(AnalyticsRow::from_record(&record, sample));
        }

        let lines = std::mem::take(&mut record.logs);
        self.logs
            .extend(lines.into_iter().map(|line| LogRow::from_record(&record, line)));

        if record.has_usage() {
            let delta = self
                .usage
                .entry(record.billing_user_id.clone())
                .or_insert_with(|| UsageDelta {
                    billing_user_id: record.billing_user_id.clone(),
                    bandwidth_bytes: 0,
                    function_invocations: 0,
                    observed_at: Utc::now(),
                });
            // counters come from untrusted envelopes
            delta.bandwidth_bytes = delta.bandwidth_bytes.saturating_add(record.bandwidth_bytes);
            if record.function_invoked {
                delta.function_invocations = delta.function_invocations.saturating_add(1);
            }
        }
    }
}

/// Pops a bounded number of records per run and persists them in one batch per sink
pub struct QueueIngestion {
    store: SharedStore,
    config: QueueConfig,
    analytics: Arc<dyn AnalyticsStore>,
    logs: Arc<dyn LogStore>,
    usage: Arc<dyn UsageStore>,
}

impl QueueIngestion {
    pub fn new(
        store: SharedStore,
        config: QueueConfig,
        analytics: Arc<dyn AnalyticsStore>,
        logs: Arc<dyn LogStore>,
        usage: Arc<dyn UsageStore>,
    ) -> Self {
        Self {
            store,
            config,
            analytics,
            logs,
            usage,
        }
    }

    /// Drain up to `max_per_run` records and persist them.
    ///
    /// Decode failures end the run early but keep what was decoded. A store
    /// failure while popping also persists what was decoded, then returns
    /// [`QueueError::Pop`].
    pub async fn run_once(&self) -> Result<IngestionReport, QueueError> {
        let key = &self.config.list_key;
        let mut batches = Batches::default();
        let mut popped = 0;
        let mut decoded = 0;
        let mut stop = StopReason::Ceiling;
        let mut pop_error = None;

        while popped < self.config.max_per_run {
            let raw = match self.store.pop_one(key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    stop = StopReason::Empty;
                    break;
                }
                Err(e) => {
                    stop = StopReason::StoreError;
                    pop_error = Some(e);
                    break;
                }
            };
            popped += 1;

            match HostingRecord::decode(&raw) {
                Ok(record) => {
                    decoded += 1;
                    batches.add(record);
                }
                Err(e) => {
                    metrics::record_queue("decode_error");
                    tracing::warn!(key = %key, position = popped, error = %e, "Dropping undecodable record, ending run");
                    stop = StopReason::DecodeError;
                    break;
                }
            }
        }

        if decoded > 0 {
            metrics::record_queue_n("decoded", decoded as u64);
        }

        let (analytics, logs, usage) = self.persist(batches).await;
        let report = IngestionReport {
            popped,
            decoded,
            stop,
            analytics,
            logs,
            usage,
        };

        if let Some(source) = pop_error {
            tracing::warn!(key = %key, popped, error = %source, "Queue pop failed");
            return Err(QueueError::Pop { popped, source });
        }

        if popped > 0 {
            tracing::debug!(key = %key, popped, decoded, stop = ?stop, "Ingestion run finished");
        }
        Ok(report)
    }

    async fn persist(&self, batches: Batches) -> (SinkOutcome, SinkOutcome, SinkOutcome) {
        let Batches {
            analytics,
            logs,
            usage,
        } = batches;
        let usage: Vec<UsageDelta> = usage.into_values().collect();

        tokio::join!(
            store_batch("analytics", analytics, |rows| self.analytics.insert_analytics(rows)),
            store_batch("logs", logs, |rows| self.logs.insert_logs(rows)),
            store_batch("usage", usage, |rows| self.usage.add_usage(rows)),
        )
    }
}

async fn store_batch<T, F, Fut>(sink: &'static str, rows: Vec<T>, insert: F) -> SinkOutcome
where
    F: FnOnce(Vec<T>) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    if rows.is_empty() {
        return SinkOutcome::Skipped;
    }

    let count = rows.len();
    match insert(rows).await {
        Ok(()) => SinkOutcome::Stored(count),
        Err(e) => {
            metrics::record_queue("sink_failed");
            tracing::error!(sink, count, error = %e, "Sink insert failed, batch dropped");
            SinkOutcome::Failed(e.to_string())
        }
    }
}

#[async_trait]
impl Job for QueueIngestion {
    fn name(&self) -> &str {
        "queue-ingestion"
    }

    async fn run(&self, _ctx: JobContext) -> anyhow::Result<()> {
        self.run_once().await.map_err(Error::from)?;
        Ok(())
    }
}
