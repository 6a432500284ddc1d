//! Persistence interfaces fed by queue ingestion
//!
//! Each sink receives one pre-built batch per ingestion run. The storage
//! behind them lives outside this crate; [`TracingSink`] stands in when no
//! store is configured.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::envelope::{AnalyticsSample, HostingRecord, LogLine};

/// An analytics sample with its routing identifiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsRow {
    pub app_id: String,
    pub env_id: String,
    pub deployment_id: String,
    pub host: String,
    pub sample: AnalyticsSample,
}

/// A log line with its routing identifiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRow {
    pub app_id: String,
    pub env_id: String,
    pub deployment_id: String,
    pub line: LogLine,
}

/// Usage accumulated for one billing user during one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageDelta {
    pub billing_user_id: String,
    pub bandwidth_bytes: u64,
    pub function_invocations: u64,
    pub observed_at: DateTime<Utc>,
}

impl AnalyticsRow {
    pub(crate) fn from_record(record: &HostingRecord, sample: AnalyticsSample) -> Self {
        Self {
            app_id: record.app_id.clone(),
            env_id: record.env_id.clone(),
            deployment_id: record.deployment_id.clone(),
            host: record.host.clone(),
            sample,
        }
    }
}

impl LogRow {
    pub(crate) fn from_record(record: &HostingRecord, line: LogLine) -> Self {
        Self {
            app_id: record.app_id.clone(),
            env_id: record.env_id.clone(),
            deployment_id: record.deployment_id.clone(),
            line,
        }
    }
}

/// Analytics storage
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn insert_analytics(&self, rows: Vec<AnalyticsRow>) -> anyhow::Result<()>;
}

/// Application log storage
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn insert_logs(&self, rows: Vec<LogRow>) -> anyhow::Result<()>;
}

/// Per-user usage counters
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn add_usage(&self, deltas: Vec<UsageDelta>) -> anyhow::Result<()>;
}

/// Sink that only logs batch summaries
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl AnalyticsStore for TracingSink {
    async fn insert_analytics(&self, rows: Vec<AnalyticsRow>) -> anyhow::Result<()> {
        tracing::info!(count = rows.len(), "Analytics batch");
        Ok(())
    }
}

#[async_trait]
impl LogStore for TracingSink {
    async fn insert_logs(&self, rows: Vec<LogRow>) -> anyhow::Result<()> {
        tracing::info!(count = rows.len(), "Log batch");
        Ok(())
    }
}

#[async_trait]
impl UsageStore for TracingSink {
    async fn add_usage(&self, deltas: Vec<UsageDelta>) -> anyhow::Result<()> {
        let bandwidth: u64 = deltas.iter().map(|d| d.bandwidth_bytes).sum();
        tracing::info!(users = deltas.len(), bandwidth, "Usage batch");
        Ok(())
    }
}
