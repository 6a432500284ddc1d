//! Concurrent HTTP health checks
//!
//! A [`HealthCheckJob`] runs on the leader only. Each tick it checks one
//! shard of the configured targets through a bounded worker pool
//! ([`fan_out`]) and stores all results with a single call.
//!
//! ```text
//!            targets (shard: id % interval == tick % interval)
//!                 │
//!                 ▼
//!           work channel ──▶ worker 1 ─┐
//!                       ├──▶ worker 2 ─┼──▶ result channel (capacity N) ──▶ save_results
//!                       └──▶ worker W ─┘
//! ```

mod job;
mod pool;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub use job::HealthCheckJob;
pub use pool::{fan_out, FanOutConfig};

// ============================================================================
// Types
// ============================================================================

/// An endpoint to check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingTarget {
    pub id: u64,

    #[serde(default = "default_method")]
    pub method: String,

    pub url: String,

    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl PingTarget {
    /// GET target without extra headers
    pub fn get(id: u64, url: impl Into<String>) -> Self {
        Self {
            id,
            method: default_method(),
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    /// Whether the target belongs to the shard checked on `tick`
    pub fn in_shard(&self, tick: u64, interval: u64) -> bool {
        let interval = interval.max(1);
        self.id % interval == tick % interval
    }
}

/// Outcome of checking one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResult {
    pub target_id: u64,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub attempts: u8,
    pub checked_at: DateTime<Utc>,
}

impl PingResult {
    /// 2xx response
    pub fn is_success(&self) -> bool {
        self.status.is_some_and(is_success_status)
    }
}

pub(crate) fn is_success_status(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Health check settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Number of ticks needed to cover every target once
    pub interval: u64,

    /// Concurrent checks
    pub workers: usize,

    /// Delay before the single retry
    pub retry_delay: Duration,

    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: 5,
            workers: 10,
            retry_delay: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Check failures; recorded in [`PingResult::error`], never raised past the pool
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
    #[error("Invalid HTTP method '{0}'")]
    InvalidMethod(String),

    #[error("Invalid header '{0}'")]
    InvalidHeader(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Request failed: {0}")]
    Request(String),
}

// ============================================================================
// Collaborators
// ============================================================================

/// Performs one HTTP check and returns the status code
#[async_trait]
pub trait HttpCheck: Send + Sync {
    async fn check(&self, target: &PingTarget) -> Result<u16, CheckError>;
}

/// Supplies the full target list
#[async_trait]
pub trait TargetSource: Send + Sync {
    async fn targets(&self) -> anyhow::Result<Vec<PingTarget>>;
}

/// Persists one tick's results
#[async_trait]
pub trait PingResultStore: Send + Sync {
    async fn save_results(&self, results: Vec<PingResult>) -> anyhow::Result<()>;
}

/// Fixed target list
#[derive(Debug, Clone, Default)]
pub struct StaticTargets(pub Vec<PingTarget>);

#[async_trait]
impl TargetSource for StaticTargets {
    async fn targets(&self) -> anyhow::Result<Vec<PingTarget>> {
        Ok(self.0.clone())
    }
}

/// Result store that logs failures and a summary
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingResultStore;

#[async_trait]
impl PingResultStore for LoggingResultStore {
    async fn save_results(&self, results: Vec<PingResult>) -> anyhow::Result<()> {
        let healthy = results.iter().filter(|r| r.is_success()).count();
        for failed in results.iter().filter(|r| !r.is_success()) {
            tracing::warn!(
                target_id = failed.target_id,
                status = ?failed.status,
                error = ?failed.error,
                "Target unhealthy"
            );
        }
        tracing::info!(checked = results.len(), healthy, "Health check results");
        Ok(())
    }
}

// ============================================================================
// HTTP Checker
// ============================================================================

/// [`HttpCheck`] backed by reqwest
#[derive(Debug, Clone)]
pub struct ReqwestChecker {
    client: Client,
}

impl ReqwestChecker {
    /// Create a checker with a per-request timeout
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("replicore/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    fn headers(target: &PingTarget) -> Result<HeaderMap, CheckError> {
        let mut headers = HeaderMap::with_capacity(target.headers.len());
        for (name, value) in &target.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| CheckError::InvalidHeader(name.clone()))?;
            let value =
                HeaderValue::from_str(value).map_err(|_| CheckError::InvalidHeader(name.to_string()))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl HttpCheck for ReqwestChecker {
    async fn check(&self, target: &PingTarget) -> Result<u16, CheckError> {
        let method = Method::from_bytes(target.method.to_uppercase().as_bytes())
            .map_err(|_| CheckError::InvalidMethod(target.method.clone()))?;

        let response = self
            .client
            .request(method, &target.url)
            .headers(Self::headers(target)?)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CheckError::Timeout
                } else {
                    CheckError::Request(e.to_string())
                }
            })?;

        Ok(response.status().as_u16())
    }
}
