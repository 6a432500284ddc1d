//! Redis-lease leader election
//!
//! Each process creates one [`Node`]. All nodes sharing a lease key contend
//! for it through the store's atomic set-if-absent primitive; the winner
//! renews the lease every `ttl / 2` until it stops or discovers that the
//! lease is no longer its own.
//!
//! # Lifecycle
//!
//! ```text
//!   start() ──▶ on_start ──▶ contend ──(acquired)──▶ on_leader_elected ──▶ hold
//!                              ▲  │                                         │
//!          (held elsewhere:    │  │ (store down:                            │
//!           sleep wait)  ──────┘  │  sleep connection_backoff)              │
//!                              ▲  ▼                                         │
//!                              └──────── sleep wait ◀── on_leader_renounced ◀┘ (lease lost)
//!
//!   stop() ──▶ release lease (if held) ──▶ on_leader_renounced ──▶ task exits
//! ```
//!
//! # Renewal race
//!
//! Renewal reads the lease and then extends it with a separate command. The
//! lease can expire between the two; the next tick then sees a foreign or
//! missing value and steps down. Exclusivity never depends on this check:
//! a second node can only lead after winning `acquire`.
//!
//! # Example
//!
//! ```rust,ignore
//! use replicore::election::{ElectionConfig, NodeBuilder};
//!
//! let node = NodeBuilder::new(store, ElectionConfig::default())
//!     .on_leader_elected(|term| tracing::info!(generation = ?term.generation, "leading"))
//!     .on_leader_renounced(|| tracing::info!("following"))
//!     .build()?;
//! node.start().await?;
//! // ...
//! node.stop().await?;
//! ```

mod node;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use node::{Node, NodeBuilder};

/// Timing and naming of the lease contended by a [`Node`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Lease key shared by every competing process
    pub key: String,

    /// Lease duration
    pub ttl: Duration,

    /// Backoff between acquisition attempts while another node holds the lease
    pub wait: Duration,

    /// Backoff after the store could not be reached
    pub connection_backoff: Duration,

    /// Upper bound on how long [`Node::stop`] may take
    pub stop_timeout: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            key: "replicore:leader".to_string(),
            ttl: Duration::from_secs(10),
            wait: Duration::from_secs(1),
            connection_backoff: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

impl ElectionConfig {
    /// Interval between renewals
    pub fn renew_interval(&self) -> Duration {
        self.ttl / 2
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ElectionError> {
        if self.key.trim().is_empty() {
            return Err(ElectionError::InvalidConfig("lease key cannot be empty".into()));
        }
        if self.ttl < Duration::from_millis(2) {
            return Err(ElectionError::InvalidConfig(
                "lease ttl must be at least 2ms".into(),
            ));
        }
        if self.wait.is_zero() || self.connection_backoff.is_zero() {
            return Err(ElectionError::InvalidConfig(
                "wait and connection_backoff must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// One tenure of leadership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderTerm {
    /// Id of the node holding the lease
    pub node_id: String,

    /// Fencing token: strictly increases with every successful acquisition.
    /// `None` if the counter could not be incremented.
    pub generation: Option<u64>,
}

/// Errors surfaced by the node lifecycle API
///
/// Election and renewal failures never appear here; they are retried
/// internally and only visible through logs and callbacks.
#[derive(Error, Debug)]
pub enum ElectionError {
    /// `start` was called on a running node
    #[error("Node is already running")]
    AlreadyStarted,

    /// Teardown did not finish within `stop_timeout`
    #[error("Node did not stop within {0:?}")]
    StopTimeout(Duration),

    /// The background task panicked
    #[error("Election task failed: {0}")]
    TaskFailed(String),

    /// Invalid election settings
    #[error("Invalid election config: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ElectionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.renew_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_empty_key_rejected() {
        let config = ElectionConfig {
            key: "  ".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ElectionError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_wait_rejected() {
        let config = ElectionConfig {
            wait: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
