//! Configuration management for replicore
//!
//! This module handles loading and validating configuration from a TOML
//! file or `REPLICORE_*` environment variables. Durations are stored as
//! milliseconds and exposed as [`Duration`] through accessors.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::buffer::BufferConfig;
use crate::election::ElectionConfig;
use crate::healthcheck::{HealthCheckConfig, PingTarget};
use crate::queue::QueueConfig;
use crate::store::RedisStoreConfig;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {var}: '{value}'")]
    InvalidEnv { var: String, value: String },

    #[error("{0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub redis: RedisConfig,
    pub election: ElectionSection,
    pub buffer: BufferSection,
    pub queue: QueueSection,
    pub health_check: HealthCheckSection,
    pub status: StatusConfig,
    pub logging: LoggingConfig,
}

/// Redis connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Pool wait/create/recycle timeout
    pub timeout_ms: u64,
}

/// Leader lease
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionSection {
    pub key: String,
    pub ttl_ms: u64,
    pub wait_ms: u64,
    pub connection_backoff_ms: u64,
    pub stop_timeout_ms: u64,
}

/// Producer-side batching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSection {
    pub size: usize,
    pub flush_interval_ms: u64,
    pub push_timeout_ms: u64,
    pub flush_timeout_ms: u64,
    pub close_timeout_ms: u64,
}

/// Shared queue and ingestion job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    pub list_key: String,
    pub max_per_run: usize,
    pub ingest_interval_ms: u64,
}

/// Health check job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckSection {
    /// Ticks needed to cover every target once (shard modulus)
    pub interval: u64,

    /// Concurrent checks per tick
    pub concurrency: usize,

    /// Time between ticks
    pub tick_ms: u64,

    pub retry_delay_ms: u64,
    pub request_timeout_ms: u64,

    /// Statically configured targets
    pub targets: Vec<PingTarget>,
}

/// Status endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub enabled: bool,
    pub bind: String,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: String::from("redis://localhost:6379"),
            pool_size: 10,
            timeout_ms: 2_000,
        }
    }
}

impl Default for ElectionSection {
    fn default() -> Self {
        Self {
            key: String::from("replicore:leader"),
            ttl_ms: 10_000,
            wait_ms: 1_000,
            connection_backoff_ms: 5_000,
            stop_timeout_ms: 5_000,
        }
    }
}

impl Default for BufferSection {
    fn default() -> Self {
        Self {
            size: 1000,
            flush_interval_ms: 1_000,
            push_timeout_ms: 1_000,
            flush_timeout_ms: 10_000,
            close_timeout_ms: 15_000,
        }
    }
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            list_key: String::from("replicore:hosting"),
            max_per_run: 100,
            ingest_interval_ms: 1_000,
        }
    }
}

impl Default for HealthCheckSection {
    fn default() -> Self {
        Self {
            interval: 5,
            concurrency: 10,
            tick_ms: 60_000,
            retry_delay_ms: 2_000,
            request_timeout_ms: 10_000,
            targets: Vec::new(),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: String::from("0.0.0.0:9090"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: FromStr>(var: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnv {
                var: var.to_string(),
                value,
            }),
        Err(_) => Ok(default),
    }
}

fn env_string(var: &str, default: String) -> String {
    std::env::var(var).unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();

        let config = Self {
            redis: RedisConfig {
                url: std::env::var("REPLICORE_REDIS_URL")
                    .or_else(|_| std::env::var("REDIS_URL"))
                    .unwrap_or(d.redis.url),
                pool_size: env_parse("REPLICORE_REDIS_POOL_SIZE", d.redis.pool_size)?,
                timeout_ms: env_parse("REPLICORE_REDIS_TIMEOUT_MS", d.redis.timeout_ms)?,
            },
            election: ElectionSection {
                key: env_string("REPLICORE_LEASE_KEY", d.election.key),
                ttl_ms: env_parse("REPLICORE_LEASE_TTL_MS", d.election.ttl_ms)?,
                wait_ms: env_parse("REPLICORE_LEASE_WAIT_MS", d.election.wait_ms)?,
                connection_backoff_ms: env_parse(
                    "REPLICORE_CONNECTION_BACKOFF_MS",
                    d.election.connection_backoff_ms,
                )?,
                stop_timeout_ms: env_parse("REPLICORE_STOP_TIMEOUT_MS", d.election.stop_timeout_ms)?,
            },
            buffer: BufferSection {
                size: env_parse("REPLICORE_BUFFER_SIZE", d.buffer.size)?,
                flush_interval_ms: env_parse(
                    "REPLICORE_BUFFER_FLUSH_INTERVAL_MS",
                    d.buffer.flush_interval_ms,
                )?,
                push_timeout_ms: env_parse("REPLICORE_BUFFER_PUSH_TIMEOUT_MS", d.buffer.push_timeout_ms)?,
                flush_timeout_ms: env_parse(
                    "REPLICORE_BUFFER_FLUSH_TIMEOUT_MS",
                    d.buffer.flush_timeout_ms,
                )?,
                close_timeout_ms: env_parse(
                    "REPLICORE_BUFFER_CLOSE_TIMEOUT_MS",
                    d.buffer.close_timeout_ms,
                )?,
            },
            queue: QueueSection {
                list_key: env_string("REPLICORE_QUEUE_KEY", d.queue.list_key),
                max_per_run: env_parse("REPLICORE_QUEUE_MAX_PER_RUN", d.queue.max_per_run)?,
                ingest_interval_ms: env_parse(
                    "REPLICORE_QUEUE_INGEST_INTERVAL_MS",
                    d.queue.ingest_interval_ms,
                )?,
            },
            health_check: HealthCheckSection {
                interval: env_parse("REPLICORE_HEALTH_CHECK_INTERVAL", d.health_check.interval)?,
                concurrency: env_parse(
                    "REPLICORE_HEALTH_CHECK_CONCURRENCY",
                    d.health_check.concurrency,
                )?,
                tick_ms: env_parse("REPLICORE_HEALTH_CHECK_TICK_MS", d.health_check.tick_ms)?,
                retry_delay_ms: env_parse(
                    "REPLICORE_HEALTH_CHECK_RETRY_DELAY_MS",
                    d.health_check.retry_delay_ms,
                )?,
                request_timeout_ms: env_parse(
                    "REPLICORE_HEALTH_CHECK_TIMEOUT_MS",
                    d.health_check.request_timeout_ms,
                )?,
                targets: Vec::new(),
            },
            status: StatusConfig {
                enabled: env_parse("REPLICORE_STATUS_ENABLED", d.status.enabled)?,
                bind: env_string("REPLICORE_STATUS_BIND", d.status.bind),
            },
            logging: LoggingConfig {
                level: env_string("REPLICORE_LOG_LEVEL", d.logging.level),
                format: env_string("REPLICORE_LOG_FORMAT", d.logging.format),
            },
        };

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `path` if given, otherwise from the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis.pool_size == 0 || self.redis.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "redis.pool_size and redis.timeout_ms must be greater than 0".into(),
            ));
        }
        self.election_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.buffer_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.election.ttl_ms <= self.election.wait_ms {
            return Err(ConfigError::Invalid(
                "election.ttl_ms must be greater than election.wait_ms".into(),
            ));
        }
        if self.queue.list_key.trim().is_empty() {
            return Err(ConfigError::Invalid("queue.list_key cannot be empty".into()));
        }
        if self.queue.max_per_run == 0 || self.queue.ingest_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "queue.max_per_run and queue.ingest_interval_ms must be greater than 0".into(),
            ));
        }
        if self.health_check.interval == 0
            || self.health_check.concurrency == 0
            || self.health_check.tick_ms == 0
        {
            return Err(ConfigError::Invalid(
                "health_check.interval, concurrency and tick_ms must be greater than 0".into(),
            ));
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(ConfigError::Invalid(format!(
                "logging.format must be 'text' or 'json', got '{}'",
                self.logging.format
            )));
        }
        Ok(())
    }

    /// Redis connection settings
    pub fn redis_config(&self) -> RedisStoreConfig {
        RedisStoreConfig {
            url: self.redis.url.clone(),
            pool_size: self.redis.pool_size,
            timeout: Duration::from_millis(self.redis.timeout_ms),
        }
    }

    /// Lease settings
    pub fn election_config(&self) -> ElectionConfig {
        ElectionConfig {
            key: self.election.key.clone(),
            ttl: Duration::from_millis(self.election.ttl_ms),
            wait: Duration::from_millis(self.election.wait_ms),
            connection_backoff: Duration::from_millis(self.election.connection_backoff_ms),
            stop_timeout: Duration::from_millis(self.election.stop_timeout_ms),
        }
    }

    /// Producer buffer settings
    pub fn buffer_config(&self) -> BufferConfig {
        BufferConfig {
            size: self.buffer.size,
            flush_interval: Duration::from_millis(self.buffer.flush_interval_ms),
            push_timeout: Duration::from_millis(self.buffer.push_timeout_ms),
            flush_timeout: Duration::from_millis(self.buffer.flush_timeout_ms),
            close_timeout: Duration::from_millis(self.buffer.close_timeout_ms),
        }
    }

    /// Queue location and ceiling
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            list_key: self.queue.list_key.clone(),
            max_per_run: self.queue.max_per_run,
        }
    }

    /// Interval of the ingestion job
    #[must_use]
    pub fn ingest_interval(&self) -> Duration {
        Duration::from_millis(self.queue.ingest_interval_ms)
    }

    /// Health check settings
    pub fn health_check_config(&self) -> HealthCheckConfig {
        HealthCheckConfig {
            interval: self.health_check.interval,
            workers: self.health_check.concurrency,
            retry_delay: Duration::from_millis(self.health_check.retry_delay_ms),
            request_timeout: Duration::from_millis(self.health_check.request_timeout_ms),
        }
    }

    /// Interval of the health check job
    #[must_use]
    pub fn health_check_tick(&self) -> Duration {
        Duration::from_millis(self.health_check.tick_ms)
    }
}
