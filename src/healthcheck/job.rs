use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::pool::{fan_out, FanOutConfig};
use super::{HealthCheckConfig, HttpCheck, PingResult, PingResultStore, TargetSource};
use crate::metrics;
use crate::scheduler::{Job, JobContext};

/// Master-only job checking one shard of targets per tick
pub struct HealthCheckJob {
    source: Arc<dyn TargetSource>,
    checker: Arc<dyn HttpCheck>,
    results: Arc<dyn PingResultStore>,
    config: HealthCheckConfig,
    tick: AtomicU64,
}

impl HealthCheckJob {
    pub fn new(
        source: Arc<dyn TargetSource>,
        checker: Arc<dyn HttpCheck>,
        results: Arc<dyn PingResultStore>,
        config: HealthCheckConfig,
    ) -> Self {
        Self {
            source,
            checker,
            results,
            config,
            tick: AtomicU64::new(0),
        }
    }

    /// Check the shard for the next tick and store the results.
    ///
    /// Returns the results that were handed to the store.
    pub async fn run_tick(&self) -> anyhow::Result<Vec<PingResult>> {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        let interval = self.config.interval;

        let shard: Vec<_> = self
            .source
            .targets()
            .await?
            .into_iter()
            .filter(|t| t.in_shard(tick, interval))
            .collect();
        if shard.is_empty() {
            tracing::debug!(tick, "No targets in shard");
            return Ok(Vec::new());
        }

        let results = fan_out(
            Arc::clone(&self.checker),
            shard,
            FanOutConfig {
                workers: self.config.workers,
                retry_delay: self.config.retry_delay,
            },
        )
        .await;

        let healthy = results.iter().filter(|r| r.is_success()).count();
        metrics::record_checks("healthy", healthy as u64);
        metrics::record_checks("unhealthy", (results.len() - healthy) as u64);
        tracing::debug!(tick, checked = results.len(), healthy, "Health check tick");

        self.results.save_results(results.clone()).await?;
        Ok(results)
    }
}

#[async_trait]
impl Job for HealthCheckJob {
    fn name(&self) -> &str {
        "health-check"
    }

    async fn run(&self, ctx: JobContext) -> anyhow::Result<()> {
        tracing::trace!(run = ctx.run, fencing_token = ?ctx.fencing_token, "Health check run");
        self.run_tick().await?;
        Ok(())
    }
}
