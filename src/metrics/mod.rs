//! Prometheus metrics for election, scheduling, buffering and ingestion
//!
//! This module provides metrics tracking for:
//! - Election: leadership state, elections won, leases lost
//! - Scheduler: registered jobs per set, job runs and their duration
//! - Data path: buffer flushes, queue records, health checks
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec,
    TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Leadership and scheduling metrics
struct ControlMetrics {
    is_leader: Gauge,
    elections: Counter,
    leases_lost: Counter,
    jobs_registered: GaugeVec,
    job_runs: CounterVec,
    job_duration: HistogramVec,
}

/// Buffer, queue and health check metrics
struct DataMetrics {
    buffer_flushes: CounterVec,
    queue_records: CounterVec,
    health_checks: CounterVec,
}

static CONTROL_METRICS: OnceLock<ControlMetrics> = OnceLock::new();

static DATA_METRICS: OnceLock<DataMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Call once at application startup. If registration fails the error is
/// returned and every metric operation stays a no-op.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = replicore::metrics::init_metrics() {
///     tracing::warn!(error = %e, "Metrics disabled");
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let control = ControlMetrics {
        is_leader: register_gauge!(
            "replicore_is_leader",
            "Whether this process holds the leader lease (1 = yes, 0 = no)"
        )?,
        elections: register_counter!(
            "replicore_elections_total",
            "Total number of times this process acquired the lease"
        )?,
        leases_lost: register_counter!(
            "replicore_lease_lost_total",
            "Total number of times renewal found the lease gone"
        )?,
        jobs_registered: register_gauge_vec!(
            "replicore_jobs_registered",
            "Number of registered jobs by set",
            &["set"]
        )?,
        job_runs: register_counter_vec!(
            "replicore_job_runs_total",
            "Total job runs by job and outcome",
            &["job", "outcome"]
        )?,
        job_duration: register_histogram_vec!(
            "replicore_job_duration_seconds",
            "Job run duration in seconds",
            &["job"],
            vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
        )?,
    };

    let data = DataMetrics {
        buffer_flushes: register_counter_vec!(
            "replicore_buffer_flushes_total",
            "Total buffer flushes by trigger",
            &["reason"]
        )?,
        queue_records: register_counter_vec!(
            "replicore_queue_records_total",
            "Total queue records by outcome",
            &["outcome"]
        )?,
        health_checks: register_counter_vec!(
            "replicore_health_checks_total",
            "Total health checks by outcome",
            &["outcome"]
        )?,
    };

    CONTROL_METRICS
        .set(control)
        .map_err(|_| "Control metrics already initialized")?;
    DATA_METRICS
        .set(data)
        .map_err(|_| "Data metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    CONTROL_METRICS.get().is_some() && DATA_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Update the leadership gauge
pub fn set_leader(is_leader: bool) {
    if let Some(m) = CONTROL_METRICS.get() {
        m.is_leader.set(if is_leader { 1.0 } else { 0.0 });
    }
}

/// Record a won election
pub fn record_election() {
    if let Some(m) = CONTROL_METRICS.get() {
        m.elections.inc();
    }
}

/// Record a lease lost during renewal
pub fn record_lease_lost() {
    if let Some(m) = CONTROL_METRICS.get() {
        m.leases_lost.inc();
    }
}

/// Set the number of registered jobs in `set` ("replica" or "master")
pub fn set_registered_jobs(set: &str, count: usize) {
    if let Some(m) = CONTROL_METRICS.get() {
        m.jobs_registered.with_label_values(&[set]).set(count as f64);
    }
}

/// Record a finished job run
pub fn record_job_run(job: &str, outcome: &str) {
    if let Some(m) = CONTROL_METRICS.get() {
        m.job_runs.with_label_values(&[job, outcome]).inc();
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start timing a job run
pub fn start_job_timer(job: &str) -> MetricsTimer {
    match CONTROL_METRICS.get() {
        Some(m) => MetricsTimer::new(m.job_duration.with_label_values(&[job]).start_timer()),
        None => MetricsTimer::noop(),
    }
}

/// Record a buffer flush
pub fn record_flush(reason: &str) {
    if let Some(m) = DATA_METRICS.get() {
        m.buffer_flushes.with_label_values(&[reason]).inc();
    }
}

/// Record one queue record outcome
pub fn record_queue(outcome: &str) {
    record_queue_n(outcome, 1);
}

/// Record `count` queue records with the same outcome
pub fn record_queue_n(outcome: &str, count: u64) {
    let Some(m) = DATA_METRICS.get() else {
        return;
    };
    if count > 0 {
        m.queue_records
            .with_label_values(&[outcome])
            .inc_by(count as f64);
    }
}

/// Record `count` health checks with the same outcome
pub fn record_checks(outcome: &str, count: u64) {
    let Some(m) = DATA_METRICS.get() else {
        return;
    };
    if count > 0 {
        m.health_checks
            .with_label_values(&[outcome])
            .inc_by(count as f64);
    }
}

// ============================================================================
// Tests
// ============================================================================
