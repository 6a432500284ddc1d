//! Bounded worker pool fanning checks out over a shared work channel

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use super::{is_success_status, CheckError, HttpCheck, PingResult, PingTarget};

/// Pool size and retry delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOutConfig {
    pub workers: usize,
    pub retry_delay: Duration,
}

/// Check every target with at most `workers` checks in flight.
///
/// Returns exactly one result per target, in completion order, once every
/// worker has exited.
pub async fn fan_out(
    checker: Arc<dyn HttpCheck>,
    targets: Vec<PingTarget>,
    config: FanOutConfig,
) -> Vec<PingResult> {
    let total = targets.len();
    if total == 0 {
        return Vec::new();
    }

    let (work_tx, work_rx) = mpsc::channel(total);
    let (result_tx, mut result_rx) = mpsc::channel(total);

    for target in targets {
        // capacity equals the number of targets
        if work_tx.send(target).await.is_err() {
            break;
        }
    }
    drop(work_tx);

    let work_rx = Arc::new(Mutex::new(work_rx));
    let workers = config.workers.clamp(1, total);
    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            tokio::spawn(run_worker(
                worker,
                Arc::clone(&work_rx),
                result_tx.clone(),
                Arc::clone(&checker),
                config.retry_delay,
            ))
        })
        .collect();
    drop(result_tx);

    for joined in futures::future::join_all(handles).await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Health check worker panicked");
        }
    }

    let mut results = Vec::with_capacity(total);
    while let Some(result) = result_rx.recv().await {
        results.push(result);
    }
    results
}

async fn run_worker(
    worker: usize,
    work: Arc<Mutex<mpsc::Receiver<PingTarget>>>,
    results: mpsc::Sender<PingResult>,
    checker: Arc<dyn HttpCheck>,
    retry_delay: Duration,
) {
    let mut checked = 0usize;
    loop {
        let next = work.lock().await.recv().await;
        let Some(target) = next else {
            break;
        };

        let result = check_with_retry(checker.as_ref(), &target, retry_delay).await;
        checked += 1;
        if results.send(result).await.is_err() {
            break;
        }
    }
    tracing::trace!(worker, checked, "Health check worker done");
}

async fn check_with_retry(
    checker: &dyn HttpCheck,
    target: &PingTarget,
    retry_delay: Duration,
) -> PingResult {
    let mut attempts = 1;
    let mut outcome = checker.check(target).await;

    if !attempt_succeeded(&outcome) {
        tokio::time::sleep(retry_delay).await;
        attempts += 1;
        outcome = checker.check(target).await;
    }

    let (status, error) = match outcome {
        Ok(status) => (Some(status), None),
        Err(e) => (None, Some(e.to_string())),
    };

    PingResult {
        target_id: target.id,
        status,
        error,
        attempts,
        checked_at: Utc::now(),
    }
}

fn attempt_succeeded(outcome: &Result<u16, CheckError>) -> bool {
    matches!(outcome, Ok(status) if is_success_status(*status))
}
