//! Health check fan-out against mock HTTP servers

use async_trait::async_trait;
use replicore::healthcheck::{
    fan_out, FanOutConfig, HealthCheckConfig, HealthCheckJob, HttpCheck, PingResult,
    PingResultStore, PingTarget, ReqwestChecker, StaticTargets,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn checker(timeout: Duration) -> Arc<dyn HttpCheck> {
    Arc::new(ReqwestChecker::new(timeout).unwrap())
}

fn fast_pool(workers: usize) -> FanOutConfig {
    FanOutConfig {
        workers,
        retry_delay: Duration::from_millis(10),
    }
}

#[derive(Default)]
struct RecordingResults {
    saved: Mutex<Vec<Vec<PingResult>>>,
}

#[async_trait]
impl PingResultStore for RecordingResults {
    async fn save_results(&self, results: Vec<PingResult>) -> anyhow::Result<()> {
        self.saved.lock().unwrap().push(results);
        Ok(())
    }
}

// ============================================================================
// Fan-out
// ============================================================================

#[tokio::test]
async fn test_every_target_gets_one_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let targets: Vec<_> = (0..12)
        .map(|id| PingTarget::get(id, format!("{}/ok", server.uri())))
        .collect();

    for workers in [1, 4, 20] {
        let results = fan_out(checker(Duration::from_secs(5)), targets.clone(), fast_pool(workers)).await;

        assert_eq!(results.len(), 12, "workers = {workers}");
        let ids: HashSet<u64> = results.iter().map(|r| r.target_id).collect();
        assert_eq!(ids.len(), 12);
        assert!(results.iter().all(|r| r.is_success() && r.attempts == 1));
    }
}

#[tokio::test]
async fn test_flaky_endpoint_succeeds_on_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let target = PingTarget::get(7, format!("{}/flaky", server.uri()));
    let results = fan_out(checker(Duration::from_secs(5)), vec![target], fast_pool(2)).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].target_id, 7);
    assert_eq!(results[0].status, Some(200));
    assert_eq!(results[0].attempts, 2);
    assert!(results[0].is_success());
}

#[tokio::test]
async fn test_down_endpoint_is_checked_twice() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let target = PingTarget::get(1, format!("{}/down", server.uri()));
    let results = fan_out(checker(Duration::from_secs(5)), vec![target], fast_pool(1)).await;

    assert_eq!(results[0].status, Some(500));
    assert_eq!(results[0].attempts, 2);
    assert!(!results[0].is_success());
    assert!(results[0].error.is_none());
}

#[tokio::test]
async fn test_timeout_is_recorded_as_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let target = PingTarget::get(3, format!("{}/slow", server.uri()));
    let results = fan_out(checker(Duration::from_millis(200)), vec![target], fast_pool(1)).await;

    assert_eq!(results[0].status, None);
    assert_eq!(results[0].attempts, 2);
    assert_eq!(results[0].error.as_deref(), Some("Request timed out"));
}

#[tokio::test]
async fn test_configured_method_and_headers_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/auth"))
        .and(header("x-health-token", "secret"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let mut with_header = PingTarget::get(1, format!("{}/auth", server.uri()));
    with_header.method = "head".to_string();
    with_header
        .headers
        .insert("x-health-token".to_string(), "secret".to_string());
    let mut without_header = with_header.clone();
    without_header.id = 2;
    without_header.headers.clear();

    let mut results = fan_out(
        checker(Duration::from_secs(5)),
        vec![with_header, without_header],
        fast_pool(2),
    )
    .await;
    results.sort_by_key(|r| r.target_id);

    assert_eq!(results[0].status, Some(204));
    assert!(results[0].is_success());
    assert_eq!(results[1].status, Some(404));
    assert!(!results[1].is_success());
}

// ============================================================================
// Job
// ============================================================================

#[tokio::test]
async fn test_job_checks_one_shard_per_tick_and_saves_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let targets: Vec<_> = (0..6)
        .map(|id| PingTarget::get(id, format!("{}/t/{id}", server.uri())))
        .collect();
    let results = Arc::new(RecordingResults::default());
    let job = HealthCheckJob::new(
        Arc::new(StaticTargets(targets)),
        checker(Duration::from_secs(5)),
        results.clone(),
        HealthCheckConfig {
            interval: 2,
            workers: 3,
            retry_delay: Duration::from_millis(10),
            request_timeout: Duration::from_secs(5),
        },
    );

    let first = job.run_tick().await.unwrap();
    let second = job.run_tick().await.unwrap();

    let mut first_ids: Vec<u64> = first.iter().map(|r| r.target_id).collect();
    let mut second_ids: Vec<u64> = second.iter().map(|r| r.target_id).collect();
    first_ids.sort_unstable();
    second_ids.sort_unstable();
    assert_eq!(first_ids, vec![0, 2, 4]);
    assert_eq!(second_ids, vec![1, 3, 5]);

    let saved = results.saved.lock().unwrap();
    assert_eq!(saved.len(), 2);
    assert!(saved.iter().all(|batch| batch.len() == 3));
}
