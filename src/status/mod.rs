//! Status endpoint: liveness, leadership and Prometheus metrics
//!
//! | Route | Response |
//! |-------|----------|
//! | `GET /health/live` | 200 while the process runs |
//! | `GET /health/leader` | 200 on the leader, 503 on followers |
//! | `GET /metrics` | Prometheus text format |

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

use crate::election::Node;
use crate::metrics;
use crate::scheduler::Scheduler;

/// Shared handler state
#[derive(Clone)]
pub struct StatusState {
    pub node: Arc<Node>,
    pub scheduler: Arc<Scheduler>,
    pub start_time: Instant,
}

impl StatusState {
    pub fn new(node: Arc<Node>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            node,
            scheduler,
            start_time: Instant::now(),
        }
    }
}

/// Liveness response
#[derive(Debug, Serialize, Deserialize)]
pub struct LiveResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Leadership response
#[derive(Debug, Serialize, Deserialize)]
pub struct LeaderResponse {
    pub node_id: String,
    pub is_leader: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    pub replica_jobs: usize,
    pub master_jobs: usize,
}

/// Create the status router
pub fn create_router(state: StatusState) -> Router {
    Router::new()
        .route("/health/live", get(live))
        .route("/health/leader", get(leader))
        .route("/metrics", get(prometheus_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the status router until `shutdown` resolves
pub async fn serve(
    addr: SocketAddr,
    state: StatusState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Status server listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Status server shutdown complete");
    Ok(())
}

async fn live(State(state): State<StatusState>) -> impl IntoResponse {
    Json(LiveResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn leader(State(state): State<StatusState>) -> impl IntoResponse {
    let term = state.node.current_term();
    let registered = state.scheduler.registered();
    let code = if term.is_some() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(LeaderResponse {
            node_id: state.node.id().to_string(),
            is_leader: term.is_some(),
            generation: term.and_then(|t| t.generation),
            replica_jobs: registered.replica,
            master_jobs: registered.master,
        }),
    )
}

async fn prometheus_metrics() -> impl IntoResponse {
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            e.to_string(),
        ),
    }
}
