use crate::checks::{run_blocking, CheckRegistry, CheckState};
use crate::metrics::Metrics;
use crate::state::{DiskStat, NetStat, ProcessStat, State as AgentState};
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub state: Arc<RwLock<AgentState>>,
    pub registry: Arc<CheckRegistry>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiState {
    pub started_at_unix: i64,
    pub last_collect_timestamp_seconds: i64,
    pub host_name: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub kernel_version: Option<String>,
    pub system_uptime_seconds: u64,
    pub boot_time_unix: u64,
    pub cpu_core_count: u32,
    pub cpu_usage_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub swap_used_bytes: u64,
    pub swap_total_bytes: u64,
    pub disks: Vec<DiskStat>,
    pub net: Vec<NetStat>,
    pub processes: Vec<ProcessStat>,
}

impl From<&AgentState> for ApiState {
    fn from(value: &AgentState) -> Self {
        Self {
            started_at_unix: value.started_at_unix,
            last_collect_timestamp_seconds: value.last_collect_timestamp_seconds,
            host_name: value.host_name.clone(),
            os_name: value.os_name.clone(),
            os_version: value.os_version.clone(),
            kernel_version: value.kernel_version.clone(),
            system_uptime_seconds: value.system_uptime_seconds,
            boot_time_unix: value.boot_time_unix,
            cpu_core_count: value.cpu_core_count,
            cpu_usage_percent: value.cpu_usage_percent,
            memory_used_bytes: value.memory_used_bytes,
            memory_total_bytes: value.memory_total_bytes,
            swap_used_bytes: value.swap_used_bytes,
            swap_total_bytes: value.swap_total_bytes,
            disks: value.disks.clone(),
            net: value.net.clone(),
            processes: value.processes.clone(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct InventoryResponse {
    pub checks: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct QueryResponse {
    pub command: String,
    pub result: u16,
    pub state: CheckState,
    pub message: String,
    pub perf: String,
}

pub fn build_router(
    metrics: Arc<Metrics>,
    state: Arc<RwLock<AgentState>>,
    registry: Arc<CheckRegistry>,
) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/state", get(state_handler))
        .route("/api/v1/inventory", get(inventory_handler))
        .route("/query/:command", get(query_handler))
        .with_state(HttpAppState {
            metrics,
            state,
            registry,
        })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

async fn state_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    let guard = state.state.read().await;
    Json(ApiState::from(&*guard))
}

async fn inventory_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    let checks = state
        .registry
        .names()
        .into_iter()
        .map(str::to_string)
        .collect();
    Json(InventoryResponse { checks })
}

/// `GET /query/check_drivesize?drive=/&warn=used > 90%` runs the check with
/// each query pair passed as a `key=value` argument.
async fn query_handler(
    State(state): State<HttpAppState>,
    Path(command): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> impl IntoResponse {
    let args = params
        .into_iter()
        .map(|(k, v)| if v.is_empty() { k } else { format!("{k}={v}") })
        .collect();
    let result = run_blocking(state.registry.clone(), command.clone(), args).await;
    state.metrics.inc_check_execution(&command, result.state);

    Json(QueryResponse {
        command,
        result: result.state.code(),
        state: result.state,
        perf: result.perf_data(),
        message: result.output,
    })
}
