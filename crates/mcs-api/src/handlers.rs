//! REST API handlers.
//!
//! `/doNewAppGroup` keeps the wire format existing clients speak: a bare
//! JSON list of `AppInfo` on success. Every other route, and every error,
//! uses the `ApiResponse` envelope.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{error, info, warn};

use mcs_core::{ALGORITHM_HEADER, EXPECTED_TIME_HEADER, K8sApp, NetworkState};
use mcs_placement::{AlgorithmKind, PlacementError};
use mcs_scheduler::{ScheduleRequest, SchedulerError};
use mcs_state::NetStateRecord;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

/// HTTP status of a scheduler failure.
fn status_of(err: &SchedulerError) -> StatusCode {
    match err {
        SchedulerError::Validation(_) => StatusCode::BAD_REQUEST,
        SchedulerError::Locked => StatusCode::LOCKED,
        SchedulerError::Deploy(_)
        | SchedulerError::Infra(_)
        | SchedulerError::Placement(_)
        | SchedulerError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn scheduler_error(err: SchedulerError) -> Response {
    let status = status_of(&err);
    match &err {
        SchedulerError::Placement(PlacementError::Invariant(_)) => error!(error = %err, "invariant violated"),
        _ if status.is_server_error() => error!(error = %err, "request failed"),
        _ => {}
    }
    error_response(&err.to_string(), status)
}

// ── Scheduling ─────────────────────────────────────────────────

fn header_text<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, String> {
    headers
        .get(name)
        .map(|v| v.to_str().map(str::trim).map_err(|e| format!("header {name}: {e}")))
        .transpose()
}

/// Read the optional scheduling headers.
fn parse_headers(headers: &HeaderMap) -> Result<(Option<AlgorithmKind>, Option<f64>), String> {
    let algorithm = match header_text(headers, ALGORITHM_HEADER)? {
        Some(value) => Some(value.parse::<AlgorithmKind>().map_err(|e| e.to_string())?),
        None => None,
    };
    let expected_time = match header_text(headers, EXPECTED_TIME_HEADER)? {
        Some(value) => {
            let secs = value
                .parse::<f64>()
                .map_err(|e| format!("header {EXPECTED_TIME_HEADER} {value:?} is not a number: {e}"))?;
            if !secs.is_finite() || secs <= 0.0 {
                return Err(format!("header {EXPECTED_TIME_HEADER} must be a positive number of seconds, got {value:?}"));
            }
            Some(secs)
        }
        None => None,
    };
    Ok((algorithm, expected_time))
}

/// POST /doNewAppGroup
pub async fn do_new_app_group(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<Vec<K8sApp>>, JsonRejection>,
) -> Response {
    let apps = match body {
        Ok(Json(apps)) => apps,
        Err(JsonRejection::MissingJsonContentType(e)) => {
            return error_response(&e.body_text(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        }
        Err(e) => return error_response(&e.body_text(), StatusCode::BAD_REQUEST),
    };

    let (algorithm, expected_time_one_cpu) = match parse_headers(&headers) {
        Ok(parsed) => parsed,
        Err(msg) => {
            warn!(error = %msg, "bad scheduling headers");
            return error_response(&msg, StatusCode::BAD_REQUEST);
        }
    };

    info!(apps = apps.len(), algorithm = ?algorithm, "doNewAppGroup received");
    let request = ScheduleRequest {
        apps,
        algorithm,
        expected_time_one_cpu,
    };
    match state.scheduler.do_new_app_group(request).await {
        Ok(infos) => (StatusCode::CREATED, Json(infos)).into_response(),
        Err(e) => scheduler_error(e),
    }
}

// ── Network state ──────────────────────────────────────────────

/// GET /api/v1/netstate
pub async fn list_net_states(State(state): State<ApiState>) -> Response {
    match state.scheduler.state().list_net_states() {
        Ok(rows) => ApiResponse::ok(rows).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// Body of a net state upsert.
#[derive(Debug, Deserialize)]
pub struct NetStateUpdate {
    pub peers: BTreeMap<String, NetworkState>,
}

/// PUT /api/v1/netstate/{cloud}
pub async fn put_net_state(
    State(state): State<ApiState>,
    Path(cloud): Path<String>,
    Json(update): Json<NetStateUpdate>,
) -> Response {
    if let Some((peer, _)) = update.peers.iter().find(|(_, s)| s.rtt.is_nan() || s.rtt < 0.0) {
        return error_response(
            &format!("rtt from {cloud} to {peer} must be a non-negative number"),
            StatusCode::BAD_REQUEST,
        );
    }
    let record = NetStateRecord {
        source: cloud,
        peers: update.peers,
        updated_at: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
    };
    match state.scheduler.state().put_net_state(&record) {
        Ok(()) => ApiResponse::ok(record).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

// ── Runs ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    #[serde(default = "default_runs_limit")]
    pub limit: usize,
}

fn default_runs_limit() -> usize {
    50
}

/// GET /api/v1/runs
pub async fn list_runs(State(state): State<ApiState>, Query(query): Query<RunsQuery>) -> Response {
    match state.scheduler.state().list_runs(query.limit) {
        Ok(runs) => ApiResponse::ok(runs).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// GET /api/v1/runs/{id}
pub async fn get_run(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.scheduler.state().get_run(&id) {
        Ok(Some(run)) => ApiResponse::ok(run).into_response(),
        Ok(None) => error_response("run not found", StatusCode::NOT_FOUND),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

// ── Maintenance ────────────────────────────────────────────────

/// POST /api/v1/gc
pub async fn trigger_gc(State(state): State<ApiState>) -> Response {
    match state.scheduler.try_gc().await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// GET /healthz
pub async fn healthz() -> Response {
    ApiResponse::ok(serde_json::json!({ "status": "ok" })).into_response()
}
