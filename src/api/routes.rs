//! Route handlers: queue admission, status lookup, and the ping probe.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::auth::is_authorized;
use crate::api::AppState;
use crate::task::DEFAULT_LOG_GROUP;

#[derive(Debug, Deserialize)]
pub struct QueueRequest {
    task_type: String,
    #[serde(default = "serde_json::Value::default")]
    task: serde_json::Value,
    #[serde(default)]
    log_group: String,
}

#[derive(Debug, Serialize)]
struct QueueResponse {
    id: u64,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn bad_request(msg: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorBody { error: msg.into() })).into_response()
}

/// `POST /task/queue` — validate type, log group, and job contents, then
/// admit and reply `202 Accepted` with the new id and its location.
pub async fn queue_task(
    State(state): State<AppState>,
    Json(body): Json<QueueRequest>,
) -> Response {
    if !crate::job::type_is_valid(&body.task_type) {
        return bad_request(format!("unknown task type {:?}", body.task_type));
    }

    let log_group = if body.log_group.is_empty() {
        DEFAULT_LOG_GROUP.to_string()
    } else {
        body.log_group
    };
    if !state.logs.name_exists(&log_group) {
        return bad_request(format!("unknown log group {:?}", log_group));
    }

    let serialized = match serde_json::to_string(&body.task) {
        Ok(s) => s,
        Err(e) => return bad_request(format!("invalid task body: {e}")),
    };
    let job = match crate::job::decode_job(&body.task_type, &serialized) {
        Ok(job) => job,
        Err(e) => return bad_request(format!("invalid task body: {e}")),
    };
    if let Err(e) = job.check_valid() {
        return bad_request(e.to_string());
    }

    match state.queue.add(job, log_group) {
        Ok(id) => {
            let mut headers = HeaderMap::new();
            let location = format!("/task/queue/{id}");
            if let Ok(value) = axum::http::HeaderValue::from_str(&location) {
                headers.insert(axum::http::header::CONTENT_LOCATION, value);
            }
            (StatusCode::ACCEPTED, headers, Json(QueueResponse { id })).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to persist new task");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Serialize)]
struct TaskStatusResponse {
    id: u64,
    known: bool,
    terminated: bool,
    result_ok: bool,
    result_info: String,
    duration_ms: Option<i64>,
}

/// `GET /task/queue/:id` — current status, result, and elapsed duration.
pub async fn get_task(State(state): State<AppState>, Path(id): Path<u64>) -> Json<TaskStatusResponse> {
    let snapshot = state.queue.get(id);
    if snapshot.is_unknown() {
        return Json(TaskStatusResponse {
            id,
            known: false,
            terminated: false,
            result_ok: false,
            result_info: String::new(),
            duration_ms: None,
        });
    }

    let now = chrono::Utc::now();
    let terminated = matches!(
        snapshot.status,
        crate::task::TaskStatus::Done | crate::task::TaskStatus::Aborted
    );
    Json(TaskStatusResponse {
        id: snapshot.id,
        known: true,
        terminated,
        result_ok: snapshot.result_ok,
        result_info: snapshot.result_info,
        duration_ms: snapshot.duration(now).map(|d| d.num_milliseconds()),
    })
}

/// `GET /task/ping` — always `200 OK`; body distinguishes an authenticated
/// caller (`"OK"`) from an unauthenticated liveness probe (`"pong"`).
pub async fn ping(State(state): State<AppState>, headers: HeaderMap) -> &'static str {
    if is_authorized(&headers, &state.api_key) {
        "OK"
    } else {
        "pong"
    }
}
