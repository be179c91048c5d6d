// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP surface: webhook completions and read-only execution queries.
//!
//! The webhook endpoint converts externally-pushed completions into
//! `complete_call` invocations for push-based executors. The remaining
//! routes expose read-only status so operators and remote workers can
//! observe executions without embedding the library.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::error::EngineError;
use crate::interpreter::CallOutcome;
use crate::service::Orchestrator;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// The orchestrator every completion flows through.
    pub service: Arc<Orchestrator>,
    /// When the server started, for uptime reporting.
    pub started_at: Instant,
    /// Server version string.
    pub version: String,
}

impl AppState {
    /// Create the handler state for the given service.
    pub fn new(service: Arc<Orchestrator>) -> Self {
        Self {
            service,
            started_at: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Server uptime in milliseconds.
    pub fn uptime_ms(&self) -> u128 {
        self.started_at.elapsed().as_millis()
    }
}

/// Completion payload pushed by a remote executor.
#[derive(Debug, Deserialize)]
pub struct CompletionPayload {
    /// The job handle returned at submission.
    pub job_id: String,
    /// "finished" or "failed".
    #[serde(default = "default_completion_status")]
    pub status: String,
    /// Result value, when finished.
    pub result: Option<Value>,
    /// Failure description, when failed.
    pub error: Option<String>,
}

fn default_completion_status() -> String {
    "finished".to_string()
}

/// Build the HTTP router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook/complete", post(webhook_complete))
        .route("/executions", get(list_executions))
        .route("/executions/:execution_id", get(get_execution))
        .route("/executions/:execution_id/calls", get(get_execution_calls))
        .route("/health", get(health))
        .with_state(state)
}

/// Bind and serve the HTTP surface until the task is aborted.
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "webhook server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::ExecutionNotFound { .. } | EngineError::CallNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        EngineError::CallConflict { .. } | EngineError::StatusConflict { .. } => {
            StatusCode::CONFLICT
        }
        EngineError::ValidationError { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(err: &EngineError) -> Json<Value> {
    Json(json!({
        "error": err.to_string(),
        "code": err.error_code(),
    }))
}

/// POST /webhook/complete: push one call outcome into the engine.
///
/// Returns 200 on success or idempotent duplicate, 404 for an unknown job
/// id, 409 when the call already terminated with a different outcome.
pub async fn webhook_complete(
    State(state): State<AppState>,
    Json(payload): Json<CompletionPayload>,
) -> (StatusCode, Json<Value>) {
    let call = match state
        .service
        .store()
        .find_call_by_job_handle(&payload.job_id)
        .await
    {
        Ok(Some(call)) => call,
        Ok(None) => {
            warn!(job_id = %payload.job_id, "webhook for unknown job");
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("job '{}' not found", payload.job_id) })),
            );
        }
        Err(e) => {
            error!(job_id = %payload.job_id, error = %e, "webhook lookup failed");
            return (status_for(&e), error_body(&e));
        }
    };

    let outcome = match payload.status.as_str() {
        "finished" => CallOutcome::Completed(payload.result.unwrap_or(Value::Null)),
        "failed" => CallOutcome::Failed(
            payload
                .error
                .unwrap_or_else(|| "unknown error".to_string()),
        ),
        other => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({
                    "error": format!("status must be 'finished' or 'failed', got '{other}'")
                })),
            );
        }
    };

    match state
        .service
        .complete_call(
            &call.execution_id,
            Some(&call.resume_group_id),
            call.call_id,
            outcome,
        )
        .await
    {
        Ok(_) => {
            info!(
                job_id = %payload.job_id,
                execution_id = %call.execution_id,
                call_id = call.call_id,
                "webhook completion recorded"
            );
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "execution_id": call.execution_id,
                    "call_id": call.call_id,
                })),
            )
        }
        Err(e) => {
            warn!(job_id = %payload.job_id, error = %e, "webhook completion rejected");
            (status_for(&e), error_body(&e))
        }
    }
}

/// GET /executions/{id}: status snapshot of one execution.
pub async fn get_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.service.poll(&execution_id).await {
        Ok(snapshot) => match serde_json::to_value(&snapshot) {
            Ok(body) => (StatusCode::OK, Json(body)),
            Err(e) => {
                error!(execution_id = %execution_id, error = %e, "snapshot serialization failed");
                let err = EngineError::from(e);
                (status_for(&err), error_body(&err))
            }
        },
        Err(e) => (status_for(&e), error_body(&e)),
    }
}

/// GET /executions: snapshots of all executions, newest first.
pub async fn list_executions(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.service.poll_all(100, 0).await {
        Ok(snapshots) => match serde_json::to_value(&snapshots) {
            Ok(body) => (StatusCode::OK, Json(body)),
            Err(e) => {
                let err = EngineError::from(e);
                (status_for(&err), error_body(&err))
            }
        },
        Err(e) => (status_for(&e), error_body(&e)),
    }
}

/// GET /executions/{id}/calls: unterminated calls of the current batch.
pub async fn get_execution_calls(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.service.get_pending_calls(&execution_id).await {
        Ok(calls) => match serde_json::to_value(&calls) {
            Ok(body) => (StatusCode::OK, Json(body)),
            Err(e) => {
                let err = EngineError::from(e);
                (status_for(&err), error_body(&err))
            }
        },
        Err(e) => (status_for(&e), error_body(&e)),
    }
}

/// GET /health: connectivity and liveness probe.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let database = state
        .service
        .store()
        .health_check()
        .await
        .unwrap_or(false);
    let open_executions = if database {
        state
            .service
            .store()
            .count_open_executions()
            .await
            .unwrap_or(0)
    } else {
        0
    };

    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if database { "ok" } else { "degraded" },
            "version": state.version,
            "uptime_ms": state.uptime_ms() as u64,
            "database": database,
            "open_executions": open_executions,
        })),
    )
}
