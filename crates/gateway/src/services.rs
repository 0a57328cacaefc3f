// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Service management routes.
//!
//! - POST `/services` - launch from a recipe
//! - GET `/services` - list
//! - GET `/services/targets` - Prometheus file-sd document
//! - GET `/services/{id}` - one service or group
//! - DELETE `/services/{id}` - stop (cancel the job)
//! - POST `/services/{id}/status` - graceful stop
//! - GET `/services/{id}/status` - canonical status
//! - GET `/services/{id}/logs` - log tail (diagnostic)
//! - GET `/services/{id}/metrics` - proxied Prometheus text format

use crate::error::ApiError;
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use gridserve_config::recipe::ServiceConfig;
use serde::Deserialize;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/services", post(create_service).get(list_services))
        .route("/services/targets", get(targets))
        .route("/services/{id}", get(get_service).delete(delete_service))
        .route("/services/{id}/status", post(set_status).get(get_status))
        .route("/services/{id}/logs", get(logs))
        .route("/services/{id}/metrics", get(metrics))
}

async fn create_service(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<gridserve_orchestrator::StartOutcome>, ApiError> {
    let recipe_name = body
        .get("recipe_name")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("recipe_name required"))?
        .to_string();
    let config: ServiceConfig = match body.get("config") {
        None | Some(serde_json::Value::Null) => ServiceConfig::default(),
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|e| ApiError::bad_request(format!("invalid config: {e}")))?,
    };
    let outcome = state.orchestrator.start_service(&recipe_name, config).await?;
    Ok(Json(outcome))
}

async fn list_services(State(state): State<AppState>) -> Json<serde_json::Value> {
    let services = state.orchestrator.list_services().await;
    Json(serde_json::json!({ "total": services.len(), "services": services }))
}

async fn get_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<gridserve_orchestrator::ServiceInfo>, ApiError> {
    Ok(Json(state.orchestrator.get_service(&id).await?))
}

async fn delete_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<gridserve_orchestrator::StopOutcome>, ApiError> {
    Ok(Json(state.orchestrator.stop_service(&id).await?))
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
}

async fn set_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<StatusBody>,
) -> Result<Json<gridserve_orchestrator::StopOutcome>, ApiError> {
    if body.status != "cancelled" {
        return Err(ApiError::bad_request(format!(
            "unsupported status '{}'; only 'cancelled' is accepted",
            body.status
        )));
    }
    Ok(Json(state.orchestrator.stop_service(&id).await?))
}

async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(Json(state.orchestrator.service_status(&id).await?))
}

async fn logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let logs = state.orchestrator.service_logs(&id).await?;
    Ok(Json(serde_json::json!({ "logs": logs })))
}

async fn metrics(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.orchestrator.service_metrics(&id).await {
        Ok(outcome) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            outcome.metrics,
        )
            .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

async fn targets(State(state): State<AppState>) -> Json<Vec<gridserve_orchestrator::metrics::FileSdEntry>> {
    Json(state.orchestrator.targets_document(&state.gateway_host_port))
}
