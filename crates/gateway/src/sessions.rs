// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Monitoring session routes.
//!
//! Target registration is session-scoped:
//! `POST /sessions/{id}/clients` and `POST /sessions/{id}/services`.

use crate::error::ApiError;
use crate::AppState;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use gridserve_monitoring::{
    CollectRequest, RegisterClientRequest, RegisterServiceRequest, SessionCreateRequest,
};
use serde::Deserialize;
use std::collections::BTreeMap;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/{id}", axum::routing::delete(delete_session))
        .route("/sessions/{id}/stop", post(stop_session))
        .route("/sessions/{id}/status", get(session_status))
        .route("/sessions/{id}/collect", post(collect))
        .route("/sessions/{id}/clients", post(register_client))
        .route("/sessions/{id}/services", post(register_service))
}

async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<SessionCreateRequest>,
) -> Result<Json<gridserve_monitoring::SessionCreated>, ApiError> {
    Ok(Json(state.monitoring.create_session(request).await?))
}

async fn list_sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    let sessions = state.monitoring.list_sessions();
    Json(serde_json::json!({ "count": sessions.len(), "sessions": sessions }))
}

async fn session_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<gridserve_monitoring::SessionStatusView>, ApiError> {
    Ok(Json(state.monitoring.status(&id).await?))
}

async fn stop_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.monitoring.stop_session(&id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": format!("Session {id} stopped successfully"),
    })))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.monitoring.delete_session(&id)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": format!("Session {id} deleted successfully"),
    })))
}

async fn collect(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CollectRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let artifacts = state.monitoring.collect(&id, request).await?;
    Ok(Json(serde_json::json!({ "artifacts": artifacts })))
}

#[derive(Debug, Deserialize)]
struct ClientBody {
    client_id: String,
    node: String,
    exporters: BTreeMap<String, String>,
    #[serde(default)]
    preferences: BTreeMap<String, bool>,
}

async fn register_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ClientBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let client_id = body.client_id.clone();
    state
        .monitoring
        .register_client(RegisterClientRequest {
            session_id: id,
            client_id: body.client_id,
            node: body.node,
            exporters: body.exporters,
            preferences: body.preferences,
        })
        .await?;
    Ok(Json(serde_json::json!({ "ok": true, "client_id": client_id })))
}

#[derive(Debug, Deserialize)]
struct ServiceBody {
    service_id: String,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

async fn register_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ServiceBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let service_id = body.service_id.clone();
    let endpoint = state
        .monitoring
        .register_service(RegisterServiceRequest {
            session_id: id,
            service_id: body.service_id,
            labels: body.labels,
        })
        .await?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "service_id": service_id,
        "endpoint": endpoint,
    })))
}
