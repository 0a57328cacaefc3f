// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Replica-group routes.

use crate::error::ApiError;
use crate::AppState;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/service-groups", get(list_groups))
        .route("/service-groups/{id}", get(get_group).delete(delete_group))
        .route("/service-groups/{id}/status", get(group_status).post(set_group_status))
        .route("/service-groups/{id}/stop", post(stop_group))
}

async fn list_groups(
    State(state): State<AppState>,
) -> Json<Vec<gridserve_orchestrator::GroupView>> {
    Json(state.orchestrator.list_groups())
}

async fn get_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<gridserve_orchestrator::GroupView>, ApiError> {
    Ok(Json(state.orchestrator.get_group(&id)?))
}

async fn group_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<gridserve_orchestrator::GroupStatusView>, ApiError> {
    Ok(Json(state.orchestrator.group_status(&id)?))
}

async fn delete_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<gridserve_orchestrator::StopOutcome>, ApiError> {
    Ok(Json(state.orchestrator.stop_group(&id).await?))
}

async fn stop_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<gridserve_orchestrator::StopOutcome>, ApiError> {
    Ok(Json(state.orchestrator.stop_group(&id).await?))
}

#[derive(Debug, Deserialize)]
struct GroupStatusBody {
    status: String,
}

/// Graceful stop that keeps group metadata for later analysis.
async fn set_group_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<GroupStatusBody>,
) -> Result<Json<gridserve_orchestrator::StopOutcome>, ApiError> {
    if body.status != "cancelled" {
        return Err(ApiError::bad_request(format!(
            "unsupported status '{}'; only 'cancelled' is accepted",
            body.status
        )));
    }
    Ok(Json(state.orchestrator.stop_group(&id).await?))
}
