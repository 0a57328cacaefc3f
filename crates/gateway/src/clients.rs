// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Load-generator dispatch routes.

use crate::error::ApiError;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use gridserve_config::script::LoadGenSpec;
use serde::Deserialize;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/clients/load-generators", post(dispatch))
        .route("/clients/load-generators/{group_id}/logs", get(logs))
        .route("/clients/load-generators/{group_id}/results", get(results))
}

#[derive(Debug, Deserialize)]
struct DispatchBody {
    group_id: u32,
    #[serde(default = "default_time_limit")]
    time_limit: u32,
    #[serde(flatten)]
    spec: LoadGenSpec,
}

fn default_time_limit() -> u32 {
    30
}

async fn dispatch(
    State(state): State<AppState>,
    Json(body): Json<DispatchBody>,
) -> Result<Json<gridserve_orchestrator::loadgen::LoadGenDispatch>, ApiError> {
    Ok(Json(
        state
            .orchestrator
            .dispatch_load_generator(body.group_id, body.time_limit, body.spec)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    job_id: String,
}

async fn logs(
    State(state): State<AppState>,
    Path(group_id): Path<u32>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let logs = state
        .orchestrator
        .load_generator_logs(group_id, &query.job_id)
        .await?;
    Ok(Json(serde_json::json!({ "logs": logs })))
}

async fn results(
    State(state): State<AppState>,
    Path(group_id): Path<u32>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(Json(state.orchestrator.load_generator_results(group_id).await?))
}
