// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Liveness endpoint.

use crate::AppState;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

pub(crate) fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "services": state.orchestrator.service_count(),
    }))
}
