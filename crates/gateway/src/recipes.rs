// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Recipe catalogue routes.

use crate::error::ApiError;
use crate::AppState;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

pub(crate) fn routes() -> Router<AppState> {
    Router::new().route("/recipes", get(list_recipes))
}

#[derive(Debug, Default, Deserialize)]
struct RecipeQuery {
    /// Canonical `category/name` lookup.
    #[serde(default)]
    path: Option<String>,
    /// Bare-name lookup, searched across categories.
    #[serde(default)]
    name: Option<String>,
}

async fn list_recipes(
    State(state): State<AppState>,
    Query(query): Query<RecipeQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(wanted) = query.path.or(query.name) {
        let recipe = state.orchestrator.get_recipe(&wanted)?;
        return Ok(Json(recipe));
    }
    Ok(Json(serde_json::json!(state.orchestrator.list_recipes())))
}
