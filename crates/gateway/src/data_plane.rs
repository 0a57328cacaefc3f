// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Data-plane routes: inference prompts and vector operations.

use crate::error::ApiError;
use crate::AppState;
use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use gridserve_orchestrator::inference::PromptRequest;
use serde::Deserialize;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/vllm/services", get(find_vllm))
        .route("/vllm/{id}/models", get(models))
        .route("/vllm/{id}/prompt", post(prompt))
        .route("/vector-db/services", get(find_vector_db))
        .route("/vector-db/{id}/collections", get(collections))
        .route(
            "/vector-db/{id}/collections/{name}",
            get(collection_info).put(create_collection).delete(delete_collection),
        )
        .route("/vector-db/{id}/collections/{name}/points", put(upsert_points))
        .route(
            "/vector-db/{id}/collections/{name}/points/search",
            post(search_points),
        )
}

// ===== Inference =====

async fn find_vllm(State(state): State<AppState>) -> Json<serde_json::Value> {
    let services = state.orchestrator.find_inference_services().await;
    Json(serde_json::json!({ "vllm_services": services }))
}

async fn models(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<gridserve_orchestrator::inference::ModelsOutcome>, ApiError> {
    Ok(Json(state.orchestrator.get_models(&id).await?))
}

async fn prompt(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<gridserve_orchestrator::inference::PromptOutcome>, ApiError> {
    if body.get("prompt").and_then(|v| v.as_str()).unwrap_or("").is_empty() {
        return Err(ApiError::bad_request("prompt required"));
    }
    let request: PromptRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::bad_request(format!("invalid prompt request: {e}")))?;
    Ok(Json(state.orchestrator.prompt(&id, request).await?))
}

// ===== Vector database =====

async fn find_vector_db(State(state): State<AppState>) -> Json<serde_json::Value> {
    let services = state.orchestrator.find_vector_services().await;
    Json(serde_json::json!({ "vector_db_services": services }))
}

async fn collections(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<gridserve_orchestrator::vector::CollectionsOutcome>, ApiError> {
    Ok(Json(state.orchestrator.list_collections(&id).await?))
}

async fn collection_info(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Json<gridserve_orchestrator::vector::VectorOpOutcome>, ApiError> {
    Ok(Json(state.orchestrator.collection_info(&id, &name).await?))
}

#[derive(Debug, Deserialize)]
struct CreateCollectionBody {
    vector_size: u64,
    #[serde(default = "default_distance")]
    distance: String,
}

fn default_distance() -> String {
    "Cosine".to_string()
}

async fn create_collection(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
    Json(body): Json<CreateCollectionBody>,
) -> Result<Json<gridserve_orchestrator::vector::VectorOpOutcome>, ApiError> {
    Ok(Json(
        state
            .orchestrator
            .create_collection(&id, &name, body.vector_size, &body.distance)
            .await?,
    ))
}

async fn delete_collection(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Json<gridserve_orchestrator::vector::VectorOpOutcome>, ApiError> {
    Ok(Json(state.orchestrator.delete_collection(&id, &name).await?))
}

async fn upsert_points(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<gridserve_orchestrator::vector::VectorOpOutcome>, ApiError> {
    Ok(Json(state.orchestrator.upsert_points(&id, &name, payload).await?))
}

async fn search_points(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
    Json(query): Json<serde_json::Value>,
) -> Result<Json<gridserve_orchestrator::vector::VectorOpOutcome>, ApiError> {
    Ok(Json(state.orchestrator.search_points(&id, &name, query).await?))
}
