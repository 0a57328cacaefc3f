// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Vector-database data plane.
//!
//! Operations forward verbatim to the store's HTTP API on the
//! resolved endpoint; this layer only contributes the existence,
//! category and readiness guards plus endpoint resolution.

use crate::endpoints::Endpoint;
use crate::error::Error;
use crate::registry::ServiceStatus;
use crate::Orchestrator;
use gridserve_config::Category;
use gridserve_transport::ForwardRequest;
use serde::Serialize;
use std::time::Duration;

/// Row of the vector-service listing.
#[derive(Debug, Clone, Serialize)]
pub struct VectorServiceRow {
    /// Service id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Canonical recipe path.
    pub recipe_name: String,
    /// Resolved endpoint, when available.
    pub endpoint: Option<String>,
    /// Lifecycle state.
    pub status: ServiceStatus,
}

/// Result of a collection listing.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionsOutcome {
    /// Always true; failures surface as errors.
    pub success: bool,
    /// Collection names.
    pub collections: Vec<String>,
    /// The queried service.
    pub service_id: String,
    /// Endpoint that was queried.
    pub endpoint: String,
}

/// Result of a single forwarded vector operation.
#[derive(Debug, Clone, Serialize)]
pub struct VectorOpOutcome {
    /// Always true; failures surface as errors.
    pub success: bool,
    /// The queried service.
    pub service_id: String,
    /// Endpoint that was queried.
    pub endpoint: String,
    /// The store's own result payload.
    pub result: serde_json::Value,
}

impl Orchestrator {
    /// Lists vector-database services.
    pub async fn find_vector_services(&self) -> Vec<VectorServiceRow> {
        let candidates: Vec<(String, String, String, ServiceStatus)> = {
            let registry = self.lock_registry();
            registry
                .services
                .values()
                .filter(|s| s.category == Category::VectorDb)
                .map(|s| (s.id.clone(), s.name.clone(), s.recipe_name.clone(), s.status))
                .collect()
        };

        let mut rows = Vec::with_capacity(candidates.len());
        for (id, name, recipe_name, status) in candidates {
            let endpoint = self.resolve_endpoint(&id).await.ok().map(|e| e.url());
            let status = if status.is_terminal() {
                status
            } else {
                self.batch
                    .status(&id)
                    .await
                    .map(|state| ServiceStatus::from_job_state(state, status))
                    .unwrap_or(status)
            };
            rows.push(VectorServiceRow {
                id,
                name,
                recipe_name,
                endpoint,
                status,
            });
        }
        rows
    }

    /// Lists collections on a vector-database service.
    pub async fn list_collections(&self, service_id: &str) -> Result<CollectionsOutcome, Error> {
        let endpoint = self.ready_vector_endpoint(service_id).await?;
        let response = self
            .forward_get(&endpoint, "/collections", Duration::from_secs(5))
            .await?;
        if !response.ok {
            return Err(Error::Upstream {
                status: response.status,
                body: response.body.chars().take(500).collect(),
            });
        }
        let collections = response
            .json()
            .as_ref()
            .and_then(|v| v.pointer("/result/collections").cloned())
            .and_then(|v| v.as_array().cloned())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|c| c.get("name").and_then(|n| n.as_str()).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(CollectionsOutcome {
            success: true,
            collections,
            service_id: service_id.to_string(),
            endpoint: endpoint.url(),
        })
    }

    /// Fetches one collection's details.
    pub async fn collection_info(
        &self,
        service_id: &str,
        collection: &str,
    ) -> Result<VectorOpOutcome, Error> {
        let endpoint = self.ready_vector_endpoint(service_id).await?;
        let response = self
            .forward_get(
                &endpoint,
                &format!("/collections/{collection}"),
                Duration::from_secs(5),
            )
            .await?;
        self.vector_outcome(service_id, &endpoint, response, Some(collection))
    }

    /// Creates a collection with the given vector size and distance.
    pub async fn create_collection(
        &self,
        service_id: &str,
        collection: &str,
        vector_size: u64,
        distance: &str,
    ) -> Result<VectorOpOutcome, Error> {
        let endpoint = self.ready_vector_endpoint(service_id).await?;
        let body = serde_json::json!({
            "vectors": {"size": vector_size, "distance": distance}
        });
        let response = self
            .http
            .request(ForwardRequest {
                method: "PUT".to_string(),
                host: endpoint.host.clone(),
                port: endpoint.port,
                path: format!("/collections/{collection}"),
                headers: Vec::new(),
                json: Some(body),
                timeout: Duration::from_secs(10),
            })
            .await?;
        self.vector_outcome(service_id, &endpoint, response, Some(collection))
    }

    /// Deletes a collection.
    pub async fn delete_collection(
        &self,
        service_id: &str,
        collection: &str,
    ) -> Result<VectorOpOutcome, Error> {
        let endpoint = self.ready_vector_endpoint(service_id).await?;
        let response = self
            .http
            .request(ForwardRequest {
                method: "DELETE".to_string(),
                host: endpoint.host.clone(),
                port: endpoint.port,
                path: format!("/collections/{collection}"),
                headers: Vec::new(),
                json: None,
                timeout: Duration::from_secs(10),
            })
            .await?;
        self.vector_outcome(service_id, &endpoint, response, Some(collection))
    }

    /// Upserts points into a collection; the payload forwards as-is.
    pub async fn upsert_points(
        &self,
        service_id: &str,
        collection: &str,
        payload: serde_json::Value,
    ) -> Result<VectorOpOutcome, Error> {
        let endpoint = self.ready_vector_endpoint(service_id).await?;
        let response = self
            .http
            .request(ForwardRequest {
                method: "PUT".to_string(),
                host: endpoint.host.clone(),
                port: endpoint.port,
                path: format!("/collections/{collection}/points?wait=true"),
                headers: Vec::new(),
                json: Some(payload),
                timeout: Duration::from_secs(30),
            })
            .await?;
        self.vector_outcome(service_id, &endpoint, response, Some(collection))
    }

    /// Runs a similarity search; the query forwards as-is.
    pub async fn search_points(
        &self,
        service_id: &str,
        collection: &str,
        query: serde_json::Value,
    ) -> Result<VectorOpOutcome, Error> {
        let endpoint = self.ready_vector_endpoint(service_id).await?;
        let response = self
            .http
            .request(ForwardRequest::post_json(
                endpoint.host.clone(),
                endpoint.port,
                format!("/collections/{collection}/points/search"),
                query,
                Duration::from_secs(30),
            ))
            .await?;
        self.vector_outcome(service_id, &endpoint, response, Some(collection))
    }

    async fn ready_vector_endpoint(&self, service_id: &str) -> Result<Endpoint, Error> {
        self.require_category(service_id, Category::VectorDb)?;
        if !self.is_recently_healthy(service_id) {
            let (ready, status, _) = self.check_ready_and_discover(service_id).await?;
            if !ready {
                return Err(Error::NotReady {
                    reason: format!("service is not ready yet (status: {status})"),
                });
            }
        }
        self.resolve_endpoint(service_id).await
    }

    fn vector_outcome(
        &self,
        service_id: &str,
        endpoint: &Endpoint,
        response: gridserve_transport::ForwardResponse,
        collection: Option<&str>,
    ) -> Result<VectorOpOutcome, Error> {
        if !response.ok {
            if response.status == 404 {
                return Err(Error::NotFound {
                    what: "collection",
                    id: collection.unwrap_or(service_id).to_string(),
                });
            }
            return Err(Error::Upstream {
                status: response.status,
                body: response.body.chars().take(500).collect(),
            });
        }
        self.mark_service_healthy(service_id);
        let result = response
            .json()
            .and_then(|v| v.get("result").cloned().or(Some(v)))
            .unwrap_or(serde_json::json!({}));
        Ok(VectorOpOutcome {
            success: true,
            service_id: service_id.to_string(),
            endpoint: endpoint.url(),
            result,
        })
    }
}
