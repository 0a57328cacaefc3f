// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Inference data plane.
//!
//! Prompts try the chat-completions endpoint first; base models
//! without a chat template answer 400, which triggers a retry against
//! plain completions with the same parameters. Replica groups route
//! by round-robin over the full replica list with failover bounded by
//! the replica count. The first discovered model id per service is
//! cached so follow-up prompts skip the discovery round trip.

use crate::endpoints::Endpoint;
use crate::error::Error;
use crate::readiness::{first_model_id, probe_body_ready};
use crate::registry::{ReplicaStatus, ServiceStatus};
use crate::{ON_DEMAND_PROBE_TIMEOUT_SECS, Orchestrator};
use chrono::Utc;
use gridserve_batch::JobState;
use gridserve_config::Category;
use gridserve_transport::{ForwardRequest, ForwardResponse};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default token budget for a prompt.
const DEFAULT_MAX_TOKENS: u32 = 500;
/// Default sampling temperature.
const DEFAULT_TEMPERATURE: f64 = 0.7;

/// A prompt request from the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptRequest {
    /// The prompt text.
    pub prompt: String,
    /// Model override; discovered when omitted.
    #[serde(default)]
    pub model: Option<String>,
    /// Maximum tokens to generate.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: Option<f64>,
}

/// A successful prompt response.
#[derive(Debug, Clone, Serialize)]
pub struct PromptOutcome {
    /// Always true; failures surface as errors.
    pub success: bool,
    /// Generated text.
    pub response: String,
    /// The service or replica that answered.
    pub service_id: String,
    /// Endpoint that served the request.
    pub endpoint: String,
    /// "chat" or "completions".
    pub endpoint_used: &'static str,
    /// Token accounting as reported by the server.
    pub usage: serde_json::Value,
    /// Replica that served a group request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routed_to: Option<String>,
    /// Group id of a group request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

/// Model listing for one service.
#[derive(Debug, Clone, Serialize)]
pub struct ModelsOutcome {
    /// Always true; failures surface as errors.
    pub success: bool,
    /// Served model ids.
    pub models: Vec<String>,
    /// The queried service.
    pub service_id: String,
    /// Endpoint that was queried.
    pub endpoint: String,
}

/// Row of the inference service listing.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceServiceRow {
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

impl Orchestrator {
    /// Lists inference services with endpoints and refreshed status.
    pub async fn find_inference_services(&self) -> Vec<InferenceServiceRow> {
        let candidates: Vec<(String, String, String, ServiceStatus)> = {
            let registry = self.lock_registry();
            registry
                .services
                .values()
                .filter(|s| s.category == Category::Inference)
                .map(|s| (s.id.clone(), s.name.clone(), s.recipe_name.clone(), s.status))
                .collect()
        };

        let mut rows = Vec::with_capacity(candidates.len());
        for (id, name, recipe_name, status) in candidates {
            let endpoint = self.resolve_endpoint(&id).await.ok().map(|e| e.url());
            let status = if status.is_terminal() || id.contains(':') {
                status
            } else {
                self.batch
                    .status(&id)
                    .await
                    .map(|state| ServiceStatus::from_job_state(state, status))
                    .unwrap_or(status)
            };
            rows.push(InferenceServiceRow {
                id,
                name,
                recipe_name,
                endpoint,
                status,
            });
        }
        rows
    }

    /// Lists the models a running inference service serves.
    pub async fn get_models(&self, service_id: &str) -> Result<ModelsOutcome, Error> {
        self.require_category(service_id, Category::Inference)?;
        let (ready, status, _) = self.check_ready_and_discover(service_id).await?;
        if !ready {
            return Err(Error::NotReady {
                reason: format!("service is not ready yet (status: {status})"),
            });
        }
        let endpoint = self.resolve_endpoint(service_id).await?;
        let response = self
            .forward_get(&endpoint, "/v1/models", Duration::from_secs(5))
            .await?;
        if !response.ok {
            return Err(Error::Upstream {
                status: response.status,
                body: response.body.chars().take(500).collect(),
            });
        }
        let models = response
            .json()
            .as_ref()
            .map(collect_model_ids)
            .unwrap_or_default();
        Ok(ModelsOutcome {
            success: true,
            models,
            service_id: service_id.to_string(),
            endpoint: endpoint.url(),
        })
    }

    /// Routes a prompt to a service or a replica group.
    pub async fn prompt(
        &self,
        service_id: &str,
        request: PromptRequest,
    ) -> Result<PromptOutcome, Error> {
        let is_group = {
            let registry = self.lock_registry();
            registry.groups.contains_key(service_id)
        };
        if is_group {
            self.prompt_group(service_id, request).await
        } else {
            self.prompt_single(service_id, request).await
        }
    }

    /// Round-robin failover over the full replica list. A replica that
    /// answers is marked running; one that fails is marked failed and
    /// the next is tried, at most once per replica.
    async fn prompt_group(
        &self,
        group_id: &str,
        request: PromptRequest,
    ) -> Result<PromptOutcome, Error> {
        let replica_count = {
            let registry = self.lock_registry();
            let group = registry.groups.get(group_id).ok_or_else(|| Error::NotFound {
                what: "service group",
                id: group_id.to_string(),
            })?;
            group.replicas.len()
        };
        if replica_count == 0 {
            return Err(Error::NotReady {
                reason: format!("service group {group_id} has no replicas"),
            });
        }

        let mut attempted: Vec<String> = Vec::new();
        for attempt in 0..replica_count {
            let replica = {
                let mut registry = self.lock_registry();
                registry.next_replica(group_id)
            }
            .ok_or_else(|| Error::NotFound {
                what: "service group",
                id: group_id.to_string(),
            })?;

            info!(group = group_id, replica = %replica.id, attempt = attempt + 1,
                total = replica_count, "routing prompt");
            attempted.push(replica.id.clone());

            match self.prompt_replica(&replica.id, &request).await {
                Ok(mut outcome) => {
                    self.set_replica_and_service_status(&replica.id, ReplicaStatus::Running);
                    self.mark_service_healthy(&replica.id);
                    outcome.routed_to = Some(replica.id.clone());
                    outcome.group_id = Some(group_id.to_string());
                    return Ok(outcome);
                }
                Err(e) => {
                    warn!(replica = %replica.id, error = %e, "replica failed, trying next");
                    self.set_replica_and_service_status(&replica.id, ReplicaStatus::Failed);
                    self.invalidate_service_health(&replica.id);
                }
            }
        }

        let statuses: Vec<String> = {
            let registry = self.lock_registry();
            registry
                .groups
                .get(group_id)
                .map(|g| {
                    g.replicas
                        .iter()
                        .map(|r| format!("{}={}", r.id, r.status))
                        .collect()
                })
                .unwrap_or_default()
        };
        Err(Error::Upstream {
            status: 502,
            body: format!(
                "all {replica_count} replicas failed; attempted [{}]; statuses [{}]",
                attempted.join(", "),
                statuses.join(", ")
            ),
        })
    }

    fn set_replica_and_service_status(&self, replica_id: &str, status: ReplicaStatus) {
        let mut registry = self.lock_registry();
        registry.set_replica_status(replica_id, status);
        if let Some(service) = registry.services.get_mut(replica_id) {
            service.status = match status {
                ReplicaStatus::Running | ReplicaStatus::Ready => ServiceStatus::Ready,
                ReplicaStatus::Failed => ServiceStatus::Failed,
                ReplicaStatus::Cancelled => ServiceStatus::Cancelled,
                ReplicaStatus::Starting => ServiceStatus::Starting,
            };
        }
    }

    /// Prompt against one replica: resolve, pick a model, send. No
    /// scheduler gate; a replica can serve while its job record is
    /// already gone.
    async fn prompt_replica(
        &self,
        replica_id: &str,
        request: &PromptRequest,
    ) -> Result<PromptOutcome, Error> {
        let endpoint = self.resolve_endpoint(replica_id).await?;
        let model = match &request.model {
            Some(model) => Some(model.clone()),
            None => match self.cached_model(replica_id, &endpoint.url()) {
                Some(model) => Some(model),
                None => self.discover_model(replica_id, &endpoint).await,
            },
        };
        self.send_prompt(replica_id, &endpoint, model, request).await
    }

    /// Single-service prompt path with the recently-healthy fast path.
    async fn prompt_single(
        &self,
        service_id: &str,
        request: PromptRequest,
    ) -> Result<PromptOutcome, Error> {
        self.require_category(service_id, Category::Inference)?;
        let endpoint = self.resolve_endpoint(service_id).await.map_err(|e| match e {
            Error::NotReady { .. } => Error::NotReady {
                reason: "service endpoint not available yet; it may still be initializing"
                    .to_string(),
            },
            other => other,
        })?;

        let mut discovered = None;
        if self.is_recently_healthy(service_id) {
            debug!(service_id, "fast path: skipping readiness re-check");
            discovered = self.cached_model(service_id, &endpoint.url());
        } else {
            let (ready, status, model) = self.check_ready_and_discover(service_id).await?;
            if !ready {
                return Err(Error::NotReady {
                    reason: format!("service is not ready yet (status: {status})"),
                });
            }
            discovered = model.or(discovered);
        }

        let model = match &request.model {
            Some(model) => Some(model.clone()),
            None => match discovered {
                Some(model) => Some(model),
                None => self.discover_model(service_id, &endpoint).await,
            },
        };

        let result = self.send_prompt(service_id, &endpoint, model, &request).await;
        match &result {
            Ok(_) => self.mark_service_healthy(service_id),
            Err(_) => self.invalidate_service_health(service_id),
        }
        result
    }

    /// Sends the prompt, falling back from chat to completions when
    /// the model has no chat template.
    async fn send_prompt(
        &self,
        service_id: &str,
        endpoint: &Endpoint,
        model: Option<String>,
        request: &PromptRequest,
    ) -> Result<PromptOutcome, Error> {
        let timeout = self.data_plane_timeout(service_id);
        let max_tokens = request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        let temperature = request.temperature.unwrap_or(DEFAULT_TEMPERATURE);

        let chat_body = serde_json::json!({
            "model": model.as_deref(),
            "messages": [{"role": "user", "content": &request.prompt}],
            "max_tokens": max_tokens,
            "temperature": temperature,
            "stream": false,
        });
        let response = self
            .http
            .request(ForwardRequest::post_json(
                endpoint.host.clone(),
                endpoint.port,
                "/v1/chat/completions",
                chat_body,
                timeout,
            ))
            .await?;

        if is_chat_template_error(&response) {
            info!(service_id, "chat template rejected, retrying via completions");
            let completions_body = serde_json::json!({
                "model": model.as_deref(),
                "prompt": &request.prompt,
                "max_tokens": max_tokens,
                "temperature": temperature,
                "stream": false,
            });
            let response = self
                .http
                .request(ForwardRequest::post_json(
                    endpoint.host.clone(),
                    endpoint.port,
                    "/v1/completions",
                    completions_body,
                    timeout,
                ))
                .await?;
            return parse_completion(service_id, endpoint, &response, "completions");
        }
        parse_completion(service_id, endpoint, &response, "chat")
    }

    async fn discover_model(&self, service_id: &str, endpoint: &Endpoint) -> Option<String> {
        let response = self
            .forward_get(endpoint, "/v1/models", Duration::from_secs(5))
            .await
            .ok()?;
        let model = response.json().as_ref().and_then(first_model_id)?;
        self.cache_model(service_id, &endpoint.url(), &model);
        Some(model)
    }

    /// Combined readiness check and model discovery in one HTTP call.
    ///
    /// Composite replica ids skip the scheduler gate entirely; regular
    /// services consult the scheduler first so pending jobs never cost
    /// an HTTP round trip.
    pub(crate) async fn check_ready_and_discover(
        &self,
        service_id: &str,
    ) -> Result<(bool, String, Option<String>), Error> {
        let category = {
            let registry = self.lock_registry();
            registry
                .services
                .get(service_id)
                .map(|s| s.category)
                .unwrap_or(Category::Inference)
        };

        if !service_id.contains(':') {
            let state = self.batch.status(service_id).await?;
            match state {
                JobState::Running => {}
                JobState::Pending => return Ok((false, "pending".to_string(), None)),
                other => return Ok((false, other.to_string(), None)),
            }
        }

        let endpoint = match self.resolve_endpoint(service_id).await {
            Ok(endpoint) => endpoint,
            Err(Error::NotReady { .. }) => return Ok((false, "starting".to_string(), None)),
            Err(other) => return Err(other),
        };

        let response = match self
            .forward_get(
                &endpoint,
                category.probe_path(),
                Duration::from_secs(ON_DEMAND_PROBE_TIMEOUT_SECS),
            )
            .await
        {
            Ok(response) => response,
            Err(Error::NotReady { .. }) => return Ok((false, "starting".to_string(), None)),
            Err(other) => return Err(other),
        };

        if !response.ok || !probe_body_ready(category, response.json().as_ref()) {
            return Ok((false, "starting".to_string(), None));
        }

        let model = if category == Category::Inference {
            response.json().as_ref().and_then(first_model_id)
        } else {
            None
        };
        if let Some(model) = &model {
            self.cache_model(service_id, &endpoint.url(), model);
        }

        // Promote to ready and publish the endpoint.
        {
            let mut registry = self.lock_registry();
            if let Some(service) = registry.services.get_mut(service_id) {
                if !service.status.is_terminal() {
                    service.status = ServiceStatus::Ready;
                }
            }
            if !registry.endpoints.contains_key(service_id) {
                let mut metadata = serde_json::Map::new();
                if let Some(model) = &model {
                    let _ = metadata.insert("model".to_string(), serde_json::json!(model));
                }
                let _ = registry.endpoints.insert(
                    service_id.to_string(),
                    crate::registry::EndpointRegistration {
                        service_id: service_id.to_string(),
                        host: endpoint.host.clone(),
                        port: endpoint.port,
                        url: endpoint.url(),
                        registered_at: Utc::now(),
                        metadata,
                    },
                );
            }
        }
        Ok((true, "running".to_string(), model))
    }

    pub(crate) fn require_category(
        &self,
        service_id: &str,
        category: Category,
    ) -> Result<(), Error> {
        let registry = self.lock_registry();
        let record = registry.services.get(service_id).ok_or_else(|| Error::NotFound {
            what: "service",
            id: service_id.to_string(),
        })?;
        if record.category != category {
            return Err(Error::BadRequest {
                reason: format!(
                    "service {service_id} is a {} service, not {category}",
                    record.category
                ),
            });
        }
        Ok(())
    }
}

/// A 400 whose error text mentions a chat template means the model is
/// a base model; the caller retries against plain completions.
fn is_chat_template_error(response: &ForwardResponse) -> bool {
    if response.ok || response.status != 400 {
        return false;
    }
    let Some(body) = response.json() else {
        return false;
    };
    let mut text = body
        .get("detail")
        .map(|v| v.to_string())
        .unwrap_or_default();
    if let Some(message) = body
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
    {
        text.push(' ');
        text.push_str(message);
    }
    text.to_lowercase().contains("chat template")
}

fn parse_completion(
    service_id: &str,
    endpoint: &Endpoint,
    response: &ForwardResponse,
    endpoint_used: &'static str,
) -> Result<PromptOutcome, Error> {
    if !response.ok {
        return Err(Error::Upstream {
            status: response.status,
            body: response.body.chars().take(500).collect(),
        });
    }
    let body = response.json().ok_or_else(|| Error::Upstream {
        status: response.status,
        body: "non-JSON completion response".to_string(),
    })?;
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| Error::Upstream {
            status: response.status,
            body: "no choices in completion response".to_string(),
        })?;
    let content = match endpoint_used {
        "chat" => choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str()),
        _ => choice.get("text").and_then(|t| t.as_str()),
    }
    .ok_or_else(|| Error::Upstream {
        status: response.status,
        body: "no generated text in completion response".to_string(),
    })?;

    Ok(PromptOutcome {
        success: true,
        response: content.to_string(),
        service_id: service_id.to_string(),
        endpoint: endpoint.url(),
        endpoint_used,
        usage: body.get("usage").cloned().unwrap_or(serde_json::json!({})),
        routed_to: None,
        group_id: None,
    })
}

/// All model ids out of a `/v1/models` response, tolerating the id
/// list and object list shapes.
fn collect_model_ids(body: &serde_json::Value) -> Vec<String> {
    let candidates = body
        .get("data")
        .or_else(|| body.get("models"))
        .or_else(|| body.get("served_models"));
    let Some(items) = candidates.and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            serde_json::Value::String(s) => Some(s.clone()),
            other => other
                .get("id")
                .or_else(|| other.get("model"))
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_template_error_detection() {
        let hit = ForwardResponse {
            ok: false,
            status: 400,
            body: r#"{"detail": "default chat template is no longer allowed"}"#.to_string(),
        };
        assert!(is_chat_template_error(&hit));

        let nested = ForwardResponse {
            ok: false,
            status: 400,
            body: r#"{"error": {"message": "Chat Template missing"}}"#.to_string(),
        };
        assert!(is_chat_template_error(&nested));

        let other_400 = ForwardResponse {
            ok: false,
            status: 400,
            body: r#"{"detail": "bad params"}"#.to_string(),
        };
        assert!(!is_chat_template_error(&other_400));

        let not_400 = ForwardResponse {
            ok: false,
            status: 500,
            body: r#"{"detail": "chat template"}"#.to_string(),
        };
        assert!(!is_chat_template_error(&not_400));
    }

    #[test]
    fn model_id_collection_tolerates_shapes() {
        let openai = serde_json::json!({"object": "list", "data": [{"id": "gpt2"}]});
        let bare = serde_json::json!({"models": ["a", "b"]});
        assert_eq!(collect_model_ids(&openai), vec!["gpt2"]);
        assert_eq!(collect_model_ids(&bare), vec!["a", "b"]);
        assert!(collect_model_ids(&serde_json::json!({})).is_empty());
    }
}
