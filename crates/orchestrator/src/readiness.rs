// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Background readiness loop.
//!
//! One cooperative task, 10 s tick. Every replica that is not yet
//! probe-confirmed gets checked: the scheduler gate first (pending
//! jobs are skipped; anything else is probed, since a replica can
//! outlive its job record), then an HTTP GET against the category's
//! probe path. Failures leave the replica in `starting`; the loop
//! never terminates the process.

use crate::endpoints::Endpoint;
use crate::registry::{ReplicaStatus, ServiceRecord, ServiceStatus};
use crate::{Orchestrator, error::Error};
use chrono::Utc;
use gridserve_batch::JobState;
use gridserve_config::Category;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Loop period.
pub const READINESS_TICK_SECS: u64 = 10;

/// Spawns the readiness loop. The task exits when the token fires.
pub fn spawn_readiness_loop(
    orchestrator: Arc<Orchestrator>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(READINESS_TICK_SECS));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("readiness loop stopping");
                    break;
                }
                _ = tick.tick() => {
                    if let Err(e) = orchestrator.check_replica_groups().await {
                        // Background failures are logged, never fatal.
                        warn!(error = %e, "readiness pass failed");
                    }
                }
            }
        }
    })
}

/// Shape check of a probe response body, per category.
pub(crate) fn probe_body_ready(category: Category, body: Option<&serde_json::Value>) -> bool {
    match category {
        Category::Inference => body.is_some_and(|v| {
            v.get("object").and_then(|o| o.as_str()) == Some("list")
                && v.get("data").is_some_and(serde_json::Value::is_array)
        }),
        Category::VectorDb => {
            body.is_some_and(|v| v.get("result").is_some() || v.get("collections").is_some())
        }
        Category::Storage => true,
    }
}

/// First model id out of a `/v1/models` response.
pub(crate) fn first_model_id(body: &serde_json::Value) -> Option<String> {
    let data = body.get("data")?.as_array()?;
    match data.first()? {
        serde_json::Value::String(s) => Some(s.clone()),
        item => item.get("id").and_then(|v| v.as_str()).map(str::to_string),
    }
}

impl Orchestrator {
    /// One pass over every replica of every live group.
    pub async fn check_replica_groups(&self) -> Result<(), Error> {
        let pending: Vec<(String, String, Category, crate::registry::Replica)> = {
            let registry = self.lock_registry();
            registry
                .groups
                .values()
                .filter(|g| !g.cancelled)
                .flat_map(|g| {
                    g.replicas
                        .iter()
                        .filter(|r| {
                            !matches!(r.status, ReplicaStatus::Ready | ReplicaStatus::Cancelled)
                        })
                        .map(|r| (g.id.clone(), g.recipe_name.clone(), g.category, r.clone()))
                })
                .collect()
        };
        if pending.is_empty() {
            return Ok(());
        }
        debug!(count = pending.len(), "checking replicas");

        for (group_id, recipe_name, category, replica) in pending {
            if let Err(e) = self
                .check_replica(&group_id, &recipe_name, category, &replica)
                .await
            {
                // Normal during startup; keep the replica in `starting`.
                debug!(replica = %replica.id, error = %e, "replica not ready yet");
            }
        }
        Ok(())
    }

    async fn check_replica(
        &self,
        group_id: &str,
        recipe_name: &str,
        category: Category,
        replica: &crate::registry::Replica,
    ) -> Result<(), Error> {
        // Scheduler gate: a pending job cannot be serving. Any other
        // state is worth probing, because replica processes can
        // outlive their job record.
        match self.batch.status(&replica.job_id).await {
            Ok(JobState::Pending) => return Ok(()),
            Ok(_) => {}
            Err(e) => {
                debug!(job_id = %replica.job_id, error = %e, "scheduler status unavailable");
                return Ok(());
            }
        }

        let Some(details) = self.batch.details(&replica.job_id).await? else {
            return Ok(());
        };
        let Some(node) = details
            .nodes
            .get(replica.node_index as usize)
            .or_else(|| details.nodes.first())
            .cloned()
        else {
            return Ok(());
        };

        let endpoint = Endpoint {
            host: node.clone(),
            port: replica.port,
        };
        let response = self.probe(&endpoint, category.probe_path()).await?;
        if !response.ok || !probe_body_ready(category, response.json().as_ref()) {
            return Ok(());
        }

        // Probe confirmed: promote the replica and publish its
        // endpoint so routing and monitoring can reach it.
        let model = if category == Category::Inference {
            response.json().as_ref().and_then(first_model_id)
        } else {
            None
        };
        if let Some(model) = &model {
            self.cache_model(&replica.id, &endpoint.url(), model);
        }

        {
            let mut registry = self.lock_registry();
            registry.set_replica_status(&replica.id, ReplicaStatus::Ready);
            if let Some(group) = registry.groups.get_mut(group_id) {
                if let Some(node_job) = group
                    .node_jobs
                    .iter_mut()
                    .find(|nj| nj.job_id == replica.job_id && nj.node_index == replica.node_index)
                {
                    node_job.node = Some(node.clone());
                }
            }
            let mut metadata = serde_json::Map::new();
            if let Some(model) = &model {
                let _ = metadata.insert("model".to_string(), serde_json::json!(model));
            }
            let _ = registry.endpoints.insert(
                replica.id.clone(),
                crate::registry::EndpointRegistration {
                    service_id: replica.id.clone(),
                    host: endpoint.host.clone(),
                    port: endpoint.port,
                    url: endpoint.url(),
                    registered_at: Utc::now(),
                    metadata,
                },
            );
            // Promoted replicas are addressable as services so the
            // data plane and metrics proxy can serve them directly.
            let _ = registry.services.entry(replica.id.clone()).or_insert_with(|| {
                ServiceRecord {
                    id: replica.id.clone(),
                    name: format!("{recipe_name}-{}", replica.id),
                    recipe_name: recipe_name.to_string(),
                    category,
                    status: ServiceStatus::Ready,
                    config: Default::default(),
                    created_at: replica.added_at,
                    node_count: 1,
                    last_healthy: None,
                }
            });
        }
        info!(replica = %replica.id, group = group_id, node = %node, port = replica.port,
            "replica ready");
        Ok(())
    }
}
