// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Control plane for AI workloads on a batch-scheduled cluster.
//!
//! The orchestrator owns all service, replica-group and endpoint
//! state. It translates recipes into batch submissions, tracks job
//! lifecycles, discovers the compute-node endpoints services come up
//! on, probes them for readiness, and routes data-plane traffic
//! (prompts, vector operations, metric scrapes) to the right replica.
//!
//! One instance is constructed in `main` and shared behind an `Arc`;
//! there is no global state. All registries sit behind a single
//! coarse lock that is never held across a suspension point.

use chrono::Utc;
use gridserve_batch::{BatchClient, JobDescription, JobState, SubmitPayload};
use gridserve_config::recipe::ServiceConfig;
use gridserve_config::script::{ScriptPaths, build_job_script};
use gridserve_config::store::RecipeStore;
use gridserve_config::{GroupId, ServiceId};
use gridserve_transport::{ComputeHttp, Tunnel};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub mod endpoints;
pub mod error;
pub mod inference;
pub mod loadgen;
pub mod metrics;
pub mod readiness;
pub mod registry;
pub mod vector;

pub use error::Error;
pub use registry::{
    EndpointRegistration, GroupHealth, NodeJob, Registry, Replica, ReplicaGroup, ReplicaStatus,
    ServiceRecord, ServiceStatus,
};

/// Base data-plane timeout in seconds.
pub const BASE_TIMEOUT_SECS: u64 = 30;
/// Additional timeout per node beyond the first; multi-node tensor
/// parallelism needs time for collective communication.
pub const TIMEOUT_PER_EXTRA_NODE_SECS: u64 = 30;
/// Readiness-probe timeout used by the background loop.
pub const PROBE_TIMEOUT_SECS: u64 = 5;
/// Readiness-probe timeout used on the request path.
pub const ON_DEMAND_PROBE_TIMEOUT_SECS: u64 = 8;
/// Model-name cache time-to-live.
pub const MODEL_CACHE_TTL_SECS: u64 = 3600;

/// Deployment-level knobs the orchestrator needs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Cluster user name (exported into every job environment).
    pub username: String,
    /// Default account for submissions.
    pub account: String,
    /// Remote base path for scripts, containers and logs.
    pub remote_base_path: String,
    /// Remote recipes directory (definitions and images).
    pub remote_recipes_dir: String,
    /// Remote directory receiving job logs.
    pub remote_log_dir: String,
}

#[derive(Debug, Clone)]
pub(crate) struct ModelCacheEntry {
    pub model: String,
    pub endpoint: String,
    pub cached_at: Instant,
}

/// The control plane. See the crate docs for ownership rules.
pub struct Orchestrator {
    pub(crate) config: OrchestratorConfig,
    pub(crate) recipes: Arc<RecipeStore>,
    pub(crate) batch: BatchClient,
    pub(crate) http: Arc<dyn ComputeHttp>,
    pub(crate) tunnel: Arc<Tunnel>,
    pub(crate) registry: Mutex<Registry>,
    pub(crate) model_cache: Mutex<HashMap<ServiceId, ModelCacheEntry>>,
}

/// View of one service, as served by the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceView {
    /// Service id.
    pub id: ServiceId,
    /// Display name.
    pub name: String,
    /// Canonical recipe path.
    pub recipe_name: String,
    /// Lifecycle state.
    pub status: ServiceStatus,
    /// Config snapshot as submitted.
    pub config: ServiceConfig,
    /// Submission time (RFC 3339).
    pub created_at: String,
    /// Allocation node count.
    pub node_count: u32,
    /// Resolved endpoint, when running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// View of one replica group.
#[derive(Debug, Clone, Serialize)]
pub struct GroupView {
    /// Group id.
    pub id: GroupId,
    /// Canonical recipe path.
    pub recipe_name: String,
    /// Aggregated health.
    pub status: GroupHealth,
    /// Config snapshot.
    pub config: ServiceConfig,
    /// Jobs backing the group.
    pub node_jobs: Vec<NodeJob>,
    /// Ordered replicas.
    pub replicas: Vec<Replica>,
    /// Replica count.
    pub total_replicas: u32,
    /// Replicas per node.
    pub replicas_per_node: u32,
    /// Creation time (RFC 3339).
    pub created_at: String,
}

/// Either kind of tracked entity.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServiceInfo {
    /// A single service.
    Service(ServiceView),
    /// A replica group.
    Group(GroupView),
}

/// Aggregated status document for a group.
#[derive(Debug, Clone, Serialize)]
pub struct GroupStatusView {
    /// Group id.
    pub group_id: GroupId,
    /// Aggregated health.
    pub overall_status: GroupHealth,
    /// Replica count.
    pub total_replicas: usize,
    /// Replicas serving.
    pub healthy_replicas: usize,
    /// Replicas probing.
    pub starting_replicas: usize,
    /// Replicas waiting for their job.
    pub pending_replicas: usize,
    /// Replicas failed or cancelled.
    pub failed_replicas: usize,
}

/// Result of a submission.
#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    /// Always "submitted".
    pub status: &'static str,
    /// The batch job id.
    pub job_id: String,
    /// Group id, when the recipe launches a replica group.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    /// The registered service or group.
    pub service: ServiceInfo,
}

/// Result of a stop request.
#[derive(Debug, Clone, Serialize)]
pub struct StopOutcome {
    /// "cancelled", "success" or "partial".
    pub status: String,
    /// The id that was stopped.
    pub service_id: String,
    /// Jobs cancelled (groups only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped: Option<usize>,
    /// Jobs that could not be cancelled (groups only).
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub failed: Vec<String>,
}

impl Orchestrator {
    /// Builds the orchestrator. Called once from `main`.
    pub fn new(
        config: OrchestratorConfig,
        recipes: Arc<RecipeStore>,
        batch: BatchClient,
        http: Arc<dyn ComputeHttp>,
        tunnel: Arc<Tunnel>,
    ) -> Self {
        Self {
            config,
            recipes,
            batch,
            http,
            tunnel,
            registry: Mutex::new(Registry::default()),
            model_cache: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Timeout for a data-plane call, scaled with the allocation size.
    pub(crate) fn data_plane_timeout(&self, service_id: &str) -> Duration {
        let nodes = {
            let registry = self.lock_registry();
            registry
                .services
                .get(service_id)
                .map(|s| s.node_count)
                .unwrap_or(1)
        };
        let extra = nodes.saturating_sub(1) as u64 * TIMEOUT_PER_EXTRA_NODE_SECS;
        Duration::from_secs(BASE_TIMEOUT_SECS + extra)
    }

    // ===== Service management =====

    /// Loads and merges the recipe, submits the job, and registers
    /// either a service or a replica group. The returned id is
    /// resolvable for reads before this function returns.
    pub async fn start_service(
        &self,
        recipe_name: &str,
        config: ServiceConfig,
    ) -> Result<StartOutcome, Error> {
        let recipe = self.recipes.load(recipe_name)?;
        let merged = recipe.merge_config(&config);
        merged.validate()?;
        let canonical = recipe.canonical_name();

        let paths = ScriptPaths::for_recipe(
            &merged,
            &self.config.remote_base_path,
            &self.config.remote_recipes_dir,
        );
        let script = build_job_script(&merged, &paths);

        let mut environment = vec![format!("USER={}", self.config.username)];
        environment.extend(merged.environment.iter().map(|(k, v)| format!("{k}={v}")));

        let job = JobDescription {
            account: config
                .account
                .clone()
                .unwrap_or_else(|| self.config.account.clone()),
            qos: "short".to_string(),
            time_limit: merged.resources.time_limit,
            current_working_directory: self.config.remote_log_dir.clone(),
            name: merged.name.clone(),
            nodes: merged.resources.nodes,
            cpus_per_task: merged.resources.cpu,
            memory_per_cpu: merged.resources.memory.clone(),
            partition: if merged.resources.gpu > 0 { "gpu" } else { "cpu" }.to_string(),
            standard_output: format!("{}_%j.out", merged.name),
            standard_error: format!("{}_%j.err", merged.name),
            environment,
        };

        let job_id = self.batch.submit(&SubmitPayload { script, job }).await?;

        if merged.is_replica_group() {
            let view = self.register_group(&job_id, &canonical, &merged, config);
            info!(group_id = %view.id, job_id = %job_id, replicas = view.total_replicas,
                "replica group registered");
            Ok(StartOutcome {
                status: "submitted",
                job_id,
                group_id: Some(view.id.clone()),
                service: ServiceInfo::Group(view),
            })
        } else {
            let record = ServiceRecord {
                id: job_id.clone(),
                name: format!("{canonical}-{job_id}"),
                recipe_name: canonical,
                category: merged.category,
                status: ServiceStatus::Pending,
                config,
                created_at: Utc::now(),
                node_count: merged.resources.nodes,
                last_healthy: None,
            };
            let view = service_view(&record, None);
            let _ = self
                .lock_registry()
                .services
                .insert(job_id.clone(), record);
            info!(service_id = %job_id, "service registered");
            Ok(StartOutcome {
                status: "submitted",
                job_id,
                group_id: None,
                service: ServiceInfo::Service(view),
            })
        }
    }

    fn register_group(
        &self,
        job_id: &str,
        canonical: &str,
        merged: &gridserve_config::recipe::Recipe,
        config: ServiceConfig,
    ) -> GroupView {
        let replicas_per_node = merged.replicas_per_node();
        let base_port = merged.effective_base_port();
        let gpu_per_replica = merged.gpu_per_replica.unwrap_or(1);
        let group_id = format!("sg-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);

        let mut replicas = Vec::new();
        let mut replica_idx = 0u32;
        for node_idx in 0..merged.resources.nodes {
            for gpu_slot in 0..replicas_per_node {
                let port = base_port + replica_idx as u16;
                replicas.push(Replica {
                    id: format!("{job_id}:{port}"),
                    job_id: job_id.to_string(),
                    node_index: node_idx,
                    replica_index: replica_idx,
                    gpu_id: gpu_slot * gpu_per_replica,
                    port,
                    status: ReplicaStatus::Starting,
                    added_at: Utc::now(),
                });
                replica_idx += 1;
            }
        }

        let group = ReplicaGroup {
            id: group_id.clone(),
            recipe_name: canonical.to_string(),
            category: merged.category,
            config,
            node_jobs: (0..merged.resources.nodes)
                .map(|node_index| NodeJob {
                    job_id: job_id.to_string(),
                    node_index,
                    node: None,
                })
                .collect(),
            replicas,
            replicas_per_node,
            cancelled: false,
            created_at: Utc::now(),
        };
        let view = group_view(&group);
        let _ = self.lock_registry().groups.insert(group_id, group);
        view
    }

    /// Stops a service or replica group. Idempotent.
    pub async fn stop_service(&self, service_id: &str) -> Result<StopOutcome, Error> {
        if service_id.starts_with("sg-") {
            return self.stop_group(service_id).await;
        }
        {
            let registry = self.lock_registry();
            if !registry.services.contains_key(service_id) {
                return Err(Error::NotFound {
                    what: "service",
                    id: service_id.to_string(),
                });
            }
        }
        self.batch.cancel(service_id).await?;
        {
            let mut registry = self.lock_registry();
            if let Some(service) = registry.services.get_mut(service_id) {
                service.status = ServiceStatus::Cancelled;
            }
            let _ = registry.endpoints.shift_remove(service_id);
        }
        info!(service_id, "service cancelled");
        Ok(StopOutcome {
            status: "cancelled".to_string(),
            service_id: service_id.to_string(),
            stopped: None,
            failed: Vec::new(),
        })
    }

    /// Stops every job backing a group and marks group and replicas
    /// cancelled. Partial cancellation is reported, not hidden.
    pub async fn stop_group(&self, group_id: &str) -> Result<StopOutcome, Error> {
        let job_ids = {
            let registry = self.lock_registry();
            let group = registry.groups.get(group_id).ok_or_else(|| Error::NotFound {
                what: "service group",
                id: group_id.to_string(),
            })?;
            group.job_ids()
        };

        let mut stopped = 0usize;
        let mut failed = Vec::new();
        for job_id in &job_ids {
            match self.batch.cancel(job_id).await {
                Ok(()) => stopped += 1,
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "group job cancellation failed");
                    failed.push(job_id.clone());
                }
            }
        }

        {
            let mut registry = self.lock_registry();
            if let Some(group) = registry.groups.get_mut(group_id) {
                group.cancelled = true;
                for replica in &mut group.replicas {
                    replica.status = ReplicaStatus::Cancelled;
                }
            }
            let replica_ids: Vec<String> = registry
                .groups
                .get(group_id)
                .map(|g| g.replicas.iter().map(|r| r.id.clone()).collect())
                .unwrap_or_default();
            for id in replica_ids {
                if let Some(service) = registry.services.get_mut(&id) {
                    service.status = ServiceStatus::Cancelled;
                }
                let _ = registry.endpoints.shift_remove(&id);
            }
        }

        info!(group_id, stopped, failed = failed.len(), "service group stopped");
        Ok(StopOutcome {
            status: if failed.is_empty() { "success" } else { "partial" }.to_string(),
            service_id: group_id.to_string(),
            stopped: Some(stopped),
            failed,
        })
    }

    /// Returns one service or group, refreshing a non-terminal
    /// service's status from the scheduler.
    pub async fn get_service(&self, service_id: &str) -> Result<ServiceInfo, Error> {
        if let Some(view) = self.group_view_by_id(service_id) {
            return Ok(ServiceInfo::Group(view));
        }

        let (mut record, endpoint) = {
            let registry = self.lock_registry();
            let record = registry.services.get(service_id).cloned().ok_or_else(|| {
                Error::NotFound {
                    what: "service",
                    id: service_id.to_string(),
                }
            })?;
            let endpoint = registry.endpoints.get(service_id).map(|e| e.url.clone());
            (record, endpoint)
        };

        if !record.status.is_terminal() && !record.id.contains(':') {
            if let Ok(state) = self.batch.status(&record.id).await {
                let refreshed = ServiceStatus::from_job_state(state, record.status);
                if refreshed != record.status {
                    record.status = refreshed;
                    let mut registry = self.lock_registry();
                    if let Some(stored) = registry.services.get_mut(service_id) {
                        stored.status = refreshed;
                    }
                }
            }
        }

        let endpoint = match endpoint {
            Some(url) => Some(url),
            None if matches!(record.status, ServiceStatus::Running | ServiceStatus::Ready) => self
                .resolve_endpoint(service_id)
                .await
                .ok()
                .map(|e| e.url()),
            None => None,
        };
        Ok(ServiceInfo::Service(service_view(&record, endpoint)))
    }

    /// Lists all services, refreshing non-terminal statuses.
    pub async fn list_services(&self) -> Vec<ServiceView> {
        let snapshot: Vec<ServiceRecord> = {
            let registry = self.lock_registry();
            registry.services.values().cloned().collect()
        };

        let mut views = Vec::with_capacity(snapshot.len());
        for mut record in snapshot {
            if !record.status.is_terminal() && !record.id.contains(':') {
                if let Ok(state) = self.batch.status(&record.id).await {
                    let refreshed = ServiceStatus::from_job_state(state, record.status);
                    if refreshed != record.status {
                        record.status = refreshed;
                        let mut registry = self.lock_registry();
                        if let Some(stored) = registry.services.get_mut(&record.id) {
                            stored.status = refreshed;
                        }
                    }
                }
            }
            let endpoint = {
                let registry = self.lock_registry();
                registry.endpoints.get(&record.id).map(|e| e.url.clone())
            };
            views.push(service_view(&record, endpoint));
        }
        views
    }

    /// Canonical status of a service or group.
    pub async fn service_status(&self, service_id: &str) -> Result<serde_json::Value, Error> {
        if let Some(status) = self.group_status_by_id(service_id) {
            return Ok(serde_json::json!({ "status": status.overall_status }));
        }
        let record = {
            let registry = self.lock_registry();
            registry.services.get(service_id).cloned()
        }
        .ok_or_else(|| Error::NotFound {
            what: "service",
            id: service_id.to_string(),
        })?;

        if record.status.is_terminal() || record.id.contains(':') {
            return Ok(serde_json::json!({ "status": record.status }));
        }
        let state = self.batch.status(&record.id).await.unwrap_or(JobState::Unknown);
        let status = ServiceStatus::from_job_state(state, record.status);
        Ok(serde_json::json!({ "status": status }))
    }

    /// Cancels a raw job id. Same path as stopping the service.
    pub async fn cancel_job(&self, job_id: &str) -> Result<StopOutcome, Error> {
        match self.stop_service(job_id).await {
            Err(Error::NotFound { .. }) => {
                // Jobs submitted out of band can still be cancelled.
                self.batch.cancel(job_id).await?;
                Ok(StopOutcome {
                    status: "cancelled".to_string(),
                    service_id: job_id.to_string(),
                    stopped: None,
                    failed: Vec::new(),
                })
            }
            other => other,
        }
    }

    /// Tails the stdout/stderr pair of a service's job over the
    /// control channel. Diagnostic only; never used to infer state.
    pub async fn service_logs(&self, service_id: &str) -> Result<String, Error> {
        let record = {
            let registry = self.lock_registry();
            registry.services.get(service_id).cloned()
        }
        .ok_or_else(|| Error::NotFound {
            what: "service",
            id: service_id.to_string(),
        })?;

        let short_name = record
            .recipe_name
            .rsplit('/')
            .next()
            .unwrap_or(&record.recipe_name);
        let job_id = record.id.split(':').next().unwrap_or(&record.id);
        let stdout = format!("{}/{}_{}.out", self.config.remote_log_dir, short_name, job_id);
        let stderr = format!("{}/{}_{}.err", self.config.remote_log_dir, short_name, job_id);

        let command = format!(
            "echo '=== STDOUT (last 200 lines) ==='; tail -n 200 {stdout} 2>/dev/null || echo 'Log not yet available'; \
             echo; echo '=== STDERR (last 100 lines) ==='; tail -n 100 {stderr} 2>/dev/null || echo 'No errors logged'"
        );
        let out = self
            .tunnel
            .execute(&command, Duration::from_secs(15))
            .await?;
        Ok(out.stdout)
    }

    /// Registers an endpoint explicitly, marking the service running.
    pub fn register_endpoint(
        &self,
        service_id: &str,
        host: &str,
        port: u16,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> EndpointRegistration {
        let registration = EndpointRegistration {
            service_id: service_id.to_string(),
            host: host.to_string(),
            port,
            url: format!("http://{host}:{port}"),
            registered_at: Utc::now(),
            metadata,
        };
        let mut registry = self.lock_registry();
        if let Some(service) = registry.services.get_mut(service_id) {
            if !service.status.is_terminal() && service.status != ServiceStatus::Ready {
                service.status = ServiceStatus::Running;
            }
        }
        let _ = registry
            .endpoints
            .insert(service_id.to_string(), registration.clone());
        info!(service_id, url = %registration.url, "endpoint registered");
        registration
    }

    /// Drops an endpoint registration.
    pub fn unregister_endpoint(&self, service_id: &str) -> bool {
        self.lock_registry()
            .endpoints
            .shift_remove(service_id)
            .is_some()
    }

    // ===== Groups =====

    /// Lists all replica groups.
    pub fn list_groups(&self) -> Vec<GroupView> {
        let registry = self.lock_registry();
        registry.groups.values().map(group_view).collect()
    }

    /// Returns one group.
    pub fn get_group(&self, group_id: &str) -> Result<GroupView, Error> {
        self.group_view_by_id(group_id).ok_or_else(|| Error::NotFound {
            what: "service group",
            id: group_id.to_string(),
        })
    }

    /// Aggregated status of one group.
    pub fn group_status(&self, group_id: &str) -> Result<GroupStatusView, Error> {
        self.group_status_by_id(group_id).ok_or_else(|| Error::NotFound {
            what: "service group",
            id: group_id.to_string(),
        })
    }

    fn group_view_by_id(&self, group_id: &str) -> Option<GroupView> {
        let registry = self.lock_registry();
        registry.groups.get(group_id).map(group_view)
    }

    fn group_status_by_id(&self, group_id: &str) -> Option<GroupStatusView> {
        let registry = self.lock_registry();
        let group = registry.groups.get(group_id)?;
        let mut status = GroupStatusView {
            group_id: group.id.clone(),
            overall_status: group.health(),
            total_replicas: group.replicas.len(),
            healthy_replicas: 0,
            starting_replicas: 0,
            pending_replicas: 0,
            failed_replicas: 0,
        };
        for replica in &group.replicas {
            match replica.status {
                ReplicaStatus::Running | ReplicaStatus::Ready => status.healthy_replicas += 1,
                ReplicaStatus::Starting => status.starting_replicas += 1,
                ReplicaStatus::Failed | ReplicaStatus::Cancelled => status.failed_replicas += 1,
            }
        }
        Some(status)
    }

    // ===== Recipes =====

    /// Lists every loadable recipe.
    pub fn list_recipes(&self) -> Vec<serde_json::Value> {
        self.recipes
            .list_all()
            .iter()
            .map(|r| recipe_summary(r))
            .collect()
    }

    /// Returns one recipe by bare or canonical name.
    pub fn get_recipe(&self, name: &str) -> Result<serde_json::Value, Error> {
        let recipe = self.recipes.load(name)?;
        Ok(recipe_summary(&recipe))
    }

    /// Number of tracked services (replicas included).
    pub fn service_count(&self) -> usize {
        self.lock_registry().services.len()
    }

    // ===== Health bookkeeping =====

    pub(crate) fn mark_service_healthy(&self, service_id: &str) {
        let mut registry = self.lock_registry();
        if let Some(service) = registry.services.get_mut(service_id) {
            service.last_healthy = Some(Instant::now());
        }
    }

    pub(crate) fn invalidate_service_health(&self, service_id: &str) {
        let mut registry = self.lock_registry();
        if let Some(service) = registry.services.get_mut(service_id) {
            service.last_healthy = None;
        }
    }

    pub(crate) fn is_recently_healthy(&self, service_id: &str) -> bool {
        let registry = self.lock_registry();
        registry
            .services
            .get(service_id)
            .map(ServiceRecord::is_recently_healthy)
            .unwrap_or(false)
    }

    pub(crate) fn cached_model(&self, service_id: &str, endpoint: &str) -> Option<String> {
        let cache = self.model_cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.get(service_id).and_then(|entry| {
            let fresh = entry.cached_at.elapsed().as_secs() < MODEL_CACHE_TTL_SECS;
            (fresh && entry.endpoint == endpoint).then(|| entry.model.clone())
        })
    }

    pub(crate) fn cache_model(&self, service_id: &str, endpoint: &str, model: &str) {
        let mut cache = self.model_cache.lock().unwrap_or_else(|e| e.into_inner());
        let _ = cache.insert(
            service_id.to_string(),
            ModelCacheEntry {
                model: model.to_string(),
                endpoint: endpoint.to_string(),
                cached_at: Instant::now(),
            },
        );
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("account", &self.config.account)
            .finish_non_exhaustive()
    }
}

pub(crate) fn service_view(record: &ServiceRecord, endpoint: Option<String>) -> ServiceView {
    ServiceView {
        id: record.id.clone(),
        name: record.name.clone(),
        recipe_name: record.recipe_name.clone(),
        status: record.status,
        config: record.config.clone(),
        created_at: record.created_at.to_rfc3339(),
        node_count: record.node_count,
        endpoint,
    }
}

pub(crate) fn group_view(group: &ReplicaGroup) -> GroupView {
    GroupView {
        id: group.id.clone(),
        recipe_name: group.recipe_name.clone(),
        status: group.health(),
        config: group.config.clone(),
        node_jobs: group.node_jobs.clone(),
        replicas: group.replicas.clone(),
        total_replicas: group.replicas.len() as u32,
        replicas_per_node: group.replicas_per_node,
        created_at: group.created_at.to_rfc3339(),
    }
}

fn recipe_summary(recipe: &gridserve_config::recipe::Recipe) -> serde_json::Value {
    let mut summary = serde_json::json!({
        "name": &recipe.name,
        "category": recipe.category,
        "version": &recipe.version,
        "description": &recipe.description,
        "ports": &recipe.ports,
        "resources": &recipe.resources,
        "path": &recipe.path,
    });
    if let Some(image) = &recipe.image {
        summary["image"] = serde_json::json!(image);
    }
    if recipe.is_replica_group() {
        summary["gpu_per_replica"] = serde_json::json!(recipe.gpu_per_replica);
        summary["replicas_per_node"] = serde_json::json!(recipe.replicas_per_node());
        summary["base_port"] = serde_json::json!(recipe.effective_base_port());
    }
    summary
}
