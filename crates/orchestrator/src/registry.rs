// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Service and replica-group registries.
//!
//! All registry state lives behind one coarse lock owned by the
//! orchestrator. The lock is never held across a suspension point;
//! callers snapshot what they need and re-acquire to write back.

use chrono::{DateTime, Utc};
use gridserve_batch::JobState;
use gridserve_config::recipe::ServiceConfig;
use gridserve_config::{Category, GroupId, JobId, ReplicaId, ServiceId};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;

/// Service lifecycle states.
///
/// `pending → building → starting → running → ready`, terminal
/// `failed`/`cancelled`/`completed`; any non-terminal state may jump
/// to `cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Submitted, not yet scheduled.
    Pending,
    /// Container image assembly.
    Building,
    /// Process launched, not yet accepting traffic.
    Starting,
    /// Scheduler reports running; probe not yet confirmed.
    Running,
    /// Probe confirmed; accepting traffic.
    Ready,
    /// Cancelled by request.
    Cancelled,
    /// Job failed.
    Failed,
    /// Job finished.
    Completed,
}

impl ServiceStatus {
    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServiceStatus::Cancelled | ServiceStatus::Failed | ServiceStatus::Completed
        )
    }

    /// Maps a scheduler state onto the service lifecycle, keeping a
    /// probe-confirmed `ready` from being downgraded while the job
    /// still runs.
    pub fn from_job_state(state: JobState, current: ServiceStatus) -> ServiceStatus {
        match state {
            JobState::Pending => ServiceStatus::Pending,
            JobState::Running => {
                if current == ServiceStatus::Ready {
                    ServiceStatus::Ready
                } else {
                    ServiceStatus::Running
                }
            }
            JobState::Completed => ServiceStatus::Completed,
            JobState::Failed => ServiceStatus::Failed,
            JobState::Cancelled => ServiceStatus::Cancelled,
            JobState::Unknown => current,
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceStatus::Pending => "pending",
            ServiceStatus::Building => "building",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Running => "running",
            ServiceStatus::Ready => "ready",
            ServiceStatus::Cancelled => "cancelled",
            ServiceStatus::Failed => "failed",
            ServiceStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Replica lifecycle states. A replica's state is independent of its
/// parent job's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaStatus {
    /// Pre-registered, process not yet confirmed.
    Starting,
    /// Served a request successfully.
    Running,
    /// Readiness probe confirmed.
    Ready,
    /// Last routed request failed.
    Failed,
    /// Parent job cancelled.
    Cancelled,
}

impl std::fmt::Display for ReplicaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReplicaStatus::Starting => "starting",
            ReplicaStatus::Running => "running",
            ReplicaStatus::Ready => "ready",
            ReplicaStatus::Failed => "failed",
            ReplicaStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One tracked service.
#[derive(Debug, Clone)]
pub struct ServiceRecord {
    /// Service id (the batch job id, or a composite replica id).
    pub id: ServiceId,
    /// Display name `{recipe_path}-{job_id}`.
    pub name: String,
    /// Canonical recipe path.
    pub recipe_name: String,
    /// Service category.
    pub category: Category,
    /// Lifecycle state.
    pub status: ServiceStatus,
    /// Config snapshot as submitted.
    pub config: ServiceConfig,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Node count of the allocation.
    pub node_count: u32,
    /// Last successful data-plane call; fresh values let the hot path
    /// skip readiness re-checks.
    pub last_healthy: Option<Instant>,
}

/// How long a data-plane success suppresses readiness re-checks.
pub const HEALTHY_WINDOW_SECS: u64 = 300;

impl ServiceRecord {
    /// Whether the 300 s fast-path window is still open.
    pub fn is_recently_healthy(&self) -> bool {
        self.last_healthy
            .is_some_and(|at| at.elapsed().as_secs() < HEALTHY_WINDOW_SECS)
    }
}

/// One replica of a group.
#[derive(Debug, Clone, Serialize)]
pub struct Replica {
    /// Composite id `{job_id}:{port}`.
    pub id: ReplicaId,
    /// Underlying batch job.
    pub job_id: JobId,
    /// Index of the node inside the group.
    pub node_index: u32,
    /// Index of the replica across the group.
    pub replica_index: u32,
    /// First GPU assigned on its node.
    pub gpu_id: u32,
    /// Serving port.
    pub port: u16,
    /// Replica state.
    pub status: ReplicaStatus,
    /// Registration time.
    pub added_at: DateTime<Utc>,
}

/// One job backing a group, with the node it landed on once known.
#[derive(Debug, Clone, Serialize)]
pub struct NodeJob {
    /// Batch job id.
    pub job_id: JobId,
    /// Node index inside the group.
    pub node_index: u32,
    /// Compute node name, filled in by the readiness loop.
    pub node: Option<String>,
}

/// A coordinated set of same-recipe replicas.
#[derive(Debug, Clone)]
pub struct ReplicaGroup {
    /// Group id (`sg-` prefixed).
    pub id: GroupId,
    /// Canonical recipe path.
    pub recipe_name: String,
    /// Service category.
    pub category: Category,
    /// Config snapshot.
    pub config: ServiceConfig,
    /// Jobs backing the group.
    pub node_jobs: Vec<NodeJob>,
    /// Ordered replicas.
    pub replicas: Vec<Replica>,
    /// Replicas per node at creation time.
    pub replicas_per_node: u32,
    /// Whether the group was explicitly stopped.
    pub cancelled: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Aggregated group health derived from replica states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupHealth {
    /// Every replica serving.
    Healthy,
    /// Some serving, some failed.
    Degraded,
    /// Some serving, rest still starting.
    Partial,
    /// Every replica failed.
    Failed,
    /// Nothing serving yet.
    Starting,
    /// Group stopped.
    Cancelled,
}

impl ReplicaGroup {
    /// Distinct job ids backing the group.
    pub fn job_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.node_jobs.iter().map(|nj| nj.job_id.clone()).collect();
        ids.dedup();
        ids
    }

    /// Counts replicas serving (running or probe-confirmed).
    pub fn healthy_count(&self) -> usize {
        self.replicas
            .iter()
            .filter(|r| matches!(r.status, ReplicaStatus::Running | ReplicaStatus::Ready))
            .count()
    }

    /// Aggregated health of the group.
    pub fn health(&self) -> GroupHealth {
        if self.cancelled {
            return GroupHealth::Cancelled;
        }
        let total = self.replicas.len();
        let healthy = self.healthy_count();
        let failed = self
            .replicas
            .iter()
            .filter(|r| matches!(r.status, ReplicaStatus::Failed | ReplicaStatus::Cancelled))
            .count();
        if total == 0 {
            GroupHealth::Starting
        } else if healthy == total {
            GroupHealth::Healthy
        } else if failed == total {
            GroupHealth::Failed
        } else if healthy > 0 && failed > 0 {
            GroupHealth::Degraded
        } else if healthy > 0 {
            GroupHealth::Partial
        } else {
            GroupHealth::Starting
        }
    }
}

/// A resolved endpoint registration.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointRegistration {
    /// Service or replica id.
    pub service_id: ServiceId,
    /// Compute node host.
    pub host: String,
    /// Serving port.
    pub port: u16,
    /// `http://host:port`.
    pub url: String,
    /// Registration time.
    pub registered_at: DateTime<Utc>,
    /// Free-form metadata (e.g. the served model).
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// All mutable registry state, guarded by the orchestrator's lock.
#[derive(Debug, Default)]
pub struct Registry {
    /// Services (including promoted replicas) by id.
    pub services: HashMap<ServiceId, ServiceRecord>,
    /// Replica groups by id.
    pub groups: HashMap<GroupId, ReplicaGroup>,
    /// Endpoint registrations, insertion-ordered.
    pub endpoints: IndexMap<ServiceId, EndpointRegistration>,
    /// Per-group round-robin cursors.
    pub cursors: HashMap<GroupId, usize>,
}

impl Registry {
    /// Looks up a replica across all groups.
    pub fn find_replica(&self, replica_id: &str) -> Option<(&ReplicaGroup, &Replica)> {
        self.groups.values().find_map(|g| {
            g.replicas.iter().find(|r| r.id == replica_id).map(|r| (g, r))
        })
    }

    /// Mutates one replica's status wherever it lives.
    pub fn set_replica_status(&mut self, replica_id: &str, status: ReplicaStatus) {
        for group in self.groups.values_mut() {
            if let Some(replica) = group.replicas.iter_mut().find(|r| r.id == replica_id) {
                replica.status = status;
            }
        }
    }

    /// Advances the round-robin cursor of a group and returns the
    /// replica it selects. The cursor moves atomically with the
    /// selection, under the registry lock.
    pub fn next_replica(&mut self, group_id: &str) -> Option<Replica> {
        let group = self.groups.get(group_id)?;
        if group.replicas.is_empty() {
            return None;
        }
        let cursor = self.cursors.entry(group_id.to_string()).or_insert(0);
        let replica = group.replicas[*cursor % group.replicas.len()].clone();
        *cursor = (*cursor + 1) % group.replicas.len();
        Some(replica)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica(id: &str, idx: u32, status: ReplicaStatus) -> Replica {
        Replica {
            id: id.to_string(),
            job_id: "100".to_string(),
            node_index: 0,
            replica_index: idx,
            gpu_id: idx,
            port: 8001 + idx as u16,
            status,
            added_at: Utc::now(),
        }
    }

    fn group_with(statuses: &[ReplicaStatus]) -> ReplicaGroup {
        ReplicaGroup {
            id: "sg-test".to_string(),
            recipe_name: "inference/vllm-replicas".to_string(),
            category: Category::Inference,
            config: ServiceConfig::default(),
            node_jobs: vec![NodeJob {
                job_id: "100".to_string(),
                node_index: 0,
                node: None,
            }],
            replicas: statuses
                .iter()
                .enumerate()
                .map(|(i, s)| replica(&format!("100:{}", 8001 + i), i as u32, *s))
                .collect(),
            replicas_per_node: statuses.len() as u32,
            cancelled: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn job_state_mapping_preserves_ready() {
        assert_eq!(
            ServiceStatus::from_job_state(JobState::Running, ServiceStatus::Ready),
            ServiceStatus::Ready
        );
        assert_eq!(
            ServiceStatus::from_job_state(JobState::Running, ServiceStatus::Pending),
            ServiceStatus::Running
        );
        assert_eq!(
            ServiceStatus::from_job_state(JobState::Cancelled, ServiceStatus::Ready),
            ServiceStatus::Cancelled
        );
    }

    #[test]
    fn group_health_aggregation() {
        use ReplicaStatus::*;
        assert_eq!(group_with(&[Running, Ready]).health(), GroupHealth::Healthy);
        assert_eq!(group_with(&[Failed, Failed]).health(), GroupHealth::Failed);
        assert_eq!(group_with(&[Running, Failed]).health(), GroupHealth::Degraded);
        assert_eq!(group_with(&[Running, Starting]).health(), GroupHealth::Partial);
        assert_eq!(group_with(&[Starting, Starting]).health(), GroupHealth::Starting);

        let mut g = group_with(&[Running, Running]);
        g.cancelled = true;
        assert_eq!(g.health(), GroupHealth::Cancelled);
    }

    #[test]
    fn round_robin_cycles_over_all_replicas() {
        use ReplicaStatus::*;
        let mut registry = Registry::default();
        let group = group_with(&[Starting, Failed, Running, Starting]);
        let _ = registry.groups.insert(group.id.clone(), group);

        let picks: Vec<String> = (0..6)
            .map(|_| registry.next_replica("sg-test").expect("replica").id)
            .collect();
        // The cursor walks the full list, including unhealthy members,
        // and wraps.
        assert_eq!(picks[0], "100:8001");
        assert_eq!(picks[1], "100:8002");
        assert_eq!(picks[2], "100:8003");
        assert_eq!(picks[3], "100:8004");
        assert_eq!(picks[4], "100:8001");
        assert_eq!(picks[5], "100:8002");
    }

    #[test]
    fn healthy_window_expires() {
        let record = ServiceRecord {
            id: "1".into(),
            name: "x-1".into(),
            recipe_name: "inference/x".into(),
            category: Category::Inference,
            status: ServiceStatus::Ready,
            config: ServiceConfig::default(),
            created_at: Utc::now(),
            node_count: 1,
            last_healthy: Some(Instant::now()),
        };
        assert!(record.is_recently_healthy());
        let stale = ServiceRecord {
            last_healthy: None,
            ..record
        };
        assert!(!stale.is_recently_healthy());
    }
}
