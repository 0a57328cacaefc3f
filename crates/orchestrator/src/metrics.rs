// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Per-service metrics proxy and scrape-target discovery.
//!
//! Metrics ride the same endpoint resolver and HTTP forward as the
//! data plane. Services whose process is not serving yet get a
//! synthesised text-format response carrying only a
//! `process_start_time_seconds` gauge, so monitoring sessions can
//! scrape a target from the moment it is submitted.

use crate::error::Error;
use crate::registry::ServiceStatus;
use crate::Orchestrator;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Timeout for a metrics scrape.
const METRICS_TIMEOUT_SECS: u64 = 10;

/// A metrics payload in Prometheus text format.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsOutcome {
    /// Always true; failures surface as errors.
    pub success: bool,
    /// Prometheus text-format body.
    pub metrics: String,
    /// The queried service.
    pub service_id: String,
    /// Source endpoint, or "synthetic".
    pub endpoint: String,
    /// Constant format marker.
    pub metrics_format: &'static str,
}

/// One file-sd entry of the targets document.
#[derive(Debug, Clone, Serialize)]
pub struct FileSdEntry {
    /// `host:port` targets.
    pub targets: Vec<String>,
    /// Stable labels for the entry.
    pub labels: serde_json::Value,
}

impl Orchestrator {
    /// Fetches (or synthesises) the metrics of one service.
    pub async fn service_metrics(&self, service_id: &str) -> Result<MetricsOutcome, Error> {
        {
            let registry = self.lock_registry();
            if registry.groups.contains_key(service_id) {
                return Err(Error::BadRequest {
                    reason: "metrics are per service; query individual replicas of the group"
                        .to_string(),
                });
            }
        }
        let record = {
            let registry = self.lock_registry();
            registry.services.get(service_id).cloned()
        }
        .ok_or_else(|| Error::NotFound {
            what: "service",
            id: service_id.to_string(),
        })?;

        // A process that has not come up yet still gets a target:
        // synthesise its start-time gauge from the submission time.
        if matches!(
            record.status,
            ServiceStatus::Pending | ServiceStatus::Building | ServiceStatus::Starting
        ) {
            debug!(service_id, status = %record.status, "synthesising metrics");
            return Ok(MetricsOutcome {
                success: true,
                metrics: synthetic_metrics(record.created_at.timestamp()),
                service_id: service_id.to_string(),
                endpoint: "synthetic".to_string(),
                metrics_format: "prometheus_text_format",
            });
        }
        if record.status.is_terminal() {
            return Err(Error::NotReady {
                reason: format!("service is {} and no longer serves metrics", record.status),
            });
        }

        let endpoint = self.resolve_endpoint(service_id).await?;
        let response = self
            .forward_get(&endpoint, "/metrics", Duration::from_secs(METRICS_TIMEOUT_SECS))
            .await?;
        if !response.ok {
            return Err(Error::Upstream {
                status: response.status,
                body: response.body.chars().take(200).collect(),
            });
        }
        Ok(MetricsOutcome {
            success: true,
            metrics: response.body,
            service_id: service_id.to_string(),
            endpoint: endpoint.url(),
            metrics_format: "prometheus_text_format",
        })
    }

    /// Prometheus file-sd document listing every tracked service via
    /// the gateway's proxied metrics paths.
    pub fn targets_document(&self, gateway_host_port: &str) -> Vec<FileSdEntry> {
        let registry = self.lock_registry();
        registry
            .services
            .values()
            .map(|record| FileSdEntry {
                targets: vec![gateway_host_port.to_string()],
                labels: serde_json::json!({
                    "job": &record.id,
                    "service_id": &record.id,
                    "recipe": &record.recipe_name,
                    "__metrics_path__": format!("/api/v1/services/{}/metrics", record.id),
                }),
            })
            .collect()
    }
}

/// Minimal text-format document for a not-yet-serving process.
fn synthetic_metrics(start_timestamp: i64) -> String {
    format!(
        "# HELP process_start_time_seconds Start time of the process since unix epoch in seconds.\n\
         # TYPE process_start_time_seconds gauge\n\
         process_start_time_seconds {start_timestamp}\n"
    )
}
