// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Endpoint resolution.
//!
//! Resolution order: an explicit registration wins; otherwise the
//! scheduler's allocation is queried and the first assigned node is
//! combined with the recipe's default port (or, for a composite
//! replica id, the port embedded in the id). Failures are never
//! cached.

use crate::error::Error;
use crate::{Orchestrator, PROBE_TIMEOUT_SECS};
use gridserve_transport::ForwardRequest;
use std::time::Duration;
use tracing::debug;

/// A resolved `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Compute node host name.
    pub host: String,
    /// Serving port.
    pub port: u16,
}

impl Endpoint {
    /// `http://host:port`.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl Orchestrator {
    /// Resolves the endpoint of a service or replica.
    pub async fn resolve_endpoint(&self, service_id: &str) -> Result<Endpoint, Error> {
        // 1. An existing registration wins.
        {
            let registry = self.lock_registry();
            if let Some(reg) = registry.endpoints.get(service_id) {
                return Ok(Endpoint {
                    host: reg.host.clone(),
                    port: reg.port,
                });
            }
        }

        // 2. Ask the scheduler for the allocation.
        let details = self
            .batch
            .details(service_id)
            .await?
            .ok_or_else(|| Error::NotReady {
                reason: format!("job for '{service_id}' not known to the scheduler yet"),
            })?;
        if details.nodes.is_empty() {
            return Err(Error::NotReady {
                reason: format!("no node allocated for '{service_id}' yet"),
            });
        }

        // Prefer the replica's own node when the group knows it.
        let node_index = {
            let registry = self.lock_registry();
            registry
                .find_replica(service_id)
                .map(|(_, replica)| replica.node_index as usize)
                .unwrap_or(0)
        };
        let host = details
            .nodes
            .get(node_index)
            .or_else(|| details.nodes.first())
            .cloned()
            .ok_or_else(|| Error::NotReady {
                reason: format!("no node allocated for '{service_id}' yet"),
            })?;

        // 3. Composite ids carry their port; services use the recipe's
        //    first exposed port.
        let port = match service_id.split_once(':') {
            Some((_, port)) => port.parse::<u16>().map_err(|_| Error::BadRequest {
                reason: format!("invalid replica id '{service_id}'"),
            })?,
            None => self.service_default_port(service_id),
        };

        let endpoint = Endpoint { host, port };
        debug!(service_id, url = %endpoint.url(), "endpoint resolved");
        Ok(endpoint)
    }

    fn service_default_port(&self, service_id: &str) -> u16 {
        let (recipe_name, category) = {
            let registry = self.lock_registry();
            match registry.services.get(service_id) {
                Some(record) => (record.recipe_name.clone(), record.category),
                None => return gridserve_config::Category::Inference.default_port(),
            }
        };
        self.recipes
            .load(&recipe_name)
            .map(|r| r.default_port())
            .unwrap_or_else(|_| category.default_port())
    }

    /// GET against a resolved endpoint through the dynamic forward.
    pub(crate) async fn forward_get(
        &self,
        endpoint: &Endpoint,
        path: &str,
        timeout: Duration,
    ) -> Result<gridserve_transport::ForwardResponse, Error> {
        Ok(self
            .http
            .request(ForwardRequest::get(
                endpoint.host.clone(),
                endpoint.port,
                path,
                timeout,
            ))
            .await?)
    }

    /// Probe helper with the background-loop timeout.
    pub(crate) async fn probe(
        &self,
        endpoint: &Endpoint,
        path: &str,
    ) -> Result<gridserve_transport::ForwardResponse, Error> {
        self.forward_get(endpoint, path, Duration::from_secs(PROBE_TIMEOUT_SECS))
            .await
    }
}
