// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! HTTP client for the metric store.
//!
//! The store runs elsewhere (compose-managed); this client only
//! checks readiness, triggers hot reloads of the scrape config and
//! runs range queries.

use crate::error::Error;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Client for a metric store reachable over HTTP.
#[derive(Debug, Clone)]
pub struct MetricStore {
    base_url: String,
    http: reqwest::Client,
}

impl MetricStore {
    /// Creates a client for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Store base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Single readiness probe.
    pub async fn is_ready(&self) -> bool {
        match self
            .http
            .get(format!("{}/-/ready", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "metric store not ready");
                false
            }
        }
    }

    /// Single health probe.
    pub async fn is_healthy(&self) -> bool {
        match self
            .http
            .get(format!("{}/-/healthy", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Polls readiness until the deadline.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), Error> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_ready().await {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::StoreUnavailable {
                    details: format!(
                        "did not become ready within {}s",
                        timeout.as_secs()
                    ),
                });
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    /// Hot-reloads the configuration. The store must run with its
    /// lifecycle endpoints enabled.
    pub async fn reload(&self) -> Result<(), Error> {
        let response = self
            .http
            .post(format!("{}/-/reload", self.base_url))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| Error::ReloadFailed {
                details: e.to_string(),
            })?;
        if response.status().is_success() {
            info!("scrape configuration reloaded");
            Ok(())
        } else if response.status().as_u16() == 404 {
            warn!("reload endpoint missing; lifecycle API not enabled on the metric store");
            Err(Error::ReloadFailed {
                details: "reload endpoint not found (lifecycle API disabled?)".to_string(),
            })
        } else {
            Err(Error::ReloadFailed {
                details: format!("HTTP {}", response.status()),
            })
        }
    }

    /// Runs one range query and returns the raw result document.
    pub async fn query_range(
        &self,
        query: &str,
        start: &str,
        end: &str,
        step: &str,
    ) -> Result<serde_json::Value, Error> {
        let response = self
            .http
            .get(format!("{}/api/v1/query_range", self.base_url))
            .query(&[("query", query), ("start", start), ("end", end), ("step", step)])
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| Error::QueryFailed {
                query: query.to_string(),
                details: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(Error::QueryFailed {
                query: query.to_string(),
                details: format!("HTTP {}", response.status()),
            });
        }
        response.json().await.map_err(|e| Error::QueryFailed {
            query: query.to_string(),
            details: e.to_string(),
        })
    }
}
