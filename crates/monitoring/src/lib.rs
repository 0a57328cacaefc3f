// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Monitoring sessions.
//!
//! A session is a named window of scrape configuration: it owns the
//! set of targets the metric store observes. At most one session is
//! RUNNING at a time; while it runs, the rendered configuration on
//! disk reflects its target set exactly. Mutating the target set
//! re-renders and hot-reloads inside one critical section, so a
//! registration only returns once the store has been pointed at the
//! new target.

use crate::collect::Collector;
use crate::prometheus::MetricStore;
use crate::registry::{ClientRegistration, ServiceTarget, TargetRegistry, TargetSet};
use crate::render::{build_scrape_config, render_atomic};
use crate::state::{SessionState, SessionStatus, StateStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

pub mod collect;
pub mod error;
pub mod prometheus;
pub mod registry;
pub mod render;
pub mod state;

pub use error::Error;

/// Deployment-level knobs for the session manager.
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    /// Metric store base URL.
    pub prometheus_url: String,
    /// Shared scrape-config path the store reads.
    pub config_path: PathBuf,
    /// Directory for session state and generated files.
    pub state_dir: PathBuf,
    /// Gateway base URL used to resolve service metrics endpoints.
    pub gateway_base_url: String,
    /// Scrape interval applied when a session does not set one.
    pub default_scrape_interval: String,
}

/// Request to create a session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionCreateRequest {
    /// Session id; minted when omitted.
    #[serde(default)]
    pub run_id: Option<String>,
    /// Scrape interval (e.g. "15s").
    #[serde(default)]
    pub scrape_interval: Option<String>,
    /// User labels attached to the session.
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
}

/// Response for a created session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionCreated {
    /// Session id.
    pub session_id: String,
    /// Metric store base URL.
    pub prometheus_url: String,
    /// Always RUNNING.
    pub status: SessionStatus,
    /// Session working directory.
    pub workdir: String,
    /// Targets already registered at creation.
    pub targets_count: usize,
}

/// Status document of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatusView {
    /// Session id.
    pub session_id: String,
    /// Lifecycle state.
    pub status: SessionStatus,
    /// Metric store reachability.
    pub prometheus: serde_json::Value,
    /// Current target count.
    pub targets_count: usize,
    /// Creation timestamp.
    pub created_at: String,
    /// Activation timestamp.
    pub started_at: String,
}

/// Request to register a client's exporters.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterClientRequest {
    /// Session to register with.
    pub session_id: String,
    /// Client id.
    pub client_id: String,
    /// Node the client runs on.
    pub node: String,
    /// Exporter type → `host:port`.
    pub exporters: BTreeMap<String, String>,
    /// `enable_<type>` flags.
    #[serde(default)]
    pub preferences: BTreeMap<String, bool>,
}

/// Request to register a service target.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterServiceRequest {
    /// Session to register with.
    pub session_id: String,
    /// Service id; doubles as the scrape job label.
    pub service_id: String,
    /// Extra labels.
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
}

/// Request to collect a window.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectRequest {
    /// Window start (RFC 3339).
    pub window_start: String,
    /// Window end (RFC 3339).
    pub window_end: String,
    /// Output directory for artifacts.
    pub out_dir: String,
    /// Run identifier recorded in the artifacts.
    #[serde(default = "default_run_id")]
    pub run_id: String,
}

fn default_run_id() -> String {
    "run".to_string()
}

/// The session manager. One per process, constructed in `main`.
pub struct SessionManager {
    config: MonitoringConfig,
    state: StateStore,
    registry: TargetRegistry,
    store: MetricStore,
    gateway_http: reqwest::Client,
    /// Render-and-reload critical section.
    render_lock: tokio::sync::Mutex<()>,
}

impl SessionManager {
    /// Builds the manager and its file stores.
    pub fn new(config: MonitoringConfig) -> Self {
        let state = StateStore::new(&config.state_dir);
        let registry = TargetRegistry::new(&config.state_dir);
        let store = MetricStore::new(config.prometheus_url.clone());
        Self {
            config,
            state,
            registry,
            store,
            gateway_http: reqwest::Client::new(),
            render_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Access to the metric store client (used by collection).
    pub fn metric_store(&self) -> &MetricStore {
        &self.store
    }

    // ===== Session lifecycle =====

    /// Creates and immediately activates a session. Fails with a
    /// conflict naming the active session when one is RUNNING.
    pub async fn create_session(
        &self,
        request: SessionCreateRequest,
    ) -> Result<SessionCreated, Error> {
        if let Some(active) = self.state.active_session() {
            return Err(Error::SessionConflict {
                active: active.session_id,
            });
        }

        let session_id = request
            .run_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("mon-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]));
        let workdir = self.state.session_dir(&session_id)?;
        let scrape_interval = request
            .scrape_interval
            .unwrap_or_else(|| self.config.default_scrape_interval.clone());

        // Render any pre-registered targets and activate.
        let targets = self.registry.targets(&session_id)?;
        {
            let _guard = self.render_lock.lock().await;
            render_atomic(
                &build_scrape_config(&targets, &scrape_interval),
                &self.config.config_path,
            )?;
            self.store.reload().await?;
        }
        self.store.wait_ready(Duration::from_secs(10)).await?;

        let now = Utc::now().to_rfc3339();
        let session = SessionState {
            session_id: session_id.clone(),
            status: SessionStatus::Running,
            workdir: workdir.display().to_string(),
            prometheus_url: self.config.prometheus_url.clone(),
            config_path: self.config.config_path.display().to_string(),
            scrape_interval,
            labels: request.labels.unwrap_or_default(),
            created_at: now.clone(),
            started_at: now,
            stopped_at: None,
            last_collect_at: None,
            artifacts: None,
        };
        self.state.write(&session)?;

        info!(session_id = %session.session_id, targets = targets.len(), "monitoring session started");
        Ok(SessionCreated {
            session_id: session.session_id,
            prometheus_url: self.config.prometheus_url.clone(),
            status: SessionStatus::Running,
            workdir: session.workdir,
            targets_count: targets.len(),
        })
    }

    /// Status of one session, including store reachability.
    pub async fn status(&self, session_id: &str) -> Result<SessionStatusView, Error> {
        let session = self.require_session(session_id)?;
        let targets = self.registry.targets(session_id)?;
        Ok(SessionStatusView {
            session_id: session.session_id,
            status: session.status,
            prometheus: serde_json::json!({
                "url": &self.config.prometheus_url,
                "healthy": self.store.is_healthy().await,
                "ready": self.store.is_ready().await,
            }),
            targets_count: targets.len(),
            created_at: session.created_at,
            started_at: session.started_at,
        })
    }

    /// All sessions, newest first.
    pub fn list_sessions(&self) -> Vec<SessionState> {
        self.state.list_all()
    }

    /// Stops a session: withdraws its targets, re-renders from the
    /// remaining RUNNING sessions, reloads, and marks it STOPPED.
    pub async fn stop_session(&self, session_id: &str) -> Result<(), Error> {
        let session = self.require_session(session_id)?;

        self.registry.clear_session(session_id)?;

        let mut session = session;
        session.status = SessionStatus::Stopped;
        session.stopped_at = Some(Utc::now().to_rfc3339());
        self.state.write(&session)?;

        let mut remaining = TargetSet::default();
        for other in self.state.list_all() {
            if other.session_id != session_id && other.status == SessionStatus::Running {
                remaining.extend(self.registry.targets(&other.session_id)?);
            }
        }
        {
            let _guard = self.render_lock.lock().await;
            render_atomic(
                &build_scrape_config(&remaining, &session.scrape_interval),
                &self.config.config_path,
            )?;
            self.store.reload().await?;
        }

        info!(session_id, "monitoring session stopped");
        Ok(())
    }

    /// Deletes a session's state (collected artifacts stay on disk).
    pub fn delete_session(&self, session_id: &str) -> Result<(), Error> {
        let _ = self.require_session(session_id)?;
        self.state.clear(session_id);
        Ok(())
    }

    // ===== Target registration =====

    /// Registers a client's exporters. The on-disk configuration
    /// reflects the new target before this returns.
    pub async fn register_client(&self, request: RegisterClientRequest) -> Result<(), Error> {
        let session = self.require_session(&request.session_id)?;
        self.registry.upsert_client(ClientRegistration {
            session_id: request.session_id.clone(),
            client_id: request.client_id.clone(),
            node: request.node,
            exporters: request.exporters,
            preferences: request.preferences,
        })?;
        if session.status == SessionStatus::Running {
            self.rerender(&session).await?;
        }
        info!(client_id = %request.client_id, session_id = %request.session_id, "client registered");
        Ok(())
    }

    /// Registers a service target, resolving its metrics URL through
    /// the gateway. The id doubles as the scrape job label.
    pub async fn register_service(
        &self,
        request: RegisterServiceRequest,
    ) -> Result<String, Error> {
        let session = self.require_session(&request.session_id)?;
        let endpoint = self.resolve_service_endpoint(&request.service_id).await?;

        self.registry.upsert_service(ServiceTarget {
            session_id: request.session_id.clone(),
            service_id: request.service_id.clone(),
            endpoint: endpoint.clone(),
            labels: request.labels.unwrap_or_default(),
        })?;
        if session.status == SessionStatus::Running {
            self.rerender(&session).await?;
        }
        info!(service_id = %request.service_id, endpoint = %endpoint, "service target registered");
        Ok(endpoint)
    }

    /// Collects a window of metrics into the requested directory and
    /// records the artifact paths on the session.
    pub async fn collect(
        &self,
        session_id: &str,
        request: CollectRequest,
    ) -> Result<state::Artifacts, Error> {
        let mut session = self.require_session(session_id)?;

        let collector = Collector::new(&self.store);
        let summary = collector
            .collect_window(&request.window_start, &request.window_end)
            .await;
        let artifacts = collector.save(
            &summary,
            std::path::Path::new(&request.out_dir),
            &request.run_id,
            session_id,
            &request.window_start,
            &request.window_end,
        )?;

        session.last_collect_at = Some(Utc::now().to_rfc3339());
        session.artifacts = Some(artifacts.clone());
        self.state.write(&session)?;

        info!(session_id, out_dir = %request.out_dir, "collection complete");
        Ok(artifacts)
    }

    // ===== Internals =====

    fn require_session(&self, session_id: &str) -> Result<SessionState, Error> {
        self.state.read(session_id).ok_or_else(|| Error::SessionNotFound {
            id: session_id.to_string(),
        })
    }

    async fn rerender(&self, session: &SessionState) -> Result<(), Error> {
        let targets = self.registry.targets(&session.session_id)?;
        let _guard = self.render_lock.lock().await;
        render_atomic(
            &build_scrape_config(&targets, &session.scrape_interval),
            &self.config.config_path,
        )?;
        self.store.reload().await
    }

    /// Asks the gateway for the service, then forms the proxied
    /// metrics URL. Registration fails when the service is unknown.
    async fn resolve_service_endpoint(&self, service_id: &str) -> Result<String, Error> {
        let base = self.config.gateway_base_url.trim_end_matches('/');
        let url = format!("{base}/api/v1/services/{service_id}");
        let response = self
            .gateway_http
            .get(&url)
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(|e| Error::EndpointResolve {
                service_id: service_id.to_string(),
                details: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(Error::EndpointResolve {
                service_id: service_id.to_string(),
                details: format!("gateway returned HTTP {}", response.status()),
            });
        }
        Ok(format!("{base}/api/v1/services/{service_id}/metrics"))
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state_dir", &self.config.state_dir)
            .finish_non_exhaustive()
    }
}
