// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Session lifecycle scenarios against a mocked metric store and
//! gateway.

use gridserve_monitoring::render::ScrapeConfig;
use gridserve_monitoring::state::SessionStatus;
use gridserve_monitoring::{
    Error, MonitoringConfig, RegisterClientRequest, RegisterServiceRequest, SessionCreateRequest,
    SessionManager,
};
use std::collections::BTreeMap;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    manager: SessionManager,
    gateway: MockServer,
    _prometheus: MockServer,
    state_dir: TempDir,
    config_path: std::path::PathBuf,
}

async fn harness() -> Harness {
    let prometheus = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/-/reload"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&prometheus)
        .await;
    Mock::given(method("GET"))
        .and(path("/-/ready"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&prometheus)
        .await;
    Mock::given(method("GET"))
        .and(path("/-/healthy"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&prometheus)
        .await;

    let gateway = MockServer::start().await;
    let state_dir = TempDir::new().expect("tempdir");
    let config_path = state_dir.path().join("config").join("prometheus.yml");

    let manager = SessionManager::new(MonitoringConfig {
        prometheus_url: prometheus.uri(),
        config_path: config_path.clone(),
        state_dir: state_dir.path().to_path_buf(),
        gateway_base_url: gateway.uri(),
        default_scrape_interval: "15s".to_string(),
    });

    Harness {
        manager,
        gateway,
        _prometheus: prometheus,
        state_dir,
        config_path,
    }
}

fn read_config(h: &Harness) -> ScrapeConfig {
    let raw = std::fs::read_to_string(&h.config_path).expect("rendered config");
    serde_yaml::from_str(&raw).expect("valid scrape config")
}

fn named_session(name: &str) -> SessionCreateRequest {
    SessionCreateRequest {
        run_id: Some(name.to_string()),
        scrape_interval: None,
        labels: None,
    }
}

#[tokio::test]
async fn only_one_session_may_run() {
    let h = harness().await;
    let created = h
        .manager
        .create_session(named_session("mon-A"))
        .await
        .expect("first session");
    assert_eq!(created.session_id, "mon-A");
    assert_eq!(created.status, SessionStatus::Running);

    let err = h
        .manager
        .create_session(named_session("mon-B"))
        .await
        .expect_err("second session must conflict");
    match err {
        Error::SessionConflict { active } => assert_eq!(active, "mon-A"),
        other => panic!("unexpected error: {other}"),
    }

    // Stopping the first frees the slot.
    h.manager.stop_session("mon-A").await.expect("stop");
    let second = h
        .manager
        .create_session(named_session("mon-B"))
        .await
        .expect("after stop");
    assert_eq!(second.session_id, "mon-B");
}

#[tokio::test]
async fn service_registration_renders_one_job_per_target() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/services/99"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "99", "status": "running"
        })))
        .mount(&h.gateway)
        .await;

    let _ = h
        .manager
        .create_session(named_session("mon-A"))
        .await
        .expect("session");
    let endpoint = h
        .manager
        .register_service(RegisterServiceRequest {
            session_id: "mon-A".to_string(),
            service_id: "99".to_string(),
            labels: None,
        })
        .await
        .expect("register");
    assert!(endpoint.ends_with("/api/v1/services/99/metrics"));

    // The registration is on disk before the call returned.
    let config = read_config(&h);
    let job = config
        .scrape_configs
        .iter()
        .find(|j| j.job_name == "99")
        .expect("service job");
    assert_eq!(job.metrics_path.as_deref(), Some("/api/v1/services/99/metrics"));
    assert_eq!(job.static_configs[0].targets.len(), 1);
    let target = &job.static_configs[0].targets[0];
    assert!(h.gateway.uri().contains(target), "target {target} from {}", h.gateway.uri());
}

#[tokio::test]
async fn unknown_service_fails_registration() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/services/404"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&h.gateway)
        .await;

    let _ = h
        .manager
        .create_session(named_session("mon-A"))
        .await
        .expect("session");
    let err = h
        .manager
        .register_service(RegisterServiceRequest {
            session_id: "mon-A".to_string(),
            service_id: "404".to_string(),
            labels: None,
        })
        .await
        .expect_err("unknown service");
    assert!(matches!(err, Error::EndpointResolve { .. }));
}

#[tokio::test]
async fn stop_removes_only_that_sessions_targets() {
    let h = harness().await;
    let _ = h
        .manager
        .create_session(named_session("mon-A"))
        .await
        .expect("session");

    let mut exporters = BTreeMap::new();
    let _ = exporters.insert("node".to_string(), "nodeA:9100".to_string());
    h.manager
        .register_client(RegisterClientRequest {
            session_id: "mon-A".to_string(),
            client_id: "client-001".to_string(),
            node: "nodeA".to_string(),
            exporters,
            preferences: BTreeMap::new(),
        })
        .await
        .expect("client");

    let config = read_config(&h);
    assert!(config.scrape_configs.iter().any(|j| j.job_name == "node"));

    h.manager.stop_session("mon-A").await.expect("stop");
    let config = read_config(&h);
    assert!(config.scrape_configs.is_empty());

    // Session directory and state survive for inspection.
    assert!(h.state_dir.path().join("mon-A").is_dir());
    let sessions = h.manager.list_sessions();
    assert_eq!(sessions[0].status, SessionStatus::Stopped);
}

#[tokio::test]
async fn status_reports_store_health_and_target_count() {
    let h = harness().await;
    let _ = h
        .manager
        .create_session(named_session("mon-A"))
        .await
        .expect("session");
    let status = h.manager.status("mon-A").await.expect("status");
    assert_eq!(status.session_id, "mon-A");
    assert_eq!(status.targets_count, 0);
    assert_eq!(status.prometheus["ready"], true);

    assert!(matches!(
        h.manager.status("missing").await,
        Err(Error::SessionNotFound { .. })
    ));
}
