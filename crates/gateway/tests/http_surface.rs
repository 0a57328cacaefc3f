// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Full HTTP-surface scenarios: a real gateway over mocked scheduler,
//! compute-node and metric-store APIs.

use async_trait::async_trait;
use gridserve_batch::{BatchClient, TokenSource};
use gridserve_config::store::RecipeStore;
use gridserve_gateway::{AppState, router};
use gridserve_monitoring::{MonitoringConfig, SessionManager};
use gridserve_orchestrator::{Orchestrator, OrchestratorConfig};
use gridserve_transport::{ComputeHttp, ForwardRequest, ForwardResponse, Tunnel, TunnelConfig};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SINGLE_RECIPE: &str = r#"
name: vllm-single-node
category: inference
ports: [8001]
resources:
  nodes: 1
  cpu: 4
  memory: 16G
  gpu: 1
  time_limit: 60
"#;

struct StaticTokens;

#[async_trait]
impl TokenSource for StaticTokens {
    async fn batch_token(&self) -> Result<String, gridserve_batch::Error> {
        Ok("test-token".to_string())
    }
}

struct DirectHttp {
    client: reqwest::Client,
    node_mock_port: u16,
}

#[async_trait]
impl ComputeHttp for DirectHttp {
    async fn request(
        &self,
        mut req: ForwardRequest,
    ) -> Result<ForwardResponse, gridserve_transport::Error> {
        req.host = "127.0.0.1".to_string();
        req.port = self.node_mock_port;
        gridserve_transport::forward::send_via(&self.client, req).await
    }
}

struct Harness {
    base: String,
    scheduler: MockServer,
    _node: MockServer,
    _prometheus: MockServer,
    state_dir: TempDir,
    config_path: std::path::PathBuf,
    _recipes: TempDir,
}

fn mock_port(server: &MockServer) -> u16 {
    server
        .uri()
        .rsplit(':')
        .next()
        .and_then(|p| p.parse().ok())
        .expect("mock port")
}

async fn harness() -> Harness {
    let scheduler = MockServer::start().await;
    let node = MockServer::start().await;
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

    let recipes_dir = TempDir::new().expect("tempdir");
    let inference = recipes_dir.path().join("inference");
    std::fs::create_dir_all(&inference).expect("dir");
    std::fs::write(inference.join("vllm-single-node.yaml"), SINGLE_RECIPE).expect("recipe");

    let batch = BatchClient::new(
        reqwest::Client::new(),
        format!("{}/slurm/v0.0.40", scheduler.uri()),
        "alice",
        Arc::new(StaticTokens),
    );
    let tunnel = Tunnel::new(TunnelConfig {
        host: "login.cluster.example.org".to_string(),
        user: "alice".to_string(),
        port: 22,
        control_socket_dir: std::env::temp_dir(),
    });
    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorConfig {
            username: "alice".to_string(),
            account: "p200776".to_string(),
            remote_base_path: "/remote/base".to_string(),
            remote_recipes_dir: "/remote/base/recipes".to_string(),
            remote_log_dir: "/remote/base/logs".to_string(),
        },
        Arc::new(RecipeStore::new(recipes_dir.path())),
        batch,
        Arc::new(DirectHttp {
            client: reqwest::Client::new(),
            node_mock_port: mock_port(&node),
        }),
        Arc::new(tunnel),
    ));

    // Bind first so the monitoring manager can point back at us.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let base = format!("http://{addr}");

    let state_dir = TempDir::new().expect("tempdir");
    let config_path = state_dir.path().join("config").join("prometheus.yml");
    let monitoring = Arc::new(SessionManager::new(MonitoringConfig {
        prometheus_url: prometheus.uri(),
        config_path: config_path.clone(),
        state_dir: state_dir.path().to_path_buf(),
        gateway_base_url: base.clone(),
        default_scrape_interval: "15s".to_string(),
    }));

    let app = router(AppState {
        orchestrator,
        monitoring,
        gateway_host_port: addr.to_string(),
    });
    let _ = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    Harness {
        base,
        scheduler,
        _node: node,
        _prometheus: prometheus,
        state_dir,
        config_path,
        _recipes: recipes_dir,
    }
}

#[tokio::test]
async fn unknown_service_returns_detail_body() {
    let h = harness().await;
    let response = reqwest::get(format!("{}/api/v1/services/12345", h.base))
        .await
        .expect("request");
    assert_eq!(response.status().as_u16(), 404);
    let body: serde_json::Value = response.json().await.expect("json");
    assert!(body["detail"].as_str().expect("detail").contains("12345"));
}

#[tokio::test]
async fn create_service_requires_recipe_name() {
    let h = harness().await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/api/v1/services", h.base))
        .json(&serde_json::json!({}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status().as_u16(), 400);
    let body: serde_json::Value = response.json().await.expect("json");
    assert_eq!(body["detail"], "recipe_name required");
}

#[tokio::test]
async fn launch_then_read_back_and_scrape_synthetic_metrics() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/slurm/v0.0.40/job/submit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"job_id": 99})))
        .mount(&h.scheduler)
        .await;
    Mock::given(method("GET"))
        .and(path("/slurm/v0.0.40/job/99"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jobs": [{"job_id": 99, "job_state": "PENDING"}]
        })))
        .mount(&h.scheduler)
        .await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/api/v1/services", h.base))
        .json(&serde_json::json!({
            "recipe_name": "inference/vllm-single-node",
            "config": {"model": "gpt2"}
        }))
        .send()
        .await
        .expect("create");
    assert_eq!(response.status().as_u16(), 200);
    let created: serde_json::Value = response.json().await.expect("json");
    assert_eq!(created["job_id"], "99");
    assert_eq!(created["status"], "submitted");

    let fetched: serde_json::Value =
        reqwest::get(format!("{}/api/v1/services/99", h.base))
            .await
            .expect("get")
            .json()
            .await
            .expect("json");
    assert_eq!(fetched["recipe_name"], "inference/vllm-single-node");
    assert_eq!(fetched["config"]["model"], "gpt2");

    // Pending services still answer scrapes, synthetically.
    let metrics = reqwest::get(format!("{}/api/v1/services/99/metrics", h.base))
        .await
        .expect("metrics");
    assert_eq!(metrics.status().as_u16(), 200);
    let text = metrics.text().await.expect("text");
    assert!(text.contains("process_start_time_seconds"));
}

#[tokio::test]
async fn session_conflict_names_the_running_session() {
    let h = harness().await;
    let client = reqwest::Client::new();

    let first = client
        .post(format!("{}/api/v1/sessions", h.base))
        .json(&serde_json::json!({"run_id": "mon-A"}))
        .send()
        .await
        .expect("first session");
    assert_eq!(first.status().as_u16(), 200);

    let second = client
        .post(format!("{}/api/v1/sessions", h.base))
        .json(&serde_json::json!({"run_id": "mon-B"}))
        .send()
        .await
        .expect("second session");
    assert_eq!(second.status().as_u16(), 409);
    let body: serde_json::Value = second.json().await.expect("json");
    assert!(body["detail"].as_str().expect("detail").contains("mon-A"));
}

#[tokio::test]
async fn registered_service_target_lands_in_rendered_config() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/slurm/v0.0.40/job/submit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"job_id": 99})))
        .mount(&h.scheduler)
        .await;
    // Status refresh for the read-back the monitoring manager does.
    Mock::given(method("GET"))
        .and(path("/slurm/v0.0.40/job/99"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jobs": [{"job_id": 99, "job_state": "PENDING"}]
        })))
        .mount(&h.scheduler)
        .await;

    let client = reqwest::Client::new();
    let _ = client
        .post(format!("{}/api/v1/services", h.base))
        .json(&serde_json::json!({"recipe_name": "inference/vllm-single-node"}))
        .send()
        .await
        .expect("create service");
    let _ = client
        .post(format!("{}/api/v1/sessions", h.base))
        .json(&serde_json::json!({"run_id": "mon-A"}))
        .send()
        .await
        .expect("create session");

    let registered = client
        .post(format!("{}/api/v1/sessions/mon-A/services", h.base))
        .json(&serde_json::json!({"service_id": "99"}))
        .send()
        .await
        .expect("register target");
    assert_eq!(registered.status().as_u16(), 200);

    let raw = std::fs::read_to_string(&h.config_path).expect("rendered config");
    let parsed: gridserve_monitoring::render::ScrapeConfig =
        serde_yaml::from_str(&raw).expect("scrape config");
    let job = parsed
        .scrape_configs
        .iter()
        .find(|j| j.job_name == "99")
        .expect("job for service 99");
    assert_eq!(job.metrics_path.as_deref(), Some("/api/v1/services/99/metrics"));

    // Keep the state dir alive until the end of the test.
    assert!(h.state_dir.path().join("mon-A").is_dir());
}
