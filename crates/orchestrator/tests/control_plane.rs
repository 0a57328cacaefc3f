// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end control-plane scenarios against mocked scheduler and
//! compute-node HTTP APIs.

use async_trait::async_trait;
use gridserve_batch::{BatchClient, TokenSource};
use gridserve_config::recipe::ServiceConfig;
use gridserve_config::store::RecipeStore;
use gridserve_orchestrator::{
    Error, Orchestrator, OrchestratorConfig, ReplicaStatus, ServiceInfo, ServiceStatus,
    inference::PromptRequest,
};
use gridserve_transport::{ComputeHttp, ForwardRequest, ForwardResponse, Tunnel, TunnelConfig};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SINGLE_RECIPE: &str = r#"
name: vllm-single-node
category: inference
ports: [8001]
environment:
  VLLM_MODEL: "Qwen/Qwen2.5-0.5B-Instruct"
resources:
  nodes: 1
  cpu: 4
  memory: 16G
  gpu: 1
  time_limit: 60
"#;

const REPLICA_RECIPE: &str = r#"
name: vllm-replicas
category: inference
ports: [8001]
gpu_per_replica: 1
base_port: 8001
environment:
  VLLM_MODEL: gpt2
resources:
  nodes: 1
  cpu: 8
  memory: 32G
  gpu: 4
  time_limit: 120
"#;

struct StaticTokens;

#[async_trait]
impl TokenSource for StaticTokens {
    async fn batch_token(&self) -> Result<String, gridserve_batch::Error> {
        Ok("test-token".to_string())
    }
}

/// Routes forwarded compute-node requests to a local mock server.
/// Ports listed as dead simulate replicas whose process is down.
struct DirectHttp {
    client: reqwest::Client,
    node_mock_port: u16,
    dead_ports: Vec<u16>,
}

#[async_trait]
impl ComputeHttp for DirectHttp {
    async fn request(
        &self,
        mut req: ForwardRequest,
    ) -> Result<ForwardResponse, gridserve_transport::Error> {
        req.port = if self.dead_ports.contains(&req.port) {
            1 // nothing listens here
        } else {
            self.node_mock_port
        };
        req.host = "127.0.0.1".to_string();
        gridserve_transport::forward::send_via(&self.client, req).await
    }
}

fn write_recipe(root: &Path, category: &str, name: &str, yaml: &str) {
    let dir = root.join(category);
    std::fs::create_dir_all(&dir).expect("category dir");
    std::fs::write(dir.join(format!("{name}.yaml")), yaml).expect("recipe file");
}

fn mock_port(server: &MockServer) -> u16 {
    server
        .uri()
        .rsplit(':')
        .next()
        .and_then(|p| p.parse().ok())
        .expect("mock port")
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    scheduler: MockServer,
    node: MockServer,
    _recipes: TempDir,
}

async fn harness(dead_ports: Vec<u16>) -> Harness {
    let scheduler = MockServer::start().await;
    let node = MockServer::start().await;

    let recipes_dir = TempDir::new().expect("tempdir");
    write_recipe(recipes_dir.path(), "inference", "vllm-single-node", SINGLE_RECIPE);
    write_recipe(recipes_dir.path(), "inference", "vllm-replicas", REPLICA_RECIPE);

    let batch = BatchClient::new(
        reqwest::Client::new(),
        format!("{}/slurm/v0.0.40", scheduler.uri()),
        "alice",
        Arc::new(StaticTokens),
    );
    let http = DirectHttp {
        client: reqwest::Client::new(),
        node_mock_port: mock_port(&node),
        dead_ports,
    };
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
        Arc::new(http),
        Arc::new(tunnel),
    ));

    Harness {
        orchestrator,
        scheduler,
        node,
        _recipes: recipes_dir,
    }
}

async fn mock_submit(scheduler: &MockServer, job_id: u64) {
    Mock::given(method("POST"))
        .and(path("/slurm/v0.0.40/job/submit"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"job_id": job_id})),
        )
        .mount(scheduler)
        .await;
}

async fn mock_running_on(scheduler: &MockServer, job_id: u64, node: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/slurm/v0.0.40/job/{job_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jobs": [{
                "job_id": job_id,
                "name": "vllm",
                "job_state": ["RUNNING"],
                "nodes": node,
                "node_count": 1
            }]
        })))
        .mount(scheduler)
        .await;
}

async fn mock_models(node: &MockServer, model: &str) {
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "object": "list",
            "data": [{"id": model}]
        })))
        .mount(node)
        .await;
}

#[tokio::test]
async fn launch_and_prompt_single_service() {
    let h = harness(Vec::new()).await;
    mock_submit(&h.scheduler, 3642874).await;
    mock_running_on(&h.scheduler, 3642874, "mel2133").await;
    mock_models(&h.node, "Qwen/Qwen2.5-0.5B-Instruct").await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(
            serde_json::json!({"model": "Qwen/Qwen2.5-0.5B-Instruct"}),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": "AI is the simulation of intelligence."}}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 8, "total_tokens": 13}
        })))
        .mount(&h.node)
        .await;

    let outcome = h
        .orchestrator
        .start_service("inference/vllm-single-node", ServiceConfig::default())
        .await
        .expect("start");
    assert_eq!(outcome.job_id, "3642874");
    assert_eq!(outcome.status, "submitted");

    // The id is resolvable for reads immediately after submission.
    let info = h.orchestrator.get_service("3642874").await.expect("get");
    let ServiceInfo::Service(view) = info else {
        panic!("expected a single service");
    };
    assert_eq!(view.recipe_name, "inference/vllm-single-node");

    let prompt = h
        .orchestrator
        .prompt(
            "3642874",
            PromptRequest {
                prompt: "What is AI?".to_string(),
                model: None,
                max_tokens: None,
                temperature: None,
            },
        )
        .await
        .expect("prompt");
    assert!(prompt.success);
    assert_eq!(prompt.endpoint_used, "chat");
    assert_eq!(prompt.endpoint, "http://mel2133:8001");
    assert_eq!(prompt.response, "AI is the simulation of intelligence.");
}

#[tokio::test]
async fn chat_template_error_falls_back_to_completions() {
    let h = harness(Vec::new()).await;
    mock_submit(&h.scheduler, 3642874).await;
    mock_running_on(&h.scheduler, 3642874, "mel2133").await;
    mock_models(&h.node, "gpt2").await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "detail": "default chat template is no longer allowed"
        })))
        .mount(&h.node)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"text": "a completion"}],
            "usage": {}
        })))
        .mount(&h.node)
        .await;

    let _ = h
        .orchestrator
        .start_service("inference/vllm-single-node", ServiceConfig::default())
        .await
        .expect("start");
    let prompt = h
        .orchestrator
        .prompt(
            "3642874",
            PromptRequest {
                prompt: "complete me".to_string(),
                model: None,
                max_tokens: None,
                temperature: None,
            },
        )
        .await
        .expect("prompt");
    assert!(prompt.success);
    assert_eq!(prompt.endpoint_used, "completions");
    assert_eq!(prompt.response, "a completion");
}

#[tokio::test]
async fn replica_group_failover_marks_statuses() {
    // Replica 0 (port 8001) is dead; replica 1 (8002) serves.
    let h = harness(vec![8001]).await;
    mock_submit(&h.scheduler, 777).await;
    mock_running_on(&h.scheduler, 777, "mel2133").await;
    mock_models(&h.node, "gpt2").await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": "ok"}}],
            "usage": {}
        })))
        .mount(&h.node)
        .await;

    let outcome = h
        .orchestrator
        .start_service("inference/vllm-replicas", ServiceConfig::default())
        .await
        .expect("start");
    let group_id = outcome.group_id.clone().expect("group id");
    let group = h.orchestrator.get_group(&group_id).expect("group");
    assert_eq!(group.total_replicas, 4);

    let prompt = h
        .orchestrator
        .prompt(
            &group_id,
            PromptRequest {
                prompt: "hello".to_string(),
                model: None,
                max_tokens: None,
                temperature: None,
            },
        )
        .await
        .expect("group prompt");
    assert_eq!(prompt.routed_to.as_deref(), Some("777:8002"));
    assert_eq!(prompt.group_id.as_deref(), Some(group_id.as_str()));

    let group = h.orchestrator.get_group(&group_id).expect("group");
    let by_id = |id: &str| {
        group
            .replicas
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.status)
            .expect("replica")
    };
    assert_eq!(by_id("777:8001"), ReplicaStatus::Failed);
    assert_eq!(by_id("777:8002"), ReplicaStatus::Running);
}

#[tokio::test]
async fn group_prompt_fails_only_when_every_replica_fails() {
    let h = harness(vec![8001, 8002, 8003, 8004]).await;
    mock_submit(&h.scheduler, 778).await;
    mock_running_on(&h.scheduler, 778, "mel2133").await;

    let outcome = h
        .orchestrator
        .start_service("inference/vllm-replicas", ServiceConfig::default())
        .await
        .expect("start");
    let group_id = outcome.group_id.clone().expect("group id");

    let err = h
        .orchestrator
        .prompt(
            &group_id,
            PromptRequest {
                prompt: "hello".to_string(),
                model: None,
                max_tokens: None,
                temperature: None,
            },
        )
        .await
        .expect_err("all replicas dead");
    match err {
        Error::Upstream { body, .. } => {
            assert!(body.contains("all 4 replicas failed"), "body: {body}");
            assert!(body.contains("778:8001"));
            assert!(body.contains("778:8004"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn readiness_pass_promotes_replicas() {
    let h = harness(Vec::new()).await;
    mock_submit(&h.scheduler, 900).await;
    mock_running_on(&h.scheduler, 900, "mel2133").await;
    mock_models(&h.node, "gpt2").await;

    let outcome = h
        .orchestrator
        .start_service("inference/vllm-replicas", ServiceConfig::default())
        .await
        .expect("start");
    let group_id = outcome.group_id.clone().expect("group id");

    h.orchestrator.check_replica_groups().await.expect("pass");

    let group = h.orchestrator.get_group(&group_id).expect("group");
    assert!(group.replicas.iter().all(|r| r.status == ReplicaStatus::Ready));
    assert_eq!(
        group.node_jobs.first().and_then(|nj| nj.node.clone()).as_deref(),
        Some("mel2133")
    );

    // Promoted replicas answer as services, endpoint included.
    let info = h.orchestrator.get_service("900:8001").await.expect("replica service");
    let ServiceInfo::Service(view) = info else {
        panic!("expected service view");
    };
    assert_eq!(view.endpoint.as_deref(), Some("http://mel2133:8001"));
}

#[tokio::test]
async fn stop_service_is_idempotent() {
    let h = harness(Vec::new()).await;
    mock_submit(&h.scheduler, 555).await;
    Mock::given(method("DELETE"))
        .and(path("/slurm/v0.0.40/job/555"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&h.scheduler)
        .await;

    let _ = h
        .orchestrator
        .start_service("inference/vllm-single-node", ServiceConfig::default())
        .await
        .expect("start");

    let first = h.orchestrator.stop_service("555").await.expect("first stop");
    assert_eq!(first.status, "cancelled");
    let second = h.orchestrator.stop_service("555").await.expect("second stop");
    assert_eq!(second.status, "cancelled");

    let info = h.orchestrator.get_service("555").await.expect("get");
    let ServiceInfo::Service(view) = info else {
        panic!("expected service view");
    };
    assert_eq!(view.status, ServiceStatus::Cancelled);
}

#[tokio::test]
async fn config_snapshot_is_a_superset_of_the_request() {
    let h = harness(Vec::new()).await;
    mock_submit(&h.scheduler, 600).await;

    let config: ServiceConfig = serde_json::from_value(serde_json::json!({
        "model": "gpt2",
        "max_tokens_budget": 9000
    }))
    .expect("config");
    let _ = h
        .orchestrator
        .start_service("inference/vllm-single-node", config)
        .await
        .expect("start");

    let info = h.orchestrator.get_service("600").await.expect("get");
    let ServiceInfo::Service(view) = info else {
        panic!("expected service view");
    };
    assert_eq!(view.recipe_name, "inference/vllm-single-node");
    let stored = serde_json::to_value(&view.config).expect("config json");
    assert_eq!(stored["model"], "gpt2");
    assert_eq!(stored["max_tokens_budget"], 9000);
}

#[tokio::test]
async fn pending_service_gets_synthetic_metrics() {
    let h = harness(Vec::new()).await;
    mock_submit(&h.scheduler, 601).await;

    let _ = h
        .orchestrator
        .start_service("inference/vllm-single-node", ServiceConfig::default())
        .await
        .expect("start");

    let metrics = h.orchestrator.service_metrics("601").await.expect("metrics");
    assert_eq!(metrics.endpoint, "synthetic");
    assert!(metrics.metrics.contains("process_start_time_seconds"));
}

#[tokio::test]
async fn load_generator_dispatch_reuses_the_submission_contract() {
    let h = harness(Vec::new()).await;
    mock_submit(&h.scheduler, 8100).await;

    let spec = gridserve_config::script::LoadGenSpec {
        prompt_url: "http://localhost:8001/api/v1/vllm/42/prompt".to_string(),
        service_id: "42".to_string(),
        num_clients: 8,
        requests_per_second: 5.0,
        duration_seconds: 120,
        prompts: vec!["What is AI?".to_string()],
        max_tokens: 100,
        temperature: 0.7,
    };
    let dispatch = h
        .orchestrator
        .dispatch_load_generator(3, 30, spec)
        .await
        .expect("dispatch");
    assert_eq!(dispatch.job_id, "8100");
    assert_eq!(dispatch.group_id, 3);
    assert!(dispatch.results_path.ends_with("loadgen-results-3.json"));
}

#[tokio::test]
async fn unknown_service_is_not_found() {
    let h = harness(Vec::new()).await;
    let err = h.orchestrator.get_service("nope").await.expect_err("missing");
    assert!(matches!(err, Error::NotFound { .. }));
}
