// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Typed client for the batch scheduler's REST API.
//!
//! The client is a thin façade: submit, cancel, status and allocation
//! queries. Authentication uses two headers (user name and a
//! short-lived token); the token is minted through a [`TokenSource`]
//! immediately before every call and never cached here.
//!
//! Status handling goes through a loadable alias table
//! ([`aliases::StatusAliases`]) and falls back to the historical
//! accounting endpoint when the live queue no longer knows a job.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod aliases;
pub mod error;
pub mod nodelist;

pub use aliases::StatusAliases;
pub use error::Error;
pub use nodelist::parse_node_list;

/// Header carrying the user name.
pub const USER_HEADER: &str = "X-SLURM-USER-NAME";
/// Header carrying the short-lived token.
pub const TOKEN_HEADER: &str = "X-SLURM-USER-TOKEN";

/// Canonical job states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Submitted, waiting for resources.
    Pending,
    /// Executing on its allocation.
    Running,
    /// Finished successfully (or aged out of the queue).
    Completed,
    /// Finished unsuccessfully.
    Failed,
    /// Cancelled by a user or operator.
    Cancelled,
    /// Reported state not covered by the alias table.
    Unknown,
}

impl JobState {
    /// Whether the job can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
            JobState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Mints a fresh batch token. Implemented by the transport tunnel in
/// production and by fixtures in tests.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Returns a fresh token for the next request.
    async fn batch_token(&self) -> Result<String, Error>;
}

/// Submission payload: the job script plus its description.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitPayload {
    /// Batch script, `#!`-prefixed.
    pub script: String,
    /// Job description.
    pub job: JobDescription,
}

/// Job description fields of the submission API.
#[derive(Debug, Clone, Serialize)]
pub struct JobDescription {
    /// Account to charge.
    pub account: String,
    /// Quality-of-service class.
    pub qos: String,
    /// Wall time limit in minutes.
    pub time_limit: u32,
    /// Working directory for the job (receives the log files).
    pub current_working_directory: String,
    /// Job name.
    pub name: String,
    /// Node count.
    pub nodes: u32,
    /// CPUs per task.
    pub cpus_per_task: u32,
    /// Memory per CPU (scheduler syntax).
    pub memory_per_cpu: String,
    /// Partition, derived from the GPU request.
    pub partition: String,
    /// Stdout template (`%j` expands to the job id).
    pub standard_output: String,
    /// Stderr template.
    pub standard_error: String,
    /// Environment as `KEY=VALUE` strings.
    pub environment: Vec<String>,
}

/// Allocation details for one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobDetails {
    /// Job id.
    pub id: String,
    /// Job name.
    pub name: String,
    /// Canonical state.
    pub state: JobState,
    /// Assigned compute nodes, expanded.
    pub nodes: Vec<String>,
    /// Node count.
    pub node_count: u32,
    /// Partition.
    pub partition: String,
    /// Account.
    pub account: String,
}

/// One row of a queue listing.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    /// Job id.
    pub id: String,
    /// Job name.
    pub name: String,
    /// Canonical state.
    pub status: JobState,
    /// Account.
    pub account: String,
    /// Partition.
    pub partition: String,
    /// Node count.
    pub nodes: u32,
    /// Owning user.
    pub user: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    job_id: Option<u64>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct JobsResponse {
    #[serde(default)]
    jobs: Vec<JobRecord>,
}

/// Remote job state: some API versions report a string, newer ones a
/// list of flags with the state first.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StateField {
    One(String),
    Many(Vec<String>),
}

impl StateField {
    fn first(&self) -> Option<&str> {
        match self {
            StateField::One(s) => Some(s.as_str()),
            StateField::Many(v) => v.first().map(String::as_str),
        }
    }
}

/// Node count: a bare number or `{"number": n}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NodeCount {
    Number(u32),
    Wrapped { number: u32 },
}

impl NodeCount {
    fn value(&self) -> u32 {
        match self {
            NodeCount::Number(n) | NodeCount::Wrapped { number: n } => *n,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JobRecord {
    #[serde(default)]
    job_id: Option<u64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    job_state: Option<StateField>,
    #[serde(default)]
    nodes: Option<String>,
    #[serde(default)]
    node_list: Option<String>,
    #[serde(default)]
    job_resources: Option<serde_json::Value>,
    #[serde(default)]
    node_count: Option<NodeCount>,
    #[serde(default)]
    partition: Option<String>,
    #[serde(default)]
    account: Option<String>,
    #[serde(default)]
    user_name: Option<String>,
    #[serde(default)]
    batch_host: Option<String>,
    #[serde(default)]
    allocating_node: Option<String>,
}

impl JobRecord {
    fn state_str(&self) -> Option<&str> {
        self.job_state.as_ref().and_then(StateField::first)
    }

    /// Allocated node names. Deployments expose them in different
    /// fields; prefer the compact string forms, then the structured
    /// allocation list, then the batch host.
    fn allocated_nodes(&self) -> Vec<String> {
        let compact = self
            .nodes
            .clone()
            .or_else(|| self.node_list.clone())
            .or_else(|| {
                self.job_resources.as_ref().and_then(|jr| {
                    jr.get("nodes")
                        .or_else(|| jr.get("node_list"))
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                })
            });
        if let Some(s) = compact {
            let parsed = parse_node_list(&s);
            if !parsed.is_empty() {
                return parsed;
            }
        }

        if let Some(jr) = &self.job_resources {
            let alloc = jr.get("allocated_nodes").or_else(|| jr.get("allocated_hosts"));
            if let Some(items) = alloc.and_then(|v| v.as_array()) {
                let mut nodes = Vec::new();
                for item in items {
                    if let Some(name) = item.get("nodename").and_then(|v| v.as_str()) {
                        nodes.push(name.to_string());
                    } else if let Some(name) = item.as_str() {
                        nodes.push(name.to_string());
                    }
                }
                if !nodes.is_empty() {
                    return nodes;
                }
            }
        }

        self.allocating_node
            .clone()
            .or_else(|| self.batch_host.clone())
            .map(|n| vec![n])
            .unwrap_or_default()
    }
}

/// Strips the port suffix off a composite replica id.
fn job_part(id: &str) -> &str {
    id.split(':').next().unwrap_or(id)
}

/// Client for the batch REST API.
///
/// The HTTP client is injected so production traffic can ride the
/// transport's proxied session while tests hit a local mock.
pub struct BatchClient {
    http: reqwest::Client,
    base_url: String,
    accounting_url: String,
    username: String,
    tokens: Arc<dyn TokenSource>,
    aliases: StatusAliases,
}

impl BatchClient {
    /// Creates a client for a base URL of the form
    /// `http://host:port/slurm/v0.0.40`. The accounting base is
    /// derived by swapping the API family segment.
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        username: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        let base_url: String = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_string();
        let accounting_url = base_url.replace("/slurm/", "/slurmdb/");
        Self {
            http,
            base_url,
            accounting_url,
            username: username.into(),
            tokens,
            aliases: StatusAliases::default(),
        }
    }

    /// Replaces the status alias table.
    pub fn with_aliases(mut self, aliases: StatusAliases) -> Self {
        self.aliases = aliases;
        self
    }

    async fn authed(
        &self,
        method: reqwest::Method,
        url: &str,
    ) -> Result<reqwest::RequestBuilder, Error> {
        let token = self.tokens.batch_token().await?;
        Ok(self
            .http
            .request(method, url)
            .header(USER_HEADER, &self.username)
            .header(TOKEN_HEADER, token)
            .header(reqwest::header::CONTENT_TYPE, "application/json"))
    }

    /// Submits a job. A fresh token is minted for exactly this call.
    /// Returns the numeric job id as a string.
    pub async fn submit(&self, payload: &SubmitPayload) -> Result<String, Error> {
        info!(name = %payload.job.name, partition = %payload.job.partition, "submitting batch job");
        let response = self
            .authed(reqwest::Method::POST, &format!("{}/job/submit", self.base_url))
            .await?
            .json(payload)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|source| Error::Request { source })?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        if !(200..300).contains(&status) {
            return Err(Error::Api {
                status,
                body: body.chars().take(500).collect(),
            });
        }

        let parsed: SubmitResponse =
            serde_json::from_str(&body).map_err(|e| Error::Rejected {
                details: format!("unparseable submit response: {e}"),
            })?;
        if !parsed.errors.is_empty() {
            return Err(Error::Rejected {
                details: format!("API errors: {:?}", parsed.errors),
            });
        }
        match parsed.job_id {
            Some(id) if id > 0 => {
                info!(job_id = id, "job submitted");
                Ok(id.to_string())
            }
            _ => Err(Error::Rejected {
                details: "submission returned no usable job id".to_string(),
            }),
        }
    }

    /// Cancels a job. Idempotent: cancelling an unknown or already
    /// terminal job succeeds.
    pub async fn cancel(&self, job_id: &str) -> Result<(), Error> {
        let id = job_part(job_id);
        let response = self
            .authed(reqwest::Method::DELETE, &format!("{}/job/{id}", self.base_url))
            .await?
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|source| Error::Request { source })?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) || status == 404 {
            debug!(job_id = id, status, "cancel acknowledged");
            Ok(())
        } else {
            Err(Error::Api {
                status,
                body: response.text().await.unwrap_or_default().chars().take(500).collect(),
            })
        }
    }

    /// Canonical state of a job. Jobs missing from the live queue are
    /// looked up in accounting history; jobs absent there count as
    /// completed.
    pub async fn status(&self, job_id: &str) -> Result<JobState, Error> {
        let id = job_part(job_id);
        if let Some(record) = self.fetch_job(&self.base_url, id).await? {
            if let Some(raw) = record.state_str() {
                return Ok(self.aliases.map(raw));
            }
        }
        match self.fetch_job(&self.accounting_url, id).await {
            Ok(Some(record)) => Ok(record
                .state_str()
                .map(|raw| self.aliases.map(raw))
                .unwrap_or(JobState::Completed)),
            Ok(None) => Ok(JobState::Completed),
            Err(e) => {
                warn!(job_id = id, error = %e, "accounting lookup failed");
                Ok(JobState::Completed)
            }
        }
    }

    /// Allocation details (assigned node list) for a job.
    pub async fn details(&self, job_id: &str) -> Result<Option<JobDetails>, Error> {
        let id = job_part(job_id);
        let Some(record) = self.fetch_job(&self.base_url, id).await? else {
            return Ok(None);
        };
        let nodes = record.allocated_nodes();
        let node_count = record
            .node_count
            .as_ref()
            .map(NodeCount::value)
            .unwrap_or(nodes.len() as u32);
        Ok(Some(JobDetails {
            id: id.to_string(),
            name: record.name.clone().unwrap_or_default(),
            state: record
                .state_str()
                .map(|raw| self.aliases.map(raw))
                .unwrap_or(JobState::Unknown),
            nodes,
            node_count,
            partition: record.partition.clone().unwrap_or_default(),
            account: record.account.clone().unwrap_or_default(),
        }))
    }

    /// Lists the caller's jobs from the live queue.
    pub async fn list_jobs(&self) -> Result<Vec<JobSummary>, Error> {
        let response = self
            .authed(reqwest::Method::GET, &format!("{}/jobs", self.base_url))
            .await?
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|source| Error::Request { source })?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        if !(200..300).contains(&status) {
            return Err(Error::Api {
                status,
                body: body.chars().take(500).collect(),
            });
        }
        let parsed: JobsResponse = serde_json::from_str(&body).unwrap_or(JobsResponse {
            jobs: Vec::new(),
        });
        Ok(parsed
            .jobs
            .into_iter()
            .filter(|j| j.user_name.as_deref() == Some(self.username.as_str()))
            .map(|j| JobSummary {
                id: j.job_id.map(|v| v.to_string()).unwrap_or_default(),
                name: j.name.clone().unwrap_or_else(|| "unnamed".to_string()),
                status: j
                    .state_str()
                    .map(|raw| self.aliases.map(raw))
                    .unwrap_or(JobState::Unknown),
                account: j.account.clone().unwrap_or_default(),
                partition: j.partition.clone().unwrap_or_default(),
                nodes: j.node_count.as_ref().map(NodeCount::value).unwrap_or(0),
                user: j.user_name.clone().unwrap_or_default(),
            })
            .collect())
    }

    /// GETs one job record, treating 404 and empty lists as absence.
    async fn fetch_job(&self, base: &str, id: &str) -> Result<Option<JobRecord>, Error> {
        let response = self
            .authed(reqwest::Method::GET, &format!("{base}/job/{id}"))
            .await?
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await
            .map_err(|source| Error::Request { source })?;

        let status = response.status().as_u16();
        if status == 404 {
            return Ok(None);
        }
        let body = response.text().await.unwrap_or_default();
        if !(200..300).contains(&status) {
            return Err(Error::Api {
                status,
                body: body.chars().take(500).collect(),
            });
        }
        let parsed: JobsResponse = serde_json::from_str(&body).unwrap_or(JobsResponse {
            jobs: Vec::new(),
        });
        Ok(parsed.jobs.into_iter().next())
    }
}

impl std::fmt::Debug for BatchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct CountingTokens {
        minted: AtomicUsize,
    }

    #[async_trait]
    impl TokenSource for CountingTokens {
        async fn batch_token(&self) -> Result<String, Error> {
            let n = self.minted.fetch_add(1, Ordering::SeqCst);
            Ok(format!("tok-{n}"))
        }
    }

    fn client(server: &MockServer) -> (BatchClient, Arc<CountingTokens>) {
        let tokens = Arc::new(CountingTokens {
            minted: AtomicUsize::new(0),
        });
        let client = BatchClient::new(
            reqwest::Client::new(),
            format!("{}/slurm/v0.0.40", server.uri()),
            "alice",
            tokens.clone(),
        );
        (client, tokens)
    }

    fn payload() -> SubmitPayload {
        SubmitPayload {
            script: "#!/bin/bash -l\necho hi\n".to_string(),
            job: JobDescription {
                account: "p200776".to_string(),
                qos: "short".to_string(),
                time_limit: 60,
                current_working_directory: "/remote/base/logs".to_string(),
                name: "vllm-single-node".to_string(),
                nodes: 1,
                cpus_per_task: 4,
                memory_per_cpu: "8G".to_string(),
                partition: "gpu".to_string(),
                standard_output: "vllm-single-node_%j.out".to_string(),
                standard_error: "vllm-single-node_%j.err".to_string(),
                environment: vec!["USER=alice".to_string()],
            },
        }
    }

    #[tokio::test]
    async fn submit_returns_job_id_and_mints_fresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/slurm/v0.0.40/job/submit"))
            .and(header(USER_HEADER, "alice"))
            .and(header(TOKEN_HEADER, "tok-0"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"job_id": 3642874})),
            )
            .mount(&server)
            .await;

        let (client, tokens) = client(&server);
        let id = client.submit(&payload()).await.expect("submit");
        assert_eq!(id, "3642874");
        assert_eq!(tokens.minted.load(Ordering::SeqCst), 1);

        // A second submission mints another token.
        Mock::given(method("POST"))
            .and(path("/slurm/v0.0.40/job/submit"))
            .and(header(TOKEN_HEADER, "tok-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"job_id": 3642875})),
            )
            .mount(&server)
            .await;
        let _ = client.submit(&payload()).await.expect("second submit");
        assert_eq!(tokens.minted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn submit_rejects_zero_or_missing_job_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/slurm/v0.0.40/job/submit"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"job_id": 0})),
            )
            .mount(&server)
            .await;

        let (client, _) = client(&server);
        assert!(matches!(
            client.submit(&payload()).await,
            Err(Error::Rejected { .. })
        ));
    }

    #[tokio::test]
    async fn submit_surfaces_api_error_arrays() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/slurm/v0.0.40/job/submit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"errors": [{"error": "invalid account"}]}),
            ))
            .mount(&server)
            .await;

        let (client, _) = client(&server);
        let err = client.submit(&payload()).await.expect_err("must fail");
        assert!(err.to_string().contains("invalid account"));
    }

    #[tokio::test]
    async fn status_maps_live_queue_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slurm/v0.0.40/job/3642874"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"jobs": [{"job_id": 3642874, "job_state": ["RUNNING"]}]}),
            ))
            .mount(&server)
            .await;

        let (client, _) = client(&server);
        assert_eq!(client.status("3642874").await.expect("status"), JobState::Running);
        // Composite replica ids strip to the job id.
        assert_eq!(
            client.status("3642874:8002").await.expect("status"),
            JobState::Running
        );
    }

    #[tokio::test]
    async fn status_falls_back_to_accounting_then_completed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slurm/v0.0.40/job/11"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/slurmdb/v0.0.40/job/11"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (client, _) = client(&server);
        assert_eq!(client.status("11").await.expect("status"), JobState::Completed);
    }

    #[tokio::test]
    async fn status_uses_accounting_record_when_present() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slurm/v0.0.40/job/12"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/slurmdb/v0.0.40/job/12"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"jobs": [{"job_id": 12, "job_state": "FAILED"}]}),
            ))
            .mount(&server)
            .await;

        let (client, _) = client(&server);
        assert_eq!(client.status("12").await.expect("status"), JobState::Failed);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/slurm/v0.0.40/job/99"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (client, _) = client(&server);
        client.cancel("99").await.expect("first cancel");
        client.cancel("99").await.expect("second cancel");
    }

    #[tokio::test]
    async fn details_expand_compact_node_lists() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slurm/v0.0.40/job/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jobs": [{
                    "job_id": 7,
                    "name": "vllm-replicas",
                    "job_state": "RUNNING",
                    "nodes": "mel[2001-2003]",
                    "node_count": {"number": 3},
                    "partition": "gpu",
                    "account": "p200776"
                }]
            })))
            .mount(&server)
            .await;

        let (client, _) = client(&server);
        let details = client.details("7").await.expect("details").expect("present");
        assert_eq!(details.nodes, vec!["mel2001", "mel2002", "mel2003"]);
        assert_eq!(details.node_count, 3);
        assert_eq!(details.state, JobState::Running);
    }

    #[tokio::test]
    async fn details_fall_back_to_allocated_node_objects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slurm/v0.0.40/job/8"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jobs": [{
                    "job_id": 8,
                    "job_state": "RUNNING",
                    "job_resources": {"allocated_nodes": [{"nodename": "mel2133"}]}
                }]
            })))
            .mount(&server)
            .await;

        let (client, _) = client(&server);
        let details = client.details("8").await.expect("details").expect("present");
        assert_eq!(details.nodes, vec!["mel2133"]);
    }
}
