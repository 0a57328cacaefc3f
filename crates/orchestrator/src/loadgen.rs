// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Load-generator dispatch.
//!
//! Load tests run as ordinary batch jobs built with the same
//! script-building contract as services: the orchestrator emits the
//! script, submits it over the tunnel, and exposes the job's logs and
//! result file. The workers themselves live in their own container
//! image on the cluster.

use crate::error::Error;
use crate::Orchestrator;
use gridserve_batch::{JobDescription, SubmitPayload};
use gridserve_config::script::{LoadGenSpec, build_load_generator_script};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

/// Outcome of a dispatched load-generation job.
#[derive(Debug, Clone, Serialize)]
pub struct LoadGenDispatch {
    /// The batch job running the workers.
    pub job_id: String,
    /// Client group this run belongs to.
    pub group_id: u32,
    /// Remote path of the results file the workers write.
    pub results_path: String,
}

impl Orchestrator {
    /// Submits a load-generation job for a client group.
    pub async fn dispatch_load_generator(
        &self,
        group_id: u32,
        time_limit_minutes: u32,
        spec: LoadGenSpec,
    ) -> Result<LoadGenDispatch, Error> {
        let script =
            build_load_generator_script(&spec, &self.config.remote_base_path, group_id);

        let job = JobDescription {
            account: self.config.account.clone(),
            qos: "short".to_string(),
            time_limit: time_limit_minutes,
            current_working_directory: self.config.remote_log_dir.clone(),
            name: format!("loadgen-{group_id}"),
            nodes: 1,
            cpus_per_task: 2,
            memory_per_cpu: "4G".to_string(),
            partition: "cpu".to_string(),
            standard_output: format!("loadgen-{group_id}-%j.out"),
            standard_error: format!("loadgen-{group_id}-%j.err"),
            environment: vec![format!("USER={}", self.config.username)],
        };

        let job_id = self.batch.submit(&SubmitPayload { script, job }).await?;
        info!(group_id, job_id = %job_id, service = %spec.service_id, "load generator dispatched");

        Ok(LoadGenDispatch {
            job_id,
            group_id,
            results_path: format!(
                "{}/loadgen-results-{group_id}.json",
                self.config.remote_log_dir
            ),
        })
    }

    /// Tails a load-generation job's logs over the control channel.
    pub async fn load_generator_logs(
        &self,
        group_id: u32,
        job_id: &str,
    ) -> Result<String, Error> {
        let stdout = format!("{}/loadgen-{group_id}-{job_id}.out", self.config.remote_log_dir);
        let container = format!(
            "{}/loadgen-{group_id}-container.log",
            self.config.remote_log_dir
        );
        let command = format!(
            "echo '=== STDOUT (last 200 lines) ==='; tail -n 200 {stdout} 2>/dev/null || echo 'Log not yet available'; \
             echo; echo '=== CONTAINER (last 100 lines) ==='; tail -n 100 {container} 2>/dev/null || echo 'No container log yet'"
        );
        let out = self.tunnel.execute(&command, Duration::from_secs(15)).await?;
        Ok(out.stdout)
    }

    /// Reads a run's results file, once the workers have written it.
    pub async fn load_generator_results(&self, group_id: u32) -> Result<serde_json::Value, Error> {
        let path = format!("{}/loadgen-results-{group_id}.json", self.config.remote_log_dir);
        let out = self
            .tunnel
            .execute(&format!("cat {path}"), Duration::from_secs(10))
            .await?;
        if !out.ok {
            return Err(Error::NotReady {
                reason: format!("results for group {group_id} are not available yet"),
            });
        }
        serde_json::from_str(&out.stdout).map_err(|e| Error::Upstream {
            status: 502,
            body: format!("unparseable results file: {e}"),
        })
    }
}
