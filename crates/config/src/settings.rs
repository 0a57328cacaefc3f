// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Process-wide settings read from the environment.

use crate::error::Error;
use std::env;
use std::path::PathBuf;

/// Default batch REST API base, version prefix included.
pub const DEFAULT_BATCH_REST_URL: &str =
    "http://slurmrestd.hpc.example.org:6820/slurm/v0.0.40";

/// Everything the process needs to know about its surroundings:
/// the login host, the remote filesystem layout, the local listen
/// address and the metric store.
///
/// Credentials are never part of the settings. Authentication rides
/// on the invoking user's agent (`SSH_AUTH_SOCK`) and on tokens
/// minted on demand.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Login host of the cluster.
    pub ssh_host: String,
    /// User name on the cluster.
    pub ssh_user: String,
    /// SSH port of the login host.
    pub ssh_port: u16,
    /// Local port for the dynamic SOCKS forward.
    pub socks_port: u16,
    /// Remote base path where scripts, containers and logs live.
    pub remote_base_path: String,
    /// Batch REST API base URL (version prefix included).
    pub batch_rest_url: String,
    /// Default scheduler account for submissions.
    pub account: String,
    /// Address the gateway listens on.
    pub listen: String,
    /// Base URL under which the gateway itself is reachable; used to
    /// form the metrics URLs handed to the monitoring session.
    pub gateway_base_url: String,
    /// Metric store base URL.
    pub prometheus_url: String,
    /// Path of the shared scrape configuration file.
    pub prometheus_config_path: PathBuf,
    /// Directory for monitoring session state.
    pub monitoring_state_dir: PathBuf,
    /// Local recipes directory.
    pub recipes_dir: PathBuf,
}

impl Settings {
    /// Reads settings from the process environment.
    ///
    /// `SSH_HOST`, `SSH_USER` and `REMOTE_BASE_PATH` are required;
    /// everything else has a default. A missing `SSH_AUTH_SOCK` is
    /// only logged since deployments may provide agent access through
    /// other means.
    pub fn from_env() -> Result<Self, Error> {
        let require = |key: &str| {
            env::var(key).map_err(|_| Error::Environment {
                reason: format!("{key} must be set"),
            })
        };
        let ssh_host = require("SSH_HOST")?;
        let ssh_user = require("SSH_USER")?;
        let remote_base_path = require("REMOTE_BASE_PATH")?;

        if env::var("SSH_AUTH_SOCK").is_err() {
            tracing::warn!("SSH_AUTH_SOCK not set; agent forwarding may not work");
        }

        let ssh_port = env::var("SSH_PORT")
            .ok()
            .map(|v| {
                v.parse::<u16>().map_err(|_| Error::Environment {
                    reason: format!("SSH_PORT is not a port number: '{v}'"),
                })
            })
            .transpose()?
            .unwrap_or(22);
        let socks_port = env::var("GRIDSERVE_SOCKS_PORT")
            .ok()
            .map(|v| {
                v.parse::<u16>().map_err(|_| Error::Environment {
                    reason: format!("GRIDSERVE_SOCKS_PORT is not a port number: '{v}'"),
                })
            })
            .transpose()?
            .unwrap_or(1080);

        let listen =
            env::var("GRIDSERVE_LISTEN").unwrap_or_else(|_| "0.0.0.0:8001".to_string());
        let gateway_base_url = env::var("GRIDSERVE_BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{}", listen_port(&listen)));

        Ok(Self {
            ssh_host,
            ssh_user,
            ssh_port,
            socks_port,
            remote_base_path,
            batch_rest_url: env::var("SLURM_REST_URL")
                .unwrap_or_else(|_| DEFAULT_BATCH_REST_URL.to_string()),
            account: env::var("ORCHESTRATOR_ACCOUNT").unwrap_or_else(|_| "p200776".to_string()),
            listen,
            gateway_base_url,
            prometheus_url: env::var("PROMETHEUS_URL")
                .unwrap_or_else(|_| "http://localhost:9090".to_string()),
            prometheus_config_path: env::var("PROMETHEUS_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/app/config/prometheus.yml")),
            monitoring_state_dir: env::var("MONITORING_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/app/state")),
            recipes_dir: env::var("RECIPES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("recipes")),
        })
    }

    /// Remote directory receiving job stdout/stderr.
    pub fn remote_log_dir(&self) -> String {
        format!("{}/logs", self.remote_base_path.trim_end_matches('/'))
    }

    /// Remote recipes directory (containers and definitions).
    pub fn remote_recipes_dir(&self) -> String {
        format!("{}/recipes", self.remote_base_path.trim_end_matches('/'))
    }
}

fn listen_port(listen: &str) -> u16 {
    listen.rsplit(':').next().and_then(|p| p.parse().ok()).unwrap_or(8001)
}
