// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! gridserve: orchestrates AI inference and vector-database workloads
//! on a batch-scheduled HPC cluster.
//!
//! One process hosts the whole control plane: the transport tunnel to
//! the login host, the batch REST client, the orchestrator with its
//! readiness loop, the monitoring session manager, and the HTTP
//! gateway they are served through.

use async_trait::async_trait;
use clap::Parser;
use gridserve_batch::{BatchClient, StatusAliases, TokenSource};
use gridserve_config::settings::Settings;
use gridserve_config::store::RecipeStore;
use gridserve_monitoring::{MonitoringConfig, SessionManager};
use gridserve_orchestrator::readiness::spawn_readiness_loop;
use gridserve_orchestrator::{Orchestrator, OrchestratorConfig};
use gridserve_transport::{HttpForward, Tunnel, TunnelConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "gridserve", version, about = "AI workload orchestrator for HPC clusters")]
struct Args {
    /// Listen address; overrides GRIDSERVE_LISTEN.
    #[arg(long)]
    listen: Option<String>,

    /// Local recipes directory; overrides RECIPES_DIR.
    #[arg(long)]
    recipes_dir: Option<PathBuf>,

    /// Optional YAML file overlaying the scheduler status aliases.
    #[arg(long)]
    status_aliases: Option<PathBuf>,

    /// Skip the initial recipe sync to the remote base path.
    #[arg(long, default_value_t = false)]
    no_sync: bool,
}

/// Adapter handing the transport's token minting to the batch client.
struct TunnelTokens(Arc<Tunnel>);

#[async_trait]
impl TokenSource for TunnelTokens {
    async fn batch_token(&self) -> Result<String, gridserve_batch::Error> {
        self.0
            .batch_token()
            .await
            .map_err(|e| gridserve_batch::Error::Token {
                details: e.to_string(),
            })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "gridserve failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut settings = Settings::from_env()?;
    if let Some(listen) = args.listen {
        settings.listen = listen;
    }
    if let Some(recipes_dir) = args.recipes_dir {
        settings.recipes_dir = recipes_dir;
    }

    info!(
        host = %settings.ssh_host,
        user = %settings.ssh_user,
        remote_base = %settings.remote_base_path,
        "starting gridserve"
    );

    let tunnel_config = TunnelConfig {
        host: settings.ssh_host.clone(),
        user: settings.ssh_user.clone(),
        port: settings.ssh_port,
        control_socket_dir: PathBuf::from("/tmp/ssh-control-sockets"),
    };
    let tunnel = Arc::new(Tunnel::new(tunnel_config.clone()));
    let forward = Arc::new(HttpForward::new(tunnel_config, settings.socks_port));

    // Remote layout and recipe definitions have to exist before the
    // first submission references them.
    let remote_log_dir = settings.remote_log_dir();
    let remote_recipes_dir = settings.remote_recipes_dir();
    if let Err(e) = tunnel
        .create_remote_dirs(&[
            settings.remote_base_path.as_str(),
            remote_log_dir.as_str(),
            remote_recipes_dir.as_str(),
        ])
        .await
    {
        warn!(error = %e, "could not prepare remote directories");
    }
    if !args.no_sync {
        if let Err(e) = tunnel
            .sync_to_remote(
                &settings.recipes_dir.display().to_string(),
                &remote_recipes_dir,
                &["*.sif", ".git"],
            )
            .await
        {
            warn!(error = %e, "recipe sync failed; remote definitions may be stale");
        }
    }

    let mut batch = BatchClient::new(
        forward.proxied_client().await?,
        settings.batch_rest_url.clone(),
        settings.ssh_user.clone(),
        Arc::new(TunnelTokens(tunnel.clone())),
    );
    if let Some(aliases_path) = &args.status_aliases {
        batch = batch.with_aliases(StatusAliases::from_yaml_file(aliases_path)?);
    }

    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorConfig {
            username: settings.ssh_user.clone(),
            account: settings.account.clone(),
            remote_base_path: settings.remote_base_path.clone(),
            remote_recipes_dir,
            remote_log_dir,
        },
        Arc::new(RecipeStore::new(settings.recipes_dir.clone())),
        batch,
        forward,
        tunnel,
    ));

    let monitoring = Arc::new(SessionManager::new(MonitoringConfig {
        prometheus_url: settings.prometheus_url.clone(),
        config_path: settings.prometheus_config_path.clone(),
        state_dir: settings.monitoring_state_dir.clone(),
        gateway_base_url: settings.gateway_base_url.clone(),
        default_scrape_interval: "15s".to_string(),
    }));

    let cancel = CancellationToken::new();
    let readiness = spawn_readiness_loop(orchestrator.clone(), cancel.clone());

    let state = gridserve_gateway::AppState {
        orchestrator,
        monitoring,
        gateway_host_port: settings
            .gateway_base_url
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .trim_end_matches('/')
            .to_string(),
    };

    let server = gridserve_gateway::run(&settings.listen, state, cancel.clone());
    tokio::pin!(server);

    let result = tokio::select! {
        result = &mut server => result.map_err(Into::into),
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            cancel.cancel();
            server.await.map_err(Into::into)
        }
    };

    cancel.cancel();
    let _ = readiness.await;
    info!("gridserve stopped");
    result
}
