// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! HTTP gateway.
//!
//! All public routes live under `/api/v1`, composed from per-module
//! routers over one shared [`AppState`]. Errors carry the canonical
//! `{"detail": …}` body.

use axum::Router;
use gridserve_monitoring::SessionManager;
use gridserve_orchestrator::Orchestrator;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::info;

pub mod clients;
pub mod data_plane;
pub mod error;
pub mod health;
pub mod recipes;
pub mod service_groups;
pub mod services;
pub mod sessions;

pub use error::{ApiError, Error};

/// Shared state for every request handler.
#[derive(Clone)]
pub struct AppState {
    /// The control plane.
    pub orchestrator: Arc<Orchestrator>,
    /// The monitoring session manager.
    pub monitoring: Arc<SessionManager>,
    /// `host:port` under which this gateway is reachable; used in the
    /// scrape-target documents it hands out.
    pub gateway_host_port: String,
}

/// Builds the full router.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(health::routes())
        .merge(services::routes())
        .merge(service_groups::routes())
        .merge(recipes::routes())
        .merge(data_plane::routes())
        .merge(sessions::routes())
        .merge(clients::routes());

    Router::new()
        .nest("/api/v1", api)
        .layer(ServiceBuilder::new())
        .with_state(state)
}

/// Serves the gateway until the token fires.
pub async fn run(listen: &str, state: AppState, cancel: CancellationToken) -> Result<(), Error> {
    let addr = listen
        .parse::<SocketAddr>()
        .map_err(|e| Error::InvalidListenAddress {
            listen: listen.to_string(),
            details: e.to_string(),
        })?;

    let listener = TcpListener::bind(&addr).await.map_err(|e| Error::BindFailed {
        addr: addr.to_string(),
        details: e.to_string(),
    })?;

    info!(endpoint = %addr, "gateway listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
        .map_err(|e| Error::ServerError {
            addr: addr.to_string(),
            details: e.to_string(),
        })
}
