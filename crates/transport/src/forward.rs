// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Dynamic HTTP forward to compute nodes.
//!
//! A separate tunnel process provides a local SOCKS endpoint; all
//! data-plane HTTP traffic to compute nodes rides through it with
//! remote name resolution, so internal node names resolve on the
//! cluster side. If the forward process dies it is restarted on next
//! use and the HTTP client session is rebuilt.

use crate::error::Error;
use crate::tunnel::TunnelConfig;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One forwarded HTTP request to a compute node.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    /// HTTP method, upper case.
    pub method: String,
    /// Compute node host name.
    pub host: String,
    /// Target port on the node.
    pub port: u16,
    /// URL path including any query string.
    pub path: String,
    /// Extra headers.
    pub headers: Vec<(String, String)>,
    /// Optional JSON body.
    pub json: Option<serde_json::Value>,
    /// Request deadline.
    pub timeout: Duration,
}

impl ForwardRequest {
    /// Convenience GET with no headers or body.
    pub fn get(host: impl Into<String>, port: u16, path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: "GET".to_string(),
            host: host.into(),
            port,
            path: path.into(),
            headers: Vec::new(),
            json: None,
            timeout,
        }
    }

    /// Convenience POST carrying a JSON body.
    pub fn post_json(
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
        json: serde_json::Value,
        timeout: Duration,
    ) -> Self {
        Self {
            method: "POST".to_string(),
            host: host.into(),
            port,
            path: path.into(),
            headers: Vec::new(),
            json: Some(json),
            timeout,
        }
    }
}

/// Response of a forwarded request.
#[derive(Debug, Clone)]
pub struct ForwardResponse {
    /// Whether the status code is 2xx.
    pub ok: bool,
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: String,
}

impl ForwardResponse {
    /// Parses the body as JSON, if it is JSON.
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// HTTP access to compute nodes. The production implementation is
/// [`HttpForward`]; tests substitute a direct client.
#[async_trait]
pub trait ComputeHttp: Send + Sync {
    /// Performs one HTTP request against a compute node.
    async fn request(&self, req: ForwardRequest) -> Result<ForwardResponse, Error>;
}

struct ForwardState {
    child: Option<Child>,
    client: Option<reqwest::Client>,
}

/// The SOCKS dynamic forward and its proxied HTTP client.
pub struct HttpForward {
    config: TunnelConfig,
    socks_port: u16,
    state: Mutex<ForwardState>,
}

impl HttpForward {
    /// Creates the forward handle; the tunnel process starts lazily.
    pub fn new(config: TunnelConfig, socks_port: u16) -> Self {
        Self {
            config,
            socks_port,
            state: Mutex::new(ForwardState {
                child: None,
                client: None,
            }),
        }
    }

    /// A reqwest client routed through the forward. Used by callers
    /// that talk to cluster-internal HTTP APIs other than compute
    /// nodes (e.g. the batch REST API).
    pub async fn proxied_client(&self) -> Result<reqwest::Client, Error> {
        let mut state = self.state.lock().await;
        self.ensure_running(&mut state).await?;
        state.client.clone().ok_or_else(|| Error::ClientBuild {
            details: "proxied client missing after forward start".to_string(),
        })
    }

    async fn ensure_running(&self, state: &mut ForwardState) -> Result<(), Error> {
        let needs_start = match &mut state.child {
            None => true,
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => {
                    warn!(%status, "dynamic forward exited, restarting");
                    true
                }
                Ok(None) => false,
                Err(e) => {
                    warn!(error = %e, "dynamic forward state unknown, restarting");
                    true
                }
            },
        };
        if !needs_start {
            return Ok(());
        }

        let mut args: Vec<String> = Vec::new();
        if self.config.port != 22 {
            args.push("-p".to_string());
            args.push(self.config.port.to_string());
        }
        args.extend(
            [
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "UserKnownHostsFile=/dev/null",
                "-D",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(self.socks_port.to_string());
        args.extend(
            ["-N", "-o", "ExitOnForwardFailure=yes", "-o", "ServerAliveInterval=60"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push(self.config.target());

        let child = Command::new("ssh")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Subprocess {
                program: "ssh".to_string(),
                source,
            })?;
        info!(port = self.socks_port, pid = child.id().unwrap_or_default(), "dynamic forward established");
        state.child = Some(child);

        // A fresh forward invalidates pooled connections.
        let proxy = reqwest::Proxy::all(format!("socks5h://127.0.0.1:{}", self.socks_port))
            .map_err(|e| Error::ClientBuild {
                details: e.to_string(),
            })?;
        state.client = Some(
            reqwest::Client::builder()
                .proxy(proxy)
                .build()
                .map_err(|e| Error::ClientBuild {
                    details: e.to_string(),
                })?,
        );
        Ok(())
    }
}

#[async_trait]
impl ComputeHttp for HttpForward {
    async fn request(&self, req: ForwardRequest) -> Result<ForwardResponse, Error> {
        let client = {
            let mut state = self.state.lock().await;
            self.ensure_running(&mut state).await?;
            state.client.clone().ok_or_else(|| Error::ClientBuild {
                details: "proxied client missing after forward start".to_string(),
            })?
        };
        send_via(&client, req).await
    }
}

impl std::fmt::Debug for HttpForward {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpForward")
            .field("target", &self.config.target())
            .field("socks_port", &self.socks_port)
            .finish_non_exhaustive()
    }
}

/// Sends a [`ForwardRequest`] with an arbitrary client. Shared by the
/// production forward and test doubles.
pub async fn send_via(
    client: &reqwest::Client,
    req: ForwardRequest,
) -> Result<ForwardResponse, Error> {
    let url = format!("http://{}:{}{}", req.host, req.port, req.path);
    let method = reqwest::Method::from_bytes(req.method.as_bytes()).map_err(|_| {
        Error::ClientBuild {
            details: format!("invalid HTTP method '{}'", req.method),
        }
    })?;

    let mut builder = client.request(method, &url).timeout(req.timeout);
    for (name, value) in &req.headers {
        builder = builder.header(name, value);
    }
    if let Some(json) = &req.json {
        builder = builder.json(json);
    }

    let started = std::time::Instant::now();
    let response = builder.send().await.map_err(|e| {
        if e.is_timeout() {
            Error::RequestTimeout {
                host: req.host.clone(),
                port: req.port,
                path: req.path.clone(),
                timeout_secs: req.timeout.as_secs(),
            }
        } else {
            Error::Connect {
                host: req.host.clone(),
                port: req.port,
                details: e.to_string(),
            }
        }
    })?;

    let status = response.status().as_u16();
    let ok = response.status().is_success();
    let body = response.text().await.unwrap_or_default();
    debug!(
        method = %req.method,
        host = %req.host,
        port = req.port,
        path = %req.path,
        status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "forwarded HTTP request"
    );
    Ok(ForwardResponse { ok, status, body })
}
