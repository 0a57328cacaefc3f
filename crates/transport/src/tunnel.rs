// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Persistent control channel to the login host.
//!
//! A multiplexing master connection is kept alive and reused by every
//! command invocation. Authentication rides on the invoking user's
//! agent; no key material passes through this process.

use crate::error::Error;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How long a successful liveness probe is trusted.
const CONTROL_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Attempts to (re)build the master connection before giving up.
const MAX_CONNECT_ATTEMPTS: u32 = 3;

/// Connection parameters for the login host.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Login host name.
    pub host: String,
    /// Remote user.
    pub user: String,
    /// SSH port.
    pub port: u16,
    /// Directory for multiplexing sockets.
    pub control_socket_dir: PathBuf,
}

impl TunnelConfig {
    /// `user@host` target string.
    pub fn target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Result of one remote command invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Whether the command exited zero.
    pub ok: bool,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

#[derive(Debug, Default)]
struct ControlState {
    active: bool,
    last_check: Option<Instant>,
}

/// The persistent control channel.
pub struct Tunnel {
    config: TunnelConfig,
    control_socket: PathBuf,
    state: Mutex<ControlState>,
}

impl Tunnel {
    /// Creates the tunnel handle. The master connection is built
    /// lazily on first use.
    pub fn new(config: TunnelConfig) -> Self {
        let control_socket = config.control_socket_dir.join(format!(
            "master-{}@{}:{}",
            config.user, config.host, config.port
        ));
        Self {
            config,
            control_socket,
            state: Mutex::new(ControlState::default()),
        }
    }

    /// Base ssh arguments shared by every invocation.
    fn base_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.config.port != 22 {
            args.push("-p".to_string());
            args.push(self.config.port.to_string());
        }
        // Containerized deployments have no stable known_hosts.
        args.push("-o".to_string());
        args.push("StrictHostKeyChecking=no".to_string());
        args.push("-o".to_string());
        args.push("UserKnownHostsFile=/dev/null".to_string());
        args
    }

    /// Command string usable as rsync's `-e` transport.
    pub fn ssh_transport_command(&self) -> String {
        let mut cmd = "ssh".to_string();
        for arg in self.base_args() {
            cmd.push(' ');
            cmd.push_str(&arg);
        }
        cmd.push_str(&format!(" -S {}", self.control_socket.display()));
        cmd
    }

    /// Executes a command on the login host over the multiplexed
    /// connection, with the given deadline.
    pub async fn execute(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, Error> {
        self.ensure_control_master().await?;

        let mut args = self.base_args();
        args.push("-S".to_string());
        args.push(self.control_socket.display().to_string());
        args.push(self.config.target());
        args.push(command.to_string());

        let output = run_with_timeout("ssh", &args, timeout).await.map_err(|e| match e {
            Error::CommandTimeout { timeout_secs, .. } => Error::CommandTimeout {
                command: command.to_string(),
                timeout_secs,
            },
            other => other,
        })?;
        Ok(output)
    }

    /// Mints a fresh batch-API token by running the scheduler's token
    /// command on the login host. Tokens are never cached.
    pub async fn batch_token(&self) -> Result<String, Error> {
        debug!("fetching batch token from login host");
        let out = self.execute("scontrol token", Duration::from_secs(10)).await?;
        if !out.ok {
            return Err(Error::CommandFailed {
                command: "scontrol token".to_string(),
                stderr: out.stderr,
            });
        }
        parse_token_line(&out.stdout, "SLURM_JWT").ok_or_else(|| Error::TokenParse {
            output: out.stdout.chars().take(200).collect(),
        })
    }

    /// Creates remote directories (with parents), retrying because
    /// remote filesystem operations can be slow.
    pub async fn create_remote_dirs(&self, paths: &[&str]) -> Result<(), Error> {
        let dirs = paths.join("' '");
        let command = format!("mkdir -p '{dirs}'");
        let mut last_stderr = String::new();
        for attempt in 1..=MAX_CONNECT_ATTEMPTS {
            match self.execute(&command, Duration::from_secs(30)).await {
                Ok(out) if out.ok => return Ok(()),
                Ok(out) => {
                    warn!(attempt, stderr = %out.stderr, "remote mkdir failed");
                    last_stderr = out.stderr;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "remote mkdir errored");
                    last_stderr = e.to_string();
                }
            }
            if attempt < MAX_CONNECT_ATTEMPTS {
                tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
            }
        }
        Err(Error::CommandFailed {
            command,
            stderr: last_stderr,
        })
    }

    /// Pushes a local directory to the remote path. Exclude patterns
    /// are passed straight to rsync. Does not hold the control-state
    /// lock while transferring.
    pub async fn sync_to_remote(
        &self,
        local_dir: &str,
        remote_dir: &str,
        exclude_patterns: &[&str],
    ) -> Result<(), Error> {
        self.create_remote_dirs(&[remote_dir]).await?;

        let mut args: Vec<String> = vec![
            "-az".to_string(),
            "--delete".to_string(),
            "-e".to_string(),
            self.ssh_transport_command(),
        ];
        for pattern in exclude_patterns {
            args.push("--exclude".to_string());
            args.push((*pattern).to_string());
        }
        args.push(format!("{}/", local_dir.trim_end_matches('/')));
        args.push(format!("{}:{}/", self.config.target(), remote_dir.trim_end_matches('/')));

        let out = run_with_timeout("rsync", &args, Duration::from_secs(60)).await?;
        if out.ok {
            info!(local = local_dir, remote = remote_dir, "synced directory to remote");
            Ok(())
        } else {
            Err(Error::SyncFailed {
                direction: "push",
                path: local_dir.to_string(),
                details: out.stderr,
            })
        }
    }

    /// Pulls a remote directory into a local path, incrementally.
    pub async fn sync_from_remote(
        &self,
        remote_dir: &str,
        local_dir: &str,
        exclude_patterns: &[&str],
    ) -> Result<(), Error> {
        std::fs::create_dir_all(local_dir).map_err(|source| Error::Subprocess {
            program: "mkdir".to_string(),
            source,
        })?;

        let mut args: Vec<String> = vec![
            "--recursive".to_string(),
            "--compress".to_string(),
            "--inplace".to_string(),
            "--quiet".to_string(),
            "--append".to_string(),
            "--copy-unsafe-links".to_string(),
            "--delete".to_string(),
            "--timeout=60".to_string(),
            "-e".to_string(),
            self.ssh_transport_command(),
        ];
        for pattern in exclude_patterns {
            args.push("--exclude".to_string());
            args.push((*pattern).to_string());
        }
        args.push(format!("{}:{}/", self.config.target(), remote_dir.trim_end_matches('/')));
        args.push(local_dir.to_string());

        let out = run_with_timeout("rsync", &args, Duration::from_secs(60)).await?;
        if out.ok {
            Ok(())
        } else {
            Err(Error::SyncFailed {
                direction: "pull",
                path: remote_dir.to_string(),
                details: out.stderr,
            })
        }
    }

    /// Makes sure the master connection is alive, probing at most once
    /// per [`CONTROL_CHECK_INTERVAL`] and rebuilding with backoff when
    /// the probe fails.
    async fn ensure_control_master(&self) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        if state.active
            && state
                .last_check
                .is_some_and(|at| at.elapsed() < CONTROL_CHECK_INTERVAL)
        {
            return Ok(());
        }

        if self.control_socket.exists() && self.check_master().await {
            debug!("control master connection is alive");
            state.active = true;
            state.last_check = Some(Instant::now());
            return Ok(());
        }

        let mut last_error = String::new();
        for attempt in 1..=MAX_CONNECT_ATTEMPTS {
            match self.spawn_master().await {
                Ok(()) => {
                    info!(target = %self.config.target(), "control master established");
                    state.active = true;
                    state.last_check = Some(Instant::now());
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "control master construction failed");
                    last_error = e.to_string();
                }
            }
            if attempt < MAX_CONNECT_ATTEMPTS {
                tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
            }
        }
        state.active = false;
        Err(Error::TunnelUnavailable {
            target: self.config.target(),
            details: last_error,
        })
    }

    async fn check_master(&self) -> bool {
        let mut args = self.base_args();
        args.push("-S".to_string());
        args.push(self.control_socket.display().to_string());
        args.push("-O".to_string());
        args.push("check".to_string());
        args.push(self.config.target());
        matches!(
            run_with_timeout("ssh", &args, Duration::from_secs(2)).await,
            Ok(out) if out.ok
        )
    }

    async fn spawn_master(&self) -> Result<(), Error> {
        std::fs::create_dir_all(&self.config.control_socket_dir).map_err(|source| {
            Error::Subprocess {
                program: "mkdir".to_string(),
                source,
            }
        })?;

        let mut args = self.base_args();
        args.extend(
            [
                "-M",
                "-S",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(self.control_socket.display().to_string());
        args.extend(
            [
                "-o",
                "ControlPersist=600",
                "-o",
                "ServerAliveInterval=60",
                "-o",
                "ServerAliveCountMax=3",
                "-o",
                "ExitOnForwardFailure=yes",
                "-fN",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(self.config.target());

        let out = run_with_timeout("ssh", &args, Duration::from_secs(15)).await?;
        if !out.ok {
            return Err(Error::TunnelUnavailable {
                target: self.config.target(),
                details: out.stderr,
            });
        }

        // The socket appears shortly after ssh backgrounds itself.
        tokio::time::sleep(Duration::from_millis(500)).await;
        if self.control_socket.exists() {
            Ok(())
        } else {
            Err(Error::TunnelUnavailable {
                target: self.config.target(),
                details: "control socket was not created".to_string(),
            })
        }
    }
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("target", &self.config.target())
            .field("control_socket", &self.control_socket)
            .finish_non_exhaustive()
    }
}

/// Runs a local program with args under a deadline, capturing output.
async fn run_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<CommandOutput, Error> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => Ok(CommandOutput {
            ok: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Ok(Err(source)) => Err(Error::Subprocess {
            program: program.to_string(),
            source,
        }),
        Err(_) => Err(Error::CommandTimeout {
            command: format!("{program} {}", args.join(" ")),
            timeout_secs: timeout.as_secs(),
        }),
    }
}

/// Parses a `KEY=VALUE` token line; exposed for the token contract.
pub fn parse_token_line(stdout: &str, key: &str) -> Option<String> {
    let prefix = format!("{key}=");
    stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix(prefix.as_str()))
        .map(|token| token.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TunnelConfig {
        TunnelConfig {
            host: "login.cluster.example.org".to_string(),
            user: "alice".to_string(),
            port: 8822,
            control_socket_dir: PathBuf::from("/tmp/ssh-control-sockets"),
        }
    }

    #[test]
    fn target_and_socket_naming() {
        let tunnel = Tunnel::new(config());
        assert_eq!(tunnel.config.target(), "alice@login.cluster.example.org");
        assert!(
            tunnel
                .control_socket
                .to_string_lossy()
                .ends_with("master-alice@login.cluster.example.org:8822")
        );
    }

    #[test]
    fn base_args_include_port_only_when_nonstandard() {
        let tunnel = Tunnel::new(config());
        let args = tunnel.base_args();
        assert_eq!(args[0], "-p");
        assert_eq!(args[1], "8822");

        let mut cfg = config();
        cfg.port = 22;
        let tunnel = Tunnel::new(cfg);
        assert!(!tunnel.base_args().contains(&"-p".to_string()));
    }

    #[test]
    fn token_line_parsing() {
        let out = "some banner\nSLURM_JWT=eyJhbGc.abc.def\n";
        assert_eq!(
            parse_token_line(out, "SLURM_JWT").as_deref(),
            Some("eyJhbGc.abc.def")
        );
        assert_eq!(parse_token_line("no token here", "SLURM_JWT"), None);
    }

    #[test]
    fn rsync_transport_command_reuses_control_socket() {
        let tunnel = Tunnel::new(config());
        let cmd = tunnel.ssh_transport_command();
        assert!(cmd.starts_with("ssh -p 8822"));
        assert!(cmd.contains("-S /tmp/ssh-control-sockets/master-alice@"));
    }
}
