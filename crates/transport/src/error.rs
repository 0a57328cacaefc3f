// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the transport layer.

use thiserror::Error;

/// Errors that can occur while talking to the cluster.
#[derive(Error, Debug)]
pub enum Error {
    /// The control channel could not be (re)built after retries.
    #[error("Tunnel to '{target}' unavailable: {details}")]
    TunnelUnavailable {
        /// `user@host` of the login host.
        target: String,
        /// Human-readable details of the last failure.
        details: String,
    },

    /// Spawning or driving a local subprocess failed.
    #[error("Failed to run '{program}': {source}")]
    Subprocess {
        /// The program we attempted to run.
        program: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A remote command did not finish within its deadline.
    #[error("Remote command timed out after {timeout_secs}s: {command}")]
    CommandTimeout {
        /// The command that was running.
        command: String,
        /// The deadline that elapsed.
        timeout_secs: u64,
    },

    /// A remote command ran but exited non-zero.
    #[error("Remote command failed ({command}): {stderr}")]
    CommandFailed {
        /// The command that ran.
        command: String,
        /// Captured standard error.
        stderr: String,
    },

    /// The forwarded HTTP request could not connect to the target.
    #[error("Connection to {host}:{port} failed: {details}")]
    Connect {
        /// Target compute node.
        host: String,
        /// Target port.
        port: u16,
        /// Human-readable details.
        details: String,
    },

    /// The forwarded HTTP request timed out.
    #[error("Request to {host}:{port}{path} timed out after {timeout_secs}s")]
    RequestTimeout {
        /// Target compute node.
        host: String,
        /// Target port.
        port: u16,
        /// Request path.
        path: String,
        /// The deadline that elapsed.
        timeout_secs: u64,
    },

    /// Building the proxied HTTP client failed.
    #[error("Failed to build HTTP client: {details}")]
    ClientBuild {
        /// Human-readable details.
        details: String,
    },

    /// Directory sync via rsync failed.
    #[error("Directory sync {direction} failed for '{path}': {details}")]
    SyncFailed {
        /// "push" or "pull".
        direction: &'static str,
        /// The directory involved.
        path: String,
        /// Human-readable details.
        details: String,
    },

    /// Token acquisition ran but produced no usable token.
    #[error("Could not parse batch token from command output: {output}")]
    TokenParse {
        /// The raw command output (truncated by the caller).
        output: String,
    },
}
