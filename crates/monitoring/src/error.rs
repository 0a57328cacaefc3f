// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for monitoring sessions.

use thiserror::Error;

/// Errors that can occur while managing monitoring sessions.
#[derive(Error, Debug)]
pub enum Error {
    /// A session is already RUNNING; only one may be active.
    #[error(
        "Cannot create new session: session '{active}' is already RUNNING. \
         Stop it first before creating a new session."
    )]
    SessionConflict {
        /// Id of the active session.
        active: String,
    },

    /// The session id is unknown.
    #[error("Unknown session_id: {id}")]
    SessionNotFound {
        /// The id that was looked up.
        id: String,
    },

    /// Reading or writing session state failed.
    #[error("Session state I/O failed for '{path}': {details}")]
    StateIo {
        /// File or directory involved.
        path: String,
        /// Human-readable details.
        details: String,
    },

    /// Rendering the scrape configuration failed.
    #[error("Failed to render scrape configuration: {details}")]
    Render {
        /// Human-readable details.
        details: String,
    },

    /// The metric store refused or failed the config reload. Hard
    /// error for whoever mutated the target set.
    #[error("Metric store reload failed: {details}")]
    ReloadFailed {
        /// Human-readable details.
        details: String,
    },

    /// The metric store is unreachable or not ready.
    #[error("Metric store unavailable: {details}")]
    StoreUnavailable {
        /// Human-readable details.
        details: String,
    },

    /// A range query failed.
    #[error("Range query failed ({query}): {details}")]
    QueryFailed {
        /// The PromQL expression.
        query: String,
        /// Human-readable details.
        details: String,
    },

    /// The gateway could not resolve a service's metrics endpoint.
    #[error("Failed to resolve endpoint for service {service_id}: {details}")]
    EndpointResolve {
        /// The service being registered.
        service_id: String,
        /// Human-readable details.
        details: String,
    },
}
