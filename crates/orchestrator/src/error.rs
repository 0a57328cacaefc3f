// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy of the control plane.
//!
//! Every fallible operation carries one of these kinds in its result;
//! nothing is raised across component boundaries. The gateway maps
//! kinds to HTTP statuses, callers inside the process branch on them
//! explicitly (`NotReady` in particular is an expected, transient
//! answer during startup).

use thiserror::Error;

/// Control-plane errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Service, group, recipe or collection does not exist.
    #[error("{what} not found: {id}")]
    NotFound {
        /// Kind of entity ("service", "service group", "recipe", …).
        what: &'static str,
        /// The id that was looked up.
        id: String,
    },

    /// Known entity, transient inability to serve.
    #[error("{reason}")]
    NotReady {
        /// Why the entity cannot serve yet.
        reason: String,
    },

    /// State conflict, e.g. a second monitoring session.
    #[error("{reason}")]
    Conflict {
        /// What conflicted.
        reason: String,
    },

    /// Input violates the schema or semantic constraints.
    #[error("{reason}")]
    BadRequest {
        /// What was wrong with the input.
        reason: String,
    },

    /// Tunnel, forward or batch API unreachable after retries.
    #[error("Transport unavailable: {details}")]
    TransportUnavailable {
        /// Human-readable details of the last failure.
        details: String,
    },

    /// An authenticated upstream returned a non-success status.
    #[error("Upstream returned {status}: {body}")]
    Upstream {
        /// Upstream HTTP status.
        status: u16,
        /// Upstream body, truncated.
        body: String,
    },

    /// Unexpected failure; logged with a correlation id.
    #[error("Internal error [{correlation_id}]: {details}")]
    Internal {
        /// Correlation id echoed in the log record.
        correlation_id: String,
        /// Human-readable details.
        details: String,
    },
}

impl Error {
    /// Wraps an unexpected failure with a fresh correlation id and
    /// logs it.
    pub fn internal(details: impl Into<String>) -> Self {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let details = details.into();
        tracing::error!(correlation_id = %correlation_id, details = %details, "internal error");
        Error::Internal {
            correlation_id,
            details,
        }
    }
}

impl From<gridserve_batch::Error> for Error {
    fn from(e: gridserve_batch::Error) -> Self {
        use gridserve_batch::Error as B;
        match e {
            B::Token { details } => Error::TransportUnavailable {
                details: format!("token acquisition failed: {details}"),
            },
            B::Request { source } => Error::TransportUnavailable {
                details: source.to_string(),
            },
            B::Api { status, body } => Error::Upstream { status, body },
            B::Rejected { details } => Error::Upstream {
                status: 502,
                body: details,
            },
            B::AliasTable { .. } => Error::internal(e.to_string()),
        }
    }
}

impl From<gridserve_transport::Error> for Error {
    fn from(e: gridserve_transport::Error) -> Self {
        use gridserve_transport::Error as T;
        match e {
            T::Connect { .. } | T::RequestTimeout { .. } => Error::NotReady {
                reason: e.to_string(),
            },
            T::TunnelUnavailable { .. } | T::ClientBuild { .. } => Error::TransportUnavailable {
                details: e.to_string(),
            },
            other => Error::internal(other.to_string()),
        }
    }
}

impl From<gridserve_config::error::Error> for Error {
    fn from(e: gridserve_config::error::Error) -> Self {
        use gridserve_config::error::Error as C;
        match e {
            C::RecipeNotFound { name } => Error::NotFound {
                what: "recipe",
                id: name,
            },
            C::RecipeInvalid { .. } => Error::BadRequest {
                reason: e.to_string(),
            },
            other => Error::internal(other.to_string()),
        }
    }
}
