// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! HTTP error mapping.
//!
//! Every error body is the canonical `{"detail": "<message>"}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Fatal server errors (startup only).
#[derive(Error, Debug)]
pub enum Error {
    /// The configured listen address could not be parsed.
    #[error("Invalid listen address '{listen}': {details}")]
    InvalidListenAddress {
        /// The address that failed to parse.
        listen: String,
        /// Human-readable details.
        details: String,
    },

    /// Binding the TCP listener failed.
    #[error("Failed to bind gateway on '{addr}': {details}")]
    BindFailed {
        /// The address we attempted to bind to.
        addr: String,
        /// Human-readable details.
        details: String,
    },

    /// The server failed while serving.
    #[error("Gateway server error on '{addr}': {details}")]
    ServerError {
        /// The bound address.
        addr: String,
        /// Human-readable details.
        details: String,
    },
}

/// A request-scoped error carrying its HTTP status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    /// Builds an error from status and message.
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    /// 400 with the given message.
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    /// 404 with the given message.
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "detail": self.detail }));
        (self.status, body).into_response()
    }
}

impl From<gridserve_orchestrator::Error> for ApiError {
    fn from(e: gridserve_orchestrator::Error) -> Self {
        use gridserve_orchestrator::Error as O;
        let status = match &e {
            O::NotFound { .. } => StatusCode::NOT_FOUND,
            O::NotReady { .. } => StatusCode::SERVICE_UNAVAILABLE,
            O::Conflict { .. } => StatusCode::CONFLICT,
            O::BadRequest { .. } => StatusCode::BAD_REQUEST,
            O::TransportUnavailable { .. } | O::Upstream { .. } => StatusCode::BAD_GATEWAY,
            O::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<gridserve_monitoring::Error> for ApiError {
    fn from(e: gridserve_monitoring::Error) -> Self {
        use gridserve_monitoring::Error as M;
        let status = match &e {
            M::SessionConflict { .. } => StatusCode::CONFLICT,
            M::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            M::EndpointResolve { .. } | M::ReloadFailed { .. } | M::StoreUnavailable { .. } => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}
