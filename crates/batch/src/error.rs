// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the batch REST client.

use thiserror::Error;

/// Errors that can occur while talking to the batch scheduler.
#[derive(Error, Debug)]
pub enum Error {
    /// A fresh token could not be acquired. Fatal to the request
    /// that needed it.
    #[error("Batch token acquisition failed: {details}")]
    Token {
        /// Human-readable details.
        details: String,
    },

    /// The HTTP request itself failed (connect, timeout, protocol).
    #[error("Batch API request failed: {source}")]
    Request {
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The API answered with a non-success status.
    #[error("Batch API returned {status}: {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The API accepted the call but the payload is unusable
    /// (errors array, missing or zero job id).
    #[error("Batch API rejected the request: {details}")]
    Rejected {
        /// Human-readable details.
        details: String,
    },

    /// The status-alias file could not be read or parsed.
    #[error("Failed to load status alias table from '{path}': {details}")]
    AliasTable {
        /// File path.
        path: String,
        /// Human-readable details.
        details: String,
    },
}
