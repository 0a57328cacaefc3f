// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Transport layer: persistent control channel to the cluster login
//! host, dynamic HTTP forward for compute-node traffic, incremental
//! directory sync, and batch-token acquisition.
//!
//! Credential handling: every connection authenticates through the
//! invoking user's agent (`SSH_AUTH_SOCK`); this crate never reads or
//! stores key material. The batch token is minted on demand on the
//! login host and handed to the caller without being persisted.

pub mod error;
pub mod forward;
pub mod tunnel;

pub use error::Error;
pub use forward::{ComputeHttp, ForwardRequest, ForwardResponse, HttpForward};
pub use tunnel::{CommandOutput, Tunnel, TunnelConfig};
