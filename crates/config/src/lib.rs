// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Declarative configuration for gridserve.
//!
//! Data model:
//! - recipes (`recipes/<category>/<name>.yaml`) describe how to launch
//!   one service instance: container image, resources, ports,
//!   environment, and optional replica-group parameters,
//! - a per-request [`ServiceConfig`] merged onto a recipe yields the
//!   effective recipe actually submitted to the scheduler,
//! - [`settings::Settings`] carries the process-wide environment
//!   (login host, remote base path, listen address, metric store).
//!
//! The per-category batch-script builders live in [`script`]; the
//! recipe loader and cache in [`store`].

use serde::{Deserialize, Serialize};

pub mod error;
pub mod recipe;
pub mod script;
pub mod settings;
pub mod store;

/// The id of a scheduled service. Equal to its batch-job id.
pub type ServiceId = String;

/// The id of a batch job as reported by the scheduler.
pub type JobId = String;

/// The id of a replica group. Minted locally with an `sg-` prefix.
pub type GroupId = String;

/// Composite id of one replica inside a group: `{job_id}:{port}`.
pub type ReplicaId = String;

/// The id of a monitoring session.
pub type SessionId = String;

/// Service categories understood by the orchestrator.
///
/// The category drives everything type-specific at dispatch time:
/// the readiness probe path, the default data-plane port, and the
/// scheduler partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// LLM inference services (vLLM and compatible servers).
    Inference,
    /// Vector databases (Qdrant and compatible servers).
    VectorDb,
    /// Storage services (object stores, relational databases).
    Storage,
}

impl Category {
    /// Path probed by the readiness loop to decide whether a service
    /// of this category accepts traffic.
    pub fn probe_path(&self) -> &'static str {
        match self {
            Category::Inference => "/v1/models",
            Category::VectorDb => "/collections",
            Category::Storage => "/health",
        }
    }

    /// Default data-plane port when a recipe does not expose one.
    pub fn default_port(&self) -> u16 {
        match self {
            Category::Inference => 8001,
            Category::VectorDb => 6333,
            Category::Storage => 9000,
        }
    }

    /// Directory name under the recipes root holding this category.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Category::Inference => "inference",
            Category::VectorDb => "vector-db",
            Category::Storage => "storage",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_serde_uses_kebab_case() {
        let v: Category = serde_yaml::from_str("vector-db").expect("parse");
        assert_eq!(v, Category::VectorDb);
        assert_eq!(serde_yaml::to_string(&Category::Inference).expect("ser").trim(), "inference");
    }

    #[test]
    fn category_probe_paths() {
        assert_eq!(Category::Inference.probe_path(), "/v1/models");
        assert_eq!(Category::VectorDb.probe_path(), "/collections");
        assert_eq!(Category::Storage.probe_path(), "/health");
    }
}
