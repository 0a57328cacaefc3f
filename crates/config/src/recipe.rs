// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Recipe data model.
//!
//! A recipe is immutable once loaded. Merging a per-request
//! [`ServiceConfig`] produces a new recipe; the original is never
//! mutated.

use crate::Category;
use crate::error::Error;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Resource request of a recipe, per node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipeResources {
    /// Number of compute nodes.
    pub nodes: u32,
    /// CPUs per task.
    pub cpu: u32,
    /// Memory per CPU (scheduler syntax, e.g. "4G").
    pub memory: String,
    /// GPUs per node.
    pub gpu: u32,
    /// Wall time limit in minutes.
    pub time_limit: u32,
    /// Optional storage allocation (e.g. "100G").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
}

impl Default for RecipeResources {
    fn default() -> Self {
        Self {
            nodes: 1,
            cpu: 1,
            memory: "4G".to_string(),
            gpu: 0,
            time_limit: 60,
            storage: None,
        }
    }
}

/// Documentation entry for one tunable recipe parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeParameter {
    /// Human-readable description.
    pub description: String,
    /// Parameter type (string, integer, float, boolean).
    #[serde(rename = "type")]
    pub kind: String,
    /// Default value, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Whether the parameter must be supplied.
    #[serde(default)]
    pub required: bool,
    /// Where the parameter applies (root, resources, environment).
    #[serde(default = "default_location")]
    pub location: String,
}

fn default_location() -> String {
    "environment".to_string()
}

/// Partial resource overrides supplied inside a [`ServiceConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOverrides {
    /// Override for node count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u32>,
    /// Override for CPUs per task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    /// Override for memory per CPU.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// Override for GPUs per node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<u32>,
    /// Override for wall time in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<u32>,
    /// Override for storage allocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
}

/// Per-request service configuration merged onto a recipe.
///
/// Unknown keys are preserved in `extra` so a stored config snapshot
/// always contains at least the keys the caller sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Scheduler account to charge. Falls back to the process default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    /// Direct node-count override (legacy top-level form).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u32>,
    /// Direct CPU override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    /// Direct memory override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// Direct GPU override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<u32>,
    /// Direct wall-time override in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<u32>,
    /// Structured resource overrides. Applied before the direct forms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceOverrides>,
    /// Environment overrides; win over recipe values on collision.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    /// Model identifier, also exported as `VLLM_MODEL`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Maximum model context length, also exported as `VLLM_MAX_MODEL_LEN`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_model_len: Option<u64>,
    /// GPU memory fraction handed to the inference server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_memory_utilization: Option<f64>,
    /// GPUs assigned to each replica of a replica group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_per_replica: Option<u32>,
    /// First port of a replica group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_port: Option<u16>,
    /// Explicit port for a single replica, exported as `VLLM_PORT`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_port: Option<u16>,
    /// Keys this crate does not interpret, kept for the stored snapshot.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A validated service recipe.
///
/// Category-specific fields (`gpu_per_replica`, `base_port`, `model`,
/// `max_model_len`, `gpu_memory_utilization`) are only meaningful for
/// inference recipes; other categories ignore them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    /// Recipe identifier within its category.
    pub name: String,
    /// Recipe category.
    pub category: Category,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Version string.
    #[serde(default = "default_version")]
    pub version: String,
    /// Container image file name (defaults to `{name}.sif`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Container definition file name (defaults to `{name}.def`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_def: Option<String>,
    /// Ports exposed by the service; the first is the default port.
    #[serde(default, deserialize_with = "ports_or_single")]
    pub ports: Vec<u16>,
    /// Environment exported into the job script.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Resource request.
    #[serde(default)]
    pub resources: RecipeResources,
    /// Documented tunable parameters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, RecipeParameter>,
    /// GPUs per replica; presence marks an inference recipe as a
    /// replica-group recipe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_per_replica: Option<u32>,
    /// First replica port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_port: Option<u16>,
    /// Model identifier copied in by `merge_config`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Maximum model context length copied in by `merge_config`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_model_len: Option<u64>,
    /// GPU memory fraction copied in by `merge_config`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_memory_utilization: Option<f64>,
    /// Canonical `category/name` path, stamped by the loader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Accepts either a list of ports or one bare port.
fn ports_or_single<'de, D>(deserializer: D) -> Result<Vec<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(u16),
        Many(Vec<u16>),
    }
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(p)) => vec![p],
        Some(OneOrMany::Many(ps)) => ps,
    })
}

/// Default base port for inference replica groups.
pub const DEFAULT_BASE_PORT: u16 = 8001;

impl Recipe {
    /// Canonical `category/name` of this recipe.
    pub fn canonical_name(&self) -> String {
        self.path
            .clone()
            .unwrap_or_else(|| format!("{}/{}", self.category, self.name))
    }

    /// First exposed port, or the category default when none is listed.
    pub fn default_port(&self) -> u16 {
        self.ports.first().copied().unwrap_or_else(|| self.category.default_port())
    }

    /// Whether this recipe launches a replica group rather than a
    /// single service.
    pub fn is_replica_group(&self) -> bool {
        self.category == Category::Inference && self.gpu_per_replica.is_some()
    }

    /// First port assigned to replicas of this recipe.
    pub fn effective_base_port(&self) -> u16 {
        self.base_port.unwrap_or(DEFAULT_BASE_PORT)
    }

    /// Replicas launched on each node: total GPUs over GPUs per replica.
    pub fn replicas_per_node(&self) -> u32 {
        match self.gpu_per_replica {
            Some(per) if per > 0 && self.resources.gpu > 0 => self.resources.gpu / per,
            _ => 1,
        }
    }

    /// Total replicas across all nodes.
    pub fn total_replicas(&self) -> u32 {
        self.resources.nodes * self.replicas_per_node()
    }

    /// Container definition and image paths under the recipes root.
    pub fn container_paths(&self, recipes_dir: &str) -> (String, String) {
        let base = format!("{}/{}", recipes_dir.trim_end_matches('/'), self.category);
        let def = self.container_def.clone().unwrap_or_else(|| format!("{}.def", self.name));
        let sif = self.image.clone().unwrap_or_else(|| format!("{}.sif", self.name));
        (format!("{base}/{def}"), format!("{base}/{sif}"))
    }

    /// Checks semantic invariants after deserialization.
    pub fn validate(&self) -> Result<(), Error> {
        let fail = |reason: String| Error::RecipeInvalid {
            name: self.canonical_name(),
            reason,
        };
        if self.name.is_empty() {
            return Err(fail("name must not be empty".into()));
        }
        if self.resources.nodes < 1 {
            return Err(fail("resources.nodes must be >= 1".into()));
        }
        if self.resources.cpu < 1 {
            return Err(fail("resources.cpu must be >= 1".into()));
        }
        if self.resources.time_limit < 1 {
            return Err(fail("resources.time_limit must be >= 1 minute".into()));
        }
        if matches!(self.category, Category::Inference | Category::VectorDb) && self.ports.is_empty()
        {
            return Err(fail(format!("{} recipes must expose at least one port", self.category)));
        }
        if let Some(per) = self.gpu_per_replica {
            if per < 1 {
                return Err(fail("gpu_per_replica must be >= 1".into()));
            }
        }
        Ok(())
    }

    /// Produces a new recipe with the given config merged in.
    ///
    /// Resources and environment merge key-wise (config wins); the
    /// category-specific scalars are copied into place; model, context
    /// length and replica port are mirrored into the environment so
    /// the job script sees them.
    pub fn merge_config(&self, config: &ServiceConfig) -> Recipe {
        let mut merged = self.clone();

        if let Some(res) = &config.resources {
            if let Some(v) = res.nodes {
                merged.resources.nodes = v;
            }
            if let Some(v) = res.cpu {
                merged.resources.cpu = v;
            }
            if let Some(v) = &res.memory {
                merged.resources.memory = v.clone();
            }
            if let Some(v) = res.gpu {
                merged.resources.gpu = v;
            }
            if let Some(v) = res.time_limit {
                merged.resources.time_limit = v;
            }
            if let Some(v) = &res.storage {
                merged.resources.storage = Some(v.clone());
            }
        }

        // Direct top-level overrides win over the structured form.
        if let Some(v) = config.nodes {
            merged.resources.nodes = v;
        }
        if let Some(v) = config.cpu {
            merged.resources.cpu = v;
        }
        if let Some(v) = &config.memory {
            merged.resources.memory = v.clone();
        }
        if let Some(v) = config.gpu {
            merged.resources.gpu = v;
        }
        if let Some(v) = config.time_limit {
            merged.resources.time_limit = v;
        }

        for (k, v) in &config.environment {
            let _ = merged.environment.insert(k.clone(), v.clone());
        }

        if let Some(port) = config.replica_port {
            let _ = merged.environment.insert("VLLM_PORT".to_string(), port.to_string());
        }
        if let Some(model) = &config.model {
            let _ = merged.environment.insert("VLLM_MODEL".to_string(), model.clone());
        }
        if let Some(len) = config.max_model_len {
            let _ = merged.environment.insert("VLLM_MAX_MODEL_LEN".to_string(), len.to_string());
        }

        if let Some(v) = config.gpu_per_replica {
            merged.gpu_per_replica = Some(v);
        }
        if let Some(v) = config.base_port {
            merged.base_port = Some(v);
        }
        if let Some(v) = &config.model {
            merged.model = Some(v.clone());
        }
        if let Some(v) = config.max_model_len {
            merged.max_model_len = Some(v);
        }
        if let Some(v) = config.gpu_memory_utilization {
            merged.gpu_memory_utilization = Some(v);
        }

        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inference_recipe() -> Recipe {
        serde_yaml::from_str(
            r#"
            name: vllm-single-node
            category: inference
            ports: [8001]
            environment:
              VLLM_MODEL: "Qwen/Qwen2.5-0.5B-Instruct"
              VLLM_PORT: "8001"
            resources:
              nodes: 1
              cpu: 4
              memory: 16G
              gpu: 1
              time_limit: 60
            "#,
        )
        .expect("valid recipe")
    }

    #[test]
    fn parses_and_validates() {
        let r = inference_recipe();
        r.validate().expect("valid");
        assert_eq!(r.default_port(), 8001);
        assert!(!r.is_replica_group());
    }

    #[test]
    fn bare_port_becomes_list() {
        let r: Recipe = serde_yaml::from_str(
            "name: qdrant\ncategory: vector-db\nports: 6333\n",
        )
        .expect("parse");
        assert_eq!(r.ports, vec![6333]);
    }

    #[test]
    fn missing_ports_rejected_for_reachable_categories() {
        let r: Recipe =
            serde_yaml::from_str("name: qdrant\ncategory: vector-db\n").expect("parse");
        assert!(r.validate().is_err());
    }

    #[test]
    fn merge_overrides_resources_and_environment() {
        let recipe = inference_recipe();
        let config: ServiceConfig = serde_json::from_value(serde_json::json!({
            "resources": {"gpu": 4, "time_limit": 120},
            "nodes": 2,
            "environment": {"VLLM_LOGGING_LEVEL": "DEBUG"},
            "model": "gpt2",
            "max_model_len": 2048
        }))
        .expect("config");

        let merged = recipe.merge_config(&config);
        assert_eq!(merged.resources.gpu, 4);
        assert_eq!(merged.resources.time_limit, 120);
        assert_eq!(merged.resources.nodes, 2);
        assert_eq!(merged.environment["VLLM_LOGGING_LEVEL"], "DEBUG");
        assert_eq!(merged.environment["VLLM_MODEL"], "gpt2");
        assert_eq!(merged.environment["VLLM_MAX_MODEL_LEN"], "2048");
        assert_eq!(merged.model.as_deref(), Some("gpt2"));
        // Originals stay untouched.
        assert_eq!(recipe.resources.gpu, 1);
    }

    #[test]
    fn replica_group_arithmetic() {
        let mut r = inference_recipe();
        r.gpu_per_replica = Some(1);
        r.resources.gpu = 4;
        r.resources.nodes = 2;
        assert!(r.is_replica_group());
        assert_eq!(r.replicas_per_node(), 4);
        assert_eq!(r.total_replicas(), 8);
        assert_eq!(r.effective_base_port(), DEFAULT_BASE_PORT);
    }

    #[test]
    fn config_snapshot_preserves_unknown_keys() {
        let config: ServiceConfig = serde_json::from_value(serde_json::json!({
            "model": "gpt2",
            "experiment_tag": "run-42"
        }))
        .expect("config");
        let back = serde_json::to_value(&config).expect("serialize");
        assert_eq!(back["experiment_tag"], "run-42");
        assert_eq!(back["model"], "gpt2");
    }
}
