// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Mapping of raw scheduler state strings to the canonical taxonomy.
//!
//! Deployments differ in the states they report, so the table is
//! loadable from a YAML file; the built-in defaults cover the states
//! the reference cluster emits. Lookup is exact first, then by
//! prefix, both case-insensitive.

use crate::JobState;
use crate::error::Error;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Alias table translating remote job states.
#[derive(Debug, Clone)]
pub struct StatusAliases {
    exact: HashMap<String, JobState>,
    prefix: Vec<(String, JobState)>,
}

#[derive(Debug, Deserialize)]
struct AliasFile {
    #[serde(default)]
    exact: HashMap<String, JobState>,
    #[serde(default)]
    prefix: HashMap<String, JobState>,
}

impl Default for StatusAliases {
    fn default() -> Self {
        let exact = [
            ("PENDING", JobState::Pending),
            ("CONFIGURING", JobState::Pending),
            ("REQUEUED", JobState::Pending),
            ("SUSPENDED", JobState::Pending),
            ("RUNNING", JobState::Running),
            ("COMPLETING", JobState::Running),
            ("COMPLETED", JobState::Completed),
            ("FAILED", JobState::Failed),
            ("NODE_FAIL", JobState::Failed),
            ("OUT_OF_MEMORY", JobState::Failed),
            ("TIMEOUT", JobState::Failed),
            ("BOOT_FAIL", JobState::Failed),
            ("DEADLINE", JobState::Failed),
            ("PREEMPTED", JobState::Failed),
            ("CANCELLED", JobState::Cancelled),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        // "CANCELLED by <uid>" and friends.
        let prefix = vec![("CANCELLED".to_string(), JobState::Cancelled)];
        Self { exact, prefix }
    }
}

impl StatusAliases {
    /// Loads a table from YAML, merging over the defaults.
    ///
    /// ```yaml
    /// exact:
    ///   DRAINING: running
    /// prefix:
    ///   REVOKED: cancelled
    /// ```
    pub fn from_yaml_file(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::AliasTable {
            path: path.display().to_string(),
            details: e.to_string(),
        })?;
        let file: AliasFile = serde_yaml::from_str(&raw).map_err(|e| Error::AliasTable {
            path: path.display().to_string(),
            details: e.to_string(),
        })?;

        let mut table = Self::default();
        for (k, v) in file.exact {
            let _ = table.exact.insert(k.to_uppercase(), v);
        }
        for (k, v) in file.prefix {
            table.prefix.push((k.to_uppercase(), v));
        }
        Ok(table)
    }

    /// Maps a raw remote state string to the canonical taxonomy.
    pub fn map(&self, raw: &str) -> JobState {
        let upper = raw.trim().to_uppercase();
        if let Some(state) = self.exact.get(&upper) {
            return *state;
        }
        for (prefix, state) in &self.prefix {
            if upper.starts_with(prefix.as_str()) {
                return *state;
            }
        }
        JobState::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_documented_states() {
        let table = StatusAliases::default();
        let cases = [
            ("PENDING", JobState::Pending),
            ("CONFIGURING", JobState::Pending),
            ("RUNNING", JobState::Running),
            ("COMPLETING", JobState::Running),
            ("COMPLETED", JobState::Completed),
            ("FAILED", JobState::Failed),
            ("NODE_FAIL", JobState::Failed),
            ("OUT_OF_MEMORY", JobState::Failed),
            ("TIMEOUT", JobState::Failed),
            ("BOOT_FAIL", JobState::Failed),
            ("DEADLINE", JobState::Failed),
            ("PREEMPTED", JobState::Failed),
            ("CANCELLED", JobState::Cancelled),
        ];
        for (raw, want) in cases {
            assert_eq!(table.map(raw), want, "state {raw}");
        }
    }

    #[test]
    fn mapping_is_case_insensitive() {
        let table = StatusAliases::default();
        assert_eq!(table.map("running"), JobState::Running);
        assert_eq!(table.map("Completed"), JobState::Completed);
    }

    #[test]
    fn prefix_matches_annotated_cancellations() {
        let table = StatusAliases::default();
        assert_eq!(table.map("CANCELLED by 10042"), JobState::Cancelled);
    }

    #[test]
    fn unknown_states_map_to_unknown() {
        let table = StatusAliases::default();
        assert_eq!(table.map("SOMETHING_NEW"), JobState::Unknown);
    }

    #[test]
    fn yaml_overlay_merges_over_defaults() {
        let dir = std::env::temp_dir().join(format!("aliases-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("tempdir");
        let path = dir.join("aliases.yaml");
        std::fs::write(&path, "exact:\n  DRAINING: running\nprefix:\n  REVOKED: cancelled\n")
            .expect("write");

        let table = StatusAliases::from_yaml_file(&path).expect("load");
        assert_eq!(table.map("DRAINING"), JobState::Running);
        assert_eq!(table.map("REVOKED by admin"), JobState::Cancelled);
        assert_eq!(table.map("PENDING"), JobState::Pending);
        std::fs::remove_dir_all(&dir).ok();
    }
}
