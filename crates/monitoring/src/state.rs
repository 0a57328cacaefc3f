// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! File-backed session state.
//!
//! One JSON document per session under `<root>/<session_id>/.state.json`.
//! The directory also holds the session's generated files, so clearing
//! state keeps the directory.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    /// Session owns the scrape configuration.
    Running,
    /// Session stopped; its targets are withdrawn.
    Stopped,
}

/// Artifact paths recorded by a collection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifacts {
    /// Summary table (CSV).
    pub tables: String,
    /// Collection manifest (JSON).
    pub manifest: String,
}

/// Persistent state of one monitoring session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// Session id.
    pub session_id: String,
    /// Lifecycle state.
    pub status: SessionStatus,
    /// Session working directory.
    pub workdir: String,
    /// Metric store base URL.
    pub prometheus_url: String,
    /// Path of the rendered scrape configuration.
    pub config_path: String,
    /// Scrape interval (e.g. "15s").
    pub scrape_interval: String,
    /// User labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Creation timestamp (RFC 3339).
    pub created_at: String,
    /// Activation timestamp (RFC 3339).
    pub started_at: String,
    /// Stop timestamp, once stopped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<String>,
    /// Last collection timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_collect_at: Option<String>,
    /// Artifacts of the last collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Artifacts>,
}

/// Store of session state documents.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    /// Creates a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory of one session, created on demand.
    pub fn session_dir(&self, session_id: &str) -> Result<PathBuf, Error> {
        let dir = self.root.join(session_id);
        std::fs::create_dir_all(&dir).map_err(|e| Error::StateIo {
            path: dir.display().to_string(),
            details: e.to_string(),
        })?;
        Ok(dir)
    }

    fn state_file(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id).join(".state.json")
    }

    /// Reads one session's state, if present.
    pub fn read(&self, session_id: &str) -> Option<SessionState> {
        let raw = std::fs::read_to_string(self.state_file(session_id)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Writes one session's state.
    pub fn write(&self, state: &SessionState) -> Result<(), Error> {
        let _ = self.session_dir(&state.session_id)?;
        let file = self.state_file(&state.session_id);
        let raw = serde_json::to_string_pretty(state).map_err(|e| Error::StateIo {
            path: file.display().to_string(),
            details: e.to_string(),
        })?;
        std::fs::write(&file, raw).map_err(|e| Error::StateIo {
            path: file.display().to_string(),
            details: e.to_string(),
        })
    }

    /// Removes one session's state document, keeping its directory.
    pub fn clear(&self, session_id: &str) {
        let _ = std::fs::remove_file(self.state_file(session_id));
    }

    /// All known sessions, in directory order.
    pub fn list_all(&self) -> Vec<SessionState> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut sessions: Vec<SessionState> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                self.read(&name)
            })
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions
    }

    /// The currently RUNNING session, if any.
    pub fn active_session(&self) -> Option<SessionState> {
        self.list_all()
            .into_iter()
            .find(|s| s.status == SessionStatus::Running)
    }

    /// Store root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(sid: &str, status: SessionStatus, created_at: &str) -> SessionState {
        SessionState {
            session_id: sid.to_string(),
            status,
            workdir: format!("/tmp/{sid}"),
            prometheus_url: "http://localhost:9090".to_string(),
            config_path: "/tmp/prometheus.yml".to_string(),
            scrape_interval: "15s".to_string(),
            labels: BTreeMap::new(),
            created_at: created_at.to_string(),
            started_at: created_at.to_string(),
            stopped_at: None,
            last_collect_at: None,
            artifacts: None,
        }
    }

    #[test]
    fn write_read_roundtrip_and_ordering() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = StateStore::new(dir.path());

        store
            .write(&state("mon-a", SessionStatus::Stopped, "2026-07-01T10:00:00Z"))
            .expect("write a");
        store
            .write(&state("mon-b", SessionStatus::Running, "2026-07-02T10:00:00Z"))
            .expect("write b");

        let all = store.list_all();
        assert_eq!(all.len(), 2);
        // Newest first.
        assert_eq!(all[0].session_id, "mon-b");
        assert_eq!(
            store.active_session().map(|s| s.session_id).as_deref(),
            Some("mon-b")
        );
    }

    #[test]
    fn clear_keeps_session_directory() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = StateStore::new(dir.path());
        store
            .write(&state("mon-a", SessionStatus::Running, "2026-07-01T10:00:00Z"))
            .expect("write");
        store.clear("mon-a");
        assert!(store.read("mon-a").is_none());
        assert!(dir.path().join("mon-a").is_dir());
    }
}
