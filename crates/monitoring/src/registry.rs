// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Per-session scrape-target registry.
//!
//! The canonical record of what a session observes: client exporters
//! (per-type host:port pairs with enable flags) and service targets
//! (full metrics URLs). Persisted as `registry.json` in the session
//! directory so a restart does not lose the target set.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A client and its exporters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRegistration {
    /// Owning session.
    pub session_id: String,
    /// Client id.
    pub client_id: String,
    /// Node the client runs on.
    pub node: String,
    /// Exporter type → `host:port`.
    #[serde(default)]
    pub exporters: BTreeMap<String, String>,
    /// `enable_<type>` flags; absent means enabled.
    #[serde(default)]
    pub preferences: BTreeMap<String, bool>,
}

/// A service scrape target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceTarget {
    /// Owning session.
    pub session_id: String,
    /// Service id; doubles as the scrape job label.
    pub service_id: String,
    /// Full metrics URL.
    pub endpoint: String,
    /// Extra labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    clients: BTreeMap<String, ClientRegistration>,
    #[serde(default)]
    services: Vec<ServiceTarget>,
}

/// Read model handed to the renderer: exporter targets grouped by
/// type plus the service jobs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetSet {
    /// Exporter type → list of `host:port` targets.
    pub exporters: BTreeMap<String, Vec<String>>,
    /// Service jobs (`service_id`, metrics URL).
    pub services: Vec<(String, String)>,
}

impl TargetSet {
    /// Total number of scrape targets.
    pub fn len(&self) -> usize {
        self.exporters.values().map(Vec::len).sum::<usize>() + self.services.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merges another set into this one.
    pub fn extend(&mut self, other: TargetSet) {
        for (kind, mut targets) in other.exporters {
            self.exporters.entry(kind).or_default().append(&mut targets);
        }
        self.services.extend(other.services);
    }
}

/// File-backed registry of targets per session.
#[derive(Debug, Clone)]
pub struct TargetRegistry {
    root: PathBuf,
}

impl TargetRegistry {
    /// Creates a registry rooted at the state directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn file(&self, session_id: &str) -> Result<PathBuf, Error> {
        let dir = self.root.join(session_id);
        std::fs::create_dir_all(&dir).map_err(|e| Error::StateIo {
            path: dir.display().to_string(),
            details: e.to_string(),
        })?;
        Ok(dir.join("registry.json"))
    }

    fn load(&self, session_id: &str) -> Result<RegistryFile, Error> {
        let file = self.file(session_id)?;
        if !file.exists() {
            return Ok(RegistryFile::default());
        }
        let raw = std::fs::read_to_string(&file).map_err(|e| Error::StateIo {
            path: file.display().to_string(),
            details: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| Error::StateIo {
            path: file.display().to_string(),
            details: e.to_string(),
        })
    }

    fn save(&self, session_id: &str, data: &RegistryFile) -> Result<(), Error> {
        let file = self.file(session_id)?;
        let raw = serde_json::to_string_pretty(data).map_err(|e| Error::StateIo {
            path: file.display().to_string(),
            details: e.to_string(),
        })?;
        std::fs::write(&file, raw).map_err(|e| Error::StateIo {
            path: file.display().to_string(),
            details: e.to_string(),
        })
    }

    /// Adds or replaces a client registration.
    pub fn upsert_client(&self, client: ClientRegistration) -> Result<(), Error> {
        let sid = client.session_id.clone();
        let mut data = self.load(&sid)?;
        let _ = data.clients.insert(client.client_id.clone(), client);
        self.save(&sid, &data)
    }

    /// Adds or replaces a service target, keyed by service id.
    pub fn upsert_service(&self, target: ServiceTarget) -> Result<(), Error> {
        let sid = target.session_id.clone();
        let mut data = self.load(&sid)?;
        data.services.retain(|s| s.service_id != target.service_id);
        data.services.push(target);
        self.save(&sid, &data)
    }

    /// Removes a service target.
    pub fn remove_service(&self, session_id: &str, service_id: &str) -> Result<(), Error> {
        let mut data = self.load(session_id)?;
        data.services.retain(|s| s.service_id != service_id);
        self.save(session_id, &data)
    }

    /// Drops every target of a session. Used when stopping it.
    pub fn clear_session(&self, session_id: &str) -> Result<(), Error> {
        self.save(session_id, &RegistryFile::default())
    }

    /// The render model for one session. Exporters whose
    /// `enable_<type>` preference is false are omitted.
    pub fn targets(&self, session_id: &str) -> Result<TargetSet, Error> {
        let data = self.load(session_id)?;
        let mut set = TargetSet::default();
        for client in data.clients.values() {
            for (kind, target) in &client.exporters {
                let enabled = client
                    .preferences
                    .get(&format!("enable_{kind}"))
                    .copied()
                    .unwrap_or(true);
                if enabled {
                    set.exporters
                        .entry(kind.clone())
                        .or_default()
                        .push(target.clone());
                }
            }
        }
        for service in &data.services {
            set.services
                .push((service.service_id.clone(), service.endpoint.clone()));
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(sid: &str, cid: &str, gpu_enabled: bool) -> ClientRegistration {
        let mut exporters = BTreeMap::new();
        let _ = exporters.insert("node".to_string(), format!("{cid}-host:9100"));
        let _ = exporters.insert("gpu".to_string(), format!("{cid}-host:9400"));
        let mut preferences = BTreeMap::new();
        let _ = preferences.insert("enable_gpu".to_string(), gpu_enabled);
        ClientRegistration {
            session_id: sid.to_string(),
            client_id: cid.to_string(),
            node: format!("{cid}-host"),
            exporters,
            preferences,
        }
    }

    #[test]
    fn preferences_gate_exporter_targets() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let registry = TargetRegistry::new(dir.path());
        registry.upsert_client(client("mon-a", "c1", true)).expect("c1");
        registry.upsert_client(client("mon-a", "c2", false)).expect("c2");

        let set = registry.targets("mon-a").expect("targets");
        assert_eq!(set.exporters["node"], vec!["c1-host:9100", "c2-host:9100"]);
        assert_eq!(set.exporters["gpu"], vec!["c1-host:9400"]);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn service_upsert_replaces_by_id() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let registry = TargetRegistry::new(dir.path());
        let target = |url: &str| ServiceTarget {
            session_id: "mon-a".to_string(),
            service_id: "99".to_string(),
            endpoint: url.to_string(),
            labels: BTreeMap::new(),
        };
        registry.upsert_service(target("http://a:1/metrics")).expect("first");
        registry.upsert_service(target("http://b:2/metrics")).expect("second");

        let set = registry.targets("mon-a").expect("targets");
        assert_eq!(set.services, vec![("99".to_string(), "http://b:2/metrics".to_string())]);
    }

    #[test]
    fn clear_session_empties_the_set() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let registry = TargetRegistry::new(dir.path());
        registry.upsert_client(client("mon-a", "c1", true)).expect("c1");
        registry.clear_session("mon-a").expect("clear");
        assert!(registry.targets("mon-a").expect("targets").is_empty());
    }
}
