// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Scrape-configuration rendering.
//!
//! One YAML document: a global scrape interval, one aggregated
//! static-config job per exporter type, and one job per service
//! target. Service jobs carry explicit scheme and metrics path with a
//! single target, so the per-job label stays stable even when the
//! underlying endpoint URL changes.
//!
//! Writes are atomic with respect to the scraper: render to a
//! temporary file in the destination directory, then rename into
//! place.

use crate::error::Error;
use crate::registry::TargetSet;
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Global section of the scrape configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Scrape interval (e.g. "15s").
    pub scrape_interval: String,
}

/// One static-config block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticConfig {
    /// `host:port` targets.
    pub targets: Vec<String>,
}

/// One scrape job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeJob {
    /// Job name; exporter type or service id.
    pub job_name: String,
    /// URL scheme for service jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    /// Metrics path for service jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_path: Option<String>,
    /// Targets of the job.
    pub static_configs: Vec<StaticConfig>,
}

/// The whole rendered document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    /// Global settings.
    pub global: GlobalConfig,
    /// All scrape jobs.
    pub scrape_configs: Vec<ScrapeJob>,
}

/// Builds the scrape configuration for a target set.
pub fn build_scrape_config(targets: &TargetSet, scrape_interval: &str) -> ScrapeConfig {
    let mut jobs = Vec::new();

    for (kind, exporter_targets) in &targets.exporters {
        jobs.push(ScrapeJob {
            job_name: kind.clone(),
            scheme: None,
            metrics_path: None,
            static_configs: vec![StaticConfig {
                targets: exporter_targets.clone(),
            }],
        });
    }

    for (service_id, endpoint) in &targets.services {
        let (scheme, netloc, path) = split_url(endpoint);
        jobs.push(ScrapeJob {
            job_name: service_id.clone(),
            scheme: Some(scheme),
            metrics_path: Some(path),
            static_configs: vec![StaticConfig {
                targets: vec![netloc],
            }],
        });
    }

    ScrapeConfig {
        global: GlobalConfig {
            scrape_interval: scrape_interval.to_string(),
        },
        scrape_configs: jobs,
    }
}

fn split_url(endpoint: &str) -> (String, String, String) {
    match Url::parse(endpoint) {
        Ok(url) => {
            let netloc = match (url.host_str(), url.port()) {
                (Some(host), Some(port)) => format!("{host}:{port}"),
                (Some(host), None) => host.to_string(),
                _ => endpoint.to_string(),
            };
            let path = if url.path().is_empty() || url.path() == "/" {
                "/metrics".to_string()
            } else {
                url.path().to_string()
            };
            (url.scheme().to_string(), netloc, path)
        }
        Err(_) => ("http".to_string(), endpoint.to_string(), "/metrics".to_string()),
    }
}

/// Renders the configuration to `output`, atomically.
pub fn render_atomic(config: &ScrapeConfig, output: &Path) -> Result<(), Error> {
    let yaml = serde_yaml::to_string(config).map_err(|e| Error::Render {
        details: e.to_string(),
    })?;

    let dir = output.parent().ok_or_else(|| Error::Render {
        details: format!("config path '{}' has no parent directory", output.display()),
    })?;
    std::fs::create_dir_all(dir).map_err(|e| Error::Render {
        details: e.to_string(),
    })?;

    // Same-directory temp file so the rename is atomic on the fs.
    let tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::Render {
        details: e.to_string(),
    })?;
    std::fs::write(tmp.path(), yaml).map_err(|e| Error::Render {
        details: e.to_string(),
    })?;
    let _ = tmp.persist(output).map_err(|e| Error::Render {
        details: e.to_string(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn target_set() -> TargetSet {
        let mut exporters = BTreeMap::new();
        let _ = exporters.insert("node".to_string(), vec!["nodeA:9100".to_string()]);
        let _ = exporters.insert("gpu".to_string(), vec!["nodeA:9400".to_string()]);
        TargetSet {
            exporters,
            services: vec![(
                "99".to_string(),
                "http://server-host:8001/api/v1/services/99/metrics".to_string(),
            )],
        }
    }

    #[test]
    fn service_jobs_are_one_per_target() {
        let config = build_scrape_config(&target_set(), "15s");
        assert_eq!(config.global.scrape_interval, "15s");

        let service_job = config
            .scrape_configs
            .iter()
            .find(|j| j.job_name == "99")
            .expect("service job");
        assert_eq!(service_job.scheme.as_deref(), Some("http"));
        assert_eq!(
            service_job.metrics_path.as_deref(),
            Some("/api/v1/services/99/metrics")
        );
        assert_eq!(
            service_job.static_configs[0].targets,
            vec!["server-host:8001"]
        );
    }

    #[test]
    fn exporter_jobs_aggregate_targets() {
        let mut set = target_set();
        set.exporters
            .get_mut("node")
            .expect("node exporters")
            .push("nodeB:9100".to_string());
        let config = build_scrape_config(&set, "1s");
        let node_job = config
            .scrape_configs
            .iter()
            .find(|j| j.job_name == "node")
            .expect("node job");
        assert_eq!(
            node_job.static_configs[0].targets,
            vec!["nodeA:9100", "nodeB:9100"]
        );
        assert!(node_job.metrics_path.is_none());
    }

    #[test]
    fn rendered_file_round_trips_through_yaml() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let output = dir.path().join("prometheus.yml");
        let config = build_scrape_config(&target_set(), "15s");
        render_atomic(&config, &output).expect("render");

        let raw = std::fs::read_to_string(&output).expect("read");
        let parsed: ScrapeConfig = serde_yaml::from_str(&raw).expect("parse");
        assert_eq!(parsed.scrape_configs.len(), 3);
        assert!(raw.contains("job_name: '99'") || raw.contains("job_name: \"99\"") || raw.contains("job_name: 99"));
    }

    #[test]
    fn empty_set_renders_no_jobs() {
        let config = build_scrape_config(&TargetSet::default(), "15s");
        assert!(config.scrape_configs.is_empty());
    }
}
