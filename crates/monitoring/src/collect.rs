// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Windowed metric collection.
//!
//! Runs a small battery of range queries over a time window,
//! averages the series, and writes a one-row summary table plus a
//! manifest into the requested output directory. Metrics that do not
//! exist in the store simply come back empty and are reported as
//! absent, not as errors.

use crate::error::Error;
use crate::prometheus::MetricStore;
use crate::state::Artifacts;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;

/// Aggregated summary of one collection window.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WindowSummary {
    /// Mean request throughput (requests/s).
    pub throughput_qps: Option<f64>,
    /// Mean CPU utilisation (percent).
    pub cpu_util_avg_pct: Option<f64>,
    /// Mean GPU utilisation (percent).
    pub gpu_util_avg_pct: Option<f64>,
    /// Mean p50 request latency (ms).
    pub latency_p50_ms: Option<f64>,
    /// Mean p95 request latency (ms).
    pub latency_p95_ms: Option<f64>,
    /// Mean p99 request latency (ms).
    pub latency_p99_ms: Option<f64>,
}

/// Collector over one metric store.
#[derive(Debug)]
pub struct Collector<'a> {
    store: &'a MetricStore,
}

impl<'a> Collector<'a> {
    /// Creates a collector for the store.
    pub fn new(store: &'a MetricStore) -> Self {
        Self { store }
    }

    /// Pulls the standard query battery for a window.
    pub async fn collect_window(&self, start: &str, end: &str) -> WindowSummary {
        let throughput = self
            .mean_of("sum(rate(http_requests_total[1m]))", start, end, 1.0)
            .await;
        let cpu = self
            .mean_of(
                r#"1 - avg(rate(node_cpu_seconds_total{mode="idle"}[1m]))"#,
                start,
                end,
                100.0,
            )
            .await;
        let gpu = self.mean_of("avg(DCGM_FI_DEV_GPU_UTIL)", start, end, 1.0).await;

        let quantile = |q: &str| {
            format!(
                "histogram_quantile({q}, sum by (le) (rate(http_server_request_duration_seconds_bucket[1m])))"
            )
        };
        let p50 = self.mean_of(&quantile("0.50"), start, end, 1000.0).await;
        let p95 = self.mean_of(&quantile("0.95"), start, end, 1000.0).await;
        let p99 = self.mean_of(&quantile("0.99"), start, end, 1000.0).await;

        WindowSummary {
            throughput_qps: throughput,
            cpu_util_avg_pct: cpu,
            gpu_util_avg_pct: gpu,
            latency_p50_ms: p50,
            latency_p95_ms: p95,
            latency_p99_ms: p99,
        }
    }

    /// Mean of all sample values of a range query, scaled. `None`
    /// when the query fails or yields nothing.
    async fn mean_of(&self, query: &str, start: &str, end: &str, scale: f64) -> Option<f64> {
        let data = self.store.query_range(query, start, end, "15s").await.ok()?;
        let values = series_values(&data);
        if values.is_empty() {
            return None;
        }
        let sum: f64 = values.iter().map(|(_, v)| v).sum();
        Some(sum / values.len() as f64 * scale)
    }

    /// Writes the summary CSV and manifest, returning their paths.
    pub fn save(
        &self,
        summary: &WindowSummary,
        out_dir: &Path,
        run_id: &str,
        session_id: &str,
        start: &str,
        end: &str,
    ) -> Result<Artifacts, Error> {
        std::fs::create_dir_all(out_dir).map_err(|e| Error::StateIo {
            path: out_dir.display().to_string(),
            details: e.to_string(),
        })?;

        let csv_path = out_dir.join("metrics_summary.csv");
        let mut csv = String::from(
            "run_id,session_id,from,to,throughput_qps,cpu_util_avg_pct,gpu_util_avg_pct,\
             latency_p50_ms,latency_p95_ms,latency_p99_ms\n",
        );
        let cell = |v: Option<f64>| v.map(|x| format!("{x:.4}")).unwrap_or_default();
        let _ = writeln!(
            csv,
            "{run_id},{session_id},{start},{end},{},{},{},{},{},{}",
            cell(summary.throughput_qps),
            cell(summary.cpu_util_avg_pct),
            cell(summary.gpu_util_avg_pct),
            cell(summary.latency_p50_ms),
            cell(summary.latency_p95_ms),
            cell(summary.latency_p99_ms),
        );
        std::fs::write(&csv_path, csv).map_err(|e| Error::StateIo {
            path: csv_path.display().to_string(),
            details: e.to_string(),
        })?;

        let manifest_path = out_dir.join("MANIFEST.json");
        let manifest = serde_json::json!({
            "run_id": run_id,
            "session_id": session_id,
            "generated_at_utc": chrono::Utc::now().to_rfc3339(),
            "window": {"from": start, "to": end},
            "files": {"summary_csv": csv_path.display().to_string()},
        });
        std::fs::write(
            &manifest_path,
            serde_json::to_string_pretty(&manifest).unwrap_or_default(),
        )
        .map_err(|e| Error::StateIo {
            path: manifest_path.display().to_string(),
            details: e.to_string(),
        })?;

        Ok(Artifacts {
            tables: csv_path.display().to_string(),
            manifest: manifest_path.display().to_string(),
        })
    }
}

/// Flattens a range-query result into `(timestamp, value)` samples
/// across all series.
fn series_values(data: &serde_json::Value) -> Vec<(f64, f64)> {
    if data.get("status").and_then(|s| s.as_str()) != Some("success") {
        return Vec::new();
    }
    let Some(results) = data.pointer("/data/result").and_then(|r| r.as_array()) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for series in results {
        let Some(values) = series.get("values").and_then(|v| v.as_array()) else {
            continue;
        };
        for pair in values {
            let Some(items) = pair.as_array() else { continue };
            let ts = items.first().and_then(serde_json::Value::as_f64);
            let value = items
                .get(1)
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<f64>().ok());
            if let (Some(ts), Some(value)) = (ts, value) {
                out.push((ts, value));
            }
        }
    }
    out
}
