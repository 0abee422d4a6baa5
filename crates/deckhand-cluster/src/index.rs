// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Chart repository index cache.
//!
//! The index file written by `helm repo update` is parsed into a chart
//! name to versions map. `appVersion` is relatively new, so old chart
//! entries may not carry it.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{HelmError, HelmResult};

/// One version of a chart in the repository index.
#[derive(Debug, Clone, Deserialize)]
pub struct ChartEntry {
    /// Chart name.
    pub name: String,
    /// Human readable description.
    #[serde(default)]
    pub description: String,
    /// Chart version.
    pub version: String,
    /// Version of the packaged application, when recorded.
    #[serde(rename = "appVersion")]
    pub app_version: Option<String>,
    /// Download URLs; the first is used.
    #[serde(default)]
    pub urls: Vec<String>,
}

impl ChartEntry {
    /// The chart's download URL.
    pub fn url(&self) -> Option<&str> {
        self.urls.first().map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct IndexFile {
    #[serde(default)]
    entries: HashMap<String, Vec<ChartEntry>>,
}

/// Parsed chart repository index.
#[derive(Debug, Default)]
pub struct ChartIndex {
    entries: HashMap<String, Vec<ChartEntry>>,
}

impl ChartIndex {
    /// Parse an index document.
    pub fn parse(yaml: &str) -> HelmResult<Self> {
        let index: IndexFile = serde_yaml::from_str(yaml)
            .map_err(|e| HelmError::Index(format!("cannot parse chart index: {}", e)))?;
        Ok(Self {
            entries: index.entries,
        })
    }

    /// Load the index from the cache file on disk.
    pub fn load(path: &Path) -> HelmResult<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            HelmError::Index(format!(
                "cannot open chart index cache '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&yaml)
    }

    /// All versions of a chart, newest first as written by the repository.
    pub fn versions(&self, chart_name: &str) -> &[ChartEntry] {
        self.entries
            .get(chart_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Look up one (chart, version) entry.
    pub fn get(&self, chart_name: &str, chart_version: &str) -> Option<&ChartEntry> {
        self.versions(chart_name)
            .iter()
            .find(|entry| entry.version == chart_version)
    }

    /// The `appVersion` metadata for a (chart, version), when both the
    /// entry and the field exist.
    pub fn app_version(&self, chart_name: &str, chart_version: &str) -> Option<&str> {
        self.get(chart_name, chart_version)
            .and_then(|entry| entry.app_version.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"
apiVersion: v1
entries:
  rstudio:
    - name: rstudio
      description: RStudio with auth-proxy
      version: 2.2.5
      appVersion: 4.4.1
      urls:
        - https://charts.example.com/rstudio-2.2.5.tgz
    - name: rstudio
      description: RStudio with auth-proxy
      version: 2.2.4
      urls:
        - https://charts.example.com/rstudio-2.2.4.tgz
  jupyter-lab:
    - name: jupyter-lab
      description: Jupyter Lab
      version: 1.0.0
      appVersion: "4.0"
      urls:
        - https://charts.example.com/jupyter-lab-1.0.0.tgz
"#;

    #[test]
    fn test_lookup_by_chart_and_version() {
        let index = ChartIndex::parse(INDEX).unwrap();
        let entry = index.get("rstudio", "2.2.5").unwrap();
        assert_eq!(entry.app_version.as_deref(), Some("4.4.1"));
        assert_eq!(
            entry.url(),
            Some("https://charts.example.com/rstudio-2.2.5.tgz")
        );
    }

    #[test]
    fn test_old_charts_missing_app_version() {
        let index = ChartIndex::parse(INDEX).unwrap();
        let entry = index.get("rstudio", "2.2.4").unwrap();
        assert!(entry.app_version.is_none());
        assert!(index.app_version("rstudio", "2.2.4").is_none());
    }

    #[test]
    fn test_unknown_chart_or_version() {
        let index = ChartIndex::parse(INDEX).unwrap();
        assert!(index.get("airflow", "1.0.0").is_none());
        assert!(index.get("rstudio", "9.9.9").is_none());
        assert!(index.versions("airflow").is_empty());
    }

    #[test]
    fn test_empty_index() {
        let index = ChartIndex::parse("apiVersion: v1\nentries: {}\n").unwrap();
        assert!(index.versions("rstudio").is_empty());
    }

    #[test]
    fn test_load_missing_cache_is_an_index_error() {
        let err = ChartIndex::load(Path::new("/nonexistent/mojanalytics-index.yaml")).unwrap_err();
        assert!(matches!(err, HelmError::Index(_)));
    }
}
