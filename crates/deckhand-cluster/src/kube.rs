// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kubernetes API access.
//!
//! Loads in-cluster configuration when running inside the cluster, else a
//! developer configuration. Per-user requests wrap the caller's id-token
//! so the API server enforces the user's own RBAC.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{KubeError, KubeResult};

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const KUBE_TIMEOUT_SECS: u64 = 10;

/// Connection settings for the cluster API server.
#[derive(Debug, Clone)]
pub struct KubeConfig {
    /// API server base URL.
    pub server: String,
    /// Bearer token presented by default (service account or developer).
    pub token: Option<String>,
    /// PEM CA bundle for the API server, when not publicly trusted.
    pub ca_pem: Option<Vec<u8>>,
}

#[derive(Debug, Deserialize)]
struct KubeconfigFile {
    clusters: Vec<NamedCluster>,
    users: Vec<NamedUser>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    cluster: ClusterEntry,
}

#[derive(Debug, Deserialize)]
struct ClusterEntry {
    server: String,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    user: UserEntry,
}

#[derive(Debug, Deserialize, Default)]
struct UserEntry {
    token: Option<String>,
}

impl KubeConfig {
    /// In-cluster configuration from the mounted service account, when
    /// present.
    pub fn in_cluster() -> Option<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").ok()?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").ok()?;
        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token = std::fs::read_to_string(dir.join("token")).ok()?;
        let ca_pem = std::fs::read(dir.join("ca.crt")).ok();
        Some(Self {
            server: format!("https://{}:{}", host, port),
            token: Some(token.trim().to_string()),
            ca_pem,
        })
    }

    /// Developer configuration from a kubeconfig file.
    pub fn from_kubeconfig(path: &Path) -> KubeResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| KubeError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let parsed: KubeconfigFile = serde_yaml::from_str(&raw)
            .map_err(|e| KubeError::Config(format!("cannot parse kubeconfig: {}", e)))?;
        let cluster = parsed
            .clusters
            .first()
            .ok_or_else(|| KubeError::Config("kubeconfig has no clusters".to_string()))?;
        let token = parsed.users.first().and_then(|u| u.user.token.clone());
        Ok(Self {
            server: cluster.cluster.server.clone(),
            token,
            ca_pem: None,
        })
    }

    /// In-cluster config when available, else the kubeconfig named by
    /// `KUBECONFIG` or `~/.kube/config`.
    pub fn load() -> KubeResult<Self> {
        if let Some(config) = Self::in_cluster() {
            return Ok(config);
        }
        let path = std::env::var("KUBECONFIG").map(std::path::PathBuf::from).or_else(|_| {
            std::env::var("HOME")
                .map(|home| Path::new(&home).join(".kube").join("config"))
                .map_err(|_| KubeError::Config("no in-cluster config and no HOME".to_string()))
        })?;
        Self::from_kubeconfig(&path)
    }
}

/// Deployment object metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct Metadata {
    /// Object name.
    pub name: String,
    /// Object labels.
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Spec fields the platform reads.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DeploymentSpec {
    /// Desired replica count.
    pub replicas: Option<i32>,
}

/// One status condition.
#[derive(Debug, Clone, Deserialize)]
pub struct Condition {
    /// Condition type, e.g. `Available` or `Progressing`.
    #[serde(rename = "type")]
    pub kind: String,
    /// `True`, `False` or `Unknown`.
    pub status: String,
}

/// Deployment status fields the platform reads.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DeploymentStatusView {
    /// Current conditions.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A deployment as returned by the API server.
#[derive(Debug, Clone, Deserialize)]
pub struct Deployment {
    /// Metadata.
    pub metadata: Metadata,
    /// Spec subset.
    #[serde(default)]
    pub spec: DeploymentSpec,
    /// Status subset.
    #[serde(default)]
    pub status: DeploymentStatusView,
}

impl Deployment {
    /// The status of a condition by type, when present.
    pub fn condition(&self, kind: &str) -> Option<&str> {
        self.status
            .conditions
            .iter()
            .find(|c| c.kind == kind)
            .map(|c| c.status.as_str())
    }
}

/// A pod as returned by the API server.
#[derive(Debug, Clone, Deserialize)]
pub struct Pod {
    /// Metadata.
    pub metadata: Metadata,
    /// Pod phase, e.g. `Running`.
    #[serde(default)]
    pub status: PodStatusView,
}

/// Pod status fields the platform reads.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PodStatusView {
    /// Lifecycle phase.
    pub phase: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(bound = "T: serde::de::DeserializeOwned")]
struct ObjectList<T> {
    #[serde(default)]
    items: Vec<T>,
}

/// Client for the cluster API server.
pub struct KubeClient {
    http: reqwest::Client,
    server: String,
    token: Option<String>,
}

impl KubeClient {
    /// Build a client from connection settings.
    pub fn new(config: &KubeConfig) -> KubeResult<Self> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(KUBE_TIMEOUT_SECS));
        if let Some(ca_pem) = &config.ca_pem {
            let cert = reqwest::Certificate::from_pem(ca_pem)
                .map_err(|e| KubeError::Config(format!("bad CA bundle: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }
        Ok(Self {
            http: builder.build()?,
            server: config.server.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    /// A client for the same server that authenticates with the given
    /// user's id-token instead of the default credentials.
    pub fn with_bearer(&self, id_token: &str) -> Self {
        Self {
            http: self.http.clone(),
            server: self.server.clone(),
            token: Some(id_token.to_string()),
        }
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        selector: Option<&str>,
    ) -> KubeResult<serde_json::Value> {
        let mut url = format!("{}{}", self.server, path);
        if let Some(selector) = selector {
            url.push_str(&format!("?labelSelector={}", urlencoding::encode(selector)));
        }
        debug!(method = %method, url = %url, "Cluster request");

        let mut request = self.http.request(method, &url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| KubeError::Decode(e.to_string()))?;
        if status >= 400 {
            let message = body
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("request rejected")
                .to_string();
            return Err(KubeError::Api { status, message });
        }
        Ok(body)
    }

    fn decode_list<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> KubeResult<Vec<T>> {
        let list: ObjectList<T> =
            serde_json::from_value(value).map_err(|e| KubeError::Decode(e.to_string()))?;
        Ok(list.items)
    }

    /// Deployments in a namespace, optionally filtered by label selector.
    pub async fn list_deployments(
        &self,
        namespace: &str,
        selector: Option<&str>,
    ) -> KubeResult<Vec<Deployment>> {
        let path = format!("/apis/apps/v1/namespaces/{}/deployments", namespace);
        let body = self.request(reqwest::Method::GET, &path, selector).await?;
        Self::decode_list(body)
    }

    /// One deployment by name.
    pub async fn get_deployment(&self, namespace: &str, name: &str) -> KubeResult<Deployment> {
        let path = format!("/apis/apps/v1/namespaces/{}/deployments/{}", namespace, name);
        let body = self.request(reqwest::Method::GET, &path, None).await?;
        serde_json::from_value(body).map_err(|e| KubeError::Decode(e.to_string()))
    }

    /// Pods in a namespace, optionally filtered by label selector.
    pub async fn list_pods(&self, namespace: &str, selector: Option<&str>) -> KubeResult<Vec<Pod>> {
        let path = format!("/api/v1/namespaces/{}/pods", namespace);
        let body = self.request(reqwest::Method::GET, &path, selector).await?;
        Self::decode_list(body)
    }

    /// Delete the replica sets matching a selector; the deployment
    /// recreates them, which restarts the workload.
    pub async fn delete_replica_sets(&self, namespace: &str, selector: &str) -> KubeResult<()> {
        let path = format!("/apis/apps/v1/namespaces/{}/replicasets", namespace);
        self.request(reqwest::Method::DELETE, &path, Some(selector))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deployment_condition_lookup() {
        let deployment: Deployment = serde_json::from_value(serde_json::json!({
            "metadata": {"name": "rstudio", "labels": {"app": "rstudio"}},
            "spec": {"replicas": 1},
            "status": {"conditions": [
                {"type": "Available", "status": "True"},
                {"type": "Progressing", "status": "True"},
            ]},
        }))
        .unwrap();
        assert_eq!(deployment.condition("Available"), Some("True"));
        assert_eq!(deployment.condition("ReplicaFailure"), None);
    }

    #[test]
    fn test_kubeconfig_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(
            &path,
            r#"
apiVersion: v1
clusters:
  - name: dev
    cluster:
      server: https://kube.example.com:6443
users:
  - name: dev
    user:
      token: sekrit
"#,
        )
        .unwrap();
        let config = KubeConfig::from_kubeconfig(&path).unwrap();
        assert_eq!(config.server, "https://kube.example.com:6443");
        assert_eq!(config.token.as_deref(), Some("sekrit"));
    }

    #[test]
    fn test_empty_list_decodes() {
        let items: Vec<Deployment> =
            KubeClient::decode_list(serde_json::json!({"kind": "DeploymentList"})).unwrap();
        assert!(items.is_empty());
    }
}
