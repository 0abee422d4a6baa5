// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tool deployment status.
//!
//! A deployment moves through Absent -> Deploying -> Ready | DeployFailed,
//! Ready -> Restarting -> Ready, and any state -> Uninstalling -> Absent.
//! While an install subprocess is live its state wins; afterwards the
//! cluster is queried. Idleness is a label owned by an external idler: the
//! platform reads it, never writes it.

use tracing::warn;

use crate::error::KubeResult;
use crate::helm::{HelmProcess, ProcessState};
use crate::kube::{Deployment, KubeClient};

/// Label an external idler sets on idled tool deployments.
pub const IDLED_LABEL: &str = "mojanalytics.xyz/idled";

/// Label carried by tool charts, used to tell tools apart from other
/// workloads in a user namespace.
const UNIDLER_KEY_LABEL: &str = "unidler-key";
const UNIDLE_KEY_LABEL: &str = "unidle-key";

/// Observable status of a tool deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentStatus {
    /// Nothing deployed.
    Absent,
    /// Install/upgrade in progress.
    Deploying,
    /// The install subprocess exited non-zero.
    DeployFailed,
    /// Available and serving.
    Ready,
    /// Scaled to zero by the idler.
    Idled,
    /// Waking from idle.
    Unidling,
    /// Replica sets being recycled.
    Restarting,
    /// Conditions did not match any known shape.
    Unknown,
}

impl DeploymentStatus {
    /// Human-facing name, as published on the event stream.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "Not deployed",
            Self::Deploying => "Deploying",
            Self::DeployFailed => "Failed",
            Self::Ready => "Ready",
            Self::Idled => "Idled",
            Self::Unidling => "Unidling",
            Self::Restarting => "Restarting",
            Self::Unknown => "Unknown",
        }
    }
}

/// Whether cluster metadata belongs to a tool deployment.
pub fn is_tool_deployment(labels: &std::collections::HashMap<String, String>) -> bool {
    labels.contains_key(UNIDLER_KEY_LABEL) || labels.contains_key(UNIDLE_KEY_LABEL)
}

/// Derive a status from a deployment object's conditions and labels.
pub fn status_of_deployment(deployment: &Deployment) -> DeploymentStatus {
    if deployment
        .metadata
        .labels
        .get(IDLED_LABEL)
        .is_some_and(|v| v == "true")
    {
        return DeploymentStatus::Idled;
    }

    if let Some(available) = deployment.condition("Available") {
        if available == "True" {
            if deployment.spec.replicas == Some(0) {
                return DeploymentStatus::Idled;
            }
            return DeploymentStatus::Ready;
        }
    }

    match deployment.condition("Progressing") {
        Some("True") => DeploymentStatus::Deploying,
        Some("False") => DeploymentStatus::DeployFailed,
        _ => {
            warn!(name = %deployment.metadata.name, "Unknown deployment status");
            DeploymentStatus::Unknown
        }
    }
}

/// Tracks the most recent install subprocess for one tool deployment.
///
/// The handle is transient and process-local; it is never persisted or
/// shared across processes.
#[derive(Default)]
pub struct DeploymentWatch {
    process: Option<HelmProcess>,
}

impl DeploymentWatch {
    /// Create a watch with no live subprocess.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly-spawned install subprocess.
    pub fn track(&mut self, process: HelmProcess) {
        self.process = Some(process);
    }

    /// Status from the live subprocess, when one is tracked:
    /// `Deploying` while it runs, `DeployFailed` on a non-zero exit,
    /// `None` once it has succeeded (or none was tracked).
    pub async fn subprocess_status(&mut self) -> Option<DeploymentStatus> {
        let process = self.process.as_mut()?;
        match process.poll().await {
            Ok(ProcessState::Running { .. }) => Some(DeploymentStatus::Deploying),
            Ok(ProcessState::Done { code: 0, .. }) => {
                self.process = None;
                None
            }
            Ok(ProcessState::Done { code, stderr, .. }) => {
                warn!(code, stderr = %stderr, "Tool install failed");
                Some(DeploymentStatus::DeployFailed)
            }
            Err(e) => {
                warn!(error = %e, "Cannot poll install subprocess");
                Some(DeploymentStatus::Unknown)
            }
        }
    }

    /// Full status: the subprocess while live, else the cluster.
    pub async fn get_status(
        &mut self,
        kube: &KubeClient,
        namespace: &str,
        chart_name: &str,
    ) -> KubeResult<DeploymentStatus> {
        if let Some(status) = self.subprocess_status().await {
            return Ok(status);
        }

        let deployments = kube
            .list_deployments(namespace, Some(&format!("app={}", chart_name)))
            .await?;
        let tools: Vec<&Deployment> = deployments
            .iter()
            .filter(|d| is_tool_deployment(&d.metadata.labels))
            .collect();

        match tools.as_slice() {
            [] => {
                warn!(namespace = %namespace, chart = %chart_name, "Tool not found");
                Ok(DeploymentStatus::Absent)
            }
            [deployment] => Ok(status_of_deployment(deployment)),
            _ => {
                warn!(namespace = %namespace, chart = %chart_name, "Multiple matches for tool");
                Ok(DeploymentStatus::Unknown)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment(
        labels: &[(&str, &str)],
        replicas: i32,
        conditions: &[(&str, &str)],
    ) -> Deployment {
        serde_json::from_value(serde_json::json!({
            "metadata": {
                "name": "rstudio",
                "labels": labels.iter().map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<std::collections::HashMap<_, _>>(),
            },
            "spec": {"replicas": replicas},
            "status": {"conditions": conditions.iter().map(|(t, s)| {
                serde_json::json!({"type": t, "status": s})
            }).collect::<Vec<_>>()},
        }))
        .unwrap()
    }

    #[test]
    fn test_available_is_ready() {
        let d = deployment(&[("unidler-key", "x")], 1, &[("Available", "True")]);
        assert_eq!(status_of_deployment(&d), DeploymentStatus::Ready);
    }

    #[test]
    fn test_zero_replicas_is_idled() {
        let d = deployment(&[("unidler-key", "x")], 0, &[("Available", "True")]);
        assert_eq!(status_of_deployment(&d), DeploymentStatus::Idled);
    }

    #[test]
    fn test_idled_label_wins() {
        let d = deployment(
            &[("unidler-key", "x"), ("mojanalytics.xyz/idled", "true")],
            1,
            &[("Available", "True")],
        );
        assert_eq!(status_of_deployment(&d), DeploymentStatus::Idled);
    }

    #[test]
    fn test_progressing_states() {
        let deploying = deployment(&[], 1, &[("Progressing", "True")]);
        assert_eq!(status_of_deployment(&deploying), DeploymentStatus::Deploying);

        let failed = deployment(&[], 1, &[("Progressing", "False")]);
        assert_eq!(status_of_deployment(&failed), DeploymentStatus::DeployFailed);
    }

    #[test]
    fn test_no_conditions_is_unknown() {
        let d = deployment(&[], 1, &[]);
        assert_eq!(status_of_deployment(&d), DeploymentStatus::Unknown);
    }

    #[test]
    fn test_tool_deployment_detection() {
        let mut labels = std::collections::HashMap::new();
        labels.insert("app".to_string(), "rstudio".to_string());
        assert!(!is_tool_deployment(&labels));
        labels.insert("unidle-key".to_string(), "abc".to_string());
        assert!(is_tool_deployment(&labels));
    }

    #[test]
    fn test_status_names() {
        assert_eq!(DeploymentStatus::Absent.as_str(), "Not deployed");
        assert_eq!(DeploymentStatus::Deploying.as_str(), "Deploying");
        assert_eq!(DeploymentStatus::Ready.as_str(), "Ready");
    }
}
