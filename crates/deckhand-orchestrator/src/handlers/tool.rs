// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tool deployment handlers.
//!
//! Deploys are Helm upgrade-installs tracked through a live subprocess;
//! the user sees status transitions on the event stream. Restart recycles
//! replica sets; uninstall tears the release down, tolerating a release
//! that is already gone.

use std::time::Duration;

use async_trait::async_trait;
use rand::RngCore;
use serde_json::Value;
use tracing::{info, warn};

use deckhand_cluster::deployment::{DeploymentStatus, DeploymentWatch};
use deckhand_cluster::error::HelmError;
use deckhand_core::error::{CoreError, Plane};
use deckhand_core::model::{TaskRecord, ToolRelease, User};
use deckhand_core::naming;

use super::{arg_i64, is_cancelled};
use crate::context::RuntimeContext;
use crate::registry::TaskHandler;
use crate::tasks::names;

/// Placeholder replaced by a fresh secret at deploy time.
const SECRET_TOKEN_PLACEHOLDER: &str = "<SECRET_TOKEN>";

fn secret_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Flatten a release's values into `--set` pairs: platform baseline, the
/// release's stored overrides (with secret placeholders filled), then the
/// image-tag override.
fn render_values(ctx: &RuntimeContext, tool: &ToolRelease, user: &User) -> Vec<(String, String)> {
    let username = user.username.to_lowercase();
    let mut values: Vec<(String, String)> = vec![
        ("username".to_string(), username.clone()),
        // kept for charts predating the lowercase key
        ("Username".to_string(), username),
        (
            "aws.iamRole".to_string(),
            user.iam_role_name(&ctx.config.env),
        ),
        ("toolsDomain".to_string(), ctx.config.tools_domain.clone()),
    ];

    if let Some(overrides) = tool.values.as_object() {
        for (key, value) in overrides {
            let rendered = value_to_string(value);
            let rendered = if rendered == SECRET_TOKEN_PLACEHOLDER {
                secret_token()
            } else {
                rendered
            };
            values.push((key.clone(), rendered));
        }
    }

    if let Some(tag_key) = ctx.image_tag_keys.get(&tool.chart_name) {
        values.push((tag_key.to_string(), tool.image_tag.clone()));
    }
    values
}

async fn load_deployment(
    ctx: &RuntimeContext,
    args: &[Value],
) -> Result<(i64, ToolRelease, User), CoreError> {
    let deployment_id = arg_i64(args, 0, "deployment_id")?;
    let deployment = ctx
        .store
        .get_deployment(deployment_id)
        .await?
        .ok_or_else(|| CoreError::not_found("deployment", deployment_id.to_string()))?;
    let tool = ctx
        .store
        .get_tool(deployment.release_id)
        .await?
        .ok_or_else(|| CoreError::not_found("tool", deployment.release_id.to_string()))?;
    let user = ctx.require_user(&deployment.user_id).await?;
    Ok((deployment_id, tool, user))
}

fn publish_tool_status(ctx: &RuntimeContext, user: &User, tool: &ToolRelease, status: &str) {
    ctx.events.publish(
        &user.auth0_id,
        deckhand_core::events::SseEvent::tool_status(
            &tool.chart_name,
            &tool.version,
            tool.id,
            status,
        ),
    );
}

/// Install or upgrade a tool release into the user's namespace.
pub struct DeployTool;

#[async_trait]
impl TaskHandler for DeployTool {
    fn name(&self) -> &'static str {
        names::DEPLOY_TOOL
    }

    async fn handle(
        &self,
        ctx: &RuntimeContext,
        task: Option<&TaskRecord>,
        args: &[Value],
    ) -> Result<(), CoreError> {
        let (deployment_id, tool, user) = load_deployment(ctx, args).await?;
        let deployment = ctx
            .store
            .get_deployment(deployment_id)
            .await?
            .ok_or_else(|| CoreError::not_found("deployment", deployment_id.to_string()))?;

        let namespace = user.k8s_namespace();
        let release = naming::release_name(
            &tool.chart_name,
            &user.username,
            ctx.config.max_release_name_len,
        );

        ctx.helm.repo_update(false).await.map_err(CoreError::from)?;

        // replace-then-install: drop the previous chart's release first
        if let Some(old_chart) = &deployment.old_chart_name {
            let old_release = naming::release_name(
                old_chart,
                &user.username,
                ctx.config.max_release_name_len,
            );
            match ctx.helm.uninstall(&namespace, &[old_release]).await {
                Ok(_) | Err(HelmError::ReleaseNotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let chart = format!("{}/{}", ctx.helm.config().repo_name, tool.chart_name);
        let values = render_values(ctx, &tool, &user);
        let process = ctx
            .helm
            .upgrade_install(&release, &chart, Some(&tool.version), &namespace, &values)
            .map_err(CoreError::from)?;

        let mut watch = DeploymentWatch::new();
        watch.track(process);
        publish_tool_status(ctx, &user, &tool, DeploymentStatus::Deploying.as_str());

        loop {
            if is_cancelled(ctx, task).await? {
                info!(release = %release, "Deploy cancelled, exiting");
                return Ok(());
            }
            match watch.subprocess_status().await {
                Some(DeploymentStatus::Deploying) => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Some(DeploymentStatus::DeployFailed) => {
                    publish_tool_status(ctx, &user, &tool, DeploymentStatus::DeployFailed.as_str());
                    return Err(CoreError::ExternalPermanent {
                        plane: Plane::Cluster,
                        detail: format!("helm install of '{}' failed", release),
                    });
                }
                _ => break,
            }
        }

        // install done; report what the cluster sees, or Ready when no
        // cluster client is configured
        let status = match &ctx.kube {
            Some(kube) => match watch.get_status(kube, &namespace, &tool.chart_name).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(error = %e, "Cannot query deployment status after install");
                    DeploymentStatus::Ready
                }
            },
            None => DeploymentStatus::Ready,
        };
        publish_tool_status(ctx, &user, &tool, status.as_str());
        info!(release = %release, status = %status.as_str(), "Tool deployed");
        Ok(())
    }
}

/// Recycle a tool's replica sets so the deployment restarts it.
pub struct RestartTool;

#[async_trait]
impl TaskHandler for RestartTool {
    fn name(&self) -> &'static str {
        names::RESTART_TOOL
    }

    async fn handle(
        &self,
        ctx: &RuntimeContext,
        _task: Option<&TaskRecord>,
        args: &[Value],
    ) -> Result<(), CoreError> {
        let (_, tool, user) = load_deployment(ctx, args).await?;
        let namespace = user.k8s_namespace();

        publish_tool_status(ctx, &user, &tool, DeploymentStatus::Restarting.as_str());
        ctx.kube()?
            .delete_replica_sets(&namespace, &format!("app={}", tool.chart_name))
            .await
            .map_err(CoreError::from)?;
        info!(namespace = %namespace, chart = %tool.chart_name, "Replica sets recycled");
        Ok(())
    }
}

/// Uninstall a tool release. A release that is already gone is success.
pub struct UninstallTool;

#[async_trait]
impl TaskHandler for UninstallTool {
    fn name(&self) -> &'static str {
        names::UNINSTALL_TOOL
    }

    async fn handle(
        &self,
        ctx: &RuntimeContext,
        _task: Option<&TaskRecord>,
        args: &[Value],
    ) -> Result<(), CoreError> {
        let (deployment_id, tool, user) = load_deployment(ctx, args).await?;
        let namespace = user.k8s_namespace();
        let release = naming::release_name(
            &tool.chart_name,
            &user.username,
            ctx.config.max_release_name_len,
        );

        match ctx.helm.uninstall(&namespace, &[release.clone()]).await {
            Ok(_) => {}
            Err(HelmError::ReleaseNotFound { .. }) => {
                warn!(release = %release, "Release already gone, continuing");
            }
            Err(e) => return Err(e.into()),
        }
        ctx.store.deactivate_deployment(deployment_id).await?;
        publish_tool_status(ctx, &user, &tool, DeploymentStatus::Absent.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_token_is_fresh_hex() {
        let a = secret_token();
        let b = secret_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&Value::String("x".into())), "x");
        assert_eq!(value_to_string(&serde_json::json!(3)), "3");
        assert_eq!(value_to_string(&serde_json::json!(true)), "true");
    }

    #[test]
    fn test_deploy_args_shape() {
        // deploy args carry [deployment_id, user_id, chart_name]
        let args = vec![
            serde_json::json!(3),
            serde_json::json!("github|1234"),
            serde_json::json!("rstudio"),
        ];
        assert_eq!(crate::handlers::arg_str(&args, 2, "chart_name").unwrap(), "rstudio");
        assert_eq!(arg_i64(&args, 0, "deployment_id").unwrap(), 3);
    }
}
