// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! App role and auth-settings handlers.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use deckhand_cloud::trust;
use deckhand_core::error::CoreError;
use deckhand_core::model::TaskRecord;

use super::{arg_bool, arg_i64, arg_str_vec};
use crate::context::RuntimeContext;
use crate::registry::TaskHandler;
use crate::tasks::names;

/// Create the app's IAM role from its trust policy.
pub struct CreateAppRole;

#[async_trait]
impl TaskHandler for CreateAppRole {
    fn name(&self) -> &'static str {
        names::CREATE_APP_ROLE
    }

    async fn handle(
        &self,
        ctx: &RuntimeContext,
        _task: Option<&TaskRecord>,
        args: &[Value],
    ) -> Result<(), CoreError> {
        let app_id = arg_i64(args, 0, "app_id")?;
        let app = ctx.require_app(app_id).await?;

        let role_name = app.iam_role_name(&ctx.config.env);
        let namespace = format!("app-{}", app.slug);
        let policy = trust::app_trust_policy(&ctx.trust, &namespace);
        ctx.iam.create_role(&role_name, &policy, &[]).await?;
        info!(app = %app.slug, role = %role_name, "App role created");
        Ok(())
    }
}

/// Create the app's identity-plane client and customer group for each
/// deployment environment.
pub struct CreateAppAuthSettings;

impl CreateAppAuthSettings {
    fn client_name(app_slug: &str, env_name: &str) -> String {
        format!("{}-{}", app_slug, env_name)
    }
}

#[async_trait]
impl TaskHandler for CreateAppAuthSettings {
    fn name(&self) -> &'static str {
        names::CREATE_APP_AUTH
    }

    async fn handle(
        &self,
        ctx: &RuntimeContext,
        _task: Option<&TaskRecord>,
        args: &[Value],
    ) -> Result<(), CoreError> {
        let app_id = arg_i64(args, 0, "app_id")?;
        let envs = arg_str_vec(args, 2, "deployment_envs")?;
        let disable_authentication = arg_bool(args, 3, "disable_authentication")?;
        let connections = arg_str_vec(args, 4, "connections")?;

        if disable_authentication {
            info!(app_id, "Authentication disabled, skipping client setup");
            return Ok(());
        }

        let app = ctx.require_app(app_id).await?;
        let identity = ctx.identity()?;
        for env_name in &envs {
            let name = Self::client_name(&app.slug, env_name);
            let callback = format!(
                "https://{}-{}.{}/callback",
                app.slug, env_name, ctx.config.apps_domain
            );
            identity
                .setup_app(&name, &name, &[callback], &connections)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_name_per_environment() {
        assert_eq!(
            CreateAppAuthSettings::client_name("data-explorer", "dev"),
            "data-explorer-dev"
        );
    }
}
