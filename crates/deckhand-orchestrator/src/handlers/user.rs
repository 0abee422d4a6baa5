// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Home directory reset handler.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use deckhand_core::error::{CoreError, Plane};
use deckhand_core::events::SseEvent;
use deckhand_core::model::TaskRecord;

use super::arg_str;
use crate::context::RuntimeContext;
use crate::registry::TaskHandler;
use crate::tasks::names;

const RESET_CHART: &str = "reset-user-efs-home";
const RESET_TIMEOUT: Duration = Duration::from_secs(600);

/// Re-run the home-directory reset release in the user's namespace.
pub struct ResetUserHome;

#[async_trait]
impl TaskHandler for ResetUserHome {
    fn name(&self) -> &'static str {
        names::RESET_USER_HOME
    }

    async fn handle(
        &self,
        ctx: &RuntimeContext,
        _task: Option<&TaskRecord>,
        args: &[Value],
    ) -> Result<(), CoreError> {
        let user_id = arg_str(args, 0, "user_id")?;
        let user = ctx.require_user(user_id).await?;
        let slug = user.slug();
        let namespace = user.k8s_namespace();
        let release = format!("{}-{}", RESET_CHART, slug);
        let chart = format!("{}/{}", ctx.helm.config().repo_name, RESET_CHART);

        ctx.events
            .publish(&user.auth0_id, SseEvent::home_status("Resetting"));

        let mut process = ctx
            .helm
            .upgrade_install(
                &release,
                &chart,
                None,
                &namespace,
                &[("Username".to_string(), slug)],
            )
            .map_err(CoreError::from)?;

        match process.wait(Some(RESET_TIMEOUT)).await {
            Ok((0, _, _)) => {
                ctx.events
                    .publish(&user.auth0_id, SseEvent::home_status("Reset"));
                info!(release = %release, "Home directory reset");
                Ok(())
            }
            Ok((code, _, stderr)) => {
                ctx.events
                    .publish(&user.auth0_id, SseEvent::home_status("Failed"));
                Err(CoreError::ExternalPermanent {
                    plane: Plane::Cluster,
                    detail: format!("home reset exited {}: {}", code, stderr),
                })
            }
            Err(e) => {
                ctx.events
                    .publish(&user.auth0_id, SseEvent::home_status("Failed"));
                Err(e.into())
            }
        }
    }
}
