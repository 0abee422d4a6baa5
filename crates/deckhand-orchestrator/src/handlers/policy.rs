// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Managed policy fan-out handler.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use deckhand_core::error::CoreError;
use deckhand_core::model::TaskRecord;

use super::{arg_bool, arg_str, is_cancelled};
use crate::context::RuntimeContext;
use crate::registry::TaskHandler;
use crate::tasks::names;

/// Attach or detach a managed policy across every user role. Attach and
/// detach are both idempotent on the plane, so a retry converges.
pub struct UpdatePolicyForAllUsers;

#[async_trait]
impl TaskHandler for UpdatePolicyForAllUsers {
    fn name(&self) -> &'static str {
        names::UPDATE_POLICY_ALL_USERS
    }

    async fn handle(
        &self,
        ctx: &RuntimeContext,
        task: Option<&TaskRecord>,
        args: &[Value],
    ) -> Result<(), CoreError> {
        let policy_name = arg_str(args, 0, "policy_name")?;
        let attach = arg_bool(args, 1, "attach")?;

        let policy = ctx
            .store
            .get_policy_by_name(policy_name)
            .await?
            .ok_or_else(|| CoreError::not_found("policy", policy_name))?;

        let users = ctx.store.list_users().await?;
        let total = users.len();
        for (index, user) in users.iter().enumerate() {
            // fan-out over every user is the longest-running IAM task;
            // honour cancellation between roles
            if index % 10 == 0 && is_cancelled(ctx, task).await? {
                info!(policy = %policy.name, "Policy fan-out cancelled, stopping");
                return Ok(());
            }
            let role_name = user.iam_role_name(&ctx.config.env);
            if attach {
                ctx.iam.attach_policy(&role_name, &policy.arn).await?;
            } else {
                ctx.iam.detach_policy(&role_name, &policy.arn).await?;
            }
        }
        info!(policy = %policy.name, attach, users = total, "Policy fan-out complete");
        Ok(())
    }
}
