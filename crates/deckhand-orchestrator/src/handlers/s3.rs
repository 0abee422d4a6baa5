// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bucket and grant handlers.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use deckhand_core::error::CoreError;
use deckhand_core::model::{PolicyCarrier, TaskRecord};
use deckhand_core::persistence::GrantKind;

use super::{arg_i64, arg_str, is_cancelled};
use crate::context::RuntimeContext;
use crate::registry::TaskHandler;
use crate::tasks::names;

/// Create the bucket with the platform baseline and record its location.
pub struct CreateS3Bucket;

#[async_trait]
impl TaskHandler for CreateS3Bucket {
    fn name(&self) -> &'static str {
        names::CREATE_S3BUCKET
    }

    async fn handle(
        &self,
        ctx: &RuntimeContext,
        _task: Option<&TaskRecord>,
        args: &[Value],
    ) -> Result<(), CoreError> {
        let bucket_id = arg_i64(args, 0, "bucket_id")?;
        let bucket = ctx.require_bucket(bucket_id).await?;

        let created = ctx
            .object_store
            .create_bucket(&bucket.name, bucket.is_data_warehouse)
            .await?;
        ctx.store
            .set_bucket_location(bucket.id, &created.location)
            .await?;
        info!(bucket = %bucket.name, "Bucket provisioned");
        Ok(())
    }
}

/// Tag the bucket for archival; the mover is an external process.
pub struct ArchiveS3Bucket;

#[async_trait]
impl TaskHandler for ArchiveS3Bucket {
    fn name(&self) -> &'static str {
        names::ARCHIVE_S3BUCKET
    }

    async fn handle(
        &self,
        ctx: &RuntimeContext,
        _task: Option<&TaskRecord>,
        args: &[Value],
    ) -> Result<(), CoreError> {
        let bucket_id = arg_i64(args, 0, "bucket_id")?;
        let bucket = ctx.require_bucket(bucket_id).await?;
        ctx.object_store.mark_for_archival(&bucket.name).await?;
        Ok(())
    }
}

async fn apply_grant(ctx: &RuntimeContext, kind: GrantKind, grant_id: i64) -> Result<(), CoreError> {
    let grant = ctx
        .store
        .get_grant(kind, grant_id)
        .await?
        .ok_or_else(|| CoreError::not_found("grant", grant_id.to_string()))?;
    let bucket = ctx.require_bucket(grant.bucket_id).await?;
    let carrier = ctx.carrier_for(&grant).await?;

    let arn = bucket.arn();
    let level = grant.access_level;
    let paths = grant.paths.clone();
    ctx.policies
        .edit(&carrier, move |policy| {
            policy.grant_access(&arn, level, &paths)
        })
        .await?;
    info!(
        bucket = %bucket.name,
        carrier = %carrier.lock_key(),
        level = %level.sid(),
        "Grant applied"
    );
    Ok(())
}

/// Write a user grant into the user's inline policy.
pub struct GrantUserAccess;

#[async_trait]
impl TaskHandler for GrantUserAccess {
    fn name(&self) -> &'static str {
        names::GRANT_USER_ACCESS
    }

    async fn handle(
        &self,
        ctx: &RuntimeContext,
        _task: Option<&TaskRecord>,
        args: &[Value],
    ) -> Result<(), CoreError> {
        apply_grant(ctx, GrantKind::User, arg_i64(args, 0, "grant_id")?).await
    }
}

/// Write an app grant into the app's inline policy.
pub struct GrantAppAccess;

#[async_trait]
impl TaskHandler for GrantAppAccess {
    fn name(&self) -> &'static str {
        names::GRANT_APP_ACCESS
    }

    async fn handle(
        &self,
        ctx: &RuntimeContext,
        _task: Option<&TaskRecord>,
        args: &[Value],
    ) -> Result<(), CoreError> {
        apply_grant(ctx, GrantKind::App, arg_i64(args, 0, "grant_id")?).await
    }
}

/// Remove a user's access to a bucket. The grant row is already gone, so
/// the args carry the ARN and the principal.
pub struct RevokeUserAccess;

#[async_trait]
impl TaskHandler for RevokeUserAccess {
    fn name(&self) -> &'static str {
        names::REVOKE_USER_ACCESS
    }

    async fn handle(
        &self,
        ctx: &RuntimeContext,
        _task: Option<&TaskRecord>,
        args: &[Value],
    ) -> Result<(), CoreError> {
        let bucket_arn = arg_str(args, 0, "bucket_arn")?;
        let user_id = arg_str(args, 1, "user_id")?;
        let user = ctx.require_user(user_id).await?;
        let carrier = PolicyCarrier::InlineRole {
            role_name: user.iam_role_name(&ctx.config.env),
        };
        ctx.policies.revoke_all(&carrier, bucket_arn).await?;
        Ok(())
    }
}

/// Remove an app's access to a bucket.
pub struct RevokeAppAccess;

#[async_trait]
impl TaskHandler for RevokeAppAccess {
    fn name(&self) -> &'static str {
        names::REVOKE_APP_ACCESS
    }

    async fn handle(
        &self,
        ctx: &RuntimeContext,
        _task: Option<&TaskRecord>,
        args: &[Value],
    ) -> Result<(), CoreError> {
        let bucket_arn = arg_str(args, 0, "bucket_arn")?;
        let app_id = arg_i64(args, 1, "app_id")?;
        let app = ctx.require_app(app_id).await?;
        let carrier = PolicyCarrier::InlineRole {
            role_name: app.iam_role_name(&ctx.config.env),
        };
        ctx.policies.revoke_all(&carrier, bucket_arn).await?;
        Ok(())
    }
}

/// Remove every principal's access to a bucket, across user, app and
/// group carriers.
pub struct RevokeAllAccess;

#[async_trait]
impl TaskHandler for RevokeAllAccess {
    fn name(&self) -> &'static str {
        names::REVOKE_ALL_ACCESS
    }

    async fn handle(
        &self,
        ctx: &RuntimeContext,
        task: Option<&TaskRecord>,
        args: &[Value],
    ) -> Result<(), CoreError> {
        let bucket_id = arg_i64(args, 0, "bucket_id")?;
        let bucket = ctx.require_bucket(bucket_id).await?;
        let arn = bucket.arn();

        for grant in ctx.store.grants_for_bucket(bucket_id).await? {
            if is_cancelled(ctx, task).await? {
                info!(bucket = %bucket.name, "Revoke-all cancelled, stopping");
                return Ok(());
            }
            let carrier = ctx.carrier_for(&grant).await?;
            ctx.policies.revoke_all(&carrier, &arn).await?;
            ctx.store
                .delete_grant(GrantKind::of(&grant.principal), grant.id)
                .await?;
        }
        info!(bucket = %bucket.name, "All access revoked");
        Ok(())
    }
}
