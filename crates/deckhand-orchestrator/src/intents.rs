// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request-path entry points.
//!
//! Each intent runs to completion in bounded time: it validates, writes
//! domain rows, performs any inexpensive plane step that must land before
//! the caller sees success, and submits the rest to the task queue.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use deckhand_cloud::policy::base_policy_document;
use deckhand_cloud::trust;
use deckhand_core::error::CoreError;
use deckhand_core::model::{
    AccessLevel, App, Bucket, Grant, GrantPrincipal, ManagedPolicy, PolicyCarrier, ToolDeployment,
    User,
};
use deckhand_core::naming;
use deckhand_core::persistence::{GrantKind, NewGrant};

use crate::context::RuntimeContext;
use crate::tasks::{self, Submitter};

/// Managed policies attached to every fresh user role.
fn default_user_policy_arns(env: &str, account_id: &str) -> Vec<String> {
    [
        format!("{}-read-user-roles-inline-policies", env),
        "analytical-platform-textract-integration".to_string(),
        "analytical-platform-comprehend-integration".to_string(),
    ]
    .iter()
    .map(|name| naming::iam_arn(&format!("policy/{}", name), account_id))
    .collect()
}

/// Split a raw customer email submission on commas, semicolons and
/// whitespace.
pub fn split_emails(raw: &str) -> Vec<String> {
    raw.split([',', ';', ' ', '\t', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// ROC entry points, as invoked by the HTTP layer and the admin CLI.
pub struct Intents {
    ctx: Arc<RuntimeContext>,
    submitter: Submitter,
}

impl Intents {
    /// Build intents over a runtime context and a task submitter.
    pub fn new(ctx: Arc<RuntimeContext>, submitter: Submitter) -> Self {
        Self { ctx, submitter }
    }

    /// First-login user provisioning: the user row, the user's IAM role
    /// with its default policies, and the namespace initialisation
    /// releases. The releases install in the background; role creation is
    /// synchronous so the user's tools can assume it immediately.
    pub async fn on_first_login(&self, user: &User) -> Result<(), CoreError> {
        let existing = self.ctx.store.get_user(&user.auth0_id).await?;
        self.ctx.store.upsert_user(user).await?;
        if existing.is_some() {
            return Ok(());
        }

        let role_name = user.iam_role_name(&self.ctx.config.env);
        let policy = trust::user_trust_policy(&self.ctx.trust, &user.auth0_id, &user.slug());
        let attach = default_user_policy_arns(&self.ctx.config.env, &self.ctx.trust.account_id);
        self.ctx.iam.create_role(&role_name, &policy, &attach).await?;

        self.install_user_charts(user)?;
        info!(username = %user.username, role = %role_name, "User initialised");
        Ok(())
    }

    /// Spawn the two namespace-initialisation releases; the processes run
    /// detached and are not waited on.
    fn install_user_charts(&self, user: &User) -> Result<(), CoreError> {
        let slug = user.slug();
        let repo = &self.ctx.helm.config().repo_name;

        let bootstrap = self.ctx.helm.upgrade_install(
            &format!("bootstrap-user-{}", slug),
            &format!("{}/bootstrap-user", repo),
            None,
            &self.ctx.config.control_namespace,
            &[("Username".to_string(), slug.clone())],
        );
        if let Err(e) = bootstrap {
            warn!(error = %e, "Cannot start bootstrap-user release");
        }

        let provision = self.ctx.helm.upgrade_install(
            &format!("provision-user-{}", slug),
            &format!("{}/provision-user", repo),
            None,
            &user.k8s_namespace(),
            &[
                ("Username".to_string(), slug),
                ("Efsvolume".to_string(), self.ctx.config.efs_volume.clone()),
                ("OidcDomain".to_string(), self.ctx.config.oidc_domain.clone()),
                ("Email".to_string(), user.email.clone()),
                ("Fullname".to_string(), user.name.clone()),
            ],
        );
        if let Err(e) = provision {
            warn!(error = %e, "Cannot start provision-user release");
        }
        Ok(())
    }

    /// Create a bucket: validated synchronously, provisioned through the
    /// queue, with the creator granted admin read-write.
    pub async fn create_bucket(
        &self,
        acting_user_id: &str,
        name: &str,
        is_data_warehouse: bool,
    ) -> Result<Bucket, CoreError> {
        let user = self.ctx.require_user(acting_user_id).await?;
        let slug = naming::bucket_slug(name)?;
        naming::ensure_env_prefix(&self.ctx.config.env, &slug)?;

        let bucket = self
            .ctx
            .store
            .insert_bucket(&slug, is_data_warehouse, Some(&user.auth0_id))
            .await?;

        let grant = self
            .ctx
            .store
            .upsert_grant(&NewGrant {
                bucket_id: bucket.id,
                access_level: AccessLevel::Readwrite,
                paths: vec![],
                principal: GrantPrincipal::User {
                    user_id: user.auth0_id.clone(),
                    is_admin: true,
                },
            })
            .await?;

        self.submitter
            .submit(tasks::create_s3bucket(&bucket, Some(&user), "USER"))
            .await?;
        self.submitter
            .submit(tasks::grant_access(&grant, &bucket, Some(&user)))
            .await?;
        Ok(bucket)
    }

    /// Register an app from its repository URL.
    pub async fn register_app(
        &self,
        acting_user_id: &str,
        display_name: Option<&str>,
        repo_url: &str,
        deployment_envs: &[String],
        disable_authentication: bool,
        connections: &[String],
    ) -> Result<App, CoreError> {
        let user = self.ctx.require_user(acting_user_id).await?;
        let repo_name = naming::repo_name_from_url(repo_url)?;
        let slug = naming::dns_label(&repo_name);
        let name = display_name.unwrap_or(&repo_name);

        let app = self
            .ctx
            .store
            .insert_app(name, &slug, repo_url, Some(&user.auth0_id))
            .await?;

        self.submitter
            .submit(tasks::create_app_role(&app, Some(&user)))
            .await?;
        if !deployment_envs.is_empty() {
            self.submitter
                .submit(tasks::create_app_auth(
                    &app,
                    Some(&user),
                    deployment_envs,
                    disable_authentication,
                    connections,
                ))
                .await?;
        }
        Ok(app)
    }

    /// Create or update a grant. User and app grants flow through the
    /// queue; group grants apply inline against the managed policy.
    pub async fn grant_bucket_access(
        &self,
        acting_user_id: &str,
        principal: GrantPrincipal,
        bucket_id: i64,
        access_level: AccessLevel,
        paths: Vec<String>,
    ) -> Result<Grant, CoreError> {
        naming::validate_grant_paths(&paths)?;
        let user = self.ctx.require_user(acting_user_id).await?;
        let bucket = self.ctx.require_bucket(bucket_id).await?;
        if bucket.is_deleted {
            return Err(CoreError::Conflict {
                message: format!("bucket '{}' is archived", bucket.name),
            });
        }

        let grant = self
            .ctx
            .store
            .upsert_grant(&NewGrant {
                bucket_id,
                access_level,
                paths,
                principal,
            })
            .await?;

        if matches!(grant.principal, GrantPrincipal::Policy { .. }) {
            let carrier = self.ctx.carrier_for(&grant).await?;
            let arn = bucket.arn();
            let paths = grant.paths.clone();
            self.ctx
                .policies
                .edit(&carrier, move |policy| {
                    policy.grant_access(&arn, access_level, &paths)
                })
                .await?;
        } else {
            self.submitter
                .submit(tasks::grant_access(&grant, &bucket, Some(&user)))
                .await?;
        }
        Ok(grant)
    }

    /// Delete a grant and revoke the principal's access.
    pub async fn revoke_bucket_access(
        &self,
        acting_user_id: &str,
        kind: GrantKind,
        grant_id: i64,
    ) -> Result<(), CoreError> {
        let user = self.ctx.require_user(acting_user_id).await?;
        let grant = self
            .ctx
            .store
            .get_grant(kind, grant_id)
            .await?
            .ok_or_else(|| CoreError::not_found("grant", grant_id.to_string()))?;
        let bucket = self.ctx.require_bucket(grant.bucket_id).await?;

        self.ctx.store.delete_grant(kind, grant_id).await?;

        if matches!(grant.principal, GrantPrincipal::Policy { .. }) {
            let carrier = self.ctx.carrier_for(&grant).await?;
            self.ctx.policies.revoke_all(&carrier, &bucket.arn()).await?;
        } else {
            self.submitter
                .submit(tasks::revoke_access(&grant, &bucket, Some(&user)))
                .await?;
        }
        Ok(())
    }

    /// Soft-delete a bucket: tag for archival and revoke every principal.
    pub async fn archive_bucket(
        &self,
        acting_user_id: &str,
        bucket_id: i64,
    ) -> Result<(), CoreError> {
        let user = self.ctx.require_user(acting_user_id).await?;
        let bucket = self.ctx.require_bucket(bucket_id).await?;

        self.ctx
            .store
            .mark_bucket_archived(bucket.id, &user.auth0_id)
            .await?;
        self.submitter
            .submit(tasks::archive_s3bucket(&bucket, Some(&user)))
            .await?;
        self.submitter
            .submit(tasks::revoke_all_access(&bucket, Some(&user)))
            .await?;
        Ok(())
    }

    /// Queue a tool deployment. An unknown or restricted chart is a
    /// validation failure surfaced to the caller.
    pub async fn deploy_tool(
        &self,
        acting_user_id: &str,
        chart_name: &str,
        old_chart_name: Option<&str>,
    ) -> Result<(ToolDeployment, Uuid), CoreError> {
        let user = self.ctx.require_user(acting_user_id).await?;
        let tool = self
            .ctx
            .store
            .find_tool_for_user(chart_name, &user.auth0_id)
            .await?
            .ok_or_else(|| {
                CoreError::validation("name", format!("unsupported tool '{}'", chart_name))
            })?;

        let deployment = self
            .ctx
            .store
            .upsert_deployment(tool.id, &user.auth0_id, old_chart_name)
            .await?;
        let task_id = self
            .submitter
            .submit(tasks::deploy_tool(deployment.id, &tool, &user))
            .await?;
        Ok((deployment, task_id))
    }

    async fn owned_deployment(
        &self,
        user: &User,
        deployment_id: i64,
    ) -> Result<ToolDeployment, CoreError> {
        let deployment = self
            .ctx
            .store
            .get_deployment(deployment_id)
            .await?
            .ok_or_else(|| CoreError::not_found("deployment", deployment_id.to_string()))?;
        if deployment.user_id != user.auth0_id && !user.is_superuser {
            return Err(CoreError::Permission {
                message: "deployment belongs to another user".to_string(),
            });
        }
        Ok(deployment)
    }

    /// Queue a tool restart.
    pub async fn restart_tool(
        &self,
        acting_user_id: &str,
        deployment_id: i64,
    ) -> Result<Uuid, CoreError> {
        let user = self.ctx.require_user(acting_user_id).await?;
        let deployment = self.owned_deployment(&user, deployment_id).await?;
        let tool = self
            .ctx
            .store
            .get_tool(deployment.release_id)
            .await?
            .ok_or_else(|| CoreError::not_found("tool", deployment.release_id.to_string()))?;
        self.submitter
            .submit(tasks::restart_tool(deployment.id, &tool, &user))
            .await
    }

    /// Queue a tool uninstall.
    pub async fn uninstall_tool(
        &self,
        acting_user_id: &str,
        deployment_id: i64,
    ) -> Result<Uuid, CoreError> {
        let user = self.ctx.require_user(acting_user_id).await?;
        let deployment = self.owned_deployment(&user, deployment_id).await?;
        let tool = self
            .ctx
            .store
            .get_tool(deployment.release_id)
            .await?
            .ok_or_else(|| CoreError::not_found("tool", deployment.release_id.to_string()))?;
        self.submitter
            .submit(tasks::uninstall_tool(deployment.id, &tool, &user))
            .await
    }

    /// Queue a home-directory reset for a user.
    pub async fn reset_home(&self, acting_user_id: &str) -> Result<Uuid, CoreError> {
        let user = self.ctx.require_user(acting_user_id).await?;
        self.submitter.submit(tasks::reset_user_home(&user)).await
    }

    /// Create a role group: the managed policy on the cloud plane plus the
    /// row. Policy creation is a bounded request-path call.
    pub async fn create_policy(
        &self,
        acting_user_id: &str,
        name: &str,
    ) -> Result<ManagedPolicy, CoreError> {
        let user = self.ctx.require_user(acting_user_id).await?;
        if name.len() < 2
            || name.len() > 63
            || !name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "_+@,.:=-".contains(c))
        {
            return Err(CoreError::validation(
                "name",
                "must be 2-63 chars of lowercase letters, digits or _+@,.:=-",
            ));
        }

        let path = format!("/{}/group/", self.ctx.config.env);
        let arn = self
            .ctx
            .iam
            .create_policy(name, &path, &base_policy_document())
            .await?;
        let policy = self
            .ctx
            .store
            .insert_policy(name, &arn, Some(&user.auth0_id))
            .await?;
        Ok(policy)
    }

    /// Reconcile a role group's membership, on the plane and in the rows.
    pub async fn update_policy_members(
        &self,
        policy_id: i64,
        member_user_ids: &[String],
    ) -> Result<(), CoreError> {
        let policy = self.ctx.require_policy(policy_id).await?;
        self.ctx
            .store
            .set_policy_members(policy_id, member_user_ids)
            .await?;

        let mut role_names = HashSet::new();
        for user_id in member_user_ids {
            let user = self.ctx.require_user(user_id).await?;
            role_names.insert(user.iam_role_name(&self.ctx.config.env));
        }
        self.ctx
            .iam
            .update_policy_members(&policy.arn, &role_names)
            .await?;
        Ok(())
    }

    /// Delete a role group everywhere.
    pub async fn delete_policy(&self, policy_id: i64) -> Result<(), CoreError> {
        let policy = self.ctx.require_policy(policy_id).await?;
        self.ctx.iam.delete_policy(&policy.arn).await?;
        self.ctx.store.delete_policy(policy_id).await?;
        Ok(())
    }

    /// Queue the attach/detach fan-out of a managed policy over all users.
    pub async fn update_policy_for_all_users(
        &self,
        acting_user_id: Option<&str>,
        policy_name: &str,
        attach: bool,
    ) -> Result<Uuid, CoreError> {
        let user = match acting_user_id {
            Some(id) => Some(self.ctx.require_user(id).await?),
            None => None,
        };
        let policy = self
            .ctx
            .store
            .get_policy_by_name(policy_name)
            .await?
            .ok_or_else(|| CoreError::not_found("policy", policy_name))?;
        self.submitter
            .submit(tasks::update_policy_for_all_users(
                &policy,
                user.as_ref(),
                attach,
            ))
            .await
    }

    /// List an app's customers from the identity plane.
    pub async fn list_app_customers(
        &self,
        app_id: i64,
        env_name: &str,
        page: Option<u32>,
        per_page: Option<u32>,
    ) -> Result<serde_json::Value, CoreError> {
        let app = self.ctx.require_app(app_id).await?;
        let group = format!("{}-{}", app.slug, env_name);
        let identity = self.ctx.identity()?;
        match page {
            Some(page) => {
                let batch = identity
                    .list_group_members(
                        &group,
                        page,
                        per_page.unwrap_or(deckhand_identity::PER_PAGE),
                    )
                    .await?;
                Ok(json!({
                    "total": batch.total,
                    "users": batch.users.iter().map(|u| json!({
                        "user_id": u.user_id,
                        "email": u.email,
                        "name": u.name,
                    })).collect::<Vec<_>>(),
                }))
            }
            None => {
                let members = identity.list_all_group_members(&group).await?;
                Ok(json!({
                    "total": members.len(),
                    "users": members.iter().map(|u| json!({
                        "user_id": u.user_id,
                        "email": u.email,
                        "name": u.name,
                    })).collect::<Vec<_>>(),
                }))
            }
        }
    }

    /// Add customers to an app's group from a raw email submission.
    /// Emails are validated here; the identity plane assumes well-formed
    /// inputs.
    pub async fn add_app_customers(
        &self,
        app_id: i64,
        env_name: &str,
        raw_emails: &str,
    ) -> Result<(), CoreError> {
        let emails = split_emails(raw_emails);
        if emails.is_empty() {
            return Err(CoreError::validation("email", "no email addresses supplied"));
        }
        for email in &emails {
            if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
                return Err(CoreError::validation(
                    "email",
                    format!("'{}' is not a valid email address", email),
                ));
            }
        }

        let app = self.ctx.require_app(app_id).await?;
        let group = format!("{}-{}", app.slug, env_name);
        self.ctx
            .identity()?
            .add_group_members_by_email(&group, &emails, "email")
            .await?;
        Ok(())
    }

    /// Remove one customer from an app's group.
    pub async fn remove_app_customer(
        &self,
        app_id: i64,
        env_name: &str,
        customer_user_id: &str,
    ) -> Result<(), CoreError> {
        let app = self.ctx.require_app(app_id).await?;
        let group = format!("{}-{}", app.slug, env_name);
        self.ctx
            .identity()?
            .delete_group_members(&group, &[customer_user_id.to_string()])
            .await?;
        Ok(())
    }

    /// Remove an app: its role, identity artefacts, and the row.
    pub async fn delete_app(&self, app_id: i64, env_names: &[String]) -> Result<(), CoreError> {
        let app = self.ctx.require_app(app_id).await?;
        self.ctx
            .iam
            .delete_role(&app.iam_role_name(&self.ctx.config.env))
            .await?;
        if let Ok(identity) = self.ctx.identity() {
            for env_name in env_names {
                let scope = format!("{}-{}", app.slug, env_name);
                identity.clear_up_app(&scope, &scope).await?;
            }
        }
        self.ctx.store.delete_app(app_id).await?;
        Ok(())
    }

    /// Register an embedded dashboard. The external dashboard id is
    /// unique; re-registering is a conflict.
    pub async fn register_dashboard(
        &self,
        acting_user_id: &str,
        name: &str,
        quicksight_id: &str,
    ) -> Result<deckhand_core::model::Dashboard, CoreError> {
        let user = self.ctx.require_user(acting_user_id).await?;
        self.ctx
            .store
            .insert_dashboard(name, quicksight_id, Some(&user.auth0_id))
            .await
    }

    /// Share a dashboard with a viewer by email.
    pub async fn share_dashboard(
        &self,
        quicksight_id: &str,
        viewer_email: &str,
    ) -> Result<(), CoreError> {
        if !viewer_email.contains('@') {
            return Err(CoreError::validation(
                "email",
                format!("'{}' is not a valid email address", viewer_email),
            ));
        }
        let dashboard = self
            .ctx
            .store
            .get_dashboard_by_quicksight_id(quicksight_id)
            .await?
            .ok_or_else(|| CoreError::not_found("dashboard", quicksight_id))?;
        self.ctx
            .store
            .add_dashboard_viewer(dashboard.id, viewer_email)
            .await
    }

    /// Viewers of a dashboard, looked up by its external id.
    pub async fn dashboard_viewers(&self, quicksight_id: &str) -> Result<Vec<String>, CoreError> {
        let dashboard = self
            .ctx
            .store
            .get_dashboard_by_quicksight_id(quicksight_id)
            .await?
            .ok_or_else(|| CoreError::not_found("dashboard", quicksight_id))?;
        self.ctx.store.dashboard_viewers(dashboard.id).await
    }

    /// Remove a dashboard registration.
    pub async fn remove_dashboard(&self, quicksight_id: &str) -> Result<(), CoreError> {
        let dashboard = self
            .ctx
            .store
            .get_dashboard_by_quicksight_id(quicksight_id)
            .await?
            .ok_or_else(|| CoreError::not_found("dashboard", quicksight_id))?;
        self.ctx.store.delete_dashboard(dashboard.id).await
    }

    /// Surface non-terminal tasks older than the configured cut-off.
    pub async fn stale_tasks(&self) -> Result<Vec<deckhand_core::model::TaskRecord>, CoreError> {
        let cutoff =
            chrono::Utc::now() - chrono::Duration::days(self.ctx.config.task_age_cutoff_days);
        self.ctx.store.stale_tasks(cutoff).await
    }

    /// Mark a task cancelled; handlers observe the flag at checkpoints.
    pub async fn cancel_task(&self, task_id: Uuid) -> Result<(), CoreError> {
        self.ctx.store.cancel_task(task_id).await
    }

    /// Resolve a policy carrier for API consumers that need to show the
    /// effective target, e.g. admin diagnostics.
    pub async fn carrier_for_grant(
        &self,
        kind: GrantKind,
        grant_id: i64,
    ) -> Result<PolicyCarrier, CoreError> {
        let grant = self
            .ctx
            .store
            .get_grant(kind, grant_id)
            .await?
            .ok_or_else(|| CoreError::not_found("grant", grant_id.to_string()))?;
        self.ctx.carrier_for(&grant).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_emails_on_all_separators() {
        let emails = split_emails("a@x.com, b@x.com;c@x.com d@x.com\ne@x.com");
        assert_eq!(
            emails,
            vec!["a@x.com", "b@x.com", "c@x.com", "d@x.com", "e@x.com"]
        );
    }

    #[test]
    fn test_split_emails_empty() {
        assert!(split_emails("  ,; ").is_empty());
    }

    #[test]
    fn test_default_user_policy_arns() {
        let arns = default_user_policy_arns("test", "123456789012");
        assert_eq!(
            arns[0],
            "arn:aws:iam::123456789012:policy/test-read-user-roles-inline-policies"
        );
        assert_eq!(arns.len(), 3);
    }
}
