// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task catalogue and submission.
//!
//! Each task type fixes its queue, name, description and positional args.
//! Submission writes the task row before sending the frame, so a delivery
//! failure is discoverable from the table.

use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use deckhand_core::config::QueueConfig;
use deckhand_core::error::CoreError;
use deckhand_core::model::{App, Bucket, Grant, GrantPrincipal, ManagedPolicy, ToolRelease, User};
use deckhand_core::persistence::{NewTask, Store};

use crate::broker::Broker;
use crate::message::TaskMessage;

/// Handler names, fixed for wire compatibility.
pub mod names {
    /// Create an app's IAM role.
    pub const CREATE_APP_ROLE: &str = "create_app_aws_role";
    /// Create an app's identity-plane client and group.
    pub const CREATE_APP_AUTH: &str = "create_app_auth_settings";
    /// Create a bucket with the platform baseline.
    pub const CREATE_S3BUCKET: &str = "create_s3bucket";
    /// Tag a bucket for archival and revoke all principals.
    pub const ARCHIVE_S3BUCKET: &str = "archive_s3bucket";
    /// Write a user grant into the user's inline policy.
    pub const GRANT_USER_ACCESS: &str = "grant_user_s3bucket_access";
    /// Write an app grant into the app's inline policy.
    pub const GRANT_APP_ACCESS: &str = "grant_app_s3bucket_access";
    /// Remove a user grant.
    pub const REVOKE_USER_ACCESS: &str = "revoke_user_s3bucket_access";
    /// Remove an app grant.
    pub const REVOKE_APP_ACCESS: &str = "revoke_app_s3bucket_access";
    /// Remove every principal's access to a bucket.
    pub const REVOKE_ALL_ACCESS: &str = "revoke_all_access_s3bucket";
    /// Attach/detach a managed policy across every user role.
    pub const UPDATE_POLICY_ALL_USERS: &str = "update_policy_for_all_users";
    /// Install or upgrade a tool release for a user.
    pub const DEPLOY_TOOL: &str = "deploy_tool";
    /// Recycle a tool's replica sets.
    pub const RESTART_TOOL: &str = "restart_tool";
    /// Uninstall a tool release.
    pub const UNINSTALL_TOOL: &str = "uninstall_tool";
    /// Re-run the home-directory reset release.
    pub const RESET_USER_HOME: &str = "reset_user_home";
}

/// A task ready for submission.
#[derive(Debug, Clone)]
pub struct TaskSubmission {
    /// Entity class name.
    pub entity_class: &'static str,
    /// Entity primary key.
    pub entity_id: String,
    /// Human description of the entity, e.g. the bucket name.
    pub entity_description: String,
    /// Submitting user's subject id, or "None".
    pub user_id: String,
    /// Registered handler name.
    pub task_name: &'static str,
    /// Human description of the work.
    pub task_description: &'static str,
    /// Positional args for the handler.
    pub args: Vec<Value>,
}

fn user_arg(user: Option<&User>) -> Value {
    match user {
        Some(user) => json!(user.auth0_id),
        None => json!("None"),
    }
}

/// `create_s3bucket` for a fresh bucket row.
pub fn create_s3bucket(bucket: &Bucket, user: Option<&User>, owner: &str) -> TaskSubmission {
    TaskSubmission {
        entity_class: "S3Bucket",
        entity_id: bucket.id.to_string(),
        entity_description: bucket.name.clone(),
        user_id: user.map(|u| u.auth0_id.clone()).unwrap_or_else(|| "None".into()),
        task_name: names::CREATE_S3BUCKET,
        task_description: "creating s3 bucket",
        args: vec![json!(bucket.id), user_arg(user), json!(owner)],
    }
}

/// `archive_s3bucket` for a soft-deleted bucket.
pub fn archive_s3bucket(bucket: &Bucket, user: Option<&User>) -> TaskSubmission {
    TaskSubmission {
        entity_class: "S3Bucket",
        entity_id: bucket.id.to_string(),
        entity_description: bucket.name.clone(),
        user_id: user.map(|u| u.auth0_id.clone()).unwrap_or_else(|| "None".into()),
        task_name: names::ARCHIVE_S3BUCKET,
        task_description: "archiving s3 bucket",
        args: vec![json!(bucket.id), user_arg(user)],
    }
}

/// `revoke_all_access_s3bucket` for a bucket being retired.
pub fn revoke_all_access(bucket: &Bucket, user: Option<&User>) -> TaskSubmission {
    TaskSubmission {
        entity_class: "S3Bucket",
        entity_id: bucket.id.to_string(),
        entity_description: bucket.name.clone(),
        user_id: user.map(|u| u.auth0_id.clone()).unwrap_or_else(|| "None".into()),
        task_name: names::REVOKE_ALL_ACCESS,
        task_description: "revoking all access to the s3 bucket",
        args: vec![json!(bucket.id), user_arg(user)],
    }
}

/// Grant task for a stored user or app grant; the variant picks the
/// handler. Group (policy) grants apply inline on the request path and
/// never come through here.
pub fn grant_access(grant: &Grant, bucket: &Bucket, acting_user: Option<&User>) -> TaskSubmission {
    let (task_name, task_description): (&'static str, &'static str) = match grant.principal {
        GrantPrincipal::User { .. } => (names::GRANT_USER_ACCESS, "grant access to the user"),
        GrantPrincipal::App { .. } => (names::GRANT_APP_ACCESS, "grant access to the app"),
        GrantPrincipal::Policy { .. } => unreachable!("policy grants are applied inline"),
    };
    TaskSubmission {
        entity_class: grant.entity_class(),
        entity_id: grant.id.to_string(),
        entity_description: bucket.name.clone(),
        user_id: acting_user
            .map(|u| u.auth0_id.clone())
            .unwrap_or_else(|| "None".into()),
        task_name,
        task_description,
        args: vec![json!(grant.id), user_arg(acting_user)],
    }
}

/// Revoke task for a grant that is being removed. Carries everything the
/// handler needs, since the row is gone by the time it runs.
pub fn revoke_access(
    grant: &Grant,
    bucket: &Bucket,
    acting_user: Option<&User>,
) -> TaskSubmission {
    let (task_name, task_description, principal_ref): (&'static str, &'static str, Value) =
        match &grant.principal {
            GrantPrincipal::User { user_id, .. } => {
                (names::REVOKE_USER_ACCESS, "revoke access to the user", json!(user_id))
            }
            GrantPrincipal::App { app_id } => {
                (names::REVOKE_APP_ACCESS, "revoke access to the app", json!(app_id))
            }
            GrantPrincipal::Policy { .. } => unreachable!("policy grants are applied inline"),
        };
    TaskSubmission {
        entity_class: grant.entity_class(),
        entity_id: grant.id.to_string(),
        entity_description: bucket.name.clone(),
        user_id: acting_user
            .map(|u| u.auth0_id.clone())
            .unwrap_or_else(|| "None".into()),
        task_name,
        task_description,
        args: vec![json!(bucket.arn()), principal_ref],
    }
}

/// `create_app_aws_role` for a fresh app row.
pub fn create_app_role(app: &App, user: Option<&User>) -> TaskSubmission {
    TaskSubmission {
        entity_class: "App",
        entity_id: app.id.to_string(),
        entity_description: app.name.clone(),
        user_id: user.map(|u| u.auth0_id.clone()).unwrap_or_else(|| "None".into()),
        task_name: names::CREATE_APP_ROLE,
        task_description: "creating aws role",
        args: vec![json!(app.id), user_arg(user)],
    }
}

/// `create_app_auth_settings` for a fresh app row.
pub fn create_app_auth(
    app: &App,
    user: Option<&User>,
    deployment_envs: &[String],
    disable_authentication: bool,
    connections: &[String],
) -> TaskSubmission {
    TaskSubmission {
        entity_class: "App",
        entity_id: app.id.to_string(),
        entity_description: app.name.clone(),
        user_id: user.map(|u| u.auth0_id.clone()).unwrap_or_else(|| "None".into()),
        task_name: names::CREATE_APP_AUTH,
        task_description: "creating auth settings",
        args: vec![
            json!(app.id),
            user_arg(user),
            json!(deployment_envs),
            json!(disable_authentication),
            json!(connections),
        ],
    }
}

/// `update_policy_for_all_users` for a managed policy.
pub fn update_policy_for_all_users(
    policy: &ManagedPolicy,
    user: Option<&User>,
    attach: bool,
) -> TaskSubmission {
    TaskSubmission {
        entity_class: "IAMManagedPolicy",
        entity_id: policy.id.to_string(),
        entity_description: policy.name.clone(),
        user_id: user.map(|u| u.auth0_id.clone()).unwrap_or_else(|| "None".into()),
        task_name: names::UPDATE_POLICY_ALL_USERS,
        task_description: "updating policy for all users",
        args: vec![json!(policy.name), json!(attach)],
    }
}

/// `deploy_tool` for a deployment row.
pub fn deploy_tool(deployment_id: i64, tool: &ToolRelease, user: &User) -> TaskSubmission {
    TaskSubmission {
        entity_class: "ToolDeployment",
        entity_id: deployment_id.to_string(),
        entity_description: tool.chart_name.clone(),
        user_id: user.auth0_id.clone(),
        task_name: names::DEPLOY_TOOL,
        task_description: "deploying tool",
        args: vec![json!(deployment_id), json!(user.auth0_id), json!(tool.chart_name)],
    }
}

/// `restart_tool` for a deployment row.
pub fn restart_tool(deployment_id: i64, tool: &ToolRelease, user: &User) -> TaskSubmission {
    TaskSubmission {
        entity_class: "ToolDeployment",
        entity_id: deployment_id.to_string(),
        entity_description: tool.chart_name.clone(),
        user_id: user.auth0_id.clone(),
        task_name: names::RESTART_TOOL,
        task_description: "restarting tool",
        args: vec![json!(deployment_id), json!(user.auth0_id)],
    }
}

/// `uninstall_tool` for a deployment row.
pub fn uninstall_tool(deployment_id: i64, tool: &ToolRelease, user: &User) -> TaskSubmission {
    TaskSubmission {
        entity_class: "ToolDeployment",
        entity_id: deployment_id.to_string(),
        entity_description: tool.chart_name.clone(),
        user_id: user.auth0_id.clone(),
        task_name: names::UNINSTALL_TOOL,
        task_description: "uninstalling tool",
        args: vec![json!(deployment_id), json!(user.auth0_id)],
    }
}

/// `reset_user_home` for a user.
pub fn reset_user_home(user: &User) -> TaskSubmission {
    TaskSubmission {
        entity_class: "User",
        entity_id: user.auth0_id.clone(),
        entity_description: user.username.clone(),
        user_id: user.auth0_id.clone(),
        task_name: names::RESET_USER_HOME,
        task_description: "resetting home directory",
        args: vec![json!(user.auth0_id)],
    }
}

/// Queue selection is a property of the task type, not the caller.
pub fn queue_for(task_name: &str, queues: &QueueConfig) -> String {
    match task_name {
        names::CREATE_APP_ROLE
        | names::GRANT_USER_ACCESS
        | names::GRANT_APP_ACCESS
        | names::REVOKE_USER_ACCESS
        | names::REVOKE_APP_ACCESS
        | names::REVOKE_ALL_ACCESS
        | names::UPDATE_POLICY_ALL_USERS => queues.iam.clone(),
        names::CREATE_S3BUCKET | names::ARCHIVE_S3BUCKET => queues.s3.clone(),
        names::CREATE_APP_AUTH => queues.auth.clone(),
        _ => queues.default_queue().to_string(),
    }
}

/// Writes task rows and sends frames.
pub struct Submitter {
    store: std::sync::Arc<dyn Store>,
    broker: std::sync::Arc<dyn Broker>,
    queues: QueueConfig,
}

impl Submitter {
    /// Create a submitter.
    pub fn new(
        store: std::sync::Arc<dyn Store>,
        broker: std::sync::Arc<dyn Broker>,
        queues: QueueConfig,
    ) -> Self {
        Self {
            store,
            broker,
            queues,
        }
    }

    /// Persist and enqueue a task. The row is written before the send so
    /// a failed delivery still surfaces in the table.
    pub async fn submit(&self, submission: TaskSubmission) -> Result<Uuid, CoreError> {
        let task_id = Uuid::new_v4();
        let queue_name = queue_for(submission.task_name, &self.queues);
        let message = TaskMessage::new(
            task_id,
            submission.task_name,
            &queue_name,
            submission.args.clone(),
        )?;
        let frame = message.encode();

        self.store
            .insert_task(&NewTask {
                task_id,
                entity_class: submission.entity_class.to_string(),
                entity_id: submission.entity_id.clone(),
                entity_description: submission.entity_description.clone(),
                user_id: submission.user_id.clone(),
                task_name: submission.task_name.to_string(),
                task_description: submission.task_description.to_string(),
                queue_name: queue_name.clone(),
                message_body: frame.clone(),
            })
            .await?;

        self.broker.send(&queue_name, &frame).await?;
        info!(
            task_id = %task_id,
            task_name = %submission.task_name,
            queue = %queue_name,
            entity = %submission.entity_description,
            "Task submitted"
        );
        Ok(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckhand_core::model::AccessLevel;

    fn queues() -> QueueConfig {
        QueueConfig {
            iam: "control-panel-iam".into(),
            s3: "control-panel-s3".into(),
            auth: "control-panel-auth".into(),
        }
    }

    #[test]
    fn test_queue_selection_by_task_type() {
        let queues = queues();
        assert_eq!(queue_for(names::CREATE_APP_ROLE, &queues), "control-panel-iam");
        assert_eq!(queue_for(names::GRANT_USER_ACCESS, &queues), "control-panel-iam");
        assert_eq!(queue_for(names::CREATE_S3BUCKET, &queues), "control-panel-s3");
        assert_eq!(queue_for(names::ARCHIVE_S3BUCKET, &queues), "control-panel-s3");
        assert_eq!(queue_for(names::CREATE_APP_AUTH, &queues), "control-panel-auth");
        // tool and home work ride the default queue
        assert_eq!(queue_for(names::DEPLOY_TOOL, &queues), "control-panel-auth");
        assert_eq!(queue_for(names::RESET_USER_HOME, &queues), "control-panel-auth");
    }

    #[test]
    fn test_revoke_submission_carries_arn_and_principal() {
        let bucket = Bucket {
            id: 7,
            name: "test-bucket-1".into(),
            is_data_warehouse: false,
            location_url: None,
            created_by: None,
            is_deleted: false,
            deleted_by: None,
            deleted_at: None,
            created_at: chrono::Utc::now(),
        };
        let grant = Grant {
            id: 3,
            bucket_id: 7,
            access_level: AccessLevel::Readonly,
            paths: vec![],
            principal: GrantPrincipal::User {
                user_id: "github|1234".into(),
                is_admin: false,
            },
        };
        let submission = revoke_access(&grant, &bucket, None);
        assert_eq!(submission.task_name, names::REVOKE_USER_ACCESS);
        assert_eq!(submission.args[0], json!("arn:aws:s3:::test-bucket-1"));
        assert_eq!(submission.args[1], json!("github|1234"));
    }
}
