// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain records.
//!
//! Plain records with typed foreign keys. Cross-plane identifiers (role
//! names, namespaces, ARNs) are always derived through [`crate::naming`] so
//! the relational store never holds a value that could drift from the
//! remote planes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::naming;

/// A platform user, created on first successful OIDC login.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    /// Stable external subject id, e.g. `github|1234`.
    pub auth0_id: String,
    /// Login name.
    pub username: String,
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Whether the identity provider has verified the email.
    pub email_verified: bool,
    /// Superusers bypass namespace scoping on the cluster proxy.
    pub is_superuser: bool,
    /// When the user row was created.
    pub created_at: DateTime<Utc>,
}

impl User {
    /// DNS-safe slug derived from the username.
    pub fn slug(&self) -> String {
        naming::dns_label(&self.username)
    }

    /// The user's IAM role name in the given environment.
    pub fn iam_role_name(&self, env: &str) -> String {
        naming::user_role_name(env, &self.username)
    }

    /// The user's Kubernetes namespace.
    pub fn k8s_namespace(&self) -> String {
        naming::namespace_name(&self.username)
    }
}

/// A registered web application, created from a repository URL.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct App {
    /// Numeric id.
    pub id: i64,
    /// Human name.
    pub name: String,
    /// S3-safe slug derived from the repository name.
    pub slug: String,
    /// Repository URL (unique).
    pub repo_url: String,
    /// Creating user, if still present.
    pub created_by: Option<String>,
    /// When the app row was created.
    pub created_at: DateTime<Utc>,
}

impl App {
    /// The app's IAM role name in the given environment.
    pub fn iam_role_name(&self, env: &str) -> String {
        naming::app_role_name(env, &self.slug)
    }
}

/// An object-storage bucket managed by the platform.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Bucket {
    /// Numeric id.
    pub id: i64,
    /// Bucket name (unique, env-prefixed).
    pub name: String,
    /// Whether the bucket is part of the data warehouse.
    pub is_data_warehouse: bool,
    /// Location URL reported by the object store on creation.
    pub location_url: Option<String>,
    /// Creating user, if still present.
    pub created_by: Option<String>,
    /// Soft-deletion flag; archived buckets are never hard-deleted here.
    pub is_deleted: bool,
    /// Who archived the bucket.
    pub deleted_by: Option<String>,
    /// When the bucket was archived.
    pub deleted_at: Option<DateTime<Utc>>,
    /// When the bucket row was created.
    pub created_at: DateTime<Utc>,
}

impl Bucket {
    /// The bucket's ARN.
    pub fn arn(&self) -> String {
        naming::s3_arn(&self.name)
    }

    /// ARN for a path inside the bucket.
    pub fn arn_from_path(&self, path: &str) -> String {
        format!("{}{}", self.arn(), path)
    }
}

/// Access level of a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// Read-only object access.
    Readonly,
    /// Read-write object access.
    Readwrite,
}

impl AccessLevel {
    /// The statement Sid this level maps to in a policy document; also the
    /// stored column value.
    pub fn sid(&self) -> &'static str {
        match self {
            Self::Readonly => "readonly",
            Self::Readwrite => "readwrite",
        }
    }

    /// Parse a stored column value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "readonly" => Some(Self::Readonly),
            "readwrite" => Some(Self::Readwrite),
            _ => None,
        }
    }
}

/// The principal a grant is written against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantPrincipal {
    /// A user, via their per-user IAM role.
    User {
        /// The user's subject id.
        user_id: String,
        /// Whether the user administers the bucket.
        is_admin: bool,
    },
    /// An app, via its per-app IAM role.
    App {
        /// The app id.
        app_id: i64,
    },
    /// A role group, via its customer-managed policy.
    Policy {
        /// The managed policy id.
        policy_id: i64,
    },
}

/// A recorded permission from a principal to a bucket.
///
/// At most one grant exists per (principal, bucket); updates modify the row
/// in place.
#[derive(Debug, Clone)]
pub struct Grant {
    /// Numeric id, scoped to the principal's grant table.
    pub id: i64,
    /// Target bucket.
    pub bucket_id: i64,
    /// Access level.
    pub access_level: AccessLevel,
    /// Optional path sub-prefixes; empty means the whole bucket.
    pub paths: Vec<String>,
    /// Granted principal.
    pub principal: GrantPrincipal,
}

impl Grant {
    /// Entity class name used on task records.
    pub fn entity_class(&self) -> &'static str {
        match self.principal {
            GrantPrincipal::User { .. } => "UserS3Bucket",
            GrantPrincipal::App { .. } => "AppS3Bucket",
            GrantPrincipal::Policy { .. } => "PolicyS3Bucket",
        }
    }
}

/// Where a principal's policy document lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PolicyCarrier {
    /// Inline policy attached to a single role (users and apps).
    InlineRole {
        /// Role the inline policy is attached to.
        role_name: String,
    },
    /// Customer-managed policy document, versioned server-side (groups).
    ManagedPolicy {
        /// Policy ARN.
        arn: String,
    },
}

impl PolicyCarrier {
    /// Stable key used to serialise edits per carrier.
    pub fn lock_key(&self) -> String {
        match self {
            Self::InlineRole { role_name } => format!("role:{}", role_name),
            Self::ManagedPolicy { arn } => format!("policy:{}", arn),
        }
    }
}

/// A customer-managed policy used to group users with shared access.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ManagedPolicy {
    /// Numeric id.
    pub id: i64,
    /// Policy name.
    pub name: String,
    /// Policy ARN.
    pub arn: String,
    /// Creating user, if still present.
    pub created_by: Option<String>,
    /// When the policy row was created.
    pub created_at: DateTime<Utc>,
}

/// Lifecycle status of a task, derived rather than stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// The handler has reported completion.
    Completed,
    /// The task was cancelled before completion.
    Cancelled,
    /// Recently created and awaiting a worker.
    Pending,
    /// Redelivered recently after a failure.
    Retrying,
    /// Aged past the cut-off without completing.
    Failed,
}

impl TaskStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Pending => "PENDING",
            Self::Retrying => "RETRYING",
            Self::Failed => "FAILED",
        }
    }
}

/// A durable unit of queued work.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskRecord {
    /// Task id (UUID v4, primary key).
    pub task_id: Uuid,
    /// Entity class, e.g. "S3Bucket".
    pub entity_class: String,
    /// Entity primary key, stringly typed so user subjects fit too.
    pub entity_id: String,
    /// Human description of the entity, e.g. the bucket name.
    pub entity_description: String,
    /// Submitting user's subject id, or "None".
    pub user_id: String,
    /// Registered handler name.
    pub task_name: String,
    /// Human description of the work.
    pub task_description: String,
    /// Queue the message was sent to.
    pub queue_name: String,
    /// Encoded message frame, kept so delivery failure is discoverable.
    pub message_body: String,
    /// Set only after the handler's side-effects are durable.
    pub completed: bool,
    /// Cancellation flag checked by handlers at checkpoints.
    pub cancelled: bool,
    /// When the task row was created.
    pub created_at: DateTime<Utc>,
    /// Last redelivery time, if any.
    pub retried_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Derive the surfaced status at `now` given the configured age cut-off.
    pub fn status(&self, now: DateTime<Utc>, cutoff_days: i64) -> TaskStatus {
        if self.cancelled {
            return TaskStatus::Cancelled;
        }
        if self.completed {
            return TaskStatus::Completed;
        }
        let cutoff = now - Duration::days(cutoff_days);
        if self.created_at > cutoff {
            return TaskStatus::Pending;
        }
        match self.retried_at {
            Some(retried_at) if retried_at > cutoff => TaskStatus::Retrying,
            _ => TaskStatus::Failed,
        }
    }
}

/// An item in the software catalogue - not a user's deployed instance.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ToolRelease {
    /// Numeric id.
    pub id: i64,
    /// Helm chart name.
    pub chart_name: String,
    /// Display name.
    pub name: String,
    /// Chart version.
    pub version: String,
    /// Human description.
    pub description: String,
    /// JSON values overrides passed to the chart.
    #[sqlx(rename = "chart_values")]
    pub values: serde_json::Value,
    /// Restricted releases are visible only to their target users.
    pub is_restricted: bool,
    /// Bespoke domain name element, when the chart name should not be used.
    pub tool_domain: Option<String>,
    /// Image tag override stored against the release.
    pub image_tag: String,
    /// Target infrastructure tag.
    pub target_infra: Option<String>,
    /// When the release row was created.
    pub created_at: DateTime<Utc>,
}

/// Chart-name to image-tag-key lookup, seeded from configuration.
#[derive(Debug, Clone)]
pub struct ImageTagKeys {
    entries: Vec<(String, String)>,
}

impl Default for ImageTagKeys {
    fn default() -> Self {
        Self {
            entries: vec![
                ("jupyter-lab-datascience-notebook".into(), "jupyter.tag".into()),
                ("jupyter-lab-all-spark".into(), "jupyter.tag".into()),
                ("jupyter-lab".into(), "jupyterlab.image.tag".into()),
                ("rstudio".into(), "rstudio.image.tag".into()),
                ("vscode".into(), "vscode.image.tag".into()),
            ],
        }
    }
}

impl ImageTagKeys {
    /// Build from configured (chart, key) pairs.
    pub fn new(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }

    /// Look up the values key that carries the image tag for a chart.
    pub fn get(&self, chart_name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(chart, _)| chart == chart_name)
            .map(|(_, key)| key.as_str())
    }
}

/// One logical row per live deployment per user.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ToolDeployment {
    /// Numeric id.
    pub id: i64,
    /// Deployed release.
    pub release_id: i64,
    /// Owning user.
    pub user_id: String,
    /// Chart to uninstall before installing, for replace-then-install.
    pub old_chart_name: Option<String>,
    /// Whether the deployment is live.
    pub is_active: bool,
    /// When the deployment row was created.
    pub created_at: DateTime<Utc>,
}

/// An embedded dashboard registration.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Dashboard {
    /// Numeric id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// External dashboard id (unique).
    pub quicksight_id: String,
    /// Creating user, if still present.
    pub created_by: Option<String>,
    /// When the dashboard row was created.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(completed: bool, cancelled: bool, age_days: i64, retried_days: Option<i64>) -> TaskRecord {
        let now = Utc::now();
        TaskRecord {
            task_id: Uuid::new_v4(),
            entity_class: "S3Bucket".into(),
            entity_id: "1".into(),
            entity_description: "test-bucket-1".into(),
            user_id: "github|1".into(),
            task_name: "create_s3bucket".into(),
            task_description: "creating s3 bucket".into(),
            queue_name: "control-panel-s3".into(),
            message_body: "e30=".into(),
            completed,
            cancelled,
            created_at: now - Duration::days(age_days),
            retried_at: retried_days.map(|d| now - Duration::days(d)),
        }
    }

    #[test]
    fn test_task_status_derivation() {
        let now = Utc::now();
        assert_eq!(task(true, false, 0, None).status(now, 3), TaskStatus::Completed);
        assert_eq!(task(false, true, 0, None).status(now, 3), TaskStatus::Cancelled);
        // cancelled wins over completed
        assert_eq!(task(true, true, 0, None).status(now, 3), TaskStatus::Cancelled);
        assert_eq!(task(false, false, 1, None).status(now, 3), TaskStatus::Pending);
        assert_eq!(task(false, false, 5, None).status(now, 3), TaskStatus::Failed);
        assert_eq!(
            task(false, false, 5, Some(1)).status(now, 3),
            TaskStatus::Retrying
        );
        assert_eq!(
            task(false, false, 10, Some(7)).status(now, 3),
            TaskStatus::Failed
        );
    }

    #[test]
    fn test_user_derived_identifiers() {
        let user = User {
            auth0_id: "github|1234".into(),
            username: "Alice.Jones".into(),
            name: "Alice Jones".into(),
            email: "alice@example.com".into(),
            email_verified: true,
            is_superuser: false,
            created_at: Utc::now(),
        };
        assert_eq!(user.slug(), "alice-jones");
        assert_eq!(user.iam_role_name("test"), "test_user_alice.jones");
        assert_eq!(user.k8s_namespace(), "user-alice-jones");
    }

    #[test]
    fn test_grant_entity_class() {
        let grant = Grant {
            id: 1,
            bucket_id: 2,
            access_level: AccessLevel::Readonly,
            paths: vec![],
            principal: GrantPrincipal::App { app_id: 9 },
        };
        assert_eq!(grant.entity_class(), "AppS3Bucket");
    }

    #[test]
    fn test_policy_carrier_lock_keys_distinct() {
        let a = PolicyCarrier::InlineRole {
            role_name: "test_user_alice".into(),
        };
        let b = PolicyCarrier::ManagedPolicy {
            arn: "arn:aws:iam::123456789012:policy/test/group/analysts".into(),
        };
        assert_ne!(a.lock_key(), b.lock_key());
        assert!(a.lock_key().starts_with("role:"));
    }

    #[test]
    fn test_image_tag_keys_default_families() {
        let keys = ImageTagKeys::default();
        assert_eq!(keys.get("rstudio"), Some("rstudio.image.tag"));
        assert_eq!(keys.get("jupyter-lab-all-spark"), Some("jupyter.tag"));
        assert_eq!(keys.get("unknown-chart"), None);
    }

    #[test]
    fn test_bucket_arn() {
        let bucket = Bucket {
            id: 1,
            name: "test-bucket-1".into(),
            is_data_warehouse: false,
            location_url: None,
            created_by: None,
            is_deleted: false,
            deleted_by: None,
            deleted_at: None,
            created_at: Utc::now(),
        };
        assert_eq!(bucket.arn(), "arn:aws:s3:::test-bucket-1");
        assert_eq!(
            bucket.arn_from_path("/data/*"),
            "arn:aws:s3:::test-bucket-1/data/*"
        );
    }
}
