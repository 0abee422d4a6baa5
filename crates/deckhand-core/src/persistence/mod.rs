// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends.
//!
//! The [`Store`] trait is the only seam between the orchestration core and
//! the relational database. Handlers and intents depend on the trait so the
//! task path can be exercised against [`memory::MemoryStore`].

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryStore;
pub use self::postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{
    AccessLevel, App, Bucket, Dashboard, Grant, GrantPrincipal, ManagedPolicy, TaskRecord,
    ToolDeployment, ToolRelease, User,
};

/// Which grant table a grant id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantKind {
    /// User grants.
    User,
    /// App grants.
    App,
    /// Role-group (managed policy) grants.
    Policy,
}

impl GrantKind {
    /// Kind of a principal.
    pub fn of(principal: &GrantPrincipal) -> Self {
        match principal {
            GrantPrincipal::User { .. } => Self::User,
            GrantPrincipal::App { .. } => Self::App,
            GrantPrincipal::Policy { .. } => Self::Policy,
        }
    }
}

/// Fields for creating or updating a grant. The store enforces one row per
/// (principal, bucket): an existing row is modified in place.
#[derive(Debug, Clone)]
pub struct NewGrant {
    /// Target bucket.
    pub bucket_id: i64,
    /// Access level.
    pub access_level: AccessLevel,
    /// Path sub-prefixes, empty for the whole bucket.
    pub paths: Vec<String>,
    /// Granted principal.
    pub principal: GrantPrincipal,
}

/// Fields for creating a task row.
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Task id.
    pub task_id: Uuid,
    /// Entity class name.
    pub entity_class: String,
    /// Entity primary key.
    pub entity_id: String,
    /// Human description of the entity.
    pub entity_description: String,
    /// Submitting user's subject id, or "None".
    pub user_id: String,
    /// Registered handler name.
    pub task_name: String,
    /// Human description of the work.
    pub task_description: String,
    /// Queue name.
    pub queue_name: String,
    /// Encoded message frame.
    pub message_body: String,
}

/// A user feedback submission, exported by the feedback subcommand.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Feedback {
    /// Numeric id.
    pub id: i64,
    /// Satisfaction rating, 1..=5.
    pub satisfaction_rating: i16,
    /// Free-text suggestions.
    pub suggestions: String,
    /// When the feedback was submitted.
    pub created_at: DateTime<Utc>,
}

/// Persistence interface used by intents and task handlers.
#[allow(missing_docs)]
#[async_trait]
pub trait Store: Send + Sync {
    // Users
    async fn upsert_user(&self, user: &User) -> Result<(), CoreError>;
    async fn get_user(&self, auth0_id: &str) -> Result<Option<User>, CoreError>;
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, CoreError>;
    async fn list_users(&self) -> Result<Vec<User>, CoreError>;

    // Apps
    async fn insert_app(
        &self,
        name: &str,
        slug: &str,
        repo_url: &str,
        created_by: Option<&str>,
    ) -> Result<App, CoreError>;
    async fn get_app(&self, id: i64) -> Result<Option<App>, CoreError>;
    async fn get_app_by_repo_url(&self, repo_url: &str) -> Result<Option<App>, CoreError>;
    async fn delete_app(&self, id: i64) -> Result<(), CoreError>;

    // Buckets
    async fn insert_bucket(
        &self,
        name: &str,
        is_data_warehouse: bool,
        created_by: Option<&str>,
    ) -> Result<Bucket, CoreError>;
    async fn get_bucket(&self, id: i64) -> Result<Option<Bucket>, CoreError>;
    async fn get_bucket_by_name(&self, name: &str) -> Result<Option<Bucket>, CoreError>;
    async fn set_bucket_location(&self, id: i64, location_url: &str) -> Result<(), CoreError>;
    async fn mark_bucket_archived(&self, id: i64, deleted_by: &str) -> Result<(), CoreError>;

    // Grants. Upsert is modify-in-place keyed by (principal, bucket).
    async fn upsert_grant(&self, grant: &NewGrant) -> Result<Grant, CoreError>;
    async fn get_grant(&self, kind: GrantKind, id: i64) -> Result<Option<Grant>, CoreError>;
    async fn find_grant(
        &self,
        principal: &GrantPrincipal,
        bucket_id: i64,
    ) -> Result<Option<Grant>, CoreError>;
    async fn delete_grant(&self, kind: GrantKind, id: i64) -> Result<(), CoreError>;
    async fn grants_for_bucket(&self, bucket_id: i64) -> Result<Vec<Grant>, CoreError>;
    async fn grants_for_user(&self, user_id: &str) -> Result<Vec<Grant>, CoreError>;

    // Managed policies
    async fn insert_policy(
        &self,
        name: &str,
        arn: &str,
        created_by: Option<&str>,
    ) -> Result<ManagedPolicy, CoreError>;
    async fn get_policy(&self, id: i64) -> Result<Option<ManagedPolicy>, CoreError>;
    async fn get_policy_by_name(&self, name: &str) -> Result<Option<ManagedPolicy>, CoreError>;
    async fn delete_policy(&self, id: i64) -> Result<(), CoreError>;
    async fn set_policy_members(&self, policy_id: i64, user_ids: &[String])
    -> Result<(), CoreError>;
    async fn policy_member_ids(&self, policy_id: i64) -> Result<Vec<String>, CoreError>;

    // Tasks
    async fn insert_task(&self, task: &NewTask) -> Result<(), CoreError>;
    async fn get_task(&self, task_id: Uuid) -> Result<Option<TaskRecord>, CoreError>;
    async fn mark_task_completed(&self, task_id: Uuid) -> Result<(), CoreError>;
    async fn mark_task_retried(&self, task_id: Uuid, at: DateTime<Utc>) -> Result<(), CoreError>;
    async fn cancel_task(&self, task_id: Uuid) -> Result<(), CoreError>;
    /// Incomplete, non-cancelled tasks created before the cut-off.
    async fn stale_tasks(&self, older_than: DateTime<Utc>) -> Result<Vec<TaskRecord>, CoreError>;

    // Tool releases and deployments
    async fn get_tool(&self, id: i64) -> Result<Option<ToolRelease>, CoreError>;
    /// Most recent unrestricted release for a chart, or a restricted one
    /// targeted at the user.
    async fn find_tool_for_user(
        &self,
        chart_name: &str,
        user_id: &str,
    ) -> Result<Option<ToolRelease>, CoreError>;
    async fn upsert_deployment(
        &self,
        release_id: i64,
        user_id: &str,
        old_chart_name: Option<&str>,
    ) -> Result<ToolDeployment, CoreError>;
    async fn get_deployment(&self, id: i64) -> Result<Option<ToolDeployment>, CoreError>;
    async fn active_deployments_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ToolDeployment>, CoreError>;
    async fn deactivate_deployment(&self, id: i64) -> Result<(), CoreError>;

    // Dashboards
    async fn insert_dashboard(
        &self,
        name: &str,
        quicksight_id: &str,
        created_by: Option<&str>,
    ) -> Result<Dashboard, CoreError>;
    async fn get_dashboard_by_quicksight_id(
        &self,
        quicksight_id: &str,
    ) -> Result<Option<Dashboard>, CoreError>;
    async fn delete_dashboard(&self, id: i64) -> Result<(), CoreError>;
    async fn add_dashboard_viewer(&self, dashboard_id: i64, email: &str) -> Result<(), CoreError>;
    async fn dashboard_viewers(&self, dashboard_id: i64) -> Result<Vec<String>, CoreError>;

    // Feedback
    async fn list_feedback(&self) -> Result<Vec<Feedback>, CoreError>;
}
