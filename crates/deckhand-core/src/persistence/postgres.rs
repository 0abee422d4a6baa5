// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed store.
//!
//! Plain runtime queries; schema lives in `migrations/`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{Feedback, GrantKind, NewGrant, NewTask, Store};
use crate::error::CoreError;
use crate::model::{
    AccessLevel, App, Bucket, Dashboard, Grant, GrantPrincipal, ManagedPolicy, TaskRecord,
    ToolDeployment, ToolRelease, User,
};

/// PostgreSQL-backed persistence implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new Postgres-backed store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Row shape shared by the three grant tables.
#[derive(Debug, sqlx::FromRow)]
struct GrantRow {
    id: i64,
    bucket_id: i64,
    access_level: String,
    paths: Vec<String>,
    // user grants
    user_id: Option<String>,
    is_admin: Option<bool>,
    // app grants
    app_id: Option<i64>,
    // policy grants
    policy_id: Option<i64>,
}

impl GrantRow {
    fn into_grant(self, kind: GrantKind) -> Result<Grant, CoreError> {
        let principal = match kind {
            GrantKind::User => GrantPrincipal::User {
                user_id: self.user_id.ok_or_else(|| CoreError::Fatal {
                    detail: "user grant row without user_id".to_string(),
                })?,
                is_admin: self.is_admin.unwrap_or(false),
            },
            GrantKind::App => GrantPrincipal::App {
                app_id: self.app_id.ok_or_else(|| CoreError::Fatal {
                    detail: "app grant row without app_id".to_string(),
                })?,
            },
            GrantKind::Policy => GrantPrincipal::Policy {
                policy_id: self.policy_id.ok_or_else(|| CoreError::Fatal {
                    detail: "policy grant row without policy_id".to_string(),
                })?,
            },
        };
        let access_level = AccessLevel::parse(&self.access_level).ok_or_else(|| {
            CoreError::Fatal {
                detail: format!("unknown access level '{}'", self.access_level),
            }
        })?;
        Ok(Grant {
            id: self.id,
            bucket_id: self.bucket_id,
            access_level,
            paths: self.paths,
            principal,
        })
    }
}

const USER_GRANT_COLS: &str = "id, bucket_id, access_level, paths, user_id, is_admin, \
     NULL::bigint as app_id, NULL::bigint as policy_id";
const APP_GRANT_COLS: &str = "id, bucket_id, access_level, paths, NULL::text as user_id, \
     NULL::boolean as is_admin, app_id, NULL::bigint as policy_id";
const POLICY_GRANT_COLS: &str = "id, bucket_id, access_level, paths, NULL::text as user_id, \
     NULL::boolean as is_admin, NULL::bigint as app_id, policy_id";

#[async_trait]
impl Store for PgStore {
    async fn upsert_user(&self, user: &User) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (auth0_id, username, name, email, email_verified, is_superuser)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (auth0_id) DO UPDATE
            SET username = $2, name = $3, email = $4, email_verified = $5, is_superuser = $6
            "#,
        )
        .bind(&user.auth0_id)
        .bind(&user.username)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.email_verified)
        .bind(user.is_superuser)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user(&self, auth0_id: &str) -> Result<Option<User>, CoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT auth0_id, username, name, email, email_verified, is_superuser, created_at \
             FROM users WHERE auth0_id = $1",
        )
        .bind(auth0_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, CoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT auth0_id, username, name, email, email_verified, is_superuser, created_at \
             FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn list_users(&self) -> Result<Vec<User>, CoreError> {
        let users = sqlx::query_as::<_, User>(
            "SELECT auth0_id, username, name, email, email_verified, is_superuser, created_at \
             FROM users ORDER BY username",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn insert_app(
        &self,
        name: &str,
        slug: &str,
        repo_url: &str,
        created_by: Option<&str>,
    ) -> Result<App, CoreError> {
        let app = sqlx::query_as::<_, App>(
            r#"
            INSERT INTO apps (name, slug, repo_url, created_by)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, slug, repo_url, created_by, created_at
            "#,
        )
        .bind(name)
        .bind(slug)
        .bind(repo_url)
        .bind(created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => CoreError::Conflict {
                message: format!("app with repository '{}' already exists", repo_url),
            },
            _ => e.into(),
        })?;
        Ok(app)
    }

    async fn get_app(&self, id: i64) -> Result<Option<App>, CoreError> {
        let app = sqlx::query_as::<_, App>(
            "SELECT id, name, slug, repo_url, created_by, created_at FROM apps WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(app)
    }

    async fn get_app_by_repo_url(&self, repo_url: &str) -> Result<Option<App>, CoreError> {
        let app = sqlx::query_as::<_, App>(
            "SELECT id, name, slug, repo_url, created_by, created_at FROM apps \
             WHERE repo_url = $1",
        )
        .bind(repo_url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(app)
    }

    async fn delete_app(&self, id: i64) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM apps WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_bucket(
        &self,
        name: &str,
        is_data_warehouse: bool,
        created_by: Option<&str>,
    ) -> Result<Bucket, CoreError> {
        let bucket = sqlx::query_as::<_, Bucket>(
            r#"
            INSERT INTO buckets (name, is_data_warehouse, created_by)
            VALUES ($1, $2, $3)
            RETURNING id, name, is_data_warehouse, location_url, created_by,
                      is_deleted, deleted_by, deleted_at, created_at
            "#,
        )
        .bind(name)
        .bind(is_data_warehouse)
        .bind(created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => CoreError::Conflict {
                message: format!("bucket '{}' already exists", name),
            },
            _ => e.into(),
        })?;
        Ok(bucket)
    }

    async fn get_bucket(&self, id: i64) -> Result<Option<Bucket>, CoreError> {
        let bucket = sqlx::query_as::<_, Bucket>(
            "SELECT id, name, is_data_warehouse, location_url, created_by, is_deleted, \
             deleted_by, deleted_at, created_at FROM buckets WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(bucket)
    }

    async fn get_bucket_by_name(&self, name: &str) -> Result<Option<Bucket>, CoreError> {
        let bucket = sqlx::query_as::<_, Bucket>(
            "SELECT id, name, is_data_warehouse, location_url, created_by, is_deleted, \
             deleted_by, deleted_at, created_at FROM buckets WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(bucket)
    }

    async fn set_bucket_location(&self, id: i64, location_url: &str) -> Result<(), CoreError> {
        sqlx::query("UPDATE buckets SET location_url = $2 WHERE id = $1")
            .bind(id)
            .bind(location_url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_bucket_archived(&self, id: i64, deleted_by: &str) -> Result<(), CoreError> {
        sqlx::query(
            "UPDATE buckets SET is_deleted = TRUE, deleted_by = $2, deleted_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(deleted_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_grant(&self, grant: &NewGrant) -> Result<Grant, CoreError> {
        let row = match &grant.principal {
            GrantPrincipal::User { user_id, is_admin } => {
                sqlx::query_as::<_, GrantRow>(&format!(
                    r#"
                    INSERT INTO user_grants (user_id, bucket_id, access_level, paths, is_admin)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (user_id, bucket_id) DO UPDATE
                    SET access_level = $3, paths = $4, is_admin = $5
                    RETURNING {USER_GRANT_COLS}
                    "#
                ))
                .bind(user_id)
                .bind(grant.bucket_id)
                .bind(grant.access_level.sid())
                .bind(&grant.paths)
                .bind(is_admin)
                .fetch_one(&self.pool)
                .await?
                .into_grant(GrantKind::User)?
            }
            GrantPrincipal::App { app_id } => sqlx::query_as::<_, GrantRow>(&format!(
                r#"
                INSERT INTO app_grants (app_id, bucket_id, access_level, paths)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (app_id, bucket_id) DO UPDATE
                SET access_level = $3, paths = $4
                RETURNING {APP_GRANT_COLS}
                "#
            ))
            .bind(app_id)
            .bind(grant.bucket_id)
            .bind(grant.access_level.sid())
            .bind(&grant.paths)
            .fetch_one(&self.pool)
            .await?
            .into_grant(GrantKind::App)?,
            GrantPrincipal::Policy { policy_id } => sqlx::query_as::<_, GrantRow>(&format!(
                r#"
                INSERT INTO policy_grants (policy_id, bucket_id, access_level, paths)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (policy_id, bucket_id) DO UPDATE
                SET access_level = $3, paths = $4
                RETURNING {POLICY_GRANT_COLS}
                "#
            ))
            .bind(policy_id)
            .bind(grant.bucket_id)
            .bind(grant.access_level.sid())
            .bind(&grant.paths)
            .fetch_one(&self.pool)
            .await?
            .into_grant(GrantKind::Policy)?,
        };
        Ok(row)
    }

    async fn get_grant(&self, kind: GrantKind, id: i64) -> Result<Option<Grant>, CoreError> {
        let query = match kind {
            GrantKind::User => format!("SELECT {USER_GRANT_COLS} FROM user_grants WHERE id = $1"),
            GrantKind::App => format!("SELECT {APP_GRANT_COLS} FROM app_grants WHERE id = $1"),
            GrantKind::Policy => {
                format!("SELECT {POLICY_GRANT_COLS} FROM policy_grants WHERE id = $1")
            }
        };
        let row = sqlx::query_as::<_, GrantRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.into_grant(kind)).transpose()
    }

    async fn find_grant(
        &self,
        principal: &GrantPrincipal,
        bucket_id: i64,
    ) -> Result<Option<Grant>, CoreError> {
        let kind = GrantKind::of(principal);
        let row = match principal {
            GrantPrincipal::User { user_id, .. } => sqlx::query_as::<_, GrantRow>(&format!(
                "SELECT {USER_GRANT_COLS} FROM user_grants WHERE user_id = $1 AND bucket_id = $2"
            ))
            .bind(user_id)
            .bind(bucket_id)
            .fetch_optional(&self.pool)
            .await?,
            GrantPrincipal::App { app_id } => sqlx::query_as::<_, GrantRow>(&format!(
                "SELECT {APP_GRANT_COLS} FROM app_grants WHERE app_id = $1 AND bucket_id = $2"
            ))
            .bind(app_id)
            .bind(bucket_id)
            .fetch_optional(&self.pool)
            .await?,
            GrantPrincipal::Policy { policy_id } => sqlx::query_as::<_, GrantRow>(&format!(
                "SELECT {POLICY_GRANT_COLS} FROM policy_grants \
                 WHERE policy_id = $1 AND bucket_id = $2"
            ))
            .bind(policy_id)
            .bind(bucket_id)
            .fetch_optional(&self.pool)
            .await?,
        };
        row.map(|r| r.into_grant(kind)).transpose()
    }

    async fn delete_grant(&self, kind: GrantKind, id: i64) -> Result<(), CoreError> {
        let query = match kind {
            GrantKind::User => "DELETE FROM user_grants WHERE id = $1",
            GrantKind::App => "DELETE FROM app_grants WHERE id = $1",
            GrantKind::Policy => "DELETE FROM policy_grants WHERE id = $1",
        };
        sqlx::query(query).bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn grants_for_bucket(&self, bucket_id: i64) -> Result<Vec<Grant>, CoreError> {
        let mut grants = Vec::new();
        for (kind, query) in [
            (
                GrantKind::User,
                format!("SELECT {USER_GRANT_COLS} FROM user_grants WHERE bucket_id = $1"),
            ),
            (
                GrantKind::App,
                format!("SELECT {APP_GRANT_COLS} FROM app_grants WHERE bucket_id = $1"),
            ),
            (
                GrantKind::Policy,
                format!("SELECT {POLICY_GRANT_COLS} FROM policy_grants WHERE bucket_id = $1"),
            ),
        ] {
            let rows = sqlx::query_as::<_, GrantRow>(&query)
                .bind(bucket_id)
                .fetch_all(&self.pool)
                .await?;
            for row in rows {
                grants.push(row.into_grant(kind)?);
            }
        }
        Ok(grants)
    }

    async fn grants_for_user(&self, user_id: &str) -> Result<Vec<Grant>, CoreError> {
        let rows = sqlx::query_as::<_, GrantRow>(&format!(
            "SELECT {USER_GRANT_COLS} FROM user_grants WHERE user_id = $1 ORDER BY id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| r.into_grant(GrantKind::User))
            .collect()
    }

    async fn insert_policy(
        &self,
        name: &str,
        arn: &str,
        created_by: Option<&str>,
    ) -> Result<ManagedPolicy, CoreError> {
        let policy = sqlx::query_as::<_, ManagedPolicy>(
            r#"
            INSERT INTO managed_policies (name, arn, created_by)
            VALUES ($1, $2, $3)
            RETURNING id, name, arn, created_by, created_at
            "#,
        )
        .bind(name)
        .bind(arn)
        .bind(created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => CoreError::Conflict {
                message: format!("policy '{}' already exists", name),
            },
            _ => e.into(),
        })?;
        Ok(policy)
    }

    async fn get_policy(&self, id: i64) -> Result<Option<ManagedPolicy>, CoreError> {
        let policy = sqlx::query_as::<_, ManagedPolicy>(
            "SELECT id, name, arn, created_by, created_at FROM managed_policies WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(policy)
    }

    async fn get_policy_by_name(&self, name: &str) -> Result<Option<ManagedPolicy>, CoreError> {
        let policy = sqlx::query_as::<_, ManagedPolicy>(
            "SELECT id, name, arn, created_by, created_at FROM managed_policies WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(policy)
    }

    async fn delete_policy(&self, id: i64) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM managed_policies WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_policy_members(
        &self,
        policy_id: i64,
        user_ids: &[String],
    ) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM policy_members WHERE policy_id = $1")
            .bind(policy_id)
            .execute(&mut *tx)
            .await?;
        for user_id in user_ids {
            sqlx::query(
                "INSERT INTO policy_members (policy_id, user_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(policy_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn policy_member_ids(&self, policy_id: i64) -> Result<Vec<String>, CoreError> {
        let ids: Vec<(String,)> = sqlx::query_as(
            "SELECT user_id FROM policy_members WHERE policy_id = $1 ORDER BY user_id",
        )
        .bind(policy_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn insert_task(&self, task: &NewTask) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO tasks (task_id, entity_class, entity_id, entity_description, user_id,
                               task_name, task_description, queue_name, message_body)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(task.task_id)
        .bind(&task.entity_class)
        .bind(&task.entity_id)
        .bind(&task.entity_description)
        .bind(&task.user_id)
        .bind(&task.task_name)
        .bind(&task.task_description)
        .bind(&task.queue_name)
        .bind(&task.message_body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Option<TaskRecord>, CoreError> {
        let task = sqlx::query_as::<_, TaskRecord>(
            "SELECT task_id, entity_class, entity_id, entity_description, user_id, task_name, \
             task_description, queue_name, message_body, completed, cancelled, created_at, \
             retried_at FROM tasks WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(task)
    }

    async fn mark_task_completed(&self, task_id: Uuid) -> Result<(), CoreError> {
        sqlx::query("UPDATE tasks SET completed = TRUE WHERE task_id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_task_retried(&self, task_id: Uuid, at: DateTime<Utc>) -> Result<(), CoreError> {
        sqlx::query("UPDATE tasks SET retried_at = $2 WHERE task_id = $1")
            .bind(task_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn cancel_task(&self, task_id: Uuid) -> Result<(), CoreError> {
        sqlx::query("UPDATE tasks SET cancelled = TRUE WHERE task_id = $1 AND completed = FALSE")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn stale_tasks(&self, older_than: DateTime<Utc>) -> Result<Vec<TaskRecord>, CoreError> {
        let tasks = sqlx::query_as::<_, TaskRecord>(
            "SELECT task_id, entity_class, entity_id, entity_description, user_id, task_name, \
             task_description, queue_name, message_body, completed, cancelled, created_at, \
             retried_at FROM tasks \
             WHERE completed = FALSE AND cancelled = FALSE AND created_at < $1 \
             ORDER BY created_at",
        )
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }

    async fn get_tool(&self, id: i64) -> Result<Option<ToolRelease>, CoreError> {
        let tool = sqlx::query_as::<_, ToolRelease>(
            "SELECT id, chart_name, name, version, description, chart_values, is_restricted, \
             tool_domain, image_tag, target_infra, created_at FROM tool_releases WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tool)
    }

    async fn find_tool_for_user(
        &self,
        chart_name: &str,
        user_id: &str,
    ) -> Result<Option<ToolRelease>, CoreError> {
        let tool = sqlx::query_as::<_, ToolRelease>(
            r#"
            SELECT t.id, t.chart_name, t.name, t.version, t.description, t.chart_values,
                   t.is_restricted, t.tool_domain, t.image_tag, t.target_infra, t.created_at
            FROM tool_releases t
            WHERE t.chart_name = $1
              AND (t.is_restricted = FALSE
                   OR EXISTS (SELECT 1 FROM tool_target_users tu
                              WHERE tu.tool_id = t.id AND tu.user_id = $2))
            ORDER BY t.created_at DESC
            LIMIT 1
            "#,
        )
        .bind(chart_name)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tool)
    }

    async fn upsert_deployment(
        &self,
        release_id: i64,
        user_id: &str,
        old_chart_name: Option<&str>,
    ) -> Result<ToolDeployment, CoreError> {
        let deployment = sqlx::query_as::<_, ToolDeployment>(
            r#"
            INSERT INTO tool_deployments (release_id, user_id, old_chart_name, is_active)
            VALUES ($1, $2, $3, TRUE)
            ON CONFLICT (release_id, user_id) DO UPDATE
            SET old_chart_name = $3, is_active = TRUE
            RETURNING id, release_id, user_id, old_chart_name, is_active, created_at
            "#,
        )
        .bind(release_id)
        .bind(user_id)
        .bind(old_chart_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(deployment)
    }

    async fn get_deployment(&self, id: i64) -> Result<Option<ToolDeployment>, CoreError> {
        let deployment = sqlx::query_as::<_, ToolDeployment>(
            "SELECT id, release_id, user_id, old_chart_name, is_active, created_at \
             FROM tool_deployments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(deployment)
    }

    async fn active_deployments_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ToolDeployment>, CoreError> {
        let deployments = sqlx::query_as::<_, ToolDeployment>(
            "SELECT id, release_id, user_id, old_chart_name, is_active, created_at \
             FROM tool_deployments WHERE user_id = $1 AND is_active = TRUE ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(deployments)
    }

    async fn deactivate_deployment(&self, id: i64) -> Result<(), CoreError> {
        sqlx::query("UPDATE tool_deployments SET is_active = FALSE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_dashboard(
        &self,
        name: &str,
        quicksight_id: &str,
        created_by: Option<&str>,
    ) -> Result<Dashboard, CoreError> {
        let dashboard = sqlx::query_as::<_, Dashboard>(
            r#"
            INSERT INTO dashboards (name, quicksight_id, created_by)
            VALUES ($1, $2, $3)
            RETURNING id, name, quicksight_id, created_by, created_at
            "#,
        )
        .bind(name)
        .bind(quicksight_id)
        .bind(created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => CoreError::Conflict {
                message: format!("dashboard '{}' already registered", quicksight_id),
            },
            _ => e.into(),
        })?;
        Ok(dashboard)
    }

    async fn get_dashboard_by_quicksight_id(
        &self,
        quicksight_id: &str,
    ) -> Result<Option<Dashboard>, CoreError> {
        let dashboard = sqlx::query_as::<_, Dashboard>(
            "SELECT id, name, quicksight_id, created_by, created_at FROM dashboards \
             WHERE quicksight_id = $1",
        )
        .bind(quicksight_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(dashboard)
    }

    async fn delete_dashboard(&self, id: i64) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM dashboards WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_dashboard_viewer(&self, dashboard_id: i64, email: &str) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO dashboard_viewers (dashboard_id, email) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(dashboard_id)
        .bind(email)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dashboard_viewers(&self, dashboard_id: i64) -> Result<Vec<String>, CoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT email FROM dashboard_viewers WHERE dashboard_id = $1 ORDER BY email",
        )
        .bind(dashboard_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(email,)| email).collect())
    }

    async fn list_feedback(&self) -> Result<Vec<Feedback>, CoreError> {
        let rows = sqlx::query_as::<_, Feedback>(
            "SELECT id, satisfaction_rating, suggestions, created_at FROM feedback \
             ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
