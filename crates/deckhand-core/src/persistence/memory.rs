// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory store for tests and local development.
//!
//! Mirrors the Postgres-backed behaviour closely enough for the task and
//! intent paths: grant upserts modify in place, unique columns conflict.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Feedback, GrantKind, NewGrant, NewTask, Store};
use crate::error::CoreError;
use crate::model::{
    App, Bucket, Dashboard, Grant, GrantPrincipal, ManagedPolicy, TaskRecord, ToolDeployment,
    ToolRelease, User,
};

#[derive(Default)]
struct Inner {
    users: HashMap<String, User>,
    apps: HashMap<i64, App>,
    buckets: HashMap<i64, Bucket>,
    user_grants: HashMap<i64, Grant>,
    app_grants: HashMap<i64, Grant>,
    policy_grants: HashMap<i64, Grant>,
    policies: HashMap<i64, ManagedPolicy>,
    policy_members: HashMap<i64, Vec<String>>,
    tasks: HashMap<Uuid, TaskRecord>,
    tools: HashMap<i64, ToolRelease>,
    tool_targets: HashMap<i64, Vec<String>>,
    deployments: HashMap<i64, ToolDeployment>,
    dashboards: HashMap<i64, Dashboard>,
    dashboard_viewers: HashMap<i64, Vec<String>>,
    feedback: Vec<Feedback>,
    next_id: i64,
}

impl Inner {
    fn next(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn grants_mut(&mut self, kind: GrantKind) -> &mut HashMap<i64, Grant> {
        match kind {
            GrantKind::User => &mut self.user_grants,
            GrantKind::App => &mut self.app_grants,
            GrantKind::Policy => &mut self.policy_grants,
        }
    }

    fn grants(&self, kind: GrantKind) -> &HashMap<i64, Grant> {
        match kind {
            GrantKind::User => &self.user_grants,
            GrantKind::App => &self.app_grants,
            GrantKind::Policy => &self.policy_grants,
        }
    }
}

/// In-memory [`Store`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a tool release, returning its id.
    pub fn add_tool(&self, tool: ToolRelease, target_users: Vec<String>) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        let id = if tool.id > 0 { tool.id } else { inner.next() };
        let mut tool = tool;
        tool.id = id;
        inner.tools.insert(id, tool);
        inner.tool_targets.insert(id, target_users);
        id
    }

    /// Seed a feedback row.
    pub fn add_feedback(&self, satisfaction_rating: i16, suggestions: &str) {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next();
        inner.feedback.push(Feedback {
            id,
            satisfaction_rating,
            suggestions: suggestions.to_string(),
            created_at: Utc::now(),
        });
    }
}

fn same_principal(a: &GrantPrincipal, b: &GrantPrincipal) -> bool {
    match (a, b) {
        (GrantPrincipal::User { user_id: a, .. }, GrantPrincipal::User { user_id: b, .. }) => {
            a == b
        }
        (GrantPrincipal::App { app_id: a }, GrantPrincipal::App { app_id: b }) => a == b,
        (GrantPrincipal::Policy { policy_id: a }, GrantPrincipal::Policy { policy_id: b }) => {
            a == b
        }
        _ => false,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_user(&self, user: &User) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.users.insert(user.auth0_id.clone(), user.clone());
        Ok(())
    }

    async fn get_user(&self, auth0_id: &str) -> Result<Option<User>, CoreError> {
        Ok(self.inner.lock().unwrap().users.get(auth0_id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, CoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>, CoreError> {
        let mut users: Vec<_> = self.inner.lock().unwrap().users.values().cloned().collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn insert_app(
        &self,
        name: &str,
        slug: &str,
        repo_url: &str,
        created_by: Option<&str>,
    ) -> Result<App, CoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.apps.values().any(|a| a.repo_url == repo_url) {
            return Err(CoreError::Conflict {
                message: format!("app with repository '{}' already exists", repo_url),
            });
        }
        let id = inner.next();
        let app = App {
            id,
            name: name.to_string(),
            slug: slug.to_string(),
            repo_url: repo_url.to_string(),
            created_by: created_by.map(str::to_string),
            created_at: Utc::now(),
        };
        inner.apps.insert(id, app.clone());
        Ok(app)
    }

    async fn get_app(&self, id: i64) -> Result<Option<App>, CoreError> {
        Ok(self.inner.lock().unwrap().apps.get(&id).cloned())
    }

    async fn get_app_by_repo_url(&self, repo_url: &str) -> Result<Option<App>, CoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .apps
            .values()
            .find(|a| a.repo_url == repo_url)
            .cloned())
    }

    async fn delete_app(&self, id: i64) -> Result<(), CoreError> {
        self.inner.lock().unwrap().apps.remove(&id);
        Ok(())
    }

    async fn insert_bucket(
        &self,
        name: &str,
        is_data_warehouse: bool,
        created_by: Option<&str>,
    ) -> Result<Bucket, CoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.buckets.values().any(|b| b.name == name) {
            return Err(CoreError::Conflict {
                message: format!("bucket '{}' already exists", name),
            });
        }
        let id = inner.next();
        let bucket = Bucket {
            id,
            name: name.to_string(),
            is_data_warehouse,
            location_url: None,
            created_by: created_by.map(str::to_string),
            is_deleted: false,
            deleted_by: None,
            deleted_at: None,
            created_at: Utc::now(),
        };
        inner.buckets.insert(id, bucket.clone());
        Ok(bucket)
    }

    async fn get_bucket(&self, id: i64) -> Result<Option<Bucket>, CoreError> {
        Ok(self.inner.lock().unwrap().buckets.get(&id).cloned())
    }

    async fn get_bucket_by_name(&self, name: &str) -> Result<Option<Bucket>, CoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .buckets
            .values()
            .find(|b| b.name == name)
            .cloned())
    }

    async fn set_bucket_location(&self, id: i64, location_url: &str) -> Result<(), CoreError> {
        if let Some(bucket) = self.inner.lock().unwrap().buckets.get_mut(&id) {
            bucket.location_url = Some(location_url.to_string());
        }
        Ok(())
    }

    async fn mark_bucket_archived(&self, id: i64, deleted_by: &str) -> Result<(), CoreError> {
        if let Some(bucket) = self.inner.lock().unwrap().buckets.get_mut(&id) {
            bucket.is_deleted = true;
            bucket.deleted_by = Some(deleted_by.to_string());
            bucket.deleted_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn upsert_grant(&self, grant: &NewGrant) -> Result<Grant, CoreError> {
        let mut inner = self.inner.lock().unwrap();
        let kind = GrantKind::of(&grant.principal);
        let existing_id = inner
            .grants(kind)
            .values()
            .find(|g| g.bucket_id == grant.bucket_id && same_principal(&g.principal, &grant.principal))
            .map(|g| g.id);
        let id = existing_id.unwrap_or_else(|| inner.next());
        let stored = Grant {
            id,
            bucket_id: grant.bucket_id,
            access_level: grant.access_level,
            paths: grant.paths.clone(),
            principal: grant.principal.clone(),
        };
        inner.grants_mut(kind).insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_grant(&self, kind: GrantKind, id: i64) -> Result<Option<Grant>, CoreError> {
        Ok(self.inner.lock().unwrap().grants(kind).get(&id).cloned())
    }

    async fn find_grant(
        &self,
        principal: &GrantPrincipal,
        bucket_id: i64,
    ) -> Result<Option<Grant>, CoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .grants(GrantKind::of(principal))
            .values()
            .find(|g| g.bucket_id == bucket_id && same_principal(&g.principal, principal))
            .cloned())
    }

    async fn delete_grant(&self, kind: GrantKind, id: i64) -> Result<(), CoreError> {
        self.inner.lock().unwrap().grants_mut(kind).remove(&id);
        Ok(())
    }

    async fn grants_for_bucket(&self, bucket_id: i64) -> Result<Vec<Grant>, CoreError> {
        let inner = self.inner.lock().unwrap();
        let mut grants = Vec::new();
        for kind in [GrantKind::User, GrantKind::App, GrantKind::Policy] {
            grants.extend(
                inner
                    .grants(kind)
                    .values()
                    .filter(|g| g.bucket_id == bucket_id)
                    .cloned(),
            );
        }
        Ok(grants)
    }

    async fn grants_for_user(&self, user_id: &str) -> Result<Vec<Grant>, CoreError> {
        let inner = self.inner.lock().unwrap();
        let mut grants: Vec<_> = inner
            .user_grants
            .values()
            .filter(|g| matches!(&g.principal, GrantPrincipal::User { user_id: u, .. } if u == user_id))
            .cloned()
            .collect();
        grants.sort_by_key(|g| g.id);
        Ok(grants)
    }

    async fn insert_policy(
        &self,
        name: &str,
        arn: &str,
        created_by: Option<&str>,
    ) -> Result<ManagedPolicy, CoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.policies.values().any(|p| p.name == name) {
            return Err(CoreError::Conflict {
                message: format!("policy '{}' already exists", name),
            });
        }
        let id = inner.next();
        let policy = ManagedPolicy {
            id,
            name: name.to_string(),
            arn: arn.to_string(),
            created_by: created_by.map(str::to_string),
            created_at: Utc::now(),
        };
        inner.policies.insert(id, policy.clone());
        Ok(policy)
    }

    async fn get_policy(&self, id: i64) -> Result<Option<ManagedPolicy>, CoreError> {
        Ok(self.inner.lock().unwrap().policies.get(&id).cloned())
    }

    async fn get_policy_by_name(&self, name: &str) -> Result<Option<ManagedPolicy>, CoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .policies
            .values()
            .find(|p| p.name == name)
            .cloned())
    }

    async fn delete_policy(&self, id: i64) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.policies.remove(&id);
        inner.policy_members.remove(&id);
        Ok(())
    }

    async fn set_policy_members(
        &self,
        policy_id: i64,
        user_ids: &[String],
    ) -> Result<(), CoreError> {
        self.inner
            .lock()
            .unwrap()
            .policy_members
            .insert(policy_id, user_ids.to_vec());
        Ok(())
    }

    async fn policy_member_ids(&self, policy_id: i64) -> Result<Vec<String>, CoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .policy_members
            .get(&policy_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_task(&self, task: &NewTask) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.tasks.insert(
            task.task_id,
            TaskRecord {
                task_id: task.task_id,
                entity_class: task.entity_class.clone(),
                entity_id: task.entity_id.clone(),
                entity_description: task.entity_description.clone(),
                user_id: task.user_id.clone(),
                task_name: task.task_name.clone(),
                task_description: task.task_description.clone(),
                queue_name: task.queue_name.clone(),
                message_body: task.message_body.clone(),
                completed: false,
                cancelled: false,
                created_at: Utc::now(),
                retried_at: None,
            },
        );
        Ok(())
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Option<TaskRecord>, CoreError> {
        Ok(self.inner.lock().unwrap().tasks.get(&task_id).cloned())
    }

    async fn mark_task_completed(&self, task_id: Uuid) -> Result<(), CoreError> {
        if let Some(task) = self.inner.lock().unwrap().tasks.get_mut(&task_id) {
            task.completed = true;
        }
        Ok(())
    }

    async fn mark_task_retried(&self, task_id: Uuid, at: DateTime<Utc>) -> Result<(), CoreError> {
        if let Some(task) = self.inner.lock().unwrap().tasks.get_mut(&task_id) {
            task.retried_at = Some(at);
        }
        Ok(())
    }

    async fn cancel_task(&self, task_id: Uuid) -> Result<(), CoreError> {
        if let Some(task) = self.inner.lock().unwrap().tasks.get_mut(&task_id) {
            if !task.completed {
                task.cancelled = true;
            }
        }
        Ok(())
    }

    async fn stale_tasks(&self, older_than: DateTime<Utc>) -> Result<Vec<TaskRecord>, CoreError> {
        let inner = self.inner.lock().unwrap();
        let mut tasks: Vec<_> = inner
            .tasks
            .values()
            .filter(|t| !t.completed && !t.cancelled && t.created_at < older_than)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn get_tool(&self, id: i64) -> Result<Option<ToolRelease>, CoreError> {
        Ok(self.inner.lock().unwrap().tools.get(&id).cloned())
    }

    async fn find_tool_for_user(
        &self,
        chart_name: &str,
        user_id: &str,
    ) -> Result<Option<ToolRelease>, CoreError> {
        let inner = self.inner.lock().unwrap();
        let mut candidates: Vec<_> = inner
            .tools
            .values()
            .filter(|t| t.chart_name == chart_name)
            .filter(|t| {
                !t.is_restricted
                    || inner
                        .tool_targets
                        .get(&t.id)
                        .is_some_and(|targets| targets.iter().any(|u| u == user_id))
            })
            .cloned()
            .collect();
        candidates.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(candidates.into_iter().next())
    }

    async fn upsert_deployment(
        &self,
        release_id: i64,
        user_id: &str,
        old_chart_name: Option<&str>,
    ) -> Result<ToolDeployment, CoreError> {
        let mut inner = self.inner.lock().unwrap();
        let existing_id = inner
            .deployments
            .values()
            .find(|d| d.release_id == release_id && d.user_id == user_id)
            .map(|d| d.id);
        let id = existing_id.unwrap_or_else(|| inner.next());
        let deployment = ToolDeployment {
            id,
            release_id,
            user_id: user_id.to_string(),
            old_chart_name: old_chart_name.map(str::to_string),
            is_active: true,
            created_at: Utc::now(),
        };
        inner.deployments.insert(id, deployment.clone());
        Ok(deployment)
    }

    async fn get_deployment(&self, id: i64) -> Result<Option<ToolDeployment>, CoreError> {
        Ok(self.inner.lock().unwrap().deployments.get(&id).cloned())
    }

    async fn active_deployments_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ToolDeployment>, CoreError> {
        let inner = self.inner.lock().unwrap();
        let mut deployments: Vec<_> = inner
            .deployments
            .values()
            .filter(|d| d.user_id == user_id && d.is_active)
            .cloned()
            .collect();
        deployments.sort_by_key(|d| d.id);
        Ok(deployments)
    }

    async fn deactivate_deployment(&self, id: i64) -> Result<(), CoreError> {
        if let Some(deployment) = self.inner.lock().unwrap().deployments.get_mut(&id) {
            deployment.is_active = false;
        }
        Ok(())
    }

    async fn insert_dashboard(
        &self,
        name: &str,
        quicksight_id: &str,
        created_by: Option<&str>,
    ) -> Result<Dashboard, CoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .dashboards
            .values()
            .any(|d| d.quicksight_id == quicksight_id)
        {
            return Err(CoreError::Conflict {
                message: format!("dashboard '{}' already registered", quicksight_id),
            });
        }
        let id = inner.next();
        let dashboard = Dashboard {
            id,
            name: name.to_string(),
            quicksight_id: quicksight_id.to_string(),
            created_by: created_by.map(str::to_string),
            created_at: Utc::now(),
        };
        inner.dashboards.insert(id, dashboard.clone());
        Ok(dashboard)
    }

    async fn get_dashboard_by_quicksight_id(
        &self,
        quicksight_id: &str,
    ) -> Result<Option<Dashboard>, CoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .dashboards
            .values()
            .find(|d| d.quicksight_id == quicksight_id)
            .cloned())
    }

    async fn delete_dashboard(&self, id: i64) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.dashboards.remove(&id);
        inner.dashboard_viewers.remove(&id);
        Ok(())
    }

    async fn add_dashboard_viewer(&self, dashboard_id: i64, email: &str) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().unwrap();
        let viewers = inner.dashboard_viewers.entry(dashboard_id).or_default();
        if !viewers.iter().any(|e| e == email) {
            viewers.push(email.to_string());
        }
        Ok(())
    }

    async fn dashboard_viewers(&self, dashboard_id: i64) -> Result<Vec<String>, CoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .dashboard_viewers
            .get(&dashboard_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_feedback(&self) -> Result<Vec<Feedback>, CoreError> {
        Ok(self.inner.lock().unwrap().feedback.clone())
    }
}
