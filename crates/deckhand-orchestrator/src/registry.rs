// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task handler registry.
//!
//! Handlers are looked up by task name. The registry is built once at
//! startup and frozen; there is no runtime registration.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use deckhand_core::error::CoreError;
use deckhand_core::model::TaskRecord;

use crate::context::RuntimeContext;
use crate::handlers;

/// Outcome of running a task body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Side-effects are durable; the task may be marked complete.
    Done,
    /// Transient failure; the frame goes back on the queue.
    Retry(String),
    /// Permanent failure; log and leave the task incomplete.
    Fail {
        /// Stable error code.
        kind: &'static str,
        /// Failure detail.
        detail: String,
    },
}

impl Outcome {
    /// Classify a handler result: retryable externals and missing rows
    /// (racing with the submitting transaction) retry, everything else
    /// fails permanently.
    pub fn from_result(result: Result<(), CoreError>) -> Self {
        match result {
            Ok(()) => Outcome::Done,
            Err(e) if e.is_retryable() => Outcome::Retry(e.to_string()),
            Err(e @ CoreError::NotFound { .. }) => Outcome::Retry(e.to_string()),
            Err(e) => Outcome::Fail {
                kind: e.error_code(),
                detail: e.to_string(),
            },
        }
    }
}

/// A registered task body.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The task name this handler serves.
    fn name(&self) -> &'static str;

    /// Run the task body. Implementations are idempotent: a redelivered
    /// message converges rather than duplicating side-effects. Long
    /// handlers check `task.cancelled` at checkpoints and exit cleanly.
    async fn handle(
        &self,
        ctx: &RuntimeContext,
        task: Option<&TaskRecord>,
        args: &[Value],
    ) -> Result<(), CoreError>;
}

/// Frozen name -> handler map.
pub struct Registry {
    handlers: HashMap<&'static str, Arc<dyn TaskHandler>>,
}

impl Registry {
    /// Build a registry from handlers; duplicate names are a programming
    /// error surfaced at startup.
    pub fn new(handlers: Vec<Arc<dyn TaskHandler>>) -> Result<Self, CoreError> {
        let mut map: HashMap<&'static str, Arc<dyn TaskHandler>> = HashMap::new();
        for handler in handlers {
            if map.insert(handler.name(), handler.clone()).is_some() {
                return Err(CoreError::Fatal {
                    detail: format!("duplicate task handler '{}'", handler.name()),
                });
            }
        }
        Ok(Self { handlers: map })
    }

    /// The standard handler set.
    pub fn standard() -> Self {
        Self::new(vec![
            Arc::new(handlers::s3::CreateS3Bucket),
            Arc::new(handlers::s3::ArchiveS3Bucket),
            Arc::new(handlers::s3::GrantUserAccess),
            Arc::new(handlers::s3::GrantAppAccess),
            Arc::new(handlers::s3::RevokeUserAccess),
            Arc::new(handlers::s3::RevokeAppAccess),
            Arc::new(handlers::s3::RevokeAllAccess),
            Arc::new(handlers::app::CreateAppRole),
            Arc::new(handlers::app::CreateAppAuthSettings),
            Arc::new(handlers::policy::UpdatePolicyForAllUsers),
            Arc::new(handlers::tool::DeployTool),
            Arc::new(handlers::tool::RestartTool),
            Arc::new(handlers::tool::UninstallTool),
            Arc::new(handlers::user::ResetUserHome),
        ])
        .expect("standard handler names are unique")
    }

    /// Look up a handler by task name.
    pub fn get(&self, task_name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_name).cloned()
    }

    /// Registered task names, for diagnostics.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckhand_core::error::Plane;

    #[test]
    fn test_standard_registry_covers_taxonomy() {
        let registry = Registry::standard();
        for name in [
            "create_s3bucket",
            "archive_s3bucket",
            "grant_user_s3bucket_access",
            "grant_app_s3bucket_access",
            "revoke_user_s3bucket_access",
            "revoke_app_s3bucket_access",
            "revoke_all_access_s3bucket",
            "create_app_aws_role",
            "create_app_auth_settings",
            "update_policy_for_all_users",
            "deploy_tool",
            "restart_tool",
            "uninstall_tool",
            "reset_user_home",
        ] {
            assert!(registry.get(name).is_some(), "missing handler '{}'", name);
        }
        assert!(registry.get("unknown_task").is_none());
    }

    #[test]
    fn test_outcome_classification() {
        assert_eq!(Outcome::from_result(Ok(())), Outcome::Done);

        let retry = Outcome::from_result(Err(CoreError::ExternalRetryable {
            plane: Plane::Cloud,
            detail: "throttled".into(),
        }));
        assert!(matches!(retry, Outcome::Retry(_)));

        // a missing row may be a race with the submitting transaction
        let missing = Outcome::from_result(Err(CoreError::not_found("s3bucket", "7")));
        assert!(matches!(missing, Outcome::Retry(_)));

        let fail = Outcome::from_result(Err(CoreError::validation("name", "bad")));
        assert!(matches!(fail, Outcome::Fail { kind: "VALIDATION", .. }));
    }
}
