// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime context injected into intents and task handlers.
//!
//! The only process-wide mutable state lives here: the memoised cloud
//! credential sessions (inside the plane clients) and the Helm repo lock
//! (inside the Helm runner). Everything else is shared read-only.

use std::sync::Arc;

use deckhand_cloud::iam::Iam;
use deckhand_cloud::manager::PolicyManager;
use deckhand_cloud::s3::ObjectStore;
use deckhand_cloud::trust::TrustConfig;
use deckhand_cluster::helm::Helm;
use deckhand_cluster::kube::KubeClient;
use deckhand_core::config::Config;
use deckhand_core::error::CoreError;
use deckhand_core::events::EventHub;
use deckhand_core::model::{
    App, Bucket, Grant, GrantPrincipal, ImageTagKeys, ManagedPolicy, PolicyCarrier, User,
};
use deckhand_core::persistence::Store;
use deckhand_identity::client::IdentityClient;

/// Shared state for the request and task paths.
pub struct RuntimeContext {
    /// Platform configuration.
    pub config: Config,
    /// Relational store.
    pub store: Arc<dyn Store>,
    /// Per-user event hub.
    pub events: Arc<EventHub>,
    /// Object storage plane.
    pub object_store: Arc<dyn ObjectStore>,
    /// IAM plane.
    pub iam: Arc<dyn Iam>,
    /// Policy document manager over the IAM plane.
    pub policies: Arc<PolicyManager>,
    /// Helm runner.
    pub helm: Arc<Helm>,
    /// Cluster API client, when a cluster is reachable.
    pub kube: Option<Arc<KubeClient>>,
    /// Identity plane client, when configured.
    pub identity: Option<Arc<IdentityClient>>,
    /// Trust policy inputs.
    pub trust: TrustConfig,
    /// Chart name to image-tag values key.
    pub image_tag_keys: ImageTagKeys,
}

impl RuntimeContext {
    /// The cluster client, or a permanent error when none is configured.
    pub fn kube(&self) -> Result<&KubeClient, CoreError> {
        self.kube.as_deref().ok_or_else(|| CoreError::Fatal {
            detail: "no cluster configuration available".to_string(),
        })
    }

    /// The identity client, or a permanent error when none is configured.
    pub fn identity(&self) -> Result<&IdentityClient, CoreError> {
        self.identity.as_deref().ok_or_else(|| CoreError::Fatal {
            detail: "no identity plane configured".to_string(),
        })
    }

    /// Load a user or fail NotFound.
    pub async fn require_user(&self, auth0_id: &str) -> Result<User, CoreError> {
        self.store
            .get_user(auth0_id)
            .await?
            .ok_or_else(|| CoreError::not_found("user", auth0_id))
    }

    /// Load an app or fail NotFound.
    pub async fn require_app(&self, id: i64) -> Result<App, CoreError> {
        self.store
            .get_app(id)
            .await?
            .ok_or_else(|| CoreError::not_found("app", id.to_string()))
    }

    /// Load a bucket or fail NotFound.
    pub async fn require_bucket(&self, id: i64) -> Result<Bucket, CoreError> {
        self.store
            .get_bucket(id)
            .await?
            .ok_or_else(|| CoreError::not_found("s3bucket", id.to_string()))
    }

    /// Load a managed policy or fail NotFound.
    pub async fn require_policy(&self, id: i64) -> Result<ManagedPolicy, CoreError> {
        self.store
            .get_policy(id)
            .await?
            .ok_or_else(|| CoreError::not_found("policy", id.to_string()))
    }

    /// Resolve the policy carrier a grant's principal writes to.
    pub async fn carrier_for(&self, grant: &Grant) -> Result<PolicyCarrier, CoreError> {
        match &grant.principal {
            GrantPrincipal::User { user_id, .. } => {
                let user = self.require_user(user_id).await?;
                Ok(PolicyCarrier::InlineRole {
                    role_name: user.iam_role_name(&self.config.env),
                })
            }
            GrantPrincipal::App { app_id } => {
                let app = self.require_app(*app_id).await?;
                Ok(PolicyCarrier::InlineRole {
                    role_name: app.iam_role_name(&self.config.env),
                })
            }
            GrantPrincipal::Policy { policy_id } => {
                let policy = self.require_policy(*policy_id).await?;
                Ok(PolicyCarrier::ManagedPolicy {
                    arn: policy.arn.clone(),
                })
            }
        }
    }
}
