// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Policy document manager.
//!
//! Scoped load-mutate-store over a principal's access policy. Edits are
//! serialised per carrier within the process; cross-process safety rides on
//! the carrier's server-side version semantics, with a bounded reload-and-
//! reapply retry when the server rejects a write.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use deckhand_core::model::PolicyCarrier;

use crate::error::{CloudError, CloudErrorKind, Result};
use crate::iam::Iam;
use crate::policy::AccessPolicy;

/// Name of the inline policy carrying a role's bucket access.
pub const INLINE_POLICY_NAME: &str = "s3-access";

/// Attempts at a write before surfacing a conflict.
const WRITE_ATTEMPTS: u32 = 3;

/// Serialised editor over policy carriers.
pub struct PolicyManager {
    iam: Arc<dyn Iam>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PolicyManager {
    /// Create a manager over the given IAM plane.
    pub fn new(iam: Arc<dyn Iam>) -> Self {
        Self {
            iam,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, carrier: &PolicyCarrier) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(carrier.lock_key())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn load(&self, carrier: &PolicyCarrier) -> Result<AccessPolicy> {
        let document = match carrier {
            PolicyCarrier::InlineRole { role_name } => {
                self.iam
                    .get_inline_policy(role_name, INLINE_POLICY_NAME)
                    .await?
            }
            PolicyCarrier::ManagedPolicy { arn } => {
                self.iam.get_default_policy_document(arn).await?
            }
        };
        Ok(match document {
            Some(document) => AccessPolicy::from_document(document),
            None => AccessPolicy::new(),
        })
    }

    async fn save(&self, carrier: &PolicyCarrier, document: &Value) -> Result<()> {
        match carrier {
            PolicyCarrier::InlineRole { role_name } => {
                self.iam
                    .put_inline_policy(role_name, INLINE_POLICY_NAME, document)
                    .await
            }
            PolicyCarrier::ManagedPolicy { arn } => {
                self.iam.create_policy_version(arn, document, true).await?;
                self.iam.prune_policy_versions(arn).await
            }
        }
    }

    /// Load the carrier's document, apply the queued mutations and store
    /// the result. On a rejected write the document is reloaded and the
    /// mutations reapplied, up to the attempt bound. If the mutation
    /// closure fails, nothing is written.
    pub async fn edit<F>(&self, carrier: &PolicyCarrier, mutate: F) -> Result<()>
    where
        F: Fn(&mut AccessPolicy) + Send + Sync,
    {
        let lock = self.lock_for(carrier).await;
        let _guard = lock.lock().await;

        let mut last_conflict: Option<CloudError> = None;
        for attempt in 1..=WRITE_ATTEMPTS {
            let mut policy = self.load(carrier).await?;
            mutate(&mut policy);
            let document = policy.into_document();
            match self.save(carrier, &document).await {
                Ok(()) => {
                    info!(carrier = %carrier.lock_key(), attempt, "Policy document stored");
                    return Ok(());
                }
                Err(e) if e.kind == CloudErrorKind::VersionConflict => {
                    warn!(
                        carrier = %carrier.lock_key(),
                        attempt,
                        "Policy write rejected, reloading"
                    );
                    last_conflict = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_conflict
            .unwrap_or_else(|| CloudError::new(CloudErrorKind::VersionConflict, "write rejected")))
    }

    /// Revoke, for a missing principal, nothing: a revoke against a role
    /// that no longer exists is a no-op rather than an error.
    pub async fn revoke_all(&self, carrier: &PolicyCarrier, bucket_arn: &str) -> Result<()> {
        match self
            .edit(carrier, |policy| policy.revoke_access(bucket_arn))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.kind == CloudErrorKind::NoSuchEntity => {
                warn!(
                    carrier = %carrier.lock_key(),
                    "Principal doesn't exist: nothing to revoke"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
