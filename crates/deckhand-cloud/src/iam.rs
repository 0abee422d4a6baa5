// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! IAM plane operations.
//!
//! Role lifecycle, managed policies and inline policy documents. All
//! operations are idempotent in the create-or-ignore / delete-or-ignore
//! sense so a redelivered task converges instead of failing.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;
use url::Url;

use crate::client::{CloudConfig, CloudHttp, form_body, parse_url};
use crate::credentials::CredentialSet;
use crate::error::{CloudError, CloudErrorKind, Result};
use crate::xml;

/// IAM is a global service; requests are signed against this region.
const IAM_SIGNING_REGION: &str = "us-east-1";
const IAM_API_VERSION: &str = "2010-05-08";

/// A managed policy attached to a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedPolicy {
    /// Policy name.
    pub name: String,
    /// Policy ARN.
    pub arn: String,
}

/// IAM operations needed by the orchestration core.
#[async_trait]
pub trait Iam: Send + Sync {
    /// Create a role with a trust policy, attaching the given managed
    /// policies. Creating a role that already exists is a no-op.
    async fn create_role(
        &self,
        role_name: &str,
        assume_role_policy: &Value,
        attach_policy_arns: &[String],
    ) -> Result<()>;

    /// Delete a role and everything attached to it. Deleting a missing
    /// role is a no-op.
    async fn delete_role(&self, role_name: &str) -> Result<()>;

    /// Attach a managed policy to a role.
    async fn attach_policy(&self, role_name: &str, policy_arn: &str) -> Result<()>;

    /// Detach a managed policy from a role; detaching a policy that is not
    /// attached is a no-op.
    async fn detach_policy(&self, role_name: &str, policy_arn: &str) -> Result<()>;

    /// Managed policies attached to a role; a missing role yields an empty
    /// list.
    async fn list_attached_policies(&self, role_name: &str) -> Result<Vec<AttachedPolicy>>;

    /// Role names under a path prefix.
    async fn list_role_names(&self, path_prefix: &str) -> Result<Vec<String>>;

    /// Read an inline policy document from a role.
    async fn get_inline_policy(&self, role_name: &str, policy_name: &str)
    -> Result<Option<Value>>;

    /// Write an inline policy document on a role.
    async fn put_inline_policy(
        &self,
        role_name: &str,
        policy_name: &str,
        document: &Value,
    ) -> Result<()>;

    /// Delete an inline policy from a role.
    async fn delete_inline_policy(&self, role_name: &str, policy_name: &str) -> Result<()>;

    /// Create a managed policy, returning its ARN. Creating an existing
    /// policy returns the existing ARN.
    async fn create_policy(&self, name: &str, path: &str, document: &Value) -> Result<String>;

    /// Delete a managed policy: detach from all roles, drop old versions,
    /// then delete. Deleting a missing policy is a no-op.
    async fn delete_policy(&self, policy_arn: &str) -> Result<()>;

    /// The default version document of a managed policy.
    async fn get_default_policy_document(&self, policy_arn: &str) -> Result<Option<Value>>;

    /// Write a new policy version.
    async fn create_policy_version(
        &self,
        policy_arn: &str,
        document: &Value,
        set_as_default: bool,
    ) -> Result<()>;

    /// Delete every non-default version of a managed policy.
    async fn prune_policy_versions(&self, policy_arn: &str) -> Result<()>;

    /// Names of roles the policy is attached to.
    async fn attached_roles(&self, policy_arn: &str) -> Result<Vec<String>>;

    /// Reconcile the set of roles attached to a policy: attach the missing
    /// ones, detach the removed ones.
    async fn update_policy_members(
        &self,
        policy_arn: &str,
        role_names: &HashSet<String>,
    ) -> Result<()> {
        let existing: HashSet<String> = self.attached_roles(policy_arn).await?.into_iter().collect();
        for role in role_names.difference(&existing) {
            self.attach_policy(role, policy_arn).await?;
        }
        for role in existing.difference(role_names) {
            self.detach_policy(role, policy_arn).await?;
        }
        Ok(())
    }
}

/// HTTP client for the IAM query API.
pub struct IamClient {
    http: CloudHttp,
    endpoint: String,
    account_id: String,
}

impl IamClient {
    /// Build a client from config and a shared credential set.
    pub fn new(config: &CloudConfig, credentials: Arc<CredentialSet>) -> Self {
        Self {
            http: CloudHttp::new(credentials, config.session_key()),
            endpoint: config
                .iam_endpoint
                .clone()
                .unwrap_or_else(|| "https://iam.amazonaws.com/".to_string()),
            account_id: config.account_id.clone(),
        }
    }

    fn url(&self) -> Result<Url> {
        parse_url(&self.endpoint)
    }

    /// Issue an IAM action with the given parameters.
    async fn call(&self, action: &str, params: &[(&str, &str)]) -> Result<String> {
        let mut pairs = vec![("Action", action), ("Version", IAM_API_VERSION)];
        pairs.extend_from_slice(params);
        let body = form_body(&pairs);
        let extra = vec![(
            "content-type".to_string(),
            "application/x-www-form-urlencoded; charset=utf-8".to_string(),
        )];
        let response = self
            .http
            .send(
                "iam",
                IAM_SIGNING_REGION,
                reqwest::Method::POST,
                self.url()?,
                &extra,
                body.into_bytes(),
            )
            .await?;
        Ok(response.body)
    }

    fn decode_policy_document(encoded: &str) -> Result<Value> {
        let decoded = urlencoding::decode(encoded)
            .map_err(|e| CloudError::new(CloudErrorKind::Api, e.to_string()))?;
        serde_json::from_str(&decoded)
            .map_err(|e| CloudError::new(CloudErrorKind::Api, format!("bad policy JSON: {}", e)))
    }

    /// Inline policy names on a role.
    async fn list_inline_policy_names(&self, role_name: &str) -> Result<Vec<String>> {
        let body = self
            .call("ListRolePolicies", &[("RoleName", role_name)])
            .await?;
        let doc = xml::parse(&body)?;
        Ok(xml::texts_of(&doc, "member"))
    }

    /// Policy version ids, with the default flagged.
    async fn list_policy_versions(&self, policy_arn: &str) -> Result<Vec<(String, bool)>> {
        let body = self
            .call("ListPolicyVersions", &[("PolicyArn", policy_arn)])
            .await?;
        let doc = xml::parse(&body)?;
        let mut versions = Vec::new();
        for member in doc.descendants().filter(|n| n.has_tag_name("member")) {
            let id = member
                .descendants()
                .find(|n| n.has_tag_name("VersionId"))
                .and_then(|n| n.text())
                .map(str::to_string);
            let is_default = member
                .descendants()
                .find(|n| n.has_tag_name("IsDefaultVersion"))
                .and_then(|n| n.text())
                .map(|t| t.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false);
            if let Some(id) = id {
                versions.push((id, is_default));
            }
        }
        Ok(versions)
    }
}

#[async_trait]
impl Iam for IamClient {
    async fn create_role(
        &self,
        role_name: &str,
        assume_role_policy: &Value,
        attach_policy_arns: &[String],
    ) -> Result<()> {
        let document = assume_role_policy.to_string();
        let result = self
            .call(
                "CreateRole",
                &[
                    ("RoleName", role_name),
                    ("AssumeRolePolicyDocument", document.as_str()),
                ],
            )
            .await;
        match result {
            Ok(_) => {}
            Err(e) if e.kind == CloudErrorKind::AlreadyExists => {
                warn!(role_name = %role_name, "Skipping creating role: already exists");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        for policy_arn in attach_policy_arns {
            self.attach_policy(role_name, policy_arn).await?;
        }
        Ok(())
    }

    async fn delete_role(&self, role_name: &str) -> Result<()> {
        let attached = match self.list_attached_policies(role_name).await {
            Ok(attached) => attached,
            Err(e) if e.kind == CloudErrorKind::NoSuchEntity => {
                warn!(role_name = %role_name, "Skipping delete of role: does not exist");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        for policy in attached {
            self.detach_policy(role_name, &policy.arn).await?;
        }
        for policy_name in self.list_inline_policy_names(role_name).await? {
            self.delete_inline_policy(role_name, &policy_name).await?;
        }
        self.call("DeleteRole", &[("RoleName", role_name)]).await?;
        Ok(())
    }

    async fn attach_policy(&self, role_name: &str, policy_arn: &str) -> Result<()> {
        self.call(
            "AttachRolePolicy",
            &[("RoleName", role_name), ("PolicyArn", policy_arn)],
        )
        .await?;
        Ok(())
    }

    async fn detach_policy(&self, role_name: &str, policy_arn: &str) -> Result<()> {
        match self
            .call(
                "DetachRolePolicy",
                &[("RoleName", role_name), ("PolicyArn", policy_arn)],
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.kind == CloudErrorKind::NoSuchEntity => {
                warn!(policy_arn = %policy_arn, "Policy not attached, skipping detach");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn list_attached_policies(&self, role_name: &str) -> Result<Vec<AttachedPolicy>> {
        let body = self
            .call("ListAttachedRolePolicies", &[("RoleName", role_name)])
            .await?;
        let doc = xml::parse(&body)?;
        let mut policies = Vec::new();
        for member in doc.descendants().filter(|n| n.has_tag_name("member")) {
            let name = member
                .descendants()
                .find(|n| n.has_tag_name("PolicyName"))
                .and_then(|n| n.text());
            let arn = member
                .descendants()
                .find(|n| n.has_tag_name("PolicyArn"))
                .and_then(|n| n.text());
            if let (Some(name), Some(arn)) = (name, arn) {
                policies.push(AttachedPolicy {
                    name: name.trim().to_string(),
                    arn: arn.trim().to_string(),
                });
            }
        }
        Ok(policies)
    }

    async fn list_role_names(&self, path_prefix: &str) -> Result<Vec<String>> {
        let body = self
            .call("ListRoles", &[("PathPrefix", path_prefix)])
            .await?;
        let doc = xml::parse(&body)?;
        Ok(xml::texts_of(&doc, "RoleName"))
    }

    async fn get_inline_policy(
        &self,
        role_name: &str,
        policy_name: &str,
    ) -> Result<Option<Value>> {
        let result = self
            .call(
                "GetRolePolicy",
                &[("RoleName", role_name), ("PolicyName", policy_name)],
            )
            .await;
        match result {
            Ok(body) => {
                let doc = xml::parse(&body)?;
                let encoded = xml::text_of(&doc, "PolicyDocument").ok_or_else(|| {
                    CloudError::new(CloudErrorKind::Api, "missing PolicyDocument")
                })?;
                Ok(Some(Self::decode_policy_document(&encoded)?))
            }
            Err(e) if e.kind == CloudErrorKind::NoSuchEntity => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn put_inline_policy(
        &self,
        role_name: &str,
        policy_name: &str,
        document: &Value,
    ) -> Result<()> {
        let document = document.to_string();
        self.call(
            "PutRolePolicy",
            &[
                ("RoleName", role_name),
                ("PolicyName", policy_name),
                ("PolicyDocument", document.as_str()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn delete_inline_policy(&self, role_name: &str, policy_name: &str) -> Result<()> {
        match self
            .call(
                "DeleteRolePolicy",
                &[("RoleName", role_name), ("PolicyName", policy_name)],
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.kind == CloudErrorKind::NoSuchEntity => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn create_policy(&self, name: &str, path: &str, document: &Value) -> Result<String> {
        let document = document.to_string();
        let result = self
            .call(
                "CreatePolicy",
                &[
                    ("PolicyName", name),
                    ("Path", path),
                    ("PolicyDocument", document.as_str()),
                ],
            )
            .await;
        match result {
            Ok(body) => {
                let doc = xml::parse(&body)?;
                xml::text_of(&doc, "Arn")
                    .ok_or_else(|| CloudError::new(CloudErrorKind::Api, "missing policy Arn"))
            }
            Err(e) if e.kind == CloudErrorKind::AlreadyExists => {
                warn!(name = %name, path = %path, "Skipping creating policy: already exists");
                Ok(format!(
                    "arn:aws:iam::{}:policy{}{}",
                    self.account_id, path, name
                ))
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_policy(&self, policy_arn: &str) -> Result<()> {
        let roles = match self.attached_roles(policy_arn).await {
            Ok(roles) => roles,
            Err(e) if e.kind == CloudErrorKind::NoSuchEntity => {
                warn!(policy_arn = %policy_arn, "Skipping deletion of policy: does not exist");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        for role in roles {
            self.detach_policy(&role, policy_arn).await?;
        }
        self.prune_policy_versions(policy_arn).await?;
        self.call("DeletePolicy", &[("PolicyArn", policy_arn)])
            .await?;
        Ok(())
    }

    async fn get_default_policy_document(&self, policy_arn: &str) -> Result<Option<Value>> {
        let body = match self.call("GetPolicy", &[("PolicyArn", policy_arn)]).await {
            Ok(body) => body,
            Err(e) if e.kind == CloudErrorKind::NoSuchEntity => return Ok(None),
            Err(e) => return Err(e),
        };
        let doc = xml::parse(&body)?;
        let Some(version_id) = xml::text_of(&doc, "DefaultVersionId") else {
            return Ok(None);
        };
        let body = self
            .call(
                "GetPolicyVersion",
                &[("PolicyArn", policy_arn), ("VersionId", version_id.as_str())],
            )
            .await?;
        let doc = xml::parse(&body)?;
        let encoded = xml::text_of(&doc, "Document")
            .ok_or_else(|| CloudError::new(CloudErrorKind::Api, "missing version Document"))?;
        Ok(Some(Self::decode_policy_document(&encoded)?))
    }

    async fn create_policy_version(
        &self,
        policy_arn: &str,
        document: &Value,
        set_as_default: bool,
    ) -> Result<()> {
        let document = document.to_string();
        let set_as_default = if set_as_default { "true" } else { "false" };
        self.call(
            "CreatePolicyVersion",
            &[
                ("PolicyArn", policy_arn),
                ("PolicyDocument", document.as_str()),
                ("SetAsDefault", set_as_default),
            ],
        )
        .await?;
        Ok(())
    }

    async fn prune_policy_versions(&self, policy_arn: &str) -> Result<()> {
        for (version_id, is_default) in self.list_policy_versions(policy_arn).await? {
            if !is_default {
                self.call(
                    "DeletePolicyVersion",
                    &[("PolicyArn", policy_arn), ("VersionId", version_id.as_str())],
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn attached_roles(&self, policy_arn: &str) -> Result<Vec<String>> {
        let body = self
            .call(
                "ListEntitiesForPolicy",
                &[("PolicyArn", policy_arn), ("EntityFilter", "Role")],
            )
            .await?;
        let doc = xml::parse(&body)?;
        Ok(xml::texts_of(&doc, "RoleName"))
    }
}
