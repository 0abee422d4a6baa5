// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Object storage plane operations.
//!
//! Bucket creation applies the platform baseline in one idempotent chain:
//! versioning, the cold-storage lifecycle for non-current versions, default
//! encryption, a public access block and a TLS-only bucket policy.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use tracing::{info, warn};
use url::Url;

use crate::client::{CloudConfig, CloudHttp, parse_url};
use crate::credentials::CredentialSet;
use crate::error::{CloudErrorKind, Result};
use crate::policy::bucket_tls_policy;
use crate::xml;

/// Days after which non-current object versions move to cold storage.
const NONCURRENT_TRANSITION_DAYS: u32 = 30;
const COLD_STORAGE_CLASS: &str = "GLACIER";

/// Result of a bucket creation.
#[derive(Debug, Clone)]
pub struct BucketCreated {
    /// Bucket location as reported by the object store.
    pub location: String,
}

/// Object-storage operations needed by the orchestration core.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create a bucket with the platform baseline. Creating a bucket the
    /// caller already owns re-applies the baseline and returns the
    /// existing location.
    async fn create_bucket(&self, name: &str, is_data_warehouse: bool) -> Result<BucketCreated>;

    /// Enable versioning on a bucket.
    async fn enable_versioning(&self, name: &str) -> Result<()>;

    /// Install the non-current-version cold storage lifecycle.
    async fn put_bucket_lifecycle(&self, name: &str) -> Result<()>;

    /// Merge tags into a bucket's tag set; new values win. Tagging a
    /// missing bucket is a no-op.
    async fn tag_bucket(&self, name: &str, tags: &[(String, String)]) -> Result<()>;

    /// Whether a bucket exists and is reachable.
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Names of all buckets.
    async fn list_buckets(&self) -> Result<Vec<String>>;

    /// Mark a bucket for archival; the actual move is owned by an external
    /// process watching the tag.
    async fn mark_for_archival(&self, name: &str) -> Result<()> {
        self.tag_bucket(name, &[("to-archive".to_string(), "true".to_string())])
            .await
    }
}

/// HTTP client for the object storage API.
pub struct S3Client {
    http: CloudHttp,
    endpoint: String,
    region: String,
}

impl S3Client {
    /// Build a client from config and a shared credential set.
    pub fn new(config: &CloudConfig, credentials: Arc<CredentialSet>) -> Self {
        Self {
            http: CloudHttp::new(credentials, config.session_key()),
            endpoint: config.s3_endpoint.clone().unwrap_or_else(|| {
                format!("https://s3.{}.amazonaws.com", config.bucket_region)
            }),
            region: config.bucket_region.clone(),
        }
    }

    fn url(&self, bucket: &str, subresource: Option<&str>) -> Result<Url> {
        let mut raw = format!("{}/{}", self.endpoint.trim_end_matches('/'), bucket);
        if let Some(subresource) = subresource {
            raw.push('?');
            raw.push_str(subresource);
        }
        parse_url(&raw)
    }

    async fn put(&self, bucket: &str, subresource: Option<&str>, body: String) -> Result<()> {
        self.http
            .send(
                "s3",
                &self.region,
                Method::PUT,
                self.url(bucket, subresource)?,
                &[],
                body.into_bytes(),
            )
            .await?;
        Ok(())
    }

    async fn put_bucket_encryption(&self, name: &str) -> Result<()> {
        let body = r#"<ServerSideEncryptionConfiguration xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Rule>
    <ApplyServerSideEncryptionByDefault><SSEAlgorithm>AES256</SSEAlgorithm></ApplyServerSideEncryptionByDefault>
  </Rule>
</ServerSideEncryptionConfiguration>"#;
        self.put(name, Some("encryption"), body.to_string()).await
    }

    async fn put_public_access_block(&self, name: &str) -> Result<()> {
        let body = r#"<PublicAccessBlockConfiguration xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <BlockPublicAcls>TRUE</BlockPublicAcls>
  <IgnorePublicAcls>TRUE</IgnorePublicAcls>
  <BlockPublicPolicy>TRUE</BlockPublicPolicy>
  <RestrictPublicBuckets>TRUE</RestrictPublicBuckets>
</PublicAccessBlockConfiguration>"#;
        self.put(name, Some("publicAccessBlock"), body.to_string())
            .await
    }

    async fn put_bucket_policy(&self, name: &str) -> Result<()> {
        let policy = bucket_tls_policy(name).to_string();
        self.put(name, Some("policy"), policy).await
    }

    async fn get_bucket_tags(&self, name: &str) -> Result<Vec<(String, String)>> {
        let response = self
            .http
            .send(
                "s3",
                &self.region,
                Method::GET,
                self.url(name, Some("tagging"))?,
                &[],
                Vec::new(),
            )
            .await;
        let body = match response {
            Ok(response) => response.body,
            Err(e) if e.kind == CloudErrorKind::NoSuchEntity => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let doc = xml::parse(&body)?;
        let keys = xml::texts_of(&doc, "Key");
        let values = xml::texts_of(&doc, "Value");
        Ok(keys.into_iter().zip(values).collect())
    }
}

fn lifecycle_body(bucket: &str) -> String {
    format!(
        r#"<LifecycleConfiguration xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Rule>
    <ID>{}_lifecycle_configuration</ID>
    <Filter><Prefix></Prefix></Filter>
    <Status>Enabled</Status>
    <NoncurrentVersionTransition>
      <NoncurrentDays>{}</NoncurrentDays>
      <StorageClass>{}</StorageClass>
    </NoncurrentVersionTransition>
  </Rule>
</LifecycleConfiguration>"#,
        bucket, NONCURRENT_TRANSITION_DAYS, COLD_STORAGE_CLASS
    )
}

fn tagging_body(tags: &[(String, String)]) -> String {
    let tag_set: String = tags
        .iter()
        .map(|(k, v)| format!("<Tag><Key>{}</Key><Value>{}</Value></Tag>", k, v))
        .collect();
    format!(
        r#"<Tagging xmlns="http://s3.amazonaws.com/doc/2006-03-01/"><TagSet>{}</TagSet></Tagging>"#,
        tag_set
    )
}

fn create_bucket_body(region: &str) -> String {
    if region == "us-east-1" {
        String::new()
    } else {
        format!(
            r#"<CreateBucketConfiguration xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <LocationConstraint>{}</LocationConstraint>
</CreateBucketConfiguration>"#,
            region
        )
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn create_bucket(&self, name: &str, is_data_warehouse: bool) -> Result<BucketCreated> {
        let body = create_bucket_body(&self.region);
        let result = self
            .http
            .send(
                "s3",
                &self.region,
                Method::PUT,
                self.url(name, None)?,
                &[],
                body.into_bytes(),
            )
            .await;
        match result {
            Ok(_) => info!(bucket = %name, "Bucket created"),
            Err(e) if e.kind == CloudErrorKind::AlreadyExists => {
                warn!(bucket = %name, "Skipping creating bucket: already exists");
            }
            Err(e) => return Err(e),
        }

        // Baseline; each step is an idempotent PUT so a redelivered task
        // converges.
        self.enable_versioning(name).await?;
        self.put_bucket_lifecycle(name).await?;
        self.put_bucket_encryption(name).await?;
        self.put_public_access_block(name).await?;
        self.put_bucket_policy(name).await?;
        if is_data_warehouse {
            self.tag_bucket(
                name,
                &[("buckettype".to_string(), "datawarehouse".to_string())],
            )
            .await?;
        }

        Ok(BucketCreated {
            location: format!("/{}", name),
        })
    }

    async fn enable_versioning(&self, name: &str) -> Result<()> {
        let body = r#"<VersioningConfiguration xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Status>Enabled</Status>
</VersioningConfiguration>"#;
        self.put(name, Some("versioning"), body.to_string()).await
    }

    async fn put_bucket_lifecycle(&self, name: &str) -> Result<()> {
        self.put(name, Some("lifecycle"), lifecycle_body(name)).await
    }

    async fn tag_bucket(&self, name: &str, tags: &[(String, String)]) -> Result<()> {
        let existing = match self.get_bucket_tags(name).await {
            Ok(existing) => existing,
            Err(e) if e.kind == CloudErrorKind::NoSuchEntity => {
                warn!(bucket = %name, "Bucket doesn't exist, skipping tagging");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        // merge, new values win
        let mut merged = existing;
        for (key, value) in tags {
            if let Some(entry) = merged.iter_mut().find(|(k, _)| k == key) {
                entry.1 = value.clone();
            } else {
                merged.push((key.clone(), value.clone()));
            }
        }

        self.put(name, Some("tagging"), tagging_body(&merged)).await
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let result = self
            .http
            .send(
                "s3",
                &self.region,
                Method::HEAD,
                self.url(name, None)?,
                &[],
                Vec::new(),
            )
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(e) if !e.retryable() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        let url = parse_url(&format!("{}/", self.endpoint.trim_end_matches('/')))?;
        let response = self
            .http
            .send("s3", &self.region, Method::GET, url, &[], Vec::new())
            .await?;
        let doc = xml::parse(&response.body)?;
        Ok(xml::texts_of(&doc, "Name"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_body_names_rule_after_bucket() {
        let body = lifecycle_body("test-bucket-1");
        assert!(body.contains("<ID>test-bucket-1_lifecycle_configuration</ID>"));
        assert!(body.contains("<NoncurrentDays>30</NoncurrentDays>"));
        assert!(body.contains("<StorageClass>GLACIER</StorageClass>"));
    }

    #[test]
    fn test_tagging_body() {
        let body = tagging_body(&[("buckettype".to_string(), "datawarehouse".to_string())]);
        assert!(body.contains("<Key>buckettype</Key>"));
        assert!(body.contains("<Value>datawarehouse</Value>"));
    }

    #[test]
    fn test_create_bucket_body_elides_default_region() {
        assert!(create_bucket_body("us-east-1").is_empty());
        assert!(create_bucket_body("eu-west-1").contains("eu-west-1"));
    }
}
