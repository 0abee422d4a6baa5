// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared signed-HTTP plumbing for the cloud plane clients.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;
use url::Url;

use crate::credentials::{CredentialSet, SessionKey};
use crate::error::{CloudError, CloudErrorKind, Result};
use crate::{sign, xml};

/// Default per-call timeout on the cloud plane.
const CLOUD_TIMEOUT_SECS: u64 = 10;

/// Cloud plane configuration.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// Default region for IAM/STS calls.
    pub region: String,
    /// Region buckets are created in.
    pub bucket_region: String,
    /// Account id used when composing IAM ARNs.
    pub account_id: String,
    /// Role assumed for provisioning work, when set.
    pub assume_role_arn: Option<String>,
    /// S3 endpoint override (tests / local stacks).
    pub s3_endpoint: Option<String>,
    /// IAM endpoint override (tests / local stacks).
    pub iam_endpoint: Option<String>,
}

impl CloudConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `DECKHAND_AWS_REGION` (default: eu-west-1)
    /// - `DECKHAND_BUCKET_REGION` (default: the region)
    /// - `DECKHAND_AWS_ACCOUNT_ID`
    /// - `DECKHAND_ASSUME_ROLE_ARN`
    pub fn from_env() -> Self {
        let region =
            std::env::var("DECKHAND_AWS_REGION").unwrap_or_else(|_| "eu-west-1".to_string());
        Self {
            bucket_region: std::env::var("DECKHAND_BUCKET_REGION")
                .unwrap_or_else(|_| region.clone()),
            region,
            account_id: std::env::var("DECKHAND_AWS_ACCOUNT_ID").unwrap_or_default(),
            assume_role_arn: std::env::var("DECKHAND_ASSUME_ROLE_ARN").ok(),
            s3_endpoint: std::env::var("DECKHAND_S3_ENDPOINT").ok(),
            iam_endpoint: std::env::var("DECKHAND_IAM_ENDPOINT").ok(),
        }
    }

    /// Session key for this configuration.
    pub fn session_key(&self) -> SessionKey {
        SessionKey {
            profile: None,
            assume_role_arn: self.assume_role_arn.clone(),
            region: self.region.clone(),
        }
    }
}

/// A successful cloud response.
pub(crate) struct CloudResponse {
    pub status: u16,
    pub body: String,
}

/// Signed HTTP transport shared by the S3 and IAM clients.
pub(crate) struct CloudHttp {
    http: reqwest::Client,
    credentials: Arc<CredentialSet>,
    session_key: SessionKey,
}

impl CloudHttp {
    pub fn new(credentials: Arc<CredentialSet>, session_key: SessionKey) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(CLOUD_TIMEOUT_SECS))
            .build()
            .expect("reqwest client");
        Self {
            http,
            credentials,
            session_key,
        }
    }

    /// Sign and send a request; any >= 400 response is mapped to a
    /// classified [`CloudError`] from the XML error envelope.
    pub async fn send(
        &self,
        service: &str,
        region: &str,
        method: reqwest::Method,
        url: Url,
        extra_headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<CloudResponse> {
        let credentials = self.credentials.credentials(&self.session_key).await?;
        let headers = sign::sign_request(
            &credentials,
            region,
            service,
            method.as_str(),
            &url,
            extra_headers,
            &body,
            Utc::now(),
        );

        debug!(method = %method, url = %url, service = %service, "Cloud request");

        // `headers` already contains the extra headers, lowercased, since
        // they are part of the signature.
        let mut request = self.http.request(method, url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        if status >= 400 {
            let (code, message) = xml::parse_error(&body);
            return Err(CloudError::from_remote(status, &code, &message));
        }
        Ok(CloudResponse { status, body })
    }
}

/// Percent-encode a form value.
pub(crate) fn form_value(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Build an IAM/STS style form body from (key, value) pairs.
pub(crate) fn form_body(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, form_value(v)))
        .collect::<Vec<_>>()
        .join("&")
}

pub(crate) fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| CloudError::new(CloudErrorKind::Validation, e.to_string()))
}
