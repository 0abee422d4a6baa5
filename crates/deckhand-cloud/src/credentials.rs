// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Refreshable cloud credentials.
//!
//! Sessions are keyed by (profile, assume-role ARN, region) and memoised
//! for the life of the process so handlers running in one worker share
//! refreshable state. Assumed-role credentials are time-bounded; they are
//! refreshed opportunistically when a caller asks for them close to expiry.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{CloudError, CloudErrorKind, Result};
use crate::sign;
use crate::xml;

/// Requested lifetime of assumed-role credentials, in seconds. Kept under
/// the role's maximum session duration.
const SESSION_TTL_SECS: i64 = 1500;

/// Refresh when the session is within this window of its expiry.
const REFRESH_MARGIN_SECS: i64 = 60;

/// A set of cloud credentials, possibly time-bounded.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Access key id.
    pub access_key: String,
    /// Secret access key.
    pub secret_key: String,
    /// Session token for temporary credentials.
    pub session_token: Option<String>,
    /// Expiry of temporary credentials.
    pub expiry: Option<DateTime<Utc>>,
}

impl Credentials {
    /// Load base credentials from the process environment.
    pub fn from_env() -> Result<Self> {
        let access_key = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
            CloudError::new(CloudErrorKind::Validation, "AWS_ACCESS_KEY_ID is not set")
        })?;
        let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            CloudError::new(CloudErrorKind::Validation, "AWS_SECRET_ACCESS_KEY is not set")
        })?;
        Ok(Self {
            access_key,
            secret_key,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
            expiry: None,
        })
    }

    /// Whether the credentials are expired or within the refresh margin.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => now + Duration::seconds(REFRESH_MARGIN_SECS) >= expiry,
            None => false,
        }
    }
}

/// Key identifying a memoised session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SessionKey {
    /// Named credential profile, if any.
    pub profile: Option<String>,
    /// Role to assume, if any.
    pub assume_role_arn: Option<String>,
    /// Region the session operates in.
    pub region: String,
}

impl SessionKey {
    fn cache_key(&self) -> String {
        format!(
            "{}_{}_{}",
            self.profile.as_deref().unwrap_or("None"),
            self.assume_role_arn.as_deref().unwrap_or("None"),
            self.region,
        )
    }
}

/// Process-wide memoised credential sessions.
pub struct CredentialSet {
    sessions: Mutex<HashMap<String, Credentials>>,
    http: reqwest::Client,
    /// STS endpoint override, used by tests.
    sts_endpoint: Option<String>,
}

impl Default for CredentialSet {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialSet {
    /// Create an empty session set.
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            http: reqwest::Client::new(),
            sts_endpoint: None,
        }
    }

    /// Create a session set that exchanges credentials against the given
    /// STS endpoint instead of the regional default.
    pub fn with_sts_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            http: reqwest::Client::new(),
            sts_endpoint: Some(endpoint.into()),
        }
    }

    /// Get (possibly refreshed) credentials for a session.
    pub async fn credentials(&self, key: &SessionKey) -> Result<Credentials> {
        let Some(role_arn) = key.assume_role_arn.clone() else {
            // Default mode: credentials straight from the environment.
            return Credentials::from_env();
        };

        let mut sessions = self.sessions.lock().await;
        let now = Utc::now();
        if let Some(existing) = sessions.get(&key.cache_key()) {
            if !existing.is_stale(now) {
                return Ok(existing.clone());
            }
            info!(role_arn = %role_arn, "Refreshing assumed-role credentials");
        }

        let refreshed = self.assume_role(&key.region, &role_arn).await?;
        sessions.insert(key.cache_key(), refreshed.clone());
        Ok(refreshed)
    }

    async fn assume_role(&self, region: &str, role_arn: &str) -> Result<Credentials> {
        let base = Credentials::from_env()?;
        let session_name = format!("{}_session", Uuid::new_v4().simple());

        let endpoint = match &self.sts_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://sts.{}.amazonaws.com/", region),
        };
        let url = Url::parse(&endpoint)
            .map_err(|e| CloudError::new(CloudErrorKind::Validation, e.to_string()))?;

        let body = format!(
            "Action=AssumeRole&Version=2011-06-15&RoleArn={}&RoleSessionName={}&DurationSeconds={}",
            urlencoding::encode(role_arn),
            urlencoding::encode(&session_name),
            SESSION_TTL_SECS,
        );

        let extra = vec![(
            "content-type".to_string(),
            "application/x-www-form-urlencoded; charset=utf-8".to_string(),
        )];
        let headers = sign::sign_request(
            &base,
            region,
            "sts",
            "POST",
            &url,
            &extra,
            body.as_bytes(),
            Utc::now(),
        );

        let mut request = self.http.post(url).body(body);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        if status >= 400 {
            let (code, message) = xml::parse_error(&text);
            warn!(role_arn = %role_arn, code = %code, "Assume role failed");
            return Err(CloudError::from_remote(status, &code, &message));
        }

        let doc = xml::parse(&text)?;
        let access_key = xml::text_of(&doc, "AccessKeyId")
            .ok_or_else(|| CloudError::new(CloudErrorKind::Api, "missing AccessKeyId"))?;
        let secret_key = xml::text_of(&doc, "SecretAccessKey")
            .ok_or_else(|| CloudError::new(CloudErrorKind::Api, "missing SecretAccessKey"))?;
        let token = xml::text_of(&doc, "SessionToken")
            .ok_or_else(|| CloudError::new(CloudErrorKind::Api, "missing SessionToken"))?;
        let expiry = xml::text_of(&doc, "Expiration")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(Credentials {
            access_key,
            secret_key,
            session_token: Some(token),
            expiry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staleness_window() {
        let now = Utc::now();
        let fresh = Credentials {
            access_key: "AKID".into(),
            secret_key: "secret".into(),
            session_token: Some("token".into()),
            expiry: Some(now + Duration::seconds(600)),
        };
        assert!(!fresh.is_stale(now));

        let expiring = Credentials {
            expiry: Some(now + Duration::seconds(30)),
            ..fresh.clone()
        };
        assert!(expiring.is_stale(now));

        let permanent = Credentials {
            expiry: None,
            ..fresh
        };
        assert!(!permanent.is_stale(now));
    }

    #[test]
    fn test_session_keys_distinguish_roles_and_regions() {
        let a = SessionKey {
            profile: None,
            assume_role_arn: Some("arn:aws:iam::123456789012:role/data".into()),
            region: "eu-west-1".into(),
        };
        let b = SessionKey {
            region: "eu-west-2".into(),
            ..a.clone()
        };
        let c = SessionKey {
            assume_role_arn: None,
            ..a.clone()
        };
        assert_ne!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), c.cache_key());
    }
}
