// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Identity provider client.
//!
//! Manages the customer groups that gate access to deployed web apps:
//! group membership, member addition by email, and the teardown of all
//! client/connection artefacts when an app is removed. Email validation is
//! the caller's responsibility.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{IdentityError, IdentityErrorKind, Result};

/// Page size used when iterating group members.
pub const PER_PAGE: u32 = 25;

const IDENTITY_TIMEOUT_SECS: u64 = 10;

/// Identity plane configuration.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Provider API base URL.
    pub base_url: String,
    /// Token audience.
    pub audience: String,
    /// Client id for the client-credentials grant.
    pub client_id: String,
    /// Client secret for the client-credentials grant.
    pub client_secret: String,
}

impl IdentityConfig {
    /// Load configuration from environment variables
    /// (`DECKHAND_IDENTITY_*`).
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("DECKHAND_IDENTITY_BASE_URL").unwrap_or_default(),
            audience: std::env::var("DECKHAND_IDENTITY_AUDIENCE").unwrap_or_default(),
            client_id: std::env::var("DECKHAND_IDENTITY_CLIENT_ID").unwrap_or_default(),
            client_secret: std::env::var("DECKHAND_IDENTITY_CLIENT_SECRET").unwrap_or_default(),
        }
    }
}

/// A group member.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupMember {
    /// Provider user id.
    pub user_id: String,
    /// Email address, when recorded.
    #[serde(default)]
    pub email: Option<String>,
    /// Display name, when recorded.
    #[serde(default)]
    pub name: Option<String>,
}

/// One page of group members.
#[derive(Debug, Clone, Deserialize)]
pub struct MemberPage {
    /// Total members in the group.
    pub total: u64,
    /// Members on this page.
    #[serde(default)]
    pub users: Vec<GroupMember>,
}

#[derive(Debug, Deserialize)]
struct Group {
    #[serde(rename = "_id")]
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct Client {
    client_id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct Connection {
    id: String,
    #[serde(default)]
    enabled_clients: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Client for the identity provider's management APIs.
pub struct IdentityClient {
    config: IdentityConfig,
    http: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl IdentityClient {
    /// Build a client from configuration.
    pub fn new(config: IdentityConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(IDENTITY_TIMEOUT_SECS))
            .build()
            .expect("reqwest client");
        Self {
            config,
            http,
            token: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref() {
            if token.expires_at > now + chrono::Duration::seconds(30) {
                return Ok(token.token.clone());
            }
        }

        let response = self
            .http
            .post(self.url("/oauth/token"))
            .json(&json!({
                "grant_type": "client_credentials",
                "client_id": self.config.client_id,
                "client_secret": self.config.client_secret,
                "audience": self.config.audience,
            }))
            .send()
            .await?;
        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(IdentityError::from_status(status, body));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| IdentityError::new(IdentityErrorKind::Api, e.to_string()))?;
        let fresh = CachedToken {
            token: token.access_token.clone(),
            expires_at: now + chrono::Duration::seconds(token.expires_in),
        };
        *cached = Some(fresh);
        Ok(token.access_token)
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let token = self.access_token().await?;
        let mut request = self
            .http
            .request(method, self.url(path))
            .bearer_auth(token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        if status >= 400 {
            return Err(IdentityError::from_status(status, text));
        }
        if text.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| IdentityError::new(IdentityErrorKind::Api, e.to_string()))
    }

    async fn find_group(&self, group_name: &str) -> Result<Option<Group>> {
        let body = self.request(reqwest::Method::GET, "/groups", None).await?;
        let groups: Vec<Group> = serde_json::from_value(
            body.get("groups").cloned().unwrap_or(body),
        )
        .map_err(|e| IdentityError::new(IdentityErrorKind::Api, e.to_string()))?;
        Ok(groups.into_iter().find(|g| g.name == group_name))
    }

    /// The provider id of a group.
    pub async fn get_group_id(&self, group_name: &str) -> Result<String> {
        match self.find_group(group_name).await? {
            Some(group) => Ok(group.id),
            None => Err(IdentityError::new(
                IdentityErrorKind::NotFound,
                format!("group '{}' not found", group_name),
            )),
        }
    }

    /// One page of a group's members.
    pub async fn list_group_members(
        &self,
        group_name: &str,
        page: u32,
        per_page: u32,
    ) -> Result<MemberPage> {
        let group_id = self.get_group_id(group_name).await?;
        let body = self
            .request(
                reqwest::Method::GET,
                &format!(
                    "/groups/{}/members?page={}&per_page={}&include_totals=true",
                    group_id, page, per_page
                ),
                None,
            )
            .await?;
        if body.get("total").is_none() {
            return Err(IdentityError::new(
                IdentityErrorKind::Api,
                "members listing missing 'total' property",
            ));
        }
        serde_json::from_value(body)
            .map_err(|e| IdentityError::new(IdentityErrorKind::Api, e.to_string()))
    }

    /// All members of a group, following pagination until the reported
    /// total is reached.
    pub async fn list_all_group_members(&self, group_name: &str) -> Result<Vec<GroupMember>> {
        let mut members = Vec::new();
        let mut page = 0;
        let mut total: Option<u64> = None;
        loop {
            let batch = self.list_group_members(group_name, page, PER_PAGE).await?;
            match total {
                None => total = Some(batch.total),
                Some(expected) if expected != batch.total => {
                    // membership changed underneath the iteration; restart
                    warn!(group = %group_name, "Group total changed mid-listing, restarting");
                    members.clear();
                    page = 0;
                    total = None;
                    continue;
                }
                _ => {}
            }
            let got = batch.users.len();
            members.extend(batch.users);
            if members.len() as u64 >= total.unwrap_or(0) || got == 0 {
                return Ok(members);
            }
            page += 1;
        }
    }

    /// Add members to a group by email. Emails are assumed well-formed;
    /// users missing from the provider are created against the given
    /// connection.
    pub async fn add_group_members_by_email(
        &self,
        group_name: &str,
        emails: &[String],
        connection: &str,
    ) -> Result<()> {
        let group_id = self.get_group_id(group_name).await?;
        let mut user_ids = Vec::new();
        for email in emails {
            let user = self
                .request(
                    reqwest::Method::POST,
                    "/users",
                    Some(json!({
                        "email": email,
                        "email_verified": true,
                        "connection": connection,
                    })),
                )
                .await;
            match user {
                Ok(value) => {
                    if let Some(user_id) = value.get("user_id").and_then(|v| v.as_str()) {
                        user_ids.push(user_id.to_string());
                    }
                }
                Err(e) if e.kind == IdentityErrorKind::Conflict => {
                    // already registered; look the user up by email
                    let found = self
                        .request(
                            reqwest::Method::GET,
                            &format!("/users-by-email?email={}", email),
                            None,
                        )
                        .await?;
                    if let Some(user_id) = found
                        .as_array()
                        .and_then(|users| users.first())
                        .and_then(|u| u.get("user_id"))
                        .and_then(|v| v.as_str())
                    {
                        user_ids.push(user_id.to_string());
                    }
                }
                Err(e) => return Err(e),
            }
        }

        if user_ids.is_empty() {
            return Ok(());
        }
        self.request(
            reqwest::Method::PATCH,
            &format!("/groups/{}/members", group_id),
            Some(json!(user_ids)),
        )
        .await?;
        info!(group = %group_name, count = user_ids.len(), "Added group members");
        Ok(())
    }

    /// Remove members from a group by provider user id.
    pub async fn delete_group_members(
        &self,
        group_name: &str,
        user_ids: &[String],
    ) -> Result<()> {
        let group_id = self.get_group_id(group_name).await?;
        self.request(
            reqwest::Method::DELETE,
            &format!("/groups/{}/members", group_id),
            Some(json!(user_ids)),
        )
        .await?;
        Ok(())
    }

    /// Provision the client and customer group for one app deployment
    /// environment: a client with the given callbacks, a group of the same
    /// scope, and the chosen connections enabled for the client. Existing
    /// pieces are reused, so a redelivered task converges. Returns the
    /// client id.
    pub async fn setup_app(
        &self,
        client_name: &str,
        group_name: &str,
        callbacks: &[String],
        connections: &[String],
    ) -> Result<String> {
        // client
        let body = self.request(reqwest::Method::GET, "/clients", None).await?;
        let clients: Vec<Client> = serde_json::from_value(body)
            .map_err(|e| IdentityError::new(IdentityErrorKind::Api, e.to_string()))?;
        let client_id = match clients.into_iter().find(|c| c.name == client_name) {
            Some(existing) => existing.client_id,
            None => {
                let created = self
                    .request(
                        reqwest::Method::POST,
                        "/clients",
                        Some(json!({
                            "name": client_name,
                            "callbacks": callbacks,
                            "app_type": "regular_web",
                        })),
                    )
                    .await?;
                created
                    .get("client_id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        IdentityError::new(IdentityErrorKind::Api, "client created without id")
                    })?
                    .to_string()
            }
        };

        // group
        if self.find_group(group_name).await?.is_none() {
            self.request(
                reqwest::Method::POST,
                "/groups",
                Some(json!({"name": group_name, "description": group_name})),
            )
            .await?;
        }

        // connections: enable the client on each requested connection
        let body = self
            .request(reqwest::Method::GET, "/connections", None)
            .await?;
        let all: Vec<serde_json::Value> = serde_json::from_value(body)
            .map_err(|e| IdentityError::new(IdentityErrorKind::Api, e.to_string()))?;
        for connection in all {
            let name = connection.get("name").and_then(|v| v.as_str()).unwrap_or("");
            if !connections.iter().any(|c| c == name) {
                continue;
            }
            let id = connection
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let mut enabled: Vec<String> = connection
                .get("enabled_clients")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default();
            if !enabled.iter().any(|c| *c == client_id) {
                enabled.push(client_id.clone());
                self.request(
                    reqwest::Method::PATCH,
                    &format!("/connections/{}", id),
                    Some(json!({"enabled_clients": enabled})),
                )
                .await?;
            }
        }

        info!(client = %client_name, group = %group_name, "App auth settings provisioned");
        Ok(client_id)
    }

    /// Remove the group and all client/connection artefacts of an app.
    /// Missing pieces are skipped: teardown is idempotent.
    pub async fn clear_up_app(&self, app_name: &str, group_name: &str) -> Result<()> {
        // group
        match self.find_group(group_name).await? {
            Some(group) => {
                self.request(reqwest::Method::DELETE, &format!("/groups/{}", group.id), None)
                    .await?;
            }
            None => warn!(group = %group_name, "Group already gone"),
        }

        // clients carrying the app's name
        let body = self.request(reqwest::Method::GET, "/clients", None).await?;
        let clients: Vec<Client> = serde_json::from_value(body)
            .map_err(|e| IdentityError::new(IdentityErrorKind::Api, e.to_string()))?;
        for client in clients.iter().filter(|c| c.name == app_name) {
            // detach from any connection that still lists the client
            let connections = self
                .request(reqwest::Method::GET, "/connections", None)
                .await?;
            let connections: Vec<Connection> = serde_json::from_value(connections)
                .map_err(|e| IdentityError::new(IdentityErrorKind::Api, e.to_string()))?;
            for connection in connections
                .iter()
                .filter(|c| c.enabled_clients.contains(&client.client_id))
            {
                let remaining: Vec<&String> = connection
                    .enabled_clients
                    .iter()
                    .filter(|id| **id != client.client_id)
                    .collect();
                self.request(
                    reqwest::Method::PATCH,
                    &format!("/connections/{}", connection.id),
                    Some(json!({"enabled_clients": remaining})),
                )
                .await?;
            }
            self.request(
                reqwest::Method::DELETE,
                &format!("/clients/{}", client.client_id),
                None,
            )
            .await?;
            info!(app = %app_name, client_id = %client.client_id, "Removed app client");
        }
        Ok(())
    }
}
