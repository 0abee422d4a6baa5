// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

/// Queue names used to partition task work.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// IAM role and policy work.
    pub iam: String,
    /// Bucket work.
    pub s3: String,
    /// Identity-plane work.
    pub auth: String,
}

impl QueueConfig {
    /// The queue used for tasks without a dedicated queue.
    pub fn default_queue(&self) -> &str {
        &self.auth
    }
}

/// Deckhand core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Environment tag prefixing every provisioned resource name.
    pub env: String,
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Redis broker URL.
    pub broker_url: String,
    /// Task queues.
    pub queues: QueueConfig,
    /// Age after which an incomplete task surfaces as failed/retrying.
    pub task_age_cutoff_days: i64,
    /// Domain under which deployed tools are reachable.
    pub tools_domain: String,
    /// Domain under which deployed web apps are reachable.
    pub apps_domain: String,
    /// EFS volume passed to user provisioning charts.
    pub efs_volume: String,
    /// OIDC issuer domain for user role trust policies.
    pub oidc_domain: String,
    /// EKS OIDC provider for user role trust policies.
    pub oidc_eks_provider: String,
    /// Namespace the control-plane bootstrap charts install into.
    pub control_namespace: String,
    /// Maximum Helm release name length.
    pub max_release_name_len: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `DECKHAND_ENV`: environment tag (e.g. `test`, `dev`, `prod`)
    /// - `DECKHAND_DATABASE_URL`: PostgreSQL connection string
    /// - `DECKHAND_BROKER_URL`: Redis broker URL
    ///
    /// Optional (with defaults):
    /// - `DECKHAND_IAM_QUEUE` (default: control-panel-iam)
    /// - `DECKHAND_S3_QUEUE` (default: control-panel-s3)
    /// - `DECKHAND_AUTH_QUEUE` (default: control-panel-auth)
    /// - `DECKHAND_TASK_AGE_CUTOFF_DAYS` (default: 3)
    /// - `DECKHAND_TOOLS_DOMAIN`, `DECKHAND_EFS_VOLUME`,
    ///   `DECKHAND_OIDC_DOMAIN`, `DECKHAND_OIDC_EKS_PROVIDER`,
    ///   `DECKHAND_CONTROL_NAMESPACE` (default: cpanel)
    /// - `DECKHAND_MAX_RELEASE_NAME_LEN` (default: 53)
    pub fn from_env() -> Result<Self, ConfigError> {
        let env =
            std::env::var("DECKHAND_ENV").map_err(|_| ConfigError::Missing("DECKHAND_ENV"))?;
        let database_url = std::env::var("DECKHAND_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("DECKHAND_DATABASE_URL"))?;
        let broker_url = std::env::var("DECKHAND_BROKER_URL")
            .map_err(|_| ConfigError::Missing("DECKHAND_BROKER_URL"))?;

        let task_age_cutoff_days: i64 = std::env::var("DECKHAND_TASK_AGE_CUTOFF_DAYS")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("DECKHAND_TASK_AGE_CUTOFF_DAYS", "must be a positive integer")
            })?;
        if task_age_cutoff_days <= 0 {
            return Err(ConfigError::Invalid(
                "DECKHAND_TASK_AGE_CUTOFF_DAYS",
                "must be a positive integer",
            ));
        }

        let max_release_name_len: usize = std::env::var("DECKHAND_MAX_RELEASE_NAME_LEN")
            .unwrap_or_else(|_| "53".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("DECKHAND_MAX_RELEASE_NAME_LEN", "must be a positive integer")
            })?;

        Ok(Self {
            env,
            database_url,
            broker_url,
            queues: QueueConfig {
                iam: std::env::var("DECKHAND_IAM_QUEUE")
                    .unwrap_or_else(|_| "control-panel-iam".to_string()),
                s3: std::env::var("DECKHAND_S3_QUEUE")
                    .unwrap_or_else(|_| "control-panel-s3".to_string()),
                auth: std::env::var("DECKHAND_AUTH_QUEUE")
                    .unwrap_or_else(|_| "control-panel-auth".to_string()),
            },
            task_age_cutoff_days,
            tools_domain: std::env::var("DECKHAND_TOOLS_DOMAIN")
                .unwrap_or_else(|_| "tools.example.com".to_string()),
            apps_domain: std::env::var("DECKHAND_APPS_DOMAIN")
                .unwrap_or_else(|_| "apps.example.com".to_string()),
            efs_volume: std::env::var("DECKHAND_EFS_VOLUME").unwrap_or_default(),
            oidc_domain: std::env::var("DECKHAND_OIDC_DOMAIN").unwrap_or_default(),
            oidc_eks_provider: std::env::var("DECKHAND_OIDC_EKS_PROVIDER").unwrap_or_default(),
            control_namespace: std::env::var("DECKHAND_CONTROL_NAMESPACE")
                .unwrap_or_else(|_| "cpanel".to_string()),
            max_release_name_len,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
