// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the cluster plane adapter.

use thiserror::Error;

use deckhand_core::error::{CoreError, Plane};

/// Errors from Helm process execution.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HelmError {
    /// The helm binary could not be spawned.
    #[error("Failed to spawn helm: {0}")]
    Spawn(String),

    /// The command exceeded its timeout and was killed.
    #[error("Helm command timed out after {seconds}s")]
    Timeout {
        /// Configured timeout in seconds.
        seconds: u64,
    },

    /// The release a command targeted does not exist. Non-fatal for
    /// uninstall.
    #[error("Release not found: {release}")]
    ReleaseNotFound {
        /// Release name.
        release: String,
    },

    /// The process exited non-zero or reported an error.
    #[error("Helm command failed: {stderr}")]
    Failed {
        /// Exit code, when the process exited.
        code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },

    /// The chart repository index cache could not be read or parsed.
    #[error("Chart index error: {0}")]
    Index(String),

    /// I/O failure around the process or cache files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Helm operations.
pub type HelmResult<T> = std::result::Result<T, HelmError>;

/// Errors from the Kubernetes API.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// No usable cluster configuration was found.
    #[error("Cluster configuration error: {0}")]
    Config(String),

    /// The API server rejected the request.
    #[error("Cluster API error ({status}): {message}")]
    Api {
        /// HTTP status.
        status: u16,
        /// Error message from the API server.
        message: String,
    },

    /// Transport-level failure.
    #[error("Cluster request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Response shape was not the expected object.
    #[error("Unexpected cluster response: {0}")]
    Decode(String),
}

/// Result type for Kubernetes operations.
pub type KubeResult<T> = std::result::Result<T, KubeError>;

impl From<HelmError> for CoreError {
    fn from(err: HelmError) -> Self {
        match err {
            // a missing release is a NotFound, surfaced as non-fatal by
            // the uninstall path
            HelmError::ReleaseNotFound { release } => CoreError::NotFound {
                entity: "release",
                id: release,
            },
            HelmError::Timeout { .. } | HelmError::Spawn(_) => CoreError::ExternalRetryable {
                plane: Plane::Cluster,
                detail: err.to_string(),
            },
            other => CoreError::ExternalPermanent {
                plane: Plane::Cluster,
                detail: other.to_string(),
            },
        }
    }
}

impl From<KubeError> for CoreError {
    fn from(err: KubeError) -> Self {
        let retryable = match &err {
            KubeError::Api { status, .. } => *status == 429 || *status >= 500,
            KubeError::Request(_) => true,
            _ => false,
        };
        if retryable {
            CoreError::ExternalRetryable {
                plane: Plane::Cluster,
                detail: err.to_string(),
            }
        } else {
            CoreError::ExternalPermanent {
                plane: Plane::Cluster,
                detail: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_not_found_maps_to_not_found() {
        let err: CoreError = HelmError::ReleaseNotFound {
            release: "rstudio-bob".to_string(),
        }
        .into();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err: CoreError = HelmError::Timeout { seconds: 300 }.into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_kube_5xx_retryable_4xx_permanent() {
        let server: CoreError = KubeError::Api {
            status: 503,
            message: "unavailable".to_string(),
        }
        .into();
        assert!(server.is_retryable());

        let denied: CoreError = KubeError::Api {
            status: 403,
            message: "forbidden".to_string(),
        }
        .into();
        assert!(!denied.is_retryable());
    }
}
