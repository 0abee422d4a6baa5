// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error taxonomy shared across the orchestration core.
//!
//! Every plane adapter maps its failures into these kinds so that callers
//! can decide between surfacing, retrying and aborting without inspecting
//! plane-specific detail.

use std::collections::BTreeMap;
use std::fmt;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// External plane a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plane {
    /// Object storage / IAM plane.
    Cloud,
    /// Kubernetes / Helm plane.
    Cluster,
    /// Identity provider plane.
    Identity,
    /// Message broker.
    Broker,
}

impl fmt::Display for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cloud => write!(f, "cloud"),
            Self::Cluster => write!(f, "cluster"),
            Self::Identity => write!(f, "identity"),
            Self::Broker => write!(f, "broker"),
        }
    }
}

/// Core errors raised while processing an intent or a task.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// Input violates a stated invariant. Carries a field -> message map
    /// suitable for returning to the caller.
    Validation {
        /// Per-field validation messages.
        fields: BTreeMap<String, String>,
    },

    /// Caller lacks the rights for the operation.
    Permission {
        /// What was attempted.
        message: String,
    },

    /// A referenced entity is missing.
    NotFound {
        /// Entity class, e.g. "user", "s3bucket".
        entity: &'static str,
        /// Identifier that failed to resolve.
        id: String,
    },

    /// Duplicate grant, duplicate release, or a version conflict that
    /// survived the bounded retries.
    Conflict {
        /// Description of the conflicting state.
        message: String,
    },

    /// Transient external failure; the task path re-raises so the broker
    /// redelivers, the request path retries inline up to a bounded count.
    ExternalRetryable {
        /// Plane the failure came from.
        plane: Plane,
        /// Error detail.
        detail: String,
    },

    /// Non-retryable external failure (4xx that is not throttling).
    ExternalPermanent {
        /// Plane the failure came from.
        plane: Plane,
        /// Error detail.
        detail: String,
    },

    /// Database operation failed.
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// Internal invariant violated. Log, alert, do not retry.
    Fatal {
        /// What went wrong.
        detail: String,
    },
}

impl CoreError {
    /// Build a single-field validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(field.into(), message.into());
        CoreError::Validation { fields }
    }

    /// Build a not-found error.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Whether a retry can be expected to converge.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExternalRetryable { .. })
    }

    /// Get the stable error code string for this error kind.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION",
            Self::Permission { .. } => "PERMISSION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::ExternalRetryable { .. } => "EXTERNAL_RETRYABLE",
            Self::ExternalPermanent { .. } => "EXTERNAL_PERMANENT",
            Self::Database { .. } => "DATABASE",
            Self::Fatal { .. } => "FATAL",
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { fields } => {
                let detail = fields
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v))
                    .collect::<Vec<_>>()
                    .join("; ");
                write!(f, "Validation failed: {}", detail)
            }
            Self::Permission { message } => write!(f, "Permission denied: {}", message),
            Self::NotFound { entity, id } => write!(f, "{} '{}' not found", entity, id),
            Self::Conflict { message } => write!(f, "Conflict: {}", message),
            Self::ExternalRetryable { plane, detail } => {
                write!(f, "Retryable {} plane error: {}", plane, detail)
            }
            Self::ExternalPermanent { plane, detail } => {
                write!(f, "Permanent {} plane error: {}", plane, detail)
            }
            Self::Database { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
            Self::Fatal { detail } => write!(f, "Fatal: {}", detail),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Database {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let test_cases: Vec<(CoreError, &str)> = vec![
            (CoreError::validation("name", "bad prefix"), "VALIDATION"),
            (
                CoreError::Permission {
                    message: "not an admin".to_string(),
                },
                "PERMISSION",
            ),
            (CoreError::not_found("s3bucket", "test-bucket-1"), "NOT_FOUND"),
            (
                CoreError::Conflict {
                    message: "duplicate grant".to_string(),
                },
                "CONFLICT",
            ),
            (
                CoreError::ExternalRetryable {
                    plane: Plane::Cloud,
                    detail: "throttled".to_string(),
                },
                "EXTERNAL_RETRYABLE",
            ),
            (
                CoreError::ExternalPermanent {
                    plane: Plane::Identity,
                    detail: "unauthorized".to_string(),
                },
                "EXTERNAL_PERMANENT",
            ),
            (
                CoreError::Fatal {
                    detail: "invariant broken".to_string(),
                },
                "FATAL",
            ),
        ];

        for (error, expected_code) in test_cases {
            assert_eq!(error.error_code(), expected_code, "for {:?}", error);
        }
    }

    #[test]
    fn test_only_external_retryable_is_retryable() {
        assert!(
            CoreError::ExternalRetryable {
                plane: Plane::Cluster,
                detail: "503".to_string()
            }
            .is_retryable()
        );
        assert!(
            !CoreError::ExternalPermanent {
                plane: Plane::Cluster,
                detail: "403".to_string()
            }
            .is_retryable()
        );
        assert!(!CoreError::validation("x", "y").is_retryable());
    }

    #[test]
    fn test_display_not_found() {
        let err = CoreError::not_found("user", "github|1234");
        assert_eq!(err.to_string(), "user 'github|1234' not found");
    }

    #[test]
    fn test_validation_field_map() {
        let err = CoreError::validation("name", "must have correct env prefix e.g. test-bucketname");
        match &err {
            CoreError::Validation { fields } => {
                assert_eq!(fields.len(), 1);
                assert!(fields["name"].contains("test-"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
