// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the cloud plane adapter.

use thiserror::Error;

use deckhand_core::error::{CoreError, Plane};

/// Result type using CloudError.
pub type Result<T> = std::result::Result<T, CloudError>;

/// Classified kind of a cloud-plane failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudErrorKind {
    /// Throttling or slow-down responses.
    Throttled,
    /// Transient 5xx or network failure.
    Transient,
    /// The request was rejected as invalid.
    Validation,
    /// The caller lacks permission.
    PermissionDenied,
    /// The referenced remote entity does not exist.
    NoSuchEntity,
    /// The remote entity already exists.
    AlreadyExists,
    /// Optimistic write rejected by the carrier's version check.
    VersionConflict,
    /// Anything else the remote reported.
    Api,
}

/// A failure from the object-storage or IAM APIs.
#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct CloudError {
    /// Classified kind.
    pub kind: CloudErrorKind,
    /// Remote error code, when one was returned.
    pub code: Option<String>,
    /// Human-readable detail.
    pub message: String,
}

impl CloudError {
    /// Build an error of the given kind.
    pub fn new(kind: CloudErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    /// Classify a remote error code + HTTP status into a CloudError.
    pub fn from_remote(status: u16, code: &str, message: &str) -> Self {
        let kind = match code {
            "Throttling" | "ThrottlingException" | "SlowDown" | "RequestLimitExceeded" => {
                CloudErrorKind::Throttled
            }
            "NoSuchEntity" | "NoSuchBucket" | "NoSuchTagSet" | "404" => CloudErrorKind::NoSuchEntity,
            "EntityAlreadyExists" | "BucketAlreadyOwnedByYou" | "BucketAlreadyExists" => {
                CloudErrorKind::AlreadyExists
            }
            "AccessDenied" | "AccessDeniedException" | "UnauthorizedOperation" => {
                CloudErrorKind::PermissionDenied
            }
            "ValidationError" | "InvalidInput" | "MalformedPolicyDocument"
            | "InvalidBucketName" => CloudErrorKind::Validation,
            "LimitExceeded" if message.contains("version") => CloudErrorKind::VersionConflict,
            _ if status == 429 => CloudErrorKind::Throttled,
            _ if status >= 500 => CloudErrorKind::Transient,
            _ if status == 409 => CloudErrorKind::VersionConflict,
            _ => CloudErrorKind::Api,
        };
        Self {
            kind,
            code: Some(code.to_string()),
            message: message.to_string(),
        }
    }

    /// Whether a retry can be expected to converge.
    pub fn retryable(&self) -> bool {
        matches!(
            self.kind,
            CloudErrorKind::Throttled | CloudErrorKind::Transient
        )
    }
}

impl From<reqwest::Error> for CloudError {
    fn from(err: reqwest::Error) -> Self {
        // Connection-level failures are transient by classification; anything
        // that got a response is mapped where the response is parsed.
        CloudError::new(CloudErrorKind::Transient, err.to_string())
    }
}

impl From<CloudError> for CoreError {
    fn from(err: CloudError) -> Self {
        if err.retryable() {
            CoreError::ExternalRetryable {
                plane: Plane::Cloud,
                detail: err.to_string(),
            }
        } else if err.kind == CloudErrorKind::VersionConflict {
            CoreError::Conflict {
                message: err.to_string(),
            }
        } else {
            CoreError::ExternalPermanent {
                plane: Plane::Cloud,
                detail: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttling_is_retryable() {
        assert!(CloudError::from_remote(400, "Throttling", "slow down").retryable());
        assert!(CloudError::from_remote(429, "TooManyRequests", "").retryable());
        assert!(CloudError::from_remote(503, "ServiceUnavailable", "").retryable());
    }

    #[test]
    fn test_validation_and_denied_are_permanent() {
        assert!(!CloudError::from_remote(400, "InvalidBucketName", "bad name").retryable());
        assert!(!CloudError::from_remote(403, "AccessDenied", "nope").retryable());
    }

    #[test]
    fn test_core_error_mapping() {
        let retryable: CoreError = CloudError::from_remote(500, "InternalError", "boom").into();
        assert_eq!(retryable.error_code(), "EXTERNAL_RETRYABLE");

        let permanent: CoreError = CloudError::from_remote(403, "AccessDenied", "no").into();
        assert_eq!(permanent.error_code(), "EXTERNAL_PERMANENT");

        let conflict: CoreError =
            CloudError::new(CloudErrorKind::VersionConflict, "stale version").into();
        assert_eq!(conflict.error_code(), "CONFLICT");
    }

    #[test]
    fn test_entity_classification() {
        assert_eq!(
            CloudError::from_remote(404, "NoSuchEntity", "x").kind,
            CloudErrorKind::NoSuchEntity
        );
        assert_eq!(
            CloudError::from_remote(409, "EntityAlreadyExists", "x").kind,
            CloudErrorKind::AlreadyExists
        );
    }
}
