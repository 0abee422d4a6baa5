// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the identity plane adapter.

use thiserror::Error;

use deckhand_core::error::{CoreError, Plane};

/// Result type using IdentityError.
pub type Result<T> = std::result::Result<T, IdentityError>;

/// Classified kind of an identity-plane failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityErrorKind {
    /// The entity already exists.
    Conflict,
    /// The entity does not exist.
    NotFound,
    /// The provider throttled the request.
    RateLimited,
    /// Credentials missing or rejected.
    Unauthorized,
    /// Anything else the provider reported.
    Api,
}

/// A failure from the identity provider.
#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct IdentityError {
    /// Classified kind.
    pub kind: IdentityErrorKind,
    /// Detail from the provider.
    pub message: String,
}

impl IdentityError {
    /// Build an error of the given kind.
    pub fn new(kind: IdentityErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify an HTTP status + body.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            401 | 403 => IdentityErrorKind::Unauthorized,
            404 => IdentityErrorKind::NotFound,
            409 => IdentityErrorKind::Conflict,
            429 => IdentityErrorKind::RateLimited,
            _ => IdentityErrorKind::Api,
        };
        Self::new(kind, message)
    }

    /// Whether a retry can be expected to converge.
    pub fn retryable(&self) -> bool {
        self.kind == IdentityErrorKind::RateLimited
    }
}

impl From<reqwest::Error> for IdentityError {
    fn from(err: reqwest::Error) -> Self {
        IdentityError::new(IdentityErrorKind::Api, err.to_string())
    }
}

impl From<IdentityError> for CoreError {
    fn from(err: IdentityError) -> Self {
        match err.kind {
            IdentityErrorKind::RateLimited => CoreError::ExternalRetryable {
                plane: Plane::Identity,
                detail: err.to_string(),
            },
            IdentityErrorKind::Conflict => CoreError::Conflict {
                message: err.to_string(),
            },
            _ => CoreError::ExternalPermanent {
                plane: Plane::Identity,
                detail: err.to_string(),
            },
        }
    }
}
