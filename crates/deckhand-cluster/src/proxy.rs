// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Authorisation for the namespace-scoped cluster API proxy.
//!
//! A user may operate only inside their own namespace unless they are a
//! superuser. The check is a pure function evaluated by the outer HTTP
//! layer before any upstream request is made.

/// API prefixes a non-superuser may reach.
const ALLOWED_APIS: &[&str] = &[
    "api/v1",
    "apis/apps/v1",
    "apis/apps/v1beta2",
    "apis/extensions/v1beta1",
];

/// The authenticated caller, as seen by the proxy.
#[derive(Debug, Clone)]
pub struct ProxyUser {
    /// The caller's own namespace.
    pub k8s_namespace: String,
    /// Superusers may reach any path.
    pub is_superuser: bool,
}

/// Strip the proxy mount prefixes and leading slashes from a request path.
pub fn strip_path_prefix(path: &str) -> &str {
    let path = path.strip_prefix("/api/k8s/").unwrap_or(path);
    let path = path.strip_prefix("/k8s/").unwrap_or(path);
    path.trim_start_matches('/')
}

/// Decide whether a request may be forwarded upstream.
///
/// - superusers: any path;
/// - authenticated users: the path must start with an allowed API prefix
///   followed by `namespaces/<their namespace>/` - exact segment match, so
///   a namespace merely sharing a prefix is rejected;
/// - anonymous requests: only with a bearer or JWT token present.
pub fn authorize(user: Option<&ProxyUser>, path: &str, has_access_token: bool) -> bool {
    let Some(user) = user else {
        return has_access_token;
    };
    if user.is_superuser {
        return true;
    }

    let path = strip_path_prefix(path).to_lowercase();
    let namespace = user.k8s_namespace.to_lowercase();
    ALLOWED_APIS
        .iter()
        .any(|api| path.starts_with(&format!("{}/namespaces/{}/", api, namespace)))
}

/// Whether an Authorization header value carries a usable token.
pub fn has_access_token(authorization: Option<&str>) -> bool {
    matches!(authorization, Some(value)
        if value.starts_with("Bearer ") || value.starts_with("JWT "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> ProxyUser {
        ProxyUser {
            k8s_namespace: "user-alice".to_string(),
            is_superuser: false,
        }
    }

    fn root() -> ProxyUser {
        ProxyUser {
            k8s_namespace: "user-root".to_string(),
            is_superuser: true,
        }
    }

    #[test]
    fn test_user_allowed_in_own_namespace() {
        assert!(authorize(
            Some(&alice()),
            "/api/k8s/api/v1/namespaces/user-alice/pods",
            false,
        ));
        assert!(authorize(
            Some(&alice()),
            "apis/apps/v1/namespaces/user-alice/deployments",
            false,
        ));
    }

    #[test]
    fn test_prefix_sharing_namespace_rejected() {
        // user-aliceother shares a prefix with user-alice; the segment
        // must match exactly
        assert!(!authorize(
            Some(&alice()),
            "/api/k8s/api/v1/namespaces/user-aliceother/pods",
            false,
        ));
        assert!(!authorize(
            Some(&alice()),
            "api/v1/namespaces/user-alice2/pods",
            false,
        ));
    }

    #[test]
    fn test_other_namespace_rejected() {
        assert!(!authorize(
            Some(&alice()),
            "api/v1/namespaces/user-bob/pods",
            false,
        ));
    }

    #[test]
    fn test_disallowed_api_group_rejected() {
        assert!(!authorize(
            Some(&alice()),
            "apis/batch/v1/namespaces/user-alice/jobs",
            false,
        ));
        // cluster-scoped listing is never allowed for plain users
        assert!(!authorize(Some(&alice()), "api/v1/pods", false));
        assert!(!authorize(Some(&alice()), "api/v1/namespaces", false));
    }

    #[test]
    fn test_superuser_allowed_anywhere() {
        assert!(authorize(Some(&root()), "api/v1/namespaces/user-alice/pods", false));
        assert!(authorize(Some(&root()), "apis/batch/v1/jobs", false));
    }

    #[test]
    fn test_anonymous_requires_token() {
        assert!(!authorize(None, "api/v1/namespaces/user-alice/pods", false));
        assert!(authorize(None, "api/v1/namespaces/user-alice/pods", true));
    }

    #[test]
    fn test_access_token_detection() {
        assert!(has_access_token(Some("Bearer abc.def.ghi")));
        assert!(has_access_token(Some("JWT abc.def.ghi")));
        assert!(!has_access_token(Some("Basic dXNlcjpwYXNz")));
        assert!(!has_access_token(None));
    }

    #[test]
    fn test_path_prefix_stripping() {
        assert_eq!(
            strip_path_prefix("/api/k8s/api/v1/namespaces/user-alice/pods"),
            "api/v1/namespaces/user-alice/pods"
        );
        // legacy proxy mount
        assert_eq!(strip_path_prefix("/k8s/api/v1/x"), "api/v1/x");
        assert_eq!(strip_path_prefix("api/v1/x"), "api/v1/x");
    }
}
