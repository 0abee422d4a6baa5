// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Assume-role (trust) policy builders.

use serde_json::{Value, json};

use deckhand_core::naming::iam_arn;

/// Inputs for building trust policies.
#[derive(Debug, Clone)]
pub struct TrustConfig {
    /// Account hosting the OIDC providers.
    pub account_id: String,
    /// OIDC issuer domain for web-identity federation.
    pub oidc_domain: String,
    /// Cluster OIDC provider for service-account federation.
    pub eks_provider: String,
}

fn base_policy() -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Principal": {"Service": "ec2.amazonaws.com"},
                "Action": "sts:AssumeRole",
            },
        ],
    })
}

/// Trust policy for a user role: EC2 base statement, a web-identity
/// statement bound to the user's subject id, and a service-account
/// statement bound to the user's namespace.
pub fn user_trust_policy(config: &TrustConfig, user_auth0_id: &str, user_slug: &str) -> Value {
    let mut policy = base_policy();

    let oidc = json!({
        "Effect": "Allow",
        "Principal": {
            "Federated": iam_arn(
                &format!("oidc-provider/{}/", config.oidc_domain),
                &config.account_id,
            ),
        },
        "Action": "sts:AssumeRoleWithWebIdentity",
        "Condition": {
            "StringEquals": {
                (format!("{}/:sub", config.oidc_domain)): user_auth0_id,
            },
        },
    });

    let eks = json!({
        "Effect": "Allow",
        "Principal": {
            "Federated": iam_arn(
                &format!("oidc-provider/{}", config.eks_provider),
                &config.account_id,
            ),
        },
        "Action": "sts:AssumeRoleWithWebIdentity",
        "Condition": {
            "StringLike": {
                (format!("{}:sub", config.eks_provider)):
                    format!("system:serviceaccount:user-{}:{}-*", user_slug, user_slug),
            },
        },
    });

    let statements = policy["Statement"].as_array_mut().unwrap();
    statements.push(oidc);
    statements.push(eks);
    policy
}

/// Trust policy for an app role: EC2 base statement plus a web-identity
/// statement bound to the app's namespace service accounts.
pub fn app_trust_policy(config: &TrustConfig, app_namespace: &str) -> Value {
    let mut policy = base_policy();
    let oidc = json!({
        "Effect": "Allow",
        "Principal": {
            "Federated": iam_arn(
                &format!("oidc-provider/{}", config.eks_provider),
                &config.account_id,
            ),
        },
        "Action": "sts:AssumeRoleWithWebIdentity",
        "Condition": {
            "StringLike": {
                (format!("{}:sub", config.eks_provider)):
                    format!("system:serviceaccount:{}:*", app_namespace),
            },
        },
    });
    policy["Statement"].as_array_mut().unwrap().push(oidc);
    policy
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TrustConfig {
        TrustConfig {
            account_id: "123456789012".to_string(),
            oidc_domain: "auth.example.com".to_string(),
            eks_provider: "oidc.eks.eu-west-1.amazonaws.com/id/ABCDEF".to_string(),
        }
    }

    #[test]
    fn test_user_trust_policy_binds_subject() {
        let policy = user_trust_policy(&config(), "github|1234", "alice");
        let statements = policy["Statement"].as_array().unwrap();
        assert_eq!(statements.len(), 3);

        let oidc = &statements[1];
        assert_eq!(
            oidc["Condition"]["StringEquals"]["auth.example.com/:sub"],
            "github|1234"
        );

        let eks = &statements[2];
        let sub = eks["Condition"]["StringLike"]
            .as_object()
            .unwrap()
            .values()
            .next()
            .unwrap();
        assert_eq!(sub, "system:serviceaccount:user-alice:alice-*");
    }

    #[test]
    fn test_base_statement_always_first() {
        let policy = user_trust_policy(&config(), "github|1", "bob");
        assert_eq!(
            policy["Statement"][0]["Principal"]["Service"],
            "ec2.amazonaws.com"
        );
    }

    #[test]
    fn test_app_trust_policy_scopes_namespace() {
        let policy = app_trust_policy(&config(), "data-app-dev");
        let eks = &policy["Statement"][1];
        let sub = eks["Condition"]["StringLike"]
            .as_object()
            .unwrap()
            .values()
            .next()
            .unwrap();
        assert_eq!(sub, "system:serviceaccount:data-app-dev:*");
    }
}
