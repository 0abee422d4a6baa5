// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! IAM and S3 clients against mocked cloud endpoints.

use std::sync::Arc;

use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use deckhand_cloud::client::CloudConfig;
use deckhand_cloud::credentials::CredentialSet;
use deckhand_cloud::error::CloudErrorKind;
use deckhand_cloud::iam::{Iam, IamClient};
use deckhand_cloud::s3::{ObjectStore, S3Client};

fn set_base_credentials() {
    // SAFETY: tests only ever write the same fixture values
    unsafe {
        std::env::set_var("AWS_ACCESS_KEY_ID", "AKIDEXAMPLE");
        std::env::set_var(
            "AWS_SECRET_ACCESS_KEY",
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
        );
    }
}

fn config(iam: Option<String>, s3: Option<String>) -> CloudConfig {
    CloudConfig {
        region: "eu-west-1".to_string(),
        bucket_region: "eu-west-1".to_string(),
        account_id: "123456789012".to_string(),
        assume_role_arn: None,
        s3_endpoint: s3,
        iam_endpoint: iam,
    }
}

fn error_body(code: &str, message: &str) -> String {
    format!(
        "<ErrorResponse><Error><Code>{}</Code><Message>{}</Message></Error></ErrorResponse>",
        code, message
    )
}

#[tokio::test]
async fn create_role_skips_when_it_already_exists() {
    set_base_credentials();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_string_contains("Action=CreateRole"))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_string(error_body("EntityAlreadyExists", "Role exists")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = IamClient::new(
        &config(Some(server.uri()), None),
        Arc::new(CredentialSet::new()),
    );
    // idempotent create: the conflict is swallowed and no attach happens
    client
        .create_role(
            "test_user_alice",
            &serde_json::json!({"Version": "2012-10-17", "Statement": []}),
            &["arn:aws:iam::123456789012:policy/base".to_string()],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn inline_policy_document_is_url_decoded() {
    set_base_credentials();
    let server = MockServer::start().await;

    let encoded = urlencoding::encode(r#"{"Version":"2012-10-17","Statement":[]}"#).into_owned();
    Mock::given(method("POST"))
        .and(body_string_contains("Action=GetRolePolicy"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "<GetRolePolicyResponse><GetRolePolicyResult>\
             <RoleName>test_user_alice</RoleName>\
             <PolicyName>s3-access</PolicyName>\
             <PolicyDocument>{}</PolicyDocument>\
             </GetRolePolicyResult></GetRolePolicyResponse>",
            encoded
        )))
        .mount(&server)
        .await;

    let client = IamClient::new(
        &config(Some(server.uri()), None),
        Arc::new(CredentialSet::new()),
    );
    let document = client
        .get_inline_policy("test_user_alice", "s3-access")
        .await
        .unwrap()
        .expect("document present");
    assert_eq!(document["Version"], "2012-10-17");
}

#[tokio::test]
async fn missing_inline_policy_is_none() {
    set_base_credentials();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(404).set_body_string(error_body("NoSuchEntity", "no policy")),
        )
        .mount(&server)
        .await;

    let client = IamClient::new(
        &config(Some(server.uri()), None),
        Arc::new(CredentialSet::new()),
    );
    assert!(
        client
            .get_inline_policy("test_user_alice", "s3-access")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn throttling_is_classified_retryable() {
    set_base_credentials();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400).set_body_string(error_body("Throttling", "slow down")),
        )
        .mount(&server)
        .await;

    let client = IamClient::new(
        &config(Some(server.uri()), None),
        Arc::new(CredentialSet::new()),
    );
    let err = client.list_role_names("/").await.unwrap_err();
    assert_eq!(err.kind, CloudErrorKind::Throttled);
    assert!(err.retryable());
}

#[tokio::test]
async fn create_bucket_applies_full_baseline() {
    set_base_credentials();
    let server = MockServer::start().await;

    // the creation PUT and every baseline subresource PUT succeed
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/test-bucket-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<Tagging><TagSet></TagSet></Tagging>",
        ))
        .mount(&server)
        .await;

    let client = S3Client::new(
        &config(None, Some(server.uri())),
        Arc::new(CredentialSet::new()),
    );
    let created = client.create_bucket("test-bucket-1", true).await.unwrap();
    assert_eq!(created.location, "/test-bucket-1");

    // creation + versioning + lifecycle + encryption + public access block
    // + bucket policy + tag read/write for the warehouse tag
    let requests = server.received_requests().await.unwrap();
    let puts: Vec<String> = requests
        .iter()
        .filter(|r| r.method.to_string() == "PUT")
        .map(|r| r.url.to_string())
        .collect();
    assert!(puts.iter().any(|u| u.contains("versioning")));
    assert!(puts.iter().any(|u| u.contains("lifecycle")));
    assert!(puts.iter().any(|u| u.contains("encryption")));
    assert!(puts.iter().any(|u| u.contains("publicAccessBlock")));
    assert!(puts.iter().any(|u| u.contains("policy")));
    assert!(puts.iter().any(|u| u.contains("tagging")));
}

#[tokio::test]
async fn create_bucket_already_owned_still_converges() {
    set_base_credentials();
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/test-bucket-1"))
        .and(wiremock::matchers::query_param_is_missing("versioning"))
        .and(wiremock::matchers::query_param_is_missing("lifecycle"))
        .and(wiremock::matchers::query_param_is_missing("encryption"))
        .and(wiremock::matchers::query_param_is_missing("publicAccessBlock"))
        .and(wiremock::matchers::query_param_is_missing("policy"))
        .and(wiremock::matchers::query_param_is_missing("tagging"))
        .respond_with(ResponseTemplate::new(409).set_body_string(error_body(
            "BucketAlreadyOwnedByYou",
            "already yours",
        )))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = S3Client::new(
        &config(None, Some(server.uri())),
        Arc::new(CredentialSet::new()),
    );
    // re-running create on an owned bucket re-applies the baseline
    let created = client.create_bucket("test-bucket-1", false).await.unwrap();
    assert_eq!(created.location, "/test-bucket-1");
}
