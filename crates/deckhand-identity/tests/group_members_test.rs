// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Group membership flows against a mocked identity provider.

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use deckhand_identity::{IdentityClient, IdentityConfig, IdentityErrorKind};

async fn server_with_token() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-token",
            "expires_in": 86400,
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/groups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "groups": [{"_id": "grp-1", "name": "data-app"}],
        })))
        .mount(&server)
        .await;
    server
}

fn client(server: &MockServer) -> IdentityClient {
    IdentityClient::new(IdentityConfig {
        base_url: server.uri(),
        audience: "urn:identity-api".to_string(),
        client_id: "deckhand".to_string(),
        client_secret: "sekrit".to_string(),
    })
}

#[tokio::test]
async fn resolves_group_id_by_name() {
    let server = server_with_token().await;
    let client = client(&server);

    assert_eq!(client.get_group_id("data-app").await.unwrap(), "grp-1");

    let err = client.get_group_id("missing-app").await.unwrap_err();
    assert_eq!(err.kind, IdentityErrorKind::NotFound);
}

#[tokio::test]
async fn follows_pagination_until_total() {
    let server = server_with_token().await;

    Mock::given(method("GET"))
        .and(path("/groups/grp-1/members"))
        .and(query_param("page", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 3,
            "users": [
                {"user_id": "auth0|1", "email": "a@example.com"},
                {"user_id": "auth0|2", "email": "b@example.com"},
            ],
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/groups/grp-1/members"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 3,
            "users": [{"user_id": "auth0|3", "email": "c@example.com"}],
        })))
        .mount(&server)
        .await;

    let client = client(&server);
    let members = client.list_all_group_members("data-app").await.unwrap();
    assert_eq!(members.len(), 3);
    assert_eq!(members[2].user_id, "auth0|3");
}

#[tokio::test]
async fn missing_total_is_an_api_error() {
    let server = server_with_token().await;

    Mock::given(method("GET"))
        .and(path("/groups/grp-1/members"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "users": [],
        })))
        .mount(&server)
        .await;

    let client = client(&server);
    let err = client
        .list_group_members("data-app", 0, 25)
        .await
        .unwrap_err();
    assert_eq!(err.kind, IdentityErrorKind::Api);
}

#[tokio::test]
async fn rate_limit_is_surfaced() {
    let server = server_with_token().await;

    Mock::given(method("GET"))
        .and(path("/groups/grp-1/members"))
        .respond_with(ResponseTemplate::new(429).set_body_string("too many requests"))
        .mount(&server)
        .await;

    let client = client(&server);
    let err = client
        .list_group_members("data-app", 0, 25)
        .await
        .unwrap_err();
    assert_eq!(err.kind, IdentityErrorKind::RateLimited);
    assert!(err.retryable());
}
