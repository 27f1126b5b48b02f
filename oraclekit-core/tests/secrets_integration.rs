#![allow(missing_docs)]
mod common;

use common::{config, test_client};
use oraclekit_core::{OracleConfig, OracleKitError, Stage};

fn stage_config(base_url: String) -> OracleConfig {
    OracleConfig {
        stage: Stage::Beta,
        stage_base_url: Some(base_url),
        ..config("https://example.invalid/", 60_000)
    }
}

#[tokio::test]
async fn test_authorized_stage_stores_secrets() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/secrets")
        .match_header("authorization", mockito::Matcher::Any)
        .with_status(200)
        .with_body(r#"{"blockfrostApiKey":"preprodAbc123"}"#)
        .expect(1)
        .create_async()
        .await;

    let t = test_client(stage_config(server.url()));
    t.client.ensure_identity().expect("identity");
    assert!(t.client.authorize_stage(Stage::Beta).await.expect("authorize"));

    assert_eq!(t.client.authorized_stages().expect("stages"), vec![Stage::Beta]);
    let secrets = t
        .client
        .stage_secrets(Stage::Beta)
        .expect("read secrets")
        .expect("secrets present");
    assert_eq!(secrets.blockfrost_api_key, "preprodAbc123");
    assert!(!format!("{secrets:?}").contains("preprodAbc123"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_rejected_request_clears_previous_secrets() {
    let mut server = mockito::Server::new_async().await;
    let granted = server
        .mock("GET", "/secrets")
        .with_status(200)
        .with_body(r#"{"blockfrostApiKey":"k"}"#)
        .expect(1)
        .create_async()
        .await;

    let t = test_client(stage_config(server.url()));
    t.client.ensure_identity().expect("identity");
    assert!(t.client.authorize_stage(Stage::Beta).await.expect("authorize"));
    granted.remove_async().await;

    let denied = server
        .mock("GET", "/secrets")
        .with_status(401)
        .with_body("unauthorized")
        .expect(1)
        .create_async()
        .await;
    assert!(!t.client.authorize_stage(Stage::Beta).await.expect("authorize"));

    assert!(t.client.authorized_stages().expect("stages").is_empty());
    assert!(t.client.stage_secrets(Stage::Beta).expect("read").is_none());
    denied.assert_async().await;
}

#[tokio::test]
async fn test_no_request_without_a_wallet() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/secrets")
        .expect(0)
        .create_async()
        .await;

    let t = test_client(stage_config(server.url()));
    assert!(!t.client.authorize_stage(Stage::Beta).await.expect("authorize"));
    assert!(!t.client.has_wallet().expect("has wallet"));
    assert_eq!(t.wallets.call_count(), 0);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_malformed_secrets_are_rejected() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/secrets")
        .with_status(200)
        .with_body("not json")
        .create_async()
        .await;

    let t = test_client(stage_config(server.url()));
    t.client.ensure_identity().expect("identity");
    assert!(t.client.authorize_stage(Stage::Beta).await.is_err());
    assert!(t.client.authorized_stages().expect("stages").is_empty());
}

#[tokio::test]
async fn test_server_failure_is_an_http_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/secrets")
        .with_status(503)
        .with_body("maintenance")
        .create_async()
        .await;

    let t = test_client(stage_config(server.url()));
    t.client.ensure_identity().expect("identity");
    match t.client.authorize_stage(Stage::Beta).await {
        Err(OracleKitError::HttpError { status, body }) => {
            assert_eq!(status, 503);
            assert_eq!(body, "maintenance");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(t.client.authorized_stages().expect("stages").is_empty());
}
