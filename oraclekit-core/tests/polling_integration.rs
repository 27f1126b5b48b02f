#![allow(missing_docs)]
mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{config, test_client, InMemoryKeystore, FIXED_MILLIS, FIXED_TIME};
use mockito::Matcher;
use oraclekit_core::clock::FixedClock;
use oraclekit_core::storage::MemoryKeyValueStore;
use oraclekit_core::token::DecodedToken;
use oraclekit_core::{EngineState, OracleClient, OracleKitError};
use tokio::time::timeout;

const LONG_INTERVAL_MS: u64 = 60_000;

async fn next_status(rx: &mut tokio::sync::watch::Receiver<Option<String>>) -> String {
    timeout(Duration::from_secs(10), rx.changed())
        .await
        .expect("status published in time")
        .expect("status channel open");
    rx.borrow_and_update().clone().expect("status present")
}

#[tokio::test]
async fn test_success_status_is_published_and_persisted() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/token/supply")
        .match_header("authorization", Matcher::Regex("^[0-9a-f]+$".to_string()))
        .with_status(200)
        .with_body("1000000\n")
        .expect(1)
        .create_async()
        .await;

    let t = test_client(config(&format!("{}/token/supply", server.url()), LONG_INTERVAL_MS));
    let mut rx = t.client.status().subscribe();
    assert!(t.client.start().await.expect("start"));

    assert_eq!(next_status(&mut rx).await, format!("1000000@{FIXED_TIME}"));
    assert_eq!(
        t.client.latest_status().expect("latest"),
        Some("1000000@10:00:00".to_string())
    );
    assert_eq!(t.client.last_sync().expect("last sync"), Some(FIXED_MILLIS));

    t.client.stop();
    t.client.stopped().await;
    mock.assert_async().await;
}

#[tokio::test]
async fn test_error_status_is_published_and_loop_continues() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/")
        .with_status(500)
        .with_body("server error")
        .expect_at_least(2)
        .create_async()
        .await;

    let t = test_client(config(&server.url(), 20));
    let mut rx = t.client.status().subscribe();
    t.client.start().await.expect("start");

    assert_eq!(next_status(&mut rx).await, "server error@10:00:00");
    assert_eq!(next_status(&mut rx).await, "server error@10:00:00");
    assert_eq!(t.client.engine_state(), EngineState::Running);
    assert_eq!(t.client.last_sync().expect("last sync"), None);

    t.client.stop();
    t.client.stopped().await;
    mock.assert_async().await;
}

#[tokio::test]
async fn test_request_carries_a_valid_token() {
    let mut server = mockito::Server::new_async().await;
    let public_key = {
        let wallets = common::FixedWallets::new([42u8; 32]);
        wallets.signing_key().verifying_key()
    };
    server
        .mock("GET", "/")
        .with_status(200)
        .with_body_from_request(move |request| {
            let header = request.header("authorization");
            let token = header
                .first()
                .and_then(|value| value.to_str().ok())
                .expect("authorization header");
            let decoded = DecodedToken::decode(token).expect("decode token");
            decoded.verify(&public_key).expect("verify token");
            decoded.claims().device_id.to_string().into_bytes()
        })
        .create_async()
        .await;

    let t = test_client(config(&server.url(), LONG_INTERVAL_MS));
    let device_id = t.client.device_id().expect("device id");
    assert_eq!(t.client.poll_once().await, format!("{device_id}@{FIXED_TIME}"));
}

#[tokio::test]
async fn test_double_start_runs_one_loop() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/")
        .with_status(200)
        .with_body("1")
        .expect(1)
        .create_async()
        .await;

    let t = test_client(config(&server.url(), LONG_INTERVAL_MS));
    let mut rx = t.client.status().subscribe();
    assert!(t.client.start().await.expect("first start"));
    assert!(!t.client.start().await.expect("second start"));
    next_status(&mut rx).await;

    t.client.stop();
    t.client.stopped().await;
    mock.assert_async().await;
}

#[tokio::test]
async fn test_stop_during_sleep_terminates_before_next_request() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/")
        .with_status(200)
        .with_body("1")
        .expect(1)
        .create_async()
        .await;

    let t = test_client(config(&server.url(), LONG_INTERVAL_MS));
    let mut rx = t.client.status().subscribe();
    t.client.start().await.expect("start");
    next_status(&mut rx).await;

    t.client.stop();
    timeout(Duration::from_secs(2), t.client.stopped())
        .await
        .expect("sleep was interrupted");
    assert_eq!(t.client.engine_state(), EngineState::Terminated);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_stop_mid_request_lets_iteration_finish() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/")
        .with_status(200)
        .with_chunked_body(|writer| {
            std::thread::sleep(Duration::from_millis(400));
            writer.write_all(b"slow")
        })
        .expect(1)
        .create_async()
        .await;

    let t = test_client(config(&server.url(), LONG_INTERVAL_MS));
    t.client.start().await.expect("start");
    tokio::time::sleep(Duration::from_millis(100)).await;

    t.client.stop();
    assert_eq!(t.client.engine_state(), EngineState::Suspended);
    timeout(Duration::from_secs(5), t.client.stopped())
        .await
        .expect("task exits after the iteration");

    assert_eq!(t.client.engine_state(), EngineState::Terminated);
    assert_eq!(
        t.client.latest_status().expect("latest"),
        Some("slow@10:00:00".to_string())
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn test_engine_restarts_after_termination() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/")
        .with_status(200)
        .with_body("1")
        .expect(2)
        .create_async()
        .await;

    let t = test_client(config(&server.url(), LONG_INTERVAL_MS));
    assert_eq!(t.client.engine_state(), EngineState::Idle);
    let mut rx = t.client.status().subscribe();

    for _ in 0..2 {
        assert!(t.client.start().await.expect("start"));
        next_status(&mut rx).await;
        t.client.stop();
        t.client.stopped().await;
        assert_eq!(t.client.engine_state(), EngineState::Terminated);
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_transport_failure_becomes_status() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .expect("bind")
        .local_addr()
        .expect("addr")
        .port();
    let t = test_client(config(&format!("http://127.0.0.1:{port}/"), LONG_INTERVAL_MS));

    let status = t.client.poll_once().await;
    assert!(status.starts_with("network_"), "unexpected status: {status}");
    assert!(status.ends_with("@10:00:00"));
    assert_eq!(t.client.last_sync().expect("last sync"), None);
}

#[tokio::test]
async fn test_unreadable_identity_keeps_engine_stopped() {
    let kv = Arc::new(MemoryKeyValueStore::new());
    let keystore = Arc::new(InMemoryKeystore::new());
    let build = || {
        OracleClient::with_clock(
            config("https://example.invalid/", LONG_INTERVAL_MS),
            kv.clone(),
            keystore.clone(),
            Arc::new(common::FixedWallets::new([1u8; 32])),
            Arc::new(common::StaticIds),
            Arc::new(FixedClock::new(FIXED_MILLIS, FIXED_TIME)),
        )
        .expect("client")
    };

    let first = build();
    first.ensure_identity().expect("identity");
    first.rotate_master_key().expect("rotate");

    let second = build();
    assert!(matches!(
        second.start().await,
        Err(OracleKitError::DecryptionFailed { .. })
    ));
    assert_eq!(second.engine_state(), EngineState::Idle);
}

#[tokio::test]
async fn test_mint_failure_skips_request() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/")
        .with_status(200)
        .expect(0)
        .create_async()
        .await;

    let kv = Arc::new(MemoryKeyValueStore::new());
    let keystore = Arc::new(InMemoryKeystore::new());
    let build = || {
        OracleClient::with_clock(
            config(&server.url(), LONG_INTERVAL_MS),
            kv.clone(),
            keystore.clone(),
            Arc::new(common::FixedWallets::new([1u8; 32])),
            Arc::new(common::StaticIds),
            Arc::new(FixedClock::new(FIXED_MILLIS, FIXED_TIME)),
        )
        .expect("client")
    };
    let first = build();
    first.ensure_identity().expect("identity");
    first.rotate_master_key().expect("rotate");

    let second = build();
    let mut rx = second.status().subscribe();
    let status = second.poll_once().await;

    assert!(status.starts_with("decryption_failed: "), "unexpected status: {status}");
    assert!(status.ends_with("@10:00:00"));
    assert_eq!(rx.borrow_and_update().clone(), Some(status));
    assert_eq!(second.last_sync().expect("last sync"), None);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_hung_server_fails_one_request_within_timeout() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    std::thread::spawn(move || {
        let mut held = Vec::new();
        for stream in listener.incoming().flatten() {
            counter.fetch_add(1, Ordering::SeqCst);
            held.push(stream);
        }
    });

    let mut cfg = config(&format!("http://127.0.0.1:{port}/"), LONG_INTERVAL_MS);
    cfg.read_timeout_ms = 300;
    let t = test_client(cfg);

    let started = Instant::now();
    let status = t.client.poll_once().await;

    assert!(status.starts_with("network_timeout: "), "unexpected status: {status}");
    assert!(started.elapsed() < Duration::from_millis(900));
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_on_demand_poll_waits_for_running_iteration() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (current, max) = (Arc::clone(&in_flight), Arc::clone(&peak));

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/")
        .with_status(200)
        .with_chunked_body(move |writer| {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            max.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(300));
            current.fetch_sub(1, Ordering::SeqCst);
            writer.write_all(b"slow")
        })
        .expect(2)
        .create_async()
        .await;

    let t = test_client(config(&server.url(), LONG_INTERVAL_MS));
    t.client.start().await.expect("start");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(t.client.poll_once().await, "slow@10:00:00");
    assert_eq!(peak.load(Ordering::SeqCst), 1);

    t.client.stop();
    t.client.stopped().await;
    mock.assert_async().await;
}

#[test]
fn test_poll_once_from_blocking_context() {
    let mut server = mockito::Server::new();
    server.mock("GET", "/").with_status(204).create();

    let t = test_client(config(&server.url(), LONG_INTERVAL_MS));
    let status = tokio_test::block_on(t.client.poll_once());
    assert_eq!(status, "@10:00:00");
    assert_eq!(t.client.last_sync().expect("last sync"), Some(FIXED_MILLIS));
}
