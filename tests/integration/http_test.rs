//! The engine against a mocked REST document service

use pretty_assertions::assert_eq;
use std::time::{Duration, Instant};

use piggybank_sync::client::state::SyncPhase;
use piggybank_sync::client::sync::ConnectionStatus;
use piggybank_sync::client::SyncEngine;

use crate::assert_ok;
use crate::common::*;

async fn http_engine(server_uri: String) -> SyncEngine {
    let config = assert_ok!(test_config().server_url(server_uri).build());
    assert_ok!(SyncEngine::new(config).await)
}

async fn wait_until_idle(engine: &SyncEngine) {
    let queue = engine.queue().clone();
    let idle = tokio::time::timeout(Duration::from_secs(5), async move {
        while queue.is_draining() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(idle.is_ok(), "queue stayed busy");
}

#[tokio::test]
async fn test_writes_reach_http_store() {
    let server = empty_document_server(USER).await;
    mount_writes(&server, USER, "savings", 200).await;
    mount_writes(&server, USER, "history", 200).await;

    let engine = http_engine(server.uri()).await;
    assert_ok!(engine.sign_in(USER).await);
    assert_eq!(engine.monitor().status(), ConnectionStatus::Online);
    assert_eq!(engine.store().error_message().await, None);

    engine.store().set_quantity("1e", 3, USER).await;
    assert_eq!(engine.store().sync_status().await, SyncPhase::Success);
    assert_eq!(engine.queue().pending_count().await, 0);

    let requests = server.received_requests().await.unwrap_or_default();
    let puts: Vec<String> = requests
        .iter()
        .filter(|request| request.method.as_str() == "PUT")
        .map(|request| request.url.path().to_string())
        .collect();
    assert_eq!(puts.len(), 2);
    assert_eq!(puts[0], format!("/users/{}/savings/current", USER));
    assert!(puts[1].starts_with(&format!("/users/{}/history/", USER)));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_server_errors_are_queued_until_recovery() {
    let server = empty_document_server(USER).await;
    mount_writes(&server, USER, "savings", 503).await;
    mount_writes(&server, USER, "history", 503).await;

    let engine = http_engine(server.uri()).await;
    assert_ok!(engine.sign_in(USER).await);

    engine.store().set_quantity("2e", 1, USER).await;
    assert_eq!(engine.store().sync_status().await, SyncPhase::Error);
    assert_eq!(engine.queue().pending_count().await, 2);

    // let the auto-drain attempts triggered by the enqueues settle
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let queue = engine.queue().clone();
    eventually(|| {
        let queue = queue.clone();
        async move { !queue.is_draining() }
    })
    .await;

    server.reset().await;
    mount_empty_user(&server, USER).await;
    mount_writes(&server, USER, "savings", 200).await;
    mount_writes(&server, USER, "history", 200).await;

    assert_ok!(engine.sync_now().await);
    eventually(|| {
        let queue = queue.clone();
        async move { queue.pending_count().await == 0 }
    })
    .await;
    assert!(engine.monitor().sync_status().await.last_sync_time.is_some());

    engine.shutdown().await;
}

#[tokio::test]
async fn test_hanging_writes_time_out_and_queue_recovers() {
    let server = empty_document_server(USER).await;
    mount_slow_writes(&server, USER, "savings", Duration::from_secs(30)).await;
    mount_slow_writes(&server, USER, "history", Duration::from_secs(30)).await;

    let config = assert_ok!(test_config()
        .server_url(server.uri())
        .request_timeout(Duration::from_millis(200))
        .build());
    let engine = assert_ok!(SyncEngine::new(config).await);
    assert_ok!(engine.sign_in(USER).await);

    let started = Instant::now();
    engine.store().set_quantity("5e", 2, USER).await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(engine.store().sync_status().await, SyncPhase::Error);
    assert!(engine.store().error_message().await.is_some());

    tokio::time::sleep(Duration::from_millis(100)).await;
    wait_until_idle(&engine).await;

    server.reset().await;
    mount_empty_user(&server, USER).await;
    mount_writes(&server, USER, "savings", 200).await;
    mount_writes(&server, USER, "history", 200).await;

    let queue = engine.queue().clone();
    eventually(|| {
        let queue = queue.clone();
        async move {
            queue.drain().await;
            queue.pending_count().await == 0
        }
    })
    .await;
    assert!(!engine.queue().is_draining());

    engine.shutdown().await;
}
