//! Offline writes, reconnects and restarts

use pretty_assertions::assert_eq;
use std::sync::Arc;

use piggybank_sync::client::gateway::{DocumentStore, InMemoryDocumentStore};
use piggybank_sync::client::local_db::SqliteStorage;
use piggybank_sync::client::state::SyncPhase;
use piggybank_sync::client::sync::ConnectionStatus;
use piggybank_sync::shared::model::Collection;

use crate::assert_ok;
use crate::common::*;

#[tokio::test]
async fn test_offline_writes_drain_on_reconnect() {
    let f = signed_in_engine().await;
    let writes_before = f.remote.write_count();

    assert_eq!(f.engine.monitor().set_host_online(false).await, ConnectionStatus::Offline);
    f.engine.store().set_quantity("2e", 2, USER).await;

    assert_eq!(f.engine.store().grand_total().await, 400);
    assert_eq!(f.engine.store().sync_status().await, SyncPhase::Idle);
    assert_eq!(f.engine.queue().pending_count().await, 2);
    assert_eq!(f.remote.write_count(), writes_before);
    assert_eq!(f.engine.monitor().sync_status().await.pending_changes, 2);

    assert_eq!(f.engine.monitor().set_host_online(true).await, ConnectionStatus::Online);

    let queue = f.engine.queue().clone();
    eventually(|| {
        let queue = queue.clone();
        async move { queue.pending_count().await == 0 }
    })
    .await;
    let savings = assert_ok!(f.engine.gateway().get_savings(USER).await).expect("savings document");
    assert_eq!(savings.total_eur, 400);
    assert_eq!(assert_ok!(f.engine.gateway().list_history(USER).await).len(), 1);
}

#[tokio::test]
async fn test_unreachable_store_is_retried_by_probe_loop() {
    let f = signed_in_engine().await;
    f.remote.set_unreachable(true);

    f.engine.store().set_quantity("1e", 5, USER).await;
    assert!(f.engine.store().error_message().await.is_some());
    assert_eq!(f.engine.queue().pending_count().await, 2);
    assert_eq!(f.engine.monitor().status(), ConnectionStatus::Disconnected);

    f.remote.set_unreachable(false);
    let queue = f.engine.queue().clone();
    eventually(|| {
        let queue = queue.clone();
        async move { queue.pending_count().await == 0 }
    })
    .await;
    assert_eq!(f.engine.monitor().status(), ConnectionStatus::Online);
    let savings = assert_ok!(f.engine.gateway().get_savings(USER).await).expect("savings document");
    assert_eq!(savings.total_eur, 500);
}

#[tokio::test]
async fn test_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("local.db");
    let remote = Arc::new(InMemoryDocumentStore::new());

    {
        let storage = Arc::new(assert_ok!(SqliteStorage::open(&db_path).await));
        let engine = engine_with(assert_ok!(test_config().build()), storage, remote.clone()).await;
        assert_ok!(engine.sign_in(USER).await);
        engine.monitor().set_host_online(false).await;
        engine.store().set_quantity("50e", 1, USER).await;
        assert_eq!(engine.queue().pending_count().await, 2);
        engine.shutdown().await;
    }
    assert!(assert_ok!(remote.list(USER, Collection::History, None).await).is_empty());

    let storage = Arc::new(assert_ok!(SqliteStorage::open(&db_path).await));
    let engine = engine_with(assert_ok!(test_config().build()), storage, remote.clone()).await;
    assert_eq!(engine.queue().pending_count().await, 2);
    assert_ok!(engine.sign_in(USER).await);

    let queue = engine.queue().clone();
    eventually(|| {
        let queue = queue.clone();
        async move { queue.pending_count().await == 0 }
    })
    .await;
    let savings = assert_ok!(engine.gateway().get_savings(USER).await).expect("savings document");
    assert_eq!(savings.total_eur, 5000);
}
