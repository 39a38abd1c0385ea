//! End-to-end sessions over the in-memory document store

use pretty_assertions::assert_eq;
use std::sync::Arc;

use piggybank_sync::client::history::ExportFormat;
use piggybank_sync::client::local_db::MemoryStorage;
use piggybank_sync::client::state::SyncPhase;
use piggybank_sync::shared::config::RateLimitPolicy;
use piggybank_sync::shared::error::SyncError;
use piggybank_sync::shared::model::{Collection, HistoryEntryType, Theme};

use crate::common::*;
use crate::{assert_approx_eq, assert_contains, assert_err, assert_ok};

#[tokio::test]
async fn test_counting_session_reaches_remote() {
    let f = signed_in_engine().await;
    let store = f.engine.store();

    store.set_quantity("1e", 1, USER).await;
    store.set_quantity("2e", 1, USER).await;
    store.set_quantity("50c", 2, USER).await;
    assert_eq!(store.sync_status().await, SyncPhase::Success);

    let settled = store.clone();
    eventually(|| {
        let store = settled.clone();
        async move { store.history().await.len() == 3 && store.grand_total().await == 400 }
    })
    .await;

    let history = store.history().await;
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|entry| entry.kind == HistoryEntryType::Snapshot));
    assert_eq!(history[0].total_eur, 400);
    assert_approx_eq!(history[0].total_bgn, 7.82, 0.01);

    let savings = assert_ok!(f.engine.gateway().get_savings(USER).await).expect("savings document");
    assert_eq!(savings.total_eur, 400);
    assert_eq!(assert_ok!(f.engine.gateway().list_history(USER).await).len(), 3);
    assert_eq!(f.engine.queue().pending_count().await, 0);
}

#[tokio::test]
async fn test_second_device_sees_changes() {
    let phone = signed_in_engine().await;
    let laptop_config = assert_ok!(test_config().build());
    let laptop = engine_with(laptop_config, Arc::new(MemoryStorage::new()), phone.remote.clone()).await;
    assert_ok!(laptop.sign_in(USER).await);

    phone.engine.store().set_quantity("5e", 2, USER).await;
    phone.engine.store().set_theme(Theme::Dark, USER).await;

    let laptop_store = laptop.store().clone();
    eventually(|| {
        let store = laptop_store.clone();
        async move {
            store.grand_total().await == 1000
                && store.history().await.len() == 1
                && store.preferences().await.theme == Theme::Dark
        }
    })
    .await;
}

#[tokio::test]
async fn test_partial_outage_on_sign_in() {
    let f = test_engine().await;
    f.remote.fail_collection(Collection::Goals).await;

    assert_ok!(f.engine.sign_in(USER).await);
    let state = f.engine.store().snapshot().await;
    assert!(state.data_loaded);
    assert!(state.goals.is_empty());
    assert_contains!(state.error_message.clone().unwrap_or_default(), "goals");

    f.engine.store().clear_error().await;
    assert_eq!(f.engine.store().error_message().await, None);
}

#[tokio::test]
async fn test_export_respects_rate_limit() {
    let remote = Arc::new(piggybank_sync::client::gateway::InMemoryDocumentStore::new());
    let config = assert_ok!(test_config()
        .export_rate_limit(RateLimitPolicy {
            max_attempts: 1,
            window: std::time::Duration::from_secs(60),
            block_duration: std::time::Duration::from_secs(60),
        })
        .build());
    let engine = engine_with(config, Arc::new(MemoryStorage::new()), remote).await;
    assert_ok!(engine.sign_in(USER).await);
    engine.store().set_quantity("10e", 1, USER).await;
    let store = engine.store().clone();
    eventually(|| {
        let store = store.clone();
        async move { store.history().await.len() == 1 }
    })
    .await;

    let json = assert_ok!(engine.export_history(ExportFormat::Json, None).await);
    assert_contains!(json, "\"totalEur\": 1000");
    assert_err!(engine.export_history(ExportFormat::Csv, None).await, SyncError::RateLimited { .. });
}

#[tokio::test]
async fn test_sign_out_clears_projection_but_keeps_remote() {
    let f = signed_in_engine().await;
    f.engine.store().set_quantity("20e", 1, USER).await;

    f.engine.sign_out().await;
    assert_eq!(f.engine.store().grand_total().await, 0);
    assert_err!(f.engine.sync_now().await, SyncError::NotAuthenticated);

    assert_ok!(f.engine.sign_in(USER).await);
    assert_eq!(f.engine.store().grand_total().await, 2000);
}
