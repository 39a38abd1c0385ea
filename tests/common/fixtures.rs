//! Engine fixtures
//!
//! Every fixture runs against in-memory backends unless a test hands in
//! its own storage.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use piggybank_sync::client::gateway::InMemoryDocumentStore;
use piggybank_sync::client::local_db::{LocalStorage, MemoryStorage};
use piggybank_sync::client::SyncEngine;
use piggybank_sync::shared::config::{AppConfig, AppConfigBuilder};

pub const USER: &str = "user-1";

pub struct TestEngine {
    pub engine: SyncEngine,
    pub remote: Arc<InMemoryDocumentStore>,
    pub storage: Arc<MemoryStorage>,
}

/// Short probe timings so reconnect tests finish quickly
pub fn test_config() -> AppConfigBuilder {
    AppConfig::builder()
        .probe_timeout(Duration::from_millis(200))
        .probe_interval(Duration::from_millis(50))
        .max_retries(3)
}

pub async fn engine_with(
    config: AppConfig,
    storage: Arc<dyn LocalStorage>,
    remote: Arc<InMemoryDocumentStore>,
) -> SyncEngine {
    SyncEngine::with_parts(config, storage, remote)
        .await
        .expect("engine builds over in-memory parts")
}

pub async fn test_engine() -> TestEngine {
    let remote = Arc::new(InMemoryDocumentStore::new());
    let storage = Arc::new(MemoryStorage::new());
    let config = test_config().build().expect("test config is valid");
    let engine = engine_with(config, storage.clone(), remote.clone()).await;
    TestEngine { engine, remote, storage }
}

pub async fn signed_in_engine() -> TestEngine {
    let fixture = test_engine().await;
    fixture.engine.sign_in(USER).await.expect("sign in");
    fixture
}

/// Poll `check` until it holds, panicking after about a second
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
