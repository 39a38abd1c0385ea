/**
 * Sync Engine
 *
 * Composition root of the local-first client. Owns the local storage, the
 * document gateway, the connection monitor, the sync queue, the projection
 * store and the rate limiters, plus the background tasks tying them together.
 *
 * # Lifecycle
 *
 * 1. `SyncEngine::new` builds every component and restores the persisted queue
 * 2. `start` spawns the probe loop and the auto-drain task
 * 3. `sign_in` loads the user's data and subscribes to live changes
 * 4. `sign_out` releases subscriptions, stops the timers and resets state
 * 5. `shutdown` stops everything without touching state
 */
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::client::gateway::{DocumentGateway, DocumentStore, HttpDocumentStore, InMemoryDocumentStore};
use crate::client::history::{self, ExportFormat, HistoryFilters};
use crate::client::local_db::{self, LocalStorage, MemoryStorage, SqliteStorage};
use crate::client::migration::{self, LegacySnapshot, MigrationOptions, MigrationReport};
use crate::client::offline::SyncQueue;
use crate::client::rate_limit::RateLimiter;
use crate::client::state::RealtimeStore;
use crate::client::sync::{ConnectionMonitor, ConnectionStatus};
use crate::shared::config::AppConfig;
use crate::shared::error::{Result, SyncError};

pub struct SyncEngine {
    config: AppConfig,
    storage: Arc<dyn LocalStorage>,
    gateway: DocumentGateway,
    monitor: Arc<ConnectionMonitor>,
    queue: Arc<SyncQueue>,
    store: Arc<RealtimeStore>,
    sync_limiter: RateLimiter,
    export_limiter: RateLimiter,
    user_id: RwLock<Option<String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("server_url", &self.config.server_url)
            .field("status", &self.monitor.status())
            .finish()
    }
}

impl SyncEngine {
    /// Build from configuration
    ///
    /// Uses SQLite when a database path is configured and the HTTP backend
    /// when a server URL is configured, in-memory stand-ins otherwise.
    pub async fn new(config: AppConfig) -> Result<Self> {
        let storage: Arc<dyn LocalStorage> = match &config.database_path {
            Some(path) => Arc::new(SqliteStorage::open(path).await?),
            None => {
                tracing::warn!("[Engine] No database path configured, local data will not survive a restart");
                Arc::new(MemoryStorage::new())
            }
        };
        let remote: Arc<dyn DocumentStore> = match &config.server_url {
            Some(url) => Arc::new(HttpDocumentStore::new(url, config.poll_interval, config.request_timeout)?),
            None => {
                tracing::warn!("[Engine] No server URL configured, using the in-memory document store");
                Arc::new(InMemoryDocumentStore::new())
            }
        };
        Self::with_parts(config, storage, remote).await
    }

    /// Build around existing storage and remote backends
    pub async fn with_parts(
        config: AppConfig,
        storage: Arc<dyn LocalStorage>,
        remote: Arc<dyn DocumentStore>,
    ) -> Result<Self> {
        let gateway = DocumentGateway::new(remote, config.history_limit);
        let monitor = Arc::new(ConnectionMonitor::new(
            gateway.clone(),
            config.probe_timeout,
            config.probe_interval,
        ));
        let queue = Arc::new(SyncQueue::new(
            storage.clone(),
            gateway.clone(),
            monitor.clone(),
            config.max_retries,
        ));
        match queue.restore().await {
            Ok(0) => {}
            Ok(count) => tracing::info!("[Engine] Restored {} queued writes", count),
            Err(e) => tracing::error!("[Engine] Could not restore the sync queue, starting empty: {}", e),
        }
        let store = Arc::new(RealtimeStore::new(
            gateway.clone(),
            queue.clone(),
            monitor.clone(),
            config.reconcile,
        ));

        Ok(Self {
            sync_limiter: RateLimiter::new("sync", config.sync_rate_limit),
            export_limiter: RateLimiter::new("export", config.export_rate_limit),
            config,
            storage,
            gateway,
            monitor,
            queue,
            store,
            user_id: RwLock::new(None),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn LocalStorage> {
        &self.storage
    }

    pub fn gateway(&self) -> &DocumentGateway {
        &self.gateway
    }

    pub fn monitor(&self) -> &Arc<ConnectionMonitor> {
        &self.monitor
    }

    pub fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    pub fn store(&self) -> &Arc<RealtimeStore> {
        &self.store
    }

    pub async fn current_user(&self) -> Option<String> {
        self.user_id.read().await.clone()
    }

    async fn require_user(&self) -> Result<String> {
        self.current_user().await.ok_or(SyncError::NotAuthenticated)
    }

    pub async fn is_running(&self) -> bool {
        !self.tasks.lock().await.is_empty()
    }

    /// Spawn the background tasks and run a first probe, a no-op while running
    pub async fn start(&self) -> ConnectionStatus {
        {
            let mut tasks = self.tasks.lock().await;
            if tasks.is_empty() {
                self.monitor.track_pending(self.queue.subscribe_pending()).await;
                tasks.push(self.monitor.spawn_retry_loop());
                tasks.push(self.queue.spawn_auto_drain());
                tracing::info!("[Engine] Background tasks started");
            }
        }
        self.monitor.check_connection().await
    }

    async fn stop_tasks(&self) {
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        let count = tasks.len();
        for task in tasks {
            task.abort();
        }
        if count > 0 {
            tracing::info!("[Engine] Stopped {} background tasks", count);
        }
    }

    /// Start a session for `user_id`
    pub async fn sign_in(&self, user_id: &str) -> Result<()> {
        if user_id.trim().is_empty() {
            return Err(SyncError::NotAuthenticated);
        }
        let previous = self.current_user().await;
        if previous.as_deref().map_or(false, |previous| previous != user_id) {
            self.sign_out().await;
        }

        *self.user_id.write().await = Some(user_id.to_string());
        self.start().await;

        match local_db::last_sync_time(self.storage.as_ref()).await {
            Ok(Some(time)) => self.monitor.mark_synced(time).await,
            Ok(None) => {}
            Err(e) => tracing::warn!("[Engine] Could not read the last sync time: {}", e),
        }

        self.store.load_user_data(user_id).await;
        self.store.start_listening(user_id).await;
        tracing::info!("[Engine] Signed in {}", user_id);
        Ok(())
    }

    /// End the session and return the store to defaults
    ///
    /// Queued writes stay persisted and are delivered after the next start.
    pub async fn sign_out(&self) {
        let user = self.user_id.write().await.take();
        self.store.stop_listening().await;
        self.stop_tasks().await;
        self.store.reset().await;
        if let Some(user) = user {
            tracing::info!("[Engine] Signed out {}", user);
        }
    }

    /// Flush the queue and reload, limited per user
    pub async fn sync_now(&self) -> Result<()> {
        let user_id = self.require_user().await?;
        self.sync_limiter.acquire(&user_id).await?;

        if !self.store.sync_now(&user_id).await {
            tracing::info!("[Engine] Manual sync for {} did not complete", user_id);
            return Ok(());
        }
        if let Err(e) = local_db::set_last_sync_time(self.storage.as_ref(), Utc::now()).await {
            tracing::warn!("[Engine] Could not persist the last sync time: {}", e);
        }
        Ok(())
    }

    /// Render the current history, limited per user
    pub async fn export_history(&self, format: ExportFormat, filters: Option<&HistoryFilters>) -> Result<String> {
        let user_id = self.require_user().await?;
        self.export_limiter.acquire(&user_id).await?;
        history::export_history(&self.store.history().await, format, filters)
    }

    /// Copy a stored legacy snapshot to the signed-in user's remote data
    ///
    /// Returns `None` when there is nothing to migrate. The snapshot is
    /// removed once every selected slice was written.
    pub async fn migrate_legacy(&self, options: MigrationOptions) -> Result<Option<MigrationReport>> {
        let user_id = self.require_user().await?;
        let Some(snapshot) = LegacySnapshot::load(self.storage.as_ref()).await? else {
            return Ok(None);
        };

        let report = migration::migrate_to_remote(&self.gateway, &user_id, snapshot, options).await?;
        LegacySnapshot::clear(self.storage.as_ref()).await?;
        self.store.load_user_data(&user_id).await;
        Ok(Some(report))
    }

    /// Stop subscriptions and background tasks, keeping state
    pub async fn shutdown(&self) {
        self.store.stop_listening().await;
        self.stop_tasks().await;
        tracing::info!("[Engine] Shut down");
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
