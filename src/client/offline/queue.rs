//! # Sync Queue
//!
//! Durable FIFO of remote writes that have not been delivered yet.
//!
//! ## Features
//!
//! - **Persistent Queue**: every transition, retry increments included, is
//!   flushed to local storage and restored on start-up
//! - **Strict Ordering**: items drain in enqueue order
//! - **Bounded Retry**: an item failing `max_retries` drains is dropped and
//!   reported on the dropped-items channel
//! - **Single Drain**: at most one drain cycle runs at any time
//! - **Auto Drain**: a background worker drains after each enqueue and on
//!   every transition into `Online`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use piggybank_sync::client::offline::{SyncMutation, SyncQueue};
//! # use std::sync::Arc;
//!
//! # async fn example(queue: Arc<SyncQueue>) -> piggybank_sync::shared::Result<()> {
//! let worker = queue.spawn_auto_drain();
//! queue.enqueue("user-1", SyncMutation::ClearGoals).await?;
//!
//! let report = queue.drain().await;
//! println!("{} delivered, {} dropped", report.succeeded, report.dropped.len());
//! worker.abort();
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Notify, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::mutation::SyncMutation;
use crate::client::gateway::DocumentGateway;
use crate::client::local_db::{self, LocalStorage};
use crate::client::sync::connection::{ConnectionMonitor, ConnectionStatus};
use crate::shared::error::Result;
use crate::shared::model::Collection;

/// Storage key of the persisted queue
pub const QUEUE_STORAGE_KEY: &str = "sync:queue";

/// Pending remote write with retry bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    pub id: Uuid,
    /// User the write was issued for
    pub user_id: String,
    pub mutation: SyncMutation,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Outcome of one drain cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    /// Items a delivery was attempted for
    pub attempted: usize,
    /// Items delivered and removed
    pub succeeded: usize,
    /// Items that failed and stay queued
    pub retained: usize,
    /// Items removed after exhausting their retries
    pub dropped: Vec<SyncQueueItem>,
}

/// Clears the draining flag however the drain ends
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Durable retry queue for remote writes
pub struct SyncQueue {
    items: RwLock<VecDeque<SyncQueueItem>>,
    storage: Arc<dyn LocalStorage>,
    gateway: DocumentGateway,
    monitor: Arc<ConnectionMonitor>,
    max_retries: u32,
    draining: AtomicBool,
    wake: Notify,
    pending: watch::Sender<usize>,
    dropped: broadcast::Sender<SyncQueueItem>,
}

impl std::fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncQueue")
            .field("pending", &*self.pending.borrow())
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl SyncQueue {
    pub fn new(
        storage: Arc<dyn LocalStorage>,
        gateway: DocumentGateway,
        monitor: Arc<ConnectionMonitor>,
        max_retries: u32,
    ) -> Self {
        let (pending, _) = watch::channel(0);
        let (dropped, _) = broadcast::channel(64);
        Self {
            items: RwLock::new(VecDeque::new()),
            storage,
            gateway,
            monitor,
            max_retries,
            draining: AtomicBool::new(false),
            wake: Notify::new(),
            pending,
            dropped,
        }
    }

    /// Load the persisted queue, replacing the in-memory one
    pub async fn restore(&self) -> Result<usize> {
        let restored: VecDeque<SyncQueueItem> = local_db::read_json(self.storage.as_ref(), QUEUE_STORAGE_KEY)
            .await?
            .unwrap_or_default();
        let count = restored.len();

        let mut items = self.items.write().await;
        *items = restored;
        self.pending.send_replace(items.len());
        if count > 0 {
            tracing::info!("[SyncQueue] Restored {} pending mutations", count);
        }
        Ok(count)
    }

    /// Append a mutation
    ///
    /// Rejects malformed mutations. The queue is persisted before this
    /// returns and the auto-drain worker is woken.
    pub async fn enqueue(&self, user_id: &str, mutation: SyncMutation) -> Result<Uuid> {
        mutation.validate()?;

        let item = SyncQueueItem {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            mutation,
            timestamp: Utc::now(),
            retry_count: 0,
            max_retries: self.max_retries,
            last_error: None,
        };
        let id = item.id;

        {
            let mut items = self.items.write().await;
            tracing::debug!(
                "[SyncQueue] Enqueued {:?} on {} ({} pending)",
                item.mutation.kind(),
                item.mutation.collection(),
                items.len() + 1
            );
            items.push_back(item);
            self.persist(&items).await;
        }

        self.wake.notify_one();
        Ok(id)
    }

    /// Deliver pending items in order
    ///
    /// Does nothing when a drain is already running, the monitor is not
    /// online, or the queue is empty. Never fails: per-item errors only
    /// change the queue.
    pub async fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();

        if self.draining.swap(true, Ordering::SeqCst) {
            tracing::debug!("[SyncQueue] Drain already in progress");
            return report;
        }
        let _guard = DrainGuard(&self.draining);

        if !self.monitor.is_online() {
            return report;
        }

        let batch: Vec<Uuid> = self.items.read().await.iter().map(|item| item.id).collect();
        if batch.is_empty() {
            return report;
        }
        tracing::info!("[SyncQueue] Draining {} mutations", batch.len());

        for id in batch {
            // cleared or removed while an earlier item was in flight
            let Some(item) = self.find(id).await else {
                continue;
            };
            report.attempted += 1;

            let outcome = item.mutation.apply(&self.gateway, &item.user_id).await;

            let mut items = self.items.write().await;
            let Some(position) = items.iter().position(|queued| queued.id == id) else {
                continue;
            };

            match outcome {
                Ok(()) => {
                    items.remove(position);
                    report.succeeded += 1;
                }
                Err(e) => {
                    let queued = &mut items[position];
                    queued.retry_count += 1;
                    queued.last_error = Some(e.to_string());

                    if queued.retry_count >= queued.max_retries {
                        if let Some(dropped) = items.remove(position) {
                            tracing::error!(
                                "[SyncQueue] Dropping {:?} on {} ({}) after {} attempts: {}",
                                dropped.mutation.kind(),
                                dropped.mutation.collection(),
                                dropped.id,
                                dropped.retry_count,
                                e
                            );
                            let _ = self.dropped.send(dropped.clone());
                            report.dropped.push(dropped);
                        }
                    } else {
                        tracing::warn!(
                            "[SyncQueue] Attempt {}/{} for {} failed: {}",
                            queued.retry_count,
                            queued.max_retries,
                            queued.id,
                            e
                        );
                        report.retained += 1;
                    }
                }
            }
            self.persist(&items).await;
        }

        report
    }

    /// Remove every pending item
    pub async fn clear(&self) {
        let mut items = self.items.write().await;
        items.clear();
        self.persist(&items).await;
    }

    pub async fn pending_count(&self) -> usize {
        self.items.read().await.len()
    }

    /// Copy of the pending items in order
    pub async fn items(&self) -> Vec<SyncQueueItem> {
        self.items.read().await.iter().cloned().collect()
    }

    /// Collections with undelivered writes for `user_id`
    pub async fn pending_collections(&self, user_id: &str) -> HashSet<Collection> {
        self.items
            .read()
            .await
            .iter()
            .filter(|item| item.user_id == user_id)
            .map(|item| item.mutation.collection())
            .collect()
    }

    /// Queue length updates
    pub fn subscribe_pending(&self) -> watch::Receiver<usize> {
        self.pending.subscribe()
    }

    /// Items dropped after exhausting their retries
    pub fn subscribe_dropped(&self) -> broadcast::Receiver<SyncQueueItem> {
        self.dropped.subscribe()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Drain after every enqueue and whenever the monitor comes online
    pub fn spawn_auto_drain(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        let mut status = self.monitor.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = status.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if *status.borrow_and_update() != ConnectionStatus::Online {
                            continue;
                        }
                        tracing::debug!("[SyncQueue] Connection restored, draining");
                    }
                    _ = queue.wake.notified() => {}
                }
                queue.drain().await;
            }
        })
    }

    async fn find(&self, id: Uuid) -> Option<SyncQueueItem> {
        self.items.read().await.iter().find(|item| item.id == id).cloned()
    }

    async fn persist(&self, items: &VecDeque<SyncQueueItem>) {
        self.pending.send_replace(items.len());
        if let Err(e) = local_db::write_json(self.storage.as_ref(), QUEUE_STORAGE_KEY, items).await {
            tracing::error!("[SyncQueue] Failed to persist queue: {}", e);
        }
    }
}
