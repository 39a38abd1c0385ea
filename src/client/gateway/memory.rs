/**
 * In-Memory Document Store
 *
 * Reference backend holding documents in process. Every write is announced
 * on a broadcast channel and each subscription turns the announcements for
 * its `(user, collection)` pair into full collection snapshots.
 *
 * Faults can be injected per collection or globally so the offline paths
 * of the projection store and the sync queue can be exercised.
 */
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};

use super::{DocumentStore, Subscription};
use crate::shared::error::{Result, SyncError};
use crate::shared::event::{ChangeKind, CollectionSnapshot, DocumentChange, RemoteDocument};
use crate::shared::model::Collection;

/// Forced result of the next probes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Probe succeeds
    Reachable,
    /// Probe answers with a permission error
    PermissionDenied,
    /// Probe fails with a network error
    Unreachable,
    /// Probe never answers
    Hang,
}

#[derive(Debug, Clone)]
struct StoredEntry {
    document: RemoteDocument,
    seq: u64,
}

type Key = (String, Collection);
type Documents = RwLock<HashMap<Key, HashMap<String, StoredEntry>>>;

/// Documents of one collection, newest first
async fn ordered_documents(documents: &Documents, user_id: &str, collection: Collection) -> Vec<RemoteDocument> {
    let collections = documents.read().await;
    let mut entries: Vec<&StoredEntry> = collections
        .get(&(user_id.to_string(), collection))
        .map(|docs| docs.values().collect())
        .unwrap_or_default();
    entries.sort_by(|a, b| {
        b.document
            .created_at
            .cmp(&a.document.created_at)
            .then(b.seq.cmp(&a.seq))
    });
    entries.into_iter().map(|entry| entry.document.clone()).collect()
}

/// In-process [`DocumentStore`]
#[derive(Debug)]
pub struct InMemoryDocumentStore {
    collections: Arc<Documents>,
    changes: broadcast::Sender<DocumentChange>,
    seq: AtomicU64,
    failing: RwLock<HashSet<Collection>>,
    unreachable: AtomicBool,
    probe_override: RwLock<Option<ProbeOutcome>>,
    write_delay_ms: AtomicU64,
    writes: AtomicUsize,
    probes: AtomicUsize,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
            changes,
            seq: AtomicU64::new(0),
            failing: RwLock::new(HashSet::new()),
            unreachable: AtomicBool::new(false),
            probe_override: RwLock::new(None),
            write_delay_ms: AtomicU64::new(0),
            writes: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
        }
    }

    /// Make reads and writes of `collection` fail with a network error
    pub async fn fail_collection(&self, collection: Collection) {
        self.failing.write().await.insert(collection);
    }

    /// Undo [`fail_collection`](Self::fail_collection)
    pub async fn heal_collection(&self, collection: Collection) {
        self.failing.write().await.remove(&collection);
    }

    /// Make every operation fail with a network error
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Force the outcome of subsequent probes, `None` restores the default
    pub async fn set_probe_outcome(&self, outcome: Option<ProbeOutcome>) {
        *self.probe_override.write().await = outcome;
    }

    /// Hold every write for `delay` before it is applied
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Probes received so far
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.changes.receiver_count()
    }

    async fn check(&self, collection: Collection) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SyncError::network("remote store unreachable"));
        }
        if self.failing.read().await.contains(&collection) {
            return Err(SyncError::network(format!("{} temporarily unavailable", collection)));
        }
        Ok(())
    }

    async fn delay_write(&self) {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    fn announce(&self, user_id: &str, collection: Collection, id: &str, kind: ChangeKind) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        // no receivers is fine
        let _ = self.changes.send(DocumentChange::new(user_id, collection, id, kind));
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, user_id: &str, collection: Collection, id: &str) -> Result<Option<RemoteDocument>> {
        self.check(collection).await?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(&(user_id.to_string(), collection))
            .and_then(|docs| docs.get(id))
            .map(|entry| entry.document.clone()))
    }

    async fn upsert(&self, user_id: &str, collection: Collection, id: &str, data: Value) -> Result<()> {
        self.delay_write().await;
        self.check(collection).await?;
        {
            let mut collections = self.collections.write().await;
            let docs = collections.entry((user_id.to_string(), collection)).or_default();
            let now = Utc::now();
            match docs.get_mut(id) {
                Some(entry) => {
                    entry.document.data = data;
                    entry.document.updated_at = now;
                }
                None => {
                    let seq = self.seq.fetch_add(1, Ordering::SeqCst);
                    docs.insert(
                        id.to_string(),
                        StoredEntry {
                            document: RemoteDocument {
                                id: id.to_string(),
                                data,
                                created_at: now,
                                updated_at: now,
                            },
                            seq,
                        },
                    );
                }
            }
        }
        self.announce(user_id, collection, id, ChangeKind::Upserted);
        Ok(())
    }

    async fn update(&self, user_id: &str, collection: Collection, id: &str, patch: Value) -> Result<()> {
        self.delay_write().await;
        self.check(collection).await?;
        let Value::Object(fields) = patch else {
            return Err(SyncError::validation("patch", "update payload must be an object"));
        };
        {
            let mut collections = self.collections.write().await;
            let entry = collections
                .get_mut(&(user_id.to_string(), collection))
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| SyncError::not_found(collection.as_str(), id))?;

            match &mut entry.document.data {
                Value::Object(existing) => {
                    for (key, value) in fields {
                        existing.insert(key, value);
                    }
                }
                other => *other = Value::Object(fields),
            }
            entry.document.updated_at = Utc::now();
        }
        self.announce(user_id, collection, id, ChangeKind::Updated);
        Ok(())
    }

    async fn delete(&self, user_id: &str, collection: Collection, id: &str) -> Result<()> {
        self.delay_write().await;
        self.check(collection).await?;
        let removed = {
            let mut collections = self.collections.write().await;
            collections
                .get_mut(&(user_id.to_string(), collection))
                .and_then(|docs| docs.remove(id))
                .is_some()
        };
        if removed {
            self.announce(user_id, collection, id, ChangeKind::Deleted);
        }
        Ok(())
    }

    async fn list(&self, user_id: &str, collection: Collection, limit: Option<usize>) -> Result<Vec<RemoteDocument>> {
        self.check(collection).await?;
        let mut documents = ordered_documents(&self.collections, user_id, collection).await;
        if let Some(limit) = limit {
            documents.truncate(limit);
        }
        Ok(documents)
    }

    async fn subscribe(
        &self,
        user_id: &str,
        collection: Collection,
        sink: mpsc::UnboundedSender<CollectionSnapshot>,
    ) -> Result<Subscription> {
        self.check(collection).await?;

        // register before reading the initial snapshot so no change slips in between
        let mut changes = self.changes.subscribe();
        let initial = ordered_documents(&self.collections, user_id, collection).await;
        let user_id = user_id.to_string();
        let collections = Arc::clone(&self.collections);

        let task = tokio::spawn(async move {
            let first = CollectionSnapshot {
                user_id: user_id.clone(),
                collection,
                documents: initial,
            };
            if sink.send(first).is_err() {
                return;
            }

            loop {
                match changes.recv().await {
                    Ok(change) if !change.concerns(&user_id, collection) => continue,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                let documents = ordered_documents(&collections, &user_id, collection).await;
                let snapshot = CollectionSnapshot {
                    user_id: user_id.clone(),
                    collection,
                    documents,
                };
                if sink.send(snapshot).is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::new(collection, task))
    }

    async fn probe(&self) -> Result<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let forced = *self.probe_override.read().await;
        match forced {
            Some(ProbeOutcome::Reachable) => Ok(()),
            Some(ProbeOutcome::PermissionDenied) => Err(SyncError::permission("missing or insufficient permissions")),
            Some(ProbeOutcome::Unreachable) => Err(SyncError::network("probe failed")),
            Some(ProbeOutcome::Hang) => std::future::pending().await,
            None if self.unreachable.load(Ordering::SeqCst) => Err(SyncError::network("remote store unreachable")),
            None => Ok(()),
        }
    }
}
