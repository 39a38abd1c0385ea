//! # Remote Document Gateway
//!
//! The only part of the client that talks to the remote document store.
//!
//! ## Architecture
//!
//! - **`DocumentStore`**: schema-less backend trait keyed by
//!   `(user_id, collection, document_id)`
//! - **`InMemoryDocumentStore`**: reference backend with fault injection
//! - **`HttpDocumentStore`**: REST backend over `reqwest`, subscriptions by polling
//! - **`DocumentGateway`**: typed per-collection facade used by the projection store
//!
//! Write failures propagate to the caller as typed [`SyncError`]s and are
//! never retried here. Retrying is the sync queue's job.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use piggybank_sync::client::gateway::{DocumentGateway, InMemoryDocumentStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> piggybank_sync::shared::Result<()> {
//! let gateway = DocumentGateway::new(Arc::new(InMemoryDocumentStore::new()), 100);
//! let history = gateway.list_history("user-1").await?;
//! # Ok(())
//! # }
//! ```

pub mod http;
pub mod memory;

pub use http::HttpDocumentStore;
pub use memory::{InMemoryDocumentStore, ProbeOutcome};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::shared::currency::{calculate_total, convert_eur_to_bgn};
use crate::shared::error::{Result, SyncError};
use crate::shared::event::{CollectionSnapshot, RemoteDocument};
use crate::shared::model::{
    Collection, Denomination, GoalPatch, HistoryEntry, HistoryPatch, HistoryStatistics, Preferences,
    ProfileDocument, SavingsDocument, SavingsGoal,
};

/// Document id of the single profile document
pub const PROFILE_DOCUMENT_ID: &str = "profile";
/// Document id of the single savings document
pub const SAVINGS_DOCUMENT_ID: &str = "current";

/// Schema-less remote document backend
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch one document
    async fn get(&self, user_id: &str, collection: Collection, id: &str) -> Result<Option<RemoteDocument>>;

    /// Create or replace a document
    async fn upsert(&self, user_id: &str, collection: Collection, id: &str, data: Value) -> Result<()>;

    /// Shallow-merge top-level fields into an existing document
    async fn update(&self, user_id: &str, collection: Collection, id: &str, patch: Value) -> Result<()>;

    /// Remove a document, absent documents are not an error
    async fn delete(&self, user_id: &str, collection: Collection, id: &str) -> Result<()>;

    /// Documents newest first, optionally bounded
    async fn list(&self, user_id: &str, collection: Collection, limit: Option<usize>) -> Result<Vec<RemoteDocument>>;

    /// Push an initial snapshot and then one per change into `sink`
    async fn subscribe(
        &self,
        user_id: &str,
        collection: Collection,
        sink: mpsc::UnboundedSender<CollectionSnapshot>,
    ) -> Result<Subscription>;

    /// Cheap reachability check
    async fn probe(&self) -> Result<()>;
}

/// Handle of a live subscription
///
/// Dropping the handle cancels the subscription.
#[derive(Debug)]
pub struct Subscription {
    collection: Collection,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(collection: Collection, task: JoinHandle<()>) -> Self {
        Self {
            collection,
            task: Some(task),
        }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// Whether the delivery task is still running
    pub fn is_active(&self) -> bool {
        self.task.as_ref().map(|task| !task.is_finished()).unwrap_or(false)
    }

    /// Stop delivering snapshots
    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Typed facade over a [`DocumentStore`]
///
/// Holds no state besides the backend handle and the history fetch bound.
#[derive(Clone)]
pub struct DocumentGateway {
    store: Arc<dyn DocumentStore>,
    history_limit: usize,
}

impl std::fmt::Debug for DocumentGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentGateway")
            .field("history_limit", &self.history_limit)
            .finish()
    }
}

impl DocumentGateway {
    pub fn new(store: Arc<dyn DocumentStore>, history_limit: usize) -> Self {
        Self { store, history_limit }
    }

    /// Upper bound on fetched history entries
    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Underlying backend
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub async fn probe(&self) -> Result<()> {
        self.store.probe().await
    }

    pub async fn subscribe(
        &self,
        user_id: &str,
        collection: Collection,
        sink: mpsc::UnboundedSender<CollectionSnapshot>,
    ) -> Result<Subscription> {
        self.store.subscribe(user_id, collection, sink).await
    }

    // ---- profile ----

    pub async fn get_profile(&self, user_id: &str) -> Result<Option<ProfileDocument>> {
        match self.store.get(user_id, Collection::Profile, PROFILE_DOCUMENT_ID).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    /// Replace the preferences field of the profile
    pub async fn update_preferences(&self, user_id: &str, preferences: &Preferences) -> Result<()> {
        self.update_profile_field(user_id, "preferences", preferences).await
    }

    /// Replace the statistics field of the profile
    pub async fn update_statistics(&self, user_id: &str, statistics: &HistoryStatistics) -> Result<()> {
        self.update_profile_field(user_id, "statistics", statistics).await
    }

    async fn update_profile_field<T: Serialize>(&self, user_id: &str, field: &str, value: &T) -> Result<()> {
        let mut patch = serde_json::Map::new();
        patch.insert(field.to_string(), serde_json::to_value(value)?);
        patch.insert("updatedAt".to_string(), json!(Utc::now()));
        let patch = Value::Object(patch);

        match self
            .store
            .update(user_id, Collection::Profile, PROFILE_DOCUMENT_ID, patch.clone())
            .await
        {
            // first write for this user creates the profile
            Err(SyncError::NotFoundError { .. }) => {
                self.store
                    .upsert(user_id, Collection::Profile, PROFILE_DOCUMENT_ID, patch)
                    .await
            }
            other => other,
        }
    }

    // ---- savings ----

    pub async fn get_savings(&self, user_id: &str) -> Result<Option<SavingsDocument>> {
        match self.store.get(user_id, Collection::Savings, SAVINGS_DOCUMENT_ID).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    /// Store the full denomination list with its totals
    pub async fn save_savings(&self, user_id: &str, denominations: &[Denomination]) -> Result<()> {
        let total_eur = calculate_total(denominations);
        let document = SavingsDocument {
            denominations: denominations.to_vec(),
            total_eur,
            total_bgn: convert_eur_to_bgn(total_eur),
            updated_at: Utc::now(),
        };
        self.store
            .upsert(user_id, Collection::Savings, SAVINGS_DOCUMENT_ID, serde_json::to_value(&document)?)
            .await
    }

    // ---- history ----

    pub async fn add_history_entry(&self, user_id: &str, entry: &HistoryEntry) -> Result<()> {
        self.store
            .upsert(user_id, Collection::History, &entry.id, serde_json::to_value(entry)?)
            .await
    }

    /// Most recent entries, bounded by the configured history limit
    pub async fn list_history(&self, user_id: &str) -> Result<Vec<HistoryEntry>> {
        let documents = self
            .store
            .list(user_id, Collection::History, Some(self.history_limit))
            .await?;
        Ok(decode_documents(Collection::History, &documents))
    }

    pub async fn update_history_entry(&self, user_id: &str, id: &str, patch: &HistoryPatch) -> Result<()> {
        self.store
            .update(user_id, Collection::History, id, serde_json::to_value(patch)?)
            .await
    }

    pub async fn delete_history_entry(&self, user_id: &str, id: &str) -> Result<()> {
        self.store.delete(user_id, Collection::History, id).await
    }

    pub async fn clear_history(&self, user_id: &str) -> Result<()> {
        self.clear_collection(user_id, Collection::History).await
    }

    // ---- goals ----

    pub async fn add_goal(&self, user_id: &str, goal: &SavingsGoal) -> Result<()> {
        self.store
            .upsert(user_id, Collection::Goals, &goal.id, serde_json::to_value(goal)?)
            .await
    }

    pub async fn list_goals(&self, user_id: &str) -> Result<Vec<SavingsGoal>> {
        let documents = self.store.list(user_id, Collection::Goals, None).await?;
        Ok(decode_documents(Collection::Goals, &documents))
    }

    pub async fn update_goal(&self, user_id: &str, id: &str, patch: &GoalPatch) -> Result<()> {
        self.store
            .update(user_id, Collection::Goals, id, serde_json::to_value(patch)?)
            .await
    }

    pub async fn delete_goal(&self, user_id: &str, id: &str) -> Result<()> {
        self.store.delete(user_id, Collection::Goals, id).await
    }

    pub async fn clear_goals(&self, user_id: &str) -> Result<()> {
        self.clear_collection(user_id, Collection::Goals).await
    }

    async fn clear_collection(&self, user_id: &str, collection: Collection) -> Result<()> {
        let documents = self.store.list(user_id, collection, None).await?;
        for doc in documents {
            self.store.delete(user_id, collection, &doc.id).await?;
        }
        Ok(())
    }
}

/// Decode every document of a list, skipping malformed ones
pub fn decode_documents<T: serde::de::DeserializeOwned>(collection: Collection, documents: &[RemoteDocument]) -> Vec<T> {
    documents
        .iter()
        .filter_map(|doc| match doc.decode() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("[Gateway] Skipping malformed {} document {}: {}", collection, doc.id, e);
                None
            }
        })
        .collect()
}
