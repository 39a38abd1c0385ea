/**
 * Remote Change Events
 *
 * Types pushed from a remote document store to its subscribers. A backend
 * announces every write as a `DocumentChange`; subscribers receive the full
 * state of the affected collection as a `CollectionSnapshot`.
 */
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::model::Collection;

/// Kind of write that touched a collection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Document created or replaced
    Upserted,
    /// Document partially updated
    Updated,
    /// Document removed
    Deleted,
}

/// A schema-less document as held by the remote store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument {
    /// Document id, unique within its collection
    pub id: String,
    /// Document body
    pub data: serde_json::Value,
    /// First write time, drives list ordering
    pub created_at: DateTime<Utc>,
    /// Last write time
    pub updated_at: DateTime<Utc>,
}

impl RemoteDocument {
    /// Decode the body into a typed record
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }
}

/// Notification that a single document changed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentChange {
    /// Owner of the collection
    pub user_id: String,
    /// Collection that changed
    pub collection: Collection,
    /// Affected document
    pub document_id: String,
    /// Write kind
    pub kind: ChangeKind,
    /// When the write was applied
    pub timestamp: DateTime<Utc>,
}

impl DocumentChange {
    pub fn new(
        user_id: impl Into<String>,
        collection: Collection,
        document_id: impl Into<String>,
        kind: ChangeKind,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            collection,
            document_id: document_id.into(),
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Whether a subscriber of `(user_id, collection)` must be notified
    pub fn concerns(&self, user_id: &str, collection: Collection) -> bool {
        self.user_id == user_id && self.collection == collection
    }
}

/// Full state of one collection, delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSnapshot {
    /// Owner of the collection
    pub user_id: String,
    /// Collection the documents belong to
    pub collection: Collection,
    /// Documents, newest first
    pub documents: Vec<RemoteDocument>,
}

impl CollectionSnapshot {
    /// Look up a document by id
    pub fn document(&self, id: &str) -> Option<&RemoteDocument> {
        self.documents.iter().find(|doc| doc.id == id)
    }
}
