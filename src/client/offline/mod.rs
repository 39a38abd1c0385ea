//! Offline support: queued remote writes and their durable retry queue.

pub mod mutation;
pub mod queue;

pub use mutation::{MutationKind, SyncMutation};
pub use queue::{DrainReport, SyncQueue, SyncQueueItem, QUEUE_STORAGE_KEY};
