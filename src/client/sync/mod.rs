//! Connectivity tracking and conflict resolution.

pub mod conflict_resolver;
pub mod connection;

pub use conflict_resolver::{
    auto_resolve_conflicts, conflict_summary, detect_conflicts, Conflict, ConflictData, ConflictResolution,
    ConflictSummary, SyncState,
};
pub use connection::{ConnectionMonitor, ConnectionStatus, SyncStatus};
