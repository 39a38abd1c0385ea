//! Shared Module
//!
//! Types shared by every side of the sync engine: the entity model, the
//! currency catalog, remote change events, configuration and errors.
//!
//! # Overview
//!
//! Nothing in this module performs I/O. Everything here serializes the way
//! the remote document store expects, so the same types travel over HTTP,
//! into SQLite and into the sync queue.

/// Entity types and collection names
pub mod model;

/// Coin/banknote catalog and totals
pub mod currency;

/// Remote change events and documents
pub mod event;

/// Shared error types
pub mod error;

/// Application configuration
pub mod config;

/// Re-export commonly used types for convenience
pub use config::{AppConfig, AppConfigBuilder, ConfigError};
pub use error::{Result, SyncError};
pub use event::{ChangeKind, CollectionSnapshot, DocumentChange, RemoteDocument};
pub use model::{
    Collection, Currency, Denomination, DenominationType, GoalPatch, HistoryEntry, HistoryEntryType, HistoryPatch,
    HistoryStatistics, Language, PreferenceChange, Preferences, ResolutionStrategy, SavingsGoal, Theme,
};
