//! Local-First Client Module
//!
//! The sync engine proper: everything that runs on the user's device and
//! keeps the local projection, the durable queue and the remote document
//! store in step.
//!
//! # Architecture
//!
//! - **`engine`** - Composition root owning every component and task
//! - **`config`** - Environment overrides on top of `shared::config`
//! - **`gateway`** - Remote document store backends and typed facade
//! - **`local_db`** - Durable key/value storage (SQLite or in-memory)
//! - **`offline`** - Sync queue and its mutation payloads
//! - **`sync`** - Connection monitor and conflict resolver
//! - **`state`** - Realtime projection store read by the UI
//! - **`history`** - Snapshot entries, statistics, filters and export
//! - **`migration`** - Import of the legacy flat snapshot
//! - **`rate_limit`** - Per-key attempt limits for manual sync and export
//!
//! # Module Structure
//!
//! ```text
//! client/
//! ├── mod.rs          - Module exports and documentation
//! ├── main.rs         - CLI entry point (binary)
//! ├── engine.rs       - SyncEngine
//! ├── config.rs       - Environment configuration
//! ├── gateway/        - DocumentStore, HTTP and in-memory backends
//! ├── local_db/       - LocalStorage, SQLite and in-memory storage
//! ├── offline/        - SyncQueue, SyncMutation
//! ├── sync/           - ConnectionMonitor, conflict resolver
//! ├── state/          - RealtimeStore
//! ├── history.rs      - History utilities
//! ├── migration.rs    - Legacy snapshot migration
//! └── rate_limit.rs   - RateLimiter
//! ```

pub mod config;
pub mod engine;
pub mod gateway;
pub mod history;
pub mod local_db;
pub mod migration;
pub mod offline;
pub mod rate_limit;
pub mod state;
pub mod sync;

pub use engine::SyncEngine;
