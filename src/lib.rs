//! Piggybank Sync - Main Library
//!
//! Piggybank Sync is the local-first synchronization engine of a personal
//! savings tracker. A user counts euro coins and banknotes, keeps a history
//! of savings snapshots and sets savings goals; every change is applied to a
//! local projection immediately and reaches a per-user remote document
//! store in the background.
//!
//! # Module Structure
//!
//! The library is organized into two modules:
//!
//! - **`shared`** - Types usable on any side of the wire
//!   - Entity model, currency catalog, change events
//!   - Configuration and error types
//!
//! - **`client`** - The local-first engine
//!   - Connection monitor and durable sync queue
//!   - Remote document gateway (HTTP or in-memory)
//!   - Realtime projection store and conflict resolver
//!   - History statistics, export and legacy migration
//!
//! # Usage
//!
//! ```rust,no_run
//! use piggybank_sync::client::SyncEngine;
//! use piggybank_sync::shared::AppConfig;
//!
//! # async fn example() -> piggybank_sync::shared::Result<()> {
//! let engine = SyncEngine::new(AppConfig::default()).await?;
//! engine.sign_in("user-1").await?;
//! engine.store().set_quantity("2e", 3, "user-1").await;
//! println!("total: {} cents", engine.store().grand_total().await);
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! Components are shared as `Arc`s and keep their state behind
//! `tokio::sync` locks. Status and change notifications travel over `watch`
//! and `broadcast` channels.
//!
//! # Error Handling
//!
//! - `shared::SyncError` for every fallible sync operation
//! - `shared::ConfigError` for configuration
//! - Store mutators never return errors; failures surface as state

/// Shared types and data structures
pub mod shared;

/// Local-first sync engine
pub mod client;
