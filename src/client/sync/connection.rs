//! # Connection Monitor
//!
//! Tracks whether the remote document store is reachable.
//!
//! ## States
//!
//! - **Connecting**: initial state, no probe has completed yet
//! - **Online**: a probe succeeded, was denied for permission reasons, or
//!   timed out without an error
//! - **Offline**: the host reports no network connectivity
//! - **Disconnected**: the host is online but a probe failed
//!
//! Ambiguous probe outcomes map to `Online`. Local operations keep working
//! offline-first, so a wrong `Online` only costs a failed write that lands in
//! the sync queue.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use piggybank_sync::client::sync::connection::{ConnectionMonitor, ConnectionStatus};
//! # use piggybank_sync::client::gateway::{DocumentGateway, InMemoryDocumentStore};
//! # use std::sync::Arc;
//! # use std::time::Duration;
//!
//! # async fn example(gateway: DocumentGateway) {
//! let monitor = Arc::new(ConnectionMonitor::new(gateway, Duration::from_secs(3), Duration::from_secs(30)));
//! let retry_loop = monitor.spawn_retry_loop();
//!
//! if monitor.check_connection().await == ConnectionStatus::Online {
//!     // drain pending changes
//! }
//! retry_loop.abort();
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::client::gateway::DocumentGateway;

/// Reachability of the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Online,
    Offline,
    Disconnected,
}

impl ConnectionStatus {
    /// Whether the retry loop should probe again
    pub fn needs_retry(&self) -> bool {
        matches!(self, ConnectionStatus::Offline | ConnectionStatus::Disconnected)
    }
}

/// Status indicator exposed to the UI
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub status: ConnectionStatus,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub pending_changes: usize,
    pub last_connected: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Probes the remote store and publishes the resulting status
pub struct ConnectionMonitor {
    gateway: DocumentGateway,
    probe_timeout: Duration,
    probe_interval: Duration,
    host_online: AtomicBool,
    status: watch::Sender<ConnectionStatus>,
    last_connected: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    last_sync_time: RwLock<Option<DateTime<Utc>>>,
    pending_changes: RwLock<Option<watch::Receiver<usize>>>,
}

impl std::fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("status", &self.status())
            .field("host_online", &self.host_online.load(Ordering::SeqCst))
            .finish()
    }
}

impl ConnectionMonitor {
    pub fn new(gateway: DocumentGateway, probe_timeout: Duration, probe_interval: Duration) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Connecting);
        Self {
            gateway,
            probe_timeout,
            probe_interval,
            host_online: AtomicBool::new(true),
            status,
            last_connected: RwLock::new(None),
            last_error: RwLock::new(None),
            last_sync_time: RwLock::new(None),
            pending_changes: RwLock::new(None),
        }
    }

    /// Current status
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.status() == ConnectionStatus::Online
    }

    /// Receive every status transition
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Source `pendingChanges` from a queue length channel
    pub async fn track_pending(&self, pending: watch::Receiver<usize>) {
        *self.pending_changes.write().await = Some(pending);
    }

    /// Record the completion of a full sync
    pub async fn mark_synced(&self, time: DateTime<Utc>) {
        *self.last_sync_time.write().await = Some(time);
    }

    /// Host connectivity signal
    ///
    /// Going offline is immediate. Coming back runs a probe before
    /// reporting `Online`.
    pub async fn set_host_online(&self, online: bool) -> ConnectionStatus {
        self.host_online.store(online, Ordering::SeqCst);
        if online {
            tracing::info!("[Connection] Host connectivity restored");
            self.check_connection().await
        } else {
            tracing::info!("[Connection] Host reports no connectivity");
            self.publish(ConnectionStatus::Offline);
            ConnectionStatus::Offline
        }
    }

    /// Run one probe bounded by the probe timeout
    pub async fn check_connection(&self) -> ConnectionStatus {
        if !self.host_online.load(Ordering::SeqCst) {
            self.publish(ConnectionStatus::Offline);
            return ConnectionStatus::Offline;
        }

        let status = match tokio::time::timeout(self.probe_timeout, self.gateway.probe()).await {
            Ok(Ok(())) => ConnectionStatus::Online,
            Ok(Err(e)) if e.is_permission() => {
                tracing::debug!("[Connection] Probe denied, store is reachable: {}", e);
                ConnectionStatus::Online
            }
            Ok(Err(e)) => {
                tracing::warn!("[Connection] Probe failed: {}", e);
                *self.last_error.write().await = Some(e.to_string());
                ConnectionStatus::Disconnected
            }
            Err(_) => {
                tracing::debug!("[Connection] Probe timed out after {:?}, assuming online", self.probe_timeout);
                ConnectionStatus::Online
            }
        };

        // the host may have dropped while the probe was in flight
        let status = if self.host_online.load(Ordering::SeqCst) {
            status
        } else {
            ConnectionStatus::Offline
        };

        if status == ConnectionStatus::Online {
            *self.last_connected.write().await = Some(Utc::now());
            *self.last_error.write().await = None;
        }
        self.publish(status);
        status
    }

    fn publish(&self, status: ConnectionStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            tracing::info!("[Connection] Status is now {:?}", status);
        }
    }

    /// Snapshot for the status indicator
    pub async fn sync_status(&self) -> SyncStatus {
        let pending_changes = self
            .pending_changes
            .read()
            .await
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(0);

        SyncStatus {
            status: self.status(),
            last_sync_time: *self.last_sync_time.read().await,
            pending_changes,
            last_connected: *self.last_connected.read().await,
            error: self.last_error.read().await.clone(),
        }
    }

    /// Re-probe on a fixed interval while offline or disconnected
    pub fn spawn_retry_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.probe_interval);
            // the first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                if monitor.status().needs_retry() {
                    tracing::debug!("[Connection] Retrying probe");
                    monitor.check_connection().await;
                }
            }
        })
    }
}
