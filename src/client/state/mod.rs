//! # Realtime Projection Store
//!
//! The in-memory view of one user's data that the UI reads from.
//!
//! ## Write path
//!
//! Every mutator updates local state first and then writes through the
//! gateway. A write that cannot be delivered lands in the sync queue:
//!
//! - the monitor is offline or disconnected, so no attempt is made
//! - the collection already has queued writes, which must go first
//! - the attempt fails with a retryable error
//!
//! ## Read path
//!
//! Live subscriptions push full collection snapshots. When the collection has
//! no local write outstanding, the snapshot replaces local state. Otherwise
//! local and remote are reconciled with the collection's configured
//! resolution strategy, and a `Manual` strategy parks the pair in the
//! unresolved-conflict list.
//!
//! ## Sessions
//!
//! Each session carries a generation number. `reset` and user switches bump
//! it, and results of work started under an older generation are discarded.

use chrono::{DateTime, Utc};
use futures_util::future;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::client::gateway::{
    decode_documents, DocumentGateway, Subscription, PROFILE_DOCUMENT_ID, SAVINGS_DOCUMENT_ID,
};
use crate::client::history::{calculate_goal_progress, create_snapshot_entry};
use crate::client::offline::{SyncMutation, SyncQueue};
use crate::client::sync::conflict_resolver::{self, Conflict, ConflictData};
use crate::client::sync::connection::ConnectionMonitor;
use crate::shared::config::ReconcilePolicy;
use crate::shared::currency::{calculate_total, euro_catalog};
use crate::shared::error::{Result, SyncError};
use crate::shared::event::CollectionSnapshot;
use crate::shared::model::{
    clamp_quantity, Collection, Denomination, GoalPatch, HistoryEntry, HistoryPatch, HistoryStatistics, Language,
    PreferenceChange, Preferences, ProfileDocument, ResolutionStrategy, SavingsDocument, SavingsGoal, Theme,
};

/// Outcome of the most recent remote write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    #[default]
    Idle,
    Syncing,
    Success,
    Error,
}

/// Everything the UI renders
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionState {
    pub user_id: Option<String>,
    pub loading: bool,
    /// Set once the first bulk load finished, whatever its outcome
    pub data_loaded: bool,
    pub denominations: Vec<Denomination>,
    pub preferences: Preferences,
    pub last_updated: Option<DateTime<Utc>>,
    /// Newest first
    pub history: Vec<HistoryEntry>,
    pub goals: Vec<SavingsGoal>,
    pub statistics: Option<HistoryStatistics>,
    pub is_listening: bool,
    pub sync_status: SyncPhase,
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Dismissable banner text
    pub error_message: Option<String>,
    pub unresolved_conflicts: Vec<Conflict>,
}

impl Default for ProjectionState {
    fn default() -> Self {
        Self {
            user_id: None,
            loading: false,
            data_loaded: false,
            denominations: euro_catalog(),
            preferences: Preferences::default(),
            last_updated: None,
            history: Vec::new(),
            goals: Vec::new(),
            statistics: None,
            is_listening: false,
            sync_status: SyncPhase::Idle,
            last_sync_time: None,
            error_message: None,
            unresolved_conflicts: Vec::new(),
        }
    }
}

impl ProjectionState {
    pub fn theme(&self) -> Theme {
        self.preferences.theme
    }

    pub fn language(&self) -> Language {
        self.preferences.language
    }

    pub fn show_bgn(&self) -> bool {
        self.preferences.show_bgn()
    }

    fn slice(&self, collection: Collection) -> ConflictData {
        match collection {
            Collection::Profile => ConflictData::Preferences(self.preferences),
            Collection::Savings => ConflictData::Denominations(self.denominations.clone()),
            Collection::History => ConflictData::History(self.history.clone()),
            Collection::Goals => ConflictData::Goals(self.goals.clone()),
        }
    }

    fn install(&mut self, data: ConflictData) {
        match data {
            ConflictData::Preferences(preferences) => self.preferences = preferences,
            ConflictData::Denominations(denominations) => self.denominations = denominations,
            ConflictData::History(history) => self.history = history,
            ConflictData::Goals(goals) => self.goals = goals,
        }
    }
}

/// Which part of the state changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    Denominations,
    Preferences,
    History,
    Goals,
    Statistics,
    SyncStatus,
    Error,
    Listening,
    Loaded,
    Conflicts,
    Reset,
}

impl StoreEvent {
    fn for_collection(collection: Collection) -> Self {
        match collection {
            Collection::Profile => StoreEvent::Preferences,
            Collection::Savings => StoreEvent::Denominations,
            Collection::History => StoreEvent::History,
            Collection::Goals => StoreEvent::Goals,
        }
    }
}

fn slot(collection: Collection) -> usize {
    match collection {
        Collection::Profile => 0,
        Collection::Savings => 1,
        Collection::History => 2,
        Collection::Goals => 3,
    }
}

#[derive(Default)]
struct Listeners {
    subscriptions: Vec<Subscription>,
    apply_task: Option<JoinHandle<()>>,
}

impl Listeners {
    fn release(&mut self) -> usize {
        let count = self.subscriptions.len();
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        if let Some(task) = self.apply_task.take() {
            task.abort();
        }
        count
    }
}

/// Optimistic, subscription-fed projection of one user's data
pub struct RealtimeStore {
    state: RwLock<ProjectionState>,
    gateway: DocumentGateway,
    queue: Arc<SyncQueue>,
    monitor: Arc<ConnectionMonitor>,
    policy: ReconcilePolicy,
    generation: AtomicU64,
    listening: AtomicBool,
    listeners: Mutex<Listeners>,
    /// Writes between optimistic update and delivery or enqueue, per collection
    in_flight: [AtomicUsize; 4],
    events: broadcast::Sender<StoreEvent>,
}

impl std::fmt::Debug for RealtimeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeStore")
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .field("listening", &self.listening.load(Ordering::SeqCst))
            .finish()
    }
}

impl RealtimeStore {
    pub fn new(
        gateway: DocumentGateway,
        queue: Arc<SyncQueue>,
        monitor: Arc<ConnectionMonitor>,
        policy: ReconcilePolicy,
    ) -> Self {
        let (events, _) = broadcast::channel(128);
        Self {
            state: RwLock::new(ProjectionState::default()),
            gateway,
            queue,
            monitor,
            policy,
            generation: AtomicU64::new(0),
            listening: AtomicBool::new(false),
            listeners: Mutex::new(Listeners::default()),
            in_flight: Default::default(),
            events,
        }
    }

    // ---- reads ----

    /// Copy of the whole state
    pub async fn snapshot(&self) -> ProjectionState {
        self.state.read().await.clone()
    }

    pub async fn denominations(&self) -> Vec<Denomination> {
        self.state.read().await.denominations.clone()
    }

    pub async fn preferences(&self) -> Preferences {
        self.state.read().await.preferences
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.state.read().await.history.clone()
    }

    pub async fn goals(&self) -> Vec<SavingsGoal> {
        self.state.read().await.goals.clone()
    }

    pub async fn statistics(&self) -> Option<HistoryStatistics> {
        self.state.read().await.statistics.clone()
    }

    pub async fn sync_status(&self) -> SyncPhase {
        self.state.read().await.sync_status
    }

    pub async fn error_message(&self) -> Option<String> {
        self.state.read().await.error_message.clone()
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Grand total in euro cents
    pub async fn grand_total(&self) -> i64 {
        calculate_total(&self.state.read().await.denominations)
    }

    pub async fn goal_progress(&self, goal_id: &str) -> f64 {
        let state = self.state.read().await;
        let goal = state.goals.iter().find(|goal| goal.id == goal_id);
        calculate_goal_progress(goal, calculate_total(&state.denominations))
    }

    pub async fn unresolved_conflicts(&self) -> Vec<Conflict> {
        self.state.read().await.unresolved_conflicts.clone()
    }

    /// Change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: StoreEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    // ---- loading ----

    /// Concurrent read of all four collections
    ///
    /// Each fetch failure is isolated: that slice falls back to its default
    /// and the failures are aggregated into one banner message. Returns
    /// whether every collection loaded for the current session.
    pub async fn load_user_data(&self, user_id: &str) -> bool {
        if user_id.is_empty() {
            return false;
        }

        let generation = {
            let mut state = self.state.write().await;
            if state.user_id.as_deref() != Some(user_id) {
                if state.user_id.is_some() {
                    // new session: nothing of the previous user survives
                    self.generation.fetch_add(1, Ordering::SeqCst);
                    let is_listening = state.is_listening;
                    *state = ProjectionState {
                        is_listening,
                        ..ProjectionState::default()
                    };
                }
                state.user_id = Some(user_id.to_string());
            }
            state.loading = true;
            state.error_message = None;
            self.generation()
        };
        tracing::info!("[Store] Loading data for {}", user_id);

        let (profile, savings, history, goals) = future::join4(
            self.gateway.get_profile(user_id),
            self.gateway.get_savings(user_id),
            self.gateway.list_history(user_id),
            self.gateway.list_goals(user_id),
        )
        .await;

        let mut failures = Vec::new();
        let mut state = self.state.write().await;
        if !self.is_current(generation) {
            tracing::debug!("[Store] Discarding load for a previous session");
            return false;
        }

        match profile {
            Ok(profile) => {
                let profile = profile.unwrap_or_default();
                state.preferences = profile.preferences;
                state.statistics = profile.statistics;
            }
            Err(e) => {
                tracing::warn!("[Store] Failed to load profile, using defaults: {}", e);
                state.preferences = Preferences::default();
                failures.push(format!("profile: {}", e));
            }
        }
        match savings {
            Ok(savings) => {
                state.denominations = savings.map(|s| s.denominations).unwrap_or_else(euro_catalog);
            }
            Err(e) => {
                tracing::warn!("[Store] Failed to load savings, using defaults: {}", e);
                state.denominations = euro_catalog();
                failures.push(format!("savings: {}", e));
            }
        }
        match history {
            Ok(history) => state.history = history,
            Err(e) => {
                tracing::warn!("[Store] Failed to load history, continuing with empty history: {}", e);
                state.history = Vec::new();
                failures.push(format!("history: {}", e));
            }
        }
        match goals {
            Ok(goals) => state.goals = goals,
            Err(e) => {
                tracing::warn!("[Store] Failed to load goals, continuing with empty goals: {}", e);
                state.goals = Vec::new();
                failures.push(format!("goals: {}", e));
            }
        }

        state.loading = false;
        state.data_loaded = true;
        state.last_updated = Some(Utc::now());
        if !failures.is_empty() {
            state.error_message = Some(format!("Some data could not be loaded ({})", failures.join("; ")));
        }
        drop(state);

        self.emit(StoreEvent::Loaded);
        if !failures.is_empty() {
            self.emit(StoreEvent::Error);
        }
        failures.is_empty()
    }

    // ---- subscriptions ----

    /// Subscribe to all four collections, a no-op while already listening
    pub async fn start_listening(self: &Arc<Self>, user_id: &str) {
        if user_id.is_empty() {
            return;
        }
        if self.listening.swap(true, Ordering::SeqCst) {
            tracing::debug!("[Store] Already listening");
            return;
        }

        let generation = self.generation();
        let (tx, mut rx) = mpsc::unbounded_channel::<CollectionSnapshot>();
        let mut subscriptions = Vec::new();
        for collection in Collection::ALL {
            match self.gateway.subscribe(user_id, collection, tx.clone()).await {
                Ok(subscription) => subscriptions.push(subscription),
                Err(e) => {
                    tracing::warn!("[Store] Could not subscribe to {}: {}", collection, e);
                    self.set_error(generation, format!("Live updates for {} unavailable: {}", collection, e))
                        .await;
                }
            }
        }
        drop(tx);

        let store: Weak<Self> = Arc::downgrade(self);
        let apply_task = tokio::spawn(async move {
            while let Some(snapshot) = rx.recv().await {
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.apply_snapshot(generation, snapshot).await;
            }
        });

        let mut listeners = self.listeners.lock().await;
        listeners.subscriptions = subscriptions;
        listeners.apply_task = Some(apply_task);

        // stopped while the subscriptions were being set up
        if !self.listening.load(Ordering::SeqCst) || !self.is_current(generation) {
            listeners.release();
            self.listening.store(false, Ordering::SeqCst);
            return;
        }
        drop(listeners);

        self.state.write().await.is_listening = true;
        tracing::info!("[Store] Listening for changes of {}", user_id);
        self.emit(StoreEvent::Listening);
    }

    /// Cancel every subscription, safe to call repeatedly
    pub async fn stop_listening(&self) {
        let was_listening = self.listening.swap(false, Ordering::SeqCst);
        let released = self.listeners.lock().await.release();
        self.state.write().await.is_listening = false;
        if was_listening {
            tracing::info!("[Store] Stopped listening ({} subscriptions released)", released);
            self.emit(StoreEvent::Listening);
        }
    }

    /// Fold one pushed snapshot into local state
    async fn apply_snapshot(&self, generation: u64, snapshot: CollectionSnapshot) {
        let collection = snapshot.collection;
        let remote = match self.decode_snapshot(&snapshot) {
            Some(remote) => remote,
            None => return,
        };

        let mut state = self.state.write().await;
        if !self.is_current(generation) || state.user_id.as_deref() != Some(snapshot.user_id.as_str()) {
            return;
        }

        if collection == Collection::Profile {
            let statistics = self.profile_statistics(&snapshot);
            if statistics.is_some() && statistics != state.statistics {
                state.statistics = statistics;
                self.emit(StoreEvent::Statistics);
            }
        }

        let local = state.slice(collection);
        if local == remote {
            return;
        }

        // read under the state lock so a write moving from in-flight to queued is seen
        let pending = self.queue.pending_collections(&snapshot.user_id).await;

        let has_local_writes =
            pending.contains(&collection) || self.in_flight[slot(collection)].load(Ordering::SeqCst) > 0;
        if !has_local_writes {
            state.install(remote);
            state.unresolved_conflicts.retain(|c| c.collection != collection);
            state.last_updated = Some(Utc::now());
            drop(state);
            self.emit(StoreEvent::for_collection(collection));
            return;
        }

        let strategy = self.policy.for_collection(collection);
        let conflict = Conflict::new(local, remote);
        match conflict_resolver::resolve(&conflict, strategy) {
            Ok(resolved) => {
                tracing::debug!("[Store] Reconciled {} echo with {:?}", collection, strategy);
                state.install(resolved);
                drop(state);
                self.emit(StoreEvent::for_collection(collection));
            }
            Err(e) => {
                tracing::info!("[Store] {} needs manual resolution: {}", collection, e);
                state.unresolved_conflicts.retain(|c| c.collection != collection);
                state.unresolved_conflicts.push(conflict);
                drop(state);
                self.emit(StoreEvent::Conflicts);
            }
        }
    }

    fn decode_snapshot(&self, snapshot: &CollectionSnapshot) -> Option<ConflictData> {
        match snapshot.collection {
            Collection::Profile => {
                let document = snapshot.document(PROFILE_DOCUMENT_ID)?;
                match document.decode::<ProfileDocument>() {
                    Ok(profile) => Some(ConflictData::Preferences(profile.preferences)),
                    Err(e) => {
                        tracing::warn!("[Store] Ignoring malformed profile: {}", e);
                        None
                    }
                }
            }
            Collection::Savings => {
                let document = snapshot.document(SAVINGS_DOCUMENT_ID)?;
                match document.decode::<SavingsDocument>() {
                    Ok(savings) => Some(ConflictData::Denominations(savings.denominations)),
                    Err(e) => {
                        tracing::warn!("[Store] Ignoring malformed savings: {}", e);
                        None
                    }
                }
            }
            Collection::History => {
                let mut history: Vec<HistoryEntry> = decode_documents(Collection::History, &snapshot.documents);
                history.truncate(self.gateway.history_limit());
                Some(ConflictData::History(history))
            }
            Collection::Goals => Some(ConflictData::Goals(decode_documents(Collection::Goals, &snapshot.documents))),
        }
    }

    fn profile_statistics(&self, snapshot: &CollectionSnapshot) -> Option<HistoryStatistics> {
        snapshot
            .document(PROFILE_DOCUMENT_ID)
            .and_then(|document| document.decode::<ProfileDocument>().ok())
            .and_then(|profile| profile.statistics)
    }

    /// Settle a parked conflict
    ///
    /// `LastWriteWins` takes the remote version, `FirstWriteWins` keeps the
    /// local one and `Merge` combines them. The winning denominations or
    /// preferences are written back so the remote converges.
    pub async fn resolve_conflict(&self, collection: Collection, strategy: ResolutionStrategy) -> Result<()> {
        if strategy == ResolutionStrategy::Manual {
            return Err(SyncError::validation("strategy", "pick a concrete strategy to resolve a conflict"));
        }

        let generation = self.generation();
        let (user_id, resolved) = {
            let mut state = self.state.write().await;
            let position = state
                .unresolved_conflicts
                .iter()
                .position(|c| c.collection == collection)
                .ok_or_else(|| SyncError::validation("collection", format!("no unresolved conflict for {}", collection)))?;
            let resolved = conflict_resolver::resolve(&state.unresolved_conflicts[position], strategy)?;
            state.unresolved_conflicts.remove(position);
            state.install(resolved.clone());
            self.begin_write(collection);
            (state.user_id.clone(), resolved)
        };
        self.emit(StoreEvent::for_collection(collection));
        self.emit(StoreEvent::Conflicts);

        let mutation = match resolved {
            ConflictData::Denominations(denominations) => Some(SyncMutation::SaveSavings { denominations }),
            ConflictData::Preferences(preferences) => Some(SyncMutation::SavePreferences { preferences }),
            ConflictData::History(_) | ConflictData::Goals(_) => None,
        };
        match (user_id, mutation) {
            (Some(user_id), Some(mutation)) => self.write_through(&user_id, generation, mutation).await,
            _ => self.end_write(collection),
        }
        Ok(())
    }

    // ---- mutators ----

    /// Set a denomination count, clamped to `0..=MAX_QUANTITY`
    ///
    /// Appends a snapshot entry when the grand total changes to a non-zero
    /// value. Setting the current value again does nothing.
    pub async fn set_quantity(&self, id: &str, quantity: i64, user_id: &str) {
        if user_id.is_empty() {
            return;
        }
        let generation = self.generation();
        let quantity = clamp_quantity(quantity);

        let (denominations, snapshot) = {
            let mut state = self.state.write().await;
            let Some(position) = state.denominations.iter().position(|d| d.id == id) else {
                tracing::warn!("[Store] Unknown denomination {}", id);
                return;
            };
            if state.denominations[position].quantity == quantity {
                return;
            }

            let previous_total = calculate_total(&state.denominations);
            state.denominations[position].quantity = quantity;
            let total = calculate_total(&state.denominations);

            let snapshot = if total != previous_total && total != 0 {
                let entry = create_snapshot_entry(&state.denominations);
                state.history.insert(0, entry.clone());
                self.begin_write(Collection::History);
                Some(entry)
            } else {
                None
            };
            self.begin_write(Collection::Savings);
            state.sync_status = SyncPhase::Syncing;
            state.last_updated = Some(Utc::now());
            (state.denominations.clone(), snapshot)
        };
        self.emit(StoreEvent::Denominations);
        if snapshot.is_some() {
            self.emit(StoreEvent::History);
        }

        self.write_through(user_id, generation, SyncMutation::SaveSavings { denominations })
            .await;
        if let Some(entry) = snapshot {
            self.write_through(user_id, generation, SyncMutation::AddHistory { entry })
                .await;
        }
    }

    pub async fn set_theme(&self, theme: Theme, user_id: &str) {
        self.change_preference(PreferenceChange::Theme(theme), user_id).await
    }

    pub async fn set_language(&self, language: Language, user_id: &str) {
        self.change_preference(PreferenceChange::Language(language), user_id)
            .await
    }

    pub async fn set_show_bgn(&self, show_bgn: bool, user_id: &str) {
        self.change_preference(PreferenceChange::ShowBgn(show_bgn), user_id)
            .await
    }

    /// Optimistic local change, then a read-merge-write of the remote record
    async fn change_preference(&self, change: PreferenceChange, user_id: &str) {
        if user_id.is_empty() {
            return;
        }
        let generation = self.generation();
        {
            let mut state = self.state.write().await;
            change.apply_to(&mut state.preferences);
            state.sync_status = SyncPhase::Syncing;
            self.begin_write(Collection::Profile);
        }
        self.emit(StoreEvent::Preferences);
        self.write_through(user_id, generation, SyncMutation::PatchPreferences { change })
            .await;
    }

    pub async fn update_statistics(&self, statistics: HistoryStatistics, user_id: &str) {
        if user_id.is_empty() {
            return;
        }
        let generation = self.generation();
        {
            let mut state = self.state.write().await;
            state.statistics = Some(statistics.clone());
            self.begin_write(Collection::Profile);
        }
        self.emit(StoreEvent::Statistics);
        self.write_through(user_id, generation, SyncMutation::SaveStatistics { statistics })
            .await;
    }

    pub async fn add_history_entry(&self, entry: HistoryEntry, user_id: &str) {
        if user_id.is_empty() {
            return;
        }
        let generation = self.generation();
        {
            let mut state = self.state.write().await;
            state.history.retain(|existing| existing.id != entry.id);
            state.history.push(entry.clone());
            state.history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            self.begin_write(Collection::History);
        }
        self.emit(StoreEvent::History);
        self.write_through(user_id, generation, SyncMutation::AddHistory { entry })
            .await;
    }

    pub async fn update_history_entry(&self, id: &str, patch: HistoryPatch, user_id: &str) {
        if user_id.is_empty() {
            return;
        }
        let generation = self.generation();
        {
            let mut state = self.state.write().await;
            if let Some(entry) = state.history.iter_mut().find(|entry| entry.id == id) {
                patch.apply_to(entry);
            }
            self.begin_write(Collection::History);
        }
        self.emit(StoreEvent::History);
        let mutation = SyncMutation::PatchHistory { id: id.to_string(), patch };
        self.write_through(user_id, generation, mutation).await;
    }

    pub async fn delete_history_entry(&self, id: &str, user_id: &str) {
        if user_id.is_empty() {
            return;
        }
        let generation = self.generation();
        {
            let mut state = self.state.write().await;
            state.history.retain(|entry| entry.id != id);
            self.begin_write(Collection::History);
        }
        self.emit(StoreEvent::History);
        let mutation = SyncMutation::DeleteHistory { id: id.to_string() };
        self.write_through(user_id, generation, mutation).await;
    }

    pub async fn clear_history(&self, user_id: &str) {
        if user_id.is_empty() {
            return;
        }
        let generation = self.generation();
        {
            let mut state = self.state.write().await;
            state.history.clear();
            self.begin_write(Collection::History);
        }
        self.emit(StoreEvent::History);
        self.write_through(user_id, generation, SyncMutation::ClearHistory)
            .await;
    }

    pub async fn add_goal(&self, goal: SavingsGoal, user_id: &str) {
        if user_id.is_empty() {
            return;
        }
        let generation = self.generation();
        {
            let mut state = self.state.write().await;
            state.goals.retain(|existing| existing.id != goal.id);
            state.goals.insert(0, goal.clone());
            self.begin_write(Collection::Goals);
        }
        self.emit(StoreEvent::Goals);
        self.write_through(user_id, generation, SyncMutation::AddGoal { goal })
            .await;
    }

    pub async fn update_goal(&self, id: &str, patch: GoalPatch, user_id: &str) {
        if user_id.is_empty() {
            return;
        }
        let generation = self.generation();
        {
            let mut state = self.state.write().await;
            if let Some(goal) = state.goals.iter_mut().find(|goal| goal.id == id) {
                patch.apply_to(goal);
            }
            self.begin_write(Collection::Goals);
        }
        self.emit(StoreEvent::Goals);
        let mutation = SyncMutation::PatchGoal { id: id.to_string(), patch };
        self.write_through(user_id, generation, mutation).await;
    }

    pub async fn delete_goal(&self, id: &str, user_id: &str) {
        if user_id.is_empty() {
            return;
        }
        let generation = self.generation();
        {
            let mut state = self.state.write().await;
            state.goals.retain(|goal| goal.id != id);
            self.begin_write(Collection::Goals);
        }
        self.emit(StoreEvent::Goals);
        let mutation = SyncMutation::DeleteGoal { id: id.to_string() };
        self.write_through(user_id, generation, mutation).await;
    }

    pub async fn clear_goals(&self, user_id: &str) {
        if user_id.is_empty() {
            return;
        }
        let generation = self.generation();
        {
            let mut state = self.state.write().await;
            state.goals.clear();
            self.begin_write(Collection::Goals);
        }
        self.emit(StoreEvent::Goals);
        self.write_through(user_id, generation, SyncMutation::ClearGoals)
            .await;
    }

    // ---- sync ----

    /// Flush the queue, then reload everything
    ///
    /// Returns true only when the remote is caught up: the monitor is online,
    /// nothing for `user_id` is left in the queue and every collection loaded.
    pub async fn sync_now(&self, user_id: &str) -> bool {
        if user_id.is_empty() {
            return false;
        }
        let generation = self.generation();
        self.set_phase(generation, SyncPhase::Syncing).await;

        let report = self.queue.drain().await;
        tracing::info!(
            "[Store] Manual sync delivered {} of {} queued writes",
            report.succeeded,
            report.attempted
        );
        let loaded = self.load_user_data(user_id).await;
        let online = self.monitor.is_online();
        let pending = self.queue.pending_collections(user_id).await;
        let synced = online && loaded && pending.is_empty() && report.dropped.is_empty();

        let now = Utc::now();
        if synced {
            self.monitor.mark_synced(now).await;
        }
        let mut state = self.state.write().await;
        if !self.is_current(generation) {
            return false;
        }
        if synced {
            state.sync_status = SyncPhase::Success;
            state.last_sync_time = Some(now);
        } else if !online {
            tracing::info!("[Store] Manual sync left {} collections queued while offline", pending.len());
            state.sync_status = SyncPhase::Idle;
        } else {
            state.sync_status = SyncPhase::Error;
            if state.error_message.is_none() {
                state.error_message = Some(if report.dropped.is_empty() {
                    format!("{} collections still have unsynced changes", pending.len())
                } else {
                    format!("{} queued changes could not be delivered", report.dropped.len())
                });
            }
        }
        drop(state);
        self.emit(StoreEvent::SyncStatus);
        if !synced && online {
            self.emit(StoreEvent::Error);
        }
        synced
    }

    /// Dismiss the banner
    pub async fn clear_error(&self) {
        self.state.write().await.error_message = None;
        self.emit(StoreEvent::Error);
    }

    /// Drop every slice back to defaults and end the session
    pub async fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.stop_listening().await;
        *self.state.write().await = ProjectionState::default();
        tracing::info!("[Store] State reset");
        self.emit(StoreEvent::Reset);
    }

    fn begin_write(&self, collection: Collection) {
        self.in_flight[slot(collection)].fetch_add(1, Ordering::SeqCst);
    }

    fn end_write(&self, collection: Collection) {
        self.in_flight[slot(collection)].fetch_sub(1, Ordering::SeqCst);
    }

    /// Deliver one write or hand it to the queue
    ///
    /// Must be paired with a preceding `begin_write` for the mutation's
    /// collection.
    async fn write_through(&self, user_id: &str, generation: u64, mutation: SyncMutation) {
        let collection = mutation.collection();
        if let Err(e) = mutation.validate() {
            tracing::error!("[Store] Refusing malformed write to {}: {}", collection, e);
            self.end_write(collection);
            self.set_error(generation, format!("Failed to sync {}: {}", collection, e)).await;
            return;
        }

        let queued_ahead = self.queue.pending_collections(user_id).await.contains(&collection);
        if queued_ahead || self.monitor.status().needs_retry() {
            tracing::debug!("[Store] Queueing {:?} on {} without a remote attempt", mutation.kind(), collection);
            let queued = self.enqueue(user_id, generation, mutation).await;
            self.end_write(collection);
            if queued && self.is_current(generation) {
                self.set_phase(generation, SyncPhase::Idle).await;
            }
            return;
        }

        let outcome = mutation.apply(&self.gateway, user_id).await;
        match outcome {
            Ok(()) => {
                self.end_write(collection);
                let mut state = self.state.write().await;
                if self.is_current(generation) {
                    state.sync_status = SyncPhase::Success;
                    state.last_sync_time = Some(Utc::now());
                    drop(state);
                    self.emit(StoreEvent::SyncStatus);
                }
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!("[Store] Write to {} failed, queueing for retry: {}", collection, e);
                self.monitor.check_connection().await;
                self.enqueue(user_id, generation, mutation).await;
                self.end_write(collection);
                self.set_error(generation, format!("Failed to sync {}: {}", collection, e)).await;
            }
            Err(e) => {
                tracing::error!("[Store] Write to {} rejected: {}", collection, e);
                self.end_write(collection);
                self.set_error(generation, format!("Failed to sync {}: {}", collection, e)).await;
            }
        }
    }

    async fn enqueue(&self, user_id: &str, generation: u64, mutation: SyncMutation) -> bool {
        match self.queue.enqueue(user_id, mutation).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("[Store] Could not queue write: {}", e);
                self.set_error(generation, format!("Could not queue change: {}", e)).await;
                false
            }
        }
    }

    async fn set_phase(&self, generation: u64, phase: SyncPhase) {
        let mut state = self.state.write().await;
        if !self.is_current(generation) {
            return;
        }
        state.sync_status = phase;
        drop(state);
        self.emit(StoreEvent::SyncStatus);
    }

    async fn set_error(&self, generation: u64, message: String) {
        let mut state = self.state.write().await;
        if !self.is_current(generation) {
            return;
        }
        state.sync_status = SyncPhase::Error;
        state.error_message = Some(message);
        drop(state);
        self.emit(StoreEvent::SyncStatus);
        self.emit(StoreEvent::Error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::gateway::InMemoryDocumentStore;
    use crate::client::history::create_manual_entry;
    use crate::client::local_db::MemoryStorage;
    use crate::shared::currency::convert_eur_to_bgn;
    use crate::shared::model::{Currency, MAX_QUANTITY};
    use std::time::Duration;

    const USER: &str = "user-1";

    struct Fixture {
        remote: Arc<InMemoryDocumentStore>,
        gateway: DocumentGateway,
        monitor: Arc<ConnectionMonitor>,
        queue: Arc<SyncQueue>,
        store: Arc<RealtimeStore>,
    }

    async fn fixture_with(policy: ReconcilePolicy) -> Fixture {
        let remote = Arc::new(InMemoryDocumentStore::new());
        let gateway = DocumentGateway::new(remote.clone(), 100);
        let monitor = Arc::new(ConnectionMonitor::new(
            gateway.clone(),
            Duration::from_millis(50),
            Duration::from_secs(30),
        ));
        monitor.check_connection().await;
        let queue = Arc::new(SyncQueue::new(
            Arc::new(MemoryStorage::new()),
            gateway.clone(),
            monitor.clone(),
            3,
        ));
        let store = Arc::new(RealtimeStore::new(gateway.clone(), queue.clone(), monitor.clone(), policy));
        store.load_user_data(USER).await;
        Fixture { remote, gateway, monitor, queue, store }
    }

    async fn fixture() -> Fixture {
        fixture_with(ReconcilePolicy::default()).await
    }

    fn goal(id: &str) -> SavingsGoal {
        SavingsGoal {
            id: id.to_string(),
            title: format!("goal {}", id),
            target_amount: 10_000,
            target_currency: Currency::EUR,
            deadline: None,
            created_at: Utc::now(),
            achieved_at: None,
        }
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_negative_quantity_is_clamped() {
        let f = fixture().await;
        f.store.set_quantity("1e", 3, USER).await;
        f.store.set_quantity("1e", -5, USER).await;

        let denominations = f.store.denominations().await;
        let one_euro = denominations.iter().find(|d| d.id == "1e").unwrap();
        assert_eq!(one_euro.quantity, 0);
    }

    #[tokio::test]
    async fn test_huge_quantity_is_capped() {
        let f = fixture().await;
        f.store.set_quantity("500e", i64::MAX / 2, USER).await;

        let denominations = f.store.denominations().await;
        let five_hundred = denominations.iter().find(|d| d.id == "500e").unwrap();
        assert_eq!(five_hundred.quantity, MAX_QUANTITY);

        let expected = 50_000 * MAX_QUANTITY;
        assert_eq!(f.store.grand_total().await, expected);
        assert_eq!(f.store.history().await[0].total_eur, expected);
        assert_eq!(f.store.sync_status().await, SyncPhase::Success);
    }

    #[tokio::test]
    async fn test_unchanged_quantity_writes_nothing() {
        let f = fixture().await;
        let writes = f.remote.write_count();
        f.store.set_quantity("1e", 0, USER).await;

        assert!(f.store.history().await.is_empty());
        assert_eq!(f.remote.write_count(), writes);
    }

    #[tokio::test]
    async fn test_quantity_scenario_builds_history() {
        let f = fixture().await;
        f.store.set_quantity("1e", 1, USER).await;
        f.store.set_quantity("2e", 1, USER).await;
        f.store.set_quantity("50c", 2, USER).await;

        let history = f.store.history().await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].total_eur, 400);
        assert!((history[0].total_bgn - 7.82).abs() < 0.01);
        assert_eq!(f.store.grand_total().await, 400);
        assert_eq!(f.store.sync_status().await, SyncPhase::Success);

        let remote_history = f.gateway.list_history(USER).await.unwrap();
        assert_eq!(remote_history.len(), 3);
        assert_eq!(remote_history[0].total_eur, 400);
        let savings = f.gateway.get_savings(USER).await.unwrap().unwrap();
        assert_eq!(savings.total_eur, 400);
    }

    #[tokio::test]
    async fn test_back_to_zero_adds_no_snapshot() {
        let f = fixture().await;
        f.store.set_quantity("1e", 1, USER).await;
        f.store.set_quantity("1e", 0, USER).await;
        assert_eq!(f.store.history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_partial_load_failure_is_isolated() {
        let f = fixture().await;
        f.gateway.add_goal(USER, &goal("g1")).await.unwrap();
        f.store.set_quantity("2e", 3, USER).await;
        f.remote.fail_collection(Collection::History).await;

        f.store.load_user_data(USER).await;

        let state = f.store.snapshot().await;
        assert!(state.data_loaded);
        assert!(!state.loading);
        assert!(state.history.is_empty());
        assert_eq!(state.goals.len(), 1);
        assert_eq!(calculate_total(&state.denominations), 600);
        assert!(state.error_message.unwrap().contains("history"));
    }

    #[tokio::test]
    async fn test_offline_writes_go_to_queue() {
        let f = fixture().await;
        f.monitor.set_host_online(false).await;
        let writes = f.remote.write_count();

        f.store.set_quantity("5e", 1, USER).await;

        assert_eq!(f.remote.write_count(), writes);
        assert_eq!(f.queue.pending_count().await, 2);
        assert_eq!(f.store.grand_total().await, 500);
        assert_eq!(f.store.sync_status().await, SyncPhase::Idle);

        f.monitor.set_host_online(true).await;
        let report = f.queue.drain().await;
        assert_eq!(report.succeeded, 2);
        assert_eq!(f.gateway.get_savings(USER).await.unwrap().unwrap().total_eur, 500);
    }

    #[tokio::test]
    async fn test_failed_write_sets_error_and_queues() {
        let f = fixture().await;
        f.remote.fail_collection(Collection::Goals).await;

        f.store.add_goal(goal("g1"), USER).await;

        assert_eq!(f.store.goals().await.len(), 1);
        assert_eq!(f.store.sync_status().await, SyncPhase::Error);
        assert!(f.store.error_message().await.is_some());
        assert_eq!(f.queue.pending_collections(USER).await.len(), 1);

        f.store.clear_error().await;
        assert_eq!(f.store.error_message().await, None);
    }

    #[tokio::test]
    async fn test_queued_collection_keeps_write_order() {
        let f = fixture().await;
        f.remote.fail_collection(Collection::Goals).await;
        f.store.add_goal(goal("g1"), USER).await;
        f.remote.heal_collection(Collection::Goals).await;

        let patch = GoalPatch {
            title: Some("renamed".to_string()),
            ..GoalPatch::default()
        };
        f.store.update_goal("g1", patch, USER).await;
        assert_eq!(f.queue.pending_count().await, 2);

        f.queue.drain().await;
        let goals = f.gateway.list_goals(USER).await.unwrap();
        assert_eq!(goals[0].title, "renamed");
    }

    #[tokio::test]
    async fn test_preference_changes_merge_remotely() {
        let f = fixture().await;
        f.store.set_theme(Theme::Dark, USER).await;
        f.store.set_language(Language::En, USER).await;
        f.store.set_show_bgn(true, USER).await;

        let remote = f.gateway.get_profile(USER).await.unwrap().unwrap().preferences;
        assert_eq!(remote.theme, Theme::Dark);
        assert_eq!(remote.language, Language::En);
        assert!(remote.show_bgn());
        assert!(f.store.snapshot().await.show_bgn());
    }

    #[tokio::test]
    async fn test_listening_is_idempotent() {
        let f = fixture().await;
        f.store.start_listening(USER).await;
        f.store.start_listening(USER).await;
        assert!(f.store.is_listening());
        assert_eq!(f.remote.subscriber_count(), 4);

        f.store.stop_listening().await;
        f.store.stop_listening().await;
        assert!(!f.store.is_listening());
        let remote = f.remote.clone();
        eventually(|| {
            let remote = remote.clone();
            async move { remote.subscriber_count() == 0 }
        })
        .await;
    }

    #[tokio::test]
    async fn test_remote_changes_are_projected() {
        let f = fixture().await;
        f.store.start_listening(USER).await;

        f.gateway.add_goal(USER, &goal("from-other-device")).await.unwrap();
        let store = f.store.clone();
        eventually(|| {
            let store = store.clone();
            async move { store.goals().await.iter().any(|g| g.id == "from-other-device") }
        })
        .await;
        f.store.stop_listening().await;
    }

    #[tokio::test]
    async fn test_echo_with_pending_writes_is_merged() {
        let f = fixture().await;
        f.store.start_listening(USER).await;
        f.monitor.set_host_online(false).await;
        f.store.add_goal(goal("local"), USER).await;

        f.gateway.add_goal(USER, &goal("remote")).await.unwrap();
        let store = f.store.clone();
        eventually(|| {
            let store = store.clone();
            async move { store.goals().await.len() == 2 }
        })
        .await;
        f.store.stop_listening().await;
    }

    #[tokio::test]
    async fn test_manual_policy_parks_conflict() {
        let policy = ReconcilePolicy {
            denominations: ResolutionStrategy::Manual,
            ..ReconcilePolicy::default()
        };
        let f = fixture_with(policy).await;
        f.store.start_listening(USER).await;
        f.monitor.set_host_online(false).await;
        f.store.set_quantity("1e", 2, USER).await;

        let mut remote = euro_catalog();
        remote[6].quantity = 5;
        f.gateway.save_savings(USER, &remote).await.unwrap();

        let store = f.store.clone();
        eventually(|| {
            let store = store.clone();
            async move { !store.unresolved_conflicts().await.is_empty() }
        })
        .await;
        assert_eq!(f.store.grand_total().await, 200);

        f.monitor.set_host_online(true).await;
        f.store
            .resolve_conflict(Collection::Savings, ResolutionStrategy::Merge)
            .await
            .unwrap();
        assert!(f.store.unresolved_conflicts().await.is_empty());
        assert_eq!(f.store.grand_total().await, 500);
        f.store.stop_listening().await;
    }

    #[tokio::test]
    async fn test_history_crud_is_optimistic() {
        let f = fixture().await;
        let entry = create_manual_entry("Gift", 2_000, None);
        f.store.add_history_entry(entry.clone(), USER).await;
        assert_eq!(f.store.history().await.len(), 1);

        let patch = HistoryPatch {
            title: Some("Birthday gift".to_string()),
            description: None,
        };
        f.store.update_history_entry(&entry.id, patch, USER).await;
        assert_eq!(f.store.history().await[0].title.as_deref(), Some("Birthday gift"));
        assert_eq!(
            f.gateway.list_history(USER).await.unwrap()[0].title.as_deref(),
            Some("Birthday gift")
        );

        f.store.delete_history_entry(&entry.id, USER).await;
        assert!(f.store.history().await.is_empty());
        assert!(f.gateway.list_history(USER).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_goal_progress_and_clear() {
        let f = fixture().await;
        f.store.add_goal(goal("g1"), USER).await;
        f.store.set_quantity("50e", 1, USER).await;
        assert_eq!(f.store.goal_progress("g1").await, 50.0);
        assert_eq!(f.store.goal_progress("missing").await, 0.0);

        f.store.clear_goals(USER).await;
        assert!(f.store.goals().await.is_empty());
        assert!(f.gateway.list_goals(USER).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_statistics_are_stored_on_profile() {
        let f = fixture().await;
        let statistics = HistoryStatistics {
            total_snapshots: 2,
            total_saved_eur: 300,
            total_saved_bgn: convert_eur_to_bgn(300),
            ..HistoryStatistics::default()
        };
        f.store.update_statistics(statistics.clone(), USER).await;
        let profile = f.gateway.get_profile(USER).await.unwrap().unwrap();
        assert_eq!(profile.statistics, Some(statistics));
    }

    #[tokio::test]
    async fn test_missing_user_is_a_noop() {
        let f = fixture().await;
        let writes = f.remote.write_count();
        f.store.set_quantity("1e", 4, "").await;
        f.store.add_goal(goal("g"), "").await;
        assert_eq!(f.remote.write_count(), writes);
        assert_eq!(f.store.grand_total().await, 0);
    }

    #[tokio::test]
    async fn test_reset_returns_to_defaults() {
        let f = fixture().await;
        f.store.start_listening(USER).await;
        f.store.set_quantity("1e", 4, USER).await;

        let mut events = f.store.subscribe();
        f.store.reset().await;

        let state = f.store.snapshot().await;
        assert_eq!(state, ProjectionState::default());
        assert!(!f.store.is_listening());

        let mut saw_reset = false;
        while let Ok(event) = events.try_recv() {
            saw_reset |= event == StoreEvent::Reset;
        }
        assert!(saw_reset);
    }

    #[tokio::test]
    async fn test_late_write_failure_ignored_after_reset() {
        let f = fixture().await;
        f.remote.set_write_delay(Duration::from_millis(300));

        let store = f.store.clone();
        let write = tokio::spawn(async move { store.add_goal(goal("g1"), USER).await });
        eventually(|| {
            let store = f.store.clone();
            async move { store.goals().await.len() == 1 }
        })
        .await;

        f.store.reset().await;
        f.store.load_user_data("user-2").await;
        f.remote.set_unreachable(true);
        write.await.unwrap();

        let state = f.store.snapshot().await;
        assert_eq!(state.user_id.as_deref(), Some("user-2"));
        assert_eq!(state.sync_status, SyncPhase::Idle);
        assert_eq!(state.error_message, None);
        assert!(state.goals.is_empty());
    }

    #[tokio::test]
    async fn test_late_write_success_ignored_after_user_switch() {
        let f = fixture().await;
        f.remote.set_write_delay(Duration::from_millis(300));

        let store = f.store.clone();
        let write = tokio::spawn(async move { store.set_quantity("1e", 2, USER).await });
        eventually(|| {
            let store = f.store.clone();
            async move { store.grand_total().await == 200 }
        })
        .await;

        f.store.load_user_data("user-2").await;
        assert_eq!(f.store.sync_status().await, SyncPhase::Idle);
        write.await.unwrap();

        let state = f.store.snapshot().await;
        assert_eq!(state.user_id.as_deref(), Some("user-2"));
        assert_eq!(state.sync_status, SyncPhase::Idle);
        assert_eq!(state.last_sync_time, None);
        assert!(state.history.is_empty());
        assert_eq!(calculate_total(&state.denominations), 0);
    }

    #[tokio::test]
    async fn test_malformed_patch_is_not_sent() {
        let f = fixture().await;
        let writes = f.remote.write_count();
        f.store
            .update_history_entry("h1", HistoryPatch::default(), USER)
            .await;

        assert_eq!(f.remote.write_count(), writes);
        assert_eq!(f.queue.pending_count().await, 0);
        assert_eq!(f.store.sync_status().await, SyncPhase::Error);
        assert!(f.store.error_message().await.is_some());
    }

    #[tokio::test]
    async fn test_sync_now_offline_keeps_queue_and_time() {
        let f = fixture().await;
        f.monitor.set_host_online(false).await;
        f.store.add_goal(goal("g1"), USER).await;

        assert!(!f.store.sync_now(USER).await);

        assert_eq!(f.queue.pending_count().await, 1);
        assert_eq!(f.store.sync_status().await, SyncPhase::Idle);
        assert_eq!(f.store.snapshot().await.last_sync_time, None);
        assert!(f.monitor.sync_status().await.last_sync_time.is_none());
    }

    #[tokio::test]
    async fn test_sync_now_reports_load_failures() {
        let f = fixture().await;
        f.remote.fail_collection(Collection::History).await;

        assert!(!f.store.sync_now(USER).await);

        assert_eq!(f.store.sync_status().await, SyncPhase::Error);
        assert!(f.store.error_message().await.unwrap().contains("history"));
        assert!(f.monitor.sync_status().await.last_sync_time.is_none());
    }

    #[tokio::test]
    async fn test_sync_now_drains_and_reloads() {
        let f = fixture().await;
        f.monitor.set_host_online(false).await;
        f.store.add_goal(goal("g1"), USER).await;
        f.monitor.set_host_online(true).await;

        assert!(f.store.sync_now(USER).await);

        assert_eq!(f.queue.pending_count().await, 0);
        assert_eq!(f.store.goals().await.len(), 1);
        assert_eq!(f.store.sync_status().await, SyncPhase::Success);
        assert!(f.monitor.sync_status().await.last_sync_time.is_some());
    }
}
