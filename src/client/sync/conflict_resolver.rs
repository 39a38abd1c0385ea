//! # Conflict Resolution
//!
//! Settles diverging local and remote versions of the four synced slices.
//! Everything here is pure: no I/O, no clocks besides the detection stamp.
//!
//! ## Strategies
//!
//! - **Last write wins**: the remote version replaces the local one
//! - **First write wins**: the local version is kept
//! - **Merge**: denominations keep the higher count per id, history and goals
//!   are unioned by id, preferences keep the local record
//! - **Manual**: no winner is picked, the caller gets
//!   [`SyncError::ManualResolutionRequired`] and must ask the user

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::shared::error::{Result, SyncError};
use crate::shared::model::{Collection, Denomination, HistoryEntry, Preferences, ResolutionStrategy, SavingsGoal};

/// One side of a comparison, every slice the engine syncs
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub denominations: Vec<Denomination>,
    pub history: Vec<HistoryEntry>,
    pub goals: Vec<SavingsGoal>,
    pub preferences: Preferences,
}

/// Version of a single slice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ConflictData {
    Denominations(Vec<Denomination>),
    History(Vec<HistoryEntry>),
    Goals(Vec<SavingsGoal>),
    Preferences(Preferences),
}

impl ConflictData {
    /// Collection the slice is stored in
    pub fn collection(&self) -> Collection {
        match self {
            ConflictData::Denominations(_) => Collection::Savings,
            ConflictData::History(_) => Collection::History,
            ConflictData::Goals(_) => Collection::Goals,
            ConflictData::Preferences(_) => Collection::Profile,
        }
    }
}

/// Diverging versions of one slice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub collection: Collection,
    pub local: ConflictData,
    pub remote: ConflictData,
    pub detected_at: DateTime<Utc>,
    /// Winning version once resolved
    #[serde(default)]
    pub resolved: Option<ConflictData>,
    /// Strategy that produced `resolved`, `Manual` for failed attempts
    #[serde(default)]
    pub strategy: Option<ResolutionStrategy>,
}

impl Conflict {
    pub fn new(local: ConflictData, remote: ConflictData) -> Self {
        Self {
            collection: local.collection(),
            local,
            remote,
            detected_at: Utc::now(),
            resolved: None,
            strategy: None,
        }
    }
}

/// Partition of a batch of conflicts
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolution {
    pub resolved: Vec<Conflict>,
    pub unresolved: Vec<Conflict>,
}

/// Counts for a user-facing notice
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictSummary {
    pub total_conflicts: usize,
    pub resolved_count: usize,
    pub unresolved_count: usize,
    pub collections: Vec<Collection>,
}

pub fn resolve_denominations(
    local: &[Denomination],
    remote: &[Denomination],
    strategy: ResolutionStrategy,
) -> Result<Vec<Denomination>> {
    match strategy {
        ResolutionStrategy::LastWriteWins => Ok(remote.to_vec()),
        ResolutionStrategy::FirstWriteWins => Ok(local.to_vec()),
        ResolutionStrategy::Merge => {
            let mut merged: Vec<Denomination> = local
                .iter()
                .map(|ours| {
                    let theirs = remote
                        .iter()
                        .find(|d| d.id == ours.id)
                        .map(|d| d.quantity)
                        .unwrap_or(0);
                    Denomination {
                        quantity: ours.quantity.max(theirs),
                        ..ours.clone()
                    }
                })
                .collect();
            merged.extend(
                remote
                    .iter()
                    .filter(|theirs| !local.iter().any(|ours| ours.id == theirs.id))
                    .cloned(),
            );
            Ok(merged)
        }
        ResolutionStrategy::Manual => Err(SyncError::manual_resolution(Collection::Savings.as_str())),
    }
}

pub fn resolve_history(
    local: &[HistoryEntry],
    remote: &[HistoryEntry],
    strategy: ResolutionStrategy,
) -> Result<Vec<HistoryEntry>> {
    match strategy {
        ResolutionStrategy::LastWriteWins => Ok(remote.to_vec()),
        ResolutionStrategy::FirstWriteWins => Ok(local.to_vec()),
        ResolutionStrategy::Merge => {
            let mut merged = union_by_id(local, remote, |entry| entry.id.as_str());
            merged.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            Ok(merged)
        }
        ResolutionStrategy::Manual => Err(SyncError::manual_resolution(Collection::History.as_str())),
    }
}

pub fn resolve_goals(
    local: &[SavingsGoal],
    remote: &[SavingsGoal],
    strategy: ResolutionStrategy,
) -> Result<Vec<SavingsGoal>> {
    match strategy {
        ResolutionStrategy::LastWriteWins => Ok(remote.to_vec()),
        ResolutionStrategy::FirstWriteWins => Ok(local.to_vec()),
        ResolutionStrategy::Merge => Ok(union_by_id(local, remote, |goal| goal.id.as_str())),
        ResolutionStrategy::Manual => Err(SyncError::manual_resolution(Collection::Goals.as_str())),
    }
}

/// Preferences are a single record, so merge keeps the local one
pub fn resolve_preferences(
    local: &Preferences,
    remote: &Preferences,
    strategy: ResolutionStrategy,
) -> Result<Preferences> {
    match strategy {
        ResolutionStrategy::LastWriteWins => Ok(*remote),
        ResolutionStrategy::FirstWriteWins | ResolutionStrategy::Merge => Ok(*local),
        ResolutionStrategy::Manual => Err(SyncError::manual_resolution(Collection::Profile.as_str())),
    }
}

/// Local items first, then remote items with unseen ids
fn union_by_id<T: Clone>(local: &[T], remote: &[T], id: impl Fn(&T) -> &str) -> Vec<T> {
    let mut seen = HashSet::new();
    local
        .iter()
        .chain(remote.iter())
        .filter(|item| seen.insert(id(*item).to_string()))
        .cloned()
        .collect()
}

/// Winning version of one conflict under `strategy`
pub fn resolve(conflict: &Conflict, strategy: ResolutionStrategy) -> Result<ConflictData> {
    match (&conflict.local, &conflict.remote) {
        (ConflictData::Denominations(local), ConflictData::Denominations(remote)) => {
            resolve_denominations(local, remote, strategy).map(ConflictData::Denominations)
        }
        (ConflictData::History(local), ConflictData::History(remote)) => {
            resolve_history(local, remote, strategy).map(ConflictData::History)
        }
        (ConflictData::Goals(local), ConflictData::Goals(remote)) => {
            resolve_goals(local, remote, strategy).map(ConflictData::Goals)
        }
        (ConflictData::Preferences(local), ConflictData::Preferences(remote)) => {
            resolve_preferences(local, remote, strategy).map(ConflictData::Preferences)
        }
        _ => Err(SyncError::validation(
            "conflict",
            format!("local and remote versions of {} have different shapes", conflict.collection),
        )),
    }
}

/// Slices whose local and remote versions are not structurally equal
///
/// Comparison is deep and order-sensitive. `last_sync_time` is only
/// reported in the log.
pub fn detect_conflicts(local: &SyncState, remote: &SyncState, last_sync_time: Option<DateTime<Utc>>) -> Vec<Conflict> {
    let mut conflicts = Vec::new();

    if local.denominations != remote.denominations {
        conflicts.push(Conflict::new(
            ConflictData::Denominations(local.denominations.clone()),
            ConflictData::Denominations(remote.denominations.clone()),
        ));
    }
    if local.history != remote.history {
        conflicts.push(Conflict::new(
            ConflictData::History(local.history.clone()),
            ConflictData::History(remote.history.clone()),
        ));
    }
    if local.goals != remote.goals {
        conflicts.push(Conflict::new(
            ConflictData::Goals(local.goals.clone()),
            ConflictData::Goals(remote.goals.clone()),
        ));
    }
    if local.preferences != remote.preferences {
        conflicts.push(Conflict::new(
            ConflictData::Preferences(local.preferences),
            ConflictData::Preferences(remote.preferences),
        ));
    }

    if !conflicts.is_empty() {
        tracing::debug!(
            "[Conflicts] {} diverging slices since {}",
            conflicts.len(),
            last_sync_time.map(|t| t.to_rfc3339()).unwrap_or_else(|| "first sync".to_string())
        );
    }
    conflicts
}

/// Apply one strategy to every conflict
///
/// A failing resolution moves that conflict to `unresolved` and the batch
/// carries on.
pub fn auto_resolve_conflicts(conflicts: Vec<Conflict>, strategy: ResolutionStrategy) -> ConflictResolution {
    let mut resolution = ConflictResolution::default();

    for mut conflict in conflicts {
        match resolve(&conflict, strategy) {
            Ok(resolved) => {
                conflict.resolved = Some(resolved);
                conflict.strategy = Some(strategy);
                resolution.resolved.push(conflict);
            }
            Err(e) => {
                tracing::debug!("[Conflicts] {} left unresolved: {}", conflict.collection, e);
                conflict.strategy = Some(ResolutionStrategy::Manual);
                resolution.unresolved.push(conflict);
            }
        }
    }

    resolution
}

pub fn conflict_summary(resolution: &ConflictResolution) -> ConflictSummary {
    let collections = resolution
        .resolved
        .iter()
        .chain(resolution.unresolved.iter())
        .map(|conflict| conflict.collection)
        .collect();
    ConflictSummary {
        total_conflicts: resolution.resolved.len() + resolution.unresolved.len(),
        resolved_count: resolution.resolved.len(),
        unresolved_count: resolution.unresolved.len(),
        collections,
    }
}
