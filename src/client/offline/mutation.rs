//! # Queued Mutations
//!
//! Remote writes that could not be delivered, modelled per collection with
//! static payload shapes. Malformed mutations are rejected by
//! [`SyncMutation::validate`] before they reach the queue.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::client::gateway::{DocumentGateway, PROFILE_DOCUMENT_ID, SAVINGS_DOCUMENT_ID};
use crate::shared::error::{Result, SyncError};
use crate::shared::model::{
    Collection, Denomination, GoalPatch, HistoryEntry, HistoryPatch, HistoryStatistics, PreferenceChange,
    Preferences, SavingsGoal, MAX_QUANTITY,
};

/// Write kind of a queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

/// A remote write, tagged by target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum SyncMutation {
    /// Merge one preference field into the remote profile
    PatchPreferences { change: PreferenceChange },
    /// Replace the whole preferences record
    SavePreferences { preferences: Preferences },
    /// Replace the denomination snapshot
    SaveSavings { denominations: Vec<Denomination> },
    /// Replace the profile statistics
    SaveStatistics { statistics: HistoryStatistics },
    AddHistory { entry: HistoryEntry },
    PatchHistory { id: String, patch: HistoryPatch },
    DeleteHistory { id: String },
    ClearHistory,
    AddGoal { goal: SavingsGoal },
    PatchGoal { id: String, patch: GoalPatch },
    DeleteGoal { id: String },
    ClearGoals,
}

fn require_id(field: &str, id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(SyncError::validation(field, "id cannot be empty"));
    }
    Ok(())
}

impl SyncMutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            SyncMutation::AddHistory { .. } | SyncMutation::AddGoal { .. } => MutationKind::Create,
            SyncMutation::PatchPreferences { .. }
            | SyncMutation::SavePreferences { .. }
            | SyncMutation::SaveSavings { .. }
            | SyncMutation::SaveStatistics { .. }
            | SyncMutation::PatchHistory { .. }
            | SyncMutation::PatchGoal { .. } => MutationKind::Update,
            SyncMutation::DeleteHistory { .. }
            | SyncMutation::ClearHistory
            | SyncMutation::DeleteGoal { .. }
            | SyncMutation::ClearGoals => MutationKind::Delete,
        }
    }

    pub fn collection(&self) -> Collection {
        match self {
            SyncMutation::PatchPreferences { .. }
            | SyncMutation::SavePreferences { .. }
            | SyncMutation::SaveStatistics { .. } => Collection::Profile,
            SyncMutation::SaveSavings { .. } => Collection::Savings,
            SyncMutation::AddHistory { .. }
            | SyncMutation::PatchHistory { .. }
            | SyncMutation::DeleteHistory { .. }
            | SyncMutation::ClearHistory => Collection::History,
            SyncMutation::AddGoal { .. }
            | SyncMutation::PatchGoal { .. }
            | SyncMutation::DeleteGoal { .. }
            | SyncMutation::ClearGoals => Collection::Goals,
        }
    }

    /// Target document, `None` for whole-collection writes
    pub fn document_id(&self) -> Option<&str> {
        match self {
            SyncMutation::PatchPreferences { .. }
            | SyncMutation::SavePreferences { .. }
            | SyncMutation::SaveStatistics { .. } => Some(PROFILE_DOCUMENT_ID),
            SyncMutation::SaveSavings { .. } => Some(SAVINGS_DOCUMENT_ID),
            SyncMutation::AddHistory { entry } => Some(&entry.id),
            SyncMutation::AddGoal { goal } => Some(&goal.id),
            SyncMutation::PatchHistory { id, .. }
            | SyncMutation::DeleteHistory { id }
            | SyncMutation::PatchGoal { id, .. }
            | SyncMutation::DeleteGoal { id } => Some(id),
            SyncMutation::ClearHistory | SyncMutation::ClearGoals => None,
        }
    }

    /// Reject payloads that can never succeed
    pub fn validate(&self) -> Result<()> {
        match self {
            SyncMutation::PatchPreferences { .. }
            | SyncMutation::SavePreferences { .. }
            | SyncMutation::SaveStatistics { .. } => Ok(()),
            SyncMutation::SaveSavings { denominations } => {
                if denominations.is_empty() {
                    return Err(SyncError::validation("denominations", "snapshot cannot be empty"));
                }
                let mut seen = HashSet::new();
                for denomination in denominations {
                    require_id("denominations.id", &denomination.id)?;
                    if !seen.insert(denomination.id.as_str()) {
                        return Err(SyncError::validation(
                            "denominations.id",
                            format!("duplicate denomination '{}'", denomination.id),
                        ));
                    }
                    if denomination.quantity < 0 {
                        return Err(SyncError::validation(
                            "denominations.quantity",
                            format!("negative quantity for '{}'", denomination.id),
                        ));
                    }
                    if denomination.quantity > MAX_QUANTITY {
                        return Err(SyncError::validation(
                            "denominations.quantity",
                            format!("quantity for '{}' exceeds {}", denomination.id, MAX_QUANTITY),
                        ));
                    }
                }
                Ok(())
            }
            SyncMutation::AddHistory { entry } => {
                require_id("entry.id", &entry.id)?;
                if entry.total_eur < 0 {
                    return Err(SyncError::validation("entry.totalEur", "total cannot be negative"));
                }
                Ok(())
            }
            SyncMutation::PatchHistory { id, patch } => {
                require_id("id", id)?;
                if patch.is_empty() {
                    return Err(SyncError::validation("patch", "nothing to update"));
                }
                Ok(())
            }
            SyncMutation::AddGoal { goal } => {
                require_id("goal.id", &goal.id)?;
                if goal.title.trim().is_empty() {
                    return Err(SyncError::validation("goal.title", "title cannot be empty"));
                }
                Ok(())
            }
            SyncMutation::PatchGoal { id, patch } => {
                require_id("id", id)?;
                if patch.is_empty() {
                    return Err(SyncError::validation("patch", "nothing to update"));
                }
                if matches!(&patch.title, Some(title) if title.trim().is_empty()) {
                    return Err(SyncError::validation("patch.title", "title cannot be empty"));
                }
                Ok(())
            }
            SyncMutation::DeleteHistory { id } | SyncMutation::DeleteGoal { id } => require_id("id", id),
            SyncMutation::ClearHistory | SyncMutation::ClearGoals => Ok(()),
        }
    }

    /// Perform the write through the gateway
    pub async fn apply(&self, gateway: &DocumentGateway, user_id: &str) -> Result<()> {
        match self {
            SyncMutation::PatchPreferences { change } => {
                // read-merge-write so concurrent edits of other fields survive
                let mut preferences = gateway
                    .get_profile(user_id)
                    .await?
                    .map(|profile| profile.preferences)
                    .unwrap_or_default();
                change.apply_to(&mut preferences);
                gateway.update_preferences(user_id, &preferences).await
            }
            SyncMutation::SavePreferences { preferences } => gateway.update_preferences(user_id, preferences).await,
            SyncMutation::SaveSavings { denominations } => gateway.save_savings(user_id, denominations).await,
            SyncMutation::SaveStatistics { statistics } => gateway.update_statistics(user_id, statistics).await,
            SyncMutation::AddHistory { entry } => gateway.add_history_entry(user_id, entry).await,
            SyncMutation::PatchHistory { id, patch } => gateway.update_history_entry(user_id, id, patch).await,
            SyncMutation::DeleteHistory { id } => gateway.delete_history_entry(user_id, id).await,
            SyncMutation::ClearHistory => gateway.clear_history(user_id).await,
            SyncMutation::AddGoal { goal } => gateway.add_goal(user_id, goal).await,
            SyncMutation::PatchGoal { id, patch } => gateway.update_goal(user_id, id, patch).await,
            SyncMutation::DeleteGoal { id } => gateway.delete_goal(user_id, id).await,
            SyncMutation::ClearGoals => gateway.clear_goals(user_id).await,
        }
    }
}
