//! Legacy snapshot migration.
//!
//! Before the remote store existed, all data lived in one flat local
//! snapshot. This module reads that snapshot, cleans it, and copies the
//! selected slices into the remote store for a signed-in user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::client::gateway::DocumentGateway;
use crate::client::local_db::{self, LocalStorage};
use crate::shared::currency::{calculate_total, convert_eur_to_bgn, euro_catalog};
use crate::shared::error::{Result, SyncError};
use crate::shared::model::{
    clamp_quantity, Currency, Denomination, DenominationType, HistoryEntry, HistoryStatistics, Language, Preferences,
    SavingsGoal, Theme,
};

/// Storage key of the legacy snapshot
pub const LEGACY_SNAPSHOT_KEY: &str = "legacy:snapshot";

/// Flat pre-sync snapshot of every slice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacySnapshot {
    #[serde(default = "euro_catalog")]
    pub denominations: Vec<Denomination>,
    #[serde(default)]
    pub theme: Theme,
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub show_bgn: bool,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub history: Vec<HistoryEntry>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub goals: Vec<SavingsGoal>,
    #[serde(default)]
    pub statistics: Option<HistoryStatistics>,
}

impl Default for LegacySnapshot {
    fn default() -> Self {
        Self {
            denominations: euro_catalog(),
            theme: Theme::default(),
            language: Language::default(),
            show_bgn: false,
            last_updated: None,
            history: Vec::new(),
            goals: Vec::new(),
            statistics: None,
        }
    }
}

/// Decode each element on its own and skip the ones that do not fit
fn lenient_vec<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!("[Migration] Skipping malformed legacy record: {}", e);
                None
            }
        })
        .collect())
}

impl LegacySnapshot {
    pub async fn load(storage: &dyn LocalStorage) -> Result<Option<Self>> {
        local_db::read_json(storage, LEGACY_SNAPSHOT_KEY).await
    }

    pub async fn save(&self, storage: &dyn LocalStorage) -> Result<()> {
        local_db::write_json(storage, LEGACY_SNAPSHOT_KEY, self).await
    }

    pub async fn clear(storage: &dyn LocalStorage) -> Result<()> {
        storage.remove(LEGACY_SNAPSHOT_KEY).await
    }

    pub async fn exists(storage: &dyn LocalStorage) -> Result<bool> {
        Ok(storage
            .get(LEGACY_SNAPSHOT_KEY)
            .await?
            .map_or(false, |raw| !raw.trim().is_empty()))
    }

    pub fn preferences(&self) -> Preferences {
        Preferences {
            theme: self.theme,
            language: self.language,
            currency: if self.show_bgn { Currency::BGN } else { Currency::EUR },
        }
    }

    /// Clamp counts and drop records that cannot be migrated
    pub fn clean(mut self) -> Self {
        for denomination in &mut self.denominations {
            denomination.quantity = clamp_quantity(denomination.quantity);
        }
        self.history
            .retain(|entry| !entry.id.trim().is_empty() && entry.total_bgn.is_finite());
        self.goals
            .retain(|goal| !goal.id.trim().is_empty() && !goal.title.trim().is_empty());
        self
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for denomination in &self.denominations {
            if denomination.id.trim().is_empty() || denomination.label.trim().is_empty() {
                return Err(SyncError::validation("denominations", "id and label are required"));
            }
            if !seen.insert(denomination.id.as_str()) {
                return Err(SyncError::validation(
                    "denominations",
                    format!("duplicate denomination '{}'", denomination.id),
                ));
            }
            if denomination.value <= 0 {
                return Err(SyncError::validation(
                    "denominations",
                    format!("'{}' has no positive value", denomination.id),
                ));
            }
        }
        Ok(())
    }

    pub fn migration_stats(&self) -> MigrationStats {
        let count_of = |kind: DenominationType| -> i64 {
            self.denominations
                .iter()
                .filter(|d| d.kind == kind)
                .map(|d| d.quantity)
                .sum()
        };
        let total_value_eur = calculate_total(&self.denominations);
        MigrationStats {
            total_denominations: self.denominations.len(),
            total_coins: count_of(DenominationType::Coin),
            total_banknotes: count_of(DenominationType::Banknote),
            total_value_eur,
            total_value_bgn: convert_eur_to_bgn(total_value_eur),
            history_entries: self.history.len(),
            goals: self.goals.len(),
            has_data: total_value_eur > 0 || !self.history.is_empty() || !self.goals.is_empty(),
        }
    }

    pub fn migration_summary(&self) -> MigrationSummary {
        let stats = self.migration_stats();
        let mut items_to_migrate = Vec::new();
        if stats.total_denominations > 0 {
            items_to_migrate.push("Denominations");
        }
        if stats.history_entries > 0 {
            items_to_migrate.push("History Entries");
        }
        if stats.goals > 0 {
            items_to_migrate.push("Savings Goals");
        }
        items_to_migrate.push("User Preferences");

        MigrationSummary {
            items_to_migrate,
            total_items: stats.total_denominations + stats.history_entries + stats.goals + 1,
            estimated_size: serde_json::to_string(self).map(|json| json.len()).unwrap_or(0),
            last_updated: self.last_updated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStats {
    pub total_denominations: usize,
    pub total_coins: i64,
    pub total_banknotes: i64,
    pub total_value_eur: i64,
    pub total_value_bgn: f64,
    pub history_entries: usize,
    pub goals: usize,
    pub has_data: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSummary {
    pub items_to_migrate: Vec<&'static str>,
    pub total_items: usize,
    /// Serialized size in bytes
    pub estimated_size: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Slices to copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationOptions {
    pub include_denominations: bool,
    pub include_history: bool,
    pub include_goals: bool,
    pub include_preferences: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            include_denominations: true,
            include_history: true,
            include_goals: true,
            include_preferences: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub preferences: bool,
    pub denominations: bool,
    pub history_entries: usize,
    pub goals: usize,
}

/// Copy a cleaned legacy snapshot into the remote store
///
/// Stops at the first failed write. Records already written stay, and a
/// rerun overwrites them by id.
pub async fn migrate_to_remote(
    gateway: &DocumentGateway,
    user_id: &str,
    snapshot: LegacySnapshot,
    options: MigrationOptions,
) -> Result<MigrationReport> {
    if user_id.is_empty() {
        return Err(SyncError::NotAuthenticated);
    }
    let snapshot = snapshot.clean();
    snapshot.validate()?;
    let mut report = MigrationReport::default();

    if options.include_preferences {
        gateway.update_preferences(user_id, &snapshot.preferences()).await?;
        if let Some(statistics) = &snapshot.statistics {
            gateway.update_statistics(user_id, statistics).await?;
        }
        report.preferences = true;
    }
    if options.include_denominations {
        gateway.save_savings(user_id, &snapshot.denominations).await?;
        report.denominations = true;
    }
    if options.include_history {
        for entry in &snapshot.history {
            gateway.add_history_entry(user_id, entry).await?;
            report.history_entries += 1;
        }
    }
    if options.include_goals {
        for goal in &snapshot.goals {
            gateway.add_goal(user_id, goal).await?;
            report.goals += 1;
        }
    }

    tracing::info!(
        "[Migration] Migrated {} history entries and {} goals for {}",
        report.history_entries,
        report.goals,
        user_id
    );
    Ok(report)
}
