//! Savings Data Model
//!
//! Entity types synchronized between the local projection and the remote
//! document store. Field names serialize in camelCase so documents written by
//! any client of the remote store stay readable.
//!
//! All money amounts are integer minor units (cents). The only floating-point
//! amount is `HistoryEntry::total_bgn`, which is frozen at creation time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::shared::error::SyncError;

/// Logical collection in the remote document store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    /// User profile document holding preferences and statistics
    Profile,
    /// Single `current` document holding the denomination counts
    Savings,
    /// History log entries
    History,
    /// Savings goals
    Goals,
}

impl Collection {
    /// All collections in load order
    pub const ALL: [Collection; 4] = [
        Collection::Profile,
        Collection::Savings,
        Collection::History,
        Collection::Goals,
    ];

    /// Path segment used by remote backends
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Profile => "profile",
            Collection::Savings => "savings",
            Collection::History => "history",
            Collection::Goals => "goals",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "profile" => Ok(Collection::Profile),
            "savings" => Ok(Collection::Savings),
            "history" => Ok(Collection::History),
            "goals" => Ok(Collection::Goals),
            other => Err(SyncError::validation("collection", format!("unknown collection '{}'", other))),
        }
    }
}

/// Policy for settling diverging local and remote versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    /// Remote replaces local
    LastWriteWins,
    /// Local is kept, remote discarded
    FirstWriteWins,
    /// Collection-specific merge
    Merge,
    /// Defer to the user
    Manual,
}

impl FromStr for ResolutionStrategy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last-write-wins" => Ok(ResolutionStrategy::LastWriteWins),
            "first-write-wins" => Ok(ResolutionStrategy::FirstWriteWins),
            "merge" => Ok(ResolutionStrategy::Merge),
            "manual" => Ok(ResolutionStrategy::Manual),
            other => Err(SyncError::validation("strategy", format!("unknown strategy '{}'", other))),
        }
    }
}

/// Physical form of a denomination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DenominationType {
    Coin,
    Banknote,
}

/// Largest count stored for a single denomination
///
/// Keeps `value * quantity` summed over the catalog well inside `i64`.
pub const MAX_QUANTITY: i64 = 1_000_000_000;

/// Clamp a requested count into `0..=MAX_QUANTITY`
pub fn clamp_quantity(quantity: i64) -> i64 {
    quantity.clamp(0, MAX_QUANTITY)
}

/// One entry of the fixed coin/banknote catalog with its current count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Denomination {
    /// Stable catalog id such as `50c` or `20e`
    pub id: String,
    /// Display label
    pub label: String,
    /// Face value in cents
    pub value: i64,
    /// Coin or banknote
    #[serde(rename = "type")]
    pub kind: DenominationType,
    /// Number of pieces held, never negative
    pub quantity: i64,
}

impl Denomination {
    /// Value of all pieces of this denomination in cents
    ///
    /// Saturates instead of overflowing on counts that bypassed clamping.
    pub fn subtotal(&self) -> i64 {
        self.value.saturating_mul(self.quantity)
    }
}

/// Origin of a history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HistoryEntryType {
    /// Generated from the denomination counts
    Snapshot,
    /// Authored by the user
    ManualEntry,
}

impl HistoryEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryEntryType::Snapshot => "snapshot",
            HistoryEntryType::ManualEntry => "manual-entry",
        }
    }
}

/// Immutable record of the savings total at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Grand total in euro cents
    pub total_eur: i64,
    /// Total in leva, frozen at creation time
    pub total_bgn: f64,
    /// Copy of the catalog at snapshot time, empty for manual entries
    #[serde(default)]
    pub denominations: Vec<Denomination>,
    #[serde(rename = "type")]
    pub kind: HistoryEntryType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Currency a goal or the secondary display is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Currency {
    EUR,
    BGN,
}

/// Target amount the user is saving towards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingsGoal {
    pub id: String,
    pub title: String,
    /// Target in minor units of `target_currency`
    pub target_amount: i64,
    pub target_currency: Currency,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub achieved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Bg,
    En,
}

/// Per-user display preferences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub theme: Theme,
    pub language: Language,
    /// Secondary currency display, `BGN` means leva are shown
    pub currency: Currency,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            theme: Theme::Light,
            language: Language::Bg,
            currency: Currency::EUR,
        }
    }
}

impl Preferences {
    /// Whether leva totals are displayed next to euro totals
    pub fn show_bgn(&self) -> bool {
        self.currency == Currency::BGN
    }
}

/// Single field change to the preferences record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "camelCase")]
pub enum PreferenceChange {
    Theme(Theme),
    Language(Language),
    ShowBgn(bool),
}

impl PreferenceChange {
    /// Apply this one field onto an existing record
    pub fn apply_to(&self, preferences: &mut Preferences) {
        match *self {
            PreferenceChange::Theme(theme) => preferences.theme = theme,
            PreferenceChange::Language(language) => preferences.language = language,
            PreferenceChange::ShowBgn(show) => {
                preferences.currency = if show { Currency::BGN } else { Currency::EUR }
            }
        }
    }
}

/// Partial edit of a history entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl HistoryPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none()
    }

    pub fn apply_to(&self, entry: &mut HistoryEntry) {
        if let Some(title) = &self.title {
            entry.title = Some(title.clone());
        }
        if let Some(description) = &self.description {
            entry.description = Some(description.clone());
        }
    }
}

/// Partial edit of a goal. For the nullable dates, `Some(None)` clears the field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GoalPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_amount: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_currency: Option<Currency>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub achieved_at: Option<Option<DateTime<Utc>>>,
}

impl GoalPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.target_amount.is_none()
            && self.target_currency.is_none()
            && self.deadline.is_none()
            && self.achieved_at.is_none()
    }

    pub fn apply_to(&self, goal: &mut SavingsGoal) {
        if let Some(title) = &self.title {
            goal.title = title.clone();
        }
        if let Some(target_amount) = self.target_amount {
            goal.target_amount = target_amount;
        }
        if let Some(currency) = self.target_currency {
            goal.target_currency = currency;
        }
        if let Some(deadline) = self.deadline {
            goal.deadline = deadline;
        }
        if let Some(achieved_at) = self.achieved_at {
            goal.achieved_at = achieved_at;
        }
    }
}

// present-but-null must stay distinguishable from absent
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Aggregates over one comparison window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PeriodSummary {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub total_eur: i64,
    pub total_bgn: f64,
    pub entry_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PeriodComparison {
    /// The earlier window
    pub period1: PeriodSummary,
    /// The most recent window
    pub period2: PeriodSummary,
}

/// Derived figures over the history log, stored on the profile document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStatistics {
    pub total_snapshots: usize,
    pub total_saved_eur: i64,
    pub total_saved_bgn: f64,
    pub average_daily_saving: f64,
    pub best_saving_day: i64,
    pub current_streak: usize,
    pub longest_streak: usize,
    pub period_comparison: PeriodComparison,
}

/// Remote profile document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDocument {
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default)]
    pub statistics: Option<HistoryStatistics>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Remote `savings/current` document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingsDocument {
    pub denominations: Vec<Denomination>,
    pub total_eur: i64,
    pub total_bgn: f64,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_quantity() {
        assert_eq!(clamp_quantity(-5), 0);
        assert_eq!(clamp_quantity(42), 42);
        assert_eq!(clamp_quantity(i64::MAX), MAX_QUANTITY);
    }

    #[test]
    fn test_denomination_serializes_type_field() {
        let denomination = Denomination {
            id: "1e".to_string(),
            label: "1€".to_string(),
            value: 100,
            kind: DenominationType::Coin,
            quantity: 3,
        };
        let json = serde_json::to_value(&denomination).unwrap();
        assert_eq!(json["type"], "coin");
        assert_eq!(json["quantity"], 3);
        assert_eq!(denomination.subtotal(), 300);
    }

    #[test]
    fn test_history_entry_type_wire_names() {
        let json = serde_json::to_string(&HistoryEntryType::ManualEntry).unwrap();
        assert_eq!(json, "\"manual-entry\"");
        assert_eq!(HistoryEntryType::Snapshot.as_str(), "snapshot");
    }

    #[test]
    fn test_collection_parse() {
        assert_eq!("goals".parse::<Collection>().unwrap(), Collection::Goals);
        assert!("unknown".parse::<Collection>().is_err());
        assert_eq!(Collection::Savings.to_string(), "savings");
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("merge".parse::<ResolutionStrategy>().unwrap(), ResolutionStrategy::Merge);
        assert_eq!(
            "last-write-wins".parse::<ResolutionStrategy>().unwrap(),
            ResolutionStrategy::LastWriteWins
        );
        assert!("newest".parse::<ResolutionStrategy>().is_err());
    }

    #[test]
    fn test_preference_change_apply() {
        let mut preferences = Preferences::default();
        PreferenceChange::ShowBgn(true).apply_to(&mut preferences);
        PreferenceChange::Theme(Theme::Dark).apply_to(&mut preferences);
        assert!(preferences.show_bgn());
        assert_eq!(preferences.theme, Theme::Dark);
        assert_eq!(preferences.language, Language::Bg);
    }

    #[test]
    fn test_goal_patch_clears_deadline() {
        let patch: GoalPatch = serde_json::from_str(r#"{"deadline": null}"#).unwrap();
        assert_eq!(patch.deadline, Some(None));
        assert!(!patch.is_empty());

        let untouched: GoalPatch = serde_json::from_str("{}").unwrap();
        assert!(untouched.is_empty());

        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, serde_json::json!({ "deadline": null }));
    }

    #[test]
    fn test_history_patch_apply() {
        let mut entry = HistoryEntry {
            id: "h1".to_string(),
            timestamp: Utc::now(),
            total_eur: 100,
            total_bgn: 1.95583,
            denominations: vec![],
            kind: HistoryEntryType::ManualEntry,
            title: Some("Old".to_string()),
            description: None,
        };
        HistoryPatch { title: None, description: Some("note".to_string()) }.apply_to(&mut entry);
        assert_eq!(entry.title.as_deref(), Some("Old"));
        assert_eq!(entry.description.as_deref(), Some("note"));
    }

    #[test]
    fn test_profile_document_tolerates_missing_fields() {
        let profile: ProfileDocument = serde_json::from_str("{}").unwrap();
        assert_eq!(profile.preferences, Preferences::default());
        assert!(profile.statistics.is_none());
    }

    #[test]
    fn test_goal_round_trip_keeps_optional_dates() {
        let goal = SavingsGoal {
            id: "g1".to_string(),
            title: "Bike".to_string(),
            target_amount: 50_000,
            target_currency: Currency::EUR,
            deadline: None,
            created_at: Utc::now(),
            achieved_at: None,
        };
        let json = serde_json::to_value(&goal).unwrap();
        assert_eq!(json["targetAmount"], 50_000);
        assert_eq!(json["targetCurrency"], "EUR");
        let back: SavingsGoal = serde_json::from_value(json).unwrap();
        assert_eq!(back, goal);
    }
}
