//! History log and goal helpers.
//!
//! Entry construction, statistics over the log, filtering and export, and
//! goal progress. All functions are pure; callers pass `now` where the result
//! depends on the clock.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::shared::currency::{calculate_total, convert_eur_cents_to_bgn_cents, convert_eur_to_bgn};
use crate::shared::error::{Result, SyncError};
use crate::shared::model::{
    Currency, Denomination, HistoryEntry, HistoryEntryType, HistoryStatistics, PeriodComparison, PeriodSummary,
    SavingsGoal,
};

/// Length of each window in the period comparison
pub const COMPARISON_PERIOD_DAYS: i64 = 30;

/// Snapshot of the current denomination counts
pub fn create_snapshot_entry(denominations: &[Denomination]) -> HistoryEntry {
    let total_eur = calculate_total(denominations);
    HistoryEntry {
        id: Uuid::new_v4().to_string(),
        timestamp: Utc::now(),
        total_eur,
        total_bgn: convert_eur_to_bgn(total_eur),
        denominations: denominations.to_vec(),
        kind: HistoryEntryType::Snapshot,
        title: None,
        description: None,
    }
}

/// User-entered amount without a denomination breakdown
pub fn create_manual_entry(title: impl Into<String>, amount_eur: i64, description: Option<String>) -> HistoryEntry {
    HistoryEntry {
        id: Uuid::new_v4().to_string(),
        timestamp: Utc::now(),
        total_eur: amount_eur,
        total_bgn: convert_eur_to_bgn(amount_eur),
        denominations: Vec::new(),
        kind: HistoryEntryType::ManualEntry,
        title: Some(title.into()),
        description,
    }
}

/// Derived figures over the whole log
///
/// Entries may come in any order. Streaks count consecutive entries with a
/// non-zero total, the current streak ends at the newest entry. The period
/// comparison reports the newest balance inside the 30 days before `now`
/// (`period2`) and inside the 30 days before that (`period1`).
pub fn calculate_statistics(entries: &[HistoryEntry], now: DateTime<Utc>) -> HistoryStatistics {
    if entries.is_empty() {
        return HistoryStatistics::default();
    }

    let mut ordered: Vec<&HistoryEntry> = entries.iter().collect();
    ordered.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    let totals: Vec<i64> = ordered.iter().map(|entry| entry.total_eur).collect();
    let average_daily_saving = totals.iter().sum::<i64>() as f64 / totals.len() as f64;
    let best_saving_day = totals.iter().copied().max().unwrap_or(0);

    let mut run = 0;
    let mut longest_streak = 0;
    for total in &totals {
        if *total > 0 {
            run += 1;
            longest_streak = longest_streak.max(run);
        } else {
            run = 0;
        }
    }

    let latest = ordered[ordered.len() - 1];
    let period = Duration::days(COMPARISON_PERIOD_DAYS);

    HistoryStatistics {
        total_snapshots: entries
            .iter()
            .filter(|entry| entry.kind == HistoryEntryType::Snapshot)
            .count(),
        total_saved_eur: latest.total_eur,
        total_saved_bgn: latest.total_bgn,
        average_daily_saving,
        best_saving_day,
        current_streak: run,
        longest_streak,
        period_comparison: PeriodComparison {
            period1: summarize_period(&ordered, now - period - period, now - period),
            period2: summarize_period(&ordered, now - period, now),
        },
    }
}

/// `ordered` must be sorted oldest first
fn summarize_period(ordered: &[&HistoryEntry], start: DateTime<Utc>, end: DateTime<Utc>) -> PeriodSummary {
    let in_period: Vec<&&HistoryEntry> = ordered
        .iter()
        .filter(|entry| entry.timestamp >= start && entry.timestamp < end)
        .collect();

    let (total_eur, total_bgn) = in_period
        .last()
        .map(|entry| (entry.total_eur, entry.total_bgn))
        .unwrap_or((0, 0.0));

    PeriodSummary {
        start_date: Some(start),
        end_date: Some(end),
        total_eur,
        total_bgn,
        entry_count: in_period.len(),
    }
}

/// Criteria for narrowing the history log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryFilters {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Empty means every type
    pub entry_types: Vec<HistoryEntryType>,
    /// Case-insensitive title substring
    pub search_query: Option<String>,
}

pub fn filter_entries(entries: &[HistoryEntry], filters: &HistoryFilters) -> Vec<HistoryEntry> {
    let query = filters
        .search_query
        .as_deref()
        .filter(|q| !q.is_empty())
        .map(str::to_lowercase);

    entries
        .iter()
        .filter(|entry| filters.start.map_or(true, |start| entry.timestamp >= start))
        .filter(|entry| filters.end.map_or(true, |end| entry.timestamp <= end))
        .filter(|entry| filters.entry_types.is_empty() || filters.entry_types.contains(&entry.kind))
        .filter(|entry| match &query {
            Some(query) => entry
                .title
                .as_deref()
                .map_or(false, |title| title.to_lowercase().contains(query)),
            None => true,
        })
        .cloned()
        .collect()
}

/// Export encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = SyncError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(SyncError::validation("format", format!("unsupported export format '{}'", other))),
        }
    }
}

pub const CSV_HEADERS: [&str; 6] = ["Date", "Type", "Title", "Description", "Total EUR", "Total BGN"];

/// Render the (optionally filtered) log as CSV or pretty JSON
pub fn export_history(entries: &[HistoryEntry], format: ExportFormat, filters: Option<&HistoryFilters>) -> Result<String> {
    let selected = match filters {
        Some(filters) => filter_entries(entries, filters),
        None => entries.to_vec(),
    };

    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(&selected)?),
        ExportFormat::Csv => {
            let mut writer = csv::WriterBuilder::new()
                .terminator(csv::Terminator::Any(b'\n'))
                .from_writer(Vec::new());
            writer.write_record(CSV_HEADERS).map_err(csv_error)?;
            for entry in &selected {
                writer
                    .write_record([
                        entry.timestamp.format("%-m/%-d/%Y").to_string(),
                        entry.kind.as_str().to_string(),
                        entry.title.clone().unwrap_or_default(),
                        entry.description.clone().unwrap_or_default(),
                        format!("{:.2}", entry.total_eur as f64 / 100.0),
                        format!("{:.2}", entry.total_bgn),
                    ])
                    .map_err(csv_error)?;
            }
            let bytes = writer
                .into_inner()
                .map_err(|e| SyncError::serialization(format!("CSV error: {}", e)))?;
            let text = String::from_utf8(bytes).map_err(|e| SyncError::serialization(e.to_string()))?;
            Ok(text.trim_end_matches('\n').to_string())
        }
    }
}

fn csv_error(e: csv::Error) -> SyncError {
    SyncError::serialization(format!("CSV error: {}", e))
}

/// Current savings expressed in the goal's currency
fn total_in_goal_currency(goal: &SavingsGoal, total_eur: i64) -> i64 {
    match goal.target_currency {
        Currency::EUR => total_eur,
        Currency::BGN => convert_eur_cents_to_bgn_cents(total_eur),
    }
}

/// Percentage towards the goal, capped at 100
pub fn calculate_goal_progress(goal: Option<&SavingsGoal>, total_eur: i64) -> f64 {
    match goal {
        Some(goal) if goal.target_amount > 0 => {
            let current = total_in_goal_currency(goal, total_eur);
            (current as f64 / goal.target_amount as f64 * 100.0).min(100.0)
        }
        _ => 0.0,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalDetails {
    pub progress: f64,
    /// Minor units still missing, in the goal's currency
    pub remaining: i64,
    /// Whole days until the deadline, rounded up, never negative
    pub days_remaining: Option<i64>,
    pub is_achieved: bool,
    pub is_overdue: bool,
}

pub fn goal_details(goal: Option<&SavingsGoal>, total_eur: i64, now: DateTime<Utc>) -> GoalDetails {
    let Some(goal) = goal.filter(|goal| goal.target_amount > 0) else {
        return GoalDetails {
            progress: 0.0,
            remaining: 0,
            days_remaining: None,
            is_achieved: false,
            is_overdue: false,
        };
    };

    let current = total_in_goal_currency(goal, total_eur);
    let days_remaining = goal.deadline.map(|deadline| {
        let millis = (deadline - now).num_milliseconds();
        let day = Duration::days(1).num_milliseconds();
        // ceiling division for positive spans
        if millis <= 0 {
            0
        } else {
            (millis + day - 1) / day
        }
    });

    GoalDetails {
        progress: calculate_goal_progress(Some(goal), total_eur),
        remaining: (goal.target_amount - current).max(0),
        days_remaining,
        is_achieved: current >= goal.target_amount,
        is_overdue: goal.deadline.map_or(false, |deadline| now > deadline),
    }
}
