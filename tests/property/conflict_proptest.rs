//! Property-based tests for conflict detection and resolution

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use piggybank_sync::client::sync::conflict_resolver::{detect_conflicts, resolve_denominations, resolve_history};
use piggybank_sync::client::sync::SyncState;
use piggybank_sync::shared::currency::euro_catalog;
use piggybank_sync::shared::model::{Denomination, HistoryEntry, HistoryEntryType, ResolutionStrategy};

fn denominations() -> impl Strategy<Value = Vec<Denomination>> {
    prop::collection::vec(0i64..50, 15).prop_map(|counts| {
        let mut catalog = euro_catalog();
        for (denomination, count) in catalog.iter_mut().zip(counts) {
            denomination.quantity = count;
        }
        catalog
    })
}

fn history() -> impl Strategy<Value = Vec<HistoryEntry>> {
    prop::collection::vec((0u32..40, 0i64..100_000, 0i64..1_000_000), 0..8).prop_map(|rows| {
        rows.into_iter()
            .map(|(id, total, seconds)| HistoryEntry {
                id: format!("h{}", id),
                timestamp: Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap(),
                total_eur: total,
                total_bgn: total as f64 / 100.0 * 1.95583,
                denominations: Vec::new(),
                kind: HistoryEntryType::ManualEntry,
                title: None,
                description: None,
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn test_identical_states_never_conflict(denominations in denominations(), history in history()) {
        let state = SyncState {
            denominations,
            history,
            ..SyncState::default()
        };
        prop_assert!(detect_conflicts(&state, &state.clone(), None).is_empty());
    }

    #[test]
    fn test_merge_keeps_larger_count(local in denominations(), remote in denominations()) {
        let merged = resolve_denominations(&local, &remote, ResolutionStrategy::Merge).unwrap();
        prop_assert_eq!(merged.len(), local.len());
        for ((ours, theirs), result) in local.iter().zip(&remote).zip(&merged) {
            prop_assert_eq!(&result.id, &ours.id);
            prop_assert_eq!(result.quantity, ours.quantity.max(theirs.quantity));
        }
    }

    #[test]
    fn test_history_merge_is_sorted_union(local in history(), remote in history()) {
        let merged = resolve_history(&local, &remote, ResolutionStrategy::Merge).unwrap();

        let mut ids: Vec<&str> = merged.iter().map(|entry| entry.id.as_str()).collect();
        prop_assert!(merged.windows(2).all(|pair| pair[0].timestamp >= pair[1].timestamp));
        for entry in local.iter().chain(&remote) {
            prop_assert!(ids.contains(&entry.id.as_str()));
        }
        let before = ids.len();
        ids.sort_unstable();
        ids.dedup();
        prop_assert_eq!(ids.len(), before);
    }
}
