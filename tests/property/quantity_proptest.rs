//! Property-based tests for denomination counting

use proptest::prelude::*;
use std::collections::HashMap;

use piggybank_sync::shared::currency::{calculate_total, euro_catalog};
use piggybank_sync::shared::model::{clamp_quantity, MAX_QUANTITY};

use crate::common::*;

fn edits() -> impl Strategy<Value = Vec<(usize, i64)>> {
    let quantity = prop_oneof![
        4 => -20i64..20,
        1 => Just(i64::MAX),
        1 => Just(i64::MIN),
        1 => (i64::MAX - 1000)..=i64::MAX,
        1 => (MAX_QUANTITY - 5)..(MAX_QUANTITY + 5),
    ];
    prop::collection::vec((0usize..15, quantity), 1..12)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_quantities_never_negative(edits in edits()) {
        let (quantities, total, history_len) = tokio_test::block_on(async {
            // no subscriptions, so echoes cannot interleave with the edits
            let f = test_engine().await;
            f.engine.monitor().check_connection().await;
            f.engine.store().load_user_data(USER).await;
            let catalog = euro_catalog();
            for (index, quantity) in &edits {
                f.engine.store().set_quantity(&catalog[*index].id, *quantity, USER).await;
            }
            let denominations = f.engine.store().denominations().await;
            let total = f.engine.store().grand_total().await;
            let history_len = f.engine.store().history().await.len();
            f.engine.shutdown().await;
            (denominations, total, history_len)
        });

        prop_assert!(quantities.iter().all(|d| (0..=MAX_QUANTITY).contains(&d.quantity)));
        prop_assert_eq!(total, calculate_total(&quantities));
        prop_assert!(history_len <= edits.len());

        let mut expected: HashMap<usize, i64> = HashMap::new();
        for (index, quantity) in &edits {
            expected.insert(*index, clamp_quantity(*quantity));
        }
        for (index, quantity) in expected {
            prop_assert_eq!(quantities[index].quantity, quantity);
        }
    }

    #[test]
    fn test_totals_are_exact_cents(counts in prop::collection::vec(0i64..1000, 15)) {
        let mut catalog = euro_catalog();
        for (denomination, count) in catalog.iter_mut().zip(&counts) {
            denomination.quantity = *count;
        }
        let expected: i64 = catalog.iter().map(|d| d.value * d.quantity).sum();
        prop_assert_eq!(calculate_total(&catalog), expected);
    }

    #[test]
    fn test_totals_never_overflow(counts in prop::collection::vec((i64::MAX / 4)..=i64::MAX, 15)) {
        let mut catalog = euro_catalog();
        for (denomination, count) in catalog.iter_mut().zip(&counts) {
            denomination.quantity = *count;
        }
        prop_assert_eq!(calculate_total(&catalog), i64::MAX);
    }
}
