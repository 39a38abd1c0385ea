/**
 * Currency Catalog and Arithmetic
 *
 * The fixed euro coin/banknote catalog plus the integer-cent arithmetic used
 * for totals. Conversion to leva uses the fixed published exchange rate and
 * is only computed when a value is displayed or frozen into a history entry.
 */
use crate::shared::model::{Denomination, DenominationType};

/// Fixed EUR to BGN conversion rate
pub const EUR_TO_BGN_RATE: f64 = 1.95583;

const CATALOG: [(&str, &str, i64, DenominationType); 15] = [
    ("1c", "1¢", 1, DenominationType::Coin),
    ("2c", "2¢", 2, DenominationType::Coin),
    ("5c", "5¢", 5, DenominationType::Coin),
    ("10c", "10¢", 10, DenominationType::Coin),
    ("20c", "20¢", 20, DenominationType::Coin),
    ("50c", "50¢", 50, DenominationType::Coin),
    ("1e", "1€", 100, DenominationType::Coin),
    ("2e", "2€", 200, DenominationType::Coin),
    ("5e", "5€", 500, DenominationType::Banknote),
    ("10e", "10€", 1000, DenominationType::Banknote),
    ("20e", "20€", 2000, DenominationType::Banknote),
    ("50e", "50€", 5000, DenominationType::Banknote),
    ("100e", "100€", 10000, DenominationType::Banknote),
    ("200e", "200€", 20000, DenominationType::Banknote),
    ("500e", "500€", 50000, DenominationType::Banknote),
];

/// The full catalog with every quantity at zero
pub fn euro_catalog() -> Vec<Denomination> {
    CATALOG
        .iter()
        .map(|(id, label, value, kind)| Denomination {
            id: id.to_string(),
            label: label.to_string(),
            value: *value,
            kind: *kind,
            quantity: 0,
        })
        .collect()
}

/// Whether `id` names a catalog entry
pub fn is_catalog_id(id: &str) -> bool {
    CATALOG.iter().any(|(catalog_id, ..)| *catalog_id == id)
}

/// Grand total in cents
pub fn calculate_total(denominations: &[Denomination]) -> i64 {
    denominations
        .iter()
        .map(Denomination::subtotal)
        .fold(0, i64::saturating_add)
}

/// Convert euro cents to leva (major units)
pub fn convert_eur_to_bgn(cents: i64) -> f64 {
    (cents as f64 / 100.0) * EUR_TO_BGN_RATE
}

/// Convert euro cents to leva minor units, rounded to the nearest stotinka
pub fn convert_eur_cents_to_bgn_cents(cents: i64) -> i64 {
    (convert_eur_to_bgn(cents) * 100.0).round() as i64
}

/// Counts and rankings derived from the current denominations
#[derive(Debug, Clone, PartialEq)]
pub struct SavingsInsights {
    pub coin_count: i64,
    pub banknote_count: i64,
    /// Denomination holding the most value, if any is non-empty
    pub most_saved: Option<Denomination>,
    /// Up to three denominations ranked by held value
    pub top3: Vec<Denomination>,
}

pub fn savings_insights(denominations: &[Denomination]) -> SavingsInsights {
    let count_of = |kind: DenominationType| {
        denominations
            .iter()
            .filter(|d| d.kind == kind)
            .map(|d| d.quantity)
            .sum()
    };

    let mut held: Vec<Denomination> = denominations
        .iter()
        .filter(|d| d.quantity > 0)
        .cloned()
        .collect();
    // stable sort keeps catalog order among equal values
    held.sort_by(|a, b| b.subtotal().cmp(&a.subtotal()));

    SavingsInsights {
        coin_count: count_of(DenominationType::Coin),
        banknote_count: count_of(DenominationType::Banknote),
        most_saved: held.first().cloned(),
        top3: held.into_iter().take(3).collect(),
    }
}
