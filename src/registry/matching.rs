/// Loose matching of local trades against exchange positions
///
/// A local quantity matches when it deviates from the exchange quantity by no
/// more than `tolerance_fraction * exchange_qty`.
use std::collections::{HashMap, HashSet};

use super::types::{EntryKey, TrackedPosition};
use crate::types::Side;

pub fn within_tolerance(local_qty: f64, exchange_qty: f64, tolerance_fraction: f64) -> bool {
    if !local_qty.is_finite() || !exchange_qty.is_finite() {
        return false;
    }
    (local_qty - exchange_qty).abs() <= tolerance_fraction * exchange_qty.abs()
}

/// Closest tracked entry for (symbol, side) within tolerance, skipping entries
/// already claimed by another exchange position in the same sync
pub fn find_loose_match(
    entries: &HashMap<EntryKey, TrackedPosition>,
    claimed: &HashSet<EntryKey>,
    symbol: &str,
    side: Side,
    quantity: f64,
    tolerance_fraction: f64,
) -> Option<EntryKey> {
    entries
        .values()
        .filter(|entry| entry.symbol == symbol && entry.side == side)
        .filter(|entry| !claimed.contains(&entry.key))
        .filter(|entry| within_tolerance(entry.quantity, quantity, tolerance_fraction))
        .min_by(|a, b| {
            let da = (a.quantity - quantity).abs();
            let db = (b.quantity - quantity).abs();
            da.partial_cmp(&db)
                .unwrap_or(std::cmp::Ordering::Equal)
                // ties go to the most recently opened entry
                .then_with(|| b.entry_time.cmp(&a.entry_time))
        })
        .map(|entry| entry.key)
}

/// Claimed entry for (symbol, side) within tolerance. A hit means the
/// exchange reported the same position twice in one response.
pub fn find_claimed_duplicate(
    entries: &HashMap<EntryKey, TrackedPosition>,
    claimed: &HashSet<EntryKey>,
    symbol: &str,
    side: Side,
    quantity: f64,
    tolerance_fraction: f64,
) -> Option<EntryKey> {
    claimed
        .iter()
        .filter_map(|key| entries.get(key))
        .find(|entry| {
            entry.symbol == symbol
                && entry.side == side
                && within_tolerance(entry.quantity, quantity, tolerance_fraction)
        })
        .map(|entry| entry.key)
}
