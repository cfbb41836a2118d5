//! Turn order derivation.
//!
//! Sort key: initiative descending with unrolled combatants last, then
//! display name ascending ignoring case, then insertion index. The last key
//! makes the order total, so the result never depends on sort stability.

use std::cmp::Ordering;

use super::combatant::Combatant;

/// Returns the combatants in turn order. The input is not modified.
#[must_use]
pub fn compute_order(combatants: &[Combatant]) -> Vec<&Combatant> {
    order_indices(combatants)
        .into_iter()
        .map(|index| &combatants[index])
        .collect()
}

/// Returns the insertion indices of `combatants` in turn order.
#[must_use]
pub fn order_indices(combatants: &[Combatant]) -> Vec<usize> {
    let names: Vec<String> = combatants.iter().map(|c| c.name.to_lowercase()).collect();
    let mut order: Vec<usize> = (0..combatants.len()).collect();
    order.sort_by(|&a, &b| {
        compare_initiative(combatants[a].initiative, combatants[b].initiative)
            .then_with(|| names[a].cmp(&names[b]))
            .then(a.cmp(&b))
    });
    order
}

/// Higher initiative first; `None` ranks below every value.
fn compare_initiative(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
