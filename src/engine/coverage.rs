use std::collections::HashSet;

use ulid::Ulid;

use crate::model::*;

// ── Coverage Gap Algorithm ────────────────────────────────────────

/// Locations required on `weekday` (rule definition order), minus the set
/// of covered location ids. Duplicate rules for one location collapse to a
/// single report. If nothing is required, nothing is flagged — even when
/// `covered` is empty.
pub fn missing_from_required(
    rules: &[CoverageRule],
    weekday: u8,
    covered: &HashSet<Ulid>,
) -> Vec<Ulid> {
    let weekday = normalize_weekday(weekday).unwrap_or(weekday);
    let mut missing = Vec::new();
    let mut seen = HashSet::new();
    for rule in rules {
        if normalize_weekday(rule.weekday) != Some(weekday) {
            continue;
        }
        if covered.contains(&rule.location_id) || !seen.insert(rule.location_id) {
            continue;
        }
        missing.push(rule.location_id);
    }
    missing
}
