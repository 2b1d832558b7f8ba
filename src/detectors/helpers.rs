//! Helpers shared across detector modules

use crate::contract::PatternDetectorInput;
use crate::technicals::{mean, volumes};
use crate::Bar;

/// Per-timeframe prerequisite failures (`daily_bars_lt_<N>`, `weekly_bars_lt_<N>`)
pub fn prerequisite_failures(
    input: &PatternDetectorInput,
    min_daily: Option<usize>,
    min_weekly: Option<usize>,
) -> Vec<String> {
    let mut reasons = Vec::new();
    if let Some(min) = min_daily {
        if input.daily_bars() < min {
            reasons.push(format!("daily_bars_lt_{min}"));
        }
    }
    if let Some(min) = min_weekly {
        if input.weekly_bars() < min {
            reasons.push(format!("weekly_bars_lt_{min}"));
        }
    }
    reasons
}

/// Clamp a raw score into 0..=100
#[inline]
pub fn score(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

/// Clamp a raw confidence into 0..=1
#[inline]
pub fn confidence(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// `value / full`, clamped into 0..=1. Zero `full` counts as fully satisfied.
#[inline]
pub fn unit(value: f64, full: f64) -> f64 {
    if full <= 0.0 {
        return 1.0;
    }
    (value / full).clamp(0.0, 1.0)
}

/// Signed distance from `close` up to `pivot`, as a fraction of the pivot.
/// Negative once price trades above the pivot.
#[inline]
pub fn distance_to_pivot(close: f64, pivot: f64) -> f64 {
    (pivot - close) / pivot
}

/// Mean volume of `recent` relative to mean volume of `reference`
pub fn volume_ratio(recent: &[Bar], reference: &[Bar]) -> Option<f64> {
    let recent = mean(&volumes(recent))?;
    let reference = mean(&volumes(reference))?;
    if reference <= 0.0 {
        return None;
    }
    Some(recent / reference)
}

/// Readiness from pivot proximity: `ceiling` at (or above) the pivot,
/// falling linearly to `floor` at `max_distance` below it.
pub fn proximity_readiness(distance: f64, max_distance: f64, floor: f64, ceiling: f64) -> f64 {
    let closeness = 1.0 - unit(distance.max(0.0), max_distance);
    score(floor + (ceiling - floor) * closeness)
}

/// Split check outcomes into (passed, failed) name lists, keeping order
pub fn partition_checks<'a>(
    checks: &[(&'a str, bool)],
) -> (Vec<&'a str>, Vec<&'a str>) {
    let passed = checks.iter().filter(|(_, ok)| *ok).map(|(n, _)| *n).collect();
    let failed = checks.iter().filter(|(_, ok)| !*ok).map(|(n, _)| *n).collect();
    (passed, failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{close_bar, flat_daily};

    #[test]
    fn test_prerequisite_failures() {
        let input = PatternDetectorInput::builder("X")
            .daily(flat_daily(5, 10.0))
            .build()
            .unwrap();
        assert_eq!(
            prerequisite_failures(&input, Some(80), Some(8)),
            vec!["daily_bars_lt_80", "weekly_bars_lt_8"]
        );
        assert!(prerequisite_failures(&input, Some(5), None).is_empty());
    }

    #[test]
    fn test_volume_ratio() {
        let recent = [close_bar(0, 10.0, 500.0), close_bar(1, 10.0, 700.0)];
        let reference = [close_bar(2, 10.0, 1200.0)];
        assert_eq!(volume_ratio(&recent, &reference), Some(0.5));
        assert_eq!(volume_ratio(&[], &reference), None);
    }

    #[test]
    fn test_proximity_readiness() {
        assert_eq!(proximity_readiness(0.0, 0.1, 40.0, 90.0), 90.0);
        assert_eq!(proximity_readiness(-0.02, 0.1, 40.0, 90.0), 90.0);
        assert_eq!(proximity_readiness(0.05, 0.1, 40.0, 90.0), 65.0);
        assert_eq!(proximity_readiness(0.5, 0.1, 40.0, 90.0), 40.0);
    }

    #[test]
    fn test_partition_checks() {
        let (passed, failed) = partition_checks(&[("a", true), ("b", false), ("c", true)]);
        assert_eq!(passed, vec!["a", "c"]);
        assert_eq!(failed, vec!["b"]);
    }
}
