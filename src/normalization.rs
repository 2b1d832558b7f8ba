//! Raw OHLCV validation and cleanup, per timeframe.
//!
//! Produces frames the detectors can trust (valid bars, strictly increasing
//! dates) together with warnings about what was repaired and prerequisite
//! failures for frames too short to use.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::contract::PatternDetectorInputBuilder;
use crate::technicals::resample_weekly;
use crate::{Bar, OHLCVExt, Period, Timeframe};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationParams {
    /// Smallest daily frame any builtin detector can use
    pub min_daily_bars: Period,
    /// Smallest weekly frame any builtin detector can use
    pub min_weekly_bars: Period,
    /// Build the weekly frame from daily bars when none is supplied
    pub derive_weekly: bool,
    /// Drop an in-progress trailing week when deriving
    pub exclude_incomplete_week: bool,
}

impl Default for NormalizationParams {
    fn default() -> Self {
        Self {
            min_daily_bars: Period::new_const(8),
            min_weekly_bars: Period::new_const(8),
            derive_weekly: true,
            exclude_incomplete_week: true,
        }
    }
}

/// One cleaned frame
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFrame {
    pub timeframe: Timeframe,
    pub bars: Vec<Bar>,
    pub prerequisites_met: bool,
    pub warnings: Vec<String>,
    pub failures: Vec<String>,
}

/// Validate, order and de-duplicate one frame.
///
/// Invalid bars are dropped, out-of-order bars are sorted by date, and for
/// duplicate dates the last occurrence wins.
pub fn normalize_frame(raw: &[Bar], timeframe: Timeframe, min_bars: usize) -> NormalizedFrame {
    let tf = timeframe.as_str();
    let mut warnings = Vec::new();
    let mut failures = Vec::new();

    if raw.is_empty() {
        failures.push(format!("{tf}_missing"));
        return NormalizedFrame {
            timeframe,
            bars: Vec::new(),
            prerequisites_met: false,
            warnings,
            failures,
        };
    }

    let mut bars: Vec<Bar> = raw.iter().filter(|b| b.validate().is_ok()).copied().collect();
    let invalid = raw.len() - bars.len();
    if invalid > 0 {
        warnings.push(format!("{tf}_invalid_rows_dropped:{invalid}"));
    }

    if bars.windows(2).any(|w| w[0].date > w[1].date) {
        bars.sort_by_key(|b| b.date);
        warnings.push(format!("{tf}_unsorted_reordered"));
    }

    let before = bars.len();
    let mut deduped: Vec<Bar> = Vec::with_capacity(before);
    for bar in bars {
        match deduped.last_mut() {
            Some(prev) if prev.date == bar.date => *prev = bar,
            _ => deduped.push(bar),
        }
    }
    let duplicates = before - deduped.len();
    if duplicates > 0 {
        warnings.push(format!("{tf}_duplicate_dates_dropped:{duplicates}"));
    }

    let zero_volume = deduped.iter().filter(|b| b.volume == 0.0).count();
    if zero_volume > 0 {
        warnings.push(format!("{tf}_zero_volume_bars:{zero_volume}"));
    }

    if deduped.len() < min_bars {
        failures.push(format!("{tf}_bars_lt_{min_bars}"));
    }

    if !warnings.is_empty() {
        debug!(timeframe = tf, ?warnings, "frame repaired");
    }
    NormalizedFrame {
        timeframe,
        prerequisites_met: failures.is_empty(),
        bars: deduped,
        warnings,
        failures,
    }
}

/// Both frames of one symbol
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationReport {
    pub daily: NormalizedFrame,
    pub weekly: NormalizedFrame,
}

impl NormalizationReport {
    pub fn prerequisites_met(&self) -> bool {
        self.daily.prerequisites_met && self.weekly.prerequisites_met
    }

    pub fn warnings(&self) -> Vec<&str> {
        self.daily
            .warnings
            .iter()
            .chain(&self.weekly.warnings)
            .map(String::as_str)
            .collect()
    }

    pub fn failures(&self) -> Vec<&str> {
        self.daily
            .failures
            .iter()
            .chain(&self.weekly.failures)
            .map(String::as_str)
            .collect()
    }

    /// Seed a detector input with the cleaned frames. Precomputed columns
    /// must be computed against the cleaned daily frame.
    pub fn into_input_builder(self, symbol: impl Into<String>) -> PatternDetectorInputBuilder {
        PatternDetectorInputBuilder::new(symbol)
            .daily(self.daily.bars)
            .weekly(self.weekly.bars)
    }
}

/// Normalize a symbol's frames. Without a weekly frame, one is derived from
/// the cleaned daily bars when `derive_weekly` is set.
pub fn normalize(
    daily: &[Bar],
    weekly: Option<&[Bar]>,
    params: &NormalizationParams,
) -> NormalizationReport {
    let daily = normalize_frame(daily, Timeframe::Daily, params.min_daily_bars.get());
    let min_weekly = params.min_weekly_bars.get();

    let weekly = match weekly {
        Some(raw) if !raw.is_empty() => normalize_frame(raw, Timeframe::Weekly, min_weekly),
        _ if params.derive_weekly && !daily.bars.is_empty() => {
            let derived = resample_weekly(&daily.bars, params.exclude_incomplete_week);
            let mut frame = normalize_frame(&derived, Timeframe::Weekly, min_weekly);
            frame.warnings.insert(0, "weekly_derived_from_daily".to_string());
            frame
        }
        _ => normalize_frame(&[], Timeframe::Weekly, min_weekly),
    };

    NormalizationReport { daily, weekly }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bar, close_bar, flat_daily, trading_day};

    #[test]
    fn test_clean_frame_passes_through() {
        let raw = flat_daily(10, 20.0);
        let frame = normalize_frame(&raw, Timeframe::Daily, 8);
        assert!(frame.prerequisites_met);
        assert!(frame.warnings.is_empty());
        assert_eq!(frame.bars, raw);
    }

    #[test]
    fn test_repairs_are_reported() {
        let mut raw = flat_daily(10, 20.0);
        raw.swap(2, 3);
        raw.push(close_bar(9, 21.0, 1000.0)); // revised last bar
        raw.push(bar(10, 20.0, 19.0, 21.0, 20.0, 1000.0)); // high < low
        raw[0].volume = 0.0;

        let frame = normalize_frame(&raw, Timeframe::Daily, 8);
        assert_eq!(
            frame.warnings,
            vec![
                "daily_invalid_rows_dropped:1",
                "daily_unsorted_reordered",
                "daily_duplicate_dates_dropped:1",
                "daily_zero_volume_bars:1",
            ]
        );
        assert_eq!(frame.bars.len(), 10);
        assert_eq!(frame.bars[9].close, 21.0);
        assert!(frame.bars.windows(2).all(|w| w[0].date < w[1].date));
        assert_eq!(frame.bars[3].date, trading_day(3));
    }

    #[test]
    fn test_short_and_missing_frames() {
        let frame = normalize_frame(&flat_daily(5, 20.0), Timeframe::Daily, 8);
        assert!(!frame.prerequisites_met);
        assert_eq!(frame.failures, vec!["daily_bars_lt_8"]);

        let frame = normalize_frame(&[], Timeframe::Weekly, 8);
        assert_eq!(frame.failures, vec!["weekly_missing"]);
    }

    #[test]
    fn test_weekly_derived_from_daily() {
        // 52 trading days starting Monday: ten full weeks and an unfinished one
        let report = normalize(&flat_daily(52, 20.0), None, &NormalizationParams::default());
        assert_eq!(report.weekly.bars.len(), 10);
        assert_eq!(report.weekly.warnings, vec!["weekly_derived_from_daily"]);
        assert!(report.prerequisites_met());

        let input = report.into_input_builder("X").build().unwrap();
        assert_eq!(input.daily_bars(), 52);
        assert_eq!(input.weekly_bars(), 10);
    }

    #[test]
    fn test_no_derivation_when_disabled() {
        let params = NormalizationParams {
            derive_weekly: false,
            ..NormalizationParams::default()
        };
        let report = normalize(&flat_daily(52, 20.0), None, &params);
        assert!(!report.prerequisites_met());
        assert_eq!(report.failures(), vec!["weekly_missing"]);
    }
}
