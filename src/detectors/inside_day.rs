//! NR7 / inside day trigger

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::helpers::{
    confidence, distance_to_pivot, partition_checks, prerequisite_failures, proximity_readiness,
    score, unit,
};
use crate::config::DetectorParameters;
use crate::contract::{PatternCandidate, PatternDetectorInput, PatternDetectorResult};
use crate::params::{get_period, ParamMeta, ParamSet};
use crate::technicals::mean;
use crate::{
    DetectorMetadata, OHLCVExt, PatternDetector, PatternKind, Period, Result, Timeframe,
};

const NAME: &str = "nr7_inside_day";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsideDayParams {
    /// Narrow-range lookback, including the latest bar (NR7 = 7)
    pub window: Period,
}

impl Default for InsideDayParams {
    fn default() -> Self {
        Self {
            window: Period::new_const(7),
        }
    }
}

static INSIDE_DAY_PARAMS: &[ParamMeta] = &[ParamMeta::period(
    "window",
    7.0,
    (4.0, 10.0, 1.0),
    "Narrow-range lookback",
)];

impl ParamSet for InsideDayParams {
    fn param_meta() -> &'static [ParamMeta] {
        INSIDE_DAY_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            window: get_period(INSIDE_DAY_PARAMS, params, "window", 7)?,
        })
    }

    fn family() -> &'static str {
        NAME
    }
}

/// Narrowest range of the window, inside the prior bar
#[derive(Debug, Clone, Copy, Default)]
pub struct InsideDayDetector;

impl PatternDetector for InsideDayDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn metadata(&self) -> DetectorMetadata {
        DetectorMetadata {
            name: NAME,
            description: "Narrowest range of the trailing window inside the mother bar",
            kind: PatternKind::Trigger,
            timeframes: &[Timeframe::Daily],
        }
    }

    fn detect(
        &self,
        input: &PatternDetectorInput,
        params: &DetectorParameters,
    ) -> Result<PatternDetectorResult> {
        let window = params.nr7_inside_day.window.get();
        let reasons = prerequisite_failures(input, Some(window + 1), None);
        if !reasons.is_empty() {
            return Ok(PatternDetectorResult::insufficient_data(NAME, reasons));
        }

        let bars = input.daily();
        let n = bars.len();
        let today = &bars[n - 1];
        let mother = &bars[n - 2];
        let trailing = &bars[n - window..];

        let range = today.range();
        let narrowest = trailing[..window - 1].iter().all(|b| range <= b.range());
        let inside = today.is_inside(mother);

        let checks = [("narrowest_range", narrowest), ("inside_bar", inside)];
        let (passed, _) = partition_checks(&checks);
        let mut failures = Vec::new();
        if !narrowest {
            failures.push("not_narrowest_range");
        }
        if !inside {
            failures.push("not_inside_bar");
        }
        if !failures.is_empty() {
            return Ok(PatternDetectorResult::not_detected(NAME, failures).with_passed(passed));
        }

        let ranges: Vec<f64> = trailing.iter().map(|b| b.range()).collect();
        let range_vs_avg = mean(&ranges).map_or(1.0, |avg| if avg > 0.0 { range / avg } else { 1.0 });
        let compression = 1.0 - unit(range_vs_avg, 1.0);
        let pivot = mother.high;
        let distance = distance_to_pivot(today.close, pivot);

        let quality = score(35.0 + 40.0 * compression);
        let readiness = proximity_readiness(distance, 0.05, 50.0, 95.0);
        let conf = confidence(0.5 + 0.25 * compression);

        let mut candidate = PatternCandidate::new(NAME, NAME)
            .timeframe(Timeframe::Daily)
            .pivot(pivot, "inside_day_high", Some(today.date))
            .scores(Some(quality), Some(readiness), Some(conf))
            .metric("range_pct", 100.0 * range / today.close)
            .metric("range_vs_window_avg", range_vs_avg)
            .metric("mother_range_pct", 100.0 * mother.range() / mother.close)
            .metric("distance_to_pivot_pct", 100.0 * distance);
        for (name, ok) in checks {
            candidate = candidate.check(name, ok);
        }

        Ok(PatternDetectorResult::detected(NAME, vec![candidate]).with_passed(passed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::PatternOutcome;
    use crate::test_support::bar;
    use crate::Bar;

    fn series(last_high: f64) -> Vec<Bar> {
        let mut bars: Vec<Bar> = (0..6).map(|i| bar(i, 100.0, 103.0, 97.0, 101.0, 1e6)).collect();
        bars.push(bar(6, 100.0, 104.0, 96.0, 102.0, 1e6));
        bars.push(bar(7, 101.0, last_high, 99.5, 101.5, 7e5));
        bars
    }

    fn run(daily: Vec<Bar>) -> PatternDetectorResult {
        let input = PatternDetectorInput::builder("NR7").daily(daily).build().unwrap();
        InsideDayDetector.detect(&input, &DetectorParameters::default()).unwrap()
    }

    #[test]
    fn test_detects_nr7_inside_day() {
        let result = run(series(102.0));
        assert_eq!(result.outcome(), PatternOutcome::Detected);
        let c = &result.candidates[0];
        assert_eq!(c.pivot_price, Some(104.0));
        assert_eq!(c.pivot_type.as_deref(), Some("inside_day_high"));
        assert_eq!(c.checks.get("narrowest_range"), Some(&true));
        assert_eq!(c.checks.get("inside_bar"), Some(&true));
        assert!(c.metrics["range_vs_window_avg"] < 1.0);
    }

    #[test]
    fn test_breaks_mother_high() {
        let result = run(series(105.0));
        assert_eq!(result.outcome(), PatternOutcome::NotDetected);
        assert_eq!(result.failed_checks, vec!["not_inside_bar"]);
        assert_eq!(result.passed_checks, vec!["narrowest_range"]);
    }

    #[test]
    fn test_wide_last_bar() {
        let mut bars = series(102.0);
        bars[7] = bar(7, 101.0, 108.0, 95.0, 101.5, 7e5);
        let result = run(bars);
        assert_eq!(result.failed_checks, vec!["not_narrowest_range", "not_inside_bar"]);
    }

    #[test]
    fn test_prerequisites_follow_window() {
        let result = run(series(102.0)[..7].to_vec());
        assert_eq!(result.outcome(), PatternOutcome::InsufficientData);
        assert!(result.failed_checks.contains(&"daily_bars_lt_8".to_string()));
    }
}
