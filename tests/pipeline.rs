//! End-to-end tests of the setup engine pipeline.
//!
//! These drive the public API only: input construction, normalization,
//! detector execution, calibration, selection and serialization.

use setupscan::normalization::{normalize, NormalizationParams};
use setupscan::prelude::*;
use setupscan::NaiveDate;

const CANONICAL_ORDER: [&str; 7] = [
    "vcp",
    "three_weeks_tight",
    "high_tight_flag",
    "nr7_inside_day",
    "first_pullback",
    "cup_with_handle",
    "double_bottom",
];

/// Weekday-only calendar starting Monday 2024-01-01
fn trading_day(i: usize) -> NaiveDate {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    start + chrono::Duration::days(((i / 5) * 7 + i % 5) as i64)
}

fn week_ending(i: usize) -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 1, 7).unwrap() + chrono::Duration::days(7 * i as i64)
}

/// Steady compound growth, no consolidation anywhere
fn uptrend_daily(n: usize) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let close = 100.0 * 1.006_f64.powi(i as i32);
            let open = close / 1.006;
            Bar::new(trading_day(i), open, close * 1.01, open * 0.99, close, 1_000_000.0)
        })
        .collect()
}

fn uptrend_weekly(n: usize) -> Vec<Bar> {
    let growth = 1.006_f64.powi(5);
    (0..n)
        .map(|i| {
            let close = 100.0 * growth.powi(i as i32);
            let open = close / growth;
            Bar::new(week_ending(i), open, close * 1.01, open * 0.97, close, 5_000_000.0)
        })
        .collect()
}

/// Thirty one-point-range bars ending in a narrow inside day
fn nr7_daily() -> Vec<Bar> {
    let mut bars: Vec<Bar> = (0..29)
        .map(|i| Bar::new(trading_day(i), 20.0, 20.5, 19.5, 20.0, 1_000_000.0))
        .collect();
    bars.push(Bar::new(trading_day(29), 20.0, 20.2, 19.9, 20.1, 800_000.0));
    bars
}

fn default_engine() -> SetupEngine {
    EngineBuilder::new().with_all_defaults().build().unwrap()
}

fn input(symbol: &str, daily: Vec<Bar>, weekly: Vec<Bar>) -> PatternDetectorInput {
    PatternDetectorInput::builder(symbol)
        .daily(daily)
        .weekly(weekly)
        .build()
        .unwrap()
}

struct Failing;

impl PatternDetector for Failing {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn detect(&self, _: &PatternDetectorInput, _: &DetectorParameters) -> Result<PatternDetectorResult> {
        Err(SetupError::MissingFeature("breadth".into()))
    }
}

struct Panicking;

impl PatternDetector for Panicking {
    fn name(&self) -> &'static str {
        "panicking"
    }

    fn detect(&self, _: &PatternDetectorInput, _: &DetectorParameters) -> Result<PatternDetectorResult> {
        panic!("kaboom")
    }
}

#[test]
fn test_steady_uptrend_has_no_primary() {
    let output = default_engine().aggregate(&input("UP", uptrend_daily(250), uptrend_weekly(52)));

    assert!(output.pattern_primary.is_none());
    assert!(output.pattern_confidence.is_none());
    assert!(output.candidates.is_empty());
    assert!(output.failed_checks.iter().any(|c| c == "no_primary_pattern"));

    let names: Vec<&str> = output
        .detector_traces
        .iter()
        .map(|t| t.detector_name.as_str())
        .collect();
    assert_eq!(names, CANONICAL_ORDER);
    for (i, trace) in output.detector_traces.iter().enumerate() {
        assert_eq!(trace.execution_index, i);
        assert_ne!(trace.outcome, PatternOutcome::Detected);
        assert_ne!(trace.outcome, PatternOutcome::Error);
    }
    assert_eq!(
        output.detector_traces[6].outcome,
        PatternOutcome::NotImplemented
    );
}

#[test]
fn test_short_history_is_insufficient_everywhere() {
    let output = default_engine().aggregate(&input("NEW", uptrend_daily(5), uptrend_weekly(3)));

    assert!(output.pattern_primary.is_none());
    for trace in &output.detector_traces {
        assert_eq!(
            trace.outcome,
            PatternOutcome::InsufficientData,
            "{}",
            trace.detector_name
        );
    }
    for expected in [
        "vcp:daily_bars_lt_120",
        "vcp:vcp_snapshot_missing",
        "three_weeks_tight:weekly_bars_lt_8",
        "high_tight_flag:daily_bars_lt_80",
        "nr7_inside_day:daily_bars_lt_8",
        "first_pullback:daily_bars_lt_60",
        "cup_with_handle:daily_bars_lt_100",
        "double_bottom:daily_bars_lt_120",
    ] {
        assert!(
            output.failed_checks.iter().any(|c| c == expected),
            "missing {expected}"
        );
    }
}

#[test]
fn test_trigger_only_primary() {
    let output = default_engine().aggregate(&input("NR", nr7_daily(), Vec::new()));

    assert_eq!(output.pattern_primary.as_deref(), Some("nr7_inside_day"));
    assert_eq!(output.pivot_type.as_deref(), Some("inside_day_high"));
    assert_eq!(output.pivot_price, Some(20.5));
    assert_eq!(output.pivot_date, Some(trading_day(29)));

    let primary = output.primary_candidate().unwrap();
    let calibration = primary.calibration.as_ref().unwrap();
    assert_eq!(calibration.profile, "nr7_inside_day");
    assert_eq!(output.pattern_confidence, Some(calibration.calibrated_confidence));
    assert!((0.05..=0.95).contains(&calibration.calibrated_confidence));
    assert!(output
        .passed_checks
        .iter()
        .any(|c| c == "cross_detector_calibration_applied"));
}

#[test]
fn test_failing_detectors_do_not_stop_the_pipeline() {
    let engine = EngineBuilder::new()
        .add_custom(Failing)
        .add_custom(Panicking)
        .add(BuiltinDetector::Nr7InsideDay(InsideDayDetector))
        .build()
        .unwrap();
    let output = engine.aggregate(&input("ERR", nr7_daily(), Vec::new()));

    let traces = &output.detector_traces;
    assert_eq!(traces.len(), 3);
    assert_eq!(traces[0].outcome, PatternOutcome::Error);
    assert!(traces[0]
        .error_detail
        .as_deref()
        .unwrap()
        .starts_with("MissingFeature: "));
    assert_eq!(traces[1].outcome, PatternOutcome::Error);
    assert_eq!(traces[1].error_detail.as_deref(), Some("Panic: kaboom"));
    assert_eq!(traces[2].outcome, PatternOutcome::Detected);

    assert!(output.failed_checks.iter().any(|c| c == "failing:error"));
    assert!(output.failed_checks.iter().any(|c| c == "panicking:error"));
    assert_eq!(output.pattern_primary.as_deref(), Some("nr7_inside_day"));
}

#[test]
fn test_aggregation_is_deterministic() {
    let engine = default_engine();
    let symbol = input("DET", nr7_daily(), uptrend_weekly(20));

    let first = engine.aggregate(&symbol);
    let second = engine.aggregate(&symbol);
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn test_output_serializes_for_persistence() {
    let output = default_engine().aggregate(&input("JSON", nr7_daily(), Vec::new()));
    let value = serde_json::to_value(&output).unwrap();

    assert_eq!(value["pattern_primary"], "nr7_inside_day");
    assert_eq!(value["pivot_date"], "2024-02-09");
    assert_eq!(value["detector_traces"][0]["outcome"], "insufficient_data");
    assert_eq!(value["detector_traces"][3]["outcome"], "detected");
    assert_eq!(value["detector_traces"][6]["detector_name"], "double_bottom");

    let back: AggregatedPatternOutput = serde_json::from_value(value).unwrap();
    assert_eq!(back, output);
}

#[test]
fn test_config_from_json_changes_thresholds() {
    // Seven bars are one short of the default NR7 prerequisite
    let daily: Vec<Bar> = nr7_daily()[23..].to_vec();
    let symbol = input("CFG", daily, Vec::new());

    let default_output = default_engine().aggregate(&symbol);
    assert_eq!(
        default_output.detector_traces[3].outcome,
        PatternOutcome::InsufficientData
    );

    let config = SetupEngineConfig::from_json_str(
        r#"{ "detectors": { "nr7_inside_day": { "window": 5 } } }"#,
    )
    .unwrap();
    let engine = EngineBuilder::new()
        .with_all_defaults()
        .config(config)
        .build()
        .unwrap();
    let output = engine.aggregate(&symbol);
    assert_eq!(output.detector_traces[3].outcome, PatternOutcome::Detected);
    assert_eq!(output.pattern_primary.as_deref(), Some("nr7_inside_day"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let err = SetupEngineConfig::from_json_str(r#"{ "selection": { "confidence_floor": 1.5 } }"#)
        .unwrap_err();
    assert!(matches!(err, SetupError::OutOfRange { .. } | SetupError::Json(_)));
    assert!(EngineBuilder::new().build().is_err());
}

#[test]
fn test_normalized_input_flows_into_engine() {
    let mut raw = nr7_daily();
    raw.swap(3, 4);
    let revised = raw[10];
    raw.insert(10, revised);

    let report = normalize(&raw, None, &NormalizationParams::default());
    assert!(report
        .warnings()
        .iter()
        .any(|w| *w == "daily_duplicate_dates_dropped:1"));
    assert!(report.warnings().iter().any(|w| *w == "daily_unsorted_reordered"));

    let symbol = report.into_input_builder("NORM").build().unwrap();
    assert_eq!(symbol.daily_bars(), 30);
    assert_eq!(symbol.weekly_bars(), 6);

    let output = default_engine().aggregate(&symbol);
    assert_eq!(output.pattern_primary.as_deref(), Some("nr7_inside_day"));
}

#[test]
fn test_parallel_scan_keeps_input_order() {
    let engine = default_engine();
    let inputs = vec![
        input("A", nr7_daily(), Vec::new()),
        input("B", uptrend_daily(250), uptrend_weekly(52)),
        input("C", uptrend_daily(5), Vec::new()),
    ];

    let results = scan_parallel(&engine, &inputs);
    let symbols: Vec<&str> = results.iter().map(|r| r.symbol.as_str()).collect();
    assert_eq!(symbols, ["A", "B", "C"]);
    assert_eq!(results[0].output.pattern_primary.as_deref(), Some("nr7_inside_day"));
    assert!(results[1].output.pattern_primary.is_none());
    assert_eq!(results[0].output, engine.aggregate(&inputs[0]));
}
