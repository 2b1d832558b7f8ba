//! Detector contract: outcome taxonomy, input/candidate/result value objects
//! and the failure-isolating [`detect_safe`] wrapper.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DetectorParameters;
use crate::{Bar, NaiveDate, PatternDetector, PatternKind, Result, SetupError, Timeframe};

// ============================================================
// OUTCOME TAXONOMY
// ============================================================

/// Outcome of one detector run. Always derived from a result, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternOutcome {
    Detected,
    NotDetected,
    InsufficientData,
    NotImplemented,
    Error,
}

impl PatternOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            PatternOutcome::Detected => "detected",
            PatternOutcome::NotDetected => "not_detected",
            PatternOutcome::InsufficientData => "insufficient_data",
            PatternOutcome::NotImplemented => "not_implemented",
            PatternOutcome::Error => "error",
        }
    }
}

impl std::fmt::Display for PatternOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================
// INPUT
// ============================================================

/// Output of the pre-existing volatility-contraction scorer, carried through
/// unchanged by the `vcp` detector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyVcpSnapshot {
    pub detected: bool,
    /// 0-100 legacy score
    pub score: Option<f64>,
    pub num_bases: usize,
    pub contracting_depth: bool,
    pub contracting_volume: bool,
    pub tightening_range: bool,
    pub pivot_price: Option<f64>,
    pub ready_for_breakout: bool,
}

/// Frames and precomputed features for one symbol
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorFeatures {
    /// Daily bars, oldest -> newest
    pub daily: Vec<Bar>,
    /// Weekly bars, oldest -> newest
    pub weekly: Vec<Bar>,
    /// Precomputed columns aligned with `daily` (NaN = missing)
    pub columns: BTreeMap<String, Vec<f64>>,
    pub legacy_vcp: Option<LegacyVcpSnapshot>,
}

/// Immutable per-symbol detector input. Bar counts are derived from the frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternDetectorInput {
    symbol: String,
    timeframe: Timeframe,
    daily_bars: usize,
    weekly_bars: usize,
    features: DetectorFeatures,
}

impl PatternDetectorInput {
    pub fn builder(symbol: impl Into<String>) -> PatternDetectorInputBuilder {
        PatternDetectorInputBuilder::new(symbol)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Primary timeframe, used for candidates that do not name one
    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn daily_bars(&self) -> usize {
        self.daily_bars
    }

    pub fn weekly_bars(&self) -> usize {
        self.weekly_bars
    }

    pub fn daily(&self) -> &[Bar] {
        &self.features.daily
    }

    pub fn weekly(&self) -> &[Bar] {
        &self.features.weekly
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.features.columns.get(name).map(Vec::as_slice)
    }

    pub fn legacy_vcp(&self) -> Option<&LegacyVcpSnapshot> {
        self.features.legacy_vcp.as_ref()
    }

    pub fn features(&self) -> &DetectorFeatures {
        &self.features
    }
}

/// Builder for [`PatternDetectorInput`]
#[derive(Debug, Clone)]
pub struct PatternDetectorInputBuilder {
    symbol: String,
    timeframe: Timeframe,
    features: DetectorFeatures,
}

impl PatternDetectorInputBuilder {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: Timeframe::Daily,
            features: DetectorFeatures::default(),
        }
    }

    pub fn timeframe(mut self, timeframe: Timeframe) -> Self {
        self.timeframe = timeframe;
        self
    }

    pub fn daily(mut self, bars: Vec<Bar>) -> Self {
        self.features.daily = bars;
        self
    }

    pub fn weekly(mut self, bars: Vec<Bar>) -> Self {
        self.features.weekly = bars;
        self
    }

    pub fn column(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.features.columns.insert(name.into(), values);
        self
    }

    pub fn legacy_vcp(mut self, snapshot: LegacyVcpSnapshot) -> Self {
        self.features.legacy_vcp = Some(snapshot);
        self
    }

    pub fn features(mut self, features: DetectorFeatures) -> Self {
        self.features = features;
        self
    }

    /// Build the input; every precomputed column must align with the daily frame.
    pub fn build(self) -> Result<PatternDetectorInput> {
        let bars = self.features.daily.len();
        if let Some((name, values)) = self.features.columns.iter().find(|(_, v)| v.len() != bars) {
            return Err(SetupError::MisalignedColumn {
                name: name.clone(),
                len: values.len(),
                bars,
            });
        }
        Ok(PatternDetectorInput {
            symbol: self.symbol,
            timeframe: self.timeframe,
            daily_bars: bars,
            weekly_bars: self.features.weekly.len(),
            features: self.features,
        })
    }
}

// ============================================================
// CANDIDATE
// ============================================================

/// Calibrated view of a candidate, produced by [`crate::calibration::calibrate`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateCalibration {
    pub profile: String,
    pub version: String,
    pub calibrated_quality_score: f64,
    pub calibrated_readiness_score: f64,
    pub calibrated_confidence: f64,
    pub aggregation_rank_score: f64,
}

/// One structural match produced by one detector run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternCandidate {
    pub pattern: String,
    /// Defaulted from the input during coercion when a detector leaves it empty
    pub timeframe: Option<Timeframe>,
    pub source_detector: String,
    pub pivot_price: Option<f64>,
    pub pivot_type: Option<String>,
    pub pivot_date: Option<NaiveDate>,
    /// Raw 0-100
    pub quality_score: Option<f64>,
    /// Raw 0-100
    pub readiness_score: Option<f64>,
    /// Raw 0-1
    pub confidence: Option<f64>,
    pub checks: BTreeMap<String, bool>,
    pub metrics: BTreeMap<String, f64>,
    pub notes: Vec<String>,
    pub calibration: Option<CandidateCalibration>,
}

impl PatternCandidate {
    pub fn new(pattern: impl Into<String>, source_detector: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            timeframe: None,
            source_detector: source_detector.into(),
            pivot_price: None,
            pivot_type: None,
            pivot_date: None,
            quality_score: None,
            readiness_score: None,
            confidence: None,
            checks: BTreeMap::new(),
            metrics: BTreeMap::new(),
            notes: Vec::new(),
            calibration: None,
        }
    }

    pub fn timeframe(mut self, timeframe: Timeframe) -> Self {
        self.timeframe = Some(timeframe);
        self
    }

    pub fn pivot(mut self, price: f64, pivot_type: &str, date: Option<NaiveDate>) -> Self {
        self.pivot_price = Some(price);
        self.pivot_type = Some(pivot_type.to_string());
        self.pivot_date = date;
        self
    }

    pub fn scores(
        mut self,
        quality: Option<f64>,
        readiness: Option<f64>,
        confidence: Option<f64>,
    ) -> Self {
        self.quality_score = quality;
        self.readiness_score = readiness;
        self.confidence = confidence;
        self
    }

    pub fn check(mut self, name: &str, passed: bool) -> Self {
        self.checks.insert(name.to_string(), passed);
        self
    }

    pub fn metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn kind(&self) -> PatternKind {
        PatternKind::classify(&self.pattern)
    }

    pub fn rank_score(&self) -> Option<f64> {
        self.calibration.as_ref().map(|c| c.aggregation_rank_score)
    }

    pub fn calibrated_confidence(&self) -> Option<f64> {
        self.calibration.as_ref().map(|c| c.calibrated_confidence)
    }
}

// ============================================================
// RESULT
// ============================================================

/// Output of one detector run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternDetectorResult {
    pub detector_name: String,
    pub candidates: Vec<PatternCandidate>,
    pub passed_checks: Vec<String>,
    pub failed_checks: Vec<String>,
    pub warnings: Vec<String>,
    pub error_detail: Option<String>,
}

impl PatternDetectorResult {
    /// Empty result; its outcome is `not_detected`.
    pub fn new(detector_name: impl Into<String>) -> Self {
        Self {
            detector_name: detector_name.into(),
            candidates: Vec::new(),
            passed_checks: Vec::new(),
            failed_checks: Vec::new(),
            warnings: Vec::new(),
            error_detail: None,
        }
    }

    pub fn detected(detector_name: impl Into<String>, candidates: Vec<PatternCandidate>) -> Self {
        Self {
            candidates,
            ..Self::new(detector_name)
        }
    }

    pub fn not_detected<S: Into<String>>(
        detector_name: impl Into<String>,
        reasons: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::new(detector_name).with_failed(reasons)
    }

    pub fn insufficient_data<S: Into<String>>(
        detector_name: impl Into<String>,
        reasons: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::new(detector_name)
            .with_failed([PatternOutcome::InsufficientData.as_str()])
            .with_failed(reasons)
    }

    pub fn not_implemented(detector_name: impl Into<String>, note: impl Into<String>) -> Self {
        Self::new(detector_name)
            .with_failed([PatternOutcome::NotImplemented.as_str()])
            .with_warning(note)
    }

    pub fn error(detector_name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            error_detail: Some(detail.into()),
            ..Self::new(detector_name).with_failed([PatternOutcome::Error.as_str()])
        }
    }

    pub fn with_passed<S: Into<String>>(mut self, checks: impl IntoIterator<Item = S>) -> Self {
        self.passed_checks.extend(checks.into_iter().map(Into::into));
        self
    }

    pub fn with_failed<S: Into<String>>(mut self, checks: impl IntoIterator<Item = S>) -> Self {
        self.failed_checks.extend(checks.into_iter().map(Into::into));
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Outcome by precedence: candidates, then explicit markers, then
    /// `not_detected`.
    pub fn outcome(&self) -> PatternOutcome {
        if !self.candidates.is_empty() {
            return PatternOutcome::Detected;
        }
        let has = |marker: PatternOutcome| self.failed_checks.iter().any(|c| c == marker.as_str());
        [
            PatternOutcome::NotImplemented,
            PatternOutcome::Error,
            PatternOutcome::InsufficientData,
        ]
        .into_iter()
        .find(|m| has(*m))
        .unwrap_or(PatternOutcome::NotDetected)
    }
}

// ============================================================
// SAFE INVOCATION
// ============================================================

/// Run `detector` so that nothing it does escapes as an error or panic.
///
/// Failures, panics, a mismatched detector name and malformed candidates all
/// come back as an `error` result carrying `"<Kind>: <message>"`.
pub fn detect_safe(
    detector: &dyn PatternDetector,
    input: &PatternDetectorInput,
    params: &DetectorParameters,
) -> PatternDetectorResult {
    let name = detector.name();

    let raw = match panic::catch_unwind(AssertUnwindSafe(|| detector.detect(input, params))) {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            let detail = format!("{}: {}", err.kind(), err);
            warn!(detector = name, %detail, "detector failed");
            return PatternDetectorResult::error(name, detail);
        }
        Err(payload) => {
            let detail = format!("Panic: {}", panic_message(payload.as_ref()));
            warn!(detector = name, %detail, "detector panicked");
            return PatternDetectorResult::error(name, detail);
        }
    };

    if raw.detector_name != name {
        let detail = format!(
            "ContractViolation: detector '{}' returned result named '{}'",
            name, raw.detector_name
        );
        warn!(detector = name, %detail, "detector name mismatch");
        return PatternDetectorResult::error(name, detail);
    }

    let result = match coerce_result(raw, input.timeframe()) {
        Ok(result) => result,
        Err(detail) => {
            warn!(detector = name, %detail, "candidate coercion failed");
            return PatternDetectorResult::error(name, detail);
        }
    };

    debug!(
        detector = name,
        outcome = %result.outcome(),
        candidates = result.candidates.len(),
        "detector finished"
    );
    result
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn coerce_result(
    mut result: PatternDetectorResult,
    default_timeframe: Timeframe,
) -> std::result::Result<PatternDetectorResult, String> {
    let detector = result.detector_name.clone();
    result.candidates = result
        .candidates
        .into_iter()
        .enumerate()
        .map(|(i, c)| coerce_candidate(c, &detector, default_timeframe).map_err(|e| {
            format!("CandidateCoercion: candidate {i}: {e}")
        }))
        .collect::<std::result::Result<_, _>>()?;
    Ok(result)
}

fn coerce_score(
    name: &str,
    value: Option<f64>,
    max: f64,
) -> std::result::Result<Option<f64>, String> {
    match value {
        Some(v) if !v.is_finite() => Err(format!("{name} is not finite")),
        Some(v) => Ok(Some(v.clamp(0.0, max))),
        None => Ok(None),
    }
}

/// Bring a candidate into canonical shape.
pub fn coerce_candidate(
    mut candidate: PatternCandidate,
    detector_name: &str,
    default_timeframe: Timeframe,
) -> std::result::Result<PatternCandidate, String> {
    if candidate.pattern.trim().is_empty() {
        return Err("pattern name is empty".to_string());
    }
    if candidate.source_detector.trim().is_empty() {
        candidate.source_detector = detector_name.to_string();
    }
    if candidate.timeframe.is_none() {
        candidate.timeframe = Some(default_timeframe);
    }
    candidate.quality_score = coerce_score("quality_score", candidate.quality_score, 100.0)?;
    candidate.readiness_score = coerce_score("readiness_score", candidate.readiness_score, 100.0)?;
    candidate.confidence = coerce_score("confidence", candidate.confidence, 1.0)?;
    if let Some(p) = candidate.pivot_price {
        if !p.is_finite() {
            return Err("pivot_price is not finite".to_string());
        }
    }
    if let Some((key, _)) = candidate.metrics.iter().find(|(_, v)| !v.is_finite()) {
        return Err(format!("metric '{key}' is not finite"));
    }
    Ok(candidate)
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::flat_daily;

    struct Scripted {
        name: &'static str,
        reply: fn() -> Result<PatternDetectorResult>,
    }

    impl PatternDetector for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        fn detect(
            &self,
            _input: &PatternDetectorInput,
            _params: &DetectorParameters,
        ) -> Result<PatternDetectorResult> {
            (self.reply)()
        }
    }

    fn input() -> PatternDetectorInput {
        PatternDetectorInput::builder("TEST")
            .timeframe(Timeframe::Weekly)
            .daily(flat_daily(10, 50.0))
            .build()
            .unwrap()
    }

    fn run(reply: fn() -> Result<PatternDetectorResult>) -> PatternDetectorResult {
        let detector = Scripted {
            name: "scripted",
            reply,
        };
        detect_safe(&detector, &input(), &DetectorParameters::default())
    }

    #[test]
    fn test_outcome_precedence() {
        let empty = PatternDetectorResult::new("d");
        assert_eq!(empty.outcome(), PatternOutcome::NotDetected);

        let insufficient = PatternDetectorResult::insufficient_data("d", ["daily_bars_lt_80"]);
        assert_eq!(insufficient.outcome(), PatternOutcome::InsufficientData);
        assert!(insufficient.failed_checks.contains(&"daily_bars_lt_80".to_string()));

        let both = insufficient.clone().with_failed(["not_implemented"]);
        assert_eq!(both.outcome(), PatternOutcome::NotImplemented);

        let error = PatternDetectorResult::error("d", "boom");
        assert_eq!(error.outcome(), PatternOutcome::Error);

        let mut with_candidate = both.clone();
        with_candidate.candidates.push(PatternCandidate::new("p", "d"));
        assert_eq!(with_candidate.outcome(), PatternOutcome::Detected);
    }

    #[test]
    fn test_builder_derives_counts_and_checks_columns() {
        let input = input();
        assert_eq!(input.daily_bars(), 10);
        assert_eq!(input.weekly_bars(), 0);

        let err = PatternDetectorInput::builder("X")
            .daily(flat_daily(10, 50.0))
            .column("ma_21", vec![1.0; 9])
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), "MisalignedColumn");
    }

    #[test]
    fn test_detect_safe_converts_error() {
        let result = run(|| Err(SetupError::MissingFeature("ma_21".into())));
        assert_eq!(result.outcome(), PatternOutcome::Error);
        assert_eq!(result.detector_name, "scripted");
        let detail = result.error_detail.unwrap();
        assert!(detail.starts_with("MissingFeature: "), "{detail}");
    }

    #[test]
    fn test_detect_safe_converts_panic() {
        let result = run(|| panic!("index out of bounds"));
        assert_eq!(result.outcome(), PatternOutcome::Error);
        assert_eq!(result.error_detail.as_deref(), Some("Panic: index out of bounds"));
    }

    #[test]
    fn test_detect_safe_rejects_name_mismatch() {
        let result = run(|| Ok(PatternDetectorResult::new("someone_else")));
        assert_eq!(result.outcome(), PatternOutcome::Error);
        assert!(result.error_detail.unwrap().starts_with("ContractViolation"));
    }

    #[test]
    fn test_detect_safe_coerces_candidates() {
        let result = run(|| {
            let candidate = PatternCandidate::new("three_weeks_tight", "")
                .scores(Some(120.0), Some(50.0), Some(1.4));
            Ok(PatternDetectorResult::detected("scripted", vec![candidate]))
        });
        assert_eq!(result.outcome(), PatternOutcome::Detected);
        let c = &result.candidates[0];
        assert_eq!(c.timeframe, Some(Timeframe::Weekly));
        assert_eq!(c.source_detector, "scripted");
        assert_eq!(c.quality_score, Some(100.0));
        assert_eq!(c.confidence, Some(1.0));
    }

    #[test]
    fn test_detect_safe_rejects_malformed_candidate() {
        let result = run(|| {
            let candidate = PatternCandidate::new("cup_with_handle", "scripted")
                .scores(Some(f64::NAN), None, None);
            Ok(PatternDetectorResult::detected("scripted", vec![candidate]))
        });
        assert_eq!(result.outcome(), PatternOutcome::Error);
        assert!(result.candidates.is_empty());
        assert!(result.error_detail.unwrap().starts_with("CandidateCoercion"));

        let result = run(|| {
            let candidate = PatternCandidate::new("cup_with_handle", "scripted")
                .metric("depth", f64::INFINITY);
            Ok(PatternDetectorResult::detected("scripted", vec![candidate]))
        });
        assert_eq!(result.outcome(), PatternOutcome::Error);
    }
}
