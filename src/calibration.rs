//! Cross-detector calibration
//!
//! Detector families score on their own scales: an inside day rarely rates
//! above 78 for quality while a cup with handle routinely reaches the 90s.
//! Each family carries a static envelope; raw scores are mapped linearly
//! through it onto shared 0-100 / 0-1 scales and folded into one rank score.

use crate::contract::{CandidateCalibration, PatternCandidate};

/// Tag written into metrics and provenance notes
pub const CALIBRATION_VERSION: &str = "cross_detector_v1";

/// Calibrated confidence never reaches certainty in either direction
pub const CALIBRATED_CONFIDENCE_MIN: f64 = 0.05;
pub const CALIBRATED_CONFIDENCE_MAX: f64 = 0.95;

/// Raw score envelope of one detector family
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorCalibrationProfile {
    pub name: &'static str,
    pub quality_min: f64,
    pub quality_max: f64,
    pub readiness_min: f64,
    pub readiness_max: f64,
    pub confidence_min: f64,
    pub confidence_max: f64,
    pub confidence_bias: f64,
}

macro_rules! profile {
    ($name:literal, q: $qmin:expr, $qmax:expr; r: $rmin:expr, $rmax:expr; c: $cmin:expr, $cmax:expr; bias: $bias:expr) => {
        DetectorCalibrationProfile {
            name: $name,
            quality_min: $qmin,
            quality_max: $qmax,
            readiness_min: $rmin,
            readiness_max: $rmax,
            confidence_min: $cmin,
            confidence_max: $cmax,
            confidence_bias: $bias,
        }
    };
}

static VCP: DetectorCalibrationProfile =
    profile!("vcp", q: 20.0, 95.0; r: 20.0, 100.0; c: 0.30, 0.90; bias: 0.0);
static THREE_WEEKS_TIGHT: DetectorCalibrationProfile =
    profile!("three_weeks_tight", q: 35.0, 95.0; r: 30.0, 95.0; c: 0.35, 0.90; bias: 0.02);
static HIGH_TIGHT_FLAG: DetectorCalibrationProfile =
    profile!("high_tight_flag", q: 40.0, 98.0; r: 35.0, 95.0; c: 0.35, 0.92; bias: 0.01);
static NR7_INSIDE_DAY: DetectorCalibrationProfile =
    profile!("nr7_inside_day", q: 20.0, 78.0; r: 45.0, 98.0; c: 0.30, 0.85; bias: -0.03);
static FIRST_PULLBACK: DetectorCalibrationProfile =
    profile!("first_pullback", q: 30.0, 90.0; r: 35.0, 95.0; c: 0.30, 0.88; bias: -0.01);
static CUP_WITH_HANDLE: DetectorCalibrationProfile =
    profile!("cup_with_handle", q: 40.0, 98.0; r: 30.0, 95.0; c: 0.35, 0.92; bias: 0.02);
static DEFAULT: DetectorCalibrationProfile =
    profile!("default", q: 0.0, 100.0; r: 0.0, 100.0; c: 0.0, 1.0; bias: 0.0);

/// Profile for a source detector; unknown detectors use the identity envelope.
pub fn profile_for(detector: &str) -> &'static DetectorCalibrationProfile {
    match detector {
        "vcp" => &VCP,
        "three_weeks_tight" => &THREE_WEEKS_TIGHT,
        "high_tight_flag" => &HIGH_TIGHT_FLAG,
        "nr7_inside_day" => &NR7_INSIDE_DAY,
        "first_pullback" => &FIRST_PULLBACK,
        "cup_with_handle" => &CUP_WITH_HANDLE,
        _ => &DEFAULT,
    }
}

/// Linear map of `value` from `[min, max]` onto `[0, 1]`, clamped.
pub fn normalize(value: f64, min: f64, max: f64) -> f64 {
    if max <= min {
        return if value >= max { 1.0 } else { 0.0 };
    }
    ((value - min) / (max - min)).clamp(0.0, 1.0)
}

/// Fill a missing normalized value with the mean of the available others
/// (0.5 when none are available).
fn fill_missing(value: Option<f64>, others: [Option<f64>; 2]) -> f64 {
    value.unwrap_or_else(|| {
        let present: Vec<f64> = others.into_iter().flatten().collect();
        if present.is_empty() {
            0.5
        } else {
            present.iter().sum::<f64>() / present.len() as f64
        }
    })
}

/// `0.55·confidence + 0.25·quality + 0.20·readiness + bias`, on normalized
/// inputs, clamped to [`CALIBRATED_CONFIDENCE_MIN`]..=[`CALIBRATED_CONFIDENCE_MAX`].
pub fn calibrated_confidence(
    norm_confidence: f64,
    norm_quality: f64,
    norm_readiness: f64,
    bias: f64,
) -> f64 {
    (0.55 * norm_confidence + 0.25 * norm_quality + 0.20 * norm_readiness + bias)
        .clamp(CALIBRATED_CONFIDENCE_MIN, CALIBRATED_CONFIDENCE_MAX)
}

/// Single ranking scalar. Quality and readiness are on the 0-100 scale.
pub fn aggregation_rank_score(confidence: f64, quality: f64, readiness: f64) -> f64 {
    0.55 * confidence + 0.25 * quality / 100.0 + 0.20 * readiness / 100.0
}

/// Calibrated copy of `candidate`.
///
/// Raw fields are left untouched and every annotation is overwritten rather
/// than accumulated, so calibrating an already-calibrated candidate is a no-op.
pub fn calibrate(candidate: &PatternCandidate) -> PatternCandidate {
    let profile = profile_for(&candidate.source_detector);

    let q = candidate
        .quality_score
        .map(|v| normalize(v, profile.quality_min, profile.quality_max));
    let r = candidate
        .readiness_score
        .map(|v| normalize(v, profile.readiness_min, profile.readiness_max));
    let c = candidate
        .confidence
        .map(|v| normalize(v, profile.confidence_min, profile.confidence_max));

    let nq = fill_missing(q, [r, c]);
    let nr = fill_missing(r, [q, c]);
    let nc = fill_missing(c, [q, r]);

    let quality = nq * 100.0;
    let readiness = nr * 100.0;
    let confidence = calibrated_confidence(nc, nq, nr, profile.confidence_bias);
    let rank = aggregation_rank_score(confidence, quality, readiness);

    let mut out = candidate.clone();
    let mut annotate = |key: &str, value: Option<f64>| {
        if let Some(v) = value {
            out.metrics.insert(key.to_string(), v);
        }
    };
    annotate("raw_quality_score", candidate.quality_score);
    annotate("raw_readiness_score", candidate.readiness_score);
    annotate("raw_confidence", candidate.confidence);
    annotate("calibrated_quality_score", Some(quality));
    annotate("calibrated_readiness_score", Some(readiness));
    annotate("calibrated_confidence", Some(confidence));
    annotate("aggregation_rank_score", Some(rank));
    annotate("calibration_version", Some(1.0));

    let note = format!("calibration:{}:{}", CALIBRATION_VERSION, profile.name);
    if !out.notes.contains(&note) {
        out.notes.push(note);
    }

    out.calibration = Some(CandidateCalibration {
        profile: profile.name.to_string(),
        version: CALIBRATION_VERSION.to_string(),
        calibrated_quality_score: quality,
        calibrated_readiness_score: readiness,
        calibrated_confidence: confidence,
        aggregation_rank_score: rank,
    });
    out
}
