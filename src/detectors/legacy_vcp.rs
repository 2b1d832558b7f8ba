//! Volatility contraction pattern (VCP), wrapping the legacy scorer
//!
//! The legacy scorer runs upstream and hands over a [`LegacyVcpSnapshot`];
//! this detector only translates it into the candidate contract. Its score is
//! passed through as quality without recalculation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::helpers::{confidence, distance_to_pivot, partition_checks, prerequisite_failures};
use crate::config::DetectorParameters;
use crate::contract::{PatternCandidate, PatternDetectorInput, PatternDetectorResult};
use crate::params::{get_period, ParamMeta, ParamSet};
use crate::{DetectorMetadata, PatternDetector, PatternKind, Period, Result, Timeframe};

const NAME: &str = "vcp";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VcpParams {
    pub min_daily_bars: Period,
    /// Fewer contraction bases than this is not a VCP
    pub min_bases: Period,
}

impl Default for VcpParams {
    fn default() -> Self {
        Self {
            min_daily_bars: Period::new_const(120),
            min_bases: Period::new_const(2),
        }
    }
}

static VCP_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("min_daily_bars", 120.0, (60.0, 260.0, 20.0), "Minimum daily history"),
    ParamMeta::period("min_bases", 2.0, (1.0, 5.0, 1.0), "Minimum contraction bases"),
];

impl ParamSet for VcpParams {
    fn param_meta() -> &'static [ParamMeta] {
        VCP_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            min_daily_bars: get_period(VCP_PARAMS, params, "min_daily_bars", 120)?,
            min_bases: get_period(VCP_PARAMS, params, "min_bases", 2)?,
        })
    }

    fn family() -> &'static str {
        NAME
    }
}

/// Legacy VCP passthrough
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyVcpDetector;

impl PatternDetector for LegacyVcpDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn metadata(&self) -> DetectorMetadata {
        DetectorMetadata {
            name: NAME,
            description: "Volatility contraction pattern from the legacy scorer",
            kind: PatternKind::Structural,
            timeframes: &[Timeframe::Daily],
        }
    }

    fn detect(
        &self,
        input: &PatternDetectorInput,
        params: &DetectorParameters,
    ) -> Result<PatternDetectorResult> {
        let p = &params.vcp;
        let mut reasons = prerequisite_failures(input, Some(p.min_daily_bars.get()), None);
        let snapshot = input.legacy_vcp();
        if snapshot.is_none() {
            reasons.push("vcp_snapshot_missing".to_string());
        }
        let (Some(snapshot), true) = (snapshot, reasons.is_empty()) else {
            return Ok(PatternDetectorResult::insufficient_data(NAME, reasons));
        };

        if snapshot.num_bases < p.min_bases.get() {
            return Ok(PatternDetectorResult::not_detected(NAME, ["vcp_insufficient_bases"]));
        }
        if !snapshot.detected {
            return Ok(PatternDetectorResult::not_detected(NAME, ["vcp_not_detected"]));
        }

        let pivot = snapshot.pivot_price.filter(|p| p.is_finite() && *p > 0.0);
        let checks = [
            ("contracting_depth", snapshot.contracting_depth),
            ("contracting_volume", snapshot.contracting_volume),
            ("tightening_range", snapshot.tightening_range),
            ("pivot_defined", pivot.is_some()),
            ("ready_for_breakout", snapshot.ready_for_breakout),
        ];
        let (passed, failed) = partition_checks(&checks);
        let true_count = passed.len() as f64;

        let mut candidate = PatternCandidate::new(NAME, NAME)
            .timeframe(Timeframe::Daily)
            .scores(
                snapshot.score,
                Some(100.0 * true_count / checks.len() as f64),
                Some(confidence(0.30 + 0.12 * true_count)),
            )
            .metric("num_bases", snapshot.num_bases as f64);
        for (name, ok) in checks {
            candidate = candidate.check(name, ok);
        }
        if let Some(score) = snapshot.score {
            candidate = candidate.metric("legacy_score", score);
        }
        if let Some(pivot) = pivot {
            let last = input.daily().last();
            candidate = candidate.pivot(pivot, "vcp_pivot", last.map(|b| b.date));
            if let Some(bar) = last {
                candidate = candidate
                    .metric("distance_to_pivot_pct", 100.0 * distance_to_pivot(bar.close, pivot));
            }
        }

        Ok(PatternDetectorResult::detected(NAME, vec![candidate])
            .with_passed(passed)
            .with_failed(failed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{LegacyVcpSnapshot, PatternOutcome};
    use crate::test_support::flat_daily;

    fn snapshot() -> LegacyVcpSnapshot {
        LegacyVcpSnapshot {
            detected: true,
            score: Some(73.5),
            num_bases: 3,
            contracting_depth: true,
            contracting_volume: true,
            tightening_range: false,
            pivot_price: Some(52.0),
            ready_for_breakout: false,
        }
    }

    fn run(bars: usize, snapshot: Option<LegacyVcpSnapshot>) -> PatternDetectorResult {
        let mut builder = PatternDetectorInput::builder("VCP").daily(flat_daily(bars, 50.0));
        if let Some(s) = snapshot {
            builder = builder.legacy_vcp(s);
        }
        LegacyVcpDetector
            .detect(&builder.build().unwrap(), &DetectorParameters::default())
            .unwrap()
    }

    #[test]
    fn test_passes_score_through() {
        let result = run(150, Some(snapshot()));
        assert_eq!(result.outcome(), PatternOutcome::Detected);
        let c = &result.candidates[0];
        assert_eq!(c.quality_score, Some(73.5));
        assert_eq!(c.readiness_score, Some(60.0));
        assert!((c.confidence.unwrap() - 0.66).abs() < 1e-12);
        assert_eq!(c.pivot_price, Some(52.0));
        assert_eq!(c.checks.get("pivot_defined"), Some(&true));
        assert_eq!(c.checks.get("tightening_range"), Some(&false));
        assert!(result.failed_checks.contains(&"ready_for_breakout".to_string()));
    }

    #[test]
    fn test_insufficient_bases() {
        let mut s = snapshot();
        s.num_bases = 1;
        let result = run(150, Some(s));
        assert_eq!(result.outcome(), PatternOutcome::NotDetected);
        assert_eq!(result.failed_checks, vec!["vcp_insufficient_bases"]);
    }

    #[test]
    fn test_not_detected_by_legacy_scorer() {
        let mut s = snapshot();
        s.detected = false;
        assert_eq!(run(150, Some(s)).failed_checks, vec!["vcp_not_detected"]);
    }

    #[test]
    fn test_prerequisites() {
        let result = run(100, None);
        assert_eq!(result.outcome(), PatternOutcome::InsufficientData);
        assert!(result.failed_checks.contains(&"daily_bars_lt_120".to_string()));
        assert!(result.failed_checks.contains(&"vcp_snapshot_missing".to_string()));

        let result = run(150, None);
        assert_eq!(result.outcome(), PatternOutcome::InsufficientData);
    }
}
