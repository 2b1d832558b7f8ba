//! Cup with handle
//!
//! Lips are swing highs. Starting from the most recent right lip whose
//! handle is not yet too long, the nearest admissible left lip forms the cup;
//! the trough is the lowest low between them. The handle is everything after
//! the right lip.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::helpers::{
    confidence, distance_to_pivot, partition_checks, prerequisite_failures, proximity_readiness,
    score, unit, volume_ratio,
};
use crate::config::DetectorParameters;
use crate::contract::{PatternCandidate, PatternDetectorInput, PatternDetectorResult};
use crate::params::{ensure_ordered, get_period, get_ratio, get_scalar, ParamMeta, ParamSet};
use crate::technicals::{argmax_high, argmin_low, swing_highs};
use crate::{Bar, DetectorMetadata, PatternDetector, PatternKind, Period, Ratio, Result, Timeframe};

const NAME: &str = "cup_with_handle";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CupHandleParams {
    pub min_daily_bars: Period,
    /// Swing-high confirmation bars on each side
    pub swing_left: Period,
    pub swing_right: Period,
    pub cup_min_bars: Period,
    pub cup_max_bars: Period,
    /// Cup depth bounds, from the left lip
    pub min_depth: Ratio,
    pub max_depth: Ratio,
    /// `(right lip - trough) / (left lip - trough)`
    pub min_recovery: Ratio,
    pub handle_min_bars: Period,
    pub handle_max_bars: Period,
    /// Maximum handle pullback from the right lip
    pub max_handle_depth: Ratio,
    /// Handle volume relative to cup volume
    pub max_handle_volume_ratio: f64,
}

impl Default for CupHandleParams {
    fn default() -> Self {
        Self {
            min_daily_bars: Period::new_const(100),
            swing_left: Period::new_const(5),
            swing_right: Period::new_const(5),
            cup_min_bars: Period::new_const(30),
            cup_max_bars: Period::new_const(250),
            min_depth: Ratio::new_const(0.12),
            max_depth: Ratio::new_const(0.35),
            min_recovery: Ratio::new_const(0.90),
            handle_min_bars: Period::new_const(5),
            handle_max_bars: Period::new_const(25),
            max_handle_depth: Ratio::new_const(0.12),
            max_handle_volume_ratio: 1.0,
        }
    }
}

static CUP_HANDLE_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("min_daily_bars", 100.0, (60.0, 300.0, 20.0), "Minimum daily history"),
    ParamMeta::period("swing_left", 5.0, (2.0, 10.0, 1.0), "Swing confirmation (left)"),
    ParamMeta::period("swing_right", 5.0, (2.0, 10.0, 1.0), "Swing confirmation (right)"),
    ParamMeta::period("cup_min_bars", 30.0, (15.0, 60.0, 5.0), "Minimum cup duration"),
    ParamMeta::period("cup_max_bars", 250.0, (60.0, 350.0, 10.0), "Maximum cup duration"),
    ParamMeta::ratio("min_depth", 0.12, (0.05, 0.2, 0.01), "Minimum cup depth"),
    ParamMeta::ratio("max_depth", 0.35, (0.2, 0.5, 0.05), "Maximum cup depth"),
    ParamMeta::ratio("min_recovery", 0.9, (0.7, 1.0, 0.05), "Minimum right-lip recovery"),
    ParamMeta::period("handle_min_bars", 5.0, (1.0, 15.0, 1.0), "Minimum handle length"),
    ParamMeta::period("handle_max_bars", 25.0, (10.0, 40.0, 5.0), "Maximum handle length"),
    ParamMeta::ratio("max_handle_depth", 0.12, (0.05, 0.2, 0.01), "Maximum handle depth"),
    ParamMeta::scalar(
        "max_handle_volume_ratio",
        1.0,
        (0.4, 1.5, 0.1),
        "Handle vs cup volume",
    ),
];

impl ParamSet for CupHandleParams {
    fn param_meta() -> &'static [ParamMeta] {
        CUP_HANDLE_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let m = CUP_HANDLE_PARAMS;
        Ok(Self {
            min_daily_bars: get_period(m, params, "min_daily_bars", 100)?,
            swing_left: get_period(m, params, "swing_left", 5)?,
            swing_right: get_period(m, params, "swing_right", 5)?,
            cup_min_bars: get_period(m, params, "cup_min_bars", 30)?,
            cup_max_bars: get_period(m, params, "cup_max_bars", 250)?,
            min_depth: get_ratio(m, params, "min_depth", 0.12)?,
            max_depth: get_ratio(m, params, "max_depth", 0.35)?,
            min_recovery: get_ratio(m, params, "min_recovery", 0.9)?,
            handle_min_bars: get_period(m, params, "handle_min_bars", 5)?,
            handle_max_bars: get_period(m, params, "handle_max_bars", 25)?,
            max_handle_depth: get_ratio(m, params, "max_handle_depth", 0.12)?,
            max_handle_volume_ratio: get_scalar(m, params, "max_handle_volume_ratio", 1.0)?,
        })
    }

    fn family() -> &'static str {
        NAME
    }

    fn validate(&self) -> Result<()> {
        ensure_ordered(
            NAME,
            "cup_min_bars",
            self.cup_min_bars.get() as f64,
            "cup_max_bars",
            self.cup_max_bars.get() as f64,
        )?;
        ensure_ordered(NAME, "min_depth", self.min_depth.get(), "max_depth", self.max_depth.get())?;
        ensure_ordered(
            NAME,
            "handle_min_bars",
            self.handle_min_bars.get() as f64,
            "handle_max_bars",
            self.handle_max_bars.get() as f64,
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct Cup {
    left: usize,
    trough: usize,
    right: usize,
    depth: f64,
    recovery: f64,
}

fn find_cup(bars: &[Bar], p: &CupHandleParams) -> Option<Cup> {
    let last = bars.len().checked_sub(1)?;
    let swings = swing_highs(bars, p.swing_left.get(), p.swing_right.get());

    for (ri, &right) in swings.iter().enumerate().rev() {
        if last - right > p.handle_max_bars.get() {
            break;
        }
        for &left in swings[..ri].iter().rev() {
            let duration = right - left;
            if duration < p.cup_min_bars.get() {
                continue;
            }
            if duration > p.cup_max_bars.get() {
                break;
            }
            let left_high = bars[left].high;
            let interior = left + 1..right;
            if argmax_high(bars, interior.clone()).is_some_and(|i| bars[i].high > left_high) {
                continue;
            }
            let Some(trough) = argmin_low(bars, interior) else {
                continue;
            };
            let trough_low = bars[trough].low;
            let depth = (left_high - trough_low) / left_high;
            if depth < p.min_depth.get() || depth > p.max_depth.get() {
                continue;
            }
            let recovery = (bars[right].high - trough_low) / (left_high - trough_low);
            if recovery < p.min_recovery.get() {
                continue;
            }
            return Some(Cup {
                left,
                trough,
                right,
                depth,
                recovery,
            });
        }
    }
    None
}

/// Cup-with-handle detector
#[derive(Debug, Clone, Copy, Default)]
pub struct CupHandleDetector;

impl PatternDetector for CupHandleDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn metadata(&self) -> DetectorMetadata {
        DetectorMetadata {
            name: NAME,
            description: "Rounded base between two comparable highs, then a shallow handle",
            kind: PatternKind::Structural,
            timeframes: &[Timeframe::Daily],
        }
    }

    fn detect(
        &self,
        input: &PatternDetectorInput,
        params: &DetectorParameters,
    ) -> Result<PatternDetectorResult> {
        let p = &params.cup_with_handle;
        let reasons = prerequisite_failures(input, Some(p.min_daily_bars.get()), None);
        if !reasons.is_empty() {
            return Ok(PatternDetectorResult::insufficient_data(NAME, reasons));
        }

        let bars = input.daily();
        let n = bars.len();
        let Some(cup) = find_cup(bars, p) else {
            return Ok(PatternDetectorResult::not_detected(NAME, ["cup_structure_not_found"]));
        };

        let handle = &bars[cup.right + 1..];
        if handle.len() < p.handle_min_bars.get() {
            return Ok(PatternDetectorResult::not_detected(NAME, ["handle_not_formed"])
                .with_passed(["cup_structure"]));
        }

        let lip = bars[cup.right].high;
        let left_high = bars[cup.left].high;
        let trough_low = bars[cup.trough].low;
        let handle_low = handle.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        let handle_depth = (lip - handle_low) / lip;
        let midpoint = (left_high + trough_low) / 2.0;
        let vol_ratio = volume_ratio(handle, &bars[cup.left..=cup.right]);

        let depth_ok = handle_depth <= p.max_handle_depth.get();
        let upper_half = handle_low >= midpoint;
        let volume_ok = vol_ratio.is_some_and(|r| r <= p.max_handle_volume_ratio);
        let checks = [
            ("cup_structure", true),
            ("handle_formed", true),
            ("handle_depth_ok", depth_ok),
            ("handle_in_upper_half", upper_half),
            ("handle_volume_contracting", volume_ok),
        ];
        let (passed, _) = partition_checks(&checks);

        let mut failures = Vec::new();
        if !depth_ok {
            failures.push("handle_too_deep");
        }
        if !upper_half {
            failures.push("handle_below_cup_midpoint");
        }
        if !volume_ok {
            failures.push("handle_volume_not_contracting");
        }
        if !failures.is_empty() {
            return Ok(PatternDetectorResult::not_detected(NAME, failures).with_passed(passed));
        }

        let Some(pivot_idx) = argmax_high(bars, cup.right + 1..n) else {
            return Ok(PatternDetectorResult::not_detected(NAME, ["handle_not_formed"]));
        };
        let pivot = bars[pivot_idx].high;
        let distance = distance_to_pivot(bars[n - 1].close, pivot);

        let recovery_strength =
            unit(cup.recovery - p.min_recovery.get(), 1.0 - p.min_recovery.get());
        let shallow_handle = 1.0 - unit(handle_depth, p.max_handle_depth.get());
        let quiet_handle = 1.0 - vol_ratio.map_or(1.0, |r| unit(r, 1.0));
        // Best-formed cups retrace roughly a quarter of the left lip
        let shape = 1.0 - unit((cup.depth - 0.25).abs(), 0.15);

        let quality = score(
            40.0 + 20.0 * recovery_strength
                + 15.0 * shallow_handle
                + 15.0 * shape
                + 10.0 * quiet_handle,
        );
        let readiness = proximity_readiness(distance, p.max_handle_depth.get(), 30.0, 95.0);
        let conf = confidence(
            0.5 + 0.15 * recovery_strength + 0.15 * shallow_handle + 0.1 * quiet_handle,
        );

        let mut candidate = PatternCandidate::new(NAME, NAME)
            .timeframe(Timeframe::Daily)
            .pivot(pivot, "handle_high", Some(bars[pivot_idx].date))
            .scores(Some(quality), Some(readiness), Some(conf))
            .metric("cup_depth_pct", 100.0 * cup.depth)
            .metric("cup_length", (cup.right - cup.left) as f64)
            .metric("recovery_ratio", cup.recovery)
            .metric("handle_length", handle.len() as f64)
            .metric("handle_depth_pct", 100.0 * handle_depth)
            .metric("distance_to_pivot_pct", 100.0 * distance);
        if let Some(r) = vol_ratio {
            candidate = candidate.metric("handle_volume_ratio", r);
        }
        for (name, ok) in checks {
            candidate = candidate.check(name, ok);
        }

        Ok(PatternDetectorResult::detected(NAME, vec![candidate]).with_passed(passed))
    }
}
