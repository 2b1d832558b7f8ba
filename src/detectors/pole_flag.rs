//! High tight flag: a steep pole followed by a shallow, quiet flag

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::helpers::{
    confidence, distance_to_pivot, partition_checks, prerequisite_failures, proximity_readiness,
    score, unit, volume_ratio,
};
use crate::config::DetectorParameters;
use crate::contract::{PatternCandidate, PatternDetectorInput, PatternDetectorResult};
use crate::params::{ensure_ordered, get_period, get_ratio, get_scalar, ParamMeta, ParamSet};
use crate::technicals::{argmax_high, argmin_low};
use crate::{DetectorMetadata, PatternDetector, PatternKind, Period, Ratio, Result, Timeframe};

const NAME: &str = "high_tight_flag";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoleFlagParams {
    pub min_daily_bars: Period,
    /// Longest pole, in bars before the peak
    pub pole_max_bars: Period,
    pub flag_min_bars: Period,
    pub flag_max_bars: Period,
    /// Minimum pole advance (0.9 = +90%)
    pub min_pole_return: f64,
    /// Maximum flag pullback from the pole peak
    pub max_flag_depth: Ratio,
    /// Flag volume relative to pole volume
    pub max_flag_volume_ratio: f64,
}

impl Default for PoleFlagParams {
    fn default() -> Self {
        Self {
            min_daily_bars: Period::new_const(80),
            pole_max_bars: Period::new_const(40),
            flag_min_bars: Period::new_const(5),
            flag_max_bars: Period::new_const(25),
            min_pole_return: 0.9,
            max_flag_depth: Ratio::new_const(0.25),
            max_flag_volume_ratio: 1.0,
        }
    }
}

static POLE_FLAG_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("min_daily_bars", 80.0, (40.0, 250.0, 10.0), "Minimum daily history"),
    ParamMeta::period("pole_max_bars", 40.0, (10.0, 60.0, 5.0), "Maximum pole length"),
    ParamMeta::period("flag_min_bars", 5.0, (2.0, 15.0, 1.0), "Minimum flag length"),
    ParamMeta::period("flag_max_bars", 25.0, (5.0, 40.0, 5.0), "Maximum flag length"),
    ParamMeta::scalar("min_pole_return", 0.9, (0.3, 2.0, 0.1), "Minimum pole advance"),
    ParamMeta::ratio("max_flag_depth", 0.25, (0.1, 0.4, 0.05), "Maximum flag depth"),
    ParamMeta::scalar("max_flag_volume_ratio", 1.0, (0.4, 1.5, 0.1), "Flag vs pole volume"),
];

impl ParamSet for PoleFlagParams {
    fn param_meta() -> &'static [ParamMeta] {
        POLE_FLAG_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let m = POLE_FLAG_PARAMS;
        Ok(Self {
            min_daily_bars: get_period(m, params, "min_daily_bars", 80)?,
            pole_max_bars: get_period(m, params, "pole_max_bars", 40)?,
            flag_min_bars: get_period(m, params, "flag_min_bars", 5)?,
            flag_max_bars: get_period(m, params, "flag_max_bars", 25)?,
            min_pole_return: get_scalar(m, params, "min_pole_return", 0.9)?,
            max_flag_depth: get_ratio(m, params, "max_flag_depth", 0.25)?,
            max_flag_volume_ratio: get_scalar(m, params, "max_flag_volume_ratio", 1.0)?,
        })
    }

    fn family() -> &'static str {
        NAME
    }

    fn validate(&self) -> Result<()> {
        ensure_ordered(
            NAME,
            "flag_min_bars",
            self.flag_min_bars.get() as f64,
            "flag_max_bars",
            self.flag_max_bars.get() as f64,
        )
    }
}

/// Pole-and-flag detector
#[derive(Debug, Clone, Copy, Default)]
pub struct PoleFlagDetector;

impl PatternDetector for PoleFlagDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn metadata(&self) -> DetectorMetadata {
        DetectorMetadata {
            name: NAME,
            description: "Rapid advance followed by a shallow flag on lighter volume",
            kind: PatternKind::Structural,
            timeframes: &[Timeframe::Daily],
        }
    }

    fn detect(
        &self,
        input: &PatternDetectorInput,
        params: &DetectorParameters,
    ) -> Result<PatternDetectorResult> {
        let p = &params.high_tight_flag;
        let reasons = prerequisite_failures(input, Some(p.min_daily_bars.get()), None);
        if !reasons.is_empty() {
            return Ok(PatternDetectorResult::insufficient_data(NAME, reasons));
        }

        let bars = input.daily();
        let n = bars.len();
        let last = n - 1;

        // Peak candidates leave a flag of admissible length behind them
        let earliest = last.saturating_sub(p.flag_max_bars.get());
        let latest = last.saturating_sub(p.flag_min_bars.get());
        let pole = argmax_high(bars, earliest..latest + 1).and_then(|peak| {
            let base = argmin_low(bars, peak.saturating_sub(p.pole_max_bars.get())..peak)?;
            Some((base, peak))
        });
        let Some((base, peak)) = pole else {
            return Ok(PatternDetectorResult::not_detected(NAME, ["pole_return_below_threshold"]));
        };

        let peak_high = bars[peak].high;
        let base_low = bars[base].low;
        let pole_return = peak_high / base_low - 1.0;
        if pole_return < p.min_pole_return {
            return Ok(
                PatternDetectorResult::not_detected(NAME, ["pole_return_below_threshold"])
                    .with_warning(format!("pole_return:{pole_return:.4}")),
            );
        }

        let flag = &bars[peak + 1..];
        let flag_low = flag.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        let depth = (peak_high - flag_low) / peak_high;
        let midpoint = (peak_high + base_low) / 2.0;
        let vol_ratio = volume_ratio(flag, &bars[base..=peak]);

        // The pole high bounds the flag; a later high means the flag already broke out
        let below_peak = flag.iter().all(|b| b.high <= peak_high);
        let depth_ok = depth <= p.max_flag_depth.get();
        let upper_half = flag_low >= midpoint;
        let volume_ok = vol_ratio.is_some_and(|r| r <= p.max_flag_volume_ratio);
        let checks = [
            ("pole_return_ok", true),
            ("flag_below_pole_high", below_peak),
            ("flag_depth_ok", depth_ok),
            ("flag_in_upper_half", upper_half),
            ("flag_volume_contracting", volume_ok),
        ];
        let (passed, _) = partition_checks(&checks);

        let mut failures = Vec::new();
        if !below_peak {
            failures.push("flag_above_pole_high");
        }
        if !depth_ok {
            failures.push("flag_too_deep");
        }
        if !upper_half {
            failures.push("flag_below_pole_midpoint");
        }
        if !volume_ok {
            failures.push("flag_volume_not_contracting");
        }
        if !failures.is_empty() {
            return Ok(PatternDetectorResult::not_detected(NAME, failures).with_passed(passed));
        }

        let distance = distance_to_pivot(bars[last].close, peak_high);
        let strength = unit(pole_return, 1.5);
        let shallowness = 1.0 - unit(depth, p.max_flag_depth.get());
        let quietness = 1.0 - vol_ratio.map_or(1.0, |r| unit(r, 1.0));
        let quality = score(40.0 + 30.0 * strength + 20.0 * shallowness + 10.0 * quietness);
        let readiness = proximity_readiness(distance, p.max_flag_depth.get(), 35.0, 95.0);
        let conf = confidence(0.5 + 0.2 * strength + 0.15 * shallowness + 0.1 * quietness);

        let mut candidate = PatternCandidate::new(NAME, NAME)
            .timeframe(Timeframe::Daily)
            .pivot(peak_high, "flag_high", Some(bars[peak].date))
            .scores(Some(quality), Some(readiness), Some(conf))
            .metric("pole_return_pct", 100.0 * pole_return)
            .metric("pole_length", (peak - base) as f64)
            .metric("flag_length", flag.len() as f64)
            .metric("flag_depth_pct", 100.0 * depth)
            .metric("distance_to_pivot_pct", 100.0 * distance);
        if let Some(r) = vol_ratio {
            candidate = candidate.metric("flag_volume_ratio", r);
        }
        for (name, ok) in checks {
            candidate = candidate.check(name, ok);
        }

        Ok(PatternDetectorResult::detected(NAME, vec![candidate]).with_passed(passed))
    }
}
