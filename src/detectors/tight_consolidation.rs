//! Three weeks tight: a trailing run of weekly bars trading in a narrow band

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::helpers::{
    confidence, distance_to_pivot, partition_checks, prerequisite_failures, proximity_readiness,
    score, unit, volume_ratio,
};
use crate::config::DetectorParameters;
use crate::contract::{PatternCandidate, PatternDetectorInput, PatternDetectorResult};
use crate::params::{ensure_ordered, get_period, get_ratio, ParamMeta, ParamSet};
use crate::technicals::{argmax_high, closes, median};
use crate::{Bar, DetectorMetadata, PatternDetector, PatternKind, Period, Ratio, Result, Timeframe};

const NAME: &str = "three_weeks_tight";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TightConsolidationParams {
    pub min_weekly_bars: Period,
    pub min_run: Period,
    pub max_run: Period,
    /// Band (high-low span / median close) for a strictly tight run
    pub strict_band: Ratio,
    /// Widest band still counted as part of the run
    pub relaxed_band: Ratio,
    /// Weeks before the run used for the volume and trend comparisons
    pub context_bars: Period,
}

impl Default for TightConsolidationParams {
    fn default() -> Self {
        Self {
            min_weekly_bars: Period::new_const(8),
            min_run: Period::new_const(3),
            max_run: Period::new_const(12),
            strict_band: Ratio::new_const(0.045),
            relaxed_band: Ratio::new_const(0.07),
            context_bars: Period::new_const(8),
        }
    }
}

static TIGHT_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("min_weekly_bars", 8.0, (4.0, 52.0, 4.0), "Minimum weekly history"),
    ParamMeta::period("min_run", 3.0, (2.0, 6.0, 1.0), "Minimum run length in weeks"),
    ParamMeta::period("max_run", 12.0, (3.0, 26.0, 1.0), "Maximum run length in weeks"),
    ParamMeta::ratio("strict_band", 0.045, (0.01, 0.1, 0.005), "Strict tightness band"),
    ParamMeta::ratio("relaxed_band", 0.07, (0.02, 0.15, 0.01), "Relaxed tightness band"),
    ParamMeta::period("context_bars", 8.0, (2.0, 26.0, 2.0), "Weeks of pre-run context"),
];

impl ParamSet for TightConsolidationParams {
    fn param_meta() -> &'static [ParamMeta] {
        TIGHT_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            min_weekly_bars: get_period(TIGHT_PARAMS, params, "min_weekly_bars", 8)?,
            min_run: get_period(TIGHT_PARAMS, params, "min_run", 3)?,
            max_run: get_period(TIGHT_PARAMS, params, "max_run", 12)?,
            strict_band: get_ratio(TIGHT_PARAMS, params, "strict_band", 0.045)?,
            relaxed_band: get_ratio(TIGHT_PARAMS, params, "relaxed_band", 0.07)?,
            context_bars: get_period(TIGHT_PARAMS, params, "context_bars", 8)?,
        })
    }

    fn family() -> &'static str {
        NAME
    }

    fn validate(&self) -> Result<()> {
        ensure_ordered(
            NAME,
            "min_run",
            self.min_run.get() as f64,
            "max_run",
            self.max_run.get() as f64,
        )?;
        ensure_ordered(
            NAME,
            "strict_band",
            self.strict_band.get(),
            "relaxed_band",
            self.relaxed_band.get(),
        )
    }
}

/// `(max high - min low) / median close` over a window
fn band(window: &[Bar]) -> Option<f64> {
    let high = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let low = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let mid = median(&closes(window))?;
    (mid > 0.0).then(|| (high - low) / mid)
}

/// Length and band of the longest trailing run within `relaxed`
fn trailing_run(bars: &[Bar], max_run: usize, relaxed: f64) -> (usize, f64) {
    let mut best = (0, 0.0);
    for len in 1..=max_run.min(bars.len()) {
        match band(&bars[bars.len() - len..]) {
            Some(b) if b <= relaxed => best = (len, b),
            _ => break,
        }
    }
    best
}

/// Weekly tight-consolidation detector
#[derive(Debug, Clone, Copy, Default)]
pub struct TightConsolidationDetector;

impl PatternDetector for TightConsolidationDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn metadata(&self) -> DetectorMetadata {
        DetectorMetadata {
            name: NAME,
            description: "Consecutive weekly closes inside a narrow band",
            kind: PatternKind::Structural,
            timeframes: &[Timeframe::Weekly],
        }
    }

    fn detect(
        &self,
        input: &PatternDetectorInput,
        params: &DetectorParameters,
    ) -> Result<PatternDetectorResult> {
        let p = &params.three_weeks_tight;
        let reasons = prerequisite_failures(input, None, Some(p.min_weekly_bars.get()));
        if !reasons.is_empty() {
            return Ok(PatternDetectorResult::insufficient_data(NAME, reasons));
        }

        let bars = input.weekly();
        let n = bars.len();
        let (run, band_width) = trailing_run(bars, p.max_run.get(), p.relaxed_band.get());
        if run < p.min_run.get() {
            return Ok(PatternDetectorResult::not_detected(NAME, ["tight_run_too_short"])
                .with_warning(format!("trailing_run_length:{run}")));
        }

        let start = n - run;
        let context = &bars[start.saturating_sub(p.context_bars.get())..start];
        let strict = band_width <= p.strict_band.get();
        let vol_ratio = volume_ratio(&bars[start..], context);
        let dry_up = vol_ratio.is_some_and(|r| r < 1.0);
        let prior_uptrend = match (context.first(), context.last()) {
            (Some(first), Some(last)) if context.len() > 1 => last.close > first.close,
            _ => false,
        };

        let Some(pivot_idx) = argmax_high(bars, start..n) else {
            return Ok(PatternDetectorResult::not_detected(NAME, ["tight_run_too_short"]));
        };
        let pivot = bars[pivot_idx].high;
        let distance = distance_to_pivot(bars[n - 1].close, pivot);

        let bonus = |ok: bool, weight: f64| if ok { weight } else { 0.0 };
        let tightness = 1.0 - unit(band_width, p.relaxed_band.get());
        let extra_weeks = unit((run - p.min_run.get()) as f64, 3.0);
        let quality = score(
            45.0 + 25.0 * tightness
                + bonus(strict, 10.0)
                + bonus(dry_up, 10.0)
                + bonus(prior_uptrend, 10.0),
        );
        let readiness = proximity_readiness(distance, p.relaxed_band.get(), 35.0, 95.0);
        let conf = confidence(
            0.45 + bonus(strict, 0.2)
                + bonus(dry_up, 0.1)
                + bonus(prior_uptrend, 0.1)
                + 0.05 * extra_weeks,
        );

        let checks = [
            ("tight_run_min_length", true),
            ("tightness_strict", strict),
            ("volume_dry_up", dry_up),
            ("prior_uptrend", prior_uptrend),
        ];
        let mut candidate = PatternCandidate::new(NAME, NAME)
            .timeframe(Timeframe::Weekly)
            .pivot(pivot, "tight_range_high", Some(bars[pivot_idx].date))
            .scores(Some(quality), Some(readiness), Some(conf))
            .metric("band_pct", 100.0 * band_width)
            .metric("run_length", run as f64)
            .metric("distance_to_pivot_pct", 100.0 * distance);
        if let Some(r) = vol_ratio {
            candidate = candidate.metric("run_volume_ratio", r);
        }
        for (name, ok) in checks {
            candidate = candidate.check(name, ok);
        }
        if !strict {
            candidate = candidate.note("band within relaxed threshold only");
        }

        let (passed, failed) = partition_checks(&checks);
        Ok(PatternDetectorResult::detected(NAME, vec![candidate])
            .with_passed(passed)
            .with_failed(failed))
    }
}
