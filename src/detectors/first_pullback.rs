//! First pullback to a rising moving average, confirmed by a volume bounce

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::helpers::{confidence, distance_to_pivot, prerequisite_failures, score, unit};
use crate::config::DetectorParameters;
use crate::contract::{PatternCandidate, PatternDetectorInput, PatternDetectorResult};
use crate::params::{get_period, get_ratio, get_scalar, ParamMeta, ParamSet};
use crate::technicals::{argmax_high, closes, mean, sma, volumes};
use crate::{DetectorMetadata, PatternDetector, PatternKind, Period, Ratio, Result, Timeframe};

const NAME: &str = "first_pullback";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirstPullbackParams {
    pub min_daily_bars: Period,
    /// SMA period used when `ma_column` is absent from the input
    pub ma_period: Period,
    /// Precomputed moving-average column
    pub ma_column: String,
    /// Distance from the MA that still counts as a touch
    pub touch_band: Ratio,
    /// Bars searched for the touch
    pub lookback: Period,
    /// Consecutive closes above the MA required before the touch
    pub min_bars_above_ma: Period,
    /// Bars after the touch allowed for the bounce
    pub bounce_window: Period,
    /// Bounce volume relative to its trailing average
    pub bounce_volume_ratio: f64,
    pub volume_avg_period: Period,
    /// MA rise measured over this many bars ahead of the search window
    pub uptrend_lookback: Period,
}

impl Default for FirstPullbackParams {
    fn default() -> Self {
        Self {
            min_daily_bars: Period::new_const(60),
            ma_period: Period::new_const(21),
            ma_column: "ma_21".to_string(),
            touch_band: Ratio::new_const(0.015),
            lookback: Period::new_const(40),
            min_bars_above_ma: Period::new_const(5),
            bounce_window: Period::new_const(5),
            bounce_volume_ratio: 1.0,
            volume_avg_period: Period::new_const(20),
            uptrend_lookback: Period::new_const(20),
        }
    }
}

static FIRST_PULLBACK_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("min_daily_bars", 60.0, (30.0, 250.0, 10.0), "Minimum daily history"),
    ParamMeta::period("ma_period", 21.0, (5.0, 50.0, 1.0), "Fallback SMA period"),
    ParamMeta::ratio("touch_band", 0.015, (0.005, 0.05, 0.005), "MA touch band"),
    ParamMeta::period("lookback", 40.0, (10.0, 120.0, 10.0), "Touch search window"),
    ParamMeta::period("min_bars_above_ma", 5.0, (1.0, 20.0, 1.0), "Closes above MA before touch"),
    ParamMeta::period("bounce_window", 5.0, (1.0, 10.0, 1.0), "Bars allowed for the bounce"),
    ParamMeta::scalar("bounce_volume_ratio", 1.0, (0.5, 3.0, 0.25), "Bounce volume vs average"),
    ParamMeta::period("volume_avg_period", 20.0, (5.0, 60.0, 5.0), "Volume average period"),
    ParamMeta::period("uptrend_lookback", 20.0, (5.0, 60.0, 5.0), "MA rise lookback"),
];

impl ParamSet for FirstPullbackParams {
    fn param_meta() -> &'static [ParamMeta] {
        FIRST_PULLBACK_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let m = FIRST_PULLBACK_PARAMS;
        Ok(Self {
            min_daily_bars: get_period(m, params, "min_daily_bars", 60)?,
            ma_period: get_period(m, params, "ma_period", 21)?,
            ma_column: Self::default().ma_column,
            touch_band: get_ratio(m, params, "touch_band", 0.015)?,
            lookback: get_period(m, params, "lookback", 40)?,
            min_bars_above_ma: get_period(m, params, "min_bars_above_ma", 5)?,
            bounce_window: get_period(m, params, "bounce_window", 5)?,
            bounce_volume_ratio: get_scalar(m, params, "bounce_volume_ratio", 1.0)?,
            volume_avg_period: get_period(m, params, "volume_avg_period", 20)?,
            uptrend_lookback: get_period(m, params, "uptrend_lookback", 20)?,
        })
    }

    fn family() -> &'static str {
        NAME
    }
}

/// First-pullback trigger
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstPullbackDetector;

impl PatternDetector for FirstPullbackDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn metadata(&self) -> DetectorMetadata {
        DetectorMetadata {
            name: NAME,
            description: "First test of the trend MA followed by a volume bounce",
            kind: PatternKind::Trigger,
            timeframes: &[Timeframe::Daily],
        }
    }

    fn detect(
        &self,
        input: &PatternDetectorInput,
        params: &DetectorParameters,
    ) -> Result<PatternDetectorResult> {
        let p = &params.first_pullback;
        let reasons = prerequisite_failures(input, Some(p.min_daily_bars.get()), None);
        if !reasons.is_empty() {
            return Ok(PatternDetectorResult::insufficient_data(NAME, reasons));
        }

        let bars = input.daily();
        let n = bars.len();
        let mut base = PatternDetectorResult::new(NAME);
        let ma: Vec<Option<f64>> = match input.column(&p.ma_column) {
            Some(column) => column.iter().map(|v| v.is_finite().then_some(*v)).collect(),
            None => {
                base = base.with_warning("ma_column_missing_computed_sma");
                sma(&closes(bars), p.ma_period.get())
            }
        };

        let start = n.saturating_sub(p.lookback.get());
        let trend_ref = start
            .checked_sub(p.uptrend_lookback.get())
            .and_then(|i| ma[i]);
        let prior_uptrend = match (trend_ref, ma[start]) {
            (Some(then), Some(now)) => now > then && bars[start].close > now,
            _ => false,
        };
        if !prior_uptrend {
            return Ok(base.with_failed(["no_prior_uptrend"]));
        }

        // Only the first MA test of a leg counts; a close below the band ends the leg
        let band = p.touch_band.get();
        let mut above = 0;
        let mut tested = false;
        let mut touch = None;
        for (t, bar) in bars.iter().enumerate() {
            let Some(m) = ma[t] else {
                above = 0;
                tested = false;
                continue;
            };
            let in_band = (bar.low / m - 1.0).abs() <= band && bar.close >= m * (1.0 - band);
            if in_band {
                let qualifies = above >= p.min_bars_above_ma.get();
                if !tested && qualifies && t >= start {
                    touch = Some((t, m, above));
                    break;
                }
                // A near-MA bar before the advance is established is still base
                tested |= qualifies;
                above = 0;
                continue;
            }
            if bar.close < m * (1.0 - band) {
                tested = false;
            }
            above = if bar.close > m { above + 1 } else { 0 };
        }
        let Some((t, touch_ma, streak)) = touch else {
            return Ok(base
                .with_passed(["prior_uptrend"])
                .with_failed(["no_ma_tests_detected"]));
        };

        let window_end = (t + p.bounce_window.get()).min(n - 1);
        let Some(b) = (t + 1..=window_end).find(|&i| bars[i].close > bars[t].high) else {
            return Ok(base
                .with_passed(["prior_uptrend", "ma_touch"])
                .with_failed(["no_bounce_after_touch"]));
        };

        let avg_volume = mean(&volumes(&bars[b.saturating_sub(p.volume_avg_period.get())..b]));
        let vol_ratio = match avg_volume {
            Some(avg) if avg > 0.0 => bars[b].volume / avg,
            _ => 0.0,
        };
        if vol_ratio < p.bounce_volume_ratio {
            return Ok(base
                .with_passed(["prior_uptrend", "ma_touch", "bounce_confirmed"])
                .with_failed(["bounce_volume_not_confirmed"]));
        }

        let Some(h) = argmax_high(bars, start..t + 1) else {
            return Ok(base.with_failed(["no_ma_tests_detected"]));
        };
        let pivot = bars[h].high;
        let touch_depth = bars[t].low / touch_ma - 1.0;
        let precision = 1.0 - unit(touch_depth.abs(), band);
        let volume_strength = unit(vol_ratio, 2.0);
        let freshness = 1.0 - unit((n - 1 - b) as f64, 2.0 * p.bounce_window.get() as f64);
        let trend_strength = unit(streak as f64, 2.0 * p.min_bars_above_ma.get() as f64);

        let quality =
            score(45.0 + 25.0 * precision + 20.0 * volume_strength + 10.0 * trend_strength);
        let readiness = score(55.0 + 40.0 * freshness);
        let conf = confidence(0.5 + 0.2 * precision + 0.15 * volume_strength);

        let checks = ["prior_uptrend", "ma_touch", "bounce_confirmed", "bounce_volume_confirmed"];
        let mut candidate = PatternCandidate::new(NAME, NAME)
            .timeframe(Timeframe::Daily)
            .pivot(pivot, "pullback_high", Some(bars[h].date))
            .scores(Some(quality), Some(readiness), Some(conf))
            .metric("touch_bars_ago", (n - 1 - t) as f64)
            .metric("touch_distance_pct", 100.0 * touch_depth)
            .metric("ma_at_touch", touch_ma)
            .metric("bars_above_ma_before_touch", streak as f64)
            .metric("bounce_volume_ratio", vol_ratio)
            .metric("distance_to_pivot_pct", 100.0 * distance_to_pivot(bars[n - 1].close, pivot));
        for name in checks {
            candidate = candidate.check(name, true);
        }

        let mut result = base.with_passed(checks);
        result.candidates.push(candidate);
        Ok(result)
    }
}
