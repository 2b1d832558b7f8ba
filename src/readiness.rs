//! Breakout-readiness features
//!
//! Volatility, volume and relative-strength readings on the latest daily bar.
//! Independent of the detectors; callers use them to rank or filter symbols
//! alongside the aggregated output.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::technicals::{
    atr, bollinger_width_pct, closes, linear_regression, mean, rolling_percentile_rank, volumes,
    AtrSmoothing,
};
use crate::{Bar, NaiveDate, Period};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessParams {
    pub atr_period: Period,
    /// Bars of ATR% the trend slope is fitted over
    pub atr_trend_window: Period,
    pub bb_period: Period,
    pub bb_std: f64,
    pub bb_pctile_window: Period,
    pub volume_avg_period: Period,
    pub rs_high_lookback: Period,
}

impl Default for ReadinessParams {
    fn default() -> Self {
        Self {
            atr_period: Period::new_const(14),
            atr_trend_window: Period::new_const(20),
            bb_period: Period::new_const(20),
            bb_std: 2.0,
            bb_pctile_window: Period::new_const(252),
            volume_avg_period: Period::new_const(50),
            rs_high_lookback: Period::new_const(252),
        }
    }
}

/// Readings on the latest bar. `None` when history is too short or an
/// input is missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadinessFeatures {
    /// `(close - pivot) / pivot * 100`, negative below the pivot
    pub distance_to_pivot_pct: Option<f64>,
    pub atr14_pct: Option<f64>,
    /// Regression slope of ATR% per bar
    pub atr14_pct_trend: Option<f64>,
    pub bb_width_pct: Option<f64>,
    pub bb_width_pctile_252: Option<f64>,
    /// Latest volume over the mean of the preceding bars
    pub volume_vs_50d: Option<f64>,
    /// Close divided by the benchmark close on the same date
    pub rs_line: Option<f64>,
    pub rs_line_new_high: Option<bool>,
}

pub fn compute_readiness_features(
    daily: &[Bar],
    benchmark: Option<&[Bar]>,
    pivot: Option<f64>,
    params: &ReadinessParams,
) -> ReadinessFeatures {
    let Some(last) = daily.last() else {
        return ReadinessFeatures::default();
    };
    let n = daily.len();

    let distance_to_pivot_pct = pivot
        .filter(|p| p.is_finite() && *p > 0.0)
        .map(|p| (last.close - p) / p * 100.0);

    let atr_pct: Vec<Option<f64>> = atr(daily, params.atr_period.get(), AtrSmoothing::Wilder)
        .into_iter()
        .zip(daily)
        .map(|(a, bar)| a.map(|a| a / bar.close * 100.0))
        .collect();
    let atr14_pct = atr_pct[n - 1];

    let trend_window = params.atr_trend_window.get();
    let atr14_pct_trend = if n >= trend_window {
        atr_pct[n - trend_window..]
            .iter()
            .copied()
            .collect::<Option<Vec<f64>>>()
            .and_then(|window| linear_regression(&window))
            .map(|fit| fit.slope)
    } else {
        None
    };

    let widths = bollinger_width_pct(&closes(daily), params.bb_period.get(), params.bb_std);
    let bb_width_pct = widths[n - 1];
    let bb_width_pctile_252 = rolling_percentile_rank(
        &widths,
        params.bb_pctile_window.get(),
        params.bb_period.get(),
    )[n - 1];

    let vol_period = params.volume_avg_period.get();
    let volume_vs_50d = if n > vol_period {
        mean(&volumes(&daily[n - 1 - vol_period..n - 1]))
            .filter(|avg| *avg > 0.0)
            .map(|avg| last.volume / avg)
    } else {
        None
    };

    let (rs_line, rs_line_new_high) = match benchmark {
        Some(benchmark) => relative_strength(daily, benchmark, params.rs_high_lookback.get()),
        None => (None, None),
    };

    ReadinessFeatures {
        distance_to_pivot_pct,
        atr14_pct,
        atr14_pct_trend,
        bb_width_pct,
        bb_width_pctile_252,
        volume_vs_50d,
        rs_line,
        rs_line_new_high,
    }
}

/// RS line on the latest bar and whether it is at its trailing high.
/// Bars without a same-date benchmark close are skipped.
fn relative_strength(
    daily: &[Bar],
    benchmark: &[Bar],
    lookback: usize,
) -> (Option<f64>, Option<bool>) {
    let bench: HashMap<NaiveDate, f64> = benchmark
        .iter()
        .filter(|b| b.close > 0.0)
        .map(|b| (b.date, b.close))
        .collect();

    let start = daily.len().saturating_sub(lookback);
    let rs: Vec<Option<f64>> = daily[start..]
        .iter()
        .map(|bar| bench.get(&bar.date).map(|c| bar.close / c))
        .collect();

    let Some(Some(current)) = rs.last().copied() else {
        debug!("benchmark has no close on the latest date");
        return (None, None);
    };
    let high = rs.iter().flatten().fold(f64::NEG_INFINITY, |acc, v| acc.max(*v));
    (Some(current), Some(current >= high))
}
